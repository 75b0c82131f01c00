// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures surfaced by the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The session is ended and cannot accept new messages.
    #[error("session {0} has ended")]
    SessionEnded(String),

    /// Active sessions must be ended before deletion.
    #[error("cannot delete active session {0}")]
    DeleteActive(String),

    /// Per-process session-creation cap exceeded.
    #[error("session creation rate limit exceeded ({0}/minute)")]
    RateLimited(u32),

    /// Malformed input (e.g. an unparseable jobs file).
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Stable label for per-error-type metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::SessionEnded(_) => "session_ended",
            Self::DeleteActive(_) => "delete_active",
            Self::RateLimited(_) => "rate_limited",
            Self::Invalid(_) => "invalid",
            Self::Database(_) => "database",
        }
    }
}
