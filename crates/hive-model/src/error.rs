// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures surfaced by the LLM gateway and its provider drivers.
///
/// `is_hard()` distinguishes provider-side faults (eligible for fallback
/// routing) from request-side faults that no fallback can fix.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider HTTP error, non-2xx status, or connection failure.
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    /// The request exceeded its wall-clock budget.
    #[error("request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Circuit breaker open: rejected before any network activity.
    #[error("Circuit breaker open for model '{alias}'")]
    CircuitOpen { alias: String },

    /// Response body did not match the provider wire format.
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// Tool-call structure was present but unusable (missing name/arguments).
    #[error("malformed tool call in provider response: {0}")]
    MalformedToolCall(String),

    /// The requested alias is not in the catalogue.
    #[error("unknown model alias '{0}'")]
    UnknownAlias(String),

    /// Primary and every configured fallback failed.
    #[error("all models failed for '{alias}': {last}")]
    ExhaustedFallbacks { alias: String, last: String },
}

impl LlmError {
    /// `true` when the fallback chain should be consulted.  Content-policy
    /// refusals are ordinary model output and never reach this type; decode
    /// and malformed-tool-call errors are provider faults too.
    pub fn is_hard(&self) -> bool {
        !matches!(self, Self::ExhaustedFallbacks { .. })
    }

    /// Stable label for per-error-type metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "provider",
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Decode(_) => "decode",
            Self::MalformedToolCall(_) => "malformed_tool_call",
            Self::UnknownAlias(_) => "unknown_alias",
            Self::ExhaustedFallbacks { .. } => "exhausted_fallbacks",
        }
    }
}
