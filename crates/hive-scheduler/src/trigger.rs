// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Schedule parsing: `Nm`/`Nh` interval shorthand or 6-field cron.
//!
//! Cron expressions carry a seconds field (`sec min hour dom mon dow`) and
//! are evaluated in the server's local timezone.  `*/k`, lists and ranges
//! use the standard operators.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("malformed schedule expression '{0}'")]
    BadExpression(String),

    #[error("job references unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("unsupported payload type '{0}'")]
    BadPayload(String),
}

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed period from scheduler start; drift is not compensated.
    Interval { period: Duration },
    /// 6-field cron evaluated with seconds granularity.
    Cron { schedule: Box<cron::Schedule> },
}

impl Trigger {
    /// Next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { period } => {
                Some(now + chrono::Duration::from_std(*period).unwrap_or(chrono::Duration::zero()))
            }
            Self::Cron { schedule } => schedule
                .after(&now.with_timezone(&Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Parse `Nm` / `Nh` shorthand or a 6-field cron expression.
pub fn parse_schedule(spec: &str) -> Result<Trigger, ScheduleError> {
    let spec = spec.trim();

    if let Some(trigger) = parse_interval(spec) {
        return Ok(trigger);
    }

    if spec.split_whitespace().count() == 6 {
        let schedule = cron::Schedule::from_str(spec)
            .map_err(|_| ScheduleError::BadExpression(spec.to_string()))?;
        return Ok(Trigger::Cron { schedule: Box::new(schedule) });
    }

    Err(ScheduleError::BadExpression(spec.to_string()))
}

/// `^\d+[mh]$` — minutes or hours.
fn parse_interval(spec: &str) -> Option<Trigger> {
    let (digits, unit) = spec.split_at(spec.len().checked_sub(1)?);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    if n == 0 {
        return None;
    }
    let period = match unit {
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => return None,
    };
    Some(Trigger::Interval { period })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
