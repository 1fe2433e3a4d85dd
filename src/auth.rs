//! Caller identity capability.
//!
//! Every mutating ledger function takes a [`Caller`]. The only way to obtain
//! one is [`require_caller`], so a handler body cannot run before the identity
//! check has passed.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::{error::AUTH_UNAUTHENTICATED, AppError, AppResult};

pub const AUTH_MISSING_MESSAGE: &str = "You need to be signed in to change flock records.";
pub const AUTH_INVALID_MESSAGE: &str = "The caller identity could not be resolved.";

static CALLER_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@:+-]{0,127}$")
        .expect("caller id validation pattern to compile")
});

#[must_use = "A resolved caller must be passed to the ledger operation it authorises"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    id: String,
}

impl Caller {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Resolve the caller identity supplied by the transport layer.
#[allow(clippy::result_large_err)]
pub fn require_caller(raw: Option<&str>) -> AppResult<Caller> {
    let Some(candidate) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        warn!(
            target: "flockbook",
            event = "caller_rejected",
            reason = "missing"
        );
        return Err(AppError::new(AUTH_UNAUTHENTICATED, AUTH_MISSING_MESSAGE)
            .with_context("reason", "missing"));
    };

    if !CALLER_ID_PATTERN.is_match(candidate) {
        warn!(
            target: "flockbook",
            event = "caller_rejected",
            reason = "malformed"
        );
        return Err(AppError::new(AUTH_UNAUTHENTICATED, AUTH_INVALID_MESSAGE)
            .with_context("reason", "malformed"));
    }

    Ok(Caller {
        id: candidate.to_string(),
    })
}
