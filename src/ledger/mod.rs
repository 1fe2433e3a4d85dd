//! Flock accounting ledger.
//!
//! The only code that mutates `flocks.current_count`. Each public mutation runs
//! in one transaction that starts by claiming the rows it reads (see
//! [`store`]), recomputes counts with [`counts`], and commits or rolls back as a
//! unit.

use thiserror::Error;

use crate::{
    error::{LEDGER_EXCEEDS_INITIAL, LEDGER_INSUFFICIENT_BIRDS, LEDGER_NEGATIVE_COUNT},
    AppError,
};

pub mod counts;
pub mod flocks;
pub mod mortality;
pub(crate) mod store;
pub mod treatment;

pub use flocks::{create_flock, get_flock, list_flocks};
pub use mortality::{
    create_mortality, delete_mortality, get_mortality, list_mortality, update_mortality,
};
pub use treatment::{
    create_treatment, delete_treatment, get_treatment, list_treatments, update_treatment,
    update_treatment_status,
};

/// A head-count bound an operation would break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    #[error("Cannot remove {requested} birds, only {available} available.")]
    InsufficientBirds {
        flock_id: String,
        requested: i64,
        available: i64,
    },
    #[error("Cannot change the count by {delta}: the flock has {current} birds and would drop to {resulting}.")]
    NegativeCount {
        flock_id: String,
        current: i64,
        delta: i64,
        resulting: i64,
    },
    #[error("Cannot restore {restoring} birds: the flock would reach {resulting}, above its initial {initial}.")]
    ExceedsInitial {
        flock_id: String,
        restoring: i64,
        resulting: i64,
        initial: i64,
    },
}

impl From<LedgerViolation> for AppError {
    fn from(violation: LedgerViolation) -> Self {
        let message = violation.to_string();
        match violation {
            LedgerViolation::InsufficientBirds {
                flock_id,
                requested,
                available,
            } => AppError::new(LEDGER_INSUFFICIENT_BIRDS, message)
                .with_context("flock_id", flock_id)
                .with_context("requested", requested.to_string())
                .with_context("available", available.to_string()),
            LedgerViolation::NegativeCount {
                flock_id,
                current,
                delta,
                resulting,
            } => AppError::new(LEDGER_NEGATIVE_COUNT, message)
                .with_context("flock_id", flock_id)
                .with_context("current", current.to_string())
                .with_context("delta", delta.to_string())
                .with_context("resulting", resulting.to_string()),
            LedgerViolation::ExceedsInitial {
                flock_id,
                restoring,
                resulting,
                initial,
            } => AppError::new(LEDGER_EXCEEDS_INITIAL, message)
                .with_context("flock_id", flock_id)
                .with_context("restoring", restoring.to_string())
                .with_context("resulting", resulting.to_string())
                .with_context("initial", initial.to_string()),
        }
    }
}
