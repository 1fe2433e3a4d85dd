//! Head-count arithmetic. Every function returns the flock's new
//! `current_count` or the bound it would break; none of them touch the store.
//!
//! Sums saturate: a saturated result is always outside `0..=initial_count`,
//! so it is reported as a violation instead of wrapping.

use super::LedgerViolation;
use crate::model::Flock;

/// Remove `count` birds from the flock.
pub fn debit(flock: &Flock, count: i64) -> Result<i64, LedgerViolation> {
    if flock.current_count < count {
        return Err(LedgerViolation::InsufficientBirds {
            flock_id: flock.id.clone(),
            requested: count,
            available: flock.current_count,
        });
    }
    Ok(flock.current_count.saturating_sub(count))
}

/// Return `count` birds to the flock.
pub fn credit(flock: &Flock, count: i64) -> Result<i64, LedgerViolation> {
    let resulting = flock.current_count.saturating_add(count);
    if resulting > flock.initial_count {
        return Err(LedgerViolation::ExceedsInitial {
            flock_id: flock.id.clone(),
            restoring: count,
            resulting,
            initial: flock.initial_count,
        });
    }
    Ok(resulting)
}

/// Re-price an existing debit of `old_count` birds as `new_count` birds.
pub fn rebalance(flock: &Flock, old_count: i64, new_count: i64) -> Result<i64, LedgerViolation> {
    let delta = new_count.saturating_sub(old_count);
    let resulting = flock.current_count.saturating_sub(delta);
    if resulting < 0 {
        return Err(LedgerViolation::NegativeCount {
            flock_id: flock.id.clone(),
            current: flock.current_count,
            delta,
            resulting,
        });
    }
    if resulting > flock.initial_count {
        return Err(LedgerViolation::ExceedsInitial {
            flock_id: flock.id.clone(),
            restoring: -delta,
            resulting,
            initial: flock.initial_count,
        });
    }
    Ok(resulting)
}
