//! Condition Tracker.
//!
//! # Invariants
//! - At most one condition per type.
//! - Set order is first-set order; updating a condition keeps its position.
//! - `last_transition_time` moves only when `status` flips.
//! - `reason`, `message` and `observed_generation` are always refreshed.

use chrono::{DateTime, Utc};
use mailk_schemas::{Condition, ConditionStatus};

/// Insert or update the condition of `type_`. Returns `true` if the status
/// flipped (or the condition was new).
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
    observed_generation: i64,
) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let flipped = existing.status != status;
        if flipped {
            existing.status = status;
            existing.last_transition_time = now;
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
        return flipped;
    }

    conditions.push(Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
        observed_generation,
    });
    true
}
