//! Ready condition derivation
//!
//! Readiness is re-derived from observed replica counts on every pass; the
//! caller merges the result with [`crate::crd::set_condition`] so the
//! transition time only moves when the status flips.

use chrono::{DateTime, Utc};

use crate::crd::{Condition, ConditionStatus, READY_CONDITION, REASON_ALL_READY, REASON_WAITING};

/// Derive the Ready condition from the desired and ready replica counts
///
/// An unset desired count is never ready: there is no target to compare
/// against, even though the StatefulSet itself runs one replica.
pub fn evaluate_ready(
    desired: Option<i32>,
    ready: i32,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    let (status, reason, message) = match desired {
        None => (
            ConditionStatus::False,
            REASON_WAITING,
            "spec.replicas is not set".to_string(),
        ),
        Some(desired) if ready == desired => (
            ConditionStatus::True,
            REASON_ALL_READY,
            format!("{ready}/{desired} replicas ready"),
        ),
        Some(desired) => (
            ConditionStatus::False,
            REASON_WAITING,
            format!("{ready}/{desired} replicas ready"),
        ),
    };

    Condition::new(READY_CONDITION, status, reason, message, now).observed_generation(generation)
}
