//! Result aggregation
//!
//! Folds per-recorder outcomes into the immutable [`StepResult`]. Every
//! outcome is kept, failed ones included, so consumers can tell a recorder
//! that failed from one that was never configured.

use crate::types::{RecorderOutcome, StepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Step-level facts recorded alongside the outcomes
#[derive(Debug, Clone)]
pub struct StepSummary {
    pub step_identifier: String,
    pub session_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub cancelled: bool,
}

/// Build the step result from every recorder's outcome
pub fn aggregate<I>(summary: StepSummary, outcomes: I) -> StepResult
where
    I: IntoIterator<Item = (String, RecorderOutcome)>,
{
    let outcomes: BTreeMap<String, RecorderOutcome> = outcomes.into_iter().collect();

    StepResult::from_parts(
        summary.step_identifier,
        summary.session_id,
        summary.start_date,
        summary.end_date,
        summary.cancelled,
        outcomes,
    )
}

/// Counts of a step result, for logs and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn of(result: &StepResult) -> Self {
        let succeeded = result
            .outcomes()
            .values()
            .filter(|outcome| outcome.is_success())
            .count();
        Self {
            total: result.len(),
            succeeded,
            failed: result.len() - succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecorderErrorKind;
    use crate::types::{FailureReason, FinalizedOutput};

    fn summary() -> StepSummary {
        let now = Utc::now();
        StepSummary {
            step_identifier: "walk".to_string(),
            session_id: Uuid::new_v4(),
            start_date: now,
            end_date: now,
            cancelled: false,
        }
    }

    fn success() -> RecorderOutcome {
        RecorderOutcome::Success(FinalizedOutput::Samples { samples: Vec::new() })
    }

    #[test]
    fn test_aggregate_keeps_failures() {
        let result = aggregate(
            summary(),
            vec![
                ("accel".to_string(), success()),
                (
                    "records".to_string(),
                    RecorderOutcome::Failure(FailureReason::new(
                        RecorderErrorKind::PermissionDenied,
                        "denied",
                    )),
                ),
            ],
        );

        assert_eq!(result.len(), 2);
        assert_eq!(result.succeeded(), vec!["accel"]);
        assert_eq!(
            result.outcome("records").and_then(RecorderOutcome::failure_kind),
            Some(RecorderErrorKind::PermissionDenied)
        );
        assert!(!result.is_absent("records"));
        assert!(result.is_absent("gyro"));
    }

    #[test]
    fn test_outcome_counts() {
        let result = aggregate(
            summary(),
            vec![
                ("a".to_string(), success()),
                ("b".to_string(), success()),
                (
                    "c".to_string(),
                    RecorderOutcome::Failure(FailureReason::new(RecorderErrorKind::Timeout, "slow")),
                ),
            ],
        );

        assert_eq!(
            OutcomeCounts::of(&result),
            OutcomeCounts {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_empty_step_result() {
        let result = aggregate(summary(), Vec::new());
        assert!(result.is_empty());
        assert_eq!(OutcomeCounts::of(&result).total, 0);
    }
}
