use tracing::{debug, warn};

use crate::{
    context::EvaluationContext,
    errors::FlagError,
    flags::flag_match_reason::FlagResolutionReason,
    metrics_consts::{FLAG_EVALUATION_ERROR_COUNTER, FLAG_RESOLUTION_COUNTER},
    metrics_utils::inc,
    rollouts::rollout_models::{Rollout, RolloutId},
    subjects::subject_registry::SubjectRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagResolution {
    pub value: bool,
    pub reason: FlagResolutionReason,
    /// The rollout that decided, if one did.
    pub rollout_id: Option<RolloutId>,
}

/// Walks a flag's rollouts in order and returns the first definitive answer.
///
/// `rollouts` must already be sorted newest first (see
/// [`sort_newest_first`](crate::rollouts::rollout_operations::sort_newest_first)), so the most
/// recent rollout that can identify the context wins. Rollouts that abstain are skipped, and
/// if none decides the flag falls back to `default`. Rollouts for other flags are ignored.
///
/// Object contexts are checked against the flag's payload type before this is called. Stale
/// rollouts, including ones whose subject can't identify the object, abstain.
pub fn resolve_rollouts(
    flag_id: &str,
    default: bool,
    rollouts: &[Rollout],
    subjects: &SubjectRegistry,
    context: EvaluationContext<'_>,
) -> Result<FlagResolution, FlagError> {
    let mut considered = 0;

    for rollout in rollouts {
        if rollout.flag_id != flag_id {
            warn!(
                flag_id,
                rollout_flag_id = %rollout.flag_id,
                rollout_id = rollout.id,
                "ignoring rollout for another flag"
            );
            continue;
        }
        considered += 1;

        let decision = match rollout.evaluate(subjects, context) {
            Ok(decision) => decision,
            Err(e) => {
                inc(
                    FLAG_EVALUATION_ERROR_COUNTER,
                    &[("reason".to_string(), e.error_code().to_string())],
                    1,
                );
                return Err(e);
            }
        };

        if let Some(value) = decision {
            let reason = if value {
                FlagResolutionReason::RolloutMatch
            } else {
                FlagResolutionReason::OutOfRolloutBound
            };
            return Ok(record(FlagResolution {
                value,
                reason,
                rollout_id: Some(rollout.id),
            }));
        }
    }

    let reason = if considered == 0 {
        FlagResolutionReason::NoRollouts
    } else {
        FlagResolutionReason::NoRolloutMatch
    };
    debug!(flag_id, considered, %reason, "falling back to default");

    Ok(record(FlagResolution {
        value: default,
        reason,
        rollout_id: None,
    }))
}

fn record(resolution: FlagResolution) -> FlagResolution {
    inc(
        FLAG_RESOLUTION_COUNTER,
        &[
            ("reason".to_string(), resolution.reason.to_string()),
            ("value".to_string(), resolution.value.to_string()),
        ],
        1,
    );
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::User;
    use crate::flags::flag_models::{FlagDefinition, TypedFlag};
    use crate::metrics_consts::INCOMPATIBLE_SUBJECT_COUNTER;
    use crate::subjects::subject_models::{IP_ADDRESS_SUBJECT, USER_SUBJECT};
    use crate::test_utils::{request_factory, rollout_factory, subject_registry, user_factory};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use rstest::rstest;

    // Scores for flag "hello" under the IP subject:
    //   10.1.2.3  -> 0.2972...
    //   10.0.0.19 -> 0.1460...
    //   10.0.0.45 -> 0.2450...
    // and under the user subject, user 42 -> 0.0654...

    fn resolve_request(
        default: bool,
        rollouts: &[Rollout],
        ip: Option<&str>,
        user: Option<User>,
    ) -> FlagResolution {
        let request = request_factory(ip, user);
        resolve_rollouts(
            "hello",
            default,
            rollouts,
            &subject_registry(),
            EvaluationContext::Request(&request),
        )
        .unwrap()
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_no_rollouts_uses_default(#[case] default: bool) {
        let resolution = resolve_request(default, &[], Some("10.1.2.3"), None);
        assert_eq!(resolution.value, default);
        assert_eq!(resolution.reason, FlagResolutionReason::NoRollouts);
        assert_eq!(resolution.rollout_id, None);
    }

    #[rstest]
    #[case(0.0, false)]
    #[case(10.0, false)]
    #[case(29.0, false)]
    #[case(30.0, true)]
    #[case(100.0, true)]
    fn test_percentage_threshold(#[case] percentage: f64, #[case] expected: bool) {
        let rollouts = vec![rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, percentage, 0)];
        let resolution = resolve_request(false, &rollouts, Some("10.1.2.3"), None);
        assert_eq!(resolution.value, expected);
        assert_eq!(resolution.rollout_id, Some(1));
    }

    #[rstest]
    #[case("10.0.0.19", true)]
    #[case("10.0.0.45", false)]
    fn test_twenty_percent_rollout(#[case] ip: &str, #[case] expected: bool) {
        let rollouts = vec![rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 20.0, 0)];
        let resolution = resolve_request(false, &rollouts, Some(ip), None);
        assert_eq!(resolution.value, expected);
        let expected_reason = if expected {
            FlagResolutionReason::RolloutMatch
        } else {
            FlagResolutionReason::OutOfRolloutBound
        };
        assert_eq!(resolution.reason, expected_reason);
    }

    #[test]
    fn test_newest_rollout_wins() {
        // Newest first: B (0%) was created after A (100%).
        let rollouts = vec![
            rollout_factory(2, "hello", IP_ADDRESS_SUBJECT, 0.0, 10),
            rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 100.0, 0),
        ];
        let resolution = resolve_request(true, &rollouts, Some("10.1.2.3"), None);
        assert!(!resolution.value);
        assert_eq!(resolution.rollout_id, Some(2));
    }

    #[test]
    fn test_abstaining_rollout_falls_through_to_older_one() {
        let rollouts = vec![
            rollout_factory(2, "hello", USER_SUBJECT, 0.0, 10),
            rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 100.0, 0),
        ];
        let resolution = resolve_request(false, &rollouts, Some("10.1.2.3"), None);
        assert!(resolution.value);
        assert_eq!(resolution.rollout_id, Some(1));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_all_abstaining_uses_default(#[case] default: bool) {
        let rollouts = vec![rollout_factory(1, "hello", USER_SUBJECT, 0.0, 0)];
        let resolution = resolve_request(default, &rollouts, Some("10.1.2.3"), None);
        assert_eq!(resolution.value, default);
        assert_eq!(resolution.reason, FlagResolutionReason::NoRolloutMatch);
    }

    #[test]
    fn test_missing_remote_address_abstains() {
        let rollouts = vec![rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 0.0, 0)];
        let resolution = resolve_request(true, &rollouts, None, None);
        assert!(resolution.value);
        assert_eq!(resolution.reason, FlagResolutionReason::NoRolloutMatch);
    }

    #[test]
    fn test_rollouts_for_other_flags_are_ignored() {
        let rollouts = vec![rollout_factory(1, "hello2", IP_ADDRESS_SUBJECT, 100.0, 0)];
        let resolution = resolve_request(false, &rollouts, Some("10.1.2.3"), None);
        assert!(!resolution.value);
        assert_eq!(resolution.reason, FlagResolutionReason::NoRollouts);
    }

    #[test]
    fn test_unknown_subject_class_abstains() {
        let rollouts = vec![
            rollout_factory(2, "hello", "rollout_flags::subjects::RetiredSubject", 0.0, 10),
            rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 100.0, 0),
        ];
        let resolution = resolve_request(false, &rollouts, Some("10.1.2.3"), None);
        assert!(resolution.value);
        assert_eq!(resolution.rollout_id, Some(1));
    }

    #[test]
    fn test_object_context_uses_typed_subject() {
        let rollouts = vec![
            rollout_factory(2, "hello", IP_ADDRESS_SUBJECT, 0.0, 10),
            rollout_factory(1, "hello", USER_SUBJECT, 10.0, 0),
        ];
        let user = user_factory(42);
        let resolution = resolve_rollouts(
            "hello",
            false,
            &rollouts,
            &subject_registry(),
            EvaluationContext::Object(&user),
        )
        .unwrap();
        // The IP rollout can't identify a bare user and abstains.
        assert!(resolution.value);
        assert_eq!(resolution.rollout_id, Some(1));
    }

    #[test]
    fn test_object_type_mismatch_is_an_error() {
        let flag = TypedFlag::<User>::new("hello");
        assert!(matches!(
            flag.check_payload(&42_i64),
            Err(FlagError::TypeMismatch {
                expected: "rollout_flags::context::User",
                actual: "i64",
            })
        ));
        assert!(flag.check_payload(&user_factory(42)).is_ok());
    }

    #[test]
    fn test_rollout_for_retyped_flag_abstains() {
        // "hejka" used to take users; its stored user rollout must not break i64 lookups.
        let flag = TypedFlag::<i64>::new("hejka").with_default(true);
        let rollouts = vec![rollout_factory(1, "hejka", USER_SUBJECT, 0.0, 0)];

        let resolution = flag
            .resolve_object_rollouts(&rollouts, &subject_registry(), &5_i64)
            .unwrap();
        assert!(resolution.value);
        assert_eq!(resolution.reason, FlagResolutionReason::NoRolloutMatch);
        assert_eq!(resolution.rollout_id, None);
    }

    #[test]
    fn test_incompatible_subject_is_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rollouts = vec![rollout_factory(1, "hello", USER_SUBJECT, 100.0, 0)];

        let resolution = metrics::with_local_recorder(&recorder, || {
            resolve_rollouts(
                "hello",
                false,
                &rollouts,
                &subject_registry(),
                EvaluationContext::Object(&"42".to_string()),
            )
        })
        .unwrap();
        assert!(!resolution.value);

        let counted = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .any(|(key, _, _, value)| {
                key.key().name() == INCOMPATIBLE_SUBJECT_COUNTER
                    && value == DebugValue::Counter(1)
            });
        assert!(counted);
    }

    #[test]
    fn test_resolution_is_counted_by_reason() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rollouts = vec![rollout_factory(1, "hello", IP_ADDRESS_SUBJECT, 100.0, 0)];

        metrics::with_local_recorder(&recorder, || {
            resolve_request(false, &rollouts, Some("10.1.2.3"), None);
        });

        let counted = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .any(|(key, _, _, value)| {
                key.key().name() == FLAG_RESOLUTION_COUNTER
                    && key
                        .key()
                        .labels()
                        .any(|label| label.key() == "reason" && label.value() == "rollout_match")
                    && value == DebugValue::Counter(1)
            });
        assert!(counted);
    }
}
