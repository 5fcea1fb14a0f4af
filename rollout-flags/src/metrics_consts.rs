// Resolution counters
pub const FLAG_RESOLUTION_COUNTER: &str = "rollout_flags_resolution_total";
pub const FLAG_EVALUATION_ERROR_COUNTER: &str = "rollout_flags_evaluation_error_total";
pub const ROLLOUT_ABSTAIN_COUNTER: &str = "rollout_flags_rollout_abstain_total";
pub const UNKNOWN_SUBJECT_COUNTER: &str = "rollout_flags_unknown_subject_total";
pub const INCOMPATIBLE_SUBJECT_COUNTER: &str = "rollout_flags_incompatible_subject_total";

// Store
pub const ROLLOUT_STORE_ERRORS_COUNTER: &str = "rollout_flags_store_errors_total";
pub const ROLLOUTS_CREATED_COUNTER: &str = "rollout_flags_rollouts_created_total";
pub const ROLLOUT_FETCH_TIME: &str = "rollout_flags_rollout_fetch_time";
