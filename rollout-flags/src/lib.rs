pub mod config;
pub mod context;
pub mod errors;
pub mod flags;
pub mod metrics_consts;
pub mod metrics_utils;
pub mod redis;
pub mod rollouts;
pub mod subjects;

// Shared with the integration tests under tests/, so it can't be cfg(test).
pub mod test_utils;
