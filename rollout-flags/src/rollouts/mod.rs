pub mod rollout_models;
pub mod rollout_operations;
