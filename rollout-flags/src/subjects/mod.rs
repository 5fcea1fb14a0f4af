pub mod subject_identity;
pub mod subject_models;
pub mod subject_registry;
