use thiserror::Error;

/// Raised while turning configured subject paths into subject instances, or while
/// declaring flags. These surface at startup and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid subject path `{0}`, expected `module::Name`")]
    InvalidSubjectPath(String),
    #[error("No subject module named `{0}`")]
    UnknownModule(String),
    #[error("Subject module `{module}` has no attribute `{name}`")]
    UnknownSubject { module: String, name: String },
    #[error("Can't instantiate abstract subject `{0}`")]
    AbstractSubject(String),
    #[error("Flag `{0}` is already registered")]
    DuplicateFlag(String),
}

/// Raised when checking a rollout before it is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Flag `{0}` does not exist")]
    UnknownFlag(String),
    #[error("Subject `{0}` is not configured")]
    UnknownSubject(String),
    #[error("Flag `{flag}` cannot be used with subject `{subject}`. It can only be used with subjects that support `{required_type}`.")]
    IncompatibleSubject {
        flag: String,
        subject: String,
        required_type: &'static str,
    },
    #[error("Enable percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(f64),
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Expected an object of type `{expected}`, got `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("redis unavailable")]
    RedisUnavailable,
    #[error("Timed out while fetching rollouts")]
    TimeoutError,
    #[error("Failed to parse data")]
    DataParsingError,
}

impl FlagError {
    /// Returns a short error code, used as a metrics label.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::Configuration(_) => "configuration_error",
            FlagError::Validation(_) => "validation_error",
            FlagError::TypeMismatch { .. } => "type_mismatch",
            FlagError::RedisUnavailable => "redis_unavailable",
            FlagError::TimeoutError => "timeout",
            FlagError::DataParsingError => "data_parsing_error",
        }
    }

    /// Store failures are transient; everything else is a caller or configuration bug.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlagError::RedisUnavailable | FlagError::TimeoutError)
    }
}
