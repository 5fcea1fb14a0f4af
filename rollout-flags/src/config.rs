use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use once_cell::sync::Lazy;

use crate::{
    errors::ConfigurationError,
    rollouts::rollout_operations::DEFAULT_ROLLOUTS_KEY_PREFIX,
    subjects::{
        subject_models::{IP_ADDRESS_SUBJECT, USER_SUBJECT},
        subject_registry::{SubjectCatalog, SubjectRegistry},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Comma-separated `module::Name` subject paths, in the order they should be offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectNames(pub Vec<String>);

impl FromStr for SubjectNames {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SubjectNames(
            s.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
        ))
    }
}

impl Deref for SubjectNames {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "false")]
    pub debug: FlexBool,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_timeout_ms: u64,

    #[envconfig(default = "rollout_flags:rollouts:")]
    pub rollouts_key_prefix: String,

    #[envconfig(
        from = "FLAG_SUBJECTS",
        default = "rollout_flags::subjects::IpAddressSubject,rollout_flags::subjects::UserSubject"
    )]
    pub flag_subjects: SubjectNames,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            debug: FlexBool(false),
            redis_url: "redis://localhost:6379/".to_string(),
            redis_timeout_ms: 100,
            rollouts_key_prefix: DEFAULT_ROLLOUTS_KEY_PREFIX.to_string(),
            flag_subjects: SubjectNames(vec![
                IP_ADDRESS_SUBJECT.to_string(),
                USER_SUBJECT.to_string(),
            ]),
        }
    }

    pub fn redis_timeout(&self) -> Option<Duration> {
        match self.redis_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Builds the configured subjects out of `catalog`, failing on the first unknown or
    /// abstract name.
    pub fn subject_registry(
        &self,
        catalog: &SubjectCatalog,
    ) -> Result<SubjectRegistry, ConfigurationError> {
        SubjectRegistry::from_config(catalog, self.flag_subjects.0.as_slice())
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);
