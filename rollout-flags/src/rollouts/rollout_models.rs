use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    context::EvaluationContext,
    errors::{FlagError, ValidationError},
    flags::flag_registry::FlagRegistry,
    metrics_consts::{
        INCOMPATIBLE_SUBJECT_COUNTER, ROLLOUT_ABSTAIN_COUNTER, UNKNOWN_SUBJECT_COUNTER,
    },
    metrics_utils::inc,
    subjects::subject_registry::SubjectRegistry,
};

pub type RolloutId = i64;

/// One persisted rule: enable `flag_id` for `enable_percentage`% of whatever
/// `subject_class` identifies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rollout {
    pub id: RolloutId,
    pub flag_id: String,
    pub subject_class: String,
    pub enable_percentage: f64,
    pub created_at: DateTime<Utc>,
}

impl Rollout {
    pub fn enable_fraction(&self) -> f64 {
        self.enable_percentage / 100.0
    }

    /// `Some(enabled)` when the rollout's subject identifies the context, `None` when it
    /// abstains.
    ///
    /// Rollouts referencing a subject that is no longer configured abstain too, so removing a
    /// subject from configuration never breaks resolution of flags that still mention it. The
    /// same goes for a typed subject handed an object it can't identify, which happens when a
    /// flag's payload type changed after the rollout was stored.
    pub fn evaluate(
        &self,
        subjects: &SubjectRegistry,
        context: EvaluationContext<'_>,
    ) -> Result<Option<bool>, FlagError> {
        let Some(subject) = subjects.get(&self.subject_class) else {
            warn!(
                rollout_id = self.id,
                flag_id = %self.flag_id,
                subject_class = %self.subject_class,
                "rollout references an unconfigured subject"
            );
            inc(
                UNKNOWN_SUBJECT_COUNTER,
                &[("subject_class".to_string(), self.subject_class.clone())],
                1,
            );
            return Ok(None);
        };

        if let EvaluationContext::Object(object) = context {
            if subject.object_type().is_some() && !subject.accepts_object(object) {
                warn!(
                    rollout_id = self.id,
                    flag_id = %self.flag_id,
                    subject_class = %self.subject_class,
                    payload_type = %object.type_tag(),
                    "rollout subject cannot identify this object type"
                );
                inc(
                    INCOMPATIBLE_SUBJECT_COUNTER,
                    &[("subject_class".to_string(), self.subject_class.clone())],
                    1,
                );
                return Ok(None);
            }
        }

        match subject.identify(context)? {
            Some(identity) => Ok(Some(identity.score(&self.flag_id) < self.enable_fraction())),
            None => {
                debug!(
                    rollout_id = self.id,
                    flag_id = %self.flag_id,
                    subject_class = %self.subject_class,
                    "subject abstained"
                );
                inc(
                    ROLLOUT_ABSTAIN_COUNTER,
                    &[("subject_class".to_string(), self.subject_class.clone())],
                    1,
                );
                Ok(None)
            }
        }
    }

    pub fn validate(
        &self,
        flags: &FlagRegistry,
        subjects: &SubjectRegistry,
    ) -> Result<(), ValidationError> {
        validate_rollout(
            &self.flag_id,
            &self.subject_class,
            self.enable_percentage,
            flags,
            subjects,
        )
    }

    /// The flag's display name, or a placeholder when the flag is no longer declared.
    pub fn flag_name(&self, flags: &FlagRegistry) -> String {
        match flags.get(&self.flag_id) {
            Some(flag) => flag.display_name().to_string(),
            None => format!("<missing flag: `{}`>", self.flag_id),
        }
    }

    pub fn subject_name(&self, subjects: &SubjectRegistry) -> String {
        match subjects.get(&self.subject_class) {
            Some(subject) => subject.display_name().to_string(),
            None => format!("<missing subject: `{}`>", self.subject_class),
        }
    }
}

/// A rollout that has not been stored yet. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewRollout {
    pub flag_id: String,
    pub subject_class: String,
    pub enable_percentage: f64,
}

impl NewRollout {
    /// A rollout enabling the flag for everyone the subject identifies.
    pub fn new(flag_id: impl Into<String>, subject_class: impl Into<String>) -> Self {
        Self {
            flag_id: flag_id.into(),
            subject_class: subject_class.into(),
            enable_percentage: 100.0,
        }
    }

    pub fn with_enable_percentage(mut self, enable_percentage: f64) -> Self {
        self.enable_percentage = enable_percentage;
        self
    }

    pub fn validate(
        &self,
        flags: &FlagRegistry,
        subjects: &SubjectRegistry,
    ) -> Result<(), ValidationError> {
        validate_rollout(
            &self.flag_id,
            &self.subject_class,
            self.enable_percentage,
            flags,
            subjects,
        )
    }

    pub fn into_rollout(self, id: RolloutId, created_at: DateTime<Utc>) -> Rollout {
        Rollout {
            id,
            flag_id: self.flag_id,
            subject_class: self.subject_class,
            enable_percentage: self.enable_percentage,
            created_at,
        }
    }
}

fn validate_rollout(
    flag_id: &str,
    subject_class: &str,
    enable_percentage: f64,
    flags: &FlagRegistry,
    subjects: &SubjectRegistry,
) -> Result<(), ValidationError> {
    if !(0.0..=100.0).contains(&enable_percentage) {
        return Err(ValidationError::InvalidPercentage(enable_percentage));
    }

    let flag = flags
        .get(flag_id)
        .ok_or_else(|| ValidationError::UnknownFlag(flag_id.to_string()))?;
    let subject = subjects
        .get(subject_class)
        .ok_or_else(|| ValidationError::UnknownSubject(subject_class.to_string()))?;

    if let Some(payload_type) = flag.payload_type() {
        if !flag.accepts_subject(subject.as_ref()) {
            return Err(ValidationError::IncompatibleSubject {
                flag: flag.display_name().to_string(),
                subject: subject.display_name().to_string(),
                required_type: payload_type.name(),
            });
        }
    }

    Ok(())
}
