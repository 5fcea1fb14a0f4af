use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::{
    context::{EvaluationContext, Payload, RequestContext},
    errors::{FlagError, ValidationError},
    flags::{
        flag_matching::{resolve_rollouts, FlagResolution},
        flag_models::FlagDefinition,
        flag_registry::FlagRegistry,
    },
    metrics_consts::ROLLOUTS_CREATED_COUNTER,
    metrics_utils::inc,
    rollouts::{
        rollout_models::{NewRollout, Rollout},
        rollout_operations::RolloutStore,
    },
    subjects::subject_registry::SubjectRegistry,
};

/// Ties the rollout store to the configured subjects and declared flags, so callers can ask
/// about a flag by id.
#[derive(Clone)]
pub struct FlagService {
    store: Arc<dyn RolloutStore>,
    subjects: Arc<SubjectRegistry>,
    flags: Arc<FlagRegistry>,
}

impl FlagService {
    pub fn new(
        store: Arc<dyn RolloutStore>,
        subjects: Arc<SubjectRegistry>,
        flags: Arc<FlagRegistry>,
    ) -> Self {
        Self {
            store,
            subjects,
            flags,
        }
    }

    pub fn subjects(&self) -> &SubjectRegistry {
        &self.subjects
    }

    pub fn flags(&self) -> &FlagRegistry {
        &self.flags
    }

    fn flag(&self, flag_id: &str) -> Result<&Arc<dyn FlagDefinition>, FlagError> {
        self.flags
            .get(flag_id)
            .ok_or_else(|| ValidationError::UnknownFlag(flag_id.to_string()).into())
    }

    async fn fetch_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError> {
        self.store.list_rollouts(flag_id).await.map_err(|e| {
            if e.is_retryable() {
                warn!(flag_id, error = %e, "rollout fetch failed, caller may retry");
            } else {
                error!(flag_id, error = %e, "rollout fetch failed");
            }
            e
        })
    }

    async fn resolve_context(
        &self,
        flag: &dyn FlagDefinition,
        context: EvaluationContext<'_>,
    ) -> Result<FlagResolution, FlagError> {
        let rollouts = self.fetch_rollouts(flag.id()).await?;
        resolve_rollouts(
            flag.id(),
            flag.default_value(),
            &rollouts,
            &self.subjects,
            context,
        )
    }

    /// Resolves a flag for a request, keeping the reason and the deciding rollout.
    #[instrument(skip_all, fields(flag_id = %flag_id))]
    pub async fn resolve(
        &self,
        flag_id: &str,
        request: &RequestContext,
    ) -> Result<FlagResolution, FlagError> {
        let flag = self.flag(flag_id)?;
        self.resolve_context(flag.as_ref(), EvaluationContext::Request(request))
            .await
    }

    pub async fn is_enabled(
        &self,
        flag_id: &str,
        request: &RequestContext,
    ) -> Result<bool, FlagError> {
        Ok(self.resolve(flag_id, request).await?.value)
    }

    /// Resolves a typed flag for an object. The flag must be declared for the object's type
    /// (or an `Arc`/`Box` of it); anything else is a [`FlagError::TypeMismatch`].
    #[instrument(skip_all, fields(flag_id = %flag_id, payload_type = %object.type_tag()))]
    pub async fn resolve_payload(
        &self,
        flag_id: &str,
        object: &dyn Payload,
    ) -> Result<FlagResolution, FlagError> {
        let flag = self.flag(flag_id)?;
        flag.check_payload(object)?;
        self.resolve_context(flag.as_ref(), EvaluationContext::Object(object))
            .await
    }

    pub async fn is_enabled_for_payload(
        &self,
        flag_id: &str,
        object: &dyn Payload,
    ) -> Result<bool, FlagError> {
        Ok(self.resolve_payload(flag_id, object).await?.value)
    }

    pub async fn is_enabled_for<T: Payload>(
        &self,
        flag_id: &str,
        object: &T,
    ) -> Result<bool, FlagError> {
        self.is_enabled_for_payload(flag_id, object).await
    }

    pub fn validate_rollout(&self, new: &NewRollout) -> Result<(), FlagError> {
        Ok(new.validate(&self.flags, &self.subjects)?)
    }

    /// Validates and stores a rollout. Nothing reaches the store unless validation passes.
    #[instrument(skip_all, fields(flag_id = %new.flag_id, subject_class = %new.subject_class))]
    pub async fn create_rollout(&self, new: NewRollout) -> Result<Rollout, FlagError> {
        self.validate_rollout(&new)?;
        let rollout = self.store.insert_rollout(new).await?;
        info!(
            rollout_id = rollout.id,
            enable_percentage = rollout.enable_percentage,
            "created rollout"
        );
        inc(
            ROLLOUTS_CREATED_COUNTER,
            &[("subject_class".to_string(), rollout.subject_class.clone())],
            1,
        );
        Ok(rollout)
    }

    pub async fn list_rollouts(&self, flag_id: &str) -> Result<Vec<Rollout>, FlagError> {
        self.fetch_rollouts(flag_id).await
    }

    /// The subjects a new rollout for `flag_id` may use.
    pub fn subject_choices_for(
        &self,
        flag_id: &str,
    ) -> Result<Vec<(&'static str, &'static str)>, FlagError> {
        let flag = self.flag(flag_id)?;
        Ok(self.subjects.choices_for_flag(flag.as_ref()))
    }

    pub fn flag_choices(&self) -> Vec<(&str, &str)> {
        self.flags.choices()
    }
}
