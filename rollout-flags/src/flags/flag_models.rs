use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::{
    context::{downcast_payload, EvaluationContext, Payload, RequestContext, TypeTag},
    errors::FlagError,
    flags::flag_matching::{resolve_rollouts, FlagResolution},
    rollouts::{rollout_models::Rollout, rollout_operations::RolloutStore},
    subjects::{subject_models::Subject, subject_registry::SubjectRegistry},
};

/// What the flag registry and rollout validation need to know about a flag, whether or not
/// it is typed.
pub trait FlagDefinition: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn default_value(&self) -> bool;

    /// The object type a typed flag is evaluated against; `None` for plain flags.
    fn payload_type(&self) -> Option<TypeTag>;

    /// Plain flags accept every subject. Typed flags only accept subjects that can identify
    /// their payload type.
    fn accepts_subject(&self, subject: &dyn Subject) -> bool {
        match self.payload_type() {
            None => true,
            Some(payload_type) => subject.supports(&payload_type),
        }
    }

    /// Checks that `object` can be evaluated against this flag. Plain flags only evaluate
    /// requests, so every object is a mismatch for them.
    fn check_payload(&self, object: &dyn Payload) -> Result<(), FlagError> {
        Err(FlagError::TypeMismatch {
            expected: std::any::type_name::<RequestContext>(),
            actual: object.type_tag().name(),
        })
    }
}

/// A named boolean toggle. Declared in code, once per process, and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    id: String,
    display_name: String,
    default: bool,
}

impl Flag {
    /// Creates a flag that defaults to `false`, labelled with the title-cased id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let display_name = titleize(&id);
        Self {
            id,
            display_name,
            default: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn default_value(&self) -> bool {
        self.default
    }

    /// Resolves against rollouts that were already fetched, newest first.
    pub fn resolve_rollouts(
        &self,
        rollouts: &[Rollout],
        subjects: &SubjectRegistry,
        request: &RequestContext,
    ) -> Result<FlagResolution, FlagError> {
        resolve_rollouts(
            &self.id,
            self.default,
            rollouts,
            subjects,
            EvaluationContext::Request(request),
        )
    }

    /// Fetches this flag's rollouts from the store and resolves them for a request.
    pub async fn resolve(
        &self,
        store: &dyn RolloutStore,
        subjects: &SubjectRegistry,
        request: &RequestContext,
    ) -> Result<bool, FlagError> {
        let rollouts = store.list_rollouts(&self.id).await?;
        Ok(self.resolve_rollouts(&rollouts, subjects, request)?.value)
    }
}

impl FlagDefinition for Flag {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn default_value(&self) -> bool {
        self.default
    }

    fn payload_type(&self) -> Option<TypeTag> {
        None
    }
}

/// A flag that can also be evaluated directly against a `T`, without a request.
///
/// Only subjects that support `T` may be used in its rollouts; see
/// [`FlagDefinition::accepts_subject`].
pub struct TypedFlag<T> {
    flag: Flag,
    _payload: PhantomData<fn(&T)>,
}

impl<T: Any + Send + Sync> TypedFlag<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            flag: Flag::new(id),
            _payload: PhantomData,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.flag = self.flag.with_display_name(display_name);
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.flag = self.flag.with_default(default);
        self
    }

    /// The untyped view, for evaluating this flag against requests.
    pub fn as_flag(&self) -> &Flag {
        &self.flag
    }

    pub fn resolve_object_rollouts(
        &self,
        rollouts: &[Rollout],
        subjects: &SubjectRegistry,
        object: &T,
    ) -> Result<FlagResolution, FlagError> {
        resolve_rollouts(
            &self.flag.id,
            self.flag.default,
            rollouts,
            subjects,
            EvaluationContext::Object(object),
        )
    }

    pub async fn resolve(
        &self,
        store: &dyn RolloutStore,
        subjects: &SubjectRegistry,
        object: &T,
    ) -> Result<bool, FlagError> {
        let rollouts = store.list_rollouts(&self.flag.id).await?;
        Ok(self
            .resolve_object_rollouts(&rollouts, subjects, object)?
            .value)
    }

    /// Checks a dynamically typed object against `T` before resolving. `Arc<T>` and `Box<T>`
    /// are unwrapped; anything else is a caller bug and comes back as
    /// [`FlagError::TypeMismatch`], never as `false`.
    pub fn expect_payload<'a>(&self, object: &'a dyn Payload) -> Result<&'a T, FlagError> {
        downcast_payload::<T>(object).ok_or_else(|| FlagError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: object.type_tag().name(),
        })
    }

    pub async fn resolve_payload(
        &self,
        store: &dyn RolloutStore,
        subjects: &SubjectRegistry,
        object: &dyn Payload,
    ) -> Result<bool, FlagError> {
        let object = self.expect_payload(object)?;
        self.resolve(store, subjects, object).await
    }
}

impl<T: Any + Send + Sync> FlagDefinition for TypedFlag<T> {
    fn id(&self) -> &str {
        self.flag.id()
    }

    fn display_name(&self) -> &str {
        self.flag.display_name()
    }

    fn default_value(&self) -> bool {
        self.flag.default_value()
    }

    fn payload_type(&self) -> Option<TypeTag> {
        Some(TypeTag::of::<T>())
    }

    fn check_payload(&self, object: &dyn Payload) -> Result<(), FlagError> {
        self.expect_payload(object).map(|_| ())
    }
}

impl<T> fmt::Debug for TypedFlag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedFlag")
            .field("flag", &self.flag)
            .field("payload_type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Upper-cases the first letter of every run of letters and lower-cases the rest, so
/// `enable_weather` becomes `Enable_Weather`.
pub fn titleize(id: &str) -> String {
    let mut titled = String::with_capacity(id.len());
    let mut previous_is_letter = false;
    for c in id.chars() {
        if previous_is_letter {
            titled.extend(c.to_lowercase());
        } else {
            titled.extend(c.to_uppercase());
        }
        previous_is_letter = c.is_alphabetic();
    }
    titled
}
