use std::fmt;

use crate::{
    context::{downcast_payload, EvaluationContext, Payload, RequestContext, TypeTag, User},
    errors::FlagError,
    subjects::subject_identity::SubjectIdentity,
};

pub const SUBJECTS_MODULE: &str = "rollout_flags::subjects";
pub const SUBJECT_TRAIT_PATH: &str = "rollout_flags::subjects::Subject";
pub const IP_ADDRESS_SUBJECT: &str = "rollout_flags::subjects::IpAddressSubject";
pub const USER_SUBJECT: &str = "rollout_flags::subjects::UserSubject";

/// A strategy for extracting a stable identifier from an evaluation context.
///
/// Returning `None` means "this subject can't identify this context" (an anonymous request,
/// a missing remote address). Rollouts treat that as an abstention, never as `false`.
///
/// Subjects are stateless; a single instance is shared by every evaluation.
pub trait Subject: Send + Sync + fmt::Debug {
    /// Stable `module::Name` path. Used as the registry key, stored on rollouts, and hashed
    /// into every score, so it must never change once rollouts reference it.
    fn subject_class(&self) -> &'static str;

    /// Human-readable label for admin listings.
    fn display_name(&self) -> &'static str;

    fn identifier_for_request(&self, request: &RequestContext) -> Option<String>;

    /// The object type this subject knows how to identify, if it supports typed evaluation.
    fn object_type(&self) -> Option<TypeTag> {
        None
    }

    /// Subjects without an object type can't identify objects and abstain.
    fn identifier_for_object(&self, _object: &dyn Payload) -> Result<Option<String>, FlagError> {
        Ok(None)
    }

    /// Whether `identifier_for_object` can make sense of `object`, looking through `Arc`/`Box`.
    fn accepts_object(&self, _object: &dyn Payload) -> bool {
        false
    }

    fn supports(&self, payload_type: &TypeTag) -> bool {
        self.object_type().as_ref() == Some(payload_type)
    }

    fn identify(
        &self,
        context: EvaluationContext<'_>,
    ) -> Result<Option<SubjectIdentity>, FlagError> {
        let subject_id = match context {
            EvaluationContext::Request(request) => self.identifier_for_request(request),
            EvaluationContext::Object(object) => self.identifier_for_object(object)?,
        };
        Ok(subject_id.map(|subject_id| SubjectIdentity::new(self.subject_class(), subject_id)))
    }
}

/// Buckets requests by their remote address.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddressSubject;

impl Subject for IpAddressSubject {
    fn subject_class(&self) -> &'static str {
        IP_ADDRESS_SUBJECT
    }

    fn display_name(&self) -> &'static str {
        "IP address"
    }

    fn identifier_for_request(&self, request: &RequestContext) -> Option<String> {
        request.remote_addr.map(|ip| ip.to_string())
    }
}

/// Buckets by authenticated user id. Works for requests and for [`User`] objects directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSubject;

impl Subject for UserSubject {
    fn subject_class(&self) -> &'static str {
        USER_SUBJECT
    }

    fn display_name(&self) -> &'static str {
        "User"
    }

    fn identifier_for_request(&self, request: &RequestContext) -> Option<String> {
        request.user.as_ref().map(|user| user.id.to_string())
    }

    fn object_type(&self) -> Option<TypeTag> {
        Some(TypeTag::of::<User>())
    }

    fn accepts_object(&self, object: &dyn Payload) -> bool {
        downcast_payload::<User>(object).is_some()
    }

    fn identifier_for_object(&self, object: &dyn Payload) -> Result<Option<String>, FlagError> {
        match downcast_payload::<User>(object) {
            Some(user) => Ok(Some(user.id.to_string())),
            None => Err(FlagError::TypeMismatch {
                expected: TypeTag::of::<User>().name(),
                actual: object.type_tag().name(),
            }),
        }
    }
}

impl fmt::Display for dyn Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
