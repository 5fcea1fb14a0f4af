use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::Request;
use serde::{Deserialize, Serialize};

/// An authenticated user, as attached to a request by whatever auth layer runs in front of
/// flag evaluation. Anonymous requests simply carry no user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: String,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// The request-shaped half of an evaluation context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub remote_addr: Option<IpAddr>,
    pub user: Option<User>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_addr(mut self, remote_addr: IpAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    /// Builds a context from an incoming HTTP request.
    ///
    /// The remote address is taken from the `ConnectInfo<SocketAddr>` extension, which axum
    /// inserts when the router is served with `into_make_service_with_connect_info`. The user
    /// is taken from a `User` extension, if an authentication middleware put one there.
    pub fn from_http_request<B>(request: &Request<B>) -> Self {
        let extensions = request.extensions();
        Self {
            remote_addr: extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
            user: extensions.get::<User>().cloned(),
        }
    }
}

/// Identifies a payload type at runtime. Equality is by `TypeId`; the name is only used for
/// error messages.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeTag").field(&self.name).finish()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Any value a typed flag can be evaluated against.
pub trait Payload: Any + Send + Sync {
    fn type_tag(&self) -> TypeTag;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Payload for T {
    fn type_tag(&self) -> TypeTag {
        TypeTag::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Looks through the shared-pointer wrappers callers commonly hold their objects in, so a
/// flag typed for `T` also accepts `Arc<T>` and `Box<T>`.
pub fn downcast_payload<T: Any>(payload: &dyn Payload) -> Option<&T> {
    let any = payload.as_any();
    any.downcast_ref::<T>()
        .or_else(|| any.downcast_ref::<Arc<T>>().map(|shared| &**shared))
        .or_else(|| any.downcast_ref::<Box<T>>().map(|boxed| &**boxed))
}

/// What a flag is being evaluated for. Picked once at the API boundary; subjects dispatch on
/// the variant instead of inspecting types.
#[derive(Clone, Copy)]
pub enum EvaluationContext<'a> {
    Request(&'a RequestContext),
    Object(&'a dyn Payload),
}

impl<'a> From<&'a RequestContext> for EvaluationContext<'a> {
    fn from(request: &'a RequestContext) -> Self {
        EvaluationContext::Request(request)
    }
}

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EvaluationContext::Request(request) => f.debug_tuple("Request").field(request).finish(),
            EvaluationContext::Object(object) => {
                f.debug_tuple("Object").field(&object.type_tag()).finish()
            }
        }
    }
}
