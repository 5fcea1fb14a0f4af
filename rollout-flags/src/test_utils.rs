use std::net::IpAddr;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    context::{RequestContext, User},
    rollouts::rollout_models::{Rollout, RolloutId},
    subjects::{
        subject_models::{IP_ADDRESS_SUBJECT, USER_SUBJECT},
        subject_registry::{SubjectCatalog, SubjectRegistry},
    },
};

/// A request from `ip`, optionally authenticated as `user`. Panics on a malformed address.
pub fn request_factory(ip: Option<&str>, user: Option<User>) -> RequestContext {
    RequestContext {
        remote_addr: ip.map(|ip| {
            ip.parse::<IpAddr>()
                .unwrap_or_else(|_| panic!("invalid test ip address `{ip}`"))
        }),
        user,
    }
}

pub fn user_factory(id: i64) -> User {
    User::new(id, format!("user-{id}"))
}

/// The fixed instant test rollouts are created relative to.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A stored rollout created `created_offset_secs` after [`base_time`].
pub fn rollout_factory(
    id: RolloutId,
    flag_id: &str,
    subject_class: &str,
    enable_percentage: f64,
    created_offset_secs: i64,
) -> Rollout {
    Rollout {
        id,
        flag_id: flag_id.to_string(),
        subject_class: subject_class.to_string(),
        enable_percentage,
        created_at: base_time() + Duration::seconds(created_offset_secs),
    }
}

/// Both built-in subjects, IP address first.
pub fn subject_registry() -> SubjectRegistry {
    SubjectRegistry::from_config(&SubjectCatalog::builtin(), &[IP_ADDRESS_SUBJECT, USER_SUBJECT])
        .unwrap_or_default()
}
