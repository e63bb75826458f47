//! Remote profile/task store.
//!
//! Plain CRUD over profiles and tasks plus the two server-evaluated
//! procedures that move the partner link. No merge logic lives here.

pub mod client;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Identity, Profile, ProfileUpdate, TaskRecord, TaskUpsert, UserId};

pub use client::{HttpGateway, RemoteConfig};
pub use memory::MemoryGateway;

pub type GatewayResult<T> = core::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("remote rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("could not decode remote response: {0}")]
    Decode(String),
}

/// Row written when an invite is generated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewInvite {
    pub code: String,
    pub created_by: UserId,
}

/// Invite as held by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub code: String,
    pub created_by: UserId,
    #[serde(default)]
    pub consumed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Why the store refused to link two profiles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchRejection {
    /// Unknown or already consumed.
    InvalidCode,
    Expired,
    SelfInvite,
    AlreadyPaired,
    Other(String),
}

impl MatchRejection {
    /// Maps the `reason` field of the procedure response.
    pub fn from_reason(reason: Option<&str>, message: &str) -> Self {
        match reason {
            Some("invalid_code") | Some("not_found") | Some("consumed") => MatchRejection::InvalidCode,
            Some("expired") => MatchRejection::Expired,
            Some("self_invite") => MatchRejection::SelfInvite,
            Some("already_paired") => MatchRejection::AlreadyPaired,
            _ => MatchRejection::Other(message.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Linked { partner_id: UserId },
    Rejected(MatchRejection),
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn get_profile(&self, auth: &Identity, id: &UserId) -> GatewayResult<Option<Profile>>;

    async fn upsert_profile(&self, auth: &Identity, update: &ProfileUpdate) -> GatewayResult<()>;

    async fn get_tasks(&self, auth: &Identity, owner: &UserId, week: u8)
    -> GatewayResult<Vec<TaskRecord>>;

    /// With `id` set, updates that owned row. Without it, system tasks
    /// upsert on `(owner, week, task_key)` and custom tasks insert.
    async fn upsert_task(&self, auth: &Identity, task: &TaskUpsert) -> GatewayResult<TaskRecord>;

    async fn delete_task(&self, auth: &Identity, owner: &UserId, id: &str) -> GatewayResult<()>;

    /// Fails with [`GatewayError::Conflict`] when the code already exists.
    async fn insert_invite(&self, auth: &Identity, invite: &NewInvite) -> GatewayResult<()>;

    /// Atomically checks the code and both partner slots, then links the
    /// caller with the code's creator and consumes the code.
    async fn match_partner(
        &self,
        auth: &Identity,
        code: &str,
        max_age: Option<Duration>,
    ) -> GatewayResult<MatchOutcome>;

    /// Atomically clears both sides of the caller's partner link.
    async fn unlink_partner(&self, auth: &Identity) -> GatewayResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reasons_map() {
        assert_eq!(MatchRejection::from_reason(Some("expired"), ""), MatchRejection::Expired);
        assert_eq!(
            MatchRejection::from_reason(Some("consumed"), ""),
            MatchRejection::InvalidCode
        );
        assert_eq!(
            MatchRejection::from_reason(None, "boom"),
            MatchRejection::Other("boom".into())
        );
    }
}
