//! In-process remote store.
//!
//! Every operation runs under one lock, so `match_partner` and
//! `unlink_partner` are indivisible with respect to each other and to
//! concurrent callers, the same guarantee the hosted stored procedures give.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ulid::Ulid;

use super::{
    GatewayError, GatewayResult, InviteRecord, MatchOutcome, MatchRejection, NewInvite,
    RemoteGateway,
};
use crate::types::{Identity, Profile, ProfileUpdate, TaskKind, TaskRecord, TaskUpsert, UserId};

struct MemoryState {
    profiles: HashMap<UserId, Profile>,
    tasks: BTreeMap<String, TaskRecord>,
    invites: HashMap<String, InviteRecord>,
    clock_offset: chrono::Duration,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            profiles: HashMap::new(),
            tasks: BTreeMap::new(),
            invites: HashMap::new(),
            clock_offset: chrono::Duration::zero(),
        }
    }
}

impl MemoryState {
    fn partner_of(&self, id: &UserId) -> Option<&UserId> {
        self.profiles.get(id).and_then(|p| p.partner_id.as_ref())
    }

    fn profile_mut(&mut self, id: &UserId) -> &mut Profile {
        self.profiles
            .entry(id.clone())
            .or_insert_with(|| Profile::empty(id.clone()))
    }
}

#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    profile_writes: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`GatewayError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn profile_writes(&self) -> usize {
        self.profile_writes.load(Ordering::SeqCst)
    }

    /// Moves the store's notion of "now" forward.
    pub fn advance_clock(&self, by: Duration) -> GatewayResult<()> {
        let mut state = self.lock()?;
        let by = chrono::Duration::from_std(by).map_err(|e| GatewayError::Decode(e.to_string()))?;
        state.clock_offset += by;
        Ok(())
    }

    pub fn insert_profile(&self, profile: Profile) -> GatewayResult<()> {
        let mut state = self.lock()?;
        state.profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    pub fn profile(&self, id: &UserId) -> Option<Profile> {
        self.lock().ok().and_then(|s| s.profiles.get(id).cloned())
    }

    pub fn invite(&self, code: &str) -> Option<InviteRecord> {
        self.lock().ok().and_then(|s| s.invites.get(code).cloned())
    }

    pub fn tasks_of(&self, owner: &UserId) -> Vec<TaskRecord> {
        self.lock()
            .map(|s| {
                s.tasks
                    .values()
                    .filter(|t| &t.owner_id == owner)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> GatewayResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Unavailable("memory store lock poisoned".into()))
    }

    fn online(&self) -> GatewayResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn get_profile(&self, _auth: &Identity, id: &UserId) -> GatewayResult<Option<Profile>> {
        self.online()?;
        Ok(self.lock()?.profiles.get(id).cloned())
    }

    async fn upsert_profile(&self, auth: &Identity, update: &ProfileUpdate) -> GatewayResult<()> {
        self.online()?;
        if update.id != auth.user_id {
            return Err(GatewayError::Unauthorized(
                "profiles can only be written by their owner".into(),
            ));
        }
        let mut state = self.lock()?;
        let profile = state.profile_mut(&update.id);
        profile.role = update.role;
        profile.due_date = update.due_date;
        profile.nickname = update.nickname.clone();
        self.profile_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_tasks(
        &self,
        auth: &Identity,
        owner: &UserId,
        week: u8,
    ) -> GatewayResult<Vec<TaskRecord>> {
        self.online()?;
        let state = self.lock()?;
        let visible = owner == &auth.user_id || state.partner_of(&auth.user_id) == Some(owner);
        if !visible {
            return Ok(Vec::new());
        }
        Ok(state
            .tasks
            .values()
            .filter(|t| &t.owner_id == owner && t.week == week)
            .cloned()
            .collect())
    }

    async fn upsert_task(&self, auth: &Identity, task: &TaskUpsert) -> GatewayResult<TaskRecord> {
        self.online()?;
        if task.owner_id != auth.user_id {
            return Err(GatewayError::Unauthorized(
                "tasks can only be written by their owner".into(),
            ));
        }
        let mut state = self.lock()?;

        let existing_id = match (&task.id, task.kind) {
            (Some(id), _) => {
                let owned = state
                    .tasks
                    .get(id)
                    .is_some_and(|t| t.owner_id == task.owner_id);
                if !owned {
                    return Err(GatewayError::NotFound(format!("task {id}")));
                }
                Some(id.clone())
            }
            (None, TaskKind::System) => state
                .tasks
                .values()
                .find(|t| {
                    t.kind == TaskKind::System
                        && t.owner_id == task.owner_id
                        && t.week == task.week
                        && t.task_key == task.task_key
                })
                .map(|t| t.id.clone()),
            (None, TaskKind::Custom) => None,
        };

        let updated = existing_id.and_then(|id| {
            let row = state.tasks.get_mut(&id)?;
            row.is_completed = task.is_completed;
            if task.content.is_some() {
                row.content = task.content.clone();
            }
            Some(row.clone())
        });
        if let Some(row) = updated {
            return Ok(row);
        }

        let row = TaskRecord {
            id: Ulid::new().to_string(),
            owner_id: task.owner_id.clone(),
            week: task.week,
            kind: task.kind,
            task_key: task.task_key.clone(),
            content: task.content.clone(),
            is_completed: task.is_completed,
        };
        state.tasks.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn delete_task(&self, auth: &Identity, owner: &UserId, id: &str) -> GatewayResult<()> {
        self.online()?;
        if owner != &auth.user_id {
            return Err(GatewayError::Unauthorized(
                "tasks can only be deleted by their owner".into(),
            ));
        }
        let mut state = self.lock()?;
        if state.tasks.get(id).is_some_and(|t| &t.owner_id == owner) {
            state.tasks.remove(id);
        }
        Ok(())
    }

    async fn insert_invite(&self, auth: &Identity, invite: &NewInvite) -> GatewayResult<()> {
        self.online()?;
        if invite.created_by != auth.user_id {
            return Err(GatewayError::Unauthorized(
                "invites can only be created for yourself".into(),
            ));
        }
        let mut state = self.lock()?;
        if state.invites.contains_key(&invite.code) {
            return Err(GatewayError::Conflict(format!("invite code {} exists", invite.code)));
        }
        let created_at = Utc::now() + state.clock_offset;
        state.invites.insert(
            invite.code.clone(),
            InviteRecord {
                code: invite.code.clone(),
                created_by: invite.created_by.clone(),
                consumed_by: None,
                created_at,
            },
        );
        Ok(())
    }

    async fn match_partner(
        &self,
        auth: &Identity,
        code: &str,
        max_age: Option<Duration>,
    ) -> GatewayResult<MatchOutcome> {
        self.online()?;
        let caller = &auth.user_id;
        let mut state = self.lock()?;
        let now = Utc::now() + state.clock_offset;

        let Some(invite) = state.invites.get(code).cloned() else {
            return Ok(MatchOutcome::Rejected(MatchRejection::InvalidCode));
        };
        if invite.consumed_by.is_some() {
            return Ok(MatchOutcome::Rejected(MatchRejection::InvalidCode));
        }
        if let Some(max_age) = max_age {
            let age = (now - invite.created_at).to_std().unwrap_or_default();
            if age > max_age {
                return Ok(MatchOutcome::Rejected(MatchRejection::Expired));
            }
        }
        let creator = invite.created_by;
        if &creator == caller {
            return Ok(MatchOutcome::Rejected(MatchRejection::SelfInvite));
        }
        if state.partner_of(caller).is_some() || state.partner_of(&creator).is_some() {
            return Ok(MatchOutcome::Rejected(MatchRejection::AlreadyPaired));
        }

        state.profile_mut(caller).partner_id = Some(creator.clone());
        state.profile_mut(&creator).partner_id = Some(caller.clone());
        if let Some(row) = state.invites.get_mut(code) {
            row.consumed_by = Some(caller.clone());
        }
        Ok(MatchOutcome::Linked { partner_id: creator })
    }

    async fn unlink_partner(&self, auth: &Identity) -> GatewayResult<()> {
        self.online()?;
        let caller = &auth.user_id;
        let mut state = self.lock()?;
        let Some(partner) = state.partner_of(caller).cloned() else {
            return Ok(());
        };
        state.profile_mut(caller).partner_id = None;
        if state.partner_of(&partner) == Some(caller) {
            state.profile_mut(&partner).partner_id = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn ident(id: &str) -> Identity {
        Identity::new(UserId::new(id), None)
    }

    #[tokio::test]
    async fn system_tasks_upsert_on_natural_key() {
        let gw = MemoryGateway::new();
        let me = ident("a");
        let toggle = |done| TaskUpsert {
            id: None,
            owner_id: me.user_id.clone(),
            week: 8,
            kind: TaskKind::System,
            task_key: Some("w8-mom-0".into()),
            content: None,
            is_completed: done,
        };
        let first = gw.upsert_task(&me, &toggle(true)).await.unwrap();
        let second = gw.upsert_task(&me, &toggle(false)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(gw.tasks_of(&me.user_id).len(), 1);
        assert!(!gw.tasks_of(&me.user_id)[0].is_completed);
    }

    #[tokio::test]
    async fn foreign_writes_are_rejected() {
        let gw = MemoryGateway::new();
        let update = ProfileUpdate {
            id: UserId::new("b"),
            role: Some(Role::Dad),
            due_date: None,
            nickname: None,
        };
        let err = gw.upsert_profile(&ident("a"), &update).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn duplicate_invite_code_conflicts() {
        let gw = MemoryGateway::new();
        let me = ident("a");
        let invite = NewInvite {
            code: "ABCDEF".into(),
            created_by: me.user_id.clone(),
        };
        gw.insert_invite(&me, &invite).await.unwrap();
        let err = gw.insert_invite(&me, &invite).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn expired_invites_do_not_match() {
        let gw = MemoryGateway::new();
        let a = ident("a");
        gw.insert_invite(
            &a,
            &NewInvite {
                code: "ABCDEF".into(),
                created_by: a.user_id.clone(),
            },
        )
        .await
        .unwrap();
        gw.advance_clock(Duration::from_secs(7200)).unwrap();

        let ttl = Some(Duration::from_secs(3600));
        let outcome = gw.match_partner(&ident("b"), "ABCDEF", ttl).await.unwrap();
        assert_eq!(outcome, MatchOutcome::Rejected(MatchRejection::Expired));

        // without a client TTL the store accepts it
        let outcome = gw.match_partner(&ident("b"), "ABCDEF", None).await.unwrap();
        assert_eq!(outcome, MatchOutcome::Linked { partner_id: a.user_id });
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let gw = MemoryGateway::new();
        gw.set_offline(true);
        let err = gw.get_profile(&ident("a"), &UserId::new("a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
