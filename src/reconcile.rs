//! Per-session choice of the authoritative user config.
//!
//! Priority is remote > local > onboarding. The choice itself is the pure
//! [`decide`] table; [`ReconciliationEngine`] only gathers its inputs and
//! carries out the single migration write it asks for.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{CompanionResult, ValidationReason};
use crate::gateway::RemoteGateway;
use crate::identity::Session;
use crate::local::LocalStore;
use crate::types::{ProfileUpdate, Role, UserConfig};
use crate::week;

/// What the remote store said about the caller's profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteState {
    /// No identity, or no remote store configured.
    Guest,
    /// The read failed; the remote is neither trusted nor written.
    Unavailable,
    Incomplete,
    Complete(UserConfig),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalState {
    Incomplete,
    Complete(UserConfig),
}

impl From<UserConfig> for LocalState {
    fn from(config: UserConfig) -> Self {
        if config.is_complete() {
            LocalState::Complete(config)
        } else {
            LocalState::Incomplete
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Remote is authoritative; `refresh_local` is false when the device
    /// copy already matches.
    UseRemote {
        config: UserConfig,
        refresh_local: bool,
    },
    /// Pre-account user: write the device config through to the remote.
    PushLocal(UserConfig),
    UseLocal(UserConfig),
    NeedsOnboarding,
}

pub fn decide(remote: RemoteState, local: LocalState) -> Decision {
    match (remote, local) {
        (RemoteState::Complete(remote), LocalState::Complete(local)) if remote == local => {
            Decision::UseRemote {
                config: remote,
                refresh_local: false,
            }
        }
        (RemoteState::Complete(remote), _) => Decision::UseRemote {
            config: remote,
            refresh_local: true,
        },
        (RemoteState::Incomplete, LocalState::Complete(local)) => Decision::PushLocal(local),
        (RemoteState::Guest | RemoteState::Unavailable, LocalState::Complete(local)) => {
            Decision::UseLocal(local)
        }
        (_, LocalState::Incomplete) => Decision::NeedsOnboarding,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Remote,
    Local,
    /// Local config that was just written through to the remote.
    Migrated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub config: UserConfig,
    pub nickname: String,
    pub current_week: u8,
    pub weeks_remaining: u8,
    pub source: ConfigSource,
}

impl ResolvedConfig {
    fn new(config: UserConfig, source: ConfigSource, today: NaiveDate) -> Self {
        // only complete configs get here
        let current_week = config
            .due_date
            .map(|due| week::current_week(due, today))
            .unwrap_or(week::FIRST_WEEK);
        Self {
            nickname: config.display_nickname(),
            current_week,
            weeks_remaining: week::weeks_remaining(current_week),
            config,
            source,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.config.role
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Ready(ResolvedConfig),
    NeedsOnboarding,
}

impl Resolution {
    pub fn ready(&self) -> Option<&ResolvedConfig> {
        match self {
            Resolution::Ready(resolved) => Some(resolved),
            Resolution::NeedsOnboarding => None,
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    local: LocalStore,
    gateway: Option<Arc<dyn RemoteGateway>>,
}

impl ReconciliationEngine {
    pub fn new(local: LocalStore, gateway: Option<Arc<dyn RemoteGateway>>) -> Self {
        Self { local, gateway }
    }

    pub async fn resolve(&self, session: &Session) -> CompanionResult<Resolution> {
        self.resolve_on(session, week::today()).await
    }

    /// Resolve with an explicit calendar date for the week derivation.
    pub async fn resolve_on(
        &self,
        session: &Session,
        today: NaiveDate,
    ) -> CompanionResult<Resolution> {
        // the remote read finishes before the local store is consulted
        let remote = self.read_remote(session).await;
        let local = LocalState::from(self.local.load_user_config()?);
        let decision = decide(remote, local);
        tracing::debug!(?decision, "reconciliation decision");

        let resolution = match decision {
            Decision::UseRemote {
                config,
                refresh_local,
            } => {
                if refresh_local {
                    match self.local.save_user_config(&config) {
                        Ok(()) => tracing::info!("refreshed local config from remote profile"),
                        Err(err) => tracing::warn!(error = %err, "could not cache remote config locally"),
                    }
                }
                Resolution::Ready(ResolvedConfig::new(config, ConfigSource::Remote, today))
            }
            Decision::PushLocal(config) => {
                let source = if self.push_remote(session, &config).await {
                    ConfigSource::Migrated
                } else {
                    ConfigSource::Local
                };
                Resolution::Ready(ResolvedConfig::new(config, source, today))
            }
            Decision::UseLocal(config) => {
                Resolution::Ready(ResolvedConfig::new(config, ConfigSource::Local, today))
            }
            Decision::NeedsOnboarding => Resolution::NeedsOnboarding,
        };
        Ok(resolution)
    }

    /// Saves the onboarding answers on the device, then best-effort to the
    /// remote profile when signed in.
    pub async fn complete_onboarding(
        &self,
        session: &Session,
        role: Option<Role>,
        due_date: Option<NaiveDate>,
        nickname: Option<String>,
    ) -> CompanionResult<UserConfig> {
        let role = role.ok_or(ValidationReason::MissingOnboardingField("role"))?;
        let due_date = due_date.ok_or(ValidationReason::MissingOnboardingField("due date"))?;
        let nickname = nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| role.default_nickname().to_string());
        let config = UserConfig::new(role, due_date, Some(nickname));

        self.local.save_user_config(&config)?;
        if !self.push_remote(session, &config).await {
            tracing::debug!("onboarding kept on device only");
        }
        Ok(config)
    }

    async fn read_remote(&self, session: &Session) -> RemoteState {
        let (Some(identity), Some(gateway)) = (session.identity(), self.gateway.as_ref()) else {
            return RemoteState::Guest;
        };
        match gateway.get_profile(identity, &identity.user_id).await {
            Ok(Some(profile)) if profile.config().is_complete() => {
                RemoteState::Complete(profile.config())
            }
            Ok(_) => RemoteState::Incomplete,
            Err(err) => {
                tracing::warn!(error = %err, "remote profile read failed, falling back to local config");
                RemoteState::Unavailable
            }
        }
    }

    /// Returns whether the remote now holds `config`.
    async fn push_remote(&self, session: &Session, config: &UserConfig) -> bool {
        let (Some(identity), Some(gateway)) = (session.identity(), self.gateway.as_ref()) else {
            return false;
        };
        let update = ProfileUpdate::from_config(identity.user_id.clone(), config);
        match gateway.upsert_profile(identity, &update).await {
            Ok(()) => {
                tracing::info!(user = %identity.user_id, "migrated local config to remote profile");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote profile write failed, keeping local config");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::storage::MemoryStore;
    use crate::types::{Identity, Profile, UserId};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mom(due: NaiveDate) -> UserConfig {
        UserConfig::new(Role::Mom, due, Some("Ana".into()))
    }

    fn dad(due: NaiveDate) -> UserConfig {
        UserConfig::new(Role::Dad, due, Some("Sam".into()))
    }

    struct Fixture {
        raw: Arc<MemoryStore>,
        local: LocalStore,
        gateway: Arc<MemoryGateway>,
        engine: ReconciliationEngine,
        session: Session,
    }

    fn fixture() -> Fixture {
        let raw = Arc::new(MemoryStore::new());
        let local = LocalStore::new(raw.clone());
        let gateway = Arc::new(MemoryGateway::new());
        let engine = ReconciliationEngine::new(local.clone(), Some(gateway.clone()));
        let session = Session::authenticated(Identity::new(UserId::new("u1"), None));
        Fixture {
            raw,
            local,
            gateway,
            engine,
            session,
        }
    }

    fn seed_remote(gateway: &MemoryGateway, config: &UserConfig) {
        gateway
            .insert_profile(Profile {
                id: UserId::new("u1"),
                role: config.role,
                due_date: config.due_date,
                nickname: config.nickname.clone(),
                partner_id: None,
            })
            .unwrap();
    }

    #[test]
    fn decision_table() {
        let a = mom(date(2027, 1, 1));
        let b = dad(date(2027, 2, 1));
        let complete = |c: &UserConfig| LocalState::Complete(c.clone());

        assert_eq!(
            decide(RemoteState::Complete(a.clone()), complete(&a)),
            Decision::UseRemote { config: a.clone(), refresh_local: false }
        );
        assert_eq!(
            decide(RemoteState::Complete(a.clone()), complete(&b)),
            Decision::UseRemote { config: a.clone(), refresh_local: true }
        );
        assert_eq!(
            decide(RemoteState::Complete(a.clone()), LocalState::Incomplete),
            Decision::UseRemote { config: a.clone(), refresh_local: true }
        );
        assert_eq!(
            decide(RemoteState::Incomplete, complete(&b)),
            Decision::PushLocal(b.clone())
        );
        assert_eq!(decide(RemoteState::Guest, complete(&b)), Decision::UseLocal(b.clone()));
        assert_eq!(decide(RemoteState::Unavailable, complete(&b)), Decision::UseLocal(b));
        for remote in [RemoteState::Guest, RemoteState::Unavailable, RemoteState::Incomplete] {
            assert_eq!(decide(remote, LocalState::Incomplete), Decision::NeedsOnboarding);
        }
    }

    #[tokio::test]
    async fn remote_wins_and_overwrites_local() {
        let f = fixture();
        let remote = mom(date(2027, 1, 1));
        seed_remote(&f.gateway, &remote);
        f.local.save_user_config(&dad(date(2027, 3, 3))).unwrap();
        let writes_before = f.raw.writes();

        let resolution = f.engine.resolve_on(&f.session, date(2026, 10, 1)).await.unwrap();
        let resolved = resolution.ready().unwrap();
        assert_eq!(resolved.config, remote);
        assert_eq!(resolved.source, ConfigSource::Remote);
        assert_eq!(f.local.load_user_config().unwrap(), remote);
        assert_eq!(f.raw.writes(), writes_before + 1);
        assert_eq!(f.gateway.profile_writes(), 0);
    }

    #[tokio::test]
    async fn legacy_local_config_is_pushed_to_remote() {
        let f = fixture();
        let local = dad(date(2027, 3, 3));
        f.local.save_user_config(&local).unwrap();

        let resolution = f.engine.resolve_on(&f.session, date(2026, 10, 1)).await.unwrap();
        let resolved = resolution.ready().unwrap();
        assert_eq!(resolved.config, local);
        assert_eq!(resolved.source, ConfigSource::Migrated);
        assert_eq!(f.gateway.profile_writes(), 1);
        assert_eq!(f.gateway.profile(&UserId::new("u1")).unwrap().config(), local);
    }

    #[tokio::test]
    async fn nothing_anywhere_needs_onboarding_without_writes() {
        let f = fixture();
        let resolution = f.engine.resolve_on(&f.session, date(2026, 10, 1)).await.unwrap();
        assert_eq!(resolution, Resolution::NeedsOnboarding);
        assert_eq!(f.raw.writes(), 0);
        assert_eq!(f.gateway.profile_writes(), 0);
    }

    #[tokio::test]
    async fn resolving_twice_writes_once() {
        let f = fixture();
        seed_remote(&f.gateway, &mom(date(2027, 1, 1)));
        let today = date(2026, 10, 1);

        let first = f.engine.resolve_on(&f.session, today).await.unwrap();
        let writes = (f.raw.writes(), f.gateway.profile_writes());
        let second = f.engine.resolve_on(&f.session, today).await.unwrap();
        assert_eq!(first, second);
        assert_eq!((f.raw.writes(), f.gateway.profile_writes()), writes);
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let f = fixture();
        f.local.save_user_config(&dad(date(2027, 3, 3))).unwrap();
        let today = date(2026, 10, 1);

        f.engine.resolve_on(&f.session, today).await.unwrap();
        let writes = (f.raw.writes(), f.gateway.profile_writes());
        let again = f.engine.resolve_on(&f.session, today).await.unwrap();
        assert_eq!(again.ready().unwrap().source, ConfigSource::Remote);
        assert_eq!((f.raw.writes(), f.gateway.profile_writes()), writes);
    }

    #[tokio::test]
    async fn offline_remote_falls_back_to_local() {
        let f = fixture();
        seed_remote(&f.gateway, &mom(date(2027, 1, 1)));
        let local = dad(date(2027, 3, 3));
        f.local.save_user_config(&local).unwrap();
        f.gateway.set_offline(true);

        let resolution = f.engine.resolve_on(&f.session, date(2026, 10, 1)).await.unwrap();
        let resolved = resolution.ready().unwrap();
        assert_eq!(resolved.config, local);
        assert_eq!(resolved.source, ConfigSource::Local);
    }

    #[tokio::test]
    async fn guests_never_touch_the_remote() {
        let f = fixture();
        seed_remote(&f.gateway, &mom(date(2027, 1, 1)));
        let resolution = f.engine.resolve_on(&Session::guest(), date(2026, 10, 1)).await.unwrap();
        assert_eq!(resolution, Resolution::NeedsOnboarding);
    }

    #[tokio::test]
    async fn resolved_config_carries_week() {
        let f = fixture();
        let today = date(2026, 10, 14);
        f.local
            .save_user_config(&UserConfig::new(Role::Mom, today + Duration::days(196), None))
            .unwrap();
        let resolution = f.engine.resolve_on(&Session::guest(), today).await.unwrap();
        let resolved = resolution.ready().unwrap();
        assert_eq!(resolved.current_week, 12);
        assert_eq!(resolved.weeks_remaining, 28);
        assert_eq!(resolved.nickname, "Mom-to-be");
    }

    #[tokio::test]
    async fn onboarding_requires_role_and_date() {
        let f = fixture();
        let err = f
            .engine
            .complete_onboarding(&Session::guest(), None, Some(date(2027, 1, 1)), None)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::MissingOnboardingField("role")));
    }

    #[tokio::test]
    async fn onboarding_survives_remote_outage() {
        let f = fixture();
        f.gateway.set_offline(true);
        let config = f
            .engine
            .complete_onboarding(&f.session, Some(Role::Dad), Some(date(2027, 1, 1)), None)
            .await
            .unwrap();
        assert_eq!(config.nickname.as_deref(), Some("Dad-to-be"));
        assert_eq!(f.local.load_user_config().unwrap(), config);
        assert_eq!(f.gateway.profile_writes(), 0);
    }
}
