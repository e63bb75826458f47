//! Invite-code pairing of two accounts.
//!
//! Per profile the only transitions are `Unpaired -> Paired` (redeeming a
//! code) and `Paired -> Unpaired` (unlinking). The redemption itself is a
//! single call to the store's atomic `match_partner` procedure; nothing
//! here reads a code and then writes a link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::error::{CompanionError, CompanionResult, ValidationReason};
use crate::gateway::{GatewayError, MatchOutcome, MatchRejection, NewInvite, RemoteGateway};
use crate::identity::Session;
use crate::types::{PartnerStatus, UserId};

/// Digits and capitals without the look-alikes `0`, `1`, `I` and `O`.
pub const INVITE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
pub const INVITE_CODE_LEN: usize = 6;
pub const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PARTNER_NICKNAME: &str = "Partner";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let code = (0..INVITE_CODE_LEN)
            .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Accepts surrounding whitespace and lower case.
    pub fn parse(input: &str) -> Result<Self, ValidationReason> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == INVITE_CODE_LEN
            && code.bytes().all(|b| INVITE_ALPHABET.contains(&b));
        if !valid {
            return Err(ValidationReason::InvalidCodeFormat);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingPolicy {
    /// Maximum invite age sent along with each redemption. `None` leaves
    /// expiry entirely to the store.
    pub invite_ttl: Option<Duration>,
    /// Fresh codes to try when the store reports a collision.
    pub generate_attempts: u8,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            invite_ttl: Some(DEFAULT_INVITE_TTL),
            generate_attempts: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerLink {
    pub user_id: UserId,
    pub partner_id: UserId,
}

#[derive(Clone)]
pub struct PairingProtocol {
    gateway: Option<Arc<dyn RemoteGateway>>,
    policy: PairingPolicy,
}

impl PairingProtocol {
    pub fn new(gateway: Option<Arc<dyn RemoteGateway>>, policy: PairingPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn policy(&self) -> &PairingPolicy {
        &self.policy
    }

    fn gateway(&self) -> CompanionResult<&Arc<dyn RemoteGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| CompanionError::RemoteUnavailable("no remote store configured".into()))
    }

    pub async fn generate_invite(&self, session: &Session) -> CompanionResult<InviteCode> {
        let identity = session.require_identity()?;
        let gateway = self.gateway()?;

        let profile = gateway.get_profile(identity, &identity.user_id).await?;
        if profile.and_then(|p| p.partner_id).is_some() {
            return Err(ValidationReason::AlreadyPaired.into());
        }

        let attempts = self.policy.generate_attempts.max(1);
        for attempt in 1..=attempts {
            let code = InviteCode::generate(&mut rand::thread_rng());
            let invite = NewInvite {
                code: code.as_str().to_string(),
                created_by: identity.user_id.clone(),
            };
            match gateway.insert_invite(identity, &invite).await {
                Ok(()) => {
                    tracing::info!(user = %identity.user_id, "generated invite code");
                    return Ok(code);
                }
                Err(GatewayError::Conflict(_)) if attempt < attempts => {
                    tracing::debug!(attempt, "invite code collision, retrying");
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to store invite code");
                    return Err(err.into());
                }
            }
        }
        Err(CompanionError::RemoteUnavailable(
            "could not allocate a unique invite code".into(),
        ))
    }

    pub async fn accept_invite(&self, session: &Session, code: &str) -> CompanionResult<PartnerLink> {
        let identity = session.require_identity()?;
        let code = InviteCode::parse(code)?;
        let gateway = self.gateway()?;

        let outcome = gateway
            .match_partner(identity, code.as_str(), self.policy.invite_ttl)
            .await?;
        match outcome {
            MatchOutcome::Linked { partner_id } => {
                tracing::info!(user = %identity.user_id, partner = %partner_id, "paired with partner");
                Ok(PartnerLink {
                    user_id: identity.user_id.clone(),
                    partner_id,
                })
            }
            MatchOutcome::Rejected(rejection) => {
                tracing::debug!(?rejection, "invite redemption rejected");
                Err(rejection_error(rejection))
            }
        }
    }

    /// Unlinking while unpaired succeeds without changing anything.
    pub async fn unlink_partner(&self, session: &Session) -> CompanionResult<()> {
        let identity = session.require_identity()?;
        self.gateway()?.unlink_partner(identity).await?;
        tracing::info!(user = %identity.user_id, "partner link cleared");
        Ok(())
    }

    pub async fn partner_status(&self, session: &Session) -> CompanionResult<Option<PartnerStatus>> {
        let identity = session.require_identity()?;
        let gateway = self.gateway()?;

        let Some(partner_id) = gateway
            .get_profile(identity, &identity.user_id)
            .await?
            .and_then(|p| p.partner_id)
        else {
            return Ok(None);
        };
        let partner = gateway.get_profile(identity, &partner_id).await?;
        let (nickname, role) = match partner {
            Some(p) => (p.nickname.filter(|n| !n.trim().is_empty()), p.role),
            None => (None, None),
        };
        Ok(Some(PartnerStatus {
            partner_id,
            nickname: nickname.unwrap_or_else(|| DEFAULT_PARTNER_NICKNAME.to_string()),
            role,
        }))
    }

    /// The linked partner's id, if any.
    pub async fn partner_id(&self, session: &Session) -> CompanionResult<Option<UserId>> {
        let identity = session.require_identity()?;
        Ok(self
            .gateway()?
            .get_profile(identity, &identity.user_id)
            .await?
            .and_then(|p| p.partner_id))
    }
}

fn rejection_error(rejection: MatchRejection) -> CompanionError {
    match rejection {
        MatchRejection::InvalidCode => CompanionError::NotFound("invite code".into()),
        MatchRejection::Expired => CompanionError::NotFound("invite code (expired)".into()),
        MatchRejection::SelfInvite => ValidationReason::SelfInvite.into(),
        MatchRejection::AlreadyPaired => ValidationReason::AlreadyPaired.into(),
        MatchRejection::Other(message) => ValidationReason::Rejected(message).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::types::{Identity, Profile, Role};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn session(id: &str) -> Session {
        Session::authenticated(Identity::new(UserId::new(id), None))
    }

    fn protocol() -> (Arc<MemoryGateway>, PairingProtocol) {
        let gateway = Arc::new(MemoryGateway::new());
        let protocol = PairingProtocol::new(Some(gateway.clone()), PairingPolicy::default());
        (gateway, protocol)
    }

    fn partner_of(gateway: &MemoryGateway, id: &str) -> Option<UserId> {
        gateway.profile(&UserId::new(id)).and_then(|p| p.partner_id)
    }

    #[test]
    fn generated_codes_use_the_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = InviteCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), INVITE_CODE_LEN);
            assert_eq!(InviteCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn parse_normalizes_and_rejects() {
        assert_eq!(InviteCode::parse(" abc234 ").unwrap().as_str(), "ABC234");
        for bad in ["", "ABC23", "ABC2345", "ABCD01", "ABCDIO", "AB-234"] {
            assert_eq!(InviteCode::parse(bad), Err(ValidationReason::InvalidCodeFormat), "{bad}");
        }
    }

    #[tokio::test]
    async fn redeeming_links_both_profiles_once() {
        let (gateway, protocol) = protocol();
        let code = protocol.generate_invite(&session("a")).await.unwrap();

        let link = protocol.accept_invite(&session("b"), code.as_str()).await.unwrap();
        assert_eq!(link.partner_id, UserId::new("a"));
        assert_eq!(partner_of(&gateway, "a"), Some(UserId::new("b")));
        assert_eq!(partner_of(&gateway, "b"), Some(UserId::new("a")));
        assert_eq!(
            gateway.invite(code.as_str()).unwrap().consumed_by,
            Some(UserId::new("b"))
        );

        let err = protocol.accept_invite(&session("c"), code.as_str()).await.unwrap_err();
        assert!(matches!(err, CompanionError::NotFound(_)));
        assert_eq!(partner_of(&gateway, "c"), None);
    }

    #[tokio::test]
    async fn own_code_is_rejected() {
        let (gateway, protocol) = protocol();
        let code = protocol.generate_invite(&session("a")).await.unwrap();
        let err = protocol.accept_invite(&session("a"), code.as_str()).await.unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::SelfInvite));
        assert!(gateway.invite(code.as_str()).unwrap().consumed_by.is_none());
    }

    #[tokio::test]
    async fn already_paired_users_cannot_redeem() {
        let (gateway, protocol) = protocol();
        let first = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("b"), first.as_str()).await.unwrap();

        let second = protocol.generate_invite(&session("c")).await.unwrap();
        let err = protocol.accept_invite(&session("b"), second.as_str()).await.unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::AlreadyPaired));
        assert_eq!(partner_of(&gateway, "c"), None);
        assert!(gateway.invite(second.as_str()).unwrap().consumed_by.is_none());
    }

    #[tokio::test]
    async fn codes_from_paired_creators_are_rejected() {
        let (gateway, protocol) = protocol();
        let stale = protocol.generate_invite(&session("a")).await.unwrap();
        let fresh = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("b"), fresh.as_str()).await.unwrap();

        let err = protocol.accept_invite(&session("c"), stale.as_str()).await.unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::AlreadyPaired));
        assert_eq!(partner_of(&gateway, "a"), Some(UserId::new("b")));
    }

    #[tokio::test]
    async fn paired_users_cannot_generate() {
        let (_, protocol) = protocol();
        let code = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("b"), code.as_str()).await.unwrap();
        let err = protocol.generate_invite(&session("a")).await.unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::AlreadyPaired));
    }

    #[tokio::test]
    async fn malformed_codes_never_reach_the_store() {
        let (gateway, protocol) = protocol();
        gateway.set_offline(true);
        let err = protocol.accept_invite(&session("b"), "12").await.unwrap_err();
        assert_eq!(err.reason(), Some(&ValidationReason::InvalidCodeFormat));
    }

    #[tokio::test]
    async fn expired_codes_are_not_found() {
        let (gateway, protocol) = protocol();
        let code = protocol.generate_invite(&session("a")).await.unwrap();
        gateway.advance_clock(DEFAULT_INVITE_TTL + Duration::from_secs(1)).unwrap();
        let err = protocol.accept_invite(&session("b"), code.as_str()).await.unwrap_err();
        assert!(matches!(err, CompanionError::NotFound(_)));
    }

    #[tokio::test]
    async fn unlink_clears_both_sides_and_is_idempotent() {
        let (gateway, protocol) = protocol();
        protocol.unlink_partner(&session("a")).await.unwrap();

        let code = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("b"), code.as_str()).await.unwrap();
        protocol.unlink_partner(&session("b")).await.unwrap();
        assert_eq!(partner_of(&gateway, "a"), None);
        assert_eq!(partner_of(&gateway, "b"), None);
        protocol.unlink_partner(&session("b")).await.unwrap();

        // unpaired again, so a new pairing is possible
        let code = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("c"), code.as_str()).await.unwrap();
        assert_eq!(partner_of(&gateway, "a"), Some(UserId::new("c")));
    }

    #[tokio::test]
    async fn partner_status_projects_the_partner() {
        let (gateway, protocol) = protocol();
        assert_eq!(protocol.partner_status(&session("a")).await.unwrap(), None);

        gateway
            .insert_profile(Profile {
                id: UserId::new("a"),
                role: Some(Role::Mom),
                due_date: None,
                nickname: Some("Ana".into()),
                partner_id: None,
            })
            .unwrap();
        let code = protocol.generate_invite(&session("a")).await.unwrap();
        protocol.accept_invite(&session("b"), code.as_str()).await.unwrap();

        let status = protocol.partner_status(&session("b")).await.unwrap().unwrap();
        assert_eq!(status.nickname, "Ana");
        assert_eq!(status.role, Some(Role::Mom));

        let status = protocol.partner_status(&session("a")).await.unwrap().unwrap();
        assert_eq!(status.nickname, "Partner");
        assert_eq!(status.role, None);
    }

    #[tokio::test]
    async fn guests_are_not_authenticated() {
        let (_, protocol) = protocol();
        let guest = Session::guest();
        assert!(matches!(
            protocol.generate_invite(&guest).await,
            Err(CompanionError::NotAuthenticated)
        ));
        assert!(matches!(
            protocol.accept_invite(&guest, "ABCDEF").await,
            Err(CompanionError::NotAuthenticated)
        ));
        assert!(matches!(
            protocol.unlink_partner(&guest).await,
            Err(CompanionError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn store_outage_surfaces_on_explicit_actions() {
        let (gateway, protocol) = protocol();
        gateway.set_offline(true);
        let err = protocol.generate_invite(&session("a")).await.unwrap_err();
        assert!(matches!(err, CompanionError::RemoteUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_of_one_code_have_one_winner() {
        for round in 0..20 {
            let (gateway, protocol) = protocol();
            let creator = format!("creator-{round}");
            let code = protocol.generate_invite(&session(&creator)).await.unwrap();

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let protocol = protocol.clone();
                    let code = code.clone();
                    tokio::spawn(async move {
                        protocol
                            .accept_invite(&session(&format!("redeemer-{i}")), code.as_str())
                            .await
                    })
                })
                .collect();
            let results = futures::future::join_all(handles).await;

            let winners: Vec<_> = results
                .into_iter()
                .map(|joined| joined.unwrap())
                .filter_map(Result::ok)
                .collect();
            assert_eq!(winners.len(), 1, "round {round}");
            let winner = &winners[0].user_id;
            assert_eq!(partner_of(&gateway, &creator).as_ref(), Some(winner));
            assert_eq!(
                partner_of(&gateway, winner.as_str()),
                Some(UserId::new(creator.clone()))
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_user_racing_two_codes_pairs_once() {
        let (gateway, protocol) = protocol();
        let first = protocol.generate_invite(&session("a")).await.unwrap();
        let second = protocol.generate_invite(&session("c")).await.unwrap();

        let p1 = protocol.clone();
        let p2 = protocol.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { p1.accept_invite(&session("b"), first.as_str()).await }),
            tokio::spawn(async move { p2.accept_invite(&session("b"), second.as_str()).await }),
        );
        let successes = [r1.unwrap(), r2.unwrap()].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let partner = partner_of(&gateway, "b").unwrap();
        assert_eq!(partner_of(&gateway, partner.as_str()), Some(UserId::new("b")));
    }
}
