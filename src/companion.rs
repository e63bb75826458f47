//! Application context wiring the core services around one identity provider.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{CompanionResult, ValidationReason};
use crate::gateway::RemoteGateway;
use crate::guide::WeeklyGuide;
use crate::identity::{IdentityProvider, Session};
use crate::local::LocalStore;
use crate::pairing::{InviteCode, PairingPolicy, PairingProtocol};
use crate::reconcile::{ReconciliationEngine, Resolution};
use crate::storage::KeyValueStore;
use crate::tasks::TaskService;
use crate::types::{PartnerStatus, Role, UserConfig, UserId};

/// Outcome of a committed redemption. The follow-up reads are best effort,
/// so `partner` and `resolution` are absent when they failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResult {
    pub partner_id: UserId,
    pub partner: Option<PartnerStatus>,
    pub resolution: Option<Resolution>,
}

#[derive(Clone)]
pub struct Companion {
    identity: Arc<dyn IdentityProvider>,
    remote_configured: bool,
    pub reconciliation: ReconciliationEngine,
    pub pairing: PairingProtocol,
    pub tasks: TaskService,
}

impl Companion {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        gateway: Option<Arc<dyn RemoteGateway>>,
        identity: Arc<dyn IdentityProvider>,
        guide: Arc<dyn WeeklyGuide>,
        policy: PairingPolicy,
    ) -> Self {
        let local = LocalStore::new(store);
        Self {
            identity,
            remote_configured: gateway.is_some(),
            reconciliation: ReconciliationEngine::new(local.clone(), gateway.clone()),
            pairing: PairingProtocol::new(gateway.clone(), policy),
            tasks: TaskService::new(local, gateway, guide),
        }
    }

    /// Snapshot of the current identity as a session context.
    pub fn session(&self) -> Session {
        Session::from_provider(self.identity.as_ref())
    }

    pub fn remote_configured(&self) -> bool {
        self.remote_configured
    }

    pub async fn resolve(&self) -> CompanionResult<Resolution> {
        self.reconciliation.resolve(&self.session()).await
    }

    pub async fn complete_onboarding(
        &self,
        role: Option<Role>,
        due_date: Option<NaiveDate>,
        nickname: Option<String>,
    ) -> CompanionResult<UserConfig> {
        self.reconciliation
            .complete_onboarding(&self.session(), role, due_date, nickname)
            .await
    }

    /// Fills a missing week or role from the resolved configuration.
    pub async fn task_context(
        &self,
        week: Option<u8>,
        role: Option<Role>,
    ) -> CompanionResult<(u8, Role)> {
        if let (Some(week), Some(role)) = (week, role) {
            return Ok((week, role));
        }
        let resolution = self.resolve().await?;
        let resolved = resolution
            .ready()
            .ok_or(ValidationReason::MissingOnboardingField("role"))?;
        let role = role
            .or(resolved.role())
            .ok_or(ValidationReason::MissingOnboardingField("role"))?;
        Ok((week.unwrap_or(resolved.current_week), role))
    }

    /// Fills a missing week from the resolved configuration.
    pub async fn week_context(&self, week: Option<u8>) -> CompanionResult<u8> {
        if let Some(week) = week {
            return Ok(week);
        }
        let resolution = self.resolve().await?;
        resolution
            .ready()
            .map(|resolved| resolved.current_week)
            .ok_or_else(|| ValidationReason::MissingOnboardingField("due date").into())
    }

    pub async fn generate_invite(&self) -> CompanionResult<InviteCode> {
        self.pairing.generate_invite(&self.session()).await
    }

    /// Redeems `code`, then re-reads the partner and the config so the
    /// caller renders against the post-pairing state. Once the link is
    /// committed the call succeeds even if those reads fail.
    pub async fn accept_invite(&self, code: &str) -> CompanionResult<PairingResult> {
        let session = self.session();
        let link = self.pairing.accept_invite(&session, code).await?;

        let partner = match self.pairing.partner_status(&session).await {
            Ok(partner) => partner,
            Err(err) => {
                tracing::warn!(error = %err, "paired, but the partner profile could not be read");
                None
            }
        };
        let resolution = match self.reconciliation.resolve(&session).await {
            Ok(resolution) => Some(resolution),
            Err(err) => {
                tracing::warn!(error = %err, "paired, but the config could not be resolved");
                None
            }
        };
        Ok(PairingResult {
            partner_id: link.partner_id,
            partner,
            resolution,
        })
    }

    pub async fn unlink_partner(&self) -> CompanionResult<()> {
        self.pairing.unlink_partner(&self.session()).await
    }

    pub async fn partner_status(&self) -> CompanionResult<Option<PartnerStatus>> {
        self.pairing.partner_status(&self.session()).await
    }

    pub async fn sign_out(&self) -> CompanionResult<()> {
        self.identity.sign_out().await
    }
}
