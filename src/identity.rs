use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{CompanionError, CompanionResult};
use crate::types::Identity;

/// Supplies the current identity. Session mechanics stay behind it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;
    async fn sign_out(&self) -> CompanionResult<()>;
}

/// Identity fixed at startup (flags or environment), cleared by `sign_out`.
#[derive(Default)]
pub struct StaticIdentityProvider {
    identity: RwLock<Option<Identity>>,
}

impl StaticIdentityProvider {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn guest() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.read().ok().and_then(|id| id.clone())
    }

    async fn sign_out(&self) -> CompanionResult<()> {
        let mut slot = self
            .identity
            .write()
            .map_err(|_| CompanionError::RemoteUnavailable("identity lock poisoned".into()))?;
        if let Some(identity) = slot.take() {
            tracing::info!(user = %identity.user_id, "signed out");
        }
        Ok(())
    }
}

/// Context for one logical user flow. Passed explicitly into the
/// reconciliation engine, pairing protocol and task service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    identity: Option<Identity>,
}

impl Session {
    pub fn guest() -> Self {
        Self { identity: None }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn from_provider(provider: &dyn IdentityProvider) -> Self {
        Self {
            identity: provider.current_identity(),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_guest(&self) -> bool {
        self.identity.is_none()
    }

    pub fn require_identity(&self) -> CompanionResult<&Identity> {
        self.identity.as_ref().ok_or(CompanionError::NotAuthenticated)
    }
}
