//! Turns validated CLI/environment arguments into a wired [`Companion`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::GlobalArgs;
use crate::companion::Companion;
use crate::error::CompanionResult;
use crate::gateway::{RemoteGateway, client::create_gateway};
use crate::guide::{EmptyGuide, JsonGuide, WeeklyGuide};
use crate::identity::StaticIdentityProvider;
use crate::pairing::PairingPolicy;
use crate::storage::{FileStore, default_data_dir};
use crate::types::{Identity, UserId};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub remote_url: Option<String>,
    pub api_key: Option<String>,
    pub identity: Option<Identity>,
    pub invite_ttl: Option<Duration>,
    pub guide_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_args(args: &GlobalArgs) -> Result<Self, String> {
        args.validate()?;
        let remote_url = args
            .remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        // Without a remote store there is nothing to authenticate against.
        let identity = match (&remote_url, &args.user_id) {
            (Some(_), Some(user)) => Some(Identity::new(
                UserId::new(user.trim()),
                args.access_token.clone(),
            )),
            (None, Some(_)) => {
                tracing::warn!("user id given without a remote url; running as guest");
                None
            }
            _ => None,
        };

        Ok(Self {
            data_dir: args.data_dir.clone().unwrap_or_else(default_data_dir),
            remote_url,
            api_key: args.api_key.clone(),
            identity,
            invite_ttl: (args.invite_ttl_secs > 0).then(|| Duration::from_secs(args.invite_ttl_secs)),
            guide_path: args.guide_path.clone(),
        })
    }

    pub fn identity_mode(&self) -> &'static str {
        if self.identity.is_some() {
            "authenticated"
        } else {
            "guest"
        }
    }

    pub fn pairing_policy(&self) -> PairingPolicy {
        PairingPolicy {
            invite_ttl: self.invite_ttl,
            ..PairingPolicy::default()
        }
    }

    fn gateway(&self) -> Option<Arc<dyn RemoteGateway>> {
        self.remote_url.as_deref().map(|url| {
            Arc::new(create_gateway(url, self.api_key.clone())) as Arc<dyn RemoteGateway>
        })
    }

    fn guide(&self) -> CompanionResult<Arc<dyn WeeklyGuide>> {
        match &self.guide_path {
            Some(path) => Ok(Arc::new(JsonGuide::load(path)?)),
            None => Ok(Arc::new(EmptyGuide)),
        }
    }

    pub fn build(&self) -> CompanionResult<Companion> {
        let store = FileStore::open(&self.data_dir)?;
        tracing::debug!(path = %store.path().display(), "opened local store");
        Ok(Companion::new(
            Arc::new(store),
            self.gateway(),
            Arc::new(StaticIdentityProvider::new(self.identity.clone())),
            self.guide()?,
            self.pairing_policy(),
        ))
    }
}
