//! gatehouse-core: an OpenID Connect provider engine.
//!
//! Components, leaves first: key registry (`keys`), JOSE codec (`jose`),
//! client registry (`client`), grant/session machine (`grant`), and the
//! UserInfo/introspection service (`userinfo`). State lives in concurrent
//! arenas (`store`); everything is constructed explicitly and injected —
//! no process-wide singletons.

pub mod client;
pub mod config;
pub mod error;
pub mod grant;
pub mod jose;
pub mod keys;
pub mod store;
pub mod user;
pub mod userinfo;

use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys::KeyRegistry;
use crate::store::Store;
use crate::user::UserDirectory;

/// The assembled provider: configuration, key material, state arenas, and
/// the resource-owner directory. Handlers receive it by reference.
pub struct Provider {
    pub config: Config,
    pub keys: KeyRegistry,
    pub store: Store,
    pub users: UserDirectory,
    pub http: reqwest::Client,
}

impl Provider {
    pub fn new(config: Config) -> Result<Self> {
        let keys = KeyRegistry::from_configs(&config.keys)?;
        let users = UserDirectory::from_configs(&config.users)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;

        Ok(Self {
            config,
            keys,
            store: Store::new(),
            users,
            http,
        })
    }

    /// Every scope this deployment understands: the standard OIDC set plus
    /// configured custom scopes. Anything else is silently dropped at
    /// authorization time.
    pub fn known_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = userinfo::STANDARD_SCOPES
            .iter()
            .map(|(name, _)| (*name).to_string())
            .collect();
        scopes.extend(self.config.scopes.definitions.iter().map(|d| d.name.clone()));
        scopes
    }
}
