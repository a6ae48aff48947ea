use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::jose::SignatureAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub scopes: ScopesConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Public base URL for this service. Client-assertion audiences and the
    /// discovery document are derived from it.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_authz_code_ttl")]
    pub authorization_code_ttl_secs: u64,
    #[serde(default = "default_id_token_ttl")]
    pub id_token_ttl_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Lifetime of tokens minted by the token-exchange grant; these are the
    /// long-lived derivative of a short-lived access token.
    #[serde(default = "default_exchanged_ttl")]
    pub exchanged_token_ttl_secs: u64,
    /// Seconds of tolerance when checking assertion expiry.
    #[serde(default)]
    pub clock_skew_secs: u64,
    /// Timeout for outbound fetches (client jwks_uri, sector identifiers).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Salt mixed into pairwise subject derivation.
    #[serde(default = "default_pairwise_salt")]
    pub pairwise_salt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    pub algorithm: SignatureAlgorithm,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub kid: Option<String>,
}

/// Redirect-URI policy. Native-app rules keep shifting upstream, so they
/// are configuration, not code.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Permit plain `http` redirect URIs for web clients.
    #[serde(default)]
    pub web_allow_http: bool,
    /// Permit localhost/loopback redirect hosts for web clients.
    #[serde(default)]
    pub web_allow_loopback: bool,
    /// Permit custom (non-http) schemes for native clients.
    #[serde(default = "default_true")]
    pub native_allow_custom_schemes: bool,
    /// Permit localhost/loopback redirect hosts for native clients.
    #[serde(default = "default_true")]
    pub native_allow_loopback: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            web_allow_http: false,
            web_allow_loopback: false,
            native_allow_custom_schemes: true,
            native_allow_loopback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopesConfig {
    #[serde(default)]
    pub definitions: Vec<ScopeDefinition>,
}

/// A custom scope and the user claims it releases at the UserInfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub claims: Vec<String>,
}

/// A resource owner seeded from configuration. Password hashes are argon2
/// PHC strings (`gatehouse hash-password`).
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Resolve the config file: explicit path, `GATEHOUSE_CONFIG`, then
/// standard locations.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let mut searched = Vec::new();

    let candidates: Vec<PathBuf> = if let Some(path) = explicit {
        vec![path.to_path_buf()]
    } else {
        let mut paths = Vec::new();
        if let Ok(env_path) = std::env::var("GATEHOUSE_CONFIG") {
            paths.push(PathBuf::from(env_path));
        }
        paths.push(PathBuf::from("gatehouse.toml"));
        paths.push(PathBuf::from("/etc/gatehouse/config.toml"));
        paths
    };

    for path in candidates {
        if path.exists() {
            return load_config(&path);
        }
        searched.push(path);
    }

    Err(Error::ConfigNotFound { searched })
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&raw).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(Error::Config("at least one [[keys]] entry is required".to_string()));
        }
        if self.provider.authorization_code_ttl_secs == 0 {
            return Err(Error::Config("authorization_code_ttl_secs must be positive".to_string()));
        }
        for scope in &self.scopes.definitions {
            if scope.name.contains(char::is_whitespace) {
                return Err(Error::Config(format!(
                    "scope name '{}' must not contain whitespace",
                    scope.name
                )));
            }
        }
        Ok(())
    }

    /// The token endpoint URL — the exact audience a client-assertion JWT
    /// must carry.
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.server.public_url.trim_end_matches('/'))
    }

    pub fn registration_endpoint(&self) -> String {
        format!("{}/register", self.server.public_url.trim_end_matches('/'))
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8710
}

fn default_issuer() -> String {
    "gatehouse".to_string()
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    2_592_000
}

fn default_authz_code_ttl() -> u64 {
    300
}

fn default_id_token_ttl() -> u64 {
    3600
}

fn default_session_ttl() -> u64 {
    86_400
}

fn default_exchanged_ttl() -> u64 {
    604_800
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_pairwise_salt() -> String {
    "gatehouse-pairwise".to_string()
}

fn default_true() -> bool {
    true
}
