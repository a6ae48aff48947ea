//! Concurrent in-process arenas for grants, tokens, and sessions.
//!
//! Single-use artifacts (authorization codes, refresh tokens) are consumed
//! with an atomic remove, so two concurrent exchanges of the same value
//! resolve to exactly one winner. Bearer strings are never stored raw —
//! only their SHA-256 digest.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::client::Client;

/// An issued authorization code, destroyed on first exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub subject: String,
    pub username: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub session_id: Option<String>,
    pub auth_time: i64,
    /// PKCE challenge, architecturally reserved.
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// `claims.userinfo` member of a signed request object, honored later.
    pub userinfo_claims: Option<Value>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub client_id: String,
    /// Wire-visible subject (pairwise-transformed when applicable).
    pub subject: String,
    /// Local account the subject maps to; empty for client-only tokens.
    pub username: Option<String>,
    pub scopes: Vec<String>,
    pub session_id: Option<String>,
    pub userinfo_claims: Option<Value>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub client_id: String,
    pub subject: String,
    pub username: Option<String>,
    pub scopes: Vec<String>,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Server-side SSO record shared across relying parties.
#[derive(Debug, Clone)]
pub struct SsoSession {
    pub session_id: String,
    pub username: String,
    pub auth_time: i64,
    pub expires_at: DateTime<Utc>,
}

/// All mutable provider state.
#[derive(Default)]
pub struct Store {
    clients: DashMap<String, Client>,
    /// sha256(registration access token) -> client_id
    registration_tokens: DashMap<String, String>,
    codes: DashMap<String, AuthorizationCode>,
    access_tokens: DashMap<String, AccessToken>,
    refresh_tokens: DashMap<String, RefreshToken>,
    sessions: DashMap<String, SsoSession>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Clients ---

    pub fn insert_client(&self, client: Client, registration_token_hash: String) {
        self.registration_tokens
            .insert(registration_token_hash, client.client_id.clone());
        self.clients.insert(client.client_id.clone(), client);
    }

    pub fn client(&self, client_id: &str) -> Option<Client> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    /// Apply a mutation under the client's entry lock; concurrent updates
    /// to the same client serialize here.
    pub fn update_client<F>(&self, client_id: &str, mutate: F) -> Option<Client>
    where
        F: FnOnce(&mut Client),
    {
        let mut entry = self.clients.get_mut(client_id)?;
        mutate(&mut entry);
        Some(entry.clone())
    }

    pub fn client_for_registration_token(&self, token: &str) -> Option<Client> {
        let hash = hash_token(token);
        let client_id = self.registration_tokens.get(&hash)?.clone();
        self.client(&client_id)
    }

    // --- Authorization codes ---

    pub fn insert_code(&self, code: &str, record: AuthorizationCode) {
        self.codes.insert(hash_token(code), record);
    }

    /// Consume a code: an atomic remove, so a double exchange yields exactly
    /// one success. Expired codes consume to nothing.
    pub fn consume_code(&self, code: &str, now: DateTime<Utc>) -> Option<AuthorizationCode> {
        let (_, record) = self.codes.remove(&hash_token(code))?;
        if record.expires_at <= now {
            return None;
        }
        Some(record)
    }

    // --- Access tokens ---

    pub fn insert_access_token(&self, token: &str, record: AccessToken) {
        self.access_tokens.insert(hash_token(token), record);
    }

    pub fn access_token(&self, token: &str, now: DateTime<Utc>) -> Option<AccessToken> {
        let record = self.access_tokens.get(&hash_token(token))?.clone();
        if record.expires_at <= now {
            return None;
        }
        Some(record)
    }

    pub fn revoke_access_token(&self, token: &str) -> bool {
        self.access_tokens.remove(&hash_token(token)).is_some()
    }

    // --- Refresh tokens ---

    pub fn insert_refresh_token(&self, token: &str, record: RefreshToken) {
        self.refresh_tokens.insert(hash_token(token), record);
    }

    /// Refresh tokens rotate: consumption is an atomic remove and the
    /// caller issues a replacement.
    pub fn consume_refresh_token(&self, token: &str, now: DateTime<Utc>) -> Option<RefreshToken> {
        let (_, record) = self.refresh_tokens.remove(&hash_token(token))?;
        if record.expires_at <= now {
            return None;
        }
        Some(record)
    }

    // --- SSO sessions ---

    pub fn insert_session(&self, session: SsoSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn session(&self, session_id: &str, now: DateTime<Utc>) -> Option<SsoSession> {
        let session = self.sessions.get(session_id)?.clone();
        if session.expires_at <= now {
            return None;
        }
        Some(session)
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drop expired codes, tokens, and sessions.
    pub fn prune_expired(&self, now: DateTime<Utc>) {
        self.codes.retain(|_, c| c.expires_at > now);
        self.access_tokens.retain(|_, t| t.expires_at > now);
        self.refresh_tokens.retain(|_, t| t.expires_at > now);
        self.sessions.retain(|_, s| s.expires_at > now);
    }
}

/// Generate an opaque bearer value (32 random bytes, base64url).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a bearer string (for storage).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
