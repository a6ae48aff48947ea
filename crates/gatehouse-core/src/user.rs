//! Resource-owner directory seeded from configuration.
//!
//! The engine treats user storage as an external concern; this directory is
//! the minimal credential-verification surface the password grant and the
//! interactive authorization step need.

use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde_json::{Map, Value};

use crate::config::UserConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    password_hash: String,
    /// Claims released at UserInfo, filtered by granted scope.
    pub claims: Map<String, Value>,
}

pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    pub fn from_configs(configs: &[UserConfig]) -> Result<Self> {
        let mut users = HashMap::with_capacity(configs.len());
        for uc in configs {
            // Reject malformed hashes at startup, not at first login
            PasswordHash::new(&uc.password_hash).map_err(|e| {
                Error::Config(format!(
                    "user '{}': password_hash is not a valid PHC string: {e}",
                    uc.username
                ))
            })?;
            if users.contains_key(&uc.username) {
                return Err(Error::Config(format!(
                    "duplicate user '{}'",
                    uc.username
                )));
            }
            users.insert(
                uc.username.clone(),
                User {
                    username: uc.username.clone(),
                    password_hash: uc.password_hash.clone(),
                    claims: uc.claims.clone(),
                },
            );
        }
        Ok(Self { users })
    }

    pub fn find(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Verify credentials; `None` for unknown users and wrong passwords
    /// alike (no account enumeration through timing of the lookup path).
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&User> {
        let user = self.users.get(username)?;
        let parsed = PasswordHash::new(&user.password_hash).ok()?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .ok()?;
        Some(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Produce an argon2 PHC hash for a plaintext password (`gatehouse
/// hash-password`).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
}
