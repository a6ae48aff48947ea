//! UserInfo and token introspection.
//!
//! UserInfo releases exactly the claims implied by the token's granted
//! scopes, plus any essential claims a signed request object asked for.
//! The response body is plain JSON, a signed JWT, or a JWE, per the
//! client's registration.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::Provider;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::jose::jwe::JweEncryptionKey;
use crate::jose::jws::JwsSigner;
use crate::jose::{ClaimsSet, KeyFamily, jws};
use crate::keys;
use crate::store::AccessToken;

/// Standard OIDC scopes and the user claims each releases.
pub const STANDARD_SCOPES: &[(&str, &[&str])] = &[
    ("openid", &[]),
    (
        "profile",
        &[
            "name",
            "family_name",
            "given_name",
            "middle_name",
            "nickname",
            "preferred_username",
            "picture",
            "website",
            "gender",
            "birthdate",
            "zoneinfo",
            "locale",
            "updated_at",
        ],
    ),
    ("email", &["email", "email_verified"]),
    ("address", &["address"]),
    ("phone", &["phone_number", "phone_number_verified"]),
    // Client-only introspection scope; releases no user claims
    ("clientinfo", &[]),
];

/// UserInfo response body, shaped by the client's registration.
#[derive(Debug)]
pub enum UserInfoResponse {
    /// `application/json`
    Plain(Value),
    /// `application/jwt` — signed JWT or JWE compact form
    Token(String),
}

impl Provider {
    /// Serve UserInfo for a bearer access token.
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfoResponse> {
        let now = Utc::now();
        let token = self
            .store
            .access_token(access_token, now)
            .ok_or(Error::InvalidToken)?;

        if !token.has_scope("openid") {
            return Err(Error::InsufficientScope);
        }

        let client = self
            .store
            .client(&token.client_id)
            .ok_or(Error::InvalidToken)?;

        let claims = self.collect_claims(&token);
        self.encode_userinfo(&client, claims).await
    }

    /// Token validation without claim leakage: `{valid, expires_in}`.
    pub fn validate_token(&self, access_token: &str) -> (bool, i64) {
        let now = Utc::now();
        match self.store.access_token(access_token, now) {
            Some(token) => (true, token.expires_in(now)),
            None => (false, 0),
        }
    }

    /// Client-credentials-scoped introspection of the requesting client's
    /// own metadata. Requires the `clientinfo` scope.
    pub fn client_info(&self, access_token: &str) -> Result<Value> {
        let now = Utc::now();
        let token = self
            .store
            .access_token(access_token, now)
            .ok_or(Error::InvalidToken)?;

        if !token.has_scope("clientinfo") {
            return Err(Error::InsufficientScope);
        }

        let client = self
            .store
            .client(&token.client_id)
            .ok_or(Error::InvalidToken)?;

        let mut info = Map::new();
        if let Some(name) = &client.client_name {
            info.insert("name".to_string(), Value::String(name.clone()));
        }
        info.insert(
            "inum".to_string(),
            Value::String(client.client_id.clone()),
        );
        for (key, value) in &client.custom_attributes {
            info.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(info))
    }

    /// The claims released for this token: scope-mapped claims intersected
    /// with what the directory knows about the user, plus honored essential
    /// claims from the grant's request object.
    fn collect_claims(&self, token: &AccessToken) -> Map<String, Value> {
        let mut released = Map::new();
        released.insert("sub".to_string(), Value::String(token.subject.clone()));

        let Some(username) = token.username.as_deref() else {
            return released;
        };
        let Some(user) = self.users.find(username) else {
            return released;
        };

        for scope in &token.scopes {
            if let Some((_, claim_names)) =
                STANDARD_SCOPES.iter().find(|(name, _)| name == scope)
            {
                for claim in *claim_names {
                    if let Some(value) = user.claims.get(*claim) {
                        released.insert((*claim).to_string(), value.clone());
                    }
                }
            }
            for definition in &self.config.scopes.definitions {
                if definition.name == *scope {
                    for claim in &definition.claims {
                        if let Some(value) = user.claims.get(claim) {
                            released.insert(claim.clone(), value.clone());
                        }
                    }
                }
            }
        }

        // Essential claims requested through the request object's
        // `claims.userinfo` member are honored regardless of scope.
        if let Some(Value::Object(requested)) = &token.userinfo_claims {
            for claim in requested.keys() {
                if let Some(value) = user.claims.get(claim) {
                    released.insert(claim.clone(), value.clone());
                }
            }
        }

        released
    }

    async fn encode_userinfo(
        &self,
        client: &Client,
        claims: Map<String, Value>,
    ) -> Result<UserInfoResponse> {
        let signed = match client.userinfo_signed_response_alg {
            Some(alg) => {
                let mut set = ClaimsSet::new()
                    .issuer(&self.config.provider.issuer)
                    .audience(&client.client_id);
                set.sub = claims
                    .get("sub")
                    .and_then(Value::as_str)
                    .map(String::from);
                for (key, value) in &claims {
                    if key != "sub" {
                        set = set.claim(key, value.clone());
                    }
                }

                let token = match alg.family() {
                    KeyFamily::Hmac => jws::sign(
                        &set,
                        alg,
                        None,
                        &JwsSigner::Hmac(client.client_secret.as_bytes().to_vec()),
                    )
                    .map_err(|e| Error::Internal(format!("userinfo signing: {e}")))?,
                    KeyFamily::None => jws::sign(&set, alg, None, &JwsSigner::Unsigned)
                        .map_err(|e| Error::Internal(format!("userinfo signing: {e}")))?,
                    _ => self.keys.signing_key(alg)?.sign(&set)?,
                };
                Some(token)
            }
            None => None,
        };

        match (
            client.userinfo_encrypted_response_alg,
            client.userinfo_encrypted_response_enc,
        ) {
            (Some(key_alg), enc) => {
                let enc = enc.unwrap_or(crate::jose::ContentEncryptionAlgorithm::A128CbcHs256);
                let key = if key_alg.is_symmetric() {
                    JweEncryptionKey::Symmetric(keys::wrap_key_from_secret(
                        &client.client_secret,
                        key_alg,
                    )?)
                } else {
                    let jwks = self.client_jwks(client).await?;
                    JweEncryptionKey::Rsa(keys::rsa_encryption_key_from_jwks(&jwks)?)
                };

                let compact = match &signed {
                    // Nested JWT: sign then encrypt
                    Some(jwt) => crate::jose::jwe::encrypt(
                        jwt.as_bytes(),
                        key_alg,
                        enc,
                        &key,
                        None,
                        Some("JWT"),
                    )
                    .map_err(Error::Crypto)?,
                    None => crate::jose::jwe::encrypt(
                        &serde_json::to_vec(&Value::Object(claims)).unwrap_or_default(),
                        key_alg,
                        enc,
                        &key,
                        None,
                        None,
                    )
                    .map_err(Error::Crypto)?,
                };
                Ok(UserInfoResponse::Token(compact))
            }
            (None, _) => match signed {
                Some(jwt) => Ok(UserInfoResponse::Token(jwt)),
                None => Ok(UserInfoResponse::Plain(Value::Object(claims))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_scope_table_covers_oidc_core() {
        let names: Vec<&str> = STANDARD_SCOPES.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"openid"));
        assert!(names.contains(&"profile"));
        assert!(names.contains(&"email"));
        assert!(names.contains(&"address"));
        assert!(names.contains(&"phone"));

        let profile = STANDARD_SCOPES
            .iter()
            .find(|(n, _)| *n == "profile")
            .unwrap()
            .1;
        assert!(profile.contains(&"name"));
        assert!(profile.contains(&"preferred_username"));

        // openid itself releases nothing beyond sub
        let openid = STANDARD_SCOPES
            .iter()
            .find(|(n, _)| *n == "openid")
            .unwrap()
            .1;
        assert!(openid.is_empty());
    }
}
