//! Dynamic client registration (OIDC Dynamic Client Registration 1.0).
//!
//! Clients are created by `register`, then read and mutated only through
//! their registration access token. Redirect-URI policy is configuration;
//! the defaults match the strict web profile (https only, no loopback).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use url::Url;

use crate::Provider;
use crate::config::RegistrationConfig;
use crate::error::{Error, Result};
use crate::jose::{
    ContentEncryptionAlgorithm, KeyManagementAlgorithm, SignatureAlgorithm, jws,
};
use crate::keys;
use crate::store::{generate_token, hash_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    Web,
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    ClientSecretJwt,
    PrivateKeyJwt,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Public,
    Pairwise,
}

/// Registration request / partial-update body. Every field is optional;
/// unknown members are kept as custom attributes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientMetadata {
    pub application_type: Option<ApplicationType>,
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    /// Space-separated requested scopes.
    pub scope: Option<String>,
    pub token_endpoint_auth_method: Option<TokenEndpointAuthMethod>,
    pub token_endpoint_auth_signing_alg: Option<SignatureAlgorithm>,
    pub jwks: Option<Value>,
    pub jwks_uri: Option<String>,
    pub id_token_signed_response_alg: Option<SignatureAlgorithm>,
    pub id_token_encrypted_response_alg: Option<KeyManagementAlgorithm>,
    pub id_token_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub userinfo_signed_response_alg: Option<SignatureAlgorithm>,
    pub userinfo_encrypted_response_alg: Option<KeyManagementAlgorithm>,
    pub userinfo_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub request_object_signing_alg: Option<SignatureAlgorithm>,
    pub subject_type: Option<SubjectType>,
    pub sector_identifier_uri: Option<String>,
    pub software_statement: Option<String>,
    #[serde(flatten)]
    pub custom_attributes: Map<String, Value>,
}

/// A registered client.
#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub client_secret: String,
    pub client_name: Option<String>,
    pub application_type: ApplicationType,
    pub redirect_uris: Vec<String>,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    /// Scopes the client asked for at registration; unknown entries stay
    /// recorded but are never granted.
    pub requested_scopes: Vec<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub token_endpoint_auth_signing_alg: Option<SignatureAlgorithm>,
    pub jwks: Option<Value>,
    pub jwks_uri: Option<String>,
    pub id_token_signed_response_alg: SignatureAlgorithm,
    pub id_token_encrypted_response_alg: Option<KeyManagementAlgorithm>,
    pub id_token_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub userinfo_signed_response_alg: Option<SignatureAlgorithm>,
    pub userinfo_encrypted_response_alg: Option<KeyManagementAlgorithm>,
    pub userinfo_encrypted_response_enc: Option<ContentEncryptionAlgorithm>,
    pub request_object_signing_alg: Option<SignatureAlgorithm>,
    pub subject_type: SubjectType,
    pub sector_identifier_uri: Option<String>,
    pub custom_attributes: Map<String, Value>,
    pub client_id_issued_at: i64,
    /// 0 = never expires.
    pub client_secret_expires_at: i64,
}

impl Client {
    pub fn redirect_uri_registered(&self, uri: &str) -> bool {
        // Exact string match, per OIDC Core §3.1.2.1
        self.redirect_uris.iter().any(|r| r == uri)
    }

    pub fn allows_response_type(&self, response_type: &str) -> bool {
        let mut requested: Vec<&str> = response_type.split_whitespace().collect();
        requested.sort_unstable();
        self.response_types.iter().any(|registered| {
            let mut parts: Vec<&str> = registered.split_whitespace().collect();
            parts.sort_unstable();
            parts == requested
        })
    }

    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    /// Whether the client's registration permits this scope. An empty
    /// registration-time scope list leaves the client open to any scope
    /// the server knows.
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.requested_scopes.is_empty() || self.requested_scopes.iter().any(|s| s == scope)
    }

    pub fn secret_matches(&self, presented: &str) -> bool {
        self.client_secret
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .unwrap_u8()
            == 1
    }

    /// Wire-visible subject for this client: the local account name for
    /// public clients, a sector-scoped digest for pairwise ones.
    pub fn derived_subject(&self, username: &str, salt: &str) -> String {
        match self.subject_type {
            SubjectType::Public => username.to_string(),
            SubjectType::Pairwise => {
                let sector = self
                    .sector_identifier_uri
                    .as_deref()
                    .and_then(|uri| Url::parse(uri).ok())
                    .and_then(|u| u.host_str().map(String::from))
                    .or_else(|| {
                        self.redirect_uris
                            .first()
                            .and_then(|uri| Url::parse(uri).ok())
                            .and_then(|u| u.host_str().map(String::from))
                    })
                    .unwrap_or_default();

                let mut hasher = Sha256::new();
                hasher.update(sector.as_bytes());
                hasher.update(username.as_bytes());
                hasher.update(salt.as_bytes());
                URL_SAFE_NO_PAD.encode(hasher.finalize())
            }
        }
    }

    /// Client metadata as returned by read/update (no secret material).
    pub fn view(&self) -> Value {
        let mut view = serde_json::json!({
            "client_id": self.client_id,
            "application_type": self.application_type,
            "redirect_uris": self.redirect_uris,
            "response_types": self.response_types,
            "grant_types": self.grant_types,
            "token_endpoint_auth_method": self.token_endpoint_auth_method,
            "subject_type": self.subject_type,
            "id_token_signed_response_alg": self.id_token_signed_response_alg,
            "client_id_issued_at": self.client_id_issued_at,
            "client_secret_expires_at": self.client_secret_expires_at,
        });
        let obj = view.as_object_mut().expect("view is an object");
        if let Some(name) = &self.client_name {
            obj.insert("client_name".to_string(), Value::String(name.clone()));
        }
        if !self.requested_scopes.is_empty() {
            obj.insert(
                "scope".to_string(),
                Value::String(self.requested_scopes.join(" ")),
            );
        }
        if let Some(uri) = &self.jwks_uri {
            obj.insert("jwks_uri".to_string(), Value::String(uri.clone()));
        }
        if let Some(jwks) = &self.jwks {
            obj.insert("jwks".to_string(), jwks.clone());
        }
        if let Some(uri) = &self.sector_identifier_uri {
            obj.insert("sector_identifier_uri".to_string(), Value::String(uri.clone()));
        }
        if let Some(alg) = self.userinfo_signed_response_alg {
            obj.insert("userinfo_signed_response_alg".to_string(), serde_json::json!(alg));
        }
        if let Some(alg) = self.userinfo_encrypted_response_alg {
            obj.insert("userinfo_encrypted_response_alg".to_string(), serde_json::json!(alg));
        }
        if let Some(enc) = self.userinfo_encrypted_response_enc {
            obj.insert("userinfo_encrypted_response_enc".to_string(), serde_json::json!(enc));
        }
        if let Some(alg) = self.id_token_encrypted_response_alg {
            obj.insert("id_token_encrypted_response_alg".to_string(), serde_json::json!(alg));
        }
        if let Some(enc) = self.id_token_encrypted_response_enc {
            obj.insert("id_token_encrypted_response_enc".to_string(), serde_json::json!(enc));
        }
        if let Some(alg) = self.request_object_signing_alg {
            obj.insert("request_object_signing_alg".to_string(), serde_json::json!(alg));
        }
        if let Some(alg) = self.token_endpoint_auth_signing_alg {
            obj.insert("token_endpoint_auth_signing_alg".to_string(), serde_json::json!(alg));
        }
        for (key, value) in &self.custom_attributes {
            obj.entry(key.clone()).or_insert_with(|| value.clone());
        }
        view
    }
}

/// Successful registration payload: the client view plus the one-time
/// secret material.
#[derive(Debug)]
pub struct RegistrationResponse {
    pub client: Client,
    pub registration_access_token: String,
    pub registration_client_uri: String,
}

impl RegistrationResponse {
    pub fn to_json(&self) -> Value {
        let mut body = self.client.view();
        let obj = body.as_object_mut().expect("view is an object");
        obj.insert(
            "client_secret".to_string(),
            Value::String(self.client.client_secret.clone()),
        );
        obj.insert(
            "registration_access_token".to_string(),
            Value::String(self.registration_access_token.clone()),
        );
        obj.insert(
            "registration_client_uri".to_string(),
            Value::String(self.registration_client_uri.clone()),
        );
        body
    }
}

impl Provider {
    /// Register a new client.
    pub async fn register_client(&self, mut metadata: ClientMetadata) -> Result<RegistrationResponse> {
        if let Some(statement) = metadata.software_statement.take() {
            let claims = self.verify_software_statement(&statement).await?;
            metadata = merge_statement(metadata, claims)?;
        }

        let application_type = metadata.application_type.unwrap_or(ApplicationType::Web);
        let grant_types = metadata
            .grant_types
            .clone()
            .unwrap_or_else(|| vec!["authorization_code".to_string()]);
        let response_types = metadata
            .response_types
            .clone()
            .unwrap_or_else(|| vec!["code".to_string()]);

        let redirect_uris = metadata.redirect_uris.clone().unwrap_or_default();
        validate_redirect_uris(
            &redirect_uris,
            application_type,
            &grant_types,
            &self.config.registration,
        )?;

        let subject_type = metadata.subject_type.unwrap_or(SubjectType::Public);
        validate_sector_identifier(&redirect_uris, subject_type, metadata.sector_identifier_uri.as_deref())?;

        validate_encryption_pairs(&metadata)?;

        let token_endpoint_auth_method = metadata
            .token_endpoint_auth_method
            .unwrap_or(TokenEndpointAuthMethod::ClientSecretBasic);
        if token_endpoint_auth_method == TokenEndpointAuthMethod::PrivateKeyJwt
            && metadata.jwks.is_none()
            && metadata.jwks_uri.is_none()
        {
            return Err(Error::InvalidClientMetadata(
                "private_key_jwt requires jwks or jwks_uri".to_string(),
            ));
        }

        let requested_scopes: Vec<String> = metadata
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        let mut id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let client_id = hex::encode(id_bytes);

        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let client_secret = hex::encode(secret_bytes);

        let client = Client {
            client_id: client_id.clone(),
            client_secret,
            client_name: metadata.client_name.clone(),
            application_type,
            redirect_uris,
            response_types,
            grant_types,
            requested_scopes,
            token_endpoint_auth_method,
            token_endpoint_auth_signing_alg: metadata.token_endpoint_auth_signing_alg,
            jwks: metadata.jwks.clone(),
            jwks_uri: metadata.jwks_uri.clone(),
            id_token_signed_response_alg: metadata
                .id_token_signed_response_alg
                .unwrap_or(SignatureAlgorithm::Rs256),
            id_token_encrypted_response_alg: metadata.id_token_encrypted_response_alg,
            id_token_encrypted_response_enc: metadata.id_token_encrypted_response_enc,
            userinfo_signed_response_alg: metadata.userinfo_signed_response_alg,
            userinfo_encrypted_response_alg: metadata.userinfo_encrypted_response_alg,
            userinfo_encrypted_response_enc: metadata.userinfo_encrypted_response_enc,
            request_object_signing_alg: metadata.request_object_signing_alg,
            subject_type,
            sector_identifier_uri: metadata.sector_identifier_uri.clone(),
            custom_attributes: metadata.custom_attributes.clone(),
            client_id_issued_at: Utc::now().timestamp(),
            client_secret_expires_at: 0,
        };

        let registration_access_token = generate_token();
        self.store
            .insert_client(client.clone(), hash_token(&registration_access_token));

        tracing::info!(
            client_id = %client_id,
            application_type = ?application_type,
            "client registered"
        );

        Ok(RegistrationResponse {
            registration_client_uri: format!(
                "{}/{client_id}",
                self.config.registration_endpoint()
            ),
            client,
            registration_access_token,
        })
    }

    /// Read a client through its registration access token. The token must
    /// be exactly the one issued for `client_id`.
    pub fn read_client(&self, client_id: &str, registration_token: &str) -> Result<Client> {
        let client = self
            .store
            .client_for_registration_token(registration_token)
            .ok_or(Error::RegistrationAccess)?;
        if client.client_id != client_id {
            return Err(Error::RegistrationAccess);
        }
        Ok(client)
    }

    /// Partial update: only supplied fields mutate. The registration access
    /// token is not rotated.
    pub fn update_client(
        &self,
        client_id: &str,
        registration_token: &str,
        changes: ClientMetadata,
    ) -> Result<Client> {
        // Authenticate before touching anything
        let current = self.read_client(client_id, registration_token)?;

        if let Some(uris) = &changes.redirect_uris {
            let application_type = changes
                .application_type
                .unwrap_or(current.application_type);
            validate_redirect_uris(
                uris,
                application_type,
                &current.grant_types,
                &self.config.registration,
            )?;
        }
        validate_encryption_pairs(&changes)?;

        self.store
            .update_client(client_id, |client| {
                if let Some(v) = changes.application_type {
                    client.application_type = v;
                }
                if let Some(v) = changes.client_name.clone() {
                    client.client_name = Some(v);
                }
                if let Some(v) = changes.redirect_uris.clone() {
                    client.redirect_uris = v;
                }
                if let Some(v) = changes.response_types.clone() {
                    client.response_types = v;
                }
                if let Some(v) = changes.grant_types.clone() {
                    client.grant_types = v;
                }
                if let Some(v) = changes.scope.as_deref() {
                    client.requested_scopes =
                        v.split_whitespace().map(String::from).collect();
                }
                if let Some(v) = changes.token_endpoint_auth_method {
                    client.token_endpoint_auth_method = v;
                }
                if let Some(v) = changes.token_endpoint_auth_signing_alg {
                    client.token_endpoint_auth_signing_alg = Some(v);
                }
                if let Some(v) = changes.jwks.clone() {
                    client.jwks = Some(v);
                }
                if let Some(v) = changes.jwks_uri.clone() {
                    client.jwks_uri = Some(v);
                }
                if let Some(v) = changes.id_token_signed_response_alg {
                    client.id_token_signed_response_alg = v;
                }
                if let Some(v) = changes.id_token_encrypted_response_alg {
                    client.id_token_encrypted_response_alg = Some(v);
                }
                if let Some(v) = changes.id_token_encrypted_response_enc {
                    client.id_token_encrypted_response_enc = Some(v);
                }
                if let Some(v) = changes.userinfo_signed_response_alg {
                    client.userinfo_signed_response_alg = Some(v);
                }
                if let Some(v) = changes.userinfo_encrypted_response_alg {
                    client.userinfo_encrypted_response_alg = Some(v);
                }
                if let Some(v) = changes.userinfo_encrypted_response_enc {
                    client.userinfo_encrypted_response_enc = Some(v);
                }
                if let Some(v) = changes.request_object_signing_alg {
                    client.request_object_signing_alg = Some(v);
                }
                if let Some(v) = changes.subject_type {
                    client.subject_type = v;
                }
                if let Some(v) = changes.sector_identifier_uri.clone() {
                    client.sector_identifier_uri = Some(v);
                }
                for (key, value) in &changes.custom_attributes {
                    client
                        .custom_attributes
                        .insert(key.clone(), value.clone());
                }
            })
            .ok_or(Error::RegistrationAccess)
    }

    /// Verify a software statement against its own declared key material
    /// and return its claims.
    async fn verify_software_statement(&self, statement: &str) -> Result<Map<String, Value>> {
        let bad = |msg: &str| Error::InvalidSoftwareStatement(msg.to_string());

        let header = jws::decode_header(statement).map_err(|_| bad("malformed JWT"))?;
        let alg: SignatureAlgorithm = header
            .alg
            .parse()
            .map_err(|_| bad("unsupported algorithm"))?;
        if !matches!(
            alg.family(),
            crate::jose::KeyFamily::Rsa | crate::jose::KeyFamily::Ec
        ) {
            return Err(bad("software statements must be asymmetrically signed"));
        }

        let unverified = jws::decode_claims_unverified(statement).map_err(|_| bad("malformed payload"))?;
        let jwks = if let Some(jwks) = unverified.get("jwks") {
            jwks.clone()
        } else if let Some(uri) = unverified.get_str("jwks_uri") {
            keys::fetch_jwks(&self.http, uri).await?
        } else {
            return Err(bad("statement declares neither jwks nor jwks_uri"));
        };

        let verifier = keys::client_verifier(alg, None, Some(&jwks), header.kid.as_deref())
            .map_err(|_| bad("no usable verification key"))?;
        let claims = jws::verify(statement, alg, &verifier).map_err(|_| bad("signature mismatch"))?;

        Ok(claims.extra)
    }
}

/// Statement claims take precedence over plain metadata (RFC 7591 §2.3).
fn merge_statement(metadata: ClientMetadata, claims: Map<String, Value>) -> Result<ClientMetadata> {
    let mut base = serde_json::to_value(&metadata)
        .map_err(|e| Error::Internal(format!("metadata serialization: {e}")))?;
    let obj = base.as_object_mut().expect("metadata is an object");

    for (key, value) in claims {
        // JWT-level claims are not client metadata
        if matches!(key.as_str(), "iss" | "sub" | "aud" | "exp" | "iat" | "jti") {
            continue;
        }
        obj.insert(key, value);
    }

    serde_json::from_value(base)
        .map_err(|e| Error::InvalidSoftwareStatement(format!("bad statement claims: {e}")))
}

fn validate_redirect_uris(
    redirect_uris: &[String],
    application_type: ApplicationType,
    grant_types: &[String],
    policy: &RegistrationConfig,
) -> Result<()> {
    if redirect_uris.is_empty() {
        // Redirect-less registration is valid only for grants that never
        // redirect back to the client.
        let redirectless = grant_types.iter().all(|g| {
            matches!(
                g.as_str(),
                "client_credentials" | "password" | "refresh_token"
            )
        });
        if redirectless && !grant_types.is_empty() {
            return Ok(());
        }
        return Err(Error::InvalidRedirectUri(
            "at least one redirect_uri is required".to_string(),
        ));
    }

    for uri in redirect_uris {
        if uri.contains('#') {
            return Err(Error::InvalidRedirectUri(format!(
                "{uri}: redirect URIs must not contain a fragment"
            )));
        }

        let parsed = Url::parse(uri)
            .map_err(|_| Error::InvalidRedirectUri(format!("{uri}: not an absolute URI")))?;
        let host = parsed.host_str().unwrap_or_default();
        let loopback = host.eq_ignore_ascii_case("localhost")
            || host == "127.0.0.1"
            || host == "[::1]"
            || host == "::1";

        match application_type {
            ApplicationType::Web => {
                if parsed.scheme() == "http" && !policy.web_allow_http {
                    return Err(Error::InvalidRedirectUri(format!(
                        "{uri}: http scheme is not allowed for web clients"
                    )));
                }
                if loopback && !policy.web_allow_loopback {
                    return Err(Error::InvalidRedirectUri(format!(
                        "{uri}: loopback hosts are not allowed for web clients"
                    )));
                }
            }
            ApplicationType::Native => {
                let custom_scheme = parsed.scheme() != "http" && parsed.scheme() != "https";
                if custom_scheme && !policy.native_allow_custom_schemes {
                    return Err(Error::InvalidRedirectUri(format!(
                        "{uri}: custom schemes are not allowed for native clients"
                    )));
                }
                if loopback && !policy.native_allow_loopback {
                    return Err(Error::InvalidRedirectUri(format!(
                        "{uri}: loopback hosts are not allowed for native clients"
                    )));
                }
            }
        }
    }

    Ok(())
}

fn validate_sector_identifier(
    redirect_uris: &[String],
    subject_type: SubjectType,
    sector_identifier_uri: Option<&str>,
) -> Result<()> {
    if let Some(uri) = sector_identifier_uri {
        let parsed = Url::parse(uri).map_err(|_| {
            Error::InvalidClientMetadata("sector_identifier_uri is not a valid URI".to_string())
        })?;
        if parsed.scheme() != "https" {
            return Err(Error::InvalidClientMetadata(
                "sector_identifier_uri must use https".to_string(),
            ));
        }
        return Ok(());
    }

    if subject_type == SubjectType::Pairwise {
        let mut hosts: Vec<String> = redirect_uris
            .iter()
            .filter_map(|u| Url::parse(u).ok().and_then(|p| p.host_str().map(String::from)))
            .collect();
        hosts.sort_unstable();
        hosts.dedup();
        if hosts.len() > 1 {
            return Err(Error::InvalidClientMetadata(
                "pairwise subject type with multiple redirect hosts requires sector_identifier_uri"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_encryption_pairs(metadata: &ClientMetadata) -> Result<()> {
    if metadata.id_token_encrypted_response_enc.is_some()
        && metadata.id_token_encrypted_response_alg.is_none()
    {
        return Err(Error::InvalidClientMetadata(
            "id_token_encrypted_response_enc requires id_token_encrypted_response_alg".to_string(),
        ));
    }
    if metadata.userinfo_encrypted_response_enc.is_some()
        && metadata.userinfo_encrypted_response_alg.is_none()
    {
        return Err(Error::InvalidClientMetadata(
            "userinfo_encrypted_response_enc requires userinfo_encrypted_response_alg".to_string(),
        ));
    }
    Ok(())
}
