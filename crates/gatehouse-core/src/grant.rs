//! Grant and session state machine.
//!
//! An authorization attempt moves REQUESTED → GRANTED → CODE_ISSUED →
//! EXCHANGED; codes and refresh tokens are destroyed on first use by an
//! atomic arena remove, so concurrent double-spends resolve to one winner.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::Provider;
use crate::client::{Client, TokenEndpointAuthMethod};
use crate::error::{Error, Result};
use crate::jose::jwe::JweEncryptionKey;
use crate::jose::jws::JwsSigner;
use crate::jose::{ClaimsSet, KeyFamily, SignatureAlgorithm, jws};
use crate::keys;
use crate::store::{AccessToken, AuthorizationCode, RefreshToken, SsoSession, generate_token};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

pub const CLIENT_ASSERTION_TYPE_JWT: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Parameters of an authorization request, after transport decoding.
#[derive(Debug, Default, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    /// SSO session presented via parameter or cookie.
    pub session_id: Option<String>,
    /// Signed request object (`request` parameter).
    pub request_object: Option<String>,
    /// Raw `claims` parameter (JSON).
    pub claims: Option<String>,
    /// Direct resource-owner credentials (interactive authentication).
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_age: Option<u64>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// A successful authorization: parameters to deliver on the registered
/// redirect URI, fragment-encoded when tokens travel with them.
#[derive(Debug)]
pub struct AuthorizeSuccess {
    pub redirect_uri: String,
    pub params: Vec<(&'static str, String)>,
    pub fragment: bool,
    pub session_id: String,
}

/// Client credentials as asserted at the token endpoint. The method is the
/// one the request's shape claims, before any verification.
#[derive(Debug, Default, Clone)]
pub struct ClientCredentials {
    pub method: Option<TokenEndpointAuthMethod>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion: Option<String>,
    pub client_assertion_type: Option<String>,
}

/// Token endpoint parameters.
#[derive(Debug, Default, Clone)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
    pub subject_token: Option<String>,
    pub subject_token_type: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_token_type: Option<&'static str>,
}

struct ResponseTypes {
    code: bool,
    token: bool,
    id_token: bool,
}

fn parse_response_type(response_type: &str) -> Result<ResponseTypes> {
    let mut types = ResponseTypes {
        code: false,
        token: false,
        id_token: false,
    };
    for part in response_type.split_whitespace() {
        match part {
            "code" => types.code = true,
            "token" => types.token = true,
            "id_token" => types.id_token = true,
            other => {
                return Err(Error::UnsupportedResponseType(other.to_string()));
            }
        }
    }
    if !types.code && !types.token && !types.id_token {
        return Err(Error::InvalidRequest("response_type is required".to_string()));
    }
    Ok(types)
}

impl Provider {
    /// Authorization endpoint: validate the request, establish the end-user
    /// identity (SSO session or direct credentials), and issue the artifacts
    /// the response type asks for.
    pub async fn authorize(&self, mut request: AuthorizeRequest) -> Result<AuthorizeSuccess> {
        let client = self
            .store
            .client(&request.client_id)
            .ok_or(Error::InvalidClient)?;

        let mut userinfo_claims = request
            .claims
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|v| v.get("userinfo").cloned());

        if let Some(object) = request.request_object.clone() {
            if let Some(requested) = self.apply_request_object(&client, &object, &mut request).await? {
                userinfo_claims = Some(requested);
            }
        }

        // Exact-match redirect URI; failures here must not redirect.
        if !client.redirect_uri_registered(&request.redirect_uri) {
            return Err(Error::InvalidRedirectUri(request.redirect_uri.clone()));
        }

        let types = parse_response_type(&request.response_type)?;
        if !client.allows_response_type(&request.response_type) {
            return Err(Error::UnsupportedResponseType(request.response_type.clone()));
        }

        if types.id_token && request.nonce.is_none() {
            return Err(Error::InvalidRequest(
                "nonce is required when id_token is returned from the authorization endpoint"
                    .to_string(),
            ));
        }

        let granted_scopes = self.narrow_scopes(&client, request.scope.as_deref());

        // Establish identity: a valid SSO session wins; otherwise direct
        // credentials; prompt=none forbids any interaction.
        let now = Utc::now();
        let prompt_none = request.prompt.as_deref() == Some("none");
        let session = request
            .session_id
            .as_deref()
            .and_then(|sid| self.store.session(sid, now))
            .filter(|s| {
                request
                    .max_age
                    .map_or(true, |max| now.timestamp() - s.auth_time <= max as i64)
            });

        let session = match session {
            Some(session) => session,
            None if prompt_none => return Err(Error::LoginRequired),
            None => {
                let (username, password) = match (&request.username, &request.password) {
                    (Some(u), Some(p)) => (u.clone(), p.clone()),
                    _ => return Err(Error::LoginRequired),
                };
                let user = self
                    .users
                    .authenticate(&username, &password)
                    .ok_or(Error::AccessDenied)?;

                let session = SsoSession {
                    session_id: generate_token(),
                    username: user.username.clone(),
                    auth_time: now.timestamp(),
                    expires_at: now + Duration::seconds(self.config.provider.session_ttl_secs as i64),
                };
                self.store.insert_session(session.clone());
                session
            }
        };

        let subject = client.derived_subject(&session.username, &self.config.provider.pairwise_salt);

        let mut params: Vec<(&'static str, String)> = Vec::new();
        let mut code_value = None;

        if types.code {
            let code = generate_token();
            self.store.insert_code(
                &code,
                AuthorizationCode {
                    client_id: client.client_id.clone(),
                    subject: subject.clone(),
                    username: session.username.clone(),
                    redirect_uri: request.redirect_uri.clone(),
                    scopes: granted_scopes.clone(),
                    nonce: request.nonce.clone(),
                    session_id: Some(session.session_id.clone()),
                    auth_time: session.auth_time,
                    code_challenge: request.code_challenge.clone(),
                    code_challenge_method: request.code_challenge_method.clone(),
                    userinfo_claims: userinfo_claims.clone(),
                    expires_at: now
                        + Duration::seconds(self.config.provider.authorization_code_ttl_secs as i64),
                },
            );
            params.push(("code", code.clone()));
            code_value = Some(code);
        }

        let mut access_token_value = None;
        if types.token {
            let token = self.mint_access_token(
                &client,
                &subject,
                Some(&session.username),
                &granted_scopes,
                Some(&session.session_id),
                userinfo_claims.clone(),
                now,
                self.config.provider.access_token_ttl_secs,
            );
            params.push(("access_token", token.clone()));
            params.push(("token_type", "Bearer".to_string()));
            params.push((
                "expires_in",
                self.config.provider.access_token_ttl_secs.to_string(),
            ));
            access_token_value = Some(token);
        }

        if types.id_token {
            let id_token = self
                .issue_id_token(
                    &client,
                    &subject,
                    request.nonce.as_deref(),
                    session.auth_time,
                    Some(&session.session_id),
                    access_token_value.as_deref(),
                    code_value.as_deref(),
                )
                .await?;
            params.push(("id_token", id_token));
        }

        if let Some(state) = &request.state {
            params.push(("state", state.clone()));
        }
        params.push(("session_id", session.session_id.clone()));

        if !granted_scopes.is_empty() {
            params.push(("scope", granted_scopes.join(" ")));
        }

        Ok(AuthorizeSuccess {
            redirect_uri: request.redirect_uri,
            // Pure code responses use the query; anything carrying a token
            // travels in the fragment.
            fragment: types.token || types.id_token,
            params,
            session_id: session.session_id,
        })
    }

    /// Token endpoint: authenticate the client (strict method match), then
    /// run the requested grant.
    pub async fn token(
        &self,
        credentials: ClientCredentials,
        request: TokenRequest,
    ) -> Result<TokenResponse> {
        match request.grant_type.as_str() {
            GRANT_AUTHORIZATION_CODE => {
                let client = self.authenticate_client(&credentials).await?;
                self.exchange_code(&client, &request).await
            }
            GRANT_CLIENT_CREDENTIALS => {
                let client = self.authenticate_client(&credentials).await?;
                self.client_credentials_grant(&client, &request)
            }
            GRANT_PASSWORD => {
                let client = self.authenticate_client(&credentials).await?;
                self.password_grant(&client, &request).await
            }
            GRANT_REFRESH_TOKEN => {
                let client = self.authenticate_client(&credentials).await?;
                self.refresh_grant(&client, &request).await
            }
            GRANT_TOKEN_EXCHANGE => {
                let client = self.authenticate_client(&credentials).await?;
                self.token_exchange_grant(&client, &request)
            }
            other => Err(Error::UnsupportedGrantType(other.to_string())),
        }
    }

    async fn exchange_code(&self, client: &Client, request: &TokenRequest) -> Result<TokenResponse> {
        let code = request.code.as_deref().ok_or(Error::InvalidGrant)?;
        let redirect_uri = request.redirect_uri.as_deref().ok_or(Error::InvalidGrant)?;

        let now = Utc::now();
        // Atomic consume: a concurrent double exchange has exactly one winner
        let grant = self.store.consume_code(code, now).ok_or(Error::InvalidGrant)?;

        if grant.client_id != client.client_id || grant.redirect_uri != redirect_uri {
            return Err(Error::InvalidGrant);
        }
        verify_pkce(&grant, request.code_verifier.as_deref())?;

        let access_token = self.mint_access_token(
            client,
            &grant.subject,
            Some(&grant.username),
            &grant.scopes,
            grant.session_id.as_deref(),
            grant.userinfo_claims.clone(),
            now,
            self.config.provider.access_token_ttl_secs,
        );

        let refresh_token = self.mint_refresh_token(
            client,
            &grant.subject,
            Some(&grant.username),
            &grant.scopes,
            grant.session_id.as_deref(),
            now,
        );

        let id_token = if grant.scopes.iter().any(|s| s == "openid") {
            Some(
                self.issue_id_token(
                    client,
                    &grant.subject,
                    grant.nonce.as_deref(),
                    grant.auth_time,
                    grant.session_id.as_deref(),
                    Some(&access_token),
                    None,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.provider.access_token_ttl_secs as i64,
            refresh_token: Some(refresh_token),
            scope: scope_string(&grant.scopes),
            id_token,
            issued_token_type: None,
        })
    }

    fn client_credentials_grant(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse> {
        let now = Utc::now();
        let scopes = self.narrow_scopes(client, request.scope.as_deref());

        // No user context: the subject is the client itself, and no refresh
        // token is ever issued.
        let access_token = self.mint_access_token(
            client,
            &client.client_id,
            None,
            &scopes,
            None,
            None,
            now,
            self.config.provider.access_token_ttl_secs,
        );

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.provider.access_token_ttl_secs as i64,
            refresh_token: None,
            scope: scope_string(&scopes),
            id_token: None,
            issued_token_type: None,
        })
    }

    async fn password_grant(&self, client: &Client, request: &TokenRequest) -> Result<TokenResponse> {
        let username = request.username.as_deref().ok_or_else(|| {
            Error::InvalidRequest("username is required for the password grant".to_string())
        })?;
        let password = request.password.as_deref().ok_or_else(|| {
            Error::InvalidRequest("password is required for the password grant".to_string())
        })?;

        let user = self
            .users
            .authenticate(username, password)
            .ok_or(Error::InvalidGrant)?;

        let now = Utc::now();
        let scopes = self.narrow_scopes(client, request.scope.as_deref());
        let subject = client.derived_subject(&user.username, &self.config.provider.pairwise_salt);

        let access_token = self.mint_access_token(
            client,
            &subject,
            Some(&user.username),
            &scopes,
            None,
            None,
            now,
            self.config.provider.access_token_ttl_secs,
        );
        let refresh_token =
            self.mint_refresh_token(client, &subject, Some(&user.username), &scopes, None, now);

        let id_token = if scopes.iter().any(|s| s == "openid") {
            Some(
                self.issue_id_token(
                    client,
                    &subject,
                    None,
                    now.timestamp(),
                    None,
                    Some(&access_token),
                    None,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.provider.access_token_ttl_secs as i64,
            refresh_token: Some(refresh_token),
            scope: scope_string(&scopes),
            id_token,
            issued_token_type: None,
        })
    }

    async fn refresh_grant(&self, client: &Client, request: &TokenRequest) -> Result<TokenResponse> {
        let presented = request.refresh_token.as_deref().ok_or_else(|| {
            Error::InvalidRequest("refresh_token is required".to_string())
        })?;

        let now = Utc::now();
        let record = self
            .store
            .consume_refresh_token(presented, now)
            .ok_or(Error::ClientAuthentication)?;

        if record.client_id != client.client_id {
            return Err(Error::ClientAuthentication);
        }

        // Optional narrowing on refresh; never widening
        let scopes = match request.scope.as_deref() {
            Some(requested) => requested
                .split_whitespace()
                .filter(|s| record.scopes.iter().any(|have| have == s))
                .map(String::from)
                .collect(),
            None => record.scopes.clone(),
        };

        let access_token = self.mint_access_token(
            client,
            &record.subject,
            record.username.as_deref(),
            &scopes,
            record.session_id.as_deref(),
            None,
            now,
            self.config.provider.access_token_ttl_secs,
        );
        let rotated = self.mint_refresh_token(
            client,
            &record.subject,
            record.username.as_deref(),
            &record.scopes,
            record.session_id.as_deref(),
            now,
        );

        let id_token = if scopes.iter().any(|s| s == "openid") {
            Some(
                self.issue_id_token(
                    client,
                    &record.subject,
                    None,
                    now.timestamp(),
                    record.session_id.as_deref(),
                    Some(&access_token),
                    None,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.provider.access_token_ttl_secs as i64,
            refresh_token: Some(rotated),
            scope: scope_string(&scopes),
            id_token,
            issued_token_type: None,
        })
    }

    /// RFC 8693-shaped exchange: a valid short-lived access token buys a
    /// longer-lived one for the same subject and client.
    fn token_exchange_grant(&self, client: &Client, request: &TokenRequest) -> Result<TokenResponse> {
        let subject_token = request.subject_token.as_deref().ok_or_else(|| {
            Error::InvalidRequest("subject_token is required".to_string())
        })?;
        if let Some(token_type) = request.subject_token_type.as_deref() {
            if token_type != TOKEN_TYPE_ACCESS_TOKEN {
                return Err(Error::InvalidRequest(format!(
                    "unsupported subject_token_type: {token_type}"
                )));
            }
        }

        let now = Utc::now();
        let source = self
            .store
            .access_token(subject_token, now)
            .ok_or(Error::InvalidGrant)?;
        if source.client_id != client.client_id {
            return Err(Error::InvalidGrant);
        }

        let access_token = self.mint_access_token(
            client,
            &source.subject,
            source.username.as_deref(),
            &source.scopes,
            source.session_id.as_deref(),
            source.userinfo_claims.clone(),
            now,
            self.config.provider.exchanged_token_ttl_secs,
        );

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.config.provider.exchanged_token_ttl_secs as i64,
            refresh_token: None,
            scope: scope_string(&source.scopes),
            id_token: None,
            issued_token_type: Some(TOKEN_TYPE_ACCESS_TOKEN),
        })
    }

    /// Authenticate a client at the token endpoint. The asserted method must
    /// exactly match the registered one; responses never distinguish an
    /// unknown client from wrong credentials.
    pub async fn authenticate_client(&self, credentials: &ClientCredentials) -> Result<Client> {
        let asserted = credentials.method.ok_or(Error::ClientAuthentication)?;

        // For assertion methods the client id rides inside the JWT
        let client_id = match &credentials.client_id {
            Some(id) => id.clone(),
            None => {
                let assertion = credentials
                    .client_assertion
                    .as_deref()
                    .ok_or(Error::ClientAuthentication)?;
                let claims = jws::decode_claims_unverified(assertion)
                    .map_err(|_| Error::ClientAuthentication)?;
                claims
                    .sub
                    .or(claims.iss)
                    .ok_or(Error::ClientAuthentication)?
            }
        };

        let client = self
            .store
            .client(&client_id)
            .ok_or(Error::ClientAuthentication)?;

        if client.token_endpoint_auth_method != asserted {
            tracing::debug!(
                client_id = %client_id,
                asserted = ?asserted,
                registered = ?client.token_endpoint_auth_method,
                "token endpoint auth method mismatch"
            );
            return Err(Error::ClientAuthentication);
        }

        match asserted {
            TokenEndpointAuthMethod::ClientSecretBasic | TokenEndpointAuthMethod::ClientSecretPost => {
                let secret = credentials
                    .client_secret
                    .as_deref()
                    .ok_or(Error::ClientAuthentication)?;
                if !client.secret_matches(secret) {
                    return Err(Error::ClientAuthentication);
                }
            }
            TokenEndpointAuthMethod::ClientSecretJwt => {
                self.verify_client_assertion(&client, credentials, KeyFamily::Hmac)
                    .await?;
            }
            TokenEndpointAuthMethod::PrivateKeyJwt => {
                self.verify_client_assertion(&client, credentials, KeyFamily::Rsa)
                    .await?;
            }
            TokenEndpointAuthMethod::None => {}
        }

        Ok(client)
    }

    /// Verify a client-assertion JWT: right assertion type, algorithm family
    /// matching the registered method, signature under the client's own key,
    /// audience exactly the token endpoint, and an unexpired `exp`.
    async fn verify_client_assertion(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
        expected_family: KeyFamily,
    ) -> Result<()> {
        if credentials.client_assertion_type.as_deref() != Some(CLIENT_ASSERTION_TYPE_JWT) {
            return Err(Error::ClientAuthentication);
        }
        let assertion = credentials
            .client_assertion
            .as_deref()
            .ok_or(Error::ClientAuthentication)?;

        let header = jws::decode_header(assertion).map_err(|_| Error::ClientAuthentication)?;
        let alg: SignatureAlgorithm = header
            .alg
            .parse()
            .map_err(|_| Error::ClientAuthentication)?;

        let family_ok = match expected_family {
            KeyFamily::Hmac => alg.family() == KeyFamily::Hmac,
            // private_key_jwt accepts any asymmetric family
            _ => matches!(alg.family(), KeyFamily::Rsa | KeyFamily::Ec),
        };
        if !family_ok {
            return Err(Error::ClientAuthentication);
        }
        if let Some(registered_alg) = client.token_endpoint_auth_signing_alg {
            if registered_alg != alg {
                return Err(Error::ClientAuthentication);
            }
        }

        let verifier = match alg.family() {
            KeyFamily::Hmac => {
                keys::client_verifier(alg, Some(&client.client_secret), None, None)
                    .map_err(Error::into_client_auth)?
            }
            _ => {
                let jwks = self.client_jwks(client).await.map_err(Error::into_client_auth)?;
                keys::client_verifier(alg, None, Some(&jwks), header.kid.as_deref())
                    .map_err(Error::into_client_auth)?
            }
        };

        let claims = jws::verify(assertion, alg, &verifier)
            .map_err(|_| Error::ClientAuthentication)?;

        // Audience must be exactly the token endpoint URL
        if !claims.audience_matches(&self.config.token_endpoint()) {
            return Err(Error::ClientAuthentication);
        }
        let now = Utc::now() - Duration::seconds(self.config.provider.clock_skew_secs as i64);
        if claims.exp.is_none() || claims.is_expired(now) {
            return Err(Error::ClientAuthentication);
        }
        if claims.sub.as_deref() != Some(client.client_id.as_str()) {
            return Err(Error::ClientAuthentication);
        }

        Ok(())
    }

    /// The client's JWKS: inline registration wins, then a bounded fetch of
    /// `jwks_uri`.
    pub(crate) async fn client_jwks(&self, client: &Client) -> Result<Value> {
        if let Some(jwks) = &client.jwks {
            return Ok(jwks.clone());
        }
        if let Some(uri) = &client.jwks_uri {
            return keys::fetch_jwks(&self.http, uri).await;
        }
        Err(Error::Crypto(crate::jose::JoseError::InvalidKey(
            "client registered no JWKS".to_string(),
        )))
    }

    /// Requested scopes narrowed to what the server knows and the client may
    /// hold. Unknown scopes drop silently.
    pub(crate) fn narrow_scopes(&self, client: &Client, requested: Option<&str>) -> Vec<String> {
        let known = self.known_scopes();
        requested
            .unwrap_or_default()
            .split_whitespace()
            .filter(|s| known.iter().any(|k| k == s))
            .filter(|s| client.allows_scope(s))
            .map(String::from)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn mint_access_token(
        &self,
        client: &Client,
        subject: &str,
        username: Option<&str>,
        scopes: &[String],
        session_id: Option<&str>,
        userinfo_claims: Option<Value>,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> String {
        let token = generate_token();
        self.store.insert_access_token(
            &token,
            AccessToken {
                client_id: client.client_id.clone(),
                subject: subject.to_string(),
                username: username.map(String::from),
                scopes: scopes.to_vec(),
                session_id: session_id.map(String::from),
                userinfo_claims,
                issued_at: now,
                expires_at: now + Duration::seconds(ttl_secs as i64),
            },
        );
        token
    }

    fn mint_refresh_token(
        &self,
        client: &Client,
        subject: &str,
        username: Option<&str>,
        scopes: &[String],
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let token = generate_token();
        self.store.insert_refresh_token(
            &token,
            RefreshToken {
                client_id: client.client_id.clone(),
                subject: subject.to_string(),
                username: username.map(String::from),
                scopes: scopes.to_vec(),
                session_id: session_id.map(String::from),
                expires_at: now + Duration::seconds(self.config.provider.refresh_token_ttl_secs as i64),
            },
        );
        token
    }

    /// Sign (and optionally encrypt) an ID Token for a client.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn issue_id_token(
        &self,
        client: &Client,
        subject: &str,
        nonce: Option<&str>,
        auth_time: i64,
        session_id: Option<&str>,
        access_token: Option<&str>,
        code: Option<&str>,
    ) -> Result<String> {
        let alg = client.id_token_signed_response_alg;
        let now = Utc::now();

        let mut claims = ClaimsSet::new()
            .issuer(&self.config.provider.issuer)
            .subject(subject)
            .audience(&client.client_id)
            .issued_at(now)
            .expires_at(now + Duration::seconds(self.config.provider.id_token_ttl_secs as i64))
            .claim("auth_time", auth_time);
        if let Some(nonce) = nonce {
            claims = claims.claim("nonce", nonce);
        }
        if let Some(sid) = session_id {
            claims = claims.claim("sid", sid);
        }
        if let Some(token) = access_token {
            if let Some(hash) = keys::token_hash(alg, token) {
                claims = claims.claim("at_hash", hash);
            }
        }
        if let Some(code) = code {
            if let Some(hash) = keys::token_hash(alg, code) {
                claims = claims.claim("c_hash", hash);
            }
        }

        let signed = match alg.family() {
            KeyFamily::Hmac => jws::sign(
                &claims,
                alg,
                None,
                &JwsSigner::Hmac(client.client_secret.as_bytes().to_vec()),
            )
            .map_err(|e| Error::Internal(format!("id token signing: {e}")))?,
            KeyFamily::None => jws::sign(&claims, alg, None, &JwsSigner::Unsigned)
                .map_err(|e| Error::Internal(format!("id token signing: {e}")))?,
            _ => self.keys.signing_key(alg)?.sign(&claims)?,
        };

        // Nested JWT when the client registered ID Token encryption
        match (
            client.id_token_encrypted_response_alg,
            client.id_token_encrypted_response_enc,
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
                crate::jose::jwe::encrypt(signed.as_bytes(), key_alg, enc, &key, None, Some("JWT"))
                    .map_err(Error::Crypto)
            }
            (None, _) => Ok(signed),
        }
    }

    /// Verify and merge a signed request object into the request. Returns
    /// the `claims.userinfo` member when present.
    async fn apply_request_object(
        &self,
        client: &Client,
        object: &str,
        request: &mut AuthorizeRequest,
    ) -> Result<Option<Value>> {
        let header = jws::decode_header(object)
            .map_err(|_| Error::InvalidRequest("malformed request object".to_string()))?;
        let alg: SignatureAlgorithm = header
            .alg
            .parse()
            .map_err(|_| Error::InvalidRequest("unsupported request object algorithm".to_string()))?;

        if let Some(registered) = client.request_object_signing_alg {
            if registered != alg {
                return Err(Error::InvalidRequest(
                    "request object algorithm does not match registration".to_string(),
                ));
            }
        }

        let verifier = match alg.family() {
            KeyFamily::Hmac => {
                keys::client_verifier(alg, Some(&client.client_secret), None, None)?
            }
            KeyFamily::None => crate::jose::jws::JwsVerifier::Unsigned,
            _ => {
                let jwks = self.client_jwks(client).await?;
                keys::client_verifier(alg, None, Some(&jwks), header.kid.as_deref())?
            }
        };

        let claims = jws::verify(object, alg, &verifier)
            .map_err(|_| Error::InvalidRequest("request object signature mismatch".to_string()))?;

        // Request-object members supersede bare query parameters
        if let Some(scope) = claims.get_str("scope") {
            request.scope = Some(scope.to_string());
        }
        if let Some(state) = claims.get_str("state") {
            request.state = Some(state.to_string());
        }
        if let Some(nonce) = claims.get_str("nonce") {
            request.nonce = Some(nonce.to_string());
        }
        if let Some(redirect_uri) = claims.get_str("redirect_uri") {
            request.redirect_uri = redirect_uri.to_string();
        }
        if let Some(response_type) = claims.get_str("response_type") {
            request.response_type = response_type.to_string();
        }
        if let Some(max_age) = claims.get("max_age").and_then(Value::as_u64) {
            request.max_age = Some(max_age);
        }

        Ok(claims.get("claims").and_then(|c| c.get("userinfo")).cloned())
    }
}

fn scope_string(scopes: &[String]) -> Option<String> {
    if scopes.is_empty() {
        None
    } else {
        Some(scopes.join(" "))
    }
}

fn verify_pkce(grant: &AuthorizationCode, verifier: Option<&str>) -> Result<()> {
    let Some(challenge) = grant.code_challenge.as_deref() else {
        return Ok(());
    };
    let verifier = verifier.ok_or(Error::InvalidGrant)?;

    let computed = match grant.code_challenge_method.as_deref().unwrap_or("S256") {
        "S256" => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
        "plain" => verifier.to_string(),
        _ => return Err(Error::InvalidGrant),
    };

    if computed.as_bytes().ct_eq(challenge.as_bytes()).unwrap_u8() == 0 {
        return Err(Error::InvalidGrant);
    }
    Ok(())
}
