use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Form, Json, Router};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use gatehouse_core::client::TokenEndpointAuthMethod;
use gatehouse_core::error::Error;
use gatehouse_core::grant::{ClientCredentials, TokenRequest, TokenResponse};
use gatehouse_core::jose::jws;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    scope: Option<String>,
    subject_token: Option<String>,
    subject_token_type: Option<String>,
    code_verifier: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    client_assertion: Option<String>,
    client_assertion_type: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/token", post(token))
}

/// POST /token — grant exchange
async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, Error> {
    let credentials = extract_credentials(&headers, &form);

    let request = TokenRequest {
        grant_type: form.grant_type,
        code: form.code,
        redirect_uri: form.redirect_uri,
        refresh_token: form.refresh_token,
        username: form.username,
        password: form.password,
        scope: form.scope,
        subject_token: form.subject_token,
        subject_token_type: form.subject_token_type,
        code_verifier: form.code_verifier,
    };

    let response = state.provider.token(credentials, request).await?;
    Ok(Json(response))
}

/// Determine which authentication method this request is asserting and
/// collect its material. Verification happens in the engine; the shape of
/// the request alone decides the asserted method.
fn extract_credentials(headers: &HeaderMap, form: &TokenForm) -> ClientCredentials {
    if let Some((client_id, client_secret)) = basic_credentials(headers) {
        return ClientCredentials {
            method: Some(TokenEndpointAuthMethod::ClientSecretBasic),
            client_id: Some(client_id),
            client_secret: Some(client_secret),
            client_assertion: None,
            client_assertion_type: None,
        };
    }

    if let Some(assertion) = &form.client_assertion {
        // HMAC-family assertion algorithms assert client_secret_jwt;
        // asymmetric ones assert private_key_jwt.
        let method = jws::decode_header(assertion)
            .ok()
            .and_then(|h| h.alg.parse::<gatehouse_core::jose::SignatureAlgorithm>().ok())
            .map(|alg| match alg.family() {
                gatehouse_core::jose::KeyFamily::Hmac => TokenEndpointAuthMethod::ClientSecretJwt,
                _ => TokenEndpointAuthMethod::PrivateKeyJwt,
            });
        return ClientCredentials {
            method,
            client_id: form.client_id.clone(),
            client_secret: None,
            client_assertion: Some(assertion.clone()),
            client_assertion_type: form.client_assertion_type.clone(),
        };
    }

    if let Some(secret) = &form.client_secret {
        return ClientCredentials {
            method: Some(TokenEndpointAuthMethod::ClientSecretPost),
            client_id: form.client_id.clone(),
            client_secret: Some(secret.clone()),
            client_assertion: None,
            client_assertion_type: None,
        };
    }

    ClientCredentials {
        method: Some(TokenEndpointAuthMethod::None),
        client_id: form.client_id.clone(),
        client_secret: None,
        client_assertion: None,
        client_assertion_type: None,
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;
    Some((client_id.to_string(), client_secret.to_string()))
}
