use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::server::AppState;

pub mod authorize;
pub mod registration;
pub mod token;
pub mod userinfo;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn jwks(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.provider.keys.jwks())
}

/// OpenID Connect Discovery document (per OpenID Connect Discovery 1.0).
async fn openid_configuration(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.provider.config;
    let base = config.server.public_url.trim_end_matches('/');

    let mut id_token_algs = state.provider.keys.algorithms();
    for alg in ["HS256", "HS384", "HS512", "none"] {
        id_token_algs.push(alg.to_string());
    }

    Json(serde_json::json!({
        "issuer": config.provider.issuer,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "registration_endpoint": format!("{base}/register"),
        "jwks_uri": format!("{base}/jwks.json"),
        "response_types_supported": [
            "code", "token", "id_token",
            "code id_token", "code token", "id_token token",
            "code id_token token",
        ],
        "grant_types_supported": [
            "authorization_code", "implicit", "client_credentials", "password",
            "refresh_token", "urn:ietf:params:oauth:grant-type:token-exchange",
        ],
        "subject_types_supported": ["public", "pairwise"],
        "id_token_signing_alg_values_supported": id_token_algs,
        "id_token_encryption_alg_values_supported": ["RSA1_5", "RSA-OAEP", "A128KW", "A256KW"],
        "id_token_encryption_enc_values_supported": [
            "A128GCM", "A256GCM", "A128CBC-HS256", "A256CBC-HS512",
        ],
        "token_endpoint_auth_methods_supported": [
            "client_secret_basic", "client_secret_post",
            "client_secret_jwt", "private_key_jwt", "none",
        ],
        "scopes_supported": state.provider.known_scopes(),
        "claims_supported": [
            "sub", "name", "preferred_username", "email", "email_verified",
            "address", "phone_number", "picture", "locale", "updated_at",
        ],
        "request_parameter_supported": true,
        "claims_parameter_supported": true,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/jwks.json", get(jwks))
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .merge(registration::router())
        .merge(authorize::router())
        .merge(token::router())
        .merge(userinfo::router())
}
