use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::Deserialize;

use gatehouse_core::error::Error;
use gatehouse_core::userinfo::UserInfoResponse;

use crate::routes::registration::bearer_token;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BearerParams {
    access_token: Option<String>,
    /// `token` is accepted at the validation endpoint.
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/userinfo", get(userinfo_get).post(userinfo_post))
        .route("/validate", get(validate_get).post(validate_post))
        .route("/clientinfo", get(clientinfo_get).post(clientinfo_post))
}

/// Bearer token from the Authorization header, form body, or query.
fn resolve_token(headers: &HeaderMap, params: &BearerParams) -> Option<String> {
    bearer_token(headers)
        .or_else(|| params.access_token.clone())
        .or_else(|| params.token.clone())
}

/// GET /userinfo
async fn userinfo_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BearerParams>,
) -> Result<Response, Error> {
    serve_userinfo(&state, resolve_token(&headers, &params)).await
}

/// POST /userinfo
async fn userinfo_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<BearerParams>,
) -> Result<Response, Error> {
    serve_userinfo(&state, resolve_token(&headers, &params)).await
}

async fn serve_userinfo(state: &AppState, token: Option<String>) -> Result<Response, Error> {
    let token = token.ok_or(Error::InvalidToken)?;
    match state.provider.userinfo(&token).await? {
        UserInfoResponse::Plain(claims) => Ok(Json(claims).into_response()),
        UserInfoResponse::Token(compact) => Ok((
            [(header::CONTENT_TYPE, "application/jwt")],
            compact,
        )
            .into_response()),
    }
}

/// GET /validate — `{valid, expires_in}` without claim leakage
async fn validate_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BearerParams>,
) -> Json<serde_json::Value> {
    validate(&state, resolve_token(&headers, &params))
}

/// POST /validate
async fn validate_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<BearerParams>,
) -> Json<serde_json::Value> {
    validate(&state, resolve_token(&headers, &params))
}

fn validate(state: &AppState, token: Option<String>) -> Json<serde_json::Value> {
    let (valid, expires_in) = match token {
        Some(token) => state.provider.validate_token(&token),
        None => (false, 0),
    };
    Json(serde_json::json!({
        "valid": valid,
        "expires_in": expires_in,
    }))
}

/// GET /clientinfo — requires a client-credentials token with the
/// `clientinfo` scope
async fn clientinfo_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BearerParams>,
) -> Result<Json<serde_json::Value>, Error> {
    clientinfo(&state, resolve_token(&headers, &params))
}

/// POST /clientinfo
async fn clientinfo_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<BearerParams>,
) -> Result<Json<serde_json::Value>, Error> {
    clientinfo(&state, resolve_token(&headers, &params))
}

fn clientinfo(
    state: &AppState,
    token: Option<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let token = token.ok_or(Error::InvalidToken)?;
    Ok(Json(state.provider.client_info(&token)?))
}
