use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};

use gatehouse_core::client::ClientMetadata;
use gatehouse_core::error::Error;

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/register/:client_id", axum::routing::get(read).put(update))
}

/// POST /register — dynamic client registration
async fn register(
    State(state): State<AppState>,
    Json(metadata): Json<ClientMetadata>,
) -> Result<(StatusCode, Json<serde_json::Value>), Error> {
    let response = state.provider.register_client(metadata).await?;
    Ok((StatusCode::OK, Json(response.to_json())))
}

/// GET /register/{client_id} — read client metadata
async fn read(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, Error> {
    let token = bearer_token(&headers).ok_or(Error::RegistrationAccess)?;
    let client = state.provider.read_client(&client_id, &token)?;
    Ok(Json(client.view()))
}

/// PUT /register/{client_id} — partial metadata update
async fn update(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    Json(changes): Json<ClientMetadata>,
) -> Result<Json<serde_json::Value>, Error> {
    let token = bearer_token(&headers).ok_or(Error::RegistrationAccess)?;
    let client = state.provider.update_client(&client_id, &token, changes)?;
    Ok(Json(client.view()))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}
