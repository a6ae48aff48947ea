use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use serde::Deserialize;

use gatehouse_core::error::Error;
use gatehouse_core::grant::{AuthorizeRequest, AuthorizeSuccess};

use crate::server::{AppState, SESSION_COOKIE};

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    scope: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
    prompt: Option<String>,
    session_id: Option<String>,
    request: Option<String>,
    claims: Option<String>,
    username: Option<String>,
    password: Option<String>,
    max_age: Option<u64>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/authorize", get(authorize_get).post(authorize_post))
}

/// GET /authorize — authorization endpoint
async fn authorize_get(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    authorize(state, jar, params).await
}

/// POST /authorize — same contract, form-encoded
async fn authorize_post(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(params): Form<AuthorizeParams>,
) -> Response {
    authorize(state, jar, params).await
}

async fn authorize(state: AppState, jar: CookieJar, params: AuthorizeParams) -> Response {
    let session_from_cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let request = AuthorizeRequest {
        client_id: params.client_id.unwrap_or_default(),
        redirect_uri: params.redirect_uri.unwrap_or_default(),
        response_type: params.response_type.unwrap_or_default(),
        scope: params.scope,
        state: params.state.clone(),
        nonce: params.nonce,
        prompt: params.prompt,
        session_id: params.session_id.or(session_from_cookie),
        request_object: params.request,
        claims: params.claims,
        username: params.username,
        password: params.password,
        max_age: params.max_age,
        code_challenge: params.code_challenge,
        code_challenge_method: params.code_challenge_method,
    };

    let client_id = request.client_id.clone();
    let redirect_uri = request.redirect_uri.clone();

    match state.provider.authorize(request).await {
        Ok(success) => {
            let Ok(location) = success_url(&success) else {
                return Error::Internal("registered redirect URI failed to parse".to_string())
                    .into_response();
            };
            let session_cookie = Cookie::build((SESSION_COOKIE, success.session_id.clone()))
                .path("/")
                .http_only(true)
                .build();
            let jar = jar.add(session_cookie);
            (jar, found_redirect(&location)).into_response()
        }
        Err(err) => {
            // Redirect the error to the client only when the redirect URI is
            // actually registered; anything else answers directly.
            let registered = state
                .provider
                .store
                .client(&client_id)
                .map(|c| c.redirect_uri_registered(&redirect_uri))
                .unwrap_or(false);

            let redirectable = !matches!(
                err,
                Error::InvalidClient | Error::InvalidRedirectUri(_) | Error::Internal(_)
            );

            match (registered && redirectable).then(|| url::Url::parse(&redirect_uri)) {
                Some(Ok(mut url)) => {
                    {
                        let mut pairs = url.query_pairs_mut();
                        pairs.append_pair("error", err.error_code());
                        pairs.append_pair("error_description", &err.to_string());
                        if let Some(state_param) = &params.state {
                            pairs.append_pair("state", state_param);
                        }
                    }
                    found_redirect(url.as_str())
                }
                _ => err.into_response(),
            }
        }
    }
}

/// 302 Found — the authorization response status OAuth2 specifies.
fn found_redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn success_url(success: &AuthorizeSuccess) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(&success.redirect_uri)?;
    if success.fragment {
        let mut fragment = String::new();
        for (key, value) in &success.params {
            if !fragment.is_empty() {
                fragment.push('&');
            }
            fragment.push_str(key);
            fragment.push('=');
            fragment.push_str(&urlencode(value));
        }
        url.set_fragment(Some(&fragment));
    } else {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &success.params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
