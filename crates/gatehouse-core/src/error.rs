use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Config
    #[error("config not found (searched: {searched:?})")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // Registration
    #[error("invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    #[error("invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("invalid software statement: {0}")]
    InvalidSoftwareStatement(String),

    // Authorization
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown client")]
    InvalidClient,

    #[error("login required")]
    LoginRequired,

    #[error("resource owner authentication failed")]
    AccessDenied,

    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    // Token endpoint
    #[error("invalid grant")]
    InvalidGrant,

    #[error("client authentication failed")]
    ClientAuthentication,

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    // Bearer-token protected resources
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("invalid registration access token")]
    RegistrationAccess,

    #[error("insufficient scope")]
    InsufficientScope,

    // Crypto
    #[error("crypto failure: {0}")]
    Crypto(#[from] crate::jose::JoseError),

    #[error("signing key unavailable for {0}")]
    SigningKeyUnavailable(String),

    // General
    #[error("not found")]
    NotFound,

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// OAuth2/OIDC structured error body (RFC 6749 §5.2 shape).
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::SigningKeyUnavailable(_)
            | Self::UpstreamFetch(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::InvalidClientMetadata(_)
            | Self::InvalidRedirectUri(_)
            | Self::InvalidSoftwareStatement(_)
            | Self::InvalidRequest(_)
            | Self::InvalidClient
            | Self::LoginRequired
            | Self::AccessDenied
            | Self::UnsupportedResponseType(_)
            | Self::InvalidGrant
            | Self::InvalidToken
            | Self::Crypto(_) => StatusCode::BAD_REQUEST,

            Self::ClientAuthentication | Self::RegistrationAccess => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope => StatusCode::FORBIDDEN,
            Self::UnsupportedGrantType(_) => StatusCode::NOT_IMPLEMENTED,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Wire-stable `error` code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::SigningKeyUnavailable(_)
            | Self::UpstreamFetch(_)
            | Self::Internal(_) => "server_error",

            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::InvalidSoftwareStatement(_) => "invalid_software_statement",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient | Self::ClientAuthentication => "invalid_client",
            Self::LoginRequired => "login_required",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidToken | Self::RegistrationAccess => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::Crypto(_) => "invalid_request",
            Self::NotFound => "not_found",
        }
    }

    /// Crypto failures during client authentication must surface as 401,
    /// not the codec's default 400.
    pub fn into_client_auth(self) -> Self {
        match self {
            Self::Crypto(_) | Self::InvalidToken => Self::ClientAuthentication,
            other => other,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal errors, don't expose details to client
        let description = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            Some("internal error, retry may succeed".to_string())
        } else {
            Some(self.to_string())
        };

        let body = ErrorBody {
            error: self.error_code(),
            error_description: description,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
