//! Shared test infrastructure for gatehouse integration tests.
//!
//! A single shared tokio runtime and Axum server are used across all tests;
//! the provider is entirely in-process, so no external services are needed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

pub use reqwest::{Client, StatusCode};
pub use serde_json;

use gatehouse_api::routes;
use gatehouse_api::server::AppState;
use gatehouse_core::Provider;
use gatehouse_core::config::{
    Config, KeyConfig, ProviderConfig, RegistrationConfig, ScopeDefinition, ScopesConfig,
    ServerConfig, UserConfig,
};
use gatehouse_core::jose::SignatureAlgorithm;
use tokio::net::TcpListener;

static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
static SERVER: OnceLock<TestServer> = OnceLock::new();

pub fn runtime() -> &'static tokio::runtime::Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}

pub fn server() -> &'static TestServer {
    SERVER.get_or_init(|| runtime().block_on(TestServer::init()))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub provider: Arc<Provider>,
    pub _key_dir: tempfile::TempDir,
}

impl TestServer {
    async fn init() -> Self {
        // Bind first so the public URL (and thus the token-endpoint
        // audience) is known before the provider is constructed.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().unwrap();
        let public_url = format!("http://{addr}");

        let key_dir = tempfile::tempdir().expect("failed to create temp dir");
        gatehouse_core::keys::generate_keypair(
            key_dir.path(),
            SignatureAlgorithm::Rs256,
            Some(2048),
        )
        .expect("failed to generate keypair");

        let mut alice_claims = serde_json::Map::new();
        for (key, value) in [
            ("name", "Alice Example"),
            ("given_name", "Alice"),
            ("family_name", "Example"),
            ("preferred_username", "alice"),
            ("email", "alice@example.com"),
            ("phone_number", "+1 555 0100"),
        ] {
            alice_claims.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
        alice_claims.insert("email_verified".to_string(), serde_json::Value::Bool(true));

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec![],
                public_url: public_url.clone(),
            },
            provider: ProviderConfig {
                issuer: public_url,
                access_token_ttl_secs: 3600,
                refresh_token_ttl_secs: 86_400,
                authorization_code_ttl_secs: 300,
                id_token_ttl_secs: 3600,
                session_ttl_secs: 86_400,
                exchanged_token_ttl_secs: 604_800,
                clock_skew_secs: 0,
                fetch_timeout_secs: 5,
                pairwise_salt: "integration-salt".to_string(),
            },
            keys: vec![KeyConfig {
                algorithm: SignatureAlgorithm::Rs256,
                private_key_path: key_dir.path().join("private.pem"),
                public_key_path: key_dir.path().join("public.pem"),
                kid: Some("test-rsa".to_string()),
            }],
            registration: RegistrationConfig::default(),
            scopes: ScopesConfig {
                definitions: vec![ScopeDefinition {
                    name: "inventory".to_string(),
                    description: "Inventory access".to_string(),
                    claims: vec!["warehouse".to_string()],
                }],
            },
            users: vec![UserConfig {
                username: "alice".to_string(),
                password_hash: gatehouse_core::user::hash_password("correct horse").unwrap(),
                claims: alice_claims,
            }],
        };

        let provider = Arc::new(Provider::new(config).expect("failed to build provider"));
        let state = AppState {
            provider: provider.clone(),
        };

        let app = axum::Router::new()
            .merge(routes::router())
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            provider,
            _key_dir: key_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Fresh reqwest client per test — no redirect following, no cookie
    /// bleed between tests.
    pub fn client(&self) -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// Register a web client with the given extra metadata merged over a
    /// working baseline; returns the registration response body.
    pub async fn register_client(&self, overrides: serde_json::Value) -> serde_json::Value {
        let mut body = serde_json::json!({
            "application_type": "web",
            "client_name": "Test RP",
            "redirect_uris": ["https://rp.example.com/cb"],
            "scope": "openid profile email inventory",
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), overrides.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }

        let resp = self
            .client()
            .post(self.url("/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "registration should succeed");
        resp.json().await.unwrap()
    }

    /// Run an interactive authorization for `alice` and return the query or
    /// fragment parameters of the redirect.
    pub async fn authorize(
        &self,
        client: &Client,
        params: &[(&str, &str)],
    ) -> Vec<(String, String)> {
        let resp = client
            .get(self.url("/authorize"))
            .query(params)
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.status(),
            StatusCode::FOUND,
            "authorize should redirect"
        );

        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        redirect_params(location)
    }
}

/// Parse query and fragment parameters out of a redirect location.
pub fn redirect_params(location: &str) -> Vec<(String, String)> {
    let url = url::Url::parse(location).unwrap();
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(fragment) = url.fragment() {
        params.extend(
            url::form_urlencoded::parse(fragment.as_bytes())
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
    }
    params
}

pub fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Decode a JWT payload without verification (assertions on claims only).
pub fn decode_payload(jwt: &str) -> serde_json::Value {
    use base64::Engine;
    let parts: Vec<&str> = jwt.split('.').collect();
    assert!(parts.len() >= 2, "not a compact JOSE object: {jwt}");
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .unwrap();
    serde_json::from_slice(&payload).unwrap()
}

pub fn decode_header(jwt: &str) -> serde_json::Value {
    use base64::Engine;
    let parts: Vec<&str> = jwt.split('.').collect();
    let header = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[0])
        .unwrap();
    serde_json::from_slice(&header).unwrap()
}

/// Standard interactive authorization parameters for `alice`.
pub fn auth_params<'a>(client_id: &'a str, scope: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("client_id", client_id),
        ("redirect_uri", "https://rp.example.com/cb"),
        ("response_type", "code"),
        ("scope", scope),
        ("state", "st-abc"),
        ("username", "alice"),
        ("password", "correct horse"),
    ]
}
