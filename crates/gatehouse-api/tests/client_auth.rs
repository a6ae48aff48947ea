//! Token-endpoint client authentication: the asserted method must exactly
//! match the registered one, for every pairing, and assertion JWTs are
//! checked for signature, audience, and expiry.

mod common;
use common::*;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Sign an HS256 client assertion with the given secret.
fn hs256_assertion(client_id: &str, secret: &str, aud: &str, exp_offset: i64) -> String {
    let now = chrono_now();
    let claims = serde_json::json!({
        "iss": client_id,
        "sub": client_id,
        "aud": aud,
        "iat": now,
        "exp": now + exp_offset,
        "jti": uuid::Uuid::new_v4().to_string(),
    });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn rs256_assertion(client_id: &str, key: &RsaPrivateKey, aud: &str, exp_offset: i64) -> String {
    let now = chrono_now();
    let claims = serde_json::json!({
        "iss": client_id,
        "sub": client_id,
        "aud": aud,
        "iat": now,
        "exp": now + exp_offset,
    });
    let pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn rsa_jwks(public: &RsaPublicKey) -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }]
    })
}

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[test]
fn every_mismatched_method_pairing_is_401() {
    let s = server();
    runtime().block_on(async {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let jwks = rsa_jwks(&RsaPublicKey::from(&key));
        let aud = s.url("/token");

        for registered_method in [
            "client_secret_basic",
            "client_secret_post",
            "client_secret_jwt",
            "private_key_jwt",
        ] {
            let registered = s
                .register_client(serde_json::json!({
                    "token_endpoint_auth_method": registered_method,
                    "jwks": jwks,
                }))
                .await;
            let client_id = registered["client_id"].as_str().unwrap();
            let client_secret = registered["client_secret"].as_str().unwrap();

            for asserted_method in [
                "client_secret_basic",
                "client_secret_post",
                "client_secret_jwt",
                "private_key_jwt",
            ] {
                let request = s.client().post(s.url("/token"));
                let request = match asserted_method {
                    "client_secret_basic" => request
                        .basic_auth(client_id, Some(client_secret))
                        .form(&[("grant_type", "client_credentials")]),
                    "client_secret_post" => request.form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id),
                        ("client_secret", client_secret),
                    ]),
                    "client_secret_jwt" => request.form(&[
                        ("grant_type", "client_credentials"),
                        (
                            "client_assertion",
                            &hs256_assertion(client_id, client_secret, &aud, 300),
                        ),
                        ("client_assertion_type", ASSERTION_TYPE),
                    ]),
                    "private_key_jwt" => request.form(&[
                        ("grant_type", "client_credentials"),
                        ("client_assertion", &rs256_assertion(client_id, &key, &aud, 300)),
                        ("client_assertion_type", ASSERTION_TYPE),
                    ]),
                    _ => unreachable!(),
                };

                let resp = request.send().await.unwrap();
                if asserted_method == registered_method {
                    assert_eq!(
                        resp.status(),
                        StatusCode::OK,
                        "registered={registered_method} asserted={asserted_method}"
                    );
                } else {
                    assert_eq!(
                        resp.status(),
                        StatusCode::UNAUTHORIZED,
                        "registered={registered_method} asserted={asserted_method}"
                    );
                    let body: serde_json::Value = resp.json().await.unwrap();
                    assert_eq!(body["error"], "invalid_client");
                }
            }
        }
    });
}

#[test]
fn wrong_secret_is_indistinguishable_from_unknown_client() {
    let s = server();
    runtime().block_on(async {
        let registered = s.register_client(serde_json::json!({})).await;
        let client_id = registered["client_id"].as_str().unwrap();

        let wrong_secret = s
            .client()
            .post(s.url("/token"))
            .basic_auth(client_id, Some("wrong-secret"))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .unwrap();

        let unknown_client = s
            .client()
            .post(s.url("/token"))
            .basic_auth("no-such-client", Some("whatever"))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .unwrap();

        assert_eq!(wrong_secret.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_client.status(), StatusCode::UNAUTHORIZED);

        let a: serde_json::Value = wrong_secret.json().await.unwrap();
        let b: serde_json::Value = unknown_client.json().await.unwrap();
        assert_eq!(a["error"], b["error"], "no client enumeration");
    });
}

#[test]
fn client_secret_jwt_audience_must_be_the_token_endpoint() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "client_secret_jwt",
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();
        let client_secret = registered["client_secret"].as_str().unwrap();

        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &hs256_assertion(client_id, client_secret, "https://wrong.example.org/token", 300),
                ),
                ("client_assertion_type", ASSERTION_TYPE),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid_client");
        assert!(body["error_description"].is_string());
    });
}

#[test]
fn expired_client_assertion_is_rejected() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "client_secret_jwt",
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();
        let client_secret = registered["client_secret"].as_str().unwrap();

        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &hs256_assertion(client_id, client_secret, &s.url("/token"), -60),
                ),
                ("client_assertion_type", ASSERTION_TYPE),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn client_assertion_signed_with_foreign_secret_fails() {
    let s = server();
    runtime().block_on(async {
        // Two clients; an assertion for client A signed with B's secret
        // must never verify — symmetric keys are per-client.
        let a = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "client_secret_jwt",
            }))
            .await;
        let b = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "client_secret_jwt",
            }))
            .await;

        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &hs256_assertion(
                        a["client_id"].as_str().unwrap(),
                        b["client_secret"].as_str().unwrap(),
                        &s.url("/token"),
                        300,
                    ),
                ),
                ("client_assertion_type", ASSERTION_TYPE),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn private_key_jwt_verifies_against_registered_jwks() {
    let s = server();
    runtime().block_on(async {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let registered = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "private_key_jwt",
                "jwks": rsa_jwks(&RsaPublicKey::from(&key)),
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();

        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &rs256_assertion(client_id, &key, &s.url("/token"), 300),
                ),
                ("client_assertion_type", ASSERTION_TYPE),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // A different private key fails signature verification
        let other = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &rs256_assertion(client_id, &other, &s.url("/token"), 300),
                ),
                ("client_assertion_type", ASSERTION_TYPE),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    });
}

#[test]
fn private_key_jwt_registration_requires_keys() {
    let s = server();
    runtime().block_on(async {
        let resp = s
            .client()
            .post(s.url("/register"))
            .json(&serde_json::json!({
                "redirect_uris": ["https://rp.example.com/cb"],
                "token_endpoint_auth_method": "private_key_jwt",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    });
}

#[test]
fn missing_assertion_type_is_rejected() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "token_endpoint_auth_method": "client_secret_jwt",
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();
        let client_secret = registered["client_secret"].as_str().unwrap();

        let resp = s
            .client()
            .post(s.url("/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                (
                    "client_assertion",
                    &hs256_assertion(client_id, client_secret, &s.url("/token"), 300),
                ),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    });
}
