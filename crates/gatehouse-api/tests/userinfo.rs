//! UserInfo, token validation, and client introspection.

mod common;
use common::*;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Digest;

async fn access_token_for(s: &common::TestServer, scope: &str) -> (String, serde_json::Value) {
    let registered = s.register_client(serde_json::json!({})).await;
    let token = password_token(s, &registered, scope).await;
    (token, registered)
}

async fn password_token(
    s: &common::TestServer,
    registered: &serde_json::Value,
    scope: &str,
) -> String {
    let resp = s
        .client()
        .post(s.url("/token"))
        .basic_auth(
            registered["client_id"].as_str().unwrap(),
            Some(registered["client_secret"].as_str().unwrap()),
        )
        .form(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", "correct horse"),
            ("scope", scope),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

#[test]
fn claims_follow_granted_scope_exactly() {
    let s = server();
    runtime().block_on(async {
        let (token, _) = access_token_for(s, "openid email").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let claims: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["email"], "alice@example.com");
        assert_eq!(claims["email_verified"], true);
        // profile scope was not granted, so its claims are absent
        assert!(claims.get("name").is_none());
        assert!(claims.get("preferred_username").is_none());
        // phone scope was not granted either
        assert!(claims.get("phone_number").is_none());
    });
}

#[test]
fn narrowed_scope_claims_are_absent() {
    let s = server();
    runtime().block_on(async {
        // Client may only hold openid+email; profile gets dropped silently
        let registered = s
            .register_client(serde_json::json!({
                "scope": "openid email",
            }))
            .await;
        let token = password_token(s, &registered, "openid email profile").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let claims: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(claims["email"], "alice@example.com");
        assert!(claims.get("name").is_none(), "profile was narrowed away");
    });
}

#[test]
fn custom_scope_releases_configured_claims() {
    let s = server();
    runtime().block_on(async {
        // `inventory` is a configured scope mapping to the `warehouse`
        // claim; alice has no such claim so nothing is released, but the
        // scope itself is granted.
        let (token, _) = access_token_for(s, "openid inventory").await;
        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let claims: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(claims["sub"], "alice");
        assert!(claims.get("warehouse").is_none());
    });
}

#[test]
fn bearer_token_accepted_in_header_form_and_query() {
    let s = server();
    runtime().block_on(async {
        let (token, _) = access_token_for(s, "openid").await;

        let via_header = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(via_header.status(), StatusCode::OK);

        let via_form = s
            .client()
            .post(s.url("/userinfo"))
            .form(&[("access_token", token.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(via_form.status(), StatusCode::OK);

        let via_query = s
            .client()
            .get(s.url("/userinfo"))
            .query(&[("access_token", token.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(via_query.status(), StatusCode::OK);
    });
}

#[test]
fn missing_and_garbage_tokens_are_400() {
    let s = server();
    runtime().block_on(async {
        let resp = s.client().get(s.url("/userinfo")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "invalid_token");
        assert!(body["error_description"].is_string());

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth("not-a-real-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    });
}

#[test]
fn token_without_openid_scope_is_403() {
    let s = server();
    runtime().block_on(async {
        let registered = s.register_client(serde_json::json!({})).await;
        let token = password_token(s, &registered, "profile").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "insufficient_scope");
    });
}

#[test]
fn signed_userinfo_response_is_a_verifiable_jwt() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "userinfo_signed_response_alg": "RS256",
            }))
            .await;
        let token = password_token(s, &registered, "openid email").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap().to_str().unwrap(),
            "application/jwt"
        );

        let jwt = resp.text().await.unwrap();
        let header = decode_header(&jwt);
        assert_eq!(header["alg"], "RS256");

        let claims = decode_payload(&jwt);
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["email"], "alice@example.com");
        assert_eq!(claims["aud"], registered["client_id"]);
    });
}

#[test]
fn symmetric_encrypted_userinfo_round_trips() {
    let s = server();
    runtime().block_on(async {
        use gatehouse_core::jose::jwe::{JweDecryptionKey, decrypt_claims};

        let registered = s
            .register_client(serde_json::json!({
                "userinfo_encrypted_response_alg": "A128KW",
                "userinfo_encrypted_response_enc": "A128GCM",
            }))
            .await;
        let client_secret = registered["client_secret"].as_str().unwrap();
        let token = password_token(s, &registered, "openid email").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let compact = resp.text().await.unwrap();
        assert_eq!(compact.split('.').count(), 5, "a JWE has five parts");

        // The caller derives the wrapping key from its client secret
        let digest = sha2::Sha256::digest(client_secret.as_bytes());
        let claims = decrypt_claims(
            &compact,
            &JweDecryptionKey::Symmetric(digest[..16].to_vec()),
        )
        .unwrap();
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.get_str("email"), Some("alice@example.com"));
    });
}

#[test]
fn rsa_encrypted_userinfo_decrypts_with_the_client_private_key() {
    let s = server();
    runtime().block_on(async {
        use gatehouse_core::jose::jwe::{JweDecryptionKey, decrypt};

        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&key);
        let jwks = serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "use": "enc",
                "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            }]
        });

        let registered = s
            .register_client(serde_json::json!({
                "jwks": jwks,
                "userinfo_signed_response_alg": "RS256",
                "userinfo_encrypted_response_alg": "RSA-OAEP",
                "userinfo_encrypted_response_enc": "A256GCM",
            }))
            .await;
        let token = password_token(s, &registered, "openid email").await;

        let resp = s
            .client()
            .get(s.url("/userinfo"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let compact = resp.text().await.unwrap();

        // Nested JWT: decrypting yields the signed UserInfo JWT
        let inner = decrypt(&compact, &JweDecryptionKey::Rsa(key)).unwrap();
        let jwt = String::from_utf8(inner).unwrap();
        assert_eq!(jwt.split('.').count(), 3);
        let claims = decode_payload(&jwt);
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["email"], "alice@example.com");
    });
}

#[test]
fn request_object_essential_claims_are_honored() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "request_object_signing_alg": "HS256",
                "scope": "openid email",
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();
        let client_secret = registered["client_secret"].as_str().unwrap();

        // The request object asks for `name` as essential even though the
        // profile scope is not granted.
        let request_object = {
            let claims = serde_json::json!({
                "iss": client_id,
                "aud": s.provider.config.provider.issuer,
                "client_id": client_id,
                "response_type": "code",
                "redirect_uri": "https://rp.example.com/cb",
                "scope": "openid email",
                "claims": {"userinfo": {"name": {"essential": true}}},
            });
            jsonwebtoken::encode(
                &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
                &claims,
                &jsonwebtoken::EncodingKey::from_secret(client_secret.as_bytes()),
            )
            .unwrap()
        };

        let client = s.client();
        let params = client
            .get(s.url("/authorize"))
            .query(&[
                ("client_id", client_id),
                ("redirect_uri", "https://rp.example.com/cb"),
                ("response_type", "code"),
                ("scope", "openid email"),
                ("request", &request_object),
                ("username", "alice"),
                ("password", "correct horse"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(params.status(), StatusCode::FOUND);
        let location = params.headers().get("location").unwrap().to_str().unwrap();
        let redirect = redirect_params(location);
        let code = param(&redirect, "code").unwrap();

        let resp = client
            .post(s.url("/token"))
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", "https://rp.example.com/cb"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();

        let resp = client
            .get(s.url("/userinfo"))
            .bearer_auth(body["access_token"].as_str().unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let claims: serde_json::Value = resp.json().await.unwrap();

        // email comes from scope; name from the essential claims request
        assert_eq!(claims["email"], "alice@example.com");
        assert_eq!(claims["name"], "Alice Example");
    });
}

#[test]
fn validate_endpoint_reports_validity_without_claims() {
    let s = server();
    runtime().block_on(async {
        let (token, _) = access_token_for(s, "openid email").await;

        let resp = s
            .client()
            .get(s.url("/validate"))
            .query(&[("token", token.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["valid"], true);
        let expires_in = body["expires_in"].as_i64().unwrap();
        assert!(expires_in > 0 && expires_in <= 3600);
        assert!(body.get("sub").is_none(), "no claim leakage");
        assert!(body.get("email").is_none());

        let resp = s
            .client()
            .post(s.url("/validate"))
            .form(&[("token", "nonexistent")])
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["valid"], false);
        assert_eq!(body["expires_in"], 0);
    });
}

#[test]
fn clientinfo_requires_the_clientinfo_scope() {
    let s = server();
    runtime().block_on(async {
        let registered = s
            .register_client(serde_json::json!({
                "grant_types": ["client_credentials"],
                "scope": "clientinfo",
                "redirect_uris": serde_json::Value::Null,
            }))
            .await;
        let client_id = registered["client_id"].as_str().unwrap();
        let client_secret = registered["client_secret"].as_str().unwrap();

        let resp = s
            .client()
            .post(s.url("/token"))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "clientinfo")])
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let token = body["access_token"].as_str().unwrap();

        let resp = s
            .client()
            .get(s.url("/clientinfo"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let info: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(info["name"], "Test RP");
        assert_eq!(info["inum"], *client_id);

        // A token without the scope is refused
        let resp = s
            .client()
            .post(s.url("/token"))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let bare_token = body["access_token"].as_str().unwrap();

        let resp = s
            .client()
            .get(s.url("/clientinfo"))
            .bearer_auth(bare_token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    });
}
