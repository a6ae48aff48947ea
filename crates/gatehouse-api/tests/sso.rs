//! Multi-relying-party SSO: a session created by one interactive login is
//! reusable by further clients with prompt=none.

mod common;
use common::*;

#[test]
fn session_id_lets_second_and_third_clients_skip_login() {
    let s = server();
    runtime().block_on(async {
        let first = s.register_client(serde_json::json!({})).await;
        let second = s.register_client(serde_json::json!({})).await;
        let third = s.register_client(serde_json::json!({})).await;

        // Interactive login with the first relying party
        let client = s.client();
        let params = s
            .authorize(
                &client,
                &auth_params(first["client_id"].as_str().unwrap(), "openid"),
            )
            .await;
        let session_id = param(&params, "session_id").unwrap().to_string();

        // Second and third clients: prompt=none with the session id, and
        // no credentials anywhere in the request
        for rp in [&second, &third] {
            let client_id = rp["client_id"].as_str().unwrap();
            let params = s
                .authorize(
                    &client,
                    &[
                        ("client_id", client_id),
                        ("redirect_uri", "https://rp.example.com/cb"),
                        ("response_type", "code"),
                        ("scope", "openid"),
                        ("prompt", "none"),
                        ("session_id", &session_id),
                    ],
                )
                .await;

            let code = param(&params, "code").expect("code without re-prompt");

            // The code exchanges into tokens for the same end user
            let resp = s
                .client()
                .post(s.url("/token"))
                .basic_auth(client_id, Some(rp["client_secret"].as_str().unwrap()))
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
            let claims = decode_payload(body["id_token"].as_str().unwrap());
            assert_eq!(claims["sub"], "alice");
        }
    });
}

#[test]
fn session_cookie_is_an_alternative_to_the_parameter() {
    let s = server();
    runtime().block_on(async {
        let first = s.register_client(serde_json::json!({})).await;
        let second = s.register_client(serde_json::json!({})).await;

        // A cookie-holding client logs in interactively once
        let browser = Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        s.authorize(
            &browser,
            &auth_params(first["client_id"].as_str().unwrap(), "openid"),
        )
        .await;

        // The same browser hits the second client's authorization URL with
        // prompt=none and no session parameter: the cookie carries it
        let params = s
            .authorize(
                &browser,
                &[
                    ("client_id", second["client_id"].as_str().unwrap()),
                    ("redirect_uri", "https://rp.example.com/cb"),
                    ("response_type", "code"),
                    ("scope", "openid"),
                    ("prompt", "none"),
                ],
            )
            .await;
        assert!(param(&params, "code").is_some());
    });
}

#[test]
fn invalid_session_with_prompt_none_is_login_required() {
    let s = server();
    runtime().block_on(async {
        let registered = s.register_client(serde_json::json!({})).await;
        let client_id = registered["client_id"].as_str().unwrap();

        let resp = s
            .client()
            .get(s.url("/authorize"))
            .query(&[
                ("client_id", client_id),
                ("redirect_uri", "https://rp.example.com/cb"),
                ("response_type", "code"),
                ("scope", "openid"),
                ("prompt", "none"),
                ("session_id", "no-such-session"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);

        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        let params = redirect_params(location);
        assert_eq!(param(&params, "error"), Some("login_required"));
    });
}

#[test]
fn max_age_zero_forces_reauthentication() {
    let s = server();
    runtime().block_on(async {
        let registered = s.register_client(serde_json::json!({})).await;
        let client_id = registered["client_id"].as_str().unwrap();

        let client = s.client();
        let params = s.authorize(&client, &auth_params(client_id, "openid")).await;
        let session_id = param(&params, "session_id").unwrap().to_string();

        // Wait past max_age=0 so the session's auth_time is in the past
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let resp = client
            .get(s.url("/authorize"))
            .query(&[
                ("client_id", client_id),
                ("redirect_uri", "https://rp.example.com/cb"),
                ("response_type", "code"),
                ("scope", "openid"),
                ("prompt", "none"),
                ("session_id", &session_id),
                ("max_age", "0"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);

        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        let params = redirect_params(location);
        assert_eq!(param(&params, "error"), Some("login_required"));
    });
}
