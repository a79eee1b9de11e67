use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use mcp_broker_gateway::state::{test_config, AppState};

fn app(pool: PgPool) -> axum::Router {
    let state = AppState::new(pool, test_config());
    mcp_broker_gateway::create_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// `GovernorLayer`'s default `PeerIpKeyExtractor` reads `ConnectInfo<SocketAddr>`
/// out of the request extensions — real traffic gets this from
/// `into_make_service_with_connect_info` (see `main.rs`); `.oneshot()` in
/// tests has to stand one in manually.
fn test_peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242)))
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .extension(test_peer())
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register_client(router: &axum::Router, redirect_uri: &str) -> String {
    let body = serde_json::json!({
        "client_name": "test client",
        "redirect_uris": [redirect_uri],
    });
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["client_id"].as_str().unwrap().to_string()
}

async fn obtain_code(
    router: &axum::Router,
    client_id: &str,
    redirect_uri: &str,
    verifier: &str,
    challenge: &str,
    email: &str,
) -> String {
    let get_response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/authorize?response_type=code&client_id={client_id}&redirect_uri={redirect_uri}&state=abc&code_challenge={challenge}&code_challenge_method=S256&resource=https%3A%2F%2Fsrv%2Fmcp%2F"
                ))
                .extension(test_peer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);

    let _ = verifier; // referenced by caller for the /token exchange

    let login_body = format!(
        "email={email}&password=password123&client_id={client_id}&redirect_uri={redirect_uri}&state=abc&code_challenge={challenge}&code_challenge_method=S256&resource=https%3A%2F%2Fsrv%2Fmcp%2F"
    );
    let login_response = router.clone().oneshot(form_request("/authorize/login", &login_body)).await.unwrap();
    assert_eq!(login_response.status(), StatusCode::SEE_OTHER);

    let location = login_response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let parsed = url::Url::parse(&location).unwrap();
    parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .expect("redirect must carry an authorization code")
}

const REDIRECT_URI: &str = "http://localhost:3000/cb";
const RESOURCE: &str = "https://srv/mcp/";
// Literal PKCE pair from spec.md's end-to-end scenario (§8).
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1tj6yu8SH4YtYzLg4";

#[sqlx::test]
async fn happy_path_issues_and_honors_tokens(pool: PgPool) {
    let router = app(pool);

    let client_id = register_client(&router, REDIRECT_URI).await;
    let code = obtain_code(&router, &client_id, REDIRECT_URI, VERIFIER, CHALLENGE, "user@x.com").await;

    let token_body = format!(
        "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}&code_verifier={VERIFIER}&client_id={client_id}&resource=https%3A%2F%2Fsrv%2Fmcp%2F"
    );
    let token_response = router.clone().oneshot(form_request("/token", &token_body)).await.unwrap();
    assert_eq!(token_response.status(), StatusCode::OK);

    let json = body_json(token_response).await;
    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["expires_in"], 900);
    assert_eq!(json["scope"], "trading");
    let access_token = json["access_token"].as_str().unwrap().to_string();
    let refresh_token = json["refresh_token"].as_str().unwrap().to_string();

    // The access token is accepted by the resource gateway.
    let gated_response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/mcp/accounts")
                .header("authorization", format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gated_response.status(), StatusCode::OK);

    // Refresh rotates both tokens.
    let refresh_body =
        format!("grant_type=refresh_token&refresh_token={refresh_token}&client_id={client_id}&resource=https%3A%2F%2Fsrv%2Fmcp%2F");
    let refresh_response = router.clone().oneshot(form_request("/token", &refresh_body)).await.unwrap();
    assert_eq!(refresh_response.status(), StatusCode::OK);
    let refreshed = body_json(refresh_response).await;
    let new_access_token = refreshed["access_token"].as_str().unwrap().to_string();
    let new_refresh_token = refreshed["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh_token, refresh_token);

    // The old refresh token no longer works.
    let stale_refresh_response = router.clone().oneshot(form_request("/token", &refresh_body)).await.unwrap();
    assert_eq!(stale_refresh_response.status(), StatusCode::BAD_REQUEST);

    // Revoking the new access token makes the gateway reject it.
    let revoke_body = format!("token={new_access_token}");
    let revoke_response = router.clone().oneshot(form_request("/revoke", &revoke_body)).await.unwrap();
    assert_eq!(revoke_response.status(), StatusCode::OK);

    let post_revoke_gate = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/mcp/accounts")
                .header("authorization", format!("Bearer {new_access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(post_revoke_gate.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test]
async fn pkce_mismatch_is_rejected(pool: PgPool) {
    let router = app(pool);
    let client_id = register_client(&router, REDIRECT_URI).await;
    let code = obtain_code(&router, &client_id, REDIRECT_URI, VERIFIER, CHALLENGE, "user2@x.com").await;

    let token_body = format!(
        "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}&code_verifier=wrong-verifier&client_id={client_id}&resource=https%3A%2F%2Fsrv%2Fmcp%2F"
    );
    let response = router.oneshot(form_request("/token", &token_body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_grant");
}

#[sqlx::test]
async fn code_replay_is_rejected_and_revokes_the_issued_token(pool: PgPool) {
    let router = app(pool);
    let client_id = register_client(&router, REDIRECT_URI).await;
    let code = obtain_code(&router, &client_id, REDIRECT_URI, VERIFIER, CHALLENGE, "user4@x.com").await;

    let token_body = format!(
        "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}&code_verifier={VERIFIER}&client_id={client_id}&resource={RESOURCE}"
    );
    let token_response = router.clone().oneshot(form_request("/token", &token_body)).await.unwrap();
    assert_eq!(token_response.status(), StatusCode::OK);
    let json = body_json(token_response).await;
    let access_token = json["access_token"].as_str().unwrap().to_string();

    // Re-submitting the already-redeemed code is rejected...
    let replay_response = router.clone().oneshot(form_request("/token", &token_body)).await.unwrap();
    assert_eq!(replay_response.status(), StatusCode::BAD_REQUEST);
    let replay_json = body_json(replay_response).await;
    assert_eq!(replay_json["error"], "invalid_grant");

    // ...and the token issued from the original, legitimate redemption is
    // revoked as a side effect (§9 open-question decision in DESIGN.md).
    let gate_response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/mcp/accounts")
                .header("authorization", format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gate_response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test]
async fn audience_mismatch_is_rejected_by_the_gateway(pool: PgPool) {
    let router = app(pool.clone());
    let client_id = register_client(&router, REDIRECT_URI).await;
    let code = obtain_code(&router, &client_id, REDIRECT_URI, VERIFIER, CHALLENGE, "user3@x.com").await;

    let token_body = format!(
        "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}&code_verifier={VERIFIER}&client_id={client_id}&resource={RESOURCE}"
    );
    let token_response = router.clone().oneshot(form_request("/token", &token_body)).await.unwrap();
    let json = body_json(token_response).await;
    let access_token = json["access_token"].as_str().unwrap().to_string();

    // The token was minted for `https://srv/mcp/`. A second gateway, sharing
    // the same signing secret and database but mounted under a different
    // resource path, must still reject it — §4.3's strict single-audience
    // match, exercised end-to-end rather than just at the claims layer.
    let mut other_config = test_config();
    other_config.protected_resource_path = "/other".to_string();
    let other_router = mcp_broker_gateway::create_router(AppState::new(pool, other_config));

    let response = other_router
        .oneshot(
            Request::builder()
                .uri("/other/accounts")
                .header("authorization", format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test]
async fn missing_bearer_is_rejected(pool: PgPool) {
    let router = app(pool);
    let response = router
        .oneshot(Request::builder().uri("/mcp/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("www-authenticate").is_some());
}

#[sqlx::test]
async fn revoke_is_always_200_even_for_unknown_tokens(pool: PgPool) {
    let router = app(pool);
    let response = router
        .oneshot(form_request("/revoke", "token=never-issued"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test]
async fn register_rejects_non_https_non_loopback_redirect_uri(pool: PgPool) {
    let router = app(pool);
    let body = serde_json::json!({
        "client_name": "bad client",
        "redirect_uris": ["http://evil.example.com/cb"],
    });
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn authorize_with_unknown_client_renders_an_html_remediation_page(pool: PgPool) {
    let router = app(pool);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/authorize?response_type=code&client_id=mcp-does-not-exist&redirect_uri=http://localhost:3000/cb&state=abc&code_challenge=abc&code_challenge_method=S256&resource=https%3A%2F%2Fsrv%2Fmcp%2F")
                .extension(test_peer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"), "expected text/html, got {content_type}");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("unknown client_id"));
}
