//! Webhook listener tests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use relhook::app::options::AppOptions;
use relhook::app::state::AppState;
use relhook::authn::signature::{sign, SIGNATURE_HEADER};
use relhook::models::webhook::EVENT_HEADER;
use relhook::server::serve::router;
use relhook::storage::settings::Secrets;

use crate::support::{Sandbox, REPO};

const SECRET: &str = "It's a Secret to Everybody";

fn app_state(sandbox: &Sandbox) -> AppState {
    let options = AppOptions {
        // Never contacted by these tests
        github_api_base_url: "http://127.0.0.1:9".to_string(),
        deployer: sandbox.options(),
        ..Default::default()
    };
    let secrets = Secrets {
        webhook_secret: SecretString::from(SECRET.to_string()),
        access_token: None,
    };
    AppState::with_apps(&options, secrets, sandbox.registry(sandbox.app())).unwrap()
}

fn delivery(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .header(EVENT_HEADER, event);
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    request.body(Body::from(body.to_string())).unwrap()
}

fn signed(event: &str, body: &str) -> Request<Body> {
    delivery(event, body, sign(body.as_bytes(), SECRET.as_bytes()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn release_body(action: &str, tag: &str) -> String {
    json!({
        "action": action,
        "release": {"tag_name": tag},
        "repository": {
            "full_name": REPO,
            "name": "site",
            "clone_url": "https://github.com/acme/site.git",
            "owner": {"login": "acme"}
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let (status, body) = send(app, delivery("release", &release_body("published", "v1"), None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["accepted"], false);
    assert!(state.tasks.is_empty());
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let body = release_body("published", "v1");
    let signature = sign(body.as_bytes(), b"wrong secret");
    let (status, _) = send(app, delivery("release", &body, signature)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    state.tasks.close();
    state.tasks.wait().await;
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_signed_garbage_is_bad_request() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let (status, body) = send(app, signed("release", "not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn test_ping_is_acknowledged() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let (status, body) = send(app, signed("ping", r#"{"zen": "Design for failure."}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    state.tasks.close();
    state.tasks.wait().await;
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_signed_release_is_deployed_in_background() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let (status, _) = send(app, signed("release", &release_body("published", "v1.2.3"))).await;
    assert_eq!(status, StatusCode::OK);

    state.tasks.close();
    tokio::time::timeout(Duration::from_secs(10), state.tasks.wait())
        .await
        .unwrap();
    let calls = sandbox.calls();
    assert!(calls.contains(&"git checkout v1.2.3".to_string()), "{calls:?}");
    assert_eq!(calls.last().map(String::as_str), Some("pm2 restart site"));
}

#[tokio::test]
async fn test_acknowledges_before_deploy_finishes() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let (status, _) = tokio::time::timeout(
        Duration::from_secs(5),
        send(app, signed("release", &release_body("published", "slow-1"))),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);

    sandbox.wait_for_call("git checkout slow-1").await;
    assert!(state.deployer.is_deploying("site"));

    tokio::time::timeout(Duration::from_secs(10), state.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert!(!state.deployer.is_deploying("site"));
    assert!(!sandbox.calls().iter().any(|call| call.starts_with("pm2")));
}

#[tokio::test]
async fn test_health_and_version() {
    let sandbox = Sandbox::new();
    let state = app_state(&sandbox);
    let app = router(Arc::new(state.server_state()));

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "relhook");

    let request = Request::builder().uri("/version").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
