//! Event dispatcher tests

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use relhook::errors::HookError;
use relhook::models::webhook::{Repository, WebhookPayload};

use crate::support::{dispatcher, FakeReleases, Sandbox, CLONE_URL, REPO};

#[tokio::test]
async fn test_release_published_deploys_tag() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("unused"));

    let payload = WebhookPayload::release("published", Repository::github(REPO), "v1.2.3");
    let outcome = assert_ok!(dispatcher.handle("release", &payload).await);

    assert!(outcome.unwrap().is_succeeded());
    assert_eq!(
        sandbox.calls(),
        vec![
            format!("git fetch {CLONE_URL} --tags"),
            "git checkout v1.2.3".to_string(),
            "pm2 restart site".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_release_deleted_rolls_back_to_latest() {
    let sandbox = Sandbox::new();
    let releases = FakeReleases::latest("v1.2.2");
    let dispatcher = dispatcher(&sandbox, sandbox.app(), releases.clone());

    let payload = WebhookPayload::release("deleted", Repository::github(REPO), "v1.2.3");
    let outcome = assert_ok!(dispatcher.handle("release", &payload).await);

    assert!(outcome.unwrap().is_succeeded());
    assert_eq!(
        *releases.calls.lock().unwrap(),
        vec![("acme".to_string(), "site".to_string())]
    );
    assert!(sandbox.calls().contains(&"git checkout v1.2.2".to_string()));
    assert!(!sandbox.calls().contains(&"git checkout v1.2.3".to_string()));
}

#[tokio::test]
async fn test_failed_rollback_lookup_deploys_nothing() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::failing());

    let payload = WebhookPayload::release("deleted", Repository::github(REPO), "v1.2.3");
    let err = assert_err!(dispatcher.handle("release", &payload).await);

    assert!(matches!(err, HookError::UpstreamLookupFailed(_)), "{err}");
    let message = err.to_string();
    assert!(message.contains(REPO), "{message}");
    assert!(message.contains("404 Not Found"), "{message}");
    assert_eq!(message.matches("Upstream lookup failed").count(), 1, "{message}");
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_during_rollback_lookup_deploys_nothing() {
    let sandbox = Sandbox::new();
    let releases = FakeReleases::latest_after("v9", Duration::from_millis(500));
    let dispatcher = Arc::new(dispatcher(&sandbox, sandbox.app(), releases));

    let pending = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            let payload = WebhookPayload::release("deleted", Repository::github(REPO), "v10");
            dispatcher.handle("release", &payload).await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatcher.deployer().cancel_all();

    let outcome = assert_ok!(pending.await.unwrap());
    assert!(outcome.unwrap().is_cancelled());
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_other_release_actions_are_ignored() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("v1.0.0"));

    for action in ["created", "edited", "prereleased"] {
        let payload = WebhookPayload::release(action, Repository::github(REPO), "v1.2.3");
        assert!(assert_ok!(dispatcher.handle("release", &payload).await).is_none());
    }
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_published_release_without_tag_is_invalid() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("v1.0.0"));

    let payload = WebhookPayload {
        action: Some("published".to_string()),
        repository: Some(Repository::github(REPO)),
        ..Default::default()
    };
    let err = assert_err!(dispatcher.handle("release", &payload).await);

    assert!(matches!(err, HookError::InvalidPayload(_)));
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_push_to_tracked_branch_deploys() {
    let sandbox = Sandbox::new();
    let config = sandbox.app().with_tracked_branch("main");
    let dispatcher = dispatcher(&sandbox, config, FakeReleases::latest("v1.0.0"));

    let payload = WebhookPayload::push("refs/heads/main", Repository::github(REPO));
    let outcome = assert_ok!(dispatcher.handle("push", &payload).await);

    assert!(outcome.unwrap().is_succeeded());
    assert!(sandbox.calls().contains(&"git checkout main".to_string()));
}

#[tokio::test]
async fn test_push_to_other_branch_is_ignored() {
    let sandbox = Sandbox::new();
    let config = sandbox.app().with_tracked_branch("main");
    let dispatcher = dispatcher(&sandbox, config, FakeReleases::latest("v1.0.0"));

    let payload = WebhookPayload::push("refs/heads/other-branch", Repository::github(REPO));
    assert!(assert_ok!(dispatcher.handle("push", &payload).await).is_none());

    // A tag push that merely ends with the branch name does not count either
    let payload = WebhookPayload::push("refs/tags/main", Repository::github(REPO));
    assert!(assert_ok!(dispatcher.handle("push", &payload).await).is_none());

    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_push_without_tracked_branch_is_ignored() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("v1.0.0"));

    let payload = WebhookPayload::push("refs/heads/main", Repository::github(REPO));
    assert!(assert_ok!(dispatcher.handle("push", &payload).await).is_none());
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_unconfigured_repository_is_rejected() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("v1.0.0"));

    let payload = WebhookPayload::release("published", Repository::github("acme/other"), "v1.0.0");
    let err = assert_err!(dispatcher.handle("release", &payload).await);

    assert!(matches!(err, HookError::UnknownRepository(ref name) if name == "acme/other"));
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn test_unrelated_events_are_ignored() {
    let sandbox = Sandbox::new();
    let dispatcher = dispatcher(&sandbox, sandbox.app(), FakeReleases::latest("v1.0.0"));

    // No repository at all, as in a ping
    let payload = WebhookPayload::default();
    assert!(assert_ok!(dispatcher.handle("ping", &payload).await).is_none());

    let payload = WebhookPayload::push("refs/heads/main", Repository::github("acme/other"));
    assert!(assert_ok!(dispatcher.handle("issues", &payload).await).is_none());
}
