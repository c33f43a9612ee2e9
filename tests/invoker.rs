mod common;

use common::{settle, signed_in, Harness};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{self, Duration};
use trading_dashboard_client::{
    ActionInvoker, AuthMode, BotAction, BotName, ErrorKind, MemoryStore, MockReply, MockTransport,
};

#[tokio::test]
async fn call_without_session_sends_nothing() {
    let h = Harness::new(AuthMode::Bearer, MemoryStore::new(), MockTransport::always(MockReply::json(200, json!({}))));
    let invoker = ActionInvoker::new(h.client.clone());

    // before initialize() has run
    let err = invoker.pause(BotName::Kalshi).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAuthenticated);

    h.session.initialize(None).await;
    let err = invoker
        .call::<Value>("/api/deploy/git-pull", Method::POST, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAuthenticated);
    assert_eq!(err.message, "Not authenticated");
    assert_eq!(h.transport.request_count(), 0);
    assert_eq!(invoker.last_error(), Some(err));
}

#[tokio::test]
async fn server_error_is_returned_and_loading_clears() {
    let h = signed_in(MockTransport::always(MockReply::json(500, json!({"message": "bot busy"})))).await;
    let invoker = ActionInvoker::new(h.client.clone());

    let err = invoker
        .call::<Value>("/api/bots/kalshi/pause", Method::POST, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServerError);
    assert_eq!(err.message, "bot busy");
    assert_eq!(err.status_code, Some(500));
    assert!(!invoker.is_loading());
    assert_eq!(h.transport.request_count(), 1);
    assert!(h.session.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn loading_flag_covers_exactly_one_request() {
    let h = signed_in(MockTransport::always(
        MockReply::json(200, json!({"status": "restarting"})).delayed(Duration::from_secs(3)),
    ))
    .await;
    let invoker = Arc::new(ActionInvoker::new(h.client.clone()));

    let task_invoker = invoker.clone();
    let call = tokio::spawn(async move { task_invoker.restart(BotName::Grid).await });
    settle().await;
    assert!(invoker.is_loading());

    time::sleep(Duration::from_secs(3)).await;
    let ack = call.await.unwrap().unwrap();
    assert_eq!(ack, json!({"status": "restarting"}));
    assert!(!invoker.is_loading());
    assert_eq!(invoker.last_error(), None);
    assert_eq!(h.transport.paths(), vec!["/api/bots/grid/restart"]);
}

#[tokio::test]
async fn failures_are_not_retried() {
    let h = signed_in(MockTransport::always(MockReply::failure("connection reset"))).await;
    let invoker = ActionInvoker::new(h.client.clone());

    let err = invoker.resume(BotName::Crypto).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NetworkFailure);
    assert_eq!(h.transport.request_count(), 1);
}

#[tokio::test]
async fn body_is_sent_as_json() {
    let h = signed_in(MockTransport::always(MockReply::no_content())).await;
    let invoker = ActionInvoker::new(h.client.clone());

    let ack: Value = invoker
        .call("/api/bots/kalshi/pause", Method::POST, Some(json!({"reason": "maintenance"})))
        .await
        .unwrap();

    assert_eq!(ack, json!({}));
    let request = &h.transport.requests()[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.header_value("content-type"), Some("application/json"));
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"reason": "maintenance"}));
}

#[tokio::test]
async fn scan_and_deploy_decode_typed_results() {
    let h = signed_in(MockTransport::new(|request, _| match request.url.path() {
        "/api/bots/kalshi/scan" => MockReply::json(
            200,
            json!({
                "scan_id": "scan-42",
                "bot": "kalshi",
                "timestamp": "2024-03-01T12:00:00Z",
                "markets_found": 118,
                "edges_found": 3,
                "pending_analysis": 2
            }),
        ),
        "/api/deploy/git-pull" => MockReply::json(
            200,
            json!({
                "success": true,
                "message": "Updated to a1b2c3d",
                "timestamp": "2024-03-01T12:01:00Z",
                "changes_count": 4
            }),
        ),
        _ => MockReply::json(404, json!({"error": "not found"})),
    }))
    .await;
    let invoker = ActionInvoker::new(h.client.clone());

    let scan = invoker.scan(BotName::Kalshi).await.unwrap();
    assert_eq!(scan.scan_id, "scan-42");
    assert_eq!(scan.edges_found, 3);

    let deploy = invoker.git_pull().await.unwrap();
    assert!(deploy.success);
    assert_eq!(deploy.changes_count, 4);

    let methods: Vec<Method> = h.transport.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec![Method::POST, Method::POST]);
}

#[tokio::test]
async fn bot_action_paths_follow_the_action() {
    let h = signed_in(MockTransport::always(MockReply::json(200, json!({"ok": true})))).await;
    let invoker = ActionInvoker::new(h.client.clone());

    for action in [BotAction::Pause, BotAction::Resume, BotAction::Restart] {
        invoker.bot_action(BotName::Crypto, action).await.unwrap();
    }

    assert_eq!(
        h.transport.paths(),
        vec!["/api/bots/crypto/pause", "/api/bots/crypto/resume", "/api/bots/crypto/restart"]
    );
}

#[tokio::test]
async fn rejected_mutation_ends_the_session() {
    let h = signed_in(MockTransport::always(MockReply::json(401, json!({"detail": "token revoked"})))).await;
    let invoker = ActionInvoker::new(h.client.clone());

    let err = invoker.pause(BotName::Kalshi).await.unwrap_err();
    assert_eq!(err.status_code, Some(401));
    assert!(!h.session.is_authenticated());

    let again = invoker.pause(BotName::Kalshi).await.unwrap_err();
    assert_eq!(again.kind, ErrorKind::NotAuthenticated);
    assert_eq!(h.transport.request_count(), 1);
}
