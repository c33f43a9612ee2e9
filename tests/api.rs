mod common;

use common::{bots_json, portfolio_json, signed_in, Harness, TOKEN};
use rstest::rstest;
use serde_json::{json, Value};
use trading_dashboard_client::{
    AuthMode, BotName, ErrorKind, MemoryStore, MockReply, MockTransport, RequestOptions, SessionStatus,
    TransactionQuery,
};

#[rstest]
#[case::status_401(MockReply::json(401, json!({"detail": "Could not validate credentials"})))]
#[case::html_disguised_as_200(MockReply::html(200, "<!doctype html><title>Sign in</title>"))]
#[case::html_proxy_error_page(MockReply::html(502, "<html><body>Bad gateway, please sign in</body></html>"))]
#[tokio::test]
async fn auth_failures_report_401_and_end_the_session(#[case] reply: MockReply) {
    let h = signed_in(MockTransport::always(reply)).await;

    let err = h.client.portfolio().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::AuthExpired);
    assert_eq!(err.status_code, Some(401));
    assert_eq!(h.session.snapshot().status, SessionStatus::Unauthenticated);
    assert!(h.store.is_empty());

    let next = h.client.bots().await.unwrap_err();
    assert_eq!(next.kind, ErrorKind::NotAuthenticated);
    assert_eq!(h.transport.request_count(), 1);
}

#[tokio::test]
async fn requests_wait_for_the_session_to_resolve() {
    let h = Harness::new(
        AuthMode::Bearer,
        MemoryStore::new(),
        MockTransport::always(MockReply::json(200, portfolio_json(550))),
    );
    assert_eq!(h.session.snapshot().status, SessionStatus::Pending);

    let err = h.client.portfolio().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NotAuthenticated);
    assert_eq!(h.transport.request_count(), 0);
}

#[tokio::test]
async fn bearer_requests_carry_the_token() {
    let h = signed_in(MockTransport::always(MockReply::json(200, portfolio_json(550)))).await;
    h.client.portfolio().await.unwrap();

    let request = &h.transport.requests()[0];
    assert_eq!(request.url.as_str(), "http://backend.test/api/portfolio");
    assert_eq!(request.header_value("Authorization"), Some(format!("Bearer {}", TOKEN).as_str()));
    assert_eq!(request.header_value("accept"), Some("application/json"));
    assert!(!request.include_credentials);
}

#[tokio::test]
async fn edge_requests_ask_for_ambient_credentials() {
    let h = Harness::new(
        AuthMode::EdgeCookie,
        MemoryStore::new(),
        MockTransport::new(|request, _| match request.url.path() {
            "/api/auth/whoami" => MockReply::json(200, json!({"user_uuid": "u-9", "email": "ops@example.com"})),
            _ => MockReply::json(200, bots_json()),
        }),
    );
    h.session.initialize(None).await;

    let bots = h.client.bots().await.unwrap();

    assert_eq!(bots.len(), 3);
    let request = &h.transport.requests()[1];
    assert!(request.include_credentials);
    assert_eq!(request.header_value("authorization"), None);
}

#[tokio::test]
async fn last_error_is_set_then_cleared_by_success() {
    let h = signed_in(MockTransport::sequence(vec![
        MockReply::failure("dns error: no such host"),
        MockReply::json(200, bots_json()),
    ]))
    .await;
    let mut errors = h.client.subscribe_errors();

    let err = h.client.bots().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkFailure);
    assert_eq!(err.message, "API request failed: dns error: no such host");
    assert_eq!(h.client.last_error(), Some(err));
    assert!(errors.has_changed().unwrap());
    errors.borrow_and_update();

    h.client.bots().await.unwrap();
    assert_eq!(h.client.last_error(), None);
    assert!(errors.has_changed().unwrap());
    assert!(h.session.is_authenticated());
}

#[tokio::test]
async fn shape_mismatch_fails_closed() {
    let h = signed_in(MockTransport::always(MockReply::json(200, json!({"items": "nope"})))).await;
    let query = TransactionQuery {
        page: 0,
        limit: 50,
        bot: Some(BotName::Kalshi),
        search: None,
    };
    let err = h.client.transactions(&query).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerError);
    assert!(h.session.is_authenticated());
}

#[tokio::test]
async fn base_path_prefix_is_kept() {
    let h = signed_in(MockTransport::always(MockReply::json(200, json!({"ok": true})))).await;
    let client = trading_dashboard_client::ApiClient::new(
        url::Url::parse("http://backend.test/trading/").unwrap(),
        h.transport.clone(),
        h.session.clone(),
    );

    let _: Value = client.request("/api/bots/kalshi/pause", RequestOptions::post()).await.unwrap();

    assert_eq!(
        h.transport.requests()[0].url.as_str(),
        "http://backend.test/trading/api/bots/kalshi/pause"
    );
}
