// Shared fixtures: a mock backend wired to a real session guard and client
#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{self, Duration};
use trading_dashboard_client::storage::{AUTH_TOKEN_KEY, IDENTITY_KEY};
use trading_dashboard_client::{
    ApiClient, AuthMode, AuthSettings, HttpRequest, Identity, MemoryStore, MockReply, MockTransport,
    RecordingNavigator, SessionGuard, Transport,
};
use url::Url;

pub const BASE: &str = "http://backend.test";
pub const TOKEN: &str = "gho_test_token";

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub session: Arc<SessionGuard>,
    pub client: ApiClient,
}

impl Harness {
    pub fn new(mode: AuthMode, store: MemoryStore, transport: MockTransport) -> Self {
        let base = base_url();
        let transport = Arc::new(transport);
        let store = Arc::new(store);
        let navigator = Arc::new(RecordingNavigator::new());
        let session = Arc::new(SessionGuard::new(
            base.clone(),
            AuthSettings::for_mode(mode),
            transport.clone() as Arc<dyn Transport>,
            store.clone(),
            navigator.clone(),
        ));
        let client = ApiClient::new(base, transport.clone(), session.clone());
        Self {
            transport,
            store,
            navigator,
            session,
            client,
        }
    }

    /// Number of recorded requests whose path is `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.transport.paths().iter().filter(|p| p.as_str() == path).count()
    }
}

pub fn base_url() -> Url {
    Url::parse(BASE).unwrap()
}

pub fn identity_json() -> Value {
    json!({
        "id": "u-1",
        "github_username": "octo",
        "github_avatar_url": "https://avatars.example/octo.png"
    })
}

pub fn identity() -> Identity {
    serde_json::from_value(identity_json()).unwrap()
}

pub fn stored_session() -> MemoryStore {
    MemoryStore::with_entries([(AUTH_TOKEN_KEY, TOKEN.to_string()), (IDENTITY_KEY, identity_json().to_string())])
}

/// Bearer session restored from the store. Restoring a complete session sends no request.
pub async fn signed_in(transport: MockTransport) -> Harness {
    let harness = Harness::new(AuthMode::Bearer, stored_session(), transport);
    let session = harness.session.initialize(None).await;
    assert!(session.is_authenticated());
    harness
}

/// Let every spawned task run; with a paused clock this also fires due timers.
pub async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}

pub fn portfolio_json(current_value: u32) -> Value {
    json!({
        "total_capital": 500,
        "current_value": current_value,
        "total_profit_loss": current_value as i64 - 500,
        "roi_percent": 10.0,
        "daily_profit_loss": 5,
        "daily_roi_percent": 1.0,
        "kalshi_balance": 100,
        "kalshi_positions_value": 20.5,
        "crypto_balance": 200,
        "crypto_positions_value": 30,
        "grid_balance": 150,
        "grid_positions_value": 49.5,
        "last_updated": "2024-03-01T12:00:00Z"
    })
}

pub fn bots_json() -> Value {
    let bot = |name: &str, paused: bool| {
        json!({
            "name": name,
            "is_running": true,
            "is_paused": paused,
            "last_cycle_time": "2024-03-01T11:59:00",
            "last_cycle_duration_ms": 840,
            "last_trades_count": 1,
            "total_trades_today": 7,
            "error_message": null,
            "next_cycle_time": null,
            "capital": 200,
            "positions_count": 3
        })
    };
    json!([bot("kalshi", false), bot("crypto", true), bot("grid", false)])
}

pub fn transaction_json(n: usize) -> Value {
    json!({
        "id": format!("tx-{}", n),
        "timestamp": "2024-03-01T12:00:00Z",
        "bot": "kalshi",
        "market_id": format!("MKT-{}", n),
        "market_name": format!("Market {}", n),
        "side": "yes",
        "quantity": 10,
        "entry_price": 0.42,
        "status": "open"
    })
}

pub fn log_json(second: u32, level: &str, message: &str) -> Value {
    json!({
        "timestamp": format!("2024-03-01T09:00:{:02}Z", second),
        "bot": "kalshi",
        "level": level,
        "message": message
    })
}

/// Routes by path, answering each dashboard endpoint with a fixed healthy body.
pub fn healthy_backend(request: &HttpRequest, _index: usize) -> MockReply {
    match request.url.path() {
        "/api/portfolio" => MockReply::json(200, portfolio_json(550)),
        "/api/bots" => MockReply::json(200, bots_json()),
        "/api/logs" => MockReply::json(
            200,
            json!({"items": [log_json(1, "INFO", "cycle complete")], "total": 1, "page": 0, "has_more": false}),
        ),
        "/api/auth/me" => MockReply::json(200, identity_json()),
        other => MockReply::json(404, json!({"error": format!("no route {}", other)})),
    }
}
