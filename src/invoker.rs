// One-shot mutations: bot control and deploy

use crate::api::{ApiClient, RequestOptions};
use crate::error::ApiError;
use crate::models::{ActionAck, BotName, GitPullResult, ScanResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Control action accepted by `POST /api/bots/{name}/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Pause,
    Resume,
    Restart,
    Scan,
}

impl BotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotAction::Pause => "pause",
            BotAction::Resume => "resume",
            BotAction::Restart => "restart",
            BotAction::Scan => "scan",
        }
    }

    pub fn endpoint(&self, bot: BotName) -> String {
        format!("/api/bots/{}/{}", bot.as_str(), self.as_str())
    }
}

impl fmt::Display for BotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pause" => Ok(BotAction::Pause),
            "resume" => Ok(BotAction::Resume),
            "restart" => Ok(BotAction::Restart),
            "scan" => Ok(BotAction::Scan),
            other => Err(format!(
                "unknown action '{}': expected pause, resume, restart or scan",
                other
            )),
        }
    }
}

const GIT_PULL_ENDPOINT: &str = "/api/deploy/git-pull";

/// Releases the loading claim even if the calling future is dropped mid-request.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fires single, non-idempotent requests. No retry and no polling.
pub struct ActionInvoker {
    client: ApiClient,
    in_flight: AtomicUsize,
    last_error: Mutex<Option<ApiError>>,
}

impl ActionInvoker {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            in_flight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// True while a call is waiting on the backend.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Error of the most recent call; cleared by the next success.
    pub fn last_error(&self) -> Option<ApiError> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Send exactly one request. Refuses without a request when no session is active.
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        if !self.client.session().is_authenticated() {
            warn!("⚠️  Refusing {} {}: not authenticated", method, endpoint);
            let error = ApiError::not_authenticated();
            self.record(Some(error.clone()));
            return Err(error);
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let mut options = RequestOptions::with_method(method.clone());
        if let Some(body) = body {
            options = options.body(body);
        }
        let result = self.client.request::<T>(endpoint, options).await;

        match &result {
            Ok(_) => {
                info!("✅ {} {} succeeded", method, endpoint);
                crate::log_dashboard_event(&format!("ACTION OK | {} {}", method, endpoint));
                self.record(None);
            }
            Err(e) => {
                warn!("❌ {} {} failed: {}", method, endpoint, e);
                crate::log_dashboard_event(&format!(
                    "ACTION FAILED | {} {} | status={} | {}",
                    method,
                    endpoint,
                    e.status_code.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                    e.message
                ));
                self.record(Some(e.clone()));
            }
        }
        result
    }

    fn record(&self, error: Option<ApiError>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub async fn bot_action(&self, bot: BotName, action: BotAction) -> Result<ActionAck, ApiError> {
        self.call(&action.endpoint(bot), Method::POST, None).await
    }

    pub async fn pause(&self, bot: BotName) -> Result<ActionAck, ApiError> {
        self.bot_action(bot, BotAction::Pause).await
    }

    pub async fn resume(&self, bot: BotName) -> Result<ActionAck, ApiError> {
        self.bot_action(bot, BotAction::Resume).await
    }

    pub async fn restart(&self, bot: BotName) -> Result<ActionAck, ApiError> {
        self.bot_action(bot, BotAction::Restart).await
    }

    /// Trigger one market scan cycle outside the bot's schedule.
    pub async fn scan(&self, bot: BotName) -> Result<ScanResult, ApiError> {
        self.call(&BotAction::Scan.endpoint(bot), Method::POST, None).await
    }

    /// Pull the latest backend code and restart the bots.
    pub async fn git_pull(&self) -> Result<GitPullResult, ApiError> {
        self.call(GIT_PULL_ENDPOINT, Method::POST, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_paths_are_built_from_closed_names() {
        assert_eq!(BotAction::Pause.endpoint(BotName::Kalshi), "/api/bots/kalshi/pause");
        assert_eq!(BotAction::Scan.endpoint(BotName::Grid), "/api/bots/grid/scan");
    }

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!("Restart".parse::<BotAction>().unwrap(), BotAction::Restart);
        assert!("delete".parse::<BotAction>().is_err());
    }
}
