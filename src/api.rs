// Authenticated REST client for the trading backend

use crate::error::ApiError;
use crate::models::{BotName, BotStatus, ListPage, LogLevel, LogSource, LogTail, PortfolioSummary, Transaction};
use crate::session::{AuthMode, SessionGuard};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{Credential, SessionStatus};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::form_urlencoded;

const ERROR_DETAILS_LIMIT: usize = 512;

/// Method and optional JSON payload of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self::with_method(Method::POST)
    }

    pub fn with_method(method: Method) -> Self {
        Self { method, body: None }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// `GET /api/transactions` filters. `page` is zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    pub page: u32,
    pub limit: u32,
    pub bot: Option<BotName>,
    pub search: Option<String>,
}

impl TransactionQuery {
    pub fn endpoint(&self) -> String {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params.append_pair("page", &self.page.to_string());
        params.append_pair("limit", &self.limit.to_string());
        if let Some(bot) = self.bot {
            params.append_pair("bot", bot.as_str());
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.append_pair("search", search);
        }
        format!("/api/transactions?{}", params.finish())
    }
}

/// `GET /api/logs` filters. Each fetch returns the newest `limit` matching lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub bot: Option<LogSource>,
    pub level: Option<LogLevel>,
    pub search: Option<String>,
    pub limit: u32,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            bot: None,
            level: None,
            search: None,
            limit: crate::pollers::DEFAULT_LOG_LIMIT,
        }
    }
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bot(mut self, bot: impl Into<LogSource>) -> Self {
        self.bot = Some(bot.into());
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn endpoint(&self) -> String {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params.append_pair("limit", &self.limit.to_string());
        if let Some(bot) = self.bot {
            params.append_pair("bot", bot.as_str());
        }
        if let Some(level) = self.level {
            params.append_pair("level", level.as_str());
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.append_pair("search", search);
        }
        format!("/api/logs?{}", params.finish())
    }
}

/// Join the configured base URL and an endpoint path by plain concatenation,
/// so a base with a path prefix (`https://host/trading`) keeps its prefix.
pub fn join_endpoint(base: &Url, endpoint: &str) -> Result<Url, ApiError> {
    let base = base.as_str().trim_end_matches('/');
    let target = if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    };
    Url::parse(&target).map_err(|e| ApiError::network(format!("invalid request URL {}: {}", target, e)))
}

fn is_json(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json" || media_type.ends_with("+json")
}

fn is_html(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

fn truncated(body: &str) -> String {
    body.chars().take(ERROR_DETAILS_LIMIT).collect()
}

fn decode<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| {
        ApiError::server(
            format!("unexpected response from server: {}", e),
            status,
            Some(truncated(body)),
        )
    })
}

fn server_error(response: &HttpResponse) -> ApiError {
    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    let from_body = parsed.as_ref().and_then(|json| {
        json.get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .map(str::to_string)
    });
    let message = from_body
        .or_else(|| Some(response.status_text.clone()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| format!("HTTP {}", response.status));
    let details = Some(truncated(&response.body)).filter(|s| !s.is_empty());
    ApiError::server(message, response.status, details)
}

/// Turn a raw response into a typed value or a classified error.
///
/// Order: 401/403, 204, an HTML page at any status (edge login or proxy error
/// page), other non-success, non-JSON success, body decode.
pub fn classify<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    if response.status == 401 || response.status == 403 {
        return Err(ApiError::unauthorized(response.status));
    }
    if response.status == 204 {
        return decode(response.status, "{}");
    }
    let content_type = response.content_type.as_deref();
    if let Some(content_type) = content_type.filter(|ct| is_html(ct)) {
        return Err(ApiError::session_expired(content_type));
    }
    if !response.is_success() {
        return Err(server_error(response));
    }
    if let Some(content_type) = content_type.filter(|ct| !is_json(ct)) {
        return Err(ApiError::session_expired(content_type));
    }
    decode(response.status, &response.body)
}

struct ClientInner {
    base_url: Url,
    transport: Arc<dyn Transport>,
    session: Arc<SessionGuard>,
    last_error: watch::Sender<Option<ApiError>>,
}

/// The one request primitive every typed fetch goes through.
///
/// Cheap to clone; clones share the transport, the session and the last-error slot.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn new(base_url: Url, transport: Arc<dyn Transport>, session: Arc<SessionGuard>) -> Self {
        let (last_error, _) = watch::channel(None);
        Self {
            inner: Arc::new(ClientInner {
                base_url,
                transport,
                session,
                last_error,
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.inner.session
    }

    /// Error of the most recent request; cleared by the next success.
    pub fn last_error(&self) -> Option<ApiError> {
        self.inner.last_error.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<ApiError>> {
        self.inner.last_error.subscribe()
    }

    /// Send one request and decode the JSON body as `T`.
    ///
    /// Every failure comes back as `Err`. An auth rejection also ends the
    /// session, so later calls short-circuit with `NotAuthenticated`.
    pub async fn request<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> Result<T, ApiError> {
        let result = self.execute(endpoint, options).await;
        match &result {
            Ok(_) => {
                self.inner.last_error.send_replace(None);
            }
            Err(e) => {
                self.inner.last_error.send_replace(Some(e.clone()));
            }
        }
        result
    }

    async fn execute<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> Result<T, ApiError> {
        let session = self.inner.session.snapshot();
        // pending counts as signed out until initialize() resolves it
        if session.status != SessionStatus::Authenticated {
            debug!("Skipping {} {}: no active session", options.method, endpoint);
            return Err(ApiError::not_authenticated());
        }

        let url = join_endpoint(&self.inner.base_url, endpoint)?;
        let mut request = HttpRequest::new(options.method, url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(Credential::Bearer(token)) = &session.credential {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request.include_credentials = self.inner.session.mode() == AuthMode::EdgeCookie;
        request.body = options.body.map(|body| body.to_string());

        let method = request.method.clone();
        let response = match self.inner.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️  {} {} failed: {}", method, endpoint, e);
                return Err(ApiError::network(e.message));
            }
        };

        match classify(&response) {
            Err(e) if e.is_auth_expired() => {
                warn!("🔒 {} {} rejected ({:?}): {}", method, endpoint, e.status_code, e.message);
                self.inner.session.invalidate(&e.message);
                Err(e)
            }
            Err(e) => {
                warn!("⚠️  {} {} failed ({:?}): {}", method, endpoint, e.status_code, e.message);
                Err(e)
            }
            ok => ok,
        }
    }

    /// `GET /api/portfolio`
    pub async fn portfolio(&self) -> Result<PortfolioSummary, ApiError> {
        self.request("/api/portfolio", RequestOptions::get()).await
    }

    /// `GET /api/bots`
    pub async fn bots(&self) -> Result<Vec<BotStatus>, ApiError> {
        self.request("/api/bots", RequestOptions::get()).await
    }

    pub async fn transactions(&self, query: &TransactionQuery) -> Result<ListPage<Transaction>, ApiError> {
        self.request(&query.endpoint(), RequestOptions::get()).await
    }

    pub async fn logs(&self, query: &LogQuery) -> Result<LogTail, ApiError> {
        self.request(&query.endpoint(), RequestOptions::get()).await
    }
}
