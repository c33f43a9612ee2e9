// Session guard: decides whether the dashboard may call the backend, and as whom

use crate::api::{classify, join_endpoint};
use crate::error::{ApiError, NOT_AUTHENTICATED_MESSAGE};
use crate::models::Identity;
use crate::storage::{CredentialStore, AUTH_TOKEN_KEY, IDENTITY_KEY};
use crate::transport::{HttpRequest, Transport};
use crate::types::{Credential, Session, SessionStatus};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Method, Url};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const CALLBACK_TOKEN_PARAM: &str = "token";
const CALLBACK_IDENTITY_PARAM: &str = "user";

/// Credential model used by one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// OAuth login hands back a bearer token; token and identity are persisted locally.
    Bearer,
    /// An edge proxy issues a session cookie; nothing is persisted locally.
    EdgeCookie,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bearer" | "token" | "oauth" => Ok(AuthMode::Bearer),
            "edge-cookie" | "edge_cookie" | "cookie" => Ok(AuthMode::EdgeCookie),
            other => Err(format!("unknown auth mode '{}': expected bearer or edge-cookie", other)),
        }
    }
}

/// Endpoint paths of one credential model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub mode: AuthMode,
    /// Where `login()` navigates.
    pub login_path: String,
    /// Returns the caller's [`Identity`].
    pub identity_path: String,
    /// Notified on logout (bearer model only).
    pub logout_path: Option<String>,
    /// The unauthenticated entry view.
    pub entry_path: String,
}

impl AuthSettings {
    pub fn bearer() -> Self {
        Self {
            mode: AuthMode::Bearer,
            login_path: "/api/auth/github/login".to_string(),
            identity_path: "/api/auth/me".to_string(),
            logout_path: Some("/api/auth/logout".to_string()),
            entry_path: "/dashboard/".to_string(),
        }
    }

    pub fn edge_cookie() -> Self {
        Self {
            mode: AuthMode::EdgeCookie,
            login_path: "/dashboard/".to_string(),
            identity_path: "/api/auth/whoami".to_string(),
            logout_path: None,
            entry_path: "/dashboard/".to_string(),
        }
    }

    pub fn for_mode(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Bearer => Self::bearer(),
            AuthMode::EdgeCookie => Self::edge_cookie(),
        }
    }
}

/// Performs the navigation side effects of login/logout.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &Url);
}

/// Prints the URL for the user to open.
#[derive(Debug, Default)]
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, target: &Url) {
        info!("Navigating to {}", target);
        println!("🌐 Open in your browser: {}", target);
    }
}

/// Remembers every navigation instead of performing it.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visited(&self) -> Vec<Url> {
        self.visited.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &Url) {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
    }
}

/// Expiry of a JWT-shaped token, read from its `exp` claim without verifying it.
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Opaque (non-JWT) tokens never count as expired.
pub fn token_expired(token: &str, now: DateTime<Utc>) -> bool {
    token_expiry(token).map_or(false, |exp| exp <= now)
}

/// Remove the OAuth callback parameters from `location`, returning `(token, identity_json)`.
/// Leaves `location` untouched unless both are present. Stripping happens
/// before the identity is parsed, so a rejected callback never leaves the
/// token visible in the URL either.
fn take_callback_params(location: &mut Url) -> Option<(String, String)> {
    let pairs: Vec<(String, String)> = location
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let token = pairs.iter().find(|(k, _)| k == CALLBACK_TOKEN_PARAM)?.1.clone();
    let identity = pairs.iter().find(|(k, _)| k == CALLBACK_IDENTITY_PARAM)?.1.clone();

    let remaining: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(k, _)| k != CALLBACK_TOKEN_PARAM && k != CALLBACK_IDENTITY_PARAM)
        .collect();
    if remaining.is_empty() {
        location.set_query(None);
    } else {
        location
            .query_pairs_mut()
            .clear()
            .extend_pairs(remaining.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Some((token, identity))
}

/// Owns the authentication session for the whole client.
///
/// State lives in a watch channel so views can react to every change;
/// [`SessionGuard::is_authenticated`] always reads the current value.
pub struct SessionGuard {
    settings: AuthSettings,
    base_url: Url,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    state: watch::Sender<Session>,
}

impl SessionGuard {
    pub fn new(
        base_url: Url,
        settings: AuthSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (state, _) = watch::channel(Session::pending());
        Self {
            settings,
            base_url,
            transport,
            store,
            navigator,
            state,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.settings.mode
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().status == SessionStatus::Authenticated
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Resolve the session once at startup.
    ///
    /// `location` is the URL the client was opened with. In the bearer model an
    /// OAuth callback carried there (`token` + URL-encoded `user` JSON) is
    /// consumed and stripped from it in place.
    pub async fn initialize(&self, location: Option<&mut Url>) -> Session {
        let session = match self.settings.mode {
            AuthMode::Bearer => {
                let callback = location.and_then(take_callback_params);
                match callback {
                    Some((token, identity_json)) => self.complete_callback(token, &identity_json),
                    None => self.restore_stored().await,
                }
            }
            AuthMode::EdgeCookie => self.probe_edge_session().await,
        };
        match session.status {
            SessionStatus::Authenticated => {
                let name = session.identity.as_ref().map(|i| i.display_name.as_str()).unwrap_or("");
                info!("✅ Session established for {}", name);
                crate::log_dashboard_event(&format!("SESSION START | user={} | mode={:?}", name, self.settings.mode));
            }
            _ => info!(
                "Session unauthenticated{}",
                session.last_error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
            ),
        }
        session
    }

    fn complete_callback(&self, token: String, identity_json: &str) -> Session {
        match serde_json::from_str::<Identity>(identity_json) {
            Ok(identity) => self.handle_auth_callback(token, identity),
            Err(e) => {
                warn!("⚠️  Failed to parse auth callback: {}", e);
                self.replace(Session::unauthenticated(Some(format!(
                    "Failed to complete authentication: {}",
                    e
                ))))
            }
        }
    }

    /// Accept a token and identity returned by the OAuth flow and persist both.
    pub fn handle_auth_callback(&self, token: String, identity: Identity) -> Session {
        let mut session = Session::authenticated(identity.clone(), Credential::Bearer(token.clone()));
        if let Err(e) = self.persist(&token, &identity) {
            warn!("⚠️  Failed to persist session: {}", e);
            session.last_error = Some(format!("Failed to save authentication: {}", e));
        }
        self.replace(session)
    }

    fn persist(&self, token: &str, identity: &Identity) -> Result<(), String> {
        let identity_json = serde_json::to_string(identity).map_err(|e| e.to_string())?;
        self.store.set(AUTH_TOKEN_KEY, token).map_err(|e| e.to_string())?;
        self.store.set(IDENTITY_KEY, &identity_json).map_err(|e| e.to_string())
    }

    async fn restore_stored(&self) -> Session {
        let token = match self.store.get(AUTH_TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => return self.replace(Session::unauthenticated(None)),
            Err(e) => {
                warn!("⚠️  Failed to load auth state: {}", e);
                return self.replace(Session::unauthenticated(Some(
                    "Failed to load authentication state".to_string(),
                )));
            }
        };

        if token_expired(&token, Utc::now()) {
            info!("Stored session token has expired");
            self.clear_store();
            return self.replace(Session::unauthenticated(Some("Stored session expired".to_string())));
        }

        let stored_identity = match self.store.get(IDENTITY_KEY) {
            Ok(Some(json)) => serde_json::from_str::<Identity>(&json)
                .map_err(|e| warn!("⚠️  Stored identity is unreadable: {}", e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️  Failed to load stored identity: {}", e);
                None
            }
        };

        match stored_identity {
            Some(identity) => self.replace(Session::authenticated(identity, Credential::Bearer(token))),
            None => {
                self.replace(Session::credential_only(Credential::Bearer(token), None));
                self.refresh_identity().await;
                self.snapshot()
            }
        }
    }

    async fn probe_edge_session(&self) -> Session {
        match self.fetch_identity(&Credential::Ambient).await {
            Ok(identity) => self.replace(Session::authenticated(identity, Credential::Ambient)),
            Err(e) => self.replace(Session::unauthenticated(Some(e.message))),
        }
    }

    async fn fetch_identity(&self, credential: &Credential) -> Result<Identity, ApiError> {
        let url = join_endpoint(&self.base_url, &self.settings.identity_path)?;
        let mut request = HttpRequest::new(Method::GET, url).header("Accept", "application/json");
        match credential {
            Credential::Bearer(token) => request = request.header("Authorization", format!("Bearer {}", token)),
            Credential::Ambient => request.include_credentials = true,
        }
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ApiError::network(e.message))?;
        classify(&response)
    }

    /// Navigate away to the external login flow.
    pub fn login(&self) {
        match join_endpoint(&self.base_url, &self.settings.login_path) {
            Ok(target) => self.navigator.navigate(&target),
            Err(e) => {
                warn!("⚠️  Login failed: {}", e);
                self.set_error(e.message);
            }
        }
    }

    /// Clear the local session, tell the backend (best effort) and return to the entry view.
    /// Safe to call any number of times.
    pub async fn logout(&self) {
        let previous = self.snapshot();
        self.clear_store();
        self.replace(Session::unauthenticated(None));
        if previous.is_authenticated() {
            info!("👋 Logged out");
            crate::log_dashboard_event("SESSION END | logout");
        }

        if let (Some(token), Some(path)) = (previous.bearer_token(), self.settings.logout_path.as_deref()) {
            self.notify_logout(token, path).await;
        }

        match join_endpoint(&self.base_url, &self.settings.entry_path) {
            Ok(target) => self.navigator.navigate(&target),
            Err(e) => warn!("⚠️  Cannot build entry URL: {}", e),
        }
    }

    async fn notify_logout(&self, token: &str, path: &str) {
        let url = match join_endpoint(&self.base_url, path) {
            Ok(url) => url,
            Err(e) => {
                debug!("Logout notification skipped: {}", e);
                return;
            }
        };
        let request = HttpRequest::new(Method::POST, url).header("Authorization", format!("Bearer {}", token));
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => debug!("Backend acknowledged logout"),
            Ok(response) => debug!("Logout notification returned {}", response.status),
            Err(e) => debug!("Logout API call failed: {}", e),
        }
    }

    /// Re-fetch the identity with the current credential.
    ///
    /// An auth rejection ends the session exactly like `logout()` and yields `None`.
    pub async fn refresh_identity(&self) -> Option<Identity> {
        let credential = match (self.settings.mode, self.snapshot().credential) {
            (AuthMode::EdgeCookie, _) => Credential::Ambient,
            (AuthMode::Bearer, Some(credential @ Credential::Bearer(_))) => credential,
            (AuthMode::Bearer, _) => {
                self.set_error(NOT_AUTHENTICATED_MESSAGE.to_string());
                return None;
            }
        };

        match self.fetch_identity(&credential).await {
            Ok(identity) => {
                if let Credential::Bearer(token) = &credential {
                    if let Err(e) = self.persist(token, &identity) {
                        warn!("⚠️  Failed to persist refreshed identity: {}", e);
                    }
                }
                self.replace(Session::authenticated(identity.clone(), credential));
                Some(identity)
            }
            Err(e) if e.is_auth_expired() => {
                self.invalidate(&e.message);
                None
            }
            Err(e) => {
                warn!("⚠️  Failed to refresh identity: {}", e);
                self.set_error(e.message);
                None
            }
        }
    }

    /// End the session after the backend rejected the credential.
    ///
    /// Same transition as `logout()`, minus the backend notification and the
    /// navigation. In-flight requests are left alone.
    pub fn invalidate(&self, reason: &str) {
        let was_authenticated = self.is_authenticated();
        self.clear_store();
        self.replace(Session::unauthenticated(Some(reason.to_string())));
        if was_authenticated {
            warn!("🔒 Session ended: {}", reason);
            crate::log_dashboard_event(&format!("SESSION END | {}", reason));
        }
    }

    fn clear_store(&self) {
        for key in [AUTH_TOKEN_KEY, IDENTITY_KEY] {
            if let Err(e) = self.store.clear(key) {
                warn!("⚠️  Failed to clear {} from session store: {}", key, e);
            }
        }
    }

    fn set_error(&self, message: String) {
        self.state.send_modify(|session| session.last_error = Some(message));
    }

    fn replace(&self, session: Session) -> Session {
        self.state.send_replace(session.clone());
        session
    }
}
