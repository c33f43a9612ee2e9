// Client-held view state shared between the session guard, pollers and the monitor

use crate::error::ApiError;
use crate::models::Identity;

/// Where a session stands right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// `initialize()` has not finished yet.
    Pending,
    Authenticated,
    Unauthenticated,
}

/// Proof of session validity attached to, or implied by, outbound requests.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as `Authorization: Bearer <token>` on every request.
    Bearer(String),
    /// Carried by the transport (edge-issued cookie). Attaching it is a no-op.
    Ambient,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credential::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Snapshot of the authentication session.
///
/// `status == Authenticated` holds exactly when both `identity` and
/// `credential` are present; the constructors below are the only way the
/// guard builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    pub credential: Option<Credential>,
    pub status: SessionStatus,
    pub last_error: Option<String>,
}

impl Session {
    pub fn pending() -> Self {
        Self {
            identity: None,
            credential: None,
            status: SessionStatus::Pending,
            last_error: None,
        }
    }

    pub fn authenticated(identity: Identity, credential: Credential) -> Self {
        Self {
            identity: Some(identity),
            credential: Some(credential),
            status: SessionStatus::Authenticated,
            last_error: None,
        }
    }

    pub fn unauthenticated(last_error: Option<String>) -> Self {
        Self {
            identity: None,
            credential: None,
            status: SessionStatus::Unauthenticated,
            last_error,
        }
    }

    /// A credential without an identity yet (stored token awaiting a profile fetch).
    pub fn credential_only(credential: Credential, last_error: Option<String>) -> Self {
        Self {
            identity: None,
            credential: Some(credential),
            status: SessionStatus::Unauthenticated,
            last_error,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn bearer_token(&self) -> Option<&str> {
        match &self.credential {
            Some(Credential::Bearer(token)) => Some(token.as_str()),
            _ => None,
        }
    }
}

/// Lifecycle phase of one poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Errored,
}

/// Latest state of one polled resource.
///
/// A failed fetch keeps the previous `value`; only `error` and `phase` change.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<T> {
    pub value: Option<T>,
    pub is_loading: bool,
    pub error: Option<ApiError>,
    pub phase: Phase,
}

impl<T> Resource<T> {
    pub fn idle(is_loading: bool) -> Self {
        Self {
            value: None,
            is_loading,
            error: None,
            phase: Phase::Idle,
        }
    }

    /// Whether the value on display is older than the last attempt.
    pub fn is_stale(&self) -> bool {
        self.phase == Phase::Errored && self.value.is_some()
    }
}
