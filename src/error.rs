// Error values returned by every request the dashboard client makes

use serde::Serialize;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// DNS, timeout, connection reset, or an unbuildable request URL.
    NetworkFailure,
    /// 401/403, or an HTML login page served in place of JSON.
    AuthExpired,
    /// Any other non-success status, or a body that does not decode.
    ServerError,
    /// A call was attempted without a usable credential. No request was sent.
    NotAuthenticated,
}

/// A request failure, always returned as a value and never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<String>,
}

pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized";
pub const SESSION_EXPIRED_MESSAGE: &str =
    "Authentication session expired. Please log in again.";
pub const NOT_AUTHENTICATED_MESSAGE: &str = "Not authenticated";

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::NetworkFailure,
            message: format!("API request failed: {}", message),
            status_code: None,
            details: Some(message),
        }
    }

    /// Rejected by the backend with 401/403.
    pub fn unauthorized(status: u16) -> Self {
        Self {
            kind: ErrorKind::AuthExpired,
            message: UNAUTHORIZED_MESSAGE.to_string(),
            status_code: Some(status),
            details: None,
        }
    }

    /// Served a non-JSON page (typically the edge login page) on a success status.
    pub fn session_expired(content_type: &str) -> Self {
        Self {
            kind: ErrorKind::AuthExpired,
            message: SESSION_EXPIRED_MESSAGE.to_string(),
            status_code: Some(401),
            details: Some(format!("unexpected content type: {}", content_type)),
        }
    }

    pub fn server(message: impl Into<String>, status: u16, details: Option<String>) -> Self {
        Self {
            kind: ErrorKind::ServerError,
            message: message.into(),
            status_code: Some(status),
            details,
        }
    }

    pub fn not_authenticated() -> Self {
        Self {
            kind: ErrorKind::NotAuthenticated,
            message: NOT_AUTHENTICATED_MESSAGE.to_string(),
            status_code: None,
            details: None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        self.kind == ErrorKind::AuthExpired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failure_keeps_low_level_message_in_details() {
        let err = ApiError::network("connection reset by peer");
        assert_eq!(err.kind, ErrorKind::NetworkFailure);
        assert_eq!(err.message, "API request failed: connection reset by peer");
        assert_eq!(err.details.as_deref(), Some("connection reset by peer"));
        assert_eq!(err.status_code, None);
    }

    #[test]
    fn html_login_page_is_reported_as_401() {
        let err = ApiError::session_expired("text/html; charset=utf-8");
        assert!(err.is_auth_expired());
        assert_eq!(err.status_code, Some(401));
        assert_eq!(err.to_string(), SESSION_EXPIRED_MESSAGE);
    }
}
