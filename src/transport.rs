// HTTP transport seam: reqwest in production, a scripted fake in tests

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{Client, Method, Url};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A fully built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Send ambient credentials (cookies) with the request.
    pub include_credentials: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            include_credentials: false,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Raw response as seen before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Low-level failure: DNS, refused connection, timeout, reset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport.
///
/// Keeps two clients: one with a cookie jar for requests that ask for ambient
/// credentials, one without for everything else.
pub struct ReqwestTransport {
    credentialed: Client,
    anonymous: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_jar(timeout, Arc::new(Jar::default()))
    }

    /// Seed the cookie jar with an edge-issued session cookie (`name=value`) for `origin`.
    pub fn with_edge_cookie(timeout: Duration, origin: &Url, cookie: &str) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(cookie, origin);
        Self::with_jar(timeout, jar)
    }

    fn with_jar(timeout: Duration, jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        let credentialed = Client::builder()
            .timeout(timeout)
            .cookie_provider(jar)
            .build()?;
        let anonymous = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            credentialed,
            anonymous,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = if request.include_credentials {
            &self.credentialed
        } else {
            &self.anonymous
        };

        let mut builder = client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            content_type,
            body,
        })
    }
}

/// One scripted reply of [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockReply {
    pub outcome: Result<HttpResponse, TransportError>,
    pub delay: Duration,
}

impl MockReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::raw(status, Some("application/json"), body.to_string())
    }

    pub fn html(status: u16, body: &str) -> Self {
        Self::raw(status, Some("text/html; charset=utf-8"), body.to_string())
    }

    pub fn no_content() -> Self {
        Self::raw(204, None, String::new())
    }

    pub fn raw(status: u16, content_type: Option<&str>, body: String) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string();
        Self {
            outcome: Ok(HttpResponse {
                status,
                status_text,
                content_type: content_type.map(str::to_string),
                body,
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            outcome: Err(TransportError::new(message)),
            delay: Duration::ZERO,
        }
    }

    /// Resolve only after `delay` of (Tokio) time.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = Box<dyn Fn(&HttpRequest, usize) -> MockReply + Send + Sync>;

/// In-memory transport that records every request and answers from a script.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Answer each request with `handler(request, zero_based_call_index)`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, usize) -> MockReply + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay `replies` in order; the last one repeats once the script runs out.
    pub fn sequence(replies: Vec<MockReply>) -> Self {
        Self::new(move |_, index| match replies.get(index).or_else(|| replies.last()) {
            Some(reply) => reply.clone(),
            None => MockReply::failure("mock transport has no scripted replies"),
        })
    }

    pub fn always(reply: MockReply) -> Self {
        Self::sequence(vec![reply])
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            let index = requests.len();
            let reply = (self.handler)(&request, index);
            requests.push(request);
            reply
        };
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new(Method::GET, Url::parse(&format!("http://backend.test{}", path)).unwrap())
    }

    #[tokio::test]
    async fn sequence_repeats_last_reply() {
        let transport = MockTransport::sequence(vec![
            MockReply::json(200, json!({"n": 1})),
            MockReply::json(200, json!({"n": 2})),
        ]);
        let mut bodies = Vec::new();
        for _ in 0..3 {
            bodies.push(transport.send(get("/api/bots")).await.unwrap().body);
        }
        assert_eq!(bodies, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":2}"]);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = get("/api/logs?limit=100&bot=grid").header("Authorization", "Bearer t");
        assert_eq!(request.header_value("authorization"), Some("Bearer t"));
        assert_eq!(request.query_value("bot").as_deref(), Some("grid"));
        assert_eq!(request.query_value("level"), None);
    }
}
