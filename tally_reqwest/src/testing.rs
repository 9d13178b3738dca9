//! An in-process stand-in for the API, for use in tests
//!
//! [`MockBackend`] is a terminal [`Middleware`]: requests routed through it
//! never leave the process. Responses are scripted per method and path, and
//! every request is recorded for later inspection.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use reqwest::{header, Method, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};

use crate::{ApiClient, Termination, TerminationHandler};

#[derive(Clone, Debug)]
enum Reply {
    Respond {
        status: u16,
        body: Bytes,
        content_type: &'static str,
    },
    TransportFailure,
}

/// A scripted response
#[derive(Clone, Debug)]
pub struct MockResponse {
    reply: Reply,
    delay: Option<Duration>,
}

impl MockResponse {
    /// Responds with a JSON body
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::bytes(status, body, "application/json")
    }

    /// Responds with an empty body
    pub fn empty(status: u16) -> Self {
        Self::bytes(status, Bytes::new(), "application/json")
    }

    /// Responds with an arbitrary body
    pub fn bytes(status: u16, body: impl Into<Bytes>, content_type: &'static str) -> Self {
        Self {
            reply: Reply::Respond {
                status,
                body: body.into(),
                content_type,
            },
            delay: None,
        }
    }

    /// Fails as though the server could not be reached
    pub fn transport_failure() -> Self {
        Self {
            reply: Reply::TransportFailure,
            delay: None,
        }
    }

    /// Waits before replying
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request observed by the backend
#[derive(Clone, Debug)]
pub struct SeenRequest {
    /// The request method
    pub method: Method,
    /// The URL path
    pub path: String,
    /// The raw query string, if any
    pub query: Option<String>,
    /// The `Authorization` header, if any
    pub authorization: Option<String>,
    /// The `Content-Type` header, if any
    pub content_type: Option<String>,
    /// The body parsed as JSON, or `null` when absent or not JSON
    pub body: serde_json::Value,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<(Method, String), VecDeque<MockResponse>>,
    seen: Vec<SeenRequest>,
}

/// A scripted API backend
///
/// Responses registered for the same route are served in order, with the last
/// one repeated for any further requests. Unscripted routes respond `404`.
#[derive(Clone, Debug, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    /// The base URL clients built by this backend use
    pub const BASE_URL: &'static str = "https://attendance.test";

    /// Constructs a backend with no routes
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response for `method` and `path`
    pub fn on(&self, method: Method, path: &str, response: MockResponse) -> &Self {
        self.state()
            .routes
            .entry((method, path.to_owned()))
            .or_default()
            .push_back(response);
        self
    }

    /// Every request seen, in order
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state().seen.clone()
    }

    /// The most recent request seen
    pub fn last_request(&self) -> Option<SeenRequest> {
        self.state().seen.last().cloned()
    }

    /// The number of requests seen for `method` and `path`
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.state()
            .seen
            .iter()
            .filter(|r| r.method == *method && r.path == path)
            .count()
    }

    /// An HTTP client whose requests are answered by this backend
    pub fn http_client(&self) -> ClientWithMiddleware {
        ClientBuilder::new(reqwest::Client::new())
            .with(self.clone())
            .build()
    }

    /// An API client rooted at [`BASE_URL`][Self::BASE_URL]
    pub fn api_client(&self) -> ApiClient {
        ApiClient::new(self.http_client(), self.base_url())
    }

    /// The base URL as a parsed URL
    pub fn base_url(&self) -> reqwest::Url {
        reqwest::Url::parse(Self::BASE_URL).expect("static base URL is valid")
    }

    fn next_response(&self, method: &Method, path: &str) -> Option<MockResponse> {
        let mut state = self.state();
        let queue = state.routes.get_mut(&(method.clone(), path.to_owned()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn record(&self, req: &Request) {
        let header_str = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        let seen = SeenRequest {
            method: req.method().clone(),
            path: req.url().path().to_owned(),
            query: req.url().query().map(str::to_owned),
            authorization: header_str(header::AUTHORIZATION),
            content_type: header_str(header::CONTENT_TYPE),
            body: req
                .body()
                .and_then(reqwest::Body::as_bytes)
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or(serde_json::Value::Null),
        };

        self.state().seen.push(seen);
    }
}

#[async_trait::async_trait]
impl Middleware for MockBackend {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.record(&req);

        let response = self
            .next_response(req.method(), req.url().path())
            .unwrap_or_else(|| {
                MockResponse::json(
                    404,
                    format!(
                        r#"{{"message":"no route for {} {}"}}"#,
                        req.method(),
                        req.url().path()
                    ),
                )
            });

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        match response.reply {
            Reply::TransportFailure => Err(reqwest_middleware::Error::middleware(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Reply::Respond {
                status,
                body,
                content_type,
            } => {
                let resp = http::Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(body)
                    .map_err(reqwest_middleware::Error::middleware)?;
                Ok(resp.into())
            }
        }
    }
}

/// A termination handler that records every termination it receives
#[derive(Clone, Debug, Default)]
pub struct TerminationLog {
    seen: Arc<Mutex<Vec<Termination>>>,
}

impl TerminationLog {
    /// Constructs an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// The terminations received, in order
    pub fn terminations(&self) -> Vec<Termination> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TerminationHandler for TerminationLog {
    fn terminate(&self, termination: Termination) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(termination);
    }
}
