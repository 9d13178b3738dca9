//! Unauthenticated round trips with uniform error classification

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode, Url,
};
use reqwest_middleware::ClientWithMiddleware;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// The options for a single API request
///
/// Requests default to `GET` with a JSON content type. Headers supplied here
/// replace any default header of the same name.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    method: Method,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestOptions {
    /// Options for a request with the given method
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Options for a `GET` request
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// Options for a `POST` request
    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// Options for a `PUT` request
    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    /// Options for a `DELETE` request
    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Sets a header, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Appends a query parameter when `value` is present
    pub fn with_optional_query(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with_query(key, value),
            None => self,
        }
    }

    /// Sets a raw request body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as the JSON request body
    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(body).map_err(RequestError::Encode)?;
        Ok(self.with_body(body))
    }

    /// The request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The headers supplied by the caller
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The query parameters to append
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// The request body, if any
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// An error from a single API round trip
#[derive(Debug, Error)]
pub enum RequestError {
    /// The server could not be reached, or the response could not be read
    #[error("unable to reach the server")]
    Transport(#[source] reqwest_middleware::Error),
    /// The server responded with a non-success status
    #[error("{message}")]
    Status {
        /// The response status
        status: StatusCode,
        /// The human-readable message extracted from the response
        message: String,
    },
    /// The request body could not be encoded
    #[error("unable to encode request body")]
    Encode(#[source] serde_json::Error),
    /// A success response carried a body that could not be decoded
    #[error("unable to decode response body")]
    Decode {
        /// The response status
        status: StatusCode,
        /// The decoding failure
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// The numeric status of the failure
    ///
    /// `0` is reported when no response was received.
    pub fn status_code(&self) -> u16 {
        self.status().map_or(0, |s| s.as_u16())
    }

    /// The response status, if a response was received
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(_) | Self::Encode(_) => None,
            Self::Status { status, .. } | Self::Decode { status, .. } => Some(*status),
        }
    }

    /// The message extracted from an error response
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Whether the server was unreachable
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the failure indicates the upstream service is unavailable
    ///
    /// Transport failures and `502`, `503` and `504` responses qualify.
    pub fn is_upstream_outage(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            _ => matches!(
                self.status(),
                Some(
                    StatusCode::BAD_GATEWAY
                        | StatusCode::SERVICE_UNAVAILABLE
                        | StatusCode::GATEWAY_TIMEOUT
                )
            ),
        }
    }

    /// Whether the server rejected the request's credentials
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Status { status, message } => {
                *status == StatusCode::UNAUTHORIZED || message == "Unauthorized"
            }
            _ => false,
        }
    }
}

/// Extracts a human-readable message from an error response body
///
/// Looks for `{"error": {"message": …}}`, then `{"message": …}`, then falls
/// back to the raw body text, and finally to a generic message naming the
/// status.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .filter(|m| !m.is_empty())
                .or_else(|| {
                    value
                        .get("message")
                        .and_then(serde_json::Value::as_str)
                        .filter(|m| !m.is_empty())
                })
                .map(str::to_owned)
        });

    from_json
        .or_else(|| (!body.trim().is_empty()).then(|| body.to_owned()))
        .unwrap_or_else(|| format!("Request failed: {}", status.as_u16()))
}

pub(crate) fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, RequestError> {
    let body: &[u8] = if status == StatusCode::NO_CONTENT {
        b"{}"
    } else {
        body
    };

    serde_json::from_slice(body).map_err(|source| RequestError::Decode { status, source })
}

/// Issues requests against the API without attaching credentials
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Constructs a new client for the API rooted at `base_url`
    pub fn new(client: impl Into<ClientWithMiddleware>, base_url: Url) -> Self {
        Self {
            client: client.into(),
            base_url,
        }
    }

    /// The root URL of the API
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client
    pub fn http_client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    /// Resolves an API path against the base URL
    ///
    /// Any path prefix on the base URL is preserved. A query string on `path`
    /// replaces any query on the base URL; parameters from [`RequestOptions`]
    /// are appended after it.
    pub fn url(&self, path: &str) -> Url {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            self.base_url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        if query.is_some() {
            url.set_query(query.filter(|q| !q.is_empty()));
        }
        url
    }

    /// Issues a request and decodes the JSON response body
    ///
    /// A `204 No Content` response decodes as an empty JSON object.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let (status, body) = self.round_trip(path, options).await?;
        decode(status, &body)
    }

    /// Issues a request and returns the raw response body
    pub async fn request_bytes(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Bytes, RequestError> {
        let (_, body) = self.round_trip(path, options).await?;
        Ok(body)
    }

    #[tracing::instrument(skip(self, options), fields(method = %options.method))]
    pub(crate) async fn round_trip(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<(StatusCode, Bytes), RequestError> {
        let RequestOptions {
            method,
            headers,
            query,
            body,
        } = options;

        let mut merged = HeaderMap::new();
        merged.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        merged.extend(headers);

        let mut builder = self.client.request(method, self.url(path)).headers(merged);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(|error| {
            tracing::debug!(%error, "request did not reach the server");
            RequestError::Transport(error)
        })?;

        let status = resp.status();
        tracing::debug!(response.status = status.as_u16(), "received response");

        let body = resp
            .bytes()
            .await
            .map_err(|error| RequestError::Transport(error.into()))?;

        if !status.is_success() {
            let message = error_message(status, &String::from_utf8_lossy(&body));
            return Err(RequestError::Status { status, message });
        }

        Ok((status, body))
    }
}
