//! Authenticated calls with refresh-and-retry and session termination

use std::{fmt, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{
    header::{self, HeaderValue, InvalidHeaderValue},
    StatusCode,
};
use serde::de::DeserializeOwned;
use tally_clock::{Clock, System};
use tally_tokens::{AccessTokenRef, RefreshCoordinator, RefreshError};
use thiserror::Error;

use crate::request::{self, ApiClient, RequestError, RequestOptions};

/// A reason the client ended the session on its own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Termination {
    /// The session could not be renewed and the user must sign in again
    SessionExpired,
    /// The API could not be reached or its gateway reported it unavailable
    UpstreamUnavailable,
}

impl Termination {
    /// The surface the user should be sent to
    pub fn path(self) -> &'static str {
        match self {
            Self::SessionExpired => "/login",
            Self::UpstreamUnavailable => "/server-error",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SessionExpired => f.write_str("session expired"),
            Self::UpstreamUnavailable => f.write_str("upstream unavailable"),
        }
    }
}

/// Receives notice when the client terminates a session
///
/// Handlers are invoked before the failing call returns, so the application
/// can begin navigating away while the caller unwinds.
pub trait TerminationHandler: Send + Sync {
    /// Reacts to a termination
    fn terminate(&self, termination: Termination);
}

impl<F> TerminationHandler for F
where
    F: Fn(Termination) + Send + Sync,
{
    fn terminate(&self, termination: Termination) {
        self(termination)
    }
}

/// A termination handler that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTermination;

impl TerminationHandler for LogTermination {
    fn terminate(&self, termination: Termination) {
        tracing::warn!(%termination, redirect = termination.path(), "session terminated");
    }
}

/// An error from an authenticated call
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request failed and was surfaced unchanged
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The session could not be renewed
    #[error("Unauthorized")]
    SessionExpired(#[source] RefreshError),
    /// The stored access token cannot be sent in a header
    #[error("access token is not a valid header value")]
    InvalidAccessToken(#[source] InvalidHeaderValue),
}

impl ClientError {
    /// The numeric status of the failure
    ///
    /// Transport failures report `0`. An expired session reports `401`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Request(error) => error.status_code(),
            Self::SessionExpired(_) => StatusCode::UNAUTHORIZED.as_u16(),
            Self::InvalidAccessToken(_) => 0,
        }
    }

    /// The underlying request error, if the request itself failed
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the session has ended and the user must sign in again
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

fn bearer(token: &AccessTokenRef) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

fn authorize(
    mut options: RequestOptions,
    token: &AccessTokenRef,
) -> Result<RequestOptions, ClientError> {
    let value = bearer(token).map_err(ClientError::InvalidAccessToken)?;
    options.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(options)
}

/// Issues API calls on behalf of the signed-in administrator
///
/// Each call obtains a usable access token from the session's
/// [`RefreshCoordinator`] and sends it as a bearer credential. A call the
/// server rejects as unauthorized is retried once after a forced refresh.
/// If the session cannot be renewed, or the API is unreachable, the
/// [`TerminationHandler`] is notified before the error is returned.
pub struct AuthenticatedClient<C = System> {
    api: ApiClient,
    coordinator: RefreshCoordinator<C>,
    on_terminate: Arc<dyn TerminationHandler>,
}

impl<C> Clone for AuthenticatedClient<C> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            coordinator: self.coordinator.clone(),
            on_terminate: Arc::clone(&self.on_terminate),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for AuthenticatedClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("api", &self.api)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl<C> AuthenticatedClient<C> {
    /// Constructs a new client that logs terminations
    pub fn new(api: ApiClient, coordinator: RefreshCoordinator<C>) -> Self {
        Self {
            api,
            coordinator,
            on_terminate: Arc::new(LogTermination),
        }
    }

    /// Replaces the handler notified when the session is terminated
    pub fn with_termination_handler(mut self, handler: impl TerminationHandler + 'static) -> Self {
        self.on_terminate = Arc::new(handler);
        self
    }

    /// The unauthenticated client used for each round trip
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// The session's refresh coordinator
    pub fn coordinator(&self) -> &RefreshCoordinator<C> {
        &self.coordinator
    }

    fn terminate(&self, termination: Termination) {
        tracing::debug!(%termination, "terminating session");
        self.on_terminate.terminate(termination);
    }

    fn session_expired(&self, error: RefreshError) -> ClientError {
        tracing::warn!(%error, "unable to renew session");
        self.terminate(Termination::SessionExpired);
        ClientError::SessionExpired(error)
    }
}

impl<C: Clock + Send + Sync> AuthenticatedClient<C> {
    /// Issues an authenticated request and decodes the JSON response body
    pub async fn http<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ClientError> {
        let (status, body) = self.send(path, options).await?;
        Ok(request::decode(status, &body)?)
    }

    /// Issues an authenticated request and returns the raw response body
    ///
    /// Used for binary exports such as spreadsheets.
    pub async fn download(&self, path: &str, options: RequestOptions) -> Result<Bytes, ClientError> {
        let (_, body) = self.send(path, options).await?;
        Ok(body)
    }

    #[tracing::instrument(skip(self, options), fields(method = %options.method()))]
    async fn send(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let token = match self.coordinator.ensure_access_token().await {
            Ok(token) => token,
            Err(error) => return Err(self.session_expired(error)),
        };

        let error = match self
            .api
            .round_trip(path, authorize(options.clone(), &token)?)
            .await
        {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if error.is_upstream_outage() {
            tracing::error!(
                %error,
                status = error.status_code(),
                "API is unavailable"
            );
            self.terminate(Termination::UpstreamUnavailable);
            return Err(error.into());
        }

        if !error.is_unauthorized() {
            return Err(error.into());
        }

        tracing::debug!("access token rejected, forcing refresh");
        let token = match self.coordinator.force_refresh(&token).await {
            Ok(token) => token,
            Err(error) => return Err(self.session_expired(error)),
        };

        // A second rejection is the caller's to handle
        Ok(self
            .api
            .round_trip(path, authorize(options, &token)?)
            .await?)
    }
}
