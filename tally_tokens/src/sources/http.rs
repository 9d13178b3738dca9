//! A refresh source that exchanges refresh tokens with the API's token endpoint

use std::error;

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;

use super::RefreshSource;
use crate::{AccessToken, RefreshTokenRef};

mod dto;

/// Exchanges refresh tokens for access tokens over HTTP
///
/// The refresh token is sent as the bearer credential on a `GET` to the token
/// endpoint, which responds with `{"data": {"access_token": "…"}}`.
#[derive(Clone, Debug)]
pub struct HttpRefreshSource {
    client: ClientWithMiddleware,
    token_url: reqwest::Url,
}

impl HttpRefreshSource {
    /// Constructs a new refresh source against the given token endpoint
    pub fn new(client: ClientWithMiddleware, token_url: reqwest::Url) -> Self {
        Self { client, token_url }
    }

    /// The token endpoint used by this source
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }
}

/// An error while attempting to exchange a refresh token
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The authority rejected the exchange
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest_middleware::Error),
}

impl TokenRequestError {
    /// The HTTP status returned by the authority, if one was received
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::ErrorWithBody { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[tracing::instrument(err, skip(client, token_url, refresh_token), fields(token_url = %token_url))]
async fn request_token(
    client: &ClientWithMiddleware,
    token_url: reqwest::Url,
    refresh_token: &RefreshTokenRef,
) -> Result<AccessToken, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let resp = client
        .get(token_url)
        .bearer_auth(refresh_token.as_str())
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let envelope: dto::TokenEnvelope = serde_json::from_slice(&body)?;
    let access_token = envelope.data.access_token.to_owned();

    tracing::info!("received new access token");

    Ok(access_token)
}

#[async_trait]
impl RefreshSource for HttpRefreshSource {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<AccessToken, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(request_token(&self.client, self.token_url.clone(), refresh_token).await?)
    }
}
