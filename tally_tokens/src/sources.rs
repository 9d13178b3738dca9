//! Access token sources

use std::{error, fmt};

use async_trait::async_trait;

use crate::{AccessToken, RefreshTokenRef};

#[cfg(feature = "http")]
pub mod http;

/// An asynchronous exchange of a refresh token for a new access token
#[async_trait]
pub trait RefreshSource: fmt::Debug + Send + Sync {
    /// Requests a new access token using `refresh_token` as the credential
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<AccessToken, Box<dyn error::Error + Send + Sync + 'static>>;
}
