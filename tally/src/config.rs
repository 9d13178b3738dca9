//! Session configuration

use std::{error, time::Duration};

use reqwest::Url;
use tally_clock::DurationSecs;
use thiserror::Error;

/// The default path of the token issuance endpoint
pub const DEFAULT_TOKEN_PATH: &str = "/api/auth/access_token";

/// The default path of the current session's permission list
pub const DEFAULT_PERMISSIONS_PATH: &str = "/api/auth/role/my";

/// An invalid session configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL could not be parsed
    #[error("invalid API base URL")]
    InvalidBaseUrl(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The base URL cannot have paths joined onto it
    #[error("API base URL `{0}` cannot be used as a base")]
    CannotBeABase(Url),
    /// The multi-factor polling bounds are inverted
    #[error("MFA poll delay minimum {min:?} exceeds maximum {max:?}")]
    InvalidPollBounds {
        /// The configured minimum delay
        min: Duration,
        /// The configured maximum delay
        max: Duration,
    },
}

/// Configuration for a signed-in session against the API
///
/// Defaults:
///
/// * expiry buffer: 30 seconds
/// * refresh token lifetime: 14 days
/// * token path: `/api/auth/access_token`
/// * permissions path: `/api/auth/role/my`
/// * MFA poll delay: between 5 and 8 seconds
#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: Url,
    expiry_buffer: DurationSecs,
    refresh_token_lifetime: DurationSecs,
    token_path: String,
    permissions_path: String,
    mfa_poll_min: Duration,
    mfa_poll_max: Duration,
}

impl SessionConfig {
    /// Constructs a configuration with defaults for the API at `base_url`
    pub fn new(base_url: Url) -> Result<Self, ConfigError> {
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::CannotBeABase(base_url));
        }

        Ok(Self {
            base_url,
            expiry_buffer: tally_tokens::jwt::DEFAULT_EXPIRY_BUFFER,
            refresh_token_lifetime: tally_tokens::store::DEFAULT_REFRESH_TOKEN_LIFETIME,
            token_path: DEFAULT_TOKEN_PATH.to_owned(),
            permissions_path: DEFAULT_PERMISSIONS_PATH.to_owned(),
            mfa_poll_min: Duration::from_secs(5),
            mfa_poll_max: Duration::from_secs(8),
        })
    }

    /// Parses `base_url` and constructs a configuration with defaults
    pub fn from_base_url(base_url: &str) -> Result<Self, ConfigError> {
        let base_url =
            Url::parse(base_url).map_err(|error| ConfigError::InvalidBaseUrl(error.into()))?;
        Self::new(base_url)
    }

    /// Sets how long before hard expiry an access token is treated as expired
    pub fn with_expiry_buffer(mut self, buffer: DurationSecs) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// Sets how long a stored refresh token is kept
    pub fn with_refresh_token_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.refresh_token_lifetime = lifetime;
        self
    }

    /// Sets the path of the token issuance endpoint
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Sets the path of the current session's permission list
    pub fn with_permissions_path(mut self, path: impl Into<String>) -> Self {
        self.permissions_path = path.into();
        self
    }

    /// Sets the bounds of the random delay between multi-factor status checks
    pub fn with_mfa_poll_delay(mut self, min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidPollBounds { min, max });
        }
        self.mfa_poll_min = min;
        self.mfa_poll_max = max;
        Ok(self)
    }

    /// The root URL of the API
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The access token expiry buffer
    pub fn expiry_buffer(&self) -> DurationSecs {
        self.expiry_buffer
    }

    /// The refresh token lifetime
    pub fn refresh_token_lifetime(&self) -> DurationSecs {
        self.refresh_token_lifetime
    }

    /// The path of the token issuance endpoint
    pub fn token_path(&self) -> &str {
        &self.token_path
    }

    /// The path of the current session's permission list
    pub fn permissions_path(&self) -> &str {
        &self.permissions_path
    }

    /// The bounds of the delay between multi-factor status checks
    pub fn mfa_poll_delay(&self) -> (Duration, Duration) {
        (self.mfa_poll_min, self.mfa_poll_max)
    }
}
