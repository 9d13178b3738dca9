//! A signed-in session against the attendance API

use reqwest_middleware::ClientWithMiddleware;
use tally_clock::{Clock, System};
use tally_reqwest::{ApiClient, AuthenticatedClient, ClientError, TerminationHandler};
use tally_tokens::{
    sources::http::HttpRefreshSource,
    store::{StorageError, TokenStorage, TokenStore},
    JwtInspector, RefreshCoordinator,
};

use crate::{
    auth::{self, Identity, LoginError, LoginOutcome, LoginRequest, MfaChallenge, MfaStatus},
    config::SessionConfig,
    permissions::Permissions,
    poll::{PollDelay, RandomPollDelay},
};

/// Everything needed to sign in and make authenticated calls
///
/// The session owns a plain [`ApiClient`] for sign-in and an
/// [`AuthenticatedClient`] for everything else. Both share the same token
/// store, so credentials stored by [`login()`][Session::login] are used by
/// every later call. Clones share the same tokens and refresh coordinator.
#[derive(Clone, Debug)]
pub struct Session<C = System> {
    config: SessionConfig,
    client: AuthenticatedClient<C>,
}

impl Session<System> {
    /// Constructs a session over `http`, persisting tokens to `storage`
    pub fn new(
        config: SessionConfig,
        http: impl Into<ClientWithMiddleware>,
        storage: impl TokenStorage + 'static,
    ) -> Self {
        let store =
            TokenStore::new(storage).with_refresh_token_lifetime(config.refresh_token_lifetime());
        let inspector = JwtInspector::new(config.expiry_buffer());
        Self::from_parts(config, http, store, inspector)
    }
}

impl<C> Session<C> {
    /// Constructs a session from a prepared token store and inspector
    ///
    /// The inspector's buffer takes precedence over the configured one.
    pub fn from_parts(
        config: SessionConfig,
        http: impl Into<ClientWithMiddleware>,
        store: TokenStore<C>,
        inspector: JwtInspector<C>,
    ) -> Self {
        let api = ApiClient::new(http, config.base_url().clone());
        let source = HttpRefreshSource::new(
            api.http_client().clone(),
            api.url(config.token_path()),
        );
        let coordinator = RefreshCoordinator::new(store, source, inspector);

        Self {
            client: AuthenticatedClient::new(api, coordinator),
            config,
        }
    }

    /// Routes session terminations to `handler`
    pub fn with_termination_handler(mut self, handler: impl TerminationHandler + 'static) -> Self {
        self.client = self.client.with_termination_handler(handler);
        self
    }

    /// The session's configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The unauthenticated client
    pub fn api(&self) -> &ApiClient {
        self.client.api()
    }

    /// The authenticated client, for use with the [`api`][crate::api] functions
    pub fn client(&self) -> &AuthenticatedClient<C> {
        &self.client
    }

    /// The session's token store
    pub fn store(&self) -> &TokenStore<C> {
        self.client.coordinator().store()
    }
}

impl<C: Clock + Send + Sync> Session<C> {
    /// Submits credentials to sign in
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, LoginError> {
        auth::login(self.api(), self.store(), request).await
    }

    /// Checks once whether a multi-factor approval has been decided
    pub async fn check_mfa(&self, challenge: &MfaChallenge) -> Result<MfaStatus, LoginError> {
        auth::check_mfa(self.api(), self.store(), challenge).await
    }

    /// Waits for a multi-factor approval, checking at the configured interval
    pub async fn await_mfa_approval(&self, challenge: &MfaChallenge) -> Result<Identity, LoginError> {
        let (min, max) = self.config.mfa_poll_delay();
        self.await_mfa_approval_with(challenge, RandomPollDelay::new(min, max))
            .await
    }

    /// Waits for a multi-factor approval, checking after each delay from `delay`
    pub async fn await_mfa_approval_with(
        &self,
        challenge: &MfaChallenge,
        delay: impl PollDelay,
    ) -> Result<Identity, LoginError> {
        auth::await_mfa_approval(self.api(), self.store(), challenge, delay).await
    }

    /// Signs out, clearing local session state even if the server cannot be reached
    pub async fn logout(&self) -> Result<(), StorageError> {
        auth::logout(&self.client).await
    }

    /// Whether a refresh token is held
    ///
    /// A held token may still be rejected by the server.
    pub async fn is_signed_in(&self) -> Result<bool, StorageError> {
        Ok(self.store().refresh_token().await?.is_some())
    }

    /// The stored identity of the signed-in administrator
    pub async fn identity(&self) -> Result<Identity, StorageError> {
        Ok(Identity {
            uuid: self.store().user_uuid().await?,
            email: self.store().user_email().await?,
        })
    }

    /// Obtains a fresh access token, refreshing if needed
    ///
    /// Useful for handing a token to another client such as a file downloader.
    pub async fn access_token(&self) -> Result<tally_tokens::AccessToken, ClientError> {
        self.client
            .coordinator()
            .ensure_access_token()
            .await
            .map_err(ClientError::SessionExpired)
    }
}

impl<C: Clock + Send + Sync + 'static> Session<C> {
    /// Starts loading the signed-in administrator's permissions
    pub fn permissions(&self) -> Permissions {
        Permissions::spawn(self.client.clone(), self.config.permissions_path())
    }
}
