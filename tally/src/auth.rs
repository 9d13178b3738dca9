//! Signing in, multi-factor approval, and signing out

use std::fmt;

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{ApiClient, AuthenticatedClient, RequestError, RequestOptions};
use tally_tokens::{
    store::{StorageError, TokenStore},
    MfaToken, RefreshToken, UserEmail, UserUuid,
};
use thiserror::Error;

use crate::poll::PollDelay;

const LOGIN_PATH: &str = "/api/auth/login";
const MFA_STATUS_PATH: &str = "/api/auth/mfa_token";
const LOGOUT_PATH: &str = "/api/auth/logout";

/// Credentials submitted to sign in
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    /// The administrator's username
    pub username: String,
    /// The administrator's password
    pub password: String,
    /// The response token from the captcha challenge
    #[serde(rename = "captcha-response")]
    pub captcha_response: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"***PASSWORD***")
            .field("captcha_response", &"***CAPTCHA***")
            .finish()
    }
}

/// The identity of a signed-in administrator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    /// The administrator's UUID
    pub uuid: Option<UserUuid>,
    /// The administrator's username
    pub email: Option<UserEmail>,
}

/// A pending multi-factor approval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaChallenge {
    /// Identifies the approval session
    pub session_uuid: String,
    /// The one-time token paired with the approval session
    pub token: MfaToken,
}

/// The result of submitting credentials
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The administrator is signed in
    Authenticated(Identity),
    /// The sign-in must be approved on another device
    MfaRequired(MfaChallenge),
}

/// The state of a multi-factor approval
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MfaStatus {
    /// Approved; the administrator is signed in
    Approved(Identity),
    /// Not yet decided
    Pending,
    /// Rejected on the approving device
    Rejected(String),
    /// No longer valid
    Expired(String),
}

/// An error signing in
#[derive(Debug, Error)]
pub enum LoginError {
    /// The username or password was left empty
    #[error("Please fill in all fields.")]
    MissingCredentials,
    /// The captcha was not completed
    #[error("Please complete the captcha.")]
    MissingCaptcha,
    /// The request was refused or could not be sent
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The response carried neither a session nor a challenge
    #[error("unexpected response from the sign-in endpoint")]
    UnexpectedResponse,
    /// The multi-factor approval was rejected
    #[error("{0}")]
    MfaRejected(String),
    /// The multi-factor approval expired
    #[error("{0}")]
    MfaExpired(String),
    /// The session could not be stored
    #[error("unable to store session tokens")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<SessionData>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionData {
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    #[serde(default)]
    admin_username: Option<UserEmail>,
    #[serde(default)]
    admin_uuid: Option<UserUuid>,
    #[serde(default)]
    mfa_session_uuid: Option<String>,
    #[serde(default)]
    mfa_token: Option<MfaToken>,
}

async fn establish<C: Clock>(
    store: &TokenStore<C>,
    refresh_token: &RefreshToken,
    admin_uuid: Option<UserUuid>,
    admin_username: Option<UserEmail>,
) -> Result<Identity, StorageError> {
    store.clear().await?;
    store
        .set_identity(
            refresh_token,
            admin_uuid.as_deref(),
            admin_username.as_deref(),
        )
        .await?;

    Ok(Identity {
        uuid: admin_uuid,
        email: admin_username,
    })
}

/// Submits credentials to sign in
///
/// On direct success the refresh token and identity are stored. If the
/// account requires multi-factor approval, the challenge is returned for use
/// with [`check_mfa()`] or [`await_mfa_approval()`].
#[tracing::instrument(skip(api, store, request), fields(username = %request.username))]
pub async fn login<C: Clock>(
    api: &ApiClient,
    store: &TokenStore<C>,
    request: &LoginRequest,
) -> Result<LoginOutcome, LoginError> {
    if request.username.is_empty() || request.password.is_empty() {
        return Err(LoginError::MissingCredentials);
    }
    if request.captcha_response.is_empty() {
        return Err(LoginError::MissingCaptcha);
    }

    let envelope: Envelope = api
        .request(LOGIN_PATH, RequestOptions::post().with_json(request)?)
        .await?;
    let data = envelope.data.unwrap_or_default();

    let mfa_required = envelope
        .message
        .as_deref()
        .is_some_and(|m| m.contains("MFA required"));

    match data {
        SessionData {
            mfa_session_uuid: Some(session_uuid),
            mfa_token: Some(token),
            ..
        } if mfa_required => {
            tracing::info!("multi-factor approval required");
            Ok(LoginOutcome::MfaRequired(MfaChallenge {
                session_uuid,
                token,
            }))
        }
        SessionData {
            refresh_token: Some(refresh_token),
            admin_uuid,
            admin_username,
            ..
        } => {
            let identity = establish(store, &refresh_token, admin_uuid, admin_username).await?;
            tracing::info!("signed in");
            Ok(LoginOutcome::Authenticated(identity))
        }
        _ => Err(LoginError::UnexpectedResponse),
    }
}

/// Checks once whether a multi-factor approval has been decided
///
/// Once approved, the refresh token and identity are stored. Errors that do
/// not indicate rejection or expiry are treated as still pending.
pub async fn check_mfa<C: Clock>(
    api: &ApiClient,
    store: &TokenStore<C>,
    challenge: &MfaChallenge,
) -> Result<MfaStatus, LoginError> {
    let options = RequestOptions::get()
        .with_query("mfa_session_uuid", &challenge.session_uuid)
        .with_query("mfa_token", challenge.token.as_str());

    match api.request::<Envelope>(MFA_STATUS_PATH, options).await {
        Ok(Envelope {
            data:
                Some(SessionData {
                    refresh_token: Some(refresh_token),
                    admin_uuid,
                    admin_username,
                    ..
                }),
            ..
        }) => {
            let identity = establish(store, &refresh_token, admin_uuid, admin_username).await?;
            tracing::info!("multi-factor approval granted");
            Ok(MfaStatus::Approved(identity))
        }
        Ok(_) => Ok(MfaStatus::Pending),
        Err(error) => {
            let message = error.to_string();
            if message.contains("rejected") {
                tracing::warn!(%message, "multi-factor approval rejected");
                Ok(MfaStatus::Rejected(message))
            } else if message.contains("expired") {
                tracing::warn!(%message, "multi-factor approval expired");
                Ok(MfaStatus::Expired(message))
            } else {
                tracing::debug!(%error, "multi-factor approval still pending");
                Ok(MfaStatus::Pending)
            }
        }
    }
}

/// Waits until a multi-factor approval is decided
///
/// Checks immediately, then again after each delay produced by `delay`.
#[tracing::instrument(skip_all)]
pub async fn await_mfa_approval<C: Clock>(
    api: &ApiClient,
    store: &TokenStore<C>,
    challenge: &MfaChallenge,
    mut delay: impl PollDelay,
) -> Result<Identity, LoginError> {
    loop {
        match check_mfa(api, store, challenge).await? {
            MfaStatus::Approved(identity) => return Ok(identity),
            MfaStatus::Rejected(message) => return Err(LoginError::MfaRejected(message)),
            MfaStatus::Expired(message) => return Err(LoginError::MfaExpired(message)),
            MfaStatus::Pending => {
                let wait = delay.next_delay();
                tracing::trace!(?wait, "waiting before next approval check");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Signs out
///
/// The server is notified on a best-effort basis. Local session state is
/// cleared whether or not that succeeds.
#[tracing::instrument(skip_all)]
pub async fn logout<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<(), StorageError> {
    if let Err(error) = client
        .http::<serde_json::Value>(LOGOUT_PATH, RequestOptions::post())
        .await
    {
        tracing::warn!(%error, "sign-out request failed, clearing session anyway");
    }

    client.coordinator().store().clear().await?;
    tracing::info!("signed out");
    Ok(())
}
