//! Durable storage of the session's tokens and identity
//!
//! The [`TokenStore`] holds the four pieces of session state: the access token,
//! the refresh token, and the signed-in administrator's UUID and e-mail. It has
//! no business logic of its own beyond choosing how long each value should be
//! kept. Where the values live is decided by a [`TokenStorage`] backend, so the
//! persistence medium can be swapped without touching refresh logic.

use std::{error, fmt, io, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error;

use crate::{
    jwt, AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, UserEmail, UserEmailRef,
    UserUuid, UserUuidRef,
};

#[cfg(feature = "file")]
mod file;
mod in_memory;

#[cfg(feature = "file")]
pub use file::FileStorage;
pub use in_memory::InMemoryStorage;

/// The default lifetime of a stored refresh token
pub const DEFAULT_REFRESH_TOKEN_LIFETIME: DurationSecs = DurationSecs::from_days(14);

/// The fixed keys under which session state is persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKey {
    /// The current access token
    AccessToken,
    /// The current refresh token
    RefreshToken,
    /// The signed-in administrator's UUID
    UserUuid,
    /// The signed-in administrator's e-mail
    UserEmail,
}

impl StorageKey {
    /// Every key used by the store
    pub const ALL: [StorageKey; 4] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::UserUuid,
        StorageKey::UserEmail,
    ];

    /// The key's persisted name
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageKey::AccessToken => "access_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::UserUuid => "user_uuid",
            StorageKey::UserEmail => "user_email",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a stored value should be kept
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Discard the value at the given time
    At(UnixTime),
    /// Keep the value only as long as the storage instance lives
    Session,
}

impl Expiry {
    /// Whether a value with this expiry is still valid as of `now`
    #[inline]
    pub fn is_live_at(self, now: UnixTime) -> bool {
        match self {
            Expiry::At(t) => now < t,
            Expiry::Session => true,
        }
    }
}

/// An error reading or writing token storage
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing medium could not be accessed
    #[error("error accessing token storage")]
    Io(#[from] io::Error),
    /// The backing medium holds data that could not be understood
    #[error("token storage contents are corrupt")]
    Corrupt(#[from] serde_json::Error),
    /// A custom backend failure
    #[error("token storage backend failed")]
    Backend(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A persistence medium for session state
///
/// Implementations must treat values past their expiry as absent, and must apply
/// [`remove()`][TokenStorage::remove] to all given keys as one operation, so
/// that no reader observes a partially cleared session.
#[async_trait]
pub trait TokenStorage: fmt::Debug + Send + Sync {
    /// Reads the value stored under `key`
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key` until `expiry`
    async fn set(&self, key: StorageKey, value: &str, expiry: Expiry) -> Result<(), StorageError>;

    /// Removes all of `keys`
    async fn remove(&self, keys: &[StorageKey]) -> Result<(), StorageError>;
}

/// Typed access to the session's persisted tokens and identity
#[derive(Clone)]
pub struct TokenStore<C = System> {
    storage: Arc<dyn TokenStorage>,
    refresh_token_lifetime: DurationSecs,
    clock: C,
}

impl TokenStore<System> {
    /// Constructs a new token store over a storage backend
    ///
    /// Refresh tokens are kept for 14 days by default.
    pub fn new(storage: impl TokenStorage + 'static) -> Self {
        Self::from_shared(Arc::new(storage))
    }

    /// Constructs a new token store over a shared storage backend
    pub fn from_shared(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            storage,
            refresh_token_lifetime: DEFAULT_REFRESH_TOKEN_LIFETIME,
            clock: System,
        }
    }
}

impl<C> TokenStore<C> {
    /// Sets how long refresh tokens are kept after being stored
    pub fn with_refresh_token_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.refresh_token_lifetime = lifetime;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenStore<D> {
        TokenStore {
            storage: self.storage,
            refresh_token_lifetime: self.refresh_token_lifetime,
            clock,
        }
    }

    /// The underlying storage backend
    pub fn storage(&self) -> &Arc<dyn TokenStorage> {
        &self.storage
    }
}

impl<C: Clock> TokenStore<C> {
    /// Reads the current access token
    pub async fn access_token(&self) -> Result<Option<AccessToken>, StorageError> {
        Ok(self
            .storage
            .get(StorageKey::AccessToken)
            .await?
            .map(AccessToken::new))
    }

    /// Stores a new access token
    ///
    /// The value is kept until the token's own `exp` claim when it can be read,
    /// and for the lifetime of the storage otherwise.
    pub async fn set_access_token(&self, token: &AccessTokenRef) -> Result<(), StorageError> {
        let expiry = match jwt::expiry(token.as_str()) {
            Ok(exp) => Expiry::At(exp),
            Err(error) => {
                tracing::debug!(%error, "access token expiry unreadable, storing for session");
                Expiry::Session
            }
        };

        self.storage
            .set(StorageKey::AccessToken, token.as_str(), expiry)
            .await
    }

    /// Reads the current refresh token
    pub async fn refresh_token(&self) -> Result<Option<RefreshToken>, StorageError> {
        Ok(self
            .storage
            .get(StorageKey::RefreshToken)
            .await?
            .map(RefreshToken::new))
    }

    /// Stores a new refresh token for the configured refresh token lifetime
    pub async fn set_refresh_token(&self, token: &RefreshTokenRef) -> Result<(), StorageError> {
        let expiry = Expiry::At(self.clock.now() + self.refresh_token_lifetime);
        self.storage
            .set(StorageKey::RefreshToken, token.as_str(), expiry)
            .await
    }

    /// Reads the signed-in administrator's UUID
    pub async fn user_uuid(&self) -> Result<Option<UserUuid>, StorageError> {
        Ok(self
            .storage
            .get(StorageKey::UserUuid)
            .await?
            .map(UserUuid::new))
    }

    /// Stores the signed-in administrator's UUID
    pub async fn set_user_uuid(&self, uuid: &UserUuidRef) -> Result<(), StorageError> {
        self.storage
            .set(StorageKey::UserUuid, uuid.as_str(), Expiry::Session)
            .await
    }

    /// Reads the signed-in administrator's e-mail
    pub async fn user_email(&self) -> Result<Option<UserEmail>, StorageError> {
        Ok(self
            .storage
            .get(StorageKey::UserEmail)
            .await?
            .map(UserEmail::new))
    }

    /// Stores the signed-in administrator's e-mail
    pub async fn set_user_email(&self, email: &UserEmailRef) -> Result<(), StorageError> {
        self.storage
            .set(StorageKey::UserEmail, email.as_str(), Expiry::Session)
            .await
    }

    /// Stores the credentials and identity returned by a successful sign-in
    pub async fn set_identity(
        &self,
        refresh_token: &RefreshTokenRef,
        uuid: Option<&UserUuidRef>,
        email: Option<&UserEmailRef>,
    ) -> Result<(), StorageError> {
        self.set_refresh_token(refresh_token).await?;
        if let Some(uuid) = uuid {
            self.set_user_uuid(uuid).await?;
        }
        if let Some(email) = email {
            self.set_user_email(email).await?;
        }
        Ok(())
    }

    /// Removes every piece of session state
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(&StorageKey::ALL).await?;
        tracing::debug!("cleared session tokens");
        Ok(())
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("storage", &self.storage)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("clock", &self.clock)
            .finish()
    }
}
