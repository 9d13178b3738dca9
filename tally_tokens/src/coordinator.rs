//! Single-flight coordination of refresh token exchanges
//!
//! Any number of callers may ask the [`RefreshCoordinator`] for a usable access
//! token at the same time. When the stored token is missing or about to expire,
//! exactly one of them performs the exchange with the [`RefreshSource`] while the
//! rest wait on the outcome of that same exchange. Every caller present during a
//! refresh episode receives the same token, or the same error.

use std::{
    error, fmt, mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tally_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    jwt::JwtInspector,
    sources::RefreshSource,
    store::{StorageError, TokenStore},
    AccessToken, AccessTokenRef,
};

type Outcome = Result<AccessToken, RefreshError>;

/// An error obtaining a usable access token
///
/// This error is cloneable so that a single failed exchange can be reported to
/// every caller that was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// No refresh token is held, so the session cannot be renewed
    #[error("no refresh token is available for this session")]
    MissingRefreshToken,
    /// The token authority did not issue a new access token
    #[error("refresh token exchange failed")]
    Exchange(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
    /// The token store could not be read or written
    #[error("error accessing token storage")]
    Storage(#[source] Arc<StorageError>),
    /// The caller driving the refresh was dropped before it completed
    #[error("refresh was abandoned before completing")]
    Abandoned,
}

impl From<StorageError> for RefreshError {
    fn from(error: StorageError) -> Self {
        Self::Storage(Arc::new(error))
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    refreshing: bool,
    waitlist: Vec<oneshot::Sender<Outcome>>,
}

#[derive(Debug)]
enum Role<'a> {
    Leader(Episode<'a>),
    Follower(oneshot::Receiver<Outcome>),
}

/// Leadership of a single refresh episode
///
/// Releases the waitlist when finished. If dropped without finishing, waiters
/// are released with [`RefreshError::Abandoned`].
#[derive(Debug)]
struct Episode<'a> {
    state: &'a Mutex<RefreshState>,
    released: bool,
}

impl Episode<'_> {
    fn finish(mut self, outcome: Outcome) -> Outcome {
        release(self.state, &outcome);
        self.released = true;
        outcome
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("refresh abandoned before completion");
            release(self.state, &Err(RefreshError::Abandoned));
        }
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(state: &Mutex<RefreshState>, outcome: &Outcome) {
    let waitlist = {
        let mut state = lock(state);
        state.refreshing = false;
        mem::take(&mut state.waitlist)
    };

    if !waitlist.is_empty() {
        tracing::debug!(
            waiters = waitlist.len(),
            success = outcome.is_ok(),
            "releasing callers waiting on refresh"
        );
    }

    for waiter in waitlist {
        let _ = waiter.send(outcome.clone());
    }
}

struct Inner<C> {
    store: TokenStore<C>,
    source: Box<dyn RefreshSource>,
    inspector: JwtInspector<C>,
    state: Mutex<RefreshState>,
}

/// Hands out usable access tokens, refreshing them at most once per episode
///
/// Clones share the same refresh state. A session should hold exactly one
/// coordinator and hand out clones of it.
pub struct RefreshCoordinator<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for RefreshCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for RefreshCoordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.inner.store)
            .field("source", &self.inner.source)
            .field("inspector", &self.inner.inspector)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl<C> RefreshCoordinator<C> {
    /// Constructs a new coordinator over a token store and refresh source
    pub fn new(
        store: TokenStore<C>,
        source: impl RefreshSource + 'static,
        inspector: JwtInspector<C>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source: Box::new(source),
                inspector,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// The token store this coordinator maintains
    pub fn store(&self) -> &TokenStore<C> {
        &self.inner.store
    }

    /// The inspector used to judge access token expiry
    pub fn inspector(&self) -> &JwtInspector<C> {
        &self.inner.inspector
    }

    /// Whether a refresh episode is currently in flight
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.state).refreshing
    }

    fn join_or_lead(&self) -> Role<'_> {
        let mut state = lock(&self.inner.state);
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.waitlist.push(tx);
            tracing::debug!(
                waiters = state.waitlist.len(),
                "joining in-flight refresh"
            );
            Role::Follower(rx)
        } else {
            state.refreshing = true;
            Role::Leader(Episode {
                state: &self.inner.state,
                released: false,
            })
        }
    }
}

async fn follow(rx: oneshot::Receiver<Outcome>) -> Outcome {
    rx.await.unwrap_or(Err(RefreshError::Abandoned))
}

impl<C: Clock + Send + Sync> RefreshCoordinator<C> {
    /// Obtains an access token that is not about to expire
    ///
    /// A stored token that is still valid is returned without any network
    /// activity. Otherwise the caller joins the refresh already in flight, or
    /// starts one.
    ///
    /// If the refresh fails, all session tokens are cleared.
    pub async fn ensure_access_token(&self) -> Result<AccessToken, RefreshError> {
        if let Some(token) = self.valid_access_token().await? {
            return Ok(token);
        }

        match self.join_or_lead() {
            Role::Follower(rx) => follow(rx).await,
            Role::Leader(episode) => {
                // An episode may have completed between the read above and taking the lead
                let outcome = match self.valid_access_token().await {
                    Ok(Some(token)) => Ok(token),
                    Ok(None) => self.exchange().await,
                    Err(error) => Err(error),
                };
                episode.finish(outcome)
            }
        }
    }

    /// Obtains a new access token after the server rejected `rejected`
    ///
    /// The local expiry check is skipped, since the server's rejection is taken
    /// as authoritative. If the store already holds a different valid token by
    /// the time this caller leads an episode, that token is returned instead of
    /// exchanging again.
    pub async fn force_refresh(
        &self,
        rejected: &AccessTokenRef,
    ) -> Result<AccessToken, RefreshError> {
        match self.join_or_lead() {
            Role::Follower(rx) => follow(rx).await,
            Role::Leader(episode) => {
                let outcome = match self.valid_access_token().await {
                    Ok(Some(token)) if token.as_str() != rejected.as_str() => {
                        tracing::debug!("access token already rotated, skipping exchange");
                        Ok(token)
                    }
                    Ok(_) => self.exchange().await,
                    Err(error) => Err(error),
                };
                episode.finish(outcome)
            }
        }
    }

    async fn valid_access_token(&self) -> Result<Option<AccessToken>, RefreshError> {
        let token = self.inner.store.access_token().await?;
        Ok(token.filter(|t| !self.inner.inspector.is_expired(t)))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn exchange(&self) -> Outcome {
        let store = &self.inner.store;

        let Some(refresh_token) = store.refresh_token().await? else {
            tracing::warn!("no refresh token available, clearing session");
            self.clear_session().await;
            return Err(RefreshError::MissingRefreshToken);
        };

        match self.inner.source.refresh(&refresh_token).await {
            Ok(access_token) => {
                if let Err(error) = store.set_access_token(&access_token).await {
                    tracing::warn!(%error, "unable to store refreshed access token, clearing session");
                    self.clear_session().await;
                    return Err(error.into());
                }
                tracing::debug!(
                    expires_in = ?self.inner.inspector.until_expired(&access_token),
                    "stored refreshed access token"
                );
                Ok(access_token)
            }
            Err(error) => {
                tracing::warn!(%error, "refresh token exchange failed, clearing session");
                self.clear_session().await;
                Err(RefreshError::Exchange(Arc::from(error)))
            }
        }
    }

    async fn clear_session(&self) {
        if let Err(error) = self.inner.store.clear().await {
            tracing::warn!(%error, "unable to clear session tokens");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use color_eyre::Result;
    use tally_clock::{DurationSecs, TestClock, UnixTime};
    use tokio::task::JoinSet;

    use super::*;
    use crate::{
        store::{Expiry, InMemoryStorage, StorageError, StorageKey, TokenStorage},
        testing::{token_expiring_at, token_with_payload},
        RefreshTokenRef,
    };

    const NOW: UnixTime = UnixTime(1_700_000_000);

    #[derive(Debug)]
    struct ScriptedSource {
        calls: AtomicUsize,
        delay: Duration,
        issues: Option<AccessToken>,
    }

    impl ScriptedSource {
        fn issuing(token: AccessToken) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                issues: Some(token),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                issues: None,
            })
        }

        fn stalling() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_secs(3600),
                issues: None,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RefreshSource for Arc<ScriptedSource> {
        async fn refresh(
            &self,
            refresh_token: &RefreshTokenRef,
        ) -> Result<AccessToken, Box<dyn error::Error + Send + Sync + 'static>> {
            assert_eq!(refresh_token.as_str(), "refresh");
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.issues
                .clone()
                .ok_or_else(|| "refresh token revoked".into())
        }
    }

    async fn coordinator(
        source: &Arc<ScriptedSource>,
        access_token: Option<&AccessToken>,
    ) -> Result<RefreshCoordinator<TestClock>> {
        let clock = TestClock::new(NOW);
        let store = TokenStore::new(InMemoryStorage::new().with_clock(clock.clone()))
            .with_clock(clock.clone());
        store
            .set_refresh_token(RefreshTokenRef::from_str("refresh"))
            .await?;
        if let Some(token) = access_token {
            store.set_access_token(token).await?;
        }

        Ok(RefreshCoordinator::new(
            store,
            Arc::clone(source),
            JwtInspector::default().with_clock(clock),
        ))
    }

    mod when_the_stored_token_is_valid {
        use super::*;

        #[tokio::test]
        async fn returns_it_without_refreshing() -> Result<()> {
            let current = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(token_expiring_at(NOW + DurationSecs(7200)));
            let coordinator = coordinator(&source, Some(&current)).await?;

            let token = coordinator.ensure_access_token().await?;

            assert_eq!(token, current);
            assert_eq!(source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn force_refresh_exchanges_anyway() -> Result<()> {
            let current = token_expiring_at(NOW + DurationSecs(3600));
            let fresh = token_expiring_at(NOW + DurationSecs(7200));
            let source = ScriptedSource::issuing(fresh.clone());
            let coordinator = coordinator(&source, Some(&current)).await?;

            let token = coordinator.force_refresh(&current).await?;

            assert_eq!(token, fresh);
            assert_eq!(source.calls(), 1);
            Ok(())
        }

        #[tokio::test]
        async fn force_refresh_reuses_an_already_rotated_token() -> Result<()> {
            let rejected = token_expiring_at(NOW + DurationSecs(60));
            let rotated = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(token_expiring_at(NOW + DurationSecs(7200)));
            let coordinator = coordinator(&source, Some(&rotated)).await?;

            let token = coordinator.force_refresh(&rejected).await?;

            assert_eq!(token, rotated);
            assert_eq!(source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn unusual_claims_do_not_force_a_refresh() -> Result<()> {
            let current = AccessToken::new(token_with_payload(&format!(
                r#"{{"exp":{},"sub":42}}"#,
                (NOW + DurationSecs(3600)).0
            )));
            let source = ScriptedSource::issuing(token_expiring_at(NOW + DurationSecs(7200)));
            let coordinator = coordinator(&source, Some(&current)).await?;

            for _ in 0..5 {
                assert_eq!(coordinator.ensure_access_token().await?, current);
            }
            assert_eq!(source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn refreshes_once_time_carries_it_into_the_buffer() -> Result<()> {
            let current = token_expiring_at(NOW + DurationSecs(120));
            let fresh = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(fresh.clone());
            let coordinator = coordinator(&source, Some(&current)).await?;

            assert_eq!(coordinator.ensure_access_token().await?, current);

            coordinator.inspector().clock().advance(DurationSecs(100));

            assert_eq!(coordinator.ensure_access_token().await?, fresh);
            assert_eq!(source.calls(), 1);
            Ok(())
        }
    }

    mod when_the_stored_token_has_expired {
        use super::*;

        #[tokio::test]
        #[tracing_test::traced_test]
        async fn refreshes_and_stores_the_new_token() -> Result<()> {
            let expired = token_expiring_at(NOW - DurationSecs(10));
            let fresh = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(fresh.clone());
            let coordinator = coordinator(&source, Some(&expired)).await?;

            let token = coordinator.ensure_access_token().await?;

            assert_eq!(token, fresh);
            assert_eq!(source.calls(), 1);
            assert_eq!(coordinator.store().access_token().await?, Some(fresh));
            assert!(!coordinator.is_refreshing());
            Ok(())
        }

        #[tokio::test]
        async fn refreshes_tokens_inside_the_buffer() -> Result<()> {
            let expiring = token_expiring_at(NOW + DurationSecs(30));
            let fresh = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(fresh.clone());
            let coordinator = coordinator(&source, Some(&expiring)).await?;

            assert_eq!(coordinator.ensure_access_token().await?, fresh);
            assert_eq!(source.calls(), 1);
            Ok(())
        }

        #[tokio::test]
        async fn concurrent_callers_share_a_single_refresh() -> Result<()> {
            let fresh = token_expiring_at(NOW + DurationSecs(3600));
            let source = ScriptedSource::issuing(fresh.clone());
            let coordinator = coordinator(&source, None).await?;

            let mut callers = JoinSet::new();
            for _ in 0..10 {
                let coordinator = coordinator.clone();
                callers.spawn(async move { coordinator.ensure_access_token().await });
            }

            while let Some(result) = callers.join_next().await {
                assert_eq!(result??, fresh);
            }
            assert_eq!(source.calls(), 1);
            Ok(())
        }
    }

    mod when_the_refresh_fails {
        use super::*;

        #[tokio::test]
        async fn every_waiter_receives_the_failure() -> Result<()> {
            let source = ScriptedSource::failing();
            let coordinator = coordinator(&source, None).await?;

            let mut callers = JoinSet::new();
            for _ in 0..5 {
                let coordinator = coordinator.clone();
                callers.spawn(async move { coordinator.ensure_access_token().await });
            }

            while let Some(result) = callers.join_next().await {
                assert!(matches!(result?, Err(RefreshError::Exchange(_))));
            }
            assert_eq!(source.calls(), 1);
            assert!(!coordinator.is_refreshing());
            Ok(())
        }

        #[tokio::test]
        async fn the_session_is_cleared() -> Result<()> {
            let expired = token_expiring_at(NOW - DurationSecs(10));
            let source = ScriptedSource::failing();
            let coordinator = coordinator(&source, Some(&expired)).await?;

            let _ = coordinator.ensure_access_token().await;

            assert_eq!(coordinator.store().refresh_token().await?, None);
            assert_eq!(coordinator.store().access_token().await?, None);
            Ok(())
        }

        #[derive(Debug)]
        struct ReadOnlyAccessToken(InMemoryStorage<TestClock>);

        #[async_trait]
        impl TokenStorage for ReadOnlyAccessToken {
            async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
                self.0.get(key).await
            }

            async fn set(
                &self,
                key: StorageKey,
                value: &str,
                expiry: Expiry,
            ) -> Result<(), StorageError> {
                if key == StorageKey::AccessToken {
                    return Err(StorageError::Backend("access token slot is read-only".into()));
                }
                self.0.set(key, value, expiry).await
            }

            async fn remove(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
                self.0.remove(keys).await
            }
        }

        #[tokio::test]
        async fn storing_the_new_token_failing_clears_the_session() -> Result<()> {
            let clock = TestClock::new(NOW);
            let source = ScriptedSource::issuing(token_expiring_at(NOW + DurationSecs(3600)));
            let store = TokenStore::new(ReadOnlyAccessToken(
                InMemoryStorage::new().with_clock(clock.clone()),
            ))
            .with_clock(clock.clone());
            store
                .set_refresh_token(RefreshTokenRef::from_str("refresh"))
                .await?;
            let coordinator = RefreshCoordinator::new(
                store,
                Arc::clone(&source),
                JwtInspector::default().with_clock(clock),
            );

            let result = coordinator.ensure_access_token().await;

            assert!(matches!(result, Err(RefreshError::Storage(_))));
            assert_eq!(source.calls(), 1);
            assert_eq!(coordinator.store().refresh_token().await?, None);
            assert!(!coordinator.is_refreshing());
            Ok(())
        }

        #[tokio::test]
        async fn a_missing_refresh_token_skips_the_exchange() -> Result<()> {
            let source = ScriptedSource::issuing(token_expiring_at(NOW + DurationSecs(3600)));
            let coordinator = coordinator(&source, None).await?;
            coordinator.store().clear().await?;

            let result = coordinator.ensure_access_token().await;

            assert!(matches!(result, Err(RefreshError::MissingRefreshToken)));
            assert_eq!(source.calls(), 0);
            Ok(())
        }
    }

    mod when_the_leader_is_dropped {
        use super::*;

        #[tokio::test]
        async fn waiters_are_released_as_abandoned() -> Result<()> {
            let source = ScriptedSource::stalling();
            let coordinator = coordinator(&source, None).await?;

            let mut leader = Box::pin(coordinator.ensure_access_token());
            let pending = tokio::time::timeout(Duration::from_millis(20), &mut leader).await;
            assert!(pending.is_err());
            assert!(coordinator.is_refreshing());

            let follower = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ensure_access_token().await })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;

            drop(leader);

            assert!(matches!(follower.await?, Err(RefreshError::Abandoned)));
            assert!(!coordinator.is_refreshing());
            Ok(())
        }
    }
}
