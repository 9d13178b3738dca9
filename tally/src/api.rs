//! Typed access to the API's resources
//!
//! Every function here issues its call through an [`AuthenticatedClient`], so
//! token refresh, retry and session termination apply uniformly.

use std::future::Future;

use serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};
use tokio::task::JoinSet;

pub mod absences;
pub mod admins;
pub mod apikeys;
pub mod attendance;
pub mod events;
pub mod groups;
pub mod roles;
pub mod students;

/// The API's success envelope
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope<T> {
    /// The payload
    pub data: T,
    /// A human-readable status message
    #[serde(default)]
    pub message: Option<String>,
    /// The status code echoed by the server
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// The result of issuing many independent calls at once
#[derive(Debug)]
pub struct BatchOutcome<K> {
    /// The number of calls that succeeded
    pub succeeded: usize,
    /// The calls that failed, keyed by their input, in completion order
    pub failed: Vec<(K, ClientError)>,
}

impl<K> Default for BatchOutcome<K> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failed: Vec::new(),
        }
    }
}

impl<K> BatchOutcome<K> {
    /// Whether every call succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) async fn fetch<T, C>(client: &AuthenticatedClient<C>, path: &str) -> Result<T, ClientError>
where
    T: DeserializeOwned,
    C: Clock + Send + Sync,
{
    let envelope: Envelope<T> = client.http(path, RequestOptions::get()).await?;
    Ok(envelope.data)
}

pub(crate) async fn send<C>(
    client: &AuthenticatedClient<C>,
    path: &str,
    options: RequestOptions,
) -> Result<(), ClientError>
where
    C: Clock + Send + Sync,
{
    client.http::<IgnoredAny>(path, options).await?;
    Ok(())
}

pub(crate) async fn send_json<B, C>(
    client: &AuthenticatedClient<C>,
    path: &str,
    options: RequestOptions,
    body: &B,
) -> Result<(), ClientError>
where
    B: Serialize + ?Sized,
    C: Clock + Send + Sync,
{
    send(client, path, options.with_json(body)?).await
}

pub(crate) async fn run_batch<K, F, Fut>(keys: impl IntoIterator<Item = K>, op: F) -> BatchOutcome<K>
where
    K: Clone + Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for key in keys {
        let call = op(key.clone());
        tasks.spawn(async move { (key, call.await) });
    }

    let mut outcome = BatchOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => outcome.succeeded += 1,
            Ok((key, Err(error))) => {
                tracing::warn!(%error, "batch call failed");
                outcome.failed.push((key, error));
            }
            Err(error) => tracing::error!(%error, "batch call did not complete"),
        }
    }

    tracing::debug!(
        succeeded = outcome.succeeded,
        failed = outcome.failed.len(),
        "batch finished"
    );
    outcome
}
