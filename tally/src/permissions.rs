//! The signed-in administrator's permissions
//!
//! Permissions are fetched once in the background. Until that fetch settles
//! every check is denied, and if it fails the set settles empty, so callers
//! never act on permissions they have not been shown to hold.

use std::{collections::HashSet, sync::Arc};

use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, RequestOptions};
use tokio::sync::watch;
use tracing::Instrument;

use crate::api::{roles::Permission, Envelope};

type Granted = Option<Arc<HashSet<String>>>;

/// A read-only view of the permissions granted to the current session
///
/// Clones share the same underlying set.
#[derive(Clone, Debug)]
pub struct Permissions {
    granted: watch::Receiver<Granted>,
}

impl Permissions {
    /// Starts loading permissions from `path` in the background
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<C>(client: AuthenticatedClient<C>, path: impl Into<String>) -> Self
    where
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let path = path.into();
        let span = tracing::debug_span!("load_permissions", %path);

        tokio::spawn(
            async move {
                let slugs = match client
                    .http::<Envelope<Option<Vec<Permission>>>>(&path, RequestOptions::get())
                    .await
                {
                    Ok(envelope) => envelope
                        .data
                        .unwrap_or_default()
                        .into_iter()
                        .map(|permission| permission.permission_slug)
                        .collect(),
                    Err(error) => {
                        tracing::error!(%error, "unable to load permissions, denying all");
                        HashSet::new()
                    }
                };

                tracing::debug!(count = slugs.len(), "permissions loaded");
                tx.send_replace(Some(Arc::new(slugs)));
            }
            .instrument(span),
        );

        Self { granted: rx }
    }

    /// A settled set holding exactly `slugs`
    pub fn fixed<I, S>(slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let granted = slugs.into_iter().map(Into::into).collect();
        let (_, rx) = watch::channel(Some(Arc::new(granted)));
        Self { granted: rx }
    }

    /// Whether `slug` is granted
    ///
    /// Always `false` while permissions are still loading.
    pub fn has_permission(&self, slug: &str) -> bool {
        self.granted
            .borrow()
            .as_ref()
            .is_some_and(|granted| granted.contains(slug))
    }

    /// Whether the permission fetch has settled
    pub fn is_loaded(&self) -> bool {
        self.granted.borrow().is_some()
    }

    /// Waits until the permission fetch has settled and returns the granted set
    pub async fn loaded(&self) -> Arc<HashSet<String>> {
        let mut granted = self.granted.clone();
        let settled = match granted.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone().unwrap_or_default(),
            Err(_) => {
                // The loader ended without settling.
                tracing::warn!("permission loader stopped, denying all");
                Arc::default()
            }
        };
        settled
    }
}
