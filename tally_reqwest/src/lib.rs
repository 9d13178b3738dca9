//! Calling the tally attendance API with automatic token handling
//!
//! [`ApiClient`] performs single unauthenticated round trips and classifies
//! failures: a server that could not be reached is distinguished from one that
//! answered with an error, and error messages are pulled out of the API's error
//! envelopes.
//!
//! [`AuthenticatedClient`] layers the session on top. It attaches a usable
//! access token from the session's [`RefreshCoordinator`][tally_tokens::RefreshCoordinator]
//! to every call, retries once after a forced refresh when the server rejects
//! the token, and notifies a [`TerminationHandler`] when the session must end.
//!
//! ```
//! use tally_reqwest::{ApiClient, AuthenticatedClient, RequestOptions, Termination};
//! use tally_tokens::{
//!     sources::http::HttpRefreshSource,
//!     store::{InMemoryStorage, TokenStore},
//!     JwtInspector, RefreshCoordinator,
//! };
//! # let base_url = reqwest::Url::parse("https://attendance.example.com").unwrap();
//!
//! let http = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
//! let coordinator = RefreshCoordinator::new(
//!     TokenStore::new(InMemoryStorage::new()),
//!     HttpRefreshSource::new(http.clone(), base_url.join("/api/auth/access_token").unwrap()),
//!     JwtInspector::default(),
//! );
//!
//! let client = AuthenticatedClient::new(ApiClient::new(http, base_url), coordinator)
//!     .with_termination_handler(|termination: Termination| {
//!         println!("redirecting to {}", termination.path());
//!     });
//! # let _ = async move {
//! let students: serde_json::Value = client.http("/api/students", RequestOptions::get()).await?;
//! # Ok::<_, tally_reqwest::ClientError>(())
//! # };
//! ```
//!
//! # Features
//!
//! * `test-util`: Provides [`MockBackend`][testing::MockBackend], an in-process
//!   stand-in for the API built as a terminal middleware.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod client;
mod request;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{AuthenticatedClient, ClientError, LogTermination, Termination, TerminationHandler};
pub use request::{error_message, ApiClient, RequestError, RequestOptions};
