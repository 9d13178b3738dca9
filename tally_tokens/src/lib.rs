//! Session token management for clients of the tally attendance API
//!
//! A signed-in administrator holds two credentials: a short-lived access token,
//! which is a JWT sent with every authenticated request, and a long-lived opaque
//! refresh token, which is exchanged for new access tokens as old ones expire.
//!
//! This crate keeps those credentials in a [`TokenStore`][store::TokenStore]
//! backed by a pluggable [`TokenStorage`][store::TokenStorage], judges access
//! token expiry ahead of time with a [`JwtInspector`][jwt::JwtInspector], and
//! ensures that concurrent callers needing a new access token share a single
//! exchange through the [`RefreshCoordinator`][coordinator::RefreshCoordinator].
//!
//! # General Flow
//!
//! After sign-in stores a refresh token, build one coordinator for the session
//! and share clones of it with everything that makes authenticated calls.
//!
//! ```
//! use tally_tokens::{
//!     coordinator::RefreshCoordinator,
//!     jwt::JwtInspector,
//!     sources::http::HttpRefreshSource,
//!     store::{InMemoryStorage, TokenStore},
//! };
//!
//! # let token_url = reqwest::Url::parse("https://attendance.example.com/api/auth/access_token").unwrap();
//! let store = TokenStore::new(InMemoryStorage::new());
//! let source = HttpRefreshSource::new(
//!     reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build(),
//!     token_url,
//! );
//!
//! let coordinator = RefreshCoordinator::new(store, source, JwtInspector::default());
//! # let _ = async move {
//! let access_token = coordinator.ensure_access_token().await?;
//! # Ok::<_, tally_tokens::coordinator::RefreshError>(())
//! # };
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate:
//!
//! * `file` (default): Provides [`FileStorage`][store::FileStorage], which persists tokens
//!   to a local JSON file.
//! * `http` (default): Provides [`HttpRefreshSource`][sources::http::HttpRefreshSource],
//!   which exchanges refresh tokens with the API's token endpoint.
//! * `test-util`: Exposes helpers for minting unsigned tokens in tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod coordinator;
pub mod jwt;
pub mod sources;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use braids::*;
pub use coordinator::{RefreshCoordinator, RefreshError};
pub use jwt::JwtInspector;
pub use store::{TokenStorage, TokenStore};
