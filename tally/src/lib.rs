//! Client for the tally attendance administration API
//!
//! This crate ties together the token lifecycle from [`tally_tokens`] and the
//! request layer from [`tally_reqwest`] into a [`Session`]: sign in (with
//! optional multi-factor approval), make authenticated calls against the
//! API's resources, check the signed-in administrator's permissions, and sign
//! out.
//!
//! # Example
//!
//! ```no_run
//! use tally::{
//!     api::{attendance, students},
//!     auth::{LoginOutcome, LoginRequest},
//!     Session, SessionConfig,
//! };
//! use tally_tokens::store::InMemoryStorage;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = SessionConfig::from_base_url("https://attendance.example.com")?;
//! let session = Session::new(config, reqwest::Client::new(), InMemoryStorage::new())
//!     .with_termination_handler(|reason: tally_reqwest::Termination| {
//!         eprintln!("signed out: {}, continue at {}", reason, reason.path());
//!     });
//!
//! let request = LoginRequest {
//!     username: "admin@example.com".to_owned(),
//!     password: "hunter2".to_owned(),
//!     captcha_response: "captcha-token".to_owned(),
//! };
//! if let LoginOutcome::MfaRequired(challenge) = session.login(&request).await? {
//!     session.await_mfa_approval(&challenge).await?;
//! }
//!
//! let permissions = session.permissions();
//! permissions.loaded().await;
//! if permissions.has_permission("student:read") {
//!     for student in students::list(session.client()).await? {
//!         println!("{}", student.student_name);
//!     }
//! }
//!
//! let page = attendance::list(session.client(), &Default::default()).await?;
//! println!("{} attendances recorded", page.total_entries);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `file` (default): Enables [`FileStorage`][tally_tokens::store::FileStorage]
//!   for persisting a session across process restarts.

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

pub mod api;
pub mod auth;
pub mod config;
pub mod permissions;
pub mod poll;
mod session;

pub use config::{ConfigError, SessionConfig};
pub use permissions::Permissions;
pub use session::Session;
