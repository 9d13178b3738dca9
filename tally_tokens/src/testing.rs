//! Helpers for producing unsigned tokens in tests

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tally_clock::UnixTime;

use crate::AccessToken;

/// Builds an unsigned JWT carrying the given JSON payload
pub fn token_with_payload(payload: &str) -> String {
    format!(
        "{}.{}.not-a-signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload),
    )
}

/// Builds an unsigned access token that expires at `exp`
pub fn token_expiring_at(exp: UnixTime) -> AccessToken {
    AccessToken::new(token_with_payload(&format!(
        r#"{{"exp":{},"sub":"test-admin"}}"#,
        exp.0
    )))
}
