//! Local inspection of access token expiry
//!
//! Access tokens issued by the API are JWTs. The client never verifies their
//! signatures; it only peeks at the `exp` claim to decide whether a token should
//! be refreshed before it is sent. Nothing read here is trusted for anything
//! other than that decision.
//!
//! A token that cannot be decoded is always considered expired, so a corrupted
//! or truncated token leads to a refresh rather than a failed request.
//!
//! ```
//! use tally_clock::{DurationSecs, TestClock, UnixTime};
//! use tally_tokens::{jwt::JwtInspector, AccessTokenRef};
//!
//! let inspector = JwtInspector::new(DurationSecs(30)).with_clock(TestClock::new(UnixTime(0)));
//! assert!(inspector.is_expired(AccessTokenRef::from_str("not-a-jwt")));
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{Map, Value};
use tally_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error;

use crate::AccessTokenRef;

/// The default safety margin applied before a token's hard expiry
pub const DEFAULT_EXPIRY_BUFFER: DurationSecs = DurationSecs(30);

/// An error decoding the claims of a JWT
#[derive(Debug, Error)]
pub enum JwtDecodeError {
    /// The token does not have exactly three sections
    #[error("malformed JWT")]
    Malformed,
    /// The payload section is not valid base64url
    #[error("malformed JWT payload encoding")]
    PayloadEncoding(#[from] base64::DecodeError),
    /// The payload section is not a JSON object of claims
    #[error("malformed JWT payload")]
    Payload(#[from] serde_json::Error),
    /// The payload does not carry an `exp` claim
    #[error("JWT has no expiration claim")]
    MissingExpiration,
    /// The `exp` claim is not a non-negative numeric date
    #[error("JWT expiration claim is not a numeric date")]
    InvalidExpiration,
}

/// Claims read from a token without verifying its signature
///
/// Claims of an unexpected type are left unset rather than failing the decode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct UntrustedClaims {
    /// Expiration time
    pub exp: Option<UnixTime>,
    /// Issued-at time
    pub iat: Option<UnixTime>,
    /// Subject, with numeric subjects rendered as strings
    pub sub: Option<String>,
}

/// JWT numeric dates may carry fractional seconds
fn numeric_date(value: &Value) -> Option<UnixTime> {
    if let Some(secs) = value.as_u64() {
        return Some(UnixTime(secs));
    }

    match value.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Some(UnixTime(secs.floor() as u64)),
        _ => None,
    }
}

fn payload(token: &str) -> Result<Map<String, Value>, JwtDecodeError> {
    let mut sections = token.split('.');
    let payload = match (
        sections.next(),
        sections.next(),
        sections.next(),
        sections.next(),
    ) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => return Err(JwtDecodeError::Malformed),
    };

    let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Decodes the claims of a token without verifying it
pub fn claims(token: &str) -> Result<UntrustedClaims, JwtDecodeError> {
    let payload = payload(token)?;

    let sub = payload.get("sub").and_then(|sub| match sub {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(UntrustedClaims {
        exp: payload.get("exp").and_then(numeric_date),
        iat: payload.get("iat").and_then(numeric_date),
        sub,
    })
}

/// Reads the expiration time of a token without verifying it
///
/// Only the `exp` claim is examined.
pub fn expiry(token: &str) -> Result<UnixTime, JwtDecodeError> {
    match payload(token)?.get("exp") {
        None | Some(Value::Null) => Err(JwtDecodeError::MissingExpiration),
        Some(exp) => numeric_date(exp).ok_or(JwtDecodeError::InvalidExpiration),
    }
}

/// Determines whether a token is expired, or will expire within `buffer`,
/// according to the system clock
pub fn is_expired(token: &str, buffer: DurationSecs) -> bool {
    is_expired_at(token, buffer, System.now())
}

/// Determines whether a token is expired, or will expire within `buffer`,
/// as of `now`
///
/// A token whose expiry falls exactly on `now + buffer` is expired.
pub fn is_expired_at(token: &str, buffer: DurationSecs, now: UnixTime) -> bool {
    match expiry(token) {
        Ok(exp) => exp <= now + buffer,
        Err(error) => {
            tracing::debug!(%error, "unable to read token expiry, treating as expired");
            true
        }
    }
}

/// Checks access tokens for expiry against a clock, with a safety buffer
#[derive(Clone, Debug)]
pub struct JwtInspector<C = System> {
    buffer: DurationSecs,
    clock: C,
}

impl Default for JwtInspector {
    /// Default inspector
    ///
    /// Uses a buffer of 30 seconds and the system clock.
    fn default() -> Self {
        Self {
            buffer: DEFAULT_EXPIRY_BUFFER,
            clock: System,
        }
    }
}

impl JwtInspector {
    /// Constructs a new inspector with the given safety buffer
    pub fn new(buffer: DurationSecs) -> Self {
        Self {
            buffer,
            clock: System,
        }
    }
}

impl<C> JwtInspector<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> JwtInspector<D> {
        JwtInspector {
            buffer: self.buffer,
            clock,
        }
    }

    /// The safety buffer applied before hard expiry
    #[inline]
    pub fn buffer(&self) -> DurationSecs {
        self.buffer
    }

    /// The clock used to evaluate expiry
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> JwtInspector<C> {
    /// Determines whether the token should no longer be sent
    #[inline]
    pub fn is_expired(&self, token: &AccessTokenRef) -> bool {
        is_expired_at(token.as_str(), self.buffer, self.clock.now())
    }

    /// The time remaining before the token will be considered expired, if decodable
    pub fn until_expired(&self, token: &AccessTokenRef) -> Option<DurationSecs> {
        let exp = expiry(token.as_str()).ok()?;
        Some((exp - self.buffer) - self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::testing::{token_expiring_at, token_with_payload};

    const NOW: UnixTime = UnixTime(1_700_000_000);
    const BUFFER: DurationSecs = DurationSecs(30);

    #[test]
    fn reads_claims_without_a_valid_signature() -> Result<()> {
        let token = token_with_payload(r#"{"exp":1700000100,"iat":1700000000,"sub":"admin"}"#);
        let claims = claims(&token)?;
        assert_eq!(claims.exp, Some(UnixTime(1_700_000_100)));
        assert_eq!(claims.iat, Some(UnixTime(1_700_000_000)));
        assert_eq!(claims.sub.as_deref(), Some("admin"));
        Ok(())
    }

    #[test]
    fn accepts_fractional_expiration() -> Result<()> {
        let token = token_with_payload(r#"{"exp":1700000100.75}"#);
        assert_eq!(expiry(&token)?, UnixTime(1_700_000_100));
        Ok(())
    }

    #[test]
    fn accepts_padded_payloads() -> Result<()> {
        let token = token_expiring_at(UnixTime(1_700_000_100));
        let mut sections: Vec<String> = token.as_str().split('.').map(String::from).collect();
        sections[1].push_str("==");
        let padded = sections.join(".");
        assert_eq!(expiry(&padded)?, UnixTime(1_700_000_100));
        Ok(())
    }

    mod when_token_is_well_formed {
        use super::*;

        #[test]
        fn past_expiry_is_expired_regardless_of_buffer() {
            let token = token_expiring_at(NOW - DurationSecs(10));
            assert!(is_expired_at(token.as_str(), DurationSecs(0), NOW));
            assert!(is_expired_at(token.as_str(), BUFFER, NOW));
        }

        #[test]
        fn expiry_beyond_the_buffer_is_not_expired() {
            let token = token_expiring_at(NOW + BUFFER + DurationSecs(1));
            assert!(!is_expired_at(token.as_str(), BUFFER, NOW));
        }

        #[test]
        fn expiry_exactly_at_the_buffer_boundary_is_expired() {
            let token = token_expiring_at(NOW + BUFFER);
            assert!(is_expired_at(token.as_str(), BUFFER, NOW));
        }

        #[test]
        fn unexpected_claim_types_do_not_affect_expiry() -> Result<()> {
            let token = token_with_payload(r#"{"exp":1700003600,"sub":42,"iat":"yesterday"}"#);
            assert_eq!(expiry(&token)?, UnixTime(1_700_003_600));
            assert!(!is_expired_at(&token, BUFFER, NOW));

            let claims = claims(&token)?;
            assert_eq!(claims.sub.as_deref(), Some("42"));
            assert_eq!(claims.iat, None);
            Ok(())
        }

        #[test]
        fn expiry_inside_the_buffer_is_expired() {
            let token = token_expiring_at(NOW + DurationSecs(5));
            assert!(is_expired_at(token.as_str(), BUFFER, NOW));
            assert!(!is_expired_at(token.as_str(), DurationSecs(0), NOW));
        }
    }

    mod when_token_cannot_be_decoded {
        use super::*;

        #[test]
        fn garbage_is_expired() {
            assert!(is_expired_at("garbage", BUFFER, NOW));
            assert!(is_expired_at("", DurationSecs(0), NOW));
        }

        #[test]
        fn too_many_sections_is_malformed() {
            assert!(matches!(claims("a.b.c.d"), Err(JwtDecodeError::Malformed)));
        }

        #[test]
        fn bad_base64_is_expired() {
            assert!(is_expired_at("header.!!!.signature", BUFFER, NOW));
        }

        #[test]
        fn missing_exp_claim_is_expired() {
            let token = token_with_payload(r#"{"sub":"admin"}"#);
            assert!(matches!(
                expiry(&token),
                Err(JwtDecodeError::MissingExpiration)
            ));
            assert!(is_expired_at(&token, DurationSecs(0), NOW));
        }

        #[test]
        fn non_numeric_exp_claim_is_expired() {
            let token = token_with_payload(r#"{"exp":"tomorrow"}"#);
            assert!(matches!(
                expiry(&token),
                Err(JwtDecodeError::InvalidExpiration)
            ));
            assert!(is_expired_at(&token, DurationSecs(0), NOW));
        }

        #[test]
        fn negative_exp_claim_is_expired() {
            let token = token_with_payload(r#"{"exp":-5}"#);
            assert!(is_expired_at(&token, DurationSecs(0), NOW));
        }

        #[test]
        fn non_object_payload_is_expired() {
            let token = token_with_payload("[1700003600]");
            assert!(matches!(claims(&token), Err(JwtDecodeError::Payload(_))));
            assert!(is_expired_at(&token, DurationSecs(0), NOW));
        }
    }

    mod inspector {
        use tally_clock::TestClock;

        use super::*;

        #[test]
        fn uses_the_configured_clock_and_buffer() {
            let inspector = JwtInspector::new(BUFFER).with_clock(TestClock::new(NOW));
            let fresh = token_expiring_at(NOW + DurationSecs(300));
            let expiring = token_expiring_at(NOW + DurationSecs(20));

            assert!(!inspector.is_expired(&fresh));
            assert!(inspector.is_expired(&expiring));
            assert_eq!(inspector.until_expired(&fresh), Some(DurationSecs(270)));
            assert_eq!(inspector.until_expired(&expiring), Some(DurationSecs(0)));
        }

        #[test]
        fn default_buffer_is_thirty_seconds() {
            assert_eq!(JwtInspector::default().buffer(), DurationSecs(30));
        }
    }
}
