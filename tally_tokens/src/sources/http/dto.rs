//! DTOs for the token issuance endpoint

use serde::{Deserialize, Serialize};

use crate::AccessTokenRef;

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct TokenEnvelope<'a> {
    #[serde(borrow)]
    pub data: TokenResponse<'a>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct TokenResponse<'a> {
    #[serde(borrow)]
    pub access_token: &'a AccessTokenRef,
}
