//! API keys for unattended integrations

use std::fmt;

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const APIKEY_PATH: &str = "/api/apikey";

/// An issued API key, as listed
///
/// Only a preview of the secret is ever returned after creation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiKey {
    /// Numeric identifier
    pub api_key_id: i64,
    /// The administrator the key acts as
    pub admin_id: i64,
    /// That administrator's sign-in name
    pub admin_username: String,
    /// When the key stops working
    pub expiry_at: String,
    /// Whether the key has already expired
    pub expired: bool,
    /// The slugs of the permissions granted
    #[serde(default)]
    pub permissions: Vec<String>,
    /// The first characters of the secret
    pub key_preview: String,
}

/// The fields submitted to issue an API key
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiKeyForm {
    /// The administrator the key acts as
    pub admin_id: i64,
    /// The IDs of the permissions to grant
    pub permissions: Vec<i64>,
    /// The number of days until the key expires
    pub expiry_days: u32,
    /// What the key is for
    pub description: String,
}

/// A newly issued API key
///
/// The secret is only available here; it cannot be retrieved again.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedApiKey {
    /// The full secret
    pub api_key: String,
    /// Numeric identifier
    pub api_key_id: i64,
}

impl fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("api_key", &"***SECRET***")
            .field("api_key_id", &self.api_key_id)
            .finish()
    }
}

/// Lists every API key
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<ApiKey>, ClientError> {
    super::fetch(client, APIKEY_PATH).await
}

/// Issues an API key
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    form: &ApiKeyForm,
) -> Result<IssuedApiKey, ClientError> {
    let options = RequestOptions::post().with_json(form)?;
    let envelope: super::Envelope<IssuedApiKey> = client.http(APIKEY_PATH, options).await?;
    tracing::info!(api_key_id = envelope.data.api_key_id, "issued API key");
    Ok(envelope.data)
}

/// Revokes an API key
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    api_key_id: i64,
) -> Result<(), ClientError> {
    let path = format!("{APIKEY_PATH}/{api_key_id}");
    super::send(client, &path, RequestOptions::delete()).await
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use reqwest::Method;
    use tally_reqwest::testing::{MockBackend, MockResponse};

    use super::*;
    use crate::api::test_support::signed_in_client;

    #[tokio::test]
    async fn issuing_returns_the_secret_once() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(
            Method::POST,
            APIKEY_PATH,
            MockResponse::json(201, r#"{"data":{"api_key":"tk_live_abcdef","api_key_id":12}}"#),
        );
        let client = signed_in_client(&backend).await?;

        let form = ApiKeyForm {
            admin_id: 3,
            permissions: vec![1, 2],
            expiry_days: 365,
            description: "Check-in kiosk".to_owned(),
        };
        let issued = create(&client, &form).await?;

        assert_eq!(issued.api_key_id, 12);
        assert_eq!(issued.api_key, "tk_live_abcdef");
        assert!(!format!("{:?}", issued).contains("abcdef"));

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.body["expiry_days"], 365);
        assert_eq!(seen.body["permissions"], serde_json::json!([1, 2]));
        Ok(())
    }

    #[tokio::test]
    async fn lists_keys_with_previews() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(
            Method::GET,
            APIKEY_PATH,
            MockResponse::json(
                200,
                r#"{"data":[{"api_key_id":12,"admin_id":3,"admin_username":"kiosk","expiry_at":"2025-03-01","expired":false,"permissions":["attendance:edit"],"key_preview":"tk_live_ab"}]}"#,
            ),
        );
        let client = signed_in_client(&backend).await?;

        let keys = list(&client).await?;

        assert_eq!(keys[0].key_preview, "tk_live_ab");
        assert!(!keys[0].expired);
        Ok(())
    }

    #[tokio::test]
    async fn revokes_by_id() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(Method::DELETE, "/api/apikey/12", MockResponse::empty(204));
        let client = signed_in_client(&backend).await?;

        delete(&client, 12).await?;

        assert_eq!(backend.count(&Method::DELETE, "/api/apikey/12"), 1);
        Ok(())
    }
}
