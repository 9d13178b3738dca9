//! Administrator accounts and the server's audit log

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const ADMINS_PATH: &str = "/api/auth/admins";
const ADMIN_PATH: &str = "/api/auth/admin";
const LOGS_PATH: &str = "/api/auth/logs";

/// An administrator account
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Admin {
    /// Numeric identifier, used when issuing API keys
    pub admin_id: i64,
    /// Stable identifier used in paths
    pub admin_uuid: String,
    /// The sign-in name
    pub admin_username: String,
    /// The administrator's role
    #[serde(default)]
    pub role_id: Option<i64>,
    /// The group the administrator is limited to, if any
    #[serde(default)]
    pub group_id: Option<i64>,
}

/// The fields submitted to create or update an administrator
///
/// A password is required when creating an account and ignored on update;
/// use [`reset_password()`] to change it.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AdminForm {
    /// The sign-in name
    pub username: String,
    /// The initial password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// The administrator's role
    pub role_id: i64,
    /// The group to limit the administrator to, or `None` for all groups
    pub group_id: Option<i64>,
}

impl fmt::Debug for AdminForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdminForm")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***PASSWORD***"))
            .field("role_id", &self.role_id)
            .field("group_id", &self.group_id)
            .finish()
    }
}

#[derive(Serialize)]
struct PasswordReset<'a> {
    password: &'a str,
}

fn admin_path(uuid: &str) -> String {
    format!("{ADMIN_PATH}/{uuid}")
}

/// Lists every administrator
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Admin>, ClientError> {
    super::fetch(client, ADMINS_PATH).await
}

/// Creates an administrator
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    form: &AdminForm,
) -> Result<(), ClientError> {
    super::send_json(client, ADMIN_PATH, RequestOptions::post(), form).await
}

/// Updates an administrator's name, role, or group
pub async fn update<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    form: &AdminForm,
) -> Result<(), ClientError> {
    let form = AdminForm {
        password: None,
        ..form.clone()
    };
    super::send_json(client, &admin_path(uuid), RequestOptions::put(), &form).await
}

/// Sets a new password for an administrator
pub async fn reset_password<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    password: &str,
) -> Result<(), ClientError> {
    let path = format!("{}/reset_password", admin_path(uuid));
    super::send_json(client, &path, RequestOptions::put(), &PasswordReset { password }).await
}

/// Deletes an administrator
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    super::send(client, &admin_path(uuid), RequestOptions::delete()).await
}

/// Downloads the server's audit log
pub async fn download_logs<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Bytes, ClientError> {
    client.download(LOGS_PATH, RequestOptions::get()).await
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use reqwest::Method;
    use tally_reqwest::testing::{MockBackend, MockResponse};

    use super::*;
    use crate::api::test_support::signed_in_client;

    fn form() -> AdminForm {
        AdminForm {
            username: "leader@example.com".to_owned(),
            password: Some("correct horse".to_owned()),
            role_id: 2,
            group_id: None,
        }
    }

    #[tokio::test]
    async fn create_sends_the_password_and_a_null_group() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(Method::POST, ADMIN_PATH, MockResponse::json(201, r#"{"data":{}}"#));
        let client = signed_in_client(&backend).await?;

        create(&client, &form()).await?;

        let seen = backend.last_request().unwrap();
        assert_eq!(
            seen.body,
            serde_json::json!({
                "username": "leader@example.com",
                "password": "correct horse",
                "role_id": 2,
                "group_id": null,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn update_never_sends_a_password() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(Method::PUT, "/api/auth/admin/a-1", MockResponse::empty(204));
        let client = signed_in_client(&backend).await?;

        update(&client, "a-1", &form()).await?;

        let seen = backend.last_request().unwrap();
        assert!(seen.body.get("password").is_none());
        assert_eq!(seen.body["role_id"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn password_resets_use_their_own_route() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(
            Method::PUT,
            "/api/auth/admin/a-1/reset_password",
            MockResponse::empty(204),
        );
        let client = signed_in_client(&backend).await?;

        reset_password(&client, "a-1", "new secret").await?;

        let seen = backend.last_request().unwrap();
        assert_eq!(seen.body, serde_json::json!({ "password": "new secret" }));
        Ok(())
    }

    #[tokio::test]
    async fn logs_are_downloaded_raw() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(
            Method::GET,
            LOGS_PATH,
            MockResponse::bytes(200, "2024-03-01 login admin\n", "text/plain"),
        );
        let client = signed_in_client(&backend).await?;

        let logs = download_logs(&client).await?;

        assert_eq!(&logs[..], b"2024-03-01 login admin\n");
        Ok(())
    }

    #[test]
    fn debug_output_hides_the_password() {
        assert!(!format!("{:?}", form()).contains("correct horse"));
    }
}
