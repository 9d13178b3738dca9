//! Roles and the permissions they grant

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const ROLES_PATH: &str = "/api/auth/roles";
const ROLE_PATH: &str = "/api/auth/role";
const PERMISSIONS_PATH: &str = "/api/auth/permissions";

/// A named set of permissions
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Role {
    /// Numeric identifier, used when assigning administrators
    pub role_id: i64,
    /// Stable identifier used in paths
    #[serde(default)]
    pub role_uuid: Option<String>,
    /// Display name
    pub role_name: String,
    /// The slugs of the permissions granted
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A single grantable permission
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Permission {
    /// Numeric identifier, used when granting the permission
    pub permission_id: i64,
    /// Machine-readable name such as `student:edit`
    pub permission_slug: String,
    /// Human-readable description
    #[serde(default)]
    pub permission_description: String,
}

/// The fields submitted to create or update a role
///
/// Permissions are granted by ID, although roles report them by slug.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoleForm {
    /// Display name
    pub role_name: String,
    /// The IDs of the permissions to grant
    pub permissions: Vec<i64>,
}

/// Lists every role
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Role>, ClientError> {
    super::fetch(client, ROLES_PATH).await
}

/// Creates a role
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    form: &RoleForm,
) -> Result<(), ClientError> {
    super::send_json(client, ROLE_PATH, RequestOptions::post(), form).await
}

/// Updates a role's name and permissions
pub async fn update<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    form: &RoleForm,
) -> Result<(), ClientError> {
    let path = format!("{ROLE_PATH}/{uuid}");
    super::send_json(client, &path, RequestOptions::put(), form).await
}

/// Deletes a role
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    super::send(client, &format!("{ROLE_PATH}/{uuid}"), RequestOptions::delete()).await
}

/// Lists every permission that can be granted
pub async fn list_permissions<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Permission>, ClientError> {
    super::fetch(client, PERMISSIONS_PATH).await
}

/// Maps permission slugs to the IDs used when granting them
///
/// Unknown slugs are skipped.
pub fn permission_ids<'a>(
    catalog: &[Permission],
    slugs: impl IntoIterator<Item = &'a str>,
) -> Vec<i64> {
    slugs
        .into_iter()
        .filter_map(|slug| {
            catalog
                .iter()
                .find(|permission| permission.permission_slug == slug)
                .map(|permission| permission.permission_id)
        })
        .collect()
}
