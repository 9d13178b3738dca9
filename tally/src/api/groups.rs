//! Youth groups

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const GROUPS_PATH: &str = "/api/groups";
const GROUP_PATH: &str = "/api/group";

/// A group of students
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Group {
    /// Numeric identifier
    pub group_id: i64,
    /// Stable identifier used in paths
    pub group_uuid: String,
    /// Display name
    pub group_name: String,
}

#[derive(Serialize)]
struct GroupForm<'a> {
    name: &'a str,
}

/// Lists every group
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Group>, ClientError> {
    super::fetch(client, GROUPS_PATH).await
}

/// Fetches a single group
pub async fn get<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<Group, ClientError> {
    super::fetch(client, &format!("{GROUP_PATH}/{uuid}")).await
}

/// Creates a group
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    name: &str,
) -> Result<(), ClientError> {
    super::send_json(client, GROUP_PATH, RequestOptions::post(), &GroupForm { name }).await
}

/// Renames a group
pub async fn rename<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    name: &str,
) -> Result<(), ClientError> {
    let path = format!("{GROUP_PATH}/{uuid}");
    super::send_json(client, &path, RequestOptions::put(), &GroupForm { name }).await
}

/// Deletes a group
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    super::send(client, &format!("{GROUP_PATH}/{uuid}"), RequestOptions::delete()).await
}
