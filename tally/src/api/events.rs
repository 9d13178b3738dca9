//! Events that attendance is recorded against

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const EVENTS_PATH: &str = "/api/events";
const EVENT_PATH: &str = "/api/event";

/// A recurring event such as a weekly meeting
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Event {
    /// Numeric identifier
    pub event_id: i64,
    /// Stable identifier used in paths
    pub event_uuid: String,
    /// Display name, also used to select exports
    pub event_name: String,
    /// Whether the event is active rather than archived
    #[serde(default = "active_by_default")]
    pub event_active: bool,
    /// When the event was created
    #[serde(default)]
    pub event_created_at: Option<String>,
}

fn active_by_default() -> bool {
    true
}

#[derive(Serialize)]
struct EventForm<'a> {
    name: &'a str,
}

fn event_path(uuid: &str) -> String {
    format!("{EVENT_PATH}/{uuid}")
}

/// Lists every event
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Event>, ClientError> {
    super::fetch(client, EVENTS_PATH).await
}

/// Fetches a single event
pub async fn get<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<Event, ClientError> {
    super::fetch(client, &event_path(uuid)).await
}

/// Creates an event
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    name: &str,
) -> Result<(), ClientError> {
    super::send_json(client, EVENT_PATH, RequestOptions::post(), &EventForm { name }).await
}

/// Renames an event
pub async fn rename<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    name: &str,
) -> Result<(), ClientError> {
    super::send_json(client, &event_path(uuid), RequestOptions::put(), &EventForm { name }).await
}

/// Archives an event
pub async fn archive<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    super::send(client, &event_path(uuid), RequestOptions::delete()).await
}

/// Restores an archived event
pub async fn restore<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    let path = format!("{}/restore", event_path(uuid));
    super::send(client, &path, RequestOptions::put()).await
}

/// Permanently deletes an event
pub async fn hard_delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    let path = format!("{}/hard_delete", event_path(uuid));
    super::send(client, &path, RequestOptions::delete()).await
}
