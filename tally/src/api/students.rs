//! Students and their group membership

use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

use super::BatchOutcome;

const STUDENTS_PATH: &str = "/api/students";
const STUDENT_PATH: &str = "/api/student";

/// A student enrolled in a group
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Student {
    /// Numeric identifier
    pub student_id: i64,
    /// Stable identifier used in paths
    pub student_uuid: String,
    /// Display name
    pub student_name: String,
    /// The group the student belongs to
    pub student_group_id: i64,
    /// Whether the student is active rather than archived
    #[serde(default = "active_by_default")]
    pub student_active: bool,
}

fn active_by_default() -> bool {
    true
}

/// The fields submitted to create or update a student
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StudentForm {
    /// Display name
    pub name: String,
    /// The group to place the student in
    pub group_uuid: String,
}

fn student_path(uuid: &str) -> String {
    format!("{STUDENT_PATH}/{uuid}")
}

/// Lists every student visible to the signed-in administrator
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Student>, ClientError> {
    super::fetch(client, STUDENTS_PATH).await
}

/// Fetches a single student
pub async fn get<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<Student, ClientError> {
    super::fetch(client, &student_path(uuid)).await
}

/// Creates a student
pub async fn create<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    form: &StudentForm,
) -> Result<(), ClientError> {
    super::send_json(client, STUDENT_PATH, RequestOptions::post(), form).await
}

/// Creates one student per name in the same group, concurrently
///
/// Individual failures do not stop the remaining creations; they are
/// reported by name in the outcome.
#[tracing::instrument(skip(client, names))]
pub async fn create_many<C: Clock + Send + Sync + 'static>(
    client: &AuthenticatedClient<C>,
    group_uuid: &str,
    names: impl IntoIterator<Item = String>,
) -> BatchOutcome<String> {
    super::run_batch(names, |name| {
        let client = client.clone();
        let form = StudentForm {
            name,
            group_uuid: group_uuid.to_owned(),
        };
        async move { create(&client, &form).await }
    })
    .await
}

/// Updates a student's name or group
pub async fn update<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
    form: &StudentForm,
) -> Result<(), ClientError> {
    super::send_json(client, &student_path(uuid), RequestOptions::put(), form).await
}

/// Archives a student, keeping their attendance history
pub async fn archive<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    super::send(client, &student_path(uuid), RequestOptions::delete()).await
}

/// Restores an archived student
pub async fn restore<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    let path = format!("{}/restore", student_path(uuid));
    super::send(client, &path, RequestOptions::put()).await
}

/// Permanently deletes a student and their records
pub async fn hard_delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    uuid: &str,
) -> Result<(), ClientError> {
    let path = format!("{}/hard_delete", student_path(uuid));
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
    async fn lists_students_from_the_envelope() -> Result<()> {
        let backend = MockBackend::new();
        backend.on(
            Method::GET,
            STUDENTS_PATH,
            MockResponse::json(
                200,
                r#"{"message":"ok","data":[
                    {"student_id":1,"student_uuid":"s-1","student_name":"Ana","student_group_id":3,"student_active":true},
                    {"student_id":2,"student_uuid":"s-2","student_name":"Ben","student_group_id":3}
                ]}"#,
            ),
        );
        let client = signed_in_client(&backend).await?;

        let students = list(&client).await?;

        assert_eq!(students.len(), 2);
        assert_eq!(students[0].student_name, "Ana");
        assert!(students[1].student_active);
        Ok(())
    }

    #[tokio::test]
    async fn archive_and_restore_use_distinct_routes() -> Result<()> {
        let backend = MockBackend::new();
        backend
            .on(Method::DELETE, "/api/student/s-1", MockResponse::empty(204))
            .on(Method::PUT, "/api/student/s-1/restore", MockResponse::empty(204))
            .on(Method::DELETE, "/api/student/s-1/hard_delete", MockResponse::empty(204));
        let client = signed_in_client(&backend).await?;

        archive(&client, "s-1").await?;
        restore(&client, "s-1").await?;
        hard_delete(&client, "s-1").await?;

        assert_eq!(backend.count(&Method::DELETE, "/api/student/s-1"), 1);
        assert_eq!(backend.count(&Method::PUT, "/api/student/s-1/restore"), 1);
        assert_eq!(backend.count(&Method::DELETE, "/api/student/s-1/hard_delete"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn batch_creation_counts_successes_and_failures() -> Result<()> {
        let backend = MockBackend::new();
        backend
            .on(Method::POST, STUDENT_PATH, MockResponse::json(201, r#"{"data":{}}"#))
            .on(Method::POST, STUDENT_PATH, MockResponse::json(201, r#"{"data":{}}"#))
            .on(
                Method::POST,
                STUDENT_PATH,
                MockResponse::json(409, r#"{"message":"Student already exists"}"#),
            );
        let client = signed_in_client(&backend).await?;

        let outcome = create_many(
            &client,
            "g-1",
            ["Ana", "Ben", "Cy", "Di"].map(String::from),
        )
        .await;

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed.len(), 2);
        assert!(!outcome.is_complete());
        assert!(outcome
            .failed
            .iter()
            .all(|(_, error)| error.status_code() == 409));

        let seen = backend.requests();
        assert_eq!(seen.len(), 4);
        assert!(seen
            .iter()
            .all(|request| request.body["group_uuid"] == "g-1"));
        Ok(())
    }
}
