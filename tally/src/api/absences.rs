//! Reported absences and the attendance forecast built from them

use serde::Deserialize;
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

const ABSENCES_PATH: &str = "/api/absents";
const ABSENCE_PATH: &str = "/api/absent";
const PREDICTION_PATH: &str = "/api/predict_absent";

/// A student's reported absence
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Absence {
    /// Identifies the report for deletion
    pub absence_id: i64,
    /// The student's UUID
    pub uuid: String,
    /// The student's name
    pub name: String,
    /// The student's group
    pub group_id: i64,
    /// The name of the student's group
    pub group_name: String,
    /// The date of the absence
    pub date: String,
}

/// The forecast attendance for the next event
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AbsencePrediction {
    /// The number of students expected to attend
    pub predicted_attendance: f64,
    /// The number of active students
    pub total_students: u64,
    /// The number of absences reported in advance
    pub reported_absents: u64,
    /// The date forecast
    pub date: String,
}

#[derive(Deserialize)]
struct AbsenceList {
    absent_users: Vec<Absence>,
}

/// Lists reported absences
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<Vec<Absence>, ClientError> {
    let list: AbsenceList = super::fetch(client, ABSENCES_PATH).await?;
    Ok(list.absent_users)
}

/// Fetches the attendance forecast
pub async fn predict<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
) -> Result<AbsencePrediction, ClientError> {
    super::fetch(client, PREDICTION_PATH).await
}

/// Deletes a reported absence
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    absence_id: i64,
) -> Result<(), ClientError> {
    let path = format!("{ABSENCE_PATH}/{absence_id}");
    super::send(client, &path, RequestOptions::delete()).await
}
