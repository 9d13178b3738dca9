//! Attendance records, paging, and spreadsheet exports

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tally_clock::Clock;
use tally_reqwest::{AuthenticatedClient, ClientError, RequestOptions};

use super::BatchOutcome;

const ATTENDANCES_PATH: &str = "/api/attendances";
const ATTENDANCE_PATH: &str = "/api/attendance";
const EXCEL_PATH: &str = "/api/attendance/excel";
const DATE_EXCEL_PATH: &str = "/api/attendance/date/excel";

/// A student's attendance at an event on a date
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AttendanceRecord {
    /// Identifies the record for deletion
    pub attendance_id: String,
    /// The student who attended
    pub attendance_student_id: String,
    /// The event attended
    pub attendance_event_id: String,
    /// The student's group at the time
    pub attendance_group_id: String,
    /// The date attended, as `YYYY-MM-DD`
    pub attendance_date: String,
}

/// One page of attendance records
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AttendancePage {
    /// The records on this page
    pub attendances: Vec<AttendanceRecord>,
    /// The number of records across all pages
    pub total_entries: u64,
    /// The number of pages
    pub total_pages: u64,
    /// The page returned, starting at 1
    pub current_page: u64,
}

/// The direction records are sorted in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Asc,
    /// Largest first
    Desc,
}

impl SortOrder {
    /// The query string value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// The opposite order
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Restricts records by date
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DateFilter {
    /// No restriction
    #[default]
    Any,
    /// A single date, as `YYYY-MM-DD`
    On(String),
    /// An inclusive range; either end may be open
    Between {
        /// The first date included
        start: Option<String>,
        /// The last date included
        end: Option<String>,
    },
}

impl DateFilter {
    fn apply(&self, options: RequestOptions) -> RequestOptions {
        match self {
            Self::Any => options,
            Self::On(date) => options.with_query("date", date),
            Self::Between { start, end } => options
                .with_optional_query("start_date", start.as_deref())
                .with_optional_query("end_date", end.as_deref()),
        }
    }
}

/// Selects a page of attendance records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendanceQuery {
    /// The page to return, starting at 1
    pub page: u32,
    /// The column to sort by
    pub sort_by: String,
    /// The sort direction
    pub order: SortOrder,
    /// Only records for this event UUID
    pub event: Option<String>,
    /// Only records for this group UUID
    pub group: Option<String>,
    /// Only records within these dates
    pub dates: DateFilter,
}

impl Default for AttendanceQuery {
    fn default() -> Self {
        Self {
            page: 1,
            sort_by: "attendance_date".to_owned(),
            order: SortOrder::Desc,
            event: None,
            group: None,
            dates: DateFilter::Any,
        }
    }
}

impl AttendanceQuery {
    fn to_options(&self) -> RequestOptions {
        let options = RequestOptions::get()
            .with_query("page", self.page)
            .with_query("sort_by", &self.sort_by)
            .with_query("order", self.order.as_str())
            .with_optional_query("event", self.event.as_deref())
            .with_optional_query("group", self.group.as_deref());
        self.dates.apply(options)
    }
}

/// The fields submitted to record an attendance
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttendanceForm {
    /// The student who attended
    pub student_uuid: String,
    /// The event attended
    pub event_uuid: String,
    /// The date attended, as `YYYY-MM-DD`
    pub date: String,
}

/// Fetches a page of attendance records
pub async fn list<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    query: &AttendanceQuery,
) -> Result<AttendancePage, ClientError> {
    let envelope: super::Envelope<AttendancePage> =
        client.http(ATTENDANCES_PATH, query.to_options()).await?;
    Ok(envelope.data)
}

/// Records a single attendance
pub async fn record<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    form: &AttendanceForm,
) -> Result<(), ClientError> {
    super::send_json(client, ATTENDANCE_PATH, RequestOptions::post(), form).await
}

/// Records attendance for many students at one event, concurrently
///
/// Failures are reported by student UUID without affecting the others.
#[tracing::instrument(skip(client, student_uuids))]
pub async fn record_many<C: Clock + Send + Sync + 'static>(
    client: &AuthenticatedClient<C>,
    event_uuid: &str,
    date: &str,
    student_uuids: impl IntoIterator<Item = String>,
) -> BatchOutcome<String> {
    super::run_batch(student_uuids, |student_uuid| {
        let client = client.clone();
        let form = AttendanceForm {
            student_uuid,
            event_uuid: event_uuid.to_owned(),
            date: date.to_owned(),
        };
        async move { record(&client, &form).await }
    })
    .await
}

/// Deletes an attendance record
pub async fn delete<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    attendance_id: &str,
) -> Result<(), ClientError> {
    let path = format!("{ATTENDANCE_PATH}/{attendance_id}");
    super::send(client, &path, RequestOptions::delete()).await
}

/// Downloads the full spreadsheet for an event
///
/// Events are selected by name, not UUID.
pub async fn export_excel<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    event_name: &str,
) -> Result<Bytes, ClientError> {
    let options = RequestOptions::get().with_query("event", event_name);
    client.download(EXCEL_PATH, options).await
}

/// Downloads the spreadsheet for an event restricted to some dates
pub async fn export_excel_by_date<C: Clock + Send + Sync>(
    client: &AuthenticatedClient<C>,
    event_name: &str,
    dates: &DateFilter,
) -> Result<Bytes, ClientError> {
    let options = dates.apply(RequestOptions::get().with_query("event", event_name));
    client.download(DATE_EXCEL_PATH, options).await
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use reqwest::Method;
    use tally_reqwest::testing::{MockBackend, MockResponse};

    use super::*;
    use crate::api::test_support::signed_in_client;

    const PAGE: &str = r#"{"data":{
        "attendances":[{"attendance_id":"a-1","attendance_student_id":"s-1","attendance_event_id":"e-1","attendance_group_id":"g-1","attendance_date":"2024-03-01"}],
        "total_entries":21,"total_pages":3,"current_page":2
    }}"#;

    mod list {
        use super::*;

        #[tokio::test]
        async fn sends_paging_sorting_and_filters() -> Result<()> {
            let backend = MockBackend::new();
            backend.on(Method::GET, ATTENDANCES_PATH, MockResponse::json(200, PAGE));
            let client = signed_in_client(&backend).await?;

            let query = AttendanceQuery {
                page: 2,
                sort_by: "student_name".to_owned(),
                order: SortOrder::Asc,
                event: Some("e-1".to_owned()),
                group: None,
                dates: DateFilter::Between {
                    start: Some("2024-03-01".to_owned()),
                    end: None,
                },
            };
            let page = list(&client, &query).await?;

            assert_eq!(page.total_entries, 21);
            assert_eq!(page.current_page, 2);
            assert_eq!(page.attendances[0].attendance_student_id, "s-1");

            let seen = backend.last_request().unwrap();
            assert_eq!(
                seen.query.as_deref(),
                Some("page=2&sort_by=student_name&order=asc&event=e-1&start_date=2024-03-01")
            );
            Ok(())
        }

        #[tokio::test]
        async fn single_dates_use_the_date_parameter() -> Result<()> {
            let backend = MockBackend::new();
            backend.on(Method::GET, ATTENDANCES_PATH, MockResponse::json(200, PAGE));
            let client = signed_in_client(&backend).await?;

            let query = AttendanceQuery {
                dates: DateFilter::On("2024-03-01".to_owned()),
                ..AttendanceQuery::default()
            };
            list(&client, &query).await?;

            let seen = backend.last_request().unwrap();
            assert_eq!(
                seen.query.as_deref(),
                Some("page=1&sort_by=attendance_date&order=desc&date=2024-03-01")
            );
            Ok(())
        }
    }

    mod record_many {
        use super::*;

        #[tokio::test]
        async fn reports_each_failure_by_student() -> Result<()> {
            let backend = MockBackend::new();
            backend
                .on(Method::POST, ATTENDANCE_PATH, MockResponse::json(201, r#"{"data":{}}"#))
                .on(
                    Method::POST,
                    ATTENDANCE_PATH,
                    MockResponse::json(409, r#"{"message":"Already recorded"}"#),
                );
            let client = signed_in_client(&backend).await?;

            let outcome = record_many(
                &client,
                "e-1",
                "2024-03-01",
                ["s-1", "s-2"].map(String::from),
            )
            .await;

            assert_eq!(outcome.succeeded, 1);
            assert_eq!(outcome.failed.len(), 1);
            assert_eq!(outcome.failed[0].1.to_string(), "Already recorded");
            assert!(backend.requests().iter().all(|request| {
                request.body["event_uuid"] == "e-1" && request.body["date"] == "2024-03-01"
            }));
            Ok(())
        }

        #[tokio::test]
        async fn empty_batches_succeed_without_requests() -> Result<()> {
            let backend = MockBackend::new();
            let client = signed_in_client(&backend).await?;

            let outcome = record_many(&client, "e-1", "2024-03-01", Vec::new()).await;

            assert!(outcome.is_complete());
            assert_eq!(outcome.succeeded, 0);
            assert!(backend.requests().is_empty());
            Ok(())
        }
    }

    mod export {
        use super::*;

        #[tokio::test]
        async fn full_export_selects_the_event_by_name() -> Result<()> {
            let backend = MockBackend::new();
            backend.on(
                Method::GET,
                EXCEL_PATH,
                MockResponse::bytes(200, &b"PK\x03\x04"[..], "application/vnd.ms-excel"),
            );
            let client = signed_in_client(&backend).await?;

            let file = export_excel(&client, "Friday Night").await?;

            assert_eq!(&file[..], b"PK\x03\x04");
            let seen = backend.last_request().unwrap();
            assert_eq!(seen.query.as_deref(), Some("event=Friday+Night"));
            assert!(seen.authorization.is_some());
            Ok(())
        }

        #[tokio::test]
        async fn dated_export_carries_the_range() -> Result<()> {
            let backend = MockBackend::new();
            backend.on(
                Method::GET,
                DATE_EXCEL_PATH,
                MockResponse::bytes(200, &b"xlsx"[..], "application/vnd.ms-excel"),
            );
            let client = signed_in_client(&backend).await?;

            let dates = DateFilter::Between {
                start: Some("2024-01-01".to_owned()),
                end: Some("2024-01-31".to_owned()),
            };
            export_excel_by_date(&client, "Camp", &dates).await?;

            let seen = backend.last_request().unwrap();
            assert_eq!(
                seen.query.as_deref(),
                Some("event=Camp&start_date=2024-01-01&end_date=2024-01-31")
            );
            Ok(())
        }

        #[tokio::test]
        async fn failed_exports_are_errors() -> Result<()> {
            let backend = MockBackend::new();
            backend.on(
                Method::GET,
                EXCEL_PATH,
                MockResponse::json(404, r#"{"message":"Event not found"}"#),
            );
            let client = signed_in_client(&backend).await?;

            let error = export_excel(&client, "Nope").await.unwrap_err();

            assert_eq!(error.to_string(), "Event not found");
            Ok(())
        }
    }
}
