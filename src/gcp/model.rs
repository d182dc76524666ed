//! Wire types of the Cloud Logging API (`v2`), as far as they are used here.
//!
//! Only the fields the converter reads are modelled, everything else in the
//! response is ignored by serde.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// A single log entry.
///
/// <https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry>
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique (per timestamp) id assigned by the backend
    #[serde(default)]
    pub insert_id: String,
    /// Example: `2020-02-23T01:02:03.000004567Z`
    pub timestamp: DateTime<FixedOffset>,
    /// Only present for request logs
    #[serde(default)]
    pub http_request: Option<HttpRequest>,
}

/// The `httpRequest` field of a [`LogEntry`].
///
/// Proto3 JSON omits fields that hold their default value, so every field
/// defaults here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRequest {
    pub request_method: String,
    /// Example: `https://www.example.com/favicon.ico`
    pub request_url: String,
    pub status: i32,
    /// `int64` is transported as a JSON string
    #[serde(deserialize_with = "int64")]
    pub response_size: i64,
    pub user_agent: String,
    pub remote_ip: String,
    pub referer: String,
    /// Documented as `HTTP/1.1`, but Firebase Hosting reports `https`
    pub protocol: String,
}

/// Body of `POST /v2/entries:list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// Example: `projects/my-project`
    pub resource_names: Vec<String>,
    pub filter: String,
    /// Example: `timestamp asc`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    pub page_size: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// Response of `POST /v2/entries:list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResponse {
    pub entries: Vec<LogEntry>,
    /// Absent or empty on the last page
    pub next_page_token: Option<String>,
}

impl ListResponse {
    /// The token for the next page, `None` if this was the last page.
    pub fn next_page(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Subscription sent once over a tail stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailRequest {
    pub resource_names: Vec<String>,
    pub filter: String,
}

/// Error body returned by Google APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Status,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Status {
    pub code: i32,
    pub message: String,
    /// Example: `RESOURCE_EXHAUSTED`
    pub status: String,
}

/// Accept an `int64` either as a JSON string or as a number.
fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        String(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
