//! The seam between the retrieval pipeline and whatever speaks to Cloud Logging.

use async_trait::async_trait;
use thiserror::Error;

use super::model::{ListRequest, ListResponse, LogEntry, TailRequest};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("couldn't connect: {0}")]
    Connect(String),
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("backend returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("tail stream failed: {0}")]
    Stream(String),
    #[error("couldn't get access token: {0}")]
    Auth(#[from] gcp_auth::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("couldn't parse response: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Quota errors are transient, everything else is not.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, BackendError::QuotaExhausted(_))
    }
}

/// Creates one [`Connection`] per retrieval call.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// `scope` is the Firebase site, which doubles as the quota project.
    async fn connect(&self, scope: &str) -> Result<Self::Connection, BackendError>;
}

/// A connection owned by a single fetch or tail. Dropping it closes it.
#[async_trait]
pub trait Connection: Send {
    type Sink: TailSink + 'static;
    type Source: TailSource + 'static;

    /// Fetch a single page.
    async fn list_entries(&mut self, req: &ListRequest) -> Result<ListResponse, BackendError>;

    /// Open a bidirectional tail stream, split into its two halves so they can
    /// be driven from different tasks.
    async fn tail_entries(&mut self) -> Result<(Self::Sink, Self::Source), BackendError>;
}

/// The sending half of a tail stream.
#[async_trait]
pub trait TailSink: Send {
    async fn send(&mut self, req: TailRequest) -> Result<(), BackendError>;
}

/// The receiving half of a tail stream.
#[async_trait]
pub trait TailSource: Send {
    /// Next batch of entries, `Ok(None)` once the stream ended cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<LogEntry>>, BackendError>;
}
