//! Firebase Hosting request logs from Google Cloud Logging.

mod auth;
pub use auth::{DefaultCredentials, StaticToken, TokenSource};

mod backend;
pub use backend::{BackendError, Connection, Connector, TailSink, TailSource};

mod client;
pub use client::{HttpConnection, HttpConnector};

mod convert;
pub use convert::ConvertError;

mod fetch;
pub use fetch::{build_filter, fetch_logs, FetchOptions, RetryPolicy, PAGE_SIZE};

pub mod model;
pub use model::LogEntry;

mod request_url;
pub use request_url::UrlError;

mod tail;
pub use tail::{tail_logs, tail_request, BATCH_CHANNEL_CAPACITY};

#[cfg(test)]
pub(crate) mod testing;
