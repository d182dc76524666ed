use thiserror::Error;

use super::model::LogEntry;
use super::request_url::{self, UrlError};
use crate::combined::RequestEntry;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("couldn't parse request url `{url}`: {source}")]
    Url {
        url: String,
        #[source]
        source: UrlError,
    },
    #[error("log entry {0:?} has no http request")]
    MissingHttpRequest(String),
}

/// Path component of `url`, host and query are dropped.
fn request_path(url: &str) -> Result<String, ConvertError> {
    request_url::path(url).map_err(|source| ConvertError::Url {
        url: url.to_string(),
        source,
    })
}

impl TryFrom<&LogEntry> for RequestEntry {
    type Error = ConvertError;
    fn try_from(entry: &LogEntry) -> Result<Self, Self::Error> {
        // nothing in the payload is used, only the request metadata
        let req = entry
            .http_request
            .as_ref()
            .ok_or_else(|| ConvertError::MissingHttpRequest(entry.insert_id.clone()))?;

        Ok(RequestEntry {
            remote_addr: req.remote_ip.clone(),
            identity: String::new(),
            user: String::new(),
            requested_at: entry.timestamp,
            method: req.request_method.clone(),
            path: request_path(&req.request_url)?,
            protocol: req.protocol.clone(),
            status_code: req.status,
            // the backend defaults a missing size to zero
            response_size: Some(req.response_size),
            referer: req.referer.clone(),
            user_agent: req.user_agent.clone(),
        })
    }
}

impl TryFrom<LogEntry> for RequestEntry {
    type Error = ConvertError;
    fn try_from(entry: LogEntry) -> Result<Self, Self::Error> {
        RequestEntry::try_from(&entry)
    }
}
