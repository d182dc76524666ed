use std::fmt::{Display, Write};

use chrono::{DateTime, FixedOffset};

use crate::quote::write_quoted;

/// Layout of the bracketed timestamp, e.g. `23/Feb/2020:10:11:12 +0000`.
const TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// A single HTTP request as it would appear in an access log.
///
/// Rendering it with [`Display`] produces one line in the Combined Log Format:
///
/// ```text
/// 1.2.3.4 - - [23/Feb/2020:10:11:12 +0000] "GET /test https" 200 12345 example.com "Firefox 123.3.4"
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEntry {
    /// Client address, may be empty
    pub remote_addr: String,
    /// RFC 1413 identity, rendered as `-` if empty
    pub identity: String,
    /// Authenticated user, rendered as `-` if empty
    pub user: String,
    /// Rendered in its own offset, never converted to local time
    pub requested_at: DateTime<FixedOffset>,
    pub method: String,
    pub path: String,
    /// Example: `HTTP/1.1`, although Cloud Logging reports `https`
    pub protocol: String,
    pub status_code: i32,
    /// `None` means the size is unknown, which is not the same as zero bytes
    pub response_size: Option<i64>,
    /// Rendered as `-` if empty
    pub referer: String,
    pub user_agent: String,
}

impl Display for RequestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} [{}] ",
            self.remote_addr,
            dash_if_empty(&self.identity),
            dash_if_empty(&self.user),
            self.requested_at.format(TIME_FORMAT),
        )?;

        write_quoted(
            f,
            &format!("{} {} {}", self.method, self.path, self.protocol),
        )?;

        write!(f, " {} ", self.status_code)?;
        match self.response_size {
            Some(size) => write!(f, "{}", size)?,
            None => f.write_char('-')?,
        };
        write!(f, " {} ", dash_if_empty(&self.referer))?;

        write_quoted(f, &self.user_agent)
    }
}

fn dash_if_empty(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
