//! Bounded, paginated retrieval of historical request logs.

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};

use super::backend::{BackendError, Connection, Connector};
use super::model::{ListRequest, ListResponse};
use crate::cancel::Cancellation;
use crate::combined::RequestEntry;
use crate::error::{Error, Result};
use crate::quote::quoted;

/// Records per page.
///
/// The default read quota of Cloud Logging is only 60 requests per minute, so
/// large pages are the only way to get through a decent amount of logs.
pub const PAGE_SIZE: i32 = 1000;

/// Optional time bounds of a fetch, both inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Retry policy for pages that ran into the read quota
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries per page
    pub max_retries: usize,
    /// Backoff before the first retry, doubled for each further retry
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(8)
    }
}

impl RetryPolicy {
    /// Exponential backoff: 500ms, 1s, 2s, 4s, ... capped at 30s
    pub fn new(max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn should_retry(&self, attempt: usize, error: &BackendError) -> bool {
        attempt < self.max_retries && error.is_quota_exhausted()
    }

    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(u32::MAX as usize) as u32);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// The predicates every query starts with: Firebase Hosting logs of `site`.
pub fn base_filters(site: &str) -> Vec<String> {
    vec![
        r#"resource.type="firebase_domain""#.to_string(),
        format!("resource.labels.site_name={}", quoted(site)),
    ]
}

/// Join the base predicates with the optional time bounds.
pub fn build_filter(site: &str, opts: &FetchOptions) -> String {
    let mut filters = base_filters(site);
    if let Some(start) = opts.start {
        filters.push(format!("timestamp>={}", quoted(&rfc3339(start))));
    }
    if let Some(end) = opts.end {
        filters.push(format!("timestamp<={}", quoted(&rfc3339(end))));
    }
    filters.join(" AND ")
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn resource_name(site: &str) -> String {
    format!("projects/{}", site)
}

/// Fetch a single page, retrying while the read quota is exhausted.
async fn list_page<C: Connection>(
    conn: &mut C,
    req: &ListRequest,
    retry: &RetryPolicy,
    cancel: &mut Cancellation,
) -> Result<ListResponse> {
    let mut attempt = 0;

    loop {
        match cancel.run(conn.list_entries(req)).await? {
            Ok(page) => return Ok(page),
            Err(err) => {
                if !retry.should_retry(attempt, &err) {
                    return Err(Error::Backend(err));
                }

                let backoff = retry.backoff_duration(attempt);
                log::warn!(
                    "couldn't fetch page (attempt {}), retrying after {:?}: {}",
                    attempt + 1,
                    backoff,
                    err
                );
                cancel.run(tokio::time::sleep(backoff)).await?;

                attempt += 1;
            }
        }
    }
}

/// Fetch every request log of `site` within the bounds of `opts`.
///
/// Entries are returned in the order the backend returned them. Either all
/// entries are returned or an error, a single malformed entry fails the
/// whole fetch.
pub async fn fetch_logs<C: Connector>(
    connector: &C,
    site: &str,
    opts: &FetchOptions,
    retry: &RetryPolicy,
    mut cancel: Cancellation,
) -> Result<Vec<RequestEntry>> {
    let mut conn = cancel
        .run(connector.connect(site))
        .await?
        .map_err(Error::Connection)?;

    let mut req = ListRequest {
        resource_names: vec![resource_name(site)],
        filter: build_filter(site, opts),
        order_by: None,
        page_size: PAGE_SIZE,
        page_token: None,
    };
    log::debug!("fetching logs with filter {}", req.filter);

    let start = Instant::now();
    let mut pages = 0usize;
    let mut out = Vec::new();

    loop {
        let page = list_page(&mut conn, &req, retry, &mut cancel).await?;
        pages += 1;

        for entry in &page.entries {
            out.push(RequestEntry::try_from(entry)?);
        }
        log::debug!("page {} had {} entries", pages, page.entries.len());

        match page.next_page() {
            Some(token) => req.page_token = Some(token.to_string()),
            None => break,
        }
    }

    log::info!(
        "fetched {} entries in {} pages ({}ms)",
        out.len(),
        pages,
        start.elapsed().as_millis()
    );

    Ok(out)
}
