//! [`Connector`] for the Cloud Logging REST API.
//!
//! The REST API has no streaming tail, so tailing is done by polling
//! `entries:list` for everything since shortly before the newest entry seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::tls::Version;
use reqwest::{RequestBuilder, StatusCode};
use tokio::sync::{oneshot, OnceCell};
use tokio::time::{Interval, MissedTickBehavior};

use super::auth::{DefaultCredentials, StaticToken, TokenSource};
use super::backend::{BackendError, Connection, Connector, TailSink, TailSource};
use super::fetch::PAGE_SIZE;
use super::model::{ErrorResponse, ListRequest, ListResponse, LogEntry, TailRequest};
use crate::config::Config;
use crate::quote::quoted;

/// Lower bound for the poll interval of a tail.
const MIN_TAIL_POLL: Duration = Duration::from_secs(1);

fn elapsed_ms(start: &Instant) -> i64 {
    start.elapsed().as_millis().min(i64::MAX as u128) as i64
}

pub struct HttpConnector {
    config: Config,
    /// Shared by all connections, set up on first connect
    tokens: OnceCell<Arc<dyn TokenSource>>,
}

impl HttpConnector {
    /// Authenticates with `GCP_CLF_ACCESS_TOKEN` if set, with the application
    /// default credentials otherwise.
    pub fn new(config: Config) -> HttpConnector {
        HttpConnector {
            config,
            tokens: OnceCell::new(),
        }
    }

    pub fn with_tokens(config: Config, tokens: Arc<dyn TokenSource>) -> HttpConnector {
        HttpConnector {
            config,
            tokens: OnceCell::from(tokens),
        }
    }

    async fn tokens(&self) -> Result<Arc<dyn TokenSource>, BackendError> {
        let tokens = self
            .tokens
            .get_or_try_init(|| async {
                let tokens: Arc<dyn TokenSource> = match &self.config.access_token {
                    Some(token) => {
                        log::debug!("using access token from the environment");
                        Arc::new(StaticToken(token.clone()))
                    }
                    None => Arc::new(DefaultCredentials::new().await?),
                };
                Ok::<_, BackendError>(tokens)
            })
            .await?;
        Ok(Arc::clone(tokens))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Connection = HttpConnection;

    async fn connect(&self, scope: &str) -> Result<HttpConnection, BackendError> {
        let tokens = self
            .tokens()
            .await
            .map_err(|err| BackendError::Connect(err.to_string()))?;
        // fail here rather than on the first request
        tokens
            .token()
            .await
            .map_err(|err| BackendError::Connect(err.to_string()))?;
        let tail_lag = chrono::Duration::from_std(self.config.tail_lag)
            .map_err(|_| BackendError::Connect("tail lag is out of range".to_string()))?;

        let client = reqwest::Client::builder()
            .https_only(self.config.endpoint.starts_with("https://"))
            .min_tls_version(Version::TLS_1_2)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| BackendError::Connect(format!("invalid http client configuration: {}", err)))?;

        log::debug!(
            "connected to {} (quota project {})",
            self.config.endpoint,
            scope
        );

        Ok(HttpConnection {
            inner: Arc::new(Inner {
                client,
                endpoint: self.config.endpoint.clone(),
                tokens,
                quota_project: scope.to_string(),
            }),
            tail_poll: self.config.tail_poll.max(MIN_TAIL_POLL),
            tail_lag,
        })
    }
}

struct Inner {
    /// Use to make REST requests
    client: reqwest::Client,
    /// Example: `https://logging.googleapis.com`
    endpoint: String,
    /// Asked for a token on every request
    tokens: Arc<dyn TokenSource>,
    /// Billed for the read requests
    quota_project: String,
}

impl Inner {
    async fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        let token = self.tokens.token().await?;
        Ok(req
            .bearer_auth(token)
            .header("x-goog-user-project", &self.quota_project))
    }

    /// `POST /v2/entries:list`
    async fn list(&self, req: &ListRequest) -> Result<ListResponse, BackendError> {
        let url = format!("{}/v2/entries:list", self.endpoint);
        let start = Instant::now();

        let resp = self
            .authorized(self.client.post(&url))
            .await?
            .json(req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        log::debug!(
            "list request to {} ({}) took {}ms",
            url,
            status.as_u16(),
            elapsed_ms(&start)
        );

        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Quota errors come as `429` or with the `RESOURCE_EXHAUSTED` status.
fn status_error(status: StatusCode, body: &str) -> BackendError {
    let parsed = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .map(|resp| resp.error);
    let message = match &parsed {
        Some(s) if !s.message.is_empty() => s.message.clone(),
        _ => body.trim().to_string(),
    };

    let quota = status == StatusCode::TOO_MANY_REQUESTS
        || parsed.map_or(false, |s| s.status == "RESOURCE_EXHAUSTED");
    if quota {
        BackendError::QuotaExhausted(message)
    } else {
        BackendError::Status {
            code: status.as_u16(),
            message,
        }
    }
}

/// Connection to the REST API. The underlying http client is dropped with it.
pub struct HttpConnection {
    inner: Arc<Inner>,
    tail_poll: Duration,
    tail_lag: chrono::Duration,
}

#[async_trait]
impl Connection for HttpConnection {
    type Sink = PollSink;
    type Source = PollSource;

    async fn list_entries(&mut self, req: &ListRequest) -> Result<ListResponse, BackendError> {
        self.inner.list(req).await
    }

    async fn tail_entries(&mut self) -> Result<(PollSink, PollSource), BackendError> {
        let (tx, rx) = oneshot::channel();

        let mut interval = tokio::time::interval(self.tail_poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok((
            PollSink { request: Some(tx) },
            PollSource {
                inner: Arc::clone(&self.inner),
                request: Some(rx),
                state: None,
                lag: self.tail_lag,
                interval,
            },
        ))
    }
}

/// Hands the subscription over to the [`PollSource`].
pub struct PollSink {
    request: Option<oneshot::Sender<TailRequest>>,
}

#[async_trait]
impl TailSink for PollSink {
    async fn send(&mut self, req: TailRequest) -> Result<(), BackendError> {
        let tx = self
            .request
            .take()
            .ok_or_else(|| BackendError::Stream("tail request was already sent".to_string()))?;
        tx.send(req)
            .map_err(|_| BackendError::Stream("tail stream is closed".to_string()))
    }
}

/// Polls for entries newer than the ones already returned.
pub struct PollSource {
    inner: Arc<Inner>,
    request: Option<oneshot::Receiver<TailRequest>>,
    state: Option<PollState>,
    lag: chrono::Duration,
    interval: Interval,
}

#[async_trait]
impl TailSource for PollSource {
    async fn recv(&mut self) -> Result<Option<Vec<LogEntry>>, BackendError> {
        if self.state.is_none() {
            // the stream ends cleanly if the sink is dropped without sending
            let Some(request) = self.request.take() else {
                return Ok(None);
            };
            let Ok(req) = request.await else {
                return Ok(None);
            };
            log::debug!("polling for new entries with filter {}", req.filter);
            self.state = Some(PollState::new(req, Utc::now(), self.lag));
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        loop {
            self.interval.tick().await;
            let batch = state.poll(&self.inner).await?;
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
    }
}

/// Each poll asks for everything since `lag` before the newest entry, so
/// entries that show up late are still found. Entries already returned are
/// skipped by insert id.
struct PollState {
    req: TailRequest,
    /// Entries before this predate the tail
    start: DateTime<Utc>,
    /// Timestamp of the newest entry returned so far
    newest: DateTime<Utc>,
    lag: chrono::Duration,
    /// Entries returned within the lag window, with their timestamps
    seen: HashMap<String, DateTime<Utc>>,
}

impl PollState {
    fn new(req: TailRequest, now: DateTime<Utc>, lag: chrono::Duration) -> PollState {
        PollState {
            req,
            start: now,
            newest: now,
            lag,
            seen: HashMap::new(),
        }
    }

    /// Lower bound of the next poll.
    fn floor(&self) -> DateTime<Utc> {
        (self.newest - self.lag).max(self.start)
    }

    fn list_request(&self) -> ListRequest {
        let floor = self.floor().to_rfc3339_opts(SecondsFormat::Nanos, true);
        ListRequest {
            resource_names: self.req.resource_names.clone(),
            filter: format!("{} AND timestamp>={}", self.req.filter, quoted(&floor)),
            order_by: Some("timestamp asc".to_string()),
            page_size: PAGE_SIZE,
            page_token: None,
        }
    }

    /// Record `entry`, `false` if it was returned before.
    fn advance(&mut self, entry: &LogEntry) -> bool {
        let timestamp = entry.timestamp.with_timezone(&Utc);
        if timestamp < self.start || self.seen.contains_key(&entry.insert_id) {
            return false;
        }
        self.seen.insert(entry.insert_id.clone(), timestamp);

        if timestamp > self.newest {
            self.newest = timestamp;
            // no later poll returns entries below the floor
            let floor = self.floor();
            self.seen.retain(|_, seen_at| *seen_at >= floor);
        }
        true
    }

    async fn poll(&mut self, inner: &Inner) -> Result<Vec<LogEntry>, BackendError> {
        let mut req = self.list_request();
        let mut out = Vec::new();

        loop {
            let page = inner.list(&req).await?;
            let next_page = page.next_page().map(str::to_string);

            for entry in page.entries {
                if self.advance(&entry) {
                    out.push(entry);
                }
            }

            match next_page {
                Some(token) => req.page_token = Some(token),
                None => break,
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use reqwest::header::AUTHORIZATION;
    use reqwest::StatusCode;

    use super::{status_error, HttpConnector, PollState};
    use crate::config::Config;
    use crate::gcp::auth::TokenSource;
    use crate::gcp::backend::{BackendError, Connector};
    use crate::gcp::tail::tail_request;
    use crate::gcp::testing::entry;

    fn at(entry_url: &str, ts: &str) -> crate::gcp::LogEntry {
        let mut e = entry(entry_url);
        e.timestamp = DateTime::parse_from_rfc3339(ts).unwrap();
        e
    }

    /// Hands out `token-1`, `token-2`, ...
    #[derive(Default)]
    struct Rotating {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for Rotating {
        async fn token(&self) -> Result<String, BackendError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }
    }

    #[test]
    fn quota_by_status_code() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, BackendError::QuotaExhausted(m) if m == "slow down"));
    }

    #[test]
    fn quota_by_body() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = status_error(StatusCode::FORBIDDEN, body);
        assert!(matches!(err, BackendError::QuotaExhausted(m) if m == "Quota exceeded"));
    }

    #[test]
    fn other_status() {
        let body = r#"{"error": {"code": 403, "message": "denied", "status": "PERMISSION_DENIED"}}"#;
        let err = status_error(StatusCode::FORBIDDEN, body);
        assert!(matches!(err, BackendError::Status { code: 403, message } if message == "denied"));

        let err = status_error(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>\n");
        assert!(
            matches!(err, BackendError::Status { code: 502, message } if message == "<html>bad gateway</html>")
        );
    }

    #[tokio::test]
    async fn every_request_gets_a_fresh_token() {
        let config = Config {
            endpoint: "http://localhost:8080".to_string(),
            ..Config::default()
        };
        let connector = HttpConnector::with_tokens(config, Arc::new(Rotating::default()));
        // token-1 is used up by connect
        let conn = connector.connect("my-site").await.unwrap();

        for want in ["Bearer token-2", "Bearer token-3"] {
            let req = conn
                .inner
                .authorized(conn.inner.client.post("http://localhost:8080/v2/entries:list"))
                .await
                .unwrap()
                .build()
                .unwrap();
            assert_eq!(req.headers()[AUTHORIZATION], want);
            assert_eq!(req.headers()["x-goog-user-project"], "my-site");
        }
    }

    #[tokio::test]
    async fn static_token_from_config() {
        let config = Config {
            access_token: Some("ya29.token".to_string()),
            endpoint: "http://localhost:8080".to_string(),
            ..Config::default()
        };
        let connector = HttpConnector::new(config);
        let conn = connector.connect("my-site").await.unwrap();
        let req = conn
            .inner
            .authorized(conn.inner.client.get("http://localhost:8080/"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer ya29.token");
    }

    #[test]
    fn poll_filter_starts_at_tail_start() {
        let now = Utc.with_ymd_and_hms(2020, 2, 23, 10, 11, 12).unwrap();
        let state = PollState::new(tail_request("my-site"), now, Duration::seconds(30));
        let req = state.list_request();
        assert_eq!(
            req.filter,
            concat!(
                r#"resource.type="firebase_domain" AND resource.labels.site_name="my-site""#,
                r#" AND timestamp>="2020-02-23T10:11:12.000000000Z""#
            )
        );
        assert_eq!(req.order_by.as_deref(), Some("timestamp asc"));
        assert_eq!(req.resource_names, ["projects/my-site"]);
    }

    #[test]
    fn poll_filter_lags_behind_newest_entry() {
        let now = Utc.with_ymd_and_hms(2020, 2, 23, 10, 0, 0).unwrap();
        let mut state = PollState::new(tail_request("my-site"), now, Duration::seconds(30));
        assert!(state.advance(&at("/a", "2020-02-23T10:01:00Z")));
        assert!(state
            .list_request()
            .filter
            .ends_with(r#"timestamp>="2020-02-23T10:00:30.000000000Z""#));
    }

    #[test]
    fn poll_skips_seen_entries() {
        let now = Utc.with_ymd_and_hms(2020, 2, 23, 10, 0, 0).unwrap();
        let mut state = PollState::new(tail_request("my-site"), now, Duration::seconds(5));

        assert!(!state.advance(&at("/old", "2020-02-23T09:59:59Z")));
        assert!(state.advance(&at("/a", "2020-02-23T10:00:01Z")));
        assert!(state.advance(&at("/b", "2020-02-23T10:00:01Z")));
        // polled again from within the lag window
        assert!(!state.advance(&at("/a", "2020-02-23T10:00:01Z")));
        assert!(!state.advance(&at("/b", "2020-02-23T10:00:01Z")));
        assert!(state.advance(&at("/c", "2020-02-23T10:00:02Z")));
        assert_eq!(
            state.newest,
            Utc.with_ymd_and_hms(2020, 2, 23, 10, 0, 2).unwrap()
        );
    }

    #[test]
    fn late_entry_is_returned() {
        let now = Utc.with_ymd_and_hms(2020, 2, 23, 10, 0, 0).unwrap();
        let mut state = PollState::new(tail_request("my-site"), now, Duration::seconds(5));

        assert!(state.advance(&at("/c", "2020-02-23T10:00:02Z")));
        // ingested after /c but older
        assert!(state.advance(&at("/late", "2020-02-23T10:00:01Z")));
        assert!(!state.advance(&at("/late", "2020-02-23T10:00:01Z")));
    }

    #[test]
    fn seen_entries_are_pruned() {
        let now = Utc.with_ymd_and_hms(2020, 2, 23, 10, 0, 0).unwrap();
        let mut state = PollState::new(tail_request("my-site"), now, Duration::seconds(5));

        assert!(state.advance(&at("/a", "2020-02-23T10:00:01Z")));
        assert!(state.advance(&at("/b", "2020-02-23T10:00:03Z")));
        assert_eq!(state.seen.len(), 2);

        assert!(state.advance(&at("/c", "2020-02-23T10:00:20Z")));
        assert_eq!(state.seen.len(), 1);
        assert!(state.seen.contains_key("/c"));
    }
}
