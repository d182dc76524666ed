//! Scripted in-memory backend for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;

use super::backend::{BackendError, Connection, Connector, TailSink, TailSource};
use super::model::{HttpRequest, ListRequest, ListResponse, LogEntry, TailRequest};

/// Reply to a single `list_entries` call
pub enum Reply {
    Page(Vec<LogEntry>),
    Err(BackendError),
}

/// Reply to a single `recv` call, the stream ends once all are used up
pub enum TailReply {
    Batch(Vec<LogEntry>),
    Err(BackendError),
    /// Never resolves
    Hang,
}

#[derive(Default)]
struct State {
    pages: VecDeque<Reply>,
    served_pages: usize,
    batches: VecDeque<TailReply>,
    list_requests: Vec<ListRequest>,
    tail_requests: Vec<TailRequest>,
    connections: usize,
    open_connections: usize,
    /// Tail sinks and sources not dropped yet
    open_streams: usize,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
    fail_connect: bool,
    fail_send: bool,
}

/// A request log for `url`.
pub fn entry(url: &str) -> LogEntry {
    LogEntry {
        insert_id: url.to_string(),
        timestamp: DateTime::parse_from_rfc3339("2020-02-23T10:11:12Z").unwrap(),
        http_request: Some(HttpRequest {
            request_method: "GET".to_string(),
            request_url: url.to_string(),
            status: 200,
            response_size: 1,
            protocol: "https".to_string(),
            ..HttpRequest::default()
        }),
    }
}

impl MockConnector {
    pub fn with_pages(pages: Vec<Reply>) -> MockConnector {
        let connector = MockConnector::default();
        connector.state.lock().pages = pages.into();
        connector
    }

    pub fn with_batches(batches: Vec<TailReply>) -> MockConnector {
        let connector = MockConnector::default();
        connector.state.lock().batches = batches.into();
        connector
    }

    pub fn failing() -> MockConnector {
        MockConnector {
            fail_connect: true,
            ..MockConnector::default()
        }
    }

    pub fn failing_send(self) -> MockConnector {
        MockConnector {
            fail_send: true,
            ..self
        }
    }

    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.state.lock().list_requests.clone()
    }

    pub fn tail_requests(&self) -> Vec<TailRequest> {
        self.state.lock().tail_requests.clone()
    }

    /// Connections made so far
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Connections not dropped yet
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }
}

pub struct MockConnection {
    state: Arc<Mutex<State>>,
    fail_send: bool,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.lock().open_connections -= 1;
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, _scope: &str) -> Result<MockConnection, BackendError> {
        if self.fail_connect {
            return Err(BackendError::Connect("no credentials".to_string()));
        }
        let mut state = self.state.lock();
        state.connections += 1;
        state.open_connections += 1;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            fail_send: self.fail_send,
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Sink = MockSink;
    type Source = MockSource;

    async fn list_entries(&mut self, req: &ListRequest) -> Result<ListResponse, BackendError> {
        let mut state = self.state.lock();
        state.list_requests.push(req.clone());

        match state.pages.pop_front() {
            None => Ok(ListResponse::default()),
            Some(Reply::Err(err)) => Err(err),
            Some(Reply::Page(entries)) => {
                state.served_pages += 1;
                let next_page_token =
                    (!state.pages.is_empty()).then(|| state.served_pages.to_string());
                Ok(ListResponse {
                    entries,
                    next_page_token,
                })
            }
        }
    }

    async fn tail_entries(&mut self) -> Result<(MockSink, MockSource), BackendError> {
        let batches = {
            let mut state = self.state.lock();
            state.open_streams += 2;
            std::mem::take(&mut state.batches)
        };
        Ok((
            MockSink {
                state: Arc::clone(&self.state),
                fail: self.fail_send,
            },
            MockSource {
                state: Arc::clone(&self.state),
                batches,
            },
        ))
    }
}

pub struct MockSink {
    state: Arc<Mutex<State>>,
    fail: bool,
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.state.lock().open_streams -= 1;
    }
}

#[async_trait]
impl TailSink for MockSink {
    async fn send(&mut self, req: TailRequest) -> Result<(), BackendError> {
        if self.fail {
            return Err(BackendError::Status {
                code: 400,
                message: "invalid filter".to_string(),
            });
        }
        self.state.lock().tail_requests.push(req);
        Ok(())
    }
}

pub struct MockSource {
    state: Arc<Mutex<State>>,
    batches: VecDeque<TailReply>,
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.state.lock().open_streams -= 1;
    }
}

#[async_trait]
impl TailSource for MockSource {
    async fn recv(&mut self) -> Result<Option<Vec<LogEntry>>, BackendError> {
        match self.batches.pop_front() {
            None => Ok(None),
            Some(TailReply::Batch(batch)) => Ok(Some(batch)),
            Some(TailReply::Err(err)) => Err(err),
            Some(TailReply::Hang) => std::future::pending().await,
        }
    }
}
