//! Reconnecting server-sent-events client.
//!
//! Speaks just enough of the text/event-stream protocol for the watcher:
//! blank-line framing, `event`/`data`/`id`/`retry` fields, `Last-Event-ID`
//! resumption, and server-directed reconnect delay. Listeners run
//! synchronously on the read path in registration order, so a slow listener
//! delays further stream consumption.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Event name used when a record never set `event:`.
const DEFAULT_EVENT: &str = "message";

/// Initial reconnect wait. The stream spec leaves this user-agent-defined,
/// "probably in the region of a few seconds".
const INITIAL_RETRY_WAIT: Duration = Duration::from_millis(1000);

/// One decoded stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("bad status code {0}")]
    BadStatus(StatusCode),
    #[error("bad content-type {0:?}")]
    BadContentType(String),
    #[error("connect failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("read failed: {0}")]
    Read(#[source] reqwest::Error),
}

type EventListener = Box<dyn FnMut(&str) + Send>;
type ErrorListener = Box<dyn FnMut(&StreamError) + Send>;

/// Cheap cancellation handle for one [`EventSource`]. Cloneable so
/// listeners and other tasks can close the stream mid-read.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Close the stream. Idempotent and safe to call concurrently with an
    /// in-progress read: the blocked read unblocks promptly and no further
    /// reconnect attempt is made.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Reconnecting client for one stream URL.
///
/// Register listeners, then call [`open`](Self::open). The listener table is
/// fixed once the stream starts, so dispatch needs no lock.
pub struct EventSource {
    client: reqwest::Client,
    url: Url,
    headers: Vec<(String, String)>,
    listeners: HashMap<String, Vec<EventListener>>,
    error_listener: Option<ErrorListener>,
    retry_wait: Duration,
    last_event_id: Option<String>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl EventSource {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            headers: Vec::new(),
            listeners: HashMap::new(),
            error_listener: None,
            retry_wait: INITIAL_RETRY_WAIT,
            last_event_id: None,
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Send an extra header on every connection attempt.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    /// Register a listener for `event`. Listeners for the same event fire
    /// in registration order.
    pub fn on(&mut self, event: &str, listener: impl FnMut(&str) + Send + 'static) {
        self.listeners
            .entry(event.to_owned())
            .or_default()
            .push(Box::new(listener));
    }

    /// Register the error listener. Stream errors are delivered here and
    /// never abort the process.
    pub fn on_error(&mut self, listener: impl FnMut(&StreamError) + Send + 'static) {
        self.error_listener = Some(Box::new(listener));
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            closed: self.closed.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the stream until closed: one connection attempt after another,
    /// sleeping for the server-directed reconnect wait in between.
    ///
    /// The future resolving is the end-of-stream notification. It resolves
    /// exactly once, and no listener fires after it resolves.
    pub async fn open(mut self) {
        loop {
            self.attempt().await;
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.retry_wait) => {}
            }
        }
        self.cancel.cancel();
    }

    /// One connection attempt: GET the stream URL and consume records until
    /// end-of-stream, a read error, or cancellation.
    async fn attempt(&mut self) {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(id) = &self.last_event_id {
            request = request.header("Last-Event-ID", id.clone());
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        // No per-request timeout here: the stream is expected to stay open
        // far longer than an ordinary request.
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return,
            sent = request.send() => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                self.emit_error(&StreamError::Connect(err));
                return;
            }
        };

        if !response.status().is_success() {
            self.emit_error(&StreamError::BadStatus(response.status()));
            return;
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.starts_with("text/event-stream") {
            self.emit_error(&StreamError::BadContentType(content_type));
            return;
        }

        let mut parser = FrameParser::new();
        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        'read: loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => break 'read,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(nl) = buf.iter().position(|&b| b == b'\n') {
                        let mut line: Vec<u8> = buf.drain(..=nl).collect();
                        line.pop();
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        let line = String::from_utf8_lossy(&line).into_owned();
                        if let Some(event) = parser.feed(&line) {
                            self.dispatch(event);
                        }
                        if self.closed.load(Ordering::SeqCst) {
                            break 'read;
                        }
                    }
                }
                Some(Err(err)) => {
                    self.emit_error(&StreamError::Read(err));
                    break 'read;
                }
                None => break 'read,
            }
        }

        // Carry resumption state into the next attempt.
        if parser.last_event_id.is_some() {
            self.last_event_id = parser.last_event_id.take();
        }
        if let Some(wait) = parser.retry.take() {
            self.retry_wait = wait;
        }
    }

    fn dispatch(&mut self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(listeners) = self.listeners.get_mut(&event.name) {
            for listener in listeners {
                listener(&event.data);
            }
        }
    }

    fn emit_error(&mut self, err: &StreamError) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = &mut self.error_listener {
            listener(err);
        }
    }
}

// ============================================================================
// Frame Parsing
// ============================================================================

/// Line-level field accumulator for one connection attempt.
///
/// Feed lines one at a time; a blank line yields the accumulated record, if
/// any. The latest `id` and `retry` values are exposed for the reconnect
/// logic.
#[derive(Debug, Default)]
pub struct FrameParser {
    event: Option<String>,
    data: String,
    /// Most recent `id:` field value seen on this attempt.
    pub last_event_id: Option<String>,
    /// Most recent well-formed `retry:` value.
    pub retry: Option<Duration>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator). Returns a complete event when
    /// a blank line flushes a non-empty payload.
    pub fn feed(&mut self, line: &str) -> Option<Event> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(Event {
                name: self
                    .event
                    .take()
                    .unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
                data: std::mem::take(&mut self.data),
            });
        }

        let (field, value) = match line.split_once(':') {
            // A single leading space after the colon is not part of the value.
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "id" => self.last_event_id = Some(value.to_owned()),
            // Applied whenever the value parses; a malformed retry is ignored.
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }
}
