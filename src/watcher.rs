//! Simulated audience member.
//!
//! A watcher joins one room as a passive observer: it fetches the room page
//! for its CSRF token, opens the stroke stream, and classifies everything
//! that arrives. Strokes drawn before the watcher joined are backlog replay
//! and ignored; a stroke that takes longer than
//! [`STROKE_LATENCY_THRESHOLD`] to arrive is the point where a real viewer
//! gives up and closes the tab.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::fails::FailureLedger;
use crate::session::Session;
use crate::sse::{EventSource, StreamError};

/// A stroke arriving later than this counts as a latency violation and ends
/// the watch.
pub const STROKE_LATENCY_THRESHOLD: Duration = Duration::from_secs(5);

/// Bootstrap calls (the room page fetch) use a short timeout; only the
/// stream itself is long-lived.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(3);

/// One observed live stroke arrival.
#[derive(Debug, Clone)]
pub struct StrokeLog {
    pub received_at: DateTime<Utc>,
    pub room_id: i64,
    pub stroke_id: i64,
}

/// Stream payload fields the watcher inspects; everything else is opaque.
#[derive(Debug, Deserialize)]
struct Stroke {
    id: i64,
    created_at: DateTime<Utc>,
}

/// Everything a watcher accumulated, handed over after completion.
#[derive(Debug)]
pub struct WatcherLog {
    pub room_id: i64,
    pub strokes: Vec<StrokeLog>,
    pub errors: Vec<String>,
}

/// Written exactly once by `leave()`; read once before any stream opens.
enum StreamSlot {
    Idle,
    Open(crate::sse::StreamHandle),
    Left,
}

struct WatcherShared {
    room_id: i64,
    logs: Mutex<Vec<StrokeLog>>,
    errors: Mutex<Vec<String>>,
    slot: Mutex<StreamSlot>,
}

impl WatcherShared {
    fn record_error(&self, message: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message);
        }
    }

    fn is_left(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| matches!(*slot, StreamSlot::Left))
            .unwrap_or(true)
    }
}

/// Handle to one spawned watcher task.
pub struct RoomWatcher {
    shared: Arc<WatcherShared>,
    done: oneshot::Receiver<()>,
}

impl RoomWatcher {
    /// Spawn a watcher against `target`'s room `room_id`.
    ///
    /// The watcher runs in its own task; [`wait`](Self::wait) consumes the
    /// handle once the completion signal fires and returns the logs.
    pub fn spawn(target: &str, room_id: i64, fails: Arc<FailureLedger>) -> Self {
        let shared = Arc::new(WatcherShared {
            room_id,
            logs: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            slot: Mutex::new(StreamSlot::Idle),
        });
        let (done_tx, done) = oneshot::channel();
        let task_shared = shared.clone();
        let target = target.to_owned();
        tokio::spawn(async move {
            watch(&task_shared, &target, fails).await;
            // Completion fires exactly once, however the watch ended.
            let _ = done_tx.send(());
        });
        Self { shared, done }
    }

    /// Stop watching. Safe to call at any time from any task: an open
    /// stream is closed, and a stream that has not opened yet never will.
    pub fn leave(&self) {
        let Ok(mut slot) = self.shared.slot.lock() else {
            return;
        };
        if let StreamSlot::Open(handle) = std::mem::replace(&mut *slot, StreamSlot::Left) {
            handle.close();
        }
    }

    /// Wait for the completion signal, then hand over the logs.
    pub async fn wait(self) -> WatcherLog {
        let RoomWatcher { shared, done } = self;
        let _ = done.await;
        WatcherLog {
            room_id: shared.room_id,
            strokes: shared
                .logs
                .lock()
                .map(|mut logs| std::mem::take(&mut *logs))
                .unwrap_or_default(),
            errors: shared
                .errors
                .lock()
                .map(|mut errors| std::mem::take(&mut *errors))
                .unwrap_or_default(),
        }
    }
}

async fn watch(shared: &Arc<WatcherShared>, target: &str, fails: Arc<FailureLedger>) {
    if shared.is_left() {
        return;
    }

    let session = Session::new(target, fails).with_timeout(BOOTSTRAP_TIMEOUT);
    let room_path = format!("/rooms/{}", shared.room_id);

    let Some(token) = fetch_csrf_token(&session, &room_path).await else {
        // No credential, no stream; the completion signal still fires.
        return;
    };

    let start = Utc::now();
    let stream_path = format!("/api/stream{room_path}");
    let url = session.url_for(&format!("{stream_path}?csrf_token={token}"));

    // The slot is written exactly once by leave(); checking it and storing
    // the open handle under one lock closes the leave-vs-open race.
    let mut es = {
        let Ok(mut slot) = shared.slot.lock() else {
            return;
        };
        if matches!(*slot, StreamSlot::Left) {
            return;
        }
        let es = EventSource::new(session.client().clone(), url);
        *slot = StreamSlot::Open(es.handle());
        es
    };
    es.add_header("User-Agent", session.user_agent());

    {
        let shared = shared.clone();
        let handle = es.handle();
        let path = stream_path.clone();
        es.on("stroke", move |data| {
            let stroke: Stroke = match serde_json::from_str(data) {
                Ok(stroke) => stroke,
                Err(_) => {
                    shared.record_error(format!("{path}: malformed stroke payload"));
                    handle.close();
                    return;
                }
            };
            let now = Utc::now();
            if stroke.created_at <= start {
                // Backlog replay from before we joined; not ours to score.
                return;
            }
            let latency = now
                .signed_duration_since(stroke.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if latency > STROKE_LATENCY_THRESHOLD {
                shared.record_error(format!(
                    "{path}: stroke {} arrived {:.1}s after it was drawn",
                    stroke.id,
                    latency.as_secs_f64()
                ));
                handle.close();
                return;
            }
            if let Ok(mut logs) = shared.logs.lock() {
                logs.push(StrokeLog {
                    received_at: now,
                    room_id: shared.room_id,
                    stroke_id: stroke.id,
                });
            }
        });
    }

    {
        let shared = shared.clone();
        let handle = es.handle();
        let path = stream_path.clone();
        es.on("bad_request", move |data| {
            shared.record_error(format!("{path}: bad_request: {data}"));
            handle.close();
        });
    }

    {
        let shared = shared.clone();
        let handle = es.handle();
        let path = stream_path.clone();
        es.on_error(move |err| match err {
            StreamError::BadContentType(content_type) => {
                // Wrong content type: note it and let the retry loop have
                // another go.
                shared.record_error(format!("{path}: bad content-type {content_type:?}"));
            }
            StreamError::BadStatus(status) => {
                shared.record_error(format!("{path}: bad status code {status}"));
                handle.close();
            }
            err => {
                shared.record_error(format!("{path}: stream error: {err}"));
            }
        });
    }

    es.open().await;
}

async fn fetch_csrf_token(session: &Session, room_path: &str) -> Option<String> {
    session
        .get(room_path, |status, body| {
            if status != reqwest::StatusCode::OK {
                return Err(format!("GET {room_path} returned {status}"));
            }
            extract_csrf_token(body)
                .ok_or_else(|| format!("GET {room_path}: no csrf token on page"))
        })
        .await
        .ok()
}

/// The room page embeds the token as a data attribute on the root element.
fn extract_csrf_token(body: &str) -> Option<String> {
    let marker = "data-csrf_token=\"";
    let start = body.find(marker)? + marker.len();
    let end = body[start..].find('"')?;
    let token = &body[start..start + end];
    (!token.is_empty()).then(|| token.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_room_page() {
        let body = r#"<html lang="ja" data-csrf_token="a1b2c3"><body></body></html>"#;
        assert_eq!(extract_csrf_token(body).as_deref(), Some("a1b2c3"));
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(extract_csrf_token("<html><body></body></html>"), None);
        assert_eq!(extract_csrf_token(r#"<html data-csrf_token="">"#), None);
    }

    #[test]
    fn stroke_payload_ignores_unknown_fields() {
        let stroke: Stroke = serde_json::from_str(
            r#"{"id":9,"room_id":3,"width":4,"red":0,"green":128,"blue":255,"alpha":0.8,
                "created_at":"2026-08-07T10:00:00Z","points":[{"x":1.0,"y":2.0}]}"#,
        )
        .expect("stroke payload should decode");
        assert_eq!(stroke.id, 9);
        let expected: DateTime<Utc> = "2026-08-07T10:00:00Z".parse().expect("timestamp");
        assert_eq!(stroke.created_at, expected);
    }
}
