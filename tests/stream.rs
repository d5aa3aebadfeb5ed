//! EventSource behavior against scripted stream servers: reconnection with
//! `Last-Event-ID`, server-directed retry, and error-listener routing.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use liveboard_bench::sse::{EventSource, StreamError};
use tokio::net::TcpListener;
use url::Url;

async fn serve(router: Router) -> (Url, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .expect("test server");
    });
    let base = Url::parse(&format!("http://{addr}/")).expect("base url");
    (base, stop_tx)
}

#[derive(Default)]
struct SeenRequests {
    last_event_ids: Mutex<Vec<Option<String>>>,
}

async fn resuming_stream(State(seen): State<Arc<SeenRequests>>, headers: HeaderMap) -> Response {
    let last_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let attempt = {
        let mut ids = seen.last_event_ids.lock().expect("test lock");
        ids.push(last_id);
        ids.len()
    };
    // First attempt delivers two identified events and a fast retry, then
    // ends; later attempts deliver one more event each.
    let body = if attempt == 1 {
        "retry: 10\nid: 41\ndata: one\n\nid: 42\ndata: two\n\n"
    } else {
        "data: after-reconnect\n\n"
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

#[tokio::test]
async fn last_event_id_resumes_after_reconnect() {
    let seen = Arc::new(SeenRequests::default());
    let app = Router::new()
        .route("/events", get(resuming_stream))
        .with_state(seen.clone());
    let (base, _stop) = serve(app).await;

    let mut es = EventSource::new(reqwest::Client::new(), base.join("events").expect("url"));
    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    {
        let received = received.clone();
        es.on("message", move |data| {
            received.lock().expect("test lock").push(data.to_owned());
        });
    }
    let handle = es.handle();
    let run = tokio::spawn(es.open());

    // Wait until the second attempt has landed, then close.
    for _ in 0..200 {
        if seen.last_event_ids.lock().expect("test lock").len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.close();
    run.await.expect("event source task");

    let ids = seen.last_event_ids.lock().expect("test lock").clone();
    assert!(ids.len() >= 2, "stream reconnected: {ids:?}");
    assert_eq!(ids[0], None, "first attempt carries no Last-Event-ID");
    assert_eq!(
        ids[1].as_deref(),
        Some("42"),
        "reconnect resumes from the most recent id"
    );

    let received = received.lock().expect("test lock");
    assert_eq!(received[..2], ["one".to_string(), "two".to_string()]);
}

#[tokio::test]
async fn bad_content_type_reaches_error_listener_only() {
    let app = Router::new().route(
        "/events",
        get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{}") }),
    );
    let (base, _stop) = serve(app).await;

    let mut es = EventSource::new(reqwest::Client::new(), base.join("events").expect("url"));
    let data_fired = Arc::new(AtomicUsize::new(0));
    {
        let data_fired = data_fired.clone();
        es.on("message", move |_| {
            data_fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    let errors = Arc::new(Mutex::new(Vec::<String>::new()));
    let handle = es.handle();
    {
        let errors = errors.clone();
        let handle = handle.clone();
        es.on_error(move |err| {
            if let StreamError::BadContentType(content_type) = err {
                errors.lock().expect("test lock").push(content_type.clone());
            }
            handle.close();
        });
    }
    es.open().await;

    assert_eq!(
        errors.lock().expect("test lock").as_slice(),
        ["application/json"]
    );
    assert_eq!(data_fired.load(Ordering::SeqCst), 0, "no data listener fired");
}

#[tokio::test]
async fn bad_status_reaches_error_listener() {
    let app = Router::new().route("/events", get(|| async { StatusCode::FORBIDDEN }));
    let (base, _stop) = serve(app).await;

    let mut es = EventSource::new(reqwest::Client::new(), base.join("events").expect("url"));
    let statuses = Arc::new(Mutex::new(Vec::<StatusCode>::new()));
    let handle = es.handle();
    {
        let statuses = statuses.clone();
        let handle = handle.clone();
        es.on_error(move |err| {
            if let StreamError::BadStatus(status) = err {
                statuses.lock().expect("test lock").push(*status);
            }
            handle.close();
        });
    }
    es.open().await;

    assert_eq!(
        statuses.lock().expect("test lock").as_slice(),
        [StatusCode::FORBIDDEN]
    );
}

#[tokio::test]
async fn close_unblocks_a_pending_read() {
    let app = Router::new().route(
        "/events",
        get(|| async {
            let stream = futures_util::stream::once(async {
                Ok::<_, Infallible>(Bytes::from("data: hi\n\n"))
            })
            .chain(futures_util::stream::pending());
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(stream),
            )
        }),
    );
    let (base, _stop) = serve(app).await;

    let mut es = EventSource::new(reqwest::Client::new(), base.join("events").expect("url"));
    let received = Arc::new(AtomicUsize::new(0));
    {
        let received = received.clone();
        es.on("message", move |_| {
            received.fetch_add(1, Ordering::SeqCst);
        });
    }
    let handle = es.handle();
    let run = tokio::spawn(es.open());

    for _ in 0..100 {
        if received.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.load(Ordering::SeqCst), 1);

    // The server will never send another byte; close must still return
    // promptly.
    handle.close();
    assert!(handle.is_closed());
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("close unblocked the read")
        .expect("event source task");
}
