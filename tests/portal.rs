//! HTTP-level tests for the job queue surface.

use std::collections::HashMap;
use std::sync::Arc;

use liveboard_bench::portal::{router, PortalState};
use liveboard_bench::queue::JobQueue;
use serde_json::Value;
use tokio::net::TcpListener;

async fn spawn_portal(
    targets: HashMap<i64, Vec<String>>,
) -> (String, tokio::sync::oneshot::Sender<()>) {
    let state = Arc::new(PortalState {
        queue: JobQueue::new(),
        targets,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .expect("portal server");
    });
    (format!("http://{addr}"), stop_tx)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

#[tokio::test]
async fn enqueue_poll_complete_round_trip() {
    let mut targets = HashMap::new();
    targets.insert(7, vec!["http://team7.internal".to_string()]);
    let (base, _stop) = spawn_portal(targets).await;
    let client = client();

    // Enqueue for team 7 redirects back to the front page.
    let resp = client
        .post(format!("{base}/queue"))
        .form(&[("team_id", "7")])
        .send()
        .await
        .expect("enqueue");
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);

    // A second enqueue while the job is live is a notice, not an error.
    let resp = client
        .post(format!("{base}/queue"))
        .form(&[("team_id", "7")])
        .send()
        .await
        .expect("enqueue again");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "Job already queued");

    // A worker pulls the job with the team's resolved URLs.
    let resp = client
        .post(format!("{base}/job/new"))
        .form(&[("bench_node", "node-1")])
        .send()
        .await
        .expect("poll");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let job: Value = resp.json().await.expect("job json");
    assert_eq!(job["team_id"], 7);
    assert_eq!(job["urls"][0], "http://team7.internal");
    let job_id = job["job_id"].as_i64().expect("job id");

    // The queue is drained now.
    let resp = client
        .post(format!("{base}/job/new"))
        .form(&[("bench_node", "node-2")])
        .send()
        .await
        .expect("poll empty");
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    // Report the result; the status inquiry reflects it.
    let result = serde_json::json!({
        "job_id": job_id,
        "score": 1200,
        "pass": true,
        "messages": [],
        "output": {"strokes": 340},
    });
    let resp = client
        .post(format!("{base}/job/result"))
        .json(&result)
        .send()
        .await
        .expect("result");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let envelope: Value = resp.json().await.expect("envelope");
    assert_eq!(envelope["success"], true);

    let resp = client
        .get(format!("{base}/job/{job_id}"))
        .send()
        .await
        .expect("status");
    let status: Value = resp.json().await.expect("status json");
    assert_eq!(status["state"], "done");
    assert_eq!(status["result"]["score"], 1200);
}

#[tokio::test]
async fn unknown_team_cannot_enqueue() {
    let (base, _stop) = spawn_portal(HashMap::new()).await;
    let resp = client()
        .post(format!("{base}/queue"))
        .form(&[("team_id", "99")])
        .send()
        .await
        .expect("enqueue");
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_job_result_is_not_found() {
    let (base, _stop) = spawn_portal(HashMap::new()).await;
    let result = serde_json::json!({
        "job_id": 4242,
        "score": 0,
        "pass": false,
        "messages": ["benchmark aborted"],
    });
    let resp = client()
        .post(format!("{base}/job/result"))
        .json(&result)
        .send()
        .await
        .expect("result");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let envelope: Value = resp.json().await.expect("envelope");
    assert_eq!(envelope["success"], false);
}

#[tokio::test]
async fn endpoints_reject_other_methods() {
    let (base, _stop) = spawn_portal(HashMap::new()).await;
    let client = client();

    let resp = client
        .get(format!("{base}/job/new"))
        .send()
        .await
        .expect("wrong method");
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);

    let resp = client
        .get(format!("{base}/queue"))
        .send()
        .await
        .expect("wrong method");
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);

    let resp = client
        .post(format!("{base}/job/17"))
        .send()
        .await
        .expect("wrong method");
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn concurrent_enqueues_admit_exactly_one() {
    let mut targets = HashMap::new();
    targets.insert(3, vec!["http://team3.internal".to_string()]);
    let (base, _stop) = spawn_portal(targets).await;
    let client = client();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let client = client.clone();
        let url = format!("{base}/queue");
        tasks.spawn(async move {
            client
                .post(&url)
                .form(&[("team_id", "3")])
                .send()
                .await
                .expect("enqueue")
                .status()
        });
    }

    let mut admitted = 0;
    let mut noticed = 0;
    while let Some(status) = tasks.join_next().await {
        match status.expect("enqueue task") {
            reqwest::StatusCode::FOUND => admitted += 1,
            reqwest::StatusCode::OK => noticed += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(admitted, 1, "exactly one enqueue wins");
    assert_eq!(noticed, 9, "the rest get the already-queued notice");
}
