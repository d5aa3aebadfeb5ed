//! HTTP surface over the job queue.
//!
//! Three endpoints, matching what the contest front end and the bench
//! workers speak:
//!
//! | Method | Path         | Description                                |
//! |--------|--------------|--------------------------------------------|
//! | POST   | /queue       | Enqueue a run (redirect, or notice if queued) |
//! | POST   | /job/new     | Worker poll: JSON job or 204               |
//! | POST   | /job/result  | Report a result: `{"success":true}`        |
//! | GET    | /job/:job_id | Job state and stored result                |
//!
//! Route registration is the only logic here; the coordination rules live
//! in [`crate::queue`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::queue::{JobQueue, JobResult, QueueError};

pub struct PortalState {
    pub queue: JobQueue,
    /// team id → benchmark target URLs, resolved at dequeue time.
    pub targets: HashMap<i64, Vec<String>>,
}

pub fn router(state: Arc<PortalState>) -> Router {
    Router::new()
        .route("/queue", post(enqueue_job))
        .route("/job/new", post(new_job))
        .route("/job/result", post(post_result))
        .route("/job/:job_id", get(job_status))
        .with_state(state)
}

#[derive(Deserialize)]
struct EnqueueForm {
    team_id: i64,
}

/// Contestants queue a run from the front end. "Already queued" is a
/// notice for the user, not a server error.
async fn enqueue_job(
    State(state): State<Arc<PortalState>>,
    Form(form): Form<EnqueueForm>,
) -> Response {
    if !state.targets.contains_key(&form.team_id) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.queue.enqueue(form.team_id) {
        Ok(job_id) => {
            tracing::info!(team_id = form.team_id, job_id, "job enqueued");
            (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
        }
        Err(QueueError::AlreadyQueued { .. }) => {
            (StatusCode::OK, "Job already queued").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "enqueue failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct NewJobForm {
    bench_node: String,
}

/// Workers poll here every few seconds; an empty queue is 204, not an error.
async fn new_job(
    State(state): State<Arc<PortalState>>,
    Form(form): Form<NewJobForm>,
) -> Response {
    match state.queue.dequeue(&form.bench_node) {
        Some(mut job) => {
            if let Some(urls) = state.targets.get(&job.team_id) {
                job.urls = urls.clone();
            }
            tracing::info!(job_id = job.job_id, bench_node = %form.bench_node, "job dequeued");
            Json(job).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_result(
    State(state): State<Arc<PortalState>>,
    Json(result): Json<JobResult>,
) -> Response {
    let job_id = result.job_id;
    match state.queue.complete(result) {
        Ok(()) => {
            tracing::info!(job_id, "job completed");
            Json(json!({"success": true})).into_response()
        }
        Err(QueueError::UnknownJob { .. }) => {
            (StatusCode::NOT_FOUND, Json(json!({"success": false}))).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "result report failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn job_status(State(state): State<Arc<PortalState>>, Path(job_id): Path<i64>) -> Response {
    match state.queue.state(job_id) {
        Some(job_state) => Json(json!({
            "job_id": job_id,
            "state": job_state,
            "bench_node": state.queue.assignment(job_id),
            "result": state.queue.result(job_id),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<PortalState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "portal listening");
    axum::serve(listener, router(state)).await
}
