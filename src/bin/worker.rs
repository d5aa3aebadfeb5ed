//! Benchmark Worker
//!
//! Polls the portal for queued jobs, runs the audience fleet against the
//! assigned team's target, and posts the result back.
//!
//! Usage:
//!   cargo run --release --bin bench-worker -- --portal http://portal:8080 --bench-node node-1

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use liveboard_bench::fails::FailureLedger;
use liveboard_bench::queue::{JobDescription, JobResult};
use liveboard_bench::watcher::RoomWatcher;
use serde_json::json;

/// Portal guidance: check for work every ~3 seconds.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "bench-worker")]
#[command(about = "Run queued Liveboard benchmark jobs")]
struct Cli {
    /// Portal base URL
    #[arg(long, default_value = "http://localhost:8080")]
    portal: String,

    /// Name this node reports when pulling jobs
    #[arg(long, env = "BENCH_NODE", default_value = "bench-worker-1")]
    bench_node: String,

    /// Comma-separated room ids to watch on the target
    #[arg(long, default_value = "1")]
    rooms: String,

    /// Watchers per job
    #[arg(long, default_value_t = 100)]
    watchers: usize,

    /// Seconds each job's fleet runs
    #[arg(long, default_value_t = 60)]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let rooms: Vec<i64> = cli
        .rooms
        .split(',')
        .filter_map(|room| room.trim().parse().ok())
        .collect();
    if rooms.is_empty() {
        return Err("at least one room id required".into());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    eprintln!("=== Liveboard Bench Worker ===");
    eprintln!("Portal: {}", cli.portal);
    eprintln!("Node: {}\n", cli.bench_node);

    loop {
        match poll_job(&client, &cli).await {
            Ok(Some(job)) => {
                tracing::info!(job_id = job.job_id, team_id = job.team_id, "job dequeued");
                let result = run_job(&job, &cli, &rooms).await;
                if let Err(err) = post_result(&client, &cli.portal, &result).await {
                    tracing::warn!(job_id = job.job_id, error = %err, "failed to post result");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "job poll failed"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn poll_job(
    client: &reqwest::Client,
    cli: &Cli,
) -> Result<Option<JobDescription>, reqwest::Error> {
    let response = client
        .post(format!("{}/job/new", cli.portal))
        .form(&[("bench_node", cli.bench_node.as_str())])
        .send()
        .await?
        .error_for_status()?;
    if response.status() == reqwest::StatusCode::NO_CONTENT {
        return Ok(None);
    }
    response.json().await.map(Some)
}

async fn run_job(job: &JobDescription, cli: &Cli, rooms: &[i64]) -> JobResult {
    let Some(target) = job.urls.first() else {
        return JobResult {
            job_id: job.job_id,
            score: 0,
            pass: false,
            messages: vec!["no target urls for team".into()],
            output: serde_json::Value::Null,
        };
    };

    eprintln!(
        "--- Job {} (team {}) against {target} ---",
        job.job_id, job.team_id
    );
    let fails = Arc::new(FailureLedger::new());

    let mut fleet = Vec::with_capacity(cli.watchers);
    for i in 0..cli.watchers {
        fleet.push(RoomWatcher::spawn(target, rooms[i % rooms.len()], fails.clone()));
    }

    tokio::time::sleep(Duration::from_secs(cli.duration)).await;

    for watcher in &fleet {
        watcher.leave();
    }

    let mut strokes = 0usize;
    let mut messages: Vec<String> = Vec::new();
    for watcher in fleet {
        let log = watcher.wait().await;
        strokes += log.strokes.len();
        messages.extend(log.errors);
    }

    let transport = fails.total();
    let score = (strokes as i64 - 10 * messages.len() as i64 - 20 * transport as i64).max(0);
    let pass = messages.is_empty() && transport == 0;

    eprintln!(
        "  Job {}: score={score} strokes={strokes} errors={} transport={transport}",
        job.job_id,
        messages.len()
    );

    messages.truncate(20);
    JobResult {
        job_id: job.job_id,
        score,
        pass,
        messages,
        output: json!({
            "strokes": strokes,
            "transportFailures": transport,
            "timeouts": fails.timeouts(),
        }),
    }
}

async fn post_result(
    client: &reqwest::Client,
    portal: &str,
    result: &JobResult,
) -> Result<(), reqwest::Error> {
    client
        .post(format!("{portal}/job/result"))
        .json(result)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
