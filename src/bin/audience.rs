//! Audience Fleet Load Test
//!
//! Spawns a fleet of room watchers against one Liveboard deployment, lets
//! them consume the stroke streams for the configured duration, then tears
//! the fleet down and reports what it saw.
//!
//! Usage:
//!   cargo run --release --bin bench-audience -- --target http://localhost:8000 --rooms 1,2,3

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use liveboard_bench::fails::FailureLedger;
use liveboard_bench::watcher::RoomWatcher;
use liveboard_bench::{env_duration, env_watchers};
use serde_json::json;

#[derive(Parser)]
#[command(name = "bench-audience")]
#[command(about = "Drive a watcher fleet against a Liveboard deployment")]
struct Cli {
    /// Target base URL
    #[arg(long)]
    target: String,

    /// Comma-separated room ids to watch
    #[arg(long, default_value = "1")]
    rooms: String,

    /// Watchers to spawn across the rooms (BENCH_WATCHERS also works)
    #[arg(long)]
    watchers: Option<usize>,

    /// Seconds to keep the fleet watching (BENCH_DURATION also works)
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let duration = cli.duration.unwrap_or_else(|| env_duration(30));
    let watchers = cli.watchers.unwrap_or_else(|| env_watchers(100));
    let rooms: Vec<i64> = cli
        .rooms
        .split(',')
        .filter_map(|room| room.trim().parse().ok())
        .collect();
    if rooms.is_empty() {
        return Err("at least one room id required".into());
    }

    eprintln!("=== Liveboard Audience Test ===");
    eprintln!("Target: {}", cli.target);
    eprintln!("Watchers: {watchers} across {} room(s)", rooms.len());
    eprintln!("Duration: {duration}s\n");

    let fails = Arc::new(FailureLedger::new());

    let mut fleet = Vec::with_capacity(watchers);
    for i in 0..watchers {
        let room_id = rooms[i % rooms.len()];
        fleet.push(RoomWatcher::spawn(&cli.target, room_id, fails.clone()));
        // Stagger joins a little so the target sees a ramp, not a stampede.
        if i % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(rand::random::<u64>() % 100)).await;
        }
    }

    tokio::time::sleep(Duration::from_secs(duration)).await;

    for watcher in &fleet {
        watcher.leave();
    }

    let mut strokes = 0usize;
    let mut errors: Vec<String> = Vec::new();
    for watcher in fleet {
        let log = watcher.wait().await;
        strokes += log.strokes.len();
        errors.extend(log.errors);
    }

    eprintln!("\n  AUDIENCE RESULTS:");
    eprintln!("  Strokes observed: {strokes}");
    eprintln!("  Watcher errors: {}", errors.len());
    eprintln!(
        "  Transport failures: {} ({} timeouts)",
        fails.total(),
        fails.timeouts()
    );
    for message in errors.iter().take(10) {
        eprintln!("    {message}");
    }

    let report = json!({
        "test": "audience",
        "watchers": watchers,
        "durationSecs": duration,
        "strokes": strokes,
        "watcherErrors": errors,
        "transportFailures": fails.total(),
        "timeouts": fails.timeouts(),
    });
    println!("{report}");

    Ok(())
}
