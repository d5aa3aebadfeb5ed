//! Job Queue Portal
//!
//! Serves the enqueue / worker-poll / result endpoints over an in-memory
//! job queue, with a static team → target-URL registry.
//!
//! Usage:
//!   cargo run --release --bin bench-portal -- --listen 0.0.0.0:8080 \
//!     --team 1=http://team1.internal --team 2=http://team2.internal

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use liveboard_bench::portal::{self, PortalState};
use liveboard_bench::queue::JobQueue;

#[derive(Parser)]
#[command(name = "bench-portal")]
#[command(about = "Serve the Liveboard benchmark job queue")]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Team targets, repeatable: `--team <id>=<url>[,<url>...]`
    #[arg(long = "team", value_parser = parse_team)]
    teams: Vec<(i64, Vec<String>)>,
}

fn parse_team(s: &str) -> Result<(i64, Vec<String>), String> {
    let (id, urls) = s
        .split_once('=')
        .ok_or_else(|| "expected <team_id>=<url>[,<url>...]".to_string())?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| "team id must be an integer".to_string())?;
    let urls: Vec<String> = urls
        .split(',')
        .map(|url| url.trim().to_owned())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return Err("at least one url per team".to_string());
    }
    Ok((id, urls))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let state = Arc::new(PortalState {
        queue: JobQueue::new(),
        targets: cli.teams.into_iter().collect(),
    });

    eprintln!("=== Liveboard Portal ===");
    eprintln!("Listening on {}", cli.listen);
    eprintln!("Teams registered: {}\n", state.targets.len());

    portal::serve(cli.listen, state).await?;
    Ok(())
}
