//! Load-generation and scoring harness for the Liveboard contest.
//!
//! Drives fleets of simulated audience members against a contestant's
//! Liveboard deployment, consumes each room's server-sent stroke stream,
//! measures live-update latency and protocol correctness, and coordinates
//! benchmark jobs between the contest portal and a pool of bench workers.
//!
//! ## Binaries
//! - `bench-audience` — spawn a watcher fleet against one target and report
//! - `bench-worker` — poll the portal for jobs and run the fleet per job
//! - `bench-portal` — serve the job queue HTTP surface
//!
//! ## Layout
//! - [`fails`] — run-wide transport failure ledger
//! - [`session`] — contest-fair HTTP session (no redirects, bounded timeout)
//! - [`sse`] — reconnecting server-sent-events client
//! - [`watcher`] — one simulated audience member per room stream
//! - [`queue`] — job queue store (one live job per team, FIFO dequeue)
//! - [`portal`] — HTTP surface over the job queue

pub mod fails;
pub mod portal;
pub mod queue;
pub mod session;
pub mod sse;
pub mod watcher;

// ============================================================================
// Shared Test Configuration
// ============================================================================

/// Read test duration from BENCH_DURATION env var, with fallback default
pub fn env_duration(default: u64) -> u64 {
    std::env::var("BENCH_DURATION")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read watcher count from BENCH_WATCHERS env var, with fallback default
pub fn env_watchers(default: usize) -> usize {
    std::env::var("BENCH_WATCHERS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
