use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quota_governor::{BucketKey, Error, RateLimitConfig, RateLimiter, RetryPolicy};

/// Drive simulated API traffic through the rate limiter.
#[derive(Debug, Parser)]
#[command(name = "quota-sim", version, about)]
struct Args {
    /// YAML settings file (QUOTA_* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 50)]
    requests: usize,

    /// Requests in flight at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Endpoints to spread requests over; empty uses the global bucket
    #[arg(short, long)]
    endpoint: Vec<String>,

    /// Attempts per request before giving up
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Longest wait, in seconds, before a request is abandoned
    #[arg(long, default_value_t = 5)]
    max_wait: u64,

    /// Simulated network latency in milliseconds
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RateLimitConfig::load(args.config.as_deref())?;
    info!(
        minute_limit = config.minute_limit(),
        daily_limit = config.daily_limit(),
        max_buckets = config.max_array_size(),
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(config));
    let policy = RetryPolicy::new(args.max_attempts)
        .with_max_wait(Duration::from_secs(args.max_wait))
        .with_jitter(Duration::from_millis(250));
    let latency = Duration::from_millis(args.latency_ms);

    let keys: Vec<BucketKey> = if args.endpoint.is_empty() {
        vec![BucketKey::Global]
    } else {
        args.endpoint.iter().map(|e| BucketKey::endpoint(e.as_str())).collect()
    };

    let results: Vec<Result<(), Error>> = stream::iter(0..args.requests)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            let policy = policy.clone();
            let key = keys[i % keys.len()].clone();
            async move {
                policy
                    .execute(&limiter, &key, move || async move {
                        tokio::time::sleep(latency).await;
                        Ok(())
                    })
                    .await
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    let mut sent = 0usize;
    for result in &results {
        match result {
            Ok(()) => sent += 1,
            Err(Error::RateLimited(err)) => {
                warn!(retry_after_secs = err.retry_after_secs(), "Request abandoned: {}", err)
            }
            Err(err) => warn!("Request failed: {}", err),
        }
    }

    let snapshot = limiter.metrics().snapshot();
    info!(
        sent = sent,
        abandoned = results.len() - sent,
        admitted = snapshot.admitted,
        denied = snapshot.denied,
        evicted = snapshot.evicted,
        denial_rate = snapshot.denial_rate(),
        "Simulation finished"
    );
    Ok(())
}
