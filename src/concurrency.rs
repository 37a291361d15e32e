//! Adaptive concurrency control for batch processing.
//!
//! One shared integer bounds how many record-processing tasks run at once.
//! After every batch the bound shrinks multiplicatively when the network
//! error rate crosses a threshold and grows additively while batches stay
//! clean. Loops read the level when building their per-batch semaphore; the
//! level itself is benignly racy (last write wins).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 25;

/// Error-rate percentage above which the bound shrinks.
const SHRINK_THRESHOLD_PCT: f64 = 15.0;
/// Multiplier applied when shrinking.
const SHRINK_FACTOR: f64 = 0.7;

const PROBE_SAMPLES: u32 = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_FALLBACK: usize = 5;

#[derive(Debug)]
pub struct ConcurrencyController {
    level: AtomicUsize,
}

impl ConcurrencyController {
    pub fn new(initial: usize) -> Self {
        Self {
            level: AtomicUsize::new(initial.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)),
        }
    }

    pub fn current(&self) -> usize {
        self.level.load(Ordering::Relaxed)
    }

    /// Transition the bound from one processed batch's outcome and return
    /// the new value.
    pub fn observe_batch(&self, batch_size: usize, network_failures: usize) -> usize {
        let current = self.current();
        if batch_size == 0 {
            return current;
        }

        let error_rate = network_failures as f64 / batch_size as f64 * 100.0;

        if error_rate > SHRINK_THRESHOLD_PCT {
            let next = ((current as f64 * SHRINK_FACTOR) as usize).max(MIN_CONCURRENCY);
            if next < current {
                warn!(
                    error_rate = format!("{error_rate:.1}"),
                    from = current,
                    to = next,
                    "High network error rate, shrinking concurrency"
                );
                self.level.store(next, Ordering::Relaxed);
                return next;
            }
        } else if network_failures == 0 && current < MAX_CONCURRENCY {
            let next = (current + 1).min(MAX_CONCURRENCY);
            info!(to = next, "Network stable, growing concurrency");
            self.level.store(next, Ordering::Relaxed);
            return next;
        }

        current
    }
}

/// Derive an initial concurrency level from a short round-trip latency probe
/// against a known-reachable endpoint. Probe failure falls back to a
/// conservative default.
pub async fn probe_initial_concurrency(probe_url: &str) -> usize {
    info!("Probing network latency for initial concurrency");

    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            warn!("Probe client build failed ({e}), defaulting to {PROBE_FALLBACK}");
            return PROBE_FALLBACK;
        }
    };

    let start = Instant::now();
    for _ in 0..PROBE_SAMPLES {
        let response = match client.get(probe_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Latency probe failed ({e}), defaulting to {PROBE_FALLBACK}");
                return PROBE_FALLBACK;
            }
        };
        if response.bytes().await.is_err() {
            warn!("Latency probe read failed, defaulting to {PROBE_FALLBACK}");
            return PROBE_FALLBACK;
        }
    }

    let avg = start.elapsed().as_secs_f64() / f64::from(PROBE_SAMPLES);
    let level = concurrency_for_latency(avg);
    info!(
        avg_latency_ms = format!("{:.0}", avg * 1000.0),
        level, "Latency probe complete"
    );
    level
}

fn concurrency_for_latency(avg_secs: f64) -> usize {
    if avg_secs < 0.15 {
        25
    } else if avg_secs < 0.30 {
        15
    } else if avg_secs < 0.60 {
        8
    } else if avg_secs < 1.00 {
        4
    } else {
        2
    }
}

/// Cheap reachability check used before reconnect attempts.
pub async fn is_reachable(probe_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(probe_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
