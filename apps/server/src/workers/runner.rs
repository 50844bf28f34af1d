//! Worker runner: fixed interval on success, jittered exponential backoff on failure

use super::base::Worker;
use crate::{config::WorkerConfig, metrics::SWEEPER_RUNS_TOTAL, Result};
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct WorkerRunnerConfig {
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter_ratio: f64,
}

impl WorkerRunnerConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
            backoff_initial: Duration::from_secs(config.backoff_initial_seconds.max(1)),
            backoff_max: Duration::from_secs(config.backoff_max_seconds.max(1)),
            backoff_jitter_ratio: config.backoff_jitter_ratio,
        }
    }
}

impl Default for WorkerRunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            backoff_jitter_ratio: 0.2,
        }
    }
}

pub(crate) fn jittered_duration(base: Duration, jitter_ratio: f64) -> Duration {
    if base.is_zero() || jitter_ratio <= 0.0 {
        return base;
    }

    // Random enough without pulling in an RNG crate.
    let bytes = Uuid::new_v4().into_bytes();
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    let unit = (u64::from_le_bytes(word) as f64) / (u64::MAX as f64); // [0,1]
    let signed = unit * 2.0 - 1.0; // [-1,1]
    let factor = (1.0 + signed * jitter_ratio).max(0.0);
    base.mul_f64(factor)
}

/// Run `worker` until `shutdown` flips to true.
///
/// The first pass runs immediately. A failed pass is retried after a
/// backoff that doubles up to `backoff_max`; a successful one resets it.
pub async fn run_worker(
    worker: Arc<dyn Worker>,
    runner_config: WorkerRunnerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!(
        worker = worker.name(),
        interval_secs = runner_config.interval.as_secs(),
        "Worker started"
    );

    let mut backoff = runner_config.backoff_initial;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match worker.run_once().await {
            Ok(()) => {
                SWEEPER_RUNS_TOTAL.with_label_values(&["success"]).inc();
                backoff = runner_config.backoff_initial;
                runner_config.interval
            }
            Err(e) => {
                SWEEPER_RUNS_TOTAL.with_label_values(&["error"]).inc();
                let delay = jittered_duration(backoff, runner_config.backoff_jitter_ratio);
                tracing::error!(
                    worker = worker.name(),
                    error = %e,
                    retry_in = ?delay,
                    "Worker pass failed"
                );
                backoff = (backoff * 2).min(runner_config.backoff_max);
                delay
            }
        };

        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    tracing::info!(worker = worker.name(), "Worker stopped");
    Ok(())
}

/// Spawn multiple workers sharing one shutdown signal
pub fn spawn_workers(
    workers: Vec<Arc<dyn Worker>>,
    runner_config: WorkerRunnerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<Result<()>>> {
    workers
        .into_iter()
        .map(|worker| {
            let cfg = runner_config.clone();
            let shutdown_rx = shutdown.clone();
            tokio::spawn(async move { run_worker(worker, cfg, shutdown_rx).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Worker for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run_once(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::Internal("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered_duration(base, 0.2);
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
        }
        assert_eq!(jittered_duration(base, 0.0), base);
    }

    #[tokio::test]
    async fn test_retries_then_stops_on_shutdown() {
        let worker = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let config = WorkerRunnerConfig {
            interval: Duration::from_secs(3600),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(10),
            backoff_jitter_ratio: 0.0,
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(worker.clone(), config, rx));

        // Two failures and one success, then the worker parks on its interval.
        for _ in 0..100 {
            if worker.calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
