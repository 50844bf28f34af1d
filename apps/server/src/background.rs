//! Background tasks and worker management

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    realtime::run_relay,
    state::AppState,
    workers::{create_workers, spawn_workers, WorkerRunnerConfig},
    Result,
};

/// Running workers plus the switch that stops them.
pub struct BackgroundWorkers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl BackgroundWorkers {
    /// Signal every worker to stop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker exited with error"),
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
        }
    }
}

/// Start all background workers over `state`.
pub fn start_workers(state: &AppState) -> BackgroundWorkers {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let workers = create_workers(state);
    let worker_count = workers.len();

    let runner_config = WorkerRunnerConfig::from_config(&state.config.workers);
    let handles = spawn_workers(workers, runner_config, shutdown_rx);

    tracing::info!(worker_count, "Background workers started");
    BackgroundWorkers { shutdown, handles }
}

/// Start relaying queue changes committed by other processes into this
/// process's realtime hub.
pub fn start_relay(state: &AppState) -> BackgroundWorkers {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_relay(
        state.store.clone(),
        state.queue.clone(),
        shutdown_rx,
    ));
    BackgroundWorkers {
        shutdown,
        handles: vec![handle],
    }
}
