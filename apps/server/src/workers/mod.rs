//! Background workers
//!
//! Workers are periodic jobs driven by [`run_worker`]. They can run inside the
//! server process (`workers.enabled`) or in the standalone `clinicq-worker`
//! binary.

mod base;
mod runner;
mod sweeper;

pub use base::Worker;
pub(crate) use runner::jittered_duration;
pub use runner::{run_worker, spawn_workers, WorkerRunnerConfig};
pub use sweeper::{SweepReport, Sweeper};

use crate::state::AppState;
use std::sync::Arc;

/// Create all configured workers
pub fn create_workers(state: &AppState) -> Vec<Arc<dyn Worker>> {
    vec![Arc::new(Sweeper::from_state(state))]
}
