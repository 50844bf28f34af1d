//! Base worker trait

use crate::Result;
use async_trait::async_trait;

/// A periodic background job.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Get worker name for logging
    fn name(&self) -> &str;

    /// Run one pass. Errors are retried by the runner with backoff.
    async fn run_once(&self) -> Result<()>;
}
