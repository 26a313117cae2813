//! Execution session owning the worker pool used by the repair pass.

use crate::config::PipelineConfig;
use crate::error::{ReconError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Scoped execution context for one or more pipeline runs.
///
/// The pool is created up front and released when the session is dropped,
/// so a pipeline never reaches for the global rayon pool implicitly.
pub struct Session {
    pool: ThreadPool,
}

static_assertions::assert_impl_all!(Session: Send, Sync);

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl Session {
    /// Create a session with `num_threads` workers; 0 lets rayon decide.
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("stock-recon-{i}"))
            .build()
            .map_err(|e| ReconError::Internal(format!("Failed to build thread pool: {e}")))?;

        debug!("Session started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.num_threads)
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Session released ({} threads)", self.pool.current_num_threads());
    }
}
