//! Multi-agent coordination for the concierge engine.
//!
//! Three cooperating parts, all on one async model (tokio):
//!
//! - [`ParallelExecutor`] runs a set of agents as dependency-ordered waves
//!   under a concurrency bound, isolating per-agent failures.
//! - [`StateSynchronizer`] guards shared state paths with expiring locks and
//!   applies last-writer-wins updates with conflict records.
//! - [`AgentPool`] bounds live agent instances per type and retires unhealthy
//!   ones.
//!
//! Synchronous embedders use [`block_on`], the single blocking adapter at the
//! crate edge; everything else is `async fn`.

pub mod executor;
pub mod pool;
pub mod sync;

pub use executor::{
    AgentHandler, ExecutionError, ExecutionMode, ExecutionOutcome, ExecutionPlan, ParallelExecutor,
};
pub use pool::{AgentPool, InstanceStatus, PoolConfig, PoolError, PoolStats, PooledAgent};
pub use sync::{ConflictRecord, StateSynchronizer, SyncError, SyncLock};

/// Drives a future to completion on a fresh current-thread runtime.
///
/// Only for callers that cannot be async themselves. Calling it from inside a
/// tokio runtime returns an error instead of blocking that runtime; use
/// `.await` there.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "called from inside an async runtime",
        ));
    }
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    Ok(runtime.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::block_on;

    #[test]
    fn block_on_drives_a_future_from_synchronous_code() {
        let value = block_on(async { 21 * 2 }).expect("fresh runtime");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn block_on_refuses_to_nest_inside_a_runtime() {
        let result = block_on(async {});
        assert!(result.is_err());
    }
}
