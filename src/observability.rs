//! Tracing setup and in-process counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` overrides `default_filter`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    chunks_dispatched: AtomicU64,
    chunks_completed: AtomicU64,
    chunks_retried: AtomicU64,
    chunks_failed: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(job_created, jobs_created);
    counter!(job_completed, jobs_completed);
    counter!(job_failed, jobs_failed);
    counter!(chunk_dispatched, chunks_dispatched);
    counter!(chunk_completed, chunks_completed);
    counter!(chunk_retried, chunks_retried);
    counter!(chunk_failed, chunks_failed);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunks_retried: self.chunks_retried.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub chunks_dispatched: u64,
    pub chunks_completed: u64,
    pub chunks_retried: u64,
    pub chunks_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.job_created();
        metrics.chunk_dispatched();
        metrics.chunk_dispatched();
        metrics.chunk_retried();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_created, 1);
        assert_eq!(snapshot.chunks_dispatched, 2);
        assert_eq!(snapshot.chunks_retried, 1);
        assert_eq!(snapshot.jobs_failed, 0);
    }
}
