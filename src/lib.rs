/*
 * Kite - dependency-aware parallel execution engine
 *
 * Realizes a Ride's authored flow against a dependency graph of Segments,
 * dispatching independent work concurrently under a configurable
 * concurrency bound while respecting data dependencies, conditions, and
 * artifact hand-off between producers and consumers.
 */

pub mod artifacts;
pub mod context;
pub mod error;
pub mod graph;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod logger;
pub mod process;
pub mod ride;
pub mod scheduler;
pub mod segment;

pub use artifacts::{ArtifactsRegistry, ArtifactsView};
pub use context::ExecutionContext;
pub use error::{KiteError, Result};
pub use graph::SegmentGraph;
pub use logger::{ConsoleSink, SegmentLogger};
#[cfg(feature = "metrics")]
pub use metrics::SchedulerMetrics;
pub use process::{ProcessResult, ProcessRunner};
pub use ride::{Ride, SchedulerConfig, Step};
pub use scheduler::{ParallelScheduler, RunSummary, SchedulerResult};
pub use segment::{
    body_fn, Condition, FnBody, Segment, SegmentBody, SegmentBuilder, SegmentResult, SegmentState,
    SegmentStatus,
};

/// Initializes `tracing`'s global subscriber from `RUST_LOG` (or `info` if
/// unset). Intended for binaries and integration tests wanting
/// human-readable engine diagnostics; library consumers embedding Kite in
/// a larger process are free to install their own subscriber instead.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_end_to_end_single_segment_run() {
        let dir = tempfile::tempdir().unwrap();
        let segment = SegmentBuilder::new("build").build(body_fn(|_ctx| async move { Ok(()) }));
        let mut segments = HashMap::new();
        segments.insert(segment.name.clone(), segment);

        let ride = Ride::new("ci", 4, vec![ride::Step::Single("build".into())]);
        let scheduler = ParallelScheduler::new();
        let result = scheduler.execute(&ride, &segments, dir.path()).await;

        assert_eq!(result.results["build"].status, SegmentStatus::Success);
        assert_eq!(result.exit_code(), 0);
    }
}
