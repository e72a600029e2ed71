#![cfg(feature = "metrics")]

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Prometheus instrumentation for the scheduler, gated behind the
/// `metrics` feature — mirrors the teacher's own `prometheus`-optional
/// dependency, which ships declared but unwired; this crate actually
/// registers and increments it.
pub struct SchedulerMetrics {
    pub segments_started: IntCounter,
    pub segments_succeeded: IntCounter,
    pub segments_failed: IntCounter,
    pub segments_skipped: IntCounter,
    pub run_duration_seconds: Histogram,
}

impl SchedulerMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let segments_started = IntCounter::with_opts(Opts::new(
            "kite_segments_started_total",
            "segments dispatched for execution",
        ))?;
        let segments_succeeded = IntCounter::with_opts(Opts::new(
            "kite_segments_succeeded_total",
            "segments that completed successfully",
        ))?;
        let segments_failed = IntCounter::with_opts(Opts::new(
            "kite_segments_failed_total",
            "segments that failed or timed out",
        ))?;
        let segments_skipped = IntCounter::with_opts(Opts::new(
            "kite_segments_skipped_total",
            "segments skipped due to condition, dependency, or invalid graph",
        ))?;
        let run_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "kite_run_duration_seconds",
            "wall-clock duration of a full ride execution",
        ))?;

        registry.register(Box::new(segments_started.clone()))?;
        registry.register(Box::new(segments_succeeded.clone()))?;
        registry.register(Box::new(segments_failed.clone()))?;
        registry.register(Box::new(segments_skipped.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;

        Ok(Self {
            segments_started,
            segments_succeeded,
            segments_failed,
            segments_skipped,
            run_duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_without_collision() {
        let registry = Registry::new();
        let metrics = SchedulerMetrics::new(&registry).unwrap();
        metrics.segments_started.inc();
        assert_eq!(metrics.segments_started.get(), 1);
    }
}
