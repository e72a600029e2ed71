use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::ArtifactsRegistry;
use crate::context::ExecutionContext;
use crate::error::KiteError;
use crate::graph::SegmentGraph;
use crate::logger::{ConsoleSink, SegmentLogger};
use crate::ride::Ride;
use crate::segment::{Segment, SegmentResult, SegmentState, SegmentStatus};

/// Aggregate metrics over a completed run (`spec.md` §4.5 step 7).
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    /// Sum of per-segment durations — how long the run would have taken
    /// if every segment had executed one after another.
    pub sequential_equivalent_ms: u64,
}

/// Mapping from segment name to `SegmentResult` for every segment in the
/// run; every referenced segment gets a result, never absent.
#[derive(Debug, Clone, Default)]
pub struct SchedulerResult {
    pub results: HashMap<String, SegmentResult>,
    pub summary: RunSummary,
}

impl SchedulerResult {
    /// `spec.md` §6: 0 if all results are SUCCESS or SKIPPED-by-condition, non-zero otherwise.
    pub fn exit_code(&self) -> i32 {
        let all_ok = self.results.values().all(|r| {
            r.status == SegmentStatus::Success
                || (r.status == SegmentStatus::Skipped
                    && r.message
                        .as_deref()
                        .is_some_and(|m| m.starts_with("Skipped due to condition")))
        });
        if all_ok {
            0
        } else {
            1
        }
    }
}

/// Drives a `Ride`: realises its flow into a scheduling plan, enforces
/// dependency/data-flow/concurrency constraints, propagates skip/failure,
/// and aggregates results.
///
/// Grounded in the teacher's `orchestrator.rs::run_dag` phase loop (level
/// barrier via `futures::future::join_all` over `tokio::spawn`ed tasks) and
/// in the `ciroque-the-dagwood` level-by-level executor from the reference
/// pack (semaphore-gated per-level fan-out).
pub struct ParallelScheduler {
    console: Option<ConsoleSink>,
    cancellation: CancellationToken,
    env: Arc<HashMap<String, String>>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<crate::metrics::SchedulerMetrics>>,
}

impl Default for ParallelScheduler {
    fn default() -> Self {
        Self {
            console: None,
            cancellation: CancellationToken::new(),
            env: Arc::new(HashMap::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}

impl ParallelScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_console(mut self, console: ConsoleSink) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<crate::metrics::SchedulerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `ride` over `loaded_segments`, resolving workspace-relative
    /// paths against `workspace`.
    pub async fn execute(
        &self,
        ride: &Ride,
        loaded_segments: &HashMap<String, Segment>,
        workspace: &Path,
    ) -> SchedulerResult {
        let start = Instant::now();
        let results: Arc<DashMap<String, SegmentResult>> = Arc::new(DashMap::new());
        // Per-segment `Pending -> Ready -> {Skipped | Running} -> terminal`
        // bookkeeping (`spec.md` §4.5 "State machine per segment").
        let states: Arc<DashMap<String, SegmentState>> = Arc::new(DashMap::new());

        // Step 1: resolve every name the flow references.
        let mut resolved: HashMap<String, Segment> = HashMap::new();
        for name in ride.referenced_segments() {
            match loaded_segments.get(&name) {
                Some(segment) => {
                    states.insert(name.clone(), SegmentState::Pending);
                    resolved.insert(name, segment.clone());
                }
                None => {
                    let err = KiteError::UnknownSegment(name.clone());
                    states.insert(name.clone(), SegmentState::Skipped);
                    results.insert(name.clone(), SegmentResult::skipped(&name, err.to_string()));
                }
            }
        }

        if resolved.is_empty() {
            return self.record_metrics(Self::finish(results, start));
        }

        // Step 2: build and validate the graph.
        let segments: Vec<Segment> = resolved.values().cloned().collect();
        let graph = match SegmentGraph::build(&segments) {
            Ok(graph) => graph,
            Err(err) => {
                Self::mark_all_invalid(&results, &states, &resolved, &err);
                return self.record_metrics(Self::finish(results, start));
            }
        };

        if let Err(err) = graph.validate() {
            Self::mark_all_invalid(&results, &states, &resolved, &err);
            return self.record_metrics(Self::finish(results, start));
        }

        // Step 3: compute the layered plan — max(graph level, flow rank).
        let graph_levels = match graph.sort_by_levels() {
            Ok(levels) => levels,
            Err(err) => {
                Self::mark_all_invalid(&results, &states, &resolved, &err);
                return self.record_metrics(Self::finish(results, start));
            }
        };
        let mut graph_level_of: HashMap<String, usize> = HashMap::new();
        for (level_idx, names) in graph_levels.iter().enumerate() {
            for name in names {
                graph_level_of.insert(name.clone(), level_idx);
            }
        }
        let flow_ranks = ride.flow_ranks();

        let mut effective_level: HashMap<String, usize> = HashMap::new();
        for name in resolved.keys() {
            let graph_level = graph_level_of.get(name).copied().unwrap_or(0);
            let flow_rank = flow_ranks.get(name).copied().unwrap_or(0);
            effective_level.insert(name.clone(), graph_level.max(flow_rank));
        }

        let max_level = effective_level.values().copied().max().unwrap_or(0);
        let mut rounds: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
        for (name, level) in &effective_level {
            rounds[*level].push(name.clone());
        }
        for round in rounds.iter_mut() {
            round.sort_unstable();
        }

        let artifacts = Arc::new(ArtifactsRegistry::new());
        let semaphore = Arc::new(Semaphore::new(ride.max_concurrency));
        let log_dir = workspace.join(".kite").join("logs");

        // Step 4-6: dispatch rounds in order, level-by-level.
        for round in rounds {
            if round.is_empty() {
                continue;
            }

            info!(round = ?round, "dispatching level");

            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                for _ in 0..round.len() {
                    metrics.segments_started.inc();
                }
            }

            let mut names = Vec::with_capacity(round.len());
            let mut handles = Vec::with_capacity(round.len());
            for name in round {
                let segment = resolved[&name].clone();
                let ancestors = graph.transitive_dependencies(&name);
                let semaphore = semaphore.clone();
                let results = results.clone();
                let states = states.clone();
                let artifacts = artifacts.clone();
                let cancellation = self.cancellation.clone();
                let console = self.console.clone();
                let env = self.env.clone();
                let workspace = workspace.to_path_buf();
                let log_dir = log_dir.clone();

                names.push(name);
                handles.push(tokio::spawn(async move {
                    let permit = semaphore.acquire_owned().await.ok();
                    let result = Self::run_segment(
                        segment,
                        &ancestors,
                        &results,
                        &states,
                        &artifacts,
                        cancellation,
                        console,
                        env,
                        &workspace,
                        &log_dir,
                    )
                    .await;
                    drop(permit);
                    result
                }));
            }

            // Mirrors the teacher's Ok(Ok)/Ok(Err)/Err(join_err) triage in
            // `orchestrator.rs::run_dag` — a panicking segment task still
            // yields a terminal result instead of vanishing from the run.
            let joined = futures::future::join_all(handles).await;
            for (name, outcome) in names.into_iter().zip(joined) {
                match outcome {
                    Ok(result) => {
                        states.insert(name.clone(), Self::terminal_state(result.status));
                        results.insert(result.segment.clone(), result);
                    }
                    Err(join_err) => {
                        warn!(segment = %name, error = %join_err, "segment task panicked");
                        states.insert(name.clone(), SegmentState::Failure);
                        results.insert(name.clone(), SegmentResult::failure(&name, format!("segment task panicked: {join_err}"), 0));
                    }
                }
            }
        }

        self.record_metrics(Self::finish(results, start))
    }

    #[cfg(feature = "metrics")]
    fn record_metrics(&self, result: SchedulerResult) -> SchedulerResult {
        if let Some(metrics) = &self.metrics {
            metrics.segments_succeeded.inc_by(result.summary.success as u64);
            metrics.segments_failed.inc_by(result.summary.failed as u64);
            metrics.segments_skipped.inc_by(result.summary.skipped as u64);
            metrics
                .run_duration_seconds
                .observe(result.summary.duration_ms as f64 / 1000.0);
        }
        result
    }

    #[cfg(not(feature = "metrics"))]
    fn record_metrics(&self, result: SchedulerResult) -> SchedulerResult {
        result
    }

    fn mark_all_invalid(
        results: &DashMap<String, SegmentResult>,
        states: &DashMap<String, SegmentState>,
        resolved: &HashMap<String, Segment>,
        err: &KiteError,
    ) {
        for name in resolved.keys() {
            states.insert(name.clone(), SegmentState::Skipped);
            results.insert(
                name.clone(),
                SegmentResult::skipped(name, format!("Skipped due to invalid graph: {err}")),
            );
        }
    }

    /// Maps a segment's final `SegmentStatus` onto the terminal
    /// `SegmentState` it corresponds to.
    fn terminal_state(status: SegmentStatus) -> SegmentState {
        match status {
            SegmentStatus::Success => SegmentState::Success,
            SegmentStatus::Failure => SegmentState::Failure,
            SegmentStatus::Timeout => SegmentState::Timeout,
            SegmentStatus::Skipped => SegmentState::Skipped,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_segment(
        segment: Segment,
        ancestors: &HashSet<String>,
        results: &Arc<DashMap<String, SegmentResult>>,
        states: &Arc<DashMap<String, SegmentState>>,
        artifacts: &Arc<ArtifactsRegistry>,
        cancellation: CancellationToken,
        console: Option<ConsoleSink>,
        env: Arc<HashMap<String, String>>,
        workspace: &Path,
        log_dir: &Path,
    ) -> SegmentResult {
        if cancellation.is_cancelled() {
            states.insert(segment.name.clone(), SegmentState::Skipped);
            return SegmentResult::skipped(&segment.name, "Skipped due to cancellation");
        }

        let logger = match SegmentLogger::new(log_dir, &segment.name, console) {
            Ok(logger) => Arc::new(logger),
            Err(err) => {
                states.insert(segment.name.clone(), SegmentState::Failure);
                return SegmentResult::failure(&segment.name, format!("failed to open log file: {err}"), 0)
            }
        };

        let artifacts_view = artifacts.view_for(&segment.inputs, ancestors, workspace);
        let ctx = ExecutionContext::new(
            segment.name.clone(),
            workspace.to_path_buf(),
            env,
            logger.clone(),
            artifacts_view,
        );

        if let Some(condition) = &segment.condition {
            if !condition(&ctx) {
                let err = KiteError::ConditionFalse(segment.name.clone());
                states.insert(segment.name.clone(), SegmentState::Skipped);
                return SegmentResult::skipped(&segment.name, format!("Skipped due to condition: {err}"));
            }
        }

        for dependency in &segment.depends_on {
            match results.get(dependency) {
                Some(dep_result) if dep_result.status.is_failed() || dep_result.status == SegmentStatus::Skipped => {
                    let err = KiteError::DependencyNotSatisfied {
                        segment: segment.name.clone(),
                        dependency: dependency.clone(),
                    };
                    states.insert(segment.name.clone(), SegmentState::Skipped);
                    return SegmentResult::skipped(
                        &segment.name,
                        format!("Skipped due to failed or skipped dependencies: {err}"),
                    );
                }
                _ => {}
            }
        }

        // Every dependency is done and satisfied: the segment is cleared to run.
        states.insert(segment.name.clone(), SegmentState::Ready);

        for input in &segment.inputs {
            if ctx.artifacts().get(input).is_none() {
                let err = KiteError::MissingArtifact(input.clone());
                states.insert(segment.name.clone(), SegmentState::Failure);
                return SegmentResult::failure(&segment.name, err.to_string(), 0);
            }
        }

        logger.info(&format!("starting segment {}", segment.name));
        states.insert(segment.name.clone(), SegmentState::Running);
        let start = Instant::now();

        let run_future = segment.execute.run(&ctx);
        let outcome = match segment.timeout {
            Some(timeout) => {
                tokio::select! {
                    result = tokio::time::timeout(timeout, run_future) => result,
                    _ = cancellation.cancelled() => {
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        logger.error("cancelled");
                        return SegmentResult::failure(&segment.name, "Cancelled", elapsed_ms);
                    }
                }
            }
            None => {
                tokio::select! {
                    result = run_future => Ok(result),
                    _ = cancellation.cancelled() => {
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        logger.error("cancelled");
                        return SegmentResult::failure(&segment.name, "Cancelled", elapsed_ms);
                    }
                }
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                logger.error(&format!("timed out after {elapsed_ms}ms"));
                SegmentResult::timeout(&segment.name, elapsed_ms)
            }
            Ok(Err(source)) => {
                let err = KiteError::BodyError {
                    segment: segment.name.clone(),
                    source,
                };
                logger.error(&format!("failed: {err}"));
                SegmentResult::failure(&segment.name, err.to_string(), elapsed_ms)
            }
            Ok(Ok(())) => {
                for (artifact_name, path) in &segment.outputs {
                    if let Err(err) =
                        artifacts.declare_output(&segment.name, artifact_name, PathBuf::from(path))
                    {
                        logger.error(&format!("artifact declaration failed: {err}"));
                        return SegmentResult::failure(&segment.name, err.to_string(), elapsed_ms);
                    }
                }
                logger.info(&format!("completed in {elapsed_ms}ms"));
                SegmentResult::success(&segment.name, elapsed_ms)
            }
        }
    }

    fn finish(results: Arc<DashMap<String, SegmentResult>>, start: Instant) -> SchedulerResult {
        let mut summary = RunSummary {
            duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        };

        let mut out = HashMap::with_capacity(results.len());
        for entry in results.iter() {
            let result = entry.value().clone();
            summary.sequential_equivalent_ms += result.duration_ms;
            match result.status {
                SegmentStatus::Success => summary.success += 1,
                SegmentStatus::Skipped => summary.skipped += 1,
                SegmentStatus::Failure | SegmentStatus::Timeout => summary.failed += 1,
            }
            out.insert(entry.key().clone(), result);
        }

        SchedulerResult { results: out, summary }
    }
}
