use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;

/// A condition predicate evaluated against the `ExecutionContext` before a
/// segment's body is dispatched. Pure: must not perform side effects.
pub type Condition = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// The executable body of a segment. Implemented as a trait object so a
/// DSL loader, or a domain plugin (Git, build-tool wrappers), can supply
/// arbitrary async work without this crate knowing about it — the seam
/// `spec.md` calls an "external collaborator".
#[async_trait]
pub trait SegmentBody: Send + Sync {
    async fn run(&self, ctx: &ExecutionContext) -> anyhow::Result<()>;
}

type BoxedBodyFuture =
    Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Adapts a plain async closure into a `SegmentBody`, so tests, benches and
/// simple callers don't need to write a dedicated struct + impl per segment.
pub struct FnBody<F>(F)
where
    F: Fn(ExecutionContext) -> BoxedBodyFuture + Send + Sync;

impl<F> FnBody<F>
where
    F: Fn(ExecutionContext) -> BoxedBodyFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> SegmentBody for FnBody<F>
where
    F: Fn(ExecutionContext) -> BoxedBodyFuture + Send + Sync,
{
    async fn run(&self, ctx: &ExecutionContext) -> anyhow::Result<()> {
        (self.0)(ctx.clone()).await
    }
}

/// Convenience macro-free helper: wraps `f` (an `Fn(ExecutionContext) -> impl
/// Future<Output = anyhow::Result<()>> + Send`) into a boxed `SegmentBody`.
pub fn body_fn<F, Fut>(f: F) -> Arc<dyn SegmentBody>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnBody::new(move |ctx| Box::pin(f(ctx)) as BoxedBodyFuture))
}

/// An immutable descriptor for a named, dependency-bearing unit of work.
#[derive(Clone)]
pub struct Segment {
    pub name: String,
    pub description: Option<String>,
    pub depends_on: HashSet<String>,
    pub condition: Option<Condition>,
    pub inputs: HashSet<String>,
    /// artifact name -> workspace-relative path this segment promises to produce
    pub outputs: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub execute: Arc<dyn SegmentBody>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("depends_on", &self.depends_on)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for a `Segment`. Mirrors the teacher's `StageNode::new` pattern
/// but covers the fuller field set `spec.md` §3 requires.
pub struct SegmentBuilder {
    name: String,
    description: Option<String>,
    depends_on: HashSet<String>,
    condition: Option<Condition>,
    inputs: HashSet<String>,
    outputs: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            depends_on: HashSet::new(),
            condition: None,
            inputs: HashSet::new(),
            outputs: HashMap::new(),
            timeout: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    pub fn condition<C>(mut self, condition: C) -> Self
    where
        C: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.insert(artifact.into());
        self
    }

    pub fn output(mut self, artifact: impl Into<String>, path: impl Into<String>) -> Self {
        self.outputs.insert(artifact.into(), path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self, execute: Arc<dyn SegmentBody>) -> Segment {
        Segment {
            name: self.name,
            description: self.description,
            depends_on: self.depends_on,
            condition: self.condition,
            inputs: self.inputs,
            outputs: self.outputs,
            timeout: self.timeout,
            execute,
        }
    }
}

/// Terminal outcome of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    Success,
    Failure,
    Skipped,
    Timeout,
}

impl SegmentStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SegmentStatus::Failure | SegmentStatus::Timeout)
    }
}

/// The diagnostic payload recorded for every segment in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    pub segment: String,
    pub status: SegmentStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl SegmentResult {
    pub fn success(segment: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            segment: segment.into(),
            status: SegmentStatus::Success,
            error: None,
            duration_ms,
            message: None,
        }
    }

    pub fn skipped(segment: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            status: SegmentStatus::Skipped,
            error: None,
            duration_ms: 0,
            message: Some(message.into()),
        }
    }

    pub fn failure(segment: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            segment: segment.into(),
            status: SegmentStatus::Failure,
            error: Some(error.into()),
            duration_ms,
            message: None,
        }
    }

    pub fn timeout(segment: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            segment: segment.into(),
            status: SegmentStatus::Timeout,
            error: Some(format!("timed out after {}ms", duration_ms)),
            duration_ms,
            message: None,
        }
    }
}

/// Per-segment state machine: `Pending -> Ready -> {Skipped | Running} ->
/// {Success | Failure | Timeout}`. In-memory only, scoped to a single run —
/// unlike the teacher's `JobStateMachine` this carries no persisted state
/// and no retry/backoff (durable state and resumable workflows are
/// explicitly out of scope for this engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Ready,
    Skipped,
    Running,
    Success,
    Failure,
    Timeout,
}

impl SegmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SegmentState::Skipped
                | SegmentState::Success
                | SegmentState::Failure
                | SegmentState::Timeout
        )
    }
}
