use thiserror::Error;

pub type Result<T> = std::result::Result<T, KiteError>;

/// The error surface of the execution engine.
///
/// Each variant corresponds to one of the semantic error tags in the
/// design: graph validation failures abort a run before any segment body
/// executes, while per-segment failures (`ProcessExecutionError`,
/// `BodyError`, `Timeout`) are always caught by the scheduler and turned
/// into a `SegmentResult` — they never escape `ParallelScheduler::execute`.
#[derive(Error, Debug)]
pub enum KiteError {
    #[error("duplicate segment name: {0}")]
    DuplicateName(String),

    #[error("segment {segment:?} depends on unknown segment {dependency:?}")]
    UnknownDependency { segment: String, dependency: String },

    #[error("ride references unknown segment: {0}")]
    UnknownSegment(String),

    #[error("dependency graph contains a cycle: {path:?}")]
    Cycle { path: Vec<String> },

    #[error("segment {0} condition evaluated to false")]
    ConditionFalse(String),

    #[error("segment {segment} depends on unsatisfied segment {dependency}")]
    DependencyNotSatisfied { segment: String, dependency: String },

    #[error("segment {0} timed out after {1}ms")]
    Timeout(String, u64),

    #[error("process `{command}` failed with exit code {exit_code}: {output}")]
    ProcessExecutionError {
        command: String,
        exit_code: i32,
        output: String,
        duration_ms: u64,
    },

    #[error("artifact `{name}` already declared with a different path: {existing} != {attempted}")]
    ArtifactCollision {
        name: String,
        existing: String,
        attempted: String,
    },

    #[error("artifact `{0}` has no successful producer visible to this segment")]
    MissingArtifact(String),

    #[error("segment {segment} body failed: {source}")]
    BodyError {
        segment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KiteError {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            KiteError::ProcessExecutionError { .. }
                | KiteError::BodyError { .. }
                | KiteError::Timeout(..)
        )
    }
}
