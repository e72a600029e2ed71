use serde::{Deserialize, Serialize};

/// The one ambient tunable not carried on a `Ride` itself: the default
/// concurrency bound when a caller builds a ride without an explicit
/// `maxConcurrency`. Mirrors the teacher's `StageConfig::default()`, which
/// sizes `parallel_workers` off `num_cpus::get()`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get(),
        }
    }
}

/// One step of a ride's authored flow: either a single segment, or a set
/// of segments the author intends to run simultaneously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Single(String),
    Parallel(Vec<String>),
}

impl Step {
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Step::Single(name) => vec![name.as_str()],
            Step::Parallel(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// An immutable composition plan over segments: a concurrency bound and an
/// explicit sequence/parallel structure (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Ride {
    pub name: String,
    pub max_concurrency: usize,
    pub flow: Vec<Step>,
}

impl Ride {
    pub fn new(name: impl Into<String>, max_concurrency: usize, flow: Vec<Step>) -> Self {
        assert!(max_concurrency > 0, "max_concurrency must be positive");
        Self {
            name: name.into(),
            max_concurrency,
            flow,
        }
    }

    /// As `new`, but falls back to `SchedulerConfig::default()`'s
    /// `num_cpus::get()`-sized concurrency when the caller has no explicit
    /// bound in mind.
    pub fn with_default_concurrency(name: impl Into<String>, flow: Vec<Step>) -> Self {
        Self::new(name, SchedulerConfig::default().max_concurrency, flow)
    }

    /// All segment names referenced anywhere in the flow, in first-seen order.
    pub fn referenced_segments(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for step in &self.flow {
            for name in step.segments() {
                if seen.insert(name.to_string()) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// The flow rank of each referenced segment: each `Single` step bumps
    /// the rank by one; each `Parallel` step assigns all its members the
    /// same rank, one more than the previous step. Used to reconcile the
    /// ride's authored ordering with the data-dependency graph (`spec.md`
    /// §9 "Flow vs graph reconciliation").
    pub fn flow_ranks(&self) -> std::collections::HashMap<String, usize> {
        let mut ranks = std::collections::HashMap::new();
        for (rank, step) in self.flow.iter().enumerate() {
            for name in step.segments() {
                ranks.insert(name.to_string(), rank);
            }
        }
        ranks
    }
}
