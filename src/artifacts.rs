use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use dashmap::DashMap;

use crate::error::{KiteError, Result};

/// An artifact entry as declared by its producer: the path it promised,
/// plus the name of the segment that produced it — needed so `view_for`
/// can verify the producer is actually an ancestor of the consumer before
/// handing back a path (`spec.md` §3: "some already-successful *upstream*
/// segment has declared that artifact as an output").
struct Entry {
    producer: String,
    path: PathBuf,
}

/// Records artifact name -> filesystem path pairs produced by segments and
/// exposes a read-only view to consumers. Backed by `dashmap::DashMap`
/// (lock-free concurrent map) so many segment tasks can declare and read
/// entries without contending on a single mutex — the same choice the
/// teacher makes for its reverse-dependency index in `dependency_graph.rs`.
#[derive(Default)]
pub struct ArtifactsRegistry {
    entries: DashMap<String, Entry>,
}

impl ArtifactsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after the producing segment's SUCCESS. Idempotent for
    /// identical `(name, path)` from the same producer; fails with
    /// `ArtifactCollision` on a second declaration with a different path.
    pub fn declare_output(&self, producer: &str, artifact_name: &str, path: PathBuf) -> Result<()> {
        match self.entries.get(artifact_name) {
            Some(existing) if existing.path == path => Ok(()),
            Some(existing) => Err(KiteError::ArtifactCollision {
                name: artifact_name.to_string(),
                existing: existing.path.display().to_string(),
                attempted: path.display().to_string(),
            }),
            None => {
                self.entries.insert(
                    artifact_name.to_string(),
                    Entry {
                        producer: producer.to_string(),
                        path,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn get(&self, artifact_name: &str) -> Option<PathBuf> {
        self.entries.get(artifact_name).map(|entry| entry.path.clone())
    }

    /// Builds a consumer-facing snapshot restricted to `inputs`, resolved
    /// against `workspace`. An artifact is included only if it was
    /// declared, its producer completed SUCCESS, AND that producer is a
    /// member of `ancestors` — the consumer's transitive `dependsOn` set.
    /// Without the ancestor check, two unrelated segments that happen to
    /// share an artifact name would leak a path across segments with no
    /// dependency edge between them.
    pub fn view_for(
        &self,
        inputs: &HashSet<String>,
        ancestors: &HashSet<String>,
        workspace: &std::path::Path,
    ) -> ArtifactsView {
        let mut snapshot = HashMap::with_capacity(inputs.len());
        for name in inputs {
            if let Some(entry) = self.entries.get(name) {
                if !ancestors.contains(&entry.producer) {
                    continue;
                }
                let path = entry.path.clone();
                let resolved = if path.is_absolute() {
                    path
                } else {
                    workspace.join(path)
                };
                snapshot.insert(name.clone(), resolved);
            }
        }
        ArtifactsView { snapshot }
    }
}

/// The read-only, per-segment view over the artifacts a consumer declared
/// as `inputs`. Paths are resolved against the ride's workspace root;
/// consumers should treat them as read-only.
#[derive(Debug, Clone, Default)]
pub struct ArtifactsView {
    snapshot: HashMap<String, PathBuf>,
}

impl ArtifactsView {
    pub fn get(&self, artifact_name: &str) -> Option<PathBuf> {
        self.snapshot.get(artifact_name).cloned()
    }
}
