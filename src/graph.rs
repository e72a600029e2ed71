use std::collections::{HashMap, HashSet};

use crate::error::{KiteError, Result};
use crate::segment::Segment;

/// A directed graph where an edge from A to B means "B depends on A".
/// Grounded in the teacher's `dag.rs::PipelineDAG`, generalized from a
/// fixed 4-variant stage enum to arbitrary segment names.
#[derive(Debug, Clone)]
pub struct SegmentGraph {
    /// segment name -> its `dependsOn` set
    dependencies: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl SegmentGraph {
    /// Build a graph from segment descriptors. Fails with `DuplicateName`
    /// if two segments share a name.
    pub fn build(segments: &[Segment]) -> Result<Self> {
        let mut dependencies = HashMap::with_capacity(segments.len());
        for segment in segments {
            if dependencies
                .insert(segment.name.clone(), segment.depends_on.clone())
                .is_some()
            {
                return Err(KiteError::DuplicateName(segment.name.clone()));
            }
        }
        Ok(Self { dependencies })
    }

    pub fn node_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.dependencies.get(name)
    }

    /// The full set of `name`'s transitive dependencies (direct and
    /// indirect). Used by the scheduler to verify that an artifact's
    /// producer is actually upstream of the consumer before handing back a
    /// path, per `spec.md` §3.
    pub fn transitive_dependencies(&self, name: &str) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut stack: Vec<&str> = self
            .dependencies
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                if let Some(deps) = self.dependencies.get(current) {
                    for dep in deps {
                        if !seen.contains(dep) {
                            stack.push(dep.as_str());
                        }
                    }
                }
            }
        }

        seen
    }

    /// Validate that every `dependsOn` entry resolves to a known segment
    /// and that the graph is acyclic. On success, returns nothing; on
    /// failure, returns the first violation found (unknown dependencies are
    /// checked before cycles, matching `spec.md` §4.1).
    pub fn validate(&self) -> Result<()> {
        for (name, deps) in &self.dependencies {
            for dep in deps {
                if !self.dependencies.contains_key(dep) {
                    return Err(KiteError::UnknownDependency {
                        segment: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.detect_cycle()
    }

    /// DFS with three-color marking. The reported cycle is the back-edge's
    /// path from the current DFS stack, per `spec.md` §4.1.
    fn detect_cycle(&self) -> Result<()> {
        let mut colors: HashMap<&str, Color> = self
            .dependencies
            .keys()
            .map(|name| (name.as_str(), Color::White))
            .collect();
        let mut stack: Vec<String> = Vec::new();

        let mut names: Vec<&str> = self.dependencies.keys().map(String::as_str).collect();
        names.sort_unstable();

        for start in names {
            if colors[start] == Color::White {
                self.visit(start, &mut colors, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        colors.insert(node, Color::Gray);
        stack.push(node.to_string());

        let mut deps: Vec<&String> = self.dependencies[node].iter().collect();
        deps.sort_unstable();

        for dep in deps {
            match colors.get(dep.as_str()) {
                Some(Color::White) => self.visit(dep.as_str(), colors, stack)?,
                Some(Color::Gray) => {
                    let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].to_vec();
                    path.push(dep.clone());
                    return Err(KiteError::Cycle { path });
                }
                _ => {}
            }
        }

        stack.pop();
        colors.insert(node, Color::Black);
        Ok(())
    }

    /// Kahn's algorithm, producer-before-consumer, with stable tie-breaking
    /// on name. Fails with `Cycle` if the graph is not a DAG.
    pub fn sort(&self) -> Result<Vec<String>> {
        let levels = self.sort_by_levels()?;
        Ok(levels.into_iter().flatten().collect())
    }

    /// Level 0 is the set of roots (no dependencies). Level k+1 is the set
    /// of nodes whose every dependency is in levels <= k. Names within a
    /// level are sorted for determinism.
    pub fn sort_by_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining_deps: HashMap<&str, HashSet<&str>> = self
            .dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.iter().map(String::as_str).collect()))
            .collect();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut placed = 0usize;

        while placed < self.dependencies.len() {
            let mut ready: Vec<&str> = remaining_deps
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                // Whatever remains is part of (or downstream of) a cycle.
                let mut remaining: Vec<String> =
                    remaining_deps.keys().map(|s| s.to_string()).collect();
                remaining.sort_unstable();
                return Err(KiteError::Cycle { path: remaining });
            }

            ready.sort_unstable();
            for name in &ready {
                remaining_deps.remove(*name);
            }
            for deps in remaining_deps.values_mut() {
                for name in &ready {
                    deps.remove(*name);
                }
            }

            placed += ready.len();
            levels.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{body_fn, SegmentBuilder};

    fn seg(name: &str, deps: &[&str]) -> Segment {
        let mut builder = SegmentBuilder::new(name);
        for dep in deps {
            builder = builder.depends_on(*dep);
        }
        builder.build(body_fn(|_ctx| async move { Ok(()) }))
    }

    #[test]
    fn test_empty_graph_has_no_levels_needed_but_validates() {
        let graph = SegmentGraph::build(&[]).unwrap();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.sort_by_levels().unwrap().len(), 0);
    }

    #[test]
    fn test_single_segment_no_deps_is_one_level() {
        let segments = vec![seg("a", &[])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let levels = graph.sort_by_levels().unwrap();
        assert_eq!(levels, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn test_no_edges_among_n_segments_is_one_level_of_n() {
        let segments = vec![seg("a", &[]), seg("b", &[]), seg("c", &[])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let levels = graph.sort_by_levels().unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 3);
    }

    #[test]
    fn test_chain_of_n_segments_is_n_levels() {
        let segments = vec![seg("a", &[]), seg("b", &["a"]), seg("c", &["b"])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let levels = graph.sort_by_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string()],
                vec!["c".to_string()],
            ]
        );
    }

    #[test]
    fn test_diamond_levels_scenario_1() {
        // A, B(depA), C(depA), D(dep B,C)
        let segments = vec![
            seg("A", &[]),
            seg("B", &["A"]),
            seg("C", &["A"]),
            seg("D", &["B", "C"]),
        ];
        let graph = SegmentGraph::build(&segments).unwrap();
        let levels = graph.sort_by_levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["A".to_string()]);
        assert_eq!(levels[1], vec!["B".to_string(), "C".to_string()]);
        assert_eq!(levels[2], vec!["D".to_string()]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let segments = vec![seg("a", &[]), seg("a", &[])];
        let err = SegmentGraph::build(&segments).unwrap_err();
        assert!(matches!(err, KiteError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let segments = vec![seg("a", &["missing"])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, KiteError::UnknownDependency { .. }));
    }

    #[test]
    fn test_cycle_is_detected() {
        let segments = vec![seg("a", &["b"]), seg("b", &["a"])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, KiteError::Cycle { .. }));
    }

    #[test]
    fn test_sort_respects_name_tie_break() {
        // A, B, C(depA) with maxConcurrency=1 scenario from spec.md §8
        let segments = vec![seg("A", &[]), seg("B", &[]), seg("C", &["A"])];
        let graph = SegmentGraph::build(&segments).unwrap();
        let order = graph.sort().unwrap();
        assert_eq!(order, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_transitive_dependencies_includes_indirect_ancestors() {
        let segments = vec![
            seg("A", &[]),
            seg("B", &["A"]),
            seg("C", &["A"]),
            seg("D", &["B", "C"]),
        ];
        let graph = SegmentGraph::build(&segments).unwrap();
        let ancestors = graph.transitive_dependencies("D");
        assert_eq!(
            ancestors,
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
        );
        assert!(graph.transitive_dependencies("A").is_empty());
    }
}
