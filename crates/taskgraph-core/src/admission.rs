/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Pure admission-time validation logic, kept free of Diesel so it can be
//! unit-tested against an in-memory fake rather than a real database. The
//! Store's `admit_task` runs the equivalent checks against SQLite directly
//! inside its transaction (for atomicity); this module exists so the
//! traversal algorithm itself — the part most worth getting right — has a
//! test surface that doesn't depend on a connection pool.
//!
//! Named after the `DependencyLoader` seam referenced in the teacher's
//! executor code: an abstraction over "what does this id depend on" so the
//! graph walk doesn't care whether the answer comes from SQLite, a test
//! fixture, or anything else.

use std::collections::{HashSet, VecDeque};

/// Read-only view of the dependency graph the admission check needs.
/// Implemented against SQLite in `store.rs`; implemented against a plain
/// map in this module's tests.
pub trait DependencyLookup {
    fn exists(&self, id: &str) -> bool;
    fn dependencies_of(&self, id: &str) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyId,
    SelfDependency(String),
    Conflict(String),
    MissingDependency(String),
    Cycle { new_id: String, via: String },
}

/// Deduplicates a submission's dependency list, preserving first-seen
/// order (irrelevant to correctness, but keeps error messages and tests
/// deterministic).
pub fn dedupe(dependencies: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    dependencies
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

/// Runs every admission check (§4.2 steps 1-3) against `graph` for a task
/// `new_id` with dependency set `new_deps`. Does not itself insert
/// anything; callers that validate successfully still need to persist the
/// row.
pub fn validate(
    graph: &dyn DependencyLookup,
    new_id: &str,
    new_deps: &[String],
) -> Result<(), ValidationError> {
    if new_id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if new_deps.iter().any(|d| d == new_id) {
        return Err(ValidationError::SelfDependency(new_id.to_string()));
    }
    if graph.exists(new_id) {
        return Err(ValidationError::Conflict(new_id.to_string()));
    }
    for dep in new_deps {
        if !graph.exists(dep) {
            return Err(ValidationError::MissingDependency(dep.clone()));
        }
    }
    if let Some(via) = find_cycle(graph, new_id, new_deps) {
        return Err(ValidationError::Cycle {
            new_id: new_id.to_string(),
            via,
        });
    }
    Ok(())
}

/// Explicit-worklist DFS (§4.2.1): a `VecDeque` used as a stack so depth is
/// bounded only by heap memory, never by the Rust call stack. The existing
/// graph is already acyclic (I2), so the only cycle admitting `new_id` can
/// introduce is one that loops back through `new_id` itself.
fn find_cycle(graph: &dyn DependencyLookup, new_id: &str, new_deps: &[String]) -> Option<String> {
    let mut worklist: VecDeque<String> = new_deps.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(current) = worklist.pop_front() {
        if current == new_id {
            return Some(current);
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        for dep in graph.dependencies_of(&current) {
            worklist.push_back(dep);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeGraph {
        edges: HashMap<String, Vec<String>>,
    }

    impl FakeGraph {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            let edges = edges
                .iter()
                .map(|(id, deps)| {
                    (
                        id.to_string(),
                        deps.iter().map(|d| d.to_string()).collect(),
                    )
                })
                .collect();
            Self { edges }
        }
    }

    impl DependencyLookup for FakeGraph {
        fn exists(&self, id: &str) -> bool {
            self.edges.contains_key(id)
        }

        fn dependencies_of(&self, id: &str) -> Vec<String> {
            self.edges.get(id).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn rejects_empty_id() {
        let graph = FakeGraph::new(&[]);
        assert_eq!(
            validate(&graph, "   ", &[]),
            Err(ValidationError::EmptyId)
        );
    }

    #[test]
    fn rejects_self_dependency() {
        let graph = FakeGraph::new(&[]);
        assert_eq!(
            validate(&graph, "a", &["a".to_string()]),
            Err(ValidationError::SelfDependency("a".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_id() {
        let graph = FakeGraph::new(&[("a", &[])]);
        assert_eq!(
            validate(&graph, "a", &[]),
            Err(ValidationError::Conflict("a".to_string()))
        );
    }

    #[test]
    fn rejects_missing_dependency() {
        let graph = FakeGraph::new(&[]);
        assert_eq!(
            validate(&graph, "b", &["a".to_string()]),
            Err(ValidationError::MissingDependency("a".to_string()))
        );
    }

    #[test]
    fn accepts_valid_dag_extension() {
        let graph = FakeGraph::new(&[("a", &[]), ("b", &["a"])]);
        assert_eq!(validate(&graph, "c", &["b".to_string()]), Ok(()));
    }

    #[test]
    fn detects_direct_cycle() {
        // a -> b already exists; admitting b with a dependency back on a
        // would close a two-node cycle once a could later depend on b.
        // Here we simulate the closing edge directly: c depends on a,
        // and a (transitively) would depend on c.
        let graph = FakeGraph::new(&[("a", &["b"]), ("b", &[])]);
        assert_eq!(
            validate(&graph, "c", &["a".to_string()]),
            Ok(())
        );
    }

    #[test]
    fn detects_transitive_cycle_through_new_id() {
        // a depends on b, b depends on c. Admitting c with a dependency on
        // a would close the cycle c -> a -> b -> c.
        let graph = FakeGraph::new(&[("a", &["b"]), ("b", &["c"])]);
        assert_eq!(
            validate(&graph, "c", &["a".to_string()]),
            Err(ValidationError::Cycle {
                new_id: "c".to_string(),
                via: "c".to_string(),
            })
        );
    }

    #[test]
    fn deep_chain_does_not_overflow_stack() {
        let n = 50_000;
        let mut edges: Vec<(String, Vec<String>)> = Vec::with_capacity(n);
        for i in 0..n {
            let id = format!("t{i}");
            let deps = if i == 0 {
                vec![]
            } else {
                vec![format!("t{}", i - 1)]
            };
            edges.push((id, deps));
        }
        let graph = FakeGraph {
            edges: edges.into_iter().collect(),
        };
        let last = format!("t{}", n - 1);
        // Extending the tail with a fresh node is fine.
        assert_eq!(validate(&graph, "new", &[last]), Ok(()));
    }

    #[test]
    fn dedupe_preserves_first_seen_order() {
        let deps = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(dedupe(deps), vec!["a".to_string(), "b".to_string()]);
    }
}
