//! Resource Dependency Graph
//!
//! A directed graph over resource ids — edge `A → B` means "A depends on
//! B". The graph never holds resource data, only ids, so it survives
//! evictions and reloads unchanged.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{CathodeError, Result};

/// Adjacency-set dependency tracker.
#[derive(Default, Debug)]
pub struct DependencyTracker {
    /// id → ids it depends on.
    dependencies: FxHashMap<String, FxHashSet<String>>,
    /// id → ids that depend on it.
    dependents: FxHashMap<String, FxHashSet<String>>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `a → b` ("a depends on b") in both directions.
    pub fn add_dependency(&mut self, a: &str, b: &str) {
        self.dependencies
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.dependents
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    /// Removes `a → b`. Unknown edges no-op.
    pub fn remove_dependency(&mut self, a: &str, b: &str) {
        if let Some(set) = self.dependencies.get_mut(a) {
            set.remove(b);
        }
        if let Some(set) = self.dependents.get_mut(b) {
            set.remove(a);
        }
    }

    /// Drops every edge touching `id`.
    pub fn remove_node(&mut self, id: &str) {
        if let Some(deps) = self.dependencies.remove(id) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(id);
                }
            }
        }
        if let Some(dependents) = self.dependents.remove(id) {
            for dependent in dependents {
                if let Some(set) = self.dependencies.get_mut(&dependent) {
                    set.remove(id);
                }
            }
        }
    }

    /// Direct dependencies of `id`.
    #[must_use]
    pub fn direct_dependencies(&self, id: &str) -> Vec<String> {
        self.dependencies
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `id`.
    #[must_use]
    pub fn direct_dependents(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Transitive closure of dependencies. The visited set doubles as cycle
    /// protection: revisiting a node just stops that walk.
    #[must_use]
    pub fn all_dependencies(&self, id: &str) -> Vec<String> {
        self.closure(id, &self.dependencies)
    }

    /// Transitive closure of dependents.
    #[must_use]
    pub fn all_dependents(&self, id: &str) -> Vec<String> {
        self.closure(id, &self.dependents)
    }

    fn closure(&self, id: &str, adjacency: &FxHashMap<String, FxHashSet<String>>) -> Vec<String> {
        let mut visited = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack: Vec<&str> = adjacency
            .get(id)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if !visited.insert(next.to_string()) {
                continue;
            }
            out.push(next.to_string());
            if let Some(more) = adjacency.get(next) {
                stack.extend(more.iter().map(String::as_str));
            }
        }
        out
    }

    /// Explicit recursion-stack DFS cycle check from `id`.
    #[must_use]
    pub fn has_circular_dependency(&self, id: &str) -> bool {
        let mut visited = FxHashSet::default();
        let mut in_progress = FxHashSet::default();
        self.dfs_cycle(id, &mut visited, &mut in_progress)
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut FxHashSet<&'a str>,
        in_progress: &mut FxHashSet<&'a str>,
    ) -> bool {
        if in_progress.contains(id) {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        in_progress.insert(id);
        if let Some(deps) = self.dependencies.get(id) {
            for dep in deps {
                if self.dfs_cycle(dep, visited, in_progress) {
                    return true;
                }
            }
        }
        in_progress.remove(id);
        false
    }

    /// Dependency-first topological order over `ids` and everything they
    /// transitively need. A node is emitted only after all its dependencies;
    /// re-entering an in-progress node fails with
    /// [`CathodeError::CircularDependency`].
    pub fn load_order(&self, ids: &[&str]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut emitted = FxHashSet::default();
        let mut in_progress = FxHashSet::default();
        for id in ids {
            self.visit(id, &mut order, &mut emitted, &mut in_progress)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: &str,
        order: &mut Vec<String>,
        emitted: &mut FxHashSet<String>,
        in_progress: &mut FxHashSet<String>,
    ) -> Result<()> {
        if emitted.contains(id) {
            return Ok(());
        }
        if !in_progress.insert(id.to_string()) {
            return Err(CathodeError::CircularDependency(id.to_string()));
        }
        if let Some(deps) = self.dependencies.get(id) {
            // Sort for a deterministic order among independent siblings.
            let mut deps: Vec<&String> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                self.visit(dep, order, emitted, in_progress)?;
            }
        }
        in_progress.remove(id);
        emitted.insert(id.to_string());
        order.push(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_order_is_dependency_first() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dependency("c", "b");
        tracker.add_dependency("b", "a");
        let order = tracker.load_order(&["c"]).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_detected_in_load_order() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dependency("a", "b");
        tracker.add_dependency("b", "a");
        assert!(matches!(
            tracker.load_order(&["a"]),
            Err(CathodeError::CircularDependency(_))
        ));
        assert!(tracker.has_circular_dependency("a"));
    }

    #[test]
    fn closures_are_transitive_and_cycle_safe() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dependency("a", "b");
        tracker.add_dependency("b", "c");
        tracker.add_dependency("c", "a");
        let mut deps = tracker.all_dependencies("a");
        deps.sort();
        assert_eq!(deps, vec!["a", "b", "c"]);

        let mut rdeps = tracker.all_dependents("c");
        rdeps.sort();
        assert_eq!(rdeps, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_edge_and_node() {
        let mut tracker = DependencyTracker::new();
        tracker.add_dependency("a", "b");
        tracker.add_dependency("a", "c");
        tracker.remove_dependency("a", "b");
        assert_eq!(tracker.direct_dependencies("a"), vec!["c"]);

        tracker.remove_node("c");
        assert!(tracker.direct_dependencies("a").is_empty());
        assert!(tracker.direct_dependents("c").is_empty());
    }
}
