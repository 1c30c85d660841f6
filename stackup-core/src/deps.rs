use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::errors::{Result, StackError};

/// Result of grouping a dependency graph into levels.
///
/// Unlike a strict topological sort, layering never fails: nodes that cannot be
/// placed are reported instead so callers can decide what a cycle or a dangling
/// reference means for them (the planner rejects them, the validator fails or
/// skips the affected rules).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layering {
    /// Level 0 first. Nodes at the same level do not depend on each other.
    pub layers: Vec<Vec<String>>,
    /// `(node, dependency)` pairs whose dependency is not part of the graph.
    /// Missing dependencies do not affect a node's level.
    pub missing: Vec<(String, String)>,
    /// Nodes that sit on a dependency cycle.
    pub cyclic: Vec<String>,
    /// Nodes not on a cycle but depending (transitively) on one.
    pub blocked: Vec<String>,
}

impl Layering {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.cyclic.is_empty() && self.blocked.is_empty()
    }
}

/// Group nodes by dependency level for parallel execution.
///
/// A node's level is 1 + the maximum level of its dependencies; nodes without
/// (known) dependencies are at level 0.
///
/// Example: for A (no deps), B (no deps), C (depends on A), D (depends on A, B)
/// the layers are `[[A, B], [C, D]]`.
pub fn layer_graph(graph: &BTreeMap<String, Vec<String>>) -> Layering {
    let mut levels: HashMap<String, Option<usize>> = HashMap::new();
    let mut cyclic: BTreeSet<String> = BTreeSet::new();

    fn compute_level(
        name: &str,
        graph: &BTreeMap<String, Vec<String>>,
        levels: &mut HashMap<String, Option<usize>>,
        path: &mut Vec<String>,
        cyclic: &mut BTreeSet<String>,
    ) -> Option<usize> {
        if let Some(level) = levels.get(name) {
            return *level;
        }

        if let Some(pos) = path.iter().position(|n| n == name) {
            cyclic.extend(path[pos..].iter().cloned());
            return None;
        }

        path.push(name.to_string());

        let mut level = Some(0);
        for dep in graph.get(name).into_iter().flatten() {
            if !graph.contains_key(dep) {
                continue;
            }
            match compute_level(dep, graph, levels, path, cyclic) {
                Some(dep_level) => level = level.map(|l: usize| l.max(dep_level + 1)),
                None => level = None,
            }
        }

        path.pop();
        levels.insert(name.to_string(), level);
        level
    }

    for name in graph.keys() {
        let mut path = Vec::new();
        compute_level(name, graph, &mut levels, &mut path, &mut cyclic);
    }

    let mut missing = Vec::new();
    for (name, deps) in graph {
        for dep in deps {
            if !graph.contains_key(dep) {
                missing.push((name.clone(), dep.clone()));
            }
        }
    }

    let max_level = levels.values().flatten().copied().max();
    let mut layers: Vec<Vec<String>> = match max_level {
        Some(max) => vec![Vec::new(); max + 1],
        None => Vec::new(),
    };
    let mut blocked = Vec::new();

    // BTreeMap iteration keeps every level sorted
    for name in graph.keys() {
        match levels.get(name).copied().flatten() {
            Some(level) => layers[level].push(name.clone()),
            None if cyclic.contains(name) => {}
            None => blocked.push(name.clone()),
        }
    }

    Layering {
        layers,
        missing,
        cyclic: cyclic.into_iter().collect(),
        blocked,
    }
}

/// Strict variant used for service graphs: any missing dependency or cycle is an error.
pub fn start_levels(graph: &BTreeMap<String, Vec<String>>) -> Result<Vec<Vec<String>>> {
    let layering = layer_graph(graph);

    if let Some((service, dependency)) = layering.missing.first() {
        return Err(StackError::MissingDependency {
            service: service.clone(),
            dependency: dependency.clone(),
        });
    }

    if !layering.cyclic.is_empty() {
        return Err(StackError::DependencyCycle(format!(
            "Cycle detected involving: {}",
            layering.cyclic.join(", ")
        )));
    }

    if !layering.blocked.is_empty() {
        return Err(StackError::DependencyCycle(format!(
            "Services depend on a cycle: {}",
            layering.blocked.join(", ")
        )));
    }

    Ok(layering.layers)
}

#[cfg(test)]
mod tests;
