//! Dependency graph: cycle detection and deterministic topological order.

use sdp_error::{ErrorCode, Result, SdpError};
use sdp_workstream::{WorkstreamDoc, WorkstreamId};
use std::collections::{BTreeMap, BTreeSet};

/// Deterministic topological order over a feature's workstreams.
///
/// Kahn's algorithm with a sorted ready set: among ready workstreams the
/// lowest id runs first, so the order is stable across runs and platforms.
///
/// # Errors
///
/// - `DEPENDENCY_UNKNOWN` when a `depends_on` entry names a workstream not
///   in the set.
/// - `DEPENDENCY_CYCLE` when the graph has a cycle; the error context
///   carries the ids stuck on the cycle.
pub fn execution_order(docs: &[WorkstreamDoc]) -> Result<Vec<WorkstreamId>> {
    let ids: BTreeSet<&WorkstreamId> = docs.iter().map(|d| &d.ws_id).collect();

    // dependents[d] = everyone waiting on d; indegree counts unmet deps.
    let mut dependents: BTreeMap<&WorkstreamId, Vec<&WorkstreamId>> = BTreeMap::new();
    let mut indegree: BTreeMap<&WorkstreamId, usize> = BTreeMap::new();
    for doc in docs {
        indegree.entry(&doc.ws_id).or_insert(0);
        for dep in &doc.depends_on {
            if !ids.contains(dep) {
                return Err(SdpError::new(
                    ErrorCode::DependencyUnknown,
                    format!("workstream '{}' depends on unknown '{dep}'", doc.ws_id),
                )
                .with_context("ws_id", doc.ws_id.as_str())
                .with_context("dependency", dep.as_str()));
            }
            dependents.entry(dep).or_default().push(&doc.ws_id);
            *indegree.entry(&doc.ws_id).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&WorkstreamId> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(docs.len());

    while let Some(next) = ready.iter().next().copied() {
        ready.remove(next);
        order.push(next.clone());
        for waiter in dependents.get(next).into_iter().flatten() {
            let deg = indegree.get_mut(waiter).expect("waiter has an indegree");
            *deg -= 1;
            if *deg == 0 {
                ready.insert(waiter);
            }
        }
    }

    if order.len() != docs.len() {
        // Everything scheduled reached indegree zero; the cycle is whatever
        // still has unmet dependencies.
        let stuck: Vec<&str> = indegree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| id.as_str())
            .collect();
        return Err(SdpError::new(
            ErrorCode::DependencyCycle,
            "workstream dependency graph has a cycle",
        )
        .with_context("stuck", stuck));
    }

    Ok(order)
}
