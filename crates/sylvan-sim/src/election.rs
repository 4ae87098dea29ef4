//! Root election stand-in: the best-scored variable of each component
//! becomes its root, and every variable is told the verdict.

use sylvan_dfs::{Message, RootNotification};
use sylvan_graph::{AgentId, Problem, RootId, Scoring, Topology};
use tracing::debug;

/// Root notifications for every variable of `problem`, with the agent each
/// one must be delivered to.
pub fn elect_roots(problem: &Problem, scoring: Scoring) -> Vec<(AgentId, Message)> {
    let mut notifications = Vec::new();
    for component in problem.components() {
        let Some(root) = component.iter().filter_map(|n| scoring.root_id(n, problem)).max() else {
            continue;
        };
        debug!(root = %root, size = component.len(), "Root elected");
        for node in component {
            let Some(owner) = problem.owner(&node).cloned() else {
                continue;
            };
            notifications.push((
                owner,
                Message::Root(RootNotification {
                    is_root: node == root.node,
                    root: root.clone(),
                    node,
                }),
            ));
        }
    }
    notifications
}

/// Elected roots only.
pub fn roots(problem: &Problem, scoring: Scoring) -> Vec<RootId> {
    problem
        .components()
        .into_iter()
        .filter_map(|c| c.iter().filter_map(|n| scoring.root_id(n, problem)).max())
        .collect()
}
