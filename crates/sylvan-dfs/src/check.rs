//! Consistency checks over a complete set of views.

use std::collections::{BTreeMap, BTreeSet};

use sylvan_graph::{NodeId, Problem, Topology};

use crate::error::{Error, Result};
use crate::view::DfsView;

fn inconsistent(msg: impl Into<String>) -> Error {
    Error::Inconsistent(msg.into())
}

fn ancestors(views: &BTreeMap<NodeId, DfsView>, node: &NodeId) -> Result<Vec<NodeId>> {
    let mut chain = Vec::new();
    let mut current = node.clone();
    while let Some(parent) = views.get(&current).and_then(DfsView::parent) {
        if chain.contains(parent) || parent == node {
            return Err(inconsistent(format!("parent cycle through `{parent}`")));
        }
        chain.push(parent.clone());
        current = parent.clone();
    }
    Ok(chain)
}

/// Verify that `views` form a valid pseudo-tree of `problem`.
///
/// Every variable must have a view; parent and child links, pseudo-parent
/// and pseudo-child links must be mutual; each component must have a
/// single root; and every constraint-graph edge must join a node to one of
/// its ancestors.
pub fn check_tree(problem: &Problem, views: &BTreeMap<NodeId, DfsView>) -> Result<()> {
    for node in problem.variables() {
        if !views.contains_key(node) {
            return Err(inconsistent(format!("no view for `{node}`")));
        }
    }

    for (node, view) in views {
        let neighbors = problem.neighbors(node).cloned().unwrap_or_default();
        if view.neighbors() != neighbors {
            return Err(inconsistent(format!(
                "`{node}` classified {:?} but its neighbours are {:?}",
                view.neighbors(),
                neighbors
            )));
        }
        if let Some(parent) = view.parent() {
            let mutual = views.get(parent).is_some_and(|p| p.children().contains(node));
            if !mutual {
                return Err(inconsistent(format!("`{parent}` does not list `{node}` as a child")));
            }
        }
        for child in view.children() {
            if views.get(child).and_then(DfsView::parent) != Some(node) {
                return Err(inconsistent(format!("`{child}` does not have `{node}` as parent")));
            }
        }
        for pp in view.pseudo_parents() {
            let mutual = views
                .get(pp)
                .is_some_and(|p| p.all_pseudo_children().contains(node));
            if !mutual {
                return Err(inconsistent(format!("`{pp}` does not list `{node}` as a pseudo-child")));
            }
        }
        for pc in view.all_pseudo_children() {
            let mutual = views.get(&pc).is_some_and(|c| c.pseudo_parents().contains(node));
            if !mutual {
                return Err(inconsistent(format!("`{pc}` does not list `{node}` as a pseudo-parent")));
            }
        }
    }

    for component in problem.components() {
        let roots: Vec<&NodeId> = component
            .iter()
            .filter(|n| views.get(*n).is_some_and(DfsView::is_root))
            .collect();
        if roots.len() != 1 {
            return Err(inconsistent(format!("component with roots {roots:?}")));
        }
    }

    for (node, view) in views {
        let above: BTreeSet<NodeId> = ancestors(views, node)?.into_iter().collect();
        for pp in view.pseudo_parents() {
            if !above.contains(pp) {
                return Err(inconsistent(format!("back edge `{node}`-`{pp}` skips the ancestry")));
            }
        }
    }
    Ok(())
}

/// Verify that each constraint is enforced by exactly one node.
pub fn check_spaces(problem: &Problem, views: &BTreeMap<NodeId, DfsView>, with_random_vars: bool) -> Result<()> {
    for constraint in problem.constraints() {
        if !with_random_vars && constraint.scope.iter().any(|v| problem.is_random(v)) {
            continue;
        }
        let holders: Vec<&NodeId> = views
            .iter()
            .filter(|(_, v)| v.spaces().iter().any(|c| c.name == constraint.name))
            .map(|(n, _)| n)
            .collect();
        if holders.len() != 1 {
            return Err(inconsistent(format!(
                "constraint `{}` is held by {holders:?}",
                constraint.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylvan_graph::AgentId;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn triangle() -> Problem {
        let mut p = Problem::new();
        for v in ["A", "B", "C"] {
            p.add_variable(v, "a1").unwrap();
        }
        p.connect("A", "B").unwrap();
        p.connect("B", "C").unwrap();
        p.connect("A", "C").unwrap();
        p
    }

    fn chain_views() -> BTreeMap<NodeId, DfsView> {
        let agent = AgentId::from("a1");
        let mut a = DfsView::new();
        a.add_child(&n("A"), n("B")).unwrap();
        a.add_pseudo_child(&n("A"), n("C"), vec![n("A"), n("B"), n("C")]).unwrap();
        let mut b = DfsView::new();
        b.set_parent(&n("B"), n("A"), agent.clone()).unwrap();
        b.add_child(&n("B"), n("C")).unwrap();
        let mut c = DfsView::new();
        c.set_parent(&n("C"), n("B"), agent).unwrap();
        c.add_pseudo_parent(&n("C"), n("A")).unwrap();
        BTreeMap::from([(n("A"), a), (n("B"), b), (n("C"), c)])
    }

    #[test]
    fn accepts_a_valid_pseudo_tree() {
        check_tree(&triangle(), &chain_views()).unwrap();
    }

    #[test]
    fn rejects_one_sided_back_edges() {
        let mut views = chain_views();
        let mut c = DfsView::new();
        c.set_parent(&n("C"), n("B"), AgentId::from("a1")).unwrap();
        views.insert(n("C"), c);
        assert!(matches!(check_tree(&triangle(), &views), Err(Error::Inconsistent(_))));
    }

    #[test]
    fn rejects_missing_views() {
        let mut views = chain_views();
        views.remove(&n("B"));
        assert!(check_tree(&triangle(), &views).is_err());
    }

    #[test]
    fn spaces_need_a_single_holder() {
        let p = triangle();
        let mut views = chain_views();
        assert!(check_spaces(&p, &views, false).is_err());
        for (node, view) in views.iter_mut() {
            let spaces = sylvan_graph::ConstraintIndex::solution_spaces_for(&p, node, &view.below(), false);
            view.set_spaces(spaces);
        }
        check_spaces(&p, &views, false).unwrap();
    }
}
