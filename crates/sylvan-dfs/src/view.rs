//! A node's local view of the pseudo-tree.

use std::collections::{BTreeMap, BTreeSet};

use sylvan_graph::{AgentId, Constraint, NodeId};

use crate::error::{Error, Result};

/// How a neighbour relates to a node in the pseudo-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Parent,
    PseudoParent,
    Child,
    PseudoChild,
}

impl Relation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::PseudoParent => "pseudo-parent",
            Self::Child => "child",
            Self::PseudoChild => "pseudo-child",
        }
    }
}

/// The tree parent of a node and the agent that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parent {
    pub node: NodeId,
    pub agent: AgentId,
}

/// Everything a node knows about its position in the pseudo-tree.
///
/// Mutators refuse to put a neighbour in a second relation and report an
/// [`Error::Structural`] instead. Re-adding a neighbour to the relation it
/// already has is accepted, which keeps re-delivered messages harmless.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DfsView {
    parent: Option<Parent>,
    pseudo_parents: BTreeSet<NodeId>,
    children: Vec<NodeId>,
    pseudo_children: BTreeMap<NodeId, Vec<NodeId>>,
    paths_to_pseudo_children: BTreeMap<NodeId, Vec<NodeId>>,
    spaces: Vec<Constraint>,
}

impl DfsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref().map(|p| &p.node)
    }

    pub fn parent_agent(&self) -> Option<&AgentId> {
        self.parent.as_ref().map(|p| &p.agent)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn pseudo_parents(&self) -> &BTreeSet<NodeId> {
        &self.pseudo_parents
    }

    /// Children in the order they were chosen.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Pseudo-children discovered below `child`.
    pub fn pseudo_children_below(&self, child: &NodeId) -> &[NodeId] {
        self.pseudo_children.get(child).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_pseudo_children(&self) -> BTreeSet<NodeId> {
        self.pseudo_children.values().flatten().cloned().collect()
    }

    /// Partial ancestry chain known when `pseudo` was found.
    pub fn path_to_pseudo_child(&self, pseudo: &NodeId) -> Option<&[NodeId]> {
        self.paths_to_pseudo_children.get(pseudo).map(Vec::as_slice)
    }

    /// Constraints this node is responsible for enforcing.
    pub fn spaces(&self) -> &[Constraint] {
        &self.spaces
    }

    pub fn set_spaces(&mut self, spaces: Vec<Constraint>) {
        self.spaces = spaces;
    }

    /// Children and pseudo-children: every neighbour below this node.
    pub fn below(&self) -> BTreeSet<NodeId> {
        let mut below: BTreeSet<NodeId> = self.children.iter().cloned().collect();
        below.extend(self.all_pseudo_children());
        below
    }

    /// Every classified neighbour.
    pub fn neighbors(&self) -> BTreeSet<NodeId> {
        let mut all = self.below();
        all.extend(self.pseudo_parents.iter().cloned());
        all.extend(self.parent().cloned());
        all
    }

    pub fn relation_of(&self, node: &NodeId) -> Option<Relation> {
        if self.parent() == Some(node) {
            Some(Relation::Parent)
        } else if self.pseudo_parents.contains(node) {
            Some(Relation::PseudoParent)
        } else if self.children.contains(node) {
            Some(Relation::Child)
        } else if self.pseudo_children.values().any(|p| p.contains(node)) {
            Some(Relation::PseudoChild)
        } else {
            None
        }
    }

    fn classify(&self, me: &NodeId, node: &NodeId, wanted: Relation) -> Result<bool> {
        match self.relation_of(node) {
            None => Ok(true),
            Some(r) if r == wanted => Ok(false),
            Some(r) => Err(Error::Structural {
                node: me.clone(),
                neighbor: node.clone(),
                detail: format!("is already a {} and cannot become a {}", r.as_str(), wanted.as_str()),
            }),
        }
    }

    pub fn set_parent(&mut self, me: &NodeId, node: NodeId, agent: AgentId) -> Result<()> {
        if let Some(current) = self.parent() {
            if *current != node {
                return Err(Error::Structural {
                    node: me.clone(),
                    neighbor: node,
                    detail: format!("cannot replace parent `{current}`"),
                });
            }
        }
        if self.classify(me, &node, Relation::Parent)? {
            self.parent = Some(Parent { node, agent });
        }
        Ok(())
    }

    pub fn add_child(&mut self, me: &NodeId, child: NodeId) -> Result<()> {
        if self.classify(me, &child, Relation::Child)? {
            self.children.push(child);
        }
        Ok(())
    }

    /// Undo a tentative child classification, together with any
    /// pseudo-children recorded below it.
    pub fn remove_child(&mut self, child: &NodeId) {
        self.children.retain(|c| c != child);
        if let Some(pseudos) = self.pseudo_children.remove(child) {
            for p in pseudos {
                self.paths_to_pseudo_children.remove(&p);
            }
        }
    }

    /// Record `pseudo` as a pseudo-child below the most recently added child.
    pub fn add_pseudo_child(&mut self, me: &NodeId, pseudo: NodeId, path: Vec<NodeId>) -> Result<()> {
        let Some(last) = self.children.last().cloned() else {
            return Err(Error::Structural {
                node: me.clone(),
                neighbor: pseudo,
                detail: "reached as pseudo-child before any child was chosen".to_string(),
            });
        };
        if self.classify(me, &pseudo, Relation::PseudoChild)? {
            self.paths_to_pseudo_children.insert(pseudo.clone(), path);
            self.pseudo_children.entry(last).or_default().push(pseudo);
        }
        Ok(())
    }

    pub fn add_pseudo_parent(&mut self, me: &NodeId, node: NodeId) -> Result<()> {
        if self.classify(me, &node, Relation::PseudoParent)? {
            self.pseudo_parents.insert(node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    #[test]
    fn relations_are_disjoint() {
        let me = n("A");
        let mut view = DfsView::new();
        view.set_parent(&me, n("P"), AgentId::from("a1")).unwrap();
        view.add_child(&me, n("C")).unwrap();
        view.add_pseudo_child(&me, n("D"), vec![n("A"), n("C"), n("D")]).unwrap();
        view.add_pseudo_parent(&me, n("Q")).unwrap();

        assert!(view.add_child(&me, n("P")).is_err());
        assert!(view.add_pseudo_parent(&me, n("C")).is_err());
        assert!(view.add_child(&me, n("D")).is_err());
        assert!(matches!(
            view.add_pseudo_child(&me, n("Q"), vec![]),
            Err(Error::Structural { .. })
        ));
        assert_eq!(view.relation_of(&n("D")), Some(Relation::PseudoChild));
        assert_eq!(view.pseudo_children_below(&n("C")), &[n("D")]);
        assert_eq!(view.neighbors().len(), 4);
    }

    #[test]
    fn re_adding_the_same_relation_is_a_no_op() {
        let me = n("A");
        let mut view = DfsView::new();
        view.add_pseudo_parent(&me, n("Q")).unwrap();
        view.add_pseudo_parent(&me, n("Q")).unwrap();
        view.add_child(&me, n("C")).unwrap();
        view.add_child(&me, n("C")).unwrap();
        assert_eq!(view.children().len(), 1);
        assert_eq!(view.pseudo_parents().len(), 1);
    }

    #[test]
    fn removing_a_child_forgets_its_pseudo_children() {
        let me = n("A");
        let mut view = DfsView::new();
        view.add_child(&me, n("C")).unwrap();
        view.add_pseudo_child(&me, n("D"), vec![n("D")]).unwrap();
        view.remove_child(&n("C"));
        assert!(view.is_leaf());
        assert!(view.all_pseudo_children().is_empty());
        assert!(view.path_to_pseudo_child(&n("D")).is_none());
    }

    #[test]
    fn pseudo_child_needs_a_child() {
        let me = n("A");
        let mut view = DfsView::new();
        assert!(view.add_pseudo_child(&me, n("D"), vec![]).is_err());
    }

    #[test]
    fn parent_cannot_change() {
        let me = n("A");
        let mut view = DfsView::new();
        view.set_parent(&me, n("P"), AgentId::from("a1")).unwrap();
        view.set_parent(&me, n("P"), AgentId::from("a1")).unwrap();
        assert!(view.set_parent(&me, n("O"), AgentId::from("a1")).is_err());
        assert_eq!(view.parent_agent(), Some(&AgentId::from("a1")));
    }
}
