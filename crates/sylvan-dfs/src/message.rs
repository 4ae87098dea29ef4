//! Messages exchanged by the pseudo-tree protocols, and what a handler emits.

use std::collections::{BTreeMap, BTreeSet};

use sylvan_graph::{AgentId, NodeId, RootId};

use crate::view::DfsView;

/// Root election verdict for one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RootNotification {
    pub root: RootId,
    pub node: NodeId,
    pub is_root: bool,
}

/// CHILD token, sent down to a new child or back up to the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChildToken {
    pub sender: NodeId,
    pub dest: NodeId,
    pub root: RootId,
    /// Declared visitation order, when order tracking is on.
    pub order: Option<u32>,
    /// Random variables known to the sender, for random-variable-aware ordering.
    pub rand_vars: Option<BTreeSet<NodeId>>,
}

/// PSEUDO token, replied by an ancestor reached through a back edge.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PseudoToken {
    pub sender: NodeId,
    pub dest: NodeId,
    pub root: RootId,
}

/// Information exchanged by child-choice heuristics, shared by every run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeuristicMessage {
    /// Scores of the sender's variables.
    Scores(BTreeMap<NodeId, i64>),
    /// Random variables linked to `node`.
    RandVars {
        node: NodeId,
        rand_vars: BTreeSet<NodeId>,
    },
}

/// Every message the DFS layer handles.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Message {
    Root(RootNotification),
    Child(ChildToken),
    Pseudo(PseudoToken),
    /// Releases the held output of `dest` in run `root`.
    Release { root: RootId, dest: NodeId },
    /// Total number of variables of the component, propagated downwards.
    VariableCount { root: RootId, dest: NodeId, total: u32 },
    Heuristic(HeuristicMessage),
    /// Discards every piece of state held by the agent.
    AgentFinished,
}

impl Message {
    /// The run a message belongs to, if it belongs to one.
    pub fn root(&self) -> Option<&RootId> {
        match self {
            Self::Root(n) => Some(&n.root),
            Self::Child(t) => Some(&t.root),
            Self::Pseudo(t) => Some(&t.root),
            Self::Release { root, .. } | Self::VariableCount { root, .. } => Some(root),
            Self::Heuristic(_) | Self::AgentFinished => None,
        }
    }

    /// The variable a message is addressed to, if any.
    pub fn dest(&self) -> Option<&NodeId> {
        match self {
            Self::Root(n) => Some(&n.node),
            Self::Child(t) => Some(&t.dest),
            Self::Pseudo(t) => Some(&t.dest),
            Self::Release { dest, .. } | Self::VariableCount { dest, .. } => Some(dest),
            Self::Heuristic(_) | Self::AgentFinished => None,
        }
    }
}

/// Final view of one node in one run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DfsOutput {
    pub root: RootId,
    pub node: NodeId,
    pub view: DfsView,
}

/// Visitation order of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderOutput {
    pub root: RootId,
    pub node: NodeId,
    pub true_order: u32,
    pub declared_order: u32,
}

/// Results surfaced to the layers above the DFS.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(tag = "type"))]
pub enum DfsEvent {
    /// Input to the optimization layer.
    Output(DfsOutput),
    /// Copy of an output for the statistics channel.
    Stats(DfsOutput),
    Order(OrderOutput),
    VariableCount { root: RootId, node: NodeId, total: u32 },
}

impl DfsEvent {
    pub fn root(&self) -> &RootId {
        match self {
            Self::Output(o) | Self::Stats(o) => &o.root,
            Self::Order(o) => &o.root,
            Self::VariableCount { root, .. } => root,
        }
    }

    pub fn node(&self) -> &NodeId {
        match self {
            Self::Output(o) | Self::Stats(o) => &o.node,
            Self::Order(o) => &o.node,
            Self::VariableCount { node, .. } => node,
        }
    }
}

/// Effects of handling one message.
#[derive(Debug, Default)]
pub struct Outbox {
    /// Messages for other agents, or for this agent through its own link.
    pub sends: Vec<(AgentId, Message)>,
    /// Messages to re-enqueue at the tail of this agent's work queue.
    pub deferred: Vec<Message>,
    pub events: Vec<DfsEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: AgentId, msg: Message) {
        self.sends.push((to, msg));
    }

    pub fn defer(&mut self, msg: Message) {
        self.deferred.push(msg);
    }

    pub fn emit(&mut self, event: DfsEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: Outbox) {
        self.sends.extend(other.sends);
        self.deferred.extend(other.deferred);
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.deferred.is_empty() && self.events.is_empty()
    }
}
