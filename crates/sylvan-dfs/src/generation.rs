//! Token-passing DFS generation.
//!
//! Each agent runs one [`DfsGeneration`] for all its variables. A single
//! token walks the constraint graph from the root: a node receiving its
//! first CHILD token adopts the sender as parent, then hands the token to
//! its open neighbours one after the other. A neighbour that already holds
//! a place in the tree answers with a PSEUDO token, turning the tentative
//! child into a pseudo-child. A node with no open neighbour left finalizes
//! its view and returns the token to its parent.
//!
//! Several runs, keyed by their [`RootId`], can be in progress at once; the
//! plain generator keeps them independent and never arbitrates between them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use sylvan_graph::{AgentId, ConstraintIndex, NodeId, RootId, Subproblem, Topology};
use tracing::{debug, trace};

use crate::config::DfsConfig;
use crate::error::{Error, Result};
use crate::heuristic::ChildChoiceHeuristic;
use crate::message::{ChildToken, DfsEvent, DfsOutput, Message, Outbox, PseudoToken, RootNotification};
use crate::order::OrderTracker;
use crate::view::DfsView;

/// A message-driven pseudo-tree protocol hosted by one agent.
pub trait DfsProtocol: fmt::Debug + Send {
    /// Effects to apply when the agent starts.
    fn start(&mut self) -> Result<Outbox>;

    /// Handle one message addressed to this agent.
    fn handle(&mut self, msg: Message) -> Result<Outbox>;
}

/// Where a node stands in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not reached by the token yet.
    WaitingForFirstToken,
    /// Reached, with open neighbours left to classify.
    Traversing,
    /// View complete and output.
    Finalized,
}

#[derive(Debug)]
struct NodeState {
    open: BTreeSet<NodeId>,
    view: DfsView,
    phase: Phase,
}

#[derive(Debug, Default)]
struct Run {
    nodes: BTreeMap<NodeId, NodeState>,
    /// Partial root-to-token path, as far as this agent can tell.
    path: Vec<NodeId>,
}

fn node_state<'a>(
    nodes: &'a mut BTreeMap<NodeId, NodeState>,
    subproblem: &Subproblem,
    node: &NodeId,
) -> &'a mut NodeState {
    nodes.entry(node.clone()).or_insert_with(|| NodeState {
        open: subproblem.neighbors(node).cloned().unwrap_or_default(),
        view: DfsView::new(),
        phase: Phase::WaitingForFirstToken,
    })
}

fn owner_of(subproblem: &Subproblem, node: &NodeId) -> Result<AgentId> {
    subproblem
        .owner(node)
        .cloned()
        .ok_or_else(|| Error::UnknownOwner(node.clone()))
}

/// DFS generation for the variables of one agent.
pub struct DfsGeneration {
    subproblem: Arc<Subproblem>,
    config: DfsConfig,
    heuristic: Box<dyn ChildChoiceHeuristic>,
    order: Option<OrderTracker>,
    runs: BTreeMap<RootId, Run>,
}

impl fmt::Debug for DfsGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DfsGeneration")
            .field("agent", self.subproblem.agent())
            .field("heuristic", &self.heuristic)
            .field("runs", &self.runs.len())
            .finish()
    }
}

impl DfsGeneration {
    /// Create a generator using the heuristic named in `config`.
    pub fn new(subproblem: Arc<Subproblem>, config: DfsConfig) -> Self {
        let heuristic = config.build_heuristic(Arc::clone(&subproblem));
        Self::with_heuristic(subproblem, config, heuristic)
    }

    /// Create a generator with an explicit child-choice heuristic.
    pub fn with_heuristic(
        subproblem: Arc<Subproblem>,
        config: DfsConfig,
        heuristic: Box<dyn ChildChoiceHeuristic>,
    ) -> Self {
        let seed = subproblem.agent().seed_from(config.seed);
        let order = config.with_order.map(|o| OrderTracker::new(o, seed));
        Self {
            subproblem,
            config,
            heuristic,
            order,
            runs: BTreeMap::new(),
        }
    }

    pub fn agent(&self) -> &AgentId {
        self.subproblem.agent()
    }

    pub fn subproblem(&self) -> &Arc<Subproblem> {
        &self.subproblem
    }

    pub fn config(&self) -> &DfsConfig {
        &self.config
    }

    /// Current view of `node` in run `root`.
    pub fn view(&self, root: &RootId, node: &NodeId) -> Option<&DfsView> {
        self.runs.get(root)?.nodes.get(node).map(|s| &s.view)
    }

    pub fn phase(&self, root: &RootId, node: &NodeId) -> Option<Phase> {
        self.runs.get(root)?.nodes.get(node).map(|s| s.phase)
    }

    /// Partial root-to-token path kept for run `root`.
    pub fn partial_path(&self, root: &RootId) -> &[NodeId] {
        self.runs.get(root).map(|r| r.path.as_slice()).unwrap_or(&[])
    }

    /// Runs with state on this agent.
    pub fn runs(&self) -> impl Iterator<Item = &RootId> {
        self.runs.keys()
    }

    /// Whether run `root` holds state for `node`.
    pub fn touches(&self, root: &RootId, node: &NodeId) -> bool {
        self.runs.get(root).is_some_and(|r| r.nodes.contains_key(node))
    }

    /// Forget everything about run `root`.
    pub fn drop_run(&mut self, root: &RootId) {
        if self.runs.remove(root).is_some() {
            debug!(agent = %self.subproblem.agent(), root = %root, "Dropped DFS run");
        }
    }

    /// Discard every run and everything learned from other agents.
    pub fn reset(&mut self) {
        self.runs.clear();
        self.heuristic.reset();
        if let Some(order) = self.order.as_mut() {
            order.reset();
        }
    }

    fn ensure_owned(&self, node: &NodeId) -> Result<()> {
        if self.subproblem.owns(node) {
            Ok(())
        } else {
            Err(Error::NotOwned(node.clone()))
        }
    }

    fn on_root(&mut self, notification: &RootNotification, msg: &Message, out: &mut Outbox) -> Result<()> {
        let RootNotification { root, node, is_root } = notification;
        self.ensure_owned(node)?;
        let run = self.runs.entry(root.clone()).or_default();
        if !is_root {
            return Ok(());
        }
        if run.path.is_empty() {
            run.path.push(node.clone());
        }
        let state = node_state(&mut run.nodes, &self.subproblem, node);
        match state.phase {
            Phase::Finalized => {
                debug!(node = %node, root = %root, "Duplicate root notification after finalization");
                return Ok(());
            }
            Phase::Traversing if !state.view.is_leaf() || state.view.parent().is_some() => {
                debug!(node = %node, root = %root, "Duplicate root notification");
                return Ok(());
            }
            Phase::Traversing => {}
            Phase::WaitingForFirstToken => {
                state.phase = Phase::Traversing;
                debug!(node = %node, root = %root, "Starting DFS traversal");
                if let Some(order) = self.order.as_mut() {
                    if let Some(output) = order.on_root(root, node, state.open.is_empty()) {
                        out.emit(DfsEvent::Order(output));
                    }
                }
            }
        }
        self.advance(root, node, msg, out)
    }

    fn on_child(&mut self, token: &ChildToken, msg: &Message, out: &mut Outbox) -> Result<()> {
        let ChildToken { sender, dest: me, root, .. } = token;
        self.ensure_owned(me)?;
        let sender_agent = owner_of(&self.subproblem, sender)?;
        let run = self.runs.entry(root.clone()).or_default();
        let state = node_state(&mut run.nodes, &self.subproblem, me);

        if state.phase == Phase::Finalized {
            debug!(node = %me, sender = %sender, root = %root, "CHILD token for a finalized node");
            return Ok(());
        }
        if let (Some(order), Some(o)) = (self.order.as_mut(), token.order) {
            if let Some(output) = order.on_child_token(root, me, o) {
                out.emit(DfsEvent::Order(output));
            }
        }

        match state.phase {
            Phase::WaitingForFirstToken => {
                self.heuristic.observe_first_token(token);
                state.open.remove(sender);
                state.view.set_parent(me, sender.clone(), sender_agent)?;
                state.phase = Phase::Traversing;
                if run.path.last() != Some(me) {
                    run.path.push(me.clone());
                }
                trace!(node = %me, parent = %sender, root = %root, "Reached by the token");
            }
            Phase::Traversing if state.open.contains(sender) => {
                // back edge: the sender is a pseudo-child
                if run.path.last() == Some(me) {
                    run.path.pop();
                } else {
                    run.path.push(sender.clone());
                }
                state.open.remove(sender);
                state.view.add_pseudo_child(me, sender.clone(), run.path.clone())?;
                trace!(node = %me, pseudo_child = %sender, root = %root, "Back edge found");
                out.send(
                    sender_agent,
                    Message::Pseudo(PseudoToken {
                        sender: me.clone(),
                        dest: sender.clone(),
                        root: root.clone(),
                    }),
                );
                return Ok(());
            }
            Phase::Traversing => {
                if state.view.parent() != Some(sender) {
                    // a child returned the token: forget the explored branch
                    if let Some(pos) = run.path.iter().position(|n| n == sender) {
                        run.path.truncate(pos);
                    }
                }
            }
            Phase::Finalized => return Ok(()),
        }
        self.advance(root, me, msg, out)
    }

    fn on_pseudo(&mut self, token: &PseudoToken, msg: &Message, out: &mut Outbox) -> Result<()> {
        let PseudoToken { sender, dest: me, root } = token;
        self.ensure_owned(me)?;
        let run = self.runs.entry(root.clone()).or_default();
        let state = node_state(&mut run.nodes, &self.subproblem, me);
        if state.phase == Phase::Finalized {
            debug!(node = %me, sender = %sender, root = %root, "PSEUDO token for a finalized node");
            return Ok(());
        }
        state.view.remove_child(sender);
        if run.path.last() == Some(sender) {
            run.path.pop();
        }
        state.view.add_pseudo_parent(me, sender.clone())?;
        self.advance(root, me, msg, out)
    }

    fn on_variable_count(&mut self, root: &RootId, me: &NodeId, total: u32, out: &mut Outbox) -> Result<()> {
        self.ensure_owned(me)?;
        if let Some(order) = self.order.as_mut() {
            order.on_variable_count(root, me, total);
        }
        out.emit(DfsEvent::VariableCount {
            root: root.clone(),
            node: me.clone(),
            total,
        });
        let run = self.runs.entry(root.clone()).or_default();
        let state = node_state(&mut run.nodes, &self.subproblem, me);
        for child in state.view.children() {
            out.send(
                owner_of(&self.subproblem, child)?,
                Message::VariableCount {
                    root: root.clone(),
                    dest: child.clone(),
                    total,
                },
            );
        }
        Ok(())
    }

    /// Hand the token to the next open neighbour of `me`, or finalize.
    fn advance(&mut self, root: &RootId, me: &NodeId, msg: &Message, out: &mut Outbox) -> Result<()> {
        let run = self.runs.entry(root.clone()).or_default();
        let state = node_state(&mut run.nodes, &self.subproblem, me);
        if state.open.is_empty() {
            return self.finalize(root, me, out);
        }
        let Some(child) = self.heuristic.choose(root, me, &state.view, &state.open) else {
            trace!(node = %me, root = %root, "Child choice undecided, deferring");
            out.defer(msg.clone());
            return Ok(());
        };
        if !state.open.remove(&child) {
            return Err(Error::Structural {
                node: me.clone(),
                neighbor: child,
                detail: "was chosen as child but is not open".to_string(),
            });
        }
        let child_agent = owner_of(&self.subproblem, &child)?;
        state.view.add_child(me, child.clone())?;
        let order = self.order.as_ref().map(|o| o.next_order(root, me));
        let rand_vars = self.heuristic.token_rand_vars(root, me);
        trace!(node = %me, child = %child, root = %root, "Passing the token");
        out.send(
            child_agent,
            Message::Child(ChildToken {
                sender: me.clone(),
                dest: child.clone(),
                root: root.clone(),
                order,
                rand_vars,
            }),
        );
        run.path.push(child);
        Ok(())
    }

    fn finalize(&mut self, root: &RootId, me: &NodeId, out: &mut Outbox) -> Result<()> {
        let run = self.runs.entry(root.clone()).or_default();
        let state = node_state(&mut run.nodes, &self.subproblem, me);
        state.phase = Phase::Finalized;
        let spaces = self
            .subproblem
            .solution_spaces_for(me, &state.view.below(), self.config.with_random_vars);
        state.view.set_spaces(spaces);
        debug!(
            node = %me,
            root = %root,
            children = state.view.children().len(),
            pseudo_parents = state.view.pseudo_parents().len(),
            "DFS view finalized"
        );
        let output = DfsOutput {
            root: root.clone(),
            node: me.clone(),
            view: state.view.clone(),
        };
        out.emit(DfsEvent::Output(output.clone()));
        out.emit(DfsEvent::Stats(output));

        if let Some(order) = self.order.as_mut() {
            if let Some(total) = order.on_finalized(root, me) {
                out.send(
                    self.subproblem.agent().clone(),
                    Message::VariableCount {
                        root: root.clone(),
                        dest: me.clone(),
                        total,
                    },
                );
            }
        }

        if let (Some(parent), Some(parent_agent)) = (state.view.parent(), state.view.parent_agent()) {
            let order = self.order.as_ref().map(|o| o.next_order(root, me));
            out.send(
                parent_agent.clone(),
                Message::Child(ChildToken {
                    sender: me.clone(),
                    dest: parent.clone(),
                    root: root.clone(),
                    order,
                    rand_vars: None,
                }),
            );
            if run.path.last() == Some(me) {
                run.path.pop();
            }
        }
        Ok(())
    }
}

impl DfsProtocol for DfsGeneration {
    fn start(&mut self) -> Result<Outbox> {
        let mut out = Outbox::new();
        for (agent, msg) in self.heuristic.start() {
            out.send(agent, Message::Heuristic(msg));
        }
        Ok(out)
    }

    fn handle(&mut self, msg: Message) -> Result<Outbox> {
        let mut out = Outbox::new();
        match &msg {
            Message::Root(n) => self.on_root(n, &msg, &mut out)?,
            Message::Child(t) => self.on_child(t, &msg, &mut out)?,
            Message::Pseudo(t) => self.on_pseudo(t, &msg, &mut out)?,
            Message::VariableCount { root, dest, total } => {
                self.on_variable_count(root, dest, *total, &mut out)?;
            }
            Message::Heuristic(h) => self.heuristic.observe(h),
            Message::Release { root, dest } => {
                trace!(node = %dest, root = %root, "Release ignored without root arbitration");
            }
            Message::AgentFinished => {
                debug!(agent = %self.subproblem.agent(), "Agent finished, discarding DFS state");
                self.reset();
            }
        }
        Ok(out)
    }
}
