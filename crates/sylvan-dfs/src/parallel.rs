//! Parallel DFS generation.
//!
//! Instead of waiting for a root election, every variable that scores
//! higher than all the neighbours owned by the same agent starts its own
//! traversal. Runs are compared by [`RootId`]: a CHILD token reaching a
//! variable that outscores the run's root proves the run cannot win, so it
//! is dropped there. Everything a run produces is held back until the run
//! is known to be the winner. The winning root releases its own output and
//! a RELEASE message then cascades down the tree it built.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sylvan_graph::{NodeId, RootId, Subproblem, Topology};
use tracing::{debug, trace};

use crate::config::DfsConfig;
use crate::error::{Error, Result};
use crate::generation::{DfsGeneration, DfsProtocol};
use crate::message::{DfsEvent, Message, Outbox, RootNotification};

/// Arbitration state of one run on this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Outputs are held until the run is known to win.
    Speculative,
    /// At least one output of the run was released.
    Released,
    /// The run is dominated; its messages are dropped.
    Discarded,
}

#[derive(Debug, Default)]
struct Held {
    events: Vec<DfsEvent>,
    /// VariableCount messages that arrived before the node was released.
    parked: Vec<Message>,
}

#[derive(Debug)]
struct Run {
    status: RunStatus,
    held: BTreeMap<NodeId, Held>,
    released: BTreeSet<NodeId>,
}

impl Run {
    fn new() -> Self {
        Self {
            status: RunStatus::Speculative,
            held: BTreeMap::new(),
            released: BTreeSet::new(),
        }
    }
}

/// DFS generation with concurrent speculative runs and arbitration.
#[derive(Debug)]
pub struct ParallelDfsGeneration {
    inner: DfsGeneration,
    /// Election score of each own variable.
    scores: BTreeMap<NodeId, RootId>,
    runs: BTreeMap<RootId, Run>,
}

impl ParallelDfsGeneration {
    pub fn new(subproblem: Arc<Subproblem>, config: DfsConfig) -> Self {
        Self::from_generation(DfsGeneration::new(subproblem, config))
    }

    /// Wrap an already configured generator.
    pub fn from_generation(inner: DfsGeneration) -> Self {
        let subproblem = Arc::clone(inner.subproblem());
        let election = inner.config().election;
        let scores = subproblem
            .own_variables()
            .iter()
            .filter_map(|n| election.root_id(n, subproblem.as_ref()).map(|id| (n.clone(), id)))
            .collect();
        Self {
            inner,
            scores,
            runs: BTreeMap::new(),
        }
    }

    /// Own variables that start a speculative run: those no neighbour of the
    /// same agent outscores.
    pub fn candidates(&self) -> Vec<&RootId> {
        let subproblem = self.inner.subproblem();
        self.scores
            .iter()
            .filter(|(node, score)| {
                subproblem
                    .neighbors(node)
                    .into_iter()
                    .flatten()
                    .filter_map(|n| self.scores.get(n))
                    .all(|other| other <= *score)
            })
            .map(|(_, score)| score)
            .collect()
    }

    pub fn status(&self, root: &RootId) -> Option<RunStatus> {
        self.runs.get(root).map(|r| r.status)
    }

    pub fn generation(&self) -> &DfsGeneration {
        &self.inner
    }

    fn is_discarded(&self, root: &RootId) -> bool {
        self.status(root) == Some(RunStatus::Discarded)
    }

    fn is_released(&self, root: &RootId, node: &NodeId) -> bool {
        self.runs.get(root).is_some_and(|r| r.released.contains(node))
    }

    fn discard(&mut self, root: &RootId) {
        let run = self.runs.entry(root.clone()).or_insert_with(Run::new);
        if run.status != RunStatus::Discarded {
            debug!(agent = %self.inner.agent(), root = %root, "Discarding dominated DFS run");
            run.status = RunStatus::Discarded;
            run.held.clear();
            self.inner.drop_run(root);
        }
    }

    /// Send RELEASE to every child of `node` in run `root`.
    fn release_children(&self, root: &RootId, node: &NodeId, out: &mut Outbox) -> Result<()> {
        let Some(view) = self.inner.view(root, node) else {
            return Ok(());
        };
        let subproblem = self.inner.subproblem();
        for child in view.children() {
            let agent = subproblem
                .owner(child)
                .cloned()
                .ok_or_else(|| Error::UnknownOwner(child.clone()))?;
            out.send(
                agent,
                Message::Release {
                    root: root.clone(),
                    dest: child.clone(),
                },
            );
        }
        Ok(())
    }

    fn release(&mut self, root: &RootId, node: &NodeId, out: &mut Outbox) -> Result<()> {
        let run = self.runs.entry(root.clone()).or_insert_with(Run::new);
        if run.status == RunStatus::Discarded || !run.released.insert(node.clone()) {
            return Ok(());
        }
        run.status = RunStatus::Released;
        let held = run.held.remove(node).unwrap_or_default();
        debug!(node = %node, root = %root, held = held.events.len(), "Releasing DFS output");

        let mut has_output = false;
        for event in held.events {
            has_output |= matches!(event, DfsEvent::Output(_));
            out.emit(event);
        }
        if has_output {
            self.release_children(root, node, out)?;
        }

        let dominated: Vec<RootId> = self
            .inner
            .runs()
            .filter(|r| *r < root && self.inner.touches(r, node))
            .cloned()
            .collect();
        for r in dominated {
            self.discard(&r);
        }

        for msg in held.parked {
            let inner_out = self.inner.handle(msg)?;
            let filtered = self.absorb(inner_out)?;
            out.extend(filtered);
        }
        Ok(())
    }

    /// Filter the effects of the inner generator: hold speculative events
    /// and release the winning root as soon as it finalizes.
    fn absorb(&mut self, inner_out: Outbox) -> Result<Outbox> {
        let mut out = Outbox {
            sends: inner_out.sends,
            deferred: inner_out.deferred,
            events: Vec::new(),
        };
        for event in inner_out.events {
            let root = event.root().clone();
            let node = event.node().clone();
            let is_output = matches!(event, DfsEvent::Output(_));
            let run = self.runs.entry(root.clone()).or_insert_with(Run::new);
            match run.status {
                RunStatus::Discarded => continue,
                _ if run.released.contains(&node) => {
                    out.emit(event);
                    if is_output {
                        self.release_children(&root, &node, &mut out)?;
                    }
                }
                _ => {
                    run.held.entry(node.clone()).or_default().events.push(event);
                    if is_output && self.scores.get(&node) == Some(&root) {
                        self.release(&root, &node, &mut out)?;
                    }
                }
            }
        }
        Ok(out)
    }
}

impl DfsProtocol for ParallelDfsGeneration {
    fn start(&mut self) -> Result<Outbox> {
        let mut out = self.inner.start()?;
        let candidates: Vec<RootId> = self.candidates().into_iter().cloned().collect();
        for root in candidates {
            debug!(agent = %self.inner.agent(), root = %root, "Starting speculative DFS run");
            self.runs.entry(root.clone()).or_insert_with(Run::new);
            let notification = Message::Root(RootNotification {
                node: root.node.clone(),
                root,
                is_root: true,
            });
            let inner_out = self.inner.handle(notification)?;
            out.extend(self.absorb(inner_out)?);
        }
        Ok(out)
    }

    fn handle(&mut self, msg: Message) -> Result<Outbox> {
        match &msg {
            Message::AgentFinished => {
                self.runs.clear();
                return self.inner.handle(msg);
            }
            Message::Heuristic(_) => return self.inner.handle(msg),
            Message::Root(notification)
                if !notification.is_root || self.scores.get(&notification.node) != Some(&notification.root) =>
            {
                return Err(Error::ExternalRoot {
                    node: notification.node.clone(),
                    root: notification.root.clone(),
                });
            }
            _ => {}
        }
        let (Some(root), Some(dest)) = (msg.root().cloned(), msg.dest().cloned()) else {
            return Ok(Outbox::new());
        };
        if self.is_discarded(&root) {
            trace!(node = %dest, root = %root, "Dropping message of a discarded run");
            return Ok(Outbox::new());
        }
        match &msg {
            Message::Child(_) if self.scores.get(&dest).is_some_and(|s| *s > root) => {
                debug!(node = %dest, root = %root, "Token reached a variable that outscores the root");
                self.discard(&root);
                return Ok(Outbox::new());
            }
            Message::Release { .. } => {
                let mut out = Outbox::new();
                self.release(&root, &dest, &mut out)?;
                return Ok(out);
            }
            Message::VariableCount { .. } if !self.is_released(&root, &dest) => {
                let run = self.runs.entry(root).or_insert_with(Run::new);
                run.held.entry(dest).or_default().parked.push(msg);
                return Ok(Outbox::new());
            }
            _ => {}
        }
        self.runs.entry(root).or_insert_with(Run::new);
        let inner_out = self.inner.handle(msg)?;
        self.absorb(inner_out)
    }
}
