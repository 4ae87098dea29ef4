//! Two-phase lowest-common-ancestor computation over a finalized pseudo-tree.
//!
//! Every node carries a set of flags. Phase 1 runs bottom-up: once a node
//! has heard from all its children it reports the union of the flags seen
//! in its subtree to its parent, and keeps as candidate LCAs the flags seen
//! in more than one child subtree or in both a subtree and itself. Phase 2
//! runs top-down from the root: each node keeps the candidates still
//! pending, and forwards to each child the flags of that child's report that
//! are neither resolved above nor resolved here.
//!
//! A flag ends up in the LCA set of exactly one node: the deepest common
//! ancestor of all the nodes carrying it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use sylvan_dfs::{DfsOutput, DfsView};
use sylvan_graph::{AgentId, NodeId, Samples, Subproblem, Topology};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Messages of the LCA protocol, carrying per-flag payloads of type `D`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LcaMessage<D> {
    /// Bottom-up report of the flags seen in the sender's subtree.
    Phase1 {
        sender: NodeId,
        dest: NodeId,
        flags: BTreeSet<NodeId>,
        data: BTreeMap<NodeId, D>,
    },
    /// Top-down pending flags for `node`, with the payloads of flags
    /// resolved above it.
    Phase2 {
        node: NodeId,
        flags: BTreeSet<NodeId>,
        data: BTreeMap<NodeId, D>,
    },
}

impl<D> LcaMessage<D> {
    /// The variable this message is addressed to.
    pub fn dest(&self) -> &NodeId {
        match self {
            Self::Phase1 { dest, .. } => dest,
            Self::Phase2 { node, .. } => node,
        }
    }
}

/// Final LCA set of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LcaOutput {
    pub node: NodeId,
    pub lcas: BTreeSet<NodeId>,
}

/// Results of the LCA protocol and of the policies built on it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(tag = "type"))]
pub enum LcaEvent {
    Output(LcaOutput),
    /// Random variables `node` must project out.
    RandVarsProj {
        node: NodeId,
        rand_vars: BTreeSet<NodeId>,
    },
    /// `node` fixed the samples of `rand_var`.
    SampleFixed {
        node: NodeId,
        rand_var: NodeId,
        samples: Samples,
    },
}

impl LcaEvent {
    pub fn node(&self) -> &NodeId {
        match self {
            Self::Output(o) => &o.node,
            Self::RandVarsProj { node, .. } | Self::SampleFixed { node, .. } => node,
        }
    }
}

/// Effects of handling one input.
#[derive(Debug)]
pub struct LcaOutbox<D> {
    pub sends: Vec<(AgentId, LcaMessage<D>)>,
    pub events: Vec<LcaEvent>,
}

impl<D> Default for LcaOutbox<D> {
    fn default() -> Self {
        Self {
            sends: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl<D> LcaOutbox<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: AgentId, msg: LcaMessage<D>) {
        self.sends.push((to, msg));
    }

    pub fn emit(&mut self, event: LcaEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: LcaOutbox<D>) {
        self.sends.extend(other.sends);
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.events.is_empty()
    }
}

/// Per-node LCA state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    my_flags: BTreeSet<NodeId>,
    lcas: BTreeSet<NodeId>,
    parent: Option<NodeId>,
    /// Non-empty reports, per child.
    child_flags: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Set once the node's DFS output has been seen.
    all_flags: Option<BTreeSet<NodeId>>,
    remaining: usize,
    done: bool,
}

impl NodeInfo {
    fn new(flags: BTreeSet<NodeId>) -> Self {
        Self {
            lcas: flags.clone(),
            my_flags: flags,
            ..Self::default()
        }
    }

    pub fn my_flags(&self) -> &BTreeSet<NodeId> {
        &self.my_flags
    }

    /// Current candidate LCA set; final once [`Self::is_done`].
    pub fn lcas(&self) -> &BTreeSet<NodeId> {
        &self.lcas
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Flags seen in the subtree so far.
    pub fn all_flags(&self) -> impl Iterator<Item = &NodeId> {
        self.all_flags.iter().flatten()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Give the node more flags of its own.
    pub fn add_flags(&mut self, flags: impl IntoIterator<Item = NodeId>) {
        for flag in flags {
            self.my_flags.insert(flag.clone());
            self.lcas.insert(flag);
        }
    }
}

/// Hooks through which a layer on top of the LCA protocol attaches flags and
/// per-flag payloads.
pub trait LcaPolicy: fmt::Debug + Send {
    type Data: Clone + fmt::Debug + Send;

    /// Flags `node` gains from its DFS output.
    fn flags_from_view(&mut self, _node: &NodeId, _view: &DfsView) -> BTreeSet<NodeId> {
        BTreeSet::new()
    }

    /// A phase-1 report reached `node`.
    fn on_report(
        &mut self,
        _node: &NodeId,
        _info: &mut NodeInfo,
        _flags: &BTreeSet<NodeId>,
        _data: &BTreeMap<NodeId, Self::Data>,
    ) {
    }

    /// Payloads attached to the phase-1 report of `node`.
    fn report_data(&mut self, _node: &NodeId, _info: &NodeInfo) -> BTreeMap<NodeId, Self::Data> {
        BTreeMap::new()
    }

    /// Phase 2 reached `node`; `from_parent` is `None` at the root.
    fn resolve(
        &mut self,
        _node: &NodeId,
        _info: &NodeInfo,
        _from_parent: Option<&BTreeMap<NodeId, Self::Data>>,
        _events: &mut Vec<LcaEvent>,
    ) {
    }

    /// Payloads sent to a child for the flags resolved at or above its parent.
    fn data_for_child(&self, _resolved: &BTreeSet<NodeId>) -> BTreeMap<NodeId, Self::Data> {
        BTreeMap::new()
    }

    /// `node` terminated in phase 1, without a phase-2 message.
    fn finish_early(&mut self, _node: &NodeId, _info: &NodeInfo, _events: &mut Vec<LcaEvent>) {}

    fn reset(&mut self) {}
}

/// Plain LCA computation, without payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainLca;

impl LcaPolicy for PlainLca {
    type Data = ();
}

fn info_entry<'a>(
    infos: &'a mut BTreeMap<NodeId, NodeInfo>,
    initial: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    node: &NodeId,
) -> &'a mut NodeInfo {
    infos
        .entry(node.clone())
        .or_insert_with(|| NodeInfo::new(initial.get(node).cloned().unwrap_or_default()))
}

/// LCA protocol for the variables of one agent.
#[derive(Debug)]
pub struct LowestCommonAncestors<P: LcaPolicy> {
    subproblem: Arc<Subproblem>,
    initial_flags: BTreeMap<NodeId, BTreeSet<NodeId>>,
    policy: P,
    infos: BTreeMap<NodeId, NodeInfo>,
    /// Phase-1 reports received before the destination's DFS output.
    buffered: BTreeMap<NodeId, Vec<LcaMessage<P::Data>>>,
}

impl LowestCommonAncestors<PlainLca> {
    /// Plain LCA computation over the given flags of own variables.
    pub fn new(subproblem: Arc<Subproblem>, flags: BTreeMap<NodeId, BTreeSet<NodeId>>) -> Self {
        Self::with_policy(subproblem, flags, PlainLca)
    }
}

impl<P: LcaPolicy> LowestCommonAncestors<P> {
    pub fn with_policy(subproblem: Arc<Subproblem>, flags: BTreeMap<NodeId, BTreeSet<NodeId>>, policy: P) -> Self {
        Self {
            subproblem,
            initial_flags: flags,
            policy,
            infos: BTreeMap::new(),
            buffered: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn info(&self, node: &NodeId) -> Option<&NodeInfo> {
        self.infos.get(node)
    }

    /// Final LCA set of `node`, once computed.
    pub fn lcas(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.infos.get(node).filter(|i| i.done).map(|i| &i.lcas)
    }

    /// Forget all per-node state.
    pub fn reset(&mut self) {
        self.infos.clear();
        self.buffered.clear();
        self.policy.reset();
    }

    fn ensure_owned(&self, node: &NodeId) -> Result<()> {
        if self.subproblem.owns(node) {
            Ok(())
        } else {
            Err(Error::NotOwned(node.clone()))
        }
    }

    fn owner(&self, node: &NodeId) -> Result<AgentId> {
        self.subproblem
            .owner(node)
            .cloned()
            .ok_or_else(|| Error::UnknownOwner(node.clone()))
    }

    /// Start phase 1 at `output.node`.
    pub fn on_dfs_output(&mut self, output: &DfsOutput) -> Result<LcaOutbox<P::Data>> {
        let node = &output.node;
        self.ensure_owned(node)?;
        let mut out = LcaOutbox::new();
        let info = info_entry(&mut self.infos, &self.initial_flags, node);
        if info.all_flags.is_some() {
            debug!(node = %node, "Duplicate DFS output ignored by LCA");
            return Ok(out);
        }
        let extra = self.policy.flags_from_view(node, &output.view);
        info.add_flags(extra);
        info.parent = output.view.parent().cloned();
        info.remaining = output.view.children().len();
        info.all_flags = Some(BTreeSet::new());

        if info.remaining > 0 {
            for msg in self.buffered.remove(node).unwrap_or_default() {
                let replayed = self.handle(msg)?;
                out.extend(replayed);
            }
            return Ok(out);
        }

        let has_parent = info.parent.is_some();
        let terminates = !has_parent || info.my_flags.is_empty();
        if has_parent {
            info.all_flags = Some(info.my_flags.clone());
            self.send_report(node, &mut out)?;
        }
        if terminates {
            self.terminate_early(node, &mut out);
        }
        Ok(out)
    }

    pub fn handle(&mut self, msg: LcaMessage<P::Data>) -> Result<LcaOutbox<P::Data>> {
        match msg {
            LcaMessage::Phase1 {
                sender,
                dest,
                flags,
                data,
            } => self.on_report(sender, dest, flags, data),
            LcaMessage::Phase2 { node, flags, data } => self.on_pending(node, flags, data),
        }
    }

    fn on_report(
        &mut self,
        sender: NodeId,
        dest: NodeId,
        flags: BTreeSet<NodeId>,
        data: BTreeMap<NodeId, P::Data>,
    ) -> Result<LcaOutbox<P::Data>> {
        self.ensure_owned(&dest)?;
        let mut out = LcaOutbox::new();
        let info = info_entry(&mut self.infos, &self.initial_flags, &dest);
        if info.all_flags.is_none() {
            trace!(node = %dest, child = %sender, "Buffering LCA report until the DFS output arrives");
            self.buffered.entry(dest.clone()).or_default().push(LcaMessage::Phase1 {
                sender,
                dest,
                flags,
                data,
            });
            return Ok(out);
        }
        if info.remaining == 0 {
            debug!(node = %dest, child = %sender, "Unexpected LCA report ignored");
            return Ok(out);
        }

        self.policy.on_report(&dest, info, &flags, &data);
        let all = info.all_flags.get_or_insert_with(BTreeSet::new);
        for flag in &flags {
            if all.contains(flag) {
                info.lcas.insert(flag.clone());
            }
        }
        all.extend(flags.iter().cloned());
        if !flags.is_empty() {
            info.child_flags.insert(sender, flags);
        }
        info.remaining -= 1;
        if info.remaining > 0 {
            return Ok(out);
        }

        if info.parent.is_some() {
            all.extend(info.my_flags.iter().cloned());
            let nothing_known = all.is_empty();
            self.send_report(&dest, &mut out)?;
            if nothing_known {
                self.terminate_early(&dest, &mut out);
            }
        } else {
            info.lcas.extend(info.my_flags.iter().cloned());
            let pending = all.clone();
            self.resolve(&dest, &pending, None, &mut out)?;
        }
        Ok(out)
    }

    fn on_pending(
        &mut self,
        node: NodeId,
        flags: BTreeSet<NodeId>,
        data: BTreeMap<NodeId, P::Data>,
    ) -> Result<LcaOutbox<P::Data>> {
        self.ensure_owned(&node)?;
        let mut out = LcaOutbox::new();
        let info = info_entry(&mut self.infos, &self.initial_flags, &node);
        info.lcas.extend(info.my_flags.iter().cloned());
        info.lcas.retain(|f| flags.contains(f));
        self.resolve(&node, &flags, Some(&data), &mut out)?;
        Ok(out)
    }

    fn send_report(&mut self, node: &NodeId, out: &mut LcaOutbox<P::Data>) -> Result<()> {
        let info = info_entry(&mut self.infos, &self.initial_flags, node);
        let Some(parent) = info.parent.clone() else {
            return Ok(());
        };
        let flags = info.all_flags.clone().unwrap_or_default();
        let data = self.policy.report_data(node, info);
        trace!(node = %node, parent = %parent, flags = flags.len(), "Sending LCA report");
        out.send(
            self.owner(&parent)?,
            LcaMessage::Phase1 {
                sender: node.clone(),
                dest: parent,
                flags,
                data,
            },
        );
        Ok(())
    }

    fn resolve(
        &mut self,
        node: &NodeId,
        pending: &BTreeSet<NodeId>,
        from_parent: Option<&BTreeMap<NodeId, P::Data>>,
        out: &mut LcaOutbox<P::Data>,
    ) -> Result<()> {
        let info = info_entry(&mut self.infos, &self.initial_flags, node);
        self.policy.resolve(node, info, from_parent, &mut out.events);
        let children: Vec<(NodeId, BTreeSet<NodeId>)> =
            info.child_flags.iter().map(|(c, f)| (c.clone(), f.clone())).collect();
        let lcas = info.lcas.clone();
        for (child, flags) in children {
            let (resolved, still_pending): (BTreeSet<NodeId>, BTreeSet<NodeId>) = flags
                .into_iter()
                .partition(|f| !pending.contains(f) || lcas.contains(f));
            let data = self.policy.data_for_child(&resolved);
            out.send(
                self.owner(&child)?,
                LcaMessage::Phase2 {
                    node: child,
                    flags: still_pending,
                    data,
                },
            );
        }
        self.finish(node, out);
        Ok(())
    }

    fn terminate_early(&mut self, node: &NodeId, out: &mut LcaOutbox<P::Data>) {
        let info = info_entry(&mut self.infos, &self.initial_flags, node);
        self.policy.finish_early(node, info, &mut out.events);
        self.finish(node, out);
    }

    fn finish(&mut self, node: &NodeId, out: &mut LcaOutbox<P::Data>) {
        let info = info_entry(&mut self.infos, &self.initial_flags, node);
        info.done = true;
        debug!(node = %node, lcas = ?info.lcas, "LCA computation finished");
        out.emit(LcaEvent::Output(LcaOutput {
            node: node.clone(),
            lcas: info.lcas.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use sylvan_graph::Problem;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn set(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|s| n(s)).collect()
    }

    /// A -> {B, C}, B -> D, all owned by one agent.
    fn tree() -> (Arc<Subproblem>, BTreeMap<NodeId, DfsView>) {
        let mut p = Problem::new();
        for v in ["A", "B", "C", "D"] {
            p.add_variable(v, "a1").unwrap();
        }
        p.connect("A", "B").unwrap();
        p.connect("A", "C").unwrap();
        p.connect("B", "D").unwrap();
        let agent = AgentId::from("a1");
        let mut views = BTreeMap::new();
        let mut a = DfsView::new();
        a.add_child(&n("A"), n("B")).unwrap();
        a.add_child(&n("A"), n("C")).unwrap();
        let mut b = DfsView::new();
        b.set_parent(&n("B"), n("A"), agent.clone()).unwrap();
        b.add_child(&n("B"), n("D")).unwrap();
        let mut c = DfsView::new();
        c.set_parent(&n("C"), n("A"), agent.clone()).unwrap();
        let mut d = DfsView::new();
        d.set_parent(&n("D"), n("B"), agent.clone()).unwrap();
        views.insert(n("A"), a);
        views.insert(n("B"), b);
        views.insert(n("C"), c);
        views.insert(n("D"), d);
        (Arc::new(p.subproblem(&agent)), views)
    }

    fn output(node: &str, views: &BTreeMap<NodeId, DfsView>) -> DfsOutput {
        DfsOutput {
            root: sylvan_graph::RootId::new(0, "A"),
            node: n(node),
            view: views[&n(node)].clone(),
        }
    }

    fn run(lca: &mut LowestCommonAncestors<PlainLca>, first: LcaOutbox<()>) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
        let mut results = BTreeMap::new();
        let mut queue: VecDeque<LcaMessage<()>> = VecDeque::new();
        let mut collect = |out: LcaOutbox<()>, queue: &mut VecDeque<LcaMessage<()>>| {
            queue.extend(out.sends.into_iter().map(|(_, m)| m));
            for e in out.events {
                if let LcaEvent::Output(o) = e {
                    assert!(results.insert(o.node, o.lcas).is_none(), "node finished twice");
                }
            }
        };
        collect(first, &mut queue);
        while let Some(msg) = queue.pop_front() {
            let out = lca.handle(msg).unwrap();
            collect(out, &mut queue);
        }
        results
    }

    fn flags() -> BTreeMap<NodeId, BTreeSet<NodeId>> {
        BTreeMap::from([
            (n("B"), set(&["R2"])),
            (n("C"), set(&["R1", "R3"])),
            (n("D"), set(&["R1", "R2"])),
        ])
    }

    #[test]
    fn each_flag_resolves_at_its_deepest_common_ancestor() {
        let (sub, views) = tree();
        let mut lca = LowestCommonAncestors::new(sub, flags());
        let mut first = LcaOutbox::new();
        for node in ["A", "B", "C", "D"] {
            first.extend(lca.on_dfs_output(&output(node, &views)).unwrap());
        }
        let results = run(&mut lca, first);
        assert_eq!(results[&n("A")], set(&["R1"]));
        assert_eq!(results[&n("B")], set(&["R2"]));
        assert_eq!(results[&n("C")], set(&["R3"]));
        assert!(results[&n("D")].is_empty());
        assert_eq!(lca.lcas(&n("B")), Some(&set(&["R2"])));
    }

    #[test]
    fn early_reports_are_buffered() {
        let (sub, views) = tree();
        let mut lca = LowestCommonAncestors::new(sub, flags());
        // D reports to B before B knows its view
        let mut first = lca.on_dfs_output(&output("D", &views)).unwrap();
        let report = first.sends.remove(0).1;
        assert!(lca.handle(report).unwrap().is_empty());
        for node in ["A", "B", "C"] {
            first.extend(lca.on_dfs_output(&output(node, &views)).unwrap());
        }
        let results = run(&mut lca, first);
        assert_eq!(results[&n("B")], set(&["R2"]));
        assert_eq!(results[&n("A")], set(&["R1"]));
    }

    #[test]
    fn duplicate_dfs_output_is_a_no_op() {
        let (sub, views) = tree();
        let mut lca = LowestCommonAncestors::new(sub, flags());
        let first = lca.on_dfs_output(&output("C", &views)).unwrap();
        assert_eq!(first.sends.len(), 1);
        assert!(lca.on_dfs_output(&output("C", &views)).unwrap().is_empty());
    }

    #[test]
    fn flagless_leaf_terminates_at_once() {
        let (sub, views) = tree();
        let mut lca = LowestCommonAncestors::new(sub, BTreeMap::new());
        let out = lca.on_dfs_output(&output("D", &views)).unwrap();
        assert_eq!(out.sends.len(), 1);
        assert!(matches!(&out.events[..], [LcaEvent::Output(o)] if o.lcas.is_empty()));
    }

    #[test]
    fn isolated_root_keeps_its_own_flags() {
        let mut p = Problem::new();
        p.add_variable("X", "a1").unwrap();
        let sub = Arc::new(p.subproblem(&AgentId::from("a1")));
        let mut lca = LowestCommonAncestors::new(sub, BTreeMap::from([(n("X"), set(&["R"]))]));
        let out = lca
            .on_dfs_output(&DfsOutput {
                root: sylvan_graph::RootId::new(0, "X"),
                node: n("X"),
                view: DfsView::new(),
            })
            .unwrap();
        assert!(out.sends.is_empty());
        assert_eq!(lca.lcas(&n("X")), Some(&set(&["R"])));
    }
}
