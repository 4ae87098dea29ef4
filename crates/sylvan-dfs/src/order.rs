//! Declared visitation orders.
//!
//! Every CHILD token carries an order. A node's true order is the order on
//! its first token; the order it declares to the rest of the tree is
//! overstated by a random jitter so that neighbours cannot infer exact
//! subtree sizes. Once the root finalizes, the (overstated) number of
//! variables of the component is propagated from the root downwards.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sylvan_graph::{NodeId, RootId};

use crate::config::OrderConfig;
use crate::message::OrderOutput;

#[derive(Debug, Clone, Default)]
struct NodeOrder {
    true_order: u32,
    declared: u32,
    /// Highest order seen passing through this node.
    in_process: u32,
    is_root: bool,
}

/// Order bookkeeping for every (run, node) pair of one agent.
#[derive(Debug)]
pub struct OrderTracker {
    min_incr: u32,
    seed: u64,
    rng: StdRng,
    nodes: BTreeMap<(RootId, NodeId), NodeOrder>,
    totals: BTreeMap<(RootId, NodeId), u32>,
}

impl OrderTracker {
    pub fn new(config: OrderConfig, seed: u64) -> Self {
        Self {
            min_incr: config.min_incr.max(1),
            seed,
            rng: StdRng::seed_from_u64(seed),
            nodes: BTreeMap::new(),
            totals: BTreeMap::new(),
        }
    }

    fn jitter(&mut self) -> u32 {
        self.rng.gen_range(0..self.min_incr) + self.min_incr - 1
    }

    fn entry(&mut self, root: &RootId, node: &NodeId) -> &mut NodeOrder {
        self.nodes.entry((root.clone(), node.clone())).or_default()
    }

    /// `node` was told it is the root of run `root`.
    pub fn on_root(&mut self, root: &RootId, node: &NodeId, isolated: bool) -> Option<OrderOutput> {
        let output = |declared| OrderOutput {
            root: root.clone(),
            node: node.clone(),
            true_order: 0,
            declared_order: declared,
        };
        if isolated {
            return Some(output(0));
        }
        if self.entry(root, node).is_root {
            return None;
        }
        let declared = self.jitter();
        let state = self.entry(root, node);
        state.is_root = true;
        state.declared = declared;
        Some(output(declared))
    }

    /// `node` received a CHILD token carrying `order`. Returns the node's
    /// order output the first time it is reached.
    pub fn on_child_token(&mut self, root: &RootId, node: &NodeId, order: u32) -> Option<OrderOutput> {
        let state = self.entry(root, node);
        state.in_process = order;
        if state.true_order != 0 || state.is_root {
            return None;
        }
        let declared = order + self.jitter();
        let state = self.entry(root, node);
        state.true_order = order;
        state.declared = declared;
        Some(OrderOutput {
            root: root.clone(),
            node: node.clone(),
            true_order: order,
            declared_order: declared,
        })
    }

    /// Order to put on the next CHILD token sent by `node`.
    pub fn next_order(&self, root: &RootId, node: &NodeId) -> u32 {
        let state = self
            .nodes
            .get(&(root.clone(), node.clone()))
            .cloned()
            .unwrap_or_default();
        if state.in_process == state.true_order {
            state.declared + 1
        } else {
            state.in_process
        }
    }

    /// `node` finalized. For a root whose component size is still unknown,
    /// returns the total to announce.
    pub fn on_finalized(&mut self, root: &RootId, node: &NodeId) -> Option<u32> {
        let state = self.entry(root, node);
        if state.true_order != 0 {
            return None;
        }
        if state.in_process == 0 {
            // no token went through: single-variable component
            state.in_process = 1;
        }
        let total = state.in_process;
        if self.totals.contains_key(&(root.clone(), node.clone())) {
            None
        } else {
            Some(total)
        }
    }

    pub fn on_variable_count(&mut self, root: &RootId, node: &NodeId, total: u32) {
        self.totals.insert((root.clone(), node.clone()), total);
    }

    pub fn total(&self, root: &RootId, node: &NodeId) -> Option<u32> {
        self.totals.get(&(root.clone(), node.clone())).copied()
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.totals.clear();
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    #[test]
    fn unit_increment_declares_true_orders() {
        let root = RootId::new(0, "A");
        let mut t = OrderTracker::new(OrderConfig { min_incr: 1 }, 0);
        let out = t.on_root(&root, &n("A"), false).unwrap();
        assert_eq!((out.true_order, out.declared_order), (0, 0));
        assert_eq!(t.next_order(&root, &n("A")), 1);

        let out = t.on_child_token(&root, &n("B"), 1).unwrap();
        assert_eq!((out.true_order, out.declared_order), (1, 1));
        assert_eq!(t.next_order(&root, &n("B")), 2);

        // the token comes back to A after visiting B and one more node
        t.on_child_token(&root, &n("A"), 3);
        assert_eq!(t.next_order(&root, &n("A")), 3, "orders already used are not reissued");
        assert_eq!(t.on_finalized(&root, &n("A")), Some(3));
        assert_eq!(t.on_finalized(&root, &n("B")), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        let root = RootId::new(0, "A");
        let mut t = OrderTracker::new(OrderConfig { min_incr: 4 }, 9);
        for i in 1..50u32 {
            let node = NodeId::new(format!("X{i}"));
            let out = t.on_child_token(&root, &node, i).unwrap();
            let jitter = out.declared_order - out.true_order;
            assert!((3..=6).contains(&jitter), "jitter {jitter} out of [3, 6]");
        }
    }

    #[test]
    fn isolated_root_counts_itself() {
        let root = RootId::new(0, "A");
        let mut t = OrderTracker::new(OrderConfig::default(), 0);
        let out = t.on_root(&root, &n("A"), true).unwrap();
        assert_eq!((out.true_order, out.declared_order), (0, 0));
        assert_eq!(t.on_finalized(&root, &n("A")), Some(1));
        t.on_variable_count(&root, &n("A"), 1);
        assert_eq!(t.on_finalized(&root, &n("A")), None);
        assert_eq!(t.total(&root, &n("A")), Some(1));
    }

    #[test]
    fn root_notification_is_counted_once() {
        let root = RootId::new(0, "A");
        let mut t = OrderTracker::new(OrderConfig::default(), 0);
        assert!(t.on_root(&root, &n("A"), false).is_some());
        assert!(t.on_root(&root, &n("A"), false).is_none());
    }
}
