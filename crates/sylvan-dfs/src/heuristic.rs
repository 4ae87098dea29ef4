//! Child-choice heuristics.
//!
//! A heuristic decides which open neighbour a node should try next as a
//! child. It may answer "not yet" when it is still waiting for information
//! from other agents; the caller then defers the triggering message.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use sylvan_graph::{AgentId, NodeId, RootId, Scoring, Subproblem};
use tracing::trace;

use crate::message::{ChildToken, HeuristicMessage};
use crate::view::DfsView;

/// Strategy injected into DFS generation to order children.
pub trait ChildChoiceHeuristic: fmt::Debug + Send {
    /// Messages to send to other agents before the traversal starts.
    fn start(&mut self) -> Vec<(AgentId, HeuristicMessage)> {
        Vec::new()
    }

    /// Absorb information sent by another agent's heuristic.
    fn observe(&mut self, _msg: &HeuristicMessage) {}

    /// Called when `token.dest` receives its first CHILD token in a run.
    fn observe_first_token(&mut self, _token: &ChildToken) {}

    /// Random variables to attach to CHILD tokens sent by `node`.
    fn token_rand_vars(&self, _root: &RootId, _node: &NodeId) -> Option<BTreeSet<NodeId>> {
        None
    }

    /// Pick the next child of `node` among the non-empty `open` set, or
    /// `None` when the choice cannot be made yet.
    fn choose(&mut self, root: &RootId, node: &NodeId, view: &DfsView, open: &BTreeSet<NodeId>) -> Option<NodeId>;

    /// Forget everything learned from other agents.
    fn reset(&mut self) {}
}

fn best_by_score<'a>(candidates: impl Iterator<Item = (i64, &'a NodeId)>) -> Option<NodeId> {
    candidates.max().map(|(_, node)| node.clone())
}

/// Picks the open neighbour with the highest locally computable score.
#[derive(Debug)]
pub struct BlindScoring {
    subproblem: Arc<Subproblem>,
    scoring: Scoring,
}

impl BlindScoring {
    pub fn new(subproblem: Arc<Subproblem>, scoring: Scoring) -> Self {
        Self { subproblem, scoring }
    }
}

impl ChildChoiceHeuristic for BlindScoring {
    fn choose(&mut self, _root: &RootId, _node: &NodeId, _view: &DfsView, open: &BTreeSet<NodeId>) -> Option<NodeId> {
        let sub: &Subproblem = &self.subproblem;
        best_by_score(
            open.iter()
                .map(|n| (self.scoring.score(n, sub).unwrap_or(i64::MIN), n)),
        )
    }
}

/// Announces the scores of its own variables to neighbouring agents, and
/// picks the open neighbour with the highest score once all are known.
#[derive(Debug)]
pub struct ScoreBroadcasting {
    subproblem: Arc<Subproblem>,
    scoring: Scoring,
    known: BTreeMap<NodeId, i64>,
}

impl ScoreBroadcasting {
    pub fn new(subproblem: Arc<Subproblem>, scoring: Scoring) -> Self {
        let mut heuristic = Self {
            subproblem,
            scoring,
            known: BTreeMap::new(),
        };
        heuristic.known = heuristic.own_scores();
        heuristic
    }

    fn own_scores(&self) -> BTreeMap<NodeId, i64> {
        let sub: &Subproblem = &self.subproblem;
        sub.own_variables()
            .iter()
            .filter_map(|n| self.scoring.score(n, sub).map(|s| (n.clone(), s)))
            .collect()
    }
}

impl ChildChoiceHeuristic for ScoreBroadcasting {
    fn start(&mut self) -> Vec<(AgentId, HeuristicMessage)> {
        let sub: &Subproblem = &self.subproblem;
        let mut per_agent: BTreeMap<AgentId, BTreeMap<NodeId, i64>> = BTreeMap::new();
        for node in sub.own_variables() {
            let Some(score) = self.known.get(node) else {
                continue;
            };
            for agent in sub.neighbor_agents(node) {
                per_agent.entry(agent).or_default().insert(node.clone(), *score);
            }
        }
        per_agent
            .into_iter()
            .map(|(agent, scores)| (agent, HeuristicMessage::Scores(scores)))
            .collect()
    }

    fn observe(&mut self, msg: &HeuristicMessage) {
        if let HeuristicMessage::Scores(scores) = msg {
            self.known.extend(scores.iter().map(|(n, s)| (n.clone(), *s)));
        }
    }

    fn choose(&mut self, _root: &RootId, node: &NodeId, _view: &DfsView, open: &BTreeSet<NodeId>) -> Option<NodeId> {
        let mut scored = Vec::with_capacity(open.len());
        for n in open {
            match self.known.get(n) {
                Some(score) => scored.push((*score, n)),
                None => {
                    trace!(node = %node, waiting_for = %n, "Score not received yet");
                    return None;
                }
            }
        }
        best_by_score(scored.into_iter())
    }

    fn reset(&mut self) {
        self.known = self.own_scores();
    }
}

/// Prefers the open neighbour sharing the most random variables with the
/// current node, then the one bringing the fewest new random variables, then
/// whatever the wrapped heuristic prefers.
///
/// A node's set grows with the set carried by its first CHILD token, so
/// random variables of ancestors count as shared.
#[derive(Debug)]
pub struct LocalRandVars {
    subproblem: Arc<Subproblem>,
    tie_breaker: Box<dyn ChildChoiceHeuristic>,
    known: BTreeMap<NodeId, BTreeSet<NodeId>>,
    inherited: BTreeMap<(RootId, NodeId), BTreeSet<NodeId>>,
}

impl LocalRandVars {
    pub fn new(subproblem: Arc<Subproblem>, tie_breaker: Box<dyn ChildChoiceHeuristic>) -> Self {
        let mut heuristic = Self {
            subproblem,
            tie_breaker,
            known: BTreeMap::new(),
            inherited: BTreeMap::new(),
        };
        heuristic.known = heuristic.own_sets();
        heuristic
    }

    fn own_sets(&self) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
        use sylvan_graph::Topology;
        let sub: &Subproblem = &self.subproblem;
        sub.own_variables()
            .iter()
            .map(|n| (n.clone(), sub.random_neighbors(n).cloned().unwrap_or_default()))
            .collect()
    }

    fn rand_vars(&self, root: &RootId, node: &NodeId) -> Option<BTreeSet<NodeId>> {
        let mut set = self.known.get(node)?.clone();
        if let Some(extra) = self.inherited.get(&(root.clone(), node.clone())) {
            set.extend(extra.iter().cloned());
        }
        Some(set)
    }
}

impl ChildChoiceHeuristic for LocalRandVars {
    fn start(&mut self) -> Vec<(AgentId, HeuristicMessage)> {
        let mut out = Vec::new();
        for node in self.subproblem.own_variables() {
            let rand_vars = self.known.get(node).cloned().unwrap_or_default();
            for agent in self.subproblem.neighbor_agents(node) {
                out.push((
                    agent,
                    HeuristicMessage::RandVars {
                        node: node.clone(),
                        rand_vars: rand_vars.clone(),
                    },
                ));
            }
        }
        out.extend(self.tie_breaker.start());
        out
    }

    fn observe(&mut self, msg: &HeuristicMessage) {
        match msg {
            HeuristicMessage::RandVars { node, rand_vars } => {
                self.known
                    .entry(node.clone())
                    .or_default()
                    .extend(rand_vars.iter().cloned());
            }
            other => self.tie_breaker.observe(other),
        }
    }

    fn observe_first_token(&mut self, token: &ChildToken) {
        if let Some(parent_vars) = &token.rand_vars {
            self.inherited
                .entry((token.root.clone(), token.dest.clone()))
                .or_default()
                .extend(parent_vars.iter().cloned());
        }
        self.tie_breaker.observe_first_token(token);
    }

    fn token_rand_vars(&self, root: &RootId, node: &NodeId) -> Option<BTreeSet<NodeId>> {
        self.rand_vars(root, node)
    }

    fn choose(&mut self, root: &RootId, node: &NodeId, view: &DfsView, open: &BTreeSet<NodeId>) -> Option<NodeId> {
        let mine = self.rand_vars(root, node)?;
        let mut classes: BTreeMap<(usize, i64), BTreeSet<NodeId>> = BTreeMap::new();
        for n in open {
            let Some(theirs) = self.rand_vars(root, n) else {
                trace!(node = %node, waiting_for = %n, "Random variables not received yet");
                return None;
            };
            let common = mine.intersection(&theirs).count();
            let score = (common, common as i64 - theirs.len() as i64);
            classes.entry(score).or_default().insert(n.clone());
        }
        let (_, best) = classes.into_iter().next_back()?;
        if best.len() == 1 {
            return best.into_iter().next();
        }
        self.tie_breaker.choose(root, node, view, &best)
    }

    fn reset(&mut self) {
        self.known = self.own_sets();
        self.inherited.clear();
        self.tie_breaker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sylvan_graph::{Constraint, ProbabilityLaw, Problem};

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn open(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|s| n(s)).collect()
    }

    /// A is linked to B, C (agent a1) and D (agent a2); A, B share R1.
    fn problem() -> Problem {
        let mut p = Problem::new();
        for (v, a) in [("A", "a1"), ("B", "a1"), ("C", "a1"), ("D", "a2")] {
            p.add_variable(v, a).unwrap();
        }
        p.add_random_variable("R1", ProbabilityLaw::uniform([0, 1])).unwrap();
        p.add_random_variable("R2", ProbabilityLaw::uniform([0, 1])).unwrap();
        p.connect("A", "B").unwrap();
        p.connect("A", "C").unwrap();
        p.connect("A", "D").unwrap();
        p.connect("C", "D").unwrap();
        p.add_constraint(Constraint::new("ab", [n("A"), n("B"), n("R1")])).unwrap();
        p.add_constraint(Constraint::new("c", [n("C"), n("R2")])).unwrap();
        p
    }

    fn root() -> RootId {
        RootId::new(0, "A")
    }

    #[test]
    fn blind_scoring_ranks_unknown_scores_last() {
        let p = problem();
        let sub = Arc::new(p.subproblem(&AgentId::from("a1")));
        let mut h = BlindScoring::new(sub, Scoring::MostConnected);
        // C has two neighbours, B one, D is remote and unknown
        let pick = h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "C", "D"]));
        assert_eq!(pick, Some(n("C")));
    }

    #[test]
    fn score_broadcasting_waits_for_remote_scores() {
        let p = problem();
        let sub = Arc::new(p.subproblem(&AgentId::from("a1")));
        let mut h = ScoreBroadcasting::new(sub, Scoring::MostConnected);

        let announcements = h.start();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].0, AgentId::from("a2"));

        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "D"])), None);

        let remote = p.subproblem(&AgentId::from("a2"));
        let mut other = ScoreBroadcasting::new(Arc::new(remote), Scoring::MostConnected);
        for (_, msg) in other.start() {
            h.observe(&msg);
        }
        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "D"])), Some(n("D")));

        h.reset();
        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "D"])), None);
    }

    #[test]
    fn local_rand_vars_prefers_shared_random_variables() {
        let p = problem();
        let sub = Arc::new(p.subproblem(&AgentId::from("a1")));
        let inner = Box::new(BlindScoring::new(Arc::clone(&sub), Scoring::VarName));
        let mut h = LocalRandVars::new(sub, inner);

        // D's set is unknown until announced
        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "C", "D"])), None);
        h.observe(&HeuristicMessage::RandVars {
            node: n("D"),
            rand_vars: BTreeSet::new(),
        });
        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["B", "C", "D"])), Some(n("B")));

        // without B, D brings no new random variable while C brings R2
        assert_eq!(h.choose(&root(), &n("A"), &DfsView::new(), &open(&["C", "D"])), Some(n("D")));
    }

    #[test]
    fn local_rand_vars_inherits_from_the_first_token() {
        let p = problem();
        let sub = Arc::new(p.subproblem(&AgentId::from("a1")));
        let inner = Box::new(BlindScoring::new(Arc::clone(&sub), Scoring::VarName));
        let mut h = LocalRandVars::new(sub, inner);
        h.observe_first_token(&ChildToken {
            sender: n("D"),
            dest: n("C"),
            root: RootId::new(0, "D"),
            order: None,
            rand_vars: Some(open(&["R9"])),
        });
        let vars = h.token_rand_vars(&RootId::new(0, "D"), &n("C")).unwrap();
        assert_eq!(vars, open(&["R2", "R9"]));
        let other_run = h.token_rand_vars(&root(), &n("C")).unwrap();
        assert_eq!(other_run, open(&["R2"]));
    }
}
