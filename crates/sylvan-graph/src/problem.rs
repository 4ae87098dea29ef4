//! Global constraint graph and per-agent subproblems.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::ids::{AgentId, NodeId};
use crate::law::ProbabilityLaw;

/// A constraint, reduced to what the pseudo-tree needs: a name and a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraint {
    pub name: String,
    pub scope: Vec<NodeId>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, scope: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into_iter().collect(),
        }
    }

    pub fn involves(&self, node: &NodeId) -> bool {
        self.scope.contains(node)
    }
}

/// Read access to the neighbourhoods an agent knows about.
///
/// Lookups return `None` when the answer is not locally known, which happens
/// for variables owned by other agents.
pub trait Topology {
    fn neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>>;

    fn random_neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>>;

    fn owner(&self, node: &NodeId) -> Option<&AgentId>;
}

/// Source of the constraints a finalized node becomes responsible for.
pub trait ConstraintIndex {
    /// Constraints involving `node` whose scope contains none of `below`.
    ///
    /// Constraints mentioning random variables are only returned when
    /// `with_random_vars` is set.
    fn solution_spaces_for(
        &self,
        node: &NodeId,
        below: &BTreeSet<NodeId>,
        with_random_vars: bool,
    ) -> Vec<Constraint>;
}

fn select_spaces<'a>(
    constraints: impl Iterator<Item = &'a Constraint>,
    random: impl Fn(&NodeId) -> bool,
    node: &NodeId,
    below: &BTreeSet<NodeId>,
    with_random_vars: bool,
) -> Vec<Constraint> {
    constraints
        .filter(|c| c.involves(node))
        .filter(|c| !c.scope.iter().any(|v| below.contains(v)))
        .filter(|c| with_random_vars || !c.scope.iter().any(&random))
        .cloned()
        .collect()
}

/// Serializable description of a problem, validated into a [`Problem`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProblemDescription {
    /// Decision variables and their owning agents.
    pub variables: BTreeMap<NodeId, AgentId>,
    /// Random variables and their probability laws.
    #[cfg_attr(feature = "serde", serde(default))]
    pub random_variables: BTreeMap<NodeId, ProbabilityLaw>,
    pub constraints: Vec<Constraint>,
}

/// The global constraint graph.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "ProblemDescription", into = "ProblemDescription")
)]
pub struct Problem {
    owners: BTreeMap<NodeId, AgentId>,
    laws: BTreeMap<NodeId, ProbabilityLaw>,
    constraints: Vec<Constraint>,
    neighbors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    random_neighbors: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a decision variable owned by `agent`.
    pub fn add_variable(&mut self, node: impl Into<NodeId>, agent: impl Into<AgentId>) -> Result<()> {
        let node = node.into();
        if self.owners.contains_key(&node) || self.laws.contains_key(&node) {
            return Err(Error::DuplicateVariable(node));
        }
        self.neighbors.insert(node.clone(), BTreeSet::new());
        self.random_neighbors.insert(node.clone(), BTreeSet::new());
        self.owners.insert(node, agent.into());
        Ok(())
    }

    /// Declare a random variable. Random variables have no owner.
    pub fn add_random_variable(&mut self, node: impl Into<NodeId>, law: ProbabilityLaw) -> Result<()> {
        let node = node.into();
        if self.owners.contains_key(&node) || self.laws.contains_key(&node) {
            return Err(Error::DuplicateVariable(node));
        }
        law.validate(&node)?;
        self.laws.insert(node, law);
        Ok(())
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<()> {
        if constraint.scope.is_empty() {
            return Err(Error::EmptyScope(constraint.name));
        }
        for var in &constraint.scope {
            if !self.owners.contains_key(var) && !self.laws.contains_key(var) {
                return Err(Error::UnknownVariable(var.clone()));
            }
        }
        let decision: Vec<&NodeId> = constraint
            .scope
            .iter()
            .filter(|v| self.owners.contains_key(*v))
            .collect();
        let random: Vec<&NodeId> = constraint
            .scope
            .iter()
            .filter(|v| self.laws.contains_key(*v))
            .collect();
        for a in &decision {
            for b in &decision {
                if a != b {
                    if let Some(set) = self.neighbors.get_mut(*a) {
                        set.insert((*b).clone());
                    }
                }
            }
            if let Some(set) = self.random_neighbors.get_mut(*a) {
                set.extend(random.iter().map(|r| (*r).clone()));
            }
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Convenience for a binary constraint between two declared variables.
    pub fn connect(&mut self, a: impl Into<NodeId>, b: impl Into<NodeId>) -> Result<()> {
        let (a, b) = (a.into(), b.into());
        let name = format!("{a}_{b}");
        self.add_constraint(Constraint::new(name, [a, b]))
    }

    pub fn variables(&self) -> impl Iterator<Item = &NodeId> {
        self.owners.keys()
    }

    pub fn variable_count(&self) -> usize {
        self.owners.len()
    }

    pub fn random_variables(&self) -> impl Iterator<Item = &NodeId> {
        self.laws.keys()
    }

    pub fn is_random(&self, node: &NodeId) -> bool {
        self.laws.contains_key(node)
    }

    pub fn law(&self, node: &NodeId) -> Option<&ProbabilityLaw> {
        self.laws.get(node)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn agents(&self) -> BTreeSet<AgentId> {
        self.owners.values().cloned().collect()
    }

    pub fn variables_of<'a>(&'a self, agent: &'a AgentId) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.owners
            .iter()
            .filter(move |(_, owner)| *owner == agent)
            .map(|(node, _)| node)
    }

    /// Every edge of the constraint graph, as ordered pairs `(a, b)` with `a < b`.
    pub fn edges(&self) -> BTreeSet<(NodeId, NodeId)> {
        let mut edges = BTreeSet::new();
        for (a, set) in &self.neighbors {
            for b in set {
                if a < b {
                    edges.insert((a.clone(), b.clone()));
                }
            }
        }
        edges
    }

    /// Connected components over decision variables.
    pub fn components(&self) -> Vec<BTreeSet<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in self.owners.keys() {
            if seen.contains(start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut stack = vec![start.clone()];
            while let Some(node) = stack.pop() {
                if !seen.insert(node.clone()) {
                    continue;
                }
                if let Some(next) = self.neighbors.get(&node) {
                    stack.extend(next.iter().filter(|n| !seen.contains(*n)).cloned());
                }
                component.insert(node);
            }
            components.push(component);
        }
        components
    }

    /// The part of the problem visible to `agent`.
    pub fn subproblem(&self, agent: &AgentId) -> Subproblem {
        let own: BTreeSet<NodeId> = self.variables_of(agent).cloned().collect();
        let mut owners = BTreeMap::new();
        let mut neighbors = BTreeMap::new();
        let mut random_neighbors = BTreeMap::new();
        let mut laws = BTreeMap::new();
        for node in &own {
            owners.insert(node.clone(), agent.clone());
            let nbrs = self.neighbors.get(node).cloned().unwrap_or_default();
            for n in &nbrs {
                if let Some(owner) = self.owners.get(n) {
                    owners.insert(n.clone(), owner.clone());
                }
            }
            let rands = self.random_neighbors.get(node).cloned().unwrap_or_default();
            for r in &rands {
                if let Some(law) = self.laws.get(r) {
                    laws.insert(r.clone(), law.clone());
                }
            }
            neighbors.insert(node.clone(), nbrs);
            random_neighbors.insert(node.clone(), rands);
        }
        let constraints = self
            .constraints
            .iter()
            .filter(|c| c.scope.iter().any(|v| own.contains(v)))
            .cloned()
            .collect();
        Subproblem {
            agent: agent.clone(),
            own,
            owners,
            neighbors,
            random_neighbors,
            laws,
            constraints,
        }
    }

    pub fn describe(&self) -> ProblemDescription {
        ProblemDescription {
            variables: self.owners.clone(),
            random_variables: self.laws.clone(),
            constraints: self.constraints.clone(),
        }
    }
}

impl TryFrom<ProblemDescription> for Problem {
    type Error = Error;

    fn try_from(desc: ProblemDescription) -> Result<Self> {
        let mut problem = Problem::new();
        for (node, agent) in desc.variables {
            problem.add_variable(node, agent)?;
        }
        for (node, law) in desc.random_variables {
            problem.add_random_variable(node, law)?;
        }
        for constraint in desc.constraints {
            problem.add_constraint(constraint)?;
        }
        Ok(problem)
    }
}

impl From<Problem> for ProblemDescription {
    fn from(problem: Problem) -> Self {
        problem.describe()
    }
}

impl Topology for Problem {
    fn neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.neighbors.get(node)
    }

    fn random_neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.random_neighbors.get(node)
    }

    fn owner(&self, node: &NodeId) -> Option<&AgentId> {
        self.owners.get(node)
    }
}

impl ConstraintIndex for Problem {
    fn solution_spaces_for(
        &self,
        node: &NodeId,
        below: &BTreeSet<NodeId>,
        with_random_vars: bool,
    ) -> Vec<Constraint> {
        select_spaces(
            self.constraints.iter(),
            |v| self.is_random(v),
            node,
            below,
            with_random_vars,
        )
    }
}

/// What one agent knows: its own variables, their neighbourhoods, the owners
/// of those neighbours, and the constraints and laws touching its variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Subproblem {
    agent: AgentId,
    own: BTreeSet<NodeId>,
    owners: BTreeMap<NodeId, AgentId>,
    neighbors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    random_neighbors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    laws: BTreeMap<NodeId, ProbabilityLaw>,
    constraints: Vec<Constraint>,
}

impl Subproblem {
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn own_variables(&self) -> &BTreeSet<NodeId> {
        &self.own
    }

    pub fn owns(&self, node: &NodeId) -> bool {
        self.own.contains(node)
    }

    pub fn law(&self, node: &NodeId) -> Option<&ProbabilityLaw> {
        self.laws.get(node)
    }

    pub fn is_random(&self, node: &NodeId) -> bool {
        self.laws.contains_key(node)
    }

    /// Agents other than this one that own a neighbour of `node`.
    pub fn neighbor_agents(&self, node: &NodeId) -> BTreeSet<AgentId> {
        self.neighbors
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|n| self.owners.get(n))
            .filter(|a| **a != self.agent)
            .cloned()
            .collect()
    }

    /// Agents other than this one that own a neighbour of any own variable.
    pub fn all_neighbor_agents(&self) -> BTreeSet<AgentId> {
        self.own.iter().flat_map(|n| self.neighbor_agents(n)).collect()
    }
}

impl Topology for Subproblem {
    fn neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.neighbors.get(node)
    }

    fn random_neighbors(&self, node: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.random_neighbors.get(node)
    }

    fn owner(&self, node: &NodeId) -> Option<&AgentId> {
        self.owners.get(node)
    }
}

impl ConstraintIndex for Subproblem {
    fn solution_spaces_for(
        &self,
        node: &NodeId,
        below: &BTreeSet<NodeId>,
        with_random_vars: bool,
    ) -> Vec<Constraint> {
        select_spaces(
            self.constraints.iter(),
            |v| self.laws.contains_key(v),
            node,
            below,
            with_random_vars,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn two_agent_problem() -> Problem {
        let mut p = Problem::new();
        p.add_variable("X", "a1").unwrap();
        p.add_variable("Y", "a1").unwrap();
        p.add_variable("Z", "a2").unwrap();
        p.add_variable("W", "a2").unwrap();
        p.add_random_variable("R", ProbabilityLaw::uniform([0, 1])).unwrap();
        p.connect("X", "Y").unwrap();
        p.connect("Y", "Z").unwrap();
        p.add_constraint(Constraint::new("xzr", [n("X"), n("Z"), n("R")])).unwrap();
        p
    }

    #[test]
    fn neighbourhoods_skip_random_variables() {
        let p = two_agent_problem();
        let x = Topology::neighbors(&p, &n("X")).unwrap();
        assert_eq!(x, &[n("Y"), n("Z")].into_iter().collect());
        assert_eq!(p.random_neighbors(&n("Z")).unwrap(), &[n("R")].into_iter().collect());
        assert!(p.random_neighbors(&n("Y")).unwrap().is_empty());
    }

    #[test]
    fn components_split_isolated_nodes() {
        let p = two_agent_problem();
        let comps = p.components();
        assert_eq!(comps.len(), 2);
        assert!(comps.iter().any(|c| c.len() == 1 && c.contains(&n("W"))));
    }

    #[test]
    fn rejects_unknown_and_duplicate_variables() {
        let mut p = two_agent_problem();
        assert!(matches!(p.add_variable("X", "a3"), Err(Error::DuplicateVariable(_))));
        assert!(matches!(p.connect("X", "Q"), Err(Error::UnknownVariable(_))));
        assert!(matches!(
            p.add_constraint(Constraint::new("empty", [])),
            Err(Error::EmptyScope(_))
        ));
    }

    #[test]
    fn subproblem_knows_neighbour_owners_only() {
        let p = two_agent_problem();
        let sub = p.subproblem(&AgentId::from("a1"));
        assert!(sub.owns(&n("X")));
        assert_eq!(sub.owner(&n("Z")), Some(&AgentId::from("a2")));
        assert_eq!(sub.owner(&n("W")), None);
        assert!(sub.neighbors(&n("Z")).is_none(), "remote neighbourhoods are unknown");
        assert_eq!(sub.neighbor_agents(&n("Y")), [AgentId::from("a2")].into_iter().collect());
        assert!(sub.law(&n("R")).is_some());
    }

    #[test]
    fn spaces_exclude_constraints_with_lower_variables() {
        let p = two_agent_problem();
        let below: BTreeSet<NodeId> = [n("Y")].into_iter().collect();
        let spaces = p.solution_spaces_for(&n("X"), &below, false);
        assert!(spaces.is_empty(), "x_y is delegated to Y and xzr mentions R");

        let spaces = p.solution_spaces_for(&n("X"), &below, true);
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].name, "xzr");

        let spaces = p.solution_spaces_for(&n("X"), &BTreeSet::new(), false);
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].name, "X_Y");
    }

    #[test]
    fn description_round_trip_rebuilds_adjacency() {
        let p = two_agent_problem();
        let rebuilt = Problem::try_from(p.describe()).unwrap();
        assert_eq!(rebuilt.edges(), p.edges());
        assert_eq!(rebuilt, p);
    }
}
