//! Scoring heuristics used for root election and child ordering.

use std::fmt;
use std::str::FromStr;

use crate::ids::{NodeId, RootId};
use crate::problem::Topology;

/// Scores a variable; higher is preferred.
///
/// Ties are always broken by variable name through [`RootId`] ordering, so a
/// heuristic returning a constant ranks variables by name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "snake_case"))]
pub enum Scoring {
    /// Rank by variable name only.
    VarName,
    /// Prefer variables with the most neighbours.
    #[default]
    MostConnected,
    /// Prefer variables with the fewest neighbours.
    LeastConnected,
    /// Prefer variables linked to the fewest random variables.
    LeastRandomVars,
}

impl Scoring {
    /// Score `node`, or `None` when `topology` does not know enough about it.
    pub fn score(&self, node: &NodeId, topology: &dyn Topology) -> Option<i64> {
        match self {
            Self::VarName => Some(0),
            Self::MostConnected => topology.neighbors(node).map(|n| n.len() as i64),
            Self::LeastConnected => topology.neighbors(node).map(|n| -(n.len() as i64)),
            Self::LeastRandomVars => topology.random_neighbors(node).map(|r| -(r.len() as i64)),
        }
    }

    /// Election score of `node` as a candidate-root identifier.
    pub fn root_id(&self, node: &NodeId, topology: &dyn Topology) -> Option<RootId> {
        self.score(node, topology)
            .map(|score| RootId::new(score, node.clone()))
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VarName => "var_name",
            Self::MostConnected => "most_connected",
            Self::LeastConnected => "least_connected",
            Self::LeastRandomVars => "least_random_vars",
        };
        f.write_str(name)
    }
}

/// Unrecognised scoring heuristic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScoring(pub String);

impl fmt::Display for UnknownScoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scoring heuristic `{}`", self.0)
    }
}

impl std::error::Error for UnknownScoring {}

impl FromStr for Scoring {
    type Err = UnknownScoring;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "var_name" => Ok(Self::VarName),
            "most_connected" => Ok(Self::MostConnected),
            "least_connected" => Ok(Self::LeastConnected),
            "least_random_vars" => Ok(Self::LeastRandomVars),
            other => Err(UnknownScoring(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::law::ProbabilityLaw;
    use crate::problem::{Constraint, Problem};

    fn star() -> Problem {
        let mut p = Problem::new();
        for v in ["A", "B", "C", "D"] {
            p.add_variable(v, "a1").unwrap();
        }
        p.add_random_variable("R", ProbabilityLaw::uniform([0, 1])).unwrap();
        p.connect("A", "B").unwrap();
        p.connect("A", "C").unwrap();
        p.connect("A", "D").unwrap();
        p.add_constraint(Constraint::new("br", ["B".into(), "R".into()])).unwrap();
        p
    }

    #[test]
    fn most_connected_prefers_the_hub() {
        let p = star();
        let best = p
            .variables()
            .filter_map(|v| Scoring::MostConnected.root_id(v, &p))
            .max()
            .unwrap();
        assert_eq!(best.node, NodeId::from("A"));
    }

    #[test]
    fn least_random_vars_penalises_random_links() {
        let p = star();
        let b = Scoring::LeastRandomVars.score(&"B".into(), &p).unwrap();
        let c = Scoring::LeastRandomVars.score(&"C".into(), &p).unwrap();
        assert!(c > b);
    }

    #[test]
    fn var_name_ranks_by_name() {
        let p = star();
        let best = p
            .variables()
            .filter_map(|v| Scoring::VarName.root_id(v, &p))
            .max()
            .unwrap();
        assert_eq!(best.node, NodeId::from("D"));
    }

    #[test]
    fn names_parse_and_display() {
        for s in [Scoring::VarName, Scoring::MostConnected, Scoring::LeastConnected, Scoring::LeastRandomVars] {
            assert_eq!(s.to_string().parse::<Scoring>(), Ok(s));
        }
        assert!("fanciest".parse::<Scoring>().is_err());
    }
}
