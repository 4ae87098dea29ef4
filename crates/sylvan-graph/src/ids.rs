//! Identifiers for variables, agents and candidate roots.

use std::fmt;

/// Name of a variable of the constraint graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Name of an agent owning a subset of the variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Seed for this agent's random draws, derived from the run-wide `seed`.
    ///
    /// Agents sharing a run-wide seed draw independent sequences, while a
    /// fixed seed still reproduces the same run.
    pub fn seed_from(&self, seed: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed.to_le_bytes());
        hasher.update(self.0.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AgentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifier of a candidate-root run: the election score of the candidate.
///
/// Ordered by score first, then by node name, so that every agent observes
/// the same total order without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RootId {
    pub score: i64,
    pub node: NodeId,
}

impl RootId {
    pub fn new(score: i64, node: impl Into<NodeId>) -> Self {
        Self {
            score,
            node: node.into(),
        }
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node, self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ids_order_by_score_then_name() {
        let low = RootId::new(5, "Z");
        let high = RootId::new(9, "A");
        assert!(high > low, "score dominates the name");

        let a = RootId::new(3, "A");
        let b = RootId::new(3, "B");
        assert!(b > a, "equal scores fall back to the name");
    }

    #[test]
    fn agent_seeds_differ_per_agent_and_are_stable() {
        let a1 = AgentId::from("a1");
        let a2 = AgentId::from("a2");
        assert_ne!(a1.seed_from(7), a2.seed_from(7));
        assert_ne!(a1.seed_from(7), a1.seed_from(8));
        assert_eq!(a1.seed_from(7), AgentId::from("a1").seed_from(7));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(RootId::new(-2, "X1").to_string(), "X1@-2");
        assert_eq!(NodeId::from("X1").to_string(), "X1");
    }
}
