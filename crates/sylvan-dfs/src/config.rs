//! Configuration of DFS generation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sylvan_graph::{Scoring, Subproblem};
use tracing::warn;

use crate::heuristic::{BlindScoring, ChildChoiceHeuristic, LocalRandVars, ScoreBroadcasting};

/// Which child-choice heuristic to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "snake_case"))]
pub enum HeuristicKind {
    /// Scores computed locally; neighbours whose score is unknown rank last.
    BlindScoring,
    /// Scores announced by neighbouring agents before any choice is made.
    #[default]
    ScoreBroadcasting,
}

impl HeuristicKind {
    /// Parse a heuristic name, falling back to the default with a warning.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            let fallback = Self::default();
            warn!(heuristic = name, fallback = %fallback, "Unknown DFS heuristic, using default");
            fallback
        })
    }
}

impl fmt::Display for HeuristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlindScoring => f.write_str("blind_scoring"),
            Self::ScoreBroadcasting => f.write_str("score_broadcasting"),
        }
    }
}

impl FromStr for HeuristicKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blind_scoring" => Ok(Self::BlindScoring),
            "score_broadcasting" => Ok(Self::ScoreBroadcasting),
            other => Err(other.to_string()),
        }
    }
}

/// Visitation-order tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderConfig {
    /// Minimum increment of declared orders; jitter is drawn in
    /// `[min_incr - 1, 2 * min_incr - 2]`.
    pub min_incr: u32,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { min_incr: 1 }
    }
}

/// Configuration for DFS generation on one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct DfsConfig {
    /// Child-choice heuristic.
    pub heuristic: HeuristicKind,
    /// Scores used by the child-choice heuristic.
    pub scoring: Scoring,
    /// Scores used to elect candidate roots.
    pub election: Scoring,
    /// Prefer children sharing random variables, breaking ties with `heuristic`.
    pub prefer_shared_random_vars: bool,
    /// Include constraints over random variables in each node's spaces.
    pub with_random_vars: bool,
    /// Track declared visitation orders and the component size.
    pub with_order: Option<OrderConfig>,
    /// Run-wide seed for the order jitter. Each agent draws from its own
    /// stream derived from it with [`AgentId::seed_from`].
    ///
    /// [`AgentId::seed_from`]: sylvan_graph::AgentId::seed_from
    pub seed: u64,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            heuristic: HeuristicKind::default(),
            scoring: Scoring::MostConnected,
            election: Scoring::VarName,
            prefer_shared_random_vars: false,
            with_random_vars: false,
            with_order: None,
            seed: 0,
        }
    }
}

impl DfsConfig {
    /// Set the child-choice heuristic.
    #[must_use]
    pub fn with_heuristic(mut self, heuristic: HeuristicKind) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Set the child-choice scores.
    #[must_use]
    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set the root election scores.
    #[must_use]
    pub fn with_election(mut self, election: Scoring) -> Self {
        self.election = election;
        self
    }

    /// Track visitation orders.
    #[must_use]
    pub fn with_order(mut self, min_incr: u32) -> Self {
        self.with_order = Some(OrderConfig {
            min_incr: min_incr.max(1),
        });
        self
    }

    /// Keep constraints over random variables in the spaces.
    #[must_use]
    pub fn with_random_vars(mut self) -> Self {
        self.with_random_vars = true;
        self
    }

    /// Order children by shared random variables, elect roots linked to the
    /// fewest random variables, and keep random constraints in the spaces.
    #[must_use]
    pub fn local_rand_vars(mut self) -> Self {
        self.prefer_shared_random_vars = true;
        self.with_random_vars = true;
        self.election = Scoring::LeastRandomVars;
        self
    }

    /// Set the seed of the order jitter.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Instantiate the configured child-choice heuristic for one agent.
    pub fn build_heuristic(&self, subproblem: Arc<Subproblem>) -> Box<dyn ChildChoiceHeuristic> {
        let base: Box<dyn ChildChoiceHeuristic> = match self.heuristic {
            HeuristicKind::BlindScoring => Box::new(BlindScoring::new(Arc::clone(&subproblem), self.scoring)),
            HeuristicKind::ScoreBroadcasting => {
                Box::new(ScoreBroadcasting::new(Arc::clone(&subproblem), self.scoring))
            }
        };
        if self.prefer_shared_random_vars {
            Box::new(LocalRandVars::new(subproblem, base))
        } else {
            base
        }
    }
}
