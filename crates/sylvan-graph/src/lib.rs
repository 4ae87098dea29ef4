//! Sylvan Constraint Graph
//!
//! The problem model shared by every Sylvan crate: variables partitioned
//! across agents, constraints reduced to their scopes, and auxiliary random
//! variables with discrete probability laws.
//!
//! # Views
//!
//! A [`Problem`] is the global graph. Each agent only ever works from its
//! [`Subproblem`]: its own variables, their neighbourhoods, the owners of
//! those neighbours and the constraints touching them. Both implement
//! [`Topology`] and [`ConstraintIndex`], the two narrow interfaces the
//! pseudo-tree protocols consume.
//!
//! # Scores
//!
//! Root election and child ordering compare variables through [`Scoring`]
//! heuristics. Scores are wrapped into a [`RootId`], which breaks ties by
//! variable name so that every agent sees the same total order.

mod error;
mod ids;
mod law;
mod problem;
pub mod random;
mod scoring;

pub use error::{Error, Result};
pub use ids::{AgentId, NodeId, RootId};
pub use law::{combine_samples, down_sample, ProbabilityLaw, Samples};
pub use problem::{Constraint, ConstraintIndex, Problem, ProblemDescription, Subproblem, Topology};
pub use random::RandomProblem;
pub use scoring::{Scoring, UnknownScoring};
