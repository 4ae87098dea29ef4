//! Sylvan DFS - Distributed Pseudo-Tree Generation
//!
//! Agents that each own a few variables of a constraint graph cooperate to
//! build a DFS pseudo-tree of it: a spanning tree in which every constraint
//! edge joins a node to one of its ancestors. Each node ends up with a
//! [`DfsView`] of its parent, children, pseudo-parents and pseudo-children.
//!
//! # Overview
//!
//! ## Token passing
//!
//! [`DfsGeneration`] walks a single token through each component, starting
//! from an elected root:
//!
//! - **CHILD**: hands the token to an open neighbour, or returns it upwards
//! - **PSEUDO**: answers a token that came back through a back edge
//! - **Deferral**: a heuristic that cannot decide yet has the message re-queued
//!
//! ## Parallel arbitration
//!
//! [`ParallelDfsGeneration`] skips the election. Every local maximum of the
//! election score starts its own run; dominated runs die where they meet a
//! better-scored variable, and the surviving run releases its outputs from
//! the root downwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use sylvan_dfs::{DfsConfig, DfsGeneration, DfsProtocol, Message, RootNotification};
//!
//! let mut dfs = DfsGeneration::new(subproblem, DfsConfig::default());
//! let mut pending = dfs.start()?.sends;
//! pending.extend(dfs.handle(Message::Root(RootNotification { root, node, is_root: true }))?.sends);
//! // deliver `pending` to the owning agents until every node has output its view
//! ```

mod check;
mod config;
mod error;
mod generation;
pub mod heuristic;
mod message;
pub mod order;
mod parallel;
mod stats;
mod view;

pub use check::{check_spaces, check_tree};
pub use config::{DfsConfig, HeuristicKind, OrderConfig};
pub use error::{Error, Result};
pub use generation::{DfsGeneration, DfsProtocol, Phase};
pub use heuristic::{BlindScoring, ChildChoiceHeuristic, LocalRandVars, ScoreBroadcasting};
pub use message::{
    ChildToken, DfsEvent, DfsOutput, HeuristicMessage, Message, OrderOutput, Outbox, PseudoToken,
    RootNotification,
};
pub use order::OrderTracker;
pub use parallel::{ParallelDfsGeneration, RunStatus};
pub use stats::{dfs_to_dot, DotRenderer, StatsCollector};
pub use view::{DfsView, Parent, Relation};
