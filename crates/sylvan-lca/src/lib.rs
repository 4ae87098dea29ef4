//! Sylvan LCA - Lowest Common Ancestors and Sampling Placement
//!
//! Once a pseudo-tree is known, some variables carry *flags* (for instance
//! the random variables of the constraints they enforce). For each flag this
//! crate finds the deepest node whose subtree contains every node carrying
//! it.
//!
//! # Overview
//!
//! ## Two phases
//!
//! - **Phase 1**: reports climb from the leaves. A node that hears of the same
//!   flag from two children, or from a child and itself, is a candidate LCA.
//! - **Phase 2**: the roots send down the flags that are still unresolved. A
//!   flag resolved at or above a node is removed from the node's candidates.
//!
//! ## Sampling
//!
//! [`SamplingPhase`] reuses both phases to carry sample proposals up and
//! chosen samples down, deciding where each random variable is sampled and
//! projected out.
//!
//! # Example
//!
//! ```rust,ignore
//! use sylvan_lca::{LcaEvent, LowestCommonAncestors};
//!
//! let mut lca = LowestCommonAncestors::new(subproblem, flags);
//! let out = lca.on_dfs_output(&dfs_output)?;
//! for event in out.events {
//!     if let LcaEvent::Output(o) = event {
//!         println!("{} is the LCA of {:?}", o.node, o.lcas);
//!     }
//! }
//! ```

mod error;
mod lca;
pub mod sampling;
mod stats;

pub use error::{Error, Result};
pub use lca::{LcaEvent, LcaMessage, LcaOutbox, LcaOutput, LcaPolicy, LowestCommonAncestors, NodeInfo, PlainLca};
pub use sampling::{Placement, SamplingConfig, SamplingPhase, SamplingPolicy, WhereToProject};
pub use stats::{dfs_to_dot_with_rand_vars, SamplingStats};
