//! Error types for sylvan-dfs.

use sylvan_graph::{NodeId, RootId};
use thiserror::Error;

/// Result type for pseudo-tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or checking a pseudo-tree.
#[derive(Debug, Error)]
pub enum Error {
    /// A neighbour would end up in two relations at once. Indicates a
    /// protocol or heuristic bug, never a runtime condition.
    #[error("structural violation at `{node}`: `{neighbor}` {detail}")]
    Structural {
        node: NodeId,
        neighbor: NodeId,
        detail: String,
    },

    /// Parallel generation starts its own runs; it was handed a root
    /// notification other than the one for `node`'s own candidacy.
    #[error("`{node}` cannot take external root notification for run `{root}` in parallel generation")]
    ExternalRoot { node: NodeId, root: RootId },

    /// No owning agent is known for a variable a message must reach.
    #[error("no known owner for variable `{0}`")]
    UnknownOwner(NodeId),

    /// A message targets a variable this agent does not own.
    #[error("variable `{0}` is not owned by this agent")]
    NotOwned(NodeId),

    /// A set of views does not form a consistent pseudo-tree.
    #[error("inconsistent pseudo-tree: {0}")]
    Inconsistent(String),

    /// The underlying graph model rejected an operation.
    #[error("graph error: {0}")]
    Graph(#[from] sylvan_graph::Error),
}
