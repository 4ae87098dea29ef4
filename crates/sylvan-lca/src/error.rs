//! Error types for sylvan-lca.

use sylvan_graph::NodeId;
use thiserror::Error;

/// Result type for LCA and sampling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during the LCA protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// A message targets a variable this agent does not own.
    #[error("variable `{0}` is not owned by this agent")]
    NotOwned(NodeId),

    /// No owning agent is known for a tree neighbour.
    #[error("no known owner for variable `{0}`")]
    UnknownOwner(NodeId),
}
