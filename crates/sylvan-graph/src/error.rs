//! Error types for sylvan-graph.

use thiserror::Error;

use crate::ids::NodeId;

/// Result type for constraint graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or querying a constraint graph.
#[derive(Debug, Error)]
pub enum Error {
    /// A constraint or law refers to a variable that was never declared.
    #[error("unknown variable `{0}`")]
    UnknownVariable(NodeId),

    /// A variable name was declared twice.
    #[error("variable `{0}` is declared twice")]
    DuplicateVariable(NodeId),

    /// A constraint with an empty scope.
    #[error("constraint `{0}` has an empty scope")]
    EmptyScope(String),

    /// A probability law that cannot be sampled.
    #[error("invalid probability law for `{node}`: {reason}")]
    InvalidLaw { node: NodeId, reason: &'static str },
}
