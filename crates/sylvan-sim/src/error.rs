//! Error types for sylvan-sim.

use sylvan_graph::AgentId;
use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a simulation.
#[derive(Debug, Error)]
pub enum Error {
    /// The problem description is invalid.
    #[error("problem error: {0}")]
    Graph(#[from] sylvan_graph::Error),

    /// An agent's DFS layer rejected a message.
    #[error("DFS error: {0}")]
    Dfs(#[from] sylvan_dfs::Error),

    /// An agent's LCA or sampling layer rejected a message.
    #[error("LCA error: {0}")]
    Lca(#[from] sylvan_lca::Error),

    /// A message was addressed to an agent that does not exist.
    #[error("unknown agent `{0}`")]
    UnknownAgent(AgentId),

    /// The network was still busy after the configured number of deliveries.
    #[error("no quiescence after {0} deliveries")]
    StepLimit(usize),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An agent task stopped abnormally.
    #[error("agent task failed: {0}")]
    Runtime(String),

    /// Reading a problem or configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A problem or configuration file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
