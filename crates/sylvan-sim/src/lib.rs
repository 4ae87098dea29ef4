//! Sylvan Sim - Simulated Agent Networks
//!
//! Runs the pseudo-tree, LCA and sampling protocols over every agent of a
//! problem and gathers what they output.
//!
//! # Overview
//!
//! ## Deterministic network
//!
//! [`Simulation`] keeps one FIFO link per ordered pair of agents and
//! delivers from a randomly chosen link at each step. The choice is seeded,
//! so a failing interleaving can be replayed.
//!
//! ## Async runtime
//!
//! [`run_async`] spawns one tokio task per agent. Messages travel over
//! unbounded channels and the run ends when nothing is left in flight.
//!
//! # Example
//!
//! ```rust,ignore
//! use sylvan_sim::{Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::new(problem, SimulationConfig::default());
//! let report = sim.run()?;
//! println!("{}", report.dot().unwrap_or_default());
//! ```

mod agent;
mod config;
mod election;
mod error;
mod network;
mod report;
mod runtime;

pub use agent::{Agent, AgentOutbox, Payload, Record};
pub use config::SimulationConfig;
pub use election::{elect_roots, roots};
pub use error::{Error, Result};
pub use network::Simulation;
pub use report::Report;
pub use runtime::run_async;
