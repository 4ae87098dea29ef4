//! One simulated agent: a DFS layer, optionally topped by an LCA or sampling
//! layer fed with the DFS outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sylvan_dfs::{DfsEvent, DfsGeneration, DfsProtocol, Message, Outbox, ParallelDfsGeneration};
use sylvan_graph::{AgentId, NodeId, Problem, Samples, Subproblem};
use sylvan_lca::{LcaEvent, LcaMessage, LcaOutbox, LowestCommonAncestors, PlainLca, SamplingPhase};
use tracing::{trace, warn};

use crate::config::SimulationConfig;
use crate::error::Result;

/// Anything travelling between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Dfs(Message),
    Lca(LcaMessage<()>),
    Sampling(LcaMessage<Samples>),
}

/// Results surfaced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Dfs(DfsEvent),
    Lca(LcaEvent),
}

/// Effects of one agent step.
#[derive(Debug, Default)]
pub struct AgentOutbox {
    pub sends: Vec<(AgentId, Payload)>,
    /// To re-enqueue at the tail of the agent's own queue.
    pub deferred: Vec<Payload>,
    pub records: Vec<Record>,
}

impl AgentOutbox {
    fn absorb_lca<D>(&mut self, out: LcaOutbox<D>, wrap: fn(LcaMessage<D>) -> Payload) {
        self.sends.extend(out.sends.into_iter().map(|(to, m)| (to, wrap(m))));
        self.records.extend(out.events.into_iter().map(Record::Lca));
    }
}

#[derive(Debug)]
enum UpperLayer {
    None,
    Lca(LowestCommonAncestors<PlainLca>),
    Sampling(SamplingPhase),
}

/// A simulated agent.
#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    dfs: Box<dyn DfsProtocol>,
    upper: UpperLayer,
}

impl Agent {
    /// `lca_flags` turns on the plain LCA layer over the given flags; it is
    /// ignored when sampling is configured.
    pub fn new(
        subproblem: Arc<Subproblem>,
        config: &SimulationConfig,
        lca_flags: Option<&BTreeMap<NodeId, BTreeSet<NodeId>>>,
    ) -> Self {
        let dfs_config = config.effective_dfs();
        let dfs: Box<dyn DfsProtocol> = if config.parallel {
            Box::new(ParallelDfsGeneration::new(Arc::clone(&subproblem), dfs_config))
        } else {
            Box::new(DfsGeneration::new(Arc::clone(&subproblem), dfs_config))
        };
        let upper = match (config.sampling, lca_flags) {
            (Some(sampling), _) => UpperLayer::Sampling(SamplingPhase::new(Arc::clone(&subproblem), sampling)),
            (None, Some(flags)) => {
                let mine = flags
                    .iter()
                    .filter(|(node, _)| subproblem.owns(node))
                    .map(|(node, f)| (node.clone(), f.clone()))
                    .collect();
                UpperLayer::Lca(LowestCommonAncestors::new(Arc::clone(&subproblem), mine))
            }
            (None, None) => UpperLayer::None,
        };
        Self {
            id: subproblem.agent().clone(),
            dfs,
            upper,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn start(&mut self) -> Result<AgentOutbox> {
        let mut out = AgentOutbox::default();
        let started = self.dfs.start()?;
        self.absorb_dfs(started, &mut out)?;
        if let UpperLayer::Sampling(sampling) = &mut self.upper {
            out.absorb_lca(sampling.start(), Payload::Sampling);
        }
        Ok(out)
    }

    pub fn handle(&mut self, payload: Payload) -> Result<AgentOutbox> {
        let mut out = AgentOutbox::default();
        match payload {
            Payload::Dfs(Message::AgentFinished) => {
                trace!(agent = %self.id, "Agent finished, resetting");
                let handled = self.dfs.handle(Message::AgentFinished)?;
                self.absorb_dfs(handled, &mut out)?;
                self.reset_upper();
            }
            Payload::Dfs(msg) => {
                let handled = self.dfs.handle(msg)?;
                self.absorb_dfs(handled, &mut out)?;
            }
            Payload::Lca(msg) => match &mut self.upper {
                UpperLayer::Lca(lca) => out.absorb_lca(lca.handle(msg)?, Payload::Lca),
                _ => warn!(agent = %self.id, "LCA message without an LCA layer, dropping"),
            },
            Payload::Sampling(msg) => match &mut self.upper {
                UpperLayer::Sampling(sampling) => out.absorb_lca(sampling.handle(msg)?, Payload::Sampling),
                _ => warn!(agent = %self.id, "Sampling message without a sampling layer, dropping"),
            },
        }
        Ok(out)
    }

    fn absorb_dfs(&mut self, dfs_out: Outbox, out: &mut AgentOutbox) -> Result<()> {
        out.sends
            .extend(dfs_out.sends.into_iter().map(|(to, m)| (to, Payload::Dfs(m))));
        out.deferred.extend(dfs_out.deferred.into_iter().map(Payload::Dfs));
        for event in dfs_out.events {
            if let DfsEvent::Output(output) = &event {
                match &mut self.upper {
                    UpperLayer::None => {}
                    UpperLayer::Lca(lca) => out.absorb_lca(lca.on_dfs_output(output)?, Payload::Lca),
                    UpperLayer::Sampling(sampling) => {
                        out.absorb_lca(sampling.on_dfs_output(output)?, Payload::Sampling)
                    }
                }
            }
            out.records.push(Record::Dfs(event));
        }
        Ok(())
    }

    fn reset_upper(&mut self) {
        match &mut self.upper {
            UpperLayer::None => {}
            UpperLayer::Lca(lca) => lca.reset(),
            UpperLayer::Sampling(sampling) => sampling.reset(),
        }
    }
}

/// One agent per agent of `problem`, each seeing its own subproblem.
pub fn agents_for(
    problem: &Problem,
    config: &SimulationConfig,
    lca_flags: Option<&BTreeMap<NodeId, BTreeSet<NodeId>>>,
) -> BTreeMap<AgentId, Agent> {
    problem
        .agents()
        .into_iter()
        .map(|a| {
            let sub = Arc::new(problem.subproblem(&a));
            (a, Agent::new(sub, config, lca_flags))
        })
        .collect()
}
