//! Deterministic single-threaded network.
//!
//! Each ordered pair of agents has a FIFO link. At every step a seeded RNG
//! picks one non-empty link and delivers its head, so runs are reproducible
//! while still exploring many interleavings across seeds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use sylvan_dfs::Message;
use sylvan_graph::{AgentId, NodeId, Problem};
use tracing::{debug, info, trace};

use crate::agent::{agents_for, Agent, AgentOutbox, Payload};
use crate::config::SimulationConfig;
use crate::election::elect_roots;
use crate::error::{Error, Result};
use crate::report::Report;

/// A simulated run over every agent of a problem.
#[derive(Debug)]
pub struct Simulation {
    problem: Problem,
    config: SimulationConfig,
    agents: BTreeMap<AgentId, Agent>,
    links: BTreeMap<(AgentId, AgentId), VecDeque<Payload>>,
    rng: StdRng,
    report: Report,
}

impl Simulation {
    pub fn new(problem: Problem, config: SimulationConfig) -> Self {
        Self::build(problem, config, None)
    }

    /// Also run the plain LCA protocol over `flags`.
    pub fn with_lca_flags(
        problem: Problem,
        config: SimulationConfig,
        flags: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    ) -> Self {
        Self::build(problem, config, Some(flags))
    }

    fn build(
        problem: Problem,
        config: SimulationConfig,
        flags: Option<&BTreeMap<NodeId, BTreeSet<NodeId>>>,
    ) -> Self {
        let agents = agents_for(&problem, &config, flags);
        Self {
            report: Report::new(&problem, &config),
            rng: StdRng::seed_from_u64(config.seed),
            problem,
            config,
            agents,
            links: BTreeMap::new(),
        }
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Start every agent, inject the election verdicts unless roots are
    /// arbitrated in parallel, and deliver messages until the network is
    /// quiet.
    pub fn run(&mut self) -> Result<&Report> {
        info!(
            agents = self.agents.len(),
            variables = self.problem.variable_count(),
            parallel = self.config.parallel,
            "Starting simulation"
        );
        let ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        for id in ids {
            let out = match self.agents.get_mut(&id) {
                Some(agent) => agent.start()?,
                None => return Err(Error::UnknownAgent(id)),
            };
            self.dispatch(&id, out);
        }
        if !self.config.parallel {
            for (to, msg) in elect_roots(&self.problem, self.config.dfs.election) {
                self.push(to.clone(), to, Payload::Dfs(msg));
            }
        }
        self.drain()?;
        info!(steps = self.report.steps, outputs = self.report.outputs.len(), "Simulation quiet");
        Ok(&self.report)
    }

    /// Tell every agent it is finished, which drops all of its state, and
    /// clear the report.
    pub fn reset(&mut self) -> Result<()> {
        let ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        for id in ids {
            self.push(id.clone(), id, Payload::Dfs(Message::AgentFinished));
        }
        self.drain()?;
        self.report.clear(&self.problem, &self.config);
        Ok(())
    }

    fn push(&mut self, from: AgentId, to: AgentId, payload: Payload) {
        self.links.entry((from, to)).or_default().push_back(payload);
    }

    fn dispatch(&mut self, from: &AgentId, out: AgentOutbox) {
        for (to, payload) in out.sends {
            self.push(from.clone(), to, payload);
        }
        for payload in out.deferred {
            self.push(from.clone(), from.clone(), payload);
        }
        for record in out.records {
            self.report.record(record);
        }
    }

    fn drain(&mut self) -> Result<()> {
        let mut delivered = 0usize;
        loop {
            let Some(link) = self
                .links
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(k, _)| k.clone())
                .choose(&mut self.rng)
            else {
                break;
            };
            let Some(payload) = self.links.get_mut(&link).and_then(VecDeque::pop_front) else {
                continue;
            };
            delivered += 1;
            if delivered > self.config.max_steps {
                debug!(max_steps = self.config.max_steps, "Step limit reached");
                return Err(Error::StepLimit(self.config.max_steps));
            }
            let to = link.1;
            trace!(from = %link.0, to = %to, "Delivering");
            let out = match self.agents.get_mut(&to) {
                Some(agent) => agent.handle(payload)?,
                None => return Err(Error::UnknownAgent(to)),
            };
            self.dispatch(&to, out);
        }
        self.links.retain(|_, q| !q.is_empty());
        self.report.steps += delivered;
        Ok(())
    }
}
