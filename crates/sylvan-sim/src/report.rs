//! Everything the agents surfaced during a run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use sylvan_dfs::{DfsEvent, DfsOutput, DfsView, DotRenderer, OrderOutput, StatsCollector};
use sylvan_graph::{NodeId, Problem, Samples, Topology};
use sylvan_lca::{LcaEvent, SamplingStats, WhereToProject};

use crate::agent::Record;
use crate::config::SimulationConfig;

/// Outcome of a simulated run.
#[derive(Debug)]
pub struct Report {
    /// Every DFS output, in delivery order.
    pub outputs: Vec<DfsOutput>,
    /// Latest view of each variable.
    pub views: BTreeMap<NodeId, DfsView>,
    pub orders: BTreeMap<NodeId, OrderOutput>,
    /// Component size, as learnt by each variable.
    pub totals: BTreeMap<NodeId, u32>,
    /// LCA set of each variable.
    pub lcas: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Random variables each variable projects out.
    pub projections: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Samples per random variable, per variable that fixed them.
    pub samples: BTreeMap<NodeId, BTreeMap<NodeId, Samples>>,
    /// Messages delivered.
    pub steps: usize,
    stats: StatsCollector,
    sampling_stats: Option<SamplingStats>,
}

impl Report {
    pub fn new(problem: &Problem, config: &SimulationConfig) -> Self {
        let mut sampling_stats = config.sampling.map(|s| {
            let rand_vars = problem
                .variables()
                .map(|n| (n.clone(), problem.random_neighbors(n).cloned().unwrap_or_default()))
                .collect();
            SamplingStats::new(rand_vars, s.projection() == WhereToProject::Leaves)
        });
        let mut stats = StatsCollector::new(problem.variable_count());
        if let Some(path) = &config.dot_file {
            let file = Box::new(DotFile(path.clone()));
            match sampling_stats.take() {
                Some(s) => sampling_stats = Some(s.with_renderer(file)),
                None => stats = stats.with_renderer(file),
            }
        }
        Self {
            outputs: Vec::new(),
            views: BTreeMap::new(),
            orders: BTreeMap::new(),
            totals: BTreeMap::new(),
            lcas: BTreeMap::new(),
            projections: BTreeMap::new(),
            samples: BTreeMap::new(),
            steps: 0,
            stats,
            sampling_stats,
        }
    }

    pub fn record(&mut self, record: Record) {
        match record {
            Record::Dfs(DfsEvent::Output(output)) => {
                self.views.insert(output.node.clone(), output.view.clone());
                self.outputs.push(output);
            }
            Record::Dfs(DfsEvent::Stats(output)) => {
                if let Some(stats) = self.sampling_stats.as_mut() {
                    stats.record_dfs(output.clone());
                }
                self.stats.record(output);
            }
            Record::Dfs(DfsEvent::Order(order)) => {
                self.orders.insert(order.node.clone(), order);
            }
            Record::Dfs(DfsEvent::VariableCount { node, total, .. }) => {
                self.totals.insert(node, total);
            }
            Record::Lca(LcaEvent::Output(output)) => {
                self.lcas.insert(output.node, output.lcas);
            }
            Record::Lca(LcaEvent::RandVarsProj { node, rand_vars }) => {
                if let Some(stats) = self.sampling_stats.as_mut() {
                    stats.record_projection(node.clone(), rand_vars.clone());
                }
                self.projections.insert(node, rand_vars);
            }
            Record::Lca(LcaEvent::SampleFixed {
                node,
                rand_var,
                samples,
            }) => {
                self.samples.entry(rand_var).or_default().insert(node, samples);
            }
        }
    }

    /// DOT rendering of the pseudo-tree, annotated with random variables
    /// when sampling ran.
    pub fn dot(&self) -> Option<&str> {
        match &self.sampling_stats {
            Some(stats) => stats.dot().or_else(|| self.stats.dot()),
            None => self.stats.dot(),
        }
    }

    /// Forget everything but the step count.
    pub fn clear(&mut self, problem: &Problem, config: &SimulationConfig) {
        let steps = self.steps;
        *self = Self::new(problem, config);
        self.steps = steps;
    }
}

/// Writes the completed DOT rendering to a file.
struct DotFile(PathBuf);

impl DotRenderer for DotFile {
    fn render(&mut self, dot: &str) -> Result<(), String> {
        std::fs::write(&self.0, dot).map_err(|e| format!("{}: {e}", self.0.display()))
    }
}
