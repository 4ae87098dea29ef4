//! DOT rendering and statistics gathering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sylvan_graph::NodeId;
use tracing::warn;

use crate::message::DfsOutput;
use crate::view::DfsView;

/// Render a pseudo-tree in the DOT language.
///
/// Tree edges point from parent to child; back edges are dashed and
/// undirected.
pub fn dfs_to_dot(views: &BTreeMap<NodeId, DfsView>) -> String {
    let mut out = String::from("digraph {\n\tnode [shape = \"circle\"];\n\n");
    for (node, view) in views {
        let _ = writeln!(out, "\t{node} [style=\"filled\"];");
        if let Some(parent) = view.parent() {
            let _ = writeln!(out, "\t{parent} -> {node};");
        }
        for pp in view.pseudo_parents() {
            let _ = writeln!(
                out,
                "\t{pp} -> {node} [style = \"dashed\" arrowhead = \"none\" weight=\"0.5\"];"
            );
        }
        out.push('\n');
    }
    out.push('}');
    out
}

/// Consumer of rendered DOT strings, e.g. a graph viewer.
pub trait DotRenderer: Send {
    fn render(&mut self, dot: &str) -> Result<(), String>;
}

/// Collects DFS outputs until every variable has reported, then renders the
/// whole pseudo-tree.
#[derive(Default)]
pub struct StatsCollector {
    total: usize,
    views: BTreeMap<NodeId, DfsView>,
    renderer: Option<Box<dyn DotRenderer>>,
    dot: Option<String>,
}

impl std::fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCollector")
            .field("total", &self.total)
            .field("received", &self.views.len())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl StatsCollector {
    /// Expect outputs for `total` variables.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn DotRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Record one output. Returns the DOT rendering once all variables have
    /// reported.
    ///
    /// A second output for a variable starts a new tree: the views of the
    /// previous one are forgotten.
    pub fn record(&mut self, output: DfsOutput) -> Option<String> {
        if self.views.contains_key(&output.node) {
            self.views.clear();
            self.dot = None;
        }
        self.views.insert(output.node, output.view);
        if self.views.len() < self.total {
            return None;
        }
        let dot = dfs_to_dot(&self.views);
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.render(&dot) {
                warn!(error = %e, "DOT renderer failed, disabling it");
                self.renderer = None;
            }
        }
        self.dot = Some(dot.clone());
        Some(dot)
    }

    pub fn views(&self) -> &BTreeMap<NodeId, DfsView> {
        &self.views
    }

    /// Latest complete rendering.
    pub fn dot(&self) -> Option<&str> {
        self.dot.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.views.len() >= self.total
    }
}
