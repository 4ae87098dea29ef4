//! DOT rendering of a pseudo-tree together with its random variables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use sylvan_dfs::{DfsOutput, DfsView, DotRenderer};
use sylvan_graph::NodeId;
use tracing::warn;

const BACK_EDGE: &str = "[style = \"dashed\" arrowhead = \"none\" weight=\"0.5\"]";

/// Render a pseudo-tree with the random variables each node is linked to.
///
/// A node that projects out random variables is drawn in a cluster with
/// them. With `proj_at_leaves` every projecting node gets private copies
/// named `R_X`; otherwise a random variable is linked to every node below
/// (or at) the node that projects it.
pub fn dfs_to_dot_with_rand_vars(
    views: &BTreeMap<NodeId, DfsView>,
    rand_vars: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    projections: &BTreeMap<NodeId, BTreeSet<NodeId>>,
    proj_at_leaves: bool,
) -> String {
    let empty = BTreeSet::new();
    let projected = |node: &NodeId| projections.get(node).unwrap_or(&empty);

    let mut out = String::from("digraph {\n\tnode [shape = \"circle\"];\n\n");
    for (node, view) in views {
        let mine = projected(node);
        if mine.is_empty() {
            let _ = writeln!(out, "\t{node} [label = \"{node}\" style=\"filled\"];");
        } else {
            let _ = writeln!(out, "\tsubgraph cluster_{node} {{");
            let _ = writeln!(out, "\t\t{node} [label = \"{node}\" style=\"filled\"];");
            for r in mine {
                if proj_at_leaves {
                    let _ = writeln!(out, "\t\t{r}_{node} [label = \"{r}\"];");
                } else {
                    let _ = writeln!(out, "\t\t{r} [label = \"{r}\"];");
                }
            }
            out.push_str("\t}\n");
        }

        if let Some(parent) = view.parent() {
            let _ = writeln!(out, "\t{parent} -> {node};");
        }
        for pp in view.pseudo_parents() {
            let _ = writeln!(out, "\t{pp} -> {node} {BACK_EDGE};");
        }

        for r in rand_vars.get(node).unwrap_or(&empty) {
            if proj_at_leaves {
                if mine.contains(r) {
                    let _ = writeln!(out, "\t{node} -> {r}_{node} {BACK_EDGE};");
                }
                continue;
            }
            let mut ancestor = Some(node);
            let mut hops = 0;
            while let Some(a) = ancestor {
                if projected(a).contains(r) {
                    let _ = writeln!(out, "\t{r} -> {node} {BACK_EDGE};");
                    break;
                }
                ancestor = views.get(a).and_then(|v| v.parent());
                hops += 1;
                if hops > views.len() {
                    break;
                }
            }
        }
        out.push('\n');
    }
    out.push('}');
    out
}

/// Collects DFS outputs and projection decisions until every variable has
/// reported both, then renders the annotated pseudo-tree.
pub struct SamplingStats {
    total: usize,
    proj_at_leaves: bool,
    rand_vars: BTreeMap<NodeId, BTreeSet<NodeId>>,
    views: BTreeMap<NodeId, DfsView>,
    projections: BTreeMap<NodeId, BTreeSet<NodeId>>,
    renderer: Option<Box<dyn DotRenderer>>,
    dot: Option<String>,
}

impl std::fmt::Debug for SamplingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingStats")
            .field("total", &self.total)
            .field("views", &self.views.len())
            .field("projections", &self.projections.len())
            .finish()
    }
}

impl SamplingStats {
    /// `rand_vars` gives, for each variable, the random variables it is
    /// linked to.
    pub fn new(rand_vars: BTreeMap<NodeId, BTreeSet<NodeId>>, proj_at_leaves: bool) -> Self {
        Self {
            total: rand_vars.len(),
            proj_at_leaves,
            rand_vars,
            views: BTreeMap::new(),
            projections: BTreeMap::new(),
            renderer: None,
            dot: None,
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn DotRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn record_dfs(&mut self, output: DfsOutput) -> Option<String> {
        self.views.insert(output.node, output.view);
        self.try_render()
    }

    pub fn record_projection(&mut self, node: NodeId, rand_vars: BTreeSet<NodeId>) -> Option<String> {
        self.projections.insert(node, rand_vars);
        self.try_render()
    }

    pub fn projections(&self) -> &BTreeMap<NodeId, BTreeSet<NodeId>> {
        &self.projections
    }

    pub fn dot(&self) -> Option<&str> {
        self.dot.as_deref()
    }

    fn try_render(&mut self) -> Option<String> {
        if self.dot.is_some() || self.views.len() < self.total || self.projections.len() < self.total {
            return None;
        }
        let dot = dfs_to_dot_with_rand_vars(&self.views, &self.rand_vars, &self.projections, self.proj_at_leaves);
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.render(&dot) {
                warn!(error = %e, "DOT renderer failed, disabling it");
                self.renderer = None;
            }
        }
        self.dot = Some(dot.clone());
        Some(dot)
    }
}
