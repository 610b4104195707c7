//! Normalised control-flow graph: nodes, typed edges, entry/exit/call-site/
//! crash classification, basic-block collapse, dominators.
//!
//! [`CfgModel`] is built once from a [`RawGraph`] and frozen; every solver
//! gets an immutable borrow of it and builds its own private working copy
//! of whatever it needs.

pub mod collapse;
pub mod dominators;
pub mod edge;
pub mod node;
pub mod normalize;
pub mod raw;

use std::collections::{BTreeSet, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;

pub use edge::{Edge, EdgeScope, EdgeType};
pub use node::{Node, NodeKind};
pub use raw::{RawEdge, RawGraph, RawNode};

use crate::errors::{Result, SolveError};

pub use dominators::Dominators;

/// A normalised, CFG-view-only graph.
pub struct CfgModel {
    graph: DiGraph<Node, Edge>,
    node_index: FxHashMap<String, NodeIndex>,
    /// Computed once in [`CfgModel::from_raw`]; exposed to callers that
    /// want dominator-based reporting, not consumed by the solvers
    /// themselves (they each build their own reachability view).
    dominators: Dominators,
    entry_id: String,
}

impl CfgModel {
    /// Build a frozen, normalised `CfgModel` from an already-parsed raw
    /// graph. Runs all nine normalisation phases described in the
    /// component design, then computes dominators.
    pub fn from_raw(raw: RawGraph) -> Result<Self> {
        let wip = normalize::run_pre_graph_phases(raw)?;
        let wip = normalize::phase7_combine_basic_blocks(wip);
        let normalize::WipGraph { mut nodes, edges } = wip;

        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut node_index: FxHashMap<String, NodeIndex> = FxHashMap::default();

        // is_cfg_node: has at least one incoming or outgoing flow edge.
        let has_flow: HashSet<&str> = edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Flow)
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();

        normalize::phase9_mark_implicit_returns(&mut nodes)?;

        let entry_nodes: Vec<&Node> = nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Entry))
            .collect();
        let entry_id = resolve_program_entry(&entry_nodes)?;

        nodes.retain(|n| has_flow.contains(n.id.as_str()) || n.id == entry_id);

        for n in nodes {
            let id = n.id.clone();
            let ix = graph.add_node(n);
            node_index.insert(id, ix);
        }

        let node_ids: HashSet<String> = node_index.keys().cloned().collect();
        for e in edges {
            if !node_ids.contains(&e.source) || !node_ids.contains(&e.target) {
                continue;
            }
            let s = node_index[&e.source];
            let t = node_index[&e.target];
            graph.add_edge(s, t, e);
        }

        validate_control_parentage(&graph, &node_index, &entry_id)?;

        let all_indices: Vec<NodeIndex> = graph.node_indices().collect();
        let entry_ix = node_index[&entry_id];
        let exit_indices: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&ix| matches!(graph[ix].kind, NodeKind::Exit))
            .collect();
        let dominators = dominators::compute(&graph, entry_ix, &exit_indices, &all_indices);

        Ok(Self {
            graph,
            node_index,
            dominators,
            entry_id,
        })
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Collapse an ambiguous crash-location group into one concrete node:
    /// add a fresh `crash`-kind node with a `flow/intra` edge in from every
    /// candidate in `crash_locations`, so every solver downstream deals
    /// with a single, unambiguous crash target. Runs once, before any
    /// solver is built, on the driver's one mutable pass over an otherwise
    /// frozen graph.
    pub fn with_synthetic_crash_node(&self, crash_locations: &[String]) -> Result<(CfgModel, String)> {
        if crash_locations.is_empty() {
            return Err(SolveError::invalid_input(
                "crash stack's final frame has no candidate crash nodes",
            ));
        }
        for loc in crash_locations {
            if !self.contains(loc) {
                return Err(SolveError::invalid_input(format!(
                    "crash candidate '{loc}' does not exist in the graph"
                )));
            }
        }

        let procedure = self
            .node(&crash_locations[0])
            .and_then(|n| n.procedure.clone());
        let new_id = self.fresh_node_id(procedure.as_deref());

        let mut nodes: Vec<Node> = self.graph.node_weights().cloned().collect();
        let mut edges: Vec<Edge> = self.graph.edge_weights().cloned().collect();

        nodes.push(Node {
            id: new_id.clone(),
            kind: NodeKind::Crash,
            procedure,
            file: None,
            lines: BTreeSet::new(),
            syntax: None,
            csi_label: None,
            uses_pp_all: false,
            collapsed_nodes: Vec::new(),
            implicit_return: false,
        });
        for loc in crash_locations {
            edges.push(Edge {
                source: loc.clone(),
                target: new_id.clone(),
                edge_type: EdgeType::Flow,
                scope: EdgeScope::Intraprocedural,
                key: None,
            });
        }

        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut node_index: FxHashMap<String, NodeIndex> = FxHashMap::default();
        for n in nodes {
            let id = n.id.clone();
            let ix = graph.add_node(n);
            node_index.insert(id, ix);
        }
        for e in edges {
            let s = node_index[&e.source];
            let t = node_index[&e.target];
            graph.add_edge(s, t, e);
        }

        let all_indices: Vec<NodeIndex> = graph.node_indices().collect();
        let entry_ix = node_index[&self.entry_id];
        let exit_indices: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&ix| matches!(graph[ix].kind, NodeKind::Exit))
            .collect();
        let dominators = dominators::compute(&graph, entry_ix, &exit_indices, &all_indices);

        let model = CfgModel {
            graph,
            node_index,
            dominators,
            entry_id: self.entry_id.clone(),
        };
        Ok((model, new_id))
    }

    /// An id of the form `n:<procedure-or-global>:<counter>` not already
    /// present in the graph, mirroring the synthetic-node ids the original
    /// tool mints for this same purpose.
    fn fresh_node_id(&self, procedure: Option<&str>) -> String {
        let scope = procedure.unwrap_or("global");
        let mut counter = 1000u64;
        loop {
            let candidate = format!("n:{scope}:{counter}");
            if !self.node_index.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&ix| &self.graph[ix])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.id.as_str())
    }

    pub fn by_function<'a>(&'a self, function_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes()
            .filter(move |n| n.procedure.as_deref() == Some(function_id))
    }

    pub fn by_csi_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes()
            .filter(move |n| n.csi_label.as_deref() == Some(label))
    }

    pub fn by_line(&self, line: u32) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |n| n.lines.contains(&line))
    }

    pub fn by_kind<'a>(&'a self, kind: &'a NodeKind) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes().filter(move |n| &n.kind == kind)
    }

    pub fn dominators(&self) -> &Dominators {
        &self.dominators
    }

    fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.node_index.get(id).copied()
    }

    /// True if the call-site has at least one outgoing `control/inter` edge.
    pub fn is_true_callsite(&self, id: &str) -> bool {
        let Some(ix) = self.index_of(id) else {
            return false;
        };
        if !matches!(self.graph[ix].kind, NodeKind::CallSite) {
            return false;
        }
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .any(|e| e.weight().is_control_inter())
    }

    /// Callee entry ids reached by a call-site's outgoing `control/inter` edges.
    pub fn callee_entries(&self, call_site_id: &str) -> Vec<String> {
        let Some(ix) = self.index_of(call_site_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .filter(|e| e.weight().is_control_inter())
            .map(|e| self.graph[e.target()].id.clone())
            .collect()
    }

    /// Return-site ids reached by an exit node's outgoing `control/inter`
    /// ("exit→return") edges.
    pub fn return_sites_for_exit(&self, exit_id: &str) -> Vec<String> {
        let Some(ix) = self.index_of(exit_id) else {
            return Vec::new();
        };
        if !matches!(self.graph[ix].kind, NodeKind::Exit) {
            return Vec::new();
        }
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .filter(|e| e.weight().is_control_inter())
            .map(|e| self.graph[e.target()].id.clone())
            .collect()
    }

    fn intra_flow_successors(&self, ix: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .filter(|e| e.weight().is_flow_intra())
            .map(|e| e.target())
            .collect()
    }

    /// Plain `flow/intra` successors of `id`, with none of the call/exit
    /// rewriting [`CfgModel::cfg_successors`] applies. The precise
    /// call/return matching solver (SVPA) needs this undistorted view: it
    /// does its own pushing and popping instead of having calls and exits
    /// flattened for it.
    pub fn intra_successors(&self, id: &str) -> Vec<String> {
        let Some(ix) = self.index_of(id) else {
            return Vec::new();
        };
        self.intra_flow_successors(ix)
            .into_iter()
            .map(|t| self.graph[t].id.clone())
            .collect()
    }

    /// The node a true call-site's control returns to once its callee's
    /// frame pops — its own single `flow/intra` successor (the
    /// "successor-of-call" of §3). `None` for a call-site with no local
    /// successor (e.g. a call in tail position).
    pub fn call_return_site(&self, call_site_id: &str) -> Option<String> {
        self.intra_successors(call_site_id).into_iter().next()
    }

    /// Flattened "effective successor" function used by solvers that don't
    /// do explicit call/return stack matching (FSA, UTL): call-sites route
    /// to callee entries instead of their local intra successor, and exits
    /// bridge back to their callers' return sites, per the invariants in
    /// the data model — this intentionally over-approximates true
    /// inter-procedural control flow, which is why FSA/UTL classifications
    /// only refine to "maybe" where SVPA's exact call/return matching would
    /// resolve further.
    pub fn cfg_successors(&self, id: &str) -> Vec<String> {
        let Some(ix) = self.index_of(id) else {
            return Vec::new();
        };
        let node = &self.graph[ix];

        if matches!(node.kind, NodeKind::Exit) {
            let mut out: Vec<String> = self
                .intra_flow_successors(ix)
                .into_iter()
                .map(|t| self.graph[t].id.clone())
                .collect();
            for ret_site in self.return_sites_for_exit(id) {
                let is_crash = self
                    .node(&ret_site)
                    .map(|n| matches!(n.kind, NodeKind::Crash))
                    .unwrap_or(false);
                if !is_crash {
                    out.push(ret_site);
                }
            }
            return out;
        }

        if self.is_true_callsite(id) {
            let callees = self.callee_entries(id);
            let callees_present = callees.iter().all(|c| self.contains(c));
            let mut out = callees;
            let intra: Vec<NodeIndex> = self.intra_flow_successors(ix);
            for t in intra {
                let tnode = &self.graph[t];
                let keep = !callees_present || matches!(tnode.kind, NodeKind::Crash);
                if keep {
                    out.push(tnode.id.clone());
                }
            }
            return out;
        }

        self.intra_flow_successors(ix)
            .into_iter()
            .map(|t| self.graph[t].id.clone())
            .collect()
    }

    pub fn cfg_predecessors(&self, id: &str) -> Vec<String> {
        self.node_ids()
            .filter(|&other| self.cfg_successors(other).iter().any(|s| s == id))
            .map(|s| s.to_string())
            .collect()
    }

    /// Merge single-entry/single-exit flow chains, preserving `exclude`
    /// and optionally refusing to merge true call-sites. Returns a new,
    /// independent `CfgModel`; the receiver is untouched so line-level
    /// reporting over the uncollapsed graph stays available.
    pub fn collapse_bb_nodes(&self, exclude: &HashSet<String>, combine_calls: bool) -> Result<CfgModel> {
        let nodes: Vec<Node> = self.graph.node_weights().cloned().collect();
        let edges: Vec<Edge> = self.graph.edge_weights().cloned().collect();
        let (nodes, edges) = collapse::collapse_fixed_point(nodes, edges, exclude, combine_calls);

        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut node_index: FxHashMap<String, NodeIndex> = FxHashMap::default();
        for n in nodes {
            let id = n.id.clone();
            let ix = graph.add_node(n);
            node_index.insert(id, ix);
        }
        let ids: HashSet<String> = node_index.keys().cloned().collect();
        for e in edges {
            if !ids.contains(&e.source) || !ids.contains(&e.target) {
                continue;
            }
            let s = node_index[&e.source];
            let t = node_index[&e.target];
            graph.add_edge(s, t, e);
        }

        let all_indices: Vec<NodeIndex> = graph.node_indices().collect();
        let entry_ix = *node_index
            .get(&self.entry_id)
            .ok_or_else(|| SolveError::invariant("entry node lost during basic-block collapse"))?;
        let exit_indices: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&ix| matches!(graph[ix].kind, NodeKind::Exit))
            .collect();
        let dominators = dominators::compute(&graph, entry_ix, &exit_indices, &all_indices);

        Ok(CfgModel {
            graph,
            node_index,
            dominators,
            entry_id: self.entry_id.clone(),
        })
    }

    /// Expand a classification computed over this (possibly collapsed)
    /// graph to the node ids it represents in some ancestor graph.
    pub fn add_collapsed_to_set(&self, set: &HashSet<String>) -> HashSet<String> {
        collapse::add_collapsed_to_set(self.graph.node_weights().collect::<Vec<_>>().as_slice(), set)
            .into_iter()
            .collect()
    }

    /// Restrict the graph to a single function's nodes (the `-intra` mode).
    /// Fails if the crashing function's crash node set spans more than one
    /// function — the per-file line reporting this feeds assumes exactly
    /// one function in the restricted view.
    pub fn restrict_to_function(&self, function_id: &str) -> Result<CfgModel> {
        let nodes: Vec<Node> = self
            .graph
            .node_weights()
            .filter(|n| n.procedure.as_deref() == Some(function_id) || n.id == self.entry_id)
            .cloned()
            .collect();
        let keep: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edges: Vec<Edge> = self
            .graph
            .edge_weights()
            .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
            .cloned()
            .collect();

        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut node_index: FxHashMap<String, NodeIndex> = FxHashMap::default();
        for n in nodes {
            let id = n.id.clone();
            let ix = graph.add_node(n);
            node_index.insert(id, ix);
        }
        for e in edges {
            let s = node_index[&e.source];
            let t = node_index[&e.target];
            graph.add_edge(s, t, e);
        }

        let entries: Vec<&Node> = graph
            .node_weights()
            .filter(|n| matches!(n.kind, NodeKind::Entry))
            .collect();
        let entry_id = resolve_program_entry(&entries)?;

        let all_indices: Vec<NodeIndex> = graph.node_indices().collect();
        let entry_ix = node_index[&entry_id];
        let exit_indices: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&ix| matches!(graph[ix].kind, NodeKind::Exit))
            .collect();
        let dominators = dominators::compute(&graph, entry_ix, &exit_indices, &all_indices);

        Ok(CfgModel {
            graph,
            node_index,
            dominators,
            entry_id,
        })
    }
}

fn resolve_program_entry(entry_nodes: &[&Node]) -> Result<String> {
    match entry_nodes.len() {
        0 => Err(SolveError::invariant("graph has no entry node")),
        1 => Ok(entry_nodes[0].id.clone()),
        _ => {
            let main_entries: Vec<&&Node> = entry_nodes
                .iter()
                .filter(|n| n.procedure.as_deref() == Some("main"))
                .collect();
            match main_entries.len() {
                1 => Ok(main_entries[0].id.clone()),
                0 => Err(SolveError::invariant(
                    "multiple entry nodes and no procedure named 'main' to disambiguate",
                )),
                _ => Err(SolveError::invariant("duplicate 'main' entry nodes")),
            }
        }
    }
}

fn validate_control_parentage(
    graph: &DiGraph<Node, Edge>,
    node_index: &FxHashMap<String, NodeIndex>,
    entry_id: &str,
) -> Result<()> {
    let entry_ix = node_index[entry_id];
    for ix in graph.node_indices() {
        if ix == entry_ix {
            continue;
        }
        let has_pred = graph
            .edges_directed(ix, Direction::Incoming)
            .any(|e| e.weight().edge_type == EdgeType::Flow || e.weight().is_control_inter());
        if !has_pred {
            return Err(SolveError::invariant(format!(
                "node '{}' has no control predecessor after graph fix-up",
                graph[ix].id
            )));
        }
    }
    Ok(())
}

/// All node ids in the graph, as an owned set — convenience for callers
/// validating a failure report against the graph.
pub fn all_ids(model: &CfgModel) -> BTreeSet<String> {
    model.node_ids().map(|s| s.to_string()).collect()
}
