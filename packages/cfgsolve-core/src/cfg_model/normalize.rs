//! The normalisation pipeline that turns a [`RawGraph`](super::raw::RawGraph)
//! into the node/edge lists [`super::CfgModel`] builds its graph from.
//!
//! Phases 1-7 operate on flat node/edge lists before any graph structure
//! exists (mirroring how the source data arrives: attribute bags, not a
//! traversable graph yet); phase 8 (dominators) and phase 9 (implicit
//! return marking) run after [`super::CfgModel::from_raw`] has built the
//! petgraph graph, since both need real successor/predecessor lookups.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::cfg_model::edge::{Edge, EdgeScope, EdgeType};
use crate::cfg_model::node::{Node, NodeKind};
use crate::cfg_model::raw::RawGraph;
use crate::errors::{Result, SolveError};

/// Sentinel def/use marker applied to global-formal/global-actual nodes
/// (phase 1). The original attribute name ("PP_ALL") is kept as a constant
/// purely because it's the string other tooling downstream may still
/// expect to see echoed back in diagnostics.
pub const PP_ALL: &str = "PP_ALL";

pub struct WipGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

fn parse_edge_type(s: &str) -> EdgeType {
    match s {
        "control" => EdgeType::Control,
        "data" => EdgeType::Data,
        _ => EdgeType::Flow,
    }
}

fn parse_edge_scope(s: Option<&str>) -> EdgeScope {
    match s {
        Some("interprocedural") | Some("inter") => EdgeScope::Interprocedural,
        _ => EdgeScope::Intraprocedural,
    }
}

/// Phases 1-7: flat list transforms that don't need a traversable graph.
pub fn run_pre_graph_phases(raw: RawGraph) -> Result<WipGraph> {
    let mut nodes: Vec<Node> = raw
        .nodes
        .iter()
        .map(|n| Node {
            id: n.id.clone(),
            kind: NodeKind::from_raw(&n.kind),
            procedure: n.procedure.clone(),
            file: n.file.clone(),
            lines: n.lines.iter().copied().collect(),
            syntax: n.syntax.clone(),
            csi_label: n.csi_label.clone(),
            uses_pp_all: false,
            collapsed_nodes: Vec::new(),
            implicit_return: false,
        })
        .collect();

    let mut edges: Vec<Edge> = raw
        .edges
        .iter()
        .map(|e| Edge {
            source: e.source.clone(),
            target: e.target.clone(),
            edge_type: parse_edge_type(&e.edge_type),
            scope: parse_edge_scope(e.scope.as_deref()),
            key: e.key.clone(),
        })
        .collect();

    let raw_when: HashMap<(String, String), Option<String>> = raw
        .edges
        .iter()
        .map(|e| ((e.source.clone(), e.target.clone()), e.when.clone()))
        .collect();

    phase1_global_sentinel(&mut nodes);
    phase2_explode_auxiliary(&mut nodes, &mut edges);
    phase3_close_call_and_ternary_ranges(&mut nodes, &edges);
    phase4_merge_compound_statement_lines(&mut nodes, &edges);
    phase5_extend_do_loop_lines_backward(&mut nodes, &edges);
    phase6_strip_false_edges_and_decls(&mut nodes, &mut edges, &raw_when);

    Ok(WipGraph { nodes, edges })
}

/// Phase 1: global-formal/global-actual nodes get a sentinel use/def set.
fn phase1_global_sentinel(nodes: &mut [Node]) {
    for n in nodes.iter_mut() {
        if n.kind.is_global_formal_or_actual() {
            n.uses_pp_all = true;
        }
    }
}

/// Phase 2: explode auxiliary nodes into a cross-product of `data` edges
/// between their predecessors and successors, then delete the aux node.
fn phase2_explode_auxiliary(nodes: &mut Vec<Node>, edges: &mut Vec<Edge>) {
    let aux_ids: HashSet<String> = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Auxiliary))
        .map(|n| n.id.clone())
        .collect();
    if aux_ids.is_empty() {
        return;
    }

    let mut new_edges = Vec::new();
    for aux in &aux_ids {
        let preds: Vec<String> = edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Data && &e.target == aux)
            .map(|e| e.source.clone())
            .collect();
        let succs: Vec<String> = edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Data && &e.source == aux)
            .map(|e| e.target.clone())
            .collect();
        for p in &preds {
            for s in &succs {
                new_edges.push(Edge {
                    source: p.clone(),
                    target: s.clone(),
                    edge_type: EdgeType::Data,
                    scope: EdgeScope::Intraprocedural,
                    key: None,
                });
            }
        }
    }

    edges.retain(|e| !aux_ids.contains(&e.source) && !aux_ids.contains(&e.target));
    edges.extend(new_edges);
    nodes.retain(|n| !aux_ids.contains(&n.id));
}

/// Phase 3: close line-number ranges of call-sites and ternaries — every
/// node whose lines intersect a call/ternary's {min..=max} span is extended
/// to cover the whole span (debug-info ambiguity).
fn phase3_close_call_and_ternary_ranges(nodes: &mut [Node], _edges: &[Edge]) {
    let spans: Vec<(u32, u32)> = nodes
        .iter()
        .filter(|n| {
            matches!(n.kind, NodeKind::CallSite)
                || n.syntax.as_deref() == Some("ternary")
        })
        .filter_map(|n| {
            let min = n.lines.iter().min().copied()?;
            let max = n.lines.iter().max().copied()?;
            if min == max {
                None
            } else {
                Some((min, max))
            }
        })
        .collect();
    if spans.is_empty() {
        return;
    }
    for n in nodes.iter_mut() {
        for &(lo, hi) in &spans {
            if n.lines.iter().any(|&l| l >= lo && l <= hi) {
                n.lines.extend(lo..=hi);
            }
        }
    }
}

/// Phase 4: merge line sets of multi-line compound statements of the same
/// syntax kind across consecutive flow edges, to a fixed point.
fn phase4_merge_compound_statement_lines(nodes: &mut [Node], edges: &[Edge]) {
    const COMPOUND: &[&str] = &["if", "while", "for", "do", "switch"];
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, n) in nodes.iter().enumerate() {
        index.insert(n.id.clone(), i);
    }

    loop {
        let mut changed = false;
        for e in edges {
            if e.edge_type != EdgeType::Flow {
                continue;
            }
            let (Some(&si), Some(&ti)) = (index.get(&e.source), index.get(&e.target)) else {
                continue;
            };
            if si == ti {
                continue;
            }
            let same_syntax = match (&nodes[si].syntax, &nodes[ti].syntax) {
                (Some(a), Some(b)) => a == b && COMPOUND.contains(&a.as_str()),
                _ => false,
            };
            if !same_syntax {
                continue;
            }
            let src_lines = nodes[si].lines.clone();
            let tgt_lines = nodes[ti].lines.clone();
            let merged: BTreeSet<u32> = src_lines.union(&tgt_lines).copied().collect();
            if merged.len() != src_lines.len() {
                nodes[si].lines = merged.clone();
                changed = true;
            }
            if merged.len() != tgt_lines.len() {
                nodes[ti].lines = merged;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Phase 5: for `do`-loops, extend lines backward over lines with no
/// matching CFG node, so a trailing `while(cond)` is attributable to the
/// loop node.
fn phase5_extend_do_loop_lines_backward(nodes: &mut [Node], _edges: &[Edge]) {
    let covered: BTreeSet<u32> = nodes.iter().flat_map(|n| n.lines.iter().copied()).collect();
    for n in nodes.iter_mut() {
        if n.syntax.as_deref() != Some("do") {
            continue;
        }
        let Some(&min) = n.lines.iter().min() else {
            continue;
        };
        let mut line = min;
        while line > 0 && !covered.contains(&(line - 1)) {
            line -= 1;
            n.lines.insert(line);
        }
    }
}

/// Phase 6: remove `when="false"` control edges out of jump/return/switch-case
/// nodes, and delete `decl` nodes entirely.
fn phase6_strip_false_edges_and_decls(
    nodes: &mut Vec<Node>,
    edges: &mut Vec<Edge>,
    raw_when: &HashMap<(String, String), Option<String>>,
) {
    let jump_like: HashSet<String> = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Jump | NodeKind::Return | NodeKind::SwitchCase))
        .map(|n| n.id.clone())
        .collect();

    edges.retain(|e| {
        if e.edge_type != EdgeType::Control || !jump_like.contains(&e.source) {
            return true;
        }
        let when = raw_when
            .get(&(e.source.clone(), e.target.clone()))
            .and_then(|w| w.as_deref());
        when != Some("false")
    });

    let decl_ids: HashSet<String> = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Decl))
        .map(|n| n.id.clone())
        .collect();
    if !decl_ids.is_empty() {
        edges.retain(|e| !decl_ids.contains(&e.source) && !decl_ids.contains(&e.target));
        nodes.retain(|n| !decl_ids.contains(&n.id));
    }
}

/// Phase 7: combine basic blocks — merge nodes whose outgoing-flow count is
/// 1 and whose successor's incoming-flow count is 1. This is the same
/// fixed-point rule as [`super::collapse::collapse_bb_nodes`] with
/// `combine_calls = false`; it runs once, unconditionally, as part of
/// normalisation, before the caller's own (optional) later collapse pass
/// with its own exclude set. Crash nodes are always excluded here: they are
/// external observation points (§4.1) and must keep their own id through
/// normalisation even when they sit mid-chain, since a `FailureReport`'s
/// crash stack is validated against node ids that exist *before* any
/// caller-controlled collapse has run.
pub fn phase7_combine_basic_blocks(wip: WipGraph) -> WipGraph {
    let WipGraph { nodes, edges } = wip;
    let crash_ids: HashSet<String> = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Crash))
        .map(|n| n.id.clone())
        .collect();
    let (nodes, edges) = crate::cfg_model::collapse::collapse_fixed_point(nodes, edges, &crash_ids, false);
    WipGraph { nodes, edges }
}

/// Phase 9: mark as implicit-return each `return` node whose lines are a
/// subset of some exit node's lines in the same function.
pub fn phase9_mark_implicit_returns(nodes: &mut [Node]) -> Result<()> {
    let mut exit_lines_by_proc: HashMap<String, Vec<BTreeSet<u32>>> = HashMap::new();
    for n in nodes.iter() {
        if matches!(n.kind, NodeKind::Exit) {
            if let Some(proc) = &n.procedure {
                exit_lines_by_proc
                    .entry(proc.clone())
                    .or_default()
                    .push(n.lines.clone());
            }
        }
    }

    for n in nodes.iter_mut() {
        if !matches!(n.kind, NodeKind::Return) {
            continue;
        }
        let Some(proc) = n.procedure.clone() else {
            continue;
        };
        let Some(exit_sets) = exit_lines_by_proc.get(&proc) else {
            continue;
        };
        if exit_sets
            .iter()
            .any(|exit_lines| n.lines.is_subset(exit_lines))
        {
            n.implicit_return = true;
        }
    }
    Ok(())
}

/// Sanity check invoked once the graph has been built: every `RawGraph`
/// reference in a failure report must resolve to a node that survived
/// normalisation — this function just validates id existence on demand, it
/// doesn't itself normalise anything.
pub fn validate_known_node(node_ids: &HashSet<String>, id: &str) -> Result<()> {
    if node_ids.contains(id) {
        Ok(())
    } else {
        Err(SolveError::invalid_input(format!(
            "node '{id}' referenced by failure report does not exist in the graph"
        )))
    }
}
