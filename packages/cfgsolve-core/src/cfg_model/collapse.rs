//! Basic-block collapse: merging single-entry/single-exit flow chains into
//! one node, and expanding a classification back out again.

use std::collections::{HashMap, HashSet};

use crate::cfg_model::edge::{Edge, EdgeType};
use crate::cfg_model::node::{Node, NodeKind};

/// Merge flow edge `src -> target` whenever `target` is not entry/exit,
/// neither endpoint is excluded, (if `!combine_calls`) neither is a true
/// call-site, `src` has exactly one flow-out edge and `target` has exactly
/// one flow-in edge. Repeats to a fixed point. Returns the collapsed
/// node/edge lists; `Node::collapsed_nodes` on the surviving node records
/// everything absorbed into it, in merge order.
pub fn collapse_fixed_point(
    mut nodes: Vec<Node>,
    mut edges: Vec<Edge>,
    exclude: &HashSet<String>,
    combine_calls: bool,
) -> (Vec<Node>, Vec<Edge>) {
    loop {
        let flow_out_count = count_by(&edges, |e| e.edge_type == EdgeType::Flow, |e| &e.source);
        let flow_in_count = count_by(&edges, |e| e.edge_type == EdgeType::Flow, |e| &e.target);

        let true_callsites: HashSet<String> = if combine_calls {
            HashSet::new()
        } else {
            true_callsite_ids(&nodes, &edges)
        };

        let mut merge: Option<(String, String)> = None;
        for e in edges.iter().filter(|e| e.edge_type == EdgeType::Flow) {
            let (src, target) = (&e.source, &e.target);
            if src == target {
                continue;
            }
            if exclude.contains(src) || exclude.contains(target) {
                continue;
            }
            if true_callsites.contains(src) || true_callsites.contains(target) {
                continue;
            }
            let target_node = nodes.iter().find(|n| &n.id == target);
            let Some(target_node) = target_node else {
                continue;
            };
            if matches!(target_node.kind, NodeKind::Entry | NodeKind::Exit) {
                continue;
            }
            if flow_out_count.get(src).copied().unwrap_or(0) == 1
                && flow_in_count.get(target).copied().unwrap_or(0) == 1
            {
                merge = Some((src.clone(), target.clone()));
                break;
            }
        }

        let Some((src_id, target_id)) = merge else {
            break;
        };
        merge_into(&mut nodes, &mut edges, &src_id, &target_id);
    }
    (nodes, edges)
}

fn count_by<'a, F, K>(edges: &'a [Edge], pred: F, key: K) -> HashMap<String, usize>
where
    F: Fn(&&Edge) -> bool,
    K: Fn(&'a Edge) -> &'a String,
{
    let mut counts = HashMap::new();
    for e in edges.iter().filter(pred) {
        *counts.entry(key(e).clone()).or_insert(0usize) += 1;
    }
    counts
}

fn true_callsite_ids(nodes: &[Node], edges: &[Edge]) -> HashSet<String> {
    let has_inter_control: HashSet<&str> = edges
        .iter()
        .filter(|e| e.is_control_inter())
        .map(|e| e.source.as_str())
        .collect();
    nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::CallSite) && has_inter_control.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Move `target`'s outgoing edges onto `src`, append `target`'s lines, id
/// and collapsed-list into `src`, then delete `target`.
fn merge_into(nodes: &mut Vec<Node>, edges: &mut Vec<Edge>, src_id: &str, target_id: &str) {
    for e in edges.iter_mut() {
        if e.source == target_id {
            e.source = src_id.to_string();
        }
        if e.target == target_id {
            // Incoming edges to target already point at src by construction
            // (target had exactly one flow predecessor, which is src); any
            // non-flow edge into target is retargeted too so nothing dangles.
            e.target = src_id.to_string();
        }
    }
    edges.retain(|e| !(e.source == src_id && e.target == src_id));

    let target_idx = nodes.iter().position(|n| n.id == target_id);
    if let Some(ti) = target_idx {
        let target = nodes.remove(ti);
        if let Some(src) = nodes.iter_mut().find(|n| n.id == src_id) {
            src.lines.extend(target.lines.iter().copied());
            src.collapsed_nodes.push(target.id.clone());
            src.collapsed_nodes.extend(target.collapsed_nodes);
        }
    }
}

/// Expand a classification set over a collapsed graph to the node ids it
/// represents in the original, uncollapsed graph.
pub fn add_collapsed_to_set(nodes: &[Node], set: &HashSet<String>) -> HashSet<String> {
    let mut out = HashSet::new();
    for n in nodes {
        if set.contains(&n.id) {
            out.insert(n.id.clone());
            out.extend(n.collapsed_nodes.iter().cloned());
        }
    }
    out
}
