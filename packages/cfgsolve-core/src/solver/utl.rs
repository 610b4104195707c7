//! UTL ("until-list") solver: no automaton is built at all. Satisfiability
//! and classification are decided by a reverse-topological dataflow over
//! the SCC condensation of the CFG, where each fact records how much of
//! each ordered `obsYes` vector (including the flattened crash stack) a
//! path from `p` to the crash node has already been able to discharge.
//!
//! Because an SCC can bundle several CFG nodes into one supernode, "any
//! member of the SCC satisfies the pending symbol" — this is strictly less
//! precise than the automaton solvers and is the reason the driver offers
//! a refinement comparator instead of requiring exact agreement.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rayon::prelude::*;

use crate::cfg_model::CfgModel;
use crate::errors::{Result, SolveError};
use crate::failure_report::{CrashStack, Group, StackFrame, YesVector};
use crate::solver::{Classification, ExecutionSolver};

pub struct UtlSolver<'a> {
    model: &'a CfgModel,
    /// Private working copy of the CFG's flattened successor view
    /// (the same call/return-routed view [`CfgModel::cfg_successors`]
    /// gives FSA), mutated by `encodeObsNo` removing nodes.
    nodes: HashSet<String>,
    succ: HashMap<String, Vec<String>>,
    entry_id: String,
    crash_node: Option<String>,
    crash_vector: Option<Vec<String>>,
    yes_vectors: Vec<Vec<String>>,
    crash_encoded: bool,
    seen_yes: HashSet<String>,
    seen_no: HashSet<String>,
}

impl<'a> UtlSolver<'a> {
    pub fn new(model: &'a CfgModel) -> Self {
        let nodes: HashSet<String> = model.node_ids().map(str::to_string).collect();
        let succ: HashMap<String, Vec<String>> = nodes
            .iter()
            .map(|id| (id.clone(), model.cfg_successors(id)))
            .collect();
        Self {
            model,
            nodes,
            succ,
            entry_id: model.entry_id().to_string(),
            crash_node: None,
            crash_vector: None,
            yes_vectors: Vec::new(),
            crash_encoded: false,
            seen_yes: HashSet::new(),
            seen_no: HashSet::new(),
        }
    }

    fn flatten_crash_stack(stack: &CrashStack) -> Result<(Vec<String>, String)> {
        let mut flat = Vec::new();
        for frame in &stack.0 {
            let groups: Vec<&Group> = match frame {
                StackFrame::Call { entry, call } => vec![entry, call],
                StackFrame::Crash { crash } => vec![crash],
            };
            for g in groups {
                if g.len() != 1 {
                    return Err(SolveError::invalid_input(
                        "UTL solver requires singleton crash-stack frames (no ambiguity supported)",
                    ));
                }
                flat.push(g[0].clone());
            }
        }
        let crash_node = flat
            .last()
            .cloned()
            .ok_or_else(|| SolveError::invalid_input("crash stack is empty"))?;
        Ok((flat, crash_node))
    }

    fn all_vectors<'v>(&'v self, extra: Option<&'v [String]>) -> Vec<&'v [String]> {
        let mut v: Vec<&[String]> = Vec::with_capacity(self.yes_vectors.len() + 2);
        if let Some(c) = &self.crash_vector {
            v.push(c.as_slice());
        }
        for y in &self.yes_vectors {
            v.push(y.as_slice());
        }
        if let Some(e) = extra {
            v.push(e);
        }
        v
    }

    /// `isSat`/`entryCrashPath` of §4.6: build the SCC condensation of the
    /// subgraph restricted to nodes forward-reachable from entry and
    /// backward-reachable from the crash node (with `exclude` removed and
    /// `extra` appended as one more yes-vector), process it in reverse
    /// topological order peeling matched symbols, and check the entry
    /// SCC's residual is empty for every vector.
    fn entry_crash_path(&self, exclude: Option<&str>, extra: Option<&[String]>) -> Result<bool> {
        let Some(crash_node) = &self.crash_node else {
            // Before the crash is encoded: trivially sat iff entry is
            // still part of the graph (§4.3 preamble).
            return Ok(Some(self.entry_id.as_str()) != exclude && self.nodes.contains(&self.entry_id));
        };

        if Some(crash_node.as_str()) == exclude || !self.nodes.contains(crash_node) {
            return Ok(false);
        }
        if Some(self.entry_id.as_str()) == exclude || !self.nodes.contains(&self.entry_id) {
            return Ok(false);
        }

        let active: HashSet<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|&n| Some(n) != exclude)
            .collect();

        let succ_of = |n: &str| -> Vec<String> {
            self.succ
                .get(n)
                .map(|v| v.iter().filter(|s| active.contains(s.as_str())).cloned().collect())
                .unwrap_or_default()
        };

        let forward = reachable(&active, &self.entry_id, &succ_of);
        let mut pred: HashMap<&str, Vec<String>> = HashMap::new();
        for &n in &active {
            for s in succ_of(n) {
                pred.entry(&s[..]).or_default().push(n.to_string());
            }
        }
        // `pred` is keyed by borrowed strs pointing into `active`'s owned
        // node ids, which all outlive this function call via `self.nodes`.
        let pred_owned: HashMap<String, Vec<String>> = pred
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let backward = reachable(&active, crash_node, &|n: &str| {
            pred_owned.get(n).cloned().unwrap_or_default()
        });

        let subgraph: HashSet<&str> = forward.intersection(&backward).copied().collect();
        if !subgraph.contains(self.entry_id.as_str()) || !subgraph.contains(crash_node.as_str()) {
            return Ok(false);
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut ix_of: HashMap<&str, NodeIndex> = HashMap::new();
        for &n in &subgraph {
            ix_of.insert(n, graph.add_node(n));
        }
        for &n in &subgraph {
            for s in succ_of(n) {
                if let (Some(&a), Some(&b)) = (ix_of.get(n), ix_of.get(s.as_str())) {
                    graph.add_edge(a, b, ());
                }
            }
        }

        let components = petgraph::algo::tarjan_scc(&graph);
        let mut scc_of: HashMap<NodeIndex, usize> = HashMap::new();
        let mut members_of: Vec<HashSet<String>> = Vec::with_capacity(components.len());
        for (i, comp) in components.iter().enumerate() {
            let mut members = HashSet::new();
            for &ix in comp {
                scc_of.insert(ix, i);
                members.insert(graph[ix].to_string());
            }
            members_of.push(members);
        }

        let all_vecs = self.all_vectors(extra);
        let n_vecs = all_vecs.len();
        let mut b_fact: Vec<Option<Vec<Vec<String>>>> = vec![None; components.len()];

        for (i, comp) in components.iter().enumerate() {
            let contains_crash = comp.iter().any(|&ix| graph[ix] == crash_node.as_str());
            let a_fact: Vec<Vec<String>> = if contains_crash {
                all_vecs.iter().map(|v| v.to_vec()).collect()
            } else {
                let mut children: Vec<usize> = Vec::new();
                for &ix in comp {
                    for edge in graph.edges_directed(ix, Direction::Outgoing) {
                        let target_scc = scc_of[&edge.target()];
                        if target_scc != i && !children.contains(&target_scc) {
                            children.push(target_scc);
                        }
                    }
                }
                if children.is_empty() {
                    return Err(SolveError::invariant(
                        "UTL: non-crash SCC has no path toward the crash SCC after pruning",
                    ));
                }
                let mut combined = Vec::with_capacity(n_vecs);
                for vi in 0..n_vecs {
                    let mut candidate: Option<&Vec<String>> = None;
                    for &c in &children {
                        let Some(cb) = &b_fact[c] else {
                            return Err(SolveError::invariant("UTL: child SCC processed out of order"));
                        };
                        let fact = &cb[vi];
                        candidate = Some(match candidate {
                            None => fact,
                            Some(best) => {
                                if is_prefix(best, fact) {
                                    fact
                                } else if is_prefix(fact, best) {
                                    best
                                } else {
                                    return Ok(false);
                                }
                            }
                        });
                    }
                    combined.push(candidate.expect("children non-empty").clone());
                }
                combined
            };

            let members = &members_of[i];
            let b_fact_i: Vec<Vec<String>> = a_fact
                .into_iter()
                .map(|v| peel_trailing(v, members))
                .collect();
            b_fact[i] = Some(b_fact_i);
        }

        let entry_scc = scc_of
            .get(ix_of.get(self.entry_id.as_str()).expect("entry in subgraph"))
            .copied()
            .ok_or_else(|| SolveError::invariant("UTL: entry node missing from condensation"))?;
        let entry_b = b_fact[entry_scc]
            .as_ref()
            .ok_or_else(|| SolveError::invariant("UTL: entry SCC never processed"))?;
        Ok(entry_b.iter().all(|v| v.is_empty()))
    }
}

fn is_prefix(short: &[String], long: &[String]) -> bool {
    short.len() <= long.len() && short.as_ref() == &long[..short.len()]
}

fn peel_trailing(mut v: Vec<String>, scc_members: &HashSet<String>) -> Vec<String> {
    while let Some(last) = v.last() {
        if scc_members.contains(last) {
            v.pop();
        } else {
            break;
        }
    }
    v
}

/// BFS reachability over an arbitrary successor function, restricted to
/// `active`.
fn reachable<'s, F>(active: &HashSet<&'s str>, start: &'s str, succ: &F) -> HashSet<&'s str>
where
    F: Fn(&str) -> Vec<String>,
{
    let mut seen: HashSet<&str> = HashSet::new();
    if !active.contains(start) {
        return seen;
    }
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    while let Some(n) = queue.pop_front() {
        for s in succ(n) {
            if let Some(&owned) = active.get(s.as_str()) {
                if seen.insert(owned) {
                    queue.push_back(owned);
                }
            }
        }
    }
    seen
}

impl<'a> ExecutionSolver for UtlSolver<'a> {
    fn encode_crash(&mut self, crash_stack: &CrashStack) -> Result<()> {
        if self.crash_encoded {
            return Err(SolveError::invariant("encode_crash called more than once"));
        }
        let (flat, crash_node) = Self::flatten_crash_stack(crash_stack)?;
        self.crash_vector = Some(flat);
        self.crash_node = Some(crash_node);
        self.crash_encoded = true;

        if !self.entry_crash_path(None, None)? {
            return Err(SolveError::invariant(
                "crash is not reachable from entry under the encoded constraints",
            ));
        }
        Ok(())
    }

    fn encode_obs_no(&mut self, group: &Group) -> Result<()> {
        if group.len() != 1 {
            return Err(SolveError::invalid_input(
                "obsNo groups with more than one candidate are not supported",
            ));
        }
        let node = &group[0];
        self.seen_no.insert(node.clone());
        self.nodes.remove(node);
        self.succ.remove(node);
        for succs in self.succ.values_mut() {
            succs.retain(|s| s != node);
        }
        if !self.is_sat()? {
            tracing::debug!("obsNo encoding leaves no consistent execution");
        }
        Ok(())
    }

    fn encode_obs_yes(&mut self, vector: &YesVector) -> Result<()> {
        let mut flat = Vec::with_capacity(vector.0.len());
        for g in &vector.0 {
            if g.len() != 1 {
                return Err(SolveError::invalid_input(
                    "UTL solver only supports unambiguous (singleton) obsYes groups",
                ));
            }
            flat.push(g[0].clone());
        }
        self.seen_yes.extend(flat.iter().cloned());
        self.yes_vectors.push(flat);
        if !self.is_sat()? {
            tracing::debug!("obsYes encoding leaves no consistent execution");
        }
        Ok(())
    }

    fn is_sat(&self) -> Result<bool> {
        self.entry_crash_path(None, None)
    }

    fn find_known_execution(&mut self) -> Result<Classification> {
        let all_nodes: Vec<String> = self.model.node_ids().map(str::to_string).collect();
        let entry_id = self.entry_id.clone();
        let crash_node = self.crash_node.clone();

        let results: Vec<Result<(String, bool, bool)>> = all_nodes
            .par_iter()
            .map(|n| -> Result<(String, bool, bool)> {
                if !self.nodes.contains(n) {
                    return Ok((n.clone(), false, true));
                }
                let is_pinned = *n == entry_id || crash_node.as_deref() == Some(n.as_str());
                let possible_no = if is_pinned {
                    false
                } else {
                    self.entry_crash_path(Some(n), None)?
                };
                let extra = vec![n.clone()];
                let possible_yes = self.entry_crash_path(None, Some(&extra))?;
                Ok((n.clone(), possible_yes, possible_no))
            })
            .collect();

        let mut out = Classification::default();
        for r in results {
            let (n, possible_yes, possible_no) = r?;
            match (possible_yes, possible_no) {
                (true, false) => {
                    out.def_yes.insert(n);
                }
                (false, true) => {
                    out.def_no.insert(n);
                }
                (true, true) => {
                    out.maybe.insert(n);
                }
                (false, false) => {
                    return Err(SolveError::invariant(format!(
                        "node '{n}' is neither possibly executed nor possibly not executed"
                    )))
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg_model::{RawEdge, RawGraph, RawNode};
    use std::collections::HashMap as StdHashMap;

    fn node(id: &str, kind: &str) -> RawNode {
        RawNode {
            id: id.to_string(),
            kind: kind.to_string(),
            procedure: Some("main".to_string()),
            file: None,
            lines: Vec::new(),
            syntax: None,
            csi_label: None,
            attrs: StdHashMap::new(),
        }
    }

    fn flow(src: &str, dst: &str) -> RawEdge {
        RawEdge {
            source: src.to_string(),
            target: dst.to_string(),
            edge_type: "flow".to_string(),
            scope: None,
            key: None,
            when: None,
        }
    }

    fn linear_graph() -> CfgModel {
        let raw = RawGraph {
            nodes: vec![
                node("entry", "entry"),
                node("a", "expression"),
                node("b", "expression"),
                node("crash", "crash"),
            ],
            edges: vec![flow("entry", "a"), flow("a", "b"), flow("b", "crash")],
        };
        CfgModel::from_raw(raw).unwrap()
    }

    fn diamond_graph() -> CfgModel {
        let raw = RawGraph {
            nodes: vec![
                node("entry", "entry"),
                node("l", "expression"),
                node("r", "expression"),
                node("join", "expression"),
                node("crash", "crash"),
            ],
            edges: vec![
                flow("entry", "l"),
                flow("entry", "r"),
                flow("l", "join"),
                flow("r", "join"),
                flow("join", "crash"),
            ],
        };
        CfgModel::from_raw(raw).unwrap()
    }

    fn crash_stack_to(node_id: &str) -> CrashStack {
        CrashStack(vec![StackFrame::Crash {
            crash: vec![node_id.to_string()],
        }])
    }

    #[test]
    fn linear_cfg_all_def_yes() {
        let model = linear_graph();
        // Every interior node here has exactly one flow predecessor and
        // successor, so normalisation's basic-block collapse absorbs `a`
        // and `b` into `entry` (only the crash node is protected); what
        // survives is whatever node ids the model actually kept.
        let all_ids: HashSet<String> = model.node_ids().map(str::to_string).collect();
        let mut solver = UtlSolver::new(&model);
        solver.encode_crash(&crash_stack_to("crash")).unwrap();
        let c = solver.find_known_execution().unwrap();
        assert_eq!(c.def_yes, all_ids);
        assert!(c.def_no.is_empty());
        assert!(c.maybe.is_empty());
    }

    #[test]
    fn diamond_no_obs_branches_are_maybe() {
        let model = diamond_graph();
        let mut solver = UtlSolver::new(&model);
        solver.encode_crash(&crash_stack_to("crash")).unwrap();
        let c = solver.find_known_execution().unwrap();
        assert!(c.def_yes.contains("entry"));
        assert!(c.def_yes.contains("join"));
        assert!(c.def_yes.contains("crash"));
        assert!(c.maybe.contains("l"));
        assert!(c.maybe.contains("r"));
    }

    #[test]
    fn diamond_obs_yes_forces_left_branch() {
        let model = diamond_graph();
        let mut solver = UtlSolver::new(&model);
        solver.encode_crash(&crash_stack_to("crash")).unwrap();
        solver.encode_obs_yes(&YesVector(vec![vec!["l".to_string()]])).unwrap();
        let c = solver.find_known_execution().unwrap();
        assert!(c.def_yes.contains("l"));
        assert!(c.def_no.contains("r"));
    }

    #[test]
    fn diamond_obs_no_excludes_left_branch() {
        let model = diamond_graph();
        let mut solver = UtlSolver::new(&model);
        solver.encode_crash(&crash_stack_to("crash")).unwrap();
        solver.encode_obs_no(&vec!["l".to_string()]).unwrap();
        let c = solver.find_known_execution().unwrap();
        assert!(c.def_no.contains("l"));
        assert!(c.def_yes.contains("r"));
    }

    #[test]
    fn self_loop_then_obs_no_on_loop_node_is_unreachable() {
        let raw = RawGraph {
            nodes: vec![node("entry", "entry"), node("a", "expression"), node("crash", "crash")],
            edges: vec![flow("entry", "a"), flow("a", "a"), flow("a", "crash")],
        };
        let model = CfgModel::from_raw(raw).unwrap();
        let mut solver = UtlSolver::new(&model);
        solver.encode_crash(&crash_stack_to("crash")).unwrap();
        assert!(solver.encode_obs_no(&vec!["a".to_string()]).is_ok());
        assert!(!solver.is_sat().unwrap());
    }
}
