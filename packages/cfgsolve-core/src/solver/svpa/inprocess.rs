//! In-process SVPA transport: an explicit-stack product search, run
//! directly as a Rust library call instead of round-tripping to a
//! subprocess.
//!
//! Each search state is `(node, overlay fact, call stack)`, where the call
//! stack is the sequence of pending return-sites a true call-site pushed —
//! only the matching exit may pop one. That's the one piece of precision
//! [`crate::cfg_model::CfgModel::cfg_successors`] (the flattened view FSA
//! and UTL both use) can't express: a return taken at the wrong call site.
//! A BFS from entry collects every reachable state; a backward trace from
//! the accepting ones (the same technique as
//! [`crate::solver::fsa::FsaSolver`]) recovers which nodes lie on some
//! accepting, stack-matched path.
//!
//! Call depth is capped at [`MAX_CALL_DEPTH`]. The tabulation algorithm the
//! design notes describe memoises a procedure's (entry-fact → exit-fact)
//! summary once and reuses it at every call site, which gives it
//! effectively unbounded recursion depth for free; this transport instead
//! explores the literal stack; it needs a ceiling to guarantee
//! termination on recursive CFGs. A crash stack's own frame count already
//! bounds the call depth that matters for classification, so the cap only
//! ever discards recursion that isn't on a path to the crash at all.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::cfg_model::{CfgModel, NodeKind};
use crate::errors::{Result, SolveError};
use crate::failure_report::Group;
use crate::solver::observation::ObsComponent;
use crate::solver::svpa::transport::SvpaTransport;
use crate::solver::Classification;

const MAX_CALL_DEPTH: usize = 96;
const MAX_VISITED_STATES: usize = 2_000_000;

type Fact = Vec<BTreeSet<usize>>;
type Stack = Vec<Option<String>>;
type StateKey = (String, Fact, Stack);

pub struct InProcessTransport<'a> {
    model: &'a CfgModel,
    overlays: Vec<ObsComponent>,
}

impl<'a> InProcessTransport<'a> {
    pub fn new(model: &'a CfgModel) -> Self {
        Self {
            model,
            overlays: Vec::new(),
        }
    }

    fn initial_fact(&self) -> Fact {
        self.overlays.iter().map(|o| o.initial_states()).collect()
    }

    fn step_fact(&self, fact: &Fact, symbol: &str) -> Option<Fact> {
        let mut next = Vec::with_capacity(self.overlays.len());
        for (o, s) in self.overlays.iter().zip(fact.iter()) {
            let n = o.step(s, symbol);
            if n.is_empty() {
                return None;
            }
            next.push(n);
        }
        Some(next)
    }

    fn is_accepting(&self, fact: &Fact) -> bool {
        self.overlays.iter().zip(fact.iter()).all(|(o, s)| o.is_satisfied(s))
    }

    /// All `(next_node, next_stack)` pairs reachable from `(node, stack)`
    /// in one CFG step, with call/return matched precisely against the
    /// explicit stack rather than flattened.
    fn transitions(&self, node: &str, stack: &Stack) -> Vec<(String, Stack)> {
        let mut out = Vec::new();
        let is_exit = matches!(self.model.node(node).map(|n| &n.kind), Some(NodeKind::Exit));

        if is_exit {
            if let Some(top) = stack.last() {
                let ret_slot = top.clone();
                let mut popped = stack.clone();
                popped.pop();
                if let Some(ret_site) = ret_slot {
                    out.push((ret_site, popped));
                }
                // A `None` slot means this frame was pushed by a call with
                // no local successor (tail position): it never returns
                // anywhere, so there's nothing to add for this pop.
            }
            // Graphs occasionally carry a genuine flow edge out of an exit
            // node directly; honour it regardless of the call stack.
            for s in self.model.intra_successors(node) {
                out.push((s, stack.clone()));
            }
            return out;
        }

        if self.model.is_true_callsite(node) {
            let callees = self.model.callee_entries(node);
            let callees_present = !callees.is_empty() && callees.iter().all(|c| self.model.contains(c));
            if callees_present && stack.len() < MAX_CALL_DEPTH {
                let ret_site = self.model.call_return_site(node);
                for callee_entry in &callees {
                    let mut pushed = stack.clone();
                    pushed.push(ret_site.clone());
                    out.push((callee_entry.clone(), pushed));
                }
            }
            // §3 exemption: callee missing from the graph, or the local
            // successor is a crash node — both bypass the call.
            for s in self.model.intra_successors(node) {
                let is_crash = matches!(self.model.node(&s).map(|n| &n.kind), Some(NodeKind::Crash));
                if !callees_present || is_crash {
                    out.push((s, stack.clone()));
                }
            }
            return out;
        }

        for s in self.model.intra_successors(node) {
            out.push((s, stack.clone()));
        }
        out
    }

    fn reachable(&self, exclude: Option<&str>) -> (HashSet<StateKey>, Vec<StateKey>) {
        let entry = self.model.entry_id().to_string();
        let f0 = self.initial_fact();
        let Some(f_entry) = self.step_fact(&f0, &entry) else {
            return (HashSet::new(), Vec::new());
        };
        let start: StateKey = (entry.clone(), f_entry, Vec::new());

        let mut visited: HashSet<StateKey> = HashSet::new();
        let mut queue: VecDeque<StateKey> = VecDeque::new();
        let mut accepting = Vec::new();

        if Some(entry.as_str()) != exclude {
            visited.insert(start.clone());
            queue.push_back(start);
        }

        while let Some((node, fact, stack)) = queue.pop_front() {
            if self.is_accepting(&fact) {
                accepting.push((node.clone(), fact.clone(), stack.clone()));
            }
            if visited.len() >= MAX_VISITED_STATES {
                warn!("SVPA in-process transport hit the visited-state cap ({MAX_VISITED_STATES}); truncating search");
                break;
            }
            for (next_node, next_stack) in self.transitions(&node, &stack) {
                if Some(next_node.as_str()) == exclude {
                    continue;
                }
                let Some(next_fact) = self.step_fact(&fact, &next_node) else {
                    continue;
                };
                let key = (next_node, next_fact, next_stack);
                if visited.insert(key.clone()) {
                    queue.push_back(key);
                }
            }
        }

        (visited, accepting)
    }

    /// Nodes that lie on some entry-to-accepting, stack-matched path —
    /// the SVPA analogue of [`crate::solver::fsa::FsaSolver`]'s
    /// `nodes_on_some_accepting_path`.
    fn nodes_on_some_accepting_path(&self, exclude: Option<&str>) -> HashSet<String> {
        let (visited, accepting) = self.reachable(exclude);
        if accepting.is_empty() {
            return HashSet::new();
        }

        let mut preds: HashMap<StateKey, Vec<StateKey>> = HashMap::new();
        for (node, fact, stack) in visited.iter() {
            for (next_node, next_stack) in self.transitions(node, stack) {
                if Some(next_node.as_str()) == exclude {
                    continue;
                }
                let Some(next_fact) = self.step_fact(fact, &next_node) else {
                    continue;
                };
                let key = (next_node, next_fact, next_stack);
                if visited.contains(&key) {
                    preds
                        .entry(key)
                        .or_default()
                        .push((node.clone(), fact.clone(), stack.clone()));
                }
            }
        }

        let mut seen: HashSet<StateKey> = accepting.iter().cloned().collect();
        let mut queue: VecDeque<StateKey> = accepting.into_iter().collect();
        let mut on_path: HashSet<String> = HashSet::new();
        while let Some(key) = queue.pop_front() {
            on_path.insert(key.0.clone());
            if let Some(ps) = preds.get(&key) {
                for p in ps {
                    if seen.insert(p.clone()) {
                        queue.push_back(p.clone());
                    }
                }
            }
        }
        on_path
    }
}

impl<'a> SvpaTransport for InProcessTransport<'a> {
    fn encode_crash(&mut self, flattened_groups: &[Group]) -> Result<()> {
        self.overlays.push(ObsComponent::yes(flattened_groups, true));
        if self.nodes_on_some_accepting_path(None).is_empty() {
            return Err(SolveError::invariant(
                "crash is not reachable from entry under any stack-matched execution",
            ));
        }
        Ok(())
    }

    fn encode_obs_no(&mut self, group: &Group) -> Result<()> {
        if group.len() > 1 {
            return Err(SolveError::invalid_input(
                "obsNo groups with more than one candidate are not supported",
            ));
        }
        self.overlays.push(ObsComponent::no(group));
        if !self.is_sat()? {
            debug!("obsNo encoding leaves no consistent stack-matched execution");
        }
        Ok(())
    }

    fn encode_obs_yes(&mut self, groups: &[Group]) -> Result<()> {
        self.overlays.push(ObsComponent::yes(groups, false));
        if !self.is_sat()? {
            debug!("obsYes encoding leaves no consistent stack-matched execution");
        }
        Ok(())
    }

    fn is_sat(&self) -> Result<bool> {
        Ok(!self.nodes_on_some_accepting_path(None).is_empty())
    }

    fn find_known_execution(&mut self) -> Result<Classification> {
        let all_nodes: Vec<String> = self.model.node_ids().map(str::to_string).collect();
        let yes_nodes = self.nodes_on_some_accepting_path(None);

        let mut out = Classification::default();
        for n in &all_nodes {
            let possible_yes = yes_nodes.contains(n);
            let possible_no = !self.nodes_on_some_accepting_path(Some(n)).is_empty();
            match (possible_yes, possible_no) {
                (true, false) => {
                    out.def_yes.insert(n.clone());
                }
                (false, true) => {
                    out.def_no.insert(n.clone());
                }
                (true, true) => {
                    out.maybe.insert(n.clone());
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
    use crate::failure_report::{CrashStack, StackFrame, YesVector};
    use crate::solver::ExecutionSolver;
    use crate::solver::svpa::SvpaSolver;
    use std::collections::HashMap as StdHashMap;

    fn node(id: &str, kind: &str, procedure: &str) -> RawNode {
        RawNode {
            id: id.to_string(),
            kind: kind.to_string(),
            procedure: Some(procedure.to_string()),
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

    fn call(src: &str, dst: &str) -> RawEdge {
        RawEdge {
            source: src.to_string(),
            target: dst.to_string(),
            edge_type: "control".to_string(),
            scope: Some("interprocedural".to_string()),
            key: None,
            when: None,
        }
    }

    /// `main` calls `f` twice (at two different call-sites); `f` crashes
    /// on one invocation. SVPA must only ever treat the call-site that
    /// actually led to the crash stack as reachable-to-crash; a flattened
    /// view (FSA/UTL's `cfg_successors`) cannot distinguish the two calls'
    /// return sites from each other.
    fn two_call_sites_graph() -> CfgModel {
        let raw = RawGraph {
            nodes: vec![
                node("main_entry", "entry", "main"),
                node("c1", "call-site", "main"),
                node("after1", "expression", "main"),
                node("c2", "call-site", "main"),
                node("after2", "expression", "main"),
                node("main_exit", "exit", "main"),
                node("f_entry", "entry", "f"),
                node("crash", "crash", "f"),
            ],
            edges: vec![
                flow("main_entry", "c1"),
                call("c1", "f_entry"),
                flow("c1", "after1"),
                flow("after1", "c2"),
                call("c2", "f_entry"),
                flow("c2", "after2"),
                flow("after2", "main_exit"),
                flow("f_entry", "crash"),
            ],
        };
        CfgModel::from_raw(raw).unwrap()
    }

    /// Frame 0 is "inside main, about to call f": its own entry plus the
    /// call site that pushes frame 1. Frame 1 is terminal (crash-only) per
    /// §3 — f's entry is never separately named because f is where the
    /// crash itself happens, not an intermediate frame.
    fn crash_stack_via(entry: &str, call_site: &str, crash_node: &str) -> CrashStack {
        CrashStack(vec![
            StackFrame::Call {
                entry: vec![entry.to_string()],
                call: vec![call_site.to_string()],
            },
            StackFrame::Crash {
                crash: vec![crash_node.to_string()],
            },
        ])
    }

    #[test]
    fn stack_matched_crash_classifies_without_contradiction() {
        let model = two_call_sites_graph();
        let mut solver = SvpaSolver::new(&model);
        let stack = crash_stack_via("main_entry", "c1", "crash");
        solver.encode_crash(&stack).unwrap();
        let c = solver.find_known_execution().unwrap();
        assert!(c.def_yes.contains("main_entry"));
        assert!(c.def_yes.contains("crash"));
        assert!(c.def_yes.contains("c1"));
    }

    /// The crash happens inside `f` before the call at `c1` ever returns,
    /// so `after1` (main's code past the call) can never execute on any
    /// path consistent with this crash stack.
    #[test]
    fn obs_yes_requiring_code_past_the_crashing_call_is_unsat() {
        let model = two_call_sites_graph();
        let mut solver = SvpaSolver::new(&model);
        let stack = crash_stack_via("main_entry", "c1", "crash");
        solver.encode_crash(&stack).unwrap();
        solver
            .encode_obs_yes(&YesVector(vec![vec!["after1".to_string()]]))
            .unwrap();
        assert!(!solver.is_sat().unwrap());
    }
}
