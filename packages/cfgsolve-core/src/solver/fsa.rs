//! FSA solver: the CFG is a regular language over node-id symbols; crash
//! stacks and observations are encoded as overlay acceptors and intersected
//! with it.
//!
//! Rather than materialising a cross-product automaton ahead of time and
//! periodically determinising/minimising it once it grows past some state
//! budget, this solver only ever visits product states reached by walking
//! real CFG edges: at a product state `(node, overlay-state-sets)` the only
//! symbols that can ever occur are `node`'s real [`CfgModel::cfg_successors`],
//! since the base CFG acceptor has no transition at all for any other
//! symbol. That keeps the product automaton limited to exactly the states
//! a BFS from entry actually reaches, which is the property the
//! determinise-and-minimise compaction was chasing in the first place.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::cfg_model::CfgModel;
use crate::errors::{Result, SolveError};
use crate::failure_report::{CrashStack, Group, StackFrame, YesVector};
use crate::solver::observation::ObsComponent;
use crate::solver::{Classification, ExecutionSolver};

/// A point in the product space: the CFG node currently occupied, plus one
/// active NFA state-set per encoded observation, in encounter order.
type ProductKey = (String, Vec<BTreeSet<usize>>);

pub struct FsaSolver<'a> {
    model: &'a CfgModel,
    overlays: Vec<ObsComponent>,
    crash_encoded: bool,
    crash_overlay_index: Option<usize>,
}

impl<'a> FsaSolver<'a> {
    pub fn new(model: &'a CfgModel) -> Self {
        Self {
            model,
            overlays: Vec::new(),
            crash_encoded: false,
            crash_overlay_index: None,
        }
    }

    fn initial_product(&self) -> ProductKey {
        (
            self.model.entry_id().to_string(),
            self.overlays.iter().map(|o| o.initial_states()).collect(),
        )
    }

    /// BFS over the product space from entry. `exclude` removes one node
    /// from the walk entirely (used by the `possibleNo` probe); returns
    /// every node id visited along some path that reaches a state where
    /// every overlay is simultaneously satisfied.
    fn nodes_on_some_accepting_path(&self, exclude: Option<&str>) -> HashSet<String> {
        let start = self.initial_product();
        let mut visited: HashSet<ProductKey> = HashSet::new();
        let mut queue: VecDeque<ProductKey> = VecDeque::new();
        let mut accepting_keys: Vec<ProductKey> = Vec::new();

        if Some(start.0.as_str()) != exclude {
            visited.insert(start.clone());
            queue.push_back(start);
        }

        while let Some((node, states)) = queue.pop_front() {
            if self
                .overlays
                .iter()
                .zip(states.iter())
                .all(|(o, s)| o.is_satisfied(s))
            {
                accepting_keys.push((node.clone(), states.clone()));
            }
            for succ in self.model.cfg_successors(&node) {
                if Some(succ.as_str()) == exclude {
                    continue;
                }
                let mut next_states = Vec::with_capacity(self.overlays.len());
                let mut dead = false;
                for (o, s) in self.overlays.iter().zip(states.iter()) {
                    let next = o.step(s, &succ);
                    if next.is_empty() {
                        dead = true;
                        break;
                    }
                    next_states.push(next);
                }
                if dead {
                    continue;
                }
                let key = (succ.clone(), next_states);
                if visited.insert(key.clone()) {
                    queue.push_back(key);
                }
            }
        }

        if accepting_keys.is_empty() {
            return HashSet::new();
        }

        // Nodes that lie on *some* path from entry to *some* accepting
        // product state: walk backward from every accepting key through
        // the same visited set.
        let mut reverse_visited: HashSet<ProductKey> = accepting_keys.iter().cloned().collect();
        let mut reverse_queue: VecDeque<ProductKey> = accepting_keys.into_iter().collect();
        let mut on_path: HashSet<String> = HashSet::new();

        // Build predecessor edges within the visited product graph.
        let mut preds: std::collections::HashMap<ProductKey, Vec<ProductKey>> =
            std::collections::HashMap::new();
        for (node, states) in visited.iter() {
            for succ in self.model.cfg_successors(node) {
                if Some(succ.as_str()) == exclude {
                    continue;
                }
                let mut next_states = Vec::with_capacity(self.overlays.len());
                let mut dead = false;
                for (o, s) in self.overlays.iter().zip(states.iter()) {
                    let next = o.step(s, &succ);
                    if next.is_empty() {
                        dead = true;
                        break;
                    }
                    next_states.push(next);
                }
                if dead {
                    continue;
                }
                let key = (succ.clone(), next_states);
                if visited.contains(&key) {
                    preds.entry(key).or_default().push((node.clone(), states.clone()));
                }
            }
        }

        while let Some(key) = reverse_queue.pop_front() {
            on_path.insert(key.0.clone());
            if let Some(ps) = preds.get(&key) {
                for p in ps {
                    if reverse_visited.insert(p.clone()) {
                        reverse_queue.push_back(p.clone());
                    }
                }
            }
        }

        on_path
    }

    fn flatten_crash_stack(stack: &CrashStack) -> Vec<Group> {
        let mut groups = Vec::new();
        for frame in &stack.0 {
            match frame {
                StackFrame::Call { entry, call } => {
                    groups.push(entry.clone());
                    groups.push(call.clone());
                }
                StackFrame::Crash { crash } => groups.push(crash.clone()),
            }
        }
        groups
    }
}

impl<'a> ExecutionSolver for FsaSolver<'a> {
    fn encode_crash(&mut self, crash_stack: &CrashStack) -> Result<()> {
        if self.crash_encoded {
            return Err(SolveError::invariant("encode_crash called more than once"));
        }
        let groups = Self::flatten_crash_stack(crash_stack);
        self.overlays.push(ObsComponent::yes(&groups, true));
        self.crash_overlay_index = Some(self.overlays.len() - 1);
        self.crash_encoded = true;

        if self.nodes_on_some_accepting_path(None).is_empty() {
            return Err(SolveError::invariant(
                "crash is not reachable from entry under the encoded constraints",
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
            debug!("obsNo encoding leaves no consistent execution");
        }
        Ok(())
    }

    fn encode_obs_yes(&mut self, vector: &YesVector) -> Result<()> {
        self.overlays.push(ObsComponent::yes(&vector.0, false));
        if !self.is_sat()? {
            debug!("obsYes encoding leaves no consistent execution");
        }
        Ok(())
    }

    fn is_sat(&self) -> Result<bool> {
        Ok(!self.nodes_on_some_accepting_path(None).is_empty())
    }

    fn find_known_execution(&mut self) -> Result<Classification> {
        let all_nodes: Vec<String> = self.model.node_ids().map(str::to_string).collect();
        let crash_nodes: HashSet<String> = self
            .crash_overlay_index
            .map(|_| {
                self.nodes_on_some_accepting_path(None)
            })
            .unwrap_or_default();

        let mut out = Classification::default();
        for n in &all_nodes {
            let possible_yes = crash_nodes.contains(n);
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
