//! External-process SVPA transport (`external-svpa` feature): speaks the
//! line-based, prompt-terminated protocol of the system's external
//! interfaces to a standalone SVPA service subprocess, instead of deciding
//! emptiness in-process.
//!
//! The child is spawned on construction and killed deterministically on
//! drop (§5). Every line sent and received is kept in a rolling
//! transcript so an [`crate::errors::SolveError::ExternalFailure`] can
//! include the pending buffer, per §7.

use std::cell::Cell;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::cfg_model::{CfgModel, NodeKind};
use crate::errors::{Result, SolveError};
use crate::failure_report::Group;
use crate::solver::svpa::transport::SvpaTransport;
use crate::solver::Classification;

const PROMPT: &str = ">> ";
/// Cap on transcript lines kept for diagnostics; old lines are dropped so
/// a long-running session doesn't grow the buffer without bound.
const TRANSCRIPT_CAP: usize = 4_000;

pub struct ExternalProcessTransport {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    transcript: Vec<String>,
    node_ids: Vec<String>,
    /// `is_sat` is `&self` in [`SvpaTransport`], but the protocol's
    /// `empty` command needs to round-trip through the child's pipes.
    /// Every `encode_*` call refreshes this cache by issuing an `empty`
    /// query right after its constraint is accepted, so `is_sat` can
    /// answer without needing `&mut self`.
    sat_cache: Cell<bool>,
}

impl ExternalProcessTransport {
    /// Spawn `server_path` with a heap sized from `heap_bytes` (§5's ~66%
    /// of the configured memory ceiling), hand it the CFG, and block until
    /// it's ready for constraints.
    pub fn spawn(model: &CfgModel, heap_bytes: u64, server_path: &str) -> Result<Self> {
        let mut child = Command::new(server_path)
            .arg("--max-heap-bytes")
            .arg(heap_bytes.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SolveError::external(format!("failed to start SVPA subprocess '{server_path}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SolveError::external("SVPA subprocess has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolveError::external("SVPA subprocess has no stdout"))?;

        let mut transport = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            transcript: Vec::new(),
            node_ids: model.node_ids().map(str::to_string).collect(),
            sat_cache: Cell::new(false),
        };
        transport.await_prompt()?;
        transport.send_cfg(model)?;
        Ok(transport)
    }

    fn refresh_sat_cache(&mut self) -> Result<bool> {
        self.send_line("empty")?;
        let resp = self.await_prompt()?;
        let empty = resp.iter().any(|l| l.trim() == "empty");
        self.sat_cache.set(!empty);
        Ok(!empty)
    }

    fn record(&mut self, line: impl Into<String>) {
        self.transcript.push(line.into());
        if self.transcript.len() > TRANSCRIPT_CAP {
            let overflow = self.transcript.len() - TRANSCRIPT_CAP;
            self.transcript.drain(0..overflow);
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.record(format!("> {line}"));
        writeln!(self.stdin, "{line}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| SolveError::external(format!("SVPA subprocess write failed: {e}")))
    }

    /// Read lines until the `">> "` prompt, returning everything read
    /// before it.
    fn await_prompt(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let n = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| SolveError::external(format!("SVPA subprocess read failed: {e}")))?;
            if n == 0 {
                return Err(self.dead_process_error());
            }
            if buf == PROMPT || buf.trim_end() == PROMPT.trim_end() {
                self.record(format!("< {}", buf.trim_end()));
                return Ok(lines);
            }
            let trimmed = buf.trim_end_matches(['\n', '\r']).to_string();
            self.record(format!("< {trimmed}"));
            lines.push(trimmed);
        }
    }

    fn dead_process_error(&mut self) -> SolveError {
        let _ = self.child.kill();
        SolveError::external(format!(
            "SVPA subprocess terminated unexpectedly; pending session buffer:\n{}",
            self.transcript.join("\n")
        ))
    }

    fn send_cfg(&mut self, model: &CfgModel) -> Result<()> {
        self.send_line("cfg")?;
        for id in &self.node_ids.clone() {
            self.send_line(&format!("e,{id}"))?;
        }
        for id in &self.node_ids.clone() {
            for succ in model.intra_successors(id) {
                self.send_line(&format!("i,{id},{succ}"))?;
            }
            if model.is_true_callsite(id) {
                for callee in model.callee_entries(id) {
                    self.send_line(&format!("c,{id},{callee}"))?;
                }
            }
        }
        for id in &self.node_ids.clone() {
            if !matches!(model.node(id).map(|n| &n.kind), Some(NodeKind::Exit)) {
                continue;
            }
            for ret_site in model.return_sites_for_exit(id) {
                // `r,exit,retSite,call`: the call a given return site is
                // matched to is recovered from the `c,` edges already
                // sent, by naming whichever of the return site's CFG
                // predecessors is itself a true call-site.
                if let Some(call_site) = model
                    .cfg_predecessors(&ret_site)
                    .into_iter()
                    .find(|p| model.is_true_callsite(p))
                {
                    self.send_line(&format!("r,{id},{ret_site},{call_site}"))?;
                }
            }
        }
        self.send_line("END")?;
        self.await_prompt()?;
        Ok(())
    }

    /// `t,{i,c,r},from,to,symbol|*` transition lines plus `f,state` for
    /// each accepting state, for one overlay automaton (crash or
    /// observation), terminated by `END`.
    fn send_constraint(&mut self, name: &str, transitions: &[(char, usize, usize, String)], accepting: &[usize]) -> Result<()> {
        self.send_line(&format!("constraint,{name}"))?;
        for (sort, from, to, symbol) in transitions {
            self.send_line(&format!("t,{sort},{from},{to},{symbol}"))?;
        }
        for state in accepting {
            self.send_line(&format!("f,{state}"))?;
        }
        self.send_line("END")?;
        self.await_prompt()?;
        Ok(())
    }

    /// Build the `t,i,from,to,symbol` transitions for a linear yes-vector
    /// overlay (§4.4's `k+1`-state shape), reused for both `encodeObsYes`
    /// and `encodeCrash`.
    fn yes_overlay_transitions(groups: &[Group], crash: bool, universe: &[String]) -> (Vec<(char, usize, usize, String)>, Vec<usize>) {
        let k = groups.len();
        let mut t = Vec::new();
        for (i, group) in groups.iter().enumerate() {
            for sym in group {
                t.push(('i', i, i + 1, sym.clone()));
            }
            for sym in universe {
                if !group.contains(sym) {
                    t.push(('i', i, i, sym.clone()));
                }
            }
        }
        if crash {
            if let Some(last_group) = groups.last() {
                for sym in last_group {
                    t.push(('i', k, k, sym.clone()));
                }
                for sym in universe {
                    if !last_group.contains(sym) {
                        t.push(('i', k, k.saturating_sub(1), sym.clone()));
                    }
                }
            }
            (t, vec![k])
        } else {
            for sym in universe {
                t.push(('i', k, k, sym.clone()));
            }
            (t, (0..=k).collect())
        }
    }
}

impl Drop for ExternalProcessTransport {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl SvpaTransport for ExternalProcessTransport {
    fn encode_crash(&mut self, flattened_groups: &[Group]) -> Result<()> {
        let universe = self.node_ids.clone();
        let (t, f) = Self::yes_overlay_transitions(flattened_groups, true, &universe);
        self.send_constraint("crash", &t, &f)?;
        if !self.refresh_sat_cache()? {
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
        let universe = self.node_ids.clone();
        let sym = &group[0];
        let t: Vec<(char, usize, usize, String)> = universe
            .iter()
            .filter(|s| *s != sym)
            .map(|s| ('i', 0, 0, s.clone()))
            .collect();
        self.send_constraint("obsno", &t, &[0])?;
        self.refresh_sat_cache()?;
        Ok(())
    }

    fn encode_obs_yes(&mut self, groups: &[Group]) -> Result<()> {
        let universe = self.node_ids.clone();
        let (t, f) = Self::yes_overlay_transitions(groups, false, &universe);
        self.send_constraint("obsyes", &t, &f)?;
        self.refresh_sat_cache()?;
        Ok(())
    }

    fn is_sat(&self) -> Result<bool> {
        Ok(self.sat_cache.get())
    }

    fn find_known_execution(&mut self) -> Result<Classification> {
        if !self.refresh_sat_cache()? {
            return Err(SolveError::invariant(
                "crash is not reachable under the encoded constraints (subprocess reported empty)",
            ));
        }

        let node_ids = self.node_ids.clone();
        let mut out = Classification::default();
        for n in &node_ids {
            self.send_line(&format!("probe empty,yes,{n}"))?;
            let yes_resp = self.await_prompt()?;
            let possible_yes = !yes_resp.iter().any(|l| l.trim() == "empty");

            self.send_line(&format!("probe empty,no,{n}"))?;
            let no_resp = self.await_prompt()?;
            let possible_no = !no_resp.iter().any(|l| l.trim() == "empty");

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
