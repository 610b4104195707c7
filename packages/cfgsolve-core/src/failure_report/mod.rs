//! Crash stack, `obsYes` vectors and `obsNo` groups recovered from a crash,
//! validated against a [`CfgModel`](crate::cfg_model::CfgModel).

pub mod json;
pub mod text;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cfg_model::CfgModel;
use crate::errors::{Result, SolveError};

/// A group of candidate node ids — a single id normally, more than one
/// only to express genuine ambiguity about which node was observed.
pub type Group = Vec<String>;

/// One frame of the crash stack. The last frame of a [`CrashStack`] is
/// always [`StackFrame::Crash`]; every earlier frame is [`StackFrame::Call`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StackFrame {
    Call { entry: Group, call: Group },
    Crash { crash: Group },
}

impl StackFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StackFrame::Crash { .. })
    }
}

/// A non-empty, ordered list of stack frames; every frame but the last is
/// [`StackFrame::Call`], the last is [`StackFrame::Crash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashStack(pub Vec<StackFrame>);

impl CrashStack {
    pub fn crash_nodes(&self) -> &[String] {
        match self.0.last() {
            Some(StackFrame::Crash { crash }) => crash,
            _ => &[],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(SolveError::invalid_input("crash stack must be non-empty"));
        }
        for (i, frame) in self.0.iter().enumerate() {
            let is_last = i == self.0.len() - 1;
            match (is_last, frame) {
                (true, StackFrame::Crash { .. }) => {}
                (false, StackFrame::Call { .. }) => {}
                (true, StackFrame::Call { .. }) => {
                    return Err(SolveError::invalid_input(
                        "last crash stack frame must be a crash frame, not a call frame",
                    ))
                }
                (false, StackFrame::Crash { .. }) => {
                    return Err(SolveError::invalid_input(
                        "crash stack frame is both internal and final: only the last frame may be a crash frame",
                    ))
                }
            }
        }
        Ok(())
    }
}

/// One `obsYes` entry: an ordered vector of groups. `reliable: true` is
/// rejected at load time (§6); by the time a [`YesVector`] exists it is
/// implicitly unreliable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YesVector(pub Vec<Group>);

/// The evidence recovered from one failure, validated against a CFG.
#[derive(Debug, Clone)]
pub struct FailureReport {
    crash_stack: CrashStack,
    obs_yes: Vec<YesVector>,
    obs_no: Vec<Group>,
}

impl FailureReport {
    pub fn new(crash_stack: CrashStack, obs_yes: Vec<YesVector>, obs_no: Vec<Group>) -> Result<Self> {
        crash_stack.validate()?;
        Ok(Self {
            crash_stack,
            obs_yes,
            obs_no,
        })
    }

    pub fn crash_stack(&self) -> &CrashStack {
        &self.crash_stack
    }

    pub fn obs_yes(&self) -> &[YesVector] {
        &self.obs_yes
    }

    pub fn obs_no(&self) -> &[Group] {
        &self.obs_no
    }

    /// Discard all observations, keeping only the crash stack (`-stackonly`).
    pub fn clear_obs_yes_and_no(&mut self) {
        self.obs_yes.clear();
        self.obs_no.clear();
    }

    /// Every node id mentioned anywhere in this report (crash stack,
    /// `obsYes`, `obsNo`), deduplicated.
    pub fn all_nodes_in_failure_report(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        for frame in &self.crash_stack.0 {
            match frame {
                StackFrame::Call { entry, call } => {
                    out.extend(entry.iter().cloned());
                    out.extend(call.iter().cloned());
                }
                StackFrame::Crash { crash } => out.extend(crash.iter().cloned()),
            }
        }
        for YesVector(groups) in &self.obs_yes {
            for g in groups {
                out.extend(g.iter().cloned());
            }
        }
        for g in &self.obs_no {
            out.extend(g.iter().cloned());
        }
        out
    }

    /// Check every node id this report references exists in `model`.
    pub fn validate_against(&self, model: &CfgModel) -> Result<()> {
        for id in self.all_nodes_in_failure_report() {
            if !model.contains(&id) {
                return Err(SolveError::invalid_input(format!(
                    "node '{id}' referenced by failure report does not exist in the graph"
                )));
            }
        }
        Ok(())
    }
}
