//! SVPA solver: the CFG is encoded as a visibly-pushdown language so a
//! return is only ever taken by the call that pushed its frame — the part
//! of the problem FSA/UTL approximate by flattening call/return into plain
//! successor edges.
//!
//! [`SvpaSolver`] itself is a thin [`ExecutionSolver`] adapter; the actual
//! emptiness/classification logic lives behind [`SvpaTransport`], which has
//! two implementations: [`inprocess::InProcessTransport`] (the default,
//! exercised by every test in this crate) and, behind the `external-svpa`
//! feature, [`external::ExternalProcessTransport`], which drives the
//! line-based subprocess protocol of the system's external interfaces.

pub mod inprocess;
pub mod transport;

#[cfg(feature = "external-svpa")]
pub mod external;

use crate::cfg_model::CfgModel;
use crate::errors::Result;
use crate::failure_report::{CrashStack, Group, StackFrame, YesVector};
use crate::solver::{Classification, ExecutionSolver};

pub use transport::SvpaTransport;

pub struct SvpaSolver<'a> {
    transport: Box<dyn SvpaTransport + 'a>,
    crash_encoded: bool,
}

impl<'a> SvpaSolver<'a> {
    /// Build a solver using the in-process tabulation transport. This is
    /// the constructor [`crate::solver::build_solver`] uses and the one
    /// every test in this crate exercises.
    pub fn new(model: &'a CfgModel) -> Self {
        Self {
            transport: Box::new(inprocess::InProcessTransport::new(model)),
            crash_encoded: false,
        }
    }

    /// Build a solver against an explicit transport — used by callers that
    /// want the external-process transport, or a test double.
    pub fn with_transport(transport: Box<dyn SvpaTransport + 'a>) -> Self {
        Self {
            transport,
            crash_encoded: false,
        }
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

impl<'a> ExecutionSolver for SvpaSolver<'a> {
    fn encode_crash(&mut self, crash_stack: &CrashStack) -> Result<()> {
        use crate::errors::SolveError;
        if self.crash_encoded {
            return Err(SolveError::invariant("encode_crash called more than once"));
        }
        let groups = Self::flatten_crash_stack(crash_stack);
        self.transport.encode_crash(&groups)?;
        self.crash_encoded = true;
        Ok(())
    }

    fn encode_obs_no(&mut self, group: &Group) -> Result<()> {
        self.transport.encode_obs_no(group)
    }

    fn encode_obs_yes(&mut self, vector: &YesVector) -> Result<()> {
        self.transport.encode_obs_yes(&vector.0)
    }

    fn is_sat(&self) -> Result<bool> {
        self.transport.is_sat()
    }

    fn find_known_execution(&mut self) -> Result<Classification> {
        self.transport.find_known_execution()
    }
}
