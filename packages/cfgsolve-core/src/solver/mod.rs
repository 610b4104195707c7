//! The contract all three solvers share, and the classification result
//! they all produce.

pub mod fsa;
pub mod observation;
pub mod svpa;
pub mod utl;

use std::collections::HashSet;

use crate::cfg_model::CfgModel;
use crate::errors::Result;
use crate::failure_report::{CrashStack, Group, YesVector};

/// The partition of all CFG nodes produced by `find_known_execution`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub def_yes: HashSet<String>,
    pub def_no: HashSet<String>,
    pub maybe: HashSet<String>,
}

impl Classification {
    /// `defYes`, `defNo` and `maybe` partition the CFG's node set; this is
    /// the universal invariant every solver's result must satisfy.
    pub fn is_valid_partition_of(&self, all_nodes: &HashSet<String>) -> bool {
        let union: HashSet<&String> = self
            .def_yes
            .iter()
            .chain(self.def_no.iter())
            .chain(self.maybe.iter())
            .collect();
        if union.len() != self.def_yes.len() + self.def_no.len() + self.maybe.len() {
            return false; // overlap between sets
        }
        let all: HashSet<&String> = all_nodes.iter().collect();
        union == all
    }

    /// `self` refines `other`: superset of `defYes`, superset of `defNo`,
    /// subset of `maybe` (§8).
    pub fn refines(&self, other: &Classification) -> bool {
        self.def_yes.is_superset(&other.def_yes)
            && self.def_no.is_superset(&other.def_no)
            && self.maybe.is_subset(&other.maybe)
    }
}

/// The five-operation contract every solver implements, in the order the
/// driver calls them: construct, `encode_crash` once, any number of
/// `encode_obs_no`/`encode_obs_yes`, `is_sat` after each encode, then
/// `find_known_execution`.
pub trait ExecutionSolver {
    /// Encode the crash stack. Must be called exactly once, before any
    /// observation is encoded and before `find_known_execution`.
    fn encode_crash(&mut self, crash_stack: &CrashStack) -> Result<()>;

    /// Encode one `obsNo` group: no node of `group` may appear in the
    /// accepted execution.
    fn encode_obs_no(&mut self, group: &Group) -> Result<()>;

    /// Encode one `obsYes` vector: its groups must appear, in order,
    /// somewhere in the accepted execution.
    fn encode_obs_yes(&mut self, vector: &YesVector) -> Result<()>;

    /// Whether at least one execution remains consistent with everything
    /// encoded so far.
    fn is_sat(&self) -> Result<bool>;

    /// Classify every CFG node as `defYes`, `defNo`, or `maybe`.
    fn find_known_execution(&mut self) -> Result<Classification>;
}

/// Which concrete solver strategy to run, used by [`crate::driver::Driver`]
/// to pick an implementation without the caller needing to know the
/// per-solver types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Fsa,
    Svpa,
    Utl,
}

pub fn build_solver<'a>(kind: SolverKind, model: &'a CfgModel) -> Box<dyn ExecutionSolver + 'a> {
    match kind {
        SolverKind::Fsa => Box::new(fsa::FsaSolver::new(model)),
        SolverKind::Svpa => Box::new(svpa::SvpaSolver::new(model)),
        SolverKind::Utl => Box::new(utl::UtlSolver::new(model)),
    }
}
