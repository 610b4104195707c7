//! The "stateful service" contract an SVPA implementation exposes,
//! independent of whether it runs in-process or talks to a subprocess over
//! the line protocol (§6). [`super::SvpaSolver`] only ever calls through
//! this trait.

use crate::errors::Result;
use crate::failure_report::Group;
use crate::solver::Classification;

pub trait SvpaTransport {
    /// Encode the flattened crash-stack groups (`[entry,call,entry,call,…,crash]`)
    /// as the accepting-tail observation, exactly once.
    fn encode_crash(&mut self, flattened_groups: &[Group]) -> Result<()>;

    /// Encode one `obsNo` group (singleton only).
    fn encode_obs_no(&mut self, group: &Group) -> Result<()>;

    /// Encode one `obsYes` vector, as its ordered list of groups.
    fn encode_obs_yes(&mut self, groups: &[Group]) -> Result<()>;

    /// Whether some stack-matched execution remains consistent with
    /// everything encoded so far.
    fn is_sat(&self) -> Result<bool>;

    /// Classify every CFG node into `defYes`/`defNo`/`maybe`.
    fn find_known_execution(&mut self) -> Result<Classification>;
}
