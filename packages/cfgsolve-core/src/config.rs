//! Driver configuration surface: a typed mirror of the CLI flags so an
//! embedding application can construct [`DriverOptions`] directly instead
//! of going through argument parsing (out of scope for this crate).

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SolveError};
use crate::solver::SolverKind;

/// Which solver(s) receive the basic-block-collapsed graph, mirroring
/// `-collapse {first,second,both,none}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseTarget {
    First,
    Second,
    Both,
    None,
}

impl CollapseTarget {
    pub fn applies_to_first(&self) -> bool {
        matches!(self, CollapseTarget::First | CollapseTarget::Both)
    }

    pub fn applies_to_second(&self) -> bool {
        matches!(self, CollapseTarget::Second | CollapseTarget::Both)
    }
}

impl Default for CollapseTarget {
    fn default() -> Self {
        CollapseTarget::None
    }
}

/// The refinement relation the driver enforces between two solvers'
/// classifications, mirroring `-compare {eq,gt,lt}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compare {
    /// Classifications must be identical.
    Eq,
    /// The first solver's result must refine the second's.
    Gt,
    /// The second solver's result must refine the first's.
    Lt,
}

/// Output shape for a [`crate::driver::ClassificationReport`], mirroring
/// `-result-style {none,compact,full,csiclipse,standard}`. Rendering text
/// from this value is the out-of-scope pretty-printing collaborator's job;
/// `Driver` only needs to know whether per-file grouping was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStyle {
    None,
    Compact,
    Full,
    Csiclipse,
    Standard,
}

impl Default for ResultStyle {
    fn default() -> Self {
        ResultStyle::None
    }
}

/// A named bundle of solver/collapse defaults, analogous to the teacher's
/// fast/balanced/thorough presets but scoped to what this driver has to
/// decide: which solver(s) to run and how aggressively to collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Single UTL pass, no collapse, no comparison. Cheapest, least precise.
    Fast,
    /// UTL first, SVPA second, both collapsed, checked for refinement.
    /// Default preset and default CLI behavior (`-first UTL -second None`
    /// with no comparison is the true CLI default; `Balanced` is the
    /// opinionated embedding-API default).
    Balanced,
    /// FSA and SVPA cross-checked with `eq`, uncollapsed, for maximum
    /// confidence in the result at the cost of runtime.
    Thorough,
}

impl Preset {
    pub fn driver_options(&self) -> DriverOptions {
        match self {
            Preset::Fast => DriverOptions {
                first: SolverKind::Utl,
                second: None,
                compare: None,
                collapse: CollapseTarget::None,
                stackonly: false,
                intra: false,
                result_style: ResultStyle::None,
                memory_limit_mib: default_memory_limit_mib(),
            },
            Preset::Balanced => DriverOptions {
                first: SolverKind::Utl,
                second: Some(SolverKind::Svpa),
                compare: Some(Compare::Lt),
                collapse: CollapseTarget::Both,
                stackonly: false,
                intra: false,
                result_style: ResultStyle::None,
                memory_limit_mib: default_memory_limit_mib(),
            },
            Preset::Thorough => DriverOptions {
                first: SolverKind::Fsa,
                second: Some(SolverKind::Svpa),
                compare: Some(Compare::Eq),
                collapse: CollapseTarget::None,
                stackonly: false,
                intra: false,
                result_style: ResultStyle::Full,
                memory_limit_mib: default_memory_limit_mib(),
            },
        }
    }
}

/// `MAX_MEMORY` (MiB) env var, used to size the SVPA subprocess heap when
/// no explicit memory limit is configured. Default 32 GiB; clamped to a
/// minimum of 1 GiB by [`DriverOptions::validate`].
pub fn default_memory_limit_mib() -> u64 {
    std::env::var("MAX_MEMORY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(32 * 1024)
}

/// Typed mirror of the driver CLI flags (§6). Constructed either from a
/// [`Preset`] and adjusted, or built up field by field by an embedding
/// application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverOptions {
    pub first: SolverKind,
    pub second: Option<SolverKind>,
    pub compare: Option<Compare>,
    pub collapse: CollapseTarget,
    pub stackonly: bool,
    pub intra: bool,
    pub result_style: ResultStyle,
    /// Memory ceiling (MiB) passed to the SVPA subprocess transport, when
    /// used. Minimum 1 GiB, default 32 GiB (§5).
    pub memory_limit_mib: u64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Preset::Balanced.driver_options()
    }
}

impl DriverOptions {
    /// Cross-field validation the driver runs before touching a graph:
    /// a comparison needs two distinct solvers to compare.
    pub fn validate(&self) -> Result<()> {
        match (&self.second, &self.compare) {
            (None, Some(_)) => Err(SolveError::config(
                "-compare was given but -second is None: nothing to compare against",
            )),
            (Some(second), _) if *second == self.first => Err(SolveError::config(
                "-first and -second name the same solver; comparison would be trivial",
            )),
            _ => Ok(()),
        }
    }

    /// Heap size in bytes the SVPA subprocess should request: ~66% of the
    /// configured memory ceiling (§5).
    pub fn svpa_heap_bytes(&self) -> u64 {
        let mib = self.memory_limit_mib.max(1024);
        (mib * 1024 * 1024 * 2) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_preset_compares_utl_against_svpa() {
        let opts = Preset::Balanced.driver_options();
        assert_eq!(opts.first, SolverKind::Utl);
        assert_eq!(opts.second, Some(SolverKind::Svpa));
        opts.validate().unwrap();
    }

    #[test]
    fn compare_without_second_solver_is_rejected() {
        let mut opts = Preset::Fast.driver_options();
        opts.compare = Some(Compare::Eq);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn comparing_a_solver_against_itself_is_rejected() {
        let mut opts = Preset::Fast.driver_options();
        opts.second = Some(SolverKind::Utl);
        opts.compare = Some(Compare::Eq);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn heap_bytes_is_two_thirds_of_ceiling_with_one_gib_floor() {
        let mut opts = DriverOptions::default();
        opts.memory_limit_mib = 100;
        assert_eq!(opts.svpa_heap_bytes(), (1024 * 1024 * 1024 * 2) / 3);
    }
}
