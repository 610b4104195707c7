//! Orchestrates a full classification run: load the graph and failure
//! report, apply the configured preprocessing (crash-location
//! disambiguation, `-intra` restriction, `-stackonly`, basic-block
//! collapse), build one or two solvers, encode every constraint, classify,
//! cross-check a refinement relation if two solvers ran, and expand any
//! collapsed-graph result back to the original node set.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::cfg_model::{CfgModel, RawGraph};
use crate::config::{Compare, DriverOptions};
use crate::errors::{Result, SolveError};
use crate::failure_report::{CrashStack, FailureReport, StackFrame};
use crate::solver::{build_solver, Classification, SolverKind};

/// The structured result of one [`Driver::run`]. Rendering this into the
/// `csiclipse`/`standard`/`compact` text formats named by
/// [`crate::config::ResultStyle`] is left to the out-of-scope
/// pretty-printing collaborator; this is the data those formats are
/// computed from.
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub first_solver: SolverKind,
    pub first: Classification,
    pub second: Option<(SolverKind, Classification)>,
    pub duration_ms: u64,
}

pub struct Driver {
    options: DriverOptions,
}

impl Driver {
    pub fn new(options: DriverOptions) -> Self {
        Self { options }
    }

    pub fn run(&self, raw: RawGraph, mut report: FailureReport) -> Result<ClassificationReport> {
        let start = Instant::now();
        self.options.validate()?;

        let model = CfgModel::from_raw(raw)?;
        report.validate_against(&model)?;

        let (model, report) = self.clean_stack_and_graph(model, report)?;

        let model = if self.options.intra {
            let _span = info_span!("driver.restrict_intra").entered();
            let function_id = model
                .node(report.crash_stack().crash_nodes().first().ok_or_else(|| {
                    SolveError::invariant("crash stack has no crash node after cleanStackAndGraph")
                })?)
                .and_then(|n| n.procedure.clone())
                .ok_or_else(|| SolveError::invalid_input("crash node has no enclosing function for -intra"))?;
            info!(function_id = %function_id, "restricting to crashing function");
            model.restrict_to_function(&function_id)?
        } else {
            model
        };

        let mut report = report;
        if self.options.stackonly {
            info!("stackonly: discarding obsYes/obsNo");
            report.clear_obs_yes_and_no();
        }

        let exclude = report.all_nodes_in_failure_report();

        let first_model = if self.options.collapse.applies_to_first() {
            self.collapse(&model, &exclude)?
        } else {
            None
        };
        let second_model = if self.options.collapse.applies_to_second() {
            self.collapse(&model, &exclude)?
        } else {
            None
        };

        let first_view = first_model.as_ref().unwrap_or(&model);
        let first_raw = self.classify(self.options.first, first_view, &report)?;
        let first = self.expand(first_view, first_raw);

        let second = match self.options.second {
            Some(kind) => {
                let second_view = second_model.as_ref().unwrap_or(&model);
                let second_raw = self.classify(kind, second_view, &report)?;
                let expanded = self.expand(second_view, second_raw);
                Some((kind, expanded))
            }
            None => None,
        };

        if let (Some((second_kind, second_classification)), Some(compare)) = (&second, self.options.compare) {
            self.check_refinement(compare, &first, second_classification, self.options.first, *second_kind)?;
        }

        Ok(ClassificationReport {
            first_solver: self.options.first,
            first,
            second,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// §5's `cleanStackAndGraph`: fold the crash stack's (possibly
    /// ambiguous) final frame into one synthetic crash node, so every
    /// solver downstream sees an unambiguous crash target.
    fn clean_stack_and_graph(&self, model: CfgModel, report: FailureReport) -> Result<(CfgModel, FailureReport)> {
        let crash_locations = report.crash_stack().crash_nodes().to_vec();
        let (model, synthetic_id) = model.with_synthetic_crash_node(&crash_locations)?;

        let mut frames = report.crash_stack().0.clone();
        match frames.last_mut() {
            Some(StackFrame::Crash { crash }) => *crash = vec![synthetic_id],
            _ => return Err(SolveError::invariant("crash stack's last frame is not a crash frame")),
        }
        let crash_stack = CrashStack(frames);
        let report = FailureReport::new(crash_stack, report.obs_yes().to_vec(), report.obs_no().to_vec())?;
        Ok((model, report))
    }

    fn collapse(&self, model: &CfgModel, exclude: &HashSet<String>) -> Result<Option<CfgModel>> {
        info!(excluded = exclude.len(), "collapsing basic blocks");
        Ok(Some(model.collapse_bb_nodes(exclude, false)?))
    }

    fn classify(&self, kind: SolverKind, model: &CfgModel, report: &FailureReport) -> Result<Classification> {
        let _span = info_span!("driver.classify", solver = ?kind).entered();
        let mut solver = build_solver(kind, model);
        solver.encode_crash(report.crash_stack())?;
        for group in report.obs_no() {
            solver.encode_obs_no(group)?;
        }
        for vector in report.obs_yes() {
            solver.encode_obs_yes(vector)?;
        }
        if !solver.is_sat()? {
            return Err(SolveError::unsat(format!(
                "{kind:?} solver: no execution remains consistent with the encoded crash stack and observations"
            )));
        }
        let classification = solver.find_known_execution()?;
        info!(
            def_yes = classification.def_yes.len(),
            def_no = classification.def_no.len(),
            maybe = classification.maybe.len(),
            "classified"
        );
        Ok(classification)
    }

    /// Expand a (possibly collapsed-graph) classification back to the
    /// original node ids via `addCollapsedToSet`.
    fn expand(&self, model: &CfgModel, classification: Classification) -> Classification {
        Classification {
            def_yes: model.add_collapsed_to_set(&classification.def_yes),
            def_no: model.add_collapsed_to_set(&classification.def_no),
            maybe: model.add_collapsed_to_set(&classification.maybe),
        }
    }

    fn check_refinement(
        &self,
        compare: Compare,
        first: &Classification,
        second: &Classification,
        first_kind: SolverKind,
        second_kind: SolverKind,
    ) -> Result<()> {
        let ok = match compare {
            Compare::Eq => first == second,
            Compare::Gt => first.refines(second),
            Compare::Lt => second.refines(first),
        };
        if !ok {
            warn!(?compare, ?first_kind, ?second_kind, "refinement check failed");
            return Err(SolveError::mismatch(format!(
                "{first_kind:?} vs {second_kind:?} classifications do not satisfy the configured '{compare:?}' relation"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg_model::raw::{RawEdge, RawNode};
    use crate::config::{CollapseTarget, Preset};
    use crate::failure_report::YesVector;

    fn linear_raw_graph() -> RawGraph {
        let node = |id: &str, kind: &str| RawNode {
            id: id.to_string(),
            kind: kind.to_string(),
            procedure: Some("main".to_string()),
            file: None,
            lines: Vec::new(),
            syntax: None,
            csi_label: None,
            attrs: Default::default(),
        };
        let flow = |src: &str, dst: &str| RawEdge {
            source: src.to_string(),
            target: dst.to_string(),
            edge_type: "flow".to_string(),
            scope: Some("intraprocedural".to_string()),
            key: None,
            when: None,
        };
        RawGraph {
            nodes: vec![
                node("n:main:1", "entry"),
                node("n:main:2", "expression"),
                node("n:main:3", "expression"),
                node("n:main:4", "exit"),
            ],
            edges: vec![
                flow("n:main:1", "n:main:2"),
                flow("n:main:2", "n:main:3"),
                flow("n:main:3", "n:main:4"),
            ],
        }
    }

    fn crash_at(node_id: &str) -> FailureReport {
        let stack = CrashStack(vec![StackFrame::Crash {
            crash: vec![node_id.to_string()],
        }]);
        FailureReport::new(stack, Vec::new(), Vec::new()).unwrap()
    }

    #[test]
    fn linear_graph_classifies_everything_before_crash_as_def_yes() {
        let mut opts = Preset::Fast.driver_options();
        opts.collapse = CollapseTarget::None;
        let driver = Driver::new(opts);
        let report = crash_at("n:main:3");
        let result = driver.run(linear_raw_graph(), report).unwrap();
        assert!(result.first.def_yes.contains("n:main:1"));
        assert!(result.first.def_yes.contains("n:main:2"));
        assert!(result.first.def_yes.contains("n:main:3"));
    }

    #[test]
    fn balanced_preset_cross_checks_utl_against_svpa() {
        let opts = Preset::Balanced.driver_options();
        let driver = Driver::new(opts);
        let report = crash_at("n:main:3");
        let result = driver.run(linear_raw_graph(), report).unwrap();
        let (second_kind, second) = result.second.expect("balanced preset runs a second solver");
        assert_eq!(second_kind, SolverKind::Svpa);
        assert!(second.refines(&result.first));
    }

    #[test]
    fn stackonly_ignores_obs_yes_and_no() {
        let mut opts = Preset::Fast.driver_options();
        opts.collapse = CollapseTarget::None;
        opts.stackonly = true;
        let driver = Driver::new(opts);
        let stack = CrashStack(vec![StackFrame::Crash {
            crash: vec!["n:main:3".to_string()],
        }]);
        // This obsNo group would normally force n:main:2 out of defYes and
        // into defNo, contradicting the crash stack; with -stackonly it
        // must be discarded before solving rather than produce unsat.
        let report = FailureReport::new(
            stack,
            vec![YesVector(vec![vec!["n:main:1".to_string()]])],
            vec![vec!["n:main:2".to_string()]],
        )
        .unwrap();
        let result = driver.run(linear_raw_graph(), report).unwrap();
        assert!(result.first.def_yes.contains("n:main:2"));
    }
}
