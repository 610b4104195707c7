//! Property-based tests for the universal classification invariants: every
//! solver's result is a complete, disjoint partition of the graph's nodes,
//! is consistent with whatever obsYes/obsNo was encoded, and does not
//! depend on the order those observations were encoded in.

use std::collections::{HashMap, HashSet};

use cfgsolve_core::cfg_model::raw::{RawEdge, RawGraph, RawNode};
use cfgsolve_core::cfg_model::CfgModel;
use cfgsolve_core::failure_report::{CrashStack, StackFrame, YesVector};
use cfgsolve_core::solver::{build_solver, Classification, SolverKind};
use proptest::prelude::*;

fn node(id: &str, kind: &str) -> RawNode {
    RawNode {
        id: id.to_string(),
        kind: kind.to_string(),
        procedure: Some("main".to_string()),
        file: None,
        lines: Vec::new(),
        syntax: None,
        csi_label: None,
        attrs: HashMap::new(),
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

/// `entry -> {l, r} -> join -> crash`, the diamond fixture §8's concrete
/// scenarios 2-4 are built around.
fn diamond_model() -> CfgModel {
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

fn crash_stack() -> CrashStack {
    CrashStack(vec![StackFrame::Crash {
        crash: vec!["crash".to_string()],
    }])
}

fn solver_kind(idx: u8) -> SolverKind {
    match idx % 3 {
        0 => SolverKind::Fsa,
        1 => SolverKind::Utl,
        _ => SolverKind::Svpa,
    }
}

fn all_node_ids(model: &CfgModel) -> HashSet<String> {
    model.node_ids().map(str::to_string).collect()
}

proptest! {
    #[test]
    fn partition_is_complete_and_disjoint_with_no_observations(kind_idx in 0u8..3) {
        let model = diamond_model();
        let mut solver = build_solver(solver_kind(kind_idx), &model);
        solver.encode_crash(&crash_stack()).unwrap();
        let c = solver.find_known_execution().unwrap();
        prop_assert!(c.is_valid_partition_of(&all_node_ids(&model)));
        prop_assert!(c.def_yes.contains("entry"));
        prop_assert!(c.def_yes.contains("crash"));
    }

    #[test]
    fn obs_yes_forces_branch_in_and_sibling_out(left_branch in any::<bool>(), kind_idx in 0u8..3) {
        let model = diamond_model();
        let (chosen, sibling) = if left_branch { ("l", "r") } else { ("r", "l") };
        let mut solver = build_solver(solver_kind(kind_idx), &model);
        solver.encode_crash(&crash_stack()).unwrap();
        solver
            .encode_obs_yes(&YesVector(vec![vec![chosen.to_string()]]))
            .unwrap();
        let c = solver.find_known_execution().unwrap();
        prop_assert!(c.is_valid_partition_of(&all_node_ids(&model)));
        prop_assert!(c.def_yes.contains(chosen));
        prop_assert!(c.def_no.contains(sibling));
    }

    #[test]
    fn obs_no_excludes_branch_and_forces_sibling_in(left_branch in any::<bool>(), kind_idx in 0u8..3) {
        let model = diamond_model();
        let (excluded, sibling) = if left_branch { ("l", "r") } else { ("r", "l") };
        let mut solver = build_solver(solver_kind(kind_idx), &model);
        solver.encode_crash(&crash_stack()).unwrap();
        solver.encode_obs_no(&vec![excluded.to_string()]).unwrap();
        let c = solver.find_known_execution().unwrap();
        prop_assert!(c.is_valid_partition_of(&all_node_ids(&model)));
        prop_assert!(c.def_no.contains(excluded));
        prop_assert!(c.def_yes.contains(sibling));
    }

    /// Encoding `obsYes=[l]` and `obsNo=[r]` in either order reaches the
    /// same classification: per §5, observation encodings commute, only
    /// `encodeCrash` has a fixed position (first).
    #[test]
    fn observation_encoding_order_is_commutative(yes_before_no in any::<bool>(), kind_idx in 0u8..3) {
        let model = diamond_model();
        let kind = solver_kind(kind_idx);

        let mut solver = build_solver(kind, &model);
        solver.encode_crash(&crash_stack()).unwrap();
        if yes_before_no {
            solver.encode_obs_yes(&YesVector(vec![vec!["l".to_string()]])).unwrap();
            solver.encode_obs_no(&vec!["r".to_string()]).unwrap();
        } else {
            solver.encode_obs_no(&vec!["r".to_string()]).unwrap();
            solver.encode_obs_yes(&YesVector(vec![vec!["l".to_string()]])).unwrap();
        }
        let this_order = solver.find_known_execution().unwrap();

        let mut other = build_solver(kind, &model);
        other.encode_crash(&crash_stack()).unwrap();
        if yes_before_no {
            other.encode_obs_no(&vec!["r".to_string()]).unwrap();
            other.encode_obs_yes(&YesVector(vec![vec!["l".to_string()]])).unwrap();
        } else {
            other.encode_obs_yes(&YesVector(vec![vec!["l".to_string()]])).unwrap();
            other.encode_obs_no(&vec!["r".to_string()]).unwrap();
        }
        let swapped_order = other.find_known_execution().unwrap();

        prop_assert_eq!(this_order, swapped_order);
    }
}

/// §8's refinement order: for the same inputs, FSA and SVPA over-approximate
/// (or match) UTL — never classify fewer nodes as certain than UTL does.
#[test]
fn fsa_and_svpa_refine_utl_on_diamond_with_no_observations() {
    let model = diamond_model();

    let classify = |kind: SolverKind| -> Classification {
        let mut solver = build_solver(kind, &model);
        solver.encode_crash(&crash_stack()).unwrap();
        solver.find_known_execution().unwrap()
    };

    let utl = classify(SolverKind::Utl);
    let fsa = classify(SolverKind::Fsa);
    let svpa = classify(SolverKind::Svpa);

    assert!(fsa.refines(&utl));
    assert!(svpa.refines(&utl));
}

/// §8 boundary case: `stackonly` classification equals the classification
/// reached with no observations encoded at all.
#[test]
fn empty_observations_match_crash_reachability_alone() {
    let model = diamond_model();
    let mut solver = build_solver(SolverKind::Utl, &model);
    solver.encode_crash(&crash_stack()).unwrap();
    let c = solver.find_known_execution().unwrap();
    assert!(c.is_valid_partition_of(&all_node_ids(&model)));
    assert!(c.maybe.contains("l"));
    assert!(c.maybe.contains("r"));
}
