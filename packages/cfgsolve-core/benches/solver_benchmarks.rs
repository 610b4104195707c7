//! Benchmarks for the three execution solvers across growing CFGs.
//!
//! Targets are about relative scaling, not absolute thresholds: FSA and
//! SVPA do on-the-fly product-state search so they should scale roughly
//! linearly with path length on these chain/diamond graphs, while UTL's
//! SCC-condensation approach should stay close to constant per node.

use cfgsolve_core::cfg_model::raw::{RawEdge, RawGraph, RawNode};
use cfgsolve_core::cfg_model::CfgModel;
use cfgsolve_core::failure_report::{CrashStack, FailureReport, StackFrame};
use cfgsolve_core::solver::{build_solver, SolverKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn raw_node(id: &str, kind: &str) -> RawNode {
    RawNode {
        id: id.to_string(),
        kind: kind.to_string(),
        procedure: Some("main".to_string()),
        file: None,
        lines: Vec::new(),
        syntax: None,
        csi_label: None,
        attrs: Default::default(),
    }
}

fn raw_flow(src: &str, dst: &str) -> RawEdge {
    RawEdge {
        source: src.to_string(),
        target: dst.to_string(),
        edge_type: "flow".to_string(),
        scope: Some("intraprocedural".to_string()),
        key: None,
        when: None,
    }
}

/// A linear chain `n:main:0 -> n:main:1 -> ... -> n:main:{len-1}`, entry at
/// 0 and exit at `len-1`, crash at the midpoint.
fn linear_chain(len: usize) -> (RawGraph, String) {
    let mut nodes = Vec::with_capacity(len);
    let mut edges = Vec::with_capacity(len - 1);
    for i in 0..len {
        let kind = if i == 0 {
            "entry"
        } else if i == len - 1 {
            "exit"
        } else {
            "expression"
        };
        nodes.push(raw_node(&format!("n:main:{i}"), kind));
        if i > 0 {
            edges.push(raw_flow(&format!("n:main:{}", i - 1), &format!("n:main:{i}")));
        }
    }
    let crash_at = format!("n:main:{}", len / 2);
    (RawGraph { nodes, edges }, crash_at)
}

/// `width` independent diamonds chained end to end: entry -> (branch L/R) ->
/// join -> (next diamond) -> ... -> exit. Exercises solvers' branch handling,
/// unlike the pure linear chain.
fn diamond_chain(width: usize) -> (RawGraph, String) {
    let mut nodes = vec![raw_node("n:main:entry", "entry")];
    let mut edges = Vec::new();
    let mut prev = "n:main:entry".to_string();
    for i in 0..width {
        let l = format!("n:main:{i}:l");
        let r = format!("n:main:{i}:r");
        let join = format!("n:main:{i}:join");
        nodes.push(raw_node(&l, "expression"));
        nodes.push(raw_node(&r, "expression"));
        nodes.push(raw_node(&join, "expression"));
        edges.push(raw_flow(&prev, &l));
        edges.push(raw_flow(&prev, &r));
        edges.push(raw_flow(&l, &join));
        edges.push(raw_flow(&r, &join));
        prev = join;
    }
    nodes.push(raw_node("n:main:exit", "exit"));
    edges.push(raw_flow(&prev, "n:main:exit"));
    let crash_at = prev.clone();
    (RawGraph { nodes, edges }, crash_at)
}

fn crash_stack_at(node_id: &str) -> FailureReport {
    let stack = CrashStack(vec![StackFrame::Crash {
        crash: vec![node_id.to_string()],
    }]);
    FailureReport::new(stack, Vec::new(), Vec::new()).unwrap()
}

fn classify(model: &CfgModel, report: &FailureReport, kind: SolverKind) {
    let mut solver = build_solver(kind, model);
    solver.encode_crash(report.crash_stack()).unwrap();
    black_box(solver.find_known_execution().unwrap());
}

fn bench_linear_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_chain");
    for &len in &[8usize, 32, 128] {
        let (raw, crash_at) = linear_chain(len);
        let model = CfgModel::from_raw(raw).unwrap();
        let report = crash_stack_at(&crash_at);

        for kind in [SolverKind::Fsa, SolverKind::Svpa, SolverKind::Utl] {
            group.bench_with_input(BenchmarkId::new(format!("{kind:?}"), len), &len, |b, _| {
                b.iter(|| classify(&model, &report, kind));
            });
        }
    }
    group.finish();
}

fn bench_diamond_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond_chain");
    for &width in &[2usize, 8, 16] {
        let (raw, crash_at) = diamond_chain(width);
        let model = CfgModel::from_raw(raw).unwrap();
        let report = crash_stack_at(&crash_at);

        for kind in [SolverKind::Fsa, SolverKind::Svpa, SolverKind::Utl] {
            group.bench_with_input(BenchmarkId::new(format!("{kind:?}"), width), &width, |b, _| {
                b.iter(|| classify(&model, &report, kind));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_linear_chains, bench_diamond_chains);
criterion_main!(benches);
