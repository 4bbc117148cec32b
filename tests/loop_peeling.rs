//! Loop peeling integration tests.
//!
//! Peeled graphs must match the original on the evaluator; loops with several
//! exits, no exit, two entries or unpermitted calls stay untouched.

use ssaopt::{
    analysis::{GraphEvaluator, HeapArray, Outcome, Value},
    compiler::{
        EventKind, EventLog, GraphPass, LoopPeelingPass, OptimizerConfig, PassContext, PassScheduler,
    },
    ir::{builder::label, ConditionCode, DataType, Graph, GraphBuilder, GraphChecker, GraphComparator},
    runtime::MockRuntime,
    Result,
};

fn peeling_config() -> OptimizerConfig {
    OptimizerConfig {
        enable_peeling: true,
        verify_after_each_pass: true,
        ..OptimizerConfig::default()
    }
}

fn peel(graph: &mut Graph) -> Result<(bool, EventLog)> {
    let config = peeling_config();
    let runtime = MockRuntime::default();
    let events = EventLog::new();
    let ctx = PassContext::new(&config, &runtime, &events);
    let changed = LoopPeelingPass::new().run(graph, &ctx)?;
    Ok((changed, events))
}

fn run_on_array(graph: &Graph, n: i64, cells: &[i64]) -> Result<Outcome> {
    let runtime = MockRuntime::default();
    let heap = vec![HeapArray {
        ty: DataType::Int32,
        cells: cells.to_vec(),
    }];
    GraphEvaluator::new(graph, &runtime).run(&[Value::Ref(Some(0)), Value::Int(n)], heap)
}

/// `for (i = 0; i < n; i++) a[i] = i * i`
fn fill_squares() -> Result<Graph> {
    GraphBuilder::new("fill_squares").build(|f| {
        let a = f.param(0, DataType::Reference);
        let n = f.param(1, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| b.jump(1));
        let i = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            b.branch(ConditionCode::Lt, i, n, 2, 3);
            i
        });
        f.block(2, |b| {
            b.safepoint(&[(a, 0)]);
            let square = b.mul(i, i);
            b.store_array(DataType::Int32, a, i, square);
            let next = b.add(i, one);
            b.phi_input(i, 2, next);
            b.jump(1);
        });
        f.block(3, |b| b.ret_void());
    })
}

/// `s = 0; for (i = 0; i < n; i++) { x = a[i]; if (x == 0) break; s += x } return s`
fn sum_until_zero() -> Result<Graph> {
    GraphBuilder::new("sum_until_zero").build(|f| {
        let a = f.param(0, DataType::Reference);
        let n = f.param(1, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| b.jump(1));
        let (i, s) = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            let s = b.phi(DataType::Int32, &[(0, zero)]);
            b.branch(ConditionCode::Lt, i, n, 2, 4);
            (i, s)
        });
        let x = f.block(2, |b| {
            b.safepoint(&[(a, 0)]);
            let x = b.load_array(DataType::Int32, a, i);
            b.branch(ConditionCode::Eq, x, zero, 4, 3);
            x
        });
        f.block(3, |b| {
            let s2 = b.add(s, x);
            let i2 = b.add(i, one);
            b.phi_input(s, 3, s2);
            b.phi_input(i, 3, i2);
            b.jump(1);
        });
        f.block(4, |b| b.ret(s));
    })
}

#[test]
fn test_peeled_stores_match() -> Result<()> {
    let mut graph = fill_squares()?;
    let original = graph.clone();

    let (changed, events) = peel(&mut graph)?;
    assert!(changed);
    assert_eq!(events.count_kind(EventKind::LoopPeeled), 1);
    GraphChecker::new().require_loop_safepoints(true).check(&graph)?;

    for n in [0, 1, 3, 8] {
        let before = run_on_array(&original, n, &[-1; 8])?;
        let after = run_on_array(&graph, n, &[-1; 8])?;
        assert_eq!(after, before, "n = {n}");
    }
    Ok(())
}

#[test]
fn test_peeled_copy_runs_before_the_loop() -> Result<()> {
    let mut graph = fill_squares()?;
    peel(&mut graph)?;

    let forest = graph.loops();
    assert_eq!(forest.len(), 1);
    let lp = forest
        .loop_for_header(label(1))
        .expect("the original header still heads the loop");
    let dominance = graph.dominance();
    let entry = lp.preheader.expect("peeled loop has a pre-header");
    // The entry block now reaches the loop only through the peeled iteration.
    assert!(dominance.strictly_dominates(label(0), entry));
    assert!(!graph.block(label(1))?.preds().contains(&label(0)));
    Ok(())
}

#[test]
fn test_loop_with_two_exits_is_not_peeled() -> Result<()> {
    let mut graph = sum_until_zero()?;
    let before = graph.clone();
    let (changed, events) = peel(&mut graph)?;
    assert!(!changed);
    assert!(events.is_empty());
    assert!(GraphComparator::new(&before, &graph).equivalent());
    Ok(())
}

#[test]
fn test_peeling_then_standard_pipeline() -> Result<()> {
    let mut graph = fill_squares()?;
    let original = graph.clone();

    let config = peeling_config();
    let runtime = MockRuntime::default();
    let events = EventLog::new();
    let ctx = PassContext::new(&config, &runtime, &events);
    assert!(PassScheduler::standard().run(&mut graph, &ctx)?);
    assert!(events.has(EventKind::LoopPeeled));
    assert_eq!(events.errors().count(), 0);
    GraphChecker::new().check(&graph)?;

    for n in [0, 1, 2, 5, 8] {
        let before = run_on_array(&original, n, &[7; 8])?;
        let after = run_on_array(&graph, n, &[7; 8])?;
        assert_eq!(after.heap, before.heap, "n = {n}");
    }
    Ok(())
}

/// `a = p; for (;;) a += 1` with no way out.
fn endless() -> Result<Graph> {
    GraphBuilder::new("endless").build(|f| {
        let p = f.param(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| b.jump(1));
        f.block(1, |b| {
            let a = b.phi(DataType::Int32, &[(0, p)]);
            let next = b.add(a, one);
            b.phi_input(a, 1, next);
            b.jump(1);
        });
    })
}

/// A cycle between blocks 1 and 2 that is entered at both of them.
fn two_entry_cycle() -> Result<Graph> {
    GraphBuilder::new("two_entry_cycle").build(|f| {
        let n = f.param(0, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| b.branch(ConditionCode::Lt, zero, n, 1, 2));
        let x = f.block(1, |b| {
            let x = b.phi(DataType::Int32, &[(0, zero)]);
            b.safepoint(&[]);
            b.branch(ConditionCode::Lt, x, n, 2, 3);
            x
        });
        f.block(2, |b| {
            let y = b.phi(DataType::Int32, &[(0, n), (1, x)]);
            let next = b.add(y, one);
            b.phi_input(x, 2, next);
            b.jump(1);
        });
        f.block(3, |b| b.ret(x));
    })
}

#[test]
fn test_endless_and_irreducible_loops_are_not_peeled() -> Result<()> {
    for mut graph in [endless()?, two_entry_cycle()?] {
        assert_eq!(graph.loops().len(), 1);
        let before = graph.clone();
        let (changed, events) = peel(&mut graph)?;
        assert!(!changed, "{}", graph.name());
        assert!(events.is_empty());
        assert!(GraphComparator::new(&before, &graph).equivalent(), "{}", graph.name());
    }
    Ok(())
}

/// `for (i = 0; i < n; i++) { safepoint; log(i) }`
fn logging_loop() -> Result<Graph> {
    GraphBuilder::new("logging_loop").build(|f| {
        let n = f.param(0, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| b.jump(1));
        let i = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            b.branch(ConditionCode::Lt, i, n, 2, 3);
            i
        });
        f.block(2, |b| {
            b.safepoint(&[]);
            b.call(11, DataType::Void, &[i]);
            let next = b.add(i, one);
            b.phi_input(i, 2, next);
            b.jump(1);
        });
        f.block(3, |b| b.ret_void());
    })
}

#[test]
fn test_calls_need_their_own_switch() -> Result<()> {
    let runtime = MockRuntime::default();
    let try_peel = |config: &OptimizerConfig| -> Result<bool> {
        let mut graph = logging_loop()?;
        let events = EventLog::new();
        let ctx = PassContext::new(config, &runtime, &events);
        let changed = LoopPeelingPass::new().run(&mut graph, &ctx)?;
        if changed {
            GraphChecker::new().check(&graph)?;
        }
        Ok(changed)
    };

    assert!(!try_peel(&peeling_config())?);
    let unroll_only = OptimizerConfig {
        unroll_with_calls: true,
        ..peeling_config()
    };
    assert!(!try_peel(&unroll_only)?);
    let with_calls = OptimizerConfig {
        peel_with_calls: true,
        ..peeling_config()
    };
    assert!(try_peel(&with_calls)?);
    Ok(())
}
