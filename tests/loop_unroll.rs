//! Loop unrolling integration tests.
//!
//! Covers the instruction budget law for loops that keep their side exits, factor
//! clamping, the treatment of calls, full unrolling of short constant loops, loops
//! that must be left alone and the SafePoint bridge for escaping references.
//! Every transformed graph is checked structurally and against the evaluator.

use ssaopt::{
    analysis::{GraphEvaluator, HeapArray, Value},
    compiler::{EventKind, EventLog, GraphPass, LoopUnrollPass, OptimizerConfig, PassContext},
    ir::{
        ConditionCode, DataType, Graph, GraphBuilder, GraphChecker, GraphComparator, InstId, Opcode,
        VirtualRegister,
    },
    runtime::MockRuntime,
    Result,
};

fn unroll(graph: &mut Graph, config: &OptimizerConfig) -> Result<(bool, EventLog)> {
    let runtime = MockRuntime::default();
    let events = EventLog::new();
    let ctx = PassContext::new(config, &runtime, &events);
    let changed = LoopUnrollPass::new().run(graph, &ctx)?;
    Ok((changed, events))
}

fn evaluate(graph: &Graph, args: &[i64]) -> Result<Option<Value>> {
    let runtime = MockRuntime::default();
    let args: Vec<Value> = args.iter().map(|&a| Value::Int(a)).collect();
    Ok(GraphEvaluator::new(graph, &runtime).run(&args, Vec::new())?.value)
}

/// Number of Phis and instructions in the blocks of the only loop.
fn loop_size(graph: &mut Graph) -> Result<usize> {
    let forest = graph.loops();
    assert_eq!(forest.len(), 1);
    let mut size = 0;
    for lp in forest.iter() {
        for block in lp.blocks() {
            size += graph.block(block)?.all_insts().count();
        }
    }
    Ok(size)
}

/// `i = 0; do { safepoint; a = 3 * i + 1; i += 1 } while (i < n); return a`
///
/// One header Phi and one SafePoint stay fixed; four instructions are copied per
/// unrolled iteration. The bound is a parameter, so the loop keeps its exits.
fn rotated(with_call: bool) -> Result<Graph> {
    GraphBuilder::new("rotated").build(|f| {
        let n = f.param(0, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        let three = f.constant(3, DataType::Int32);
        f.block(0, |b| b.jump(1));
        let a = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            b.safepoint(&[]);
            let m = b.mul(i, three);
            let a = b.add(m, one);
            if with_call {
                b.call(7, DataType::Void, &[]);
            }
            let next = b.add(i, one);
            b.phi_input(i, 1, next);
            b.branch(ConditionCode::Lt, next, n, 1, 2);
            a
        });
        f.block(2, |b| b.ret(a));
    })
}

#[test]
fn test_side_exit_budget_law() -> Result<()> {
    let mut graph = rotated(false)?;
    assert_eq!(loop_size(&mut graph)?, 6);
    let inputs = [-3, 0, 1, 2, 9, 10, 11, 25];
    let expected: Vec<_> = inputs.iter().map(|&n| evaluate(&graph, &[n])).collect::<Result<_>>()?;

    let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(100, 10))?;
    assert!(changed);
    assert_eq!(events.count_kind(EventKind::LoopUnrolled), 1);
    GraphChecker::new().check(&graph)?;

    // 10 * 4 copied + 2 fixed
    assert_eq!(loop_size(&mut graph)?, 42);

    let actual: Vec<_> = inputs.iter().map(|&n| evaluate(&graph, &[n])).collect::<Result<_>>()?;
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn test_only_the_header_keeps_a_safepoint() -> Result<()> {
    let mut graph = rotated(false)?;
    unroll(&mut graph, &OptimizerConfig::unroll(100, 4))?;

    let forest = graph.loops();
    let mut safepoints = Vec::new();
    for lp in forest.iter() {
        for block in lp.blocks() {
            for id in graph.block(block)?.insts() {
                if graph.inst(*id)?.opcode().is_safepoint() {
                    safepoints.push(block);
                }
            }
        }
    }
    assert_eq!(safepoints.len(), 1);
    assert!(forest.is_header(safepoints[0]));
    Ok(())
}

#[test]
fn test_factor_clamped_to_budget() -> Result<()> {
    // (limit, requested factor, resulting loop size)
    for (limit, factor, size) in [(20, 10, 18), (30, 8, 30), (100, 3, 14), (14, 2, 10)] {
        let mut graph = rotated(false)?;
        let (changed, _) = unroll(&mut graph, &OptimizerConfig::unroll(limit, factor))?;
        assert!(changed, "limit {limit}, factor {factor}");
        assert_eq!(loop_size(&mut graph)?, size, "limit {limit}, factor {factor}");
        assert!(size <= limit);
        GraphChecker::new().check(&graph)?;
    }
    Ok(())
}

#[test]
fn test_budget_below_two_copies() -> Result<()> {
    let mut graph = rotated(false)?;
    let before = graph.clone();
    let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(9, 4))?;
    assert!(!changed);
    assert!(events.is_empty());
    assert!(GraphComparator::new(&before, &graph).equivalent());
    Ok(())
}

#[test]
fn test_calls_block_unrolling_unless_allowed() -> Result<()> {
    let mut graph = rotated(true)?;
    let before = graph.clone();
    let (changed, _) = unroll(&mut graph, &OptimizerConfig::unroll(100, 10))?;
    assert!(!changed);
    assert!(GraphComparator::new(&before, &graph).equivalent());

    let config = OptimizerConfig {
        unroll_with_calls: true,
        ..OptimizerConfig::unroll(100, 10)
    };
    let (changed, _) = unroll(&mut graph, &config)?;
    assert!(changed);
    GraphChecker::new().check(&graph)?;
    // 10 * 5 copied + 2 fixed
    assert_eq!(loop_size(&mut graph)?, 52);
    Ok(())
}

/// `s = 0; i = 0; do { s += i; i += 1 } while (i < trips); return s`
fn constant_sum(trips: i64) -> Result<Graph> {
    GraphBuilder::new("constant_sum").build(|f| {
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        let bound = f.constant(trips, DataType::Int32);
        f.block(0, |b| b.jump(1));
        let s = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            let s = b.phi(DataType::Int32, &[(0, zero)]);
            b.safepoint(&[]);
            let s2 = b.add(s, i);
            let i2 = b.add(i, one);
            b.phi_input(i, 1, i2);
            b.phi_input(s, 1, s2);
            b.branch(ConditionCode::Lt, i2, bound, 1, 2);
            s2
        });
        f.block(2, |b| b.ret(s));
    })
}

#[test]
fn test_full_unroll_of_short_loop() -> Result<()> {
    let mut graph = constant_sum(5)?;
    let (changed, events) = unroll(&mut graph, &OptimizerConfig::default())?;
    assert!(changed);
    assert!(events.has(EventKind::LoopFullyUnrolled));
    assert!(graph.loops().is_empty());
    GraphChecker::new().check(&graph)?;

    let branches = graph
        .inst_ids()
        .filter(|&id| {
            graph
                .inst(id)
                .is_ok_and(|inst| inst.block().is_some() && matches!(inst.opcode(), Opcode::If { .. }))
        })
        .count();
    assert_eq!(branches, 0);
    assert_eq!(evaluate(&graph, &[])?, Some(Value::Int(10)));
    Ok(())
}

#[test]
fn test_trip_count_above_full_unroll_limit() -> Result<()> {
    let mut graph = constant_sum(12)?;
    let config = OptimizerConfig {
        full_unroll_max_trip_count: 8,
        ..OptimizerConfig::unroll(100, 4)
    };
    let (changed, events) = unroll(&mut graph, &config)?;
    assert!(changed);
    assert!(!events.has(EventKind::LoopFullyUnrolled));
    assert!(events.has(EventKind::LoopUnrolled));
    assert_eq!(graph.loops().len(), 1);
    GraphChecker::new().check(&graph)?;
    assert_eq!(evaluate(&graph, &[])?, Some(Value::Int(66)));
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
fn test_endless_and_irreducible_loops_are_left_alone() -> Result<()> {
    for mut graph in [endless()?, two_entry_cycle()?] {
        assert_eq!(graph.loops().len(), 1);
        let before = graph.clone();
        let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(1000, 2))?;
        assert!(!changed, "{}", graph.name());
        assert!(events.is_empty());
        assert!(GraphComparator::new(&before, &graph).equivalent(), "{}", graph.name());
    }
    Ok(())
}

/// `do { safepoint(arr); c = nullcheck(arr); c[a] = a; a += 1 } while (a < b);`
/// followed by `safepoint(arr); return c[b]`. The checked reference `c` escapes
/// the loop and is read after the second SafePoint, which does not record it.
fn store_then_read() -> Result<(Graph, InstId)> {
    let mut exit_safepoint = None;
    let graph = GraphBuilder::new("store_then_read").build(|f| {
        let a = f.param(0, DataType::Uint64);
        let bound = f.param(1, DataType::Uint64);
        let arr = f.param(2, DataType::Reference);
        let one = f.constant(1, DataType::Uint64);
        f.block(0, |b| b.jump(1));
        let checked = f.block(1, |b| {
            let i = b.phi(DataType::Uint64, &[(0, a)]);
            b.safepoint(&[(arr, 0)]);
            let checked = b.null_check(arr);
            b.store_array(DataType::Uint64, checked, i, i);
            let next = b.add(i, one);
            b.phi_input(i, 1, next);
            b.branch(ConditionCode::Lt, next, bound, 1, 2);
            checked
        });
        f.block(2, |b| {
            exit_safepoint = Some(b.safepoint(&[(arr, 0)]));
            let x = b.load_array(DataType::Uint64, checked, bound);
            b.ret(x);
        });
    })?;
    Ok((graph, exit_safepoint.expect("block 2 was built")))
}

#[test]
fn test_escaping_reference_bridged_into_safepoint() -> Result<()> {
    let (mut graph, safepoint) = store_then_read()?;
    let original = graph.clone();
    GraphChecker::new().check(&graph)?;
    // The checked reference is live across the exit SafePoint without a root.
    assert!(GraphChecker::new().with_safepoint_roots().check(&graph).is_err());

    let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(100, 2))?;
    assert!(changed);
    assert_eq!(events.count_kind(EventKind::SafePointBridged), 1);
    GraphChecker::new().with_safepoint_roots().check(&graph)?;

    // The resolver Phi of the checked reference is now a root of the exit SafePoint.
    let inst = graph.inst(safepoint)?;
    let bridged = *inst.inputs().last().expect("bridge input");
    assert!(graph.inst(bridged)?.is_phi());
    assert_eq!(graph.inst(bridged)?.ty(), DataType::Reference);
    let vregs = &inst.opcode().safepoint_data().expect("still a SafePoint").vregs;
    assert_eq!(vregs, &[VirtualRegister::Slot(0), VirtualRegister::Bridge]);

    let runtime = MockRuntime::default();
    for n in [0, 1, 2, 5, 6] {
        let args = [Value::Int(0), Value::Int(n), Value::Ref(Some(0))];
        let heap = vec![HeapArray {
            ty: DataType::Uint64,
            cells: vec![9; 8],
        }];
        let before = GraphEvaluator::new(&original, &runtime).run(&args, heap.clone())?;
        let after = GraphEvaluator::new(&graph, &runtime).run(&args, heap)?;
        assert_eq!(after, before, "n = {n}");
    }
    Ok(())
}
