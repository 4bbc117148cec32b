//! AdjustRefs integration tests.
//!
//! Array accesses become raw `Load`/`Store` instructions relative to a pointer head
//! `AddI base, D + c * size` (or `SubI` when negative). These tests pin the offset
//! arithmetic for several data offsets `D`, the reuse of heads across blocks and
//! the rule that a SafePoint ends every chain.

use ssaopt::{
    analysis::{GraphEvaluator, HeapArray, Value},
    compiler::{AdjustRefsPass, EventKind, EventLog, GraphPass, OptimizerConfig, PassContext},
    ir::{ConditionCode, DataType, Graph, GraphBuilder, GraphChecker, InstId, Opcode},
    runtime::MockRuntime,
    Result,
};

fn adjust(graph: &mut Graph, runtime: &MockRuntime) -> Result<EventLog> {
    let config = OptimizerConfig::default();
    let events = EventLog::new();
    let ctx = PassContext::new(&config, runtime, &events);
    AdjustRefsPass::new().run(graph, &ctx)?;
    Ok(events)
}

fn pointer_of(graph: &Graph, access: InstId) -> Result<InstId> {
    Ok(graph.inst(access)?.input(0).expect("access has a base"))
}

fn array(ty: DataType, len: i64) -> HeapArray {
    HeapArray {
        ty,
        cells: (0..len).map(|i| i * 3 + 1).collect(),
    }
}

/// `a[i + 10] + b[i - 1] + c[i - 20]` over Int64, Int8 and Int32 arrays.
fn mixed_offsets() -> Result<(Graph, [InstId; 3])> {
    let mut loads = None;
    let graph = GraphBuilder::new("mixed_offsets").build(|f| {
        let a = f.param(0, DataType::Reference);
        let b_arr = f.param(1, DataType::Reference);
        let c = f.param(2, DataType::Reference);
        let i = f.param(3, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        let ten = f.constant(10, DataType::Int32);
        let twenty = f.constant(20, DataType::Int32);
        f.block(0, |b| {
            let plus_ten = b.add(i, ten);
            let x = b.load_array(DataType::Int64, a, plus_ten);
            let minus_one = b.sub(i, one);
            let y = b.load_array(DataType::Int8, b_arr, minus_one);
            let minus_twenty = b.sub(i, twenty);
            let z = b.load_array(DataType::Int32, c, minus_twenty);
            let sum = b.add(x, y);
            let sum = b.add(sum, z);
            loads = Some([x, y, z]);
            b.ret(sum);
        });
    })?;
    Ok((graph, loads.expect("block 0 was built")))
}

#[test]
fn test_offset_folding_for_data_offsets() -> Result<()> {
    for data_offset in [16, 24] {
        let runtime = MockRuntime { data_offset };
        let (mut graph, [x, y, z]) = mixed_offsets()?;
        let heap = vec![
            array(DataType::Int64, 40),
            array(DataType::Int8, 40),
            array(DataType::Int32, 40),
        ];
        let args = [Value::Ref(Some(0)), Value::Ref(Some(1)), Value::Ref(Some(2)), Value::Int(25)];
        let expected = GraphEvaluator::new(&graph, &runtime).run(&args, heap.clone())?;

        let events = adjust(&mut graph, &runtime)?;
        assert_eq!(events.count_kind(EventKind::AccessRebased), 3);
        GraphChecker::new().check(&graph)?;

        let heads = [pointer_of(&graph, x)?, pointer_of(&graph, y)?, pointer_of(&graph, z)?];
        assert_eq!(graph.opcode(heads[0])?, &Opcode::AddI(data_offset + 80));
        assert_eq!(graph.opcode(heads[1])?, &Opcode::AddI(data_offset - 1));
        assert_eq!(graph.opcode(heads[2])?, &Opcode::SubI(80 - data_offset));
        for (access, shift) in [(x, 3), (y, 0), (z, 2)] {
            assert_eq!(
                graph.opcode(access)?,
                &Opcode::Load {
                    shift,
                    imm: 0,
                    indexed: true
                }
            );
        }

        let actual = GraphEvaluator::new(&graph, &runtime).run(&args, heap)?;
        assert_eq!(actual, expected, "data offset {data_offset}");
    }
    Ok(())
}

/// `s = 0; for (i = 0; i < n - 1; i++) { safepoint; s += a[i] + a[i + 1] } return s`
fn pairwise_sum() -> Result<(Graph, [InstId; 2])> {
    let mut loads = None;
    let graph = GraphBuilder::new("pairwise_sum").build(|f| {
        let a = f.param(0, DataType::Reference);
        let n = f.param(1, DataType::Int32);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        let last = f.block(0, |b| {
            let last = b.sub(n, one);
            b.jump(1);
            last
        });
        let (i, s) = f.block(1, |b| {
            let i = b.phi(DataType::Int32, &[(0, zero)]);
            let s = b.phi(DataType::Int32, &[(0, zero)]);
            b.branch(ConditionCode::Lt, i, last, 2, 3);
            (i, s)
        });
        f.block(2, |b| {
            b.safepoint(&[(a, 0)]);
            let x = b.load_array(DataType::Int32, a, i);
            let next = b.add(i, one);
            let y = b.load_array(DataType::Int32, a, next);
            let pair = b.add(x, y);
            let s2 = b.add(s, pair);
            b.phi_input(i, 2, next);
            b.phi_input(s, 2, s2);
            loads = Some([x, y]);
            b.jump(1);
        });
        f.block(3, |b| b.ret(s));
    })?;
    Ok((graph, loads.expect("block 2 was built")))
}

#[test]
fn test_chain_inside_loop_body() -> Result<()> {
    let runtime = MockRuntime::default();
    let (mut graph, [x, y]) = pairwise_sum()?;
    let original = graph.clone();

    adjust(&mut graph, &runtime)?;
    GraphChecker::new().require_loop_safepoints(true).check(&graph)?;

    let head = pointer_of(&graph, x)?;
    assert_eq!(pointer_of(&graph, y)?, head);
    assert_eq!(graph.opcode(head)?, &Opcode::AddI(runtime.data_offset));
    assert_eq!(
        graph.opcode(y)?,
        &Opcode::Load {
            shift: 2,
            imm: 4,
            indexed: true
        }
    );
    // Both accesses index with the loop counter itself.
    assert_eq!(graph.inst(x)?.input(1), graph.inst(y)?.input(1));

    for n in [0, 1, 2, 6] {
        let args = [Value::Ref(Some(0)), Value::Int(n)];
        let heap = vec![array(DataType::Int32, 6)];
        let before = GraphEvaluator::new(&original, &runtime).run(&args, heap.clone())?;
        let after = GraphEvaluator::new(&graph, &runtime).run(&args, heap)?;
        assert_eq!(after, before, "n = {n}");
    }
    Ok(())
}

/// Four constant-index loads spread over a diamond; block 1 optionally polls.
fn diamond(safepoint: bool) -> Result<(Graph, [InstId; 4])> {
    let mut loads = None;
    let graph = GraphBuilder::new("diamond").build(|f| {
        let a = f.param(0, DataType::Reference);
        let c = f.param(1, DataType::Int32);
        let idx: Vec<InstId> = (0..4).map(|k| f.constant(k, DataType::Int32)).collect();
        let x0 = f.block(0, |b| {
            let x0 = b.load_array(DataType::Int32, a, idx[0]);
            b.branch(ConditionCode::Gt, c, idx[0], 1, 2);
            x0
        });
        let x1 = f.block(1, |b| {
            if safepoint {
                b.safepoint(&[(a, 0)]);
            }
            let x1 = b.load_array(DataType::Int32, a, idx[1]);
            b.jump(3);
            x1
        });
        let x2 = f.block(2, |b| {
            let x2 = b.load_array(DataType::Int32, a, idx[2]);
            b.jump(3);
            x2
        });
        f.block(3, |b| {
            let picked = b.phi(DataType::Int32, &[(1, x1), (2, x2)]);
            let x3 = b.load_array(DataType::Int32, a, idx[3]);
            let sum = b.add(x0, picked);
            let sum = b.add(sum, x3);
            loads = Some([x0, x1, x2, x3]);
            b.ret(sum);
        });
    })?;
    Ok((graph, loads.expect("block 3 was built")))
}

#[test]
fn test_head_shared_across_blocks() -> Result<()> {
    let runtime = MockRuntime::default();
    let (mut graph, loads) = diamond(false)?;
    adjust(&mut graph, &runtime)?;
    GraphChecker::new().check(&graph)?;

    let head = pointer_of(&graph, loads[0])?;
    for (k, &load) in loads.iter().enumerate() {
        assert_eq!(pointer_of(&graph, load)?, head);
        assert_eq!(
            graph.opcode(load)?,
            &Opcode::Load {
                shift: 2,
                imm: 4 * k as i64,
                indexed: false
            }
        );
    }
    Ok(())
}

#[test]
fn test_safepoint_ends_chain_across_blocks() -> Result<()> {
    let runtime = MockRuntime::default();
    let (mut graph, [x0, x1, x2, x3]) = diamond(true)?;
    let original = graph.clone();
    adjust(&mut graph, &runtime)?;
    GraphChecker::new().check(&graph)?;

    let head = pointer_of(&graph, x0)?;
    assert_eq!(pointer_of(&graph, x2)?, head);
    // Block 1 starts over after its SafePoint.
    let polled = pointer_of(&graph, x1)?;
    assert_ne!(polled, head);
    assert_eq!(graph.opcode(polled)?, &Opcode::AddI(runtime.data_offset + 4));
    // The join sees two different heads and materializes its own.
    let joined = pointer_of(&graph, x3)?;
    assert_ne!(joined, head);
    assert_ne!(joined, polled);
    assert_eq!(graph.opcode(joined)?, &Opcode::AddI(runtime.data_offset + 12));

    for c in [-1, 1] {
        let args = [Value::Ref(Some(0)), Value::Int(c)];
        let heap = vec![array(DataType::Int32, 4)];
        let before = GraphEvaluator::new(&original, &runtime).run(&args, heap.clone())?;
        let after = GraphEvaluator::new(&graph, &runtime).run(&args, heap)?;
        assert_eq!(after, before, "c = {c}");
    }
    Ok(())
}

/// `a[0] + a[1]` in one block, optionally polling between the two loads.
fn adjacent_loads(safepoint: bool) -> Result<(Graph, [InstId; 2])> {
    let mut loads = None;
    let graph = GraphBuilder::new("adjacent_loads").build(|f| {
        let a = f.param(0, DataType::Reference);
        let zero = f.constant(0, DataType::Int32);
        let one = f.constant(1, DataType::Int32);
        f.block(0, |b| {
            let x = b.load_array(DataType::Int32, a, zero);
            if safepoint {
                b.safepoint(&[(a, 0)]);
            }
            let y = b.load_array(DataType::Int32, a, one);
            let sum = b.add(x, y);
            loads = Some([x, y]);
            b.ret(sum);
        });
    })?;
    Ok((graph, loads.expect("block 0 was built")))
}

#[test]
fn test_safepoint_between_adjacent_loads() -> Result<()> {
    let runtime = MockRuntime::default();

    let (mut graph, [x, y]) = adjacent_loads(false)?;
    adjust(&mut graph, &runtime)?;
    GraphChecker::new().check(&graph)?;
    assert_eq!(pointer_of(&graph, y)?, pointer_of(&graph, x)?);
    assert_eq!(
        graph.opcode(y)?,
        &Opcode::Load {
            shift: 2,
            imm: 4,
            indexed: false
        }
    );

    let (mut graph, [x, y]) = adjacent_loads(true)?;
    let original = graph.clone();
    let events = adjust(&mut graph, &runtime)?;
    assert_eq!(events.count_kind(EventKind::AccessRebased), 2);
    GraphChecker::new().check(&graph)?;
    let first = pointer_of(&graph, x)?;
    let second = pointer_of(&graph, y)?;
    assert_ne!(first, second);
    assert_eq!(graph.opcode(first)?, &Opcode::AddI(runtime.data_offset));
    assert_eq!(graph.opcode(second)?, &Opcode::AddI(runtime.data_offset + 4));

    let args = [Value::Ref(Some(0))];
    let heap = vec![array(DataType::Int32, 2)];
    let before = GraphEvaluator::new(&original, &runtime).run(&args, heap.clone())?;
    let after = GraphEvaluator::new(&graph, &runtime).run(&args, heap)?;
    assert_eq!(after, before);
    Ok(())
}
