//! SSA maintenance utilities shared by the passes.
//!
//! - Trivial and equivalent Phi detection
//! - Loop-closing resolver Phis for values that escape a loop
//! - Live-range walks that find the SafePoints a value is live across
//! - SafePoint bridges for reference-typed resolver Phis

use std::collections::{HashSet, VecDeque};

use crate::{
    ir::{BlockId, Graph, InstId, VirtualRegister},
    Result,
};

/// What a Phi reduces to once self references are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhiValue {
    /// Two or more distinct incoming values
    Merge,
    /// Every non-self input is this value
    Same(InstId),
    /// The Phi only references itself
    Empty,
}

/// Classifies `phi` by its distinct non-self inputs.
///
/// # Errors
///
/// Fails if `phi` is not live.
pub fn phi_value(graph: &Graph, phi: InstId) -> Result<PhiValue> {
    let mut value = None;
    for &input in graph.inst(phi)?.inputs() {
        if input == phi {
            continue;
        }
        match value {
            None => value = Some(input),
            Some(seen) if seen == input => {}
            Some(_) => return Ok(PhiValue::Merge),
        }
    }
    Ok(value.map_or(PhiValue::Empty, PhiValue::Same))
}

/// Returns `true` if two Phis of the same block merge the same value from every
/// predecessor. A self reference in one matches a self reference in the other.
#[must_use]
pub fn phis_equivalent(graph: &Graph, a: InstId, b: InstId) -> bool {
    let (Ok(first), Ok(second)) = (graph.inst(a), graph.inst(b)) else {
        return false;
    };
    if a == b || first.block() != second.block() || first.ty() != second.ty() {
        return false;
    }
    let (lhs, rhs) = (first.inputs(), second.inputs());
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs)
            .all(|(&x, &y)| x == y || (x == a && y == b) || (x == b && y == a))
}

/// Values defined in `body` that are read outside of it, in block order.
///
/// # Errors
///
/// Fails if a body block is not live.
pub fn values_escaping(graph: &Graph, body: &HashSet<BlockId>) -> Result<Vec<InstId>> {
    let mut blocks: Vec<BlockId> = body.iter().copied().collect();
    blocks.sort_unstable();

    let mut escaping = Vec::new();
    for block in blocks {
        for id in graph.block(block)?.all_insts() {
            let escapes = graph.inst(id)?.users().iter().any(|&user| {
                graph
                    .inst(user)
                    .ok()
                    .and_then(|inst| inst.block())
                    .is_some_and(|user_block| !body.contains(&user_block))
            });
            if escapes {
                escaping.push(id);
            }
        }
    }
    Ok(escaping)
}

/// Routes every value that escapes `body` through a Phi in `resolver`.
///
/// `resolver` must be a block outside `body` whose predecessors all lie in the loop
/// and which dominates every outside use (the block that a loop exit edge was split
/// into). Outside uses are rewired to the resolver Phis. Returns the
/// `(value, resolver_phi)` pairs in creation order.
///
/// # Errors
///
/// Fails on a malformed graph; the graph is left unchanged only if the first step
/// fails.
pub fn close_loop(
    graph: &mut Graph,
    body: &HashSet<BlockId>,
    resolver: BlockId,
) -> Result<Vec<(InstId, InstId)>> {
    let pred_count = graph.block(resolver)?.preds().len();
    let escaping = values_escaping(graph, body)?;
    let mut pairs = Vec::with_capacity(escaping.len());

    for value in escaping {
        let ty = graph.inst(value)?.ty();
        let inputs = vec![value; pred_count];
        let phi = graph.add_phi(resolver, ty, &inputs)?;

        let outside_users: Vec<InstId> = graph
            .inst(value)?
            .users()
            .iter()
            .copied()
            .filter(|&user| {
                user != phi
                    && graph
                        .inst(user)
                        .ok()
                        .and_then(|inst| inst.block())
                        .is_some_and(|block| !body.contains(&block))
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for user in outside_users {
            let inputs = graph.inst(user)?.inputs().to_vec();
            for (index, input) in inputs.into_iter().enumerate() {
                if input == value {
                    graph.set_input(user, index, phi)?;
                }
            }
        }
        pairs.push((value, phi));
    }
    Ok(pairs)
}

/// SafePoints that lie on a path from the definition of `value` to one of its
/// uses, in discovery order.
///
/// The walk runs backwards from each use until it meets the definition. A use by
/// a Phi starts at the end of the matching predecessor; a SafePoint that reads the
/// value counts as a use, not as a crossing.
///
/// # Errors
///
/// Fails if `value` is not live or is not placed.
pub fn safepoints_crossed(graph: &Graph, value: InstId) -> Result<Vec<InstId>> {
    let def = graph.inst(value)?;
    let def_block = def
        .block()
        .ok_or_else(|| malformed_error!("{} is not placed", value))?;

    let mut found = Vec::new();
    let mut seen_safepoints = HashSet::new();
    let mut visited = HashSet::new();
    let mut worklist = VecDeque::new();

    let mut users: Vec<InstId> = def.users().to_vec();
    users.sort_unstable();
    users.dedup();

    for user in users {
        let inst = graph.inst(user)?;
        let Some(user_block) = inst.block() else {
            continue;
        };
        if inst.is_phi() {
            let preds = graph.block(user_block)?.preds();
            for (index, &input) in inst.inputs().iter().enumerate() {
                if input == value {
                    if let Some(&pred) = preds.get(index) {
                        worklist.push_back((pred, None));
                    }
                }
            }
        } else {
            worklist.push_back((user_block, graph.position(user)));
        }
    }

    while let Some((block, upto)) = worklist.pop_front() {
        if upto.is_none() && !visited.insert(block) {
            continue;
        }
        let insts = graph.block(block)?.insts();
        let limit = upto.unwrap_or(insts.len());
        let mut reached_def = false;
        for &id in insts[..limit].iter().rev() {
            if id == value {
                reached_def = true;
                break;
            }
            if graph.inst(id)?.opcode().is_safepoint() && seen_safepoints.insert(id) {
                found.push(id);
            }
        }
        if reached_def || block == def_block {
            continue;
        }
        for &pred in graph.block(block)?.preds() {
            worklist.push_back((pred, None));
        }
    }
    Ok(found)
}

/// Records each reference-typed Phi in every SafePoint its live range crosses,
/// as a [`VirtualRegister::Bridge`]. Returns the number of bridges added.
///
/// # Errors
///
/// Fails on a malformed graph.
pub fn bridge_reference_phis(graph: &mut Graph, phis: &[InstId]) -> Result<usize> {
    let mut added = 0;
    for &phi in phis {
        if !graph.contains_inst(phi) || !graph.inst(phi)?.ty().is_reference() {
            continue;
        }
        for safepoint in safepoints_crossed(graph, phi)? {
            if !graph.inst(safepoint)?.inputs().contains(&phi) {
                graph.add_safepoint_input(safepoint, phi, VirtualRegister::Bridge)?;
                added += 1;
            }
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::ir::{
        builder::label,
        ssa::{phi_value, phis_equivalent, safepoints_crossed, PhiValue},
        ConditionCode, DataType, GraphBuilder,
    };

    #[test]
    fn test_phi_classification() {
        let graph = GraphBuilder::new("phis")
            .build(|f| {
                let a = f.param(0, DataType::Int32);
                let b = f.param(1, DataType::Int32);
                f.block(0, |blk| blk.branch(ConditionCode::Lt, a, b, 1, 2));
                f.block(1, |blk| blk.jump(3));
                f.block(2, |blk| blk.jump(3));
                f.block(3, |blk| {
                    let same = blk.phi(DataType::Int32, &[(1, a), (2, a)]);
                    let merge = blk.phi(DataType::Int32, &[(1, a), (2, b)]);
                    let merge2 = blk.phi(DataType::Int32, &[(1, a), (2, b)]);
                    let sum = blk.add(same, merge);
                    let sum = blk.add(sum, merge2);
                    blk.ret(sum);
                });
            })
            .unwrap();

        let phis = graph.block(label(3)).unwrap().phis().to_vec();
        let a = graph.parameters()[0];
        assert_eq!(phi_value(&graph, phis[0]).unwrap(), PhiValue::Same(a));
        assert_eq!(phi_value(&graph, phis[1]).unwrap(), PhiValue::Merge);
        assert!(phis_equivalent(&graph, phis[1], phis[2]));
        assert!(!phis_equivalent(&graph, phis[0], phis[1]));
    }

    #[test]
    fn test_safepoints_crossed_in_loop() {
        let graph = GraphBuilder::new("crossed")
            .build(|f| {
                let r = f.param(0, DataType::Reference);
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
                    b.safepoint(&[]);
                    let next = b.add(i, one);
                    b.phi_input(i, 2, next);
                    b.jump(1);
                });
                f.block(3, |b| {
                    let v = b.load_array(DataType::Int32, r, zero);
                    b.ret(v);
                });
            })
            .unwrap();

        let r = graph.parameters()[0];
        let crossed = safepoints_crossed(&graph, r).unwrap();
        assert_eq!(crossed.len(), 1);
        assert_eq!(graph.inst(crossed[0]).unwrap().block(), Some(label(2)));

        let body: HashSet<_> = [label(1), label(2)].into_iter().collect();
        assert!(crate::ir::ssa::values_escaping(&graph, &body)
            .unwrap()
            .is_empty());
    }
}
