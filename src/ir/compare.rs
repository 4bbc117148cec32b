//! Structural equivalence of two graphs.
//!
//! Two graphs are equivalent when a walk from their start blocks, following
//! successors in order, pairs up every block and every instruction such that the
//! paired instructions have the same opcode, type, flags and mapped inputs, and the
//! paired blocks have mapped predecessor and successor lists. Ids may differ.

use std::collections::{HashMap, VecDeque};

use crate::ir::{BlockId, Graph, InstId};

/// Compares two graphs up to renumbering.
#[derive(Debug, Clone, Copy)]
pub struct GraphComparator<'a> {
    left: &'a Graph,
    right: &'a Graph,
}

#[derive(Default)]
struct Mapping {
    blocks: HashMap<BlockId, BlockId>,
    insts: HashMap<InstId, InstId>,
}

impl<'a> GraphComparator<'a> {
    /// Prepares a comparison of `left` against `right`.
    #[must_use]
    pub fn new(left: &'a Graph, right: &'a Graph) -> Self {
        Self { left, right }
    }

    /// Returns `true` if the graphs are structurally equivalent.
    #[must_use]
    pub fn equivalent(&self) -> bool {
        self.difference().is_none()
    }

    /// Describes the first difference found, or `None` for equivalent graphs.
    #[must_use]
    pub fn difference(&self) -> Option<String> {
        let (left, right) = (self.left, self.right);
        if left.block_count() != right.block_count() {
            return Some(format!(
                "block count {} != {}",
                left.block_count(),
                right.block_count()
            ));
        }
        if left.inst_count() != right.inst_count() {
            return Some(format!(
                "instruction count {} != {}",
                left.inst_count(),
                right.inst_count()
            ));
        }

        let mut mapping = Mapping::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([(left.start(), right.start())]);
        mapping.blocks.insert(left.start(), right.start());
        mapping.blocks.insert(left.end(), right.end());

        while let Some((a, b)) = queue.pop_front() {
            order.push((a, b));
            let (Ok(block_a), Ok(block_b)) = (left.block(a), right.block(b)) else {
                return Some(format!("{a} or {b} is not live"));
            };
            if block_a.succs().len() != block_b.succs().len() {
                return Some(format!("{a} and {b} differ in successor count"));
            }
            for (&succ_a, &succ_b) in block_a.succs().iter().zip(block_b.succs()) {
                match mapping.blocks.get(&succ_a) {
                    Some(&mapped) if mapped == succ_b => {}
                    Some(_) => return Some(format!("successor {succ_a} of {a} maps elsewhere")),
                    None => {
                        mapping.blocks.insert(succ_a, succ_b);
                        queue.push_back((succ_a, succ_b));
                    }
                }
            }
        }

        for &(a, b) in &order {
            if let Some(diff) = self.pair_instructions(&mut mapping, a, b) {
                return Some(diff);
            }
        }
        for &(a, b) in &order {
            if let Some(diff) = self.compare_block(&mapping, a, b) {
                return Some(diff);
            }
        }
        None
    }

    fn pair_instructions(&self, mapping: &mut Mapping, a: BlockId, b: BlockId) -> Option<String> {
        let (block_a, block_b) = (self.left.block(a).ok()?, self.right.block(b).ok()?);
        if block_a.phis().len() != block_b.phis().len()
            || block_a.insts().len() != block_b.insts().len()
        {
            return Some(format!("{a} and {b} differ in instruction count"));
        }
        for (x, y) in block_a.all_insts().zip(block_b.all_insts()) {
            mapping.insts.insert(x, y);
        }
        None
    }

    fn compare_block(&self, mapping: &Mapping, a: BlockId, b: BlockId) -> Option<String> {
        let (block_a, block_b) = (self.left.block(a).ok()?, self.right.block(b).ok()?);
        if block_a.flags() != block_b.flags() {
            return Some(format!("{a} and {b} differ in flags"));
        }
        let preds_match = block_a.preds().len() == block_b.preds().len()
            && block_a
                .preds()
                .iter()
                .zip(block_b.preds())
                .all(|(pa, pb)| mapping.blocks.get(pa) == Some(pb));
        if !preds_match {
            return Some(format!("{a} and {b} differ in predecessors"));
        }

        for (x, y) in block_a.all_insts().zip(block_b.all_insts()) {
            let (Ok(inst_x), Ok(inst_y)) = (self.left.inst(x), self.right.inst(y)) else {
                return Some(format!("{x} or {y} is not live"));
            };
            if inst_x.opcode() != inst_y.opcode()
                || inst_x.ty() != inst_y.ty()
                || inst_x.flags() != inst_y.flags()
            {
                return Some(format!("{x} in {a} differs from {y} in {b}"));
            }
            let inputs_match = inst_x.inputs().len() == inst_y.inputs().len()
                && inst_x
                    .inputs()
                    .iter()
                    .zip(inst_y.inputs())
                    .all(|(ix, iy)| mapping.insts.get(ix) == Some(iy));
            if !inputs_match {
                return Some(format!("inputs of {x} and {y} differ"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{builder::label, ConditionCode, DataType, GraphBuilder, GraphComparator};

    fn select(swap: bool) -> crate::ir::Graph {
        GraphBuilder::new("select")
            .build(|f| {
                let a = f.param(0, DataType::Int32);
                let b = f.param(1, DataType::Int32);
                f.block(0, |blk| blk.branch(ConditionCode::Gt, a, b, 1, 2));
                f.block(1, |blk| blk.jump(3));
                f.block(2, |blk| blk.jump(3));
                f.block(3, |blk| {
                    let v = if swap {
                        blk.phi(DataType::Int32, &[(1, b), (2, a)])
                    } else {
                        blk.phi(DataType::Int32, &[(1, a), (2, b)])
                    };
                    blk.ret(v);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_clone_is_equivalent() {
        let graph = select(false);
        let copy = graph.clone();
        assert!(GraphComparator::new(&graph, &copy).equivalent());
    }

    #[test]
    fn test_swapped_phi_inputs_differ() {
        let graph = select(false);
        let other = select(true);
        let diff = GraphComparator::new(&graph, &other).difference();
        assert!(diff.is_some());
    }

    #[test]
    fn test_extra_block_differs() {
        let graph = select(false);
        let mut other = graph.clone();
        other.split_edge(label(1), label(3)).unwrap();
        other.invalidate_analyses();
        assert!(!GraphComparator::new(&graph, &other).equivalent());
    }
}
