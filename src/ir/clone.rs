//! Region cloning.
//!
//! [`RegionCloner`] duplicates a set of blocks. Instructions are copied with their
//! flags; an input is rewired to the copy when its producer was cloned (or seeded),
//! and left pointing at the original otherwise. Successor order is preserved:
//!
//! - an edge between two region blocks becomes an edge between their copies;
//! - an edge leaving the region is duplicated, and the Phis of its target receive
//!   the mapped value that flowed along the original edge;
//! - edges entering the region are not copied, so a cloned Phi keeps only the
//!   inputs of its in-region predecessors.
//!
//! Callers pre-seed the value map to replace instructions instead of copying them,
//! typically loop-header Phis mapped to their entry or back-edge values, and can
//! leave SafePoints out of the copy.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{BlockId, Graph, InstId, Opcode},
    Error, Result,
};

/// Block and value correspondence produced by a clone.
#[derive(Debug, Clone, Default)]
pub struct CloneMap {
    /// Original block to copy
    pub blocks: HashMap<BlockId, BlockId>,
    /// Original value to copy (or seed)
    pub values: HashMap<InstId, InstId>,
}

impl CloneMap {
    /// Copy of `block`, if it was part of the region.
    #[must_use]
    pub fn block(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).copied()
    }

    /// Copy of `value`, or `value` itself when it was not cloned.
    #[must_use]
    pub fn value(&self, value: InstId) -> InstId {
        self.values.get(&value).copied().unwrap_or(value)
    }
}

/// Clones a set of blocks within one graph.
#[derive(Debug, Clone, Default)]
pub struct RegionCloner {
    blocks: Vec<BlockId>,
    seeds: HashMap<InstId, InstId>,
    skip_safepoints: bool,
}

impl RegionCloner {
    /// Prepares a clone of `blocks`. Copies are created in the given order.
    #[must_use]
    pub fn new(blocks: &[BlockId]) -> Self {
        Self {
            blocks: blocks.to_vec(),
            ..Self::default()
        }
    }

    /// Maps `original` to `value` instead of copying it.
    #[must_use]
    pub fn seed(mut self, original: InstId, value: InstId) -> Self {
        self.seeds.insert(original, value);
        self
    }

    /// Leaves SafePoints out of the copy.
    #[must_use]
    pub fn skip_safepoints(mut self, skip: bool) -> Self {
        self.skip_safepoints = skip;
        self
    }

    /// Performs the clone.
    ///
    /// # Errors
    ///
    /// Fails if a region block is not live, the region contains the start or end
    /// block, or a Phi lacks an input for one of its predecessors.
    pub fn clone_into(&self, graph: &mut Graph) -> Result<CloneMap> {
        let region: HashSet<BlockId> = self.blocks.iter().copied().collect();
        for &block in &self.blocks {
            graph.block(block)?;
            if block == graph.start() || block == graph.end() {
                return Err(malformed_error!("Cannot clone {}", block));
            }
        }

        let mut map = CloneMap {
            values: self.seeds.clone(),
            ..CloneMap::default()
        };
        for &block in &self.blocks {
            let copy = graph.create_block();
            map.blocks.insert(block, copy);
        }
        let originals: HashMap<BlockId, BlockId> =
            map.blocks.iter().map(|(&orig, &copy)| (copy, orig)).collect();

        // Create every copy first so that forward references can be remapped.
        let mut cloned = Vec::new();
        let mut cloned_phis = Vec::new();
        for &block in &self.blocks {
            let copy = map.blocks[&block];
            let (phis, insts) = {
                let slot = graph.block(block)?;
                (slot.phis().to_vec(), slot.insts().to_vec())
            };

            for phi in phis {
                if self.seeds.contains_key(&phi) {
                    continue;
                }
                let (ty, flags) = {
                    let inst = graph.inst(phi)?;
                    (inst.ty(), inst.flags())
                };
                let new_phi = graph.create_inst(Opcode::Phi, ty, &[])?;
                graph.append_phi(copy, new_phi)?;
                graph.set_flags(new_phi, flags)?;
                map.values.insert(phi, new_phi);
                cloned_phis.push((block, phi, new_phi));
            }

            for id in insts {
                if self.seeds.contains_key(&id) {
                    continue;
                }
                let (opcode, ty, inputs, flags) = {
                    let inst = graph.inst(id)?;
                    (
                        inst.opcode().clone(),
                        inst.ty(),
                        inst.inputs().to_vec(),
                        inst.flags(),
                    )
                };
                if self.skip_safepoints && opcode.is_safepoint() {
                    continue;
                }
                let new_inst = graph.create_inst(opcode, ty, &inputs)?;
                graph.append_inst(copy, new_inst)?;
                graph.set_flags(new_inst, flags)?;
                map.values.insert(id, new_inst);
                cloned.push((id, new_inst));
            }
        }

        for &(original, copy) in &cloned {
            let inputs = graph.inst(original)?.inputs().to_vec();
            for (index, input) in inputs.into_iter().enumerate() {
                if let Some(&mapped) = map.values.get(&input) {
                    graph.set_input(copy, index, mapped)?;
                }
            }
        }

        for &block in &self.blocks {
            let copy = map.blocks[&block];
            let succs = graph.block(block)?.succs().to_vec();
            for succ in succs {
                if let Some(&succ_copy) = map.blocks.get(&succ) {
                    graph.add_edge(copy, succ_copy)?;
                    continue;
                }
                let pred_index = graph
                    .block(succ)?
                    .pred_index(block)
                    .ok_or(Error::InvalidEdge { from: block, to: succ })?;
                graph.add_edge(copy, succ)?;
                let phis = graph.block(succ)?.phis().to_vec();
                for phi in phis {
                    let value = graph
                        .inst(phi)?
                        .input(pred_index)
                        .ok_or(Error::InvalidInput { inst: phi, index: pred_index })?;
                    graph.add_phi_input(phi, map.value(value))?;
                }
            }
        }

        for (block, phi, new_phi) in cloned_phis {
            let copy = map.blocks[&block];
            let preds = graph.block(copy)?.preds().to_vec();
            for pred_copy in preds {
                let pred = originals.get(&pred_copy).copied().unwrap_or(pred_copy);
                let index = graph
                    .block(block)?
                    .pred_index(pred)
                    .filter(|_| region.contains(&pred))
                    .ok_or(Error::InvalidEdge { from: pred, to: block })?;
                let value = graph
                    .inst(phi)?
                    .input(index)
                    .ok_or(Error::InvalidInput { inst: phi, index })?;
                graph.add_phi_input(new_phi, map.value(value))?;
            }
        }

        Ok(map)
    }
}
