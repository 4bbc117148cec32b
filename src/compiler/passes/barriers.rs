//! Memory barrier placement.
//!
//! Instructions flagged `MEM_BARRIER` require a barrier after them. Two flagged
//! instructions in a row only need the barrier of the second one, as long as
//! nothing between them can publish memory to another thread or to the collector:
//! a call, a store of a reference, a SafePoint or a return. The earlier flag is
//! cleared in that case.

use log::debug;

use crate::{
    compiler::{pass::GraphPass, EventKind, OptimizerConfig, PassContext},
    ir::{Graph, InstFlags, InstId, Instruction},
    Result,
};

const NAME: &str = "memory-barrier-placement";

/// Merges consecutive memory barriers within a block.
pub struct MemoryBarrierPlacementPass;

impl Default for MemoryBarrierPlacementPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBarrierPlacementPass {
    /// Creates a new barrier placement pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Whether `inst` requires every pending barrier to be emitted before it.
    fn is_fence(inst: &Instruction) -> bool {
        let opcode = inst.opcode();
        opcode.is_safepoint()
            || opcode.is_return()
            || (opcode.is_call() && !inst.is_inlined_call())
            || (opcode.is_store() && inst.ty().is_reference())
    }
}

impl GraphPass for MemoryBarrierPlacementPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes barriers covered by a later barrier in the same block"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_barrier_placement
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        let blocks: Vec<_> = graph.block_ids().collect();
        let mut elided = 0usize;
        for block in blocks {
            let insts = graph.block(block)?.insts().to_vec();
            let mut pending: Option<InstId> = None;
            for id in insts {
                let inst = graph.inst(id)?;
                let flags = inst.flags();
                if flags.contains(InstFlags::MEM_BARRIER) {
                    if let Some(previous) = pending {
                        let cleared = graph.inst(previous)?.flags() - InstFlags::MEM_BARRIER;
                        graph.set_flags(previous, cleared)?;
                        ctx.record(EventKind::BarrierElided, NAME, previous.index())
                            .message(format!("covered by {id}"));
                        elided += 1;
                    }
                    pending = Some(id);
                } else if Self::is_fence(inst) {
                    pending = None;
                }
            }
        }

        if elided > 0 {
            debug!("{}: elided {elided} memory barriers", graph.name());
        }
        Ok(elided > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{
            passes::MemoryBarrierPlacementPass, EventKind, EventLog, GraphPass, OptimizerConfig,
            PassContext,
        },
        ir::{DataType, GraphBuilder, InstFlags, InstId},
        runtime::MockRuntime,
    };

    #[test]
    fn test_merges_barriers_until_a_fence() {
        let mut stores: Vec<InstId> = Vec::new();
        let mut graph = GraphBuilder::new("barriers")
            .build(|f| {
                let a = f.param(0, DataType::Reference);
                let zero = f.constant(0, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                f.block(0, |b| {
                    for (index, value) in [(zero, one), (one, zero)] {
                        let store = b.store_array(DataType::Int32, a, index, value);
                        b.flags(store, InstFlags::MEM_BARRIER);
                        stores.push(store);
                    }
                    b.safepoint(&[(a, 0)]);
                    let store = b.store_array(DataType::Int32, a, zero, zero);
                    b.flags(store, InstFlags::MEM_BARRIER);
                    stores.push(store);
                    b.ret_void();
                });
            })
            .unwrap();

        let config = OptimizerConfig::default();
        let runtime = MockRuntime::default();
        let events = EventLog::new();
        let ctx = PassContext::new(&config, &runtime, &events);
        assert!(MemoryBarrierPlacementPass::new().run(&mut graph, &ctx).unwrap());

        let flagged: Vec<bool> = stores
            .iter()
            .map(|&id| graph.inst(id).unwrap().flags().contains(InstFlags::MEM_BARRIER))
            .collect();
        assert_eq!(flagged, [false, true, true]);
        assert_eq!(events.count_kind(EventKind::BarrierElided), 1);

        // A second run finds nothing left to merge.
        assert!(!MemoryBarrierPlacementPass::new().run(&mut graph, &ctx).unwrap());
    }
}
