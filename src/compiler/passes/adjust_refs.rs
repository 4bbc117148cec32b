//! Strength reduction of array addressing into raw-pointer chains.
//!
//! An array access recomputes `base + data_offset + index * size` every time. This
//! pass materializes `base + data_offset + c * size` once as a raw pointer (the
//! chain *head*) and turns every following access on the same base into a
//! `Load`/`Store` relative to that head:
//!
//! ```text
//!   v1 = LoadArray a, (i + 10)      p  = AddI a, D+80
//!   v2 = LoadArray a, (i + 12)  =>  v1 = Load p, i << 3, +0
//!                                   v2 = Load p, i << 3, +16
//! ```
//!
//! A raw pointer is not a GC root, so a SafePoint (or a call, which may collect)
//! ends every chain; the next access materializes a fresh head.
//!
//! Chains cross block boundaries in reverse post-order: a block starts with the
//! heads its processed predecessors all agree on. Loop headers always start empty,
//! their back edges have not been seen yet.

use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    compiler::{pass::GraphPass, EventKind, OptimizerConfig, PassContext},
    ir::{BlockId, DataType, Graph, InstId, Opcode},
    utils::math::exact_log2,
    Result,
};

const NAME: &str = "adjust-refs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    ptr: InstId,
    /// Byte offset of `ptr` from the array base
    offset: i64,
}

/// Live heads keyed by the array reference they were computed from.
type Chains = HashMap<InstId, Head>;

/// An array access with its index split into `variable + constant`.
struct Access {
    id: InstId,
    ty: DataType,
    base: InstId,
    variable: Option<InstId>,
    constant: i64,
    store: bool,
}

/// Rewrites array accesses into pointer arithmetic plus raw loads and stores.
pub struct AdjustRefsPass;

impl Default for AdjustRefsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AdjustRefsPass {
    /// Creates a new AdjustRefs pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn decompose(graph: &Graph, index: InstId) -> Result<(Option<InstId>, i64)> {
        if let Some(value) = graph.constant_value(index) {
            return Ok((None, value));
        }
        let inst = graph.inst(index)?;
        let operand = |i: usize| inst.input(i).and_then(|input| graph.constant_value(input).map(|c| (input, c)));
        let split = match inst.opcode() {
            Opcode::Add => match (operand(0), operand(1)) {
                (_, Some((_, c))) => inst.input(0).map(|x| (x, c)),
                (Some((_, c)), None) => inst.input(1).map(|x| (x, c)),
                (None, None) => None,
            },
            Opcode::Sub => operand(1).and_then(|(_, c)| inst.input(0).map(|x| (x, c.wrapping_neg()))),
            _ => None,
        };
        Ok(match split {
            Some((variable, constant)) => (Some(variable), constant),
            None => (Some(index), 0),
        })
    }

    fn access(graph: &Graph, id: InstId) -> Result<Option<Access>> {
        let inst = graph.inst(id)?;
        let store = match inst.opcode() {
            Opcode::LoadArray => false,
            Opcode::StoreArray => true,
            _ => return Ok(None),
        };
        let (Some(base), Some(index)) = (inst.input(0), inst.input(1)) else {
            return Err(malformed_error!("Array access {} is missing operands", id));
        };
        let (variable, constant) = Self::decompose(graph, index)?;
        Ok(Some(Access {
            id,
            ty: inst.ty(),
            base,
            variable,
            constant,
            store,
        }))
    }

    /// Heads every processed predecessor of `block` agrees on.
    fn inherited(graph: &Graph, block: BlockId, done: &HashMap<BlockId, Chains>) -> Result<Chains> {
        let preds = graph.block(block)?.preds();
        let mut states = Vec::with_capacity(preds.len());
        for pred in preds {
            match done.get(pred) {
                Some(state) => states.push(state),
                None => return Ok(Chains::new()),
            }
        }
        let Some((first, rest)) = states.split_first() else {
            return Ok(Chains::new());
        };
        Ok(first
            .iter()
            .filter(|(base, head)| rest.iter().all(|state| state.get(base) == Some(head)))
            .map(|(&base, &head)| (base, head))
            .collect())
    }

    fn rewrite(graph: &mut Graph, ctx: &PassContext<'_>, chains: &mut Chains, access: &Access) -> Result<bool> {
        let arch = graph.arch();
        let size = ctx.runtime.type_size(access.ty, arch);
        let Some(shift) = exact_log2(size) else {
            return Ok(false);
        };
        let Some(offset) = access
            .constant
            .checked_mul(i64::from(size))
            .and_then(|bytes| bytes.checked_add(ctx.runtime.array_data_offset(arch)))
        else {
            return Ok(false);
        };

        let (ptr, imm) = match chains.get(&access.base) {
            Some(head) => (head.ptr, offset - head.offset),
            None => {
                let opcode = if offset < 0 { Opcode::SubI(-offset) } else { Opcode::AddI(offset) };
                let ptr = graph.create_inst(opcode, DataType::Pointer, &[access.base])?;
                graph.insert_before(access.id, ptr)?;
                chains.insert(access.base, Head { ptr, offset });
                trace!("{}: new chain head {ptr} for {}", graph.name(), access.base);
                (ptr, 0)
            }
        };

        graph.set_input(access.id, 0, ptr)?;
        match access.variable {
            Some(variable) => graph.set_input(access.id, 1, variable)?,
            None => graph.remove_input(access.id, 1)?,
        }
        let indexed = access.variable.is_some();
        let opcode = if access.store {
            Opcode::Store { shift, imm, indexed }
        } else {
            Opcode::Load { shift, imm, indexed }
        };
        graph.set_opcode(access.id, opcode, access.ty)?;

        ctx.record(EventKind::AccessRebased, NAME, access.id.index())
            .message(format!("{} rebased on {ptr} at {imm:+}", access.id));
        Ok(true)
    }
}

impl GraphPass for AdjustRefsPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Rewrites array accesses into raw pointer chains between SafePoints"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_adjust_refs
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        if graph.has_unpublished_edits() {
            graph.invalidate_analyses();
        }
        let forest = graph.loops();
        let rpo = graph.rpo();

        let mut done: HashMap<BlockId, Chains> = HashMap::with_capacity(rpo.len());
        let mut rewritten = 0usize;
        for block in rpo {
            let mut chains = if forest.is_header(block) {
                Chains::new()
            } else {
                Self::inherited(graph, block, &done)?
            };

            let insts = graph.block(block)?.insts().to_vec();
            for id in insts {
                let inst = graph.inst(id)?;
                let opcode = inst.opcode();
                if opcode.is_safepoint() || (opcode.is_call() && !inst.is_inlined_call()) {
                    chains.clear();
                    continue;
                }
                if let Some(access) = Self::access(graph, id)? {
                    if Self::rewrite(graph, ctx, &mut chains, &access)? {
                        rewritten += 1;
                    }
                }
            }
            done.insert(block, chains);
        }

        if rewritten > 0 {
            debug!("{}: rebased {rewritten} array accesses", graph.name());
        }
        Ok(rewritten > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{GraphEvaluator, HeapArray, Value},
        compiler::{passes::AdjustRefsPass, EventKind, EventLog, GraphPass, OptimizerConfig, PassContext},
        ir::{builder::label, DataType, Graph, GraphBuilder, GraphChecker, InstId, Opcode},
        runtime::MockRuntime,
    };

    fn run(graph: &mut Graph) -> EventLog {
        let config = OptimizerConfig::default();
        let runtime = MockRuntime::default();
        let events = EventLog::new();
        let ctx = PassContext::new(&config, &runtime, &events);
        AdjustRefsPass::new().run(graph, &ctx).unwrap();
        events
    }

    /// Two constant-index loads of `a`, optionally separated by a SafePoint.
    fn two_loads(safepoint: bool) -> (Graph, [InstId; 2]) {
        let mut loads = None;
        let graph = GraphBuilder::new("two_loads")
            .build(|f| {
                let a = f.param(0, DataType::Reference);
                let one = f.constant(1, DataType::Int32);
                let three = f.constant(3, DataType::Int32);
                f.block(0, |b| {
                    let x = b.load_array(DataType::Int32, a, one);
                    if safepoint {
                        b.safepoint(&[(a, 0)]);
                    }
                    let y = b.load_array(DataType::Int32, a, three);
                    let sum = b.add(x, y);
                    loads = Some([x, y]);
                    b.ret(sum);
                });
            })
            .unwrap();
        (graph, loads.unwrap())
    }

    fn pointer_of(graph: &Graph, load: InstId) -> InstId {
        graph.inst(load).unwrap().input(0).unwrap()
    }

    #[test]
    fn test_chain_reuses_head() {
        let (mut graph, [x, y]) = two_loads(false);
        let events = run(&mut graph);
        graph.invalidate_analyses();
        GraphChecker::new().check(&graph).unwrap();

        let head = pointer_of(&graph, x);
        assert_eq!(head, pointer_of(&graph, y));
        assert_eq!(graph.opcode(head).unwrap(), &Opcode::AddI(16 + 4));
        assert_eq!(
            graph.opcode(y).unwrap(),
            &Opcode::Load {
                shift: 2,
                imm: 8,
                indexed: false
            }
        );
        assert_eq!(events.count_kind(EventKind::AccessRebased), 2);

        let runtime = MockRuntime::default();
        let heap = vec![HeapArray {
            ty: DataType::Int32,
            cells: vec![0, 10, 20, 30],
        }];
        let outcome = GraphEvaluator::new(&graph, &runtime)
            .run(&[Value::Ref(Some(0))], heap)
            .unwrap();
        assert_eq!(outcome.value, Some(Value::Int(40)));
    }

    #[test]
    fn test_safepoint_breaks_chain() {
        let (mut graph, [x, y]) = two_loads(true);
        run(&mut graph);
        graph.invalidate_analyses();
        GraphChecker::new().check(&graph).unwrap();

        let first = pointer_of(&graph, x);
        let second = pointer_of(&graph, y);
        assert_ne!(first, second);
        assert_eq!(graph.opcode(second).unwrap(), &Opcode::AddI(16 + 12));
        assert_eq!(graph.inst(second).unwrap().block(), Some(label(0)));
    }
}
