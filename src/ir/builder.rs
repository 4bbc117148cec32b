//! Closure-based graph construction.
//!
//! Blocks are addressed by small integer labels. Label `n` always becomes
//! `BlockId(n + 2)` (ids 0 and 1 are the start and end blocks), the start block
//! falls through to label 0, and predecessors are wired in ascending label order
//! with the start block first. Phi inputs are given per predecessor label and may
//! name values that are defined later; they are resolved once every block exists.
//!
//! ```rust,ignore
//! use ssaopt::ir::{ConditionCode, DataType, GraphBuilder};
//!
//! // sum = 0; for (i = 0; i < 10; i++) sum += i; return sum;
//! let graph = GraphBuilder::new("sum").build(|f| {
//!     let zero = f.constant(0, DataType::Int32);
//!     let one = f.constant(1, DataType::Int32);
//!     let ten = f.constant(10, DataType::Int32);
//!     f.block(0, |b| b.jump(1));
//!     let (i, sum) = f.block(1, |b| {
//!         let i = b.phi(DataType::Int32, &[(0, zero)]);
//!         let sum = b.phi(DataType::Int32, &[(0, zero)]);
//!         b.branch(ConditionCode::Lt, i, ten, 2, 3);
//!         (i, sum)
//!     });
//!     f.block(2, |b| {
//!         let next_sum = b.add(sum, i);
//!         let next_i = b.add(i, one);
//!         b.phi_input(i, 2, next_i);
//!         b.phi_input(sum, 2, next_sum);
//!         b.jump(1);
//!     });
//!     f.block(3, |b| b.ret(sum));
//! })?;
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::{
    ir::{
        Arch, BlockFlags, BlockId, ConditionCode, DataType, Graph, InstFlags, InstId, Opcode,
        SafePointData, VirtualRegister,
    },
    Error, Result,
};

/// Label of the start block in Phi input lists.
pub const START: u32 = u32::MAX;

/// Block id the builder assigns to `label`.
#[must_use]
pub const fn label(label: u32) -> BlockId {
    BlockId::new(label + 2)
}

/// Entry point of the construction DSL.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    arch: Arch,
}

impl GraphBuilder {
    /// Starts a graph named `name` for the default architecture.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: Arch::default(),
        }
    }

    /// Sets the target architecture.
    #[must_use]
    pub fn arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Runs `body` and wires the described blocks into a closed graph.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while building: an unknown jump target, a
    /// Phi without a value for one of its predecessors, or an invalid operand.
    pub fn build<F>(self, body: F) -> Result<Graph>
    where
        F: FnOnce(&mut FunctionBuilder),
    {
        let mut builder = FunctionBuilder {
            graph: Graph::new(self.name, self.arch),
            successors: BTreeMap::new(),
            phis: Vec::new(),
            phi_values: HashMap::new(),
            error: None,
        };
        body(&mut builder);
        builder.finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Label(u32),
    End,
}

/// Function-level builder handed to [`GraphBuilder::build`].
pub struct FunctionBuilder {
    graph: Graph,
    successors: BTreeMap<u32, Vec<Target>>,
    phis: Vec<InstId>,
    phi_values: HashMap<InstId, Vec<(u32, InstId)>>,
    error: Option<Error>,
}

const POISON: InstId = InstId::new(u32::MAX);

impl FunctionBuilder {
    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
                None
            }
        }
    }

    fn block_for(&mut self, label_id: u32) -> BlockId {
        let id = label(label_id);
        while self.graph.block_capacity() <= id.index() {
            self.graph.create_block();
        }
        id
    }

    fn emit(&mut self, block: BlockId, opcode: Opcode, ty: DataType, inputs: &[InstId]) -> InstId {
        let result = self.graph.add_inst(block, opcode, ty, inputs);
        self.record(result).unwrap_or(POISON)
    }

    /// Read access to the graph under construction.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Adds parameter `index` of type `ty` to the start block.
    pub fn param(&mut self, index: u32, ty: DataType) -> InstId {
        let start = self.graph.start();
        self.emit(start, Opcode::Parameter { index }, ty, &[])
    }

    /// Returns the start-block constant `value` of type `ty`.
    pub fn constant(&mut self, value: i64, ty: DataType) -> InstId {
        let result = self.graph.constant(value, ty);
        self.record(result).unwrap_or(POISON)
    }

    /// Describes block `label` and returns what the closure returns.
    pub fn block<R>(&mut self, label_id: u32, body: impl FnOnce(&mut BlockBuilder<'_>) -> R) -> R {
        let block = self.block_for(label_id);
        self.successors.entry(label_id).or_default();
        let mut builder = BlockBuilder {
            function: self,
            label: label_id,
            block,
        };
        body(&mut builder)
    }

    /// Adds the input of `phi` flowing in from block `pred`.
    pub fn phi_input(&mut self, phi: InstId, pred: u32, value: InstId) {
        self.phi_values.entry(phi).or_default().push((pred, value));
    }

    /// Marks block `label` as an on-stack-replacement entry.
    pub fn osr_entry(&mut self, label_id: u32) {
        let block = self.block_for(label_id);
        let result = self.graph.set_block_flags(block, BlockFlags::OSR_ENTRY, true);
        self.record(result);
    }

    /// Sets instruction flags.
    pub fn flags(&mut self, inst: InstId, flags: InstFlags) {
        let result = self.graph.set_flags(inst, flags);
        self.record(result);
    }

    fn finish(mut self) -> Result<Graph> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let mut graph = self.graph;
        let start = graph.start();
        let end = graph.end();

        if !self.successors.is_empty() {
            graph.add_edge(start, label(0))?;
        }
        for (&from, targets) in &self.successors {
            for target in targets {
                let to = match *target {
                    Target::End => end,
                    Target::Label(to) if self.successors.contains_key(&to) => label(to),
                    Target::Label(to) => {
                        return Err(malformed_error!("Block {} jumps to undefined block {}", from, to))
                    }
                };
                graph.add_edge(label(from), to)?;
            }
        }

        // Placeholder slots for labels that were skipped.
        let placeholders: Vec<BlockId> = graph
            .block_ids()
            .filter(|&id| id != start && id != end)
            .filter(|id| !self.successors.contains_key(&(id.index() as u32 - 2)))
            .collect();
        if !placeholders.is_empty() {
            graph.remove_blocks(&placeholders)?;
        }

        for phi in self.phis {
            let values = self.phi_values.remove(&phi).unwrap_or_default();
            let block = graph
                .inst(phi)?
                .block()
                .ok_or(Error::InvalidInstruction(phi))?;
            let preds = graph.block(block)?.preds().to_vec();
            for pred in preds {
                let pred_label = if pred == start {
                    START
                } else {
                    pred.index() as u32 - 2
                };
                let value = values
                    .iter()
                    .find(|(from, _)| *from == pred_label)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| malformed_error!("Phi {} has no input from {}", phi, pred))?;
                graph.add_phi_input(phi, value)?;
            }
        }

        graph.invalidate_analyses();
        graph.loops();
        Ok(graph)
    }
}

/// Block-level builder handed to [`FunctionBuilder::block`].
pub struct BlockBuilder<'a> {
    function: &'a mut FunctionBuilder,
    label: u32,
    block: BlockId,
}

impl BlockBuilder<'_> {
    /// The block being described.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.block
    }

    fn type_of(&self, value: InstId) -> DataType {
        self.function
            .graph
            .inst(value)
            .map_or(DataType::Void, |inst| inst.ty())
    }

    /// Appends an arbitrary instruction.
    pub fn op(&mut self, opcode: Opcode, ty: DataType, inputs: &[InstId]) -> InstId {
        self.function.emit(self.block, opcode, ty, inputs)
    }

    fn binary(&mut self, opcode: Opcode, lhs: InstId, rhs: InstId) -> InstId {
        let ty = self.type_of(lhs);
        self.op(opcode, ty, &[lhs, rhs])
    }

    /// Adds a Phi with inputs given per predecessor label.
    pub fn phi(&mut self, ty: DataType, inputs: &[(u32, InstId)]) -> InstId {
        let result = self.function.graph.create_inst(Opcode::Phi, ty, &[]);
        let Some(phi) = self.function.record(result) else {
            return POISON;
        };
        let placed = self.function.graph.append_phi(self.block, phi);
        self.function.record(placed);
        self.function.phis.push(phi);
        for &(pred, value) in inputs {
            self.function.phi_input(phi, pred, value);
        }
        phi
    }

    /// Adds the input of `phi` flowing in from block `pred`.
    pub fn phi_input(&mut self, phi: InstId, pred: u32, value: InstId) {
        self.function.phi_input(phi, pred, value);
    }

    /// Start-block constant.
    pub fn constant(&mut self, value: i64, ty: DataType) -> InstId {
        self.function.constant(value, ty)
    }

    /// `lhs + rhs`
    pub fn add(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Div, lhs, rhs)
    }

    /// `lhs % rhs`
    pub fn rem(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Mod, lhs, rhs)
    }

    /// `lhs & rhs`
    pub fn and(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::And, lhs, rhs)
    }

    /// `lhs ^ rhs`
    pub fn xor(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Xor, lhs, rhs)
    }

    /// `lhs << rhs`
    pub fn shl(&mut self, lhs: InstId, rhs: InstId) -> InstId {
        self.binary(Opcode::Shl, lhs, rhs)
    }

    /// `-value`
    pub fn neg(&mut self, value: InstId) -> InstId {
        let ty = self.type_of(value);
        self.op(Opcode::Neg, ty, &[value])
    }

    /// Boolean comparison.
    pub fn compare(&mut self, cc: ConditionCode, lhs: InstId, rhs: InstId) -> InstId {
        let operand_type = self.type_of(lhs);
        self.op(Opcode::Compare { cc, operand_type }, DataType::Bool, &[lhs, rhs])
    }

    /// `array[index]` with element type `ty`.
    pub fn load_array(&mut self, ty: DataType, array: InstId, index: InstId) -> InstId {
        self.op(Opcode::LoadArray, ty, &[array, index])
    }

    /// `array[index] = value` with element type `ty`.
    pub fn store_array(&mut self, ty: DataType, array: InstId, index: InstId, value: InstId) -> InstId {
        self.op(Opcode::StoreArray, ty, &[array, index, value])
    }

    /// Allocates an array of `length` elements.
    pub fn new_array(&mut self, length: InstId) -> InstId {
        self.op(Opcode::NewArray, DataType::Reference, &[length])
    }

    /// Null check yielding the checked reference.
    pub fn null_check(&mut self, reference: InstId) -> InstId {
        self.op(Opcode::NullCheck, DataType::Reference, &[reference])
    }

    /// SafePoint recording each value in the given frame slot.
    pub fn safepoint(&mut self, live: &[(InstId, u16)]) -> InstId {
        let inputs: Vec<InstId> = live.iter().map(|(value, _)| *value).collect();
        let vregs = live
            .iter()
            .map(|(_, slot)| VirtualRegister::Slot(*slot))
            .collect();
        self.op(Opcode::SafePoint(SafePointData { vregs }), DataType::Void, &inputs)
    }

    /// Static call.
    pub fn call(&mut self, callee: u32, ty: DataType, args: &[InstId]) -> InstId {
        self.op(Opcode::CallStatic { callee }, ty, args)
    }

    /// Static call whose body was inlined; pair it with [`BlockBuilder::return_inlined`].
    pub fn call_inlined(&mut self, callee: u32, ty: DataType, args: &[InstId]) -> InstId {
        let call = self.call(callee, ty, args);
        self.function.flags(call, InstFlags::INLINED);
        call
    }

    /// End of the inlined body of `call`.
    pub fn return_inlined(&mut self, call: InstId) -> InstId {
        self.op(Opcode::ReturnInlined, DataType::Void, &[call])
    }

    /// Runtime call.
    pub fn call_runtime(&mut self, entry: u32, ty: DataType, args: &[InstId]) -> InstId {
        self.op(Opcode::CallRuntime { entry }, ty, args)
    }

    /// Sets instruction flags.
    pub fn flags(&mut self, inst: InstId, flags: InstFlags) {
        self.function.flags(inst, flags);
    }

    fn set_successors(&mut self, targets: Vec<Target>) {
        self.function.successors.insert(self.label, targets);
    }

    /// Falls through to block `target`.
    pub fn jump(&mut self, target: u32) {
        self.function.block_for(target);
        self.set_successors(vec![Target::Label(target)]);
    }

    /// Branches to `if_true` when `lhs cc rhs`, else to `if_false`.
    pub fn branch(&mut self, cc: ConditionCode, lhs: InstId, rhs: InstId, if_true: u32, if_false: u32) {
        let operand_type = self.type_of(lhs);
        self.op(Opcode::If { cc, operand_type }, DataType::Void, &[lhs, rhs]);
        self.function.block_for(if_true.max(if_false));
        self.set_successors(vec![Target::Label(if_true), Target::Label(if_false)]);
    }

    /// Branches to `if_true` when `value cc imm`, else to `if_false`.
    pub fn branch_imm(&mut self, cc: ConditionCode, value: InstId, imm: i64, if_true: u32, if_false: u32) {
        let operand_type = self.type_of(value);
        self.op(Opcode::IfImm { cc, imm, operand_type }, DataType::Void, &[value]);
        self.function.block_for(if_true.max(if_false));
        self.set_successors(vec![Target::Label(if_true), Target::Label(if_false)]);
    }

    /// Returns `value`.
    pub fn ret(&mut self, value: InstId) {
        self.op(Opcode::Return, DataType::Void, &[value]);
        self.set_successors(vec![Target::End]);
    }

    /// Returns without a value.
    pub fn ret_void(&mut self) {
        self.op(Opcode::ReturnVoid, DataType::Void, &[]);
        self.set_successors(vec![Target::End]);
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{builder::label, ConditionCode, DataType, GraphBuilder};

    #[test]
    fn test_builder_wires_loop() {
        let graph = GraphBuilder::new("count")
            .build(|f| {
                let zero = f.constant(0, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                let ten = f.constant(10, DataType::Int32);
                f.block(0, |b| b.jump(1));
                let i = f.block(1, |b| {
                    let i = b.phi(DataType::Int32, &[(0, zero)]);
                    b.branch(ConditionCode::Lt, i, ten, 2, 3);
                    i
                });
                f.block(2, |b| {
                    let next = b.add(i, one);
                    b.phi_input(i, 2, next);
                    b.jump(1);
                });
                f.block(3, |b| b.ret(i));
            })
            .unwrap();

        let header = graph.block(label(1)).unwrap();
        assert_eq!(header.preds(), &[label(0), label(2)]);
        assert_eq!(header.succs(), &[label(2), label(3)]);
        assert!(header.is_loop_header());
        let phi = header.phis()[0];
        assert_eq!(graph.inst(phi).unwrap().inputs().len(), 2);
        assert_eq!(graph.block(graph.end()).unwrap().preds(), &[label(3)]);
    }

    #[test]
    fn test_missing_phi_input_is_an_error() {
        let result = GraphBuilder::new("broken").build(|f| {
            let zero = f.constant(0, DataType::Int32);
            f.block(0, |b| b.jump(1));
            f.block(1, |b| {
                let p = b.phi(DataType::Int32, &[(0, zero)]);
                b.branch_imm(ConditionCode::Eq, p, 0, 2, 1);
            });
            f.block(2, |b| b.ret_void());
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_undefined_target_is_an_error() {
        let result = GraphBuilder::new("dangling").build(|f| {
            f.block(0, |b| b.jump(7));
        });
        assert!(result.is_err());
    }
}
