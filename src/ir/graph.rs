//! The control-flow graph in SSA form.
//!
//! A [`Graph`] is an arena: instructions and blocks live in `Vec` slots addressed by
//! [`InstId`] and [`BlockId`], removed slots become tombstones. The graph owns every
//! reverse edge as well (instruction users, block predecessors), and all editing goes
//! through its methods so that both directions stay symmetric.
//!
//! # Structure
//!
//! ```text
//! Graph
//! ├── insts: Vec<Option<Instruction>>   // arena, None = removed
//! ├── blocks: Vec<BasicBlock>           // arena, !ALIVE = removed
//! ├── start                             // Parameters, Constants, SafePoints; one successor
//! ├── end                               // no instructions; preds are the returning blocks
//! └── analysis cache                    // dominance + loops, stamped with `generation`
//! ```
//!
//! # Editing Contract
//!
//! Every mutating method validates all of its arguments before it touches the graph,
//! so an `Err` always leaves the graph unchanged.
//!
//! Control-flow primitives (`add_edge`, `remove_edge`, `redirect_edge`, `split_edge`,
//! block merging and removal) mark the graph as carrying unpublished edits. A pass
//! publishes them with [`Graph::invalidate_analyses`], which bumps the generation and
//! drops the cached analyses. Reading a cached analysis in between is a bug and trips a
//! `debug_assert!`.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    analysis::{detect_loops, Dominance, LoopForest},
    ir::{
        Arch, BasicBlock, BlockFlags, BlockId, DataType, InstFlags, InstId, Instruction, Opcode,
        VirtualRegister,
    },
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
    Error, Result,
};

/// A function body in SSA form.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    arch: Arch,
    insts: Vec<Option<Instruction>>,
    blocks: Vec<BasicBlock>,
    start: BlockId,
    end: BlockId,
    generation: u64,
    cfg_edited: bool,
    dominance: Option<Arc<Dominance>>,
    loops: Option<Arc<LoopForest>>,
}

impl Graph {
    /// Creates a graph holding only the start and end blocks.
    #[must_use]
    pub fn new(name: impl Into<String>, arch: Arch) -> Self {
        Self {
            name: name.into(),
            arch,
            insts: Vec::new(),
            blocks: vec![BasicBlock::new(), BasicBlock::new()],
            start: BlockId::new(0),
            end: BlockId::new(1),
            generation: 0,
            cfg_edited: false,
            dominance: None,
            loops: None,
        }
    }

    /// Name of the compiled method.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target architecture.
    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The synthetic start block.
    #[must_use]
    pub fn start(&self) -> BlockId {
        self.start
    }

    /// The synthetic end block.
    #[must_use]
    pub fn end(&self) -> BlockId {
        self.end
    }

    /// Analysis generation; bumped by every [`Graph::invalidate_analyses`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if control flow changed since the last invalidation.
    #[must_use]
    pub fn has_unpublished_edits(&self) -> bool {
        self.cfg_edited
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Returns the live instruction `id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInstruction`] if the id is unknown or removed.
    pub fn inst(&self, id: InstId) -> Result<&Instruction> {
        self.insts
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidInstruction(id))
    }

    fn inst_mut(&mut self, id: InstId) -> Result<&mut Instruction> {
        self.insts
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidInstruction(id))
    }

    /// Returns the live block `id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlock`] if the id is unknown or removed.
    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.blocks
            .get(id.index())
            .filter(|block| block.is_alive())
            .ok_or(Error::InvalidBlock(id))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock> {
        self.blocks
            .get_mut(id.index())
            .filter(|block| block.is_alive())
            .ok_or(Error::InvalidBlock(id))
    }

    /// Returns `true` if `id` names a live instruction.
    #[must_use]
    pub fn contains_inst(&self, id: InstId) -> bool {
        self.inst(id).is_ok()
    }

    /// Returns `true` if `id` names a live block.
    #[must_use]
    pub fn contains_block(&self, id: BlockId) -> bool {
        self.block(id).is_ok()
    }

    /// Opcode of a live instruction.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInstruction`] if the id is unknown or removed.
    pub fn opcode(&self, id: InstId) -> Result<&Opcode> {
        Ok(self.inst(id)?.opcode())
    }

    /// Constant value of `id` if it is a `Constant`.
    #[must_use]
    pub fn constant_value(&self, id: InstId) -> Option<i64> {
        self.inst(id).ok()?.opcode().as_constant()
    }

    /// Live block ids in ascending order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_alive())
            .map(|(index, _)| BlockId::new(index as u32))
    }

    /// Live instruction ids in ascending order, placed or detached.
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.is_some())
            .map(|(index, _)| InstId::new(index as u32))
    }

    /// Number of live blocks, start and end included.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|block| block.is_alive()).count()
    }

    /// Number of live instructions.
    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.iter().filter(|inst| inst.is_some()).count()
    }

    /// Number of block slots, including tombstones.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Position of a placed instruction within its block list (Phis and
    /// instructions are counted separately).
    #[must_use]
    pub fn position(&self, id: InstId) -> Option<usize> {
        let inst = self.inst(id).ok()?;
        let block = self.block(inst.block?).ok()?;
        if inst.is_phi() {
            block.phis.iter().position(|&p| p == id)
        } else {
            block.insts.iter().position(|&i| i == id)
        }
    }

    /// `Parameter` instructions ordered by index.
    #[must_use]
    pub fn parameters(&self) -> Vec<InstId> {
        let mut params: Vec<(u32, InstId)> = self
            .blocks
            .get(self.start.index())
            .map(|block| {
                block
                    .insts
                    .iter()
                    .filter_map(|&id| match self.inst(id).ok()?.opcode() {
                        Opcode::Parameter { index } => Some((*index, id)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        params.sort_by_key(|(index, _)| *index);
        params.into_iter().map(|(_, id)| id).collect()
    }

    /// The single non-phi terminator of a two-way block, if present.
    #[must_use]
    pub fn branch_of(&self, block: BlockId) -> Option<InstId> {
        let last = self.block(block).ok()?.last_inst()?;
        self.inst(last)
            .ok()
            .filter(|inst| inst.opcode().is_branch())
            .map(|_| last)
    }

    // ------------------------------------------------------------------
    // Instruction creation and placement
    // ------------------------------------------------------------------

    /// Creates a detached instruction with the given inputs.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInstruction`] if an input is not live, [`Error::Malformed`] if a
    /// SafePoint register map does not match its inputs.
    pub fn create_inst(&mut self, opcode: Opcode, ty: DataType, inputs: &[InstId]) -> Result<InstId> {
        for &input in inputs {
            self.inst(input)?;
        }
        if let Some(data) = opcode.safepoint_data() {
            if data.vregs.len() != inputs.len() {
                return Err(malformed_error!(
                    "SafePoint with {} inputs but {} registers",
                    inputs.len(),
                    data.vregs.len()
                ));
            }
        }

        let id = InstId::new(self.insts.len() as u32);
        let mut inst = Instruction::new(opcode, ty);
        inst.inputs = inputs.to_vec();
        self.insts.push(Some(inst));
        for &input in inputs {
            self.inst_mut(input)?.users.push(id);
        }
        Ok(id)
    }

    /// Creates an instruction and appends it to `block`.
    ///
    /// # Errors
    ///
    /// See [`Graph::create_inst`] and [`Graph::append_inst`].
    pub fn add_inst(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        ty: DataType,
        inputs: &[InstId],
    ) -> Result<InstId> {
        self.block(block)?;
        let id = self.create_inst(opcode, ty, inputs)?;
        self.append_inst(block, id)?;
        Ok(id)
    }

    /// Creates a Phi and appends it to `block`.
    ///
    /// # Errors
    ///
    /// See [`Graph::create_inst`].
    pub fn add_phi(&mut self, block: BlockId, ty: DataType, inputs: &[InstId]) -> Result<InstId> {
        self.block(block)?;
        let id = self.create_inst(Opcode::Phi, ty, inputs)?;
        self.append_phi(block, id)?;
        Ok(id)
    }

    /// Returns a `Constant` of `ty` with `value` from the start block, creating it
    /// when none exists.
    ///
    /// # Errors
    ///
    /// Only fails on a corrupted start block.
    pub fn constant(&mut self, value: i64, ty: DataType) -> Result<InstId> {
        let start = self.start;
        let existing = self.block(start)?.insts.iter().copied().find(|&id| {
            self.inst(id)
                .is_ok_and(|inst| inst.ty == ty && inst.opcode.as_constant() == Some(value))
        });
        match existing {
            Some(id) => Ok(id),
            None => self.add_inst(start, Opcode::Constant(value), ty, &[]),
        }
    }

    fn check_detached(&self, id: InstId) -> Result<&Instruction> {
        let inst = self.inst(id)?;
        if inst.block.is_some() {
            return Err(malformed_error!("Instruction {} is already placed", id));
        }
        Ok(inst)
    }

    /// Appends a detached non-phi instruction to the end of `block`.
    ///
    /// # Errors
    ///
    /// Fails if the block is not live or the instruction is placed or a Phi.
    pub fn append_inst(&mut self, block: BlockId, id: InstId) -> Result<()> {
        self.block(block)?;
        if self.check_detached(id)?.is_phi() {
            return Err(malformed_error!("Phi {} appended as instruction", id));
        }
        self.block_mut(block)?.insts.push(id);
        self.inst_mut(id)?.block = Some(block);
        Ok(())
    }

    /// Appends a detached Phi to `block`.
    ///
    /// # Errors
    ///
    /// Fails if the block is not live or the instruction is placed or not a Phi.
    pub fn append_phi(&mut self, block: BlockId, id: InstId) -> Result<()> {
        self.block(block)?;
        if !self.check_detached(id)?.is_phi() {
            return Err(malformed_error!("Instruction {} appended as Phi", id));
        }
        self.block_mut(block)?.phis.push(id);
        self.inst_mut(id)?.block = Some(block);
        Ok(())
    }

    fn insert_at_anchor(&mut self, anchor: InstId, id: InstId, after: bool) -> Result<()> {
        let anchor_inst = self.inst(anchor)?;
        let block = anchor_inst
            .block
            .ok_or_else(|| malformed_error!("Anchor {} is not placed", anchor))?;
        if anchor_inst.is_phi() || self.check_detached(id)?.is_phi() {
            return Err(malformed_error!("Phis cannot be inserted relative to {}", anchor));
        }
        let position = self
            .position(anchor)
            .ok_or(Error::InvalidInstruction(anchor))?;
        let at = if after { position + 1 } else { position };
        self.block_mut(block)?.insts.insert(at, id);
        self.inst_mut(id)?.block = Some(block);
        Ok(())
    }

    /// Places a detached instruction right before `anchor`.
    ///
    /// # Errors
    ///
    /// Fails if either instruction is a Phi, the anchor is detached or `id` is placed.
    pub fn insert_before(&mut self, anchor: InstId, id: InstId) -> Result<()> {
        self.insert_at_anchor(anchor, id, false)
    }

    /// Places a detached instruction right after `anchor`.
    ///
    /// # Errors
    ///
    /// Fails if either instruction is a Phi, the anchor is detached or `id` is placed.
    pub fn insert_after(&mut self, anchor: InstId, id: InstId) -> Result<()> {
        self.insert_at_anchor(anchor, id, true)
    }

    fn detach(&mut self, id: InstId) -> Result<()> {
        let inst = self.inst(id)?;
        let is_phi = inst.is_phi();
        if let Some(block) = inst.block {
            let slot = self.block_mut(block)?;
            let list = if is_phi { &mut slot.phis } else { &mut slot.insts };
            list.retain(|&i| i != id);
            self.inst_mut(id)?.block = None;
        }
        Ok(())
    }

    /// Replaces the opcode of an instruction. The inputs are left as they are, the
    /// caller adjusts them to the new operand layout.
    ///
    /// # Errors
    ///
    /// Fails if the instruction is not live, or when switching between Phi and non-Phi.
    pub fn set_opcode(&mut self, id: InstId, opcode: Opcode, ty: DataType) -> Result<()> {
        let inst = self.inst(id)?;
        if inst.is_phi() != opcode.is_phi() {
            return Err(malformed_error!("Cannot change {} to or from a Phi", id));
        }
        let inst = self.inst_mut(id)?;
        inst.opcode = opcode;
        inst.ty = ty;
        Ok(())
    }

    /// Overwrites the instruction flags.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInstruction`] if the id is unknown or removed.
    pub fn set_flags(&mut self, id: InstId, flags: InstFlags) -> Result<()> {
        self.inst_mut(id)?.flags = flags;
        Ok(())
    }

    /// Sets or clears block flags.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlock`] if the block is not live.
    pub fn set_block_flags(&mut self, block: BlockId, flags: BlockFlags, value: bool) -> Result<()> {
        let flags = flags - BlockFlags::ALIVE;
        self.block_mut(block)?.flags.set(flags, value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Def/use editing
    // ------------------------------------------------------------------

    fn unlink_user(&mut self, producer: InstId, user: InstId) {
        if let Ok(inst) = self.inst_mut(producer) {
            if let Some(position) = inst.users.iter().position(|&u| u == user) {
                inst.users.swap_remove(position);
            }
        }
    }

    /// Replaces input `index` of `id` with `value`.
    ///
    /// # Errors
    ///
    /// Fails if either instruction is not live or the index is out of range.
    pub fn set_input(&mut self, id: InstId, index: usize, value: InstId) -> Result<()> {
        self.inst(value)?;
        let old = self
            .inst(id)?
            .input(index)
            .ok_or(Error::InvalidInput { inst: id, index })?;
        if old == value {
            return Ok(());
        }
        self.unlink_user(old, id);
        self.inst_mut(value)?.users.push(id);
        self.inst_mut(id)?.inputs[index] = value;
        Ok(())
    }

    /// Appends an input. A SafePoint records the new input as a bridge.
    ///
    /// # Errors
    ///
    /// Fails if either instruction is not live or `id` has a fixed arity.
    pub fn append_input(&mut self, id: InstId, value: InstId) -> Result<()> {
        self.inst(value)?;
        if self.inst(id)?.opcode.fixed_arity().is_some() {
            return Err(malformed_error!("{} does not take extra inputs", id));
        }
        let inst = self.inst_mut(id)?;
        inst.inputs.push(value);
        if let Some(data) = inst.opcode.safepoint_data_mut() {
            data.vregs.push(VirtualRegister::Bridge);
        }
        self.inst_mut(value)?.users.push(id);
        Ok(())
    }

    /// Appends a Phi input for the most recently added predecessor.
    ///
    /// # Errors
    ///
    /// Fails if `phi` is not a Phi or would get more inputs than its block has
    /// predecessors.
    pub fn add_phi_input(&mut self, phi: InstId, value: InstId) -> Result<()> {
        let inst = self.inst(phi)?;
        if !inst.is_phi() {
            return Err(malformed_error!("{} is not a Phi", phi));
        }
        if let Some(block) = inst.block {
            if inst.inputs.len() >= self.block(block)?.preds.len() {
                return Err(malformed_error!("Phi {} already has an input per predecessor", phi));
            }
        }
        self.append_input(phi, value)
    }

    /// Appends a SafePoint input recorded in `vreg`.
    ///
    /// # Errors
    ///
    /// Fails if `safepoint` is not a SafePoint or either instruction is not live.
    pub fn add_safepoint_input(
        &mut self,
        safepoint: InstId,
        value: InstId,
        vreg: VirtualRegister,
    ) -> Result<()> {
        self.inst(value)?;
        if !self.inst(safepoint)?.opcode.is_safepoint() {
            return Err(malformed_error!("{} is not a SafePoint", safepoint));
        }
        let inst = self.inst_mut(safepoint)?;
        inst.inputs.push(value);
        if let Some(data) = inst.opcode.safepoint_data_mut() {
            data.vregs.push(vreg);
        }
        self.inst_mut(value)?.users.push(safepoint);
        Ok(())
    }

    /// Removes input `index`, shifting later inputs down.
    ///
    /// # Errors
    ///
    /// Fails if the instruction is not live or the index is out of range.
    pub fn remove_input(&mut self, id: InstId, index: usize) -> Result<()> {
        let old = self
            .inst(id)?
            .input(index)
            .ok_or(Error::InvalidInput { inst: id, index })?;
        self.unlink_user(old, id);
        let inst = self.inst_mut(id)?;
        inst.inputs.remove(index);
        if let Some(data) = inst.opcode.safepoint_data_mut() {
            if index < data.vregs.len() {
                data.vregs.remove(index);
            }
        }
        Ok(())
    }

    /// Rewires every use of `old` to `new`.
    ///
    /// # Errors
    ///
    /// Fails if either instruction is not live.
    pub fn replace_users(&mut self, old: InstId, new: InstId) -> Result<()> {
        self.inst(new)?;
        self.inst(old)?;
        if old == new {
            return Ok(());
        }

        let mut users = std::mem::take(&mut self.inst_mut(old)?.users);
        users.sort_unstable();
        users.dedup();
        for user in users {
            let mut replaced = 0;
            for input in &mut self.inst_mut(user)?.inputs {
                if *input == old {
                    *input = new;
                    replaced += 1;
                }
            }
            let target = self.inst_mut(new)?;
            target.users.extend(std::iter::repeat_n(user, replaced));
        }
        Ok(())
    }

    /// Removes an instruction.
    ///
    /// Without `force` the instruction must not have users. With `force` the only
    /// users allowed are the instruction itself (a self-referencing Phi).
    ///
    /// # Errors
    ///
    /// [`Error::HasUsers`] if the instruction is still read elsewhere.
    pub fn remove_inst(&mut self, id: InstId, force: bool) -> Result<()> {
        let inst = self.inst(id)?;
        let foreign_users = inst.users.iter().any(|&user| user != id);
        if foreign_users || (!force && inst.has_users()) {
            return Err(Error::HasUsers(id));
        }
        self.remove_insts(&[id])
    }

    /// Removes a set of instructions that are only used by each other.
    ///
    /// # Errors
    ///
    /// [`Error::HasUsers`] if a member is read by an instruction outside the set.
    pub fn remove_insts(&mut self, ids: &[InstId]) -> Result<()> {
        let set: HashSet<InstId> = ids.iter().copied().collect();
        for &id in &set {
            if self.inst(id)?.users.iter().any(|user| !set.contains(user)) {
                return Err(Error::HasUsers(id));
            }
        }

        for &id in ids {
            if !self.contains_inst(id) {
                continue;
            }
            self.detach(id)?;
            let inputs = std::mem::take(&mut self.inst_mut(id)?.inputs);
            for input in inputs {
                self.unlink_user(input, id);
            }
            self.insts[id.index()] = None;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow editing
    // ------------------------------------------------------------------

    /// Creates an empty, unconnected block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new());
        id
    }

    fn check_edge(&self, from: BlockId, to: BlockId) -> Result<(usize, usize)> {
        let succ_index = self
            .block(from)?
            .succ_index(to)
            .ok_or(Error::InvalidEdge { from, to })?;
        let pred_index = self
            .block(to)?
            .pred_index(from)
            .ok_or(Error::InvalidEdge { from, to })?;
        Ok((succ_index, pred_index))
    }

    fn check_new_edge(&self, from: BlockId, to: BlockId) -> Result<()> {
        self.block(to)?;
        if from == self.end || self.block(from)?.succs.contains(&to) {
            return Err(Error::InvalidEdge { from, to });
        }
        Ok(())
    }

    /// Adds the edge `from -> to` as the last successor of `from` and the last
    /// predecessor of `to`. Phis of `to` receive their input through
    /// [`Graph::add_phi_input`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if the edge exists already or starts at the end block.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.check_new_edge(from, to)?;
        self.block_mut(from)?.succs.push(to);
        self.block_mut(to)?.preds.push(from);
        self.cfg_edited = true;
        Ok(())
    }

    fn remove_phi_inputs_at(&mut self, block: BlockId, pred_index: usize) -> Result<()> {
        let phis = self.block(block)?.phis.clone();
        for phi in phis {
            if pred_index < self.inst(phi)?.inputs.len() {
                self.remove_input(phi, pred_index)?;
            }
        }
        Ok(())
    }

    /// Removes the edge `from -> to` together with the matching input of every Phi
    /// in `to`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if there is no such edge.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let (succ_index, pred_index) = self.check_edge(from, to)?;
        self.remove_phi_inputs_at(to, pred_index)?;
        self.block_mut(from)?.succs.remove(succ_index);
        self.block_mut(to)?.preds.remove(pred_index);
        self.cfg_edited = true;
        Ok(())
    }

    /// Moves the target of `from -> old_to` to `new_to`, keeping the successor
    /// position in `from`. The Phi inputs of `old_to` for the edge are dropped;
    /// `from` becomes the last predecessor of `new_to` and its Phis receive their
    /// input through [`Graph::add_phi_input`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if `from -> old_to` does not exist or `from -> new_to`
    /// already does.
    pub fn redirect_edge(&mut self, from: BlockId, old_to: BlockId, new_to: BlockId) -> Result<()> {
        if old_to == new_to {
            self.check_edge(from, old_to)?;
            return Ok(());
        }
        let (succ_index, pred_index) = self.check_edge(from, old_to)?;
        self.check_new_edge(from, new_to)?;

        self.remove_phi_inputs_at(old_to, pred_index)?;
        self.block_mut(old_to)?.preds.remove(pred_index);
        self.block_mut(from)?.succs[succ_index] = new_to;
        self.block_mut(new_to)?.preds.push(from);
        self.cfg_edited = true;
        Ok(())
    }

    /// Inserts a new empty block on the edge `from -> to`. The block takes the
    /// edge's successor and predecessor positions, so Phis of `to` are unaffected.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if there is no such edge.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> Result<BlockId> {
        let (succ_index, pred_index) = self.check_edge(from, to)?;
        let middle = self.create_block();
        self.block_mut(from)?.succs[succ_index] = middle;
        self.block_mut(to)?.preds[pred_index] = middle;
        let block = self.block_mut(middle)?;
        block.preds.push(from);
        block.succs.push(to);
        self.cfg_edited = true;
        Ok(middle)
    }

    /// Renames predecessor `old` of `block` to `new` in place. Half of an edge
    /// rewrite; pair it with [`Graph::replace_succ`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if `old` is not a predecessor of `block` or `new`
    /// already is.
    pub fn replace_pred(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        self.block(new)?;
        let target = self.block(block)?;
        let index = target
            .pred_index(old)
            .ok_or(Error::InvalidEdge { from: old, to: block })?;
        if old != new && target.preds.contains(&new) {
            return Err(Error::InvalidEdge { from: new, to: block });
        }
        self.block_mut(block)?.preds[index] = new;
        self.cfg_edited = true;
        Ok(())
    }

    /// Renames successor `old` of `block` to `new` in place. Half of an edge
    /// rewrite; pair it with [`Graph::replace_pred`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEdge`] if `old` is not a successor of `block` or `new`
    /// already is.
    pub fn replace_succ(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        self.block(new)?;
        let source = self.block(block)?;
        let index = source
            .succ_index(old)
            .ok_or(Error::InvalidEdge { from: block, to: old })?;
        if old != new && source.succs.contains(&new) {
            return Err(Error::InvalidEdge { from: block, to: new });
        }
        self.block_mut(block)?.succs[index] = new;
        self.cfg_edited = true;
        Ok(())
    }

    /// Splices out an empty block with one predecessor and one successor. The
    /// successor keeps its Phi input positions, now keyed by the predecessor.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the block is not such a pass-through block,
    /// [`Error::InvalidEdge`] if its predecessor already reaches its successor.
    pub fn bypass_block(&mut self, block: BlockId) -> Result<()> {
        let slot = self.block(block)?;
        if block == self.start
            || block == self.end
            || !slot.is_empty()
            || slot.preds.len() != 1
            || slot.succs.len() != 1
        {
            return Err(malformed_error!("{} is not a pass-through block", block));
        }
        let (pred, succ) = (slot.preds[0], slot.succs[0]);
        if pred == block || succ == block {
            return Err(malformed_error!("{} is a self loop", block));
        }
        if self.block(pred)?.succs.contains(&succ) {
            return Err(Error::InvalidEdge { from: pred, to: succ });
        }

        let succ_index = self
            .block(pred)?
            .succ_index(block)
            .ok_or(Error::InvalidEdge { from: pred, to: block })?;
        let pred_index = self
            .block(succ)?
            .pred_index(block)
            .ok_or(Error::InvalidEdge { from: block, to: succ })?;
        self.block_mut(pred)?.succs[succ_index] = succ;
        self.block_mut(succ)?.preds[pred_index] = pred;
        self.kill_block(block)?;
        Ok(())
    }

    /// Merges `block` into its single predecessor, whose single successor it is.
    /// Phis of `block` are replaced by their only input.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the two blocks do not form a straight line.
    pub fn merge_into_pred(&mut self, block: BlockId) -> Result<BlockId> {
        let slot = self.block(block)?;
        if block == self.start || block == self.end || slot.preds.len() != 1 {
            return Err(malformed_error!("{} cannot be merged into a predecessor", block));
        }
        let pred = slot.preds[0];
        if pred == block || self.block(pred)?.succs.as_slice() != [block] {
            return Err(malformed_error!("{} does not fall through to {}", pred, block));
        }
        if self.block(block)?.succs.contains(&pred) {
            return Err(malformed_error!("{} and {} form a cycle", pred, block));
        }
        let phis = self.block(block)?.phis.clone();
        for &phi in &phis {
            if self.inst(phi)?.inputs.len() != 1 {
                return Err(malformed_error!("Phi {} does not have a single input", phi));
            }
        }

        for phi in phis {
            let value = self.inst(phi)?.inputs[0];
            self.replace_users(phi, value)?;
            self.remove_inst(phi, true)?;
        }

        let insts = std::mem::take(&mut self.block_mut(block)?.insts);
        for &id in &insts {
            self.inst_mut(id)?.block = Some(pred);
        }
        self.block_mut(pred)?.insts.extend(insts);

        let succs = std::mem::take(&mut self.block_mut(block)?.succs);
        for &succ in &succs {
            let index = self
                .block(succ)?
                .pred_index(block)
                .ok_or(Error::InvalidEdge { from: block, to: succ })?;
            self.block_mut(succ)?.preds[index] = pred;
        }
        self.block_mut(pred)?.succs = succs;
        self.block_mut(block)?.preds.clear();
        self.kill_block(block)?;
        Ok(pred)
    }

    /// Deletes a set of blocks with all their instructions and edges. Phi inputs
    /// of surviving successors are dropped with the edges.
    ///
    /// # Errors
    ///
    /// Fails if the set contains start or end, or if a surviving instruction other
    /// than such a Phi input reads a value defined in the set.
    pub fn remove_blocks(&mut self, blocks: &[BlockId]) -> Result<()> {
        let set: HashSet<BlockId> = blocks.iter().copied().collect();
        let mut doomed = Vec::new();
        for &block in &set {
            if block == self.start || block == self.end {
                return Err(malformed_error!("Cannot remove {}", block));
            }
            doomed.extend(self.block(block)?.all_insts());
        }
        let doomed_set: HashSet<InstId> = doomed.iter().copied().collect();

        // Surviving readers must be Phi inputs on edges leaving the set.
        for &id in &doomed {
            for &user in self.inst(id)?.users() {
                if doomed_set.contains(&user) {
                    continue;
                }
                let user_inst = self.inst(user)?;
                let Some(user_block) = user_inst.block else {
                    return Err(Error::HasUsers(id));
                };
                if !user_inst.is_phi() {
                    return Err(Error::HasUsers(id));
                }
                let preds = &self.block(user_block)?.preds;
                let from_set_only = user_inst
                    .inputs
                    .iter()
                    .zip(preds)
                    .all(|(&input, pred)| input != id || set.contains(pred));
                if !from_set_only {
                    return Err(Error::HasUsers(id));
                }
            }
        }

        for &block in blocks {
            let succs = self.block(block)?.succs.clone();
            for succ in succs {
                self.remove_edge(block, succ)?;
            }
            let preds = self.block(block)?.preds.clone();
            for pred in preds {
                self.remove_edge(pred, block)?;
            }
        }
        self.remove_insts(&doomed)?;
        for &block in blocks {
            if self.contains_block(block) {
                self.kill_block(block)?;
            }
        }
        self.cfg_edited = true;
        Ok(())
    }

    fn kill_block(&mut self, block: BlockId) -> Result<()> {
        let slot = self.block_mut(block)?;
        *slot = BasicBlock::default();
        self.cfg_edited = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Analyses
    // ------------------------------------------------------------------

    /// Publishes control-flow edits: bumps the generation and drops the cached
    /// analyses.
    pub fn invalidate_analyses(&mut self) {
        self.generation += 1;
        self.cfg_edited = false;
        self.dominance = None;
        self.loops = None;
    }

    /// Dominance information, computed on demand and cached per generation.
    pub fn dominance(&mut self) -> Arc<Dominance> {
        if let Some(dominance) = &self.dominance {
            if dominance.generation() == self.generation {
                debug_assert!(
                    !self.cfg_edited,
                    "cached dominance of {} read after unpublished CFG edits",
                    self.name
                );
                return Arc::clone(dominance);
            }
        }
        let dominance = Arc::new(Dominance::compute(self));
        self.dominance = Some(Arc::clone(&dominance));
        dominance
    }

    /// Loop forest, computed on demand and cached per generation. Computing it
    /// refreshes the `LOOP_HEADER` block flags.
    pub fn loops(&mut self) -> Arc<LoopForest> {
        if let Some(loops) = &self.loops {
            if loops.generation() == self.generation {
                debug_assert!(
                    !self.cfg_edited,
                    "cached loops of {} read after unpublished CFG edits",
                    self.name
                );
                return Arc::clone(loops);
            }
        }
        let dominance = self.dominance();
        let forest = Arc::new(detect_loops(self, &dominance));
        let headers: HashSet<BlockId> = forest.iter().map(|l| l.header).collect();
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.is_alive() {
                let is_header = headers.contains(&BlockId::new(index as u32));
                block.flags.set(BlockFlags::LOOP_HEADER, is_header);
            }
        }
        self.loops = Some(Arc::clone(&forest));
        forest
    }

    /// Cached loop forest without computing it, regardless of its generation.
    #[must_use]
    pub fn cached_loops(&self) -> Option<&Arc<LoopForest>> {
        self.loops.as_ref()
    }

    /// Reachable blocks in reverse post-order.
    pub fn rpo(&mut self) -> Vec<BlockId> {
        self.dominance().rpo().collect()
    }

    /// Counts the live instructions by block, in block id order. Phis are
    /// included, detached instructions are not.
    #[must_use]
    pub fn inst_histogram(&self) -> HashMap<BlockId, usize> {
        self.block_ids()
            .filter_map(|id| {
                let block = self.block(id).ok()?;
                Some((id, block.phis.len() + block.insts.len()))
            })
            .collect()
    }
}

impl GraphBase for Graph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.blocks.len()).map(NodeId::new)
    }
}

impl Successors for Graph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.blocks[node.index()]
            .succs
            .iter()
            .map(|succ| NodeId::new(succ.index()))
    }
}

impl Predecessors for Graph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.blocks[node.index()]
            .preds
            .iter()
            .map(|pred| NodeId::new(pred.index()))
    }
}

impl RootedGraph for Graph {
    fn entry(&self) -> NodeId {
        NodeId::new(self.start.index())
    }
}
