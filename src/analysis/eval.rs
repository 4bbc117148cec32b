//! Reference interpreter for graphs.
//!
//! [`GraphEvaluator`] executes a graph on concrete inputs. It exists to check that
//! transformations preserve semantics: run the graph before and after a pass on
//! the same arguments and compare the [`Outcome`]s.
//!
//! Integers wrap at the width of the instruction type. Arrays live in a small heap
//! of `i64` cells. `AddI`/`SubI` on a reference yield a raw [`Value::Ptr`] whose
//! byte offset `Load`/`Store` translate back to an element index through the
//! [`RuntimeInfo`] layout. Calls that were not inlined cannot be evaluated.

use std::collections::HashMap;

use crate::{
    ir::{BlockId, DataType, Graph, InstId, Opcode},
    runtime::RuntimeInfo,
    Error, Result,
};

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Integer or boolean
    Int(i64),
    /// Array reference; `None` is null
    Ref(Option<usize>),
    /// Raw pointer into an array
    Ptr {
        /// Heap index of the array
        object: usize,
        /// Byte offset from the start of the object
        offset: i64,
    },
    /// Result of instructions without a value
    Void,
}

/// An array on the evaluator heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapArray {
    /// Element type
    pub ty: DataType,
    /// Element values
    pub cells: Vec<i64>,
}

/// Result of a completed evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Returned value, `None` for `ReturnVoid`
    pub value: Option<Value>,
    /// Heap after execution
    pub heap: Vec<HeapArray>,
}

/// Executes a graph on concrete arguments.
pub struct GraphEvaluator<'a> {
    graph: &'a Graph,
    runtime: &'a dyn RuntimeInfo,
    step_limit: usize,
}

impl<'a> GraphEvaluator<'a> {
    /// Evaluator for `graph` with the layout of `runtime`.
    #[must_use]
    pub fn new(graph: &'a Graph, runtime: &'a dyn RuntimeInfo) -> Self {
        Self {
            graph,
            runtime,
            step_limit: 1_000_000,
        }
    }

    /// Caps the number of executed instructions.
    #[must_use]
    pub fn step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Runs the graph with `args` bound to the parameters by index and `heap` as the
    /// initial array heap.
    ///
    /// # Errors
    ///
    /// [`Error::Evaluation`] on a failed check, an out-of-bounds access, division by
    /// zero, a call, a missing argument or when the step limit is hit.
    pub fn run(&self, args: &[Value], heap: Vec<HeapArray>) -> Result<Outcome> {
        let mut frame = Frame {
            graph: self.graph,
            runtime: self.runtime,
            values: HashMap::new(),
            heap,
        };
        let mut steps = 0usize;
        let mut previous: Option<BlockId> = None;
        let mut current = self.graph.start();

        loop {
            let block = self.graph.block(current)?;

            if let Some(pred) = previous {
                let index = block
                    .pred_index(pred)
                    .ok_or(Error::InvalidEdge { from: pred, to: current })?;
                let incoming: Vec<(InstId, Value)> = block
                    .phis()
                    .iter()
                    .map(|&phi| {
                        let input = self
                            .graph
                            .inst(phi)?
                            .input(index)
                            .ok_or(Error::InvalidInput { inst: phi, index })?;
                        Ok((phi, frame.get(input)?))
                    })
                    .collect::<Result<_>>()?;
                frame.values.extend(incoming);
            }

            let mut next = None;
            for &id in block.insts() {
                steps += 1;
                if steps > self.step_limit {
                    return Err(Error::Evaluation(format!(
                        "{}: step limit of {} exceeded",
                        self.graph.name(),
                        self.step_limit
                    )));
                }
                match frame.execute(id, args)? {
                    Flow::Continue => {}
                    Flow::Branch(taken) => {
                        next = Some(
                            *block
                                .succs()
                                .get(usize::from(!taken))
                                .ok_or_else(|| malformed_error!("{} has no branch target", current))?,
                        );
                    }
                    Flow::Return(value) => {
                        return Ok(Outcome {
                            value,
                            heap: frame.heap,
                        });
                    }
                }
            }

            let target = match next {
                Some(target) => target,
                None => *block
                    .succs()
                    .first()
                    .ok_or_else(|| malformed_error!("{} falls off the graph", current))?,
            };
            previous = Some(current);
            current = target;
        }
    }
}

enum Flow {
    Continue,
    Branch(bool),
    Return(Option<Value>),
}

struct Frame<'a> {
    graph: &'a Graph,
    runtime: &'a dyn RuntimeInfo,
    values: HashMap<InstId, Value>,
    heap: Vec<HeapArray>,
}

fn fail<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Evaluation(message.into()))
}

impl Frame<'_> {
    fn get(&self, id: InstId) -> Result<Value> {
        match self.values.get(&id) {
            Some(value) => Ok(*value),
            None => fail(format!("{id} read before it was computed")),
        }
    }

    fn int(&self, id: InstId) -> Result<i64> {
        match self.get(id)? {
            Value::Int(value) => Ok(value),
            other => fail(format!("{id} is {other:?}, expected an integer")),
        }
    }

    fn array(&self, id: InstId) -> Result<usize> {
        match self.get(id)? {
            Value::Ref(Some(object)) if object < self.heap.len() => Ok(object),
            Value::Ref(None) => fail(format!("{id} is null")),
            other => fail(format!("{id} is {other:?}, expected an array")),
        }
    }

    fn element(&self, object: usize, index: i64) -> Result<usize> {
        let len = self.heap[object].cells.len();
        match usize::try_from(index) {
            Ok(index) if index < len => Ok(index),
            _ => fail(format!("index {index} out of bounds for length {len}")),
        }
    }

    /// Element addressed by a raw pointer access.
    fn pointer_element(&self, base: Value, byte_offset: i64, ty: DataType) -> Result<(usize, usize)> {
        let Value::Ptr { object, offset } = base else {
            return fail(format!("{base:?} is not a raw pointer"));
        };
        let arch = self.graph.arch();
        let size = i64::from(self.runtime.type_size(ty, arch));
        let data = offset + byte_offset - self.runtime.array_data_offset(arch);
        if size == 0 || data % size != 0 {
            return fail(format!("misaligned access at byte {data}"));
        }
        Ok((object, self.element(object, data / size)?))
    }

    fn pointer_access(&self, inputs: &[InstId], shift: u8, imm: i64, indexed: bool, ty: DataType) -> Result<(usize, usize)> {
        let base = self.get(inputs[0])?;
        let mut byte_offset = imm;
        if indexed {
            byte_offset = byte_offset.wrapping_add(self.int(inputs[1])?.wrapping_shl(u32::from(shift)));
        }
        self.pointer_element(base, byte_offset, ty)
    }

    fn execute(&mut self, id: InstId, args: &[Value]) -> Result<Flow> {
        let inst = self.graph.inst(id)?;
        let ty = inst.ty();
        let inputs = inst.inputs();
        let binary = |frame: &Self| -> Result<(i64, i64)> {
            Ok((frame.int(inputs[0])?, frame.int(inputs[1])?))
        };

        let value = match inst.opcode() {
            Opcode::Parameter { index } => match args.get(*index as usize) {
                Some(&value) => value,
                None => return fail(format!("missing argument {index}")),
            },
            Opcode::Constant(value) => Value::Int(ty.wrap(*value)),
            Opcode::Phi => return fail(format!("Phi {id} in an instruction list")),
            Opcode::Add => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a.wrapping_add(b)))
            }
            Opcode::Sub => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a.wrapping_sub(b)))
            }
            Opcode::Mul => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a.wrapping_mul(b)))
            }
            Opcode::Div | Opcode::Mod => {
                let (a, b) = binary(self)?;
                if b == 0 {
                    return fail("division by zero");
                }
                let result = if ty.is_signed() {
                    if matches!(inst.opcode(), Opcode::Div) {
                        a.wrapping_div(b)
                    } else {
                        a.wrapping_rem(b)
                    }
                } else {
                    let (a, b) = (ty.widen(a), ty.widen(b));
                    let r = if matches!(inst.opcode(), Opcode::Div) { a / b } else { a % b };
                    r as i64
                };
                Value::Int(ty.wrap(result))
            }
            Opcode::And => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a & b))
            }
            Opcode::Or => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a | b))
            }
            Opcode::Xor => {
                let (a, b) = binary(self)?;
                Value::Int(ty.wrap(a ^ b))
            }
            Opcode::Shl | Opcode::Shr | Opcode::AShr => {
                let (a, b) = binary(self)?;
                let width = ty.bit_width().unwrap_or(64);
                let amount = (b as u32) & (width - 1);
                let result = match inst.opcode() {
                    Opcode::Shl => a.wrapping_shl(amount),
                    Opcode::AShr => ty.wrap(a) >> amount,
                    _ => {
                        let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
                        ((a as u64 & mask) >> amount) as i64
                    }
                };
                Value::Int(ty.wrap(result))
            }
            Opcode::Neg => Value::Int(ty.wrap(self.int(inputs[0])?.wrapping_neg())),
            Opcode::Not => Value::Int(ty.wrap(!self.int(inputs[0])?)),
            Opcode::Compare { cc, operand_type } => {
                let (a, b) = binary(self)?;
                Value::Int(i64::from(cc.evaluate(a, b, *operand_type)))
            }
            Opcode::If { cc, operand_type } => {
                let (a, b) = binary(self)?;
                return Ok(Flow::Branch(cc.evaluate(a, b, *operand_type)));
            }
            Opcode::IfImm {
                cc,
                imm,
                operand_type,
            } => {
                let a = self.int(inputs[0])?;
                return Ok(Flow::Branch(cc.evaluate(a, *imm, *operand_type)));
            }
            Opcode::LoadArray => {
                let object = self.array(inputs[0])?;
                let index = self.element(object, self.int(inputs[1])?)?;
                Value::Int(ty.wrap(self.heap[object].cells[index]))
            }
            Opcode::StoreArray => {
                let object = self.array(inputs[0])?;
                let index = self.element(object, self.int(inputs[1])?)?;
                let value = ty.wrap(self.int(inputs[2])?);
                self.heap[object].cells[index] = value;
                Value::Void
            }
            Opcode::AddI(imm) | Opcode::SubI(imm) => {
                let delta = if matches!(inst.opcode(), Opcode::AddI(_)) { *imm } else { imm.wrapping_neg() };
                match self.get(inputs[0])? {
                    Value::Ref(Some(object)) => Value::Ptr { object, offset: delta },
                    Value::Ptr { object, offset } => Value::Ptr {
                        object,
                        offset: offset.wrapping_add(delta),
                    },
                    Value::Int(value) => Value::Int(ty.wrap(value.wrapping_add(delta))),
                    other => return fail(format!("cannot offset {other:?}")),
                }
            }
            Opcode::Load { shift, imm, indexed } => {
                let (object, index) = self.pointer_access(inputs, *shift, *imm, *indexed, ty)?;
                Value::Int(ty.wrap(self.heap[object].cells[index]))
            }
            Opcode::Store { shift, imm, indexed } => {
                let value_input = inputs[if *indexed { 2 } else { 1 }];
                let value = ty.wrap(self.int(value_input)?);
                let (object, index) = self.pointer_access(inputs, *shift, *imm, *indexed, ty)?;
                self.heap[object].cells[index] = value;
                Value::Void
            }
            Opcode::NullCheck => match self.get(inputs[0])? {
                Value::Ref(None) => return fail(format!("null check {id} failed")),
                value => value,
            },
            Opcode::NewArray => {
                let length = self.int(inputs[0])?;
                let Ok(length) = usize::try_from(length) else {
                    return fail(format!("negative array length {length}"));
                };
                self.heap.push(HeapArray {
                    ty: DataType::Int64,
                    cells: vec![0; length],
                });
                Value::Ref(Some(self.heap.len() - 1))
            }
            Opcode::SafePoint(_) | Opcode::ReturnInlined => Value::Void,
            Opcode::CallStatic { .. } if inst.is_inlined_call() => Value::Void,
            Opcode::CallStatic { callee } => return fail(format!("cannot evaluate call to {callee}")),
            Opcode::CallRuntime { entry } => {
                return fail(format!("cannot evaluate runtime call {entry}"))
            }
            Opcode::Return => return Ok(Flow::Return(Some(self.get(inputs[0])?))),
            Opcode::ReturnVoid => return Ok(Flow::Return(None)),
        };
        self.values.insert(id, value);
        Ok(Flow::Continue)
    }
}
