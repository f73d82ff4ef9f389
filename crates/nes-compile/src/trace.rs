//! Symbolic tracing (spec.md §4.E): operator code is written against
//! `TracedValue`, an ordinary-looking Rust value whose arithmetic/compare
//! operators don't compute — they append to an `ExecutionTrace` builder.
//! First execution is therefore "symbolic": running the traced closure
//! once produces a full recording of the control-flow-and-data-flow graph,
//! which `ssa.rs` and `lowering.rs` turn into the typed IR.
//!
//! Every traced operation routes through `ExecutionTrace`, matching spec.md
//! §9's requirement that "all stateful traced ops must route through the
//! builder" — `TracedValue` itself holds no state besides a value id and a
//! stamp.
//!
//! `trace_if` is the one control-flow combinator exposed: it forks the
//! trace at the call site and records both branches depth-first before
//! rejoining at a merge block, exactly the shape spec.md §4.E describes.
//! Loop headers are detected downstream, in `loop_inference.rs`, by
//! looking for back edges in the lowered IR rather than during recording
//! — this core only ever traces loop-free scalar expressions (selection
//! predicates, map assignments), so no trace this crate produces has one,
//! but the analysis itself is not limited to that case.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use nes_core::DataType;

use crate::ir::{ArithOp, BitwiseOp, BlockId, CompareOp, IrOp, LogicalOp, ValueId};

#[derive(Debug, Clone)]
pub(crate) struct RecordedOp {
    pub id: ValueId,
    pub op: IrOp,
    pub stamp: DataType,
}

#[derive(Debug, Clone)]
pub(crate) enum RecordedTerminator {
    Return(Option<ValueId>),
    /// Unconditional jump to `target`, carrying `arg` as its sole block
    /// parameter — how each side of a `trace_if` rejoins the merge block.
    Branch { target: BlockId, arg: Option<ValueId> },
    /// Recorded the moment `trace_if` forks: `then`/`else` are the ids of
    /// the two freshly opened blocks, `merge` the block recording resumes
    /// in afterward with `result` as its sole block parameter.
    If { cond: ValueId, then_block: BlockId, else_block: BlockId, merge_block: BlockId, result: Option<ValueId> },
    None,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedBlock {
    pub id: BlockId,
    pub params: Vec<ValueId>,
    pub ops: Vec<RecordedOp>,
    pub terminator: RecordedTerminator,
}

struct TraceState {
    next_value: u32,
    next_block: u32,
    blocks: HashMap<BlockId, RecordedBlock>,
    current: BlockId,
    entry: BlockId,
}

impl TraceState {
    fn new() -> Self {
        let entry = BlockId(0);
        let mut blocks = HashMap::new();
        blocks.insert(entry, RecordedBlock { id: entry, params: Vec::new(), ops: Vec::new(), terminator: RecordedTerminator::None });
        TraceState { next_value: 0, next_block: 1, blocks, current: entry, entry }
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn fresh_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, RecordedBlock { id, params: Vec::new(), ops: Vec::new(), terminator: RecordedTerminator::None });
        id
    }

    fn push(&mut self, op: IrOp, stamp: DataType) -> ValueId {
        let id = self.fresh_value();
        self.blocks.get_mut(&self.current).expect("current block exists").ops.push(RecordedOp { id, op, stamp });
        id
    }
}

/// The builder every `TracedValue` operation routes through.
#[derive(Clone)]
pub struct ExecutionTrace {
    state: Rc<RefCell<TraceState>>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        ExecutionTrace { state: Rc::new(RefCell::new(TraceState::new())) }
    }

    pub fn variable(&self, name: impl Into<String>, stamp: DataType) -> TracedValue {
        let id = self.state.borrow_mut().push(IrOp::Variable(name.into()), stamp);
        TracedValue { trace: self.clone(), id, stamp }
    }

    pub fn const_int(&self, v: i64) -> TracedValue {
        let id = self.state.borrow_mut().push(IrOp::ConstInt(v), DataType::Int64);
        TracedValue { trace: self.clone(), id, stamp: DataType::Int64 }
    }

    pub fn const_float(&self, v: f64) -> TracedValue {
        let id = self.state.borrow_mut().push(IrOp::ConstFloat(v), DataType::Float64);
        TracedValue { trace: self.clone(), id, stamp: DataType::Float64 }
    }

    pub fn const_bool(&self, v: bool) -> TracedValue {
        let id = self.state.borrow_mut().push(IrOp::ConstBool(v), DataType::Bool);
        TracedValue { trace: self.clone(), id, stamp: DataType::Bool }
    }

    pub fn proxy_call(&self, function: impl Into<String>, args: &[TracedValue], return_type: DataType) -> TracedValue {
        let arg_ids = args.iter().map(|a| a.id).collect();
        let id = self.state.borrow_mut().push(IrOp::ProxyCall { function: function.into(), args: arg_ids, return_type }, return_type);
        TracedValue { trace: self.clone(), id, stamp: return_type }
    }

    /// Records an if/else fork: both branches are executed eagerly
    /// (depth-first, matching spec.md §4.E) purely to record their trace;
    /// `then`/`else` return the traced value each side produces, which
    /// become the merge block's single incoming argument.
    pub fn trace_if<T, E>(&self, cond: &TracedValue, then: T, else_: E) -> TracedValue
    where
        T: FnOnce(&ExecutionTrace) -> TracedValue,
        E: FnOnce(&ExecutionTrace) -> TracedValue,
    {
        let (then_block, else_block, merge_block, parent) = {
            let mut s = self.state.borrow_mut();
            let parent = s.current;
            let then_block = s.fresh_block();
            let else_block = s.fresh_block();
            let merge_block = s.fresh_block();
            (then_block, else_block, merge_block, parent)
        };

        self.state.borrow_mut().current = then_block;
        let then_val = then(self);
        let then_end = self.state.borrow().current;
        self.state.borrow_mut().blocks.get_mut(&then_end).unwrap().terminator =
            RecordedTerminator::Branch { target: merge_block, arg: Some(then_val.id) };

        self.state.borrow_mut().current = else_block;
        let else_val = else_(self);
        let else_end = self.state.borrow().current;
        self.state.borrow_mut().blocks.get_mut(&else_end).unwrap().terminator =
            RecordedTerminator::Branch { target: merge_block, arg: Some(else_val.id) };

        {
            let mut s = self.state.borrow_mut();
            let result = s.fresh_value();
            s.blocks.get_mut(&merge_block).unwrap().params.push(result);
            s.blocks.get_mut(&parent).unwrap().terminator =
                RecordedTerminator::If { cond: cond.id, then_block, else_block, merge_block, result: Some(result) };
            s.current = merge_block;
            TracedValue { trace: self.clone(), id: result, stamp: then_val.stamp }
        }
    }

    /// Terminates the block currently being recorded into with a `Return`
    /// of `value`. Call once, after the traced expression has produced its
    /// final `TracedValue`.
    pub fn finish(&self, value: &TracedValue) {
        let mut s = self.state.borrow_mut();
        let current = s.current;
        s.blocks.get_mut(&current).unwrap().terminator = RecordedTerminator::Return(Some(value.id));
    }

    pub(crate) fn into_parts(self) -> (BlockId, HashMap<BlockId, RecordedBlock>) {
        let state = Rc::try_unwrap(self.state).map(RefCell::into_inner).unwrap_or_else(|rc| rc.borrow().clone_state());
        (state.entry, state.blocks)
    }
}

impl TraceState {
    fn clone_state(&self) -> TraceState {
        TraceState {
            next_value: self.next_value,
            next_block: self.next_block,
            blocks: self.blocks.clone(),
            current: self.current,
            entry: self.entry,
        }
    }
}

impl Clone for RecordedBlock {
    fn clone(&self) -> Self {
        RecordedBlock { id: self.id, params: self.params.clone(), ops: self.ops.clone(), terminator: self.terminator.clone() }
    }
}

impl Clone for RecordedTerminator {
    fn clone(&self) -> Self {
        match self {
            RecordedTerminator::Return(v) => RecordedTerminator::Return(*v),
            RecordedTerminator::Branch { target, arg } => RecordedTerminator::Branch { target: *target, arg: *arg },
            RecordedTerminator::If { cond, then_block, else_block, merge_block, result } => {
                RecordedTerminator::If { cond: *cond, then_block: *then_block, else_block: *else_block, merge_block: *merge_block, result: *result }
            }
            RecordedTerminator::None => RecordedTerminator::None,
        }
    }
}

/// A value whose arithmetic is recorded into an `ExecutionTrace` rather
/// than computed. Holds nothing but an id and a stamp — see the module
/// doc comment for why.
#[derive(Clone, Copy)]
pub struct TracedValue {
    trace: ExecutionTrace,
    pub id: ValueId,
    pub stamp: DataType,
}

impl std::fmt::Debug for TracedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedValue").field("id", &self.id).field("stamp", &self.stamp).finish()
    }
}

macro_rules! arith_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl std::ops::$trait for TracedValue {
            type Output = TracedValue;
            fn $method(self, rhs: TracedValue) -> TracedValue {
                let stamp = wider_stamp(self.stamp, rhs.stamp);
                let id = self.trace.state.borrow_mut().push(IrOp::Arith(ArithOp::$variant, self.id, rhs.id), stamp);
                TracedValue { trace: self.trace.clone(), id, stamp }
            }
        }
    };
}

arith_op!(Add, add, Add);
arith_op!(Sub, sub, Sub);
arith_op!(Mul, mul, Mul);
arith_op!(Div, div, Div);
arith_op!(Rem, rem, Mod);

impl std::ops::Not for TracedValue {
    type Output = TracedValue;
    fn not(self) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Logical(LogicalOp::Not, self.id, None), DataType::Bool);
        TracedValue { trace: self.trace.clone(), id, stamp: DataType::Bool }
    }
}

impl std::ops::Neg for TracedValue {
    type Output = TracedValue;
    fn neg(self) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Logical(LogicalOp::Negate, self.id, None), self.stamp);
        TracedValue { trace: self.trace.clone(), id, stamp: self.stamp }
    }
}

impl TracedValue {
    pub fn compare(self, op: CompareOp, rhs: TracedValue) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Compare(op, self.id, rhs.id), DataType::Bool);
        TracedValue { trace: self.trace.clone(), id, stamp: DataType::Bool }
    }

    pub fn and(self, rhs: TracedValue) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Logical(LogicalOp::And, self.id, Some(rhs.id)), DataType::Bool);
        TracedValue { trace: self.trace.clone(), id, stamp: DataType::Bool }
    }

    pub fn or(self, rhs: TracedValue) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Logical(LogicalOp::Or, self.id, Some(rhs.id)), DataType::Bool);
        TracedValue { trace: self.trace.clone(), id, stamp: DataType::Bool }
    }

    pub fn bitwise(self, op: BitwiseOp, rhs: TracedValue) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Bitwise(op, self.id, rhs.id), self.stamp);
        TracedValue { trace: self.trace.clone(), id, stamp: self.stamp }
    }

    pub fn cast(self, to: DataType) -> TracedValue {
        let id = self.trace.state.borrow_mut().push(IrOp::Cast(self.id, to), to);
        TracedValue { trace: self.trace.clone(), id, stamp: to }
    }
}

fn wider_stamp(a: DataType, b: DataType) -> DataType {
    let is_float = |t: DataType| matches!(t, DataType::Float32 | DataType::Float64);
    if is_float(a) || is_float(b) {
        DataType::Float64
    } else {
        DataType::Int64
    }
}
