//! Call instructions
//!
//! A `CallInstr` owns its call adapter. The adapter is chosen once from the
//! call's static shape and rebuilt whenever operand simplification changes
//! that shape (a variable argument becoming a literal can move the call onto
//! a constant adapter).

use super::inline::{CloneForInlining, InlineCloneContext};
use super::instr::{Parts, ResultInstr};
use super::operand::{Literal, Operand, ValueMap, Variable};
use super::operation::Operation;
use crate::dispatch::{AdapterKind, CallAdapter, CallSite};
use crate::error::EngineError;
use crate::interpreter::{InterpreterState, ThreadContext};
use crate::runtime::Symbol;
use crate::signal::ExecResult;

/// How a call names its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// `recv.foo`
    Normal,
    /// `foo(args)` with implicit self
    Functional,
    /// Bare `foo` that could have been a local variable
    Variable,
    /// `super`: lookup starts above the frame's defining module
    Super,
    /// Attribute assignment; resolved at the call site
    Unknown,
}

impl CallType {
    /// Numeric code stored in persisted IR
    pub fn code(&self) -> i64 {
        match self {
            CallType::Normal => 0,
            CallType::Functional => 1,
            CallType::Variable => 2,
            CallType::Super => 3,
            CallType::Unknown => 4,
        }
    }

    /// Inverse of `code`
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => CallType::Normal,
            1 => CallType::Functional,
            2 => CallType::Variable,
            3 => CallType::Super,
            4 => CallType::Unknown,
            _ => return None,
        })
    }

    /// Whether private methods are reachable with this call type
    pub fn allows_private(&self) -> bool {
        matches!(self, CallType::Functional | CallType::Variable | CallType::Super)
    }
}

/// Call instruction: result variable plus its adapter
#[derive(Debug, Clone)]
pub struct CallInstr {
    result: Option<Variable>,
    adapter: CallAdapter,
}

impl CallInstr {
    /// Call with a fresh call site
    pub fn new(
        result: Option<Variable>,
        call_type: CallType,
        name: Symbol,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
    ) -> Self {
        Self {
            result,
            adapter: CallAdapter::new(CallSite::new(name, call_type), receiver, args, closure),
        }
    }

    /// Method name
    pub fn name(&self) -> Symbol {
        self.adapter.site().name()
    }

    /// How the call was written
    pub fn call_type(&self) -> CallType {
        self.adapter.site().call_type()
    }

    /// Receiver operand
    pub fn receiver(&self) -> &Operand {
        self.adapter.receiver()
    }

    /// Argument operands
    pub fn args(&self) -> &[Operand] {
        self.adapter.args()
    }

    /// Block operand, if any
    pub fn closure(&self) -> Option<&Operand> {
        self.adapter.closure()
    }

    /// Adapter that routes the operands
    pub fn adapter(&self) -> &CallAdapter {
        &self.adapter
    }

    /// Shape of the adapter
    pub fn adapter_kind(&self) -> AdapterKind {
        self.adapter.kind()
    }

    /// Dispatch and store the result
    pub fn interpret(
        &self,
        ctx: &mut ThreadContext,
        state: &mut InterpreterState<'_>,
    ) -> ExecResult<()> {
        let value = self.adapter.call(ctx, state)?;
        if let Some(result) = &self.result {
            state.set(result, value)?;
        }
        Ok(())
    }

    /// Substitute known values; true if anything changed
    pub fn simplify_operands(&mut self, map: &ValueMap, force: bool) -> bool {
        let mut receiver = self.receiver().clone();
        let mut args = self.args().to_vec();
        let mut closure = self.closure().cloned();

        let mut changed = receiver.simplify(map, force);
        for arg in &mut args {
            changed |= arg.simplify(map, force);
        }
        if let Some(closure) = &mut closure {
            changed |= closure.simplify(map, force);
        }
        if changed {
            self.adapter = self.adapter.rebuild(receiver, args, closure);
        }
        changed
    }

    /// `[name, call type, receiver, has closure, closure?, args...]`
    pub fn operands(&self) -> Vec<Operand> {
        let mut ops = vec![
            Operand::Literal(Literal::Symbol(self.name())),
            Operand::fixnum(self.call_type().code()),
            self.receiver().clone(),
            Operand::Literal(Literal::Bool(self.closure().is_some())),
        ];
        ops.extend(self.closure().cloned());
        ops.extend(self.args().iter().cloned());
        ops
    }

    pub(crate) fn from_parts(
        op: Operation,
        result: Option<Variable>,
        operands: Vec<Operand>,
    ) -> Result<Self, EngineError> {
        if operands.len() < 4 {
            return Err(EngineError::OperandArity {
                op,
                expected: 4,
                got: operands.len(),
            });
        }
        let mut parts = Parts::new(op, operands);
        let name = parts.symbol()?;
        let code = match parts.next()? {
            Operand::Literal(Literal::Fixnum(code)) => code,
            other => {
                return Err(EngineError::MalformedIr(format!(
                    "{}: bad call type operand {}",
                    op, other
                )))
            }
        };
        let call_type = CallType::from_code(code)
            .ok_or_else(|| EngineError::MalformedIr(format!("{}: unknown call type {}", op, code)))?;
        if (op == Operation::AttrAssign) != (call_type == CallType::Unknown) {
            return Err(EngineError::MalformedIr(format!(
                "{} cannot carry call type {:?}",
                op, call_type
            )));
        }
        let receiver = parts.next()?;
        let closure = if parts.flag()? {
            Some(parts.next()?)
        } else {
            None
        };
        Ok(CallInstr::new(
            result,
            call_type,
            name,
            receiver,
            parts.rest(),
            closure,
        ))
    }
}

impl PartialEq for CallInstr {
    fn eq(&self, other: &Self) -> bool {
        self.result == other.result
            && self.name() == other.name()
            && self.call_type() == other.call_type()
            && self.receiver() == other.receiver()
            && self.args() == other.args()
            && self.closure() == other.closure()
    }
}

impl ResultInstr for CallInstr {
    fn result(&self) -> Option<&Variable> {
        self.result.as_ref()
    }

    fn update_result(&mut self, var: Variable) {
        self.result = Some(var);
    }
}

impl CloneForInlining for CallInstr {
    /// Operands are renamed and the copy gets its own call site and cache;
    /// the result is renamed by the caller
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        CallInstr::new(
            self.result.clone(),
            self.call_type(),
            self.name(),
            self.receiver().clone_for_inlining(ctx),
            self.args().iter().map(|a| a.clone_for_inlining(ctx)).collect(),
            self.closure().map(|c| c.clone_for_inlining(ctx)),
        )
    }
}
