//! IR instructions
//!
//! `Instr` is the closed set of instruction kinds. Capabilities are small
//! traits (`ResultInstr`, `CloneForInlining`) instead of a class hierarchy.
//!
//! Every instruction also has a canonical flat form, `(operation, result,
//! operands)`, used by persistence and the pretty-printer. Names, labels and
//! indices appear in that form as literal/label operands; `from_parts`
//! rebuilds and validates.

use super::call::{CallInstr, CallType};
use super::defined::DefinedInstr;
use super::inline::{CloneForInlining, InlineCloneContext};
use super::operand::{Label, Literal, Operand, ValueMap, Variable};
use super::operation::Operation;
use super::unit::IrUnit;
use crate::error::{EngineError, HostError};
use crate::interpreter::{InterpreterState, ThreadContext};
use crate::runtime::{Method, Symbol, Value, Visibility};
use crate::signal::{Escape, ExecResult, RaiseException};
use std::sync::Arc;

/// How control continues after an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum InstrOutcome {
    /// Fall through to the next instruction
    Continue,
    /// Continue at a label
    Jump(Label),
    /// Leave the unit with a value
    Return(Value),
}

/// Condition tested by a single-operand branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Taken when the value is truthy
    True,
    /// Taken when the value is falsy
    False,
    /// Taken when the value is nil
    Nil,
}

/// Instructions that may write a result variable
pub trait ResultInstr {
    /// Variable receiving the instruction's value
    fn result(&self) -> Option<&Variable>;

    /// Redirect the result into another variable
    fn update_result(&mut self, var: Variable);
}

/// IR instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `result = value`
    Copy {
        /// Destination
        result: Variable,
        /// Source
        value: Operand,
    },
    /// Jump target marker; executes as a no-op
    Label(Label),
    /// Unconditional jump
    Jump(Label),
    /// Conditional jump on a single value
    Branch {
        /// Condition tested
        kind: BranchKind,
        /// Value tested
        value: Operand,
        /// Taken branch
        target: Label,
    },
    /// Jump when both operands are `==` as values
    BEq {
        /// Left-hand value
        left: Operand,
        /// Right-hand value
        right: Operand,
        /// Taken branch
        target: Label,
    },
    /// Method call, including attribute assignment
    Call(CallInstr),
    /// Call the frame's block
    Yield {
        /// Receives the block's value, if kept
        result: Option<Variable>,
        /// Values passed to the block
        args: Vec<Operand>,
    },
    /// Store `self`
    ReceiveSelf(Variable),
    /// Store a required argument
    ReceiveArg {
        /// Destination
        result: Variable,
        /// Argument position
        index: u32,
    },
    /// Receive an optional argument; jumps to `present` when it was passed,
    /// otherwise falls through into the default-value code
    ReceiveOptArg {
        /// Destination
        result: Variable,
        /// Argument position
        index: u32,
        /// Skips the default-value code
        present: Label,
    },
    /// Store the arguments from `start` on as an array
    ReceiveRestArg {
        /// Destination
        result: Variable,
        /// First argument collected
        start: u32,
    },
    /// Store the frame's block, or nil
    ReceiveBlock(Variable),
    /// Store whether the frame has a block
    BlockGiven(Variable),
    /// Leave the unit with a value
    Return(Operand),
    /// `return` inside a block: leaves the method that created the block
    NonlocalReturn(Operand),
    /// `break` out of the running block's call
    Break(Operand),
    /// `next`: finish the running block iteration with a value
    Next(Operand),
    /// Raise `LocalJumpError` if the running block has escaped
    CheckForLocalJump,
    /// Safepoint
    ThreadPoll,
    /// Read a global
    GetGlobal {
        /// Destination
        result: Variable,
        /// Global name, including `$`
        name: Symbol,
    },
    /// Write a global
    PutGlobal {
        /// Global name, including `$`
        name: Symbol,
        /// Value stored
        value: Operand,
    },
    /// Read an instance variable
    GetField {
        /// Destination
        result: Variable,
        /// Object read
        object: Operand,
        /// Field name, including `@`
        name: Symbol,
    },
    /// Write an instance variable
    PutField {
        /// Object written
        object: Operand,
        /// Field name, including `@`
        name: Symbol,
        /// Value stored
        value: Operand,
    },
    /// Read a class variable
    GetClassVar {
        /// Destination
        result: Variable,
        /// Module whose hierarchy is searched
        module: Operand,
        /// Class variable name, including `@@`
        name: Symbol,
    },
    /// Write a class variable
    PutClassVar {
        /// Module written
        module: Operand,
        /// Class variable name, including `@@`
        name: Symbol,
        /// Value stored
        value: Operand,
    },
    /// Unqualified constant: lexical scopes, then ancestors, then `Object`
    SearchConst {
        /// Destination
        result: Variable,
        /// Constant name
        name: Symbol,
    },
    /// Qualified constant `module::name`; private constants are rejected
    InheritanceSearchConst {
        /// Destination
        result: Variable,
        /// Module searched
        module: Operand,
        /// Constant name
        name: Symbol,
    },
    /// Define a constant
    PutConst {
        /// Module that owns the constant
        module: Operand,
        /// Constant name
        name: Symbol,
        /// Value stored
        value: Operand,
    },
    /// `def name ... end` in the frame's lexical module
    DefineMethod {
        /// Method name
        name: Symbol,
        /// Method body
        body: Arc<IrUnit>,
    },
    /// Open a rescue region
    ExceptionRegionStart {
        /// Handler entry
        rescue: Label,
    },
    /// Close the innermost rescue region
    ExceptionRegionEnd,
    /// Store the exception being handled
    ReceiveException(Variable),
    /// Raise the operand's value
    ThrowException(Operand),
    /// One of the `defined?` checks
    Defined(DefinedInstr),
}

impl Instr {
    /// `result = value`
    pub fn copy(result: Variable, value: impl Into<Operand>) -> Self {
        Instr::Copy {
            result,
            value: value.into(),
        }
    }

    /// Call instruction with a fresh call site
    pub fn call(
        result: Option<Variable>,
        call_type: CallType,
        name: &str,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
    ) -> Self {
        Instr::Call(CallInstr::new(
            result,
            call_type,
            Symbol::intern(name),
            receiver,
            args,
            closure,
        ))
    }

    /// Conditional jump
    pub fn branch(kind: BranchKind, value: Operand, target: Label) -> Self {
        Instr::Branch {
            kind,
            value,
            target,
        }
    }

    /// Operation code
    pub fn operation(&self) -> Operation {
        match self {
            Instr::Copy { .. } => Operation::Copy,
            Instr::Label(_) => Operation::Label,
            Instr::Jump(_) => Operation::Jump,
            Instr::Branch { kind, .. } => match kind {
                BranchKind::True => Operation::BTrue,
                BranchKind::False => Operation::BFalse,
                BranchKind::Nil => Operation::BNil,
            },
            Instr::BEq { .. } => Operation::BEq,
            Instr::Call(call) if call.call_type() == CallType::Unknown => Operation::AttrAssign,
            Instr::Call(_) => Operation::Call,
            Instr::Yield { .. } => Operation::Yield,
            Instr::ReceiveSelf(_) => Operation::ReceiveSelf,
            Instr::ReceiveArg { .. } => Operation::ReceiveArg,
            Instr::ReceiveOptArg { .. } => Operation::ReceiveOptArg,
            Instr::ReceiveRestArg { .. } => Operation::ReceiveRestArg,
            Instr::ReceiveBlock(_) => Operation::ReceiveBlock,
            Instr::BlockGiven(_) => Operation::BlockGiven,
            Instr::Return(_) => Operation::Return,
            Instr::NonlocalReturn(_) => Operation::NonlocalReturn,
            Instr::Break(_) => Operation::Break,
            Instr::Next(_) => Operation::Next,
            Instr::CheckForLocalJump => Operation::CheckForLocalJump,
            Instr::ThreadPoll => Operation::ThreadPoll,
            Instr::GetGlobal { .. } => Operation::GetGlobal,
            Instr::PutGlobal { .. } => Operation::PutGlobal,
            Instr::GetField { .. } => Operation::GetField,
            Instr::PutField { .. } => Operation::PutField,
            Instr::GetClassVar { .. } => Operation::GetClassVar,
            Instr::PutClassVar { .. } => Operation::PutClassVar,
            Instr::SearchConst { .. } => Operation::SearchConst,
            Instr::InheritanceSearchConst { .. } => Operation::InheritanceSearchConst,
            Instr::PutConst { .. } => Operation::PutConst,
            Instr::DefineMethod { .. } => Operation::DefineMethod,
            Instr::ExceptionRegionStart { .. } => Operation::ExceptionRegionStart,
            Instr::ExceptionRegionEnd => Operation::ExceptionRegionEnd,
            Instr::ReceiveException(_) => Operation::ReceiveException,
            Instr::ThrowException(_) => Operation::ThrowException,
            Instr::Defined(d) => d.operation(),
        }
    }

    /// Labels this instruction may transfer control to
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Instr::Jump(l) => vec![*l],
            Instr::Branch { target, .. } | Instr::BEq { target, .. } => vec![*target],
            Instr::ReceiveOptArg { present, .. } => vec![*present],
            Instr::ExceptionRegionStart { rescue } => vec![*rescue],
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Interpretation
    // ========================================================================

    /// Execute the instruction against one activation
    ///
    /// The result variable is written only after the value has been computed,
    /// so a raising instruction leaves it untouched.
    pub fn interpret(
        &self,
        ctx: &mut ThreadContext,
        state: &mut InterpreterState<'_>,
    ) -> ExecResult<InstrOutcome> {
        match self {
            Instr::Copy { result, value } => {
                let v = value.retrieve(ctx, state)?;
                state.set(result, v)?;
            }
            Instr::Label(_) | Instr::ExceptionRegionStart { .. } | Instr::ExceptionRegionEnd => {}
            Instr::Jump(label) => return Ok(InstrOutcome::Jump(*label)),
            Instr::Branch {
                kind,
                value,
                target,
            } => {
                let v = value.retrieve(ctx, state)?;
                let taken = match kind {
                    BranchKind::True => v.is_truthy(),
                    BranchKind::False => !v.is_truthy(),
                    BranchKind::Nil => v.is_nil(),
                };
                if taken {
                    return Ok(InstrOutcome::Jump(*target));
                }
            }
            Instr::BEq {
                left,
                right,
                target,
            } => {
                let l = left.retrieve(ctx, state)?;
                let r = right.retrieve(ctx, state)?;
                if l == r {
                    return Ok(InstrOutcome::Jump(*target));
                }
            }
            Instr::Call(call) => call.interpret(ctx, state)?,
            Instr::Yield { result, args } => {
                let Some(block) = state.block.clone() else {
                    return Err(ctx.raise(
                        &ctx.runtime().core().local_jump_error,
                        "no block given (yield)",
                    ));
                };
                let args = crate::dispatch::adapter::retrieve_args(args, ctx, state)?;
                let v = block.call(ctx, &args)?;
                if let Some(result) = result {
                    state.set(result, v)?;
                }
            }
            Instr::ReceiveSelf(result) => {
                let v = state.self_value.clone();
                state.set(result, v)?;
            }
            Instr::ReceiveArg { result, index } => {
                let v = state.args.get(*index as usize).cloned().unwrap_or(Value::Nil);
                state.set(result, v)?;
            }
            Instr::ReceiveOptArg {
                result,
                index,
                present,
            } => {
                if let Some(v) = state.args.get(*index as usize).cloned() {
                    state.set(result, v)?;
                    return Ok(InstrOutcome::Jump(*present));
                }
            }
            Instr::ReceiveRestArg { result, start } => {
                let rest = state.args.get(*start as usize..).unwrap_or(&[]).to_vec();
                state.set(result, Value::array(rest))?;
            }
            Instr::ReceiveBlock(result) => {
                let v = state.block.clone().map(Value::Proc).unwrap_or(Value::Nil);
                state.set(result, v)?;
            }
            Instr::BlockGiven(result) => {
                let given = state.block.is_some();
                state.set(result, Value::Bool(given))?;
            }
            Instr::Return(value) => return Ok(InstrOutcome::Return(value.retrieve(ctx, state)?)),
            Instr::NonlocalReturn(value) => {
                let v = value.retrieve(ctx, state)?;
                let Some(block) = ctx.frame().current_block.clone() else {
                    return Ok(InstrOutcome::Return(v));
                };
                if !ctx.frame_is_live(block.home()) {
                    return Err(local_jump(ctx, "unexpected return"));
                }
                return Err(Escape::Return {
                    target: block.home(),
                    value: v,
                });
            }
            Instr::Break(value) => {
                let v = value.retrieve(ctx, state)?;
                let Some(block) = ctx.frame().current_block.clone() else {
                    return Err(local_jump(ctx, "break from proc-closure"));
                };
                return Err(Escape::Break {
                    target: block.token(),
                    value: v,
                });
            }
            Instr::Next(value) => {
                let v = value.retrieve(ctx, state)?;
                let Some(block) = ctx.frame().current_block.clone() else {
                    return Ok(InstrOutcome::Return(v));
                };
                return Err(Escape::Next {
                    target: block.token(),
                    value: v,
                });
            }
            Instr::CheckForLocalJump => {
                let escaped = ctx
                    .frame()
                    .current_block
                    .as_ref()
                    .map(|b| b.is_escaped())
                    .unwrap_or(false);
                if escaped {
                    return Err(local_jump(ctx, "break from proc-closure"));
                }
            }
            Instr::ThreadPoll => ctx.poll()?,
            Instr::GetGlobal { result, name } => {
                let v = ctx.runtime().globals().get(*name);
                state.set(result, v)?;
            }
            Instr::PutGlobal { name, value } => {
                let v = value.retrieve(ctx, state)?;
                ctx.runtime().globals().set(*name, v);
            }
            Instr::GetField {
                result,
                object,
                name,
            } => {
                let v = match object.retrieve(ctx, state)? {
                    Value::Object(obj) => obj.ivar_get(*name),
                    Value::Module(m) => m.ivar_get(*name),
                    _ => None,
                };
                state.set(result, v.unwrap_or(Value::Nil))?;
            }
            Instr::PutField {
                object,
                name,
                value,
            } => {
                let target = object.retrieve(ctx, state)?;
                let v = value.retrieve(ctx, state)?;
                match target {
                    Value::Object(obj) => obj.ivar_set(*name, v),
                    Value::Module(m) => m.ivar_set(*name, v),
                    other => {
                        return Err(HostError::TypeMismatch {
                            expected: "Object".to_string(),
                            found: other.type_name().to_string(),
                        }
                        .into())
                    }
                }
            }
            Instr::GetClassVar {
                result,
                module,
                name,
            } => {
                let module = expect_module(ctx, module.retrieve(ctx, state)?)?;
                let found = module.class_var_get(*name).or_else(|| {
                    match module.attached() {
                        Some(Value::Module(attached)) if module.is_singleton() => {
                            attached.class_var_get(*name)
                        }
                        _ => None,
                    }
                });
                let Some(v) = found else {
                    return Err(ctx.raise(
                        &ctx.runtime().core().name_error,
                        format!("uninitialized class variable {} in {}", name, module.name()),
                    ));
                };
                state.set(result, v)?;
            }
            Instr::PutClassVar {
                module,
                name,
                value,
            } => {
                let module = expect_module(ctx, module.retrieve(ctx, state)?)?;
                let v = value.retrieve(ctx, state)?;
                module.class_var_set(*name, v);
            }
            Instr::SearchConst { result, name } => {
                let v = search_const(ctx, *name)?;
                state.set(result, v)?;
            }
            Instr::InheritanceSearchConst {
                result,
                module,
                name,
            } => {
                let module = expect_module(ctx, module.retrieve(ctx, state)?)?;
                let v = match module.const_get_inherited(*name) {
                    Some(entry) if entry.private => {
                        return Err(ctx.raise(
                            &ctx.runtime().core().name_error,
                            format!("private constant {}::{} referenced", module.name(), name),
                        ))
                    }
                    Some(entry) => entry.value,
                    None => {
                        return Err(ctx.raise(
                            &ctx.runtime().core().name_error,
                            format!("uninitialized constant {}::{}", module.name(), name),
                        ))
                    }
                };
                state.set(result, v)?;
            }
            Instr::PutConst {
                module,
                name,
                value,
            } => {
                let module = expect_module(ctx, module.retrieve(ctx, state)?)?;
                let v = value.retrieve(ctx, state)?;
                module.const_set(*name, v);
            }
            Instr::DefineMethod { name, body } => {
                let frame = ctx.frame();
                let target = frame.lexical_module.clone();
                let top_level =
                    frame.name.is_none() && std::sync::Arc::ptr_eq(&target, &ctx.runtime().core().object);
                let visibility = if top_level {
                    Visibility::Private
                } else {
                    Visibility::Public
                };
                target.define_method(Method::ir(*name, visibility, body.clone()));
            }
            Instr::ReceiveException(result) => {
                let v = ctx.error_info();
                state.set(result, v)?;
            }
            Instr::ThrowException(value) => {
                let v = value.retrieve(ctx, state)?;
                if ctx.runtime().kind_of(&v, &ctx.runtime().core().exception) {
                    return Err(Escape::Raise(RaiseException::new(v)));
                }
                return Err(ctx.raise(
                    &ctx.runtime().core().type_error,
                    "exception class/object expected",
                ));
            }
            Instr::Defined(defined) => defined.interpret(ctx, state)?,
        }
        Ok(InstrOutcome::Continue)
    }

    // ========================================================================
    // Constant propagation
    // ========================================================================

    /// Replace read operands found in `map` (see `Operand::simplify`).
    /// Result variables are never replaced. Returns whether anything changed.
    pub fn simplify_operands(&mut self, map: &ValueMap, force: bool) -> bool {
        match self {
            Instr::Copy { value, .. }
            | Instr::Branch { value, .. }
            | Instr::Return(value)
            | Instr::NonlocalReturn(value)
            | Instr::Break(value)
            | Instr::Next(value)
            | Instr::PutGlobal { value, .. }
            | Instr::ThrowException(value) => value.simplify(map, force),
            Instr::BEq { left, right, .. } => {
                left.simplify(map, force) | right.simplify(map, force)
            }
            Instr::Call(call) => call.simplify_operands(map, force),
            Instr::Yield { args, .. } => args
                .iter_mut()
                .fold(false, |changed, a| a.simplify(map, force) | changed),
            Instr::GetField { object, .. } => object.simplify(map, force),
            Instr::PutField { object, value, .. } => {
                object.simplify(map, force) | value.simplify(map, force)
            }
            Instr::GetClassVar { module, .. } | Instr::InheritanceSearchConst { module, .. } => {
                module.simplify(map, force)
            }
            Instr::PutClassVar { module, value, .. } | Instr::PutConst { module, value, .. } => {
                module.simplify(map, force) | value.simplify(map, force)
            }
            Instr::Defined(defined) => defined.simplify_operands(map, force),
            _ => false,
        }
    }

    // ========================================================================
    // Flat form
    // ========================================================================

    /// Operands in canonical order (see module docs)
    pub fn operands(&self) -> Vec<Operand> {
        let sym = |s: &Symbol| Operand::Literal(Literal::Symbol(*s));
        let idx = |i: &u32| Operand::Literal(Literal::Fixnum(*i as i64));
        match self {
            Instr::Copy { value, .. } => vec![value.clone()],
            Instr::Label(l) | Instr::Jump(l) => vec![Operand::Label(*l)],
            Instr::Branch { value, target, .. } => vec![value.clone(), Operand::Label(*target)],
            Instr::BEq {
                left,
                right,
                target,
            } => vec![left.clone(), right.clone(), Operand::Label(*target)],
            Instr::Call(call) => call.operands(),
            Instr::Yield { args, .. } => args.clone(),
            Instr::ReceiveSelf(_)
            | Instr::ReceiveBlock(_)
            | Instr::BlockGiven(_)
            | Instr::CheckForLocalJump
            | Instr::ThreadPoll
            | Instr::ExceptionRegionEnd
            | Instr::ReceiveException(_) => Vec::new(),
            Instr::ReceiveArg { index, .. } => vec![idx(index)],
            Instr::ReceiveOptArg { index, present, .. } => {
                vec![idx(index), Operand::Label(*present)]
            }
            Instr::ReceiveRestArg { start, .. } => vec![idx(start)],
            Instr::Return(v)
            | Instr::NonlocalReturn(v)
            | Instr::Break(v)
            | Instr::Next(v)
            | Instr::ThrowException(v) => vec![v.clone()],
            Instr::GetGlobal { name, .. } | Instr::SearchConst { name, .. } => vec![sym(name)],
            Instr::PutGlobal { name, value } => vec![sym(name), value.clone()],
            Instr::GetField { object, name, .. } => vec![object.clone(), sym(name)],
            Instr::PutField {
                object,
                name,
                value,
            } => vec![object.clone(), sym(name), value.clone()],
            Instr::GetClassVar { module, name, .. }
            | Instr::InheritanceSearchConst { module, name, .. } => {
                vec![module.clone(), sym(name)]
            }
            Instr::PutClassVar {
                module,
                name,
                value,
            }
            | Instr::PutConst {
                module,
                name,
                value,
            } => vec![module.clone(), sym(name), value.clone()],
            Instr::DefineMethod { name, body } => {
                vec![sym(name), Operand::Closure(body.clone())]
            }
            Instr::ExceptionRegionStart { rescue } => vec![Operand::Label(*rescue)],
            Instr::Defined(defined) => defined.operands(),
        }
    }

    /// Rebuild an instruction from its flat form, validating operand count,
    /// operand kinds and result presence
    pub fn from_parts(
        op: Operation,
        result: Option<Variable>,
        operands: Vec<Operand>,
    ) -> Result<Instr, EngineError> {
        if let Some(expected) = fixed_operand_count(op) {
            if operands.len() != expected {
                return Err(EngineError::OperandArity {
                    op,
                    expected,
                    got: operands.len(),
                });
            }
        }
        let mut parts = Parts::new(op, operands);
        let instr = match op {
            Operation::Copy => Instr::Copy {
                result: required(op, result)?,
                value: parts.next()?,
            },
            Operation::Label => Instr::Label(parts.label()?),
            Operation::Jump => Instr::Jump(parts.label()?),
            Operation::BTrue | Operation::BFalse | Operation::BNil => Instr::Branch {
                kind: match op {
                    Operation::BTrue => BranchKind::True,
                    Operation::BFalse => BranchKind::False,
                    _ => BranchKind::Nil,
                },
                value: parts.next()?,
                target: parts.label()?,
            },
            Operation::BEq => Instr::BEq {
                left: parts.next()?,
                right: parts.next()?,
                target: parts.label()?,
            },
            Operation::Call | Operation::AttrAssign => {
                Instr::Call(CallInstr::from_parts(op, result, parts.rest())?)
            }
            Operation::Yield => Instr::Yield {
                result,
                args: parts.rest(),
            },
            Operation::ReceiveSelf => Instr::ReceiveSelf(required(op, result)?),
            Operation::ReceiveArg => Instr::ReceiveArg {
                result: required(op, result)?,
                index: parts.index()?,
            },
            Operation::ReceiveOptArg => Instr::ReceiveOptArg {
                result: required(op, result)?,
                index: parts.index()?,
                present: parts.label()?,
            },
            Operation::ReceiveRestArg => Instr::ReceiveRestArg {
                result: required(op, result)?,
                start: parts.index()?,
            },
            Operation::ReceiveBlock => Instr::ReceiveBlock(required(op, result)?),
            Operation::BlockGiven => Instr::BlockGiven(required(op, result)?),
            Operation::Return => Instr::Return(parts.next()?),
            Operation::NonlocalReturn => Instr::NonlocalReturn(parts.next()?),
            Operation::Break => Instr::Break(parts.next()?),
            Operation::Next => Instr::Next(parts.next()?),
            Operation::CheckForLocalJump => Instr::CheckForLocalJump,
            Operation::ThreadPoll => Instr::ThreadPoll,
            Operation::GetGlobal => Instr::GetGlobal {
                result: required(op, result)?,
                name: parts.symbol()?,
            },
            Operation::PutGlobal => Instr::PutGlobal {
                name: parts.symbol()?,
                value: parts.next()?,
            },
            Operation::GetField => Instr::GetField {
                result: required(op, result)?,
                object: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::PutField => Instr::PutField {
                object: parts.next()?,
                name: parts.symbol()?,
                value: parts.next()?,
            },
            Operation::GetClassVar => Instr::GetClassVar {
                result: required(op, result)?,
                module: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::PutClassVar => Instr::PutClassVar {
                module: parts.next()?,
                name: parts.symbol()?,
                value: parts.next()?,
            },
            Operation::SearchConst => Instr::SearchConst {
                result: required(op, result)?,
                name: parts.symbol()?,
            },
            Operation::InheritanceSearchConst => Instr::InheritanceSearchConst {
                result: required(op, result)?,
                module: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::PutConst => Instr::PutConst {
                module: parts.next()?,
                name: parts.symbol()?,
                value: parts.next()?,
            },
            Operation::DefineMethod => Instr::DefineMethod {
                name: parts.symbol()?,
                body: parts.unit()?,
            },
            Operation::ExceptionRegionStart => Instr::ExceptionRegionStart {
                rescue: parts.label()?,
            },
            Operation::ExceptionRegionEnd => Instr::ExceptionRegionEnd,
            Operation::ReceiveException => Instr::ReceiveException(required(op, result)?),
            Operation::ThrowException => Instr::ThrowException(parts.next()?),
            Operation::GlobalIsDefined
            | Operation::HasInstanceVar
            | Operation::ClassVarIsDefined
            | Operation::IsMethodBound
            | Operation::MethodIsPublic
            | Operation::SuperMethodBound
            | Operation::BackrefIsMatchData
            | Operation::GetErrorInfo
            | Operation::RestoreErrorInfo => {
                Instr::Defined(DefinedInstr::from_parts(op, result, &mut parts)?)
            }
        };
        Ok(instr)
    }
}

impl ResultInstr for Instr {
    fn result(&self) -> Option<&Variable> {
        match self {
            Instr::Copy { result, .. }
            | Instr::ReceiveArg { result, .. }
            | Instr::ReceiveOptArg { result, .. }
            | Instr::ReceiveRestArg { result, .. }
            | Instr::GetGlobal { result, .. }
            | Instr::GetField { result, .. }
            | Instr::GetClassVar { result, .. }
            | Instr::SearchConst { result, .. }
            | Instr::InheritanceSearchConst { result, .. } => Some(result),
            Instr::ReceiveSelf(result)
            | Instr::ReceiveBlock(result)
            | Instr::BlockGiven(result)
            | Instr::ReceiveException(result) => Some(result),
            Instr::Yield { result, .. } => result.as_ref(),
            Instr::Call(call) => call.result(),
            Instr::Defined(defined) => defined.result(),
            _ => None,
        }
    }

    fn update_result(&mut self, var: Variable) {
        match self {
            Instr::Copy { result, .. }
            | Instr::ReceiveArg { result, .. }
            | Instr::ReceiveOptArg { result, .. }
            | Instr::ReceiveRestArg { result, .. }
            | Instr::GetGlobal { result, .. }
            | Instr::GetField { result, .. }
            | Instr::GetClassVar { result, .. }
            | Instr::SearchConst { result, .. }
            | Instr::InheritanceSearchConst { result, .. } => *result = var,
            Instr::ReceiveSelf(result)
            | Instr::ReceiveBlock(result)
            | Instr::BlockGiven(result)
            | Instr::ReceiveException(result) => *result = var,
            Instr::Yield { result, .. } => *result = Some(var),
            Instr::Call(call) => call.update_result(var),
            Instr::Defined(defined) => defined.update_result(var),
            _ => {}
        }
    }
}

impl CloneForInlining for Instr {
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        let mut cloned = match self {
            Instr::Copy { value, .. } => Instr::Copy {
                result: Variable::Temp(0),
                value: value.clone_for_inlining(ctx),
            },
            Instr::Label(l) => Instr::Label(l.clone_for_inlining(ctx)),
            Instr::Jump(l) => Instr::Jump(l.clone_for_inlining(ctx)),
            Instr::Branch {
                kind,
                value,
                target,
            } => Instr::Branch {
                kind: *kind,
                value: value.clone_for_inlining(ctx),
                target: target.clone_for_inlining(ctx),
            },
            Instr::BEq {
                left,
                right,
                target,
            } => Instr::BEq {
                left: left.clone_for_inlining(ctx),
                right: right.clone_for_inlining(ctx),
                target: target.clone_for_inlining(ctx),
            },
            Instr::Call(call) => Instr::Call(call.clone_for_inlining(ctx)),
            Instr::Yield { result, args } => Instr::Yield {
                result: result.clone(),
                args: args.iter().map(|a| a.clone_for_inlining(ctx)).collect(),
            },
            Instr::ReceiveOptArg {
                result,
                index,
                present,
            } => Instr::ReceiveOptArg {
                result: result.clone(),
                index: *index,
                present: present.clone_for_inlining(ctx),
            },
            Instr::Return(v) => Instr::Return(v.clone_for_inlining(ctx)),
            Instr::NonlocalReturn(v) => Instr::NonlocalReturn(v.clone_for_inlining(ctx)),
            Instr::Break(v) => Instr::Break(v.clone_for_inlining(ctx)),
            Instr::Next(v) => Instr::Next(v.clone_for_inlining(ctx)),
            Instr::ThrowException(v) => Instr::ThrowException(v.clone_for_inlining(ctx)),
            Instr::PutGlobal { name, value } => Instr::PutGlobal {
                name: *name,
                value: value.clone_for_inlining(ctx),
            },
            Instr::GetField { result, object, name } => Instr::GetField {
                result: result.clone(),
                object: object.clone_for_inlining(ctx),
                name: *name,
            },
            Instr::PutField {
                object,
                name,
                value,
            } => Instr::PutField {
                object: object.clone_for_inlining(ctx),
                name: *name,
                value: value.clone_for_inlining(ctx),
            },
            Instr::GetClassVar {
                result,
                module,
                name,
            } => Instr::GetClassVar {
                result: result.clone(),
                module: module.clone_for_inlining(ctx),
                name: *name,
            },
            Instr::PutClassVar {
                module,
                name,
                value,
            } => Instr::PutClassVar {
                module: module.clone_for_inlining(ctx),
                name: *name,
                value: value.clone_for_inlining(ctx),
            },
            Instr::InheritanceSearchConst {
                result,
                module,
                name,
            } => Instr::InheritanceSearchConst {
                result: result.clone(),
                module: module.clone_for_inlining(ctx),
                name: *name,
            },
            Instr::PutConst {
                module,
                name,
                value,
            } => Instr::PutConst {
                module: module.clone_for_inlining(ctx),
                name: *name,
                value: value.clone_for_inlining(ctx),
            },
            Instr::ExceptionRegionStart { rescue } => Instr::ExceptionRegionStart {
                rescue: rescue.clone_for_inlining(ctx),
            },
            Instr::Defined(defined) => Instr::Defined(defined.clone_for_inlining(ctx)),
            other => other.clone(),
        };
        // Results are renamed in one place for every instruction kind
        if let Some(result) = self.result() {
            let renamed = result.clone_for_inlining(ctx);
            cloned.update_result(renamed);
        }
        cloned
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn local_jump(ctx: &ThreadContext, message: &str) -> Escape {
    ctx.raise(&ctx.runtime().core().local_jump_error, message)
}

fn expect_module(ctx: &ThreadContext, value: Value) -> ExecResult<crate::runtime::ModuleRef> {
    match value {
        Value::Module(m) => Ok(m),
        other => Err(ctx.raise(
            &ctx.runtime().core().type_error,
            format!("{:?} is not a class/module", other),
        )),
    }
}

/// Lexical scopes first (private constants allowed), then the innermost
/// module's ancestors, then `Object`
fn search_const(ctx: &ThreadContext, name: Symbol) -> ExecResult {
    let start = ctx.frame().lexical_module.clone();
    let mut lexical = Some(&start);
    while let Some(module) = lexical {
        if let Some(entry) = module.const_get_local(name) {
            return Ok(entry.value);
        }
        lexical = module.lexical_parent();
    }
    if let Some(entry) = start.const_get_inherited(name) {
        return Ok(entry.value);
    }
    let rt = ctx.runtime();
    if let Some(entry) = rt.core().object.const_get_local(name) {
        return Ok(entry.value);
    }
    Err(rt.raise(
        &rt.core().name_error,
        format!("uninitialized constant {}", name),
    ))
}

fn required(op: Operation, result: Option<Variable>) -> Result<Variable, EngineError> {
    result.ok_or_else(|| EngineError::MalformedIr(format!("{} requires a result variable", op)))
}

/// Operand count for fixed-arity operations; `None` for variable arity
pub fn fixed_operand_count(op: Operation) -> Option<usize> {
    let count = match op {
        Operation::Call | Operation::AttrAssign | Operation::Yield => return None,
        Operation::ReceiveSelf
        | Operation::ReceiveBlock
        | Operation::BlockGiven
        | Operation::CheckForLocalJump
        | Operation::ThreadPoll
        | Operation::ExceptionRegionEnd
        | Operation::ReceiveException
        | Operation::BackrefIsMatchData
        | Operation::GetErrorInfo => 0,
        Operation::Copy
        | Operation::Label
        | Operation::Jump
        | Operation::ReceiveArg
        | Operation::ReceiveRestArg
        | Operation::Return
        | Operation::NonlocalReturn
        | Operation::Break
        | Operation::Next
        | Operation::GetGlobal
        | Operation::SearchConst
        | Operation::ExceptionRegionStart
        | Operation::ThrowException
        | Operation::GlobalIsDefined
        | Operation::SuperMethodBound
        | Operation::RestoreErrorInfo => 1,
        Operation::BTrue
        | Operation::BFalse
        | Operation::BNil
        | Operation::ReceiveOptArg
        | Operation::PutGlobal
        | Operation::GetField
        | Operation::GetClassVar
        | Operation::InheritanceSearchConst
        | Operation::DefineMethod
        | Operation::HasInstanceVar
        | Operation::ClassVarIsDefined
        | Operation::IsMethodBound
        | Operation::MethodIsPublic => 2,
        Operation::BEq | Operation::PutField | Operation::PutClassVar | Operation::PutConst => 3,
    };
    Some(count)
}

/// Cursor over a flat operand list
pub(crate) struct Parts {
    op: Operation,
    items: std::vec::IntoIter<Operand>,
}

impl Parts {
    pub(crate) fn new(op: Operation, operands: Vec<Operand>) -> Self {
        Self {
            op,
            items: operands.into_iter(),
        }
    }

    fn malformed(&self, what: &str, found: Option<&Operand>) -> EngineError {
        match found {
            Some(found) => EngineError::MalformedIr(format!(
                "{}: expected {} operand, found {}",
                self.op, what, found
            )),
            None => EngineError::MalformedIr(format!("{}: missing {} operand", self.op, what)),
        }
    }

    pub(crate) fn next(&mut self) -> Result<Operand, EngineError> {
        self.items.next().ok_or_else(|| self.malformed("value", None))
    }

    pub(crate) fn symbol(&mut self) -> Result<Symbol, EngineError> {
        match self.items.next() {
            Some(Operand::Literal(Literal::Symbol(s))) => Ok(s),
            other => Err(self.malformed("symbol", other.as_ref())),
        }
    }

    pub(crate) fn label(&mut self) -> Result<Label, EngineError> {
        match self.items.next() {
            Some(Operand::Label(l)) => Ok(l),
            other => Err(self.malformed("label", other.as_ref())),
        }
    }

    pub(crate) fn index(&mut self) -> Result<u32, EngineError> {
        match self.items.next() {
            Some(Operand::Literal(Literal::Fixnum(n))) if (0..=u32::MAX as i64).contains(&n) => {
                Ok(n as u32)
            }
            other => Err(self.malformed("index", other.as_ref())),
        }
    }

    pub(crate) fn flag(&mut self) -> Result<bool, EngineError> {
        match self.items.next() {
            Some(Operand::Literal(Literal::Bool(b))) => Ok(b),
            other => Err(self.malformed("flag", other.as_ref())),
        }
    }

    pub(crate) fn unit(&mut self) -> Result<Arc<IrUnit>, EngineError> {
        match self.items.next() {
            Some(Operand::Closure(unit)) => Ok(unit),
            other => Err(self.malformed("closure", other.as_ref())),
        }
    }

    pub(crate) fn rest(self) -> Vec<Operand> {
        self.items.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::inline::InlineAllocator;
    use crate::ir::IrBuilder;
    use crate::runtime::Arity;

    fn sample() -> Vec<Instr> {
        let mut c = IrBuilder::closure("blk", Arity::fixed(0));
        c.ret(Operand::nil());
        let closure = c.finish_arc().unwrap();

        let x = Variable::local("x", 0, 0);
        vec![
            Instr::Copy {
                result: x.clone(),
                value: Operand::fixnum(7),
            },
            Instr::Call(CallInstr::new(
                Some(Variable::Temp(0)),
                CallType::Normal,
                Symbol::intern("each"),
                x.clone().into(),
                vec![Operand::temp(1), Operand::string("sep")],
                Some(Operand::Closure(closure)),
            )),
            Instr::Defined(DefinedInstr::HasInstanceVar {
                result: Variable::Temp(2),
                object: Operand::temp(0),
                name: Symbol::intern("@count"),
            }),
        ]
    }

    fn variables(instrs: &[Instr]) -> Vec<Variable> {
        let mut out = Vec::new();
        for instr in instrs {
            out.extend(instr.result().cloned());
            match instr {
                Instr::Call(call) => {
                    for op in std::iter::once(call.receiver()).chain(call.args()) {
                        if let Operand::Variable(v) = op {
                            out.push(v.clone());
                        }
                    }
                }
                Instr::Defined(DefinedInstr::HasInstanceVar {
                    object: Operand::Variable(v),
                    ..
                }) => out.push(v.clone()),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_clone_for_inlining_renames_per_context() {
        let original = sample();
        let mut alloc = InlineAllocator::new(100, 0);

        let first: Vec<Instr> = {
            let mut ctx = alloc.context();
            original.iter().map(|i| i.clone_for_inlining(&mut ctx)).collect()
        };
        let second: Vec<Instr> = {
            let mut ctx = alloc.context();
            original.iter().map(|i| i.clone_for_inlining(&mut ctx)).collect()
        };

        // Copy result, call result, call receiver, temp arg, defined result, defined object
        let (a, b) = (variables(&first), variables(&second));
        assert_eq!(a.len(), 6);
        assert!(a.iter().all(|v| matches!(v, Variable::Temp(n) if *n >= 100)));
        assert!(a.iter().all(|v| !b.contains(v)));

        // One rename per distinct variable inside a context
        assert_eq!(a[0], a[2], "x written then read");
        assert_eq!(a[1], a[5], "call result feeds defined?");
        assert_eq!(alloc.temps_used(), 100 + 4 * 2);
    }

    #[test]
    fn test_clone_for_inlining_shares_literals_and_closures() {
        let original = sample();
        let mut alloc = InlineAllocator::new(100, 0);
        let mut ctx = alloc.context();
        let cloned: Vec<Instr> = original.iter().map(|i| i.clone_for_inlining(&mut ctx)).collect();

        let Instr::Copy { value, .. } = &cloned[0] else {
            panic!("expected copy");
        };
        assert_eq!(value, &Operand::fixnum(7));

        let (Instr::Call(before), Instr::Call(after)) = (&original[1], &cloned[1]) else {
            panic!("expected calls");
        };
        assert_eq!(after.name(), before.name());
        match (&before.args()[1], &after.args()[1]) {
            (Operand::Literal(Literal::Str(a)), Operand::Literal(Literal::Str(b))) => {
                assert!(Arc::ptr_eq(a, b))
            }
            other => panic!("string literal changed: {:?}", other),
        }
        match (before.closure(), after.closure()) {
            (Some(Operand::Closure(a)), Some(Operand::Closure(b))) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("closure not kept: {:?}", other),
        }

        let Instr::Defined(DefinedInstr::HasInstanceVar { name, .. }) = &cloned[2] else {
            panic!("expected defined?");
        };
        assert_eq!(*name, Symbol::intern("@count"));
    }
}
