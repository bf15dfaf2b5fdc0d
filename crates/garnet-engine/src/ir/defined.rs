//! `defined?` support instructions
//!
//! Predicates produce `true`/`false` and never raise: a receiver of the wrong
//! kind, a missing name or a missing frame all answer `false`. The error-info
//! pair saves and restores `$!` around nested handlers.

use super::inline::{CloneForInlining, InlineCloneContext};
use super::instr::{Parts, ResultInstr};
use super::operand::{Literal, Operand, ValueMap, Variable};
use super::operation::Operation;
use crate::error::EngineError;
use crate::interpreter::{InterpreterState, ThreadContext};
use crate::runtime::{ModuleRef, Symbol, Value, Visibility};
use crate::signal::ExecResult;

/// `defined?` checks and the `$!` save/restore around them
#[derive(Debug, Clone, PartialEq)]
pub enum DefinedInstr {
    /// Global has been assigned
    GlobalIsDefined {
        /// Receives the boolean
        result: Variable,
        /// Global name, including `$`
        name: Symbol,
    },
    /// Instance variable is set on the object
    HasInstanceVar {
        /// Receives the boolean
        result: Variable,
        /// Object inspected
        object: Operand,
        /// Field name, including `@`
        name: Symbol,
    },
    /// Falls back to the attached module when `module` is a singleton class
    ClassVarIsDefined {
        /// Receives the boolean
        result: Variable,
        /// Module whose hierarchy is searched
        module: Operand,
        /// Class variable name, including `@@`
        name: Symbol,
    },
    /// Method resolvable on the receiver's class, any visibility
    IsMethodBound {
        /// Receives the boolean
        result: Variable,
        /// Receiver
        object: Operand,
        /// Method name
        name: Symbol,
    },
    /// Public, or protected and the caller's self is a kind of the owner
    MethodIsPublic {
        /// Receives the boolean
        result: Variable,
        /// Receiver
        object: Operand,
        /// Method name
        name: Symbol,
    },
    /// Would `super` from the running method find a target
    SuperMethodBound {
        /// Receives the boolean
        result: Variable,
        /// Receiver of the `super` call
        object: Operand,
    },
    /// Frame's last match is a match object
    BackrefIsMatchData {
        /// Receives the boolean
        result: Variable,
    },
    /// Save the current `$!`
    GetErrorInfo {
        /// Receives the saved exception, or nil
        result: Variable,
    },
    /// Put back a `$!` saved by `GetErrorInfo`
    RestoreErrorInfo {
        /// Saved exception
        value: Operand,
    },
}

impl DefinedInstr {
    /// Operation code
    pub fn operation(&self) -> Operation {
        match self {
            DefinedInstr::GlobalIsDefined { .. } => Operation::GlobalIsDefined,
            DefinedInstr::HasInstanceVar { .. } => Operation::HasInstanceVar,
            DefinedInstr::ClassVarIsDefined { .. } => Operation::ClassVarIsDefined,
            DefinedInstr::IsMethodBound { .. } => Operation::IsMethodBound,
            DefinedInstr::MethodIsPublic { .. } => Operation::MethodIsPublic,
            DefinedInstr::SuperMethodBound { .. } => Operation::SuperMethodBound,
            DefinedInstr::BackrefIsMatchData { .. } => Operation::BackrefIsMatchData,
            DefinedInstr::GetErrorInfo { .. } => Operation::GetErrorInfo,
            DefinedInstr::RestoreErrorInfo { .. } => Operation::RestoreErrorInfo,
        }
    }

    /// Evaluate the check and store its result
    pub fn interpret(
        &self,
        ctx: &mut ThreadContext,
        state: &mut InterpreterState<'_>,
    ) -> ExecResult<()> {
        let (result, answer) = match self {
            DefinedInstr::GlobalIsDefined { result, name } => {
                (result, ctx.runtime().globals().is_defined(*name))
            }
            DefinedInstr::HasInstanceVar {
                result,
                object,
                name,
            } => {
                let present = match object.retrieve(ctx, state)? {
                    Value::Object(obj) => obj.ivar_defined(*name),
                    Value::Module(m) => m.ivar_defined(*name),
                    _ => false,
                };
                (result, present)
            }
            DefinedInstr::ClassVarIsDefined {
                result,
                module,
                name,
            } => {
                let present = match module.retrieve(ctx, state)? {
                    Value::Module(m) => class_var_defined(&m, *name),
                    _ => false,
                };
                (result, present)
            }
            DefinedInstr::IsMethodBound {
                result,
                object,
                name,
            } => {
                let receiver = object.retrieve(ctx, state)?;
                let class = ctx.runtime().class_of(&receiver);
                (result, class.resolve_method(*name).is_some())
            }
            DefinedInstr::MethodIsPublic {
                result,
                object,
                name,
            } => {
                let receiver = object.retrieve(ctx, state)?;
                let rt = ctx.runtime();
                let public = match rt.class_of(&receiver).resolve_method(*name) {
                    Some(m) => match m.visibility() {
                        Visibility::Public => true,
                        Visibility::Protected => rt.kind_of(ctx.self_value(), &m.owner),
                        Visibility::Private => false,
                    },
                    None => false,
                };
                (result, public)
            }
            DefinedInstr::SuperMethodBound { result, object } => {
                let receiver = object.retrieve(ctx, state)?;
                let frame = ctx.frame();
                let bound = match (frame.name, frame.defining_module.as_ref()) {
                    (Some(name), Some(defining)) => ctx
                        .runtime()
                        .class_of(&receiver)
                        .resolve_method_after(defining, name)
                        .is_some(),
                    _ => false,
                };
                (result, bound)
            }
            DefinedInstr::BackrefIsMatchData { result } => {
                (result, matches!(ctx.backref(), Value::MatchData(_)))
            }
            DefinedInstr::GetErrorInfo { result } => {
                let info = ctx.error_info();
                state.set(result, info)?;
                return Ok(());
            }
            DefinedInstr::RestoreErrorInfo { value } => {
                let v = value.retrieve(ctx, state)?;
                ctx.set_error_info(v);
                return Ok(());
            }
        };
        state.set(result, Value::Bool(answer))?;
        Ok(())
    }

    /// Substitute known values; true if anything changed
    pub fn simplify_operands(&mut self, map: &ValueMap, force: bool) -> bool {
        match self {
            DefinedInstr::HasInstanceVar { object, .. }
            | DefinedInstr::IsMethodBound { object, .. }
            | DefinedInstr::MethodIsPublic { object, .. }
            | DefinedInstr::SuperMethodBound { object, .. } => object.simplify(map, force),
            DefinedInstr::ClassVarIsDefined { module, .. } => module.simplify(map, force),
            DefinedInstr::RestoreErrorInfo { value } => value.simplify(map, force),
            _ => false,
        }
    }

    /// Flat operand list
    pub fn operands(&self) -> Vec<Operand> {
        let sym = |s: &Symbol| Operand::Literal(Literal::Symbol(*s));
        match self {
            DefinedInstr::GlobalIsDefined { name, .. } => vec![sym(name)],
            DefinedInstr::HasInstanceVar { object, name, .. }
            | DefinedInstr::IsMethodBound { object, name, .. }
            | DefinedInstr::MethodIsPublic { object, name, .. } => {
                vec![object.clone(), sym(name)]
            }
            DefinedInstr::ClassVarIsDefined { module, name, .. } => {
                vec![module.clone(), sym(name)]
            }
            DefinedInstr::SuperMethodBound { object, .. } => vec![object.clone()],
            DefinedInstr::BackrefIsMatchData { .. } | DefinedInstr::GetErrorInfo { .. } => {
                Vec::new()
            }
            DefinedInstr::RestoreErrorInfo { value } => vec![value.clone()],
        }
    }

    pub(crate) fn from_parts(
        op: Operation,
        result: Option<Variable>,
        parts: &mut Parts,
    ) -> Result<Self, EngineError> {
        let need = |result: Option<Variable>| {
            result.ok_or_else(|| {
                EngineError::MalformedIr(format!("{} requires a result variable", op))
            })
        };
        let instr = match op {
            Operation::GlobalIsDefined => DefinedInstr::GlobalIsDefined {
                result: need(result)?,
                name: parts.symbol()?,
            },
            Operation::HasInstanceVar => DefinedInstr::HasInstanceVar {
                result: need(result)?,
                object: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::ClassVarIsDefined => DefinedInstr::ClassVarIsDefined {
                result: need(result)?,
                module: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::IsMethodBound => DefinedInstr::IsMethodBound {
                result: need(result)?,
                object: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::MethodIsPublic => DefinedInstr::MethodIsPublic {
                result: need(result)?,
                object: parts.next()?,
                name: parts.symbol()?,
            },
            Operation::SuperMethodBound => DefinedInstr::SuperMethodBound {
                result: need(result)?,
                object: parts.next()?,
            },
            Operation::BackrefIsMatchData => DefinedInstr::BackrefIsMatchData {
                result: need(result)?,
            },
            Operation::GetErrorInfo => DefinedInstr::GetErrorInfo {
                result: need(result)?,
            },
            Operation::RestoreErrorInfo => DefinedInstr::RestoreErrorInfo {
                value: parts.next()?,
            },
            other => {
                return Err(EngineError::MalformedIr(format!(
                    "{} is not a defined? instruction",
                    other
                )))
            }
        };
        Ok(instr)
    }
}

fn class_var_defined(module: &ModuleRef, name: Symbol) -> bool {
    if module.class_var_defined(name) {
        return true;
    }
    if !module.is_singleton() {
        return false;
    }
    match module.attached() {
        Some(Value::Module(attached)) => attached.class_var_defined(name),
        _ => false,
    }
}

impl ResultInstr for DefinedInstr {
    fn result(&self) -> Option<&Variable> {
        match self {
            DefinedInstr::GlobalIsDefined { result, .. }
            | DefinedInstr::HasInstanceVar { result, .. }
            | DefinedInstr::ClassVarIsDefined { result, .. }
            | DefinedInstr::IsMethodBound { result, .. }
            | DefinedInstr::MethodIsPublic { result, .. }
            | DefinedInstr::SuperMethodBound { result, .. }
            | DefinedInstr::BackrefIsMatchData { result }
            | DefinedInstr::GetErrorInfo { result } => Some(result),
            DefinedInstr::RestoreErrorInfo { .. } => None,
        }
    }

    fn update_result(&mut self, var: Variable) {
        match self {
            DefinedInstr::GlobalIsDefined { result, .. }
            | DefinedInstr::HasInstanceVar { result, .. }
            | DefinedInstr::ClassVarIsDefined { result, .. }
            | DefinedInstr::IsMethodBound { result, .. }
            | DefinedInstr::MethodIsPublic { result, .. }
            | DefinedInstr::SuperMethodBound { result, .. }
            | DefinedInstr::BackrefIsMatchData { result }
            | DefinedInstr::GetErrorInfo { result } => *result = var,
            DefinedInstr::RestoreErrorInfo { .. } => {}
        }
    }
}

impl CloneForInlining for DefinedInstr {
    /// Operands only; the caller renames the result
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        let mut cloned = self.clone();
        match &mut cloned {
            DefinedInstr::HasInstanceVar { object, .. }
            | DefinedInstr::IsMethodBound { object, .. }
            | DefinedInstr::MethodIsPublic { object, .. }
            | DefinedInstr::SuperMethodBound { object, .. } => {
                *object = object.clone_for_inlining(ctx)
            }
            DefinedInstr::ClassVarIsDefined { module, .. } => {
                *module = module.clone_for_inlining(ctx)
            }
            DefinedInstr::RestoreErrorInfo { value } => *value = value.clone_for_inlining(ctx),
            _ => {}
        }
        cloned
    }
}
