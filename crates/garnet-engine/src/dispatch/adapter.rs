//! Call adapters
//!
//! An adapter is picked once per call instruction from the call's static
//! shape: argument count, whether a block is attached, whether every
//! argument is a literal, and whether any argument is a splat. Picking is a
//! pure function of that shape and never fails. Every adapter exposes the
//! same `call(ctx, state)` entry point.

use super::call_site::CallSite;
use crate::interpreter::{InterpreterState, ThreadContext};
use crate::ir::{CallType, Operand};
use crate::runtime::Value;
use crate::signal::{Escape, ExecResult};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Adapter shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// No arguments, no block
    ZeroArgNoBlock,
    /// No arguments, with a block
    ZeroArgBlock,
    /// One argument, no block
    OneArgNoBlock,
    /// One argument, with a block
    OneArgBlock,
    /// One literal argument, retrieved once
    OneArgNoBlockConstant,
    /// Literal integer argument passed unboxed
    OneFixnumArgNoBlock,
    /// Two arguments, no block
    TwoArgNoBlock,
    /// Two arguments, with a block
    TwoArgBlock,
    /// Two literal arguments, retrieved once
    TwoArgNoBlockConstant,
    /// Three arguments, no block
    ThreeArgNoBlock,
    /// Three arguments, with a block
    ThreeArgBlock,
    /// Three literal arguments, retrieved once
    ThreeArgNoBlockConstant,
    /// Four arguments, no block
    FourArgNoBlock,
    /// Four arguments, with a block
    FourArgBlock,
    /// Four literal arguments, retrieved once
    FourArgNoBlockConstant,
    /// Any other argument count, no block
    ManyArgNoBlock,
    /// Also the shape for any call with a splatted argument
    ManyArgBlock,
    /// Any other count of literal arguments, retrieved once
    ManyArgNoBlockConstant,
    /// Attribute assignment; call type settled at the call site
    AttrAssign,
}

impl AdapterKind {
    /// Select the adapter for a call shape
    pub fn select(call_type: CallType, args: &[Operand], has_closure: bool) -> AdapterKind {
        use AdapterKind::*;

        if call_type == CallType::Unknown {
            return AttrAssign;
        }
        if args.iter().any(Operand::is_splat) {
            return ManyArgBlock;
        }
        let all_constant = !args.is_empty() && args.iter().all(Operand::is_constant);
        match (args.len(), has_closure) {
            (0, false) => ZeroArgNoBlock,
            (0, true) => ZeroArgBlock,
            (1, false) if args[0].as_fixnum().is_some() => OneFixnumArgNoBlock,
            (1, false) if all_constant => OneArgNoBlockConstant,
            (1, false) => OneArgNoBlock,
            (1, true) => OneArgBlock,
            (2, false) if all_constant => TwoArgNoBlockConstant,
            (2, false) => TwoArgNoBlock,
            (2, true) => TwoArgBlock,
            (3, false) if all_constant => ThreeArgNoBlockConstant,
            (3, false) => ThreeArgNoBlock,
            (3, true) => ThreeArgBlock,
            (4, false) if all_constant => FourArgNoBlockConstant,
            (4, false) => FourArgNoBlock,
            (4, true) => FourArgBlock,
            (_, false) if all_constant => ManyArgNoBlockConstant,
            (_, false) => ManyArgNoBlock,
            (_, true) => ManyArgBlock,
        }
    }

    /// Conventional adapter name, e.g. `TwoArgNoBlockConstantCallAdapter`
    pub fn name(&self) -> String {
        format!("{:?}CallAdapter", self)
    }

    /// Whether the adapter passes a block
    pub fn takes_block(&self) -> bool {
        use AdapterKind::*;
        matches!(
            self,
            ZeroArgBlock | OneArgBlock | TwoArgBlock | ThreeArgBlock | FourArgBlock | ManyArgBlock
        )
    }

    /// Whether arguments are resolved once and reused
    pub fn is_constant(&self) -> bool {
        use AdapterKind::*;
        matches!(
            self,
            OneArgNoBlockConstant
                | TwoArgNoBlockConstant
                | ThreeArgNoBlockConstant
                | FourArgNoBlockConstant
                | ManyArgNoBlockConstant
        )
    }
}

/// Routes one call instruction's operands into its call site
#[derive(Debug, Clone)]
pub struct CallAdapter {
    kind: AdapterKind,
    site: Arc<CallSite>,
    receiver: Operand,
    args: Vec<Operand>,
    closure: Option<Operand>,
    fixnum: i64,
    constants: OnceCell<Vec<Value>>,
}

impl CallAdapter {
    /// Adapter for a call, its shape selected from the operands
    pub fn new(
        site: CallSite,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
    ) -> Self {
        let kind = AdapterKind::select(site.call_type(), &args, closure.is_some());
        let fixnum = match kind {
            AdapterKind::OneFixnumArgNoBlock => args[0].as_fixnum().unwrap_or_default(),
            _ => 0,
        };
        Self {
            kind,
            site: Arc::new(site),
            receiver,
            args,
            closure,
            fixnum,
            constants: OnceCell::new(),
        }
    }

    /// New adapter for changed operands with the same name and call type
    pub fn rebuild(&self, receiver: Operand, args: Vec<Operand>, closure: Option<Operand>) -> Self {
        CallAdapter::new(
            CallSite::new(self.site.name(), self.site.call_type()),
            receiver,
            args,
            closure,
        )
    }

    /// Selected shape
    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    /// Call site the adapter dispatches through
    pub fn site(&self) -> &CallSite {
        &self.site
    }

    /// Receiver operand
    pub fn receiver(&self) -> &Operand {
        &self.receiver
    }

    /// Argument operands
    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    /// Block operand, if any
    pub fn closure(&self) -> Option<&Operand> {
        self.closure.as_ref()
    }

    /// Memoized constant arguments, once the first call has resolved them
    pub fn constant_args(&self) -> Option<&[Value]> {
        self.constants.get().map(Vec::as_slice)
    }

    /// Invoke the call for one activation
    pub fn call(&self, ctx: &mut ThreadContext, state: &InterpreterState<'_>) -> ExecResult {
        use AdapterKind::*;

        let receiver = self.receiver.retrieve(ctx, state)?;
        match self.kind {
            ZeroArgNoBlock => self.site.call(ctx, &receiver, &[], None),
            OneArgNoBlock => {
                let a = self.args[0].retrieve(ctx, state)?;
                self.site.call(ctx, &receiver, &[a], None)
            }
            TwoArgNoBlock => {
                let a = self.args[0].retrieve(ctx, state)?;
                let b = self.args[1].retrieve(ctx, state)?;
                self.site.call(ctx, &receiver, &[a, b], None)
            }
            ThreeArgNoBlock => {
                let a = self.args[0].retrieve(ctx, state)?;
                let b = self.args[1].retrieve(ctx, state)?;
                let c = self.args[2].retrieve(ctx, state)?;
                self.site.call(ctx, &receiver, &[a, b, c], None)
            }
            FourArgNoBlock | ManyArgNoBlock => {
                let args = retrieve_args(&self.args, ctx, state)?;
                self.site.call(ctx, &receiver, &args, None)
            }
            OneFixnumArgNoBlock => self.site.call_fixnum(ctx, &receiver, self.fixnum),
            OneArgNoBlockConstant
            | TwoArgNoBlockConstant
            | ThreeArgNoBlockConstant
            | FourArgNoBlockConstant
            | ManyArgNoBlockConstant => {
                let args = self.constants.get_or_init(|| {
                    self.args
                        .iter()
                        .filter_map(|a| match a {
                            Operand::Literal(lit) => Some(lit.to_value()),
                            _ => None,
                        })
                        .collect()
                });
                self.site.call(ctx, &receiver, args, None)
            }
            ZeroArgBlock | OneArgBlock | TwoArgBlock | ThreeArgBlock | FourArgBlock
            | ManyArgBlock => {
                let args = retrieve_args(&self.args, ctx, state)?;
                self.call_with_block(ctx, state, &receiver, &args)
            }
            AttrAssign => {
                let args = retrieve_args(&self.args, ctx, state)?;
                let call_type = if matches!(self.receiver, Operand::SelfRef) {
                    CallType::Functional
                } else {
                    CallType::Normal
                };
                self.site.call_as(ctx, call_type, &receiver, &args, None)?;
                Ok(args.last().cloned().unwrap_or(Value::Nil))
            }
        }
    }

    /// The block is escaped when the call ends however it ends. A `break`
    /// out of a block literal becomes the call's value; one passed through
    /// from a variable keeps propagating to the call that created it.
    fn call_with_block(
        &self,
        ctx: &mut ThreadContext,
        state: &InterpreterState<'_>,
        receiver: &Value,
        args: &[Value],
    ) -> ExecResult {
        let block = match &self.closure {
            Some(op) => match op.retrieve(ctx, state)? {
                Value::Proc(block) => Some(block),
                Value::Nil => None,
                other => {
                    return Err(ctx.raise(
                        &ctx.runtime().core().type_error,
                        format!("wrong argument type {} (expected Proc)", other.type_name()),
                    ))
                }
            },
            None => None,
        };
        let Some(block) = block else {
            return self.site.call(ctx, receiver, args, None);
        };
        let _guard = block.escape_guard();
        let result = self.site.call(ctx, receiver, args, Some(&block));
        if !matches!(self.closure, Some(Operand::Closure(_))) {
            return result;
        }
        match result {
            Err(Escape::Break { target, value }) if target == block.token() => Ok(value),
            other => other,
        }
    }
}

/// Retrieve argument operands, spreading splats of arrays
pub fn retrieve_args(
    args: &[Operand],
    ctx: &ThreadContext,
    state: &InterpreterState<'_>,
) -> ExecResult<Vec<Value>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Operand::Splat(inner) => match inner.retrieve(ctx, state)? {
                Value::Array(array) => values.extend(array.read().iter().cloned()),
                other => values.push(other),
            },
            _ => values.push(arg.retrieve(ctx, state)?),
        }
    }
    Ok(values)
}
