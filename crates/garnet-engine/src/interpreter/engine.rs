//! IR interpreter loop
//!
//! Walks a unit's instruction vector by program counter. Each instruction
//! reports how control continues: fall through, jump to a label, or return.
//! A `Raise` escaping an instruction that sits inside an exception region
//! is caught here: `$!` is set and execution resumes at the region's rescue
//! program counter. Every other escape leaves the loop unchanged.
//!
//! Backward jumps poll the thread's interrupt flag and feed the unit's loop
//! counter.

use super::block::Block;
use super::context::ThreadContext;
use super::scope::DynamicScope;
use super::state::InterpreterState;
use crate::ir::{InstrOutcome, IrUnit};
use crate::runtime::Value;
use crate::signal::{Escape, ExecResult};
use log::trace;

/// Run a script unit in the current (top-level) frame
///
/// Escapes nobody claimed are promoted to language exceptions here:
/// `break`/`next`/`redo` become `LocalJumpError`, an uncaught `throw`
/// becomes `UncaughtThrowError`, and host errors are translated.
pub fn execute_script(ctx: &mut ThreadContext, unit: &IrUnit) -> ExecResult {
    let scope = DynamicScope::root(unit.local_count() as usize);
    let self_value = ctx.self_value().clone();
    let block = ctx.frame().block.clone();
    let mut state = InterpreterState::new(unit, self_value, scope, &[], block);
    let result = interpret(ctx, unit, &mut state);
    promote_unhandled(ctx, result)
}

/// Run a method body. The caller has already pushed the method's frame.
pub fn run_method_body(
    ctx: &mut ThreadContext,
    unit: &IrUnit,
    self_value: &Value,
    args: &[Value],
    block: Option<&Block>,
) -> ExecResult {
    unit.profile().record_call();
    let scope = DynamicScope::root(unit.local_count() as usize);
    let mut state = InterpreterState::new(unit, self_value.clone(), scope, args, block.cloned());
    interpret(ctx, unit, &mut state)
}

/// Run a closure body inside the block's frame
pub(crate) fn run_block_body(
    ctx: &mut ThreadContext,
    unit: &IrUnit,
    block: &Block,
    args: &[Value],
) -> ExecResult {
    let scope = DynamicScope::new(unit.local_count() as usize, Some(block.scope().clone()));
    let outer = ctx.frame().block.clone();
    let mut state = InterpreterState::new(unit, block.self_value().clone(), scope, args, outer);
    interpret(ctx, unit, &mut state)
}

/// The dispatch loop
pub fn interpret(
    ctx: &mut ThreadContext,
    unit: &IrUnit,
    state: &mut InterpreterState<'_>,
) -> ExecResult {
    let instrs = unit.instrs();
    let tracing = ctx.runtime().config().trace_instructions;
    let mut pc = 0usize;

    while pc < instrs.len() {
        let instr = &instrs[pc];
        if tracing {
            trace!("{} {:>4}: {}", unit.name(), pc, instr);
        }

        let step = instr.interpret(ctx, state).and_then(|outcome| match outcome {
            InstrOutcome::Continue => Ok(Step::Goto(pc + 1)),
            InstrOutcome::Return(value) => Ok(Step::Return(value)),
            InstrOutcome::Jump(label) => {
                let target = unit.label_pc(label)?;
                if target <= pc {
                    unit.profile().record_loop();
                    ctx.poll()?;
                }
                Ok(Step::Goto(target))
            }
        });

        match step {
            Ok(Step::Goto(next)) => pc = next,
            Ok(Step::Return(value)) => return Ok(value),
            Err(escape) => pc = handle_escape(ctx, unit, pc, escape)?,
        }
    }

    Ok(Value::Nil)
}

enum Step {
    Goto(usize),
    Return(Value),
}

/// Resume at the rescue pc for a raise inside an exception region, or
/// propagate. Host errors are translated first so rescue code sees them.
fn handle_escape(
    ctx: &mut ThreadContext,
    unit: &IrUnit,
    pc: usize,
    escape: Escape,
) -> Result<usize, Escape> {
    let Some(rescue_pc) = unit.rescue_pc(pc) else {
        return Err(escape);
    };
    match ctx.runtime().translate_escape(escape) {
        Escape::Raise(exception) => {
            trace!(
                "{}: rescuing {} at {} -> {}",
                unit.name(),
                exception,
                pc,
                rescue_pc
            );
            ctx.set_error_info(exception.into_exception());
            Ok(rescue_pc)
        }
        other => Err(other),
    }
}

/// Turn escapes that reached the top level into language exceptions
pub fn promote_unhandled(ctx: &ThreadContext, result: ExecResult) -> ExecResult {
    let rt = ctx.runtime();
    let core = rt.core();
    match result {
        Err(Escape::Break { .. }) => Err(rt.raise(&core.local_jump_error, "break from proc-closure")),
        Err(Escape::Next { .. }) => Err(rt.raise(&core.local_jump_error, "unexpected next")),
        Err(Escape::Redo { .. }) => Err(rt.raise(&core.local_jump_error, "unexpected redo")),
        Err(Escape::Return { target, value }) if target == ctx.frame().id => Ok(value),
        Err(Escape::Return { .. }) => Err(rt.raise(&core.local_jump_error, "unexpected return")),
        Err(Escape::Throw { tag, .. }) => Err(rt.raise(
            &core.uncaught_throw_error,
            format!("uncaught throw {:?}", tag),
        )),
        Err(Escape::Host(err)) => Err(rt.translate_host(&err)),
        other => other,
    }
}
