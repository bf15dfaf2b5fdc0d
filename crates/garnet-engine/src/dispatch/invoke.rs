//! Invocation trampoline
//!
//! Runs a resolved method: checks arity, pushes a frame for IR and node
//! bodies, claims `return` escapes aimed at that frame and translates host
//! errors at the boundary. Tiered methods run their IR unit until its
//! profile turns hot, then switch to the node body for good.

use crate::interpreter::context::with_stack_growth;
use crate::interpreter::{run_method_body, Block, Frame, ThreadContext};
use crate::runtime::{MethodBody, ResolvedMethod, Symbol, Value};
use crate::signal::{Escape, ExecResult};
use log::debug;

/// Run a resolved method in a new frame
pub fn invoke(
    ctx: &mut ThreadContext,
    resolved: &ResolvedMethod,
    receiver: &Value,
    args: &[Value],
    block: Option<&Block>,
) -> ExecResult {
    let method = &resolved.method;
    if let Err(err) = method.arity.check(args.len()) {
        return Err(ctx.runtime().translate_host(&err));
    }

    match &method.body {
        MethodBody::Native { func, .. } => {
            func(ctx, receiver, args, block).map_err(|e| ctx.runtime().translate_escape(e))
        }
        MethodBody::AttrReader(ivar) => Ok(read_ivar(receiver, *ivar)),
        MethodBody::AttrWriter(ivar) => write_ivar(ctx, receiver, *ivar, &args[0]),
        MethodBody::Ir(unit) => with_frame(ctx, resolved, receiver, block, |ctx| {
            run_method_body(ctx, unit, receiver, args, block)
        }),
        MethodBody::Nodes(body) => with_frame(ctx, resolved, receiver, block, |ctx| {
            body.execute(ctx, receiver, args, block)
        }),
        MethodBody::Tiered { ir, nodes } => {
            let profile = ir.profile();
            let promoted = profile.is_promoted()
                || (profile.is_hot(&ctx.runtime().config().tier_policy()) && {
                    if profile.try_promote() {
                        debug!(
                            "tier-up {}: {} calls, {} loop iterations",
                            method.name,
                            profile.calls(),
                            profile.loops()
                        );
                    }
                    true
                });
            if promoted {
                with_frame(ctx, resolved, receiver, block, |ctx| {
                    nodes.execute(ctx, receiver, args, block)
                })
            } else {
                with_frame(ctx, resolved, receiver, block, |ctx| {
                    run_method_body(ctx, ir, receiver, args, block)
                })
            }
        }
    }
}

fn with_frame<F>(
    ctx: &mut ThreadContext,
    resolved: &ResolvedMethod,
    receiver: &Value,
    block: Option<&Block>,
    body: F,
) -> ExecResult
where
    F: FnOnce(&mut ThreadContext) -> ExecResult,
{
    let frame = Frame::method(
        receiver.clone(),
        resolved.method.name,
        resolved.owner.clone(),
        block.cloned(),
    );
    let id = frame.id;
    if let Err(err) = ctx.push_frame(frame) {
        return Err(ctx.runtime().translate_host(&err));
    }
    let result = with_stack_growth(|| body(ctx));
    ctx.pop_frame();

    match result {
        Err(Escape::Return { target, value }) if target == id => Ok(value),
        Err(Escape::Host(err)) => Err(ctx.runtime().translate_host(&err)),
        other => other,
    }
}

fn read_ivar(receiver: &Value, name: Symbol) -> Value {
    let found = match receiver {
        Value::Object(obj) => obj.ivar_get(name),
        Value::Module(m) => m.ivar_get(name),
        _ => None,
    };
    found.unwrap_or(Value::Nil)
}

fn write_ivar(ctx: &ThreadContext, receiver: &Value, name: Symbol, value: &Value) -> ExecResult {
    match receiver {
        Value::Object(obj) => obj.ivar_set(name, value.clone()),
        Value::Module(m) => m.ivar_set(name, value.clone()),
        other => {
            return Err(ctx.raise(
                &ctx.runtime().core().runtime_error,
                format!("can't modify frozen {}", other.type_name()),
            ))
        }
    }
    Ok(value.clone())
}
