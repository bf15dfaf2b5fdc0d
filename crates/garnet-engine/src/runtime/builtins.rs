//! Native core library
//!
//! Only what the engine and its tests need: integer and float operators
//! (with unboxed-integer overloads), identity and class predicates, object
//! construction, exceptions, `raise`, `throw`/`catch` and procs.

use super::method::{Arity, Method};
use super::numeric::BinaryOp;
use super::object::RObject;
use super::runtime::Runtime;
use super::symbol::Symbol;
use super::value::Value;
use crate::dispatch;
use crate::error::HostError;
use crate::interpreter::{Block, ThreadContext};
use crate::signal::{Escape, ExecResult, RaiseException};

/// Install every core method into the runtime's classes
pub(crate) fn install(rt: &Runtime) {
    install_numeric(rt);
    install_object(rt);
    install_kernel(rt);
    install_class(rt);
    install_exception(rt);
    install_proc(rt);
}

// ============================================================================
// Numeric
// ============================================================================

macro_rules! numeric_method {
    ($op:expr, $generic:ident, $fixnum:ident) => {{
        fn $generic(
            ctx: &mut ThreadContext,
            recv: &Value,
            args: &[Value],
            _block: Option<&Block>,
        ) -> ExecResult {
            binary_generic(ctx, $op, recv, &args[0])
        }

        fn $fixnum(ctx: &mut ThreadContext, recv: &Value, arg: i64) -> ExecResult {
            match recv {
                Value::Fixnum(a) => Ok($op.fixnum(*a, arg)?),
                other => binary_generic(ctx, $op, other, &Value::Fixnum(arg)),
            }
        }

        Method::native_fixnum($op.selector(), $generic, $fixnum)
    }};
}

fn binary_generic(ctx: &mut ThreadContext, op: BinaryOp, recv: &Value, arg: &Value) -> ExecResult {
    match op.numeric(recv, arg) {
        Some(result) => Ok(result?),
        None if op == BinaryOp::Eq => Ok(Value::Bool(false)),
        None => {
            let expected = ctx.runtime().nominal_class_of(recv).name().to_string();
            Err(HostError::TypeMismatch {
                expected,
                found: arg.type_name().to_string(),
            }
            .into())
        }
    }
}

fn install_numeric(rt: &Runtime) {
    for class in [&rt.core().integer, &rt.core().float] {
        class.define_method(numeric_method!(BinaryOp::Add, add, add_fixnum));
        class.define_method(numeric_method!(BinaryOp::Sub, sub, sub_fixnum));
        class.define_method(numeric_method!(BinaryOp::Mul, mul, mul_fixnum));
        class.define_method(numeric_method!(BinaryOp::Div, div, div_fixnum));
        class.define_method(numeric_method!(BinaryOp::Mod, modulo, mod_fixnum));
        class.define_method(numeric_method!(BinaryOp::Lt, lt, lt_fixnum));
        class.define_method(numeric_method!(BinaryOp::Le, le, le_fixnum));
        class.define_method(numeric_method!(BinaryOp::Gt, gt, gt_fixnum));
        class.define_method(numeric_method!(BinaryOp::Ge, ge, ge_fixnum));
        class.define_method(numeric_method!(BinaryOp::Eq, eq, eq_fixnum));
    }
}

// ============================================================================
// Object / Kernel
// ============================================================================

fn install_object(rt: &Runtime) {
    let object = &rt.core().object;
    object.define_method(Method::native("==", Arity::fixed(1), |_, recv, args, _| {
        Ok(Value::Bool(recv.identical(&args[0])))
    }));
    object.define_method(Method::native("equal?", Arity::fixed(1), |_, recv, args, _| {
        Ok(Value::Bool(recv.identical(&args[0])))
    }));
    object.define_method(Method::native("!", Arity::fixed(0), |_, recv, _, _| {
        Ok(Value::Bool(!recv.is_truthy()))
    }));
    object.define_method(Method::native("nil?", Arity::fixed(0), |_, recv, _, _| {
        Ok(Value::Bool(recv.is_nil()))
    }));
    object.define_method(Method::native("class", Arity::fixed(0), |ctx, recv, _, _| {
        Ok(Value::Module(ctx.runtime().nominal_class_of(recv)))
    }));
    for name in ["kind_of?", "is_a?"] {
        object.define_method(Method::native(name, Arity::fixed(1), kind_of));
    }
    object.define_method(Method::native(
        "respond_to?",
        Arity::fixed(1),
        |ctx, recv, args, _| {
            let Value::Symbol(name) = &args[0] else {
                return Ok(Value::Bool(false));
            };
            let found = ctx
                .runtime()
                .class_of(recv)
                .resolve_method(*name)
                .map(|m| m.visibility() == super::Visibility::Public)
                .unwrap_or(false);
            Ok(Value::Bool(found))
        },
    ));
    object.define_method(
        Method::native("initialize", Arity::rest(0), |_, _, _, _| Ok(Value::Nil)).private(),
    );
    object.define_method(Method::native(
        "instance_variable_get",
        Arity::fixed(1),
        |_, recv, args, _| {
            let name = ivar_name(&args[0])?;
            Ok(match recv {
                Value::Object(obj) => obj.ivar_get(name).unwrap_or(Value::Nil),
                Value::Module(m) => m.ivar_get(name).unwrap_or(Value::Nil),
                _ => Value::Nil,
            })
        },
    ));
    object.define_method(Method::native(
        "instance_variable_set",
        Arity::fixed(2),
        |_, recv, args, _| {
            let name = ivar_name(&args[0])?;
            match recv {
                Value::Object(obj) => obj.ivar_set(name, args[1].clone()),
                Value::Module(m) => m.ivar_set(name, args[1].clone()),
                other => {
                    return Err(HostError::TypeMismatch {
                        expected: "Object".to_string(),
                        found: other.type_name().to_string(),
                    }
                    .into())
                }
            }
            Ok(args[1].clone())
        },
    ));

    rt.core()
        .nil_class
        .define_method(Method::native("nil?", Arity::fixed(0), |_, _, _, _| {
            Ok(Value::Bool(true))
        }));
    rt.core()
        .module
        .define_method(Method::native("===", Arity::fixed(1), |ctx, recv, args, _| {
            Ok(Value::Bool(match recv {
                Value::Module(m) => ctx.runtime().kind_of(&args[0], m),
                _ => false,
            }))
        }));
    rt.core()
        .module
        .define_method(Method::native("name", Arity::fixed(0), |_, recv, _, _| {
            Ok(match recv {
                Value::Module(m) => Value::Str(m.name()),
                _ => Value::Nil,
            })
        }));
}

fn kind_of(ctx: &mut ThreadContext, recv: &Value, args: &[Value], _: Option<&Block>) -> ExecResult {
    match &args[0] {
        Value::Module(m) => Ok(Value::Bool(ctx.runtime().kind_of(recv, m))),
        other => Err(HostError::TypeMismatch {
            expected: "Module".to_string(),
            found: other.type_name().to_string(),
        }
        .into()),
    }
}

fn ivar_name(arg: &Value) -> Result<Symbol, Escape> {
    match arg {
        Value::Symbol(s) => Ok(*s),
        Value::Str(s) => Ok(Symbol::intern(s)),
        other => Err(HostError::TypeMismatch {
            expected: "Symbol".to_string(),
            found: other.type_name().to_string(),
        }
        .into()),
    }
}

fn install_kernel(rt: &Runtime) {
    let kernel = &rt.core().kernel;
    kernel.define_method(Method::native("raise", Arity::optional(0, 2), kernel_raise).private());
    kernel.define_method(
        Method::native("throw", Arity::optional(1, 1), |_, _, args, _| {
            Err(Escape::Throw {
                tag: args[0].clone(),
                value: args.get(1).cloned().unwrap_or(Value::Nil),
            })
        })
        .private(),
    );
    kernel.define_method(Method::native("catch", Arity::optional(0, 1), kernel_catch).private());
    kernel.define_method(
        Method::native("proc", Arity::fixed(0), |ctx, _, _, block| match block {
            Some(block) => Ok(Value::Proc(block.clone())),
            None => Err(ctx.runtime().raise(
                &ctx.runtime().core().argument_error,
                "tried to create Proc object without a block",
            )),
        })
        .private(),
    );
}

fn kernel_raise(ctx: &mut ThreadContext, _: &Value, args: &[Value], _: Option<&Block>) -> ExecResult {
    let rt = ctx.runtime().clone();
    let core = rt.core();
    let exception = match args {
        [] => match ctx.error_info() {
            Value::Nil => rt.make_exception(&core.runtime_error, "unhandled exception"),
            current => current,
        },
        [Value::Str(msg)] => rt.make_exception(&core.runtime_error, msg),
        [Value::Module(class), rest @ ..] if class.inherits_from(&core.exception) => {
            let exception = RObject::new(class.clone());
            if let Some(msg) = rest.first() {
                exception.ivar_set(Symbol::intern("@message"), msg.clone());
            }
            Value::Object(exception)
        }
        [obj @ Value::Object(_), ..] if rt.kind_of(obj, &core.exception) => obj.clone(),
        _ => return Err(rt.raise(&core.type_error, "exception class/object expected")),
    };
    Err(Escape::Raise(RaiseException::new(exception)))
}

fn kernel_catch(ctx: &mut ThreadContext, _: &Value, args: &[Value], block: Option<&Block>) -> ExecResult {
    let Some(block) = block else {
        let rt = ctx.runtime().clone();
        return Err(rt.raise(&rt.core().local_jump_error, "no block given"));
    };
    let tag = match args.first() {
        Some(tag) => tag.clone(),
        None => Value::Object(RObject::new(ctx.runtime().core().object.clone())),
    };
    match block.call(ctx, std::slice::from_ref(&tag)) {
        Err(Escape::Throw { tag: thrown, value }) if thrown.identical(&tag) => Ok(value),
        other => other,
    }
}

// ============================================================================
// Class
// ============================================================================

fn install_class(rt: &Runtime) {
    let class = &rt.core().class;
    class.define_method(Method::native("allocate", Arity::fixed(0), |ctx, recv, _, _| {
        allocate(ctx, recv)
    }));
    class.define_method(Method::native("new", Arity::rest(0), |ctx, recv, args, block| {
        let instance = allocate(ctx, recv)?;
        dispatch::send(ctx, &instance, Symbol::intern("initialize"), args, block)?;
        Ok(instance)
    }));
    class.define_method(Method::native("superclass", Arity::fixed(0), |_, recv, _, _| {
        Ok(match recv {
            Value::Module(m) => m.superclass().map(Value::Module).unwrap_or(Value::Nil),
            _ => Value::Nil,
        })
    }));
}

fn allocate(ctx: &mut ThreadContext, recv: &Value) -> ExecResult {
    match recv {
        Value::Module(class) if class.is_class() && !class.is_singleton() => {
            Ok(Value::Object(RObject::new(class.clone())))
        }
        other => {
            let rt = ctx.runtime().clone();
            Err(rt.raise(
                &rt.core().type_error,
                format!("can't instantiate {:?}", other),
            ))
        }
    }
}

// ============================================================================
// Exception
// ============================================================================

fn install_exception(rt: &Runtime) {
    let exception = &rt.core().exception;
    exception.define_method(
        Method::native("initialize", Arity::optional(0, 1), |_, recv, args, _| {
            if let (Value::Object(obj), Some(msg)) = (recv, args.first()) {
                obj.ivar_set(Symbol::intern("@message"), msg.clone());
            }
            Ok(Value::Nil)
        })
        .private(),
    );
    exception.define_method(Method::native("message", Arity::fixed(0), |ctx, recv, _, _| {
        let message = match recv {
            Value::Object(obj) => obj.ivar_get(Symbol::intern("@message")),
            _ => None,
        };
        Ok(message.unwrap_or_else(|| Value::Str(ctx.runtime().nominal_class_of(recv).name())))
    }));
}

// ============================================================================
// Proc
// ============================================================================

fn install_proc(rt: &Runtime) {
    rt.core()
        .proc_class
        .define_method(Method::native("call", Arity::rest(0), |ctx, recv, args, _| {
            match recv {
                Value::Proc(block) => block.call(ctx, args),
                other => Err(HostError::TypeMismatch {
                    expected: "Proc".to_string(),
                    found: other.type_name().to_string(),
                }
                .into()),
            }
        }));
}
