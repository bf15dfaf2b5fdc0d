use garnet_engine::dispatch::AdapterKind;
use garnet_engine::interpreter::{execute_script, Block};
use garnet_engine::ir::{CallType, Instr, IrBuilder, IrUnit, Operand};
use garnet_engine::runtime::{Arity, Method, Runtime, Symbol, Value};
use garnet_engine::{Escape, ThreadContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn adapter_kind(unit: &IrUnit, pc: usize) -> AdapterKind {
    match &unit.instrs()[pc] {
        Instr::Call(call) => call.adapter_kind(),
        other => panic!("no call at {}: {}", pc, other),
    }
}

/// Object with `echo(*args) -> args.last` and `twice { |x| }` defined
fn runtime_with_helpers() -> Arc<Runtime> {
    let rt = Runtime::new();
    let object = &rt.core().object;
    object.define_method(Method::native("echo", Arity::rest(0), |_, _, args, _| {
        Ok(args.last().cloned().unwrap_or(Value::Nil))
    }));
    object.define_method(Method::native("count", Arity::rest(0), |_, _, args, _| {
        Ok(Value::Fixnum(args.len() as i64))
    }));
    object.define_method(Method::native("twice", Arity::fixed(0), |ctx, _, _, block| {
        let Some(block) = block else {
            return Ok(Value::Nil);
        };
        block.call(ctx, &[Value::Fixnum(1)])?;
        block.call(ctx, &[Value::Fixnum(2)])
    }));
    rt
}

// ============================================================================
// Selection
// ============================================================================

#[test]
fn test_selected_adapter_names() {
    let mut b = IrBuilder::script("main");
    let x = b.temp();
    b.copy(&x, Operand::fixnum(1));
    b.call(CallType::Normal, "echo", Operand::SelfRef, vec![], None);
    b.call(CallType::Normal, "echo", Operand::SelfRef, vec![Operand::fixnum(5)], None);
    b.call(
        CallType::Normal,
        "echo",
        Operand::SelfRef,
        vec![Operand::string("a"), Operand::string("b")],
        None,
    );
    b.call(
        CallType::Normal,
        "echo",
        Operand::SelfRef,
        vec![x.clone().into(), x.clone().into(), x.clone().into()],
        None,
    );
    b.call(
        CallType::Normal,
        "echo",
        Operand::SelfRef,
        vec![Operand::Splat(Box::new(x.into()))],
        None,
    );
    b.ret(Operand::nil());
    let unit = b.finish().unwrap();

    assert_eq!(adapter_kind(&unit, 1).name(), "ZeroArgNoBlockCallAdapter");
    assert_eq!(adapter_kind(&unit, 2).name(), "OneFixnumArgNoBlockCallAdapter");
    assert_eq!(adapter_kind(&unit, 3).name(), "TwoArgNoBlockConstantCallAdapter");
    assert_eq!(adapter_kind(&unit, 4).name(), "ThreeArgNoBlockCallAdapter");
    assert_eq!(adapter_kind(&unit, 5).name(), "ManyArgBlockCallAdapter");
}

#[test]
fn test_attr_assign_for_unknown_call_type() {
    let kind = AdapterKind::select(CallType::Unknown, &[Operand::fixnum(1)], false);
    assert_eq!(kind, AdapterKind::AttrAssign);
}

// ============================================================================
// Behavior
// ============================================================================

#[test]
fn test_constant_args_are_memoized() {
    let rt = runtime_with_helpers();
    let mut b = IrBuilder::script("main");
    let r = b.call(
        CallType::Normal,
        "echo",
        Operand::SelfRef,
        vec![Operand::fixnum(1), Operand::string("same")],
        None,
    );
    b.ret(r);
    let unit = b.finish().unwrap();

    let Instr::Call(call) = &unit.instrs()[0] else {
        panic!("expected call");
    };
    assert!(call.adapter().constant_args().is_none());

    let mut ctx = ThreadContext::new(rt);
    let first = execute_script(&mut ctx, &unit).unwrap();
    let second = execute_script(&mut ctx, &unit).unwrap();
    assert!(first.identical(&second));
    let memo = call.adapter().constant_args().unwrap().as_ptr();
    execute_script(&mut ctx, &unit).unwrap();
    assert_eq!(call.adapter().constant_args().unwrap().as_ptr(), memo);
    assert_eq!(call.adapter().constant_args().map(<[Value]>::len), Some(2));
}

#[test]
fn test_splat_spreads_arrays() {
    let rt = runtime_with_helpers();
    let mut b = IrBuilder::script("main");
    let arr = b.temp();
    b.copy(
        &arr,
        Operand::Array(vec![Operand::fixnum(1), Operand::fixnum(2), Operand::fixnum(3)]),
    );
    let r = b.call(
        CallType::Normal,
        "count",
        Operand::SelfRef,
        vec![Operand::fixnum(0), Operand::Splat(Box::new(arr.into()))],
        None,
    );
    b.ret(r);
    let unit = b.finish().unwrap();

    let mut ctx = ThreadContext::new(rt);
    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(4));
}

#[test]
fn test_attr_assign_returns_assigned_value() {
    let rt = Runtime::new();
    let class = rt.define_class("Point", None);
    class.define_method(Method::attr_writer("x"));
    class.define_method(Method::attr_reader("x"));
    let point = Value::Object(garnet_engine::runtime::RObject::new(class));
    rt.globals().set(Symbol::intern("$point"), point);

    let mut b = IrBuilder::script("main");
    let p = b.temp();
    b.emit(Instr::GetGlobal {
        result: p.clone(),
        name: Symbol::intern("$point"),
    });
    let assigned = b.call(CallType::Unknown, "x=", p.clone().into(), vec![Operand::fixnum(9)], None);
    let read = b.call(CallType::Normal, "x", p.into(), vec![], None);
    b.ret(Operand::Array(vec![assigned.into(), read.into()]));
    let unit = b.finish().unwrap();
    assert_eq!(adapter_kind(&unit, 1), AdapterKind::AttrAssign);

    let mut ctx = ThreadContext::new(rt);
    let Value::Array(result) = execute_script(&mut ctx, &unit).unwrap() else {
        panic!("expected array");
    };
    assert_eq!(result.read().clone(), vec![Value::Fixnum(9), Value::Fixnum(9)]);
}

#[test]
fn test_attr_assign_without_writer_raises() {
    let mut b = IrBuilder::script("main");
    let r = b.call(CallType::Unknown, "y=", Operand::nil(), vec![Operand::fixnum(1)], None);
    b.ret(r);
    let mut ctx = ThreadContext::new(Runtime::new());
    let err = execute_script(&mut ctx, &b.finish().unwrap()).unwrap_err();
    let Escape::Raise(raised) = err else {
        panic!("expected raise");
    };
    assert_eq!(raised.message().unwrap(), "undefined method 'y=' for nil");
}

#[test]
fn test_block_literal_break_is_call_value() {
    let rt = runtime_with_helpers();

    // twice { |x| break x * 10 }
    let mut c = IrBuilder::closure("block", Arity::fixed(1));
    let x = c.temp();
    c.emit(Instr::ReceiveArg { result: x.clone(), index: 0 });
    let scaled = c.call(CallType::Normal, "*", x.into(), vec![Operand::fixnum(10)], None);
    c.emit(Instr::Break(scaled.into()));
    let closure = c.finish_arc().unwrap();

    let mut b = IrBuilder::script("main");
    let r = b.call(
        CallType::Functional,
        "twice",
        Operand::SelfRef,
        vec![],
        Some(Operand::Closure(closure)),
    );
    b.ret(r);
    let unit = b.finish().unwrap();

    let mut ctx = ThreadContext::new(rt);
    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(10));
}

#[test]
fn test_block_next_yields_value_to_caller() {
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native("sum_two", Arity::fixed(0), |ctx, _, _, block| {
        let Some(block) = block else {
            return Ok(Value::Nil);
        };
        let a = block.call(ctx, &[Value::Fixnum(1)])?;
        let b = block.call(ctx, &[Value::Fixnum(2)])?;
        match (a, b) {
            (Value::Fixnum(a), Value::Fixnum(b)) => Ok(Value::Fixnum(a + b)),
            _ => Ok(Value::Nil),
        }
    }));

    // sum_two { |x| next x + 100; 0 }
    let mut c = IrBuilder::closure("block", Arity::fixed(1));
    let x = c.temp();
    c.emit(Instr::ReceiveArg { result: x.clone(), index: 0 });
    let bumped = c.call(CallType::Normal, "+", x.into(), vec![Operand::fixnum(100)], None);
    c.emit(Instr::Next(bumped.into()));
    c.ret(Operand::fixnum(0));
    let closure = c.finish_arc().unwrap();

    let mut b = IrBuilder::script("main");
    let r = b.call(
        CallType::Functional,
        "sum_two",
        Operand::SelfRef,
        vec![],
        Some(Operand::Closure(closure)),
    );
    b.ret(r);

    let mut ctx = ThreadContext::new(rt);
    assert_eq!(execute_script(&mut ctx, &b.finish().unwrap()).unwrap(), Value::Fixnum(203));
}

#[test]
fn test_block_is_escaped_after_raise() {
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native("keep_and_fail", Arity::fixed(0), |ctx, _, _, block| {
        let rt = ctx.runtime().clone();
        if let Some(block) = block {
            rt.globals().set(Symbol::intern("$kept"), Value::Proc(block.clone()));
        }
        Err(rt.raise(&rt.core().runtime_error, "failed"))
    }));

    let mut c = IrBuilder::closure("block", Arity::fixed(0));
    c.ret(Operand::nil());
    let closure = c.finish_arc().unwrap();

    let mut b = IrBuilder::script("main");
    let r = b.call(
        CallType::Functional,
        "keep_and_fail",
        Operand::SelfRef,
        vec![],
        Some(Operand::Closure(closure)),
    );
    b.ret(r);

    let rt_handle = rt.clone();
    let mut ctx = ThreadContext::new(rt);
    assert!(execute_script(&mut ctx, &b.finish().unwrap()).is_err());
    let kept = rt_handle.globals().get(Symbol::intern("$kept"));
    assert!(kept.as_block().map(Block::is_escaped).unwrap_or(false));
}

#[test]
fn test_block_passed_through_variable_is_escaped_after_call() {
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native("keep", Arity::fixed(0), |ctx, _, _, block| {
        let rt = ctx.runtime().clone();
        if let Some(block) = block {
            rt.globals().set(Symbol::intern("$live"), Value::Bool(!block.is_escaped()));
            rt.globals().set(Symbol::intern("$kept"), Value::Proc(block.clone()));
        }
        Ok(Value::Nil)
    }));

    let mut c = IrBuilder::closure("block", Arity::fixed(0));
    c.ret(Operand::nil());
    let closure = c.finish_arc().unwrap();

    // blk = proc {}; keep(&blk); blk
    let mut b = IrBuilder::script("main");
    let blk = b.temp();
    b.copy(&blk, Operand::Closure(closure));
    b.call(
        CallType::Functional,
        "keep",
        Operand::SelfRef,
        vec![],
        Some(blk.clone().into()),
    );
    b.ret(blk);

    let rt_handle = rt.clone();
    let mut ctx = ThreadContext::new(rt);
    let returned = execute_script(&mut ctx, &b.finish().unwrap()).unwrap();

    let globals = rt_handle.globals();
    assert_eq!(globals.get(Symbol::intern("$live")), Value::Bool(true));
    let kept = globals.get(Symbol::intern("$kept"));
    let (Some(kept), Some(returned)) = (kept.as_block(), returned.as_block()) else {
        panic!("expected procs");
    };
    assert!(kept.ptr_eq(returned));
    assert!(kept.is_escaped());
}

#[test]
fn test_fixnum_overload_is_used() {
    static FAST: AtomicUsize = AtomicUsize::new(0);
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native_fixnum(
        "bump",
        |_, _, args, _| Ok(args[0].clone()),
        |_, _, n| {
            FAST.fetch_add(1, Ordering::Relaxed);
            Ok(Value::Fixnum(n + 1))
        },
    ));

    let mut b = IrBuilder::script("main");
    let r = b.call(CallType::Normal, "bump", Operand::SelfRef, vec![Operand::fixnum(41)], None);
    b.ret(r);
    let mut ctx = ThreadContext::new(rt);
    assert_eq!(execute_script(&mut ctx, &b.finish().unwrap()).unwrap(), Value::Fixnum(42));
    assert_eq!(FAST.load(Ordering::Relaxed), 1);
}

#[test]
fn test_method_missing_receives_name() {
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native(
        "method_missing",
        Arity::rest(1),
        |_, _, args, _| Ok(args[0].clone()),
    ));

    let mut b = IrBuilder::script("main");
    let r = b.call(CallType::Normal, "ghost", Operand::SelfRef, vec![], None);
    b.ret(r);
    let mut ctx = ThreadContext::new(rt);
    assert_eq!(
        execute_script(&mut ctx, &b.finish().unwrap()).unwrap(),
        Value::symbol("ghost")
    );
}

#[test]
fn test_super_starts_above_defining_class() {
    let rt = Runtime::new();
    let base = rt.define_class("Base", None);
    let derived = rt.define_class("Derived", Some(&base));
    base.define_method(Method::native("greet", Arity::fixed(0), |_, _, _, _| {
        Ok(Value::symbol("base"))
    }));

    // def greet = super; def lonely = super
    for name in ["greet", "lonely"] {
        let mut m = IrBuilder::method(name, Arity::fixed(0));
        let r = m.call(CallType::Super, name, Operand::SelfRef, vec![], None);
        m.ret(r);
        derived.define_method(Method::ir(
            Symbol::intern(name),
            garnet_engine::Visibility::Public,
            m.finish_arc().unwrap(),
        ));
    }

    let obj = Value::Object(garnet_engine::runtime::RObject::new(derived));
    let mut ctx = ThreadContext::new(rt.clone());
    let greeted = garnet_engine::send(&mut ctx, &obj, Symbol::intern("greet"), &[], None);
    assert_eq!(greeted.unwrap(), Value::symbol("base"));

    let Err(Escape::Raise(raised)) = garnet_engine::send(&mut ctx, &obj, Symbol::intern("lonely"), &[], None) else {
        panic!("expected NoMethodError");
    };
    assert_eq!(&*rt.nominal_class_of(raised.exception()).name(), "NoMethodError");
}
