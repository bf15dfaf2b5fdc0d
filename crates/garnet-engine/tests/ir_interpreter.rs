use garnet_engine::interpreter::execute_script;
use garnet_engine::ir::{
    BranchKind, CallType, Instr, IrBuilder, IrUnit, Label, Operand, UnitKind, Variable,
};
use garnet_engine::runtime::{Arity, Method, Runtime, Symbol, Value, Visibility};
use garnet_engine::{EngineError, Escape, ThreadContext};
use std::sync::Arc;

fn run(unit: &IrUnit) -> Result<Value, Escape> {
    let mut ctx = ThreadContext::new(Runtime::new());
    execute_script(&mut ctx, unit)
}

fn message_of(ctx: &ThreadContext, escape: Escape) -> (String, String) {
    let Escape::Raise(raised) = escape else {
        panic!("expected a raise, got {:?}", escape);
    };
    let class = ctx.runtime().nominal_class_of(raised.exception()).name().to_string();
    (class, raised.message().unwrap_or_default())
}

// ============================================================================
// Straight-line code
// ============================================================================

#[test]
fn test_copy_call_return() {
    let mut b = IrBuilder::script("main");
    let x = b.local("x");
    b.copy(&x, Operand::fixnum(40));
    let sum = b.call(CallType::Normal, "+", x.into(), vec![Operand::fixnum(2)], None);
    b.ret(sum);
    let unit = b.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::Fixnum(42));
}

#[test]
fn test_falling_off_the_end_returns_nil() {
    let mut b = IrBuilder::script("main");
    let t = b.temp();
    b.copy(&t, Operand::fixnum(1));
    let unit = b.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::Nil);
}

#[test]
fn test_unset_temp_is_an_engine_error() {
    let unit = IrUnit::new(
        "main",
        UnitKind::Script,
        Arity::fixed(0),
        0,
        vec![Instr::Return(Operand::temp(3))],
    )
    .unwrap();

    assert!(matches!(
        run(&unit),
        Err(Escape::Fatal(EngineError::UnboundVariable(_)))
    ));
}

// ============================================================================
// Branches and loops
// ============================================================================

#[test]
fn test_counting_loop() {
    // sum = 0; i = 1; while i <= 10; sum += i; i += 1; end; sum
    let mut b = IrBuilder::script("main");
    let sum = b.local("sum");
    let i = b.local("i");
    let top = b.label();
    let done = b.label();
    b.copy(&sum, Operand::fixnum(0));
    b.copy(&i, Operand::fixnum(1));
    b.mark(top);
    let cond = b.call(CallType::Normal, "<=", i.clone().into(), vec![Operand::fixnum(10)], None);
    b.branch(BranchKind::False, cond, done);
    let next_sum = b.call(CallType::Normal, "+", sum.clone().into(), vec![i.clone().into()], None);
    b.copy(&sum, next_sum);
    let next_i = b.call(CallType::Normal, "+", i.clone().into(), vec![Operand::fixnum(1)], None);
    b.copy(&i, next_i);
    b.jump(top);
    b.mark(done);
    b.ret(sum);
    let unit = b.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::Fixnum(55));
    assert_eq!(unit.profile().loops(), 10);
}

#[test]
fn test_branch_on_nil() {
    let mut b = IrBuilder::script("main");
    let is_nil = b.label();
    b.branch(BranchKind::Nil, Operand::nil(), is_nil);
    b.ret(Operand::symbol("not_nil"));
    b.mark(is_nil);
    b.ret(Operand::symbol("nil"));
    let unit = b.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::symbol("nil"));
}

#[test]
fn test_beq_compares_values() {
    let mut b = IrBuilder::script("main");
    let same = b.label();
    b.emit(Instr::BEq {
        left: Operand::string("a"),
        right: Operand::string("a"),
        target: same,
    });
    b.ret(Operand::fixnum(0));
    b.mark(same);
    b.ret(Operand::fixnum(1));
    let unit = b.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::Fixnum(1));
}

// ============================================================================
// Methods and arguments
// ============================================================================

fn define_ir_method(rt: &Arc<Runtime>, name: &str, unit: IrUnit) {
    rt.core().object.define_method(Method::ir(
        Symbol::intern(name),
        Visibility::Public,
        Arc::new(unit),
    ));
}

#[test]
fn test_method_receives_args() {
    let rt = Runtime::new();
    let mut m = IrBuilder::method("sub", Arity::fixed(2));
    let a = m.temp();
    let b_arg = m.temp();
    m.emit(Instr::ReceiveArg { result: a.clone(), index: 0 });
    m.emit(Instr::ReceiveArg { result: b_arg.clone(), index: 1 });
    let diff = m.call(CallType::Normal, "-", a.into(), vec![b_arg.into()], None);
    m.ret(diff);
    define_ir_method(&rt, "sub", m.finish().unwrap());

    let mut s = IrBuilder::script("main");
    let r = s.call(
        CallType::Functional,
        "sub",
        Operand::SelfRef,
        vec![Operand::fixnum(10), Operand::fixnum(3)],
        None,
    );
    s.ret(r);
    let unit = s.finish().unwrap();

    let mut ctx = ThreadContext::new(rt);
    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(7));
}

#[test]
fn test_optional_and_rest_args() {
    let rt = Runtime::new();
    // def opt(a, b = 5, *rest) = [a, b, rest]
    let mut m = IrBuilder::method(
        "opt",
        Arity {
            required: 1,
            optional: 1,
            rest: true,
        },
    );
    let a = m.temp();
    let b_arg = m.temp();
    let rest = m.temp();
    let have_b = m.label();
    m.emit(Instr::ReceiveArg { result: a.clone(), index: 0 });
    m.emit(Instr::ReceiveOptArg {
        result: b_arg.clone(),
        index: 1,
        present: have_b,
    });
    m.copy(&b_arg, Operand::fixnum(5));
    m.mark(have_b);
    m.emit(Instr::ReceiveRestArg { result: rest.clone(), start: 2 });
    m.ret(Operand::Array(vec![a.into(), b_arg.into(), rest.into()]));
    define_ir_method(&rt, "opt", m.finish().unwrap());

    let mut ctx = ThreadContext::new(rt.clone());
    let main = rt.main_object().clone();

    let r = garnet_engine::send(&mut ctx, &main, Symbol::intern("opt"), &[Value::Fixnum(1)], None)
        .unwrap();
    let Value::Array(parts) = r else { panic!("expected array") };
    let parts = parts.read().clone();
    assert_eq!(parts[0], Value::Fixnum(1));
    assert_eq!(parts[1], Value::Fixnum(5));

    let args = [Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3), Value::Fixnum(4)];
    let r = garnet_engine::send(&mut ctx, &main, Symbol::intern("opt"), &args, None).unwrap();
    let Value::Array(parts) = r else { panic!("expected array") };
    let parts = parts.read().clone();
    assert_eq!(parts[1], Value::Fixnum(2));
    let Value::Array(rest) = &parts[2] else { panic!("expected rest array") };
    assert_eq!(rest.read().len(), 2);
}

#[test]
fn test_wrong_arity_raises_argument_error() {
    let rt = Runtime::new();
    let mut m = IrBuilder::method("one", Arity::fixed(1));
    m.ret(Operand::nil());
    define_ir_method(&rt, "one", m.finish().unwrap());

    let mut ctx = ThreadContext::new(rt.clone());
    let main = rt.main_object().clone();
    let err = garnet_engine::send(&mut ctx, &main, Symbol::intern("one"), &[], None).unwrap_err();
    let (class, message) = message_of(&ctx, err);
    assert_eq!(class, "ArgumentError");
    assert!(message.contains("wrong number of arguments"), "{}", message);
}

/// def down(n) = n == 0 ? 0 : down(n - 1)
fn define_countdown(rt: &Arc<Runtime>) {
    let mut m = IrBuilder::method("down", Arity::fixed(1));
    let n = m.temp();
    let recurse = m.label();
    m.emit(Instr::ReceiveArg { result: n.clone(), index: 0 });
    let zero = m.call(CallType::Normal, "==", n.clone().into(), vec![Operand::fixnum(0)], None);
    m.branch(BranchKind::False, zero, recurse);
    m.ret(Operand::fixnum(0));
    m.mark(recurse);
    let less = m.call(CallType::Normal, "-", n.into(), vec![Operand::fixnum(1)], None);
    let r = m.call(CallType::Functional, "down", Operand::SelfRef, vec![less.into()], None);
    m.ret(r);
    define_ir_method(rt, "down", m.finish().unwrap());
}

fn countdown(depth: i64) -> (String, Result<Value, Escape>) {
    let rt = Runtime::new();
    define_countdown(&rt);
    let mut s = IrBuilder::script("main");
    let r = s.call(CallType::Functional, "down", Operand::SelfRef, vec![Operand::fixnum(depth)], None);
    s.ret(r);
    let unit = s.finish().unwrap();

    let mut ctx = ThreadContext::new(rt);
    let result = execute_script(&mut ctx, &unit);
    let class = match &result {
        Err(Escape::Raise(raised)) => ctx.runtime().nominal_class_of(raised.exception()).name().to_string(),
        _ => String::new(),
    };
    (class, result)
}

/// Runs on a deliberately small native stack
fn on_small_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(512 * 1024)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn test_deep_recursion_below_limit_completes() {
    let (_, result) = on_small_stack(|| countdown(9_000));
    assert_eq!(result.unwrap(), Value::Fixnum(0));
}

#[test]
fn test_recursion_past_default_limit_raises_system_stack_error() {
    let (class, result) = on_small_stack(|| countdown(20_000));
    assert!(result.is_err());
    assert_eq!(class, "SystemStackError");
}

#[test]
fn test_define_method_at_top_level_is_private() {
    let body = {
        let mut m = IrBuilder::method("helper", Arity::fixed(0));
        m.ret(Operand::fixnum(1));
        Arc::new(m.finish().unwrap())
    };
    let mut s = IrBuilder::script("main");
    s.emit(Instr::DefineMethod {
        name: Symbol::intern("helper"),
        body,
    });
    let r = s.call(CallType::Functional, "helper", Operand::SelfRef, vec![], None);
    s.ret(r);
    let unit = s.finish().unwrap();

    let rt = Runtime::new();
    let mut ctx = ThreadContext::new(rt.clone());
    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(1));
    let helper = rt
        .core()
        .object
        .local_method(Symbol::intern("helper"))
        .unwrap();
    assert_eq!(helper.visibility, Visibility::Private);

    // An explicit receiver cannot reach it
    let mut s = IrBuilder::script("again");
    let r = s.call(CallType::Normal, "helper", Operand::SelfRef, vec![], None);
    s.ret(r);
    let err = execute_script(&mut ctx, &s.finish().unwrap()).unwrap_err();
    let (class, message) = message_of(&ctx, err);
    assert_eq!(class, "NoMethodError");
    assert!(message.starts_with("private method 'helper'"), "{}", message);
}

#[test]
fn test_undefined_variable_or_method_is_name_error() {
    let mut s = IrBuilder::script("main");
    let r = s.call(CallType::Variable, "nope", Operand::SelfRef, vec![], None);
    s.ret(r);
    let unit = s.finish().unwrap();

    let mut ctx = ThreadContext::new(Runtime::new());
    let err = execute_script(&mut ctx, &unit).unwrap_err();
    let (class, message) = message_of(&ctx, err);
    assert_eq!(class, "NameError");
    assert_eq!(message, "undefined local variable or method 'nope' for main:Object");
}

// ============================================================================
// Exceptions
// ============================================================================

#[test]
fn test_exception_region_rescues() {
    let mut s = IrBuilder::script("main");
    let rescue = s.label();
    let done = s.label();
    let caught = s.temp();
    s.emit(Instr::ExceptionRegionStart { rescue });
    s.call(
        CallType::Functional,
        "raise",
        Operand::SelfRef,
        vec![Operand::string("boom")],
        None,
    );
    s.emit(Instr::ExceptionRegionEnd);
    s.jump(done);
    s.mark(rescue);
    s.emit(Instr::ReceiveException(caught.clone()));
    let msg = s.call(CallType::Normal, "message", caught.into(), vec![], None);
    s.ret(msg);
    s.mark(done);
    s.ret(Operand::nil());
    let unit = s.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::string("boom"));
}

#[test]
fn test_host_error_is_rescuable() {
    let mut s = IrBuilder::script("main");
    let rescue = s.label();
    let caught = s.temp();
    s.emit(Instr::ExceptionRegionStart { rescue });
    let q = s.call(CallType::Normal, "/", Operand::fixnum(1), vec![Operand::fixnum(0)], None);
    s.emit(Instr::ExceptionRegionEnd);
    s.ret(q);
    s.mark(rescue);
    s.emit(Instr::ReceiveException(caught.clone()));
    s.ret(caught);
    let unit = s.finish().unwrap();

    let rt = Runtime::new();
    let mut ctx = ThreadContext::new(rt.clone());
    let exc = execute_script(&mut ctx, &unit).unwrap();
    assert!(rt.kind_of(&exc, &rt.core().zero_division_error));
}

#[test]
fn test_unbalanced_region_rejected() {
    let result = IrUnit::new(
        "main",
        UnitKind::Script,
        Arity::fixed(0),
        0,
        vec![Instr::ExceptionRegionEnd],
    );
    assert!(result.is_err());
}

// ============================================================================
// Globals, fields and constants
// ============================================================================

#[test]
fn test_globals_and_fields() {
    let mut s = IrBuilder::script("main");
    let g = s.temp();
    let f = s.temp();
    s.emit(Instr::PutGlobal {
        name: Symbol::intern("$count"),
        value: Operand::fixnum(3),
    });
    s.emit(Instr::GetGlobal {
        result: g.clone(),
        name: Symbol::intern("$count"),
    });
    s.emit(Instr::PutField {
        object: Operand::SelfRef,
        name: Symbol::intern("@n"),
        value: g.into(),
    });
    s.emit(Instr::GetField {
        result: f.clone(),
        object: Operand::SelfRef,
        name: Symbol::intern("@n"),
    });
    s.ret(f);
    let unit = s.finish().unwrap();

    assert_eq!(run(&unit).unwrap(), Value::Fixnum(3));
}

#[test]
fn test_search_const_and_missing_constant() {
    let rt = Runtime::new();
    rt.core()
        .object
        .const_set(Symbol::intern("ANSWER"), Value::Fixnum(42));

    let mut s = IrBuilder::script("main");
    let c = s.temp();
    s.emit(Instr::SearchConst {
        result: c.clone(),
        name: Symbol::intern("ANSWER"),
    });
    s.ret(c);
    let mut ctx = ThreadContext::new(rt.clone());
    assert_eq!(execute_script(&mut ctx, &s.finish().unwrap()).unwrap(), Value::Fixnum(42));

    let mut s = IrBuilder::script("main");
    let c = s.temp();
    s.emit(Instr::SearchConst {
        result: c.clone(),
        name: Symbol::intern("Missing"),
    });
    s.ret(c);
    let err = execute_script(&mut ctx, &s.finish().unwrap()).unwrap_err();
    let (class, message) = message_of(&ctx, err);
    assert_eq!(class, "NameError");
    assert!(message.contains("Missing"), "{}", message);
}

#[test]
fn test_variable_display() {
    assert_eq!(Variable::Temp(4).to_string(), "%t4");
    assert_eq!(Variable::local("x", 1, 0).to_string(), "x^1");
    assert_eq!(Label(2).to_string(), "L2");
}
