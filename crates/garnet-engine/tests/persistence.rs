use garnet_engine::interpreter::execute_script;
use garnet_engine::ir::persist::{read_from_file, write_to_file};
use garnet_engine::ir::{
    propagate_constants, BranchKind, CallType, DefinedInstr, Instr, IrBuilder, IrUnit, Operand, Variable,
};
use garnet_engine::runtime::{Arity, Method, Runtime, Symbol, Value};
use garnet_engine::{PersistError, ThreadContext};
use std::sync::Arc;
use tempfile::tempdir;

fn runtime() -> Arc<Runtime> {
    let rt = Runtime::new();
    rt.core().object.define_method(Method::native("each3", Arity::fixed(0), |ctx, _, _, block| {
        if let Some(block) = block {
            for i in 1..=3 {
                block.call(ctx, &[Value::Fixnum(i)])?;
            }
        }
        Ok(Value::Nil)
    }));
    rt
}

/// total = 0
/// each3 { |i| total += i * 10 }
/// begin; 1 / 0; rescue; total += 1; end
/// [total, defined?($unset)]
fn program() -> IrUnit {
    let mut c = IrBuilder::closure("block", Arity::fixed(1));
    let i = c.temp();
    let total = Variable::local("total", 1, 0);
    c.emit(Instr::ReceiveArg {
        result: i.clone(),
        index: 0,
    });
    let scaled = c.call(CallType::Normal, "*", i.into(), vec![Operand::fixnum(10)], None);
    let sum = c.call(CallType::Normal, "+", total.clone().into(), vec![scaled.into()], None);
    c.copy(&total, sum);
    c.ret(total);
    let closure = c.finish_arc().unwrap();

    let mut b = IrBuilder::script("main");
    let total = b.local("total");
    let rescue = b.label();
    let after = b.label();
    b.copy(&total, Operand::fixnum(0));
    b.call(
        CallType::Functional,
        "each3",
        Operand::SelfRef,
        vec![],
        Some(Operand::Closure(closure)),
    );
    b.emit(Instr::ExceptionRegionStart { rescue });
    b.call(CallType::Normal, "/", Operand::fixnum(1), vec![Operand::fixnum(0)], None);
    b.emit(Instr::ExceptionRegionEnd);
    b.jump(after);
    b.mark(rescue);
    let bumped = b.call(CallType::Normal, "+", total.clone().into(), vec![Operand::fixnum(1)], None);
    b.copy(&total, bumped);
    b.mark(after);
    let defined = b.temp();
    b.emit(Instr::Defined(DefinedInstr::GlobalIsDefined {
        result: defined.clone(),
        name: Symbol::intern("$unset"),
    }));
    b.ret(Operand::Array(vec![total.into(), defined.into()]));
    b.finish().unwrap()
}

fn run(unit: &IrUnit) -> Vec<Value> {
    let mut ctx = ThreadContext::new(runtime());
    let Value::Array(result) = execute_script(&mut ctx, unit).unwrap() else {
        panic!("expected array");
    };
    let values = result.read();
    values.clone()
}

#[test]
fn test_file_round_trip_runs_the_same() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("main.gir");
    let unit = program();

    write_to_file(&unit, &path).unwrap();
    let loaded = read_from_file(&path).unwrap();

    assert_eq!(loaded, unit);
    assert_eq!(run(&unit), vec![Value::Fixnum(61), Value::Bool(false)]);
    assert_eq!(run(&loaded), run(&unit));
}

#[test]
fn test_loaded_unit_has_fresh_profile() {
    // i = 0; i += 1 while i < 4; i
    let mut b = IrBuilder::script("loop");
    let i = b.temp();
    let head = b.label();
    let done = b.label();
    b.copy(&i, Operand::fixnum(0));
    b.mark(head);
    let more = b.call(CallType::Normal, "<", i.clone().into(), vec![Operand::fixnum(4)], None);
    b.branch(BranchKind::False, more, done);
    let next = b.call(CallType::Normal, "+", i.clone().into(), vec![Operand::fixnum(1)], None);
    b.copy(&i, next);
    b.jump(head);
    b.mark(done);
    b.ret(i);
    let unit = b.finish().unwrap();

    let mut ctx = ThreadContext::new(runtime());
    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(4));
    assert_eq!(unit.profile().loops(), 4);

    let dir = tempdir().unwrap();
    let path = dir.path().join("loop.gir");
    write_to_file(&unit, &path).unwrap();
    let loaded = read_from_file(&path).unwrap();
    assert_eq!(loaded.profile().loops(), 0);
    assert_eq!(execute_script(&mut ctx, &loaded).unwrap(), Value::Fixnum(4));
}

#[test]
fn test_optimized_unit_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("opt.gir");
    let optimized = propagate_constants(&program()).unwrap();

    write_to_file(&optimized, &path).unwrap();
    let loaded = read_from_file(&path).unwrap();
    assert_eq!(loaded, optimized);
    assert_eq!(run(&loaded), vec![Value::Fixnum(61), Value::Bool(false)]);
}

#[test]
fn test_corrupted_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.gir");
    write_to_file(&program(), &path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x5a;
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        read_from_file(&path),
        Err(PersistError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = read_from_file(dir.path().join("absent.gir")).unwrap_err();
    assert!(matches!(err, PersistError::Io(_)));
}
