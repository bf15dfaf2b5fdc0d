use garnet_engine::interpreter::execute_script;
use garnet_engine::ir::{BranchKind, CallType, IrBuilder, IrUnit, Operand};
use garnet_engine::nodes::{Node, NodeBody, NodeBuilder, NodeId};
use garnet_engine::runtime::{Arity, BinaryOp, Method, NativeFn, RObject, Runtime, Value};
use garnet_engine::{Block, Escape, ExecResult, SpecializationPolicy, ThreadContext};
use std::sync::Arc;

const THREADS: usize = 4;

fn add_body() -> (Arc<NodeBody>, NodeId) {
    let mut b = NodeBuilder::new();
    let x = b.read_arg(0);
    let y = b.read_arg(1);
    let node = b.binary(BinaryOp::Add, x, y);
    let body = b.finish("add", Arity::fixed(2), 0, node, SpecializationPolicy::default());
    (Arc::new(body), node)
}

/// i = 0; sum = 0; while i < 10; i += 1; sum += i; end; sum
fn counting_script() -> IrUnit {
    let mut b = IrBuilder::script("count");
    let i = b.temp();
    let sum = b.temp();
    let head = b.label();
    let done = b.label();
    b.copy(&i, Operand::fixnum(0));
    b.copy(&sum, Operand::fixnum(0));
    b.mark(head);
    let more = b.call(CallType::Normal, "<", i.clone().into(), vec![Operand::fixnum(10)], None);
    b.branch(BranchKind::False, more, done);
    let next = b.call(CallType::Normal, "+", i.clone().into(), vec![Operand::fixnum(1)], None);
    b.copy(&i, next);
    let acc = b.call(CallType::Normal, "+", sum.clone().into(), vec![i.clone().into()], None);
    b.copy(&sum, acc);
    b.jump(head);
    b.mark(done);
    b.ret(sum);
    b.finish().unwrap()
}

// ============================================================================
// Shared trees
// ============================================================================

#[test]
fn test_racing_specialization_stays_correct() {
    let rt = Runtime::new();
    let (body, id) = add_body();

    crossbeam::scope(|s| {
        for t in 0..THREADS {
            let rt = rt.clone();
            let body = body.clone();
            s.spawn(move |_| {
                let mut ctx = ThreadContext::new(rt);
                let main = ctx.runtime().main_object().clone();
                for n in 0..200i64 {
                    let args = if (n + t as i64) % 3 == 0 {
                        [Value::Float(n as f64), Value::Float(0.5)]
                    } else {
                        [Value::Fixnum(n), Value::Fixnum(1)]
                    };
                    let expected = match &args[0] {
                        Value::Float(f) => Value::Float(f + 0.5),
                        _ => Value::Fixnum(n + 1),
                    };
                    assert_eq!(body.execute(&mut ctx, &main, &args, None).unwrap(), expected);
                }
            });
        }
    })
    .unwrap();

    let mut ctx = ThreadContext::new(rt);
    let main = ctx.runtime().main_object().clone();
    body.execute(&mut ctx, &main, &[Value::Fixnum(1), Value::Fixnum(1)], None)
        .unwrap();
    body.execute(&mut ctx, &main, &[Value::Float(1.0), Value::Float(1.0)], None)
        .unwrap();

    // One winner per version: at most a specialization and a deopt
    assert!(matches!(&*body.node(id), Node::Binary { state, .. } if state.name() == "generic"));
    assert!(body.stats().rewrites() <= 2);
    assert!(body.stats().deopts() <= 1);
}

#[test]
fn test_shared_unit_runs_on_many_threads() {
    let rt = Runtime::new();
    let unit = Arc::new(counting_script());

    crossbeam::scope(|s| {
        for _ in 0..THREADS {
            let rt = rt.clone();
            let unit = unit.clone();
            s.spawn(move |_| {
                let mut ctx = ThreadContext::new(rt);
                for _ in 0..10 {
                    assert_eq!(execute_script(&mut ctx, &unit).unwrap(), Value::Fixnum(55));
                }
            });
        }
    })
    .unwrap();

    assert_eq!(unit.profile().loops() as usize, THREADS * 10 * 10);
}

fn read_one(_: &mut ThreadContext, _: &Value, _: &[Value], _: Option<&Block>) -> ExecResult {
    Ok(Value::Fixnum(1))
}

fn read_two(_: &mut ThreadContext, _: &Value, _: &[Value], _: Option<&Block>) -> ExecResult {
    Ok(Value::Fixnum(2))
}

#[test]
fn test_redefinition_while_dispatching() {
    let rt = Runtime::new();
    let class = rt.define_class("Gauge", None);
    class.define_method(Method::native("read", Arity::fixed(0), read_one));
    let gauge = Value::Object(RObject::new(class.clone()));

    let mut b = NodeBuilder::new();
    let recv = b.read_arg(0);
    let call = b.call(recv, "read", vec![]);
    let body = Arc::new(b.finish("probe", Arity::fixed(1), 0, call, SpecializationPolicy::default()));

    crossbeam::scope(|s| {
        for _ in 0..THREADS {
            let rt = rt.clone();
            let body = body.clone();
            let gauge = gauge.clone();
            s.spawn(move |_| {
                let mut ctx = ThreadContext::new(rt);
                let main = ctx.runtime().main_object().clone();
                for _ in 0..500 {
                    let v = body.execute(&mut ctx, &main, std::slice::from_ref(&gauge), None).unwrap();
                    assert!(matches!(v, Value::Fixnum(1) | Value::Fixnum(2)), "{:?}", v);
                }
            });
        }
        let class = class.clone();
        s.spawn(move |_| {
            for n in 0..50 {
                let func: NativeFn = if n % 2 == 0 { read_two } else { read_one };
                class.define_method(Method::native("read", Arity::fixed(0), func));
            }
            class.define_method(Method::native("read", Arity::fixed(0), read_two));
        });
    })
    .unwrap();

    // No stale arm survives the last definition
    let mut ctx = ThreadContext::new(rt);
    let main = ctx.runtime().main_object().clone();
    let v = body.execute(&mut ctx, &main, std::slice::from_ref(&gauge), None).unwrap();
    assert_eq!(v, Value::Fixnum(2));
}

// ============================================================================
// Interrupts
// ============================================================================

/// while true; end
fn spin_body() -> NodeBody {
    let mut b = NodeBuilder::new();
    let target = b.loop_target();
    let yes = b.literal(Value::Bool(true));
    let nothing = b.nil();
    let lp = b.while_(target, yes, nothing);
    b.finish("spin", Arity::fixed(0), 0, lp, SpecializationPolicy::default())
}

#[test]
fn test_raise_request_stops_spinning_loop() {
    let rt = Runtime::new();
    let body = spin_body();
    let (tx, rx) = crossbeam::channel::bounded(1);

    crossbeam::scope(|s| {
        let worker = s.spawn(|_| {
            let mut ctx = ThreadContext::new(rt.clone());
            tx.send(ctx.interrupt().clone()).unwrap();
            let main = ctx.runtime().main_object().clone();
            body.execute(&mut ctx, &main, &[], None)
        });
        let interrupt = rx.recv().unwrap();
        let exc = rt.make_exception(&rt.core().runtime_error, "stop");
        interrupt.request_raise(exc.clone());

        match worker.join().unwrap() {
            Err(Escape::Raise(raised)) => assert!(raised.exception().identical(&exc)),
            other => panic!("expected raise, got {:?}", other),
        }
        assert_eq!(interrupt.stats.delivered(), 1);
    })
    .unwrap();
}

#[test]
fn test_exit_request_unwinds_interpreter() {
    let rt = Runtime::new();
    // loop { } as IR: a single backward jump polls each time round
    let mut b = IrBuilder::script("spin");
    let head = b.label();
    b.mark(head);
    b.jump(head);
    let unit = b.finish().unwrap();
    let (tx, rx) = crossbeam::channel::bounded(1);

    crossbeam::scope(|s| {
        let worker = s.spawn(|_| {
            let mut ctx = ThreadContext::new(rt.clone());
            tx.send(ctx.interrupt().clone()).unwrap();
            execute_script(&mut ctx, &unit)
        });
        rx.recv().unwrap().request_exit();
        assert!(matches!(worker.join().unwrap(), Err(Escape::ThreadExit)));
    })
    .unwrap();
}
