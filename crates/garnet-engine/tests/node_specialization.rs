use garnet_engine::ir::{CallType, Instr, IrBuilder};
use garnet_engine::nodes::{BinaryState, DispatchCache, Node, NodeBody, NodeBuilder, NodeId};
use garnet_engine::runtime::{Arity, BinaryOp, Method, Runtime, Symbol, Value, Visibility};
use garnet_engine::{EngineConfig, SpecializationPolicy, ThreadContext};
use std::sync::Arc;

fn binary_body(op: BinaryOp) -> (NodeBody, NodeId) {
    let mut b = NodeBuilder::new();
    let x = b.read_arg(0);
    let y = b.read_arg(1);
    let node = b.binary(op, x, y);
    (
        b.finish("op", Arity::fixed(2), 0, node, SpecializationPolicy::default()),
        node,
    )
}

fn binary_state(body: &NodeBody, id: NodeId) -> &'static str {
    match &*body.node(id) {
        Node::Binary { state, .. } => state.name(),
        other => panic!("not a binary node: {}", other.kind_name()),
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn exec(ctx: &mut ThreadContext, body: &NodeBody, args: &[Value]) -> Value {
    let main = ctx.runtime().main_object().clone();
    body.execute(ctx, &main, args, None).unwrap()
}

// ============================================================================
// Deoptimization
// ============================================================================

#[test]
fn test_specialized_and_generic_agree() {
    let inputs = [
        (Value::Fixnum(7), Value::Fixnum(2)),
        (Value::Fixnum(-7), Value::Fixnum(2)),
        (Value::Float(1.5), Value::Float(0.25)),
        (Value::Fixnum(3), Value::Float(0.5)),
        (Value::Float(3.0), Value::Fixnum(2)),
    ];
    for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod, BinaryOp::Lt] {
        let mut ctx = ThreadContext::new(Runtime::new());
        for (a, b) in &inputs {
            // A fresh node specializes on these operands
            let (fresh, _) = binary_body(op);
            let specialized = exec(&mut ctx, &fresh, &[a.clone(), b.clone()]);

            // A node already driven to the generic form dispatches instead
            let (generic, id) = binary_body(op);
            exec(&mut ctx, &generic, &[Value::Fixnum(1), Value::Fixnum(1)]);
            exec(&mut ctx, &generic, &[Value::Float(1.0), Value::Fixnum(1)]);
            assert_eq!(binary_state(&generic, id), "generic");
            let dispatched = exec(&mut ctx, &generic, &[a.clone(), b.clone()]);

            assert_eq!(specialized, dispatched, "{} {:?} {:?}", op, a, b);
        }
    }
}

#[test]
fn test_deopt_happens_once() {
    init_logging();
    let (body, id) = binary_body(BinaryOp::Add);
    let mut ctx = ThreadContext::new(Runtime::new());
    exec(&mut ctx, &body, &[Value::Fixnum(1), Value::Fixnum(2)]);
    for _ in 0..5 {
        exec(&mut ctx, &body, &[Value::Float(1.0), Value::Fixnum(2)]);
        exec(&mut ctx, &body, &[Value::Fixnum(1), Value::Fixnum(2)]);
    }
    assert_eq!(binary_state(&body, id), "generic");
    assert_eq!(body.stats().deopts(), 1);
    assert_eq!(body.stats().rewrites(), 2);
}

#[test]
fn test_redefined_operator_invalidates_specialization() {
    init_logging();
    let rt = Runtime::new();
    let (body, id) = binary_body(BinaryOp::Add);
    let mut ctx = ThreadContext::new(rt.clone());

    assert_eq!(exec(&mut ctx, &body, &[Value::Fixnum(1), Value::Fixnum(2)]), Value::Fixnum(3));
    assert_eq!(binary_state(&body, id), "fixnum");

    rt.core().integer.define_method(Method::native("+", Arity::fixed(1), |_, _, _, _| {
        Ok(Value::symbol("patched"))
    }));
    assert!(!rt.numeric_ops().is_valid());

    assert_eq!(
        exec(&mut ctx, &body, &[Value::Fixnum(1), Value::Fixnum(2)]),
        Value::symbol("patched")
    );
    assert_eq!(binary_state(&body, id), "generic");

    // New nodes never specialize once the assumption is gone
    let (fresh, fresh_id) = binary_body(BinaryOp::Add);
    exec(&mut ctx, &fresh, &[Value::Fixnum(1), Value::Fixnum(2)]);
    assert_eq!(binary_state(&fresh, fresh_id), "generic");
}

#[test]
fn test_generic_state_holds_call_site() {
    let (body, id) = binary_body(BinaryOp::Mul);
    let mut ctx = ThreadContext::new(Runtime::new());
    exec(&mut ctx, &body, &[Value::Fixnum(2), Value::Float(2.5)]);
    exec(&mut ctx, &body, &[Value::Fixnum(2), Value::Float(2.5)]);
    match &*body.node(id) {
        Node::Binary {
            state: BinaryState::Generic(site),
            ..
        } => {
            assert_eq!(site.name(), Symbol::intern("*"));
            assert_eq!(site.hits(), 1);
        }
        other => panic!("unexpected {}", other.kind_name()),
    }
}

// ============================================================================
// Dispatch caches
// ============================================================================

#[test]
fn test_private_methods_need_functional_calls() {
    let rt = Runtime::new();
    rt.core().object.define_method(
        Method::native("secret", Arity::fixed(0), |_, _, _, _| Ok(Value::Fixnum(5))).private(),
    );

    let mut b = NodeBuilder::new();
    let call = b.call_self("secret", vec![]);
    let body = b.finish("f", Arity::fixed(0), 0, call, SpecializationPolicy::default());
    let mut ctx = ThreadContext::new(rt.clone());
    assert_eq!(exec(&mut ctx, &body, &[]), Value::Fixnum(5));
    match &*body.node(call) {
        Node::Dispatch { cache, .. } => assert_eq!(cache.arms().len(), 1),
        other => panic!("unexpected {}", other.kind_name()),
    }

    let mut b = NodeBuilder::new();
    let recv = b.self_value();
    let call = b.call(recv, "secret", vec![]);
    let body = b.finish("g", Arity::fixed(0), 0, call, SpecializationPolicy::default());
    let main = rt.main_object().clone();
    assert!(body.execute(&mut ctx, &main, &[], None).is_err());
    assert!(matches!(
        &*body.node(call),
        Node::Dispatch {
            cache: DispatchCache::Uninitialized,
            ..
        }
    ));
}

#[test]
fn test_cache_size_comes_from_config() {
    init_logging();
    let config = EngineConfig {
        inline_cache_size: 1,
        ..EngineConfig::default()
    };
    let rt = Runtime::with_config(config);
    let policy = rt.config().specialization_policy();
    assert_eq!(policy.max_cache_arms, 1);

    let mut b = NodeBuilder::new();
    let recv = b.read_arg(0);
    let call = b.call(recv, "nil?", vec![]);
    let body = b.finish("f", Arity::fixed(1), 0, call, policy);

    let mut ctx = ThreadContext::new(rt);
    exec(&mut ctx, &body, &[Value::Fixnum(1)]);
    exec(&mut ctx, &body, &[Value::symbol("s")]);
    assert!(matches!(
        &*body.node(call),
        Node::Dispatch {
            cache: DispatchCache::Megamorphic,
            ..
        }
    ));
    assert_eq!(exec(&mut ctx, &body, &[Value::Nil]), Value::Bool(true));
}

// ============================================================================
// Tier-up
// ============================================================================

#[test]
fn test_tiered_method_switches_to_nodes() {
    init_logging();
    let config = EngineConfig {
        tier_up_call_threshold: 3,
        ..EngineConfig::default()
    };
    let rt = Runtime::with_config(config);

    let mut ir = IrBuilder::method("double", Arity::fixed(1));
    let x = ir.temp();
    ir.emit(Instr::ReceiveArg {
        result: x.clone(),
        index: 0,
    });
    let r = ir.call(CallType::Normal, "+", x.clone().into(), vec![x.into()], None);
    ir.ret(r);
    let ir = ir.finish_arc().unwrap();

    let mut nb = NodeBuilder::new();
    let a = nb.read_arg(0);
    let b = nb.read_arg(0);
    let sum = nb.binary(BinaryOp::Add, a, b);
    let nodes = Arc::new(nb.finish(
        "double",
        Arity::fixed(1),
        0,
        sum,
        rt.config().specialization_policy(),
    ));

    rt.core().object.define_method(Method::tiered(
        Symbol::intern("double"),
        Visibility::Public,
        ir.clone(),
        nodes.clone(),
    ));

    let mut ctx = ThreadContext::new(rt.clone());
    let main = rt.main_object().clone();
    for n in 1..=3 {
        let r = garnet_engine::send(&mut ctx, &main, Symbol::intern("double"), &[Value::Fixnum(n)], None);
        assert_eq!(r.unwrap(), Value::Fixnum(2 * n));
    }
    assert!(!ir.profile().is_promoted());
    assert_eq!(nodes.stats().rewrites(), 0);

    let r = garnet_engine::send(&mut ctx, &main, Symbol::intern("double"), &[Value::Fixnum(21)], None);
    assert_eq!(r.unwrap(), Value::Fixnum(42));
    assert!(ir.profile().is_promoted());
    assert_eq!(nodes.stats().rewrites(), 1);
    assert_eq!(ir.profile().calls(), 3);
}

#[test]
fn test_node_method_return_leaves_method() {
    let rt = Runtime::new();
    // def first_positive(a, b) = (return a if a > 0; b)
    let mut b = NodeBuilder::new();
    let a = b.read_arg(0);
    let zero = b.fixnum(0);
    let positive = b.binary(BinaryOp::Gt, a, zero);
    let a = b.read_arg(0);
    let ret = b.ret(a);
    let guard = b.if_(positive, ret, None);
    let fallback = b.read_arg(1);
    let root = b.seq(vec![guard, fallback]);
    let body = Arc::new(b.finish("first_positive", Arity::fixed(2), 0, root, SpecializationPolicy::default()));
    rt.core().object.define_method(Method::nodes(
        Symbol::intern("first_positive"),
        Visibility::Public,
        body,
    ));

    let mut ctx = ThreadContext::new(rt.clone());
    let main = rt.main_object().clone();
    let name = Symbol::intern("first_positive");
    let r = garnet_engine::send(&mut ctx, &main, name, &[Value::Fixnum(4), Value::Fixnum(9)], None);
    assert_eq!(r.unwrap(), Value::Fixnum(4));
    let r = garnet_engine::send(&mut ctx, &main, name, &[Value::Fixnum(-4), Value::Fixnum(9)], None);
    assert_eq!(r.unwrap(), Value::Fixnum(9));
}
