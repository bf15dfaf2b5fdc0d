//! Node execution and self-specialization
//!
//! `NodeBody::execute` walks the tree from the root. Nodes with
//! specialization state rewrite their own arena slot the first time they
//! run and again whenever a guard fails:
//!
//! - `Binary`: `Uninitialized -> Fixnum | Float | Generic`, and any
//!   specialized state falls back to `Generic` when an operand has another
//!   type or the runtime's numeric-operator assumption is invalidated. The
//!   values already computed for the operands are reused, so a deopt never
//!   evaluates a child twice.
//! - `Dispatch`: `Uninitialized -> Polymorphic(arms) -> Megamorphic` once
//!   more receiver classes show up than the policy allows.
//!
//! Every rewrite is spent from the slot's budget. A node whose budget is
//! gone settles on its generic form. Rewrites are version-checked in the
//! arena, so racing threads never see half-built nodes; the loser simply
//! finishes its own execution with the semantics it already chose.

use super::arena::{NodeArena, NodeId};
use super::node::{BinaryState, CacheArm, DispatchCache, LoopKind, Node};
use crate::config::SpecializationPolicy;
use crate::dispatch::{invoke, CallSite};
use crate::interpreter::{Block, ThreadContext};
use crate::ir::CallType;
use crate::runtime::{Arity, BinaryOp, Symbol, Value, Visibility};
use crate::signal::{Escape, EscapeTarget, ExecResult, RaiseException};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Rewrite counters for one node body
#[derive(Debug, Default)]
pub struct SpecializationStats {
    rewrites: AtomicU64,
    deopts: AtomicU64,
    megamorphic: AtomicU64,
}

impl SpecializationStats {
    /// Node replacements installed
    pub fn rewrites(&self) -> u64 {
        self.rewrites.load(Ordering::Relaxed)
    }

    /// Specialized nodes sent back to their generic form
    pub fn deopts(&self) -> u64 {
        self.deopts.load(Ordering::Relaxed)
    }

    /// Dispatch nodes that gave up caching
    pub fn megamorphic(&self) -> u64 {
        self.megamorphic.load(Ordering::Relaxed)
    }
}

/// Registers of one node-body activation
struct NodeFrame<'a> {
    id: EscapeTarget,
    self_value: Value,
    args: &'a [Value],
    locals: Vec<Value>,
    block: Option<Block>,
}

/// An executable node tree
pub struct NodeBody {
    name: Arc<str>,
    arity: Arity,
    local_count: u32,
    arena: NodeArena,
    root: NodeId,
    policy: SpecializationPolicy,
    stats: SpecializationStats,
}

impl NodeBody {
    pub(crate) fn new(
        name: &str,
        arity: Arity,
        local_count: u32,
        arena: NodeArena,
        root: NodeId,
        policy: SpecializationPolicy,
    ) -> Self {
        Self {
            name: Arc::from(name),
            arity,
            local_count,
            arena,
            root,
            policy,
            stats: SpecializationStats::default(),
        }
    }

    /// Body name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted argument counts
    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Node executed on entry
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Rewrite counters
    pub fn stats(&self) -> &SpecializationStats {
        &self.stats
    }

    /// Current node in a slot
    pub fn node(&self, id: NodeId) -> Arc<Node> {
        self.arena.get(id)
    }

    /// Run the body in the current frame of `ctx`
    pub fn execute(
        &self,
        ctx: &mut ThreadContext,
        self_value: &Value,
        args: &[Value],
        block: Option<&Block>,
    ) -> ExecResult {
        let mut frame = NodeFrame {
            id: ctx.frame().id,
            self_value: self_value.clone(),
            args,
            locals: vec![Value::Nil; self.local_count as usize],
            block: block.cloned(),
        };
        match self.exec(ctx, &mut frame, self.root) {
            Err(Escape::Return { target, value }) if target == frame.id => Ok(value),
            other => other,
        }
    }

    fn exec(&self, ctx: &mut ThreadContext, frame: &mut NodeFrame<'_>, id: NodeId) -> ExecResult {
        let (node, version) = self.arena.load(id);
        match &*node {
            Node::Literal(v) => Ok(v.clone()),
            Node::SelfValue => Ok(frame.self_value.clone()),
            Node::ReadLocal(slot) => Ok(frame
                .locals
                .get(*slot as usize)
                .cloned()
                .unwrap_or(Value::Nil)),
            Node::WriteLocal { slot, value } => {
                let v = self.exec(ctx, frame, *value)?;
                let slot = *slot as usize;
                if slot >= frame.locals.len() {
                    frame.locals.resize(slot + 1, Value::Nil);
                }
                frame.locals[slot] = v.clone();
                Ok(v)
            }
            Node::ReadArg(index) => Ok(frame
                .args
                .get(*index as usize)
                .cloned()
                .unwrap_or(Value::Nil)),
            Node::Sequence(children) => {
                let mut last = Value::Nil;
                for child in children {
                    last = self.exec(ctx, frame, *child)?;
                }
                Ok(last)
            }
            Node::If {
                cond,
                then,
                otherwise,
                profile,
            } => {
                let test = self.exec(ctx, frame, *cond)?.is_truthy();
                if profile.record(test) {
                    self.exec(ctx, frame, *then)
                } else if let Some(otherwise) = otherwise {
                    self.exec(ctx, frame, *otherwise)
                } else {
                    Ok(Value::Nil)
                }
            }
            Node::Not(inner) => Ok(Value::Bool(!self.exec(ctx, frame, *inner)?.is_truthy())),
            Node::And(left, right) => {
                let l = self.exec(ctx, frame, *left)?;
                if l.is_truthy() {
                    self.exec(ctx, frame, *right)
                } else {
                    Ok(l)
                }
            }
            Node::Or(left, right) => {
                let l = self.exec(ctx, frame, *left)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    self.exec(ctx, frame, *right)
                }
            }
            Node::Binary {
                op,
                left,
                right,
                state,
            } => {
                let l = self.exec(ctx, frame, *left)?;
                let r = self.exec(ctx, frame, *right)?;
                self.binary(ctx, id, version, &node, *op, state, l, r)
            }
            Node::Dispatch {
                site,
                receiver,
                args,
                cache,
            } => {
                let recv = self.exec(ctx, frame, *receiver)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.exec(ctx, frame, *arg)?);
                }
                self.dispatch(ctx, id, version, &node, site, cache, &recv, &values)
            }
            Node::While {
                kind,
                cond,
                body,
                target,
            } => self.run_loop(ctx, frame, *kind, *cond, *body, *target),
            Node::Break { target, value } => {
                let value = self.exec_opt(ctx, frame, *value)?;
                Err(Escape::Break {
                    target: *target,
                    value,
                })
            }
            Node::Next { target, value } => {
                let value = self.exec_opt(ctx, frame, *value)?;
                Err(Escape::Next {
                    target: *target,
                    value,
                })
            }
            Node::Redo(target) => Err(Escape::Redo { target: *target }),
            Node::Return(value) => {
                let value = self.exec(ctx, frame, *value)?;
                Err(Escape::Return {
                    target: frame.id,
                    value,
                })
            }
            Node::Catch { tag, body } => {
                let tag = self.exec(ctx, frame, *tag)?;
                match self.exec(ctx, frame, *body) {
                    Err(Escape::Throw { tag: thrown, value }) if thrown.identical(&tag) => Ok(value),
                    other => other,
                }
            }
            Node::Throw { tag, value } => {
                let tag = self.exec(ctx, frame, *tag)?;
                let value = self.exec_opt(ctx, frame, *value)?;
                Err(Escape::Throw { tag, value })
            }
            Node::Rescue {
                body,
                classes,
                binding,
                handler,
            } => self.rescue(ctx, frame, *body, classes, *binding, *handler),
            Node::Ensure { body, ensure } => {
                let result = self.exec(ctx, frame, *body);
                self.exec(ctx, frame, *ensure)?;
                result
            }
            Node::Translate(inner) => self.exec(ctx, frame, *inner).map_err(|e| match e {
                Escape::Host(err) => ctx.runtime().translate_host(&err),
                other => other,
            }),
            Node::Yield(args) => {
                let Some(block) = frame.block.clone() else {
                    return Err(ctx.raise(
                        &ctx.runtime().core().local_jump_error,
                        "no block given (yield)",
                    ));
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.exec(ctx, frame, *arg)?);
                }
                block.call(ctx, &values)
            }
        }
    }

    fn exec_opt(
        &self,
        ctx: &mut ThreadContext,
        frame: &mut NodeFrame<'_>,
        id: Option<NodeId>,
    ) -> ExecResult {
        match id {
            Some(id) => self.exec(ctx, frame, id),
            None => Ok(Value::Nil),
        }
    }

    // ========================================================================
    // Loops and handlers
    // ========================================================================

    /// `next` re-tests the condition, `redo` re-runs the body without
    /// testing, `break` leaves with its value. Each iteration polls.
    fn run_loop(
        &self,
        ctx: &mut ThreadContext,
        frame: &mut NodeFrame<'_>,
        kind: LoopKind,
        cond: NodeId,
        body: NodeId,
        target: EscapeTarget,
    ) -> ExecResult {
        let mut first = true;
        loop {
            ctx.poll()?;
            let skip_test = first && kind == LoopKind::DoWhile;
            first = false;
            if !skip_test && !self.exec(ctx, frame, cond)?.is_truthy() {
                return Ok(Value::Nil);
            }
            loop {
                match self.exec(ctx, frame, body) {
                    Ok(_) => break,
                    Err(Escape::Next { target: t, .. }) if t == target => break,
                    Err(Escape::Redo { target: t }) if t == target => {
                        ctx.poll()?;
                        continue;
                    }
                    Err(Escape::Break { target: t, value }) if t == target => return Ok(value),
                    Err(other) => return Err(other),
                }
            }
        }
    }

    fn rescue(
        &self,
        ctx: &mut ThreadContext,
        frame: &mut NodeFrame<'_>,
        body: NodeId,
        classes: &[NodeId],
        binding: Option<u32>,
        handler: NodeId,
    ) -> ExecResult {
        let saved = ctx.error_info();
        let exception = match self.exec(ctx, frame, body) {
            Err(escape) => match ctx.runtime().translate_escape(escape) {
                Escape::Raise(raised) => raised.into_exception(),
                other => return Err(other),
            },
            ok => return ok,
        };

        let rt = ctx.runtime().clone();
        let matched = if classes.is_empty() {
            rt.kind_of(&exception, &rt.core().standard_error)
        } else {
            let mut matched = false;
            for class in classes {
                if let Value::Module(m) = self.exec(ctx, frame, *class)? {
                    if rt.kind_of(&exception, &m) {
                        matched = true;
                        break;
                    }
                }
            }
            matched
        };
        if !matched {
            return Err(Escape::Raise(RaiseException::new(exception)));
        }

        ctx.set_error_info(exception.clone());
        if let Some(slot) = binding {
            let slot = slot as usize;
            if slot >= frame.locals.len() {
                frame.locals.resize(slot + 1, Value::Nil);
            }
            frame.locals[slot] = exception;
        }
        let result = self.exec(ctx, frame, handler);
        ctx.set_error_info(saved);
        result
    }

    // ========================================================================
    // Specialization
    // ========================================================================

    /// Install `replacement` in slot `id` if the slot is still at `version`
    /// and its budget allows. Returns whether the rewrite landed.
    fn rewrite(&self, id: NodeId, version: u64, replacement: Node, reason: &str) -> bool {
        if self.arena.replace(id, version, replacement) {
            self.stats.rewrites.fetch_add(1, Ordering::Relaxed);
            debug!("{}: node {} rewritten ({})", self.name, id.index(), reason);
            true
        } else {
            false
        }
    }

    fn budget_left(&self, id: NodeId, version: u64) -> bool {
        if self.policy.may_rewrite(version) {
            return true;
        }
        warn!(
            "{}: node {} exhausted its rewrite budget of {}",
            self.name,
            id.index(),
            self.policy.max_rewrites
        );
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn binary(
        &self,
        ctx: &mut ThreadContext,
        id: NodeId,
        version: u64,
        node: &Node,
        op: BinaryOp,
        state: &BinaryState,
        l: Value,
        r: Value,
    ) -> ExecResult {
        let numeric_ok = ctx.runtime().numeric_ops().is_valid();
        match (state, &l, &r) {
            (BinaryState::Fixnum, Value::Fixnum(a), Value::Fixnum(b)) if numeric_ok => {
                Ok(op.fixnum(*a, *b)?)
            }
            (BinaryState::Float, Value::Float(a), Value::Float(b)) if numeric_ok => {
                Ok(op.float(*a, *b))
            }
            (BinaryState::Generic(site), _, _) => site.call(ctx, &l, &[r], None),
            (BinaryState::Uninitialized, _, _) => {
                let next = match (&l, &r) {
                    _ if !numeric_ok || !self.budget_left(id, version) => generic_state(op),
                    (Value::Fixnum(_), Value::Fixnum(_)) => BinaryState::Fixnum,
                    (Value::Float(_), Value::Float(_)) => BinaryState::Float,
                    _ => generic_state(op),
                };
                let reason = format!("{} -> {}", op, next.name());
                self.rewrite(id, version, with_binary_state(node, next.clone()), &reason);
                self.binary(ctx, id, version + 1, node, op, &next, l, r)
            }
            // Guard failed: fall back for good, reusing the evaluated operands
            _ => {
                let next = generic_state(op);
                if self.rewrite(id, version, with_binary_state(node, next.clone()), "deopt") {
                    self.stats.deopts.fetch_add(1, Ordering::Relaxed);
                }
                self.binary(ctx, id, version + 1, node, op, &next, l, r)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        ctx: &mut ThreadContext,
        id: NodeId,
        version: u64,
        node: &Node,
        site: &Arc<CallSite>,
        cache: &DispatchCache,
        recv: &Value,
        args: &[Value],
    ) -> ExecResult {
        let rt = ctx.runtime().clone();
        let class = rt.class_of(recv);
        let serial = rt.method_serial().current();

        let arms = match cache {
            DispatchCache::Megamorphic => return site.call(ctx, recv, args, None),
            DispatchCache::Uninitialized => &[][..],
            DispatchCache::Polymorphic(arms) => arms.as_slice(),
        };
        let cached = arms.iter().find(|arm| arm.class_id == class.id());
        if let Some(arm) = cached {
            if arm.serial() == serial {
                ctx.poll()?;
                return invoke(ctx, &arm.method, recv, args, None);
            }
        }

        // Miss: only methods whose visibility does not depend on the caller are cached
        let resolved = class
            .resolve_method(site.name())
            .filter(|m| match m.visibility() {
                Visibility::Public => true,
                Visibility::Private => site.call_type().allows_private(),
                Visibility::Protected => false,
            });
        let Some(method) = resolved else {
            return site.call(ctx, recv, args, None);
        };

        // A definition elsewhere left this class's lookup alone: no rewrite
        if let Some(arm) = cached {
            if Arc::ptr_eq(&arm.method.method, &method.method) && arm.method.owner.id() == method.owner.id() {
                arm.revalidate(serial);
                ctx.poll()?;
                return invoke(ctx, &arm.method, recv, args, None);
            }
        }

        let mut next: Vec<CacheArm> = arms
            .iter()
            .filter(|arm| arm.class_id != class.id())
            .cloned()
            .collect();
        next.push(CacheArm::new(class.id(), serial, method.clone()));
        let next_cache = if next.len() > self.policy.max_cache_arms || !self.budget_left(id, version) {
            DispatchCache::Megamorphic
        } else {
            DispatchCache::Polymorphic(next)
        };
        let megamorphic = matches!(next_cache, DispatchCache::Megamorphic);
        if self.rewrite(id, version, with_cache(node, next_cache), "inline cache miss") && megamorphic {
            self.stats.megamorphic.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{}: dispatch of '{}' went megamorphic",
                self.name,
                site.name()
            );
        }

        ctx.poll()?;
        invoke(ctx, &method, recv, args, None)
    }
}

fn generic_state(op: BinaryOp) -> BinaryState {
    BinaryState::Generic(Arc::new(CallSite::new(
        Symbol::intern(op.selector()),
        CallType::Normal,
    )))
}

fn with_binary_state(node: &Node, state: BinaryState) -> Node {
    match node {
        Node::Binary { op, left, right, .. } => Node::Binary {
            op: *op,
            left: *left,
            right: *right,
            state,
        },
        other => other.clone(),
    }
}

fn with_cache(node: &Node, cache: DispatchCache) -> Node {
    match node {
        Node::Dispatch {
            site,
            receiver,
            args,
            ..
        } => Node::Dispatch {
            site: site.clone(),
            receiver: *receiver,
            args: args.clone(),
            cache,
        },
        other => other.clone(),
    }
}

impl std::fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBody")
            .field("name", &self.name)
            .field("nodes", &self.arena.len())
            .field("rewrites", &self.stats.rewrites())
            .finish()
    }
}
