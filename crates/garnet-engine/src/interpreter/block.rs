//! Blocks
//!
//! A `Block` is a closure body plus everything it captured at creation: self,
//! the enclosing dynamic scope, the frame it was created in (the target of a
//! non-local `return`) and that frame's method identity (for `super` and
//! `yield` inside the block).
//!
//! Each block also carries an identity token and an `escaped` marker. The
//! token is what `break`/`next`/`redo` escapes from inside the block target.
//! The marker is set once the call the block literal was passed to has
//! finished; breaking out of an escaped block is a `LocalJumpError`.

use super::context::{with_stack_growth, Frame, ThreadContext};
use super::engine;
use super::scope::DynamicScope;
use crate::ir::IrUnit;
use crate::runtime::{Arity, ModuleRef, Symbol, Value};
use crate::signal::{Escape, EscapeTarget, ExecResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Host closure usable as a block body
pub type NativeBlockFn = Arc<dyn Fn(&mut ThreadContext, &[Value]) -> ExecResult + Send + Sync>;

/// Code a block runs
#[derive(Clone)]
pub enum BlockBody {
    /// Closure IR unit
    Ir(Arc<IrUnit>),
    /// Host closure
    Native(NativeBlockFn),
}

struct BlockInner {
    body: BlockBody,
    self_value: Value,
    scope: DynamicScope,
    home: EscapeTarget,
    name: Option<Symbol>,
    defining_module: Option<ModuleRef>,
    lexical_module: ModuleRef,
    outer_block: Option<Block>,
    token: EscapeTarget,
    escaped: AtomicBool,
}

/// A closure value
#[derive(Clone)]
pub struct Block(Arc<BlockInner>);

impl Block {
    /// Capture a closure unit in the current frame of `ctx`
    pub fn capture(ctx: &ThreadContext, unit: Arc<IrUnit>, scope: DynamicScope) -> Self {
        Self::with_body(ctx.frame(), BlockBody::Ir(unit), scope)
    }

    /// Wrap a host closure, capturing the current frame of `ctx`
    pub fn native<F>(ctx: &ThreadContext, f: F) -> Self
    where
        F: Fn(&mut ThreadContext, &[Value]) -> ExecResult + Send + Sync + 'static,
    {
        Self::with_body(ctx.frame(), BlockBody::Native(Arc::new(f)), DynamicScope::root(0))
    }

    fn with_body(frame: &Frame, body: BlockBody, scope: DynamicScope) -> Self {
        // Blocks nested in blocks return from the method that created the outermost one
        let home = frame
            .current_block
            .as_ref()
            .map(|b| b.home())
            .unwrap_or(frame.id);
        Self(Arc::new(BlockInner {
            body,
            self_value: frame.self_value.clone(),
            scope,
            home,
            name: frame.name,
            defining_module: frame.defining_module.clone(),
            lexical_module: frame.lexical_module.clone(),
            outer_block: frame.block.clone(),
            token: EscapeTarget::fresh(),
            escaped: AtomicBool::new(false),
        }))
    }

    /// Token targeted by `break`, `next` and `redo` inside this block
    pub fn token(&self) -> EscapeTarget {
        self.0.token
    }

    /// Frame a non-local `return` inside this block returns from
    pub fn home(&self) -> EscapeTarget {
        self.0.home
    }

    /// `self` captured at creation
    pub fn self_value(&self) -> &Value {
        &self.0.self_value
    }

    /// Scope the block body's own scope is parented to
    pub fn scope(&self) -> &DynamicScope {
        &self.0.scope
    }

    /// What the block runs
    pub fn body(&self) -> &BlockBody {
        &self.0.body
    }

    /// Accepted argument counts; native blocks take anything
    pub fn arity(&self) -> Arity {
        match &self.0.body {
            BlockBody::Ir(unit) => unit.arity(),
            BlockBody::Native(_) => Arity::rest(0),
        }
    }

    /// Same block object
    pub fn ptr_eq(&self, other: &Block) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ========================================================================
    // Escape marker
    // ========================================================================

    /// Mark the block as having outlived the call it was passed to
    pub fn escape(&self) {
        self.0.escaped.store(true, Ordering::Release);
    }

    /// Whether the call the block was passed to has returned
    pub fn is_escaped(&self) -> bool {
        self.0.escaped.load(Ordering::Acquire)
    }

    /// Guard that escapes the block when dropped, including during unwinding
    pub fn escape_guard(&self) -> EscapeGuard<'_> {
        EscapeGuard(self)
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Run the block (`yield` / `Proc#call`)
    ///
    /// Claims `next` and `redo` aimed at this block; everything else,
    /// including `break`, propagates to the caller.
    pub fn call(&self, ctx: &mut ThreadContext, args: &[Value]) -> ExecResult {
        ctx.poll()?;
        let frame = Frame {
            id: EscapeTarget::fresh(),
            self_value: self.0.self_value.clone(),
            name: self.0.name,
            defining_module: self.0.defining_module.clone(),
            lexical_module: self.0.lexical_module.clone(),
            block: self.0.outer_block.clone(),
            current_block: Some(self.clone()),
            backref: Value::Nil,
        };
        ctx.push_frame(frame)?;

        let token = self.0.token;
        let result = with_stack_growth(|| loop {
            let outcome = match &self.0.body {
                BlockBody::Ir(unit) => engine::run_block_body(ctx, unit, self, args),
                BlockBody::Native(f) => f(ctx, args),
            };
            match outcome {
                Err(Escape::Redo { target }) if target == token => continue,
                Err(Escape::Next { target, value }) if target == token => break Ok(value),
                other => break other,
            }
        });

        ctx.pop_frame();
        result
    }
}

/// Escapes its block on drop
pub struct EscapeGuard<'a>(&'a Block);

impl Drop for EscapeGuard<'_> {
    fn drop(&mut self) {
        self.0.escape();
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("token", &self.0.token)
            .field("home", &self.0.home)
            .field("escaped", &self.is_escaped())
            .finish()
    }
}
