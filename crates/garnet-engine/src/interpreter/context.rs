//! Per-thread execution context
//!
//! `ThreadContext` is passed explicitly to everything that executes code. It
//! is never shared between threads: the frame stack, the `$!` slot and the
//! backref slots all belong to exactly one thread.

use super::block::Block;
use super::safepoint::ThreadInterrupt;
use crate::error::HostError;
use crate::runtime::{ModuleRef, Runtime, Symbol, Value};
use crate::signal::{Escape, EscapeTarget};
use std::sync::Arc;

/// Remaining native stack below which a new segment is allocated
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each freshly allocated stack segment
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Run `f`, first moving to a fresh stack segment if the current one is
/// nearly exhausted
pub(crate) fn with_stack_growth<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}

/// One activation record
#[derive(Debug, Clone)]
pub struct Frame {
    /// Token matched by `return` escapes aimed at this frame
    pub id: EscapeTarget,
    /// `self` for this activation
    pub self_value: Value,
    /// Name of the executing method, if any
    pub name: Option<Symbol>,
    /// Module whose method table held the executing method (for `super`)
    pub defining_module: Option<ModuleRef>,
    /// Module used for constant lookup and `def`
    pub lexical_module: ModuleRef,
    /// Block passed to this activation
    pub block: Option<Block>,
    /// Block whose body this frame is running, if it is a block frame
    pub current_block: Option<Block>,
    /// Last match result (`$~`)
    pub backref: Value,
}

impl Frame {
    /// Frame for a method activation
    pub fn method(
        self_value: Value,
        name: Symbol,
        owner: ModuleRef,
        block: Option<Block>,
    ) -> Self {
        Self {
            id: EscapeTarget::fresh(),
            self_value,
            name: Some(name),
            defining_module: Some(owner.clone()),
            lexical_module: owner,
            block,
            current_block: None,
            backref: Value::Nil,
        }
    }

    /// Top-level frame
    pub fn top(self_value: Value, lexical_module: ModuleRef) -> Self {
        Self {
            id: EscapeTarget::fresh(),
            self_value,
            name: None,
            defining_module: None,
            lexical_module,
            block: None,
            current_block: None,
            backref: Value::Nil,
        }
    }
}

/// Per-thread interpreter state
pub struct ThreadContext {
    runtime: Arc<Runtime>,
    frames: Vec<Frame>,
    error_info: Value,
    interrupt: Arc<ThreadInterrupt>,
}

impl ThreadContext {
    /// Context with a single top-level frame whose self is the main object
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let top = Frame::top(
            runtime.main_object().clone(),
            runtime.core().object.clone(),
        );
        Self {
            runtime,
            frames: vec![top],
            error_info: Value::Nil,
            interrupt: Arc::new(ThreadInterrupt::new()),
        }
    }

    /// Runtime this thread executes in
    #[inline]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Handle other threads use to interrupt this one
    pub fn interrupt(&self) -> &Arc<ThreadInterrupt> {
        &self.interrupt
    }

    /// Safepoint poll
    #[inline(always)]
    pub fn poll(&self) -> Result<(), Escape> {
        self.interrupt.poll()
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Innermost frame
    #[inline]
    pub fn frame(&self) -> &Frame {
        // The top-level frame is pushed in `new` and never popped
        &self.frames[self.frames.len() - 1]
    }

    /// Innermost frame, mutably
    #[inline]
    pub fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Push a frame, enforcing the configured depth limit
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), HostError> {
        let limit = self.runtime.config().max_call_depth;
        if self.frames.len() >= limit {
            return Err(HostError::StackDepthExceeded(self.frames.len()));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame. The top-level frame is never popped.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Number of live frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True while the frame identified by `id` is on this thread's stack
    pub fn frame_is_live(&self, id: EscapeTarget) -> bool {
        self.frames.iter().rev().any(|f| f.id == id)
    }

    /// `self` of the innermost frame
    pub fn self_value(&self) -> &Value {
        &self.frame().self_value
    }

    // ========================================================================
    // Exception and match state
    // ========================================================================

    /// Exception currently being handled (`$!`)
    pub fn error_info(&self) -> Value {
        self.error_info.clone()
    }

    /// Replace `$!`, returning the previous value
    pub fn set_error_info(&mut self, value: Value) -> Value {
        std::mem::replace(&mut self.error_info, value)
    }

    /// Last match of the innermost frame
    pub fn backref(&self) -> Value {
        self.frame().backref.clone()
    }

    /// Record the last match of the innermost frame
    pub fn set_backref(&mut self, value: Value) {
        self.frame_mut().backref = value;
    }

    /// Shorthand for raising a new exception of `class`
    pub fn raise(&self, class: &ModuleRef, message: impl AsRef<str>) -> Escape {
        self.runtime.raise(class, message)
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("depth", &self.frames.len())
            .field("error_info", &self.error_info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_top_frame_is_permanent() {
        let mut ctx = ThreadContext::new(Runtime::new());
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.pop_frame().is_none());
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let config = EngineConfig {
            max_call_depth: 3,
            ..EngineConfig::default()
        };
        let rt = Runtime::with_config(config);
        let mut ctx = ThreadContext::new(rt.clone());
        let frame = Frame::top(Value::Nil, rt.core().object.clone());
        assert!(ctx.push_frame(frame.clone()).is_ok());
        assert!(ctx.push_frame(frame.clone()).is_ok());
        assert_eq!(
            ctx.push_frame(frame),
            Err(HostError::StackDepthExceeded(3))
        );
    }

    #[test]
    fn test_frame_liveness() {
        let rt = Runtime::new();
        let mut ctx = ThreadContext::new(rt.clone());
        let frame = Frame::top(Value::Nil, rt.core().object.clone());
        let id = frame.id;
        ctx.push_frame(frame).unwrap();
        assert!(ctx.frame_is_live(id));
        ctx.pop_frame();
        assert!(!ctx.frame_is_live(id));
    }

    #[test]
    fn test_error_info_swap() {
        let mut ctx = ThreadContext::new(Runtime::new());
        assert_eq!(ctx.set_error_info(Value::Fixnum(1)), Value::Nil);
        assert_eq!(ctx.error_info(), Value::Fixnum(1));
    }
}
