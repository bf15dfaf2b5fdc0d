//! Control-flow escapes and language exceptions
//!
//! Every execution path in the engine returns `ExecResult`. The error side is
//! `Escape`, a closed set of non-local exits. Ordinary language exceptions are
//! only one variant (`Raise`), so a rescue handler that matches on `Raise`
//! can never swallow a `break` or a `return` by accident.

use crate::error::{EngineError, HostError};
use crate::runtime::{Symbol, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of executing anything: a value, or an escape unwinding the stack
pub type ExecResult<T = Value> = Result<T, Escape>;

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

/// Identity token matched by the node or frame that catches an escape
///
/// Frames, blocks and loops each own a distinct token. A catcher only claims
/// an escape whose token equals its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EscapeTarget(u64);

impl EscapeTarget {
    /// Allocate a token that has never been handed out before
    pub fn fresh() -> Self {
        EscapeTarget(NEXT_TARGET.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EscapeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A raised language exception
///
/// Wraps the exception object (an instance of `Exception` or a subclass).
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseException {
    exception: Value,
}

impl RaiseException {
    /// Wrap an exception object
    pub fn new(exception: Value) -> Self {
        Self { exception }
    }

    /// The exception object being raised
    pub fn exception(&self) -> &Value {
        &self.exception
    }

    /// Consume and return the exception object
    pub fn into_exception(self) -> Value {
        self.exception
    }

    /// The exception's message, if it carries one
    pub fn message(&self) -> Option<String> {
        match &self.exception {
            Value::Object(obj) => match obj.ivar_get(Symbol::intern("@message")) {
                Some(Value::Str(s)) => Some(s.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Name of the exception's class
    pub fn class_name(&self) -> String {
        match &self.exception {
            Value::Object(obj) => obj.class().name().to_string(),
            other => other.type_name().to_string(),
        }
    }
}

impl std::fmt::Display for RaiseException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{}: {}", self.class_name(), msg),
            None => write!(f, "{}", self.class_name()),
        }
    }
}

/// Non-local exit unwinding through the engine
#[derive(Debug, Clone)]
pub enum Escape {
    /// A language exception
    Raise(RaiseException),

    /// `break` out of the loop or block identified by `target`
    Break {
        /// Loop or block token
        target: EscapeTarget,
        /// Value the loop or call evaluates to
        value: Value,
    },

    /// `next`: finish the current iteration of `target` with `value`
    Next {
        /// Loop or block token
        target: EscapeTarget,
        /// Value the iteration produced
        value: Value,
    },

    /// `redo`: restart the current iteration of `target` without re-testing
    Redo {
        /// Loop or block token
        target: EscapeTarget,
    },

    /// `return` from the frame identified by `target`
    Return {
        /// Frame token
        target: EscapeTarget,
        /// Returned value
        value: Value,
    },

    /// `throw tag, value`, caught by a `catch` with an identical tag
    Throw {
        /// Catch tag
        tag: Value,
        /// Value the catch evaluates to
        value: Value,
    },

    /// The thread was asked to exit
    ThreadExit,

    /// Host-level failure, not yet translated to a language exception
    Host(HostError),

    /// Malformed IR; never rescued
    Fatal(EngineError),
}

impl Escape {
    /// True for exits that carry a language exception
    pub fn is_raise(&self) -> bool {
        matches!(self, Escape::Raise(_))
    }

    /// True for break/next/redo/return/throw
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Escape::Break { .. }
                | Escape::Next { .. }
                | Escape::Redo { .. }
                | Escape::Return { .. }
                | Escape::Throw { .. }
        )
    }

    /// Short name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Escape::Raise(_) => "raise",
            Escape::Break { .. } => "break",
            Escape::Next { .. } => "next",
            Escape::Redo { .. } => "redo",
            Escape::Return { .. } => "return",
            Escape::Throw { .. } => "throw",
            Escape::ThreadExit => "thread-exit",
            Escape::Host(_) => "host",
            Escape::Fatal(_) => "fatal",
        }
    }
}

impl From<EngineError> for Escape {
    fn from(err: EngineError) -> Self {
        Escape::Fatal(err)
    }
}

impl From<HostError> for Escape {
    fn from(err: HostError) -> Self {
        Escape::Host(err)
    }
}

impl From<RaiseException> for Escape {
    fn from(exc: RaiseException) -> Self {
        Escape::Raise(exc)
    }
}
