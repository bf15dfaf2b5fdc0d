//! Garnet Language Engine
//!
//! Execution core for the Garnet dynamic language:
//! - **IR**: operands, instructions, units, builder, optimizer and the
//!   persisted IR format (`ir` module)
//! - **Interpreter**: thread contexts, frames, blocks, safepoints and the
//!   instruction loop (`interpreter` module)
//! - **Dispatch**: call sites, call adapters and the invocation trampoline
//!   (`dispatch` module)
//! - **Nodes**: self-specializing node trees with deoptimization
//!   (`nodes` module)
//! - **Runtime**: the object model the other modules run against
//!   (`runtime` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use garnet_engine::ir::Operand;
//! use garnet_engine::{execute_script, CallType, IrBuilder, Runtime, ThreadContext};
//!
//! let mut b = IrBuilder::script("main");
//! let x = b.local("x");
//! b.copy(&x, Operand::fixnum(40));
//! let sum = b.call(CallType::Normal, "+", x.into(), vec![Operand::fixnum(2)], None);
//! b.ret(sum);
//! let unit = b.finish()?;
//!
//! let mut ctx = ThreadContext::new(Runtime::new());
//! let result = execute_script(&mut ctx, &unit)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::needless_return)]

// ============================================================================
// Core Modules
// ============================================================================

/// Engine configuration
pub mod config;

/// Host-level error types
pub mod error;

/// Non-local control flow
pub mod signal;

/// Object model
pub mod runtime;

/// IR interpreter
pub mod interpreter;

/// Intermediate representation
pub mod ir;

/// Method dispatch
pub mod dispatch;

/// Self-specializing node trees
pub mod nodes;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{EngineConfig, SpecializationPolicy, TierPolicy};
pub use error::{EngineError, HostError, PersistError};
pub use signal::{Escape, EscapeTarget, ExecResult, RaiseException};

pub use runtime::{Arity, Method, MethodBody, ModuleRef, Runtime, Symbol, Value, Visibility};

pub use interpreter::{execute_script, Block, Frame, ThreadContext, ThreadInterrupt};

pub use ir::{CallType, Instr, IrBuilder, IrUnit, Operand, UnitKind, Variable};

pub use dispatch::{invoke, send, AdapterKind, CallAdapter, CallSite};

pub use nodes::{NodeBody, NodeBuilder};
