//! IR interpreter
//!
//! Per-thread execution state (`ThreadContext`, frames, dynamic scopes),
//! blocks, the safepoint/interrupt mailbox, execution profiles and the
//! instruction dispatch loop.

pub mod block;
pub mod context;
pub mod engine;
pub mod profile;
pub mod safepoint;
pub mod scope;
pub mod state;

pub use block::{Block, BlockBody, EscapeGuard, NativeBlockFn};
pub use context::{Frame, ThreadContext};
pub use engine::{execute_script, interpret, promote_unhandled, run_method_body};
pub use profile::ExecutionProfile;
pub use safepoint::{InterruptRequest, InterruptStats, ThreadInterrupt};
pub use scope::DynamicScope;
pub use state::InterpreterState;
