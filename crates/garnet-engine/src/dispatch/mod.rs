//! Method dispatch
//!
//! Call adapters route a call instruction's operands to a call site; call
//! sites resolve and cache the target; the trampoline invokes it.

pub mod adapter;
pub mod call_site;
pub mod invoke;

pub use adapter::{retrieve_args, AdapterKind, CallAdapter};
pub use call_site::{send, CallSite};
pub use invoke::invoke;
