//! Object model
//!
//! The dynamic object model the interpreter and node engine run against:
//! values, symbols, objects, classes and modules with mutable method tables,
//! globals, and the shared `Runtime` that ties them together.

pub mod assumption;
pub(crate) mod builtins;
pub mod globals;
pub mod method;
pub mod module;
pub mod numeric;
pub mod object;
#[allow(clippy::module_inception)]
pub mod runtime;
pub mod symbol;
pub mod value;

pub use assumption::Assumption;
pub use globals::GlobalTable;
pub use method::{Arity, FixnumFn, Method, MethodBody, NativeFn, Visibility};
pub use module::{ConstEntry, MethodSerial, ModuleKind, ModuleRef, RModule, ResolvedMethod};
pub use numeric::BinaryOp;
pub use object::{ObjectRef, RObject};
pub use runtime::{CoreClasses, Runtime};
pub use symbol::Symbol;
pub use value::{ArrayRef, MatchData, Value};
