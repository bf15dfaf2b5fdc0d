//! Intermediate representation
//!
//! Linear instruction units over operands, the closed instruction set with
//! its operation tags, clone-for-inlining, constant propagation,
//! pretty-printing and a binary persistence format.

pub mod builder;
pub mod call;
pub mod defined;
pub mod inline;
pub mod instr;
pub mod operand;
pub mod operation;
pub mod optimize;
pub mod persist;
pub mod pretty;
pub mod unit;

pub use builder::IrBuilder;
pub use call::{CallInstr, CallType};
pub use defined::DefinedInstr;
pub use inline::{CloneForInlining, InlineAllocator, InlineCloneContext};
pub use instr::{BranchKind, Instr, InstrOutcome, ResultInstr};
pub use operand::{Label, Literal, Operand, ValueMap, Variable};
pub use operation::{OpClass, Operation};
pub use optimize::propagate_constants;
pub use pretty::PrettyPrint;
pub use unit::{IrUnit, UnitKind};
