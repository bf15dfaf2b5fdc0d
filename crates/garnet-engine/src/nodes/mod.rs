//! Self-specializing node trees
//!
//! An alternative execution tier to the IR interpreter. A method body is a
//! tree of nodes in an arena; nodes observe the values flowing through them
//! and replace themselves with specialized versions, falling back (deopt)
//! when an observation stops holding.

pub mod arena;
pub mod body;
pub mod builder;
pub mod node;

pub use arena::{NodeArena, NodeId};
pub use body::{NodeBody, SpecializationStats};
pub use builder::NodeBuilder;
pub use node::{BinaryState, CacheArm, ConditionProfile, DispatchCache, LoopKind, Node};
