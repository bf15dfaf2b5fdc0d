//! Node kinds
//!
//! A node is immutable once installed in its arena slot. Specialization
//! state (binary operator state, dispatch cache) is part of the node, so a
//! rewrite installs a whole new node in the same slot. Condition profiles
//! are plain counters and are updated in place.

use super::arena::NodeId;
use crate::dispatch::CallSite;
use crate::ir::CallType;
use crate::runtime::{BinaryOp, ResolvedMethod, Symbol, Value};
use crate::signal::EscapeTarget;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Specialization state of a binary operator node
#[derive(Debug, Clone)]
pub enum BinaryState {
    /// Not executed yet
    Uninitialized,
    /// Both operands seen as fixnums
    Fixnum,
    /// Both operands seen as floats
    Float,
    /// Full dispatch through the operator method
    Generic(Arc<CallSite>),
}

impl BinaryState {
    /// State name used in logs and tests
    pub fn name(&self) -> &'static str {
        match self {
            BinaryState::Uninitialized => "uninitialized",
            BinaryState::Fixnum => "fixnum",
            BinaryState::Float => "float",
            BinaryState::Generic(_) => "generic",
        }
    }
}

/// One cached receiver class of a dispatch node
///
/// The validated serial is revalidated in place when a method defined
/// elsewhere leaves this class's lookup unchanged.
#[derive(Debug)]
pub struct CacheArm {
    /// Receiver class the arm matches
    pub class_id: u64,
    /// Method the class resolved to
    pub method: ResolvedMethod,
    validated: AtomicU64,
}

impl CacheArm {
    /// Arm for `class_id`, valid at `serial`
    pub fn new(class_id: u64, serial: u64, method: ResolvedMethod) -> Self {
        Self {
            class_id,
            method,
            validated: AtomicU64::new(serial),
        }
    }

    /// Method serial the arm was last validated against
    pub fn serial(&self) -> u64 {
        self.validated.load(Ordering::Acquire)
    }

    /// Record that the lookup still yields the cached method at `serial`
    pub fn revalidate(&self, serial: u64) {
        self.validated.fetch_max(serial, Ordering::AcqRel);
    }
}

impl Clone for CacheArm {
    fn clone(&self) -> Self {
        Self::new(self.class_id, self.serial(), self.method.clone())
    }
}

/// Polymorphic inline cache state
#[derive(Debug, Clone)]
pub enum DispatchCache {
    /// Not executed yet
    Uninitialized,
    /// One arm per receiver class seen
    Polymorphic(Vec<CacheArm>),
    /// Too many receiver classes; every call goes through the call site
    Megamorphic,
}

impl DispatchCache {
    /// Cached arms; empty unless polymorphic
    pub fn arms(&self) -> &[CacheArm] {
        match self {
            DispatchCache::Polymorphic(arms) => arms,
            _ => &[],
        }
    }
}

/// Branch counters of an `If` node
#[derive(Debug, Default)]
pub struct ConditionProfile {
    taken: AtomicU64,
    not_taken: AtomicU64,
}

impl ConditionProfile {
    /// Count one evaluation and pass the value through
    pub fn record(&self, value: bool) -> bool {
        let counter = if value { &self.taken } else { &self.not_taken };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Evaluations that were truthy
    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }

    /// Evaluations that were falsy
    pub fn not_taken(&self) -> u64 {
        self.not_taken.load(Ordering::Relaxed)
    }
}

impl Clone for ConditionProfile {
    fn clone(&self) -> Self {
        Self {
            taken: AtomicU64::new(self.taken()),
            not_taken: AtomicU64::new(self.not_taken()),
        }
    }
}

/// Where a loop tests its condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Condition tested before each iteration
    While,
    /// Body runs once before the first test
    DoWhile,
}

/// Node
#[derive(Debug, Clone)]
pub enum Node {
    /// Constant value
    Literal(Value),
    /// The activation's `self`
    SelfValue,
    /// Read a local slot
    ReadLocal(u32),
    /// Write a local slot and yield the value
    WriteLocal {
        /// Slot written
        slot: u32,
        /// Value stored
        value: NodeId,
    },
    /// Read a positional argument
    ReadArg(u32),
    /// Run children in order and yield the last value
    Sequence(Vec<NodeId>),
    /// Profiled conditional
    If {
        /// Condition
        cond: NodeId,
        /// Truthy branch
        then: NodeId,
        /// Falsy branch; nil when absent
        otherwise: Option<NodeId>,
        /// Branch counters
        profile: Arc<ConditionProfile>,
    },
    /// Logical negation
    Not(NodeId),
    /// Short-circuit `&&`
    And(NodeId, NodeId),
    /// Short-circuit `||`
    Or(NodeId, NodeId),
    /// Self-specializing arithmetic or comparison operator
    Binary {
        /// Operator
        op: BinaryOp,
        /// Receiver operand
        left: NodeId,
        /// Argument operand
        right: NodeId,
        /// Current specialization
        state: BinaryState,
    },
    /// Method call with a polymorphic inline cache
    Dispatch {
        /// Fallback call site
        site: Arc<CallSite>,
        /// Receiver
        receiver: NodeId,
        /// Arguments
        args: Vec<NodeId>,
        /// Cached receiver classes
        cache: DispatchCache,
    },
    /// `while` / `begin ... end while`
    While {
        /// Where the condition is tested
        kind: LoopKind,
        /// Condition
        cond: NodeId,
        /// Loop body
        body: NodeId,
        /// Token claimed by `break`, `next` and `redo` in the body
        target: EscapeTarget,
    },
    /// Leave a loop
    Break {
        /// Token of the loop left
        target: EscapeTarget,
        /// Loop's value; nil when absent
        value: Option<NodeId>,
    },
    /// Start the next iteration of a loop
    Next {
        /// Token of the loop continued
        target: EscapeTarget,
        /// Value of the finished iteration; nil when absent
        value: Option<NodeId>,
    },
    /// Rerun the loop body without testing the condition
    Redo(EscapeTarget),
    /// Leave the method
    Return(NodeId),
    /// `catch(tag) { body }`
    Catch {
        /// Tag matched by `throw`
        tag: NodeId,
        /// Protected body
        body: NodeId,
    },
    /// `throw tag, value`
    Throw {
        /// Tag searched for
        tag: NodeId,
        /// Value given to the `catch`; nil when absent
        value: Option<NodeId>,
    },
    /// `begin body rescue classes => local; handler end`; no classes means
    /// `StandardError`
    Rescue {
        /// Protected body
        body: NodeId,
        /// Exception classes handled
        classes: Vec<NodeId>,
        /// Local slot receiving the exception
        binding: Option<u32>,
        /// Handler
        handler: NodeId,
    },
    /// `begin body ensure ensure end`
    Ensure {
        /// Protected body
        body: NodeId,
        /// Runs on every exit
        ensure: NodeId,
    },
    /// Host errors raised below become language exceptions here
    Translate(NodeId),
    /// Call the activation's block
    Yield(Vec<NodeId>),
}

impl Node {
    /// Kind name used in logs and tests
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Literal(_) => "literal",
            Node::SelfValue => "self",
            Node::ReadLocal(_) => "read_local",
            Node::WriteLocal { .. } => "write_local",
            Node::ReadArg(_) => "read_arg",
            Node::Sequence(_) => "sequence",
            Node::If { .. } => "if",
            Node::Not(_) => "not",
            Node::And(..) => "and",
            Node::Or(..) => "or",
            Node::Binary { .. } => "binary",
            Node::Dispatch { .. } => "dispatch",
            Node::While { .. } => "while",
            Node::Break { .. } => "break",
            Node::Next { .. } => "next",
            Node::Redo(_) => "redo",
            Node::Return(_) => "return",
            Node::Catch { .. } => "catch",
            Node::Throw { .. } => "throw",
            Node::Rescue { .. } => "rescue",
            Node::Ensure { .. } => "ensure",
            Node::Translate(_) => "translate",
            Node::Yield(_) => "yield",
        }
    }

    pub(crate) fn binary(op: BinaryOp, left: NodeId, right: NodeId) -> Self {
        Node::Binary {
            op,
            left,
            right,
            state: BinaryState::Uninitialized,
        }
    }

    pub(crate) fn dispatch(
        name: Symbol,
        call_type: CallType,
        receiver: NodeId,
        args: Vec<NodeId>,
    ) -> Self {
        Node::Dispatch {
            site: Arc::new(CallSite::new(name, call_type)),
            receiver,
            args,
            cache: DispatchCache::Uninitialized,
        }
    }
}
