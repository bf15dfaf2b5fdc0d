//! Engine error types
//!
//! Two families live here:
//! - `EngineError`: internal-consistency faults (malformed IR). These indicate a
//!   defect in whatever built the IR and are never rescued by language code.
//! - `HostError`: host-level failures reported by native code. These are
//!   translated into language exceptions at interpreter and method boundaries.

use crate::ir::Operation;

/// Malformed-IR faults
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A variable was read before anything wrote it
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),

    /// An instruction was built with the wrong number of operands
    #[error("Operand arity mismatch for {op}: expected {expected}, got {got}")]
    OperandArity {
        /// Operation whose arity was violated
        op: Operation,
        /// Required operand count
        expected: usize,
        /// Actual operand count
        got: usize,
    },

    /// A jump referenced a label that is not defined in the unit
    #[error("Unknown label: L{0}")]
    UnknownLabel(u32),

    /// Any other structural problem with the IR
    #[error("Malformed IR: {0}")]
    MalformedIr(String),
}

/// Failures raised by native code and the host runtime
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// A value had the wrong runtime type
    #[error("no implicit conversion of {found} into {expected}")]
    TypeMismatch {
        /// Type the operation needed
        expected: String,
        /// Type that was supplied
        found: String,
    },

    /// Integer division by zero
    #[error("divided by 0")]
    ZeroDivision,

    /// 64-bit integer overflow
    #[error("integer overflow")]
    IntegerOverflow,

    /// Call depth limit reached
    #[error("stack level too deep (depth {0})")]
    StackDepthExceeded(usize),

    /// Wrong number of arguments
    #[error("wrong number of arguments (given {given}, expected {expected})")]
    ArgumentCount {
        /// Human-readable expected arity, e.g. `1` or `1..2` or `1+`
        expected: String,
        /// Arguments supplied
        given: usize,
    },

    /// Singleton classes cannot be attached to immediates
    #[error("can't define singleton for {0}")]
    NoSingleton(String),
}

/// Errors from encoding or decoding persisted IR
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistError {
    /// Input ended before the structure was complete
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// Magic bytes did not match
    #[error("Invalid magic number")]
    BadMagic,

    /// Format version not supported by this reader
    #[error("Unsupported IR format version: {0}")]
    UnsupportedVersion(u32),

    /// Payload checksum mismatch
    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the payload as read
        computed: u32,
    },

    /// Unknown tag byte for the given entity
    #[error("Invalid {kind} tag: {tag}")]
    InvalidTag {
        /// What was being decoded
        kind: &'static str,
        /// The offending byte
        tag: u8,
    },

    /// String payload was not UTF-8
    #[error("Invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    /// A count, id or nesting level is larger than any unit this engine builds
    #[error("{what} of {value} exceeds the limit of {max}")]
    LimitExceeded {
        /// The quantity being decoded
        what: &'static str,
        /// Value found in the payload
        value: u64,
        /// Largest accepted value
        max: u64,
    },

    /// Decoded unit failed validation
    #[error("Decoded unit is malformed: {0}")]
    Malformed(#[from] EngineError),

    /// I/O failure while reading or writing a file
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        PersistError::Io(err.to_string())
    }
}
