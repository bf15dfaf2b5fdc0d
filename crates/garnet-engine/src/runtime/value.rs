//! Runtime values
//!
//! `Value` is the tagged representation every instruction, node and native
//! method traffics in. Immediates (nil, booleans, fixnums, floats, symbols)
//! are stored inline; everything else is a shared reference.

use super::module::ModuleRef;
use super::object::ObjectRef;
use super::symbol::Symbol;
use crate::interpreter::Block;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared, mutable array storage
pub type ArrayRef = Arc<RwLock<Vec<Value>>>;

/// Result of a successful pattern match, as stored in the backref slot
#[derive(Debug, Clone, PartialEq)]
pub struct MatchData {
    /// String the match was performed against
    pub subject: Arc<str>,
    /// Byte offset where the match begins
    pub begin: usize,
    /// Byte offset one past the match end
    pub end: usize,
}

impl MatchData {
    /// The matched substring
    pub fn matched(&self) -> &str {
        &self.subject[self.begin..self.end]
    }
}

/// A language value
#[derive(Clone)]
pub enum Value {
    /// `nil`
    Nil,
    /// `true` / `false`
    Bool(bool),
    /// 64-bit integer
    Fixnum(i64),
    /// Double-precision float
    Float(f64),
    /// Interned symbol
    Symbol(Symbol),
    /// Immutable string
    Str(Arc<str>),
    /// Array
    Array(ArrayRef),
    /// Instance of a user or core class
    Object(ObjectRef),
    /// Class, module or singleton class
    Module(ModuleRef),
    /// Last-match result
    MatchData(Arc<MatchData>),
    /// Block materialized as a first-class proc
    Proc(Block),
}

impl Value {
    /// Build a string value
    pub fn string(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// Build a symbol value, interning `name`
    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Symbol::intern(name))
    }

    /// Build an array value
    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(elements)))
    }

    /// Everything except `nil` and `false` is truthy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Whether the value is `nil`
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Integer payload
    #[inline]
    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(*n),
            _ => None,
        }
    }

    /// Float payload
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Module payload
    pub fn as_module(&self) -> Option<&ModuleRef> {
        match self {
            Value::Module(m) => Some(m),
            _ => None,
        }
    }

    /// Object payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Proc payload
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Value::Proc(b) => Some(b),
            _ => None,
        }
    }

    /// Object identity (`equal?`)
    ///
    /// Immediates compare by value. Strings compare by content since string
    /// literals share one allocation per literal but concatenation results do
    /// not; every other reference compares by pointer.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Fixnum(a), Value::Fixnum(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::MatchData(a), Value::MatchData(b)) => Arc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Short name of the value's built-in type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(true) => "true",
            Value::Bool(false) => "false",
            Value::Fixnum(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Symbol(_) => "Symbol",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Module(_) => "Module",
            Value::MatchData(_) => "MatchData",
            Value::Proc(_) => "Proc",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

/// Structural equality for immediates and strings, identity for references
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::MatchData(a), Value::MatchData(b)) => a == b,
            _ => self.identical(other),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Fixnum(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(a) => f.debug_list().entries(a.read().iter()).finish(),
            Value::Object(o) => write!(f, "#<{}:{}>", o.class().name(), o.id()),
            Value::Module(m) => write!(f, "{}", m.name()),
            Value::MatchData(m) => write!(f, "#<MatchData {:?}>", m.matched()),
            Value::Proc(b) => write!(f, "#<Proc:{}>", b.token()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => Ok(()),
            Value::Str(s) => f.write_str(s),
            Value::Symbol(s) => write!(f, "{}", s),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Fixnum(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}
