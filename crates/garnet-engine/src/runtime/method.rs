//! Method entries

use super::symbol::Symbol;
use super::value::Value;
use crate::error::HostError;
use crate::interpreter::{Block, ThreadContext};
use crate::ir::IrUnit;
use crate::nodes::NodeBody;
use crate::signal::ExecResult;
use std::sync::Arc;

/// Method visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable from anywhere
    Public,
    /// Callable when the caller's self is a kind of the owner
    Protected,
    /// Callable only without an explicit receiver
    Private,
}

/// Native method: `(ctx, self, args, block)`
pub type NativeFn = fn(&mut ThreadContext, &Value, &[Value], Option<&Block>) -> ExecResult;

/// Native overload taking a single unboxed integer argument
pub type FixnumFn = fn(&mut ThreadContext, &Value, i64) -> ExecResult;

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Mandatory leading arguments
    pub required: usize,
    /// Optional arguments after the required ones
    pub optional: usize,
    /// Whether trailing arguments are collected
    pub rest: bool,
}

impl Arity {
    /// Exactly `required` arguments
    pub const fn fixed(required: usize) -> Self {
        Self {
            required,
            optional: 0,
            rest: false,
        }
    }

    /// `required` plus up to `optional` more
    pub const fn optional(required: usize, optional: usize) -> Self {
        Self {
            required,
            optional,
            rest: false,
        }
    }

    /// `required` or more
    pub const fn rest(required: usize) -> Self {
        Self {
            required,
            optional: 0,
            rest: true,
        }
    }

    /// Whether `given` arguments are acceptable
    pub fn accepts(&self, given: usize) -> bool {
        given >= self.required && (self.rest || given <= self.required + self.optional)
    }

    /// Fail with `ArgumentCount` unless `given` arguments are acceptable
    pub fn check(&self, given: usize) -> Result<(), HostError> {
        if self.accepts(given) {
            Ok(())
        } else {
            Err(HostError::ArgumentCount {
                expected: self.to_string(),
                given,
            })
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.rest {
            write!(f, "{}+", self.required)
        } else if self.optional > 0 {
            write!(f, "{}..{}", self.required, self.required + self.optional)
        } else {
            write!(f, "{}", self.required)
        }
    }
}

/// Executable body of a method
#[derive(Clone)]
pub enum MethodBody {
    /// Host function, optionally with an unboxed-integer overload
    Native {
        /// General entry point
        func: NativeFn,
        /// Entry taking one raw integer argument
        fixnum: Option<FixnumFn>,
    },
    /// Interpreted IR
    Ir(Arc<IrUnit>),
    /// Self-specializing node tree
    Nodes(Arc<NodeBody>),
    /// IR until hot, then the node tree
    Tiered {
        /// Cold tier
        ir: Arc<IrUnit>,
        /// Hot tier
        nodes: Arc<NodeBody>,
    },
    /// Returns an instance variable
    AttrReader(Symbol),
    /// Assigns an instance variable and returns the assigned value
    AttrWriter(Symbol),
}

impl std::fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodBody::Native { fixnum, .. } => {
                write!(f, "Native(fixnum={})", fixnum.is_some())
            }
            MethodBody::Ir(unit) => write!(f, "Ir({})", unit.name()),
            MethodBody::Nodes(body) => write!(f, "Nodes({})", body.name()),
            MethodBody::Tiered { ir, .. } => write!(f, "Tiered({})", ir.name()),
            MethodBody::AttrReader(name) => write!(f, "AttrReader({})", name),
            MethodBody::AttrWriter(name) => write!(f, "AttrWriter({})", name),
        }
    }
}

/// A method table entry
#[derive(Debug, Clone)]
pub struct Method {
    /// Name the method is registered under
    pub name: Symbol,
    /// Visibility at definition time
    pub visibility: Visibility,
    /// Accepted argument counts
    pub arity: Arity,
    /// What runs when the method is invoked
    pub body: MethodBody,
}

impl Method {
    /// Method from its parts
    pub fn new(name: Symbol, visibility: Visibility, arity: Arity, body: MethodBody) -> Self {
        Self {
            name,
            visibility,
            arity,
            body,
        }
    }

    /// Public native method without a fixnum overload
    pub fn native(name: &str, arity: Arity, func: NativeFn) -> Self {
        Self::new(
            Symbol::intern(name),
            Visibility::Public,
            arity,
            MethodBody::Native { func, fixnum: None },
        )
    }

    /// Public native method with an unboxed-integer overload
    pub fn native_fixnum(name: &str, func: NativeFn, fixnum: FixnumFn) -> Self {
        Self::new(
            Symbol::intern(name),
            Visibility::Public,
            Arity::fixed(1),
            MethodBody::Native {
                func,
                fixnum: Some(fixnum),
            },
        )
    }

    /// Method whose body is an IR unit; arity comes from the unit
    pub fn ir(name: Symbol, visibility: Visibility, unit: Arc<IrUnit>) -> Self {
        let arity = unit.arity();
        Self::new(name, visibility, arity, MethodBody::Ir(unit))
    }

    /// Method whose body is a node tree
    pub fn nodes(name: Symbol, visibility: Visibility, body: Arc<NodeBody>) -> Self {
        let arity = body.arity();
        Self::new(name, visibility, arity, MethodBody::Nodes(body))
    }

    /// Method that starts in IR and tiers up to `nodes`
    pub fn tiered(
        name: Symbol,
        visibility: Visibility,
        ir: Arc<IrUnit>,
        nodes: Arc<NodeBody>,
    ) -> Self {
        let arity = ir.arity();
        Self::new(name, visibility, arity, MethodBody::Tiered { ir, nodes })
    }

    /// Public reader for `@name`
    pub fn attr_reader(name: &str) -> Self {
        let ivar = Symbol::intern(&format!("@{}", name));
        Self::new(
            Symbol::intern(name),
            Visibility::Public,
            Arity::fixed(0),
            MethodBody::AttrReader(ivar),
        )
    }

    /// Public writer `name=` for `@name`
    pub fn attr_writer(name: &str) -> Self {
        let ivar = Symbol::intern(&format!("@{}", name));
        Self::new(
            Symbol::intern(&format!("{}=", name)),
            Visibility::Public,
            Arity::fixed(1),
            MethodBody::AttrWriter(ivar),
        )
    }

    /// Same method, private
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Same method, protected
    pub fn protected(mut self) -> Self {
        self.visibility = Visibility::Protected;
        self
    }

    pub(crate) fn with_visibility(&self, visibility: Visibility) -> Self {
        Self {
            visibility,
            ..self.clone()
        }
    }
}
