//! IR operands
//!
//! Operands are immutable once built and shared by every activation of
//! their unit. Retrieval reads the current value: literals always produce the
//! same value, variables read their cell in the temporaries or the dynamic
//! scope chain.

use super::inline::{CloneForInlining, InlineCloneContext};
use super::unit::IrUnit;
use crate::error::EngineError;
use crate::interpreter::{Block, InterpreterState, ThreadContext};
use crate::runtime::{Symbol, Value};
use crate::signal::ExecResult;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Replacement map used by constant propagation
pub type ValueMap = FxHashMap<Variable, Operand>;

/// Immutable constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `nil`
    Nil,
    /// `true` / `false`
    Bool(bool),
    /// Integer
    Fixnum(i64),
    /// Float
    Float(f64),
    /// String literal; every retrieval yields the same shared string
    Str(Arc<str>),
    /// Symbol
    Symbol(Symbol),
}

impl Literal {
    /// String literal
    pub fn string(s: &str) -> Self {
        Literal::Str(Arc::from(s))
    }

    /// Runtime value of the literal
    #[inline]
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Fixnum(n) => Value::Fixnum(*n),
            Literal::Float(x) => Value::Float(*x),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Symbol(s) => Value::Symbol(*s),
        }
    }
}

/// Storage cell an instruction reads or writes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    /// Unit-local temporary
    Temp(u32),
    /// Local variable `depth` scopes up the dynamic scope chain
    Local {
        /// Source name
        name: Symbol,
        /// Number of parent hops
        depth: u32,
        /// Slot within that scope
        slot: u32,
    },
}

impl Variable {
    /// Local variable
    pub fn local(name: &str, depth: u32, slot: u32) -> Self {
        Variable::Local {
            name: Symbol::intern(name),
            depth,
            slot,
        }
    }
}

/// Branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Value source read by an instruction
#[derive(Clone)]
pub enum Operand {
    /// Constant
    Literal(Literal),
    /// Temporary or local
    Variable(Variable),
    /// Branch target, used by flat instruction forms
    Label(Label),
    /// The activation's `self`
    SelfRef,
    /// The frame's lexical module
    CurrentModule,
    /// Spread marker around an array-valued operand
    Splat(Box<Operand>),
    /// Array built from its elements on every retrieval
    Array(Vec<Operand>),
    /// Closure literal; retrieval materializes a `Block`
    Closure(Arc<IrUnit>),
}

impl Operand {
    /// Integer literal
    pub fn fixnum(n: i64) -> Self {
        Operand::Literal(Literal::Fixnum(n))
    }

    /// String literal
    pub fn string(s: &str) -> Self {
        Operand::Literal(Literal::string(s))
    }

    /// Symbol literal
    pub fn symbol(name: &str) -> Self {
        Operand::Literal(Literal::Symbol(Symbol::intern(name)))
    }

    /// `nil` literal
    pub fn nil() -> Self {
        Operand::Literal(Literal::Nil)
    }

    /// Temporary with the given id
    pub fn temp(id: u32) -> Self {
        Operand::Variable(Variable::Temp(id))
    }

    /// Read the operand's current value
    pub fn retrieve(&self, ctx: &ThreadContext, state: &InterpreterState<'_>) -> ExecResult {
        match self {
            Operand::Literal(lit) => Ok(lit.to_value()),
            Operand::Variable(var) => Ok(state.get(var)?),
            Operand::SelfRef => Ok(state.self_value.clone()),
            Operand::CurrentModule => Ok(Value::Module(ctx.frame().lexical_module.clone())),
            Operand::Splat(inner) => inner.retrieve(ctx, state),
            Operand::Array(elements) => {
                let values = elements
                    .iter()
                    .map(|e| e.retrieve(ctx, state))
                    .collect::<ExecResult<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            Operand::Closure(unit) => Ok(Value::Proc(Block::capture(
                ctx,
                unit.clone(),
                state.scope.clone(),
            ))),
            Operand::Label(label) => {
                Err(EngineError::MalformedIr(format!("label {} read as a value", label)).into())
            }
        }
    }

    /// Literals are the only operands whose retrieval can be memoized
    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Literal(_))
    }

    /// Whether the operand is spread into the argument list
    pub fn is_splat(&self) -> bool {
        matches!(self, Operand::Splat(_))
    }

    /// Integer value of an integer literal
    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Operand::Literal(Literal::Fixnum(n)) => Some(*n),
            _ => None,
        }
    }

    /// Variable read by the operand
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Operand::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Replace variables found in `map`
    ///
    /// Without `force`, only replacements by literals or `self` are applied.
    /// Chains (`a -> b -> 5`) resolve fully, so a second application with the
    /// same map changes nothing. Returns whether anything was replaced.
    pub fn simplify(&mut self, map: &ValueMap, force: bool) -> bool {
        match self {
            Operand::Variable(var) => match resolve(map, var) {
                Some(replacement)
                    if force || replacement.is_constant() || matches!(replacement, Operand::SelfRef) =>
                {
                    *self = replacement;
                    true
                }
                _ => false,
            },
            Operand::Splat(inner) => inner.simplify(map, force),
            Operand::Array(elements) => elements
                .iter_mut()
                .fold(false, |changed, e| e.simplify(map, force) | changed),
            _ => false,
        }
    }
}

/// Follow a replacement chain to an atomic operand; `None` on a cycle or a
/// compound replacement
fn resolve(map: &ValueMap, var: &Variable) -> Option<Operand> {
    let mut current = map.get(var)?;
    for _ in 0..=map.len() {
        match current {
            Operand::Variable(next) => match map.get(next) {
                Some(op) => current = op,
                None => return Some(current.clone()),
            },
            Operand::Literal(_) | Operand::SelfRef | Operand::CurrentModule => {
                return Some(current.clone())
            }
            _ => return None,
        }
    }
    None
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Literal(a), Operand::Literal(b)) => a == b,
            (Operand::Variable(a), Operand::Variable(b)) => a == b,
            (Operand::Label(a), Operand::Label(b)) => a == b,
            (Operand::SelfRef, Operand::SelfRef) => true,
            (Operand::CurrentModule, Operand::CurrentModule) => true,
            (Operand::Splat(a), Operand::Splat(b)) => a == b,
            (Operand::Array(a), Operand::Array(b)) => a == b,
            (Operand::Closure(a), Operand::Closure(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Variable(v)
    }
}

impl From<Literal> for Operand {
    fn from(l: Literal) -> Self {
        Operand::Literal(l)
    }
}

impl CloneForInlining for Variable {
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        ctx.rename_variable(self)
    }
}

impl CloneForInlining for Label {
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        ctx.rename_label(*self)
    }
}

impl CloneForInlining for Operand {
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self {
        match self {
            Operand::Variable(v) => Operand::Variable(v.clone_for_inlining(ctx)),
            Operand::Label(l) => Operand::Label(l.clone_for_inlining(ctx)),
            Operand::Splat(inner) => Operand::Splat(Box::new(inner.clone_for_inlining(ctx))),
            Operand::Array(elements) => {
                Operand::Array(elements.iter().map(|e| e.clone_for_inlining(ctx)).collect())
            }
            // Literals, self and closures are shared with the original
            other => other.clone(),
        }
    }
}
