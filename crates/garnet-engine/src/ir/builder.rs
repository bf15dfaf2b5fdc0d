//! IR construction helper
//!
//! Hands out temporaries, labels and local slots and collects instructions
//! into an `IrUnit`.

use super::call::CallType;
use super::instr::{BranchKind, Instr};
use super::operand::{Label, Operand, Variable};
use super::unit::{IrUnit, UnitKind};
use crate::error::EngineError;
use crate::runtime::{Arity, Symbol};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Incremental unit construction with fresh temporaries and labels
pub struct IrBuilder {
    name: String,
    kind: UnitKind,
    arity: Arity,
    instrs: Vec<Instr>,
    next_temp: u32,
    next_label: u32,
    locals: FxHashMap<Symbol, u32>,
}

impl IrBuilder {
    /// Builder for a unit of any kind
    pub fn new(name: &str, kind: UnitKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            arity: Arity::fixed(0),
            instrs: Vec::new(),
            next_temp: 0,
            next_label: 0,
            locals: FxHashMap::default(),
        }
    }

    /// Builder for a method body
    pub fn method(name: &str, arity: Arity) -> Self {
        let mut b = Self::new(name, UnitKind::Method);
        b.arity = arity;
        b
    }

    /// Builder for a block body
    pub fn closure(name: &str, arity: Arity) -> Self {
        let mut b = Self::new(name, UnitKind::Closure);
        b.arity = arity;
        b
    }

    /// Builder for a top-level script
    pub fn script(name: &str) -> Self {
        Self::new(name, UnitKind::Script)
    }

    /// Fresh temporary
    pub fn temp(&mut self) -> Variable {
        let v = Variable::Temp(self.next_temp);
        self.next_temp += 1;
        v
    }

    /// Fresh label, placed later with `mark`
    pub fn label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Local of this unit's own scope; the same name always maps to the same slot
    pub fn local(&mut self, name: &str) -> Variable {
        let sym = Symbol::intern(name);
        let next = self.locals.len() as u32;
        let slot = *self.locals.entry(sym).or_insert(next);
        Variable::Local {
            name: sym,
            depth: 0,
            slot,
        }
    }

    /// Append any instruction
    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        self.instrs.push(instr);
        self
    }

    /// Place `label` at the current position
    pub fn mark(&mut self, label: Label) -> &mut Self {
        self.emit(Instr::Label(label))
    }

    /// `result = value`
    pub fn copy(&mut self, result: &Variable, value: impl Into<Operand>) -> &mut Self {
        self.emit(Instr::copy(result.clone(), value))
    }

    /// Unconditional jump
    pub fn jump(&mut self, target: Label) -> &mut Self {
        self.emit(Instr::Jump(target))
    }

    /// Conditional jump
    pub fn branch(&mut self, kind: BranchKind, value: impl Into<Operand>, target: Label) -> &mut Self {
        self.emit(Instr::branch(kind, value.into(), target))
    }

    /// Emit a call and return the temporary holding its value
    pub fn call(
        &mut self,
        call_type: CallType,
        name: &str,
        receiver: Operand,
        args: Vec<Operand>,
        closure: Option<Operand>,
    ) -> Variable {
        let result = self.temp();
        self.emit(Instr::call(
            Some(result.clone()),
            call_type,
            name,
            receiver,
            args,
            closure,
        ));
        result
    }

    /// Return `value`
    pub fn ret(&mut self, value: impl Into<Operand>) -> &mut Self {
        self.emit(Instr::Return(value.into()))
    }

    /// Validate and build the unit
    pub fn finish(self) -> Result<IrUnit, EngineError> {
        IrUnit::new(
            &self.name,
            self.kind,
            self.arity,
            self.locals.len() as u32,
            self.instrs,
        )
    }

    /// `finish`, shared
    pub fn finish_arc(self) -> Result<Arc<IrUnit>, EngineError> {
        self.finish().map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_reuse_slots() {
        let mut b = IrBuilder::script("main");
        let x1 = b.local("x");
        let y = b.local("y");
        let x2 = b.local("x");
        assert_eq!(x1, x2);
        assert_ne!(x1, y);
        b.ret(Operand::nil());
        let unit = b.finish().unwrap();
        assert_eq!(unit.local_count(), 2);
    }

    #[test]
    fn test_fresh_temps_and_labels() {
        let mut b = IrBuilder::script("main");
        assert_ne!(b.temp(), b.temp());
        assert_ne!(b.label(), b.label());
    }
}
