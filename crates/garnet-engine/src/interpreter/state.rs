//! Per-activation interpreter state

use super::block::Block;
use super::scope::DynamicScope;
use crate::error::EngineError;
use crate::ir::{IrUnit, Variable};
use crate::runtime::Value;

/// Registers of one IR activation: self, temporaries, scope, args and block
pub struct InterpreterState<'a> {
    /// `self` of the activation
    pub self_value: Value,
    /// Local variable scope (depth 0)
    pub scope: DynamicScope,
    temps: Vec<Option<Value>>,
    /// Arguments the activation was called with
    pub args: &'a [Value],
    /// Block passed to the activation
    pub block: Option<Block>,
}

impl<'a> InterpreterState<'a> {
    /// State for one activation of `unit`
    pub fn new(
        unit: &IrUnit,
        self_value: Value,
        scope: DynamicScope,
        args: &'a [Value],
        block: Option<Block>,
    ) -> Self {
        Self {
            self_value,
            scope,
            temps: vec![None; unit.temp_count() as usize],
            args,
            block,
        }
    }

    /// Current value of `var`
    pub fn get(&self, var: &Variable) -> Result<Value, EngineError> {
        let value = match var {
            Variable::Temp(id) => self.temps.get(*id as usize).cloned().flatten(),
            Variable::Local { depth, slot, .. } => self.scope.get(*depth, *slot),
        };
        value.ok_or_else(|| EngineError::UnboundVariable(var.to_string()))
    }

    /// Write `value` into `var`'s cell
    pub fn set(&mut self, var: &Variable, value: Value) -> Result<(), EngineError> {
        match var {
            Variable::Temp(id) => {
                let index = *id as usize;
                if index >= self.temps.len() {
                    self.temps.resize(index + 1, None);
                }
                self.temps[index] = Some(value);
                Ok(())
            }
            Variable::Local { depth, slot, .. } => {
                if self.scope.set(*depth, *slot, value) {
                    Ok(())
                } else {
                    Err(EngineError::UnboundVariable(var.to_string()))
                }
            }
        }
    }
}
