//! Global variable table

use super::symbol::Symbol;
use super::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// `$name` variables shared by every thread of a runtime
#[derive(Debug, Default)]
pub struct GlobalTable {
    vars: RwLock<FxHashMap<Symbol, Value>>,
}

impl GlobalTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Unassigned globals read as nil
    pub fn get(&self, name: Symbol) -> Value {
        self.vars.read().get(&name).cloned().unwrap_or(Value::Nil)
    }

    /// Assign a global
    pub fn set(&self, name: Symbol, value: Value) {
        self.vars.write().insert(name, value);
    }

    /// A global is defined once it has been assigned
    pub fn is_defined(&self, name: Symbol) -> bool {
        self.vars.read().contains_key(&name)
    }
}
