//! Interned symbols
//!
//! Method names, variable names and constant names are all symbols. Interning
//! is process-wide so two runtimes agree on symbol identity; persisted IR
//! stores the spelled-out name, never the id.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// An interned name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

#[derive(Default)]
struct SymbolTable {
    names: Vec<Arc<str>>,
    ids: FxHashMap<Arc<str>, u32>,
}

static SYMBOLS: Lazy<RwLock<SymbolTable>> = Lazy::new(|| RwLock::new(SymbolTable::default()));

impl Symbol {
    /// Intern `name`, returning the existing symbol if it was seen before
    pub fn intern(name: &str) -> Symbol {
        if let Some(&id) = SYMBOLS.read().ids.get(name) {
            return Symbol(id);
        }

        let mut table = SYMBOLS.write();
        // Another thread may have won the race between the two locks
        if let Some(&id) = table.ids.get(name) {
            return Symbol(id);
        }
        let id = table.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        table.names.push(name.clone());
        table.ids.insert(name, id);
        Symbol(id)
    }

    /// The symbol's spelling
    pub fn as_str(&self) -> Arc<str> {
        SYMBOLS.read().names[self.0 as usize].clone()
    }

    /// Raw id (stable only within one process)
    pub fn id(&self) -> u32 {
        self.0
    }

    /// True for `@name`
    pub fn is_instance_var_name(&self) -> bool {
        let name = self.as_str();
        name.starts_with('@') && !name.starts_with("@@")
    }

    /// True for `@@name`
    pub fn is_class_var_name(&self) -> bool {
        self.as_str().starts_with("@@")
    }

    /// True for `$name`
    pub fn is_global_name(&self) -> bool {
        self.as_str().starts_with('$')
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::intern(name)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}
