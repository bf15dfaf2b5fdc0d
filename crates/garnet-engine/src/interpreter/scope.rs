//! Dynamic scopes
//!
//! A `DynamicScope` holds the local variable slots of one method or block
//! activation. Blocks get a child scope whose parent is the scope they were
//! created in, so captured variables are addressed by `(depth, slot)`.
//!
//! Scopes are shared: a block that escapes keeps its parent scope alive, and
//! a block passed to another thread may write captured variables, hence the
//! lock around the slots.

use crate::runtime::Value;
use parking_lot::Mutex;
use std::sync::Arc;

struct ScopeInner {
    slots: Mutex<Vec<Option<Value>>>,
    parent: Option<DynamicScope>,
}

/// Local variable storage for one activation
#[derive(Clone)]
pub struct DynamicScope(Arc<ScopeInner>);

impl DynamicScope {
    /// Scope with `size` unwritten slots
    pub fn new(size: usize, parent: Option<DynamicScope>) -> Self {
        Self(Arc::new(ScopeInner {
            slots: Mutex::new(vec![None; size]),
            parent,
        }))
    }

    /// Top-level scope with no parent
    pub fn root(size: usize) -> Self {
        Self::new(size, None)
    }

    /// Enclosing scope
    pub fn parent(&self) -> Option<&DynamicScope> {
        self.0.parent.as_ref()
    }

    fn at_depth(&self, depth: u32) -> Option<&DynamicScope> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.0.parent.as_ref()?;
        }
        Some(scope)
    }

    /// Read a slot; `None` if the slot was never written or does not exist
    pub fn get(&self, depth: u32, slot: u32) -> Option<Value> {
        let scope = self.at_depth(depth)?;
        let slots = scope.0.slots.lock();
        slots.get(slot as usize).cloned().flatten()
    }

    /// Write a slot, growing the scope if needed. Returns false if `depth`
    /// walks past the outermost scope.
    pub fn set(&self, depth: u32, slot: u32, value: Value) -> bool {
        let Some(scope) = self.at_depth(depth) else {
            return false;
        };
        let mut slots = scope.0.slots.lock();
        let index = slot as usize;
        if index >= slots.len() {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(value);
        true
    }

    /// Number of slots at depth 0
    pub fn len(&self) -> usize {
        self.0.slots.lock().len()
    }

    /// Whether the scope has no slots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same scope object
    pub fn ptr_eq(&self, other: &DynamicScope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for DynamicScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut depth = 0;
        let mut scope = self.parent();
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent();
        }
        f.debug_struct("DynamicScope")
            .field("slots", &self.len())
            .field("depth", &depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_slot_is_none() {
        let scope = DynamicScope::root(2);
        assert_eq!(scope.get(0, 0), None);
        assert_eq!(scope.get(0, 9), None);
    }

    #[test]
    fn test_parent_access() {
        let outer = DynamicScope::root(1);
        outer.set(0, 0, Value::Fixnum(10));
        let inner = DynamicScope::new(1, Some(outer.clone()));
        assert_eq!(inner.get(1, 0), Some(Value::Fixnum(10)));
        assert!(inner.set(1, 0, Value::Fixnum(11)));
        assert_eq!(outer.get(0, 0), Some(Value::Fixnum(11)));
        assert!(!inner.set(2, 0, Value::Nil));
        assert_eq!(inner.get(2, 0), None);
    }

    #[test]
    fn test_set_grows() {
        let scope = DynamicScope::root(0);
        assert!(scope.set(0, 3, Value::Bool(true)));
        assert_eq!(scope.len(), 4);
        assert_eq!(scope.get(0, 3), Some(Value::Bool(true)));
    }
}
