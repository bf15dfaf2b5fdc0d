//! Clone-for-inlining
//!
//! Copying a unit's instructions into a host unit needs fresh variables and
//! labels so the copy cannot collide with the host. An `InlineAllocator`
//! hands out ids above everything the host already uses; each
//! `InlineCloneContext` memoizes its renames so one inlining is internally
//! consistent while two inlinings of the same code never share a variable.

use super::operand::{Label, Variable};
use rustc_hash::FxHashMap;

/// Produce a copy of `self` with variables and labels renamed through `ctx`
pub trait CloneForInlining {
    /// Renamed copy
    fn clone_for_inlining(&self, ctx: &mut InlineCloneContext<'_>) -> Self;
}

/// Fresh id source for one host unit
#[derive(Debug, Clone)]
pub struct InlineAllocator {
    next_temp: u32,
    next_label: u32,
}

impl InlineAllocator {
    /// Start allocating at `first_temp` / `first_label`
    pub fn new(first_temp: u32, first_label: u32) -> Self {
        Self {
            next_temp: first_temp,
            next_label: first_label,
        }
    }

    /// Start a new inlining
    pub fn context(&mut self) -> InlineCloneContext<'_> {
        InlineCloneContext {
            allocator: self,
            variables: FxHashMap::default(),
            labels: FxHashMap::default(),
        }
    }

    /// Next temporary id handed out
    pub fn temps_used(&self) -> u32 {
        self.next_temp
    }

    /// Next label id handed out
    pub fn labels_used(&self) -> u32 {
        self.next_label
    }
}

/// Renaming state for one inlining
pub struct InlineCloneContext<'a> {
    allocator: &'a mut InlineAllocator,
    variables: FxHashMap<Variable, Variable>,
    labels: FxHashMap<Label, Label>,
}

impl InlineCloneContext<'_> {
    /// Temporaries and own-scope locals of the inlined code become host
    /// temporaries. Locals captured from an enclosing scope keep addressing
    /// that scope, as do the closures that share them.
    pub fn rename_variable(&mut self, var: &Variable) -> Variable {
        if let Variable::Local { depth, .. } = var {
            if *depth > 0 {
                return var.clone();
            }
        }
        if let Some(renamed) = self.variables.get(var) {
            return renamed.clone();
        }
        let renamed = Variable::Temp(self.allocator.next_temp);
        self.allocator.next_temp += 1;
        self.variables.insert(var.clone(), renamed.clone());
        renamed
    }

    /// Fresh label for `label`, memoized
    pub fn rename_label(&mut self, label: Label) -> Label {
        if let Some(renamed) = self.labels.get(&label) {
            return *renamed;
        }
        let renamed = Label(self.allocator.next_label);
        self.allocator.next_label += 1;
        self.labels.insert(label, renamed);
        renamed
    }
}
