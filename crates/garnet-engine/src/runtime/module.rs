//! Classes, modules and singleton classes
//!
//! `RModule` carries the method table, constant table, class-variable table
//! and module-level instance variables. Method resolution walks the
//! ancestor chain: the module itself, its included modules (most recent
//! first), then the superclass chain.
//!
//! Every method-table change bumps the runtime-wide `MethodSerial`, which is
//! what inline caches validate against.

use super::assumption::Assumption;
use super::method::{Method, Visibility};
use super::object::{next_object_id, RObject};
use super::symbol::Symbol;
use super::value::Value;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared reference to a module
pub type ModuleRef = Arc<RModule>;

/// Runtime-wide counter bumped on every method table change
#[derive(Debug, Clone, Default)]
pub struct MethodSerial(Arc<AtomicU64>);

impl MethodSerial {
    /// Serial starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    #[inline]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the serial, returning the new value
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// What sort of module this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Instantiable class
    Class,
    /// Mixin module
    Module,
    /// Singleton class attached to one object or module
    Singleton,
}

/// Owner of a singleton class
#[derive(Debug, Clone)]
pub enum Attached {
    /// Singleton (metaclass) of a class or module
    Module(Weak<RModule>),
    /// Singleton of an ordinary object
    Object(Weak<RObject>),
}

/// Entry in a constant table
#[derive(Debug, Clone)]
pub struct ConstEntry {
    /// Constant value
    pub value: Value,
    /// Private constants are invisible to qualified (`A::B`) lookup
    pub private: bool,
}

/// A method found by resolution, together with the module that defines it
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    /// The method entry
    pub method: Arc<Method>,
    /// Module whose table holds the entry
    pub owner: ModuleRef,
}

impl ResolvedMethod {
    /// Visibility of the entry
    pub fn visibility(&self) -> Visibility {
        self.method.visibility
    }
}

/// Class, module or singleton class
pub struct RModule {
    id: u64,
    name: Arc<str>,
    kind: ModuleKind,
    superclass: RwLock<Option<ModuleRef>>,
    lexical_parent: Option<ModuleRef>,
    includes: RwLock<Vec<ModuleRef>>,
    methods: RwLock<FxHashMap<Symbol, Arc<Method>>>,
    constants: RwLock<FxHashMap<Symbol, ConstEntry>>,
    class_vars: RwLock<FxHashMap<Symbol, Value>>,
    ivars: RwLock<FxHashMap<Symbol, Value>>,
    attached: RwLock<Option<Attached>>,
    metaclass: RwLock<Option<ModuleRef>>,
    redefinition_watch: RwLock<Option<Assumption>>,
    serial: MethodSerial,
}

impl RModule {
    /// Create a module. Callers normally go through `Runtime::define_class`
    /// or `Runtime::define_module` so the constant gets registered too.
    pub fn new(
        name: &str,
        kind: ModuleKind,
        superclass: Option<ModuleRef>,
        lexical_parent: Option<ModuleRef>,
        serial: MethodSerial,
    ) -> ModuleRef {
        Arc::new(Self {
            id: next_object_id(),
            name: Arc::from(name),
            kind,
            superclass: RwLock::new(superclass),
            lexical_parent,
            includes: RwLock::new(Vec::new()),
            methods: RwLock::new(FxHashMap::default()),
            constants: RwLock::new(FxHashMap::default()),
            class_vars: RwLock::new(FxHashMap::default()),
            ivars: RwLock::new(FxHashMap::default()),
            attached: RwLock::new(None),
            metaclass: RwLock::new(None),
            redefinition_watch: RwLock::new(None),
            serial,
        })
    }

    /// Identity used by inline caches
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Module name
    pub fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Class, module or singleton
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Whether this is a singleton class
    pub fn is_singleton(&self) -> bool {
        self.kind == ModuleKind::Singleton
    }

    /// Classes and singleton classes; not plain modules
    pub fn is_class(&self) -> bool {
        self.kind != ModuleKind::Module
    }

    /// Superclass, if any
    pub fn superclass(&self) -> Option<ModuleRef> {
        self.superclass.read().clone()
    }

    /// Module this one was defined in
    pub fn lexical_parent(&self) -> Option<&ModuleRef> {
        self.lexical_parent.as_ref()
    }

    /// Mix `module` into this module's ancestor chain
    pub fn include(&self, module: ModuleRef) {
        let mut includes = self.includes.write();
        if !includes.iter().any(|m| Arc::ptr_eq(m, &module)) {
            includes.push(module);
        }
        drop(includes);
        self.method_table_changed();
    }

    /// Lookup order used by method and constant resolution
    pub fn ancestors(self: &Arc<Self>) -> Vec<ModuleRef> {
        let mut out: Vec<ModuleRef> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(module) = current {
            push_unique(&mut out, &module);
            for included in module.includes.read().iter().rev() {
                push_with_includes(&mut out, included);
            }
            current = module.superclass();
        }
        out
    }

    /// True if `other` appears in this module's ancestors
    pub fn inherits_from(self: &Arc<Self>, other: &ModuleRef) -> bool {
        self.ancestors().iter().any(|m| Arc::ptr_eq(m, other))
    }

    // ========================================================================
    // Methods
    // ========================================================================

    /// Add or replace a method, invalidating inline caches
    pub fn define_method(&self, method: Method) -> Arc<Method> {
        let name = method.name;
        let method = Arc::new(method);
        self.methods.write().insert(name, method.clone());
        debug!("defined {}#{}", self.name, name);
        self.method_table_changed();
        method
    }

    /// Change the visibility of an existing method in this table
    pub fn set_visibility(&self, name: Symbol, visibility: Visibility) -> bool {
        let mut methods = self.methods.write();
        let Some(existing) = methods.get(&name) else {
            return false;
        };
        let updated = Arc::new(existing.with_visibility(visibility));
        methods.insert(name, updated);
        drop(methods);
        self.method_table_changed();
        true
    }

    /// Method defined directly in this module's table
    pub fn local_method(&self, name: Symbol) -> Option<Arc<Method>> {
        self.methods.read().get(&name).cloned()
    }

    /// Resolve `name` along the ancestor chain
    pub fn resolve_method(self: &Arc<Self>, name: Symbol) -> Option<ResolvedMethod> {
        self.ancestors().into_iter().find_map(|owner| {
            owner
                .local_method(name)
                .map(|method| ResolvedMethod { method, owner })
        })
    }

    /// Resolve `name` starting strictly after `after` in this module's
    /// ancestors (the lookup `super` performs)
    pub fn resolve_method_after(
        self: &Arc<Self>,
        after: &ModuleRef,
        name: Symbol,
    ) -> Option<ResolvedMethod> {
        let ancestors = self.ancestors();
        let start = ancestors.iter().position(|m| Arc::ptr_eq(m, after))? + 1;
        ancestors[start..].iter().find_map(|owner| {
            owner.local_method(name).map(|method| ResolvedMethod {
                method,
                owner: owner.clone(),
            })
        })
    }

    /// Invalidate `assumption` the next time this module's methods change
    pub fn watch_redefinition(&self, assumption: Assumption) {
        *self.redefinition_watch.write() = Some(assumption);
    }

    fn method_table_changed(&self) {
        self.serial.bump();
        if let Some(watch) = self.redefinition_watch.read().as_ref() {
            watch.invalidate();
        }
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Define or replace a constant
    pub fn const_set(&self, name: Symbol, value: Value) {
        let mut constants = self.constants.write();
        let private = constants.get(&name).map(|c| c.private).unwrap_or(false);
        constants.insert(name, ConstEntry { value, private });
    }

    /// Mark an existing constant private; returns false if it is not defined here
    pub fn private_constant(&self, name: Symbol) -> bool {
        match self.constants.write().get_mut(&name) {
            Some(entry) => {
                entry.private = true;
                true
            }
            None => false,
        }
    }

    /// Constant in this module's own table
    pub fn const_get_local(&self, name: Symbol) -> Option<ConstEntry> {
        self.constants.read().get(&name).cloned()
    }

    /// Search the ancestors for a constant
    pub fn const_get_inherited(self: &Arc<Self>, name: Symbol) -> Option<ConstEntry> {
        self.ancestors()
            .iter()
            .find_map(|module| module.const_get_local(name))
    }

    // ========================================================================
    // Class variables
    // ========================================================================

    /// True if any ancestor defines the class variable
    pub fn class_var_defined(self: &Arc<Self>, name: Symbol) -> bool {
        self.ancestors()
            .iter()
            .any(|module| module.class_vars.read().contains_key(&name))
    }

    /// Class variable from this module or its ancestors
    pub fn class_var_get(self: &Arc<Self>, name: Symbol) -> Option<Value> {
        self.ancestors()
            .iter()
            .find_map(|module| module.class_vars.read().get(&name).cloned())
    }

    /// Assign to the ancestor that already holds the variable, else define it here
    pub fn class_var_set(self: &Arc<Self>, name: Symbol, value: Value) {
        for module in self.ancestors() {
            let mut vars = module.class_vars.write();
            if let Some(slot) = vars.get_mut(&name) {
                *slot = value;
                return;
            }
        }
        self.class_vars.write().insert(name, value);
    }

    // ========================================================================
    // Module-level instance variables
    // ========================================================================

    /// Instance variable of the module object
    pub fn ivar_get(&self, name: Symbol) -> Option<Value> {
        self.ivars.read().get(&name).cloned()
    }

    /// Set an instance variable of the module object
    pub fn ivar_set(&self, name: Symbol, value: Value) {
        self.ivars.write().insert(name, value);
    }

    /// Whether the module object has the instance variable
    pub fn ivar_defined(&self, name: Symbol) -> bool {
        self.ivars.read().contains_key(&name)
    }

    // ========================================================================
    // Singletons
    // ========================================================================

    /// Owner of this singleton class, if it is one and the owner is alive
    pub fn attached(&self) -> Option<Value> {
        match self.attached.read().as_ref()? {
            Attached::Module(m) => m.upgrade().map(Value::Module),
            Attached::Object(o) => o.upgrade().map(Value::Object),
        }
    }

    pub(crate) fn set_attached(&self, attached: Attached) {
        *self.attached.write() = Some(attached);
    }

    /// This module's singleton class, if created
    pub fn metaclass(&self) -> Option<ModuleRef> {
        self.metaclass.read().clone()
    }

    /// Return the singleton class, creating it with `init` under the slot lock
    pub(crate) fn metaclass_or_init(&self, init: impl FnOnce() -> ModuleRef) -> ModuleRef {
        let mut slot = self.metaclass.write();
        if let Some(meta) = slot.as_ref() {
            return meta.clone();
        }
        let meta = init();
        *slot = Some(meta.clone());
        meta
    }
}

fn push_unique(out: &mut Vec<ModuleRef>, module: &ModuleRef) -> bool {
    if out.iter().any(|m| Arc::ptr_eq(m, module)) {
        return false;
    }
    out.push(module.clone());
    true
}

fn push_with_includes(out: &mut Vec<ModuleRef>, module: &ModuleRef) {
    if push_unique(out, module) {
        for nested in module.includes.read().iter().rev() {
            push_with_includes(out, nested);
        }
    }
}

impl std::fmt::Debug for RModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RModule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
