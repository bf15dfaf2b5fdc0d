//! Heap objects
//!
//! An `RObject` is an instance of a class with an instance-variable table.
//! The nominal class never changes; a singleton class may be attached later
//! and, once present, takes over method dispatch for that one object.

use super::module::ModuleRef;
use super::symbol::Symbol;
use super::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared reference to an object
pub type ObjectRef = Arc<RObject>;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique id for an object or module
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Instance of a class
pub struct RObject {
    id: u64,
    class: ModuleRef,
    singleton: RwLock<Option<ModuleRef>>,
    ivars: RwLock<FxHashMap<Symbol, Value>>,
}

impl RObject {
    /// Allocate an empty instance of `class`
    pub fn new(class: ModuleRef) -> ObjectRef {
        Arc::new(Self {
            id: next_object_id(),
            class,
            singleton: RwLock::new(None),
            ivars: RwLock::new(FxHashMap::default()),
        })
    }

    /// Identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Nominal class (never a singleton)
    pub fn class(&self) -> ModuleRef {
        self.class.clone()
    }

    /// Singleton class, if one has been created
    pub fn singleton_class(&self) -> Option<ModuleRef> {
        self.singleton.read().clone()
    }

    /// Return the singleton class, creating it with `init` under the slot lock
    pub(crate) fn singleton_or_init(&self, init: impl FnOnce() -> ModuleRef) -> ModuleRef {
        let mut slot = self.singleton.write();
        if let Some(singleton) = slot.as_ref() {
            return singleton.clone();
        }
        let singleton = init();
        *slot = Some(singleton.clone());
        singleton
    }

    /// Class where method lookup starts
    pub fn dispatch_class(&self) -> ModuleRef {
        match &*self.singleton.read() {
            Some(singleton) => singleton.clone(),
            None => self.class.clone(),
        }
    }

    /// Instance variable, if set
    pub fn ivar_get(&self, name: Symbol) -> Option<Value> {
        self.ivars.read().get(&name).cloned()
    }

    /// Set an instance variable
    pub fn ivar_set(&self, name: Symbol, value: Value) {
        self.ivars.write().insert(name, value);
    }

    /// Whether the instance variable is set
    pub fn ivar_defined(&self, name: Symbol) -> bool {
        self.ivars.read().contains_key(&name)
    }

    /// Names of all instance variables currently set
    pub fn ivar_names(&self) -> Vec<Symbol> {
        self.ivars.read().keys().copied().collect()
    }
}

impl std::fmt::Debug for RObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RObject")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .finish()
    }
}
