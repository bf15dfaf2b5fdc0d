//! The shared runtime
//!
//! One `Runtime` is shared (via `Arc`) by every thread executing code against
//! it. It owns the class hierarchy, the global table, the method serial and
//! the numeric-operator assumption. Per-thread state lives in
//! `ThreadContext`, never here.

use super::assumption::Assumption;
use super::builtins;
use super::globals::GlobalTable;
use super::module::{Attached, MethodSerial, ModuleKind, ModuleRef, RModule};
use super::object::RObject;
use super::symbol::Symbol;
use super::value::Value;
use crate::config::EngineConfig;
use crate::error::HostError;
use crate::signal::{Escape, RaiseException};
use std::sync::Arc;

/// Classes the engine itself needs to name
#[derive(Debug, Clone)]
pub struct CoreClasses {
    /// `BasicObject`
    pub basic_object: ModuleRef,
    /// `Object`
    pub object: ModuleRef,
    /// `Module`
    pub module: ModuleRef,
    /// `Class`
    pub class: ModuleRef,
    /// `Kernel`
    pub kernel: ModuleRef,
    /// `NilClass`
    pub nil_class: ModuleRef,
    /// `TrueClass`
    pub true_class: ModuleRef,
    /// `FalseClass`
    pub false_class: ModuleRef,
    /// `Integer`
    pub integer: ModuleRef,
    /// `Float`
    pub float: ModuleRef,
    /// `String`
    pub string: ModuleRef,
    /// `Symbol`
    pub symbol: ModuleRef,
    /// `Array`
    pub array: ModuleRef,
    /// `Proc`
    pub proc_class: ModuleRef,
    /// `MatchData`
    pub match_data: ModuleRef,
    /// `Exception`
    pub exception: ModuleRef,
    /// `StandardError`
    pub standard_error: ModuleRef,
    /// `RuntimeError`
    pub runtime_error: ModuleRef,
    /// `NameError`
    pub name_error: ModuleRef,
    /// `NoMethodError`
    pub no_method_error: ModuleRef,
    /// `ArgumentError`
    pub argument_error: ModuleRef,
    /// `UncaughtThrowError`
    pub uncaught_throw_error: ModuleRef,
    /// `LocalJumpError`
    pub local_jump_error: ModuleRef,
    /// `RangeError`
    pub range_error: ModuleRef,
    /// `TypeError`
    pub type_error: ModuleRef,
    /// `ZeroDivisionError`
    pub zero_division_error: ModuleRef,
    /// `SystemStackError`
    pub system_stack_error: ModuleRef,
}

/// Shared object-model state
pub struct Runtime {
    config: EngineConfig,
    serial: MethodSerial,
    numeric_ops: Assumption,
    globals: GlobalTable,
    core: CoreClasses,
    main: Value,
}

impl Runtime {
    /// Runtime with the default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Runtime with explicit settings
    pub fn with_config(config: EngineConfig) -> Arc<Self> {
        let serial = MethodSerial::new();
        let core = bootstrap(&serial);
        let main = Value::Object(RObject::new(core.object.clone()));

        let runtime = Self {
            config,
            serial,
            numeric_ops: Assumption::new("numeric operators unchanged"),
            globals: GlobalTable::new(),
            core,
            main,
        };
        builtins::install(&runtime);
        runtime
            .core
            .integer
            .watch_redefinition(runtime.numeric_ops.clone());
        runtime
            .core
            .float
            .watch_redefinition(runtime.numeric_ops.clone());
        Arc::new(runtime)
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Serial bumped on every method table change
    pub fn method_serial(&self) -> &MethodSerial {
        &self.serial
    }

    /// Holds while no `Integer` or `Float` method has been redefined
    pub fn numeric_ops(&self) -> &Assumption {
        &self.numeric_ops
    }

    /// Global variables
    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    /// Bootstrapped core classes
    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    /// The top-level `self`
    pub fn main_object(&self) -> &Value {
        &self.main
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Define a top-level class (superclass defaults to `Object`)
    pub fn define_class(&self, name: &str, superclass: Option<&ModuleRef>) -> ModuleRef {
        self.define_class_under(&self.core.object, name, superclass)
    }

    /// Define a class as a constant of `parent`
    pub fn define_class_under(
        &self,
        parent: &ModuleRef,
        name: &str,
        superclass: Option<&ModuleRef>,
    ) -> ModuleRef {
        let superclass = superclass.unwrap_or(&self.core.object).clone();
        let lexical_parent = if Arc::ptr_eq(parent, &self.core.object) {
            None
        } else {
            Some(parent.clone())
        };
        let class = RModule::new(
            name,
            ModuleKind::Class,
            Some(superclass),
            lexical_parent,
            self.serial.clone(),
        );
        parent.const_set(Symbol::intern(name), Value::Module(class.clone()));
        class
    }

    /// Define a top-level mixin module
    pub fn define_module(&self, name: &str) -> ModuleRef {
        let module = RModule::new(name, ModuleKind::Module, None, None, self.serial.clone());
        self.core
            .object
            .const_set(Symbol::intern(name), Value::Module(module.clone()));
        module
    }

    // ========================================================================
    // Class queries
    // ========================================================================

    /// Class where method lookup for `value` starts
    pub fn class_of(&self, value: &Value) -> ModuleRef {
        match value {
            Value::Nil => self.core.nil_class.clone(),
            Value::Bool(true) => self.core.true_class.clone(),
            Value::Bool(false) => self.core.false_class.clone(),
            Value::Fixnum(_) => self.core.integer.clone(),
            Value::Float(_) => self.core.float.clone(),
            Value::Symbol(_) => self.core.symbol.clone(),
            Value::Str(_) => self.core.string.clone(),
            Value::Array(_) => self.core.array.clone(),
            Value::Object(obj) => obj.dispatch_class(),
            Value::Module(module) => {
                if let Some(meta) = module.metaclass() {
                    meta
                } else if module.is_class() {
                    self.metaclass_of(module)
                } else {
                    self.core.module.clone()
                }
            }
            Value::MatchData(_) => self.core.match_data.clone(),
            Value::Proc(_) => self.core.proc_class.clone(),
        }
    }

    /// Class reported by `obj.class` (skips singletons)
    pub fn nominal_class_of(&self, value: &Value) -> ModuleRef {
        match value {
            Value::Object(obj) => obj.class(),
            Value::Module(module) if module.is_class() => self.core.class.clone(),
            Value::Module(_) => self.core.module.clone(),
            other => self.class_of(other),
        }
    }

    /// `value.singleton_class`, created on demand
    pub fn singleton_class_of(&self, value: &Value) -> Result<ModuleRef, HostError> {
        match value {
            Value::Object(obj) => Ok(obj.singleton_or_init(|| {
                let singleton = RModule::new(
                    &format!("#<Class:#<{}:{}>>", obj.class().name(), obj.id()),
                    ModuleKind::Singleton,
                    Some(obj.class()),
                    None,
                    self.serial.clone(),
                );
                singleton.set_attached(Attached::Object(Arc::downgrade(obj)));
                singleton
            })),
            Value::Module(module) => Ok(self.metaclass_of(module)),
            Value::Nil | Value::Bool(_) => Ok(self.class_of(value)),
            other => Err(HostError::NoSingleton(other.type_name().to_string())),
        }
    }

    fn metaclass_of(&self, module: &ModuleRef) -> ModuleRef {
        module.metaclass_or_init(|| {
            let superclass = match (module.kind(), module.superclass()) {
                (ModuleKind::Class, Some(parent)) => self.metaclass_of(&parent),
                (ModuleKind::Module, _) => self.core.module.clone(),
                _ => self.core.class.clone(),
            };
            let meta = RModule::new(
                &format!("#<Class:{}>", module.name()),
                ModuleKind::Singleton,
                Some(superclass),
                None,
                self.serial.clone(),
            );
            meta.set_attached(Attached::Module(Arc::downgrade(module)));
            meta
        })
    }

    /// `value.kind_of?(module)`
    pub fn kind_of(&self, value: &Value, module: &ModuleRef) -> bool {
        self.class_of(value).inherits_from(module)
    }

    /// Top-level constant lookup
    pub fn constant(&self, name: &str) -> Option<Value> {
        self.core
            .object
            .const_get_local(Symbol::intern(name))
            .map(|entry| entry.value)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Instantiate `class` with `@message` set, bypassing `initialize`
    pub fn make_exception(&self, class: &ModuleRef, message: &str) -> Value {
        let exception = RObject::new(class.clone());
        exception.ivar_set(Symbol::intern("@message"), Value::string(message));
        Value::Object(exception)
    }

    /// Escape raising a new instance of `class`
    pub fn raise(&self, class: &ModuleRef, message: impl AsRef<str>) -> Escape {
        Escape::Raise(RaiseException::new(
            self.make_exception(class, message.as_ref()),
        ))
    }

    /// Convert a host failure into the matching language exception
    pub fn translate_host(&self, error: &HostError) -> Escape {
        let class = match error {
            HostError::TypeMismatch { .. } | HostError::NoSingleton(_) => &self.core.type_error,
            HostError::ZeroDivision => &self.core.zero_division_error,
            HostError::IntegerOverflow => &self.core.range_error,
            HostError::StackDepthExceeded(_) => &self.core.system_stack_error,
            HostError::ArgumentCount { .. } => &self.core.argument_error,
        };
        self.raise(class, error.to_string())
    }

    /// Translate `Host` escapes; every other escape passes through unchanged
    pub fn translate_escape(&self, escape: Escape) -> Escape {
        match escape {
            Escape::Host(err) => self.translate_host(&err),
            other => other,
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("serial", &self.serial.current())
            .finish()
    }
}

fn bootstrap(serial: &MethodSerial) -> CoreClasses {
    let raw = |name: &str, kind: ModuleKind, superclass: Option<&ModuleRef>| {
        RModule::new(name, kind, superclass.cloned(), None, serial.clone())
    };

    let basic_object = raw("BasicObject", ModuleKind::Class, None);
    let object = raw("Object", ModuleKind::Class, Some(&basic_object));
    let kernel = raw("Kernel", ModuleKind::Module, None);
    object.include(kernel.clone());
    let module = raw("Module", ModuleKind::Class, Some(&object));
    let class = raw("Class", ModuleKind::Class, Some(&module));

    let sub = |name: &str, superclass: &ModuleRef| raw(name, ModuleKind::Class, Some(superclass));

    let exception = sub("Exception", &object);
    let standard_error = sub("StandardError", &exception);
    let name_error = sub("NameError", &standard_error);
    let argument_error = sub("ArgumentError", &standard_error);

    let core = CoreClasses {
        nil_class: sub("NilClass", &object),
        true_class: sub("TrueClass", &object),
        false_class: sub("FalseClass", &object),
        integer: sub("Integer", &object),
        float: sub("Float", &object),
        string: sub("String", &object),
        symbol: sub("Symbol", &object),
        array: sub("Array", &object),
        proc_class: sub("Proc", &object),
        match_data: sub("MatchData", &object),
        runtime_error: sub("RuntimeError", &standard_error),
        no_method_error: sub("NoMethodError", &name_error),
        uncaught_throw_error: sub("UncaughtThrowError", &argument_error),
        local_jump_error: sub("LocalJumpError", &standard_error),
        range_error: sub("RangeError", &standard_error),
        type_error: sub("TypeError", &standard_error),
        zero_division_error: sub("ZeroDivisionError", &standard_error),
        system_stack_error: sub("SystemStackError", &exception),
        basic_object,
        object,
        module,
        class,
        kernel,
        exception,
        standard_error,
        name_error,
        argument_error,
    };

    for m in [
        &core.basic_object,
        &core.object,
        &core.module,
        &core.class,
        &core.kernel,
        &core.nil_class,
        &core.true_class,
        &core.false_class,
        &core.integer,
        &core.float,
        &core.string,
        &core.symbol,
        &core.array,
        &core.proc_class,
        &core.match_data,
        &core.exception,
        &core.standard_error,
        &core.runtime_error,
        &core.name_error,
        &core.no_method_error,
        &core.argument_error,
        &core.uncaught_throw_error,
        &core.local_jump_error,
        &core.range_error,
        &core.type_error,
        &core.zero_division_error,
        &core.system_stack_error,
    ] {
        core.object
            .const_set(Symbol::intern(&m.name()), Value::Module(m.clone()));
    }
    core
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_hierarchy() {
        let rt = Runtime::new();
        let core = rt.core();
        assert!(core.no_method_error.inherits_from(&core.name_error));
        assert!(core.zero_division_error.inherits_from(&core.standard_error));
        assert!(!core.system_stack_error.inherits_from(&core.standard_error));
        assert!(core.object.inherits_from(&core.kernel));
    }

    #[test]
    fn test_class_of_immediates() {
        let rt = Runtime::new();
        assert!(Arc::ptr_eq(&rt.class_of(&Value::Fixnum(3)), &rt.core().integer));
        assert!(Arc::ptr_eq(&rt.class_of(&Value::Nil), &rt.core().nil_class));
        assert!(rt.kind_of(&Value::Float(1.0), &rt.core().object));
    }

    #[test]
    fn test_singleton_for_object() {
        let rt = Runtime::new();
        let point = rt.define_class("SingletonPoint", None);
        let obj = Value::Object(RObject::new(point.clone()));
        let singleton = rt.singleton_class_of(&obj).unwrap();
        assert!(singleton.is_singleton());
        assert!(rt.class_of(&obj).is_singleton());
        assert!(Arc::ptr_eq(&rt.nominal_class_of(&obj), &point));
        assert!(singleton.attached().unwrap().identical(&obj));
    }

    #[test]
    fn test_metaclass_chain() {
        let rt = Runtime::new();
        let base = rt.define_class("MetaBase", None);
        let derived = rt.define_class("MetaDerived", Some(&base));
        let meta = rt.class_of(&Value::Module(derived.clone()));
        let base_meta = rt.class_of(&Value::Module(base.clone()));
        assert!(meta.inherits_from(&base_meta));
        assert!(meta.inherits_from(&rt.core().class));
    }

    #[test]
    fn test_no_singleton_for_fixnum() {
        let rt = Runtime::new();
        assert!(matches!(
            rt.singleton_class_of(&Value::Fixnum(1)),
            Err(HostError::NoSingleton(_))
        ));
    }

    #[test]
    fn test_translate_host() {
        let rt = Runtime::new();
        match rt.translate_host(&HostError::ZeroDivision) {
            Escape::Raise(exc) => {
                assert_eq!(exc.class_name(), "ZeroDivisionError");
                assert_eq!(exc.message().as_deref(), Some("divided by 0"));
            }
            other => panic!("expected raise, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_assumption_invalidated_by_redefinition() {
        let rt = Runtime::new();
        assert!(rt.numeric_ops().is_valid());
        rt.core().integer.define_method(crate::runtime::Method::native(
            "+",
            crate::runtime::Arity::fixed(1),
            |_, _, _, _| Ok(Value::Fixnum(42)),
        ));
        assert!(!rt.numeric_ops().is_valid());
    }
}
