//! Call sites
//!
//! A call site resolves a method name against the receiver's class, checks
//! visibility for its call type and invokes the result. Each site keeps a
//! monomorphic cache keyed by receiver class identity and the runtime's
//! method serial; any method-table change anywhere bumps the serial and
//! every cache misses once.

use super::invoke::invoke;
use crate::interpreter::{Block, ThreadContext};
use crate::ir::CallType;
use crate::runtime::{MethodBody, ModuleRef, ResolvedMethod, Runtime, Symbol, Value, Visibility};
use crate::signal::{Escape, ExecResult, RaiseException};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct CacheEntry {
    class_id: u64,
    serial: u64,
    method: ResolvedMethod,
}

enum Lookup {
    Found(ResolvedMethod),
    MethodMissing(ResolvedMethod),
}

/// Monomorphic method cache for one call
#[derive(Debug)]
pub struct CallSite {
    name: Symbol,
    call_type: CallType,
    cache: RwLock<Option<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CallSite {
    /// Site with an empty cache
    pub fn new(name: Symbol, call_type: CallType) -> Self {
        Self {
            name,
            call_type,
            cache: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Method name looked up
    pub fn name(&self) -> Symbol {
        self.name
    }

    /// How the call was written
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Resolve through the cache and invoke
    pub fn call(
        &self,
        ctx: &mut ThreadContext,
        receiver: &Value,
        args: &[Value],
        block: Option<&Block>,
    ) -> ExecResult {
        self.call_as(ctx, self.call_type, receiver, args, block)
    }

    /// Call with an explicit call type (attribute assignment decides at the
    /// call site whether the receiver is implicit)
    pub fn call_as(
        &self,
        ctx: &mut ThreadContext,
        call_type: CallType,
        receiver: &Value,
        args: &[Value],
        block: Option<&Block>,
    ) -> ExecResult {
        ctx.poll()?;
        match self.lookup(ctx, call_type, receiver)? {
            Lookup::Found(method) => invoke(ctx, &method, receiver, args, block),
            Lookup::MethodMissing(handler) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Symbol(self.name));
                full.extend_from_slice(args);
                invoke(ctx, &handler, receiver, &full, block)
            }
        }
    }

    /// Single unboxed integer argument; uses the target's fixnum overload
    /// when it has one
    pub fn call_fixnum(&self, ctx: &mut ThreadContext, receiver: &Value, arg: i64) -> ExecResult {
        ctx.poll()?;
        match self.lookup(ctx, self.call_type, receiver)? {
            Lookup::Found(method) => match &method.method.body {
                MethodBody::Native {
                    fixnum: Some(fast), ..
                } => fast(ctx, receiver, arg).map_err(|e| ctx.runtime().translate_escape(e)),
                _ => invoke(ctx, &method, receiver, &[Value::Fixnum(arg)], None),
            },
            Lookup::MethodMissing(handler) => invoke(
                ctx,
                &handler,
                receiver,
                &[Value::Symbol(self.name), Value::Fixnum(arg)],
                None,
            ),
        }
    }

    fn lookup(
        &self,
        ctx: &ThreadContext,
        call_type: CallType,
        receiver: &Value,
    ) -> ExecResult<Lookup> {
        let rt = ctx.runtime();
        let class = rt.class_of(receiver);
        let resolved = if call_type == CallType::Super {
            match self.resolve_super(ctx, &class) {
                Some(found) => Some(found),
                None => {
                    return Err(no_method(
                        rt,
                        self.name,
                        format!("super: no superclass method '{}' for {}", self.name, describe(rt, receiver)),
                    ))
                }
            }
        } else {
            self.resolve_cached(rt, &class)
        };

        match resolved {
            Some(method) if visible(ctx, call_type, &method) => Ok(Lookup::Found(method)),
            hidden => {
                let missing = Symbol::intern("method_missing");
                if let Some(handler) = class.resolve_method(missing) {
                    return Ok(Lookup::MethodMissing(handler));
                }
                Err(self.miss_error(rt, call_type, receiver, hidden.as_ref()))
            }
        }
    }

    fn resolve_cached(&self, rt: &Runtime, class: &ModuleRef) -> Option<ResolvedMethod> {
        let serial = rt.method_serial().current();
        if let Some(entry) = self.cache.read().as_ref() {
            if entry.class_id == class.id() && entry.serial == serial {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.method.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = class.resolve_method(self.name)?;
        *self.cache.write() = Some(CacheEntry {
            class_id: class.id(),
            serial,
            method: resolved.clone(),
        });
        Some(resolved)
    }

    /// Resolution for `super` depends on the frame, so it is never cached
    fn resolve_super(&self, ctx: &ThreadContext, class: &ModuleRef) -> Option<ResolvedMethod> {
        let defining = ctx.frame().defining_module.as_ref()?;
        class.resolve_method_after(defining, self.name)
    }

    fn miss_error(
        &self,
        rt: &Runtime,
        call_type: CallType,
        receiver: &Value,
        hidden: Option<&ResolvedMethod>,
    ) -> Escape {
        let target = describe(rt, receiver);
        let message = match hidden.map(|m| m.visibility()) {
            Some(Visibility::Private) => {
                format!("private method '{}' called for {}", self.name, target)
            }
            Some(Visibility::Protected) => {
                format!("protected method '{}' called for {}", self.name, target)
            }
            _ if call_type == CallType::Variable => {
                let exc = rt.make_exception(
                    &rt.core().name_error,
                    &format!("undefined local variable or method '{}' for {}", self.name, target),
                );
                return raise_with_name(exc, self.name);
            }
            _ => format!("undefined method '{}' for {}", self.name, target),
        };
        no_method(rt, self.name, message)
    }
}

fn visible(ctx: &ThreadContext, call_type: CallType, method: &ResolvedMethod) -> bool {
    match method.visibility() {
        Visibility::Public => true,
        Visibility::Private => call_type.allows_private(),
        Visibility::Protected => {
            call_type.allows_private() || ctx.runtime().kind_of(ctx.self_value(), &method.owner)
        }
    }
}

fn no_method(rt: &Runtime, name: Symbol, message: String) -> Escape {
    let exc = rt.make_exception(&rt.core().no_method_error, &message);
    raise_with_name(exc, name)
}

fn raise_with_name(exc: Value, name: Symbol) -> Escape {
    if let Value::Object(obj) = &exc {
        obj.ivar_set(Symbol::intern("@name"), Value::Symbol(name));
    }
    Escape::Raise(RaiseException::new(exc))
}

/// Receiver description used in dispatch errors
fn describe(rt: &Runtime, receiver: &Value) -> String {
    match receiver {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Module(m) if m.is_class() => format!("class {}", m.name()),
        Value::Module(m) => format!("module {}", m.name()),
        _ if receiver.identical(rt.main_object()) => "main:Object".to_string(),
        other => format!("an instance of {}", rt.nominal_class_of(other).name()),
    }
}

/// Uncached functional call, for native code calling back into the runtime
pub fn send(
    ctx: &mut ThreadContext,
    receiver: &Value,
    name: Symbol,
    args: &[Value],
    block: Option<&Block>,
) -> ExecResult {
    CallSite::new(name, CallType::Functional).call(ctx, receiver, args, block)
}
