//! Lexical scope.
//!
//! A scope is a persistent singly-linked list of binding frames terminated by an
//! "anchor" frame that carries the owning module (mirrors the source's
//! `scope_push`/`scope_pop`/`scope_get`/`scope_set`). The anchor-is-always-terminal
//! invariant is enforced by the type system here rather than by convention:
//! `ScopeFrame::Anchor` simply has no `next` field, so there is no way to construct a
//! scope with a frame beyond it.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::error::{NseError, NseResult};
use crate::module::Module;
use crate::symbol::Symbol;
use crate::value::{Value, WeakValue};

/// Whether a binding holds its value strongly or weakly. Weak bindings let a closure
/// capture its own name without keeping itself alive.
enum BindingCell {
    Strong(RefCell<Value>),
    Weak(RefCell<WeakValue>),
}

impl BindingCell {
    fn get(&self) -> Value {
        match self {
            BindingCell::Strong(cell) => cell.borrow().clone(),
            BindingCell::Weak(cell) => cell.borrow().upgrade(),
        }
    }

    fn set(&self, value: Value) {
        match self {
            BindingCell::Strong(cell) => *cell.borrow_mut() = value,
            BindingCell::Weak(cell) => *cell.borrow_mut() = value.downgrade(),
        }
    }
}

/// A defined entry whose value happens to be `undefined` is itself unbound.
fn bound_or_unbound(value: Option<Value>, symbol: &Symbol) -> NseResult<Value> {
    match value {
        Some(v) if !v.is_undefined() => Ok(v),
        _ => Err(NseError::name_error(format!("unbound symbol: {}", symbol.name()))),
    }
}

enum ScopeFrame {
    Binding {
        symbol: Symbol,
        cell: BindingCell,
        next: Scope,
    },
    Anchor {
        module: Module,
    },
}

/// A scope chain: cheap to clone (an `Rc` bump), cheap to extend (push a new head frame
/// without touching the tail) — the persistence the source's manual `copy_scope` existed
/// to fake for free.
#[derive(Clone)]
pub struct Scope(Rc<ScopeFrame>);

impl Scope {
    /// The root of a scope chain: a module with no bindings pushed yet.
    pub fn anchor(module: Module) -> Scope {
        Scope(Rc::new(ScopeFrame::Anchor { module }))
    }

    /// Pushes a new strong binding in front of `self` (`scope_push`).
    pub fn push(&self, symbol: Symbol, value: Value) -> Scope {
        trace!("scope push {}", symbol.name());
        Scope(Rc::new(ScopeFrame::Binding {
            symbol,
            cell: BindingCell::Strong(RefCell::new(value)),
            next: self.clone(),
        }))
    }

    /// Pushes a new weak binding: the scope does not keep `value`'s referent alive.
    /// Reading it back after the referent is dropped is an unbound-symbol error.
    pub fn push_weak(&self, symbol: Symbol, value: Value) -> Scope {
        trace!("scope push (weak) {}", symbol.name());
        Scope(Rc::new(ScopeFrame::Binding {
            symbol,
            cell: BindingCell::Weak(RefCell::new(value.downgrade())),
            next: self.clone(),
        }))
    }

    /// Drops the most recently pushed binding frame (`scope_pop`). Popping an anchor is
    /// a no-op: anchors are always terminal, so there is nothing to remove.
    pub fn pop(&self) -> Scope {
        trace!("scope pop");
        match &*self.0 {
            ScopeFrame::Binding { next, .. } => next.clone(),
            ScopeFrame::Anchor { .. } => self.clone(),
        }
    }

    /// Pops frames until (and including) the first binding for `symbol`, i.e. the scope
    /// as it was just before that binding was pushed (`scope_pop_until`).
    pub fn pop_until(&self, symbol: &Symbol) -> Scope {
        match &*self.0 {
            ScopeFrame::Binding { symbol: s, next, .. } if s == symbol => next.clone(),
            ScopeFrame::Binding { next, .. } => next.pop_until(symbol),
            ScopeFrame::Anchor { .. } => self.clone(),
        }
    }

    /// The module that anchors this scope chain.
    pub fn module(&self) -> Module {
        match &*self.0 {
            ScopeFrame::Binding { next, .. } => next.module(),
            ScopeFrame::Anchor { module } => module.clone(),
        }
    }

    /// Resolves a binding by symbol identity, falling back to the anchor module's
    /// `defs` namespace. A binding holding `undefined` counts as unbound.
    pub fn get(&self, symbol: &Symbol) -> NseResult<Value> {
        match &*self.0 {
            ScopeFrame::Binding { symbol: s, cell, next } => {
                if s == symbol {
                    bound_or_unbound(Some(cell.get()), symbol)
                } else {
                    next.get(symbol)
                }
            }
            ScopeFrame::Anchor { module } => bound_or_unbound(module.get_def(symbol), symbol),
        }
    }

    /// Like [`Scope::get`] but consults the anchor module's `macro_defs` namespace.
    /// Macros are module-level only, so every binding frame is skipped.
    pub fn get_macro(&self, symbol: &Symbol) -> NseResult<Value> {
        bound_or_unbound(self.module().get_macro(symbol), symbol)
    }

    /// Looks up a read-macro in the anchor module's `read_macro_defs` namespace.
    pub fn get_read_macro(&self, symbol: &Symbol) -> NseResult<Value> {
        bound_or_unbound(self.module().get_read_macro(symbol), symbol)
    }

    /// Mutates the nearest binding for `symbol` in place (`scope_set`). Errors if
    /// `symbol` has no scope binding (module-level definitions are immutable from here;
    /// use [`Module::define`] for those).
    pub fn set(&self, symbol: &Symbol, value: Value) -> NseResult<()> {
        match &*self.0 {
            ScopeFrame::Binding { symbol: s, cell, next } => {
                if s == symbol {
                    cell.set(value);
                    Ok(())
                } else {
                    next.set(symbol, value)
                }
            }
            ScopeFrame::Anchor { .. } => Err(NseError::name_error(format!(
                "unbound symbol: {}",
                symbol.name()
            ))),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<scope in {}>", self.module().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn module() -> Module {
        Module::new(Rc::from("test"))
    }

    #[test]
    fn push_then_get_resolves_the_nearest_binding() {
        let m = module();
        let x = m.intern("x").unwrap();
        let s = Scope::anchor(m).push(x.clone(), Value::I64(1)).push(x.clone(), Value::I64(2));
        assert!(matches!(s.get(&x), Ok(Value::I64(2))));
    }

    #[test]
    fn pop_uncovers_the_shadowed_binding() {
        let m = module();
        let x = m.intern("x").unwrap();
        let s = Scope::anchor(m).push(x.clone(), Value::I64(1)).push(x.clone(), Value::I64(2));
        let popped = s.pop();
        assert!(matches!(popped.get(&x), Ok(Value::I64(1))));
    }

    #[test]
    fn anchor_is_terminal_and_falls_back_to_module_defs() {
        let m = module();
        let y = m.intern("y").unwrap();
        m.define(&y, Value::I64(42)).unwrap();
        let s = Scope::anchor(m);
        assert!(matches!(s.get(&y), Ok(Value::I64(42))));
        assert_eq!(s.pop().module(), s.module());
    }

    #[test]
    fn unbound_symbol_is_a_name_error() {
        let m = module();
        let z = m.intern("z").unwrap();
        let s = Scope::anchor(m);
        assert!(s.get(&z).is_err());
        assert!(s.set(&z, Value::Nil).is_err());
    }

    #[test]
    fn weak_binding_degrades_to_unbound_once_its_referent_is_dropped() {
        let m = module();
        let x = m.intern("x").unwrap();
        let payload = Value::Str(Rc::from("hello"));
        let s = Scope::anchor(m).push_weak(x.clone(), payload.clone());
        assert!(matches!(s.get(&x), Ok(Value::Str(_))));
        drop(payload);
        assert!(s.get(&x).is_err());
    }

    #[test]
    fn set_mutates_in_place_without_disturbing_other_frames() {
        let m = module();
        let x = m.intern("x").unwrap();
        let y = m.intern("y").unwrap();
        let s = Scope::anchor(m).push(x.clone(), Value::I64(1)).push(y.clone(), Value::I64(2));
        s.set(&x, Value::I64(99)).unwrap();
        assert!(matches!(s.get(&x), Ok(Value::I64(99))));
        assert!(matches!(s.get(&y), Ok(Value::I64(2))));
    }
}
