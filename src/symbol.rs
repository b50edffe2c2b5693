//! Symbol identity.
//!
//! Grounded in `examples/original_source/src/module.c` (`module_intern_symbol`,
//! `find_symbol`, `get_symbol_module`): a symbol is identified by its owning module and
//! name, compared by pointer identity, allocated lazily on first intern.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::module::{Module, ModuleData};

pub struct SymbolData {
    pub name: Rc<str>,
    /// Weak: the module owns the symbol strongly (via its internal/external tables);
    /// a strong back-edge here would form a reference cycle between module and symbol.
    module: RefCell<Option<Weak<ModuleData>>>,
}

/// A symbol, compared by identity: two symbols are equal iff they're the same
/// allocation, not merely the same name in the same module.
#[derive(Clone)]
pub struct Symbol(pub Rc<SymbolData>);

impl Symbol {
    pub(crate) fn new(name: Rc<str>, module: &Module) -> Symbol {
        Symbol(Rc::new(SymbolData {
            name,
            module: RefCell::new(Some(Rc::downgrade(&module.0))),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn module(&self) -> Option<Module> {
        self.0.module.borrow().as_ref().and_then(|w| w.upgrade()).map(Module)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as *const () as usize).hash(state)
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn symbols_with_the_same_name_in_different_modules_are_distinct() {
        let rt = Runtime::new();
        let m1 = rt.create_module("m1").unwrap();
        let m2 = rt.create_module("m2").unwrap();
        let a = rt.intern(&m1, "x").unwrap();
        let b = rt.intern(&m2, "x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn interning_the_same_name_twice_is_identity_stable() {
        let rt = Runtime::new();
        let m = rt.create_module("m").unwrap();
        let a = rt.intern(&m, "x").unwrap();
        let b = rt.intern(&m, "x").unwrap();
        assert_eq!(a, b);
    }
}
