//! Module & symbol registry.
//!
//! Grounded in `examples/original_source/src/module.c`: `struct module`'s `defs`/
//! `macro_defs`/`type_defs`/`read_macro_defs` hash maps become four identity-keyed
//! [`OpenHashMap`]s, and `internal`/`external` symbol tables become two name-keyed ones.
//! `external` is always a subset of `internal` by construction: externing only ever
//! copies an already-interned symbol into the external table.

use std::cell::RefCell;
use std::rc::Rc;

use log::{trace, warn};

use crate::error::{NseError, NseResult};
use crate::hashmap::{ByAddress, FnvHasher, OpenHashMap};
use crate::symbol::{Symbol, SymbolData};
use crate::types::Type;
use crate::value::Value;

/// A multi-method's dispatch key: the generic-function symbol plus its parameter-type
/// tuple, compared (and hashed) by identity per parameter. Unlike `method_hash` in the
/// source — which folds every parameter into a constant placeholder bucket — this
/// mixes each parameter's address through the FNV hasher, so dispatch on distinct
/// parameter tuples actually lands in distinct buckets.
#[derive(Clone)]
pub struct MethodKey {
    pub symbol: Symbol,
    pub params: Rc<[Type]>,
}

impl PartialEq for MethodKey {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a == b)
    }
}

impl Eq for MethodKey {}

impl std::hash::Hash for MethodKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        for p in self.params.iter() {
            (Rc::as_ptr(p.as_rc()) as *const () as usize).hash(state);
        }
    }
}

pub struct ModuleData {
    pub name: Rc<str>,
    internal: RefCell<OpenHashMap<Rc<str>, Symbol>>,
    external: RefCell<OpenHashMap<Rc<str>, Symbol>>,
    defs: RefCell<OpenHashMap<ByAddress<SymbolData>, Value, FnvHasher>>,
    macro_defs: RefCell<OpenHashMap<ByAddress<SymbolData>, Value, FnvHasher>>,
    type_defs: RefCell<OpenHashMap<ByAddress<SymbolData>, Value, FnvHasher>>,
    read_macro_defs: RefCell<OpenHashMap<ByAddress<SymbolData>, Value, FnvHasher>>,
    methods: RefCell<OpenHashMap<MethodKey, Value, FnvHasher>>,
}

/// A module: the unit of namespacing and definition.
#[derive(Clone)]
pub struct Module(pub(crate) Rc<ModuleData>);

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Module {}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<module {}>", self.0.name)
    }
}

impl Module {
    pub(crate) fn new(name: Rc<str>) -> Module {
        Module(Rc::new(ModuleData {
            name,
            internal: RefCell::new(OpenHashMap::new()),
            external: RefCell::new(OpenHashMap::new()),
            defs: RefCell::new(OpenHashMap::new()),
            macro_defs: RefCell::new(OpenHashMap::new()),
            type_defs: RefCell::new(OpenHashMap::new()),
            read_macro_defs: RefCell::new(OpenHashMap::new()),
            methods: RefCell::new(OpenHashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Finds (without creating) an interned symbol by name (`module_find_internal`).
    pub fn find_internal(&self, name: &str) -> Option<Symbol> {
        self.0.internal.borrow().lookup(&Rc::from(name)).cloned()
    }

    /// Interns `name`, creating the symbol on first use (`module_intern_symbol`).
    /// Rejects an empty name.
    pub fn intern(&self, name: &str) -> NseResult<Symbol> {
        if name.is_empty() {
            return Err(NseError::domain_error("cannot intern the empty name"));
        }
        if let Some(sym) = self.find_internal(name) {
            return Ok(sym);
        }
        let rc_name: Rc<str> = Rc::from(name);
        let sym = Symbol::new(Rc::clone(&rc_name), self);
        self.0.internal.borrow_mut().add(rc_name, sym.clone());
        trace!("interned {name} in module {}", self.0.name);
        Ok(sym)
    }

    /// Exports an already-interned symbol (`module_extern_symbol`). Errors if `name`
    /// was never interned in this module.
    pub fn r#extern(&self, name: &str) -> NseResult<Symbol> {
        let sym = self
            .find_internal(name)
            .ok_or_else(|| NseError::name_error(format!("undefined symbol: {name}")))?;
        self.0
            .external
            .borrow_mut()
            .add(Rc::from(name), sym.clone());
        Ok(sym)
    }

    /// All symbols this module exports (`list_external_symbols`).
    pub fn external_symbols(&self) -> Vec<Symbol> {
        self.0.external.borrow().values().cloned().collect()
    }

    /// Finds an exported symbol by name without allocating the full export list.
    pub fn find_external(&self, name: &str) -> Option<Symbol> {
        self.0.external.borrow().lookup(&Rc::from(name)).cloned()
    }

    /// All symbols interned in this module, external or not (`get_symbols`).
    pub fn symbols(&self) -> Vec<Symbol> {
        self.0.internal.borrow().values().cloned().collect()
    }

    fn owned_key(&self, symbol: &Symbol) -> NseResult<ByAddress<SymbolData>> {
        match symbol.module() {
            Some(m) if m == *self => Ok(ByAddress(Rc::clone(&symbol.0))),
            _ => Err(NseError::name_error(format!(
                "{} is not owned by module {}",
                symbol.name(),
                self.0.name
            ))),
        }
    }

    /// Replaces whatever `namespace` has for `symbol`, if anything: redefining a
    /// namespace entry releases the old value. `OpenHashMap::add` alone would refuse
    /// a duplicate key, so a stale entry is removed first — the old `Value` is simply
    /// dropped, which is how this core releases it.
    fn upsert(
        namespace: &RefCell<OpenHashMap<ByAddress<SymbolData>, Value, FnvHasher>>,
        key: ByAddress<SymbolData>,
        value: Value,
    ) {
        let mut ns = namespace.borrow_mut();
        ns.remove(&key);
        ns.add(key, value);
    }

    pub fn define(&self, symbol: &Symbol, value: Value) -> NseResult<()> {
        let key = self.owned_key(symbol)?;
        Self::upsert(&self.0.defs, key, value);
        Ok(())
    }

    pub fn define_macro(&self, symbol: &Symbol, value: Value) -> NseResult<()> {
        let key = self.owned_key(symbol)?;
        Self::upsert(&self.0.macro_defs, key, value);
        Ok(())
    }

    pub fn define_type(&self, symbol: &Symbol, value: Value) -> NseResult<()> {
        let key = self.owned_key(symbol)?;
        Self::upsert(&self.0.type_defs, key, value);
        Ok(())
    }

    pub fn define_read_macro(&self, symbol: &Symbol, value: Value) -> NseResult<()> {
        let key = self.owned_key(symbol)?;
        Self::upsert(&self.0.read_macro_defs, key, value);
        Ok(())
    }

    /// Interns `name` and externs it in one step (`module_ext_define`'s intern half).
    pub fn ext_define(&self, name: &str, value: Value) -> NseResult<Symbol> {
        let sym = self.intern(name)?;
        self.define(&sym, value)?;
        self.r#extern(name)?;
        Ok(sym)
    }

    pub fn ext_define_macro(&self, name: &str, value: Value) -> NseResult<Symbol> {
        let sym = self.intern(name)?;
        self.define_macro(&sym, value)?;
        self.r#extern(name)?;
        Ok(sym)
    }

    pub fn ext_define_type(&self, name: &str, value: Value) -> NseResult<Symbol> {
        let sym = self.intern(name)?;
        self.define_type(&sym, value)?;
        self.r#extern(name)?;
        Ok(sym)
    }

    pub fn ext_define_read_macro(&self, name: &str, value: Value) -> NseResult<Symbol> {
        let sym = self.intern(name)?;
        self.define_read_macro(&sym, value)?;
        self.r#extern(name)?;
        Ok(sym)
    }

    pub fn get_def(&self, symbol: &Symbol) -> Option<Value> {
        self.0
            .defs
            .borrow()
            .lookup(&ByAddress(Rc::clone(&symbol.0)))
            .cloned()
    }

    pub fn get_macro(&self, symbol: &Symbol) -> Option<Value> {
        self.0
            .macro_defs
            .borrow()
            .lookup(&ByAddress(Rc::clone(&symbol.0)))
            .cloned()
    }

    pub fn get_type_def(&self, symbol: &Symbol) -> Option<Value> {
        self.0
            .type_defs
            .borrow()
            .lookup(&ByAddress(Rc::clone(&symbol.0)))
            .cloned()
    }

    pub fn get_read_macro(&self, symbol: &Symbol) -> Option<Value> {
        self.0
            .read_macro_defs
            .borrow()
            .lookup(&ByAddress(Rc::clone(&symbol.0)))
            .cloned()
    }

    pub fn define_method(&self, symbol: &Symbol, params: Vec<Type>, value: Value) -> NseResult<()> {
        let key = MethodKey {
            symbol: symbol.clone(),
            params: Rc::from(params),
        };
        let mut methods = self.0.methods.borrow_mut();
        methods.remove(&key);
        methods.add(key, value);
        Ok(())
    }

    /// Looks up the method registered for the exact `(symbol, param-types)` key
    /// (`module_find_method`) — an exact-tuple lookup, not subtype dispatch. Logs a
    /// warning on a miss, since a missing method is usually the evaluator about to
    /// raise `type_error` to its caller.
    pub fn find_method(&self, symbol: &Symbol, arg_types: &[Type]) -> Option<Value> {
        let key = MethodKey {
            symbol: symbol.clone(),
            params: Rc::from(arg_types.to_vec()),
        };
        let found = self.0.methods.borrow().lookup(&key).cloned();
        if found.is_none() {
            warn!(
                "no method {}({}) in module {}",
                symbol.name(),
                arg_types.len(),
                self.0.name
            );
        }
        found
    }

    /// Copies a single symbol from another module's external table into this module's
    /// internal table (`import_module_symbol`). Rejects a name already bound to a
    /// *different* symbol — conflicts are errors, never silently ignored or
    /// overwritten.
    pub fn import_symbol(&self, name: &str, symbol: &Symbol) -> NseResult<()> {
        if let Some(existing) = self.find_internal(name) {
            if existing != *symbol {
                return Err(NseError::name_error(format!(
                    "import conflict: {name} is already bound in module {}",
                    self.0.name
                )));
            }
            return Ok(());
        }
        self.0
            .internal
            .borrow_mut()
            .add(Rc::from(name), symbol.clone());
        Ok(())
    }

    /// Imports every external symbol of `other`, then re-registers every one of
    /// `other`'s methods (`import_module`). Stops at the first symbol conflict, leaving
    /// symbols and methods imported so far in place (matching the source's
    /// early-return-on-error control flow).
    pub fn import_module(&self, other: &Module) -> NseResult<()> {
        for sym in other.external_symbols() {
            self.import_symbol(sym.name(), &sym)?;
        }
        let methods: Vec<(MethodKey, Value)> = other
            .0
            .methods
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in methods {
            let mut methods = self.0.methods.borrow_mut();
            methods.remove(&key);
            methods.add(key, value);
        }
        Ok(())
    }

    /// Copies one method definition from `other` into this module (`import_method`).
    pub fn import_method(&self, other: &Module, symbol: &Symbol, params: &[Type]) -> NseResult<()> {
        let key = MethodKey {
            symbol: symbol.clone(),
            params: Rc::from(params.to_vec()),
        };
        let value = other
            .0
            .methods
            .borrow()
            .lookup(&key)
            .cloned()
            .ok_or_else(|| NseError::name_error(format!("no such method: {}", symbol.name())))?;
        self.0.methods.borrow_mut().add(key, value);
        Ok(())
    }
}
