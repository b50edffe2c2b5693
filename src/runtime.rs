//! The runtime: the explicit, ownable replacement for the process-wide globals the
//! source kept in static variables (loaded modules, the type-interning caches). Every
//! other component in this crate is reachable only through a `Runtime`, which lets
//! tests construct a fresh one instead of sharing mutable process-wide state.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, warn};
use once_cell::unsync::OnceCell;

use crate::error::{NseError, NseResult};
use crate::hashmap::OpenHashMap;
use crate::module::Module;
use crate::symbol::Symbol;
use crate::types::{
    closure_kind, func_kind, generic_func_kind, get_func_subtype, unify_types as unify_types_fn,
    Builtins, FuncKey, Type, TypeData,
};

type FuncTypeCache = RefCell<OpenHashMap<FuncKey, Weak<TypeData>>>;

thread_local! {
    /// Lazily built once per thread, then cloned (cheaply — every field is an `Rc`) into
    /// each `Runtime`, so built-in types are identity-stable across runtimes the way the
    /// source's process-wide `init_types()` table made them identity-stable across calls.
    static BUILTINS: OnceCell<Builtins> = OnceCell::new();
}

fn shared_builtins() -> Builtins {
    BUILTINS.with(|cell| cell.get_or_init(Builtins::new).clone())
}

/// Splits `name` at the last `/` that is not itself immediately followed by another
/// `/`, defaulting to the `lang` module when there is no such split point.
fn split_qualified(name: &str) -> (&str, &str) {
    let bytes = name.as_bytes();
    for i in (0..bytes.len()).rev() {
        if bytes[i] == b'/' && bytes.get(i + 1) != Some(&b'/') {
            return (&name[..i], &name[i + 1..]);
        }
    }
    ("lang", name)
}

/// Owns every loaded module, the built-in type lattice, and the three
/// arity/variadic-keyed func-type interning caches.
pub struct Runtime {
    modules: RefCell<OpenHashMap<Rc<str>, Module>>,
    pub builtins: Builtins,
    pub lang_module: Module,
    pub keyword_module: Module,
    func_types: FuncTypeCache,
    closure_types: FuncTypeCache,
    gfunc_types: FuncTypeCache,
}

impl Runtime {
    pub fn new() -> Runtime {
        let lang_module = Module::new(Rc::from("lang"));
        let keyword_module = Module::new(Rc::from("keyword"));
        let mut modules = OpenHashMap::new();
        modules.add(Rc::clone(&lang_module.0.name), lang_module.clone());
        modules.add(Rc::clone(&keyword_module.0.name), keyword_module.clone());
        debug!("runtime initialised with lang and keyword modules");
        Runtime {
            modules: RefCell::new(modules),
            builtins: shared_builtins(),
            lang_module,
            keyword_module,
            func_types: RefCell::new(OpenHashMap::new()),
            closure_types: RefCell::new(OpenHashMap::new()),
            gfunc_types: RefCell::new(OpenHashMap::new()),
        }
    }

    /// Creates and registers a fresh module (`create_module`). Errors if `name` is
    /// already taken.
    pub fn create_module(&self, name: &str) -> NseResult<Module> {
        if self.modules.borrow().contains_key(&Rc::from(name)) {
            return Err(NseError::name_error(format!("module already exists: {name}")));
        }
        let module = Module::new(Rc::from(name));
        self.modules
            .borrow_mut()
            .add(Rc::clone(&module.0.name), module.clone());
        debug!("created module {name}");
        Ok(module)
    }

    /// Unregisters a module (`delete_module`). Any `Module` handles already held
    /// elsewhere keep working (it's an `Rc`); this only removes it from lookup by name.
    pub fn delete_module(&self, name: &str) -> NseResult<()> {
        match self.modules.borrow_mut().remove(&Rc::from(name)) {
            Some(_) => Ok(()),
            None => {
                warn!("attempted to delete unknown module {name}");
                Err(NseError::name_error(format!("no such module: {name}")))
            }
        }
    }

    pub fn find_module(&self, name: &str) -> Option<Module> {
        self.modules.borrow().lookup(&Rc::from(name)).cloned()
    }

    /// Imports every exported symbol of `exporter` into `importer` (`use_module` /
    /// `import_module`).
    pub fn use_module(&self, importer: &Module, exporter_name: &str) -> NseResult<()> {
        let exporter = self
            .find_module(exporter_name)
            .ok_or_else(|| NseError::name_error(format!("no such module: {exporter_name}")))?;
        importer.import_module(&exporter)
    }

    /// Imports only the exported symbols of `exporter` that carry a type definition
    /// (`use_module_types`): useful for bringing a generic's parameter type into scope
    /// without also importing every unrelated binding the exporter happens to have.
    pub fn use_module_types(&self, importer: &Module, exporter_name: &str) -> NseResult<()> {
        let exporter = self
            .find_module(exporter_name)
            .ok_or_else(|| NseError::name_error(format!("no such module: {exporter_name}")))?;
        for sym in exporter.external_symbols() {
            if exporter.get_type_def(&sym).is_some() {
                importer.import_symbol(sym.name(), &sym)?;
            }
        }
        Ok(())
    }

    pub fn intern(&self, module: &Module, name: &str) -> NseResult<Symbol> {
        module.intern(name)
    }

    pub fn r#extern(&self, module: &Module, name: &str) -> NseResult<Symbol> {
        module.r#extern(name)
    }

    /// Resolves a possibly-qualified `module-name/symbol-name` reference (`find_symbol`,
    /// `get_symbol_module`). The split point is the *last* `/` that is not itself
    /// immediately followed by another `/` (so `"a/b/c"` splits into module `a/b` and
    /// symbol `c`, and a doubled `//` never produces an empty segment). An unqualified
    /// name is looked up in the `lang` module — every special form and operator a
    /// host installs lives there, so the common unqualified case resolves rather
    /// than failing outright.
    pub fn find_symbol(&self, qualified: &str) -> NseResult<Symbol> {
        let (module_name, sym_name) = split_qualified(qualified);
        let module = self
            .find_module(module_name)
            .ok_or_else(|| NseError::name_error(format!("no such module: {module_name}")))?;
        module
            .find_external(sym_name)
            .ok_or_else(|| NseError::name_error(format!("no external symbol: {qualified}")))
    }

    /// Interns (and exports) a keyword in the `keyword` module.
    pub fn intern_keyword(&self, name: &str) -> NseResult<Symbol> {
        let sym = self.keyword_module.intern(name)?;
        self.keyword_module.r#extern(name)?;
        Ok(sym)
    }

    /// Interns (and exports) a special-form name in the `lang` module.
    pub fn intern_special(&self, name: &str) -> NseResult<Symbol> {
        let sym = self.lang_module.intern(name)?;
        self.lang_module.r#extern(name)?;
        Ok(sym)
    }

    pub fn get_func_type(&self, min_arity: u32, variadic: bool) -> Type {
        get_func_subtype(
            &self.func_types,
            FuncKey { min_arity, variadic },
            func_kind(),
            crate::types::Internal::Func,
            self.builtins.func.clone(),
        )
    }

    pub fn get_closure_type(&self, min_arity: u32, variadic: bool) -> Type {
        let super_type = self.get_func_type(min_arity, variadic);
        get_func_subtype(
            &self.closure_types,
            FuncKey { min_arity, variadic },
            closure_kind(),
            crate::types::Internal::Closure,
            super_type,
        )
    }

    pub fn get_generic_func_type(&self, min_arity: u32, variadic: bool) -> Type {
        let super_type = self.get_func_type(min_arity, variadic);
        get_func_subtype(
            &self.gfunc_types,
            FuncKey { min_arity, variadic },
            generic_func_kind(),
            crate::types::Internal::GFunc,
            super_type,
        )
    }

    /// Unifies two types against this runtime's `any` top type.
    pub fn unify_types(&self, a: &Type, b: &Type) -> Type {
        unify_types_fn(a, b, &self.builtins.any)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
