//! The concrete/generic type lattice.
//!
//! Transliterated from `examples/original_source/src/runtime/type.c` and `type.h`:
//! the manual `refs`/`delete_type` switch becomes one `Drop` impl per node kind, and
//! the generic's weak instance map becomes `OpenHashMap<ParamKey, Weak<TypeData>, FnvHasher>`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::debug;

use crate::error::{NseError, NseResult};
use crate::hashmap::{FnvHasher, OpenHashMap};
use crate::symbol::Symbol;

/// The internal (low-level) representation a type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Internal {
    Nothing,
    Nil,
    Cons,
    ListBuilder,
    I64,
    F64,
    Func,
    Closure,
    GFunc,
    String,
    Syntax,
    Symbol,
    Reference,
    Type,
    Quote,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeKind {
    Simple,
    Func,
    Closure,
    GenericFunc,
    Instance,
    PolyInstance,
    PolyVar,
}

/// Parameter tuple of a generic instance, compared element-wise by identity.
#[derive(Clone)]
pub struct ParamKey(pub Rc<[Type]>);

impl PartialEq for ParamKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for ParamKey {}

impl std::hash::Hash for ParamKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for t in self.0.iter() {
            (Rc::as_ptr(&t.0) as *const () as usize).hash(state);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FuncKey {
    pub min_arity: u32,
    pub variadic: bool,
}

enum TypePayload {
    Simple,
    FuncLike { min_arity: u32, variadic: bool },
    Instance { generic: Generic, params: ParamKey },
    PolyInstance { generic: Generic },
    PolyVar { generic: Generic, index: usize },
}

pub struct TypeData {
    kind: TypeKind,
    internal: Internal,
    super_type: Option<Type>,
    name: RefCell<Option<Symbol>>,
    payload: TypePayload,
}

impl Drop for TypeData {
    fn drop(&mut self) {
        match &self.payload {
            TypePayload::Instance { generic, params } => {
                generic.0.instances.borrow_mut().remove(params);
            }
            TypePayload::PolyInstance { generic } => {
                *generic.0.poly.borrow_mut() = None;
            }
            _ => {}
        }
    }
}

/// A concrete type node: `Rc`-shared, interned where identity comparisons require it.
#[derive(Clone)]
pub struct Type(pub(crate) Rc<TypeData>);

impl Type {
    fn simple(internal: Internal, super_type: Option<Type>) -> Type {
        Type(Rc::new(TypeData {
            kind: TypeKind::Simple,
            internal,
            super_type,
            name: RefCell::new(None),
            payload: TypePayload::Simple,
        }))
    }

    pub fn super_type(&self) -> Option<Type> {
        self.0.super_type.clone()
    }

    pub fn internal(&self) -> Internal {
        self.0.internal
    }

    pub fn name(&self) -> Option<Symbol> {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: Symbol) {
        *self.0.name.borrow_mut() = Some(name);
    }

    pub fn min_arity(&self) -> Option<u32> {
        match &self.0.payload {
            TypePayload::FuncLike { min_arity, .. } => Some(*min_arity),
            _ => None,
        }
    }

    pub fn variadic(&self) -> Option<bool> {
        match &self.0.payload {
            TypePayload::FuncLike { variadic, .. } => Some(*variadic),
            _ => None,
        }
    }

    pub(crate) fn as_rc(&self) -> &Rc<TypeData> {
        &self.0
    }

    pub(crate) fn from_rc(rc: Rc<TypeData>) -> Type {
        Type(rc)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Type {}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{}", n.name()),
            None => write!(f, "<{:?}>", self.0.internal),
        }
    }
}

struct GenericData {
    arity: usize,
    internal: Internal,
    super_type: Option<Type>,
    name: RefCell<Option<Symbol>>,
    instances: RefCell<OpenHashMap<ParamKey, Weak<TypeData>, FnvHasher>>,
    poly: RefCell<Option<Weak<TypeData>>>,
}

/// A generic type constructor: parameterised, with a weak instance cache.
#[derive(Clone)]
pub struct Generic(Rc<GenericData>);

impl Generic {
    pub fn new(arity: usize, internal: Internal, super_type: Option<Type>) -> Generic {
        Generic(Rc::new(GenericData {
            arity,
            internal,
            super_type,
            name: RefCell::new(None),
            instances: RefCell::new(OpenHashMap::new()),
            poly: RefCell::new(None),
        }))
    }

    pub fn arity(&self) -> usize {
        self.0.arity
    }

    pub fn name(&self) -> Option<Symbol> {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: Symbol) {
        *self.0.name.borrow_mut() = Some(name);
    }
}

impl PartialEq for Generic {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Generic {}

impl std::fmt::Debug for Generic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{}/{}", n.name(), self.0.arity),
            None => write!(f, "<generic/{}>", self.0.arity),
        }
    }
}

/// Interns (or creates) the instance of `generic` for `params`. Returns `DomainError`
/// if `params.len() != generic.arity()`.
pub fn get_instance(generic: &Generic, params: Vec<Type>) -> NseResult<Type> {
    if params.len() != generic.0.arity {
        return Err(NseError::domain_error(format!(
            "invalid number of generic parameters, expected {}, got {}",
            generic.0.arity,
            params.len()
        )));
    }
    Ok(intern_instance(generic, ParamKey(Rc::from(params))))
}

/// Shorthand for `get_instance` on a unary generic.
pub fn get_unary_instance(generic: &Generic, param: Type) -> NseResult<Type> {
    get_instance(generic, vec![param])
}

fn intern_instance(generic: &Generic, params: ParamKey) -> Type {
    if let Some(weak) = generic.0.instances.borrow().lookup(&params) {
        if let Some(rc) = weak.upgrade() {
            debug!("type instance cache hit for generic {generic:?}");
            return Type(rc);
        }
    }
    debug!("type instance cache miss for generic {generic:?}, allocating");
    let instance = Rc::new(TypeData {
        kind: TypeKind::Instance,
        internal: generic.0.internal,
        super_type: generic.0.super_type.clone(),
        name: RefCell::new(None),
        payload: TypePayload::Instance {
            generic: generic.clone(),
            params: params.clone(),
        },
    });
    let mut instances = generic.0.instances.borrow_mut();
    instances.remove(&params);
    instances.add(params, Rc::downgrade(&instance));
    Type(instance)
}

/// Interns (or creates) the polymorphic ("universal") instance of `generic`.
pub fn get_poly_instance(generic: &Generic) -> Type {
    if let Some(weak) = generic.0.poly.borrow().as_ref() {
        if let Some(rc) = weak.upgrade() {
            return Type(rc);
        }
    }
    let poly = Rc::new(TypeData {
        kind: TypeKind::PolyInstance,
        internal: generic.0.internal,
        super_type: generic.0.super_type.clone(),
        name: RefCell::new(None),
        payload: TypePayload::PolyInstance {
            generic: generic.clone(),
        },
    });
    *generic.0.poly.borrow_mut() = Some(Rc::downgrade(&poly));
    Type(poly)
}

/// Creates a polymorphic type variable bound to the i-th parameter of `generic`.
pub fn create_poly_var(generic: &Generic, index: usize) -> Type {
    Type(Rc::new(TypeData {
        kind: TypeKind::PolyVar,
        internal: Internal::Nothing,
        super_type: None,
        name: RefCell::new(None),
        payload: TypePayload::PolyVar {
            generic: generic.clone(),
            index,
        },
    }))
}

pub(crate) fn get_func_subtype(
    cache: &RefCell<OpenHashMap<FuncKey, Weak<TypeData>>>,
    key: FuncKey,
    kind: TypeKind,
    internal: Internal,
    super_type: Type,
) -> Type {
    if let Some(weak) = cache.borrow().lookup(&key) {
        if let Some(rc) = weak.upgrade() {
            debug!("func-type cache hit for arity {} variadic {}", key.min_arity, key.variadic);
            return Type(rc);
        }
    }
    debug!("func-type cache miss for arity {} variadic {}, allocating", key.min_arity, key.variadic);
    let t = Rc::new(TypeData {
        kind,
        internal,
        super_type: Some(super_type),
        name: RefCell::new(None),
        payload: TypePayload::FuncLike {
            min_arity: key.min_arity,
            variadic: key.variadic,
        },
    });
    let mut cache = cache.borrow_mut();
    cache.remove(&key);
    cache.add(key, Rc::downgrade(&t));
    Type(t)
}

pub(crate) fn func_kind() -> TypeKind {
    TypeKind::Func
}
pub(crate) fn closure_kind() -> TypeKind {
    TypeKind::Closure
}
pub(crate) fn generic_func_kind() -> TypeKind {
    TypeKind::GenericFunc
}

fn poly_instance_compatible(a: &Type, b: &Type) -> bool {
    matches!(
        (&a.0.payload, &b.0.payload),
        (TypePayload::PolyInstance { generic: ga }, TypePayload::Instance { generic: gb, .. })
            if ga == gb
    ) || matches!(
        (&b.0.payload, &a.0.payload),
        (TypePayload::PolyInstance { generic: gb }, TypePayload::Instance { generic: ga, .. })
            if ga == gb
    )
}

/// Walks `a`'s super chain, treating a generic's polymorphic instance and any of its
/// concrete instances as mutually compatible.
pub fn is_subtype_of(a: &Type, b: &Type) -> bool {
    let mut cur = Some(a.clone());
    while let Some(t) = cur {
        if &t == b || poly_instance_compatible(&t, b) {
            return true;
        }
        cur = t.super_type();
    }
    false
}

/// If exactly one of `x`/`y` is a generic's polymorphic instance and the other is a
/// concrete instance of the *same* generic, returns that generic.
fn poly_instance_generic(x: &Type, y: &Type) -> Option<Generic> {
    match (&x.0.payload, &y.0.payload) {
        (TypePayload::PolyInstance { generic: g1 }, TypePayload::Instance { generic: g2, .. })
        | (TypePayload::Instance { generic: g2, .. }, TypePayload::PolyInstance { generic: g1 })
            if g1 == g2 =>
        {
            Some(g1.clone())
        }
        _ => None,
    }
}

/// The instance of `generic` with every parameter set to `any` — the most general
/// concrete instance, used when unification only finds a poly/instance match.
fn generic_any_instance(generic: &Generic, any: &Type) -> Type {
    let params = ParamKey(Rc::from(vec![any.clone(); generic.arity()]));
    intern_instance(generic, params)
}

/// Finds the first common node on `a`'s and `b`'s super chains, falling back to `any`.
/// A poly-instance/instance match doesn't return either walked node as-is; it resolves
/// to the generic's `any`-parameterised instance, since the poly side stands for "an
/// instance of this generic over any parameters" rather than for one specific instance.
pub fn unify_types(a: &Type, b: &Type, any: &Type) -> Type {
    let mut b_cur = Some(b.clone());
    while let Some(b_node) = b_cur {
        let mut a_cur = Some(a.clone());
        while let Some(a_node) = a_cur {
            if a_node == b_node {
                return a_node;
            }
            if let Some(generic) = poly_instance_generic(&a_node, &b_node) {
                return generic_any_instance(&generic, any);
            }
            a_cur = a_node.super_type();
        }
        b_cur = b_node.super_type();
    }
    any.clone()
}

/// Substitutes every `poly_var(g, i)` occurrence in `t` with `params[i]`, rebuilding
/// instance nodes bottom-up through interning.
pub fn instantiate_type(t: &Type, g: &Generic, params: &[Type]) -> Type {
    match &t.0.payload {
        TypePayload::PolyVar { generic, index } if generic == g => params[*index].clone(),
        TypePayload::Instance {
            generic: tg,
            params: tparams,
        } => {
            let new_params: Vec<Type> = tparams
                .0
                .iter()
                .map(|p| instantiate_type(p, g, params))
                .collect();
            intern_instance(tg, ParamKey(Rc::from(new_params)))
        }
        _ => t.clone(),
    }
}

/// The fixed built-in lattice, shared by every [`crate::Runtime`] on the current thread
/// (see `crate::runtime`'s thread-local cache) so that built-in types compare equal by
/// identity across runtimes the same way the source's process-wide `init_types()` table
/// does.
#[derive(Clone)]
pub struct Builtins {
    pub any: Type,
    pub bool_: Type,
    pub improper_list: Type,
    pub proper_list: Type,
    pub list: Generic,
    pub nil: Type,
    pub num: Type,
    pub int: Type,
    pub float: Type,
    pub i64_: Type,
    pub f64_: Type,
    pub string: Type,
    pub symbol: Type,
    pub keyword: Type,
    pub quote: Type,
    pub continue_: Type,
    pub type_quote: Type,
    pub syntax: Type,
    pub type_: Type,
    pub func: Type,
    pub scope: Type,
    pub stream: Type,
    pub generic_type: Type,
}

impl Builtins {
    pub(crate) fn new() -> Builtins {
        let any = Type::simple(Internal::Nothing, None);
        let bool_ = Type::simple(Internal::Data, Some(any.clone()));
        let improper_list = Type::simple(Internal::Cons, Some(any.clone()));
        let proper_list = Type::simple(Internal::Nothing, Some(improper_list.clone()));
        let list = Generic::new(1, Internal::Cons, Some(proper_list.clone()));
        let nil = Type::simple(Internal::Nil, Some(get_poly_instance(&list)));
        let num = Type::simple(Internal::Nothing, Some(any.clone()));
        let int = Type::simple(Internal::I64, Some(num.clone()));
        let float = Type::simple(Internal::F64, Some(num.clone()));
        let i64_ = Type::simple(Internal::I64, Some(int.clone()));
        let f64_ = Type::simple(Internal::F64, Some(float.clone()));
        let string = Type::simple(Internal::String, Some(any.clone()));
        let symbol = Type::simple(Internal::Symbol, Some(any.clone()));
        let keyword = Type::simple(Internal::Symbol, Some(any.clone()));
        let quote = Type::simple(Internal::Quote, Some(any.clone()));
        let continue_ = Type::simple(Internal::Quote, Some(any.clone()));
        let type_quote = Type::simple(Internal::Quote, Some(any.clone()));
        let syntax = Type::simple(Internal::Syntax, Some(any.clone()));
        let type_ = Type::simple(Internal::Type, Some(any.clone()));
        let func = Type::simple(Internal::Nothing, Some(any.clone()));
        let scope = Type::simple(Internal::Reference, Some(any.clone()));
        let stream = Type::simple(Internal::Reference, Some(any.clone()));
        let generic_type = Type::simple(Internal::Reference, Some(any.clone()));
        Builtins {
            any,
            bool_,
            improper_list,
            proper_list,
            list,
            nil,
            num,
            int,
            float,
            i64_,
            f64_,
            string,
            symbol,
            keyword,
            quote,
            continue_,
            type_quote,
            syntax,
            type_,
            func,
            scope,
            stream,
            generic_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtins() -> Builtins {
        Builtins::new()
    }

    #[test]
    fn subtype_lattice_matches_the_builtin_hierarchy() {
        let b = builtins();
        let list_any = get_unary_instance(&b.list, b.any.clone()).unwrap();
        assert!(is_subtype_of(&b.nil, &list_any));
        assert!(is_subtype_of(&list_any, &b.proper_list));
        assert!(is_subtype_of(&b.proper_list, &b.improper_list));
        assert!(is_subtype_of(&b.improper_list, &b.any));
        assert!(is_subtype_of(&b.i64_, &b.int));
        assert!(is_subtype_of(&b.int, &b.num));
        assert!(is_subtype_of(&b.num, &b.any));

        for t in [
            &b.bool_,
            &b.improper_list,
            &b.proper_list,
            &b.nil,
            &b.num,
            &b.int,
            &b.float,
            &b.i64_,
            &b.f64_,
            &b.string,
            &b.symbol,
        ] {
            assert!(is_subtype_of(t, &b.any));
        }
    }

    #[test]
    fn closure_type_is_a_func_type_but_not_vice_versa() {
        use std::cell::RefCell as RC;
        let b = builtins();
        let func_types = RC::new(OpenHashMap::new());
        let closure_types = RC::new(OpenHashMap::new());
        let f20 = get_func_subtype(&func_types, FuncKey { min_arity: 1, variadic: false }, func_kind(), Internal::Func, b.func.clone());
        let c10 = get_func_subtype(&closure_types, FuncKey { min_arity: 1, variadic: false }, closure_kind(), Internal::Closure, f20.clone());
        assert!(is_subtype_of(&c10, &f20));
        assert!(!is_subtype_of(&f20, &c10));
    }

    #[test]
    fn unify_types_finds_common_ancestors_and_generic_instances() {
        let b = builtins();
        assert_eq!(unify_types(&b.i64_, &b.f64_, &b.any), b.num);
        assert_eq!(unify_types(&b.string, &b.i64_, &b.any), b.any);
        let list_int = get_unary_instance(&b.list, b.int.clone()).unwrap();
        let list_any = get_unary_instance(&b.list, b.any.clone()).unwrap();
        assert_eq!(unify_types(&b.nil, &list_int, &b.any), list_any);
    }

    #[test]
    fn instance_interning_and_gc_of_dead_instances() {
        let b = builtins();
        let a1 = get_unary_instance(&b.list, b.int.clone()).unwrap();
        let a2 = get_unary_instance(&b.list, b.int.clone()).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(b.list.0.instances.borrow().len(), 1);
        drop(a1);
        drop(a2);
        assert_eq!(b.list.0.instances.borrow().len(), 0);
        let a3 = get_unary_instance(&b.list, b.int.clone()).unwrap();
        assert_eq!(b.list.0.instances.borrow().len(), 1);
        drop(a3);
    }

    #[test]
    fn wrong_arity_is_a_domain_error() {
        let b = builtins();
        let err = get_instance(&b.list, vec![b.int.clone(), b.float.clone()]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DomainError);
    }
}
