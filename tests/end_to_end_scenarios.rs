//! End-to-end scenarios against the public `Runtime` surface, exercising full paths
//! across modules, types, and scope plus the cross-cutting reference-balance property
//! that doesn't fit naturally inside a single module's unit tests.

use nse_rt::types::{get_unary_instance, is_subtype_of};
use nse_rt::{NseResult, Runtime, Value};

fn init_logging() {
    let _ = simple_logger::init_with_level(log::Level::Trace);
}

#[test]
fn ext_define_then_find_symbol_round_trips() -> NseResult<()> {
    init_logging();
    let rt = Runtime::new();
    let m = rt.create_module("m")?;
    let pi = m.ext_define("pi", Value::F64(3.14))?;
    let found = rt.find_symbol("m/pi")?;
    assert_eq!(found, pi);
    match m.get_def(&found) {
        Some(Value::F64(x)) => assert_eq!(x, 3.14),
        other => panic!("expected F64(3.14), got {other:?}"),
    }
    Ok(())
}

#[test]
fn func_types_are_interned_per_arity_and_variadic_flag() {
    let rt = Runtime::new();
    assert_eq!(rt.get_func_type(2, false), rt.get_func_type(2, false));
    assert_ne!(rt.get_func_type(2, false), rt.get_func_type(2, true));
}

#[test]
fn unary_instance_interning_and_gc() -> NseResult<()> {
    let rt = Runtime::new();
    let int_type = rt.builtins.int.clone();
    let a = get_unary_instance(&rt.builtins.list, int_type.clone())?;
    let b = get_unary_instance(&rt.builtins.list, int_type.clone())?;
    assert_eq!(a, b);
    drop(a);
    drop(b);
    // Both strong references are gone, so this allocates a fresh node rather than
    // resurrecting the dead one — the weak cache entry was detached on drop.
    let c = get_unary_instance(&rt.builtins.list, int_type.clone())?;
    let d = get_unary_instance(&rt.builtins.list, int_type)?;
    assert_eq!(c, d);
    Ok(())
}

#[test]
fn closure_is_a_func_type_but_not_vice_versa() {
    let rt = Runtime::new();
    let closure_ty = rt.get_closure_type(1, false);
    let func_ty = rt.get_func_type(1, false);
    assert!(is_subtype_of(&closure_ty, &func_ty));
    assert!(!is_subtype_of(&func_ty, &closure_ty));
}

#[test]
fn shadow_then_pop_uncovers_the_prior_binding() -> NseResult<()> {
    let rt = Runtime::new();
    let m = rt.create_module("m")?;
    let x = m.intern("x")?;
    let scope = nse_rt::Scope::anchor(m)
        .push(x.clone(), Value::I64(1))
        .push(x.clone(), Value::I64(2));
    assert!(matches!(scope.get(&x)?, Value::I64(2)));
    let popped = scope.pop();
    assert!(matches!(popped.get(&x)?, Value::I64(1)));
    Ok(())
}

#[test]
fn method_dispatch_is_an_exact_tuple_lookup() -> NseResult<()> {
    let rt = Runtime::new();
    let m = rt.create_module("m")?;
    let f = m.intern("f")?;
    m.define_method(
        &f,
        vec![rt.builtins.int.clone(), rt.builtins.int.clone()],
        Value::Str("int-int-method".into()),
    )?;
    assert!(m
        .find_method(&f, &[rt.builtins.int.clone(), rt.builtins.int.clone()])
        .is_some());
    assert!(m
        .find_method(&f, &[rt.builtins.int.clone(), rt.builtins.num.clone()])
        .is_none());
    Ok(())
}

#[test]
fn qualified_parse_resolves_double_slash_modules() -> NseResult<()> {
    let rt = Runtime::new();
    let a_b = rt.create_module("a/b")?;
    let c = a_b.intern("c")?;
    a_b.define(&c, Value::I64(9))?;
    a_b.r#extern("c")?;
    assert_eq!(rt.find_symbol("a/b/c")?, c);
    Ok(())
}

#[test]
fn reference_balance_no_leak_on_a_chain_of_cons_cells() {
    use std::rc::Rc;
    let s: Rc<str> = Rc::from("a");
    let mut list = Value::Nil;
    for _ in 0..1000 {
        list = Value::cons(Value::Str(Rc::clone(&s)), list);
    }
    assert_eq!(Rc::strong_count(&s), 1001);
    drop(list);
    assert_eq!(Rc::strong_count(&s), 1);
}
