//! Runtime core (values, types, modules, scope) for the NSE Lisp-family language:
//! the hash-table substrate, value representation, type lattice, module/symbol
//! registry, and lexical scope chain a host embedding builds an evaluator on top of.
//! Parsing, evaluation, and the standard library are out of scope here.

pub mod error;
pub mod hashmap;
pub mod module;
pub mod runtime;
pub mod scope;
pub mod stream;
pub mod symbol;
pub mod types;
pub mod value;

pub use error::{ErrorKind, NseError, NseResult};
pub use module::Module;
pub use runtime::Runtime;
pub use scope::Scope;
pub use symbol::Symbol;
pub use types::Type;
pub use value::Value;
