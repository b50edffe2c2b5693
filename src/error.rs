//! Error taxonomy for the runtime core.

use std::error::Error;
use std::fmt::{self, Display};

/// The four error kinds the core ever raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Allocation failed.
    OutOfMemory,
    /// Unknown module/symbol/macro/read-macro, duplicate module, unbound scope reference,
    /// or a rejected import conflict.
    NameError,
    /// Structural misuse: wrong arity, non-symbol where required, empty intern name.
    DomainError,
    /// Runtime subtype mismatch surfaced by the evaluator via this core's machinery.
    TypeError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::NameError => "name-error",
            ErrorKind::DomainError => "domain-error",
            ErrorKind::TypeError => "type-error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct NseError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        NseError {
            kind,
            message: message.into(),
        }
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    pub fn domain_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DomainError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfMemory, message)
    }
}

impl Display for NseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for NseError {}

pub type NseResult<T> = Result<T, NseError>;
