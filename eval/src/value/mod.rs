//! The runtime representation of evaluated values.
//!
//! A [Value] is always in head-normal form; suspended computations
//! never appear here. They live as arena node states instead (see
//! [arena]): a node starts out as a thunk or application, passes
//! through the blackhole state while one thread evaluates it, and is
//! then published as one of these variants.

use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

use crate::env::{Bindings, Env};
use crate::errors::{Error, EvalResult};
use crate::expr::{Expr, Formals};
use crate::state::EvalState;
use crate::symbol::Symbol;

pub(crate) mod arena;

pub use arena::{Pending, ValueArena, ValueId};

/// A lambda together with the scope it closed over.
#[derive(Debug)]
pub struct Closure {
    pub argument: Option<Symbol>,
    pub formals: Option<Formals>,
    pub body: Arc<Expr>,
    pub env: Arc<Env>,
}

pub type PrimopFn = fn(&EvalState, &[ValueId]) -> EvalResult<Value>;

/// A built-in function, possibly partially applied.
#[derive(Clone)]
pub struct Primop {
    pub name: &'static str,
    pub arity: usize,
    pub args: Vec<ValueId>,
    pub func: PrimopFn,
}

impl Debug for Primop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "primop[{}]", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Path(PathBuf),
    Attrs(Arc<Bindings>),
    List(Arc<Vec<ValueId>>),
    Lambda(Arc<Closure>),
    Primop(Primop),
}

impl Value {
    pub fn attrs(bindings: Bindings) -> Self {
        Value::Attrs(Arc::new(bindings))
    }

    pub fn list(elements: Vec<ValueId>) -> Self {
        Value::List(Arc::new(elements))
    }

    /// The type name used in error messages.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::Path(_) => "path",
            Value::Attrs(_) => "set",
            Value::List(_) => "list",
            Value::Lambda(_) => "lambda",
            Value::Primop(_) => "primop",
        }
    }

    pub fn as_attrs(&self) -> Option<&Arc<Bindings>> {
        match self {
            Value::Attrs(attrs) => Some(attrs),
            _ => None,
        }
    }
}

pub(crate) fn type_error(expected: &'static str, actual: &Value) -> Error {
    crate::errors::ErrorKind::TypeError {
        expected,
        actual: actual.type_of(),
    }
    .into()
}
