//! The expression AST driven by the evaluator.
//!
//! There is no parser in this crate; expressions are constructed
//! programmatically by embedders (and tests). The surface is the
//! subset the dispatch pipeline demands: lazy bindings, attribute
//! sets, lists, functions with formal parameters, conditionals and
//! assertions.

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::Pos;
use crate::symbol::Symbol;

#[derive(Clone, Debug)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
    Path(PathBuf),
    Null,
}

/// Formal parameters of a lambda, e.g. `{ a, b ? default, ... }`.
#[derive(Clone, Debug)]
pub struct Formals {
    /// Parameter name and optional default expression.
    pub arguments: Vec<(Symbol, Option<Arc<Expr>>)>,
    /// Whether extra attributes are permitted (`...`).
    pub ellipsis: bool,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),

    Var(Symbol, Pos),

    List(Vec<Arc<Expr>>),

    /// An attribute set. With `recursive`, the entries are in scope
    /// for each other's expressions.
    Attrs {
        recursive: bool,
        entries: Vec<(Symbol, Arc<Expr>, Pos)>,
    },

    /// `let` bindings are always mutually recursive.
    Let {
        bindings: Vec<(Symbol, Arc<Expr>)>,
        body: Arc<Expr>,
    },

    Select {
        subject: Arc<Expr>,
        name: Symbol,
        /// `or` fallback when the attribute is missing.
        default: Option<Arc<Expr>>,
        pos: Pos,
    },

    Lambda {
        argument: Option<Symbol>,
        formals: Option<Formals>,
        body: Arc<Expr>,
    },

    Apply {
        function: Arc<Expr>,
        argument: Arc<Expr>,
    },

    If {
        condition: Arc<Expr>,
        then_body: Arc<Expr>,
        else_body: Arc<Expr>,
    },

    Assert {
        condition: Arc<Expr>,
        body: Arc<Expr>,
        pos: Pos,
    },
}

/// Shorthand constructors, mostly for embedders and tests.
impl Expr {
    pub fn int(i: i64) -> Arc<Expr> {
        Arc::new(Expr::Literal(Literal::Int(i)))
    }

    pub fn bool(b: bool) -> Arc<Expr> {
        Arc::new(Expr::Literal(Literal::Bool(b)))
    }

    pub fn string(s: impl Into<String>) -> Arc<Expr> {
        Arc::new(Expr::Literal(Literal::String(s.into())))
    }

    pub fn null() -> Arc<Expr> {
        Arc::new(Expr::Literal(Literal::Null))
    }

    pub fn var(name: Symbol) -> Arc<Expr> {
        Arc::new(Expr::Var(name, Pos::NONE))
    }

    pub fn attrs(entries: Vec<(Symbol, Arc<Expr>)>) -> Arc<Expr> {
        Arc::new(Expr::Attrs {
            recursive: false,
            entries: entries
                .into_iter()
                .map(|(name, expr)| (name, expr, Pos::NONE))
                .collect(),
        })
    }

    pub fn rec_attrs(entries: Vec<(Symbol, Arc<Expr>)>) -> Arc<Expr> {
        Arc::new(Expr::Attrs {
            recursive: true,
            entries: entries
                .into_iter()
                .map(|(name, expr)| (name, expr, Pos::NONE))
                .collect(),
        })
    }

    pub fn let_in(bindings: Vec<(Symbol, Arc<Expr>)>, body: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Let { bindings, body })
    }

    pub fn select(subject: Arc<Expr>, name: Symbol) -> Arc<Expr> {
        Arc::new(Expr::Select {
            subject,
            name,
            default: None,
            pos: Pos::NONE,
        })
    }

    pub fn apply(function: Arc<Expr>, argument: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Apply { function, argument })
    }

    pub fn assert_(condition: Arc<Expr>, body: Arc<Expr>) -> Arc<Expr> {
        Arc::new(Expr::Assert {
            condition,
            body,
            pos: Pos::NONE,
        })
    }
}
