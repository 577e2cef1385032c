use std::fmt::Display;

use styx_compat::Interrupted;

/// A source position attached to bindings and error messages. The
/// parser producing real positions is out of scope here; programmatic
/// ASTs mostly carry [Pos::NONE].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub const NONE: Pos = Pos { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Pos { line, column }
    }

    pub fn is_none(&self) -> bool {
        *self == Pos::NONE
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("value is a {actual} while a {expected} was expected")]
    TypeError {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("infinite recursion encountered")]
    InfiniteRecursion,

    #[error("assertion failed")]
    Assertion,

    #[error("undefined variable '{0}'")]
    UnknownVariable(String),

    #[error("attribute '{0}' missing")]
    MissingAttribute(String),

    #[error("function called without required argument '{0}'")]
    MissingArgument(String),

    #[error("function called with unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("{0}")]
    EvalError(String),
}

/// An [ErrorKind], annotated with a source position where one was
/// available at the raise site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub pos: Option<Pos>,
}

impl Error {
    pub fn new(kind: ErrorKind, pos: Pos) -> Self {
        Error {
            kind,
            pos: if pos.is_none() { None } else { Some(pos) },
        }
    }

    /// Attach a position to an error that does not carry one yet.
    pub fn at(mut self, pos: Pos) -> Self {
        if self.pos.is_none() && !pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind, pos: None }
    }
}

impl From<Interrupted> for Error {
    fn from(i: Interrupted) -> Self {
        ErrorKind::from(i).into()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{}, at {}", self.kind, pos),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

pub type EvalResult<T> = Result<T, Error>;
