use std::io;

use thiserror::Error;

/// Errors raised while declaring, building, asserting, solving or reading a model.
///
/// Everything up to [`Error::InvalidSort`] is detected eagerly, at the call that caused it, and
/// never reaches the engine. An engine that cannot decide satisfiability is not an error, see
/// [`crate::SolveResult::Unknown`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{0}` is already declared in this session")]
    DuplicateDeclaration(String),
    #[error("`{0}` is not declared in this session")]
    UndeclaredSymbol(String),
    #[error("type mismatch in `{op}`: expected {expected}, found {found}")]
    TypeMismatch { op: String, expected: String, found: String },
    #[error("`{func}` takes {expected} argument(s) but {found} were supplied")]
    InvalidArity { func: String, expected: usize, found: usize },
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error("invalid sort: {0}")]
    InvalidSort(String),
    #[error("no model available, the last result was not `sat`")]
    NoModelAvailable,
    #[error("division by zero while evaluating `{0}`")]
    DivisionByZero(String),
    #[error("solver error: {0}")]
    Engine(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn mismatch(
        op: impl Into<String>,
        expected: impl Into<String>,
        found: impl ToString,
    ) -> Self {
        Error::TypeMismatch { op: op.into(), expected: expected.into(), found: found.to_string() }
    }

    pub(crate) fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
