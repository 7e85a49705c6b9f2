use std::{fmt, time::Duration};

use crate::{
    error::Result,
    expr::Literal,
    model::{FuncTable, Value},
    sort::{FuncSort, Sort},
};

/// The boundary to an SMT engine.
///
/// The compiler drives an engine only through these calls. Model introspection is only valid
/// after `check` answered `sat`.
pub trait Backend {
    /// Engine-native term.
    type Term: Clone;
    /// Engine-native handle for a declared function.
    type Fun;

    fn declare_const(&mut self, name: &str, sort: &Sort) -> Result<Self::Term>;

    fn declare_fun(&mut self, name: &str, sort: &FuncSort) -> Result<Self::Fun>;

    fn literal(&mut self, lit: &Literal) -> Result<Self::Term>;

    /// Builds `(op args...)`. The compiler guarantees that the arguments of arithmetic and
    /// comparison operators all have the same sort.
    fn apply(&mut self, op: TermOp, args: &[Self::Term]) -> Result<Self::Term>;

    fn call(&mut self, fun: &Self::Fun, args: &[Self::Term]) -> Result<Self::Term>;

    /// Called for terms used more than once. An engine whose terms are not hash-consed can bind
    /// the term to a name and return the name instead.
    fn share(&mut self, term: Self::Term, _sort: &Sort) -> Result<Self::Term> {
        Ok(term)
    }

    fn assert(&mut self, term: &Self::Term) -> Result<()>;

    /// Checks satisfiability of the asserted terms. Blocks until the engine answers or
    /// `deadline` expires, in which case the outcome is `Unknown("timeout")`.
    fn check(&mut self, deadline: Option<Duration>) -> Result<CheckOutcome>;

    /// Value of a constant in the model of the last `sat` check.
    fn const_value(&mut self, term: &Self::Term, sort: &Sort) -> Result<Value>;

    /// Interpretation of a function in the model of the last `sat` check.
    fn fun_interp(&mut self, fun: &Self::Fun, sort: &FuncSort) -> Result<FuncTable>;
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CheckOutcome {
    Sat,
    Unsat,
    Unknown(String),
}

/// Engine operators, named after their SMT-LIB symbols.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TermOp {
    Neg,
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    ToReal,
    Eq,
    Distinct,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    And,
    Or,
    Xor,
    Implies,
}

impl TermOp {
    pub fn symbol(self) -> &'static str {
        match self {
            TermOp::Neg | TermOp::Sub => "-",
            TermOp::Add => "+",
            TermOp::Mul => "*",
            TermOp::Div => "/",
            TermOp::IntDiv => "div",
            TermOp::Mod => "mod",
            TermOp::ToReal => "to_real",
            TermOp::Eq => "=",
            TermOp::Distinct => "distinct",
            TermOp::Lt => "<",
            TermOp::Le => "<=",
            TermOp::Gt => ">",
            TermOp::Ge => ">=",
            TermOp::Not => "not",
            TermOp::And => "and",
            TermOp::Or => "or",
            TermOp::Xor => "xor",
            TermOp::Implies => "=>",
        }
    }
}

impl fmt::Display for TermOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}
