//! Typed symbolic expressions over integers, reals, booleans and uninterpreted functions, solved
//! by an external SMT engine.
//!
//! Symbols are declared in a [`Session`], combined into [`Expr`] trees with the constructors in
//! [`builder`], and asserted explicitly. [`Session::solve`] lowers everything to the engine and
//! returns a [`SolveResult`] whose [`Model`] can be queried per declaration.
pub mod backend;
pub mod builder;
mod compile;
pub mod error;
pub mod expr;
pub mod model;
#[cfg(feature = "z3")]
pub mod native;
mod session;
pub mod sexp;
pub mod smtlib;
pub mod sort;

pub use backend::{Backend, CheckOutcome, TermOp};
pub use error::{Error, Result};
pub use expr::{BinOp, BinRel, BoolOp, Decl, Expr, ExprKind, Literal, NodeId, UnOp};
pub use model::{ArgPattern, Assignment, FuncEntry, FuncTable, Model, Value};
pub use session::{Session, SolveResult};
pub use smtlib::SmtLib;
pub use sort::{FuncSort, Sort};
pub use symsmt_common::logger::install as install_tracing;
pub use symsmt_config::{SmtSolver, SolverConfig};
