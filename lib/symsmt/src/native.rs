//! An in-process z3 [`Backend`], available with the `z3` feature.
use std::{str::FromStr, time::Duration};

use itertools::Itertools;
use z3::{
    FuncDecl, Params, SatResult, Solver, SortKind,
    ast::{self, Ast},
};

use crate::{
    backend::{Backend, CheckOutcome, TermOp},
    error::{Error, Result},
    expr::Literal,
    model::{FuncEntry, FuncTable, Value},
    sexp,
    sort::{FuncSort, Sort},
};

pub struct Z3 {
    solver: Solver,
    model: Option<z3::Model>,
}

impl Z3 {
    pub fn new() -> Z3 {
        Z3 { solver: Solver::new(), model: None }
    }

    fn model(&self) -> Result<&z3::Model> {
        self.model.as_ref().ok_or(Error::NoModelAvailable)
    }
}

impl Default for Z3 {
    fn default() -> Self {
        Z3::new()
    }
}

fn z3_sort(sort: &Sort) -> Result<z3::Sort> {
    match sort {
        Sort::Int => Ok(z3::Sort::int()),
        Sort::Real => Ok(z3::Sort::real()),
        Sort::Bool => Ok(z3::Sort::bool()),
        Sort::Func(_) => Err(Error::InvalidSort(format!("`{sort}` is not a scalar sort"))),
    }
}

/// Reads a z3 value through its SMT-LIB rendering.
fn read_value(ast: &ast::Dynamic, sort: &Sort) -> Result<Value> {
    let text = ast.to_string();
    let sexp = sexp::parse(&text)
        .map_err(|err| Error::engine(format!("cannot read z3 value `{text}`: {err}")))?;
    Value::from_sexp(&sexp, sort)
}

impl Backend for Z3 {
    type Term = ast::Dynamic;
    type Fun = FuncDecl;

    fn declare_const(&mut self, name: &str, sort: &Sort) -> Result<ast::Dynamic> {
        match sort {
            Sort::Int => Ok(ast::Int::new_const(name).into()),
            Sort::Real => Ok(ast::Real::new_const(name).into()),
            Sort::Bool => Ok(ast::Bool::new_const(name).into()),
            Sort::Func(_) => Err(Error::InvalidSort(format!("`{sort}` is not a scalar sort"))),
        }
    }

    fn declare_fun(&mut self, name: &str, sort: &FuncSort) -> Result<FuncDecl> {
        let domain = sort.domain().iter().map(z3_sort).collect::<Result<Vec<_>>>()?;
        let domain_refs = domain.iter().collect_vec();
        Ok(FuncDecl::new(name, &domain_refs, &z3_sort(sort.range())?))
    }

    fn literal(&mut self, lit: &Literal) -> Result<ast::Dynamic> {
        let invalid = || Error::InvalidOperand(format!("z3 rejected the literal `{lit}`"));
        match lit {
            Literal::Bool(b) => Ok(ast::Bool::from_bool(*b).into()),
            Literal::Int(n) => {
                ast::Int::from_str(&n.to_string())
                    .map(Into::into)
                    .map_err(|_| invalid())
            }
            Literal::Real(q) => {
                ast::Real::from_rational_str(&q.numer().to_string(), &q.denom().to_string())
                    .map(Into::into)
                    .ok_or_else(invalid)
            }
        }
    }

    fn apply(&mut self, op: TermOp, args: &[ast::Dynamic]) -> Result<ast::Dynamic> {
        let ill_sorted = || Error::engine(format!("ill-sorted arguments for `{op}`"));
        match op {
            TermOp::Eq => Ok(args[0].eq(&args[1]).into()),
            TermOp::Distinct => Ok(args[0].eq(&args[1]).not().into()),
            TermOp::Not | TermOp::And | TermOp::Or | TermOp::Xor | TermOp::Implies => {
                let bools = args
                    .iter()
                    .map(ast::Dynamic::as_bool)
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(ill_sorted)?;
                let bool_refs = bools.iter().collect_vec();
                let res = match op {
                    TermOp::Not => bools[0].not(),
                    TermOp::And => ast::Bool::and(&bool_refs),
                    TermOp::Or => ast::Bool::or(&bool_refs),
                    TermOp::Xor => {
                        bools[1..]
                            .iter()
                            .fold(bools[0].clone(), |acc, b| acc.xor(b))
                    }
                    _ => bools[0].implies(&bools[1]),
                };
                Ok(res.into())
            }
            TermOp::ToReal => Ok(args[0].as_int().ok_or_else(ill_sorted)?.to_real().into()),
            _ => {
                match args[0].sort_kind() {
                    SortKind::Int => {
                        let ints = args
                            .iter()
                            .map(ast::Dynamic::as_int)
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(ill_sorted)?;
                        int_op(op, &ints).ok_or_else(ill_sorted)
                    }
                    SortKind::Real => {
                        let reals = args
                            .iter()
                            .map(ast::Dynamic::as_real)
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(ill_sorted)?;
                        real_op(op, &reals).ok_or_else(ill_sorted)
                    }
                    _ => Err(ill_sorted()),
                }
            }
        }
    }

    fn call(&mut self, fun: &FuncDecl, args: &[ast::Dynamic]) -> Result<ast::Dynamic> {
        let arg_refs = args.iter().map(|a| a as &dyn Ast).collect_vec();
        Ok(fun.apply(&arg_refs))
    }

    fn assert(&mut self, term: &ast::Dynamic) -> Result<()> {
        let term = term
            .as_bool()
            .ok_or_else(|| Error::engine(format!("cannot assert the non boolean term `{term}`")))?;
        self.solver.assert(term);
        Ok(())
    }

    fn check(&mut self, deadline: Option<Duration>) -> Result<CheckOutcome> {
        self.model = None;
        if let Some(deadline) = deadline {
            let mut params = Params::new();
            params.set_u32("timeout", u32::try_from(deadline.as_millis()).unwrap_or(u32::MAX));
            self.solver.set_params(&params);
        }
        match self.solver.check() {
            SatResult::Sat => {
                self.model = self.solver.get_model();
                Ok(CheckOutcome::Sat)
            }
            SatResult::Unsat => Ok(CheckOutcome::Unsat),
            SatResult::Unknown => {
                let reason = self
                    .solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string());
                if reason.contains("timeout") || reason.contains("canceled") {
                    Ok(CheckOutcome::Unknown("timeout".to_string()))
                } else {
                    Ok(CheckOutcome::Unknown(reason))
                }
            }
        }
    }

    fn const_value(&mut self, term: &ast::Dynamic, sort: &Sort) -> Result<Value> {
        let value = self
            .model()?
            .eval(term, true)
            .ok_or_else(|| Error::engine(format!("z3 cannot evaluate `{term}`")))?;
        read_value(&value, sort)
    }

    fn fun_interp(&mut self, fun: &FuncDecl, sort: &FuncSort) -> Result<FuncTable> {
        let Some(interp) = self.model()?.get_func_interp(fun) else {
            return Ok(FuncTable::constant_default(sort.clone()));
        };
        let mut entries = vec![];
        for entry in interp.get_entries() {
            let args = entry
                .get_args()
                .iter()
                .zip(sort.domain())
                .map(|(arg, sort)| read_value(arg, sort))
                .collect::<Result<Vec<_>>>()?;
            entries.push(FuncEntry::exact(args, read_value(&entry.get_value(), sort.range())?));
        }
        let default = read_value(&interp.get_else(), sort.range())?;
        FuncTable::new(sort.clone(), entries, default)
    }
}

fn int_op(op: TermOp, xs: &[ast::Int]) -> Option<ast::Dynamic> {
    let refs = xs.iter().collect_vec();
    let res = match op {
        TermOp::Neg => ast::Int::sub(&[&ast::Int::from_i64(0), &xs[0]]).into(),
        TermOp::Add => ast::Int::add(&refs).into(),
        TermOp::Sub => ast::Int::sub(&refs).into(),
        TermOp::Mul => ast::Int::mul(&refs).into(),
        TermOp::IntDiv => xs[0].div(&xs[1]).into(),
        TermOp::Mod => xs[0].modulo(&xs[1]).into(),
        TermOp::Lt => xs[0].lt(&xs[1]).into(),
        TermOp::Le => xs[0].le(&xs[1]).into(),
        TermOp::Gt => xs[0].gt(&xs[1]).into(),
        TermOp::Ge => xs[0].ge(&xs[1]).into(),
        _ => return None,
    };
    Some(res)
}

fn real_op(op: TermOp, xs: &[ast::Real]) -> Option<ast::Dynamic> {
    let refs = xs.iter().collect_vec();
    let res = match op {
        TermOp::Neg => ast::Real::sub(&[&ast::Int::from_i64(0).to_real(), &xs[0]]).into(),
        TermOp::Add => ast::Real::add(&refs).into(),
        TermOp::Sub => ast::Real::sub(&refs).into(),
        TermOp::Mul => ast::Real::mul(&refs).into(),
        TermOp::Div => xs[0].div(&xs[1]).into(),
        TermOp::Lt => xs[0].lt(&xs[1]).into(),
        TermOp::Le => xs[0].le(&xs[1]).into(),
        TermOp::Gt => xs[0].gt(&xs[1]).into(),
        TermOp::Ge => xs[0].ge(&xs[1]).into(),
        _ => return None,
    };
    Some(res)
}
