use std::time::Duration;

use rustc_hash::FxHashMap;
use symsmt_common::dbg;
use symsmt_config::SolverConfig;
use tracing::{debug, info, info_span, warn};

use crate::{
    backend::{Backend, CheckOutcome},
    compile,
    error::{Error, Result},
    expr::{self, Decl, Expr, ExprKind},
    model::Model,
    smtlib::SmtLib,
    sort::Sort,
};

/// The declared symbols of a session, in declaration order.
#[derive(Default, Debug)]
struct Registry {
    decls: Vec<Decl>,
    by_name: FxHashMap<String, usize>,
}

impl Registry {
    fn insert(&mut self, name: String, sort: Sort) -> Result<Decl> {
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateDeclaration(name));
        }
        let decl = Decl::new(name.clone(), sort);
        self.by_name.insert(name, self.decls.len());
        self.decls.push(decl.clone());
        Ok(decl)
    }

    fn lookup(&self, name: &str) -> Option<&Decl> {
        self.by_name.get(name).map(|&i| &self.decls[i])
    }

    /// Whether `decl` is the very declaration registered here under its name.
    fn contains(&self, decl: &Decl) -> bool {
        self.lookup(decl.name()).is_some_and(|d| d == decl)
    }
}

/// A solving session: a registry of declarations plus the constraints asserted over them.
///
/// ```ignore
/// let mut s = Session::new();
/// let n = s.declare("n", Sort::Int)?;
/// s.assert(n.expr().gt(0)?)?;
/// let result = s.solve(None)?;
/// assert!(*result.model()?.int(&n)? > 0.into());
/// ```
#[derive(Debug)]
pub struct Session {
    solver: SolverConfig,
    registry: Registry,
    constraints: Vec<Expr>,
}

impl Session {
    /// A session solved with the solver configured for this process.
    pub fn new() -> Session {
        Session::with_solver(SolverConfig::from_flags())
    }

    pub fn with_solver(solver: SolverConfig) -> Session {
        Session { solver, registry: Registry::default(), constraints: vec![] }
    }

    pub fn solver(&self) -> &SolverConfig {
        &self.solver
    }

    /// Registers a new symbol. Names are unique within a session.
    pub fn declare(&mut self, name: impl Into<String>, sort: Sort) -> Result<Decl> {
        let name = name.into();
        check_name(&name)?;
        let decl = self.registry.insert(name, sort)?;
        debug!(decl = ?decl, "declared");
        Ok(decl)
    }

    /// Adds a constraint. Fails if `constraint` is not a `Bool` or mentions a declaration that
    /// does not belong to this session.
    pub fn assert(&mut self, constraint: impl Into<Expr>) -> Result<()> {
        let constraint = constraint.into();
        if *constraint.sort() != Sort::Bool {
            return Err(Error::mismatch("assert", "Bool", constraint.sort()));
        }
        let mut undeclared = None;
        constraint.visit_post_order(&mut |e| {
            if let ExprKind::Ref(decl) | ExprKind::Call(decl, _) = e.kind() {
                if undeclared.is_none() && !self.registry.contains(decl) {
                    undeclared = Some(decl.name().to_string());
                }
            }
        });
        if let Some(name) = undeclared {
            return Err(Error::UndeclaredSymbol(name));
        }
        debug!(%constraint, "collected");
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn declarations(&self) -> &[Decl] {
        &self.registry.decls
    }

    pub fn constraints(&self) -> &[Expr] {
        &self.constraints
    }

    pub fn lookup(&self, name: &str) -> Option<&Decl> {
        self.registry.lookup(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.registry.by_name.contains_key(name)
    }

    /// Checks the constraints asserted so far on a fresh solver process. Without a `deadline`
    /// the configured default applies. Calling it again, possibly after more assertions, starts
    /// over from scratch.
    pub fn solve(&self, deadline: Option<Duration>) -> Result<SolveResult> {
        let name = dbg::next_dump_name();
        let mut backend = SmtLib::spawn_named(&self.solver, name.clone())?;
        self.solve_in(&mut backend, deadline.or(self.solver.timeout), &name)
    }

    /// Like [`Session::solve`] but on a caller supplied engine, which must not hold any
    /// declaration or assertion yet. Without a `deadline` the configured default applies.
    pub fn solve_with<B: Backend>(
        &self,
        backend: &mut B,
        deadline: Option<Duration>,
    ) -> Result<SolveResult> {
        self.solve_in(backend, deadline.or(self.solver.timeout), &dbg::next_dump_name())
    }

    fn solve_in<B: Backend>(
        &self,
        backend: &mut B,
        deadline: Option<Duration>,
        dump_name: &str,
    ) -> Result<SolveResult> {
        let span = info_span!(
            "solve",
            decls = self.registry.decls.len(),
            constraints = self.constraints.len()
        );
        let _enter = span.enter();

        let symbols = compile::compile(backend, &self.registry.decls, &self.constraints)?;
        let result = match backend.check(deadline)? {
            CheckOutcome::Sat => {
                let model = compile::extract_model(backend, &symbols)?;
                if let Err(err) = dbg::dump_model(dump_name, &model) {
                    warn!(%err, "cannot dump model");
                }
                SolveResult::Sat(model)
            }
            CheckOutcome::Unsat => SolveResult::Unsat,
            CheckOutcome::Unknown(reason) => SolveResult::Unknown(reason),
        };
        info!(result = result.kind(), "solved");
        Ok(result)
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// Names are always written as quoted SMT-LIB symbols, which cannot contain `|` or `\`. Names
/// starting with `%` are reserved for terms introduced by the compiler. Builtin symbols such as
/// `true` or `div` keep their meaning even when quoted and are rejected.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidOperand("empty symbol name".into()));
    }
    if name.starts_with('%') {
        return Err(Error::InvalidOperand(format!("`{name}` uses the reserved prefix `%`")));
    }
    if name.contains(['|', '\\']) {
        return Err(Error::InvalidOperand(format!("`{name}` contains `|` or `\\`")));
    }
    if expr::is_reserved_symbol(name) {
        return Err(Error::InvalidOperand(format!("`{name}` is a reserved SMT-LIB symbol")));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub enum SolveResult {
    Sat(Model),
    Unsat,
    /// The engine gave up, e.g. on a timeout or an incomplete theory.
    Unknown(String),
}

impl SolveResult {
    pub fn is_sat(&self) -> bool {
        matches!(self, SolveResult::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, SolveResult::Unsat)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SolveResult::Unknown(_))
    }

    /// Fails with [`Error::NoModelAvailable`] unless the result is `Sat`.
    pub fn model(&self) -> Result<&Model> {
        match self {
            SolveResult::Sat(model) => Ok(model),
            _ => Err(Error::NoModelAvailable),
        }
    }

    pub fn into_model(self) -> Result<Model> {
        match self {
            SolveResult::Sat(model) => Ok(model),
            _ => Err(Error::NoModelAvailable),
        }
    }

    fn kind(&self) -> &str {
        match self {
            SolveResult::Sat(_) => "sat",
            SolveResult::Unsat => "unsat",
            SolveResult::Unknown(reason) => reason,
        }
    }
}
