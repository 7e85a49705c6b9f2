use std::{collections::HashMap, time::Duration};

use num_bigint::BigInt;
use num_rational::BigRational;
use symsmt::{
    Backend, CheckOutcome, Error, Expr, FuncEntry, FuncSort, FuncTable, Literal, Session,
    SmtSolver, SolveResult, SolverConfig, Sort, TermOp, Value,
};

/// An engine that renders terms as SMT-LIB text and answers `check` from a script.
#[derive(Default)]
struct Scripted {
    log: Vec<String>,
    outcome: Option<CheckOutcome>,
    consts: HashMap<String, Value>,
    funs: HashMap<String, FuncTable>,
    deadline: Option<Duration>,
    fail_check: bool,
}

impl Scripted {
    fn answering(outcome: CheckOutcome) -> Scripted {
        Scripted { outcome: Some(outcome), ..Default::default() }
    }

    fn with_const(mut self, name: &str, value: Value) -> Scripted {
        self.consts.insert(name.to_string(), value);
        self
    }

    fn with_fun(mut self, name: &str, table: FuncTable) -> Scripted {
        self.funs.insert(name.to_string(), table);
        self
    }
}

impl Backend for Scripted {
    type Term = String;
    type Fun = String;

    fn declare_const(&mut self, name: &str, sort: &Sort) -> symsmt::Result<String> {
        self.log.push(format!("(declare-const {name} {sort})"));
        Ok(name.to_string())
    }

    fn declare_fun(&mut self, name: &str, sort: &FuncSort) -> symsmt::Result<String> {
        self.log.push(format!("(declare-fun {name} {sort})"));
        Ok(name.to_string())
    }

    fn literal(&mut self, lit: &Literal) -> symsmt::Result<String> {
        Ok(lit.to_string())
    }

    fn apply(&mut self, op: TermOp, args: &[String]) -> symsmt::Result<String> {
        Ok(format!("({op} {})", args.join(" ")))
    }

    fn call(&mut self, fun: &String, args: &[String]) -> symsmt::Result<String> {
        Ok(format!("({fun} {})", args.join(" ")))
    }

    fn assert(&mut self, term: &String) -> symsmt::Result<()> {
        self.log.push(format!("(assert {term})"));
        Ok(())
    }

    fn check(&mut self, deadline: Option<Duration>) -> symsmt::Result<CheckOutcome> {
        self.deadline = deadline;
        if self.fail_check {
            return Err(Error::Engine("out of memory".to_string()));
        }
        Ok(self.outcome.clone().unwrap_or(CheckOutcome::Unknown("unscripted".to_string())))
    }

    fn const_value(&mut self, term: &String, sort: &Sort) -> symsmt::Result<Value> {
        Ok(self
            .consts
            .get(term)
            .cloned()
            .unwrap_or_else(|| Value::default_for(sort)))
    }

    fn fun_interp(&mut self, fun: &String, sort: &FuncSort) -> symsmt::Result<FuncTable> {
        Ok(self
            .funs
            .get(fun)
            .cloned()
            .unwrap_or_else(|| FuncTable::constant_default(sort.clone())))
    }
}

fn int(n: i64) -> Value {
    Value::Int(BigInt::from(n))
}

fn real(p: i64, q: i64) -> Value {
    Value::Real(BigRational::new(p.into(), q.into()))
}

#[test]
fn sat_models_cover_every_declaration() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    let x = s.declare("x", Sort::Real).unwrap();
    let b = s.declare("b", Sort::Bool).unwrap();
    let f = s.declare("f", Sort::func([Sort::Int, Sort::Int], Sort::Real).unwrap()).unwrap();

    s.assert(n.expr().gt(0).unwrap()).unwrap();
    s.assert(n.expr().lt(5).unwrap()).unwrap();
    let lhs = f.call([n.expr(), n.expr().add(1).unwrap()]).unwrap();
    let rhs = Expr::literal(-2).mul(&x).unwrap();
    s.assert(lhs.eq(rhs).unwrap()).unwrap();

    let fsort = f.sort().as_func().unwrap().clone();
    let table = FuncTable::new(fsort, vec![FuncEntry::exact([int(3), int(4)], real(-3, 1))], real(0, 1))
        .unwrap();
    let mut engine = Scripted::answering(CheckOutcome::Sat)
        .with_const("n", int(3))
        .with_const("x", real(3, 2))
        .with_fun("f", table);

    let result = s.solve_with(&mut engine, None).unwrap();
    assert!(result.is_sat());
    assert_eq!(
        engine.log,
        [
            "(declare-const n Int)",
            "(declare-const x Real)",
            "(declare-const b Bool)",
            "(declare-fun f (Int Int) Real)",
            "(assert (> n 0))",
            "(assert (< n 5))",
            "(assert (= (f n (+ n 1)) (* (- 2.0) x)))",
        ]
    );

    let model = result.model().unwrap();
    assert_eq!(model.len(), 4);
    assert_eq!(*model.int(&n).unwrap(), BigInt::from(3));
    assert_eq!(model.real(&x).unwrap(), &BigRational::new(3.into(), 2.into()));
    assert!(!model.bool(&b).unwrap());
    assert_eq!(model.func(&f).unwrap().apply(&[int(3), int(4)]).unwrap(), real(-3, 1));
    assert_eq!(model.func(&f).unwrap().apply(&[int(0), int(0)]).unwrap(), real(0, 1));
    for c in s.constraints() {
        assert_eq!(model.eval(c).unwrap(), Value::Bool(true), "{c}");
    }
}

#[test]
fn model_accessors_check_sorts() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    let f = s.declare("f", Sort::func([Sort::Int], Sort::Int).unwrap()).unwrap();
    let stranger = Session::new().declare("m", Sort::Int).unwrap();

    let mut engine = Scripted::answering(CheckOutcome::Sat).with_const("n", int(7));
    let model = s.solve_with(&mut engine, None).unwrap().into_model().unwrap();

    assert!(matches!(model.bool(&n), Err(Error::TypeMismatch { .. })));
    assert!(matches!(model.value(&f), Err(Error::TypeMismatch { .. })));
    assert!(matches!(model.int(&stranger), Err(Error::UndeclaredSymbol(_))));
    assert_eq!(model.func(&f).unwrap().apply(&[int(1)]).unwrap(), int(0));
}

#[test]
fn unsat_and_unknown_have_no_model() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    s.assert(n.expr().gt(0).unwrap()).unwrap();
    s.assert(n.expr().lt(0).unwrap()).unwrap();

    let unsat = s
        .solve_with(&mut Scripted::answering(CheckOutcome::Unsat), None)
        .unwrap();
    assert!(unsat.is_unsat());
    assert!(matches!(unsat.model(), Err(Error::NoModelAvailable)));

    let unknown = s
        .solve_with(&mut Scripted::answering(CheckOutcome::Unknown("timeout".into())), None)
        .unwrap();
    assert!(matches!(&unknown, SolveResult::Unknown(reason) if reason == "timeout"));
    assert!(matches!(unknown.into_model(), Err(Error::NoModelAvailable)));
}

#[test]
fn solving_twice_is_idempotent() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    let x = s.declare("x", Sort::Real).unwrap();
    let sum = n.expr().add(&x).unwrap();
    s.assert(sum.mul(&sum).unwrap().ge(n.expr().pow(2).unwrap()).unwrap()).unwrap();

    let mut first = Scripted::answering(CheckOutcome::Sat);
    let mut second = Scripted::answering(CheckOutcome::Sat);
    let r1 = s.solve_with(&mut first, None).unwrap();
    let r2 = s.solve_with(&mut second, None).unwrap();
    assert_eq!(first.log, second.log);
    assert_eq!(r1.is_sat(), r2.is_sat());
    assert_eq!(s.constraints().len(), 1);
}

#[test]
fn constraints_added_after_a_solve_are_included_next_time() {
    let mut s = Session::new();
    let b = s.declare("b", Sort::Bool).unwrap();
    s.assert(&b).unwrap();

    let mut first = Scripted::answering(CheckOutcome::Sat);
    s.solve_with(&mut first, None).unwrap();
    s.assert(b.expr().not().unwrap()).unwrap();
    let mut second = Scripted::answering(CheckOutcome::Unsat);
    assert!(s.solve_with(&mut second, None).unwrap().is_unsat());

    assert_eq!(first.log.iter().filter(|l| l.starts_with("(assert")).count(), 1);
    assert_eq!(second.log.iter().filter(|l| l.starts_with("(assert")).count(), 2);
}

#[test]
fn deadline_reaches_the_engine() {
    let mut s = Session::new();
    let b = s.declare("b", Sort::Bool).unwrap();
    s.assert(b.expr().or(b.expr().not().unwrap()).unwrap()).unwrap();

    let mut engine = Scripted::answering(CheckOutcome::Sat);
    s.solve_with(&mut engine, Some(Duration::from_millis(250))).unwrap();
    assert_eq!(engine.deadline, Some(Duration::from_millis(250)));
}

#[test]
fn configured_timeout_is_the_default_deadline() {
    let config = SolverConfig::new(SmtSolver::Z3).with_timeout(Duration::from_secs(2));
    let mut s = Session::with_solver(config);
    let b = s.declare("b", Sort::Bool).unwrap();
    s.assert(&b).unwrap();

    let mut engine = Scripted::answering(CheckOutcome::Sat);
    s.solve_with(&mut engine, None).unwrap();
    assert_eq!(engine.deadline, Some(Duration::from_secs(2)));

    let mut engine = Scripted::answering(CheckOutcome::Sat);
    s.solve_with(&mut engine, Some(Duration::from_millis(10))).unwrap();
    assert_eq!(engine.deadline, Some(Duration::from_millis(10)));
}

#[test]
fn engine_failures_propagate() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    s.assert(n.expr().ge(0).unwrap()).unwrap();

    let mut engine = Scripted { fail_check: true, ..Default::default() };
    assert!(matches!(s.solve_with(&mut engine, None), Err(Error::Engine(msg)) if msg == "out of memory"));
}

#[test]
fn evaluation_follows_the_model() {
    let mut s = Session::new();
    let n = s.declare("n", Sort::Int).unwrap();
    let b = s.declare("b", Sort::Bool).unwrap();
    s.assert(b.expr().implies(n.expr().eq(2).unwrap()).unwrap()).unwrap();
    s.assert(b.expr().not().unwrap()).unwrap();

    let mut engine = Scripted::answering(CheckOutcome::Sat)
        .with_const("n", int(-7))
        .with_const("b", Value::Bool(false));
    let model = s.solve_with(&mut engine, None).unwrap().into_model().unwrap();

    assert_eq!(model.eval(&n.expr().int_div(2).unwrap()).unwrap(), int(-4));
    assert_eq!(model.eval(&n.expr().modulo(2).unwrap()).unwrap(), int(1));
    assert_eq!(model.eval(&n.expr().div(2).unwrap()).unwrap(), real(-7, 2));
    assert!(matches!(
        model.eval(&n.expr().int_div(0).unwrap()),
        Err(Error::DivisionByZero(_))
    ));
    for c in s.constraints() {
        assert_eq!(model.eval(c).unwrap(), Value::Bool(true));
    }
}
