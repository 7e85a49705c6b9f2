//! Lowering of declarations and constraints into [`Backend`] calls, and model extraction.
use derive_where::derive_where;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, debug_span};

use crate::{
    backend::{Backend, TermOp},
    error::{Error, Result},
    expr::{BinOp, BinRel, BoolOp, Decl, Expr, ExprKind, Literal, NodeId, UnOp},
    model::{Assignment, Model},
    sort::Sort,
};

#[derive_where(Debug; B::Term, B::Fun)]
pub(crate) enum Binding<B: Backend> {
    Const(B::Term),
    Fun(B::Fun),
}

/// The engine-side symbol of every declaration, in declaration order.
#[derive_where(Debug; B::Term, B::Fun)]
pub(crate) struct Symbols<B: Backend> {
    bindings: Vec<(Decl, Binding<B>)>,
}

/// Declares `decls` and asserts `constraints` in submission order.
pub(crate) fn compile<B: Backend>(
    backend: &mut B,
    decls: &[Decl],
    constraints: &[Expr],
) -> Result<Symbols<B>> {
    let _span = debug_span!("compile", decls = decls.len(), constraints = constraints.len()).entered();

    let mut bindings = Vec::with_capacity(decls.len());
    for decl in decls {
        let binding = match decl.sort() {
            Sort::Func(fsort) => Binding::Fun(backend.declare_fun(decl.name(), fsort)?),
            sort => Binding::Const(backend.declare_const(decl.name(), sort)?),
        };
        bindings.push((decl.clone(), binding));
    }
    let symbols = Symbols { bindings };

    {
        let mut compiler = Compiler::new(backend, &symbols, constraints);
        for constraint in constraints {
            let term = compiler.lower(constraint)?;
            compiler.backend.assert(&term)?;
            debug!(%constraint, "asserted");
        }
    }
    Ok(symbols)
}

/// Reads the value of every declaration after a `sat` check.
pub(crate) fn extract_model<B: Backend>(backend: &mut B, symbols: &Symbols<B>) -> Result<Model> {
    let _span = debug_span!("extract_model").entered();

    let mut assignments = Vec::with_capacity(symbols.bindings.len());
    for (decl, binding) in &symbols.bindings {
        let assignment = match (binding, decl.sort()) {
            (Binding::Const(term), sort) => Assignment::Value(backend.const_value(term, sort)?),
            (Binding::Fun(fun), Sort::Func(fsort)) => {
                Assignment::Func(backend.fun_interp(fun, fsort)?)
            }
            (Binding::Fun(_), sort) => {
                return Err(Error::mismatch(decl.name(), "a function", sort));
            }
        };
        debug!(decl = decl.name(), ?assignment);
        assignments.push((decl.clone(), assignment));
    }
    Ok(Model::new(assignments))
}

/// Lowers expression trees bottom-up. Every node is lowered once, nodes reachable through more
/// than one parent are handed to [`Backend::share`].
pub(crate) struct Compiler<'a, B: Backend> {
    backend: &'a mut B,
    symbols: FxHashMap<&'a Decl, &'a Binding<B>>,
    shared: FxHashSet<NodeId>,
    memo: FxHashMap<NodeId, B::Term>,
}

impl<'a, B: Backend> Compiler<'a, B> {
    pub(crate) fn new(backend: &'a mut B, symbols: &'a Symbols<B>, roots: &[Expr]) -> Self {
        let symbols = symbols
            .bindings
            .iter()
            .map(|(decl, binding)| (decl, binding))
            .collect();
        Self { backend, symbols, shared: shared_nodes(roots), memo: FxHashMap::default() }
    }

    pub(crate) fn lower(&mut self, expr: &Expr) -> Result<B::Term> {
        if let Some(term) = self.memo.get(&expr.node_id()) {
            return Ok(term.clone());
        }
        let mut term = self.lower_kind(expr)?;
        if !expr.is_leaf() && self.shared.contains(&expr.node_id()) {
            term = self.backend.share(term, expr.sort())?;
        }
        self.memo.insert(expr.node_id(), term.clone());
        Ok(term)
    }

    fn lower_kind(&mut self, expr: &Expr) -> Result<B::Term> {
        match expr.kind() {
            ExprKind::Lit(lit) => self.backend.literal(lit),
            ExprKind::Ref(decl) => {
                match self.binding(decl)? {
                    Binding::Const(term) => Ok(term.clone()),
                    Binding::Fun(_) => Err(Error::mismatch(decl.name(), "a constant", decl.sort())),
                }
            }
            ExprKind::Unary(UnOp::Pos, e) => self.lower(e),
            ExprKind::Unary(UnOp::Neg, e) => {
                let t = self.lower(e)?;
                self.backend.apply(TermOp::Neg, &[t])
            }
            ExprKind::Unary(UnOp::Not, e) => {
                let t = self.lower(e)?;
                self.backend.apply(TermOp::Not, &[t])
            }
            ExprKind::Binary(BinOp::Pow, [base, exponent]) => self.lower_pow(base, exponent),
            ExprKind::Binary(op, [e1, e2]) => {
                let (op, sort) = match op {
                    BinOp::Add => (TermOp::Add, expr.sort()),
                    BinOp::Sub => (TermOp::Sub, expr.sort()),
                    BinOp::Mul => (TermOp::Mul, expr.sort()),
                    BinOp::Div => (TermOp::Div, &Sort::Real),
                    BinOp::IntDiv => (TermOp::IntDiv, &Sort::Int),
                    BinOp::Mod => (TermOp::Mod, &Sort::Int),
                    BinOp::Pow => unreachable!(),
                };
                let args = [self.lower_as(e1, sort)?, self.lower_as(e2, sort)?];
                self.backend.apply(op, &args)
            }
            ExprKind::Compare(rel, [e1, e2]) => {
                let sort = e1
                    .sort()
                    .join_eq(e2.sort())
                    .ok_or_else(|| Error::mismatch(rel.symbol(), e1.sort().to_string(), e2.sort()))?;
                let op = match rel {
                    BinRel::Eq => TermOp::Eq,
                    BinRel::Ne => TermOp::Distinct,
                    BinRel::Lt => TermOp::Lt,
                    BinRel::Le => TermOp::Le,
                    BinRel::Gt => TermOp::Gt,
                    BinRel::Ge => TermOp::Ge,
                };
                let args = [self.lower_as(e1, &sort)?, self.lower_as(e2, &sort)?];
                self.backend.apply(op, &args)
            }
            ExprKind::BoolOp(op, args) => {
                match &args[..] {
                    [] => self.backend.literal(&Literal::Bool(*op == BoolOp::And)),
                    [arg] => self.lower(arg),
                    args => {
                        let terms = args
                            .iter()
                            .map(|arg| self.lower(arg))
                            .collect::<Result<Vec<_>>>()?;
                        let op = match op {
                            BoolOp::And => TermOp::And,
                            BoolOp::Or => TermOp::Or,
                            BoolOp::Xor => TermOp::Xor,
                        };
                        self.backend.apply(op, &terms)
                    }
                }
            }
            ExprKind::Implies([e1, e2]) => {
                let args = [self.lower(e1)?, self.lower(e2)?];
                self.backend.apply(TermOp::Implies, &args)
            }
            ExprKind::Call(decl, args) => {
                let Some(fsort) = decl.sort().as_func() else {
                    return Err(Error::mismatch(decl.name(), "a function", decl.sort()));
                };
                let mut terms = Vec::with_capacity(args.len());
                for (param, arg) in fsort.domain().iter().zip(args.iter()) {
                    terms.push(self.lower_as(arg, param)?);
                }
                match self.binding(decl)? {
                    Binding::Fun(fun) => self.backend.call(fun, &terms),
                    Binding::Const(_) => Err(Error::mismatch(decl.name(), "a function", decl.sort())),
                }
            }
        }
    }

    /// Lowers `expr` and converts it to `sort` if it is an `Int` used where a `Real` is expected.
    /// Integer literals are converted directly.
    fn lower_as(&mut self, expr: &Expr, sort: &Sort) -> Result<B::Term> {
        if !(*expr.sort() == Sort::Int && *sort == Sort::Real) {
            return self.lower(expr);
        }
        if let ExprKind::Lit(Literal::Int(n)) = expr.kind() {
            return self
                .backend
                .literal(&Literal::Real(BigRational::from_integer(n.clone())));
        }
        let term = self.lower(expr)?;
        self.backend.apply(TermOp::ToReal, &[term])
    }

    /// `base ^ n` as the product of `n` copies of `base`.
    fn lower_pow(&mut self, base: &Expr, exponent: &Expr) -> Result<B::Term> {
        let n = match exponent.kind() {
            ExprKind::Lit(Literal::Int(n)) => {
                n.to_u32()
                    .filter(|&n| n <= Expr::MAX_EXPONENT)
                    .and_then(|n| usize::try_from(n).ok())
            }
            _ => None,
        };
        let Some(n) = n else {
            return Err(Error::InvalidOperand(format!("invalid exponent `{exponent}`")));
        };
        match n {
            0 => {
                let one = match base.sort() {
                    Sort::Int => Literal::Int(BigInt::one()),
                    _ => Literal::Real(BigRational::one()),
                };
                self.backend.literal(&one)
            }
            1 => self.lower(base),
            n => {
                let mut term = self.lower(base)?;
                if !base.is_leaf() && !self.shared.contains(&base.node_id()) {
                    term = self.backend.share(term, base.sort())?;
                }
                self.backend.apply(TermOp::Mul, &vec![term; n])
            }
        }
    }

    fn binding(&self, decl: &Decl) -> Result<&'a Binding<B>> {
        self.symbols
            .get(decl)
            .copied()
            .ok_or_else(|| Error::UndeclaredSymbol(decl.name().to_string()))
    }
}

/// Nodes with more than one parent, counting each root as one.
fn shared_nodes(roots: &[Expr]) -> FxHashSet<NodeId> {
    let mut parents: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut seen = FxHashSet::default();
    let mut stack = roots.iter().collect::<Vec<_>>();
    for root in roots {
        *parents.entry(root.node_id()).or_default() += 1;
    }
    while let Some(expr) = stack.pop() {
        if !seen.insert(expr.node_id()) {
            continue;
        }
        for child in expr.children() {
            *parents.entry(child.node_id()).or_default() += 1;
            stack.push(child);
        }
    }
    parents
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        Session,
        backend::CheckOutcome,
        model::{FuncTable, Value},
        sort::FuncSort,
    };

    /// Records every call as text, the way an SMT-LIB engine would see it.
    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        shared: usize,
    }

    impl Backend for Recorder {
        type Term = String;
        type Fun = String;

        fn declare_const(&mut self, name: &str, sort: &Sort) -> Result<String> {
            self.log.push(format!("(declare-const {name} {sort})"));
            Ok(name.to_string())
        }

        fn declare_fun(&mut self, name: &str, sort: &FuncSort) -> Result<String> {
            self.log.push(format!("(declare-fun {name} {sort})"));
            Ok(name.to_string())
        }

        fn literal(&mut self, lit: &Literal) -> Result<String> {
            Ok(lit.to_string())
        }

        fn apply(&mut self, op: TermOp, args: &[String]) -> Result<String> {
            Ok(format!("({op} {})", args.join(" ")))
        }

        fn call(&mut self, fun: &String, args: &[String]) -> Result<String> {
            Ok(format!("({fun} {})", args.join(" ")))
        }

        fn share(&mut self, term: String, sort: &Sort) -> Result<String> {
            let name = format!("t{}", self.shared);
            self.shared += 1;
            self.log.push(format!("(define-fun {name} () {sort} {term})"));
            Ok(name)
        }

        fn assert(&mut self, term: &String) -> Result<()> {
            self.log.push(format!("(assert {term})"));
            Ok(())
        }

        fn check(&mut self, _deadline: Option<Duration>) -> Result<CheckOutcome> {
            Ok(CheckOutcome::Sat)
        }

        fn const_value(&mut self, _term: &String, sort: &Sort) -> Result<Value> {
            Ok(Value::default_for(sort))
        }

        fn fun_interp(&mut self, _fun: &String, sort: &FuncSort) -> Result<FuncTable> {
            Ok(FuncTable::constant_default(sort.clone()))
        }
    }

    fn lower_all(s: &Session) -> Vec<String> {
        let mut rec = Recorder::default();
        compile(&mut rec, s.declarations(), s.constraints()).unwrap();
        rec.log
    }

    #[test]
    fn declarations_then_assertions_in_order() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let x = s.declare("x", Sort::Real).unwrap();
        let f = s.declare("f", Sort::func([Sort::Int, Sort::Int], Sort::Real).unwrap()).unwrap();
        s.assert(n.expr().gt(0).unwrap()).unwrap();
        let lhs = f.call([n.expr(), n.expr().add(1).unwrap()]).unwrap();
        s.assert(lhs.eq(Expr::literal(-2).mul(&x).unwrap()).unwrap()).unwrap();
        s.assert(n.expr().lt(5).unwrap()).unwrap();

        assert_eq!(lower_all(&s), [
            "(declare-const n Int)",
            "(declare-const x Real)",
            "(declare-fun f (Int Int) Real)",
            "(assert (> n 0))",
            "(assert (= (f n (+ n 1)) (* (- 2.0) x)))",
            "(assert (< n 5))",
        ]);
    }

    #[test]
    fn int_operands_are_coerced() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let x = s.declare("x", Sort::Real).unwrap();
        let g = s.declare("g", Sort::func([Sort::Real], Sort::Bool).unwrap()).unwrap();
        s.assert(n.expr().add(&x).unwrap().ge(1).unwrap()).unwrap();
        s.assert(n.expr().div(2).unwrap().eq(&x).unwrap()).unwrap();
        s.assert(g.call([n.expr().mul(3).unwrap()]).unwrap()).unwrap();
        s.assert(n.expr().int_div(2).unwrap().ne(n.expr().modulo(2).unwrap()).unwrap())
            .unwrap();

        let log = lower_all(&s);
        assert_eq!(&log[3..], [
            "(assert (>= (+ (to_real n) x) 1.0))",
            "(assert (= (/ (to_real n) 2.0) x))",
            "(assert (g (to_real (* n 3))))",
            "(assert (distinct (div n 2) (mod n 2)))",
        ]);
    }

    #[test]
    fn connectives_and_powers() {
        let mut s = Session::new();
        let b = s.declare("b", Sort::Bool).unwrap();
        let n = s.declare("n", Sort::Int).unwrap();
        let x = s.declare("x", Sort::Real).unwrap();
        s.assert(Expr::all(Vec::<Expr>::new()).unwrap()).unwrap();
        s.assert(Expr::any(Vec::<Expr>::new()).unwrap().not().unwrap()).unwrap();
        s.assert(Expr::parity([b.expr()]).unwrap()).unwrap();
        s.assert(b.expr().implies(n.expr().eq(2).unwrap()).unwrap()).unwrap();
        s.assert(n.expr().pow(3).unwrap().gt(n.expr().pow(1).unwrap()).unwrap()).unwrap();
        s.assert(x.expr().pow(0).unwrap().eq(1).unwrap()).unwrap();
        s.assert(n.expr().add(1).unwrap().pow(2).unwrap().gt(0).unwrap()).unwrap();

        let log = lower_all(&s);
        assert_eq!(&log[3..], [
            "(assert true)",
            "(assert (not false))",
            "(assert b)",
            "(assert (=> b (= n 2)))",
            "(assert (> (* n n n) n))",
            "(assert (= 1.0 1.0))",
            "(define-fun t0 () Int (+ n 1))",
            "(assert (> (* t0 t0) 0))",
        ]);
    }

    #[test]
    fn largest_power_stays_linear() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        s.assert(n.expr().pow(Expr::MAX_EXPONENT).unwrap().gt(0).unwrap()).unwrap();

        let log = lower_all(&s);
        let factors = vec!["n"; Expr::MAX_EXPONENT as usize].join(" ");
        assert_eq!(log[1], format!("(assert (> (* {factors}) 0))"));
    }

    #[test]
    fn shared_subtrees_are_lowered_once() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let m = s.declare("m", Sort::Int).unwrap();
        let sum = n.expr().add(&m).unwrap();
        let twice = sum.mul(&sum).unwrap();
        s.assert(twice.gt(0).unwrap()).unwrap();
        s.assert(sum.lt(10).unwrap()).unwrap();

        let log = lower_all(&s);
        assert_eq!(&log[2..], [
            "(define-fun t0 () Int (+ n m))",
            "(assert (> (* t0 t0) 0))",
            "(assert (< t0 10))",
        ]);
    }

    #[test]
    fn lowering_is_stable() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let b = s.declare("b", Sort::Bool).unwrap();
        let e = b
            .expr()
            .xor(n.expr().neg().unwrap().le(n.expr().pos().unwrap()).unwrap())
            .unwrap();
        s.assert(&e).unwrap();
        s.assert(&e).unwrap();
        let first = lower_all(&s);
        assert_eq!(first, lower_all(&s));
        assert_eq!(&first[2..], [
            "(define-fun t0 () Bool (xor b (<= (- n) n)))",
            "(assert t0)",
            "(assert t0)",
        ]);
    }

    #[test]
    fn model_extraction_follows_declarations() {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let f = s.declare("f", Sort::func([Sort::Int], Sort::Bool).unwrap()).unwrap();
        let mut rec = Recorder::default();
        let symbols = compile(&mut rec, s.declarations(), s.constraints()).unwrap();
        let model = extract_model(&mut rec, &symbols).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(*model.int(&n).unwrap(), BigInt::from(0));
        assert_eq!(model.func(&f).unwrap().apply(&[Value::Int(4.into())]).unwrap(), Value::Bool(false));
    }
}
