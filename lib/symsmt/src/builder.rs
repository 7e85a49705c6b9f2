//! Construction of [`Expr`] trees.
//!
//! Every constructor checks the sorts of its operands and fails right away with
//! [`Error::TypeMismatch`], [`Error::InvalidArity`] or [`Error::InvalidOperand`]. Constructors are
//! pure: they return a new node and never register anything. Use [`crate::Session::assert`] to
//! turn a boolean expression into a constraint.
use std::sync::Arc;

use itertools::Itertools;
use num_traits::{Signed, ToPrimitive};

use crate::{
    error::{Error, Result},
    expr::{BinOp, BinRel, BoolOp, Decl, Expr, ExprKind, Literal, UnOp},
    sort::Sort,
};

impl Expr {
    /// A literal whose sort follows the Rust value: `bool` is `Bool`, integers are `Int` and
    /// rationals are `Real`.
    pub fn literal(lit: impl Into<Literal>) -> Expr {
        let lit = lit.into();
        let sort = lit.sort();
        Expr::new(ExprKind::Lit(lit), sort)
    }

    /// A `Real` literal with the exact value of `v`. Fails for NaN and infinities.
    pub fn float(v: f64) -> Result<Expr> {
        Literal::try_from(v).map(Expr::literal)
    }

    pub fn neg(&self) -> Result<Expr> {
        self.numeric_unary(UnOp::Neg)
    }

    pub fn pos(&self) -> Result<Expr> {
        self.numeric_unary(UnOp::Pos)
    }

    pub fn not(&self) -> Result<Expr> {
        expect_bool(UnOp::Not.symbol(), self)?;
        Ok(Expr::new(ExprKind::Unary(UnOp::Not, self.clone()), Sort::Bool))
    }

    pub fn add(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.arith(BinOp::Add, rhs.into())
    }

    pub fn sub(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.arith(BinOp::Sub, rhs.into())
    }

    pub fn mul(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.arith(BinOp::Mul, rhs.into())
    }

    /// Real division. Integer operands are coerced, the result is always `Real`.
    pub fn div(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        let rhs = rhs.into();
        join_numeric(BinOp::Div.symbol(), self, &rhs)?;
        Ok(Expr::new(ExprKind::Binary(BinOp::Div, [self.clone(), rhs]), Sort::Real))
    }

    /// Integer division, rounding so that the remainder is non-negative.
    pub fn int_div(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.int_arith(BinOp::IntDiv, rhs.into())
    }

    /// Integer modulus, always non-negative.
    pub fn modulo(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.int_arith(BinOp::Mod, rhs.into())
    }

    /// Largest exponent accepted by [`Expr::pow`]. Powers are expanded into products.
    pub const MAX_EXPONENT: u32 = 64;

    /// `self` raised to `exponent`, which must be an `Int` literal between `0` and
    /// [`Expr::MAX_EXPONENT`].
    pub fn pow(&self, exponent: impl Into<Expr>) -> Result<Expr> {
        let exponent = exponent.into();
        expect_numeric(BinOp::Pow.symbol(), self)?;
        match exponent.kind() {
            ExprKind::Lit(Literal::Int(n)) if !n.is_negative() => {
                if n.to_u32().is_none_or(|n| n > Expr::MAX_EXPONENT) {
                    return Err(Error::InvalidOperand(format!(
                        "exponent `{n}` exceeds the maximum of {}",
                        Expr::MAX_EXPONENT
                    )));
                }
            }
            _ => {
                return Err(Error::InvalidOperand(format!(
                    "exponent must be a non-negative integer literal, found `{exponent}`"
                )));
            }
        }
        let sort = self.sort().clone();
        Ok(Expr::new(ExprKind::Binary(BinOp::Pow, [self.clone(), exponent]), sort))
    }

    pub fn eq(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Eq, rhs.into())
    }

    pub fn ne(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Ne, rhs.into())
    }

    pub fn lt(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Lt, rhs.into())
    }

    pub fn le(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Le, rhs.into())
    }

    pub fn gt(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Gt, rhs.into())
    }

    pub fn ge(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        self.compare(BinRel::Ge, rhs.into())
    }

    pub fn and(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        Expr::bool_op(BoolOp::And, [self.clone(), rhs.into()])
    }

    pub fn or(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        Expr::bool_op(BoolOp::Or, [self.clone(), rhs.into()])
    }

    pub fn xor(&self, rhs: impl Into<Expr>) -> Result<Expr> {
        Expr::bool_op(BoolOp::Xor, [self.clone(), rhs.into()])
    }

    /// Conjunction of any number of operands. The empty conjunction is `true`.
    pub fn all<I>(operands: I) -> Result<Expr>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        Expr::bool_op(BoolOp::And, operands)
    }

    /// Disjunction of any number of operands. The empty disjunction is `false`.
    pub fn any<I>(operands: I) -> Result<Expr>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        Expr::bool_op(BoolOp::Or, operands)
    }

    /// Exclusive or of any number of operands, true when an odd number of them are.
    pub fn parity<I>(operands: I) -> Result<Expr>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        Expr::bool_op(BoolOp::Xor, operands)
    }

    pub fn bool_op<I>(op: BoolOp, operands: I) -> Result<Expr>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        let operands: Arc<[Expr]> = operands.into_iter().map(Into::into).collect();
        for operand in operands.iter() {
            expect_bool(op.symbol(), operand)?;
        }
        Ok(Expr::new(ExprKind::BoolOp(op, operands), Sort::Bool))
    }

    /// `self => consequent`
    pub fn implies(&self, consequent: impl Into<Expr>) -> Result<Expr> {
        let consequent = consequent.into();
        expect_bool("=>", self)?;
        expect_bool("=>", &consequent)?;
        Ok(Expr::new(ExprKind::Implies([self.clone(), consequent]), Sort::Bool))
    }

    /// `antecedent => self`
    pub fn implied_by(&self, antecedent: impl Into<Expr>) -> Result<Expr> {
        antecedent.into().implies(self)
    }

    fn numeric_unary(&self, op: UnOp) -> Result<Expr> {
        expect_numeric(op.symbol(), self)?;
        Ok(Expr::new(ExprKind::Unary(op, self.clone()), self.sort().clone()))
    }

    fn arith(&self, op: BinOp, rhs: Expr) -> Result<Expr> {
        let sort = join_numeric(op.symbol(), self, &rhs)?;
        Ok(Expr::new(ExprKind::Binary(op, [self.clone(), rhs]), sort))
    }

    fn int_arith(&self, op: BinOp, rhs: Expr) -> Result<Expr> {
        for operand in [self, &rhs] {
            if *operand.sort() != Sort::Int {
                return Err(Error::mismatch(op.symbol(), "Int", operand.sort()));
            }
        }
        Ok(Expr::new(ExprKind::Binary(op, [self.clone(), rhs]), Sort::Int))
    }

    fn compare(&self, rel: BinRel, rhs: Expr) -> Result<Expr> {
        match rel {
            BinRel::Eq | BinRel::Ne => {
                self.sort()
                    .join_eq(rhs.sort())
                    .ok_or_else(|| Error::mismatch(rel.symbol(), self.sort().to_string(), rhs.sort()))?;
            }
            BinRel::Lt | BinRel::Le | BinRel::Gt | BinRel::Ge => {
                join_numeric(rel.symbol(), self, &rhs)?;
            }
        }
        Ok(Expr::new(ExprKind::Compare(rel, [self.clone(), rhs]), Sort::Bool))
    }
}

impl Decl {
    /// Applies a function declaration. Each argument must have the corresponding domain sort, an
    /// `Int` argument is accepted for a `Real` parameter.
    pub fn call<I>(&self, args: I) -> Result<Expr>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        let Some(fsort) = self.sort().as_func() else {
            return Err(Error::mismatch(self.name(), "a function", self.sort()));
        };
        let args = args.into_iter().map(Into::into).collect_vec();
        if args.len() != fsort.arity() {
            return Err(Error::InvalidArity {
                func: self.name().to_string(),
                expected: fsort.arity(),
                found: args.len(),
            });
        }
        for (param, arg) in fsort.domain().iter().zip(&args) {
            if !param.accepts(arg.sort()) {
                return Err(Error::mismatch(self.name(), param.to_string(), arg.sort()));
            }
        }
        let range = fsort.range().clone();
        Ok(Expr::new(ExprKind::Call(self.clone(), args.into()), range))
    }
}

fn expect_bool(op: &str, e: &Expr) -> Result<()> {
    if *e.sort() == Sort::Bool { Ok(()) } else { Err(Error::mismatch(op, "Bool", e.sort())) }
}

fn expect_numeric(op: &str, e: &Expr) -> Result<()> {
    if e.sort().is_numeric() {
        Ok(())
    } else {
        Err(Error::mismatch(op, "Int or Real", e.sort()))
    }
}

fn join_numeric(op: &str, lhs: &Expr, rhs: &Expr) -> Result<Sort> {
    expect_numeric(op, lhs)?;
    expect_numeric(op, rhs)?;
    lhs.sort()
        .join_numeric(rhs.sort())
        .ok_or_else(|| Error::mismatch(op, lhs.sort().to_string(), rhs.sort()))
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use num_rational::BigRational;

    use super::*;
    use crate::Session;

    fn session() -> (Session, Decl, Decl, Decl, Decl) {
        let mut s = Session::new();
        let n = s.declare("n", Sort::Int).unwrap();
        let x = s.declare("x", Sort::Real).unwrap();
        let b = s.declare("b", Sort::Bool).unwrap();
        let f = s
            .declare("f", Sort::func([Sort::Int, Sort::Int], Sort::Real).unwrap())
            .unwrap();
        (s, n, x, b, f)
    }

    #[test]
    fn literal_sorts() {
        assert_eq!(*Expr::literal(true).sort(), Sort::Bool);
        assert_eq!(*Expr::literal(3).sort(), Sort::Int);
        assert_eq!(*Expr::literal(BigInt::from(-7)).sort(), Sort::Int);
        assert_eq!(*Expr::float(0.5).unwrap().sort(), Sort::Real);
        assert_eq!(
            Expr::float(0.5).unwrap(),
            Expr::literal(BigRational::new(1.into(), 2.into()))
        );
        assert!(matches!(Expr::float(f64::NAN), Err(Error::InvalidOperand(_))));
        assert!(matches!(Expr::float(f64::INFINITY), Err(Error::InvalidOperand(_))));
    }

    #[test]
    fn int_is_coerced_to_real() {
        let (_s, n, x, ..) = session();
        assert_eq!(*n.expr().add(1).unwrap().sort(), Sort::Int);
        assert_eq!(*n.expr().add(&x).unwrap().sort(), Sort::Real);
        assert_eq!(*x.expr().mul(2).unwrap().sort(), Sort::Real);
        assert_eq!(*n.expr().div(2).unwrap().sort(), Sort::Real);
        assert_eq!(*n.expr().lt(&x).unwrap().sort(), Sort::Bool);
        assert_eq!(*n.expr().neg().unwrap().sort(), Sort::Int);
    }

    #[test]
    fn bool_never_mixes_with_numbers() {
        let (_s, n, x, b, f) = session();
        let numeric = [n.expr(), x.expr()];
        for e in &numeric {
            assert!(matches!(b.expr().add(e), Err(Error::TypeMismatch { .. })));
            assert!(matches!(e.add(&b), Err(Error::TypeMismatch { .. })));
            assert!(matches!(e.eq(&b), Err(Error::TypeMismatch { .. })));
            assert!(matches!(e.and(&b), Err(Error::TypeMismatch { .. })));
            assert!(matches!(e.implies(&b), Err(Error::TypeMismatch { .. })));
            assert!(matches!(e.not(), Err(Error::TypeMismatch { .. })));
        }
        assert!(matches!(b.expr().lt(&b), Err(Error::TypeMismatch { .. })));
        assert!(matches!(b.expr().neg(), Err(Error::TypeMismatch { .. })));
        assert!(matches!(f.expr().add(1), Err(Error::TypeMismatch { .. })));
        assert!(matches!(f.expr().eq(&f), Err(Error::TypeMismatch { .. })));
        assert!(b.expr().eq(false).is_ok());
    }

    #[test]
    fn integer_division_requires_ints() {
        let (_s, n, x, ..) = session();
        assert_eq!(*n.expr().int_div(2).unwrap().sort(), Sort::Int);
        assert_eq!(*n.expr().modulo(3).unwrap().sort(), Sort::Int);
        assert!(matches!(x.expr().modulo(3), Err(Error::TypeMismatch { .. })));
        assert!(matches!(n.expr().int_div(&x), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn call_checks_arity_and_sorts() {
        let (_s, n, x, b, f) = session();
        let ok = f.call([n.expr(), n.expr().add(1).unwrap()]).unwrap();
        assert_eq!(*ok.sort(), Sort::Real);

        for args in [vec![n.expr()], vec![n.expr(), n.expr(), n.expr()]] {
            assert!(matches!(f.call(args), Err(Error::InvalidArity { expected: 2, .. })));
        }
        assert!(matches!(f.call([n.expr(), x.expr()]), Err(Error::TypeMismatch { .. })));
        assert!(matches!(f.call([b.expr(), n.expr()]), Err(Error::TypeMismatch { .. })));
        assert!(matches!(n.call([n.expr()]), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn int_arguments_fill_real_parameters() {
        let mut s = Session::new();
        let g = s
            .declare("g", Sort::func([Sort::Real], Sort::Bool).unwrap())
            .unwrap();
        let n = s.declare("n", Sort::Int).unwrap();
        assert_eq!(*g.call([&n]).unwrap().sort(), Sort::Bool);
    }

    #[test]
    fn power_needs_non_negative_int_literal() {
        let (_s, n, x, ..) = session();
        assert_eq!(*n.expr().pow(3).unwrap().sort(), Sort::Int);
        assert_eq!(*x.expr().pow(0).unwrap().sort(), Sort::Real);
        assert!(matches!(n.expr().pow(-1), Err(Error::InvalidOperand(_))));
        assert!(matches!(n.expr().pow(&n), Err(Error::InvalidOperand(_))));
        assert!(matches!(n.expr().pow(Expr::float(2.0).unwrap()), Err(Error::InvalidOperand(_))));
        assert!(matches!(n.expr().pow(u64::MAX), Err(Error::InvalidOperand(_))));
    }

    #[test]
    fn power_exponent_is_bounded() {
        let (_s, n, x, ..) = session();
        assert!(n.expr().pow(Expr::MAX_EXPONENT).is_ok());
        assert!(matches!(n.expr().pow(Expr::MAX_EXPONENT + 1), Err(Error::InvalidOperand(_))));
        assert!(matches!(x.expr().pow(u32::MAX), Err(Error::InvalidOperand(_))));
    }

    #[test]
    fn connectives_are_n_ary() {
        let (_s, n, _x, b, _f) = session();
        let pos = n.expr().gt(0).unwrap();
        let all = Expr::all([b.expr(), pos.clone(), b.expr().not().unwrap()]).unwrap();
        assert_eq!(all.children().len(), 3);
        assert_eq!(all.to_string(), "(and b (> n 0) (not b))");
        assert_eq!(Expr::any(Vec::<Expr>::new()).unwrap().to_string(), "(or)");
        assert_eq!(b.expr().implied_by(&pos).unwrap().to_string(), "(=> (> n 0) b)");
    }

    #[test]
    fn constructors_do_not_register_constraints() {
        let (s, n, ..) = session();
        let _ = n.expr().gt(0).unwrap();
        assert!(s.constraints().is_empty());
    }

    #[test]
    fn textual_form() {
        let (_s, n, x, _b, f) = session();
        let lhs = f.call([n.expr(), n.expr().add(1).unwrap()]).unwrap();
        let rhs = Expr::literal(-2).mul(&x).unwrap();
        assert_eq!(lhs.eq(&rhs).unwrap().to_string(), "(= (f n (+ n 1)) (* (- 2) x))");
        assert_eq!(Expr::float(-0.25).unwrap().to_string(), "(- (/ 1.0 4.0))");
        assert_eq!(Expr::float(3.0).unwrap().to_string(), "3.0");
        assert_eq!(n.expr().ne(1).unwrap().to_string(), "(distinct n 1)");
    }
}
