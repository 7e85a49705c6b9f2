//! Satisfying assignments and their evaluation.
use std::{cmp::Ordering, fmt, str::FromStr};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::{
    error::{Error, Result},
    expr::{BinOp, BinRel, BoolOp, Decl, Expr, ExprKind, Literal, NodeId, UnOp},
    sexp::Sexp,
    sort::{FuncSort, Sort},
};

/// A concrete value assigned by the engine.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    Bool(bool),
    Int(BigInt),
    Real(BigRational),
    /// An irrational real, kept in the engine's own notation, e.g. `(root-obj (+ (^ x 2) (- 2)) 1)`.
    Algebraic(String),
}

impl Value {
    pub fn sort(&self) -> Sort {
        match self {
            Value::Bool(_) => Sort::Bool,
            Value::Int(_) => Sort::Int,
            Value::Real(_) | Value::Algebraic(_) => Sort::Real,
        }
    }

    /// `0`, `0.0` or `false`. For a function sort, the default of its range.
    pub fn default_for(sort: &Sort) -> Value {
        match sort {
            Sort::Int => Value::Int(BigInt::zero()),
            Sort::Real => Value::Real(BigRational::zero()),
            Sort::Bool => Value::Bool(false),
            Sort::Func(fsort) => Value::default_for(fsort.range()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(b) = self { Some(*b) } else { None }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        if let Value::Int(n) = self { Some(n) } else { None }
    }

    pub fn as_real(&self) -> Option<&BigRational> {
        if let Value::Real(q) = self { Some(q) } else { None }
    }

    /// Closest `f64` to a numeric value. `None` for booleans, algebraic numbers and values out of
    /// range.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => n.to_f64(),
            Value::Real(q) => Some(q.numer().to_f64()? / q.denom().to_f64()?),
            Value::Bool(_) | Value::Algebraic(_) => None,
        }
    }

    /// Converts an `Int` to a `Real` when `sort` asks for one.
    fn coerce(self, sort: &Sort) -> Value {
        match (self, sort) {
            (Value::Int(n), Sort::Real) => Value::Real(BigRational::from_integer(n)),
            (v, _) => v,
        }
    }

    /// Reads a value of sort `sort` written in SMT-LIB syntax.
    pub fn from_sexp(sexp: &Sexp, sort: &Sort) -> Result<Value> {
        let unexpected = || Error::engine(format!("unexpected value `{sexp}` for sort {sort}"));
        match sort {
            Sort::Bool => {
                match sexp.as_symbol() {
                    Some("true") => Ok(Value::Bool(true)),
                    Some("false") => Ok(Value::Bool(false)),
                    _ => Err(unexpected()),
                }
            }
            Sort::Int => {
                match parse_number(sexp).ok_or_else(unexpected)? {
                    Number::Exact(q) if q.is_integer() => Ok(Value::Int(q.to_integer())),
                    _ => Err(unexpected()),
                }
            }
            Sort::Real => {
                match parse_number(sexp).ok_or_else(unexpected)? {
                    Number::Exact(q) => Ok(Value::Real(q)),
                    Number::Algebraic => Ok(Value::Algebraic(sexp.to_string())),
                }
            }
            Sort::Func(_) => Err(Error::InvalidSort(format!("`{sort}` has no scalar values"))),
        }
    }

    fn to_rational(&self, op: &str) -> Result<BigRational> {
        match self {
            Value::Int(n) => Ok(BigRational::from_integer(n.clone())),
            Value::Real(q) => Ok(q.clone()),
            Value::Algebraic(text) => {
                Err(Error::InvalidOperand(format!(
                    "cannot evaluate `{op}` over the irrational value `{text}`"
                )))
            }
            Value::Bool(_) => Err(Error::mismatch(op, "Int or Real", Sort::Bool)),
        }
    }
}

enum Number {
    Exact(BigRational),
    Algebraic,
}

fn parse_number(sexp: &Sexp) -> Option<Number> {
    match sexp {
        Sexp::Atom(_) => parse_decimal(sexp.as_symbol()?).map(Number::Exact),
        Sexp::List(items) => {
            match items.as_slice() {
                [head, arg] if head.as_symbol() == Some("-") => {
                    match parse_number(arg)? {
                        Number::Exact(q) => Some(Number::Exact(-q)),
                        Number::Algebraic => Some(Number::Algebraic),
                    }
                }
                [head, arg] if head.as_symbol() == Some("to_real") => parse_number(arg),
                [head, p, q] if head.as_symbol() == Some("/") => {
                    let (Number::Exact(p), Number::Exact(q)) = (parse_number(p)?, parse_number(q)?)
                    else {
                        return Some(Number::Algebraic);
                    };
                    if q.is_zero() { None } else { Some(Number::Exact(p / q)) }
                }
                [head, ..] if head.as_symbol() == Some("root-obj") => Some(Number::Algebraic),
                _ => None,
            }
        }
    }
}

/// Parses `42` or `3.25` into an exact rational.
fn parse_decimal(s: &str) -> Option<BigRational> {
    if !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    match s.split_once('.') {
        None => BigInt::from_str(s).ok().map(BigRational::from_integer),
        Some((int, frac)) => {
            if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let numer = BigInt::from_str(&format!("{int}{frac}")).ok()?;
            let denom = num_traits::pow(BigInt::from(10), frac.len());
            Some(BigRational::new(numer, denom))
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Real(q) if q.is_integer() => write!(f, "{}.0", q.numer()),
            Value::Real(q) => write!(f, "{}/{}", q.numer(), q.denom()),
            Value::Algebraic(text) => write!(f, "{text}"),
        }
    }
}

/// Booleans serialize as JSON booleans, numbers as strings to keep them exact.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            _ => serializer.collect_str(self),
        }
    }
}

/// One position of a [`FuncEntry`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum ArgPattern {
    Exact(Value),
    /// Matches any argument.
    Any,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct FuncEntry {
    pub args: Vec<ArgPattern>,
    pub value: Value,
}

impl FuncEntry {
    pub fn exact(args: impl IntoIterator<Item = Value>, value: Value) -> FuncEntry {
        FuncEntry { args: args.into_iter().map(ArgPattern::Exact).collect(), value }
    }

    fn matches(&self, args: &[Value]) -> bool {
        self.args.iter().zip(args).all(|(pattern, arg)| {
            match pattern {
                ArgPattern::Exact(v) => v == arg,
                ArgPattern::Any => true,
            }
        })
    }
}

/// The finite interpretation of a function: entries tried in order, then a default.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct FuncTable {
    #[serde(skip)]
    sort: FuncSort,
    entries: Vec<FuncEntry>,
    default: Value,
}

impl FuncTable {
    /// Fails with [`Error::Engine`] if an entry does not fit `sort`.
    pub fn new(sort: FuncSort, entries: Vec<FuncEntry>, default: Value) -> Result<FuncTable> {
        let ill_formed = |what: String| Error::engine(format!("ill-formed interpretation: {what}"));
        let range = sort.range();
        if !range.accepts(&default.sort()) {
            return Err(ill_formed(format!("default `{default}` is not a {range}")));
        }
        let mut normalized = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.args.len() != sort.arity() {
                return Err(ill_formed(format!("entry with {} argument(s)", entry.args.len())));
            }
            if !range.accepts(&entry.value.sort()) {
                return Err(ill_formed(format!("value `{}` is not a {range}", entry.value)));
            }
            let mut args = Vec::with_capacity(entry.args.len());
            for (param, pattern) in sort.domain().iter().zip(entry.args) {
                args.push(match pattern {
                    ArgPattern::Exact(v) if param.accepts(&v.sort()) => {
                        ArgPattern::Exact(v.coerce(param))
                    }
                    ArgPattern::Exact(v) => {
                        return Err(ill_formed(format!("argument `{v}` is not a {param}")));
                    }
                    ArgPattern::Any => ArgPattern::Any,
                });
            }
            normalized.push(FuncEntry { args, value: entry.value.coerce(range) });
        }
        Ok(FuncTable { default: default.coerce(range), sort, entries: normalized })
    }

    /// A table without entries that always answers the default of the range sort.
    pub fn constant_default(sort: FuncSort) -> FuncTable {
        let default = Value::default_for(sort.range());
        FuncTable { sort, entries: vec![], default }
    }

    pub fn sort(&self) -> &FuncSort {
        &self.sort
    }

    pub fn entries(&self) -> &[FuncEntry] {
        &self.entries
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// The value at `args`: the first entry that matches, otherwise the default. `Int` arguments
    /// are accepted for `Real` parameters.
    pub fn apply(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.sort.arity() {
            return Err(Error::mismatch(
                "apply",
                format!("{} argument(s)", self.sort.arity()),
                format!("{} argument(s)", args.len()),
            ));
        }
        let mut coerced = Vec::with_capacity(args.len());
        for (param, arg) in self.sort.domain().iter().zip(args) {
            if !param.accepts(&arg.sort()) {
                return Err(Error::mismatch("apply", param.to_string(), arg.sort()));
            }
            coerced.push(arg.clone().coerce(param));
        }
        let value = self
            .entries
            .iter()
            .find(|entry| entry.matches(&coerced))
            .map_or(&self.default, |entry| &entry.value);
        Ok(value.clone())
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum Assignment {
    Value(Value),
    Func(FuncTable),
}

/// A satisfying assignment for every symbol declared when the session was solved.
#[derive(Clone, Debug)]
pub struct Model {
    assignments: Vec<(Decl, Assignment)>,
    index: FxHashMap<Decl, usize>,
}

impl Model {
    pub(crate) fn new(assignments: Vec<(Decl, Assignment)>) -> Model {
        let index = assignments
            .iter()
            .enumerate()
            .map(|(i, (decl, _))| (decl.clone(), i))
            .collect();
        Model { assignments, index }
    }

    /// Fails with [`Error::UndeclaredSymbol`] for a declaration that was not part of the session
    /// when it was solved.
    pub fn get(&self, decl: &Decl) -> Result<&Assignment> {
        self.index
            .get(decl)
            .map(|&i| &self.assignments[i].1)
            .ok_or_else(|| Error::UndeclaredSymbol(decl.name().to_string()))
    }

    pub fn value(&self, decl: &Decl) -> Result<&Value> {
        match self.get(decl)? {
            Assignment::Value(v) => Ok(v),
            Assignment::Func(_) => Err(Error::mismatch(decl.name(), "a constant", decl.sort())),
        }
    }

    pub fn func(&self, decl: &Decl) -> Result<&FuncTable> {
        match self.get(decl)? {
            Assignment::Func(table) => Ok(table),
            Assignment::Value(_) => Err(Error::mismatch(decl.name(), "a function", decl.sort())),
        }
    }

    pub fn int(&self, decl: &Decl) -> Result<&BigInt> {
        self.value(decl)?
            .as_int()
            .ok_or_else(|| Error::mismatch(decl.name(), "Int", decl.sort()))
    }

    /// Fails with [`Error::InvalidOperand`] if the engine chose an irrational value.
    pub fn real(&self, decl: &Decl) -> Result<&BigRational> {
        match self.value(decl)? {
            Value::Real(q) => Ok(q),
            Value::Algebraic(text) => {
                Err(Error::InvalidOperand(format!(
                    "`{}` has the irrational value `{text}`",
                    decl.name()
                )))
            }
            _ => Err(Error::mismatch(decl.name(), "Real", decl.sort())),
        }
    }

    pub fn bool(&self, decl: &Decl) -> Result<bool> {
        self.value(decl)?
            .as_bool()
            .ok_or_else(|| Error::mismatch(decl.name(), "Bool", decl.sort()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Decl, &Assignment)> {
        self.assignments.iter().map(|(decl, a)| (decl, a))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Evaluates `expr` under this model with exact arithmetic.
    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        Evaluator { model: self, cache: FxHashMap::default() }.eval(expr)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.assignments.len()))?;
        for (decl, assignment) in &self.assignments {
            map.serialize_entry(decl.name(), assignment)?;
        }
        map.end()
    }
}

struct Evaluator<'a> {
    model: &'a Model,
    cache: FxHashMap<NodeId, Value>,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        if let Some(v) = self.cache.get(&expr.node_id()) {
            return Ok(v.clone());
        }
        let v = self.eval_kind(expr)?;
        self.cache.insert(expr.node_id(), v.clone());
        Ok(v)
    }

    fn eval_kind(&mut self, expr: &Expr) -> Result<Value> {
        let v = match expr.kind() {
            ExprKind::Lit(lit) => {
                match lit {
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Int(n) => Value::Int(n.clone()),
                    Literal::Real(q) => Value::Real(q.clone()),
                }
            }
            ExprKind::Ref(decl) => self.model.value(decl)?.clone(),
            ExprKind::Unary(UnOp::Not, e) => Value::Bool(!self.eval_bool(e)?),
            ExprKind::Unary(UnOp::Pos, e) => self.eval(e)?,
            ExprKind::Unary(UnOp::Neg, e) => {
                match self.eval(e)? {
                    Value::Int(n) => Value::Int(-n),
                    v => Value::Real(-v.to_rational("-")?),
                }
            }
            ExprKind::Binary(op, [e1, e2]) => {
                let v1 = self.eval(e1)?;
                let v2 = self.eval(e2)?;
                self.eval_binary(expr, *op, v1, v2)?
            }
            ExprKind::Compare(rel, [e1, e2]) => {
                let v1 = self.eval(e1)?;
                let v2 = self.eval(e2)?;
                Value::Bool(compare(*rel, &v1, &v2)?)
            }
            ExprKind::BoolOp(op, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    values.push(self.eval_bool(arg)?);
                }
                Value::Bool(match op {
                    BoolOp::And => values.iter().all(|b| *b),
                    BoolOp::Or => values.iter().any(|b| *b),
                    BoolOp::Xor => values.iter().filter(|b| **b).count() % 2 == 1,
                })
            }
            ExprKind::Implies([e1, e2]) => Value::Bool(!self.eval_bool(e1)? || self.eval_bool(e2)?),
            ExprKind::Call(func, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    values.push(self.eval(arg)?);
                }
                self.model.func(func)?.apply(&values)?
            }
        };
        Ok(v)
    }

    fn eval_bool(&mut self, expr: &Expr) -> Result<bool> {
        self.eval(expr)?
            .as_bool()
            .ok_or_else(|| Error::mismatch(expr.to_string(), "Bool", expr.sort()))
    }

    fn eval_binary(&self, expr: &Expr, op: BinOp, v1: Value, v2: Value) -> Result<Value> {
        let sym = op.symbol();
        if let (Value::Int(n1), Value::Int(n2)) = (&v1, &v2) {
            let n = match op {
                BinOp::Add => n1 + n2,
                BinOp::Sub => n1 - n2,
                BinOp::Mul => n1 * n2,
                BinOp::IntDiv | BinOp::Mod => {
                    if n2.is_zero() {
                        return Err(Error::DivisionByZero(expr.to_string()));
                    }
                    let (q, r) = div_rem_euclid(n1, n2);
                    if op == BinOp::IntDiv { q } else { r }
                }
                BinOp::Pow => num_traits::pow(n1.clone(), exponent(n2)?),
                BinOp::Div => {
                    return real_div(expr, &BigRational::from_integer(n1.clone()), n2.clone());
                }
            };
            return Ok(Value::Int(n));
        }
        let q1 = v1.to_rational(sym)?;
        let q = match op {
            BinOp::Add => q1 + v2.to_rational(sym)?,
            BinOp::Sub => q1 - v2.to_rational(sym)?,
            BinOp::Mul => q1 * v2.to_rational(sym)?,
            BinOp::Div => {
                let q2 = v2.to_rational(sym)?;
                if q2.is_zero() {
                    return Err(Error::DivisionByZero(expr.to_string()));
                }
                q1 / q2
            }
            BinOp::Pow => {
                let Value::Int(n) = &v2 else {
                    return Err(Error::InvalidOperand(format!("exponent `{v2}` is not an Int")));
                };
                num_traits::pow(q1, exponent(n)?)
            }
            BinOp::IntDiv | BinOp::Mod => return Err(Error::mismatch(sym, "Int", Sort::Real)),
        };
        Ok(Value::Real(q))
    }
}

fn real_div(expr: &Expr, q1: &BigRational, n2: BigInt) -> Result<Value> {
    if n2.is_zero() {
        return Err(Error::DivisionByZero(expr.to_string()));
    }
    Ok(Value::Real(q1 / BigRational::from_integer(n2)))
}

fn exponent(n: &BigInt) -> Result<usize> {
    n.to_u32()
        .filter(|&n| n <= Expr::MAX_EXPONENT)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::InvalidOperand(format!("invalid exponent `{n}`")))
}

/// Quotient and remainder with `0 <= r < |d|`.
fn div_rem_euclid(n: &BigInt, d: &BigInt) -> (BigInt, BigInt) {
    let mut q = n / d;
    let mut r = n % d;
    if r.is_negative() {
        if d.is_positive() {
            q -= BigInt::one();
            r += d;
        } else {
            q += BigInt::one();
            r -= d;
        }
    }
    (q, r)
}

fn compare(rel: BinRel, v1: &Value, v2: &Value) -> Result<bool> {
    if let (Value::Bool(b1), Value::Bool(b2)) = (v1, v2) {
        return match rel {
            BinRel::Eq => Ok(b1 == b2),
            BinRel::Ne => Ok(b1 != b2),
            _ => Err(Error::mismatch(rel.symbol(), "Int or Real", Sort::Bool)),
        };
    }
    let ord = v1.to_rational(rel.symbol())?.cmp(&v2.to_rational(rel.symbol())?);
    Ok(match rel {
        BinRel::Eq => ord == Ordering::Equal,
        BinRel::Ne => ord != Ordering::Equal,
        BinRel::Lt => ord == Ordering::Less,
        BinRel::Le => ord != Ordering::Greater,
        BinRel::Gt => ord == Ordering::Greater,
        BinRel::Ge => ord != Ordering::Less,
    })
}
