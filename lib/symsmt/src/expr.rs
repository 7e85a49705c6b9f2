use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use itertools::Itertools;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed};
use rustc_hash::FxHashSet;

use crate::{
    error::{Error, Result},
    sort::Sort,
};

/// A declared symbol. Handles are cheap to clone and compare by identity: two declarations are
/// the same only if they come from the same [`crate::Session::declare`] call.
#[derive(Clone)]
pub struct Decl(Arc<DeclData>);

struct DeclData {
    name: String,
    sort: Sort,
}

impl Decl {
    pub(crate) fn new(name: String, sort: Sort) -> Decl {
        Decl(Arc::new(DeclData { name, sort }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn sort(&self) -> &Sort {
        &self.0.sort
    }

    /// A reference to this declaration usable as an operand.
    pub fn expr(&self) -> Expr {
        Expr::new(ExprKind::Ref(self.clone()), self.sort().clone())
    }
}

impl PartialEq for Decl {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Decl {}

impl Hash for Decl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.sort())
    }
}

/// An immutable, shareable expression tree. Every node carries its sort, computed when the node
/// is built.
///
/// Equality and hashing are structural. Cloning is cheap and shares the node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Expr(Arc<ExprData>);

#[derive(PartialEq, Eq, Hash)]
struct ExprData {
    kind: ExprKind,
    sort: Sort,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ExprKind {
    Lit(Literal),
    Ref(Decl),
    Unary(UnOp, Expr),
    Binary(BinOp, [Expr; 2]),
    Compare(BinRel, [Expr; 2]),
    BoolOp(BoolOp, Arc<[Expr]>),
    Implies([Expr; 2]),
    Call(Decl, Arc<[Expr]>),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Real division
    Div,
    /// Integer (Euclidean) division
    IntDiv,
    Mod,
    /// Exponentiation by a non-negative integer literal
    Pow,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinRel {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Literal {
    Bool(bool),
    Int(BigInt),
    Real(BigRational),
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, sort: Sort) -> Expr {
        Expr(Arc::new(ExprData { kind, sort }))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    pub fn sort(&self) -> &Sort {
        &self.0.sort
    }

    /// Identity of this node. Clones of the same node share it, structurally equal trees built
    /// separately do not.
    pub fn node_id(&self) -> NodeId {
        NodeId(Arc::as_ptr(&self.0) as usize)
    }

    /// The direct sub-expressions of this node, left to right.
    pub fn children(&self) -> &[Expr] {
        match self.kind() {
            ExprKind::Lit(_) | ExprKind::Ref(_) => &[],
            ExprKind::Unary(_, e) => std::slice::from_ref(e),
            ExprKind::Binary(_, args) | ExprKind::Compare(_, args) | ExprKind::Implies(args) => {
                args
            }
            ExprKind::BoolOp(_, args) | ExprKind::Call(_, args) => args,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind(), ExprKind::Lit(_) | ExprKind::Ref(_))
    }

    /// Visits every distinct node of the tree once, children before parents.
    pub fn visit_post_order(&self, f: &mut impl FnMut(&Expr)) {
        fn go(e: &Expr, seen: &mut FxHashSet<NodeId>, f: &mut impl FnMut(&Expr)) {
            if !seen.insert(e.node_id()) {
                return;
            }
            for child in e.children() {
                go(child, seen, f);
            }
            f(e);
        }
        go(self, &mut FxHashSet::default(), f);
    }
}

/// Address-based identity of an [`Expr`] node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(usize);

impl Literal {
    pub fn sort(&self) -> Sort {
        match self {
            Literal::Bool(_) => Sort::Bool,
            Literal::Int(_) => Sort::Int,
            Literal::Real(_) => Sort::Real,
        }
    }
}

macro_rules! impl_int_literal {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Literal {
                fn from(v: $ty) -> Self {
                    Literal::Int(BigInt::from(v))
                }
            }

            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::literal(v)
                }
            }
        )*
    };
}

impl_int_literal!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<BigInt> for Literal {
    fn from(n: BigInt) -> Self {
        Literal::Int(n)
    }
}

impl From<BigRational> for Literal {
    fn from(q: BigRational) -> Self {
        Literal::Real(q)
    }
}

impl TryFrom<f64> for Literal {
    type Error = Error;

    /// Converts to the exact rational value of the float.
    fn try_from(v: f64) -> Result<Self> {
        BigRational::from_float(v)
            .map(Literal::Real)
            .ok_or_else(|| Error::InvalidOperand(format!("`{v}` is not a finite real number")))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::literal(b)
    }
}

impl From<BigInt> for Expr {
    fn from(n: BigInt) -> Self {
        Expr::literal(n)
    }
}

impl From<BigRational> for Expr {
    fn from(q: BigRational) -> Self {
        Expr::literal(q)
    }
}

impl From<Literal> for Expr {
    fn from(lit: Literal) -> Self {
        Expr::literal(lit)
    }
}

impl From<&Decl> for Expr {
    fn from(decl: &Decl) -> Self {
        decl.expr()
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Pos => "+",
            UnOp::Not => "not",
        }
    }
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "div",
            BinOp::Mod => "mod",
            BinOp::Pow => "^",
        }
    }
}

impl BinRel {
    pub fn symbol(self) -> &'static str {
        match self {
            BinRel::Eq => "=",
            BinRel::Ne => "distinct",
            BinRel::Lt => "<",
            BinRel::Le => "<=",
            BinRel::Gt => ">",
            BinRel::Ge => ">=",
        }
    }
}

impl BoolOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
            BoolOp::Xor => "xor",
        }
    }
}

/// Writes `name` as an SMT-LIB symbol, quoting it with `|...|` unless it is a simple symbol.
pub(crate) fn fmt_symbol(name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if is_simple_symbol(name) && !is_reserved_symbol(name) {
        write!(f, "{name}")
    } else {
        write!(f, "|{name}|")
    }
}

/// SMT-LIB reserved words and the symbols of the core, integer and real theories. Quoting does
/// not distinguish them: `|true|` and `true` are the same symbol.
pub(crate) fn is_reserved_symbol(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "!", "_", "as", "let", "exists", "forall", "match", "par", "BINARY", "DECIMAL",
        "HEXADECIMAL", "NUMERAL", "STRING", "Bool", "Int", "Real", "true", "false", "not", "and",
        "or", "xor", "=>", "=", "distinct", "ite", "+", "-", "*", "/", "div", "mod", "abs", "<",
        "<=", ">", ">=", "to_real", "to_int", "is_int",
    ];
    RESERVED.contains(&name)
}

fn is_simple_symbol(name: &str) -> bool {
    const EXTRA: &str = "~!@$%^&*_-+=<>.?/";
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || EXTRA.contains(c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || EXTRA.contains(c))
}

fn fmt_numeral(n: &BigInt, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_negative() { write!(f, "(- {})", n.abs()) } else { write!(f, "{n}") }
}

impl fmt::Display for Literal {
    /// SMT-LIB syntax: `5`, `(- 5)`, `2.0`, `(/ 1.0 3.0)`, `(- (/ 1.0 3.0))`, `true`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => fmt_numeral(n, f),
            Literal::Real(q) => {
                let abs = q.abs();
                let body = if abs.denom().is_one() {
                    format!("{}.0", abs.numer())
                } else {
                    format!("(/ {}.0 {}.0)", abs.numer(), abs.denom())
                };
                if q.is_negative() { write!(f, "(- {body})") } else { write!(f, "{body}") }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Lit(lit) => write!(f, "{lit}"),
            ExprKind::Ref(decl) => fmt_symbol(decl.name(), f),
            ExprKind::Unary(op, e) => write!(f, "({} {e})", op.symbol()),
            ExprKind::Binary(op, [e1, e2]) => write!(f, "({} {e1} {e2})", op.symbol()),
            ExprKind::Compare(rel, [e1, e2]) => write!(f, "({} {e1} {e2})", rel.symbol()),
            ExprKind::BoolOp(op, args) => {
                write!(f, "({}", op.symbol())?;
                for arg in args.iter() {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            ExprKind::Implies([e1, e2]) => write!(f, "(=> {e1} {e2})"),
            ExprKind::Call(func, args) => {
                write!(f, "(")?;
                fmt_symbol(func.name(), f)?;
                write!(f, " {})", args.iter().format(" "))
            }
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}: {}", self.sort())
    }
}
