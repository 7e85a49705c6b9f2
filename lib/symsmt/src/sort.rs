use std::{fmt, sync::Arc};

use itertools::Itertools;

use crate::error::{Error, Result};

/// The sort of a symbolic value.
///
/// Function sorts are first order: their domain and range only contain `Int`, `Real` and `Bool`.
/// The only way to build one is [`Sort::func`], which enforces this.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Sort {
    Int,
    Real,
    Bool,
    Func(FuncSort),
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FuncSort(Arc<FuncSortInner>);

#[derive(PartialEq, Eq, Hash, Debug)]
struct FuncSortInner {
    domain: Vec<Sort>,
    range: Sort,
}

impl Sort {
    pub fn func<I>(domain: I, range: Sort) -> Result<Sort>
    where
        I: IntoIterator<Item = Sort>,
    {
        let domain = domain.into_iter().collect_vec();
        if domain.is_empty() {
            return Err(Error::InvalidSort("a function needs at least one argument".into()));
        }
        if let Some(sort) = domain.iter().chain([&range]).find(|sort| !sort.is_scalar()) {
            return Err(Error::InvalidSort(format!(
                "function sorts cannot be nested, found `{sort}`"
            )));
        }
        Ok(Sort::Func(FuncSort(Arc::new(FuncSortInner { domain, range }))))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Sort::Int | Sort::Real)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Sort::Func(_))
    }

    pub fn as_func(&self) -> Option<&FuncSort> {
        if let Sort::Func(fsort) = self { Some(fsort) } else { None }
    }

    /// Whether a value of sort `found` can be used where `self` is expected, i.e., the sorts are
    /// equal or `found` is `Int` and `self` is `Real`.
    pub fn accepts(&self, found: &Sort) -> bool {
        self == found || (*self == Sort::Real && *found == Sort::Int)
    }

    /// The common sort of two numeric operands. `Int` joined with `Real` is `Real`.
    pub(crate) fn join_numeric(&self, other: &Sort) -> Option<Sort> {
        match (self, other) {
            (Sort::Int, Sort::Int) => Some(Sort::Int),
            (Sort::Int | Sort::Real, Sort::Int | Sort::Real) => Some(Sort::Real),
            _ => None,
        }
    }

    /// The common sort of two operands compared for (dis)equality.
    pub(crate) fn join_eq(&self, other: &Sort) -> Option<Sort> {
        match (self, other) {
            (Sort::Bool, Sort::Bool) => Some(Sort::Bool),
            _ => self.join_numeric(other),
        }
    }
}

impl FuncSort {
    pub fn domain(&self) -> &[Sort] {
        &self.0.domain
    }

    pub fn range(&self) -> &Sort {
        &self.0.range
    }

    pub fn arity(&self) -> usize {
        self.0.domain.len()
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Int => write!(f, "Int"),
            Sort::Real => write!(f, "Real"),
            Sort::Bool => write!(f, "Bool"),
            Sort::Func(fsort) => write!(f, "{fsort}"),
        }
    }
}

impl fmt::Display for FuncSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.domain().iter().format(" "), self.range())
    }
}
