use super::pattern::eval_like;
use crate::core::{Document, Result, Value};
use std::cmp::Ordering;
use std::fmt;

/// Comparison applied to one component field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// SQL `LIKE` semantics: `%` any run, `_` one character, `\` escapes.
    Like(String),
    /// Case-insensitive `LIKE`.
    ILike(String),
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Ne(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gt(value.into()))
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt(value.into()))
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lte(value.into()))
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Like(pattern.into()))
    }

    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOp::ILike(pattern.into()))
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::In(values))
    }

    /// Evaluate against a component document. Missing fields and NULLs never match.
    pub fn matches(&self, doc: &Document) -> Result<bool> {
        let Some(actual) = doc.get(&self.field) else {
            return Ok(false);
        };
        if actual.is_null() {
            return Ok(false);
        }

        let ordering = |expected: &Value| actual.compare(expected);

        let matched = match &self.op {
            FilterOp::Eq(expected) => ordering(expected) == Some(Ordering::Equal),
            FilterOp::Ne(expected) => {
                matches!(ordering(expected), Some(Ordering::Less | Ordering::Greater))
            }
            FilterOp::Gt(expected) => ordering(expected) == Some(Ordering::Greater),
            FilterOp::Gte(expected) => {
                matches!(ordering(expected), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterOp::Lt(expected) => ordering(expected) == Some(Ordering::Less),
            FilterOp::Lte(expected) => {
                matches!(ordering(expected), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOp::Like(pattern) => match actual {
                Value::Text(text) => eval_like(text, pattern, true)?,
                _ => false,
            },
            FilterOp::ILike(pattern) => match actual {
                Value::Text(text) => eval_like(text, pattern, false)?,
                _ => false,
            },
            FilterOp::In(candidates) => candidates
                .iter()
                .any(|candidate| ordering(candidate) == Some(Ordering::Equal)),
        };
        Ok(matched)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            FilterOp::Eq(v) => write!(f, "{} = {}", self.field, v),
            FilterOp::Ne(v) => write!(f, "{} != {}", self.field, v),
            FilterOp::Gt(v) => write!(f, "{} > {}", self.field, v),
            FilterOp::Gte(v) => write!(f, "{} >= {}", self.field, v),
            FilterOp::Lt(v) => write!(f, "{} < {}", self.field, v),
            FilterOp::Lte(v) => write!(f, "{} <= {}", self.field, v),
            FilterOp::Like(p) => write!(f, "{} LIKE '{}'", self.field, p),
            FilterOp::ILike(p) => write!(f, "{} ILIKE '{}'", self.field, p),
            FilterOp::In(values) => {
                let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} IN ({})", self.field, list.join(", "))
            }
        }
    }
}
