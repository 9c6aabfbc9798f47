//! Query constraints understood by the remote store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::NotEq => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::In => "in",
        }
    }
}

impl FromStr for FilterOp {
    type Err = CacheError;

    /// Parses the operator spelling used by the document store's query API.
    fn from_str(op: &str) -> Result<Self> {
        Ok(match op {
            "==" => FilterOp::Eq,
            "!=" => FilterOp::NotEq,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Lte,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Gte,
            "array-contains" => FilterOp::ArrayContains,
            "in" => FilterOp::In,
            other => {
                return Err(CacheError::InvalidRequest(format!(
                    "unknown filter operator: {other}"
                )))
            }
        })
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `field <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Evaluates the predicate against a document's field map.
    /// A missing field never matches.
    pub fn matches(&self, data: &serde_json::Map<String, Value>) -> bool {
        let Some(actual) = data.get(&self.field) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::NotEq => actual != &self.value,
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|options| options.contains(actual)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// One query constraint: a filter, an ordering, or a result limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryConstraint {
    Where(Filter),
    OrderBy { field: String, direction: Direction },
    Limit(usize),
}

/// Builds a `Where` constraint, e.g.
/// `where_("studentEmails", FilterOp::ArrayContains, "a@x.com")`.
pub fn where_(field: &str, op: FilterOp, value: impl Into<Value>) -> QueryConstraint {
    QueryConstraint::Where(Filter {
        field: field.to_string(),
        op,
        value: value.into(),
    })
}

pub fn order_by(field: &str, direction: Direction) -> QueryConstraint {
    QueryConstraint::OrderBy {
        field: field.to_string(),
        direction,
    }
}

pub fn limit(n: usize) -> QueryConstraint {
    QueryConstraint::Limit(n)
}

/// Orders JSON scalars of the same kind; mixed kinds are incomparable.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
