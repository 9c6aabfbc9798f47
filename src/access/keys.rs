//! Cache key derivation.
//!
//! Keys have the shape `{collection}_{fingerprint}_{identity}`. The
//! fingerprint is deterministic: equivalent queries written in a different
//! order produce the same key, and the acting identity keeps one subject's
//! rows from ever being served to another.
//!
//! Everything after the collection prefix is escaped (`%` as `%25`, `_` as
//! `%5F`), so the two separators are the only underscores in that part and
//! distinct (fingerprint, identity) pairs never produce the same key.

use serde_json::Value;

use crate::remote::{Direction, FilterOp, QueryConstraint};

/// Fingerprint of an unconstrained collection read.
pub const FINGERPRINT_ALL: &str = "all";

/// Prefix shared by every key of `collection`.
pub fn collection_prefix(collection: &str) -> String {
    format!("{}_", collection)
}

/// Key for a collection query run on behalf of `identity`.
pub fn collection_key(collection: &str, constraints: &[QueryConstraint], identity: &str) -> String {
    format!(
        "{}{}_{}",
        collection_prefix(collection),
        escape(&fingerprint(constraints)),
        escape(identity)
    )
}

/// Key for a single document read on behalf of `identity`.
pub fn document_key(collection: &str, id: &str, identity: &str) -> String {
    format!(
        "{}doc:{}_{}",
        collection_prefix(collection),
        escape(id),
        escape(identity)
    )
}

/// Percent-encodes the escape character and the key separator.
fn escape(component: &str) -> String {
    if !component.contains(|c| c == '%' || c == '_') {
        return component.to_string();
    }
    let mut escaped = String::with_capacity(component.len() + 4);
    for c in component.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '_' => escaped.push_str("%5F"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Deterministic encoding of a query's shape.
///
/// `where` predicates are commutative, so they are sorted by
/// (field, operator, value). `orderBy` and `limit` keep declaration order
/// since that order changes the result.
pub fn fingerprint(constraints: &[QueryConstraint]) -> String {
    let mut predicates: Vec<(&str, FilterOp, String)> = Vec::new();
    let mut tail: Vec<String> = Vec::new();

    for constraint in constraints {
        match constraint {
            QueryConstraint::Where(filter) => {
                predicates.push((
                    filter.field.as_str(),
                    filter.op,
                    canonical_value(filter.op, &filter.value),
                ));
            }
            QueryConstraint::OrderBy { field, direction } => {
                let dir = match direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                tail.push(format!("orderBy:{}:{}", field, dir));
            }
            QueryConstraint::Limit(n) => tail.push(format!("limit:{}", n)),
        }
    }

    if predicates.is_empty() && tail.is_empty() {
        return FINGERPRINT_ALL.to_string();
    }

    predicates.sort();
    predicates.dedup();

    predicates
        .into_iter()
        .map(|(field, op, value)| format!("{}{}{}", field, op, value))
        .chain(tail)
        .collect::<Vec<_>>()
        .join("&")
}

/// Compact JSON for the value; `in` lists are order-insensitive so their
/// members are sorted.
fn canonical_value(op: FilterOp, value: &Value) -> String {
    match (op, value) {
        (FilterOp::In, Value::Array(items)) => {
            let mut members: Vec<String> = items.iter().map(Value::to_string).collect();
            members.sort();
            members.dedup();
            format!("[{}]", members.join(","))
        }
        _ => value.to_string(),
    }
}
