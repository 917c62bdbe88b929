//! In-process evaluation of predicates over stored documents
//!
//! Missing properties and JSON null are the same thing. Equality with null
//! matches a missing property; ordering comparisons against a missing
//! property or a value of another type are false.

use crate::query::spec::{CompareOp, Operand, Predicate, QueryOp};
use serde_json::Value;
use std::cmp::Ordering;

/// Top-level property of a document, `None` when absent or null
pub fn lookup<'a>(document: &'a Value, name: &str) -> Option<&'a Value> {
    document.get(name).filter(|v| !v.is_null())
}

fn resolve<'a>(operand: &'a Operand, document: &'a Value) -> Option<&'a Value> {
    match operand {
        Operand::Field(name) => lookup(document, name),
        Operand::Literal(value) => Some(value).filter(|v| !v.is_null()),
    }
}

/// Order two scalars of the same kind; `None` when they are not comparable
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    match compare_values(left, right) {
        Some(ordering) => ordering.is_eq(),
        None => left == right,
    }
}

/// Whether `op` is satisfied by an already computed ordering
pub fn ordering_holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
    }
}

/// Apply a comparison operator to two resolved operands
pub fn compare(left: Option<&Value>, op: CompareOp, right: Option<&Value>) -> bool {
    match op {
        CompareOp::Eq => match (left, right) {
            (None, None) => true,
            (Some(a), Some(b)) => values_equal(a, b),
            _ => false,
        },
        CompareOp::Ne => !compare(left, CompareOp::Eq, right),
        _ => {
            let (Some(a), Some(b)) = (left, right) else {
                return false;
            };
            compare_values(a, b).is_some_and(|o| ordering_holds(op, o))
        }
    }
}

/// Membership in an array, or substring of a string
pub fn contains(target: Option<&Value>, item: Option<&Value>) -> bool {
    match (target, item) {
        (Some(Value::Array(items)), Some(item)) => items.iter().any(|v| values_equal(v, item)),
        (Some(Value::String(text)), Some(Value::String(needle))) => text.contains(needle.as_str()),
        _ => false,
    }
}

pub fn starts_with(target: Option<&Value>, prefix: Option<&Value>) -> bool {
    match (target, prefix) {
        (Some(Value::String(text)), Some(Value::String(prefix))) => text.starts_with(prefix.as_str()),
        _ => false,
    }
}

pub fn ends_with(target: Option<&Value>, suffix: Option<&Value>) -> bool {
    match (target, suffix) {
        (Some(Value::String(text)), Some(Value::String(suffix))) => text.ends_with(suffix.as_str()),
        _ => false,
    }
}

pub fn eval_predicate(predicate: &Predicate, document: &Value) -> bool {
    match predicate {
        Predicate::Compare { left, op, right } => {
            compare(resolve(left, document), *op, resolve(right, document))
        }
        Predicate::Contains { target, item } => {
            contains(resolve(target, document), resolve(item, document))
        }
        Predicate::StartsWith { target, prefix } => {
            starts_with(resolve(target, document), resolve(prefix, document))
        }
        Predicate::EndsWith { target, suffix } => {
            ends_with(resolve(target, document), resolve(suffix, document))
        }
        Predicate::And(parts) => parts.iter().all(|p| eval_predicate(p, document)),
        Predicate::Or(parts) => parts.iter().any(|p| eval_predicate(p, document)),
        Predicate::Not(inner) => !eval_predicate(inner, document),
        Predicate::Const(value) => *value,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: missing first, then by type, then by value
pub fn sort_order(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    type_rank(left)
        .cmp(&type_rank(right))
        .then_with(|| match (left, right) {
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        })
}

/// Stable sort of documents by one property
pub fn sort_documents(documents: &mut [Value], field: &str, descending: bool) {
    documents.sort_by(|a, b| {
        let ordering = sort_order(lookup(a, field), lookup(b, field));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

/// Apply a chain of operators to an in-memory result set, in order
pub fn replay(mut documents: Vec<Value>, ops: &[QueryOp]) -> Vec<Value> {
    for op in ops {
        match op {
            QueryOp::Where(predicate) => documents.retain(|d| eval_predicate(predicate, d)),
            QueryOp::OrderBy { field, descending } => {
                sort_documents(&mut documents, field, *descending)
            }
            QueryOp::Skip(count) => {
                documents.drain(..(*count).min(documents.len()));
            }
            QueryOp::Take(count) => documents.truncate(*count),
        }
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::spec::field;
    use serde_json::json;

    #[test]
    fn test_null_semantics() {
        let doc = json!({"a": 1, "b": null});
        assert!(eval_predicate(&field("b").is_null(), &doc));
        assert!(eval_predicate(&field("missing").is_null(), &doc));
        assert!(eval_predicate(&field("a").is_not_null(), &doc));
        assert!(!eval_predicate(&field("missing").lt(5), &doc));
        assert!(eval_predicate(&field("missing").ne(5), &doc));
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        let doc = json!({"n": 5});
        assert!(eval_predicate(&field("n").eq(5.0), &doc));
        assert!(eval_predicate(&field("n").gt(4.5), &doc));
        assert!(!eval_predicate(&field("n").gt("4"), &doc));
    }

    #[test]
    fn test_contains_and_prefixes() {
        let doc = json!({"tags": ["x", "y"], "name": "widget"});
        assert!(eval_predicate(&field("tags").contains("y"), &doc));
        assert!(eval_predicate(&field("name").contains("dge"), &doc));
        assert!(eval_predicate(&field("name").starts_with("wid"), &doc));
        assert!(eval_predicate(&field("name").ends_with("get"), &doc));
        assert!(eval_predicate(&field("name").is_in(["gadget", "widget"]), &doc));
        assert!(!eval_predicate(&field("tags").starts_with("x"), &doc));
    }

    #[test]
    fn test_replay_applies_in_order() {
        let docs: Vec<Value> = (1..=6).map(|n| json!({"n": n})).collect();
        let ops = vec![
            QueryOp::OrderBy {
                field: "n".into(),
                descending: true,
            },
            QueryOp::Skip(1),
            QueryOp::Take(3),
            QueryOp::Where(field("n").gt(3)),
        ];
        let out = replay(docs, &ops);
        assert_eq!(out, vec![json!({"n": 5}), json!({"n": 4})]);
    }

    #[test]
    fn test_sort_puts_missing_first_and_is_stable() {
        let mut docs = vec![
            json!({"id": "1", "k": 2}),
            json!({"id": "2"}),
            json!({"id": "3", "k": 1}),
            json!({"id": "4", "k": 2}),
        ];
        sort_documents(&mut docs, "k", false);
        let ids: Vec<&str> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["2", "3", "1", "4"]);

        sort_documents(&mut docs, "k", true);
        let ids: Vec<&str> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["1", "4", "3", "2"]);
    }
}
