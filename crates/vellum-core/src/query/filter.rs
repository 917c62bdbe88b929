//! Server-side filter language for push-down adapters
//!
//! A structured condition expression over top-level document attributes,
//! modelled on key-value store scan filters. Adapters either evaluate it
//! directly against stored documents or render it to their native dialect.

use crate::query::eval;
use crate::query::spec::CompareOp;
use crate::types::wire;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NativeFilter {
    AttributeExists(String),
    AttributeNotExists(String),
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
    },
    /// Array membership or substring
    Contains { path: String, value: Value },
    BeginsWith { path: String, prefix: String },
    And(Vec<NativeFilter>),
    Or(Vec<NativeFilter>),
    Not(Box<NativeFilter>),
}

impl NativeFilter {
    /// Records of `type_name` that are not soft-deleted
    pub fn base(type_name: &str) -> NativeFilter {
        NativeFilter::And(vec![
            NativeFilter::Compare {
                path: wire::TYPE_NAME.to_string(),
                op: CompareOp::Eq,
                value: Value::String(type_name.to_string()),
            },
            NativeFilter::Or(vec![
                NativeFilter::AttributeNotExists(wire::IS_DELETED.to_string()),
                NativeFilter::Compare {
                    path: wire::IS_DELETED.to_string(),
                    op: CompareOp::Eq,
                    value: Value::Bool(false),
                },
            ]),
        ])
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            NativeFilter::AttributeExists(path) => eval::lookup(document, path).is_some(),
            NativeFilter::AttributeNotExists(path) => eval::lookup(document, path).is_none(),
            NativeFilter::Compare { path, op, value } => {
                eval::compare(eval::lookup(document, path), *op, Some(value))
            }
            NativeFilter::Contains { path, value } => {
                eval::contains(eval::lookup(document, path), Some(value))
            }
            NativeFilter::BeginsWith { path, prefix } => match eval::lookup(document, path) {
                Some(Value::String(text)) => text.starts_with(prefix.as_str()),
                _ => false,
            },
            NativeFilter::And(parts) => parts.iter().all(|p| p.matches(document)),
            NativeFilter::Or(parts) => parts.iter().any(|p| p.matches(document)),
            NativeFilter::Not(inner) => !inner.matches(document),
        }
    }

    /// Conjoin, flattening nested conjunctions
    pub fn and(self, other: NativeFilter) -> NativeFilter {
        let mut parts = match self {
            NativeFilter::And(parts) => parts,
            first => vec![first],
        };
        match other {
            NativeFilter::And(more) => parts.extend(more),
            other => parts.push(other),
        }
        NativeFilter::And(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_filter_excludes_deleted_and_other_types() {
        let base = NativeFilter::base("Widget");
        assert!(base.matches(&json!({"typeName": "Widget"})));
        assert!(base.matches(&json!({"typeName": "Widget", "isDeleted": false})));
        assert!(!base.matches(&json!({"typeName": "Widget", "isDeleted": true})));
        assert!(!base.matches(&json!({"typeName": "WidgetEvent"})));
    }

    #[test]
    fn test_and_flattens() {
        let f = NativeFilter::base("W").and(NativeFilter::AttributeExists("x".into()));
        match f {
            NativeFilter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
