//! Split a query description into a native filter and an in-process residual
//!
//! Only `Where` operators that no `Skip`/`Take` precedes are eligible for
//! push-down; they are merged with AND and each top-level conjunct is
//! converted on its own. Conjuncts with no native form, and every other
//! operator, are replayed in process in their original order.

use crate::error::{Result, VellumError};
use crate::query::eval;
use crate::query::filter::NativeFilter;
use crate::query::spec::{CompareOp, Operand, Predicate, QueryOp, QuerySpec};
use crate::types::FieldCatalog;
use serde_json::Value;

/// Output of [`translate`]
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Evaluated by the store; includes the type and not-deleted base filter
    pub native: NativeFilter,
    /// Replayed in process over the store's results, in order
    pub residual: Vec<QueryOp>,
    /// Checked description with literal-only sub-expressions folded
    pub spec: QuerySpec,
}

impl Translation {
    pub fn is_fully_pushed(&self) -> bool {
        self.residual.is_empty()
    }
}

pub fn translate(spec: &QuerySpec, type_name: &str, catalog: &FieldCatalog) -> Result<Translation> {
    let mut ops = Vec::with_capacity(spec.ops.len());
    for op in &spec.ops {
        ops.push(check_op(op, catalog)?);
    }

    let first_paging = ops.iter().position(QueryOp::is_paging).unwrap_or(ops.len());

    let mut conjuncts = Vec::new();
    let mut residual = Vec::new();
    for (index, op) in ops.iter().enumerate() {
        match op {
            QueryOp::Where(predicate) if index < first_paging => {
                flatten_and(predicate.clone(), &mut conjuncts)
            }
            other => residual.push(other.clone()),
        }
    }

    let mut native = NativeFilter::base(type_name);
    let mut kept = Vec::new();
    for conjunct in conjuncts {
        if conjunct == Predicate::Const(true) {
            continue;
        }
        match to_native(&conjunct) {
            Some(filter) => native = native.and(filter),
            None => kept.push(conjunct),
        }
    }

    if !kept.is_empty() {
        let predicate = if kept.len() == 1 {
            kept.remove(0)
        } else {
            Predicate::And(kept)
        };
        residual.insert(0, QueryOp::Where(predicate));
    }

    Ok(Translation {
        native,
        residual,
        spec: QuerySpec { ops },
    })
}

fn check_op(op: &QueryOp, catalog: &FieldCatalog) -> Result<QueryOp> {
    match op {
        QueryOp::Where(predicate) => {
            check_predicate(predicate, catalog)?;
            Ok(QueryOp::Where(fold(predicate.clone())))
        }
        QueryOp::OrderBy { field, .. } => {
            check_field(field, catalog)?;
            Ok(op.clone())
        }
        QueryOp::Skip(_) | QueryOp::Take(_) => Ok(op.clone()),
    }
}

fn check_field(name: &str, catalog: &FieldCatalog) -> Result<()> {
    match catalog.lookup(name) {
        None => Err(VellumError::Unsupported(format!("unknown property {name}"))),
        Some(info) if info.encrypted => Err(VellumError::Unsupported(format!(
            "encrypted property {name} cannot be queried"
        ))),
        Some(_) => Ok(()),
    }
}

fn check_predicate(predicate: &Predicate, catalog: &FieldCatalog) -> Result<()> {
    for name in predicate.fields() {
        check_field(name, catalog)?;
    }
    check_shape(predicate)
}

fn is_null_literal(operand: &Operand) -> bool {
    matches!(operand, Operand::Literal(Value::Null))
}

fn check_shape(predicate: &Predicate) -> Result<()> {
    match predicate {
        Predicate::Compare { left, op, right } => {
            if op.is_ordering() && (is_null_literal(left) || is_null_literal(right)) {
                return Err(VellumError::Unsupported(format!(
                    "ordering comparison '{}' against null",
                    op.symbol()
                )));
            }
            Ok(())
        }
        Predicate::StartsWith { prefix: arg, .. } | Predicate::EndsWith { suffix: arg, .. } => {
            match arg {
                Operand::Literal(Value::String(_)) | Operand::Field(_) => Ok(()),
                Operand::Literal(other) => Err(VellumError::Unsupported(format!(
                    "string match against non-string literal {other}"
                ))),
            }
        }
        Predicate::Contains { .. } | Predicate::Const(_) => Ok(()),
        Predicate::And(parts) | Predicate::Or(parts) => parts.iter().try_for_each(check_shape),
        Predicate::Not(inner) => check_shape(inner),
    }
}

/// Evaluate sub-expressions that reference no property
fn fold(predicate: Predicate) -> Predicate {
    let empty = Value::Null;
    let constant = |p: &Predicate| {
        p.fields()
            .is_empty()
            .then(|| Predicate::Const(eval::eval_predicate(p, &empty)))
    };

    match predicate {
        Predicate::And(parts) => {
            let mut out = Vec::new();
            for part in parts.into_iter().map(fold) {
                match part {
                    Predicate::Const(true) => {}
                    Predicate::Const(false) => return Predicate::Const(false),
                    other => out.push(other),
                }
            }
            match out.len() {
                0 => Predicate::Const(true),
                1 => out.remove(0),
                _ => Predicate::And(out),
            }
        }
        Predicate::Or(parts) => {
            let mut out = Vec::new();
            for part in parts.into_iter().map(fold) {
                match part {
                    Predicate::Const(false) => {}
                    Predicate::Const(true) => return Predicate::Const(true),
                    other => out.push(other),
                }
            }
            match out.len() {
                0 => Predicate::Const(false),
                1 => out.remove(0),
                _ => Predicate::Or(out),
            }
        }
        Predicate::Not(inner) => match fold(*inner) {
            Predicate::Const(value) => Predicate::Const(!value),
            other => Predicate::Not(Box::new(other)),
        },
        leaf => constant(&leaf).unwrap_or(leaf),
    }
}

fn flatten_and(predicate: Predicate, out: &mut Vec<Predicate>) {
    match predicate {
        Predicate::And(parts) => {
            for part in parts {
                flatten_and(part, out);
            }
        }
        other => out.push(other),
    }
}

fn native_compare(path: &str, op: CompareOp, value: &Value) -> Option<NativeFilter> {
    match (op, value) {
        (CompareOp::Eq, Value::Null) => Some(NativeFilter::AttributeNotExists(path.to_string())),
        (CompareOp::Ne, Value::Null) => Some(NativeFilter::AttributeExists(path.to_string())),
        (_, Value::Null) => None,
        _ => Some(NativeFilter::Compare {
            path: path.to_string(),
            op,
            value: value.clone(),
        }),
    }
}

/// Native form of one predicate, `None` when the store cannot evaluate it
fn to_native(predicate: &Predicate) -> Option<NativeFilter> {
    match predicate {
        Predicate::Compare {
            left: Operand::Field(path),
            op,
            right: Operand::Literal(value),
        } => native_compare(path, *op, value),
        Predicate::Compare {
            left: Operand::Literal(value),
            op,
            right: Operand::Field(path),
        } => native_compare(path, op.swapped(), value),
        Predicate::Contains {
            target: Operand::Field(path),
            item: Operand::Literal(value),
        } if !value.is_null() => Some(NativeFilter::Contains {
            path: path.clone(),
            value: value.clone(),
        }),
        Predicate::StartsWith {
            target: Operand::Field(path),
            prefix: Operand::Literal(Value::String(prefix)),
        } => Some(NativeFilter::BeginsWith {
            path: path.clone(),
            prefix: prefix.clone(),
        }),
        Predicate::And(parts) => parts
            .iter()
            .map(to_native)
            .collect::<Option<Vec<_>>>()
            .map(NativeFilter::And),
        Predicate::Or(parts) => parts
            .iter()
            .map(to_native)
            .collect::<Option<Vec<_>>>()
            .map(NativeFilter::Or),
        Predicate::Not(inner) => to_native(inner).map(|f| NativeFilter::Not(Box::new(f))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::spec::{field, literal};
    use crate::types::FieldInfo;
    use serde_json::json;

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(vec![
            FieldInfo {
                name: "publicField",
                encrypted: false,
            },
            FieldInfo {
                name: "count",
                encrypted: false,
            },
            FieldInfo {
                name: "tags",
                encrypted: false,
            },
            FieldInfo {
                name: "privateField",
                encrypted: true,
            },
        ])
    }

    fn pushed(t: &Translation) -> Vec<NativeFilter> {
        match &t.native {
            NativeFilter::And(parts) => parts[2..].to_vec(),
            other => panic!("unexpected native filter {other:?}"),
        }
    }

    #[test]
    fn test_simple_where_is_fully_pushed() {
        let spec = QuerySpec::new().filter(field("publicField").eq("x"));
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert!(t.is_fully_pushed());
        assert_eq!(
            pushed(&t),
            vec![NativeFilter::Compare {
                path: "publicField".into(),
                op: CompareOp::Eq,
                value: json!("x"),
            }]
        );
    }

    #[test]
    fn test_null_comparisons_become_existence_checks() {
        let spec = QuerySpec::new()
            .filter(field("publicField").is_null())
            .filter(field("count").is_not_null());
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert_eq!(
            pushed(&t),
            vec![
                NativeFilter::AttributeNotExists("publicField".into()),
                NativeFilter::AttributeExists("count".into()),
            ]
        );
    }

    #[test]
    fn test_property_on_right_swaps_operator() {
        let spec = QuerySpec::new().filter(Predicate::Compare {
            left: literal(5),
            op: CompareOp::Lt,
            right: Operand::Field("count".into()),
        });
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert_eq!(
            pushed(&t),
            vec![NativeFilter::Compare {
                path: "count".into(),
                op: CompareOp::Gt,
                value: json!(5),
            }]
        );
    }

    #[test]
    fn test_mixed_conjunction_splits() {
        let spec = QuerySpec::new().filter(
            field("publicField")
                .starts_with("ab")
                .and(field("publicField").ends_with("yz"))
                .and(field("tags").contains("t")),
        );
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert_eq!(pushed(&t).len(), 2);
        assert_eq!(
            t.residual,
            vec![QueryOp::Where(field("publicField").ends_with("yz"))]
        );
    }

    #[test]
    fn test_where_after_take_is_replayed() {
        let spec = QuerySpec::new()
            .filter(field("count").gt(1))
            .order_by("count")
            .take(10)
            .filter(field("count").lt(5));
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert_eq!(pushed(&t).len(), 1);
        assert_eq!(t.residual.len(), 3);
        assert!(matches!(t.residual[0], QueryOp::OrderBy { .. }));
        assert!(matches!(t.residual[2], QueryOp::Where(_)));
    }

    #[test]
    fn test_literal_subexpressions_fold() {
        let always = Predicate::Compare {
            left: literal(2),
            op: CompareOp::Gt,
            right: literal(1),
        };
        let spec = QuerySpec::new().filter(always.and(field("count").eq(3)));
        let t = translate(&spec, "Widget", &catalog()).unwrap();
        assert!(t.is_fully_pushed());
        assert_eq!(pushed(&t).len(), 1);
    }

    #[test]
    fn test_unsupported_shapes_fail_fast() {
        let cat = catalog();
        let unknown = QuerySpec::new().filter(field("nope").eq(1));
        let encrypted = QuerySpec::new().filter(field("privateField").eq("x"));
        let ordered_null = QuerySpec::new().filter(field("count").lt(Value::Null));
        let order_encrypted = QuerySpec::new().order_by("privateField");
        for spec in [unknown, encrypted, ordered_null, order_encrypted] {
            let err = translate(&spec, "Widget", &cat).unwrap_err();
            assert!(matches!(err, VellumError::Unsupported(_)), "{err}");
        }
    }

    /// Native filter followed by residual replay must equal direct evaluation
    #[test]
    fn test_split_preserves_semantics() {
        let docs: Vec<Value> = vec![
            json!({"typeName": "Widget", "id": "1", "publicField": "abc", "count": 1, "tags": ["t"]}),
            json!({"typeName": "Widget", "id": "2", "publicField": "abz", "count": 7}),
            json!({"typeName": "Widget", "id": "3", "count": 3, "isDeleted": false}),
            json!({"typeName": "Widget", "id": "4", "publicField": "xyz", "count": 9, "isDeleted": true}),
            json!({"typeName": "Gadget", "id": "5", "publicField": "abc", "count": 2}),
            json!({"typeName": "Widget", "id": "6", "publicField": "zbc", "tags": ["t", "u"]}),
        ];

        let specs = vec![
            QuerySpec::new().filter(field("publicField").starts_with("ab")),
            QuerySpec::new()
                .filter(field("count").ge(3).or(field("publicField").is_null()))
                .order_by_descending("count"),
            QuerySpec::new()
                .filter(field("publicField").ends_with("bc").not())
                .skip(1)
                .filter(field("count").ne(7)),
            QuerySpec::new()
                .filter(field("count").is_in([1, 3, 9]))
                .order_by("id")
                .take(1),
            QuerySpec::new()
                .filter(field("count").cmp_field(CompareOp::Lt, field("publicField")).not())
                .filter(field("tags").contains("t")),
        ];

        let base = NativeFilter::base("Widget");
        for spec in specs {
            let t = translate(&spec, "Widget", &catalog()).unwrap();
            let pushed: Vec<Value> = docs.iter().filter(|d| t.native.matches(d)).cloned().collect();
            let split = eval::replay(pushed, &t.residual);

            let visible: Vec<Value> = docs.iter().filter(|d| base.matches(d)).cloned().collect();
            let direct = eval::replay(visible, &spec.ops);
            assert_eq!(split, direct, "{spec:?}");
        }
    }

    /// The residual pass is load-bearing exactly when something was not pushed
    #[test]
    fn test_residual_is_needed_only_when_not_fully_pushed() {
        let docs: Vec<Value> = vec![
            json!({"typeName": "Widget", "id": "1", "publicField": "abc", "count": 1}),
            json!({"typeName": "Widget", "id": "2", "publicField": "abz", "count": 7}),
            json!({"typeName": "Widget", "id": "3", "publicField": "xbc", "count": 3}),
            json!({"typeName": "Widget", "id": "4", "count": 5}),
        ];
        let ids = |found: Vec<Value>| -> Vec<String> {
            let mut ids: Vec<String> = found
                .iter()
                .map(|d| d["id"].as_str().unwrap().to_string())
                .collect();
            ids.sort();
            ids
        };
        let base = NativeFilter::base("Widget");
        let visible: Vec<Value> = docs.iter().filter(|d| base.matches(d)).cloned().collect();

        let partial = vec![
            QuerySpec::new().filter(field("publicField").ends_with("bc")),
            QuerySpec::new().filter(
                field("publicField")
                    .starts_with("ab")
                    .and(field("publicField").ends_with("c")),
            ),
            QuerySpec::new().filter(field("count").cmp_field(CompareOp::Lt, field("publicField"))),
        ];
        for spec in partial {
            let t = translate(&spec, "Widget", &catalog()).unwrap();
            assert!(!t.is_fully_pushed(), "{spec:?}");
            let native_only: Vec<Value> =
                docs.iter().filter(|d| t.native.matches(d)).cloned().collect();
            let direct = ids(eval::replay(visible.clone(), &spec.ops));
            assert_ne!(ids(native_only.clone()), direct, "{spec:?}");
            assert_eq!(ids(eval::replay(native_only, &t.residual)), direct, "{spec:?}");
        }

        let full = vec![
            QuerySpec::new().filter(field("count").ge(3)),
            QuerySpec::new().filter(field("publicField").starts_with("ab").or(field("count").eq(5))),
            QuerySpec::new().filter(field("publicField").is_null()),
        ];
        for spec in full {
            let t = translate(&spec, "Widget", &catalog()).unwrap();
            assert!(t.is_fully_pushed(), "{spec:?}");
            let native_only: Vec<Value> =
                docs.iter().filter(|d| t.native.matches(d)).cloned().collect();
            assert_eq!(
                ids(native_only),
                ids(eval::replay(visible.clone(), &spec.ops)),
                "{spec:?}"
            );
        }
    }
}
