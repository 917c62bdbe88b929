//! Rendering of push-down filters as SQL over the JSON body
//!
//! Each leaf reads a top-level property with `json_extract(body, ?)`, guards
//! on `json_type` so values of another JSON type never compare, and is
//! wrapped in `IFNULL(.., 0)` so it is never NULL and `NOT` stays two-valued.
//! A missing property and JSON null are the same thing. Leaves that have no
//! exact SQL form are dropped from conjunctions, which only widens the
//! result; callers re-check rows with [`NativeFilter::matches`].

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use vellum_core::{CompareOp, NativeFilter};

/// SQL condition plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

fn json_path(name: &str) -> Option<SqlValue> {
    if name.contains('"') {
        return None;
    }
    Some(SqlValue::Text(format!("$.\"{name}\"")))
}

fn scalar(value: &Value) -> Option<(SqlValue, &'static str)> {
    match value {
        Value::Bool(b) => Some((SqlValue::Integer(i64::from(*b)), "('true','false')")),
        Value::Number(n) => {
            let bound = match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64()?),
            };
            Some((bound, "('integer','real')"))
        }
        Value::String(s) => Some((SqlValue::Text(s.clone()), "('text')")),
        _ => None,
    }
}

fn exists(path: SqlValue, params: &mut Vec<SqlValue>) -> String {
    params.push(path);
    "IFNULL(json_type(body, ?) <> 'null', 0)".to_string()
}

fn not_exists(path: SqlValue, params: &mut Vec<SqlValue>) -> String {
    params.push(path);
    "IFNULL(json_type(body, ?) = 'null', 1)".to_string()
}

fn compare(path: SqlValue, op: CompareOp, value: &Value, params: &mut Vec<SqlValue>) -> Option<String> {
    if value.is_null() {
        return Some(match op {
            CompareOp::Eq => not_exists(path, params),
            CompareOp::Ne => exists(path, params),
            _ => "0".to_string(),
        });
    }
    let (bound, types) = scalar(value)?;
    let sql_op = match op {
        // Ne is the negation of Eq, so missing values satisfy it
        CompareOp::Ne => {
            params.extend([path.clone(), path, bound]);
            return Some(format!(
                "NOT IFNULL(json_type(body, ?) IN {types} AND json_extract(body, ?) = ?, 0)"
            ));
        }
        CompareOp::Eq => "=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    };
    params.extend([path.clone(), path, bound]);
    Some(format!(
        "IFNULL(json_type(body, ?) IN {types} AND json_extract(body, ?) {sql_op} ?, 0)"
    ))
}

fn contains(path: SqlValue, value: &Value, params: &mut Vec<SqlValue>) -> Option<String> {
    let (bound, types) = scalar(value)?;
    let mut sql = String::from("IFNULL(CASE json_type(body, ?) ");
    params.push(path.clone());
    sql.push_str(&format!(
        "WHEN 'array' THEN EXISTS (SELECT 1 FROM json_each(body, ?) AS item \
         WHERE item.type IN {types} AND item.value = ?) "
    ));
    params.extend([path.clone(), bound.clone()]);
    if matches!(value, Value::String(_)) {
        sql.push_str("WHEN 'text' THEN instr(json_extract(body, ?), ?) > 0 ");
        params.extend([path, bound]);
    }
    sql.push_str("ELSE 0 END, 0)");
    Some(sql)
}

fn begins_with(path: SqlValue, prefix: &str, params: &mut Vec<SqlValue>) -> String {
    let prefix = SqlValue::Text(prefix.to_string());
    params.extend([path.clone(), path, prefix.clone(), prefix]);
    "IFNULL(json_type(body, ?) = 'text' AND substr(json_extract(body, ?), 1, length(?)) = ?, 0)"
        .to_string()
}

/// Render one node; `widen` allows dropping unrenderable conjuncts
///
/// Beneath `Not` every node must be exact: a dropped conjunct there would
/// narrow the result and the in-process re-check cannot restore rows.
fn render_into(filter: &NativeFilter, widen: bool, params: &mut Vec<SqlValue>) -> Option<String> {
    match filter {
        NativeFilter::AttributeExists(path) => Some(exists(json_path(path)?, params)),
        NativeFilter::AttributeNotExists(path) => Some(not_exists(json_path(path)?, params)),
        NativeFilter::Compare { path, op, value } => compare(json_path(path)?, *op, value, params),
        NativeFilter::Contains { path, value } => contains(json_path(path)?, value, params),
        NativeFilter::BeginsWith { path, prefix } => {
            Some(begins_with(json_path(path)?, prefix, params))
        }
        NativeFilter::And(parts) => {
            let mut local = Vec::new();
            let mut rendered = Vec::with_capacity(parts.len());
            for part in parts {
                let mut part_params = Vec::new();
                match render_into(part, widen, &mut part_params) {
                    Some(sql) => {
                        local.extend(part_params);
                        rendered.push(sql);
                    }
                    None if widen => {}
                    None => return None,
                }
            }
            params.extend(local);
            Some(if rendered.is_empty() {
                "1".to_string()
            } else {
                format!("({})", rendered.join(" AND "))
            })
        }
        NativeFilter::Or(parts) => {
            let mut local = Vec::new();
            let rendered = parts
                .iter()
                .map(|part| render_into(part, widen, &mut local))
                .collect::<Option<Vec<_>>>()?;
            params.extend(local);
            Some(if rendered.is_empty() {
                "0".to_string()
            } else {
                format!("({})", rendered.join(" OR "))
            })
        }
        NativeFilter::Not(inner) => {
            let mut local = Vec::new();
            let sql = render_into(inner, false, &mut local)?;
            params.extend(local);
            Some(format!("(NOT {sql})"))
        }
    }
}

/// Render `filter`; `1` when nothing could be rendered
pub fn render(filter: &NativeFilter) -> SqlFilter {
    let mut params = Vec::new();
    let sql = render_into(filter, true, &mut params).unwrap_or_else(|| {
        params.clear();
        "1".to_string()
    });
    SqlFilter { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, params_from_iter, Connection};
    use serde_json::json;

    fn matching_ids(filter: &NativeFilter, docs: &[Value]) -> Vec<String> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id TEXT, body TEXT)", []).unwrap();
        for doc in docs {
            conn.execute(
                "INSERT INTO t VALUES (?1, ?2)",
                params![doc["id"].as_str().unwrap(), doc.to_string()],
            )
            .unwrap();
        }
        let rendered = render(filter);
        let mut stmt = conn
            .prepare(&format!("SELECT id FROM t WHERE {} ORDER BY id", rendered.sql))
            .unwrap();
        stmt.query_map(params_from_iter(rendered.params.iter()), |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    fn docs() -> Vec<Value> {
        vec![
            json!({"id": "a", "n": 1, "s": "apple", "tags": ["x", "y"], "flag": true}),
            json!({"id": "b", "n": 2.5, "s": "banana", "tags": ["z"], "flag": false}),
            json!({"id": "c", "n": "3", "s": null}),
            json!({"id": "d"}),
        ]
    }

    fn eval_ids(filter: &NativeFilter, docs: &[Value]) -> Vec<String> {
        docs.iter()
            .filter(|d| filter.matches(d))
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_sql_agrees_with_in_process_evaluation() {
        let cmp = |path: &str, op, value: Value| NativeFilter::Compare {
            path: path.into(),
            op,
            value,
        };
        let filters = vec![
            cmp("n", CompareOp::Gt, json!(1)),
            cmp("n", CompareOp::Le, json!(2.5)),
            cmp("n", CompareOp::Ne, json!(1)),
            cmp("s", CompareOp::Eq, Value::Null),
            cmp("s", CompareOp::Ne, Value::Null),
            cmp("s", CompareOp::Lt, json!("b")),
            cmp("flag", CompareOp::Eq, json!(false)),
            cmp("flag", CompareOp::Eq, json!(0)),
            NativeFilter::AttributeExists("tags".into()),
            NativeFilter::AttributeNotExists("s".into()),
            NativeFilter::Contains {
                path: "tags".into(),
                value: json!("y"),
            },
            NativeFilter::Contains {
                path: "s".into(),
                value: json!("nan"),
            },
            NativeFilter::BeginsWith {
                path: "s".into(),
                prefix: "ap".into(),
            },
            NativeFilter::Not(Box::new(NativeFilter::Or(vec![
                cmp("n", CompareOp::Eq, json!(1)),
                NativeFilter::AttributeNotExists("n".into()),
            ]))),
            NativeFilter::Not(Box::new(NativeFilter::And(vec![
                cmp("n", CompareOp::Eq, json!(1)),
                NativeFilter::Contains {
                    path: "tags".into(),
                    value: json!({"k": 1}),
                },
            ]))),
            NativeFilter::Not(Box::new(NativeFilter::And(vec![
                cmp("n", CompareOp::Eq, json!(1)),
                cmp("tags", CompareOp::Eq, json!(["vip"])),
            ]))),
        ];
        let docs = docs();
        for filter in &filters {
            assert_eq!(matching_ids(filter, &docs), eval_ids(filter, &docs), "{filter:?}");
        }
    }

    #[test]
    fn test_unrenderable_leaf_widens_conjunction() {
        let filter = NativeFilter::And(vec![
            NativeFilter::Compare {
                path: "n".into(),
                op: CompareOp::Eq,
                value: json!(1),
            },
            NativeFilter::Contains {
                path: "tags".into(),
                value: json!({"nested": true}),
            },
        ]);
        let rendered = render(&filter);
        assert_eq!(rendered.params.len(), 3);
        assert_eq!(matching_ids(&filter, &docs()), vec!["a"]);
    }

    #[test]
    fn test_negated_conjunction_is_never_narrowed() {
        let filter = NativeFilter::And(vec![
            NativeFilter::AttributeExists("n".into()),
            NativeFilter::Not(Box::new(NativeFilter::And(vec![
                NativeFilter::Compare {
                    path: "n".into(),
                    op: CompareOp::Eq,
                    value: json!(1),
                },
                NativeFilter::Contains {
                    path: "tags".into(),
                    value: json!({"k": 1}),
                },
            ]))),
        ]);
        let rendered = render(&filter);
        assert!(!rendered.sql.contains("NOT"), "{}", rendered.sql);

        let docs = docs();
        let widened = matching_ids(&filter, &docs);
        for id in eval_ids(&filter, &docs) {
            assert!(widened.contains(&id), "{id} dropped by {}", rendered.sql);
        }
    }
}
