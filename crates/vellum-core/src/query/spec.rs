//! Serializable query description
//!
//! A [`QuerySpec`] is an ordered chain of [`QueryOp`]s over [`Predicate`]
//! values. Predicates reference record properties by wire name; any value the
//! caller computes is captured as a literal when the predicate is built.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Field(String),
    Literal(Value),
}

impl Operand {
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Operand::Field(name) => Some(name),
            Operand::Literal(_) => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Operator to use when the operands trade places
    pub fn swapped(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
        }
    }

    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// Collection membership or substring test on `target`
    Contains { target: Operand, item: Operand },
    StartsWith { target: Operand, prefix: Operand },
    EndsWith { target: Operand, suffix: Operand },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Const(bool),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Every property name referenced by this predicate
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare {
                left: a, right: b, ..
            }
            | Predicate::Contains { target: a, item: b }
            | Predicate::StartsWith {
                target: a,
                prefix: b,
            }
            | Predicate::EndsWith {
                target: a,
                suffix: b,
            } => {
                out.extend(a.field_name());
                out.extend(b.field_name());
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_fields(out);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::Const(_) => {}
        }
    }
}

/// Reference to a record property, the entry point for building predicates
///
/// ```ignore
/// field("publicField").eq("x").and(field("count").gt(3))
/// ```
pub fn field(name: impl Into<String>) -> FieldRef {
    FieldRef(name.into())
}

/// A literal operand, for the rare predicate that starts from a value
pub fn literal(value: impl Into<Value>) -> Operand {
    Operand::Literal(value.into())
}

#[derive(Debug, Clone)]
pub struct FieldRef(String);

impl FieldRef {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            left: Operand::Field(self.0),
            op,
            right: Operand::Literal(value.into()),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_null(self) -> Predicate {
        self.compare(CompareOp::Eq, Value::Null)
    }

    pub fn is_not_null(self) -> Predicate {
        self.compare(CompareOp::Ne, Value::Null)
    }

    /// Compare against another property of the same record
    pub fn cmp_field(self, op: CompareOp, other: FieldRef) -> Predicate {
        Predicate::Compare {
            left: Operand::Field(self.0),
            op,
            right: Operand::Field(other.0),
        }
    }

    pub fn contains(self, item: impl Into<Value>) -> Predicate {
        Predicate::Contains {
            target: Operand::Field(self.0),
            item: Operand::Literal(item.into()),
        }
    }

    pub fn starts_with(self, prefix: impl Into<String>) -> Predicate {
        Predicate::StartsWith {
            target: Operand::Field(self.0),
            prefix: Operand::Literal(Value::String(prefix.into())),
        }
    }

    pub fn ends_with(self, suffix: impl Into<String>) -> Predicate {
        Predicate::EndsWith {
            target: Operand::Field(self.0),
            suffix: Operand::Literal(Value::String(suffix.into())),
        }
    }

    /// Property value is one of `values`
    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::Contains {
            target: Operand::Literal(Value::Array(values.into_iter().map(Into::into).collect())),
            item: Operand::Field(self.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    Where(Predicate),
    OrderBy { field: String, descending: bool },
    Skip(usize),
    Take(usize),
}

impl QueryOp {
    pub fn is_paging(&self) -> bool {
        matches!(self, QueryOp::Skip(_) | QueryOp::Take(_))
    }
}

/// Ordered chain of query operators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub ops: Vec<QueryOp>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.ops.push(QueryOp::Where(predicate));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.ops.push(QueryOp::OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_descending(mut self, field: impl Into<String>) -> Self {
        self.ops.push(QueryOp::OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        self.ops.push(QueryOp::Skip(count));
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.ops.push(QueryOp::Take(count));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_flattens_conjunctions() {
        let p = field("a").eq(1).and(field("b").eq(2)).and(field("c").eq(3));
        match p {
            Predicate::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_fields_lists_references() {
        let p = field("a")
            .cmp_field(CompareOp::Lt, field("b"))
            .or(field("c").is_in([1, 2]).not());
        assert_eq!(p.fields(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_spec_serializes() {
        let spec = QuerySpec::new()
            .filter(field("x").starts_with("ab"))
            .order_by_descending("y")
            .take(5);
        let text = serde_json::to_string(&spec).unwrap();
        let back: QuerySpec = serde_json::from_str(&text).unwrap();
        assert_eq!(back, spec);
        assert_eq!(
            serde_json::to_value(&spec.ops[2]).unwrap(),
            json!({"Take": 5})
        );
    }
}
