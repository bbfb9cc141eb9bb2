//! Typed filter expressions.
//!
//! Built by the read paths and the lifecycle workers, rendered to the host
//! index's `field = 'value' AND (...)` syntax for the HTTP backend, and
//! evaluated structurally by the memory backend. Equality against an
//! array-valued field means "array contains value".

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Scalar),
    /// `date_timestamp < n` style range bounds; only meaningful on numeric fields.
    Lt(String, i64),
    Ge(String, i64),
    In(String, Vec<String>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: i64) -> Self {
        Filter::Lt(field.into(), value)
    }

    pub fn ge(field: impl Into<String>, value: i64) -> Self {
        Filter::Ge(field.into(), value)
    }

    pub fn id_in<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self {
        Filter::In("id".into(), ids.into_iter().map(Into::into).collect())
    }

    pub fn and(clauses: Vec<Filter>) -> Self {
        Filter::And(clauses)
    }

    pub fn or(clauses: Vec<Filter>) -> Self {
        Filter::Or(clauses)
    }

    /// Render to the host index filter syntax.
    pub fn to_expr(&self) -> String {
        match self {
            Filter::Eq(field, Scalar::Str(v)) => format!("{field} = '{}'", escape_single(v)),
            Filter::Eq(field, Scalar::Int(v)) => format!("{field} = {v}"),
            Filter::Eq(field, Scalar::Bool(v)) => format!("{field} = {v}"),
            Filter::Lt(field, v) => format!("{field} < {v}"),
            Filter::Ge(field, v) => format!("{field} >= {v}"),
            Filter::In(field, values) => {
                let quoted: Vec<String> =
                    values.iter().map(|v| format!("\"{}\"", escape_double(v))).collect();
                format!("{field} IN [{}]", quoted.join(", "))
            }
            Filter::And(clauses) => join_clauses(clauses, " AND "),
            Filter::Or(clauses) => join_clauses(clauses, " OR "),
        }
    }

    /// Structural evaluation against a JSON document. Array fields match when
    /// any element equals the scalar.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(field, scalar) => field_matches(doc, field, scalar),
            Filter::Lt(field, bound) => {
                field_int(doc, field).map(|v| v < *bound).unwrap_or(false)
            }
            Filter::Ge(field, bound) => {
                field_int(doc, field).map(|v| v >= *bound).unwrap_or(false)
            }
            Filter::In(field, values) => values
                .iter()
                .any(|v| field_matches(doc, field, &Scalar::Str(v.clone()))),
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
        }
    }
}

fn join_clauses(clauses: &[Filter], sep: &str) -> String {
    let rendered: Vec<String> = clauses
        .iter()
        .map(|c| match c {
            Filter::And(_) | Filter::Or(_) => format!("({})", c.to_expr()),
            _ => c.to_expr(),
        })
        .collect();
    rendered.join(sep)
}

fn escape_single(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\'', "\\'")
}

fn escape_double(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"")
}

fn field_int(doc: &Value, field: &str) -> Option<i64> {
    doc.get(field).and_then(Value::as_i64)
}

fn field_matches(doc: &Value, field: &str, scalar: &Scalar) -> bool {
    let Some(value) = doc.get(field) else {
        return false;
    };
    match value {
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, scalar)),
        other => scalar_eq(other, scalar),
    }
}

fn scalar_eq(value: &Value, scalar: &Scalar) -> bool {
    match (value, scalar) {
        (Value::String(s), Scalar::Str(q)) => s == q,
        (Value::Number(n), Scalar::Int(q)) => n.as_i64() == Some(*q),
        (Value::Bool(b), Scalar::Bool(q)) => b == q,
        _ => false,
    }
}
