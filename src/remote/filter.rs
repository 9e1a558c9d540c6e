// src/remote/filter.rs

use serde_json::{Map, Value};
use std::fmt;

/// Фильтр выборки записей.
///
/// Рендерится в синтаксис сервиса (`organisation = "abc" && status = "active"`)
/// и умеет сам проверять запись (для in-memory реализации).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// `field = v1 || field = v2 || ...`
    pub fn any_of<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::Or(values.into_iter().map(|v| Filter::eq(field, v)).collect())
    }

    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        match self {
            Filter::Eq(field, expected) => match record.get(field) {
                Some(actual) => values_equal(actual, expected),
                None => expected.as_str() == Some("") || expected.is_null(),
            },
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
        }
    }

    fn write_expr(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match self {
            Filter::Eq(field, value) => write!(f, "{} = {}", field, render_value(value)),
            Filter::And(parts) => write_joined(f, parts, " && ", nested),
            Filter::Or(parts) => write_joined(f, parts, " || ", nested),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_expr(f, false)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Filter], sep: &str, nested: bool) -> fmt::Result {
    // Пустое Or не совпадает ни с чем, пустое And совпадает со всем
    if parts.is_empty() {
        return f.write_str(if sep.contains("||") { "id = \"\"" } else { "id != \"\"" });
    }
    let wrap = nested && parts.len() > 1;
    if wrap {
        f.write_str("(")?;
    }
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        part.write_expr(f, true)?;
    }
    if wrap {
        f.write_str(")")?;
    }
    Ok(())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::String(a), other) | (other, Value::String(a)) => *a == other.to_string(),
        (a, b) => a == b,
    }
}
