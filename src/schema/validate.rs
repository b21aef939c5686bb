// Schema interpreter
//
// Walks a compiled `SchemaTree` against a value, coercing minor type
// mismatches in place and collecting every violation.

use serde_json::{Number, Value};

use super::tree::{JsonType, NodeId, SchemaTree};
use super::Violation;

impl SchemaTree {
    /// Validate `value`, returning the coerced value or every violation found.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<Violation>> {
        let mut coerced = value.clone();
        let mut violations = Vec::new();
        self.check(SchemaTree::ROOT, &mut coerced, "$", &mut violations);
        if violations.is_empty() {
            Ok(coerced)
        } else {
            Err(violations)
        }
    }

    fn check(&self, id: NodeId, value: &mut Value, path: &str, out: &mut Vec<Violation>) {
        let node = self.node(id);

        if value.is_null() && node.nullable {
            return;
        }

        if !node.types.is_empty() && !node.types.iter().any(|t| matches_type(*t, value)) {
            match node.types.iter().find_map(|t| coerce(*t, value)) {
                Some(coerced) => *value = coerced,
                None => {
                    out.push(Violation::new(
                        path,
                        format!("expected {}, got {}", describe(&node.types), kind_of(value)),
                    ));
                    return;
                }
            }
        }

        if let Some(allowed) = &node.enum_values {
            if !allowed.contains(value) {
                out.push(Violation::new(
                    path,
                    format!("must be one of {}", Value::Array(allowed.clone())),
                ));
            }
        }

        match value {
            Value::String(s) => {
                let len = s.chars().count();
                if let Some(min) = node.min_length {
                    if len < min {
                        out.push(Violation::new(path, format!("must be at least {} characters", min)));
                    }
                }
                if let Some(max) = node.max_length {
                    if len > max {
                        out.push(Violation::new(path, format!("must be at most {} characters", max)));
                    }
                }
            }
            Value::Number(n) => {
                let n = n.as_f64().unwrap_or(f64::NAN);
                if let Some(min) = node.minimum {
                    if n < min {
                        out.push(Violation::new(path, format!("must be >= {}", min)));
                    }
                }
                if let Some(max) = node.maximum {
                    if n > max {
                        out.push(Violation::new(path, format!("must be <= {}", max)));
                    }
                }
            }
            Value::Array(items) => {
                if let Some(min) = node.min_items {
                    if items.len() < min {
                        out.push(Violation::new(path, format!("must have at least {} items", min)));
                    }
                }
                if let Some(max) = node.max_items {
                    if items.len() > max {
                        out.push(Violation::new(path, format!("must have at most {} items", max)));
                    }
                }
                if let Some(item_id) = node.items {
                    for (idx, item) in items.iter_mut().enumerate() {
                        self.check(item_id, item, &format!("{}[{}]", path, idx), out);
                    }
                }
            }
            Value::Object(map) => {
                for name in &node.required {
                    if !map.contains_key(name) {
                        out.push(Violation::new(child_path(path, name), "is required"));
                    }
                }
                if !node.additional_properties {
                    for key in map.keys() {
                        if node.property(key).is_none() {
                            out.push(Violation::new(
                                child_path(path, key),
                                "is not an allowed property",
                            ));
                        }
                    }
                }
                for (name, child) in &node.properties {
                    if let Some(field) = map.get_mut(name) {
                        self.check(*child, field, &child_path(path, name), out);
                    }
                }
            }
            Value::Bool(_) | Value::Null => {}
        }
    }
}

fn matches_type(ty: JsonType, value: &Value) -> bool {
    match ty {
        JsonType::Object => value.is_object(),
        JsonType::Array => value.is_array(),
        JsonType::String => value.is_string(),
        JsonType::Number => value.is_number(),
        JsonType::Integer => value.is_i64() || value.is_u64(),
        JsonType::Boolean => value.is_boolean(),
        JsonType::Null => value.is_null(),
    }
}

/// Lossless conversions tolerated for model and caller output.
fn coerce(ty: JsonType, value: &Value) -> Option<Value> {
    match (ty, value) {
        (JsonType::Integer, Value::Number(n)) => n.as_f64().and_then(integral),
        (JsonType::Integer, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        (JsonType::Number, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().map(Value::from).or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            })
        }
        (JsonType::Boolean, Value::String(s)) => {
            if s.eq_ignore_ascii_case("true") {
                Some(Value::Bool(true))
            } else if s.eq_ignore_ascii_case("false") {
                Some(Value::Bool(false))
            } else {
                None
            }
        }
        (JsonType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (JsonType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn integral(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe(types: &[JsonType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

fn child_path(parent: &str, key: &str) -> String {
    let simple = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if simple {
        format!("{}.{}", parent, key)
    } else {
        format!("{}[{}]", parent, Value::String(key.to_string()))
    }
}
