// Schema compilation
//
// A JSON-Schema subset is parsed once into a flat arena of nodes. Child
// schemas are referenced by index, so validation recurses over node ids
// and never re-reads keywords from the schema's `serde_json::Value`.

use serde_json::{Map, Value};
use std::fmt;

use super::SchemaError;

pub(crate) type NodeId = usize;

/// JSON types a node can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            "string" => JsonType::String,
            "number" => JsonType::Number,
            "integer" => JsonType::Integer,
            "boolean" => JsonType::Boolean,
            "null" => JsonType::Null,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Null => "null",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaNode {
    /// Accepted types; empty accepts any
    pub types: Vec<JsonType>,
    pub nullable: bool,
    pub properties: Vec<(String, NodeId)>,
    pub required: Vec<String>,
    pub additional_properties: bool,
    pub items: Option<NodeId>,
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl SchemaNode {
    fn any() -> Self {
        Self {
            additional_properties: true,
            ..Default::default()
        }
    }

    pub fn property(&self, name: &str) -> Option<NodeId> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, id)| *id)
    }
}

/// A compiled schema.
#[derive(Debug, Clone)]
pub struct SchemaTree {
    pub(crate) nodes: Vec<SchemaNode>,
}

impl SchemaTree {
    pub(crate) const ROOT: NodeId = 0;

    /// A schema that accepts every value.
    pub fn permissive() -> Self {
        Self {
            nodes: vec![SchemaNode::any()],
        }
    }

    /// Compile a schema document.
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let mut tree = Self { nodes: Vec::new() };
        tree.compile_node(schema, "$")?;
        Ok(tree)
    }

    /// Whether the root accepts any value without checks.
    pub fn is_permissive(&self) -> bool {
        let root = &self.nodes[Self::ROOT];
        root.types.is_empty()
            && root.properties.is_empty()
            && root.required.is_empty()
            && root.additional_properties
            && root.items.is_none()
            && root.enum_values.is_none()
            && root.minimum.is_none()
            && root.maximum.is_none()
            && root.min_length.is_none()
            && root.max_length.is_none()
            && root.min_items.is_none()
            && root.max_items.is_none()
    }

    pub(crate) fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id]
    }

    fn compile_node(&mut self, schema: &Value, at: &str) -> Result<NodeId, SchemaError> {
        let id = self.nodes.len();
        self.nodes.push(SchemaNode::any());

        let obj = match schema {
            Value::Bool(true) => return Ok(id),
            Value::Object(obj) => obj,
            _ => return Err(SchemaError::NotAnObject(at.to_string())),
        };

        let mut node = SchemaNode::any();

        if let Some(ty) = obj.get("type") {
            node.types = parse_types(ty, at)?;
        }
        node.nullable = optional_bool(obj, "nullable", at)?.unwrap_or(false);

        if let Some(props) = obj.get("properties") {
            let props = props
                .as_object()
                .ok_or_else(|| invalid(at, "properties", "must be an object"))?;
            for (name, child) in props {
                let child_id = self.compile_node(child, &format!("{}.properties.{}", at, name))?;
                node.properties.push((name.clone(), child_id));
            }
        }

        if let Some(required) = obj.get("required") {
            let list = required
                .as_array()
                .ok_or_else(|| invalid(at, "required", "must be an array of strings"))?;
            for item in list {
                let name = item
                    .as_str()
                    .ok_or_else(|| invalid(at, "required", "must be an array of strings"))?;
                node.required.push(name.to_string());
            }
        }

        match obj.get("additionalProperties") {
            None | Some(Value::Bool(true)) => {}
            Some(Value::Bool(false)) => node.additional_properties = false,
            // Schema-valued additionalProperties is accepted but not enforced
            Some(Value::Object(_)) => {}
            Some(_) => return Err(invalid(at, "additionalProperties", "must be a boolean")),
        }

        if let Some(items) = obj.get("items") {
            node.items = Some(self.compile_node(items, &format!("{}.items", at))?);
        }

        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| invalid(at, "enum", "must be an array"))?;
            node.enum_values = Some(values.clone());
        }

        node.minimum = optional_f64(obj, "minimum", at)?;
        node.maximum = optional_f64(obj, "maximum", at)?;
        node.min_length = optional_usize(obj, "minLength", at)?;
        node.max_length = optional_usize(obj, "maxLength", at)?;
        node.min_items = optional_usize(obj, "minItems", at)?;
        node.max_items = optional_usize(obj, "maxItems", at)?;

        self.nodes[id] = node;
        Ok(id)
    }
}

fn invalid(at: &str, keyword: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidKeyword {
        path: at.to_string(),
        keyword: keyword.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_types(ty: &Value, at: &str) -> Result<Vec<JsonType>, SchemaError> {
    let names: Vec<&str> = match ty {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .ok_or_else(|| invalid(at, "type", "must be a string or array of strings"))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(invalid(at, "type", "must be a string or array of strings")),
    };

    names
        .into_iter()
        .map(|name| {
            JsonType::parse(name).ok_or_else(|| SchemaError::UnknownType {
                path: at.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

fn optional_bool(obj: &Map<String, Value>, key: &str, at: &str) -> Result<Option<bool>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(invalid(at, key, "must be a boolean")),
    }
}

fn optional_f64(obj: &Map<String, Value>, key: &str, at: &str) -> Result<Option<f64>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(at, key, "must be a number")),
    }
}

fn optional_usize(
    obj: &Map<String, Value>,
    key: &str,
    at: &str,
) -> Result<Option<usize>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| invalid(at, key, "must be a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_builds_arena() {
        let tree = SchemaTree::compile(&json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string" } },
                "score": { "type": ["number", "null"], "minimum": 0 }
            },
            "required": ["tags"]
        }))
        .unwrap();

        // root, tags, tags.items, score
        assert_eq!(tree.nodes.len(), 4);
        let root = tree.node(SchemaTree::ROOT);
        assert_eq!(root.types, vec![JsonType::Object]);
        let tags = tree.node(root.property("tags").unwrap());
        assert!(tags.items.is_some());
        let score = tree.node(root.property("score").unwrap());
        assert_eq!(score.types, vec![JsonType::Number, JsonType::Null]);
        assert_eq!(score.minimum, Some(0.0));
    }

    #[test]
    fn test_empty_schema_is_permissive() {
        assert!(SchemaTree::compile(&json!({})).unwrap().is_permissive());
        assert!(SchemaTree::compile(&json!({"description": "x"})).unwrap().is_permissive());
        assert!(!SchemaTree::compile(&json!({"type": "object"})).unwrap().is_permissive());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = SchemaTree::compile(&json!({"properties": {"a": {"type": "date"}}})).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { ref name, .. } if name == "date"));
        assert!(err.to_string().contains("$.properties.a"));
    }

    #[test]
    fn test_rejects_malformed_keyword() {
        assert!(SchemaTree::compile(&json!({"required": "a"})).is_err());
        assert!(SchemaTree::compile(&json!({"minLength": -1})).is_err());
        assert!(SchemaTree::compile(&json!("string")).is_err());
    }
}
