//! Runtime-discovered tool surface.
//!
//! The remote endpoint describes each tool with a JSON schema. Nothing here is
//! compiled per tool: the orchestrator builds canonical arguments (`key`,
//! `value`, `query`, ...) and [`ToolDescriptor::shape_arguments`] maps them onto
//! whatever property names the schema declares, then validates the result
//! generically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EnsueError, Result};

/// Canonical argument names used by the orchestrator.
pub mod arg {
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const DESCRIPTION: &str = "description";
    pub const QUERY: &str = "query";
    pub const LIMIT: &str = "limit";
    pub const OFFSET: &str = "offset";
    pub const PREFIX: &str = "prefix";
    pub const USER: &str = "user";
    pub const PERMISSION: &str = "permission";
}

/// Schema property names accepted for each canonical argument, in preference order.
const ALIASES: &[(&str, &[&str])] = &[
    (arg::KEY, &["key", "key_name", "key_names", "keys", "memory_key", "path"]),
    (arg::VALUE, &["value", "content", "text", "data"]),
    (arg::DESCRIPTION, &["description", "summary"]),
    (arg::QUERY, &["query", "q", "search", "text"]),
    (arg::LIMIT, &["limit", "page_size", "max_results", "top_k"]),
    (arg::OFFSET, &["offset", "skip"]),
    (arg::PREFIX, &["prefix", "namespace", "key_prefix"]),
    (arg::USER, &["user", "user_id", "username", "email", "grantee", "target_user"]),
    (arg::PERMISSION, &["permission", "permissions", "access", "role", "mode"]),
];

/// One callable operation as reported by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(|d| d.into_owned()),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}

impl ToolDescriptor {
    fn properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .filter(|p| !p.is_empty())
    }

    /// Map canonical arguments onto this tool's schema and validate them.
    ///
    /// Schemas without declared properties receive the canonical arguments
    /// unchanged. Canonical arguments the schema has no slot for are dropped.
    pub fn shape_arguments(&self, canonical: &Map<String, Value>) -> Result<Value> {
        let Some(props) = self.properties() else {
            return Ok(Value::Object(canonical.clone()));
        };

        let mut out = Map::new();

        // Batch-style schemas: `items: [{key_name, value, ...}]`
        if let Some(item_schema) = items_object_schema(props) {
            if !canonical.contains_key("items") && canonical.contains_key(arg::KEY) {
                let items = build_items(&self.name, canonical, item_schema)?;
                out.insert("items".into(), Value::Array(items));
            }
        }

        for (name, value) in canonical {
            if out.contains_key("items") && is_item_field(name) {
                continue;
            }
            match resolve_property(name, props) {
                Some(prop) if !out.contains_key(prop) => {
                    let coerced = coerce(&self.name, value, &props[prop])?;
                    out.insert(prop.to_string(), coerced);
                }
                Some(_) => {}
                None => {
                    tracing::debug!(tool = %self.name, argument = %name, "schema has no slot for argument");
                }
            }
        }

        let shaped = Value::Object(out);
        validate(&self.name, &shaped, &self.input_schema)?;
        Ok(shaped)
    }

    /// [`shape_arguments`](Self::shape_arguments) for calls that must not return
    /// an unbounded result set: the canonical `limit` has to survive shaping as a
    /// non-negative integer, otherwise the call is refused.
    pub fn shape_bounded(&self, canonical: &Map<String, Value>) -> Result<Value> {
        let shaped = self.shape_arguments(canonical)?;
        let fields = shaped.as_object();
        match fields.and_then(|f| lookup(f, arg::LIMIT)).and_then(Value::as_u64) {
            Some(limit) => {
                tracing::debug!(tool = %self.name, limit, "bounded call");
                Ok(shaped)
            }
            None => Err(EnsueError::InvalidArguments {
                tool: self.name.clone(),
                reason: "schema has no result limit; refusing an unbounded listing".into(),
            }),
        }
    }
}

/// Value of a canonical argument in `fields`, under its own name or any alias.
pub fn lookup<'a>(fields: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    resolve_property(canonical, fields).and_then(|name| fields.get(name))
}

fn is_item_field(name: &str) -> bool {
    matches!(name, arg::KEY | arg::VALUE | arg::DESCRIPTION)
}

fn items_object_schema(props: &Map<String, Value>) -> Option<&Value> {
    let items = props.get("items")?;
    if schema_type(items) != Some("array") {
        return None;
    }
    let inner = items.get("items")?;
    (schema_type(inner) == Some("object")).then_some(inner)
}

fn build_items(tool: &str, canonical: &Map<String, Value>, item_schema: &Value) -> Result<Vec<Value>> {
    let keys: Vec<Value> = match canonical.get(arg::KEY) {
        Some(Value::Array(keys)) => keys.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };

    let item_props = item_schema.get("properties").and_then(Value::as_object);

    keys.into_iter()
        .map(|key| {
            let mut fields = Map::new();
            fields.insert(arg::KEY.into(), key);
            for name in [arg::VALUE, arg::DESCRIPTION] {
                if let Some(v) = canonical.get(name) {
                    fields.insert(name.into(), v.clone());
                }
            }
            let Some(item_props) = item_props else {
                return Ok(Value::Object(fields));
            };
            let mut item = Map::new();
            for (name, value) in &fields {
                if let Some(prop) = resolve_property(name, item_props) {
                    item.insert(prop.to_string(), coerce(tool, value, &item_props[prop])?);
                }
            }
            Ok(Value::Object(item))
        })
        .collect()
}

fn resolve_property<'a>(canonical: &str, props: &'a Map<String, Value>) -> Option<&'a str> {
    let aliases = ALIASES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);

    std::iter::once(canonical)
        .chain(aliases.iter().copied())
        .find_map(|alias| props.keys().find(|k| *k == alias).map(String::as_str))
}

fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        // ["string", "null"] style: take the first non-null entry
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn coerce(tool: &str, value: &Value, schema: &Value) -> Result<Value> {
    match (schema_type(schema), value) {
        (Some("array"), Value::Array(_)) => Ok(value.clone()),
        (Some("array"), scalar) => Ok(Value::Array(vec![scalar.clone()])),
        (Some("string" | "integer" | "number" | "boolean"), Value::Array(values)) => match values.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(EnsueError::InvalidArguments {
                tool: tool.into(),
                reason: format!("takes a single value but {} were given", values.len()),
            }),
        },
        _ => Ok(value.clone()),
    }
}

/// Generic validation: required properties, primitive types, enums, and one
/// level of array items.
pub fn validate(tool: &str, value: &Value, schema: &Value) -> Result<()> {
    validate_at(tool, value, schema, "arguments")
}

fn validate_at(tool: &str, value: &Value, schema: &Value, path: &str) -> Result<()> {
    let invalid = |reason: String| EnsueError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    if let Some(expected) = schema_type(schema) {
        let nullable = matches!(schema.get("type"), Some(Value::Array(t)) if t.iter().any(|t| t == "null"));
        if !(nullable && value.is_null()) && !type_matches(expected, value) {
            return Err(invalid(format!("{path} should be {expected}")));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(invalid(format!("{path} must be one of {}", Value::Array(allowed.clone()))));
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    return Err(invalid(format!("missing required property `{name}`")));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, field) in fields {
                if let Some(field_schema) = props.get(name) {
                    validate_at(tool, field, field_schema, &format!("{path}.{name}"))?;
                }
            }
        }
    }

    if let (Value::Array(elements), Some(item_schema)) = (value, schema.get("items")) {
        for (i, element) in elements.iter().enumerate() {
            validate_at(tool, element, item_schema, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// The tool set discovered for one session, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolDescriptor>,
    order: Vec<String>,
}

impl ToolCatalog {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let mut catalog = Self::default();
        for tool in descriptors {
            if !catalog.tools.contains_key(&tool.name) {
                catalog.order.push(tool.name.clone());
            }
            catalog.tools.insert(tool.name.clone(), tool);
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| EnsueError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// First tool from `candidates` the endpoint offers.
    pub fn first_available(&self, candidates: &[&str]) -> Option<&ToolDescriptor> {
        candidates.iter().find_map(|name| self.tools.get(*name))
    }

    /// Descriptors in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
