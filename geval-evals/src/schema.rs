// Copyright 2025 GEval Contributors (https://github.com/geval-rs/geval)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Schema descriptors for structured generation
//!
//! A descriptor is sent to the provider (as strict JSON Schema) to constrain
//! generation, and used locally to check the shape of what came back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Boolean,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
        }
    }
}

/// Response did not match the requested schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SchemaViolation(pub String);

/// Recursive description of an expected JSON shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, SchemaDescriptor>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaDescriptor>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl SchemaDescriptor {
    fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            properties: None,
            items: None,
            required: None,
        }
    }

    pub fn object() -> Self {
        Self {
            properties: Some(BTreeMap::new()),
            ..Self::of(SchemaType::Object)
        }
    }

    pub fn array(items: SchemaDescriptor) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), schema);
        self
    }

    pub fn with_required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Check `data` against this descriptor
    pub fn validate(&self, data: &Value) -> Result<(), SchemaViolation> {
        self.validate_at(data, "")
    }

    fn validate_at(&self, data: &Value, path: &str) -> Result<(), SchemaViolation> {
        let location = if path.is_empty() { "root" } else { path };

        match self.schema_type {
            SchemaType::Object => {
                let object = data.as_object().ok_or_else(|| {
                    SchemaViolation(format!(
                        "Expected object at {}, got {}",
                        location,
                        type_name(data)
                    ))
                })?;

                for field in self.required.iter().flatten() {
                    if !object.contains_key(field) {
                        return Err(SchemaViolation(format!(
                            "Missing required field: {}",
                            join_path(path, field)
                        )));
                    }
                }

                for (key, schema) in self.properties.iter().flatten() {
                    if let Some(value) = object.get(key) {
                        schema.validate_at(value, &join_path(path, key))?;
                    }
                }
            }
            SchemaType::Array => {
                let items = data.as_array().ok_or_else(|| {
                    SchemaViolation(format!(
                        "Expected array at {}, got {}",
                        location,
                        type_name(data)
                    ))
                })?;

                if let Some(item_schema) = &self.items {
                    for (index, item) in items.iter().enumerate() {
                        item_schema.validate_at(item, &format!("{}[{}]", path, index))?;
                    }
                }
            }
            SchemaType::String if !data.is_string() => {
                return Err(mismatch("string", location, data));
            }
            SchemaType::Number if !data.is_number() => {
                return Err(mismatch("number", location, data));
            }
            SchemaType::Boolean if !data.is_boolean() => {
                return Err(mismatch("boolean", location, data));
            }
            _ => {}
        }

        Ok(())
    }

    /// Strict JSON Schema for provider-side constrained decoding.
    ///
    /// Objects get `additionalProperties: false`, and objects without an
    /// explicit `required` list require every property.
    pub fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!(self.schema_type.as_str()));

        if let Some(properties) = &self.properties {
            let converted: Map<String, Value> = properties
                .iter()
                .map(|(key, prop)| (key.clone(), prop.to_json_schema()))
                .collect();
            schema.insert("properties".to_string(), Value::Object(converted));
            schema.insert("additionalProperties".to_string(), json!(false));
        }

        if let Some(items) = &self.items {
            schema.insert("items".to_string(), items.to_json_schema());
        }

        match (&self.required, &self.properties) {
            (Some(required), _) => {
                schema.insert("required".to_string(), json!(required));
            }
            (None, Some(properties)) if self.schema_type == SchemaType::Object => {
                let all: Vec<&String> = properties.keys().collect();
                schema.insert("required".to_string(), json!(all));
            }
            _ => {}
        }

        Value::Object(schema)
    }
}

/// `{"steps": [string]}`
pub fn evaluation_steps_schema() -> SchemaDescriptor {
    SchemaDescriptor::object()
        .with_property("steps", SchemaDescriptor::array(SchemaDescriptor::string()))
        .with_required(["steps"])
}

/// `{"score": number, "reason": string}`
pub fn evaluation_result_schema() -> SchemaDescriptor {
    SchemaDescriptor::object()
        .with_property("score", SchemaDescriptor::number())
        .with_property("reason", SchemaDescriptor::string())
        .with_required(["score", "reason"])
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn mismatch(expected: &str, location: &str, data: &Value) -> SchemaViolation {
    SchemaViolation(format!(
        "Expected {} at {}, got {}",
        expected,
        location,
        type_name(data)
    ))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_result() {
        let schema = evaluation_result_schema();
        assert!(schema
            .validate(&json!({"score": 9, "reason": "correct"}))
            .is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let err = evaluation_result_schema()
            .validate(&json!({"score": 9}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: reason");
    }

    #[test]
    fn test_type_mismatch_paths() {
        let err = evaluation_result_schema()
            .validate(&json!({"score": "nine", "reason": "x"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Expected number at score, got string");

        let err = evaluation_steps_schema()
            .validate(&json!({"steps": ["ok", 3]}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Expected string at steps[1], got number");

        let err = evaluation_steps_schema().validate(&json!([])).unwrap_err();
        assert_eq!(err.to_string(), "Expected object at root, got array");
    }

    #[test]
    fn test_to_json_schema() {
        let schema = evaluation_steps_schema().to_json_schema();
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "steps": {"type": "array", "items": {"type": "string"}}
                },
                "additionalProperties": false,
                "required": ["steps"]
            })
        );
    }

    #[test]
    fn test_implicit_required() {
        let schema = SchemaDescriptor::object()
            .with_property("a", SchemaDescriptor::boolean())
            .with_property("b", SchemaDescriptor::number())
            .to_json_schema();
        assert_eq!(schema["required"], json!(["a", "b"]));
    }

    #[test]
    fn test_descriptor_serde() {
        let schema: SchemaDescriptor = serde_json::from_value(json!({
            "type": "object",
            "properties": {"ok": {"type": "boolean"}},
            "required": ["ok"]
        }))
        .unwrap();
        assert!(schema.validate(&json!({"ok": true})).is_ok());
        assert!(schema.validate(&json!({"ok": "yes"})).is_err());
    }
}
