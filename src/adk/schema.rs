// SPDX-License-Identifier: MIT

//! Object schemas for workflow state and tool input

use crate::adk::error::{FrameworkError, ValidationError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema describing the fields of a JSON object
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Schema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldDef>,
    /// Full JSON Schema document the fields were read from. Nested
    /// properties, `items`, `enum` and `$ref`s are checked against it.
    #[serde(skip)]
    pub document: Option<Value>,
}

/// Definition of a single field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Default value, applied when the field is absent
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            nullable: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    fn from_json_type(name: &str) -> Option<Self> {
        Some(match name {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "integer" => FieldType::Integer,
            "boolean" => FieldType::Boolean,
            "array" => FieldType::Array,
            "object" => FieldType::Object,
            _ => return None,
        })
    }
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

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field registration
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Validate an object, filling in defaults for absent fields.
    ///
    /// Unknown fields are kept. Validating an already validated value
    /// returns it unchanged.
    pub fn validate(&self, value: Value) -> Result<Value, ValidationError> {
        let mut object = match value {
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::NotAnObject {
                    found: type_name(&other).to_string(),
                })
            }
        };

        for (name, def) in &self.fields {
            match object.get(name) {
                None => {
                    if let Some(default) = &def.default {
                        object.insert(name.clone(), default.clone());
                    } else if def.required {
                        return Err(ValidationError::MissingField { field: name.clone() });
                    }
                }
                Some(Value::Null) if def.nullable || !def.required => {}
                Some(value) => {
                    if !def.field_type.accepts(value) {
                        return Err(ValidationError::TypeMismatch {
                            field: name.clone(),
                            expected: format!("{:?}", def.field_type).to_lowercase(),
                            found: type_name(value).to_string(),
                        });
                    }
                }
            }
        }

        let object = Value::Object(object);
        if let Some(document) = &self.document {
            check_document(document, &object)?;
        }
        Ok(object)
    }

    /// Read the object-level subset of a JSON Schema document
    pub fn from_json_schema(schema: &Value) -> Result<Self, ValidationError> {
        let properties = match schema.get("properties") {
            Some(Value::Object(props)) => props.clone(),
            Some(other) => {
                return Err(ValidationError::Invalid(format!(
                    "'properties' must be an object, found {}",
                    type_name(other)
                )))
            }
            None => Map::new(),
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = BTreeMap::new();
        for (name, prop) in properties {
            let (field_type, nullable) = read_type(&prop);
            fields.insert(
                name.clone(),
                FieldDef {
                    field_type,
                    required: required.contains(&name.as_str()),
                    nullable,
                    default: prop.get("default").cloned(),
                },
            );
        }
        Ok(Self {
            fields,
            document: Some(schema.clone()),
        })
    }

    /// Derive a schema from a Rust type
    pub fn from_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        serde_json::to_value(&root)
            .ok()
            .and_then(|value| Self::from_json_schema(&value).ok())
            .unwrap_or_default()
    }

    /// Parse a schema from YAML (`field: { type: string, required: true }`)
    pub fn from_yaml(yaml: &str) -> Result<Self, FrameworkError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Check `value` against a whole JSON Schema document
fn check_document(document: &Value, value: &Value) -> Result<(), ValidationError> {
    let validator = jsonschema::validator_for(document).map_err(|e| ValidationError::Invalid(format!("invalid schema: {}", e)))?;
    let result = match validator.iter_errors(value).next() {
        Some(error) => Err(ValidationError::Constraint {
            path: error.instance_path.to_string(),
            reason: error.to_string(),
        }),
        None => Ok(()),
    };
    result
}

/// Field type of a JSON Schema property, accepting `["string", "null"]`
fn read_type(prop: &Value) -> (FieldType, bool) {
    match prop.get("type") {
        Some(Value::String(name)) => (FieldType::from_json_type(name).unwrap_or(FieldType::Any), false),
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let field_type = names
                .iter()
                .filter(|n| **n != "null")
                .find_map(|n| FieldType::from_json_type(n))
                .unwrap_or(FieldType::Any);
            (field_type, nullable)
        }
        _ => (FieldType::Any, false),
    }
}
