// SPDX-License-Identifier: MIT

//! Prompt templates
//!
//! A small mustache-like syntax: `{{name}}` substitutes a variable,
//! `{{#name}}...{{/name}}` renders its body only when the variable is truthy
//! and `{{^name}}...{{/name}}` only when it is not. Templates are values:
//! customising one produces a new template and leaves the base untouched.

use crate::adk::error::FrameworkError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    #[serde(default)]
    defaults: Map<String, Value>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            defaults: Map::new(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Copy of this template with `patch` applied
    pub fn with_overrides<F>(&self, patch: F) -> Self
    where
        F: FnOnce(&mut PromptTemplate),
    {
        let mut fork = self.clone();
        patch(&mut fork);
        fork
    }

    /// Replace the template text, keeping the defaults
    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = template.into();
    }

    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.defaults.insert(key.into(), value.into());
    }

    /// Render with `vars` (a JSON object) layered over the defaults
    pub fn render(&self, vars: &Value) -> Result<String, FrameworkError> {
        let mut scope = self.defaults.clone();
        match vars {
            Value::Object(map) => scope.extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
            Value::Null => {}
            other => {
                return Err(FrameworkError::Template(format!(
                    "template variables must be an object, got {}",
                    other
                )))
            }
        }

        let mut out = String::with_capacity(self.template.len());
        render_into(&self.template, &scope, &mut out)?;
        Ok(out)
    }
}

fn render_into(src: &str, scope: &Map<String, Value>, out: &mut String) -> Result<(), FrameworkError> {
    let mut rest = src;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| FrameworkError::Template("unclosed '{{' tag".to_string()))?;
        let tag = after[..end].trim();
        rest = &after[end + 2..];

        if let Some(section) = tag.strip_prefix('#').or_else(|| tag.strip_prefix('^')) {
            let name = section.trim();
            let inverted = tag.starts_with('^');
            let close = format!("{{{{/{}}}}}", name);
            let close_at = rest.find(&close).ok_or_else(|| {
                FrameworkError::Template(format!("section '{}' is never closed", name))
            })?;
            let body = &rest[..close_at];
            rest = &rest[close_at + close.len()..];

            if scope.get(name).is_some_and(is_truthy) != inverted {
                render_into(body, scope, out)?;
            }
        } else if let Some(name) = tag.strip_prefix('/') {
            return Err(FrameworkError::Template(format!(
                "unexpected closing tag '{}'",
                name.trim()
            )));
        } else {
            match scope.get(tag) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) => {}
                Some(other) => out.push_str(&other.to_string()),
                None => {
                    return Err(FrameworkError::Template(format!(
                        "missing template variable '{}'",
                        tag
                    )))
                }
            }
        }
    }
    out.push_str(rest);
    Ok(())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitution_and_defaults() {
        let template = PromptTemplate::new("Hello {{name}}, you are {{role}}.").with_default("role", "helpful");
        let text = template.render(&json!({"name": "Ada"})).unwrap();
        assert_eq!(text, "Hello Ada, you are helpful.");
    }

    #[test]
    fn test_sections() {
        let template = PromptTemplate::new("{{#tools}}Tools: {{tools}}{{/tools}}{{^tools}}No tools.{{/tools}}");
        assert_eq!(template.render(&json!({"tools": "calc"})).unwrap(), "Tools: calc");
        assert_eq!(template.render(&json!({"tools": ""})).unwrap(), "No tools.");
        assert_eq!(template.render(&json!({})).unwrap(), "No tools.");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = PromptTemplate::new("{{nope}}").render(&json!({})).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_unclosed_section() {
        let err = PromptTemplate::new("{{#a}}x").render(&json!({"a": true})).unwrap_err();
        assert!(matches!(err, FrameworkError::Template(_)));
    }

    #[test]
    fn test_overrides_leave_base_untouched() {
        let base = PromptTemplate::new("Answer: {{text}}");
        let fork = base.with_overrides(|t| t.set_template("Final: {{text}}"));

        assert_eq!(base.render(&json!({"text": "4"})).unwrap(), "Answer: 4");
        assert_eq!(fork.render(&json!({"text": "4"})).unwrap(), "Final: 4");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let template = PromptTemplate::new("{{input}}");
        assert_eq!(template.render(&json!({"input": {"a": 1}})).unwrap(), r#"{"a":1}"#);
    }
}
