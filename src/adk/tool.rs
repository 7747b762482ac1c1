// SPDX-License-Identifier: MIT

use crate::adk::error::ToolError;
use crate::adk::model::ToolSpec;
use crate::adk::signal::AbortSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output produced by a tool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// Text fed back to the model
    pub fn get_text_content(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(Value::String(text)) => text.clone(),
            ToolOutput::Json(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.get_text_content().trim().is_empty()
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        ToolOutput::Text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        ToolOutput::Text(value.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Json(value)
    }
}

/// Trait for tools that can be called by agents.
///
/// `name()`, `description()` and `schema()` return borrowed data;
/// implementations should store these values in struct fields.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (must be unique within an agent's tool set)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input parameters
    fn schema(&self) -> &Value;

    /// Execute the tool. Implementations should stop early once `signal` fires.
    async fn run(&self, input: Value, signal: &AbortSignal) -> Result<ToolOutput, ToolError>;

    /// Description handed to models with native tool calling
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema().clone(),
        }
    }
}
