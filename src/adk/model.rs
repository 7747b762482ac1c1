// SPDX-License-Identifier: MIT

//! Model module - the chat model interface the agent runners consume
//!
//! Concrete provider adapters live outside this crate; they implement
//! [`ChatModel`] over their own wire protocol.

use crate::adk::error::FrameworkError;
use crate::adk::signal::AbortSignal;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Parts of a message - text, thinking, tool calls and their results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Regular text output from the model
    Text { text: String },
    /// Reasoning content from thinking models
    Thinking { text: String },
    /// Tool call requested by the model
    ToolCall { id: String, name: String, args: Value },
    /// Result of executing a tool call
    ToolResult {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts,
            meta: Map::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::Text { text: text.into() }])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn tool_result(id: impl Into<String>, name: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        Self::new(
            Role::Tool,
            vec![Part::ToolResult {
                id: id.into(),
                name: name.into(),
                output: output.into(),
                is_error,
            }],
        )
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Concatenated text parts
    pub fn content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated reasoning parts, `None` when there are none
    pub fn thinking(&self) -> Option<String> {
        let text: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Thinking { text } => Some(text.trim()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect();
        (!text.is_empty()).then(|| text.join("\n"))
    }

    /// Tool calls requested in this message, as `(id, name, args)`
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolCall { id, name, args } => Some((id.as_str(), name.as_str(), args)),
            _ => None,
        })
    }

    /// True when the message carries neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        self.content().trim().is_empty() && self.tool_calls().next().is_none()
    }
}

/// Tool advertised to the model for native tool calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
    Tool(String),
}

/// Everything a model needs for one completion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// JSON Schema the response must satisfy
    pub response_format: Option<Value>,
    pub tool_choice: ToolChoice,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// Result of a completion, or one chunk of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelOutput {
    pub messages: Vec<Message>,
}

impl ModelOutput {
    /// Output made of a single assistant text message
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::assistant(text)],
        }
    }

    /// Concatenated text of every message
    pub fn text(&self) -> String {
        self.messages.iter().map(Message::content).collect()
    }
}

/// Core trait for chat model implementations
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider/model identifier used in logs
    fn name(&self) -> &str;

    async fn create(&self, request: ModelRequest, signal: &AbortSignal) -> Result<ModelOutput, FrameworkError>;

    /// Streamed completion yielding text chunks.
    ///
    /// Defaults to a single chunk holding the whole [`ChatModel::create`] output.
    fn create_stream<'a>(
        &'a self,
        request: ModelRequest,
        signal: &'a AbortSignal,
    ) -> BoxStream<'a, Result<ModelOutput, FrameworkError>> {
        Box::pin(stream::once(self.create(request, signal)))
    }
}
