// SPDX-License-Identifier: MIT

//! Agent module - defines agent types for AI workflows
//!
//! This module provides the core Agent trait and implementations:
//! - `ReActAgent` - text-grammar Thought / Function / Final Answer loop
//! - `ToolCallingAgent` - native model tool calling

pub mod parser;
pub mod react;
pub mod tool_calling;

pub use parser::{FieldSpec, Grammar, LineParser, ParserEvent, ValueKind};
pub use react::{ReActAgent, ReActTemplates};
pub use tool_calling::{ToolCallingAgent, ToolCallingTemplates};

use crate::adk::config::ExecutionConfig;
use crate::adk::context::Run;
use crate::adk::error::FrameworkError;
use crate::adk::memory::Memory;
use crate::adk::model::{ChatModel, Message};
use crate::adk::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// What the caller expects the agent to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutput {
    /// Free-form description added to the prompt
    Text(String),
    /// JSON Schema the final answer must satisfy
    Schema(Value),
}

impl ExpectedOutput {
    pub fn from_type<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        ExpectedOutput::Schema(serde_json::to_value(&schema).unwrap_or(Value::Null))
    }

    /// Rendering used inside prompts
    pub fn describe(&self) -> String {
        match self {
            ExpectedOutput::Text(text) => text.clone(),
            ExpectedOutput::Schema(schema) => format!("JSON matching this schema: {}", schema),
        }
    }
}

/// Input of one agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    pub prompt: Option<String>,
    pub context: Option<String>,
    pub expected_output: Option<ExpectedOutput>,
}

impl AgentInput {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_expected_output(mut self, expected: ExpectedOutput) -> Self {
        self.expected_output = Some(expected);
        self
    }

    /// Prompt, unless missing or blank
    pub fn non_empty_prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Template variables for the user prompt
    pub(crate) fn template_vars(&self) -> Value {
        let mut vars = Map::new();
        vars.insert("input".to_string(), Value::from(self.prompt.clone().unwrap_or_default()));
        vars.insert("context".to_string(), Value::from(self.context.clone().unwrap_or_default()));
        vars.insert(
            "expected_output".to_string(),
            Value::from(
                self.expected_output
                    .as_ref()
                    .map(ExpectedOutput::describe)
                    .unwrap_or_default(),
            ),
        );
        Value::Object(vars)
    }
}

impl From<&str> for AgentInput {
    fn from(value: &str) -> Self {
        AgentInput::prompt(value)
    }
}

/// Position of an iteration within its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationMeta {
    pub iteration: usize,
}

/// Fields parsed from one model round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub thought: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<String>,
    pub final_answer: Option<String>,
}

impl IterationState {
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            thought: text("thought"),
            tool_name: text("tool_name"),
            tool_input: fields.get("tool_input").cloned(),
            tool_output: text("tool_output"),
            final_answer: text("final_answer"),
        }
    }
}

/// One completed iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub meta: IterationMeta,
    pub state: IterationState,
}

/// Result of an agent run
#[derive(Clone)]
pub struct AgentOutput {
    /// Final assistant message
    pub result: Message,
    /// Working memory of the run, tool results included
    pub memory: Arc<dyn Memory>,
    pub iterations: Vec<Iteration>,
}

impl fmt::Debug for AgentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOutput")
            .field("result", &self.result)
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// Core agent trait for all agent types
pub trait Agent: Send + Sync {
    /// Returns the agent name
    fn name(&self) -> &str;

    /// Memory the agent reads from and appends to
    fn memory(&self) -> Arc<dyn Memory>;

    /// Prepare a run; nothing happens until it is awaited
    fn run(&self, input: AgentInput) -> Run<'_, AgentOutput>;

    /// Same agent configuration over a different memory
    fn fork_with_memory(&self, memory: Arc<dyn Memory>) -> Arc<dyn Agent>;
}

/// Executor used by an [`AgentSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    React,
    ToolCalling,
}

/// Declarative description of an agent
#[derive(Clone)]
pub struct AgentSpec {
    pub name: String,
    pub instructions: Option<String>,
    pub kind: AgentKind,
    pub model: Arc<dyn ChatModel>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub config: ExecutionConfig,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            kind: AgentKind::default(),
            model,
            tools: Vec::new(),
            config: ExecutionConfig::default(),
        }
    }

    pub fn build(&self, memory: Arc<dyn Memory>) -> Arc<dyn Agent> {
        match self.kind {
            AgentKind::React => {
                let mut agent = ReActAgent::new(self.name.clone(), self.model.clone(), memory)
                    .with_tools(self.tools.clone())
                    .with_config(self.config);
                if let Some(instructions) = &self.instructions {
                    agent = agent.with_instructions(instructions.clone());
                }
                Arc::new(agent)
            }
            AgentKind::ToolCalling => {
                let mut agent = ToolCallingAgent::new(self.name.clone(), self.model.clone(), memory)
                    .with_tools(self.tools.clone())
                    .with_config(self.config);
                if let Some(instructions) = &self.instructions {
                    agent = agent.with_instructions(instructions.clone());
                }
                Arc::new(agent)
            }
        }
    }
}

impl fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.model.name())
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Builds an agent over the given memory
pub type AgentFactory = Arc<dyn Fn(Arc<dyn Memory>) -> Result<Arc<dyn Agent>, FrameworkError> + Send + Sync>;

/// The ways an agent can be supplied to a workflow
#[derive(Clone)]
pub enum AgentSource {
    /// Existing agent, forked over each step's memory
    Instance(Arc<dyn Agent>),
    Factory(AgentFactory),
    Spec(AgentSpec),
}

impl AgentSource {
    /// Name of the agent when it can be known without building it
    pub fn name(&self) -> Option<&str> {
        match self {
            AgentSource::Instance(agent) => Some(agent.name()),
            AgentSource::Spec(spec) => Some(&spec.name),
            AgentSource::Factory(_) => None,
        }
    }

    /// Collapse every variant into a uniform factory
    pub fn into_factory(self) -> AgentFactory {
        match self {
            AgentSource::Instance(agent) => Arc::new(move |memory| Ok(agent.fork_with_memory(memory))),
            AgentSource::Factory(factory) => factory,
            AgentSource::Spec(spec) => Arc::new(move |memory| Ok(spec.build(memory))),
        }
    }
}

impl From<Arc<dyn Agent>> for AgentSource {
    fn from(value: Arc<dyn Agent>) -> Self {
        AgentSource::Instance(value)
    }
}

impl From<AgentSpec> for AgentSource {
    fn from(value: AgentSpec) -> Self {
        AgentSource::Spec(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iteration_state_from_fields() {
        let mut fields = Map::new();
        fields.insert("thought".to_string(), json!("add them"));
        fields.insert("tool_name".to_string(), json!("add"));
        fields.insert("tool_input".to_string(), json!({"a": 1}));

        let state = IterationState::from_fields(&fields);
        assert_eq!(state.thought.as_deref(), Some("add them"));
        assert_eq!(state.tool_input, Some(json!({"a": 1})));
        assert!(state.final_answer.is_none());
    }

    #[test]
    fn test_input_template_vars() {
        let input = AgentInput::prompt("What is 2+2?").with_context("math quiz");
        let vars = input.template_vars();
        assert_eq!(vars["input"], "What is 2+2?");
        assert_eq!(vars["context"], "math quiz");
        assert_eq!(vars["expected_output"], "");
        assert!(AgentInput::prompt("  ").non_empty_prompt().is_none());
    }

    #[test]
    fn test_expected_output_from_type() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct Weather {
            city: String,
        }

        match ExpectedOutput::from_type::<Weather>() {
            ExpectedOutput::Schema(schema) => assert_eq!(schema["properties"]["city"]["type"], "string"),
            other => panic!("Expected Schema, got {:?}", other),
        }
    }
}
