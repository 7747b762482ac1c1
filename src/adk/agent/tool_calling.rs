// SPDX-License-Identifier: MIT

//! Tool-Calling Agent - native model tool calling
//!
//! This agent sends the conversation together with the tool specs and
//! executes whatever tool calls the model returns, in a loop, until a turn
//! carries text and no tool calls. Every failure shares the run-wide
//! retry budget.

use super::{Agent, AgentInput, AgentOutput, ExpectedOutput, Iteration, IterationMeta, IterationState};
use crate::adk::config::ExecutionConfig;
use crate::adk::context::{Run, RunContext, RunOwner};
use crate::adk::emitter::{Emitter, Event};
use crate::adk::error::{ErrorKind, FrameworkError, ModelError, ValidationError};
use crate::adk::memory::{Memory, UnconstrainedMemory};
use crate::adk::model::{ChatModel, Message, ModelRequest, Part, Role, ToolChoice};
use crate::adk::retry::RetryCounter;
use crate::adk::schema::Schema;
use crate::adk::template::PromptTemplate;
use crate::adk::tool::Tool;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Templates rendered by the tool-calling runner
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallingTemplates {
    pub system: PromptTemplate,
    pub user: PromptTemplate,
    pub user_empty: PromptTemplate,
    /// Appended while the model keeps returning empty turns
    pub empty_response: PromptTemplate,
    pub tool_error: PromptTemplate,
    /// Arguments rejected by the tool's input schema
    pub tool_input_error: PromptTemplate,
    pub tool_not_found: PromptTemplate,
    /// Second call coercing the answer into the expected schema
    pub structured_output: PromptTemplate,
}

impl Default for ToolCallingTemplates {
    fn default() -> Self {
        Self {
            system: PromptTemplate::new(
                "You are a helpful assistant. Use the provided tools when they help you answer.{{#instructions}}\n\n# Instructions\n{{instructions}}{{/instructions}}",
            )
            .with_default("instructions", ""),
            user: PromptTemplate::new(
                "{{input}}{{#context}}\n\nContext: {{context}}{{/context}}{{#expected_output}}\n\nExpected output: {{expected_output}}{{/expected_output}}",
            ),
            user_empty: PromptTemplate::new("Message: Empty message."),
            empty_response: PromptTemplate::new(
                "Your previous response was empty. Reply with an answer or call one of the tools.",
            ),
            tool_error: PromptTemplate::new("Error: {{reason}}"),
            tool_input_error: PromptTemplate::new(
                "Error: {{reason}}\n\nHINT: The arguments do not match the input schema of the tool '{{tool}}'. Correct them and call it again.",
            ),
            tool_not_found: PromptTemplate::new("Error: tool '{{tool}}' does not exist. Available tools: {{tools}}."),
            structured_output: PromptTemplate::new(
                "Convert your last answer into JSON that matches this schema:\n{{schema}}\n\nReply with the JSON object only.",
            ),
        }
    }
}

/// Agent built on native model tool calling
pub struct ToolCallingAgent {
    name: String,
    instructions: Option<String>,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    /// HashMap for O(1) tool lookups
    tool_map: HashMap<String, usize>,
    memory: Arc<dyn Memory>,
    templates: ToolCallingTemplates,
    config: ExecutionConfig,
    owner: RunOwner,
}

impl ToolCallingAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>, memory: Arc<dyn Memory>) -> Self {
        let name = name.into();
        let emitter = Emitter::new(["agent", "tool_calling"], name.clone());
        Self {
            owner: RunOwner::new(name.clone(), ErrorKind::Agent, emitter),
            name,
            instructions: None,
            model,
            tools: Vec::new(),
            tool_map: HashMap::new(),
            memory,
            templates: ToolCallingTemplates::default(),
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tool_map = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
        self.tools = tools;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_templates(mut self, templates: ToolCallingTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.owner = RunOwner::new(self.name.clone(), ErrorKind::Agent, emitter);
        self
    }

    pub fn emitter(&self) -> &Emitter {
        self.owner.emitter()
    }

    /// O(1) tool lookup by name
    fn get_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tool_map.get(name).map(|&i| &self.tools[i])
    }
}

impl Agent for ToolCallingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn memory(&self) -> Arc<dyn Memory> {
        self.memory.clone()
    }

    fn run(&self, input: AgentInput) -> Run<'_, AgentOutput> {
        Run::new(&self.owner, move |ctx| ToolCallingRunner::new(self, ctx).run(input).boxed())
    }

    fn fork_with_memory(&self, memory: Arc<dyn Memory>) -> Arc<dyn Agent> {
        Arc::new(Self {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            model: self.model.clone(),
            tools: self.tools.clone(),
            tool_map: self.tool_map.clone(),
            memory,
            templates: self.templates.clone(),
            config: self.config,
            owner: RunOwner::new(self.name.clone(), ErrorKind::Agent, self.owner.emitter().clone()),
        })
    }
}

struct ToolCallingRunner<'a> {
    agent: &'a ToolCallingAgent,
    ctx: RunContext,
    memory: Arc<UnconstrainedMemory>,
    total: RetryCounter,
    iterations: Vec<Iteration>,
}

impl<'a> ToolCallingRunner<'a> {
    fn new(agent: &'a ToolCallingAgent, ctx: RunContext) -> Self {
        Self {
            agent,
            ctx,
            memory: Arc::new(UnconstrainedMemory::new()),
            total: RetryCounter::new("total retries", agent.config.total_max_retries),
            iterations: Vec::new(),
        }
    }

    async fn run(mut self, input: AgentInput) -> Result<AgentOutput, FrameworkError> {
        let agent = self.agent;
        let user_message = self.init(&input).await?;
        let tools: Vec<_> = agent.tools.iter().map(|t| t.spec()).collect();
        let mut placeholder: Option<Uuid> = None;
        let mut iteration = 0;

        loop {
            iteration += 1;
            self.ctx.signal().throw_if_aborted()?;
            if iteration > agent.config.max_iterations {
                return Err(FrameworkError::RetryExhausted {
                    kind: "iterations".to_string(),
                    limit: agent.config.max_iterations,
                    context: Some(self.log()),
                    cause: None,
                });
            }
            let meta = IterationMeta { iteration };
            log::info!("Agent {} turn {}/{}", agent.name, iteration, agent.config.max_iterations);
            self.emit("start", Event::IterationStart { meta }).await?;

            let request = ModelRequest {
                messages: self.memory.messages().await,
                tools: tools.clone(),
                tool_choice: ToolChoice::Auto,
                ..Default::default()
            };
            let signal = self.ctx.signal().clone();
            let output = match signal.guard(agent.model.create(request, &signal)).await {
                Ok(output) => output,
                Err(err) if err.is_retryable() && !err.is_aborted() => {
                    self.recover(meta, err).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let parts: Vec<Part> = output
                .messages
                .into_iter()
                .filter(|m| m.role == Role::Assistant)
                .flat_map(|m| m.parts)
                .collect();
            let message = Message::new(Role::Assistant, parts);

            if message.is_empty() {
                log::warn!("Agent {} received empty response with no function calls", agent.name);
                if placeholder.is_none() {
                    let notice = Message::user(agent.templates.empty_response.render(&Value::Null)?)
                        .with_meta("placeholder", true);
                    placeholder = Some(notice.id);
                    self.memory.add(notice).await;
                }
                let err = FrameworkError::Model(ModelError::InvalidResponse("empty response".to_string()));
                self.recover(meta, err).await?;
                continue;
            }
            if let Some(id) = placeholder.take() {
                self.memory.delete(id).await;
            }
            self.memory.add(message.clone()).await;

            let text = message.content();
            let thinking = message.thinking();
            let calls: Vec<(String, String, Value)> = message
                .tool_calls()
                .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                .collect();

            if calls.is_empty() {
                let result = match &input.expected_output {
                    Some(ExpectedOutput::Schema(schema)) => self.structured(meta, schema).await?,
                    _ => Message::assistant(text.trim()),
                };
                if let Some(user) = user_message {
                    agent.memory.add(user).await;
                }
                agent.memory.add(result.clone()).await;

                let state = IterationState {
                    thought: thinking,
                    final_answer: Some(result.content()),
                    ..Default::default()
                };
                self.emit(
                    "success",
                    Event::AgentSuccess {
                        meta,
                        data: result.clone(),
                        state: state.clone(),
                    },
                )
                .await?;
                self.iterations.push(Iteration { meta, state });

                let memory: Arc<dyn Memory> = self.memory.clone();
                return Ok(AgentOutput {
                    result,
                    memory,
                    iterations: self.iterations,
                });
            }

            // Text alongside tool calls counts as reasoning when the model sent none
            let thought = thinking.or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()));
            for (id, name, args) in calls {
                let (output, is_error) = self.call_tool(meta, &name, args.clone()).await?;
                self.memory
                    .add(Message::tool_result(id, name.clone(), output.clone(), is_error))
                    .await;
                self.iterations.push(Iteration {
                    meta,
                    state: IterationState {
                        thought: thought.clone(),
                        tool_name: Some(name),
                        tool_input: Some(args),
                        tool_output: Some(output),
                        final_answer: None,
                    },
                });
            }
        }
    }

    async fn init(&self, input: &AgentInput) -> Result<Option<Message>, FrameworkError> {
        let templates = &self.agent.templates;
        let system = templates.system.render(&json!({
            "instructions": self.agent.instructions.clone().unwrap_or_default(),
        }))?;
        self.memory.add(Message::system(system)).await;
        self.memory.add_many(self.agent.memory.messages().await).await;

        match input.non_empty_prompt() {
            Some(_) => {
                let message = Message::user(templates.user.render(&input.template_vars())?);
                self.memory.add(message.clone()).await;
                Ok(Some(message))
            }
            None if !self.agent.memory.is_empty().await => {
                self.memory
                    .add(Message::user(templates.user_empty.render(&Value::Null)?))
                    .await;
                Ok(None)
            }
            None => Err(ValidationError::Invalid(
                "a prompt is required when the agent memory is empty".to_string(),
            )
            .into()),
        }
    }

    /// Execute one tool call; failures become error results
    async fn call_tool(&mut self, meta: IterationMeta, name: &str, input: Value) -> Result<(String, bool), FrameworkError> {
        let agent = self.agent;
        log::info!("Tool call: {} {}", name, input);

        let Some(tool) = agent.get_tool(name) else {
            log::error!("Tool {} not found", name);
            self.tool_failed(meta, name, &input, FrameworkError::tool_not_found(name)).await?;
            let names: Vec<&str> = agent.tools.iter().map(|t| t.name()).collect();
            let text = agent
                .templates
                .tool_not_found
                .render(&json!({ "tool": name, "tools": names.join(", ") }))?;
            return Ok((text, true));
        };

        if let Err(invalid) = Schema::from_json_schema(tool.schema()).and_then(|schema| schema.validate(input.clone())) {
            log::warn!("Tool {} rejected input {}: {}", name, input, invalid);
            let err = self
                .tool_failed(meta, name, &input, FrameworkError::Validation(invalid))
                .await?;
            let text = agent
                .templates
                .tool_input_error
                .render(&json!({ "reason": err.to_string(), "tool": name }))?;
            return Ok((text, true));
        }

        self.emit(
            "tool_start",
            Event::ToolStart {
                meta,
                tool: name.to_string(),
                input: input.clone(),
            },
        )
        .await?;

        let signal = self.ctx.signal().clone();
        let result = signal
            .guard(async { Ok::<_, FrameworkError>(tool.run(input.clone(), &signal).await) })
            .await?;

        match result {
            Ok(output) => {
                let text = output.get_text_content();
                self.emit(
                    "tool_success",
                    Event::ToolSuccess {
                        meta,
                        tool: name.to_string(),
                        input,
                        output: text.clone(),
                    },
                )
                .await?;
                Ok((text, false))
            }
            Err(tool_err) => {
                log::error!("Tool {} failed: {}", name, tool_err);
                let err = self.tool_failed(meta, name, &input, FrameworkError::Tool(tool_err)).await?;
                let text = agent.templates.tool_error.render(&json!({ "reason": err.explain() }))?;
                Ok((text, true))
            }
        }
    }

    /// Second call coercing the final text into `schema`
    async fn structured(&mut self, meta: IterationMeta, schema: &Value) -> Result<Message, FrameworkError> {
        let agent = self.agent;
        let validator = Schema::from_json_schema(schema)?;
        let instruction = Message::user(
            agent
                .templates
                .structured_output
                .render(&json!({ "schema": schema.to_string() }))?,
        );

        loop {
            let mut messages = self.memory.messages().await;
            messages.push(instruction.clone());
            let request = ModelRequest {
                messages,
                response_format: Some(schema.clone()),
                tool_choice: ToolChoice::None,
                ..Default::default()
            };

            let signal = self.ctx.signal().clone();
            let text = signal.guard(agent.model.create(request, &signal)).await?.text();
            let parsed = serde_json::from_str::<Value>(text.trim())
                .map_err(FrameworkError::from)
                .and_then(|value| Ok(validator.validate(value).map_err(|e| {
                    FrameworkError::Model(ModelError::InvalidResponse(e.to_string()))
                })?));

            match parsed {
                Ok(value) => return Ok(Message::assistant(value.to_string()).with_meta("structured", true)),
                Err(err) => self.recover(meta, err).await?,
            }
        }
    }

    async fn tool_failed(
        &mut self,
        meta: IterationMeta,
        name: &str,
        input: &Value,
        err: FrameworkError,
    ) -> Result<FrameworkError, FrameworkError> {
        self.emit(
            "tool_error",
            Event::ToolError {
                meta,
                tool: name.to_string(),
                input: input.clone(),
                error: err.snapshot(),
            },
        )
        .await?;
        self.total
            .consume(err)
            .map_err(|exhausted| exhausted.with_context(self.log()))
    }

    /// Report a recoverable failure and spend one unit of the run budget
    async fn recover(&mut self, meta: IterationMeta, err: FrameworkError) -> Result<(), FrameworkError> {
        let snapshot = err.snapshot();
        self.emit(
            "error",
            Event::AgentError {
                meta,
                error: snapshot.clone(),
            },
        )
        .await?;
        self.total
            .consume(err)
            .map_err(|exhausted| exhausted.with_context(self.log()))?;
        self.emit(
            "retry",
            Event::Retry {
                meta,
                attempt: self.total.used(),
                error: snapshot,
            },
        )
        .await
    }

    fn log(&self) -> Value {
        serde_json::to_value(&self.iterations).unwrap_or(Value::Null)
    }

    async fn emit(&self, name: &str, event: Event) -> Result<(), FrameworkError> {
        Ok(self.ctx.emitter().emit(name, event).await?)
    }
}
