// SPDX-License-Identifier: MIT

//! One run of the ReAct agent
//!
//! Each iteration calls the model, parses its output while it streams and
//! then either executes the requested function or finishes with the final
//! answer. Parse failures stay inside the iteration and are retried with
//! corrective feedback; tool failures end the iteration and are fed back
//! as the function output.

use super::ReActAgent;
use crate::adk::agent::parser::{LineParser, ParserEvent};
use crate::adk::agent::{AgentInput, AgentOutput, Iteration, IterationMeta, IterationState};
use crate::adk::context::RunContext;
use crate::adk::emitter::Event;
use crate::adk::error::{FrameworkError, ParseError, ValidationError};
use crate::adk::memory::{Memory, UnconstrainedMemory};
use crate::adk::model::{Message, ModelRequest};
use crate::adk::retry::RetryCounter;
use crate::adk::schema::Schema;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Outcome of one model call
enum Generation {
    Parsed(IterationState),
    Invalid { raw: String, error: ParseError },
}

pub(super) struct ReActRunner<'a> {
    agent: &'a ReActAgent,
    ctx: RunContext,
    memory: Arc<UnconstrainedMemory>,
    total: RetryCounter,
    iteration: usize,
    iterations: Vec<Iteration>,
}

impl<'a> ReActRunner<'a> {
    pub(super) fn new(agent: &'a ReActAgent, ctx: RunContext) -> Self {
        Self {
            agent,
            ctx,
            memory: Arc::new(UnconstrainedMemory::new()),
            total: RetryCounter::new("total retries", agent.config.total_max_retries),
            iteration: 0,
            iterations: Vec::new(),
        }
    }

    pub(super) async fn run(mut self, input: AgentInput) -> Result<AgentOutput, FrameworkError> {
        let user_message = self.init(&input).await?;

        loop {
            let meta = self.create_iteration().await?;
            let mut step = RetryCounter::new("retries per step", self.agent.config.max_retries_per_step);
            let mut state = self.next_state(meta, &mut step).await?;

            if let Some(answer) = state.final_answer.clone() {
                let message = Message::assistant(answer);
                self.memory.add(message.clone()).await;
                if let Some(user) = user_message {
                    self.agent.memory.add(user).await;
                }
                self.agent.memory.add(message.clone()).await;

                log::info!("ReActAgent {} finished after {} iteration(s)", self.agent.name, meta.iteration);
                self.emit(
                    "success",
                    Event::AgentSuccess {
                        meta,
                        data: message.clone(),
                        state: state.clone(),
                    },
                )
                .await?;
                self.iterations.push(Iteration { meta, state });

                let memory: Arc<dyn Memory> = self.memory.clone();
                return Ok(AgentOutput {
                    result: message,
                    memory,
                    iterations: self.iterations,
                });
            }

            let call = render_call(&state);
            let (output, is_error) = self.execute_tool(meta, &state, &mut step).await?;
            let tool_name = state.tool_name.clone().unwrap_or_default();
            self.memory.add(Message::assistant(call)).await;
            self.memory
                .add(Message::tool_result(
                    format!("call_{}", meta.iteration),
                    tool_name,
                    output.clone(),
                    is_error,
                ))
                .await;

            state.tool_output = Some(output);
            self.iterations.push(Iteration { meta, state });
        }
    }

    /// Seed the working memory: system prompt, prior messages, user prompt
    async fn init(&self, input: &AgentInput) -> Result<Option<Message>, FrameworkError> {
        let templates = &self.agent.templates;
        let tools: Vec<String> = self
            .agent
            .tools
            .iter()
            .map(|t| {
                format!(
                    "Function Name: {}\nDescription: {}\nParameters: {}",
                    t.name(),
                    t.description(),
                    t.schema()
                )
            })
            .collect();

        let system = templates.system.render(&json!({
            "instructions": self.agent.instructions.clone().unwrap_or_default(),
            "tools": tools.join("\n\n"),
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
                let message = Message::user(templates.user_empty.render(&Value::Null)?);
                self.memory.add(message).await;
                Ok(None)
            }
            None => Err(ValidationError::Invalid(
                "a prompt is required when the agent memory is empty".to_string(),
            )
            .into()),
        }
    }

    async fn create_iteration(&mut self) -> Result<IterationMeta, FrameworkError> {
        self.ctx.signal().throw_if_aborted()?;
        self.iteration += 1;
        let max = self.agent.config.max_iterations;
        if self.iteration > max {
            return Err(FrameworkError::RetryExhausted {
                kind: "iterations".to_string(),
                limit: max,
                context: Some(self.log()),
                cause: None,
            });
        }

        let meta = IterationMeta {
            iteration: self.iteration,
        };
        log::info!("ReActAgent {} iteration {}/{}", self.agent.name, self.iteration, max);
        self.emit("start", Event::IterationStart { meta }).await?;
        Ok(meta)
    }

    /// Call the model until its output parses, feeding parse errors back
    async fn next_state(&mut self, meta: IterationMeta, step: &mut RetryCounter) -> Result<IterationState, FrameworkError> {
        let mut feedback: Vec<Message> = Vec::new();
        loop {
            let err = match self.generate(meta, &feedback).await {
                Ok(Generation::Parsed(state)) => return Ok(state),
                Ok(Generation::Invalid { raw, error }) => {
                    log::warn!("ReActAgent {} produced invalid output: {}", self.agent.name, error);
                    let reason = error.to_string();
                    feedback.push(Message::assistant(raw));
                    feedback.push(Message::user(
                        self.agent.templates.schema_error.render(&json!({ "reason": reason }))?,
                    ));
                    FrameworkError::Parse(error)
                }
                Err(err) if err.is_retryable() && !err.is_aborted() => err,
                Err(err) => return Err(err),
            };

            self.emit(
                "error",
                Event::AgentError {
                    meta,
                    error: err.snapshot(),
                },
            )
            .await?;
            let err = self.consume(step, err)?;
            self.emit(
                "retry",
                Event::Retry {
                    meta,
                    attempt: step.used(),
                    error: err.snapshot(),
                },
            )
            .await?;
        }
    }

    async fn generate(&self, meta: IterationMeta, feedback: &[Message]) -> Result<Generation, FrameworkError> {
        let mut messages = self.memory.messages().await;
        messages.extend(feedback.iter().cloned());
        let request = ModelRequest::new(messages);
        let signal = self.ctx.signal().clone();
        let mut parser = LineParser::new(self.agent.grammar.clone());
        let mut raw = String::new();

        if self.agent.stream {
            let mut stream = self.agent.model.create_stream(request, &signal);
            while let Some(chunk) = signal
                .guard(async { Ok::<_, FrameworkError>(stream.next().await) })
                .await?
            {
                let text = chunk?.text();
                raw.push_str(&text);
                match parser.add(&text) {
                    Ok(events) => self.report(meta, events).await?,
                    Err(error) => return Ok(Generation::Invalid { raw, error }),
                }
                if parser.is_halted() {
                    break;
                }
            }
        } else {
            raw = signal.guard(self.agent.model.create(request, &signal)).await?.text();
            match parser.add(&raw) {
                Ok(events) => self.report(meta, events).await?,
                Err(error) => return Ok(Generation::Invalid { raw, error }),
            }
        }

        match parser.end() {
            Ok(events) => self.report(meta, events).await?,
            Err(error) => return Ok(Generation::Invalid { raw, error }),
        }
        Ok(Generation::Parsed(IterationState::from_fields(parser.fields())))
    }

    async fn report(&self, meta: IterationMeta, events: Vec<ParserEvent>) -> Result<(), FrameworkError> {
        for event in events {
            match event {
                ParserEvent::PartialUpdate { field, delta, value } => {
                    self.emit("partial_update", Event::PartialUpdate { meta, field, delta, value })
                        .await?
                }
                ParserEvent::Update { field, value } => {
                    log::debug!("ReActAgent {} {}: {}", self.agent.name, field, value);
                    self.emit("update", Event::Update { meta, field, value }).await?
                }
            }
        }
        Ok(())
    }

    /// Run the requested function. Returns the text fed back to the model
    /// and whether it describes a failure.
    async fn execute_tool(
        &mut self,
        meta: IterationMeta,
        state: &IterationState,
        step: &mut RetryCounter,
    ) -> Result<(String, bool), FrameworkError> {
        let agent = self.agent;
        let name = state.tool_name.clone().unwrap_or_default();
        let input = state.tool_input.clone().unwrap_or_else(|| Value::Object(Map::new()));

        let Some(tool) = agent.get_tool(&name) else {
            self.tool_failed(meta, &name, &input, FrameworkError::tool_not_found(&name), step)
                .await?;
            let names: Vec<&str> = agent.tools.iter().map(|t| t.name()).collect();
            let text = agent
                .templates
                .tool_not_found
                .render(&json!({ "tool": name, "tools": names.join(", ") }))?;
            return Ok((text, true));
        };

        if let Err(invalid) = Schema::from_json_schema(tool.schema()).and_then(|schema| schema.validate(input.clone())) {
            let err = self
                .tool_failed(meta, &name, &input, FrameworkError::Validation(invalid), step)
                .await?;
            let text = agent
                .templates
                .tool_input_error
                .render(&json!({ "reason": err.to_string(), "tool": name }))?;
            return Ok((text, true));
        }

        loop {
            log::info!("Tool call: {} {}", name, input);
            self.emit(
                "tool_start",
                Event::ToolStart {
                    meta,
                    tool: name.clone(),
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
                    let text = if output.is_empty() {
                        agent.templates.tool_no_result.render(&Value::Null)?
                    } else {
                        output.get_text_content()
                    };
                    self.emit(
                        "tool_success",
                        Event::ToolSuccess {
                            meta,
                            tool: name.clone(),
                            input: input.clone(),
                            output: text.clone(),
                        },
                    )
                    .await?;
                    return Ok((text, false));
                }
                Err(tool_err) => {
                    log::error!("Tool {} failed: {}", name, tool_err);
                    let retryable = tool_err.retryable;
                    let err = self
                        .tool_failed(meta, &name, &input, FrameworkError::Tool(tool_err), step)
                        .await?;
                    if retryable {
                        self.emit(
                            "retry",
                            Event::Retry {
                                meta,
                                attempt: step.used(),
                                error: err.snapshot(),
                            },
                        )
                        .await?;
                        continue;
                    }
                    let text = agent
                        .templates
                        .tool_error
                        .render(&json!({ "reason": err.explain() }))?;
                    return Ok((text, true));
                }
            }
        }
    }

    async fn tool_failed(
        &mut self,
        meta: IterationMeta,
        name: &str,
        input: &Value,
        err: FrameworkError,
        step: &mut RetryCounter,
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
        self.consume(step, err)
    }

    /// Spend one unit of both the per-step and the run-wide budget
    fn consume(&mut self, step: &mut RetryCounter, err: FrameworkError) -> Result<FrameworkError, FrameworkError> {
        step.consume(err)
            .and_then(|err| self.total.consume(err))
            .map_err(|exhausted| exhausted.with_context(self.log()))
    }

    fn log(&self) -> Value {
        serde_json::to_value(&self.iterations).unwrap_or(Value::Null)
    }

    async fn emit(&self, name: &str, event: Event) -> Result<(), FrameworkError> {
        Ok(self.ctx.emitter().emit(name, event).await?)
    }
}

/// Instruction lines of a function call, as stored in memory
fn render_call(state: &IterationState) -> String {
    let mut lines = Vec::new();
    if let Some(thought) = &state.thought {
        lines.push(format!("Thought: {}", thought));
    }
    if let Some(name) = &state.tool_name {
        lines.push(format!("Function Name: {}", name));
    }
    if let Some(input) = &state.tool_input {
        lines.push(format!("Function Input: {}", input));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use crate::adk::agent::{Agent, AgentInput, Grammar, ReActAgent};
    use crate::adk::config::ExecutionConfig;
    use crate::adk::emitter::EmittedEvent;
    use crate::adk::error::{BoxError, FrameworkError, ToolError};
    use crate::adk::memory::{Memory, UnconstrainedMemory};
    use crate::adk::model::{ChatModel, Message, ModelOutput, ModelRequest, Role};
    use crate::adk::signal::{AbortController, AbortSignal};
    use crate::adk::tool::{Tool, ToolOutput};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use once_cell::sync::Lazy;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays canned responses, streamed in small chunks
    struct ScriptedModel {
        responses: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, request: ModelRequest) -> String {
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap_or_default()
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create(&self, request: ModelRequest, _signal: &AbortSignal) -> Result<ModelOutput, FrameworkError> {
            Ok(ModelOutput::from_text(self.next(request)))
        }

        fn create_stream<'a>(
            &'a self,
            request: ModelRequest,
            _signal: &'a AbortSignal,
        ) -> BoxStream<'a, Result<ModelOutput, FrameworkError>> {
            let text = self.next(request);
            let chunks: Vec<Result<ModelOutput, FrameworkError>> = text
                .chars()
                .collect::<Vec<_>>()
                .chunks(7)
                .map(|c| Ok(ModelOutput::from_text(c.iter().collect::<String>())))
                .collect();
            Box::pin(tokio_stream::iter(chunks))
        }
    }

    static MULTIPLY_SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        })
    });

    struct MultiplyTool {
        failures_left: AtomicUsize,
    }

    impl MultiplyTool {
        fn new() -> Arc<Self> {
            Self::flaky(0)
        }

        fn flaky(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(failures),
            })
        }
    }

    #[async_trait]
    impl Tool for MultiplyTool {
        fn name(&self) -> &str {
            "multiply"
        }

        fn description(&self) -> &str {
            "Multiplies two numbers"
        }

        fn schema(&self) -> &Value {
            &MULTIPLY_SCHEMA
        }

        async fn run(&self, input: Value, _signal: &AbortSignal) -> Result<ToolOutput, ToolError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolError::new("multiply", "service unavailable").retryable());
            }
            let a = input["a"].as_f64().unwrap_or_default();
            let b = input["b"].as_f64().unwrap_or_default();
            Ok(ToolOutput::Json(json!(a * b)))
        }
    }

    const TOOL_CALL: &str = "Thought: I should multiply.\nFunction Name: multiply\nFunction Input: {\"a\": 6, \"b\": 7}\n";
    const FINAL: &str = "Thought: I know the answer.\nFinal Answer: 42";

    fn agent(model: Arc<ScriptedModel>) -> ReActAgent {
        ReActAgent::new("calculator", model, Arc::new(UnconstrainedMemory::new())).with_tools(vec![MultiplyTool::new()])
    }

    fn record(agent: &ReActAgent) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        agent.emitter().on("*.*", move |event: Arc<EmittedEvent>| {
            sink.lock().unwrap().push(event.name().to_string());
            async { Ok::<(), BoxError>(()) }
        });
        seen
    }

    #[tokio::test]
    async fn test_tool_call_then_final_answer() {
        let model = ScriptedModel::new(&[TOOL_CALL, FINAL]);
        let agent = agent(model.clone());
        let seen = record(&agent);

        let output = agent.run(AgentInput::prompt("What is 6 times 7?")).await.unwrap();

        assert_eq!(output.result.content(), "42");
        assert_eq!(output.iterations.len(), 2);
        assert_eq!(output.iterations[0].state.tool_output.as_deref(), Some("42.0"));
        assert_eq!(output.iterations[1].state.final_answer.as_deref(), Some("42"));

        let names = seen.lock().unwrap().clone();
        let tool_start = names.iter().position(|n| n == "tool_start").unwrap();
        let tool_success = names.iter().position(|n| n == "tool_success").unwrap();
        let success = names.iter().position(|n| n == "success").unwrap();
        assert!(tool_start < tool_success && tool_success < success);
        assert_eq!(names.iter().filter(|n| *n == "start").count(), 3);

        // second request sees the tool result
        let requests = model.requests.lock().unwrap();
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);

        // agent memory keeps only the exchange with the user
        let memory = agent.memory().messages().await;
        assert_eq!(memory.len(), 2);
        assert_eq!(memory[1].content(), "42");
    }

    #[tokio::test]
    async fn test_parse_error_is_fed_back() {
        let model = ScriptedModel::new(&["The answer is 42", FINAL]);
        let agent = agent(model.clone());
        let seen = record(&agent);

        let output = agent.run(AgentInput::prompt("6*7?")).await.unwrap();
        assert_eq!(output.result.content(), "42");
        assert_eq!(output.iterations.len(), 1);
        assert!(seen.lock().unwrap().contains(&"retry".to_string()));

        let requests = model.requests.lock().unwrap();
        let feedback = requests[1].messages.last().unwrap().content();
        assert!(feedback.contains("does not adhere to the communication structure"));
    }

    #[tokio::test]
    async fn test_per_step_retries_exhaust() {
        let model = ScriptedModel::new(&["no prefix here"]);
        let agent = agent(model.clone()).with_config(ExecutionConfig {
            max_retries_per_step: 2,
            ..Default::default()
        });

        let err = agent.run(AgentInput::prompt("hi")).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Max retries per step reached: 2");
        assert_eq!(model.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let model = ScriptedModel::new(&[TOOL_CALL]);
        let agent = agent(model).with_config(ExecutionConfig {
            max_iterations: 2,
            ..Default::default()
        });

        let err = agent.run(AgentInput::prompt("loop forever")).await.unwrap_err();
        match &err {
            FrameworkError::RetryExhausted { kind, limit, context, .. } => {
                assert_eq!(kind, "iterations");
                assert_eq!(*limit, 2);
                assert_eq!(context.as_ref().and_then(Value::as_array).map(Vec::len), Some(2));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let call = "Thought: try it\nFunction Name: divide\nFunction Input: {\"a\": 1}\n";
        let model = ScriptedModel::new(&[call, FINAL]);
        let agent = agent(model.clone());

        let output = agent.run(AgentInput::prompt("1/0?")).await.unwrap();
        let feedback = output.iterations[0].state.tool_output.clone().unwrap();
        assert!(feedback.contains("Function 'divide' does not exist"));
        assert!(feedback.contains("multiply"));
    }

    #[tokio::test]
    async fn test_invalid_tool_input() {
        let call = "Thought: try it\nFunction Name: multiply\nFunction Input: {\"a\": \"six\", \"b\": 7}\n";
        let model = ScriptedModel::new(&[call, FINAL]);
        let output = agent(model).run(AgentInput::prompt("6*7?")).await.unwrap();

        let feedback = output.iterations[0].state.tool_output.clone().unwrap();
        assert!(feedback.contains("HINT: Invalid 'Function Input'"));
    }

    #[tokio::test]
    async fn test_retryable_tool_is_rerun() {
        let model = ScriptedModel::new(&[TOOL_CALL, FINAL]);
        let agent = ReActAgent::new("calculator", model, Arc::new(UnconstrainedMemory::new()))
            .with_tools(vec![MultiplyTool::flaky(1)]);
        let seen = record(&agent);

        let output = agent.run(AgentInput::prompt("6*7?")).await.unwrap();
        assert_eq!(output.iterations[0].state.tool_output.as_deref(), Some("42.0"));

        let names = seen.lock().unwrap();
        assert_eq!(names.iter().filter(|n| *n == "tool_start").count(), 2);
        assert_eq!(names.iter().filter(|n| *n == "tool_error").count(), 1);
    }

    #[tokio::test]
    async fn test_empty_prompt() {
        let model = ScriptedModel::new(&[FINAL]);
        let err = agent(model.clone()).run(AgentInput::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Validation(_)));

        let memory = Arc::new(UnconstrainedMemory::with_messages(vec![Message::user("earlier question")]));
        let agent = ReActAgent::new("calculator", model.clone(), memory);
        agent.run(AgentInput::default()).await.unwrap();

        let requests = model.requests.lock().unwrap();
        let last = requests.last().unwrap().messages.last().unwrap().content();
        assert_eq!(last, "Message: Empty message.");
    }

    #[tokio::test]
    async fn test_abort_signal() {
        let model = ScriptedModel::new(&[FINAL]);
        let controller = AbortController::new();
        controller.abort("stop");

        let err = agent(model)
            .run(AgentInput::prompt("hi"))
            .signal(controller.signal())
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_thinking_grammar() {
        let model = ScriptedModel::new(&["<think>\nsix sevens\n</think>\nThought: done\nFinal Answer: 42"]);
        let agent = agent(model).with_grammar(Grammar::react_thinking()).without_streaming();

        let output = agent.run(AgentInput::prompt("6*7?")).await.unwrap();
        assert_eq!(output.result.content(), "42");
    }
}
