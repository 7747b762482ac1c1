// SPDX-License-Identifier: MIT

//! ReAct Agent - Reasoning + Acting pattern
//!
//! The model answers in prefixed instruction lines (`Thought:`,
//! `Function Name:`, `Function Input:`, `Final Answer:`). Output is parsed
//! while it streams; malformed output is fed back to the model with a
//! corrective prompt instead of failing the run, within the retry budgets
//! of [`ExecutionConfig`].

mod prompts;
mod runner;

pub use prompts::ReActTemplates;

use super::parser::Grammar;
use super::{Agent, AgentInput, AgentOutput};
use crate::adk::config::ExecutionConfig;
use crate::adk::context::{Run, RunOwner};
use crate::adk::emitter::Emitter;
use crate::adk::error::ErrorKind;
use crate::adk::memory::Memory;
use crate::adk::model::ChatModel;
use crate::adk::tool::Tool;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;

/// ReAct (Reasoning + Acting) Agent
pub struct ReActAgent {
    name: String,
    instructions: Option<String>,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    /// HashMap for O(1) tool lookups
    tool_map: HashMap<String, usize>,
    memory: Arc<dyn Memory>,
    templates: ReActTemplates,
    grammar: Grammar,
    config: ExecutionConfig,
    stream: bool,
    owner: RunOwner,
}

impl ReActAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>, memory: Arc<dyn Memory>) -> Self {
        let name = name.into();
        let emitter = Emitter::new(["agent", "react"], name.clone());
        Self {
            owner: RunOwner::new(name.clone(), ErrorKind::Agent, emitter),
            name,
            instructions: None,
            model,
            tools: Vec::new(),
            tool_map: HashMap::new(),
            memory,
            templates: ReActTemplates::default(),
            grammar: Grammar::react(),
            config: ExecutionConfig::default(),
            stream: true,
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

    pub fn with_templates(mut self, templates: ReActTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Replace the output grammar, e.g. with [`Grammar::react_thinking`]
    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }

    /// Report events through `emitter` instead of a private root emitter
    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.owner = RunOwner::new(self.name.clone(), ErrorKind::Agent, emitter);
        self
    }

    /// Use the model's non-streaming completion
    pub fn without_streaming(mut self) -> Self {
        self.stream = false;
        self
    }

    pub fn emitter(&self) -> &Emitter {
        self.owner.emitter()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// O(1) tool lookup by name
    fn get_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tool_map.get(name).map(|&i| &self.tools[i])
    }
}

impl Agent for ReActAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn memory(&self) -> Arc<dyn Memory> {
        self.memory.clone()
    }

    fn run(&self, input: AgentInput) -> Run<'_, AgentOutput> {
        Run::new(&self.owner, move |ctx| runner::ReActRunner::new(self, ctx).run(input).boxed())
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
            grammar: self.grammar.clone(),
            config: self.config,
            stream: self.stream,
            owner: RunOwner::new(self.name.clone(), ErrorKind::Agent, self.owner.emitter().clone()),
        })
    }
}
