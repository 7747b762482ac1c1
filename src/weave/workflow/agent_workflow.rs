// SPDX-License-Identifier: MIT

//! Agent workflow - agents chained as sequential workflow steps
//!
//! Every agent runs over a fresh memory seeded with the messages produced
//! by the agents before it, consumes the next queued input and appends its
//! exchange to the shared message log.

use super::engine::{Workflow, WorkflowOutput};
use super::step::Transition;
use crate::adk::agent::{AgentInput, AgentSource};
use crate::adk::context::Run;
use crate::adk::emitter::Emitter;
use crate::adk::error::{BoxError, WorkflowError};
use crate::adk::memory::{Memory, UnconstrainedMemory};
use crate::adk::model::Message;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Shared state of an agent workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentWorkflowState {
    /// Inputs not yet consumed, in agent order
    #[serde(default)]
    #[schemars(with = "Vec<Value>")]
    pub inputs: Vec<AgentInput>,
    /// Messages produced so far, visible to every later agent
    #[serde(default)]
    #[schemars(with = "Vec<Value>")]
    pub new_messages: Vec<Message>,
    pub final_answer: Option<String>,
}

/// Sequential chain of agents
pub struct AgentWorkflow {
    workflow: Workflow<AgentWorkflowState>,
}

impl AgentWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(name),
        }
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.workflow = self.workflow.with_emitter(emitter);
        self
    }

    pub fn name(&self) -> &str {
        self.workflow.name()
    }

    pub fn emitter(&self) -> &Emitter {
        self.workflow.emitter()
    }

    /// Underlying workflow, for inspection
    pub fn workflow(&self) -> &Workflow<AgentWorkflowState> {
        &self.workflow
    }

    /// Append an agent as the next step.
    ///
    /// The step is named after the agent; unnamed factories and repeated
    /// names get a positional suffix.
    pub fn add_agent(&mut self, source: impl Into<AgentSource>) -> Result<&mut Self, WorkflowError> {
        let source = source.into();
        let name = self.unique_step_name(source.name());

        let factory = source.into_factory();
        self.workflow.add_step(name, move |state: &mut AgentWorkflowState, ctx| {
            let factory = factory.clone();
            Box::pin(async move {
                let memory: Arc<dyn Memory> = Arc::new(UnconstrainedMemory::with_messages(state.new_messages.clone()));
                let agent = factory(memory)?;
                let input = if state.inputs.is_empty() {
                    AgentInput::default()
                } else {
                    state.inputs.remove(0)
                };

                log::info!("Agent step {} running {}", ctx.step(), agent.name());
                let output = agent.run(input.clone()).with_parent(&ctx).await?;

                if let Some(prompt) = input.non_empty_prompt() {
                    state.new_messages.push(Message::user(prompt));
                }
                state.final_answer = Some(output.result.content());
                state.new_messages.push(output.result);
                Ok::<_, BoxError>(Transition::Next)
            })
        })?;
        Ok(self)
    }

    /// The agent's own name if free, else the first free `{base}_{n}`
    /// counting up from the step's position
    fn unique_step_name(&self, name: Option<&str>) -> String {
        let taken = self.workflow.step_names();
        let is_free = |candidate: &str| !taken.iter().any(|n| n == candidate);
        if let Some(name) = name.filter(|name| is_free(*name)) {
            return name.to_string();
        }

        let base = name.unwrap_or("agent");
        (taken.len() + 1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| is_free(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Run every agent in order, feeding them `inputs` one by one
    pub fn run(&self, inputs: Vec<AgentInput>) -> Run<'_, WorkflowOutput<AgentWorkflowState>> {
        self.workflow.run(AgentWorkflowState {
            inputs,
            ..Default::default()
        })
    }
}
