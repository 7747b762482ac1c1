// SPDX-License-Identifier: MIT

//! Workflow loader - YAML agent workflow definitions
//!
//! ```yaml
//! name: research
//! description: "Find and summarise"
//! config:
//!   max_iterations: 5
//! agents:
//!   - name: researcher
//!     kind: react
//!     instructions: "Search before answering."
//!     tools: [search]
//!   - name: writer
//!     kind: tool_calling
//! ```

use super::agent_workflow::AgentWorkflow;
use super::registry::ToolRegistry;
use crate::adk::agent::{AgentKind, AgentSpec};
use crate::adk::config::ExecutionConfig;
use crate::adk::error::FrameworkError;
use crate::adk::model::ChatModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Top-level agent workflow definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentWorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Limits applied to agents without their own `config`
    #[serde(default)]
    pub config: Option<ExecutionConfig>,
    pub agents: Vec<AgentDefinition>,
}

/// Agent definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentDefinition {
    pub name: String,
    /// Executor: `react` (default) or `tool_calling`
    #[serde(default)]
    pub kind: AgentKind,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Names resolved through the [`ToolRegistry`]
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub config: Option<ExecutionConfig>,
}

impl AgentWorkflowDefinition {
    /// Build the workflow, resolving tool names through `registry`.
    ///
    /// Every agent uses `model`.
    pub async fn build(&self, model: Arc<dyn ChatModel>, registry: &ToolRegistry) -> Result<AgentWorkflow, FrameworkError> {
        let defaults = self.config.unwrap_or_default();
        let mut workflow = AgentWorkflow::new(self.name.clone());

        for def in &self.agents {
            let mut spec = AgentSpec::new(def.name.clone(), model.clone());
            spec.kind = def.kind;
            spec.instructions = def.instructions.clone();
            spec.tools = registry.resolve(&def.tools).await?;
            spec.config = def.config.unwrap_or(defaults);
            workflow.add_agent(spec)?;
        }

        log::info!("Loaded workflow {} with {} agent(s)", self.name, self.agents.len());
        Ok(workflow)
    }
}

/// Loads agent workflow definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a definition from a YAML file
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<AgentWorkflowDefinition, FrameworkError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<AgentWorkflowDefinition, FrameworkError> {
        let def: AgentWorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
