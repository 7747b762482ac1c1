// SPDX-License-Identifier: MIT

pub mod agent_workflow;
pub mod engine;
pub mod loader;
pub mod registry;
pub mod step;

pub use agent_workflow::{AgentWorkflow, AgentWorkflowState};
pub use engine::{StepRecord, Workflow, WorkflowOutput, DEFAULT_MAX_STEPS};
pub use loader::{AgentDefinition, AgentWorkflowDefinition, WorkflowLoader};
pub use registry::ToolRegistry;
pub use step::{Step, StepContext, StepOptions, Transition, WorkflowState};
