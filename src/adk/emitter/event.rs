// SPDX-License-Identifier: MIT

//! Event payloads and metadata

use crate::adk::agent::{IterationMeta, IterationState};
use crate::adk::error::ErrorSnapshot;
use crate::adk::model::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Payload of an emitted event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        owner: String,
    },
    RunSuccess {
        owner: String,
    },
    RunError {
        owner: String,
        error: ErrorSnapshot,
    },
    /// Terminal lifecycle event, emitted exactly once per run
    RunFinish {
        owner: String,
    },

    StepStart {
        step: String,
        state: Value,
    },
    StepSuccess {
        step: String,
        next: Option<String>,
        state: Value,
    },
    StepError {
        step: String,
        error: ErrorSnapshot,
    },

    IterationStart {
        meta: IterationMeta,
    },
    /// A line was appended to the currently open field
    PartialUpdate {
        meta: IterationMeta,
        field: String,
        delta: String,
        value: String,
    },
    /// A field closed with its final value
    Update {
        meta: IterationMeta,
        field: String,
        value: Value,
    },
    ToolStart {
        meta: IterationMeta,
        tool: String,
        input: Value,
    },
    ToolSuccess {
        meta: IterationMeta,
        tool: String,
        input: Value,
        output: String,
    },
    ToolError {
        meta: IterationMeta,
        tool: String,
        input: Value,
        error: ErrorSnapshot,
    },
    Retry {
        meta: IterationMeta,
        attempt: usize,
        error: ErrorSnapshot,
    },
    AgentError {
        meta: IterationMeta,
        error: ErrorSnapshot,
    },
    AgentSuccess {
        meta: IterationMeta,
        data: Message,
        state: IterationState,
    },

    /// Application-defined payload
    Custom(Value),
}

/// Trace identifiers shared by every event of one run tree
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TraceMeta {
    pub id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
}

/// Metadata recorded alongside every payload
#[derive(Debug, Clone, Serialize)]
pub struct EventMeta {
    pub id: Uuid,
    pub name: String,
    /// Dotted path: emitter namespace followed by the event name
    pub path: String,
    pub namespace: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub context: Map<String, Value>,
    pub group_id: Option<String>,
    pub trace: Option<TraceMeta>,
}

/// An event as delivered to listeners
#[derive(Debug, Clone, Serialize)]
pub struct EmittedEvent {
    pub meta: EventMeta,
    pub payload: Event,
}

impl EmittedEvent {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn path(&self) -> &str {
        &self.meta.path
    }
}
