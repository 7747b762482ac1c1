// SPDX-License-Identifier: MIT

//! Steps and transitions
//!
//! A step receives the workflow state by mutable reference and returns a
//! [`Transition`] telling the engine what runs next.

use crate::adk::context::RunContext;
use crate::adk::emitter::Emitter;
use crate::adk::error::BoxError;
use crate::adk::schema::Schema;
use crate::adk::signal::AbortSignal;
use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds every workflow state satisfies
pub trait WorkflowState: Serialize + DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static {}

impl<T> WorkflowState for T where T: Serialize + DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static {}

/// What the engine runs after a step
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Transition {
    /// The next registered step; ends the run after the last one
    #[default]
    Next,
    /// Jump to a named step
    Goto(String),
    /// Run the same step again
    Repeat,
    /// Jump back to the first step, keeping the state
    Start,
    /// The previously registered step
    Prev,
    End,
}

impl Transition {
    pub fn goto(step: impl Into<String>) -> Self {
        Transition::Goto(step.into())
    }
}

impl From<()> for Transition {
    fn from(_: ()) -> Self {
        Transition::Next
    }
}

/// Execution context handed to a step
#[derive(Debug, Clone)]
pub struct StepContext {
    step: String,
    run: RunContext,
}

impl StepContext {
    pub(crate) fn new(step: impl Into<String>, run: RunContext) -> Self {
        Self { step: step.into(), run }
    }

    /// Name of the running step
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn signal(&self) -> &AbortSignal {
        self.run.signal()
    }

    /// Emitter scoped to this step
    pub fn emitter(&self) -> &Emitter {
        self.run.emitter()
    }
}

impl AsRef<RunContext> for StepContext {
    fn as_ref(&self) -> &RunContext {
        &self.run
    }
}

/// A unit of work in a workflow
#[async_trait]
pub trait Step<S: Send + 'static>: Send + Sync {
    async fn handle(&self, state: &mut S, ctx: &StepContext) -> Result<Transition, BoxError>;
}

/// Step backed by a closure
pub(crate) struct FnStep<F>(pub(crate) F);

#[async_trait]
impl<S, F> Step<S> for FnStep<F>
where
    S: Send + 'static,
    F: for<'a> Fn(&'a mut S, StepContext) -> BoxFuture<'a, Result<Transition, BoxError>> + Send + Sync,
{
    async fn handle(&self, state: &mut S, ctx: &StepContext) -> Result<Transition, BoxError> {
        (self.0)(state, ctx.clone()).await
    }
}

/// Per-step schemas checked on entry and exit
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub input_schema: Option<Schema>,
    pub output_schema: Option<Schema>,
}
