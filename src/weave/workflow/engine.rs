// SPDX-License-Identifier: MIT

//! Workflow engine
//!
//! Steps run one at a time in a trampoline loop over the current step
//! name, so `Repeat`/`Start` cycles never grow the call stack. The state is
//! validated against the workflow schema before the first step and after
//! every step.

use super::step::{FnStep, Step, StepContext, StepOptions, Transition, WorkflowState};
use crate::adk::context::{Run, RunContext, RunOwner};
use crate::adk::emitter::{ChildOptions, Emitter, Event};
use crate::adk::error::{BoxError, ErrorKind, FrameworkError, WorkflowError};
use crate::adk::schema::Schema;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Default ceiling on step executions per run
pub const DEFAULT_MAX_STEPS: usize = 10_000;

struct RegisteredStep<S> {
    step: Arc<dyn Step<S>>,
    options: StepOptions,
}

/// One executed step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub name: String,
    /// Step that ran next, `None` when the run ended
    pub next: Option<String>,
}

/// Result of a workflow run
#[derive(Debug, Clone)]
pub struct WorkflowOutput<S> {
    pub state: S,
    pub steps: Vec<StepRecord>,
}

/// Named steps over a typed state
pub struct Workflow<S: WorkflowState> {
    name: String,
    schema: Schema,
    /// Registration order, used to resolve `Next`/`Prev`/`Start`
    order: Vec<String>,
    steps: HashMap<String, RegisteredStep<S>>,
    max_steps: usize,
    owner: RunOwner,
}

impl<S: WorkflowState> Workflow<S> {
    /// Create a workflow whose schema is derived from `S`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            owner: RunOwner::new(name.clone(), ErrorKind::Workflow, Emitter::new(["workflow"], name.clone())),
            name,
            schema: Schema::from_type::<S>(),
            order: Vec::new(),
            steps: HashMap::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.owner = RunOwner::new(self.name.clone(), ErrorKind::Workflow, emitter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn emitter(&self) -> &Emitter {
        self.owner.emitter()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Step names in registration order
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub fn start_step(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    /// Register a closure step.
    ///
    /// ```ignore
    /// workflow.add_step("double", |state: &mut Counter, _ctx| {
    ///     Box::pin(async move {
    ///         state.value *= 2;
    ///         Ok(Transition::Next)
    ///     })
    /// })?;
    /// ```
    pub fn add_step<F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self, WorkflowError>
    where
        F: for<'a> Fn(&'a mut S, StepContext) -> BoxFuture<'a, Result<Transition, BoxError>> + Send + Sync + 'static,
    {
        self.add_step_with(name, FnStep(handler), StepOptions::default())
    }

    /// Register any [`Step`], nested workflows included
    pub fn add_step_with<T>(&mut self, name: impl Into<String>, step: T, options: StepOptions) -> Result<&mut Self, WorkflowError>
    where
        T: Step<S> + 'static,
    {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(WorkflowError::DuplicateStep(name));
        }
        log::debug!("Workflow {} registered step {}", self.name, name);
        self.order.push(name.clone());
        self.steps.insert(
            name,
            RegisteredStep {
                step: Arc::new(step),
                options,
            },
        );
        Ok(self)
    }

    /// Remove a step. Returns false if no step had that name.
    pub fn del_step(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.steps.remove(name).is_some()
    }

    /// Prepare a run over `state`
    pub fn run(&self, state: S) -> Run<'_, WorkflowOutput<S>> {
        Run::new(&self.owner, move |ctx| self.execute(state, ctx).boxed())
    }

    async fn execute(&self, state: S, ctx: RunContext) -> Result<WorkflowOutput<S>, FrameworkError> {
        let mut state = validate(&self.schema, &state)?;
        let mut current = self.start_step().ok_or(WorkflowError::NoSteps)?.to_string();
        let mut records = Vec::new();
        let emitter = ctx.emitter().clone();

        loop {
            ctx.signal().throw_if_aborted()?;
            if records.len() >= self.max_steps {
                return Err(WorkflowError::StepLimitExceeded { limit: self.max_steps }.into());
            }
            let entry = self
                .steps
                .get(&current)
                .ok_or_else(|| WorkflowError::UnknownStep(current.clone()))?;

            log::info!("Workflow {} step {}", self.name, current);
            emitter
                .emit(
                    "start",
                    Event::StepStart {
                        step: current.clone(),
                        state: serde_json::to_value(&state)?,
                    },
                )
                .await?;

            let next = match self.run_step(entry, &current, &mut state, &ctx).await {
                Ok(next) => next,
                Err(err) => {
                    log::error!("Workflow {} step {} failed: {}", self.name, current, err);
                    emitter
                        .emit(
                            "error",
                            Event::StepError {
                                step: current.clone(),
                                error: err.snapshot(),
                            },
                        )
                        .await?;
                    return Err(err);
                }
            };
            emitter
                .emit(
                    "success",
                    Event::StepSuccess {
                        step: current.clone(),
                        next: next.clone(),
                        state: serde_json::to_value(&state)?,
                    },
                )
                .await?;
            records.push(StepRecord {
                name: current,
                next: next.clone(),
            });

            match next {
                Some(next) => current = next,
                None => break,
            }
        }

        log::info!("Workflow {} finished after {} step(s)", self.name, records.len());
        Ok(WorkflowOutput { state, steps: records })
    }

    /// Validate, run the handler, validate again and resolve the next step
    async fn run_step(
        &self,
        entry: &RegisteredStep<S>,
        current: &str,
        state: &mut S,
        ctx: &RunContext,
    ) -> Result<Option<String>, FrameworkError> {
        if let Some(schema) = &entry.options.input_schema {
            *state = validate(schema, state)?;
        }

        let mut step_context = Map::new();
        step_context.insert("step".to_string(), Value::String(current.to_string()));
        let step_emitter = ctx.emitter().child(ChildOptions {
            namespace: vec![current.to_string()],
            context: step_context,
            ..Default::default()
        });
        let step_ctx = StepContext::new(current.to_string(), ctx.with_emitter(step_emitter));

        let transition = ctx
            .signal()
            .guard(async { Ok::<_, FrameworkError>(entry.step.handle(&mut *state, &step_ctx).await) })
            .await?
            .map_err(|err| FrameworkError::ensure(err, ErrorKind::Workflow))?;

        *state = validate(&self.schema, state)?;
        if let Some(schema) = &entry.options.output_schema {
            *state = validate(schema, state)?;
        }
        Ok(self.resolve(current, transition)?)
    }

    /// Name of the step a transition leads to, `None` to end the run
    fn resolve(&self, current: &str, transition: Transition) -> Result<Option<String>, WorkflowError> {
        let index = self
            .order
            .iter()
            .position(|n| n == current)
            .ok_or_else(|| WorkflowError::UnknownStep(current.to_string()))?;

        let next = match transition {
            Transition::Next => self.order.get(index + 1).cloned(),
            Transition::Goto(name) => {
                if !self.steps.contains_key(&name) {
                    return Err(WorkflowError::UnknownStep(name));
                }
                Some(name)
            }
            Transition::Repeat => Some(current.to_string()),
            Transition::Start => self.order.first().cloned(),
            Transition::Prev => match index.checked_sub(1) {
                Some(prev) => Some(self.order[prev].clone()),
                None => return Err(WorkflowError::NoPreviousStep(current.to_string())),
            },
            Transition::End => None,
        };
        Ok(next)
    }
}

/// Runs a nested workflow as one step of its parent
#[async_trait]
impl<S: WorkflowState> Step<S> for Workflow<S> {
    async fn handle(&self, state: &mut S, ctx: &StepContext) -> Result<Transition, BoxError> {
        let output = self.run(state.clone()).with_parent(ctx).await?;
        *state = output.state;
        Ok(Transition::Next)
    }
}

/// Validate through the state's JSON form, applying schema defaults
fn validate<S: WorkflowState>(schema: &Schema, state: &S) -> Result<S, FrameworkError> {
    let value = schema.validate(serde_json::to_value(state)?)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::emitter::EmittedEvent;
    use crate::adk::error::ValidationError;
    use crate::adk::schema::{FieldDef, FieldType};
    use crate::adk::signal::AbortController;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
    struct Counter {
        value: i64,
        #[serde(default)]
        trail: Vec<String>,
    }

    fn push(name: &'static str, transition: Transition) -> impl for<'a> Fn(&'a mut Counter, StepContext) -> BoxFuture<'a, Result<Transition, BoxError>> + Send + Sync + 'static {
        move |state: &mut Counter, _ctx: StepContext| {
            let transition = transition.clone();
            Box::pin(async move {
                state.trail.push(name.to_string());
                Ok(transition)
            })
        }
    }

    /// Run and collect the names of `start`, `success` and `error` step events
    async fn run_recorded(workflow: &Workflow<Counter>) -> (Result<WorkflowOutput<Counter>, FrameworkError>, Vec<String>) {
        let names = Arc::new(Mutex::new(Vec::new()));
        let mut run = workflow.run(Counter::default());
        for name in ["start", "success", "error"] {
            let sink = names.clone();
            run = run.on(name, move |event: Arc<EmittedEvent>| {
                sink.lock().unwrap().push(event.name().to_string());
                async { Ok::<(), BoxError>(()) }
            });
        }
        let result = run.await;
        let names = names.lock().unwrap().clone();
        (result, names)
    }

    fn order(output: &WorkflowOutput<Counter>) -> Vec<&str> {
        output.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_next_follows_registration_order() {
        let mut workflow = Workflow::<Counter>::new("ordered");
        workflow
            .add_step("a", push("a", Transition::Next))
            .unwrap()
            .add_step("b", push("b", Transition::Next))
            .unwrap()
            .add_step("c", push("c", Transition::Next))
            .unwrap();

        let output = workflow.run(Counter::default()).await.unwrap();
        assert_eq!(output.state.trail, vec!["a", "b", "c"]);
        assert_eq!(output.steps.last().unwrap().next, None);
    }

    #[tokio::test]
    async fn test_goto_end_and_prev() {
        let mut workflow = Workflow::<Counter>::new("jumps");
        workflow
            .add_step("a", push("a", Transition::goto("c")))
            .unwrap()
            .add_step("b", push("b", Transition::End))
            .unwrap()
            .add_step("c", |state: &mut Counter, _ctx| {
                Box::pin(async move {
                    state.trail.push("c".to_string());
                    state.value += 1;
                    Ok(if state.value == 1 { Transition::Prev } else { Transition::End })
                })
            })
            .unwrap();

        let output = workflow.run(Counter::default()).await.unwrap();
        assert_eq!(order(&output), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_start_keeps_state() {
        let mut workflow = Workflow::<Counter>::new("restart");
        workflow
            .add_step("inc", |state: &mut Counter, _ctx| {
                Box::pin(async move {
                    state.value += 1;
                    Ok(Transition::Next)
                })
            })
            .unwrap()
            .add_step("check", |state: &mut Counter, _ctx| {
                Box::pin(async move { Ok(if state.value < 3 { Transition::Start } else { Transition::End }) })
            })
            .unwrap();

        let output = workflow.run(Counter::default()).await.unwrap();
        assert_eq!(output.state.value, 3);
        assert_eq!(output.steps.len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_goto_and_prev_on_first_step() {
        let mut workflow = Workflow::<Counter>::new("broken");
        workflow.add_step("a", push("a", Transition::goto("missing"))).unwrap();
        let err = workflow.run(Counter::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Workflow(WorkflowError::UnknownStep(ref s)) if s == "missing"));

        let mut workflow = Workflow::<Counter>::new("broken");
        workflow.add_step("a", push("a", Transition::Prev)).unwrap();
        let err = workflow.run(Counter::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Workflow(WorkflowError::NoPreviousStep(_))));
    }

    #[tokio::test]
    async fn test_unknown_goto_emits_step_error() {
        let mut workflow = Workflow::<Counter>::new("lost");
        workflow.add_step("a", push("a", Transition::goto("nope"))).unwrap();

        let (result, names) = run_recorded(&workflow).await;
        assert!(matches!(result, Err(FrameworkError::Workflow(WorkflowError::UnknownStep(ref s))) if s == "nope"));
        assert_eq!(names, vec!["start", "error"]);
    }

    #[tokio::test]
    async fn test_invalid_state_after_step_emits_step_error() {
        let schema = Schema::from_json_schema(&json!({
            "type": "object",
            "properties": {"value": {"type": "integer", "maximum": 0}}
        }))
        .unwrap();
        let mut workflow = Workflow::<Counter>::new("bounded").with_schema(schema);
        workflow
            .add_step("inc", |state: &mut Counter, _ctx| {
                Box::pin(async move {
                    state.value += 1;
                    Ok(Transition::Next)
                })
            })
            .unwrap();

        let (result, names) = run_recorded(&workflow).await;
        assert!(matches!(result, Err(FrameworkError::Validation(ValidationError::Constraint { .. }))));
        assert_eq!(names, vec!["start", "error"]);
    }

    #[tokio::test]
    async fn test_duplicate_and_deleted_steps() {
        let mut workflow = Workflow::<Counter>::new("edit");
        workflow.add_step("a", push("a", Transition::Next)).unwrap();
        assert!(matches!(
            workflow.add_step("a", push("a", Transition::Next)),
            Err(WorkflowError::DuplicateStep(_))
        ));

        workflow.add_step("b", push("b", Transition::Next)).unwrap();
        assert!(workflow.del_step("a"));
        assert!(!workflow.del_step("a"));
        assert_eq!(workflow.start_step(), Some("b"));

        let empty = Workflow::<Counter>::new("empty");
        let err = empty.run(Counter::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Workflow(WorkflowError::NoSteps)));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let mut workflow = Workflow::<Counter>::new("forever").with_max_steps(5);
        workflow.add_step("spin", push("spin", Transition::Repeat)).unwrap();

        let err = workflow.run(Counter::default()).await.unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::Workflow(WorkflowError::StepLimitExceeded { limit: 5 })
        ));
    }

    #[tokio::test]
    async fn test_handler_error_propagates_with_event() {
        let mut workflow = Workflow::<Counter>::new("failing");
        workflow
            .add_step("boom", |_state: &mut Counter, _ctx| Box::pin(async move { Err::<Transition, BoxError>("kaput".into()) }))
            .unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let err = workflow
            .run(Counter::default())
            .on("error", move |event: Arc<EmittedEvent>| {
                if let Event::StepError { step, .. } = &event.payload {
                    sink.lock().unwrap().push(step.clone());
                }
                async { Ok::<(), BoxError>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Workflow error: kaput");
        assert_eq!(*errors.lock().unwrap(), vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn test_schema_rejects_invalid_state() {
        let schema = Schema::new().field("value", FieldDef::new(FieldType::String).required());
        let mut workflow = Workflow::<Counter>::new("typed").with_schema(schema);
        workflow.add_step("a", push("a", Transition::Next)).unwrap();

        let err = workflow.run(Counter::default()).await.unwrap_err();
        assert!(matches!(err, FrameworkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_step_output_schema() {
        let options = StepOptions {
            output_schema: Some(Schema::new().field("value", FieldDef::new(FieldType::Integer).required())),
            ..Default::default()
        };
        let mut workflow = Workflow::<Counter>::new("typed");
        workflow
            .add_step_with("a", FnStep(push("a", Transition::Next)), options)
            .unwrap();

        let output = workflow.run(Counter::default()).await.unwrap();
        assert_eq!(output.state.trail, vec!["a"]);
        assert_eq!(validate(workflow.schema(), &output.state).unwrap(), output.state);
    }

    #[tokio::test]
    async fn test_abort_stops_between_steps() {
        let controller = AbortController::new();
        let stopper = controller.clone();
        let mut workflow = Workflow::<Counter>::new("abortable");
        workflow
            .add_step("first", move |state: &mut Counter, _ctx| {
                stopper.abort("enough");
                Box::pin(async move {
                    state.value = 1;
                    Ok(Transition::Next)
                })
            })
            .unwrap()
            .add_step("second", push("second", Transition::Next))
            .unwrap();

        let err = workflow
            .run(Counter::default())
            .signal(controller.signal())
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_step_events_carry_state() {
        let mut workflow = Workflow::<Counter>::new("observed");
        workflow.add_step("a", push("a", Transition::Next)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        workflow.emitter().on("success", move |event: Arc<EmittedEvent>| {
            if let Event::StepSuccess { state, .. } = &event.payload {
                sink.lock().unwrap().push(state.clone());
            }
            async { Ok::<(), BoxError>(()) }
        });

        workflow.run(Counter::default()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!({"value": 0, "trail": ["a"]})]);
    }
}
