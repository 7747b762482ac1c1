// SPDX-License-Identifier: MIT

//! Run context - the execution envelope of one `run()` invocation
//!
//! Every agent or workflow run goes through [`Run`], which enters a
//! [`RunContext`]: a combined abort signal, a run-scoped child emitter and
//! error normalization. The lifecycle events `run.start`, then `run.success`
//! or `run.error`, and finally `run.finish` are emitted on the owner's
//! namespace for each run.

use crate::adk::emitter::{ChildOptions, EmittedEvent, Emitter, Event, Matcher, TraceMeta};
use crate::adk::error::{BoxError, EmitterError, ErrorKind, FrameworkError};
use crate::adk::signal::{AbortController, AbortSignal};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identity shared by every run of one component instance
#[derive(Debug)]
pub struct RunOwner {
    name: String,
    kind: ErrorKind,
    emitter: Emitter,
    running: Arc<AtomicBool>,
}

impl RunOwner {
    pub fn new(name: impl Into<String>, kind: ErrorKind, emitter: Emitter) -> Self {
        Self {
            name: name.into(),
            kind,
            emitter,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Emitter every run of this owner reports through
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the running flag when the run scope is left, whatever the outcome
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scope handed to the body of a run
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    parent_run_id: Option<Uuid>,
    trace_id: String,
    signal: AbortSignal,
    controller: AbortController,
    emitter: Emitter,
}

impl RunContext {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn parent_run_id(&self) -> Option<Uuid> {
        self.parent_run_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Combined signal: caller, parent run, timeout and internal aborts
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Cancel this run from the inside
    pub fn abort(&self, reason: impl Into<String>) {
        self.controller.abort(reason);
    }

    /// Same run, reporting through a different emitter
    pub fn with_emitter(&self, emitter: Emitter) -> Self {
        Self {
            emitter,
            ..self.clone()
        }
    }
}

impl AsRef<RunContext> for RunContext {
    fn as_ref(&self) -> &RunContext {
        self
    }
}

/// Caller supplied options for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub signal: Option<AbortSignal>,
    pub timeout: Option<Duration>,
    /// Enclosing run whose signal is inherited and whose emitter receives
    /// this run's events
    pub parent: Option<RunContext>,
}

type Observer<'a> = Box<dyn FnOnce(&Emitter) + Send + 'a>;
type Body<'a, T> = Box<dyn FnOnce(RunContext) -> BoxFuture<'a, Result<T, FrameworkError>> + Send + 'a>;

/// A pending run.
///
/// Nothing happens until the value is awaited, so listeners attached with
/// [`Run::on`] or [`Run::observe`] see every event of the run.
#[must_use = "a run does nothing until awaited"]
pub struct Run<'a, T> {
    owner: &'a RunOwner,
    options: RunOptions,
    observers: Vec<Observer<'a>>,
    body: Body<'a, T>,
}

impl<'a, T: Send + 'a> Run<'a, T> {
    pub fn new<F>(owner: &'a RunOwner, body: F) -> Self
    where
        F: FnOnce(RunContext) -> BoxFuture<'a, Result<T, FrameworkError>> + Send + 'a,
    {
        Self {
            owner,
            options: RunOptions::default(),
            observers: Vec::new(),
            body: Box::new(body),
        }
    }

    /// Access the run emitter before the run starts
    pub fn observe<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Emitter) + Send + 'a,
    {
        self.observers.push(Box::new(f));
        self
    }

    /// Register a blocking listener on the run emitter
    pub fn on<M, F, Fut>(self, matcher: M, listener: F) -> Self
    where
        M: Into<Matcher>,
        F: Fn(Arc<EmittedEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let matcher = matcher.into();
        self.observe(move |emitter| {
            emitter.on(matcher, listener);
        })
    }

    /// Cancel the run when `signal` fires
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.options.signal = Some(match self.options.signal.take() {
            Some(existing) => existing.and(&signal),
            None => signal,
        });
        self
    }

    /// Abort the run after `duration`
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.options.timeout = Some(duration);
        self
    }

    /// Run as a child of an enclosing run
    pub fn with_parent<P: AsRef<RunContext>>(mut self, parent: &P) -> Self {
        self.options.parent = Some(parent.as_ref().clone());
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

impl<'a, T: Send + 'a> IntoFuture for Run<'a, T> {
    type Output = Result<T, FrameworkError>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        enter(self.owner, self.options, self.observers, self.body).boxed()
    }
}

async fn enter<'a, T: Send + 'a>(
    owner: &'a RunOwner,
    options: RunOptions,
    observers: Vec<Observer<'a>>,
    body: Body<'a, T>,
) -> Result<T, FrameworkError> {
    if owner.running.swap(true, Ordering::SeqCst) {
        return Err(FrameworkError::AlreadyRunning {
            owner: owner.name.clone(),
        });
    }
    let _guard = RunningGuard(owner.running.clone());

    let controller = AbortController::new();
    let mut signals = vec![controller.signal()];
    if let Some(signal) = &options.signal {
        signals.push(signal.clone());
    }
    if let Some(parent) = &options.parent {
        signals.push(parent.signal.clone());
    }
    if let Some(duration) = options.timeout {
        signals.push(AbortSignal::timeout(duration));
    }
    let signal = AbortSignal::any(signals.iter());

    let run_id = Uuid::new_v4();
    let parent_run_id = options.parent.as_ref().map(|p| p.run_id);
    let trace_id = options
        .parent
        .as_ref()
        .map(|p| p.trace_id.clone())
        .unwrap_or_else(|| run_id.to_string());

    let mut context = Map::new();
    context.insert("run_id".to_string(), Value::String(run_id.to_string()));
    let emitter = owner.emitter.child(ChildOptions {
        creator: Some(owner.name.clone()),
        context,
        trace: Some(TraceMeta {
            id: trace_id.clone(),
            run_id: run_id.to_string(),
            parent_run_id: parent_run_id.map(|id| id.to_string()),
        }),
        own_scope: true,
        ..Default::default()
    });
    let pipe = options.parent.as_ref().map(|p| emitter.pipe(&p.emitter));
    for observe in observers {
        observe(&emitter);
    }

    let ctx = RunContext {
        run_id,
        parent_run_id,
        trace_id,
        signal: signal.clone(),
        controller: controller.clone(),
        emitter: emitter.clone(),
    };
    let lifecycle = emitter.child(ChildOptions::namespace(["run"]));
    let owner_name = owner.name.clone();

    log::debug!("run {} of '{}' started", run_id, owner_name);
    let mut result = match lifecycle
        .emit("start", Event::RunStart { owner: owner_name.clone() })
        .await
    {
        Ok(()) => signal.guard(body(ctx)).await,
        Err(err) => Err(err.into()),
    };

    if let Err(err) = &result {
        if err.is_fatal() {
            controller.abort(err.to_string());
        }
    }

    let outcome = match &result {
        Ok(_) => {
            lifecycle
                .emit("success", Event::RunSuccess { owner: owner_name.clone() })
                .await
        }
        Err(err) => {
            log::warn!("run {} of '{}' failed: {}", run_id, owner_name, err);
            lifecycle
                .emit(
                    "error",
                    Event::RunError {
                        owner: owner_name.clone(),
                        error: err.snapshot(),
                    },
                )
                .await
        }
    };
    merge_listener_failure(&mut result, outcome);

    let late = emitter.settle().await;
    if !late.is_empty() {
        merge_listener_failure(
            &mut result,
            Err(EmitterError::Listeners {
                path: emitter.namespace().join("."),
                errors: late,
            }),
        );
    }

    let finish = lifecycle
        .emit("finish", Event::RunFinish { owner: owner_name.clone() })
        .await;
    merge_listener_failure(&mut result, finish);

    if let Some(pipe) = pipe {
        pipe.unpipe();
    }
    log::debug!("run {} of '{}' finished", run_id, owner_name);
    result
}

/// Listener failures fail an otherwise successful run; an existing failure wins
fn merge_listener_failure<T>(result: &mut Result<T, FrameworkError>, outcome: Result<(), EmitterError>) {
    if let Err(err) = outcome {
        if result.is_ok() {
            *result = Err(err.into());
        } else {
            log::warn!("listener failure after run error: {}", err);
        }
    }
}
