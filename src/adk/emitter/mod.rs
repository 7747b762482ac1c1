// SPDX-License-Identifier: MIT

//! Event emitter - hierarchical publish/subscribe hub
//!
//! Emitters form a tree: events emitted on a child are also delivered to
//! listeners of every ancestor, so a `*.*` listener on a parent observes the
//! whole subtree. `pipe()` forwards everything an emitter sees into another
//! emitter until the returned handle is unpiped.
//!
//! Blocking listeners are awaited in registration order before `emit`
//! returns. Non-blocking listeners are spawned; their outcome is collected
//! by [`Emitter::settle`]. Listener failures never stop delivery to the
//! remaining listeners, they are aggregated into the returned error.

mod event;
mod matcher;

pub use event::{EmittedEvent, Event, EventMeta, TraceMeta};
pub use matcher::{Matcher, MetaPredicate};

use crate::adk::error::{BoxError, EmitterError};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Boxed listener callback
pub type Callback =
    Arc<dyn Fn(Arc<EmittedEvent>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Paths currently being dispatched to blocking listeners on this task
    static EMIT_CHAIN: Vec<String>;
}

/// How a listener participates in emission
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    /// Awaited before `emit` returns (default) or spawned
    pub blocking: bool,
    /// Removed after the first delivery
    pub once: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            once: false,
        }
    }
}

impl ListenerOptions {
    pub fn non_blocking() -> Self {
        Self {
            blocking: false,
            once: false,
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// Handle returned by listener registration, used with [`Emitter::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Listener {
    id: u64,
    matcher: Matcher,
    callback: Callback,
    options: ListenerOptions,
    fired: AtomicBool,
}

/// Options for [`Emitter::child`]
#[derive(Debug, Clone, Default)]
pub struct ChildOptions {
    pub namespace: Vec<String>,
    pub creator: Option<String>,
    pub context: Map<String, Value>,
    pub group_id: Option<String>,
    pub trace: Option<TraceMeta>,
    /// Track non-blocking deliveries of the child's events apart from the
    /// parent's, so [`Emitter::settle`] on the child only awaits its own
    pub own_scope: bool,
}

impl ChildOptions {
    pub fn namespace<I, T>(namespace: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            namespace: namespace.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

struct Inner {
    namespace: Vec<String>,
    creator: String,
    context: Map<String, Value>,
    group_id: Option<String>,
    trace: Option<TraceMeta>,
    parent: Option<Emitter>,
    listeners: Mutex<Vec<Arc<Listener>>>,
    /// Spawned non-blocking deliveries of events emitted within this scope
    pending: Arc<Mutex<Vec<JoinHandle<Result<(), String>>>>>,
}

/// Typed publish/subscribe hub
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<Inner>,
}

impl Emitter {
    /// Create a root emitter
    pub fn root() -> Self {
        Self::new(Vec::<String>::new(), "root")
    }

    /// Create a root emitter with a namespace
    pub fn new<I, T>(namespace: I, creator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                namespace: namespace.into_iter().map(Into::into).collect(),
                creator: creator.into(),
                context: Map::new(),
                group_id: None,
                trace: None,
                parent: None,
                listeners: Mutex::new(Vec::new()),
                pending: Arc::new(Mutex::new(Vec::new())),
            }),
        }
    }

    /// Create a scoped sub-emitter whose events bubble up to this one
    pub fn child(&self, options: ChildOptions) -> Emitter {
        let mut namespace = self.inner.namespace.clone();
        namespace.extend(options.namespace);

        let mut context = self.inner.context.clone();
        context.extend(options.context);

        Emitter {
            inner: Arc::new(Inner {
                namespace,
                creator: options.creator.unwrap_or_else(|| self.inner.creator.clone()),
                context,
                group_id: options.group_id.or_else(|| self.inner.group_id.clone()),
                trace: options.trace.or_else(|| self.inner.trace.clone()),
                parent: Some(self.clone()),
                listeners: Mutex::new(Vec::new()),
                pending: if options.own_scope {
                    Arc::new(Mutex::new(Vec::new()))
                } else {
                    self.inner.pending.clone()
                },
            }),
        }
    }

    pub fn namespace(&self) -> &[String] {
        &self.inner.namespace
    }

    pub fn trace(&self) -> Option<&TraceMeta> {
        self.inner.trace.as_ref()
    }

    /// Register a blocking listener
    pub fn on<M, F, Fut>(&self, matcher: M, callback: F) -> Subscription
    where
        M: Into<Matcher>,
        F: Fn(Arc<EmittedEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_with(matcher, ListenerOptions::default(), callback)
    }

    /// Register a listener with explicit options
    pub fn on_with<M, F, Fut>(&self, matcher: M, options: ListenerOptions, callback: F) -> Subscription
    where
        M: Into<Matcher>,
        F: Fn(Arc<EmittedEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |event| callback(event).boxed());
        self.register(matcher.into(), options, callback)
    }

    /// Register a listener selected by a predicate over event metadata
    pub fn match_with<P, F, Fut>(&self, predicate: P, callback: F) -> Subscription
    where
        P: Fn(&EventMeta) -> bool + Send + Sync + 'static,
        F: Fn(Arc<EmittedEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on(Matcher::predicate(predicate), callback)
    }

    fn register(&self, matcher: Matcher, options: ListenerOptions, callback: Callback) -> Subscription {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            id,
            matcher,
            callback,
            options,
            fired: AtomicBool::new(false),
        });
        self.lock_listeners().push(listener);
        Subscription(id)
    }

    /// Remove a listener. Returns false if it was not registered here.
    pub fn off(&self, subscription: Subscription) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|l| l.id != subscription.0);
        listeners.len() != before
    }

    /// Forward every event this emitter sees into `target`
    pub fn pipe(&self, target: &Emitter) -> PipeHandle {
        let target = target.clone();
        let callback: Callback = Arc::new(move |event| {
            let target = target.clone();
            async move { target.dispatch(event).await.map_err(BoxError::from) }.boxed()
        });
        let subscription = self.register(Matcher::All, ListenerOptions::default(), callback);
        PipeHandle {
            source: self.clone(),
            subscription,
        }
    }

    /// Emit an event and await all blocking listeners
    pub async fn emit(&self, name: &str, payload: Event) -> Result<(), EmitterError> {
        let meta = self.create_meta(name);
        let active = EMIT_CHAIN.try_with(|chain| chain.clone()).unwrap_or_default();
        if active.contains(&meta.path) {
            return Err(EmitterError::Reentrant { path: meta.path });
        }

        log::trace!("emit {}", meta.path);
        self.dispatch(Arc::new(EmittedEvent { meta, payload })).await
    }

    fn create_meta(&self, name: &str) -> EventMeta {
        let mut path = self.inner.namespace.clone();
        path.push(name.to_string());
        EventMeta {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path: path.join("."),
            namespace: self.inner.namespace.clone(),
            created_at: Utc::now(),
            creator: self.inner.creator.clone(),
            context: self.inner.context.clone(),
            group_id: self.inner.group_id.clone(),
            trace: self.inner.trace.clone(),
        }
    }

    /// Deliver an event to matching listeners here and on every ancestor
    fn dispatch(&self, event: Arc<EmittedEvent>) -> BoxFuture<'static, Result<(), EmitterError>> {
        let targets = self.collect_listeners(&event.meta);
        let pending = self.inner.pending.clone();

        async move {
            let mut chain = EMIT_CHAIN.try_with(|chain| chain.clone()).unwrap_or_default();
            chain.push(event.meta.path.clone());

            let mut errors = Vec::new();
            for listener in targets {
                let fut = (listener.callback)(event.clone());
                if listener.options.blocking {
                    if let Err(err) = EMIT_CHAIN.scope(chain.clone(), fut).await {
                        errors.push(err.to_string());
                    }
                } else {
                    let handle = tokio::spawn(async move { fut.await.map_err(|e| e.to_string()) });
                    pending.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
                }
            }

            if errors.is_empty() {
                Ok(())
            } else {
                log::warn!("{} listener(s) failed for {}", errors.len(), event.meta.path);
                Err(EmitterError::Listeners {
                    path: event.meta.path.clone(),
                    errors,
                })
            }
        }
        .boxed()
    }

    fn collect_listeners(&self, meta: &EventMeta) -> Vec<Arc<Listener>> {
        let mut targets = Vec::new();
        let mut current = Some(self.clone());
        while let Some(emitter) = current {
            let mut listeners = emitter.lock_listeners();
            for listener in listeners.iter() {
                if !listener.matcher.matches(&emitter.inner.namespace, meta) {
                    continue;
                }
                if listener.options.once && listener.fired.swap(true, Ordering::SeqCst) {
                    continue;
                }
                targets.push(listener.clone());
            }
            listeners.retain(|l| !(l.options.once && l.fired.load(Ordering::SeqCst)));
            drop(listeners);
            current = emitter.inner.parent.clone();
        }
        targets
    }

    /// Await the non-blocking deliveries scheduled in this emitter's scope
    /// and return their failures
    pub async fn settle(&self) -> Vec<String> {
        let handles: Vec<_> = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };

        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(join_err.to_string()),
            }
        }
        errors
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Listener>>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("namespace", &self.inner.namespace)
            .field("creator", &self.inner.creator)
            .finish()
    }
}

/// Active forwarding created by [`Emitter::pipe`]
#[derive(Debug)]
pub struct PipeHandle {
    source: Emitter,
    subscription: Subscription,
}

impl PipeHandle {
    /// Stop forwarding
    pub fn unpipe(self) -> bool {
        self.source.off(self.subscription)
    }
}
