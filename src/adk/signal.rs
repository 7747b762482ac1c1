// SPDX-License-Identifier: MIT

//! Cancellation primitives
//!
//! An [`AbortController`] owns the right to cancel; any number of
//! [`AbortSignal`]s observe it. A signal may combine several sources and is
//! aborted as soon as any one of them fires. Timeouts are plain sources whose
//! controller is aborted by a timer task.

use crate::adk::error::FrameworkError;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation source
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Signal observing only this controller
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            sources: vec![self.tx.subscribe()],
        }
    }

    /// Abort with a reason. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of one or more cancellation sources
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    sources: Vec<watch::Receiver<Option<String>>>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    /// A signal that fires once `duration` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn timeout(duration: Duration) -> Self {
        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.abort(format!("timed out after {}ms", duration.as_millis()));
        });
        signal
    }

    /// Combine signals; the result fires when any of them fires
    pub fn any<'a>(signals: impl IntoIterator<Item = &'a AbortSignal>) -> Self {
        Self {
            sources: signals
                .into_iter()
                .flat_map(|s| s.sources.iter().cloned())
                .collect(),
        }
    }

    /// This signal combined with another
    pub fn and(&self, other: &AbortSignal) -> Self {
        Self::any([self, other])
    }

    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }

    /// Reason of the first source found aborted
    pub fn reason(&self) -> Option<String> {
        self.sources.iter().find_map(|rx| rx.borrow().clone())
    }

    /// Return an `Aborted` error if the signal has fired
    pub fn throw_if_aborted(&self) -> Result<(), FrameworkError> {
        match self.reason() {
            Some(reason) => Err(FrameworkError::aborted(reason)),
            None => Ok(()),
        }
    }

    /// Resolves with the abort reason once any source fires.
    ///
    /// Never resolves for a signal without sources, or whose controllers
    /// were all dropped without aborting.
    pub async fn cancelled(&self) -> String {
        if let Some(reason) = self.reason() {
            return reason;
        }
        if self.sources.is_empty() {
            return future::pending().await;
        }

        let waiters: Vec<BoxFuture<'static, String>> = self
            .sources
            .iter()
            .cloned()
            .map(|mut rx| {
                async move {
                    let reason = rx
                        .wait_for(|value| value.is_some())
                        .await
                        .ok()
                        .map(|value| value.clone().unwrap_or_default());
                    match reason {
                        Some(reason) => reason,
                        None => future::pending().await,
                    }
                }
                .boxed()
            })
            .collect();

        let (reason, _, _) = future::select_all(waiters).await;
        reason
    }

    /// Run `fut` unless the signal fires first
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, FrameworkError>
    where
        F: std::future::Future<Output = Result<T, FrameworkError>>,
    {
        self.throw_if_aborted()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(FrameworkError::aborted(reason)),
            res = fut => res,
        }
    }
}
