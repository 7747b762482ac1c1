// SPDX-License-Identifier: MIT

//! Bounded retry counter

use crate::adk::error::FrameworkError;
use serde::{Deserialize, Serialize};

/// Counts retries within one scope and fails once the budget is spent.
///
/// With `max = n`, the first `n` calls to [`RetryCounter::consume`] succeed
/// and every later call returns [`FrameworkError::RetryExhausted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryCounter {
    kind: String,
    max: usize,
    used: usize,
}

impl RetryCounter {
    pub fn new(kind: impl Into<String>, max: usize) -> Self {
        Self {
            kind: kind.into(),
            max,
            used: 0,
        }
    }

    /// Spend one unit for `cause`.
    ///
    /// Hands `cause` back while budget remains; once exhausted it becomes
    /// the source of the returned [`FrameworkError::RetryExhausted`].
    pub fn consume(&mut self, cause: FrameworkError) -> Result<FrameworkError, FrameworkError> {
        self.used += 1;
        if self.used > self.max {
            log::warn!("{} exhausted after {} retries: {}", self.kind, self.max, cause);
            return Err(FrameworkError::RetryExhausted {
                kind: self.kind.clone(),
                limit: self.max,
                context: None,
                cause: Some(Box::new(cause)),
            });
        }
        log::debug!("{} {}/{}: {}", self.kind, self.used, self.max, cause);
        Ok(cause)
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.max.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }
}
