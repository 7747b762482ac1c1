// SPDX-License-Identifier: MIT

//! Agent memory - the ordered message log an agent reads from and appends to

use crate::adk::model::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ordered, appendable sequence of messages
#[async_trait]
pub trait Memory: Send + Sync {
    /// Snapshot of the messages in insertion order
    async fn messages(&self) -> Vec<Message>;

    async fn add(&self, message: Message);

    async fn add_many(&self, messages: Vec<Message>) {
        for message in messages {
            self.add(message).await;
        }
    }

    /// Remove a message by id; returns false if it was not present
    async fn delete(&self, id: Uuid) -> bool;

    async fn reset(&self);

    async fn is_empty(&self) -> bool {
        self.messages().await.is_empty()
    }
}

/// Serializable state of an [`UnconstrainedMemory`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub messages: Vec<Message>,
}

/// Memory without any retention policy
#[derive(Debug, Default)]
pub struct UnconstrainedMemory {
    messages: RwLock<Vec<Message>>,
}

impl UnconstrainedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            messages: self.messages.read().await.clone(),
        }
    }

    pub fn restore(snapshot: MemorySnapshot) -> Self {
        Self::with_messages(snapshot.messages)
    }
}

#[async_trait]
impl Memory for UnconstrainedMemory {
    async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    async fn add(&self, message: Message) {
        self.messages.write().await.push(message);
    }

    async fn add_many(&self, messages: Vec<Message>) {
        self.messages.write().await.extend(messages);
    }

    async fn delete(&self, id: Uuid) -> bool {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        messages.len() != before
    }

    async fn reset(&self) {
        self.messages.write().await.clear();
    }

    async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

/// View that ignores every write to the wrapped memory
pub struct ReadOnlyMemory {
    source: Arc<dyn Memory>,
}

impl ReadOnlyMemory {
    pub fn new(source: Arc<dyn Memory>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Memory for ReadOnlyMemory {
    async fn messages(&self) -> Vec<Message> {
        self.source.messages().await
    }

    async fn add(&self, _message: Message) {
        log::debug!("ignoring write to read-only memory");
    }

    async fn delete(&self, _id: Uuid) -> bool {
        false
    }

    async fn reset(&self) {}
}
