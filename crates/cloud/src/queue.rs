//! Job queue abstraction.
//!
//! The worker only ever holds one message at a time. A [`Delivery`] owns
//! the message's [`ReceiptHandle`]; the handle cannot be cloned, so a
//! delivery is settled (acknowledged, released, or dead-lettered) through
//! exactly one owner.

use std::time::Duration;

use async_trait::async_trait;
use sparkle_core::types::Timestamp;

/// Opaque token identifying one received, not yet settled message.
#[derive(Debug, PartialEq, Eq)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One message taken off the queue.
#[derive(Debug)]
pub struct Delivery {
    pub message_id: String,
    /// Raw message body, parsed later by the worker.
    pub body: String,
    pub receipt: ReceiptHandle,
    /// When the producer enqueued the message, if the queue reported it.
    pub sent_at: Option<Timestamp>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue service rejected or failed a call.
    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    /// A received message lacked a field needed to settle it.
    #[error("Received message has no {0}")]
    MalformedMessage(&'static str),
}

/// At-least-once message queue holding generation jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-poll for at most one message, waiting up to `wait`.
    ///
    /// Returns `Ok(None)` when the wait elapsed with nothing to deliver.
    async fn poll(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Delete a processed message.
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Make a message visible to consumers again right away.
    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Move an unprocessable message out of the way: forward its body to the
    /// dead-letter queue (when one is configured) and delete it.
    async fn dead_letter(&self, delivery: Delivery) -> Result<(), QueueError>;
}
