//! Amazon SQS implementation of [`JobQueue`].

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use chrono::{DateTime, Utc};

use crate::queue::{Delivery, JobQueue, QueueError, ReceiptHandle};

/// SQS caps a single long-poll at 20 seconds.
pub const MAX_WAIT_SECONDS: u64 = 20;

/// Job queue backed by an SQS queue, with an optional dead-letter queue.
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    dead_letter_url: Option<String>,
}

impl SqsQueue {
    pub fn new(
        client: aws_sdk_sqs::Client,
        queue_url: impl Into<String>,
        dead_letter_url: Option<String>,
    ) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            dead_letter_url,
        }
    }

    /// Build a client from shared AWS configuration.
    pub fn from_config(
        sdk_config: &aws_config::SdkConfig,
        queue_url: impl Into<String>,
        dead_letter_url: Option<String>,
    ) -> Self {
        Self::new(aws_sdk_sqs::Client::new(sdk_config), queue_url, dead_letter_url)
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn service_error<E>(operation: &'static str, err: E) -> QueueError
where
    E: std::error::Error,
{
    QueueError::Service {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

/// Convert a received SQS message into a [`Delivery`].
///
/// A missing body becomes an empty one (it will fail to parse and be
/// dead-lettered); a missing receipt handle makes the message unsettleable
/// and is an error.
pub fn delivery_from_message(message: Message) -> Result<Delivery, QueueError> {
    let receipt = message
        .receipt_handle
        .ok_or(QueueError::MalformedMessage("receipt handle"))?;

    let sent_at = message
        .attributes
        .as_ref()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
        .and_then(|millis| millis.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    Ok(Delivery {
        message_id: message.message_id.unwrap_or_default(),
        body: message.body.unwrap_or_default(),
        receipt: ReceiptHandle::new(receipt),
        sent_at,
    })
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn poll(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let wait_seconds = wait.as_secs().min(MAX_WAIT_SECONDS) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_seconds)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| service_error("ReceiveMessage", e))?;

        let Some(message) = output.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };
        let delivery = delivery_from_message(message)?;

        let queued_ms = delivery
            .sent_at
            .map(|sent| (Utc::now() - sent).num_milliseconds());
        tracing::info!(
            message_id = %delivery.message_id,
            queued_ms = ?queued_ms,
            "Received message",
        );
        Ok(Some(delivery))
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt.as_str())
            .send()
            .await
            .map_err(|e| service_error("DeleteMessage", e))?;
        Ok(())
    }

    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt.as_str())
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| service_error("ChangeMessageVisibility", e))?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: Delivery) -> Result<(), QueueError> {
        match &self.dead_letter_url {
            // SQS rejects empty bodies; there is nothing worth keeping anyway.
            Some(dlq) if !delivery.body.is_empty() => {
                self.client
                    .send_message()
                    .queue_url(dlq)
                    .message_body(&delivery.body)
                    .send()
                    .await
                    .map_err(|e| service_error("SendMessage", e))?;
                tracing::info!(message_id = %delivery.message_id, "Forwarded message to dead-letter queue");
            }
            _ => {
                tracing::warn!(message_id = %delivery.message_id, "Discarding message without dead-letter copy");
            }
        }
        self.acknowledge(&delivery.receipt).await
    }
}
