use async_trait::async_trait;
use sparkle_core::compose::ResultArtifact;
use sparkle_core::job::{DefaultedJob, InteractionRef};

/// Error type for notification failures.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Reports job progress back to the requester.
///
/// Every call addresses the same original message identified by `to`, so a
/// job produces exactly one visible message no matter how often it is
/// edited. Failures are returned, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the requester their job was picked up.
    async fn notify_processing(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
    ) -> Result<(), NotificationError>;

    /// Replace the message with the completion summary and attach the grid.
    async fn deliver_result(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
        summary: &str,
        artifact: &ResultArtifact,
    ) -> Result<(), NotificationError>;

    /// Tell the requester their job was dropped.
    async fn notify_failure(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
        reason: &str,
    ) -> Result<(), NotificationError>;
}
