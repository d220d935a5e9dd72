//! AWS integrations for the Sparkle worker.
//!
//! - [`queue`] -- the [`JobQueue`](queue::JobQueue) seam and the types of a
//!   dequeued message.
//! - [`sqs`] -- Amazon SQS implementation of that seam.
//! - [`secrets`] -- SSM Parameter Store lookups for model repository
//!   credentials.

pub mod queue;
pub mod secrets;
pub mod sqs;

pub use queue::{Delivery, JobQueue, QueueError, ReceiptHandle};
pub use secrets::{SecretError, SecretStore, SsmSecretStore};
pub use sqs::SqsQueue;

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Load shared AWS configuration for `region`.
///
/// Credentials come from the default provider chain (environment, profile,
/// container or instance role).
pub async fn load_aws_config(region: impl Into<String>) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.into()))
        .load()
        .await
}
