//! The worker loop.
//!
//! One job at a time, through the stages in [`Stage`] order:
//!
//! ```text
//! Wait -> Parse -> Default -> NotifyStart -> Generate -> Compose
//!      -> NotifyResult -> Cleanup -> Ack -> Wait
//! ```
//!
//! A failing stage produces a [`JobFailure`]; the loop looks up the
//! failure's [`ErrorKind`] in the [`ErrorPolicyTable`] and either carries
//! on, leaves the message for redelivery, dead-letters it, or stops.
//!
//! Shutdown is observed while waiting for a message (including backoff
//! sleeps) and right before generation. A job that already started
//! generating is finished.

use std::sync::Arc;
use std::time::Duration;

use sparkle_cloud::{Delivery, JobQueue, ReceiptHandle};
use sparkle_comfyui::{generate_batch, GenerationEngine, ModelHandle};
use sparkle_core::backoff::{next_delay, BackoffConfig};
use sparkle_core::compose::compose;
use sparkle_core::error::ParseError;
use sparkle_core::job::apply_defaults;
use sparkle_core::message::parse_job;
use sparkle_core::policy::{ErrorKind, ErrorPolicy, ErrorPolicyTable};
use sparkle_events::Notifier;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::stage::{JobFailure, Stage};

/// Acknowledge attempts before a message is left to redelivery.
pub const DEFAULT_ACK_ATTEMPTS: u32 = 3;

/// Tunables for [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Long-poll wait per receive call.
    pub wait_time: Duration,
    pub policies: ErrorPolicyTable,
    /// Delays between retried queue calls.
    pub backoff: BackoffConfig,
    pub ack_attempts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(20),
            policies: ErrorPolicyTable::default(),
            backoff: BackoffConfig::default(),
            ack_attempts: DEFAULT_ACK_ATTEMPTS,
        }
    }
}

/// The worker stopped because a failure's policy is [`ErrorPolicy::Fatal`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Fatal: {0}")]
    Fatal(#[from] JobFailure),
}

/// How a job that did not fail left the pipeline.
#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    /// Shutdown was requested before generation started.
    Released,
}

/// Drives jobs from the queue through generation to the requester.
pub struct Orchestrator {
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn GenerationEngine>,
    notifier: Arc<dyn Notifier>,
    model: ModelHandle,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        engine: Arc<dyn GenerationEngine>,
        notifier: Arc<dyn Notifier>,
        model: ModelHandle,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            queue,
            engine,
            notifier,
            model,
            settings,
        }
    }

    /// Process jobs until `cancel` fires or a fatal failure occurs.
    ///
    /// Returns `Ok(())` on cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        tracing::info!(
            model = %self.model.name,
            wait_secs = self.settings.wait_time.as_secs(),
            "Worker loop started",
        );

        let mut delay = self.settings.backoff.initial_delay;
        loop {
            tracing::debug!(stage = %Stage::Wait, "Waiting for next message");
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, worker loop stopping");
                    return Ok(());
                }
                result = self.queue.poll(self.settings.wait_time) => result,
            };

            let delivery = match polled {
                Ok(Some(delivery)) => {
                    delay = self.settings.backoff.initial_delay;
                    delivery
                }
                Ok(None) => continue,
                Err(e) => {
                    if self.queue_errors_are_fatal() {
                        return Err(JobFailure::new(Stage::Wait, e).into());
                    }
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed, retrying after backoff",
                    );
                    if !sleep_or_cancel(delay, &cancel).await {
                        tracing::info!("Shutdown requested during backoff, worker loop stopping");
                        return Ok(());
                    }
                    delay = next_delay(delay, &self.settings.backoff);
                    continue;
                }
            };

            let span = tracing::info_span!("job", message_id = %delivery.message_id);
            self.handle(delivery, &cancel).instrument(span).await?;
        }
    }

    /// Run one delivery to completion and settle its message.
    async fn handle(&self, delivery: Delivery, cancel: &CancellationToken) -> Result<(), WorkerError> {
        match self.process(&delivery, cancel).await {
            Ok(JobOutcome::Completed) => self.acknowledge(&delivery.receipt).await,
            Ok(JobOutcome::Released) => {
                match self.queue.release(&delivery.receipt).await {
                    Ok(()) => {
                        tracing::info!("Shutdown requested before generation, message released");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to release message; it reappears after its visibility timeout");
                    }
                }
                Ok(())
            }
            Err(failure) => self.settle_failure(delivery, failure).await,
        }
    }

    async fn process(
        &self,
        delivery: &Delivery,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobFailure> {
        let job = parse_job(&delivery.body).map_err(|e| JobFailure::new(Stage::Parse, e))?;
        let Some(to) = job.interaction.clone() else {
            return Err(JobFailure::new(Stage::Parse, ParseError::Unaddressable));
        };

        let job = apply_defaults(job);
        tracing::info!(
            stage = %Stage::Default,
            seed = job.seed,
            steps = job.steps,
            sampler = %job.sampler,
            "Job accepted",
        );

        if let Err(e) = self.notifier.notify_processing(&to, &job).await {
            self.tolerate(JobFailure::new(Stage::NotifyStart, e).with_job(&job))?;
        }

        if cancel.is_cancelled() {
            return Ok(JobOutcome::Released);
        }

        let batch = generate_batch(self.engine.as_ref(), &self.model, &job)
            .await
            .map_err(|e| JobFailure::new(Stage::Generate, e).with_job(&job))?;
        tracing::info!(stage = %Stage::Generate, seeds = ?batch.seeds(), "Batch generated");

        let artifact = compose(&batch.into_images())
            .map_err(|e| JobFailure::new(Stage::Compose, e).with_job(&job))?;

        let summary = job.summary();
        if let Err(e) = self.notifier.deliver_result(&to, &job, &summary, &artifact).await {
            self.tolerate(JobFailure::new(Stage::NotifyResult, e).with_job(&job))?;
        }

        let artifact_id = artifact.id;
        drop(artifact);
        tracing::debug!(stage = %Stage::Cleanup, %artifact_id, "Result artifact discarded");

        Ok(JobOutcome::Completed)
    }

    /// Continue past a failure whose policy is [`ErrorPolicy::SkipAndLog`];
    /// hand any other failure back to the caller.
    fn tolerate(&self, failure: JobFailure) -> Result<(), JobFailure> {
        if self.settings.policies.policy_for(failure.kind()) == ErrorPolicy::SkipAndLog {
            tracing::warn!(
                stage = %failure.stage,
                kind = %failure.kind(),
                error = %failure.error,
                "Continuing past failure",
            );
            Ok(())
        } else {
            Err(failure)
        }
    }

    /// Apply the policy table to a failed job.
    async fn settle_failure(&self, delivery: Delivery, failure: JobFailure) -> Result<(), WorkerError> {
        let policy = self.settings.policies.policy_for(failure.kind());
        tracing::warn!(
            stage = %failure.stage,
            kind = %failure.kind(),
            %policy,
            error = %failure.error,
            "Job failed",
        );

        match policy {
            ErrorPolicy::Fatal => Err(WorkerError::Fatal(failure)),
            ErrorPolicy::Retry => {
                tracing::info!("Message left for redelivery");
                Ok(())
            }
            ErrorPolicy::DeadLetter => {
                self.notify_dropped(&failure).await;
                if let Err(e) = self.queue.dead_letter(delivery).await {
                    if self.queue_errors_are_fatal() {
                        return Err(JobFailure::new(Stage::Ack, e).into());
                    }
                    tracing::warn!(error = %e, "Dead-lettering failed; message will be redelivered");
                }
                Ok(())
            }
            ErrorPolicy::SkipAndLog => {
                self.notify_dropped(&failure).await;
                self.acknowledge(&delivery.receipt).await
            }
        }
    }

    /// Tell the requester their job was dropped, if they can be reached.
    async fn notify_dropped(&self, failure: &JobFailure) {
        if failure.kind() == ErrorKind::Notification {
            return;
        }
        let Some(job) = failure.job.as_deref() else {
            return;
        };
        let Some(to) = &job.interaction else {
            return;
        };
        if let Err(e) = self
            .notifier
            .notify_failure(to, job, failure.user_reason())
            .await
        {
            tracing::warn!(error = %e, "Failed to send failure notice");
        }
    }

    /// Delete the message, retrying with backoff.
    ///
    /// After [`OrchestratorSettings::ack_attempts`] failures the message is
    /// left alone and will be redelivered.
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), WorkerError> {
        let attempts = self.settings.ack_attempts.max(1);
        let mut delay = self.settings.backoff.initial_delay;

        for attempt in 1..=attempts {
            match self.queue.acknowledge(receipt).await {
                Ok(()) => {
                    tracing::info!(stage = %Stage::Ack, "Message acknowledged");
                    return Ok(());
                }
                Err(e) => {
                    if self.queue_errors_are_fatal() {
                        return Err(JobFailure::new(Stage::Ack, e).into());
                    }
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "Acknowledge failed");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = next_delay(delay, &self.settings.backoff);
                    }
                }
            }
        }

        tracing::warn!("Giving up on acknowledge; message will be redelivered");
        Ok(())
    }

    /// Queue errors have no message to settle, so `Fatal` is the only
    /// policy that changes what happens.
    fn queue_errors_are_fatal(&self) -> bool {
        self.settings.policies.policy_for(ErrorKind::QueueTransient) == ErrorPolicy::Fatal
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
