//! Pipeline stages and per-job failures.

use std::fmt;

use sparkle_cloud::QueueError;
use sparkle_comfyui::GenerationError;
use sparkle_core::error::{CompositionError, ParseError};
use sparkle_core::job::DefaultedJob;
use sparkle_core::policy::ErrorKind;
use sparkle_events::NotificationError;

/// Where a job is in its life on this worker.
///
/// Every job runs the stages in declaration order; the loop returns to
/// `Wait` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Wait,
    Parse,
    Default,
    NotifyStart,
    Generate,
    Compose,
    NotifyResult,
    Cleanup,
    Ack,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Parse => "parse",
            Self::Default => "default",
            Self::NotifyStart => "notify_start",
            Self::Generate => "generate",
            Self::Compose => "compose",
            Self::NotifyResult => "notify_result",
            Self::Cleanup => "cleanup",
            Self::Ack => "ack",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any error a stage can produce.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Queue(_) => ErrorKind::QueueTransient,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Generation(_) => ErrorKind::Generation,
            Self::Composition(_) => ErrorKind::Composition,
            Self::Notification(_) => ErrorKind::Notification,
        }
    }
}

/// A stage failed. Carries the defaulted job once one exists so the
/// requester can be told.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error during {stage}: {error}", kind = .error.kind())]
pub struct JobFailure {
    pub stage: Stage,
    pub error: JobError,
    pub job: Option<Box<DefaultedJob>>,
}

impl JobFailure {
    pub fn new(stage: Stage, error: impl Into<JobError>) -> Self {
        Self {
            stage,
            error: error.into(),
            job: None,
        }
    }

    pub fn with_job(mut self, job: &DefaultedJob) -> Self {
        self.job = Some(Box::new(job.clone()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Short reason suitable for showing to the requester.
    pub fn user_reason(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Generation => "image generation failed",
            ErrorKind::Composition => "the images could not be assembled",
            ErrorKind::Parse => "the request was malformed",
            ErrorKind::QueueTransient | ErrorKind::Notification => "an internal error occurred",
        }
    }
}
