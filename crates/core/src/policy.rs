//! Error kinds and the policy table the worker loop applies to them.
//!
//! | Kind             | Default        |
//! |------------------|----------------|
//! | `QueueTransient` | `Retry`        |
//! | `Parse`          | `DeadLetter`   |
//! | `Generation`     | `Retry`        |
//! | `Composition`    | `DeadLetter`   |
//! | `Notification`   | `SkipAndLog`   |
//!
//! What each policy means depends on where the error happened: a `Retry`
//! on a queue call sleeps and calls again, while a `Retry` on a job leaves
//! the message unacknowledged so the queue redelivers it after its
//! visibility timeout.

use std::fmt;

/// Classification of everything that can go wrong while handling a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network/timeout talking to the queue service.
    QueueTransient,
    /// Malformed message body or missing required field.
    Parse,
    /// The generation engine failed.
    Generation,
    /// Wrong image count or dimensions for the result grid.
    Composition,
    /// The chat webhook rejected or never answered an edit.
    Notification,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueTransient => "queue_transient",
            Self::Parse => "parse",
            Self::Generation => "generation",
            Self::Composition => "composition",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the worker does when an error of a given kind occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Try again later (backoff for queue calls, redelivery for jobs).
    Retry,
    /// Log and carry on; a failed job's message is acknowledged.
    SkipAndLog,
    /// Forward the message to the dead-letter queue and acknowledge it.
    DeadLetter,
    /// Stop the worker.
    Fatal,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::SkipAndLog => "skip_and_log",
            Self::DeadLetter => "dead_letter",
            Self::Fatal => "fatal",
        }
    }

    /// Parse a policy name as written in configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "retry" => Some(Self::Retry),
            "skip_and_log" | "skip" => Some(Self::SkipAndLog),
            "dead_letter" => Some(Self::DeadLetter),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One policy per [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicyTable {
    pub queue_transient: ErrorPolicy,
    pub parse: ErrorPolicy,
    pub generation: ErrorPolicy,
    pub composition: ErrorPolicy,
    pub notification: ErrorPolicy,
}

impl Default for ErrorPolicyTable {
    fn default() -> Self {
        Self {
            queue_transient: ErrorPolicy::Retry,
            parse: ErrorPolicy::DeadLetter,
            generation: ErrorPolicy::Retry,
            composition: ErrorPolicy::DeadLetter,
            notification: ErrorPolicy::SkipAndLog,
        }
    }
}

impl ErrorPolicyTable {
    pub fn policy_for(&self, kind: ErrorKind) -> ErrorPolicy {
        match kind {
            ErrorKind::QueueTransient => self.queue_transient,
            ErrorKind::Parse => self.parse,
            ErrorKind::Generation => self.generation,
            ErrorKind::Composition => self.composition,
            ErrorKind::Notification => self.notification,
        }
    }

    /// Replace the policy for one kind, builder style.
    pub fn with(mut self, kind: ErrorKind, policy: ErrorPolicy) -> Self {
        let slot = match kind {
            ErrorKind::QueueTransient => &mut self.queue_transient,
            ErrorKind::Parse => &mut self.parse,
            ErrorKind::Generation => &mut self.generation,
            ErrorKind::Composition => &mut self.composition,
            ErrorKind::Notification => &mut self.notification,
        };
        *slot = policy;
        self
    }
}
