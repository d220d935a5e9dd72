//! Generation job records, defaulting, and the human-readable summary
//! shown to the requester.

use rand::Rng;

use crate::types::Seed;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Sampling steps used when the request does not specify any.
pub const DEFAULT_STEPS: u32 = 16;
/// Sampler used when the request does not specify one.
pub const DEFAULT_SAMPLER: &str = "k_euler_a";
/// Upper bound (inclusive) of randomly drawn default seeds.
pub const MAX_DEFAULT_SEED: Seed = 99_999;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Address of the one chat message a job reports back to.
///
/// Every notification for a job edits this same message in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRef {
    pub application_id: String,
    pub interaction_token: String,
}

/// A generation request exactly as it arrived on the queue.
///
/// `interaction` is `None` when the producer sent neither `applicationId`
/// nor `interactionToken`; such a job parses but cannot be reported on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub interaction: Option<InteractionRef>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: Option<Seed>,
    pub steps: Option<u32>,
    pub sampler: Option<String>,
}

/// A job whose generation parameters are all concrete.
///
/// Only [`apply_defaults`] and [`apply_defaults_with`] produce this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultedJob {
    pub interaction: Option<InteractionRef>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub seed: Seed,
    pub steps: u32,
    pub sampler: String,
}

// ---------------------------------------------------------------------------
// Defaulting
// ---------------------------------------------------------------------------

/// Fill unset `seed`, `steps`, and `sampler` using the thread-local RNG.
pub fn apply_defaults(job: Job) -> DefaultedJob {
    apply_defaults_with(job, &mut rand::rng())
}

/// Fill unset `seed`, `steps`, and `sampler`, drawing the seed from `rng`.
///
/// Present values are never overwritten. The seed is uniform over
/// `0..=MAX_DEFAULT_SEED`.
pub fn apply_defaults_with<R: Rng + ?Sized>(job: Job, rng: &mut R) -> DefaultedJob {
    let seed = job
        .seed
        .unwrap_or_else(|| rng.random_range(0..=MAX_DEFAULT_SEED));

    DefaultedJob {
        interaction: job.interaction,
        prompt: job.prompt,
        negative_prompt: job.negative_prompt,
        seed,
        steps: job.steps.unwrap_or(DEFAULT_STEPS),
        sampler: job.sampler.unwrap_or_else(|| DEFAULT_SAMPLER.to_string()),
    }
}

impl From<DefaultedJob> for Job {
    fn from(job: DefaultedJob) -> Self {
        Self {
            interaction: job.interaction,
            prompt: job.prompt,
            negative_prompt: job.negative_prompt,
            seed: Some(job.seed),
            steps: Some(job.steps),
            sampler: Some(job.sampler),
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

impl DefaultedJob {
    /// Multi-line parameter summary, one `\nLabel: value` line per field.
    ///
    /// The negative prompt line is omitted when the request had none.
    pub fn summary(&self) -> String {
        let mut out = format!("\nPrompt: {}", self.prompt);
        if let Some(negative) = &self.negative_prompt {
            out.push_str(&format!("\nNegative Prompt: {negative}"));
        }
        out.push_str(&format!("\nSeed: {}", self.seed));
        out.push_str(&format!("\nSteps: {}", self.steps));
        out.push_str(&format!("\nSampler: {}", self.sampler));
        out
    }
}
