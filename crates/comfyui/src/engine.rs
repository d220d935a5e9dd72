//! The generation seam the worker depends on, and batch generation on top
//! of it.

use async_trait::async_trait;
use image::RgbImage;
use sparkle_core::compose::BATCH_SIZE;
use sparkle_core::job::DefaultedJob;
use sparkle_core::types::Seed;

use crate::api::ComfyUIApiError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading a model or generating an image.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The engine's HTTP API failed.
    #[error("Engine API error: {0}")]
    Api(#[from] ComfyUIApiError),

    /// The engine ran the workflow and reported an error.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// No output appeared within the generation timeout.
    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    /// The engine's response did not have the expected shape.
    #[error("Malformed engine response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The returned image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The workflow finished without producing an image.
    #[error("Workflow produced no output image")]
    NoOutput,

    /// The checkpoint is not available and could not be fetched.
    #[error("Model {0} is not available")]
    ModelUnavailable(String),

    /// HTTP failure outside the engine API (client setup, model download).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `seed + i` does not fit in a seed.
    #[error("Seed {0} leaves no room for a batch of {BATCH_SIZE}")]
    SeedOverflow(Seed),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A loaded model, created once at startup and reused for every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    /// Checkpoint name as the engine knows it.
    pub name: String,
}

/// Parameters for generating exactly one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub sampler: String,
    pub steps: u32,
    pub seed: Seed,
}

impl GenerationRequest {
    /// Request for `job` with its seed replaced by `seed`.
    pub fn for_seed(job: &DefaultedJob, seed: Seed) -> Self {
        Self {
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            sampler: job.sampler.clone(),
            steps: job.steps,
            seed,
        }
    }
}

/// Produces images from text prompts.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Make the named model ready for use.
    async fn load_model(&self, name: &str) -> Result<ModelHandle, GenerationError>;

    /// Generate one image.
    async fn generate(
        &self,
        model: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<RgbImage, GenerationError>;
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// One image together with the seed that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub seed: Seed,
    pub image: RgbImage,
}

/// The images for one job; position `i` was generated from `seed + i`.
#[derive(Debug, Clone)]
pub struct GenerationBatch {
    pub images: Vec<GeneratedImage>,
}

impl GenerationBatch {
    pub fn seeds(&self) -> Vec<Seed> {
        self.images.iter().map(|g| g.seed).collect()
    }

    pub fn into_images(self) -> Vec<RgbImage> {
        self.images.into_iter().map(|g| g.image).collect()
    }
}

/// Generate [`BATCH_SIZE`] images for `job`, one call at a time, using seeds
/// `job.seed, job.seed + 1, ...`.
///
/// The first failing call aborts the batch.
pub async fn generate_batch(
    engine: &dyn GenerationEngine,
    model: &ModelHandle,
    job: &DefaultedJob,
) -> Result<GenerationBatch, GenerationError> {
    let mut images = Vec::with_capacity(BATCH_SIZE);
    for offset in 0..BATCH_SIZE as u64 {
        let seed = job
            .seed
            .checked_add(offset)
            .ok_or(GenerationError::SeedOverflow(job.seed))?;
        let request = GenerationRequest::for_seed(job, seed);

        tracing::debug!(seed, index = offset, "Generating image");
        let image = engine.generate(model, &request).await?;
        images.push(GeneratedImage { seed, image });
    }
    Ok(GenerationBatch { images })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use image::Rgb;
    use sparkle_core::job::{apply_defaults, Job};

    use super::*;

    /// Records every request and paints each image with its seed.
    #[derive(Default)]
    struct RecordingEngine {
        requests: Mutex<Vec<GenerationRequest>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl GenerationEngine for RecordingEngine {
        async fn load_model(&self, name: &str) -> Result<ModelHandle, GenerationError> {
            Ok(ModelHandle { name: name.into() })
        }

        async fn generate(
            &self,
            _model: &ModelHandle,
            request: &GenerationRequest,
        ) -> Result<RgbImage, GenerationError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            if self.fail_on_call == Some(requests.len()) {
                return Err(GenerationError::Execution("boom".into()));
            }
            let shade = (request.seed % 256) as u8;
            Ok(RgbImage::from_pixel(1, 1, Rgb([shade, 0, 0])))
        }
    }

    fn job(seed: Seed) -> DefaultedJob {
        apply_defaults(Job {
            interaction: None,
            prompt: "a fox".into(),
            negative_prompt: Some("blurry".into()),
            seed: Some(seed),
            steps: Some(20),
            sampler: Some("k_lms".into()),
        })
    }

    fn model() -> ModelHandle {
        ModelHandle { name: "m.ckpt".into() }
    }

    #[tokio::test]
    async fn batch_uses_consecutive_seeds_in_order() {
        let engine = RecordingEngine::default();
        let batch = generate_batch(&engine, &model(), &job(42)).await.unwrap();

        assert_eq!(batch.seeds(), vec![42, 43, 44, 45]);
        let shades: Vec<u8> = batch.into_images().iter().map(|i| i.get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![42, 43, 44, 45]);

        let requests = engine.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        for request in requests.iter() {
            assert_eq!(request.prompt, "a fox");
            assert_eq!(request.negative_prompt.as_deref(), Some("blurry"));
            assert_eq!(request.steps, 20);
            assert_eq!(request.sampler, "k_lms");
        }
    }

    #[tokio::test]
    async fn failure_stops_the_batch() {
        let engine = RecordingEngine {
            fail_on_call: Some(2),
            ..Default::default()
        };
        let result = generate_batch(&engine, &model(), &job(7)).await;

        assert_matches!(result, Err(GenerationError::Execution(_)));
        assert_eq!(engine.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seed_near_max_overflows() {
        let engine = RecordingEngine::default();
        let result = generate_batch(&engine, &model(), &job(u64::MAX - 1)).await;

        assert_matches!(result, Err(GenerationError::SeedOverflow(s)) if s == u64::MAX - 1);
        assert_eq!(engine.requests.lock().unwrap().len(), 2);
    }
}
