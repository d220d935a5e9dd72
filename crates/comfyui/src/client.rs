//! [`GenerationEngine`] backed by a ComfyUI server.
//!
//! Each [`generate`](GenerationEngine::generate) call submits a one-image
//! txt2img workflow, polls the prompt history until the save node has
//! written its output, then downloads and decodes that image. The whole
//! call, including any request ComfyUI never answers, is bounded by
//! [`ComfyUIEngineConfig::generation_timeout`].

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbImage;

use crate::api::ComfyUIApi;
use crate::engine::{GenerationEngine, GenerationError, GenerationRequest, ModelHandle};
use crate::history::{prompt_state, PromptState};
use crate::model::{available_checkpoints, download_checkpoint, ModelRepository, CHECKPOINT_LOADER};
use crate::workflow::{build_txt2img, SAVE_NODE};

/// Default interval between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default upper bound for a single image.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);
/// Default output edge length in pixels.
pub const DEFAULT_IMAGE_SIZE: u32 = 512;

/// Connect timeout for every request to ComfyUI or the model repository.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on the `/interrupt` call sent after a generation times out.
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`ComfyUIEngine`].
#[derive(Debug, Clone)]
pub struct ComfyUIEngineConfig {
    /// Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// ComfyUI's checkpoint directory; downloads land here.
    pub checkpoint_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub poll_interval: Duration,
    pub generation_timeout: Duration,
    /// Source for a checkpoint ComfyUI does not have. `None` disables
    /// downloading.
    pub repository: Option<ModelRepository>,
}

impl ComfyUIEngineConfig {
    /// Config with default size and timings and no model repository.
    pub fn new(api_url: impl Into<String>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url: api_url.into(),
            checkpoint_dir: checkpoint_dir.into(),
            width: DEFAULT_IMAGE_SIZE,
            height: DEFAULT_IMAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            repository: None,
        }
    }
}

/// Generates images through a ComfyUI server's REST API.
pub struct ComfyUIEngine {
    api: ComfyUIApi,
    http: reqwest::Client,
    config: ComfyUIEngineConfig,
}

impl ComfyUIEngine {
    pub fn new(config: ComfyUIEngineConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let api = ComfyUIApi::with_client(http.clone(), config.api_url.clone());
        Ok(Self { api, http, config })
    }

    pub fn config(&self) -> &ComfyUIEngineConfig {
        &self.config
    }

    async fn has_checkpoint(&self, name: &str) -> Result<bool, GenerationError> {
        let info = self.api.object_info(CHECKPOINT_LOADER).await?;
        Ok(available_checkpoints(&info).iter().any(|c| c == name))
    }

    /// Submit the workflow and wait for its image. Unbounded; callers
    /// apply the generation timeout.
    async fn submit_and_wait(
        &self,
        model: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<RgbImage, GenerationError> {
        let workflow = build_txt2img(request, &model.name, self.config.width, self.config.height);
        let client_id = uuid::Uuid::new_v4().to_string();

        let submitted = self.api.submit_workflow(&workflow, &client_id).await?;
        if has_node_errors(&submitted.node_errors) {
            tracing::warn!(
                prompt_id = %submitted.prompt_id,
                node_errors = %submitted.node_errors,
                "ComfyUI reported node errors for submitted workflow",
            );
        }
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            seed = request.seed,
            "Workflow submitted",
        );

        self.wait_for_output(&submitted.prompt_id).await
    }

    /// Poll the history until `prompt_id` finishes.
    async fn wait_for_output(&self, prompt_id: &str) -> Result<RgbImage, GenerationError> {
        let started = Instant::now();
        loop {
            let history = self.api.get_history(prompt_id).await?;
            match prompt_state(&history, prompt_id, SAVE_NODE)? {
                PromptState::Completed(files) => {
                    let file = files.first().ok_or(GenerationError::NoOutput)?;
                    let bytes = self.api.view(file).await?;
                    let image = image::load_from_memory(&bytes)?.to_rgb8();
                    tracing::debug!(
                        prompt_id,
                        filename = %file.filename,
                        width = image.width(),
                        height = image.height(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Image ready",
                    );
                    return Ok(image);
                }
                PromptState::Failed(reason) => {
                    return Err(GenerationError::Execution(reason));
                }
                PromptState::Pending => {}
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl GenerationEngine for ComfyUIEngine {
    async fn load_model(&self, name: &str) -> Result<ModelHandle, GenerationError> {
        if self.has_checkpoint(name).await? {
            tracing::info!(model = name, "Model loaded");
            return Ok(ModelHandle { name: name.into() });
        }

        let Some(repository) = &self.config.repository else {
            return Err(GenerationError::ModelUnavailable(name.into()));
        };

        tracing::info!(model = name, "Model not found on engine, downloading");
        download_checkpoint(&self.http, repository, &self.config.checkpoint_dir, name).await?;

        if self.has_checkpoint(name).await? {
            tracing::info!(model = name, "Model downloaded and loaded");
            Ok(ModelHandle { name: name.into() })
        } else {
            Err(GenerationError::ModelUnavailable(name.into()))
        }
    }

    async fn generate(
        &self,
        model: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<RgbImage, GenerationError> {
        let limit = self.config.generation_timeout;
        match tokio::time::timeout(limit, self.submit_and_wait(model, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(seed = request.seed, timeout_ms = limit.as_millis() as u64, "Generation timed out");
                match tokio::time::timeout(INTERRUPT_TIMEOUT, self.api.interrupt()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to interrupt timed-out prompt");
                    }
                    Err(_) => {
                        tracing::warn!("Interrupt request to ComfyUI timed out");
                    }
                }
                Err(GenerationError::Timeout(limit.as_secs()))
            }
        }
    }
}

/// `node_errors` is `{}` (or absent) when ComfyUI accepted every node.
fn has_node_errors(node_errors: &serde_json::Value) -> bool {
    match node_errors {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
