//! Generation engine adapter for the Sparkle worker.
//!
//! Provides the [`GenerationEngine`](engine::GenerationEngine) seam the
//! worker loop depends on, and a ComfyUI-backed implementation that
//! builds a txt2img workflow, submits it over the REST API, waits for the
//! output in the prompt history, and fetches the rendered image.

pub mod api;
pub mod client;
pub mod engine;
pub mod history;
pub mod model;
pub mod workflow;

pub use client::{ComfyUIEngine, ComfyUIEngineConfig};
pub use engine::{
    generate_batch, GenerationBatch, GenerationEngine, GenerationError, GenerationRequest,
    ModelHandle,
};
pub use model::ModelRepository;
