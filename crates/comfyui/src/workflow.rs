//! txt2img workflow construction in ComfyUI API format.
//!
//! The graph is the stock text-to-image pipeline:
//! checkpoint loader → positive/negative CLIP encodes → empty latent →
//! KSampler → VAE decode → save image.

use serde_json::{json, Value};

use crate::engine::GenerationRequest;

// ---------------------------------------------------------------------------
// Node ids
// ---------------------------------------------------------------------------

const CHECKPOINT_NODE: &str = "4";
const POSITIVE_NODE: &str = "6";
const NEGATIVE_NODE: &str = "7";
const LATENT_NODE: &str = "5";
const SAMPLER_NODE: &str = "3";
const DECODE_NODE: &str = "8";
/// Node whose output images are the generation result.
pub const SAVE_NODE: &str = "9";

/// Classifier-free guidance scale.
pub const DEFAULT_CFG: f64 = 7.5;
/// Filename prefix for saved outputs.
pub const OUTPUT_PREFIX: &str = "sparkle";

// ---------------------------------------------------------------------------
// Sampler names
// ---------------------------------------------------------------------------

/// Legacy k-diffusion sampler names and their ComfyUI equivalents.
const SAMPLER_ALIASES: &[(&str, &str)] = &[
    ("k_euler_a", "euler_ancestral"),
    ("k_euler", "euler"),
    ("k_lms", "lms"),
    ("k_heun", "heun"),
    ("k_dpm_2", "dpm_2"),
    ("k_dpm_2_a", "dpm_2_ancestral"),
    ("k_dpmpp_2m", "dpmpp_2m"),
    ("k_dpmpp_2s_a", "dpmpp_2s_ancestral"),
    ("ddim", "ddim"),
];

/// Translate a requested sampler name to the one ComfyUI's KSampler knows.
///
/// Unknown names pass through so newer samplers can be requested directly.
pub fn comfy_sampler_name(requested: &str) -> &str {
    SAMPLER_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == requested)
        .map(|(_, comfy)| *comfy)
        .unwrap_or(requested)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build a single-image txt2img workflow for `request`.
pub fn build_txt2img(request: &GenerationRequest, checkpoint: &str, width: u32, height: u32) -> Value {
    json!({
        CHECKPOINT_NODE: {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": checkpoint }
        },
        POSITIVE_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": request.prompt, "clip": [CHECKPOINT_NODE, 1] }
        },
        NEGATIVE_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": {
                "text": request.negative_prompt.as_deref().unwrap_or(""),
                "clip": [CHECKPOINT_NODE, 1]
            }
        },
        LATENT_NODE: {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": width, "height": height, "batch_size": 1 }
        },
        SAMPLER_NODE: {
            "class_type": "KSampler",
            "inputs": {
                "seed": request.seed,
                "steps": request.steps,
                "cfg": DEFAULT_CFG,
                "sampler_name": comfy_sampler_name(&request.sampler),
                "scheduler": "normal",
                "denoise": 1.0,
                "model": [CHECKPOINT_NODE, 0],
                "positive": [POSITIVE_NODE, 0],
                "negative": [NEGATIVE_NODE, 0],
                "latent_image": [LATENT_NODE, 0]
            }
        },
        DECODE_NODE: {
            "class_type": "VAEDecode",
            "inputs": { "samples": [SAMPLER_NODE, 0], "vae": [CHECKPOINT_NODE, 2] }
        },
        SAVE_NODE: {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": OUTPUT_PREFIX, "images": [DECODE_NODE, 0] }
        }
    })
}
