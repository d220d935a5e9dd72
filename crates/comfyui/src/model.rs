//! Checkpoint discovery and download.
//!
//! ComfyUI lists the checkpoints its loader node can see under
//! `object_info.CheckpointLoaderSimple.input.required.ckpt_name[0]`.
//! A missing checkpoint can be fetched from a model repository with
//! HTTP basic auth straight into ComfyUI's checkpoint directory.

use std::path::{Path, PathBuf};

use sparkle_core::types::RepositoryCredentials;
use tokio::io::AsyncWriteExt;

use crate::engine::GenerationError;

/// Loader node whose inputs enumerate the available checkpoints.
pub const CHECKPOINT_LOADER: &str = "CheckpointLoaderSimple";

/// Where and how to download a missing checkpoint.
#[derive(Debug, Clone)]
pub struct ModelRepository {
    /// URL of the checkpoint file.
    pub url: String,
    pub credentials: RepositoryCredentials,
}

/// Extract the checkpoint names from an `object_info` response.
///
/// Returns an empty list if the response does not describe the loader.
pub fn available_checkpoints(object_info: &serde_json::Value) -> Vec<String> {
    object_info
        .pointer(&format!("/{CHECKPOINT_LOADER}/input/required/ckpt_name/0"))
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Download `repository.url` into `dir/name`.
///
/// The body is streamed into `name.part` and renamed once complete, so an
/// interrupted download never leaves a truncated checkpoint behind.
pub async fn download_checkpoint(
    client: &reqwest::Client,
    repository: &ModelRepository,
    dir: &Path,
    name: &str,
) -> Result<PathBuf, GenerationError> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    let partial = dir.join(format!("{name}.part"));

    tracing::info!(url = %repository.url, target = %target.display(), "Downloading checkpoint");

    let mut response = client
        .get(&repository.url)
        .basic_auth(
            &repository.credentials.username,
            Some(&repository.credentials.password),
        )
        .send()
        .await?
        .error_for_status()?;

    let mut file = tokio::fs::File::create(&partial).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, &target).await?;
    tracing::info!(bytes = written, target = %target.display(), "Checkpoint downloaded");
    Ok(target)
}
