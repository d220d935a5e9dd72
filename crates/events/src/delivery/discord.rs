//! Discord interaction webhook delivery.
//!
//! [`DiscordWebhook`] edits the original interaction response via
//! `PATCH {api_base}/webhooks/{application_id}/{interaction_token}/messages/@original`.
//! Plain edits are JSON; the result edit is multipart with a `payload_json`
//! part and the grid image attached as [`ARTIFACT_FILE_NAME`].
//!
//! A non-2xx response is logged and returned as
//! [`NotificationError::HttpStatus`]. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use sparkle_core::compose::ResultArtifact;
use sparkle_core::job::{DefaultedJob, InteractionRef};

use crate::notifier::{NotificationError, Notifier};

/// Default Discord REST API base.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// File name the result grid is uploaded under.
pub const ARTIFACT_FILE_NAME: &str = "stable-diffusion.png";

/// HTTP request timeout for a single edit.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Discord rejects message content longer than this many characters.
const MAX_CONTENT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// JSON body of a message edit.
#[derive(Debug, Serialize)]
struct MessageEdit {
    content: String,
    embeds: Vec<serde_json::Value>,
    attachments: Vec<AttachmentRef>,
    allowed_mentions: AllowedMentions,
}

/// Attachment declaration; `id` refers to the `files[id]` multipart part.
#[derive(Debug, Serialize)]
struct AttachmentRef {
    id: u32,
    filename: &'static str,
}

/// Suppresses every mention the prompt text might contain.
#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: Vec<&'static str>,
}

impl MessageEdit {
    fn new(content: String) -> Self {
        Self {
            content: truncate_content(content),
            embeds: Vec::new(),
            attachments: Vec::new(),
            allowed_mentions: AllowedMentions { parse: Vec::new() },
        }
    }

    fn with_artifact(mut self) -> Self {
        self.attachments.push(AttachmentRef {
            id: 0,
            filename: ARTIFACT_FILE_NAME,
        });
        self
    }
}

/// Message text while the job is running.
pub fn processing_content(summary: &str) -> String {
    format!("Processing your Sparkle```{summary}```")
}

/// Message text once the grid is attached.
pub fn completed_content(summary: &str) -> String {
    format!("*Completed your Sparkle!*```{summary}```")
}

/// Message text when the job was dropped.
pub fn failed_content(summary: &str, reason: &str) -> String {
    format!("*Could not complete your Sparkle.*```{summary}\nReason: {reason}```")
}

fn truncate_content(content: String) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content;
    }
    // Keep the closing code fence so the message still renders.
    let fence = "…```";
    let keep = MAX_CONTENT_CHARS - fence.chars().count();
    let mut out: String = content.chars().take(keep).collect();
    out.push_str(fence);
    out
}

// ---------------------------------------------------------------------------
// DiscordWebhook
// ---------------------------------------------------------------------------

/// Edits the original interaction message on Discord.
pub struct DiscordWebhook {
    client: reqwest::Client,
    api_base: String,
}

impl DiscordWebhook {
    /// Create a webhook client whose every request is bounded by `timeout`.
    ///
    /// * `api_base` - REST base URL, e.g. [`DEFAULT_API_BASE`].
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_base))
    }

    /// Create a webhook client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { client, api_base }
    }

    /// URL of the original interaction message.
    ///
    /// The same `to` always yields the same URL; repeated calls edit in place.
    pub fn original_message_url(&self, to: &InteractionRef) -> String {
        format!(
            "{}/webhooks/{}/{}/messages/@original",
            self.api_base, to.application_id, to.interaction_token
        )
    }

    async fn edit_json(&self, to: &InteractionRef, edit: &MessageEdit) -> Result<(), NotificationError> {
        let response = self
            .client
            .patch(self.original_message_url(to))
            .json(edit)
            .send()
            .await?;
        Self::check_status(to, response).await
    }

    async fn edit_with_file(
        &self,
        to: &InteractionRef,
        edit: &MessageEdit,
        png: Vec<u8>,
    ) -> Result<(), NotificationError> {
        // MessageEdit only holds strings and vectors; serialization cannot fail.
        let payload_json = serde_json::to_string(edit).unwrap_or_default();
        let file = Part::bytes(png)
            .file_name(ARTIFACT_FILE_NAME)
            .mime_str("image/png")?;
        let form = Form::new()
            .text("payload_json", payload_json)
            .part("files[0]", file);

        let response = self
            .client
            .patch(self.original_message_url(to))
            .multipart(form)
            .send()
            .await?;
        Self::check_status(to, response).await
    }

    /// Log and convert a non-2xx response into an error.
    async fn check_status(
        to: &InteractionRef,
        response: reqwest::Response,
    ) -> Result<(), NotificationError> {
        let status = response.status();
        if status.is_success() {
            tracing::debug!(application_id = %to.application_id, status = status.as_u16(), "Message edited");
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::warn!(
            application_id = %to.application_id,
            status = status.as_u16(),
            body = %body,
            "Discord rejected message edit",
        );
        Err(NotificationError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    async fn notify_processing(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
    ) -> Result<(), NotificationError> {
        let edit = MessageEdit::new(processing_content(&job.summary()));
        self.edit_json(to, &edit).await
    }

    async fn deliver_result(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
        summary: &str,
        artifact: &ResultArtifact,
    ) -> Result<(), NotificationError> {
        tracing::debug!(
            artifact_id = %artifact.id,
            seed = job.seed,
            bytes = artifact.png_bytes().len(),
            "Uploading result grid",
        );
        let edit = MessageEdit::new(completed_content(summary)).with_artifact();
        self.edit_with_file(to, &edit, artifact.png_bytes().to_vec())
            .await
    }

    async fn notify_failure(
        &self,
        to: &InteractionRef,
        job: &DefaultedJob,
        reason: &str,
    ) -> Result<(), NotificationError> {
        let edit = MessageEdit::new(failed_content(&job.summary(), reason));
        self.edit_json(to, &edit).await
    }
}
