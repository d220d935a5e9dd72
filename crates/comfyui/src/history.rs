//! ComfyUI prompt history types and completion detection.
//!
//! `GET /history/{prompt_id}` returns `{}` while the prompt is queued or
//! running, and `{"<prompt_id>": {"outputs": {...}, "status": {...}}}`
//! once it has finished. This module turns that into a [`PromptState`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::api::OutputFile;

/// One finished prompt in the history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Files a single node produced.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputFile>,
}

/// Final execution status of a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    /// `success` or `error`.
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// Where a submitted prompt currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    /// Not in the history yet.
    Pending,
    /// Finished; images from the requested node (or any node as fallback).
    Completed(Vec<OutputFile>),
    /// Finished with an execution error.
    Failed(String),
}

/// Interpret a `/history/{prompt_id}` response.
///
/// Images from `output_node` are preferred; if that node produced none,
/// images from every node are returned in node-id order.
pub fn prompt_state(
    history: &serde_json::Value,
    prompt_id: &str,
    output_node: &str,
) -> Result<PromptState, serde_json::Error> {
    let Some(raw) = history.get(prompt_id) else {
        return Ok(PromptState::Pending);
    };
    let entry: HistoryEntry = serde_json::from_value(raw.clone())?;

    if let Some(status) = &entry.status {
        if status.status_str == "error" {
            return Ok(PromptState::Failed(error_message(status)));
        }
    }

    let preferred = entry
        .outputs
        .get(output_node)
        .map(|out| out.images.clone())
        .unwrap_or_default();
    if !preferred.is_empty() {
        return Ok(PromptState::Completed(preferred));
    }

    let all: Vec<OutputFile> = entry
        .outputs
        .into_values()
        .flat_map(|out| out.images)
        .collect();
    Ok(PromptState::Completed(all))
}

fn error_message(status: &ExecutionStatus) -> String {
    status
        .messages
        .iter()
        .find(|(kind, _)| kind == "execution_error")
        .and_then(|(_, payload)| {
            let kind = payload.get("exception_type").and_then(|v| v.as_str());
            let message = payload.get("exception_message").and_then(|v| v.as_str());
            match (kind, message) {
                (Some(k), Some(m)) => Some(format!("{k}: {}", m.trim())),
                (None, Some(m)) => Some(m.trim().to_string()),
                _ => None,
            }
        })
        .unwrap_or_else(|| "execution failed".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_history_is_pending() {
        assert_eq!(prompt_state(&json!({}), "p1", "9").unwrap(), PromptState::Pending);
    }

    #[test]
    fn completed_prefers_output_node() {
        let history = json!({
            "p1": {
                "outputs": {
                    "3": {"images": [{"filename": "preview.png", "subfolder": "", "type": "temp"}]},
                    "9": {"images": [{"filename": "final.png", "subfolder": "sparkle", "type": "output"}]}
                },
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        });
        let PromptState::Completed(files) = prompt_state(&history, "p1", "9").unwrap() else {
            panic!("expected completed");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "final.png");
        assert_eq!(files[0].subfolder, "sparkle");
    }

    #[test]
    fn completed_falls_back_to_any_node() {
        let history = json!({
            "p1": {"outputs": {"12": {"images": [{"filename": "x.png"}]}}}
        });
        let PromptState::Completed(files) = prompt_state(&history, "p1", "9").unwrap() else {
            panic!("expected completed");
        };
        assert_eq!(files[0].filename, "x.png");
    }

    #[test]
    fn execution_error_is_failed() {
        let history = json!({
            "p1": {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", {"prompt_id": "p1"}],
                        ["execution_error", {
                            "prompt_id": "p1",
                            "exception_type": "torch.cuda.OutOfMemoryError",
                            "exception_message": "CUDA out of memory.\n"
                        }]
                    ]
                }
            }
        });
        assert_eq!(
            prompt_state(&history, "p1", "9").unwrap(),
            PromptState::Failed("torch.cuda.OutOfMemoryError: CUDA out of memory.".into())
        );
    }

    #[test]
    fn error_without_details_has_generic_message() {
        let history = json!({"p1": {"status": {"status_str": "error"}}});
        assert_eq!(
            prompt_state(&history, "p1", "9").unwrap(),
            PromptState::Failed("execution failed".into())
        );
    }
}
