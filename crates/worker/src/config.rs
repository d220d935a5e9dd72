//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use sparkle_cloud::secrets::{DEFAULT_PASSWORD_PARAMETER, DEFAULT_USER_PARAMETER};
use sparkle_cloud::sqs::MAX_WAIT_SECONDS;
use sparkle_comfyui::{ComfyUIEngineConfig, ModelRepository};
use sparkle_core::policy::{ErrorKind, ErrorPolicy, ErrorPolicyTable};
use sparkle_events::delivery::discord::DEFAULT_API_BASE;

use crate::orchestrator::OrchestratorSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the worker needs at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// AWS region for SQS and SSM.
    pub region: String,
    pub queue_url: String,
    /// Long-poll wait per receive call (1 to 20 s).
    pub wait_time: Duration,
    /// Where unprocessable messages are copied before deletion.
    pub dead_letter_queue_url: Option<String>,
    pub discord_api_base: String,
    pub webhook_timeout: Duration,
    pub comfyui_api_url: String,
    /// Checkpoint file name as ComfyUI lists it.
    pub model_checkpoint: String,
    /// Download source used when ComfyUI lacks the checkpoint.
    pub model_repository_url: Option<String>,
    pub model_dir: PathBuf,
    pub generation_timeout: Duration,
    pub image_width: u32,
    pub image_height: u32,
    /// SSM parameter names for the repository credentials.
    pub user_parameter: String,
    pub password_parameter: String,
    pub policies: ErrorPolicyTable,
}

/// Env vars that override one entry of the error policy table.
const POLICY_VARS: &[(&str, ErrorKind)] = &[
    ("POLICY_QUEUE_TRANSIENT", ErrorKind::QueueTransient),
    ("POLICY_PARSE", ErrorKind::Parse),
    ("POLICY_GENERATION", ErrorKind::Generation),
    ("POLICY_COMPOSITION", ErrorKind::Composition),
    ("POLICY_NOTIFICATION", ErrorKind::Notification),
];

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                       |
    /// |---------------------------|-------------------------------|
    /// | `REGION`                  | required                      |
    /// | `SQSQUEUEURL`             | required                      |
    /// | `WAIT_TIME_SECONDS`       | `20`                          |
    /// | `DEAD_LETTER_QUEUE_URL`   | unset                         |
    /// | `DISCORD_API_BASE`        | `https://discord.com/api/v10` |
    /// | `WEBHOOK_TIMEOUT_SECS`    | `30`                          |
    /// | `COMFYUI_API_URL`         | `http://127.0.0.1:8188`       |
    /// | `MODEL_CHECKPOINT`        | `stable_diffusion.ckpt`       |
    /// | `MODEL_REPOSITORY_URL`    | unset                         |
    /// | `MODEL_DIR`               | `models/checkpoints`          |
    /// | `GENERATION_TIMEOUT_SECS` | `600`                         |
    /// | `IMAGE_WIDTH`             | `512`                         |
    /// | `IMAGE_HEIGHT`            | `512`                         |
    /// | `HF_USER_PARAMETER`       | `/USER_HG`                    |
    /// | `HF_PASSWORD_PARAMETER`   | `/PASSWORD_HG`                |
    /// | `POLICY_<KIND>`           | see `ErrorPolicyTable`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let or_default = |name: &str, default: &str| get(name).unwrap_or_else(|| default.into());

        let wait_seconds: u64 = parse_number(&get, "WAIT_TIME_SECONDS", 20)?;
        if !(1..=MAX_WAIT_SECONDS).contains(&wait_seconds) {
            return Err(ConfigError::Invalid {
                var: "WAIT_TIME_SECONDS",
                value: wait_seconds.to_string(),
                reason: format!("must be between 1 and {MAX_WAIT_SECONDS}"),
            });
        }

        let mut policies = ErrorPolicyTable::default();
        for &(var, kind) in POLICY_VARS {
            if let Some(value) = get(var) {
                let policy = ErrorPolicy::parse(&value).ok_or_else(|| ConfigError::Invalid {
                    var,
                    value: value.clone(),
                    reason: "expected retry, skip_and_log, dead_letter or fatal".into(),
                })?;
                policies = policies.with(kind, policy);
            }
        }

        Ok(Self {
            region: required("REGION")?,
            queue_url: required("SQSQUEUEURL")?,
            wait_time: Duration::from_secs(wait_seconds),
            dead_letter_queue_url: get("DEAD_LETTER_QUEUE_URL"),
            discord_api_base: or_default("DISCORD_API_BASE", DEFAULT_API_BASE),
            webhook_timeout: Duration::from_secs(parse_number(&get, "WEBHOOK_TIMEOUT_SECS", 30)?),
            comfyui_api_url: or_default("COMFYUI_API_URL", "http://127.0.0.1:8188"),
            model_checkpoint: or_default("MODEL_CHECKPOINT", "stable_diffusion.ckpt"),
            model_repository_url: get("MODEL_REPOSITORY_URL"),
            model_dir: PathBuf::from(or_default("MODEL_DIR", "models/checkpoints")),
            generation_timeout: Duration::from_secs(parse_number(
                &get,
                "GENERATION_TIMEOUT_SECS",
                600,
            )?),
            image_width: parse_number(&get, "IMAGE_WIDTH", 512)?,
            image_height: parse_number(&get, "IMAGE_HEIGHT", 512)?,
            user_parameter: or_default("HF_USER_PARAMETER", DEFAULT_USER_PARAMETER),
            password_parameter: or_default("HF_PASSWORD_PARAMETER", DEFAULT_PASSWORD_PARAMETER),
            policies,
        })
    }

    /// Engine settings; `repository` is resolved separately because it
    /// needs secrets.
    pub fn engine_config(&self, repository: Option<ModelRepository>) -> ComfyUIEngineConfig {
        let mut config = ComfyUIEngineConfig::new(&self.comfyui_api_url, &self.model_dir);
        config.width = self.image_width;
        config.height = self.image_height;
        config.generation_timeout = self.generation_timeout;
        config.repository = repository;
        config
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            wait_time: self.wait_time,
            policies: self.policies.clone(),
            ..OrchestratorSettings::default()
        }
    }
}

fn parse_number<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| map.get(name).cloned())
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("REGION", "us-west-2"),
        ("SQSQUEUEURL", "https://sqs.us-west-2.amazonaws.com/123/sparkle"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let config = load(REQUIRED).unwrap();

        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.dead_letter_queue_url, None);
        assert_eq!(config.discord_api_base, "https://discord.com/api/v10");
        assert_eq!(config.webhook_timeout, Duration::from_secs(30));
        assert_eq!(config.comfyui_api_url, "http://127.0.0.1:8188");
        assert_eq!(config.model_checkpoint, "stable_diffusion.ckpt");
        assert_eq!(config.model_repository_url, None);
        assert_eq!(config.model_dir, PathBuf::from("models/checkpoints"));
        assert_eq!(config.generation_timeout, Duration::from_secs(600));
        assert_eq!((config.image_width, config.image_height), (512, 512));
        assert_eq!(config.user_parameter, "/USER_HG");
        assert_eq!(config.password_parameter, "/PASSWORD_HG");
        assert_eq!(config.policies, ErrorPolicyTable::default());
    }

    #[test]
    fn missing_region_is_reported() {
        let result = load(&[("SQSQUEUEURL", "q")]);
        assert_matches!(result, Err(ConfigError::Missing("REGION")));
    }

    #[test]
    fn blank_queue_url_counts_as_missing() {
        let result = load(&[("REGION", "eu-west-1"), ("SQSQUEUEURL", "  ")]);
        assert_matches!(result, Err(ConfigError::Missing("SQSQUEUEURL")));
    }

    #[test]
    fn invalid_number_names_the_variable() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("GENERATION_TIMEOUT_SECS", "ten"));
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "GENERATION_TIMEOUT_SECS", value, .. }) if value == "ten"
        );
    }

    #[test]
    fn wait_time_above_sqs_limit_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("WAIT_TIME_SECONDS", "25"));
        assert_matches!(load(&vars), Err(ConfigError::Invalid { var: "WAIT_TIME_SECONDS", .. }));
    }

    #[test]
    fn zero_wait_time_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("WAIT_TIME_SECONDS", "0"));
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "WAIT_TIME_SECONDS", value, .. }) if value == "0"
        );
    }

    #[test]
    fn policy_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLICY_PARSE", "fatal"));
        vars.push(("POLICY_GENERATION", "dead_letter"));
        let config = load(&vars).unwrap();

        assert_eq!(config.policies.policy_for(ErrorKind::Parse), ErrorPolicy::Fatal);
        assert_eq!(config.policies.policy_for(ErrorKind::Generation), ErrorPolicy::DeadLetter);
        assert_eq!(config.policies.policy_for(ErrorKind::Notification), ErrorPolicy::SkipAndLog);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("POLICY_NOTIFICATION", "ignore"));
        assert_matches!(load(&vars), Err(ConfigError::Invalid { var: "POLICY_NOTIFICATION", .. }));
    }

    #[test]
    fn engine_config_carries_size_and_timeout() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("IMAGE_WIDTH", "768"));
        vars.push(("GENERATION_TIMEOUT_SECS", "120"));
        let engine = load(&vars).unwrap().engine_config(None);

        assert_eq!(engine.width, 768);
        assert_eq!(engine.height, 512);
        assert_eq!(engine.generation_timeout, Duration::from_secs(120));
        assert_eq!(engine.api_url, "http://127.0.0.1:8188");
    }
}
