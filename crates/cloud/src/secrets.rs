//! Secret lookup via AWS SSM Parameter Store.

use async_trait::async_trait;
use aws_sdk_ssm::error::DisplayErrorContext;
use sparkle_core::types::RepositoryCredentials;

/// Default parameter holding the model repository user name.
pub const DEFAULT_USER_PARAMETER: &str = "/USER_HG";
/// Default parameter holding the model repository password.
pub const DEFAULT_PASSWORD_PARAMETER: &str = "/PASSWORD_HG";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read parameter {name}: {message}")]
    Service { name: String, message: String },

    #[error("Parameter {0} has no value")]
    Missing(String),
}

/// Read-only access to named secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the decrypted value of `name`.
    async fn get(&self, name: &str) -> Result<String, SecretError>;
}

pub struct SsmSecretStore {
    client: aws_sdk_ssm::Client,
}

impl SsmSecretStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }

    pub fn from_config(sdk_config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_ssm::Client::new(sdk_config))
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        let output = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| SecretError::Service {
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        output
            .parameter
            .and_then(|p| p.value)
            .ok_or_else(|| SecretError::Missing(name.to_string()))
    }
}

/// Resolve model repository credentials from two parameters.
pub async fn resolve_repository_credentials(
    store: &dyn SecretStore,
    user_parameter: &str,
    password_parameter: &str,
) -> Result<RepositoryCredentials, SecretError> {
    let username = store.get(user_parameter).await?;
    let password = store.get(password_parameter).await?;
    tracing::debug!(user_parameter, password_parameter, "Resolved repository credentials");
    Ok(RepositoryCredentials { username, password })
}
