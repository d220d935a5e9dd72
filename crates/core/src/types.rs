/// Generation seeds are unsigned 64-bit, matching the engine's sampler.
pub type Seed = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Credentials for the model repository the engine downloads checkpoints from.
///
/// Resolved once at startup from the secret store. `Debug` never prints
/// the password.
#[derive(Clone, PartialEq, Eq)]
pub struct RepositoryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RepositoryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let creds = RepositoryCredentials {
            username: "sparkle".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("sparkle"));
        assert!(!printed.contains("hunter2"));
    }
}
