// ============================================================================
// File: src/error.rs
// ----------------------------------------------------------------------------
// Error types for the remote access CLI
// ============================================================================

/// Fatal error taxonomy
///
/// Validation and connectivity errors abort the invocation and are shown to
/// the user with a usage hint. Everything that can be recovered from during
/// remote provisioning uses [`ProvisioningWarning`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad user input, never retried
    #[error("{message}")]
    Validation { message: String },

    /// The remote host could not be dialed
    #[error(
        "dial remote host: {details}; please check the SSH arguments and make sure the remote host is reachable"
    )]
    Connectivity { details: String },

    /// Local SSH configuration or key management failed
    #[error("local SSH configuration: {details}")]
    Configuration { details: String },

    /// A remote session stage failed as a whole
    #[error("{stage}: {details}")]
    Remote {
        stage: &'static str,
        details: String,
    },

    /// Distinguished conflict: the remote file (or its content) is already
    /// present. Idempotent re-runs treat this as success-equivalent.
    #[error("remote file already exists: {path}")]
    RemoteFileExists { path: String },

    /// IDE could not be started
    #[error("launch {ide}: {details}")]
    Launch { ide: &'static str, details: String },

    /// Local filesystem I/O
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn remote(stage: &'static str, details: impl Into<String>) -> Self {
        Error::Remote {
            stage,
            details: details.into(),
        }
    }

    /// True for the idempotent-conflict condition callers swallow
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::RemoteFileExists { .. })
    }
}

/// Result type for fatal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal remote setup failures
///
/// Best-effort provisioning steps (key copy, MOTD edit, README copy) return
/// this type instead of [`Error`] so callers cannot accidentally escalate a
/// degraded-ergonomics condition into an aborted session. Warnings are
/// logged and execution continues.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningWarning {
    #[error("ensure SSH key: {details}")]
    KeyProvisioning { details: String },

    #[error("add message of the day to shell configs: {details}")]
    MotdUpdate { details: String },

    #[error("copy README to remote: {details}")]
    ReadmeCopy { details: String },
}
