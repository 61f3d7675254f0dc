use thiserror::Error;

/// Structured error code returned when a caller addresses an operation that
/// exists but is not on the read-only allowlist.
pub const READ_ONLY_OPERATION_BLOCKED: &str = "READ_ONLY_OPERATION_BLOCKED";

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid value for {variable}: {reason} (accepted: {accepted})")]
    InvalidEnvValue {
        variable: String,
        reason: String,
        accepted: &'static str,
    },

    #[error("no backend could be started")]
    NoBackendAvailable,

    #[error("remote backend is not connected")]
    RemoteUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;
