//! Top-level error types for toolbridge.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors surfaced by backend adapters and the adapter factory.
///
/// Only `Startup` (from `start`) and `Configuration` (from the factory)
/// ever reach callers as hard failures. The remaining variants exist for
/// internal propagation inside `execute_tool`, which renders every failure
/// as descriptive text at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("communication failed: {0}")]
    Communication(String),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid backend configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
