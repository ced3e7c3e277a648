//! Backend adapters.
//!
//! Every backend program — one-shot command-line tool, persistent
//! line-protocol server, or HTTP API — is driven through the same
//! [`BackendAdapter`] contract: `start`, `stop`, and
//! `execute_tool(spec, parameters) -> text`. Callers obtain an adapter from
//! [`create_adapter`] and never learn which backend technology sits behind
//! it.

pub mod commandline;
pub mod http;
pub mod server;

pub use commandline::CommandLineAdapter;
pub use http::HttpAdapter;
pub use server::{ProcessState, ServerAdapter};

use crate::config::BackendConfig;
use crate::error::{AdapterError, Result};
use crate::spec::{Parameters, ToolSpec};
use async_trait::async_trait;

/// Uniform contract over one backend program.
///
/// All methods take `&self`; adapters own their resources behind interior
/// mutability so an `Arc<dyn BackendAdapter>` can be shared across tasks.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend type tag, matching the configuration discriminant.
    fn kind(&self) -> &'static str;

    /// Bring the backend into a usable state.
    ///
    /// Idempotent: calling `start` on an already-started adapter is a no-op.
    /// Fails with [`AdapterError::Startup`] when the backend cannot launch
    /// or never becomes ready within its startup timeout.
    async fn start(&self) -> Result<()>;

    /// Release all backend resources.
    ///
    /// Idempotent and infallible: a `stop` on an already-stopped adapter
    /// returns immediately, and shutdown failures are logged, never raised.
    async fn stop(&self);

    /// Execute one tool invocation and return the backend's output as text.
    ///
    /// Never fails: every backend-level failure (dead process, HTTP error
    /// status, refused connection) is rendered as descriptive text with a
    /// distinct prefix, so callers always receive a textual result slot.
    async fn execute_tool(&self, tool: &ToolSpec, parameters: &Parameters) -> String;
}

impl std::fmt::Debug for dyn BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Construct the adapter matching a backend configuration.
pub fn create_adapter(config: BackendConfig) -> Box<dyn BackendAdapter> {
    match config {
        BackendConfig::Commandline(config) => Box::new(CommandLineAdapter::new(config)),
        BackendConfig::Server(config) => Box::new(ServerAdapter::new(config)),
        BackendConfig::Http(config) => Box::new(HttpAdapter::new(config)),
    }
}

/// Construct an adapter from the raw tagged-JSON configuration shape
/// `{"type": "...", "config": {...}}`.
///
/// Unknown tags and malformed config records fail with
/// [`AdapterError::Configuration`] — the one hard failure the factory is
/// allowed to propagate.
pub fn adapter_from_value(value: serde_json::Value) -> Result<Box<dyn BackendAdapter>> {
    let tag = value
        .get("type")
        .and_then(|tag| tag.as_str())
        .ok_or_else(|| AdapterError::Configuration("missing backend type".to_string()))?;

    match tag {
        "commandline" | "server" | "http" => {
            let config: BackendConfig = serde_json::from_value(value)
                .map_err(|error| AdapterError::Configuration(error.to_string()))?;
            Ok(create_adapter(config))
        }
        other => Err(AdapterError::Configuration(format!(
            "unsupported backend type: {other}"
        ))),
    }
}
