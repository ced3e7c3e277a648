//! Backend configuration records.
//!
//! These are produced by the external config/detection layer and consumed
//! by the adapter factory. They are immutable for the adapter's lifetime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Backend configuration, discriminated by backend type.
///
/// Mirrors the wire shape `{"type": "...", "config": {...}}` emitted by the
/// config layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum BackendConfig {
    Commandline(CommandLineConfig),
    Server(ServerConfig),
    Http(HttpConfig),
}

impl BackendConfig {
    /// The discriminant tag as it appears in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Commandline(_) => "commandline",
            BackendConfig::Server(_) => "server",
            BackendConfig::Http(_) => "http",
        }
    }
}

/// Configuration for a one-shot command-line backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLineConfig {
    /// Program to invoke.
    pub command: String,

    /// Base arguments prepended before each tool's argument template.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for every invocation.
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,
}

/// Configuration for a persistent line-protocol server backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Program to spawn.
    pub command: String,

    /// Arguments passed at spawn time.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory the child runs in.
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,

    /// Seconds to wait for the ready signal before failing startup.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,

    /// Substring expected in the child's stdout that marks it ready.
    /// When absent (or empty), startup waits a fixed grace period instead.
    #[serde(default)]
    pub ready_signal: Option<String>,
}

impl ServerConfig {
    /// The configured ready signal, treating an empty string as unset.
    pub fn ready_signal(&self) -> Option<&str> {
        self.ready_signal.as_deref().filter(|signal| !signal.is_empty())
    }
}

/// Configuration for an HTTP API backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL every tool endpoint is resolved against.
    pub base_url: String,

    /// Total request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,

    /// Default headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

fn default_startup_timeout() -> u64 {
    5
}

fn default_http_timeout() -> u64 {
    10
}
