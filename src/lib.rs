//! Toolbridge: uniform tool execution over heterogeneous backend programs.
//!
//! A backend program may be a one-shot command-line tool, a persistent
//! line-protocol server driven over its standard streams, or an HTTP API.
//! This crate wraps each behind the same contract — start the backend,
//! execute a named tool with parameters, get text back, stop the backend —
//! so the protocol layer above never needs to know which kind it is
//! talking to.
//!
//! The entry point is [`backend::create_adapter`] (or
//! [`backend::adapter_from_value`] for raw tagged JSON), which turns a
//! [`config::BackendConfig`] into a boxed [`backend::BackendAdapter`].
//! `execute_tool` deliberately never fails: backend failures come back as
//! descriptive text, because the consuming layer has a textual result slot
//! and no structured error channel.

pub mod backend;
pub mod config;
pub mod error;
pub mod spec;

pub use backend::{
    BackendAdapter, CommandLineAdapter, HttpAdapter, ProcessState, ServerAdapter,
    adapter_from_value, create_adapter,
};
pub use config::{BackendConfig, CommandLineConfig, HttpConfig, ServerConfig};
pub use error::{AdapterError, Result};
pub use spec::{ParameterSpec, Parameters, ToolSpec};
