//! One-shot command-line backend.

use crate::backend::BackendAdapter;
use crate::config::CommandLineConfig;
use crate::error::Result;
use crate::spec::{Parameters, ToolSpec, stringify_value};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Adapter for stateless one-shot command-line programs.
///
/// Holds no mutable state beyond its configuration: every `execute_tool`
/// call spawns its own process, runs it to completion, and captures its
/// output. Calls are fully independent and may run concurrently.
pub struct CommandLineAdapter {
    config: CommandLineConfig,
}

impl CommandLineAdapter {
    pub fn new(config: CommandLineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendAdapter for CommandLineAdapter {
    fn kind(&self) -> &'static str {
        "commandline"
    }

    /// Command-line programs need no startup.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Command-line programs need no shutdown.
    async fn stop(&self) {}

    async fn execute_tool(&self, tool: &ToolSpec, parameters: &Parameters) -> String {
        let tool_args = substitute_args(&tool.args, parameters);

        tracing::debug!(
            command = %self.config.command,
            tool = %tool.name,
            "executing command-line tool"
        );

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .args(&tool_args)
            .current_dir(&self.config.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) => {
                if output.status.success() {
                    String::from_utf8_lossy(&output.stdout).trim().to_string()
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    format!("Error: {}", stderr.trim())
                }
            }
            Err(error) => format!("Error: {error}"),
        }
    }
}

/// Expand a tool's argument template against the supplied parameters.
///
/// A token that is exactly `{name}` (both braces, nothing else) becomes the
/// stringified value of the parameter `name`, or the empty string when the
/// parameter is absent. Every other token passes through unchanged.
fn substitute_args(template: &[String], parameters: &Parameters) -> Vec<String> {
    template
        .iter()
        .map(|token| match placeholder_name(token) {
            Some(name) => parameters
                .get(name)
                .map(stringify_value)
                .unwrap_or_default(),
            None => token.clone(),
        })
        .collect()
}

fn placeholder_name(token: &str) -> Option<&str> {
    token.strip_prefix('{')?.strip_suffix('}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter(command: &str, args: &[&str]) -> CommandLineAdapter {
        CommandLineAdapter::new(CommandLineConfig {
            command: command.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            cwd: ".".into(),
        })
    }

    fn tool_with_args(args: &[&str]) -> ToolSpec {
        ToolSpec {
            name: "test".to_string(),
            description: String::new(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            parameters: Vec::new(),
            endpoint: None,
            method: None,
            command: None,
        }
    }

    #[test]
    fn placeholder_tokens_are_replaced_with_stringified_values() {
        let parameters =
            Parameters::from([("count".to_string(), json!(3)), ("on".to_string(), json!(true))]);

        let args = substitute_args(
            &["{count}".to_string(), "{on}".to_string()],
            &parameters,
        );

        assert_eq!(args, vec!["3", "true"]);
    }

    #[test]
    fn literal_tokens_pass_through_unchanged() {
        let parameters = Parameters::from([("x".to_string(), json!("value"))]);

        let args = substitute_args(
            &["--flag".to_string(), "prefix-{x}".to_string(), "{x}-suffix".to_string()],
            &parameters,
        );

        assert_eq!(args, vec!["--flag", "prefix-{x}", "{x}-suffix"]);
    }

    #[test]
    fn missing_parameters_become_empty_strings() {
        let args = substitute_args(&["{absent}".to_string()], &Parameters::new());

        assert_eq!(args, vec![""]);
    }

    #[tokio::test]
    async fn echo_round_trip_returns_trimmed_stdout() {
        let adapter = adapter("echo", &[]);
        let tool = tool_with_args(&["{msg}"]);
        let parameters = Parameters::from([("msg".to_string(), json!("hi"))]);

        let result = adapter.execute_tool(&tool, &parameters).await;

        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_returns_trimmed_stderr_with_error_prefix() {
        let adapter = adapter("sh", &["-c"]);
        let tool = tool_with_args(&["echo oops >&2; exit 3"]);

        let result = adapter.execute_tool(&tool, &Parameters::new()).await;

        assert_eq!(result, "Error: oops");
    }

    #[tokio::test]
    async fn missing_binary_is_rendered_as_error_text() {
        let adapter = adapter("definitely-not-a-real-binary", &[]);
        let tool = tool_with_args(&[]);

        let result = adapter.execute_tool(&tool, &Parameters::new()).await;

        assert!(result.starts_with("Error: "), "got: {result}");
    }

    #[tokio::test]
    async fn start_and_stop_are_no_ops() {
        let adapter = adapter("echo", &[]);

        adapter.start().await.unwrap();
        adapter.start().await.unwrap();
        adapter.stop().await;
        adapter.stop().await;
    }
}
