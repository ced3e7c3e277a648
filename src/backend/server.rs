//! Persistent line-protocol server backend.
//!
//! Manages one child process speaking a newline-delimited request/response
//! protocol over its standard streams. The hard parts live here: readiness
//! detection at startup, strictly serialized command dispatch over the
//! shared pipe pair, bounded graceful shutdown, and recovery after the
//! child dies mid-conversation.

use crate::backend::BackendAdapter;
use crate::config::ServerConfig;
use crate::error::{AdapterError, Result};
use crate::spec::{Parameters, ToolSpec, stringify_value};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

/// Fixed wait before declaring readiness when no ready signal is
/// configured. Approximate on purpose: the backend gives us nothing better
/// to observe.
const READY_GRACE: Duration = Duration::from_secs(1);

/// Poll interval while waiting for the ready signal.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on each phase of graceful shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(3);

/// Lifecycle state of the managed child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Ready,
    Failed,
}

/// Handle and pipes of the live child.
///
/// Lives inside the adapter's mutex; holding that mutex across the full
/// write-then-read cycle is what serializes dispatch. The protocol has no
/// framing beyond newlines, so interleaved commands from two callers would
/// be indistinguishable on the wire.
struct ServerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Adapter for persistent line-protocol server programs.
pub struct ServerAdapter {
    config: ServerConfig,
    state: RwLock<ProcessState>,
    process: Mutex<Option<ServerProcess>>,
}

impl ServerAdapter {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ProcessState::Stopped),
            process: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ProcessState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ProcessState) {
        *self.state.write().await = state;
    }

    async fn is_ready(&self) -> bool {
        // Release the state guard before touching the process mutex; start()
        // holds the process mutex while it updates state.
        let ready = *self.state.read().await == ProcessState::Ready;
        if !ready {
            return false;
        }
        self.process.lock().await.is_some()
    }

    /// Wait until the child prints a line containing the ready signal,
    /// bounded by the configured startup timeout.
    async fn wait_for_ready(&self, process: &mut ServerProcess, signal: &str) -> Result<()> {
        let startup_timeout = Duration::from_secs(self.config.startup_timeout);
        let deadline = Instant::now() + startup_timeout;
        let mut line = String::new();

        while Instant::now() < deadline {
            // A child that died during the wait is a startup failure; its
            // stderr is the diagnostic.
            let exit = process
                .child
                .try_wait()
                .map_err(|error| AdapterError::Startup(error.to_string()))?;
            if let Some(status) = exit {
                let stderr = drain_stderr(&mut process.child).await;
                return Err(AdapterError::Startup(format!(
                    "server exited with {status} before becoming ready: {stderr}"
                )));
            }

            line.clear();
            match timeout(READY_POLL_INTERVAL, process.stdout.read_line(&mut line)).await {
                Ok(Ok(0)) => {
                    // stdout closed; loop again until try_wait observes the exit.
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
                Ok(Ok(_)) => {
                    if line.contains(signal) {
                        return Ok(());
                    }
                }
                Ok(Err(error)) => return Err(AdapterError::Startup(error.to_string())),
                Err(_) => {}
            }
        }

        Err(AdapterError::Startup(format!(
            "server startup timeout ({}s)",
            startup_timeout.as_secs()
        )))
    }
}

#[async_trait]
impl BackendAdapter for ServerAdapter {
    fn kind(&self) -> &'static str {
        "server"
    }

    /// Spawn the child and wait for readiness. No-op when a process handle
    /// already exists.
    async fn start(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        self.set_state(ProcessState::Starting).await;
        tracing::info!(
            command = %self.config.command,
            args = ?self.config.args,
            "starting server backend"
        );

        let spawned = Command::new(&self.config.command)
            .args(&self.config.args)
            .current_dir(&self.config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                self.set_state(ProcessState::Failed).await;
                return Err(AdapterError::Startup(format!(
                    "failed to spawn '{}': {error}",
                    self.config.command
                )));
            }
        };

        let Some(stdin) = child.stdin.take() else {
            self.set_state(ProcessState::Failed).await;
            return Err(AdapterError::Startup("child stdin is not available".to_string()));
        };
        let Some(stdout) = child.stdout.take() else {
            self.set_state(ProcessState::Failed).await;
            return Err(AdapterError::Startup("child stdout is not available".to_string()));
        };

        let mut process = ServerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        match self.config.ready_signal() {
            Some(signal) => {
                if let Err(error) = self.wait_for_ready(&mut process, signal).await {
                    self.set_state(ProcessState::Failed).await;
                    let _ = process.child.start_kill();
                    return Err(error);
                }
            }
            None => {
                // No signal to observe; grant the child a fixed grace
                // period and assume it is ready.
                tokio::time::sleep(READY_GRACE).await;
            }
        }

        *guard = Some(process);
        self.set_state(ProcessState::Ready).await;
        tracing::info!(command = %self.config.command, "server backend ready");
        Ok(())
    }

    /// Graceful shutdown: `quit`, bounded wait, terminate, bounded wait,
    /// kill. The handle is cleared and the state reset no matter which path
    /// ran.
    async fn stop(&self) {
        let mut guard = self.process.lock().await;
        let Some(mut process) = guard.take() else {
            return;
        };

        tracing::info!(command = %self.config.command, "stopping server backend");

        if let Err(error) = shutdown_gracefully(&mut process).await {
            tracing::warn!(%error, "graceful shutdown failed, killing server");
            let still_running = matches!(process.child.try_wait(), Ok(None) | Err(_));
            if still_running {
                if let Err(error) = process.child.kill().await {
                    tracing::warn!(%error, "failed to kill server process");
                }
            }
        }

        self.set_state(ProcessState::Stopped).await;
        tracing::info!(command = %self.config.command, "server backend stopped");
    }

    async fn execute_tool(&self, tool: &ToolSpec, parameters: &Parameters) -> String {
        if !self.is_ready().await {
            if let Err(error) = self.start().await {
                let detail = match error {
                    AdapterError::Startup(message) => message,
                    other => other.to_string(),
                };
                return format!("Error communicating with server: {detail}");
            }
        }

        let command = substitute_command(tool.command.as_deref().unwrap_or(""), parameters);

        let mut guard = self.process.lock().await;
        match dispatch_command(guard.as_mut(), &command).await {
            Ok(response) => response,
            Err(error) => {
                // The pipe is gone, so the child is too. Dropping the
                // handle lets the next call start a fresh process.
                guard.take();
                drop(guard);
                self.set_state(ProcessState::Failed).await;

                let detail = match error {
                    AdapterError::Communication(message) => message,
                    other => other.to_string(),
                };
                format!("Error communicating with server: {detail}")
            }
        }
    }
}

/// One serialized request/response exchange: write the command line, flush,
/// read exactly one response line.
async fn dispatch_command(process: Option<&mut ServerProcess>, command: &str) -> Result<String> {
    let Some(process) = process else {
        return Err(AdapterError::Communication(
            "server process is not running".to_string(),
        ));
    };

    let exchange = async {
        process.stdin.write_all(command.as_bytes()).await?;
        process.stdin.write_all(b"\n").await?;
        process.stdin.flush().await?;

        let mut line = String::new();
        let read = process.stdout.read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed its output stream",
            ));
        }
        Ok(line)
    };

    match exchange.await {
        Ok(line) => Ok(line.trim().to_string()),
        Err(error) => Err(AdapterError::Communication(error.to_string())),
    }
}

/// Replace every `{name}` occurrence in the command template with the
/// stringified parameter value. Substring replacement, not token-level: a
/// placeholder may sit anywhere inside the template string.
fn substitute_command(template: &str, parameters: &Parameters) -> String {
    let mut command = template.to_string();
    for (name, value) in parameters {
        command = command.replace(&format!("{{{name}}}"), &stringify_value(value));
    }
    command
}

async fn shutdown_gracefully(process: &mut ServerProcess) -> std::io::Result<()> {
    // Ask the child to exit on its own first.
    process.stdin.write_all(b"quit\n").await?;
    process.stdin.flush().await?;

    if let Ok(waited) = timeout(SHUTDOWN_WAIT, process.child.wait()).await {
        waited?;
        return Ok(());
    }

    terminate(&mut process.child);

    match timeout(SHUTDOWN_WAIT, process.child.wait()).await {
        Ok(waited) => {
            waited?;
            Ok(())
        }
        Err(_) => Err(std::io::Error::other("server ignored terminate signal")),
    }
}

/// Soft-kill the child: SIGTERM on unix, hard kill elsewhere.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // The pid stays valid while we hold the child handle.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Read whatever the dead child left on stderr, bounded so a misbehaving
/// process group cannot stall startup-failure reporting.
async fn drain_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };

    let mut text = String::new();
    let _ = timeout(SHUTDOWN_WAIT, stderr.read_to_string(&mut text)).await;
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read as _;

    fn shell_adapter(script: &str, ready_signal: Option<&str>, startup_timeout: u64) -> ServerAdapter {
        ServerAdapter::new(ServerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: ".".into(),
            startup_timeout,
            ready_signal: ready_signal.map(|signal| signal.to_string()),
        })
    }

    fn cat_adapter() -> ServerAdapter {
        ServerAdapter::new(ServerConfig {
            command: "cat".to_string(),
            args: Vec::new(),
            cwd: ".".into(),
            startup_timeout: 5,
            ready_signal: None,
        })
    }

    fn server_tool(command: &str) -> ToolSpec {
        ToolSpec {
            name: "test".to_string(),
            description: String::new(),
            args: Vec::new(),
            parameters: Vec::new(),
            endpoint: None,
            method: None,
            command: Some(command.to_string()),
        }
    }

    #[test]
    fn command_substitution_replaces_every_occurrence() {
        let parameters =
            Parameters::from([("a".to_string(), json!(2)), ("b".to_string(), json!(3))]);

        let command = substitute_command("add {a} {b} # a={a}", &parameters);

        assert_eq!(command, "add 2 3 # a=2");
    }

    #[test]
    fn unknown_placeholders_are_left_in_place() {
        let command = substitute_command("ping {missing}", &Parameters::new());

        assert_eq!(command, "ping {missing}");
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let adapter = cat_adapter();

        adapter.stop().await;

        assert_eq!(adapter.state().await, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn start_without_ready_signal_waits_the_grace_period() {
        let adapter = cat_adapter();
        let begun = Instant::now();

        adapter.start().await.unwrap();

        assert!(begun.elapsed() >= READY_GRACE);
        assert_eq!(adapter.state().await, ProcessState::Ready);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn start_twice_spawns_exactly_one_child() {
        let marker = tempfile::NamedTempFile::new().unwrap();
        let script = format!("echo launched >> {}; echo READY; cat", marker.path().display());
        let adapter = shell_adapter(&script, Some("READY"), 5);

        adapter.start().await.unwrap();
        adapter.start().await.unwrap();

        let mut launches = String::new();
        marker.reopen().unwrap().read_to_string(&mut launches).unwrap();
        assert_eq!(launches.lines().count(), 1);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn ready_signal_is_detected_in_startup_output() {
        let adapter = shell_adapter("echo starting up; echo READY; cat", Some("READY"), 5);

        adapter.start().await.unwrap();
        assert_eq!(adapter.state().await, ProcessState::Ready);

        let result = adapter
            .execute_tool(&server_tool("ping"), &Parameters::new())
            .await;
        assert_eq!(result, "ping");

        adapter.stop().await;
    }

    #[tokio::test]
    async fn child_exit_before_ready_surfaces_its_stderr() {
        let adapter = shell_adapter("echo boom >&2; exit 1", Some("READY"), 5);

        let error = adapter.start().await.unwrap_err();

        let message = error.to_string();
        assert!(message.contains("boom"), "got: {message}");
        assert_eq!(adapter.state().await, ProcessState::Failed);
    }

    #[tokio::test]
    async fn missing_ready_signal_times_out() {
        let adapter = shell_adapter("sleep 30", Some("READY"), 1);

        let error = adapter.start().await.unwrap_err();

        let message = error.to_string();
        assert!(message.contains("timeout"), "got: {message}");
        assert_eq!(adapter.state().await, ProcessState::Failed);
    }

    #[tokio::test]
    async fn failed_spawn_is_a_startup_error() {
        let adapter = ServerAdapter::new(ServerConfig {
            command: "definitely-not-a-real-binary".to_string(),
            args: Vec::new(),
            cwd: ".".into(),
            startup_timeout: 5,
            ready_signal: None,
        });

        let error = adapter.start().await.unwrap_err();

        assert!(matches!(error, AdapterError::Startup(_)));
    }

    #[tokio::test]
    async fn echo_round_trip_substitutes_and_returns_one_line() {
        let adapter = shell_adapter("echo READY; cat", Some("READY"), 5);
        let parameters =
            Parameters::from([("a".to_string(), json!(2)), ("b".to_string(), json!(3))]);

        let result = adapter
            .execute_tool(&server_tool("add {a} {b}"), &parameters)
            .await;

        assert_eq!(result, "add 2 3");

        adapter.stop().await;
    }

    #[tokio::test]
    async fn execute_without_start_starts_implicitly() {
        let adapter = shell_adapter("echo READY; cat", Some("READY"), 5);

        let result = adapter
            .execute_tool(&server_tool("hello"), &Parameters::new())
            .await;

        assert_eq!(result, "hello");
        assert_eq!(adapter.state().await, ProcessState::Ready);

        adapter.stop().await;
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialized_per_command() {
        let adapter = std::sync::Arc::new(shell_adapter("echo READY; cat", Some("READY"), 5));
        adapter.start().await.unwrap();

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .execute_tool(&server_tool("first"), &Parameters::new())
                    .await
            })
        };
        let second = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .execute_tool(&server_tool("second"), &Parameters::new())
                    .await
            })
        };

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(first, "first");
        assert_eq!(second, "second");

        adapter.stop().await;
    }

    #[tokio::test]
    async fn dead_child_is_reported_then_recovered_from() {
        // head -n 1 answers one command and exits, leaving a dead pipe.
        let adapter = shell_adapter("echo READY; head -n 1", Some("READY"), 5);

        let first = adapter
            .execute_tool(&server_tool("hello"), &Parameters::new())
            .await;
        assert_eq!(first, "hello");

        let second = adapter
            .execute_tool(&server_tool("again"), &Parameters::new())
            .await;
        assert!(
            second.starts_with("Error communicating with server: "),
            "got: {second}"
        );
        assert_eq!(adapter.state().await, ProcessState::Failed);

        // The handle was cleared, so the next call restarts the backend.
        let third = adapter
            .execute_tool(&server_tool("fresh"), &Parameters::new())
            .await;
        assert_eq!(third, "fresh");

        adapter.stop().await;
        assert_eq!(adapter.state().await, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_a_started_run() {
        let adapter = shell_adapter("echo READY; cat", Some("READY"), 5);
        adapter.start().await.unwrap();

        adapter.stop().await;
        adapter.stop().await;

        assert_eq!(adapter.state().await, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn quit_command_is_honored_by_a_cooperative_child() {
        // `head -n 1` exits as soon as it reads the quit line, so the
        // graceful path completes well inside the shutdown bound.
        let adapter = shell_adapter("echo READY; head -n 1 > /dev/null; sleep 0", Some("READY"), 5);
        adapter.start().await.unwrap();

        let begun = Instant::now();
        adapter.stop().await;

        assert!(begun.elapsed() < SHUTDOWN_WAIT);
        assert_eq!(adapter.state().await, ProcessState::Stopped);
    }
}
