//! Managed child process started by an `ExecuteProcess` action

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is pending start
    Pending,
    /// Process is running
    Running,
    /// Process has stopped with exit code
    Stopped(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Fully substituted command for spawning a process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Process name (for logging)
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
    /// Process failed to start
    Failed { error: String },
}

pub type EventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// A managed child process
pub struct ManagedProcess {
    /// Process configuration
    pub config: ProcessConfig,
    /// Current status
    pub status: ProcessStatus,
    /// Process ID (if running)
    pub pid: Option<u32>,
    child: Option<Child>,
    event_tx: Option<EventSender>,
}

impl ManagedProcess {
    /// Create a new managed process
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.name.clone(), event));
        }
    }

    /// Start the process
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.name.clone()));
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.config.name,
            self.config.executable,
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                log::error!("[{}] Failed to spawn process: {}", self.config.name, e);
                self.emit(ProcessEvent::Failed {
                    error: e.to_string(),
                });
                return Err(ProcessError::SpawnFailed {
                    name: self.config.name.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;
        self.emit(ProcessEvent::Started { pid });

        if let Some(tx) = &self.event_tx {
            if let Some(stdout) = child.stdout.take() {
                forward_lines(self.config.name.clone(), stdout, false, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(self.config.name.clone(), stderr, true, tx.clone());
            }
        }

        self.child = Some(child);
        Ok(())
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after timeout)
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Err(ProcessError::NotRunning(self.config.name.clone()));
        };

        log::info!("[{}] Stopping process...", self.config.name);

        // Try graceful shutdown first (SIGTERM on Unix)
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.config.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit gracefully, forcing kill",
                    self.config.name
                );
                let _ = child.kill().await;
                None
            }
        };

        log::info!("[{}] Process exited with code: {:?}", self.config.name, code);
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
        Ok(())
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            let _ = kill(Pid::from_raw(pid as i32), signal);
        }
    }

    /// Check if the process is still running
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "[{}] Error checking process status: {}",
                        self.config.name,
                        e
                    );
                }
            }
        }

        self.status
    }
}

/// Send every line of a child stream as an output event
fn forward_lines<R>(name: String, stream: R, is_stderr: bool, tx: EventSender)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let event = ProcessEvent::Output { line, is_stderr };
            if tx.send((name.clone(), event)).is_err() {
                break;
            }
        }
    });
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}
