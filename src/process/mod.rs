//! Lifecycle of the resident server process.
//!
//! The status and PID files are hints. Every decision is confirmed with a
//! live `GET /health` probe, so a crashed server that left its files behind
//! is reported as [`ServerState::Unknown`], never as running.

pub mod files;
pub mod signal;

pub use files::{RuntimeFiles, StatusRecord};

use crate::client::RemoteClient;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::handlers::HealthResponse;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Runtime files exist but the server does not answer.
    Unknown,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: Option<u32> },
    /// The child was spawned but never answered `/health`. It is left running.
    TimedOut { pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: Option<u32> },
    /// The server does not answer but its recorded process is still alive.
    /// Runtime files are kept so the PID is not lost.
    Unresponsive { pid: u32 },
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub state: ServerState,
    pub record: Option<StatusRecord>,
    /// Live answer from `/health`, present only when running.
    pub health: Option<HealthResponse>,
    pub uptime: Option<chrono::Duration>,
}

pub struct ProcessManager {
    files: RuntimeFiles,
    client: RemoteClient,
    program: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    state: ServerState,
}

impl ProcessManager {
    /// Manager that spawns the current executable with `serve`.
    pub fn new(config: &Config) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            AppError::ResourceError(format!("Cannot locate the current executable: {}", e))
        })?;
        Ok(Self {
            files: RuntimeFiles::new(config.runtime_dir.clone()),
            client: RemoteClient::new(config)?,
            program,
            args: vec!["serve".to_string()],
            startup_timeout: config.startup_timeout,
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
            state: ServerState::Stopped,
        })
    }

    /// Spawn `program args...` instead of `<current exe> serve`.
    pub fn with_command(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// State as of the last operation.
    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn files(&self) -> &RuntimeFiles {
        &self.files
    }

    pub async fn start(&mut self) -> Result<StartOutcome> {
        if self.client.is_live().await {
            self.state = ServerState::Running;
            let pid = self.files.read_pid();
            tracing::info!(?pid, "Server already running");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        self.state = ServerState::Starting;
        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = ServerState::Stopped;
                return Err(e);
            }
        };
        let pid = child.id();
        tracing::info!(
            pid,
            program = %self.program.display(),
            log = %self.files.log_path().display(),
            "Spawned server process"
        );

        let deadline = Instant::now() + self.startup_timeout;
        loop {
            if self.client.is_live().await {
                self.state = ServerState::Running;
                tracing::info!(pid, "Server is up");
                return Ok(StartOutcome::Started { pid });
            }

            if let Ok(Some(status)) = child.try_wait() {
                self.state = ServerState::Stopped;
                return Err(AppError::ResourceError(format!(
                    "Server exited during startup ({}); see {}",
                    status,
                    self.files.log_path().display()
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        tracing::warn!(
            pid,
            timeout_ms = self.startup_timeout.as_millis() as u64,
            "Server did not become healthy before the startup timeout"
        );
        self.state = ServerState::Unknown;
        Ok(StartOutcome::TimedOut { pid })
    }

    fn spawn(&self) -> Result<std::process::Child> {
        fs::create_dir_all(self.files.dir()).map_err(|e| {
            AppError::ResourceError(format!(
                "Failed to create {}: {}",
                self.files.dir().display(),
                e
            ))
        })?;

        let log_path = self.files.log_path();
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                AppError::ResourceError(format!("Failed to open {}: {}", log_path.display(), e))
            })?;
        let log_err = log.try_clone().map_err(|e| {
            AppError::ResourceError(format!("Failed to open {}: {}", log_path.display(), e))
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group, so a Ctrl+C in the launching terminal does not reach it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|e| {
            AppError::ResourceError(format!(
                "Failed to spawn {}: {}",
                self.program.display(),
                e
            ))
        })
    }

    pub async fn stop(&mut self) -> Result<StopOutcome> {
        if !self.client.is_live().await {
            if let Some(pid) = self.files.read_pid().filter(|&pid| signal::process_alive(pid)) {
                tracing::warn!(
                    pid,
                    dir = %self.files.dir().display(),
                    "Server not answering but its process is alive; keeping runtime files"
                );
                self.state = ServerState::Unknown;
                return Ok(StopOutcome::Unresponsive { pid });
            }
            if self.files.any_exist() {
                tracing::info!("Server not answering; removing stale runtime files");
                self.files.clear()?;
            }
            self.state = ServerState::Stopped;
            return Ok(StopOutcome::NotRunning);
        }

        self.state = ServerState::Stopping;
        let pid = self.files.read_pid();

        if let Err(e) = self.client.shutdown().await {
            tracing::warn!(error = %e, "Shutdown request failed; falling back to SIGTERM");
        }

        if let Some(pid) = pid {
            // An in-process server (tests, embedding hosts) must not signal itself
            if pid != std::process::id() && signal::process_alive(pid) {
                if signal::terminate(pid) {
                    tracing::info!(pid, "Sent SIGTERM to server");
                } else {
                    tracing::warn!(pid, "Failed to signal server process");
                }
            }
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while Instant::now() < deadline && self.client.is_live().await {
            tokio::time::sleep(self.poll_interval.min(Duration::from_millis(100))).await;
        }

        self.files.clear()?;
        self.state = ServerState::Stopped;
        Ok(StopOutcome::Stopped { pid })
    }

    pub async fn status(&mut self) -> ServerStatus {
        match self.client.health().await {
            Ok(health) => {
                let record = self.files.read_status();
                let uptime = record.as_ref().map(|r| Utc::now() - r.start_time);
                self.state = ServerState::Running;
                ServerStatus {
                    state: ServerState::Running,
                    record,
                    health: Some(health),
                    uptime,
                }
            }
            Err(e) => {
                let state = if self.files.any_exist() {
                    tracing::debug!(error = %e, "Runtime files present but server is not answering");
                    ServerState::Unknown
                } else {
                    ServerState::Stopped
                };
                self.state = state;
                ServerStatus {
                    state,
                    record: self.files.read_status(),
                    health: None,
                    uptime: None,
                }
            }
        }
    }
}
