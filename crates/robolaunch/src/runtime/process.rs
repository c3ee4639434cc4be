//! Supervised node process

use crate::config::Output;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Registered but not yet started
    Created,
    /// Process is running
    Running,
    /// Process has stopped with exit code
    Stopped(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Everything needed to spawn one node process.
///
/// `env` holds additions on top of the inherited environment.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub executable: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub output: Output,
    pub respawn: bool,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            output: Output::Log,
            respawn: false,
        }
    }
}

/// Event emitted by a supervised process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { pid: u32 },
    Output { line: String, is_stderr: bool },
    Exited { code: Option<i32> },
    Failed { error: String },
}

/// Channel the monitor drains on its main-thread spin.
pub type ProcessEventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// A supervised child process
pub struct NodeProcess {
    pub spec: ProcessSpec,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    pub restart_count: u32,
    child: Option<Child>,
    event_tx: Option<ProcessEventSender>,
}

impl NodeProcess {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            status: ProcessStatus::Created,
            pid: None,
            started_at: None,
            restart_count: 0,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: ProcessEventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.spec.name.clone(), event));
        }
    }

    /// Spawn the process. A `screen` process inherits this terminal;
    /// a `log` process has its output forwarded line by line as events.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.spec.name.clone()));
        }

        log::info!(
            "[{}] starting: {} {}",
            self.spec.name,
            self.spec.executable,
            self.spec.args.join(" ")
        );

        let mut cmd = Command::new(&self.spec.executable);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .kill_on_drop(true);
        match self.spec.output {
            Output::Screen => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            Output::Log => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id().unwrap_or(0);
                self.pid = Some(pid);
                self.status = ProcessStatus::Running;
                self.started_at = Some(Instant::now());
                self.emit(ProcessEvent::Started { pid });
                if self.spec.output == Output::Log {
                    self.spawn_output_readers(&mut child);
                }
                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                self.status = ProcessStatus::Failed;
                let error = format!("failed to spawn process: {e}");
                log::error!("[{}] {}", self.spec.name, error);
                self.emit(ProcessEvent::Failed { error });
                Err(ProcessError::SpawnFailed {
                    name: self.spec.name.clone(),
                    source: e,
                })
            }
        }
    }

    fn spawn_output_readers(&self, child: &mut Child) {
        let Some(tx) = self.event_tx.clone() else {
            return;
        };
        if let Some(stdout) = child.stdout.take() {
            let name = self.spec.name.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send((
                        name.clone(),
                        ProcessEvent::Output {
                            line,
                            is_stderr: false,
                        },
                    ));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let name = self.spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send((
                        name.clone(),
                        ProcessEvent::Output {
                            line,
                            is_stderr: true,
                        },
                    ));
                }
            });
        }
    }

    /// Stop gracefully: SIGTERM, bounded wait, then SIGKILL.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        log::info!("[{}] stopping process...", self.spec.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.kill().await;
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code();
                self.status = ProcessStatus::Stopped(code);
                log::info!("[{}] process exited with code: {:?}", self.spec.name, code);
                self.emit(ProcessEvent::Exited { code });
            }
            Ok(Err(e)) => {
                log::error!("[{}] error waiting for process: {}", self.spec.name, e);
                self.status = ProcessStatus::Stopped(None);
            }
            Err(_) => {
                log::warn!(
                    "[{}] process did not exit within {:?}, forcing kill",
                    self.spec.name,
                    timeout
                );
                #[cfg(unix)]
                {
                    use nix::sys::signal::{kill, Signal};
                    use nix::unistd::Pid;

                    if let Some(pid) = self.pid {
                        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    }
                }
                let _ = child.wait().await;
                self.status = ProcessStatus::Stopped(None);
                self.emit(ProcessEvent::Exited { code: None });
            }
        }

        self.pid = None;
        Ok(())
    }

    /// Reap the child if it has exited; returns the current status.
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
                    log::error!("[{}] error checking process status: {}", self.spec.name, e);
                }
            }
        }
        self.status
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_running()
    }

    /// Exit code of the last run, when the process has stopped.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Stopped(code) => code,
            _ => None,
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

/// Errors that can occur with supervised processes
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

    #[error("Process '{0}' is not registered")]
    NotRegistered(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_reap() {
        let mut spec = ProcessSpec::new("quick", "true");
        spec.output = Output::Log;
        let mut process = NodeProcess::new(spec);
        process.start().unwrap();
        assert!(process.is_alive());

        // wait for the child to exit, then reap it
        for _ in 0..50 {
            if process.check_status().is_stopped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(process.status, ProcessStatus::Stopped(Some(0)));
        assert_eq!(process.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut process =
            NodeProcess::new(ProcessSpec::new("ghost", "/robolaunch-no-such-binary"));
        let err = process.start().unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
        assert_eq!(process.status, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_child() {
        let mut spec = ProcessSpec::new("sleeper", "sleep");
        spec.args = vec!["60".to_string()];
        let mut process = NodeProcess::new(spec);
        process.start().unwrap();

        process.stop(Duration::from_secs(2)).await.unwrap();
        assert!(process.status.is_stopped());
    }

    #[tokio::test]
    async fn test_output_events_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut spec = ProcessSpec::new("echoer", "echo");
        spec.args = vec!["hello".to_string()];
        let mut process = NodeProcess::new(spec).with_event_sender(tx);
        process.start().unwrap();

        let mut saw_line = false;
        for _ in 0..100 {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some((name, ProcessEvent::Output { line, .. }))) => {
                    assert_eq!(name, "echoer");
                    assert_eq!(line, "hello");
                    saw_line = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_line);
        process.stop(Duration::from_secs(1)).await.unwrap();
    }
}
