//! Process monitor
//!
//! Owns every supervised child. Registration happens up front; once the
//! runner declares registrations complete the set only shrinks. All
//! bookkeeping that must happen on the main thread (event draining,
//! reaping, respawns) runs inside `mainthread_spin_once`.

use crate::runtime::process::{
    NodeProcess, ProcessError, ProcessEvent, ProcessEventSender, ProcessSpec,
};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Poll period of the main-thread spin loop.
const SPIN_PERIOD: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL at shutdown.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle that requests monitor shutdown; safe to use from a
/// signal handler.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn request(&self) {
        let _ = self.0.send(true);
    }
}

struct Supervised {
    process: NodeProcess,
    core: bool,
}

/// Supervises the set of launched processes.
pub struct ProcessMonitor {
    procs: IndexMap<String, Supervised>,
    event_tx: ProcessEventSender,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    registrations_open: bool,
    stop_timeout: Duration,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            procs: IndexMap::new(),
            event_tx,
            event_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            registrations_open: true,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Handle for requesting shutdown from signal handlers or embedders.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Register a non-core process.
    pub fn register(&mut self, spec: ProcessSpec) -> Result<(), MonitorError> {
        self.register_proc(spec, false)
    }

    /// Register a core process; core processes are shut down last.
    pub fn register_core_proc(&mut self, spec: ProcessSpec) -> Result<(), MonitorError> {
        self.register_proc(spec, true)
    }

    fn register_proc(&mut self, spec: ProcessSpec, core: bool) -> Result<(), MonitorError> {
        if !self.registrations_open {
            return Err(MonitorError::RegistrationsClosed(spec.name));
        }
        if self.procs.contains_key(&spec.name) {
            return Err(MonitorError::DuplicateProcess(spec.name));
        }
        let process = NodeProcess::new(spec).with_event_sender(self.event_tx.clone());
        self.procs
            .insert(process.spec.name.clone(), Supervised { process, core });
        Ok(())
    }

    /// One-way barrier: no further registrations are accepted.
    pub fn registrations_complete(&mut self) {
        self.registrations_open = false;
    }

    /// Register a test process. Test nodes run after the launch has
    /// sealed its registrations, so they bypass the barrier.
    pub fn register_test(&mut self, spec: ProcessSpec) -> Result<(), MonitorError> {
        if self.procs.contains_key(&spec.name) {
            return Err(MonitorError::DuplicateProcess(spec.name));
        }
        let process = NodeProcess::new(spec).with_event_sender(self.event_tx.clone());
        self.procs
            .insert(process.spec.name.clone(), Supervised { process, core: false });
        Ok(())
    }

    /// Start a registered process.
    pub fn start_process(&mut self, name: &str) -> Result<(), ProcessError> {
        let sup = self
            .procs
            .get_mut(name)
            .ok_or_else(|| ProcessError::NotRegistered(name.to_string()))?;
        sup.process.start()
    }

    /// Liveness by name: registered and not yet observed dead.
    pub fn has_process(&self, name: &str) -> bool {
        self.procs
            .get(name)
            .map(|s| !s.process.status.is_stopped())
            .unwrap_or(false)
    }

    /// Names of processes that have not been observed dead.
    pub fn get_active_names(&self) -> Vec<String> {
        self.procs
            .iter()
            .filter(|(_, s)| !s.process.status.is_stopped())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    /// One cycle of main-thread bookkeeping: drain the event inbox, reap
    /// exited children, restart `respawn` children, drop the dead.
    /// Returns true while at least one supervised process remains.
    pub fn mainthread_spin_once(&mut self) -> bool {
        while let Ok((name, event)) = self.event_rx.try_recv() {
            Self::log_event(&name, &event);
        }

        let shutting_down = self.shutdown_requested();
        let mut dead = Vec::new();
        for (name, sup) in self.procs.iter_mut() {
            let status = sup.process.check_status();
            if !status.is_stopped() {
                continue;
            }
            if sup.process.spec.respawn && !shutting_down {
                log::info!(
                    "[{}] respawn requested (exit code {:?})",
                    name,
                    sup.process.exit_code()
                );
                sup.process.restart_count += 1;
                if let Err(e) = sup.process.start() {
                    log::error!("[{}] respawn failed: {}", name, e);
                    dead.push(name.clone());
                }
            } else {
                log::info!("[{}] process has finished", name);
                dead.push(name.clone());
            }
        }
        for name in dead {
            self.procs.shift_remove(&name);
        }

        !self.procs.is_empty()
    }

    /// Spin until no processes remain or shutdown is requested. Must be
    /// called from the runner's main task.
    pub async fn mainthread_spin(&mut self) {
        loop {
            if self.shutdown_requested() {
                break;
            }
            if !self.mainthread_spin_once() {
                break;
            }
            tokio::time::sleep(SPIN_PERIOD).await;
        }
    }

    /// Stop and deregister a single process.
    pub async fn stop_process(&mut self, name: &str) -> Result<(), ProcessError> {
        let Some(mut sup) = self.procs.shift_remove(name) else {
            return Err(ProcessError::NotRegistered(name.to_string()));
        };
        sup.process.stop(self.stop_timeout).await
    }

    /// Stop everything: non-core processes first, core processes last,
    /// each stopped gracefully and observed dead before return.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.registrations_open = false;
        log::info!("shutting down process monitor...");

        for core_phase in [false, true] {
            let names: Vec<String> = self
                .procs
                .iter()
                .filter(|(_, s)| s.core == core_phase)
                .map(|(name, _)| name.clone())
                .collect();
            for name in names.into_iter().rev() {
                if let Some(sup) = self.procs.get_mut(&name) {
                    if let Err(e) = sup.process.stop(self.stop_timeout).await {
                        log::error!("[{}] error stopping process: {}", name, e);
                    }
                }
            }
        }
        self.procs.clear();

        while let Ok((name, event)) = self.event_rx.try_recv() {
            Self::log_event(&name, &event);
        }
        log::info!("... process monitor shutdown complete");
    }

    fn log_event(name: &str, event: &ProcessEvent) {
        match event {
            ProcessEvent::Started { pid } => {
                log::debug!("[{name}] process started with pid {pid}");
            }
            ProcessEvent::Output { line, is_stderr } => {
                if *is_stderr {
                    log::warn!("[{name}] {line}");
                } else {
                    log::info!("[{name}] {line}");
                }
            }
            ProcessEvent::Exited { code } => {
                log::debug!("[{name}] process exited with code {code:?}");
            }
            ProcessEvent::Failed { error } => {
                log::error!("[{name}] process failed: {error}");
            }
        }
    }
}

/// Errors from process registration
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("A process named '{0}' is already registered")]
    DuplicateProcess(String),

    #[error("Cannot register '{0}': registrations are complete")]
    RegistrationsClosed(String),
}
