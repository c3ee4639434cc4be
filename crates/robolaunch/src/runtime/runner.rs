//! Launch lifecycle orchestrator
//!
//! Sequences the launch: validate and assign machines, set up and (if
//! configured) start the master, publish `/run_id`, start core nodes,
//! load parameters, run setup executables, spawn local nodes, delegate
//! remote ones, then supervise everything from the main task until
//! shutdown.

use crate::config::{
    ConfigError, CwdPolicy, ExecPhase, Executable, HostOverride, LaunchConfig, MasterAuto, Node,
    TestNode,
};
use crate::packages::PackageResolver;
use crate::runtime::master::{
    ensure_run_id, LookupOutcome, MasterClientFactory, MasterController, MasterError,
    LAUNCH_CALLER_ID, TIMEOUT_MASTER_START,
};
use crate::runtime::monitor::{MonitorError, ProcessMonitor, ShutdownHandle};
use crate::runtime::process::ProcessSpec;
use crate::runtime::remote::{LocalOnlyRemoteFactory, RemoteRunner, RemoteRunnerFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a runner instance participates in a launch session.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// This runner is a core (`roscore`-style) launch: an already-running
    /// master is an error rather than a peer.
    pub is_core: bool,
    /// Set when this runner is a child of another launcher; children skip
    /// parameter loading and remote delegation.
    pub server_uri: Option<String>,
}

/// Runs a launch configuration to completion.
///
/// The usual sequence is `launch()` followed by `spin()`; embedders that
/// need the main task for other work call `spin_once()` repeatedly and
/// `stop()` when done.
pub struct Runner {
    config: LaunchConfig,
    monitor: ProcessMonitor,
    master: MasterController,
    remote_factory: Box<dyn RemoteRunnerFactory>,
    remote: Option<Box<dyn RemoteRunner>>,
    packages: Arc<dyn PackageResolver>,
    options: RunnerOptions,
    main_thread: std::thread::ThreadId,
    process_seq: u32,
    stopped: bool,
}

impl Runner {
    pub fn new(
        config: LaunchConfig,
        master_factory: Arc<dyn MasterClientFactory>,
        packages: Arc<dyn PackageResolver>,
    ) -> Self {
        let master = MasterController::new(config.master.clone(), master_factory);
        Self {
            config,
            monitor: ProcessMonitor::new(),
            master,
            remote_factory: Box::new(LocalOnlyRemoteFactory),
            remote: None,
            packages,
            options: RunnerOptions::default(),
            main_thread: std::thread::current().id(),
            process_seq: 0,
            stopped: false,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_remote_factory(mut self, factory: Box<dyn RemoteRunnerFactory>) -> Self {
        self.remote_factory = factory;
        self
    }

    pub fn with_monitor(mut self, monitor: ProcessMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ProcessMonitor {
        &self.monitor
    }

    /// Handle for requesting shutdown from signal handlers.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.monitor.shutdown_handle()
    }

    /// Execute the launch. Returns the names of nodes that started and
    /// those that failed. Fatal errors tear the session down before
    /// propagating.
    pub async fn launch(&mut self) -> Result<(Vec<String>, Vec<String>), LaunchError> {
        let result = self.try_launch().await;
        if result.is_err() {
            self.stop().await;
        }
        result
    }

    async fn try_launch(&mut self) -> Result<(Vec<String>, Vec<String>), LaunchError> {
        self.config.validate()?;
        self.config.assign_machines()?;
        log::info!("{}", self.config.summary());

        self.setup_master().await?;

        if self.config.has_remote_nodes() && self.options.server_uri.is_none() {
            match self.remote_factory.create(&self.config)? {
                Some(mut remote) => {
                    remote.setup()?;
                    self.remote = Some(remote);
                }
                None => return Err(LaunchError::RemoteUnavailable),
            }
        }

        self.launch_master().await?;
        self.launch_core_nodes()?;

        // parameters belong to the parent launcher, not to child runners
        if self.options.server_uri.is_none() {
            self.load_parameters()?;
        }

        self.launch_setup_executables().await?;

        let (mut succeeded, mut failed) = self.launch_nodes();
        if let Some(remote) = self.remote.as_mut() {
            log::info!("launch_nodes: launching remote nodes ...");
            let (r_succeeded, r_failed) = remote.launch_remote_nodes()?;
            succeeded.extend(r_succeeded);
            failed.extend(r_failed);
        }

        self.monitor.registrations_complete();
        Ok((succeeded, failed))
    }

    /// Validate the master configuration, shut down an existing master
    /// when restarting, and rewrite a loopback URI before a local start.
    async fn setup_master(&mut self) -> Result<(), LaunchError> {
        log::info!("initial master URI is {}", self.master.uri());
        if self.master.auto() == MasterAuto::No {
            return Ok(());
        }

        // probes are expensive; save the state
        let mut running = self.master.is_running();
        if self.master.auto() == MasterAuto::Restart && running {
            self.master.stop_running_master().await?;
            running = false;
        }
        if !running {
            self.master.configure_local_start()?;
            self.config.master.uri = self.master.uri().to_string();
        }
        Ok(())
    }

    /// Start the master if configured, then ensure `/run_id` is set.
    async fn launch_master(&mut self) -> Result<(), LaunchError> {
        let auto = self.master.auto();
        let is_running = self.master.is_running();

        if self.options.is_core && is_running {
            return Err(LaunchError::MasterAlreadyRunning {
                uri: self.master.uri().to_string(),
            });
        }

        if matches!(auto, MasterAuto::Start | MasterAuto::Restart) && !is_running {
            log::info!("starting new master (master configured for auto {auto:?})");
            let ros_root = std::env::var("ROS_ROOT").ok();
            let spec = self.master.create_master_process(ros_root.as_deref())?;
            let name = spec.name.clone();
            self.monitor.register_core_proc(spec)?;
            self.monitor
                .start_process(&name)
                .map_err(|e| LaunchError::MasterStartFailed(e.to_string()))?;
            if !self.master.wait_until(true, TIMEOUT_MASTER_START).await {
                return Err(LaunchError::MasterUnreachable {
                    uri: self.master.uri().to_string(),
                });
            }
        }

        if !self.master.is_running() {
            return Err(LaunchError::MasterUnreachable {
                uri: self.master.uri().to_string(),
            });
        }

        let api = self.master.get()?;
        ensure_run_id(api.as_ref())?;
        Ok(())
    }

    /// Start any core service that the master does not already know.
    /// A failed core node is fatal.
    fn launch_core_nodes(&mut self) -> Result<(), LaunchError> {
        if self.config.nodes_core.is_empty() {
            return Ok(());
        }
        let api = self.master.get()?;

        let mut to_launch = Vec::new();
        for (i, node) in self.config.nodes_core.iter().enumerate() {
            let node_name = node
                .resolved_name()
                .unwrap_or_else(|| node.display_name());
            match api.lookup_node(LAUNCH_CALLER_ID, &node_name) {
                Ok(LookupOutcome::Unknown) => to_launch.push(i),
                Ok(LookupOutcome::Known(_)) => {
                    log::info!("core service [{node_name}] is already running, will not launch");
                }
                Ok(LookupOutcome::Other { code, message }) => {
                    log::warn!(
                        "master returned [{code}][{message}] on lookup of [{node_name}]; skipping"
                    );
                }
                Err(e) => {
                    log::warn!("master lookup of [{node_name}] failed: {e}; skipping");
                }
            }
        }

        for i in to_launch {
            let node = self.config.nodes_core[i].clone();
            let (name, success) = self.launch_node(&node, RegisterKind::Core);
            self.config.nodes_core[i].process_name = Some(name.clone());
            if success {
                log::info!("started core service [{name}]");
            } else {
                return Err(LaunchError::CoreNodeFailed { name });
            }
        }
        Ok(())
    }

    /// Push the configured parameters to the master: clears first, then
    /// sets, best effort per parameter.
    fn load_parameters(&self) -> Result<(), LaunchError> {
        log::info!("load_parameters starting ...");
        let api = self.master.get()?;

        for ns in &self.config.clear_params {
            match api.has_param(LAUNCH_CALLER_ID, ns) {
                Ok(true) => {
                    log::info!("deleting parameter [{ns}]");
                    if let Err(e) = api.delete_param(LAUNCH_CALLER_ID, ns) {
                        log::warn!("failed to delete parameter [{ns}]: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => log::warn!("failed to check parameter [{ns}]: {e}"),
            }
        }

        for param in self.config.params.values() {
            log::info!("setting parameter [{}]", param.name);
            if let Err(e) = api.set_param(LAUNCH_CALLER_ID, &param.name, &param.value) {
                log::warn!(
                    "failed to set parameter [{}] to [{}]: {e}",
                    param.name,
                    param.value
                );
            }
        }
        log::info!("... load_parameters complete");
        Ok(())
    }

    /// Run every setup-phase executable to completion, in order. A
    /// non-zero exit aborts the launch.
    async fn launch_setup_executables(&self) -> Result<(), LaunchError> {
        let executables: Vec<Executable> = self
            .config
            .executables
            .iter()
            .filter(|e| e.phase == ExecPhase::Setup)
            .cloned()
            .collect();
        for executable in executables {
            self.launch_executable(&executable).await?;
        }
        Ok(())
    }

    async fn launch_executable(&self, executable: &Executable) -> Result<(), LaunchError> {
        let command = if executable.in_ros_bin {
            match std::env::var("ROS_ROOT") {
                Ok(root) => PathBuf::from(root)
                    .join("bin")
                    .join(&executable.command)
                    .display()
                    .to_string(),
                Err(_) => executable.command.clone(),
            }
        } else {
            executable.command.clone()
        };

        log::info!("running {} {}", command, executable.args.join(" "));
        let status = tokio::process::Command::new(&command)
            .args(&executable.args)
            .status()
            .await
            .map_err(|e| LaunchError::ExecutableFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(LaunchError::ExecutableFailed {
                command,
                reason: format!("exit code {:?}", status.code()),
            });
        }
        Ok(())
    }

    /// Start every local non-core node, collecting successes and
    /// failures. Remote nodes are left to the remote delegate.
    fn launch_nodes(&mut self) -> (Vec<String>, Vec<String>) {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        log::info!("launch_nodes: launching local nodes ...");

        for i in 0..self.config.nodes.len() {
            let node = self.config.nodes[i].clone();
            let is_local = node.machine.as_ref().is_some_and(|m| m.is_local);
            if !is_local {
                continue;
            }
            let (name, success) = self.launch_node(&node, RegisterKind::Normal);
            self.config.nodes[i].process_name = Some(name.clone());
            if success {
                succeeded.push(name);
            } else {
                failed.push(name);
            }
        }

        log::info!("... launch_nodes complete");
        (succeeded, failed)
    }

    /// Create, register, and start one node process. Returns the process
    /// name (or the node's display name when construction failed) and
    /// whether the start succeeded.
    fn launch_node(&mut self, node: &Node, kind: RegisterKind) -> (String, bool) {
        log::debug!(
            "... preparing to launch node of type [{}/{}]",
            node.package,
            node.node_type
        );
        let spec = match self.create_node_process(node) {
            Ok(spec) => spec,
            Err(e) => {
                log::error!(
                    "cannot launch node of type [{}/{}]: {e}",
                    node.package,
                    node.node_type
                );
                return (node.display_name(), false);
            }
        };

        let name = spec.name.clone();
        let registered = match kind {
            RegisterKind::Core => self.monitor.register_core_proc(spec),
            RegisterKind::Normal => self.monitor.register(spec),
            RegisterKind::Test => self.monitor.register_test(spec),
        };
        if let Err(e) = registered {
            log::error!("cannot register node [{name}]: {e}");
            return (name, false);
        }

        match self.monitor.start_process(&name) {
            Ok(()) => (name, true),
            Err(e) => {
                let machine = node
                    .machine
                    .as_ref()
                    .map(|m| m.name.as_str())
                    .unwrap_or("local");
                log::error!(
                    "launch of {}/{} on {} failed: {e}",
                    node.package,
                    node.node_type,
                    machine
                );
                (name, false)
            }
        }
    }

    /// Build the process spec for a node: resolved executable, argv with
    /// remappings, environment with the middleware variables.
    fn create_node_process(&mut self, node: &Node) -> Result<ProcessSpec, LaunchError> {
        let machine = node.machine.as_ref().ok_or_else(|| LaunchError::UnassignedNode {
            node: node.display_name(),
        })?;
        let pkg_dir = self
            .packages
            .find_package(&node.package)
            .ok_or_else(|| LaunchError::PackageNotFound {
                package: node.package.clone(),
            })?;
        let executable = pkg_dir.join(&node.node_type);

        let name = match node.resolved_name() {
            Some(resolved) => resolved.trim_start_matches('/').replace('/', "-"),
            None => {
                self.process_seq += 1;
                format!("{}-{}-{}", node.package, node.node_type, self.process_seq)
            }
        };

        let mut spec = ProcessSpec::new(name, executable.display().to_string());
        spec.output = node.output;
        spec.respawn = node.respawn;

        let mut args = if node.args.trim().is_empty() {
            Vec::new()
        } else {
            shlex::split(&node.args).ok_or_else(|| LaunchError::BadNodeArgs {
                node: node.display_name(),
            })?
        };
        for remap in &node.remap_args {
            args.push(format!("{}:={}", remap.from, remap.to));
        }
        if let Some(node_name) = &node.name {
            args.push(format!("__name:={node_name}"));
        }
        spec.args = args;

        for env in &node.env_args {
            spec.env.insert(env.name.clone(), env.value.clone());
        }
        spec.env
            .insert("ROS_MASTER_URI".to_string(), self.master.uri().to_string());
        spec.env
            .insert("ROS_NAMESPACE".to_string(), node.namespace.clone());
        if let Some(root) = &machine.ros_root {
            spec.env.insert("ROS_ROOT".to_string(), root.clone());
        }
        if let Some(path) = &machine.ros_package_path {
            spec.env.insert("ROS_PACKAGE_PATH".to_string(), path.clone());
        }
        match &machine.host_override {
            Some(HostOverride::Ip(ip)) => {
                spec.env.insert("ROS_IP".to_string(), ip.clone());
            }
            Some(HostOverride::Hostname(name)) => {
                spec.env.insert("ROS_HOSTNAME".to_string(), name.clone());
            }
            None => {}
        }

        spec.working_dir = match node.cwd {
            CwdPolicy::Unset => None,
            CwdPolicy::RosRoot => machine.ros_root.as_ref().map(PathBuf::from),
            CwdPolicy::Node => executable.parent().map(PathBuf::from),
        };

        Ok(spec)
    }

    /// Check whether a node's process is still supervised and alive.
    pub fn is_node_running(&self, node: &Node) -> bool {
        node.process_name
            .as_ref()
            .is_some_and(|name| self.monitor.has_process(name))
    }

    /// One monitor cycle; true while processes remain.
    pub fn spin_once(&mut self) -> bool {
        self.monitor.mainthread_spin_once()
    }

    /// Supervise until shutdown. Must run on the thread that created the
    /// runner; ends with a full `stop()`.
    pub async fn spin(&mut self) {
        assert_eq!(
            std::thread::current().id(),
            self.main_thread,
            "spin() must run on the thread that created the runner"
        );
        if self.monitor.is_empty() {
            log::info!("no processes to monitor");
            self.stop().await;
            return;
        }
        self.monitor.mainthread_spin().await;
        log::info!("process monitor is done spinning, initiating full shutdown");
        self.stop().await;
    }

    /// Stop the launch and all associated processes. Not thread-safe;
    /// subsequent calls are no-ops.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.monitor.shutdown().await;
    }

    /// Launch one test node and poll until it exits or its time limit
    /// passes. The test process is stopped on timeout.
    pub async fn run_test(&mut self, test: &TestNode) -> Result<(), LaunchError> {
        let (name, success) = self.launch_node(&test.node, RegisterKind::Test);
        if !success {
            return Err(LaunchError::TestLaunchFailed {
                name: test.test_name.clone(),
            });
        }

        let deadline = Instant::now() + Duration::from_secs_f64(test.time_limit);
        loop {
            let remaining = self.monitor.mainthread_spin_once();
            if !self.monitor.has_process(&name) {
                return Ok(());
            }
            if Instant::now() > deadline {
                if let Err(e) = self.monitor.stop_process(&name).await {
                    log::warn!("failed to stop timed-out test [{name}]: {e}");
                }
                return Err(LaunchError::TestTimedOut {
                    name: test.test_name.clone(),
                    seconds: test.time_limit,
                });
            }
            if !remaining {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RegisterKind {
    Core,
    Normal,
    Test,
}

/// Errors raised by the launch lifecycle
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Master(#[from] MasterError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("could not contact master [{uri}]")]
    MasterUnreachable { uri: String },

    #[error(
        "cannot run as core: another master is already running at [{uri}]; \
         stop it before relaunching"
    )]
    MasterAlreadyRunning { uri: String },

    #[error("unable to auto-start master process: {0}")]
    MasterStartFailed(String),

    #[error("failed to start core service [{name}]")]
    CoreNodeFailed { name: String },

    #[error("command [{command}] failed: {reason}")]
    ExecutableFailed { command: String, reason: String },

    #[error("launch file declares remote nodes but no remote runner is available")]
    RemoteUnavailable,

    #[error("package not found: {package}")]
    PackageNotFound { package: String },

    #[error("cannot tokenize args for node [{node}]")]
    BadNodeArgs { node: String },

    #[error("node [{node}] has no machine assignment")]
    UnassignedNode { node: String },

    #[error("test [{name}] failed to launch")]
    TestLaunchFailed { name: String },

    #[error("test [{name}] exceeded its time limit of {seconds}s")]
    TestTimedOut { name: String, seconds: f64 },
}
