//! Master controller
//!
//! Classifies the configured master (no-auto / auto-start / auto-restart),
//! probes liveness, and prepares local master starts. The RPC client
//! itself is an external collaborator consumed through `MasterApi`.

use crate::config::{MasterAuto, MasterSpec, ParamValue};
use crate::net;
use crate::runtime::process::ProcessSpec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Caller id this launcher presents to the master.
pub const LAUNCH_CALLER_ID: &str = "/robolaunch";

/// How long to wait for a freshly-started master to come up.
pub const TIMEOUT_MASTER_START: Duration = Duration::from_secs(10);

/// How long to wait for a restarting master to go down.
pub const TIMEOUT_MASTER_STOP: Duration = Duration::from_secs(10);

const PROBE_PERIOD: Duration = Duration::from_millis(100);

/// Result of a node or service lookup on the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// code == 1: known, with its advertised URI
    Known(String),
    /// code == -1: not registered
    Unknown,
    /// anything else the master said
    Other { code: i32, message: String },
}

/// Opaque RPC handle to the master.
///
/// The return convention of the wire protocol (`code == 1` success,
/// `code == -1` not-found) is collapsed into typed results here.
pub trait MasterApi: Send + Sync {
    fn get_param_names(&self, caller_id: &str) -> Result<Vec<String>, MasterError>;
    fn has_param(&self, caller_id: &str, key: &str) -> Result<bool, MasterError>;
    fn set_param(&self, caller_id: &str, key: &str, value: &ParamValue)
        -> Result<(), MasterError>;
    fn delete_param(&self, caller_id: &str, key: &str) -> Result<(), MasterError>;
    fn lookup_node(&self, caller_id: &str, name: &str) -> Result<LookupOutcome, MasterError>;
    fn lookup_service(&self, caller_id: &str, name: &str) -> Result<LookupOutcome, MasterError>;
    fn shutdown(&self, caller_id: &str, reason: &str) -> Result<(), MasterError>;
}

/// Produces RPC handles for a master URI.
pub trait MasterClientFactory: Send + Sync {
    fn connect(&self, uri: &str) -> Result<Arc<dyn MasterApi>, MasterError>;
}

/// Placeholder factory for builds where no RPC client has been injected.
/// Every probe reports the master as unreachable.
pub struct UnconfiguredMasterFactory;

impl MasterClientFactory for UnconfiguredMasterFactory {
    fn connect(&self, _uri: &str) -> Result<Arc<dyn MasterApi>, MasterError> {
        Err(MasterError::NoClient)
    }
}

/// Holds the master spec and the client factory; callers fetch the RPC
/// handle through `get()` each time so a restarted master is picked up.
pub struct MasterController {
    spec: MasterSpec,
    factory: Arc<dyn MasterClientFactory>,
}

impl MasterController {
    pub fn new(spec: MasterSpec, factory: Arc<dyn MasterClientFactory>) -> Self {
        Self { spec, factory }
    }

    pub fn spec(&self) -> &MasterSpec {
        &self.spec
    }

    pub fn uri(&self) -> &str {
        &self.spec.uri
    }

    pub fn auto(&self) -> MasterAuto {
        self.spec.auto
    }

    /// Fresh RPC handle for the configured URI.
    pub fn get(&self) -> Result<Arc<dyn MasterApi>, MasterError> {
        self.factory.connect(&self.spec.uri)
    }

    /// Probe the master with a lightweight RPC; connection errors mean
    /// "not running".
    pub fn is_running(&self) -> bool {
        self.get()
            .and_then(|api| api.get_param_names(LAUNCH_CALLER_ID))
            .is_ok()
    }

    /// Prepare the URI for starting a master locally.
    ///
    /// A loopback URI is rewritten to this machine's canonical hostname so
    /// remote children can connect; a non-loopback host must resolve, and
    /// a warning is emitted when it does not match any local address.
    pub fn configure_local_start(&mut self) -> Result<(), MasterError> {
        let (host, _) = net::parse_http_host_port(&self.spec.uri)
            .map_err(|e| MasterError::from_net(&self.spec.uri, e))?;

        if net::is_localhost(&host) {
            let rewritten = net::remap_localhost_uri(&self.spec.uri)
                .map_err(|e| MasterError::from_net(&self.spec.uri, e))?;
            if rewritten != self.spec.uri {
                let (new_host, _) = net::parse_http_host_port(&rewritten)
                    .map_err(|e| MasterError::from_net(&rewritten, e))?;
                if net::resolve_host(&new_host)
                    .map(|a| !a.is_empty())
                    .unwrap_or(false)
                {
                    log::info!(
                        "changing master URI to [{rewritten}] for starting master locally"
                    );
                    self.spec.uri = rewritten;
                } else {
                    log::warn!(
                        "local hostname does not resolve; keeping master URI [{}]",
                        self.spec.uri
                    );
                }
            }
            return Ok(());
        }

        match net::resolve_host(&host) {
            Ok(addrs) if !addrs.is_empty() => {
                let locals = net::get_local_addresses();
                if !addrs.iter().any(|a| a.is_loopback() || locals.contains(a)) {
                    log::warn!(
                        "master host '{host}' resolves to {addrs:?}, which matches no local \
                         address ({locals:?}); nodes may fail to communicate. Set ROS_IP or \
                         ROS_HOSTNAME to the correct address."
                    );
                }
                Ok(())
            }
            _ => Err(MasterError::UnresolvableHost { host }),
        }
    }

    /// Wait until the master's running state matches `running`, bounded
    /// by `timeout`.
    pub async fn wait_until(&self, running: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running() == running {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PROBE_PERIOD).await;
        }
    }

    /// Ask a running master to shut down and wait for it to go away.
    pub async fn stop_running_master(&self) -> Result<(), MasterError> {
        log::info!("shutting down existing master at [{}]", self.spec.uri);
        if let Ok(api) = self.get() {
            // the master may drop the connection mid-shutdown
            let _ = api.shutdown(LAUNCH_CALLER_ID, "launcher restart request");
        }
        if !self.wait_until(false, TIMEOUT_MASTER_STOP).await {
            return Err(MasterError::StopTimeout {
                uri: self.spec.uri.clone(),
            });
        }
        Ok(())
    }

    /// Process spec for a new master serving this URI's port.
    pub fn create_master_process(
        &self,
        ros_root: Option<&str>,
    ) -> Result<ProcessSpec, MasterError> {
        let (_, port) = net::parse_http_host_port(&self.spec.uri)
            .map_err(|e| MasterError::from_net(&self.spec.uri, e))?;
        let executable = match ros_root {
            Some(root) => PathBuf::from(root)
                .join("bin")
                .join(&self.spec.master_type)
                .display()
                .to_string(),
            None => self.spec.master_type.clone(),
        };
        let mut spec = ProcessSpec::new("master", executable);
        spec.args = vec!["--core".to_string(), "-p".to_string(), port.to_string()];
        Ok(spec)
    }
}

/// Ensure `/run_id` exists on the master, generating it when absent.
/// Returns the freshly-set id, or `None` when one was already present.
pub fn ensure_run_id(api: &dyn MasterApi) -> Result<Option<String>, MasterError> {
    if api.has_param(LAUNCH_CALLER_ID, "/run_id")? {
        return Ok(None);
    }
    let run_id = uuid::Uuid::new_v4().to_string();
    log::info!("setting /run_id to {run_id}");
    api.set_param(LAUNCH_CALLER_ID, "/run_id", &ParamValue::Str(run_id.clone()))?;
    Ok(Some(run_id))
}

/// Errors from talking to or managing the master
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error(
        "no master RPC client is linked into this build; inject a MasterClientFactory"
    )]
    NoClient,

    #[error("Invalid master URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(
        "master host '{host}' does not resolve; fix the master URI or set \
         ROS_IP/ROS_HOSTNAME to a reachable address"
    )]
    UnresolvableHost { host: String },

    #[error("Cannot contact master at '{uri}': {reason}")]
    Unreachable { uri: String, reason: String },

    #[error("Master RPC failed with code {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Existing master at '{uri}' did not stop in time")]
    StopTimeout { uri: String },
}

impl MasterError {
    fn from_net(uri: &str, e: net::NetError) -> Self {
        MasterError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        }
    }
}
