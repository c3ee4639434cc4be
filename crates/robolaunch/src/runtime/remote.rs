//! Remote delegation seam
//!
//! Nodes bound to non-local machines are handed to a `RemoteRunner`,
//! which stands up per-machine child launchers and reports per-node
//! results. The concrete transport (SSH child sessions) lives outside
//! this crate; the factory is injected into the runner.

use crate::config::LaunchConfig;
use crate::runtime::runner::LaunchError;

/// Delegate that launches nodes on remote machines.
pub trait RemoteRunner: Send {
    /// Stand up the per-machine child runners.
    fn setup(&mut self) -> Result<(), LaunchError>;

    /// Launch every remote node; returns the names of nodes that
    /// succeeded and failed.
    fn launch_remote_nodes(&mut self) -> Result<(Vec<String>, Vec<String>), LaunchError>;
}

/// Creates a remote runner for a config, or `None` when remote
/// delegation is not available in this build.
pub trait RemoteRunnerFactory: Send + Sync {
    fn create(
        &self,
        config: &LaunchConfig,
    ) -> Result<Option<Box<dyn RemoteRunner>>, LaunchError>;
}

/// Default factory for local-only launches. Configs that declare remote
/// nodes fail at launch time with an actionable error.
pub struct LocalOnlyRemoteFactory;

impl RemoteRunnerFactory for LocalOnlyRemoteFactory {
    fn create(
        &self,
        _config: &LaunchConfig,
    ) -> Result<Option<Box<dyn RemoteRunner>>, LaunchError> {
        Ok(None)
    }
}
