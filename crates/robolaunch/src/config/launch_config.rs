//! Resolved launch configuration
//!
//! The loader freezes everything it parses into a `LaunchConfig`. After
//! `validate` and `assign_machines` the config is the complete plan the
//! runner executes: every node bound to a concrete machine, every
//! parameter fully named.

use crate::names;
use crate::net;
use indexmap::IndexMap;
use std::fmt::Write as _;

/// Fallback master URI when neither the environment nor the launch file
/// names one.
pub const DEFAULT_MASTER_URI: &str = "http://localhost:11311";

/// Default master server executable name.
pub const DEFAULT_MASTER_TYPE: &str = "rosmaster";

/// A typed parameter value destined for the master parameter server.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Yaml(serde_yaml::Value),
    Bin(Vec<u8>),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Double(d) => write!(f, "{d}"),
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Yaml(v) => {
                write!(f, "{}", serde_yaml::to_string(v).unwrap_or_default().trim_end())
            }
            ParamValue::Bin(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A parameter bound to its fully-resolved global name.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

/// A name remapping passed to a node's command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    pub from: String,
    pub to: String,
}

/// An environment variable addition for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Master auto-management policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterAuto {
    #[default]
    No,
    Start,
    Restart,
}

/// The configured master service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterSpec {
    pub master_type: String,
    pub uri: String,
    pub auto: MasterAuto,
}

impl MasterSpec {
    /// Master spec from the environment (`ROS_MASTER_URI`), with defaults.
    pub fn from_env() -> Self {
        let uri = std::env::var("ROS_MASTER_URI")
            .unwrap_or_else(|_| DEFAULT_MASTER_URI.to_string());
        Self {
            master_type: DEFAULT_MASTER_TYPE.to_string(),
            uri,
            auto: MasterAuto::No,
        }
    }
}

impl Default for MasterSpec {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Network identity override propagated to nodes on a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOverride {
    Ip(String),
    Hostname(String),
}

/// A named host that nodes may be placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub address: String,
    pub ros_root: Option<String>,
    pub ros_package_path: Option<String>,
    pub host_override: Option<HostOverride>,
    pub ssh_port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Eligible for automatic assignment (`default="never"` clears this)
    pub assignable: bool,
    pub is_default: bool,
    /// Set by `assign_machines`: the address refers to this host
    pub is_local: bool,
}

impl Machine {
    /// The machine synthesized for nodes with no machine and no default.
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            address: "localhost".to_string(),
            ros_root: std::env::var("ROS_ROOT").ok(),
            ros_package_path: std::env::var("ROS_PACKAGE_PATH").ok(),
            host_override: None,
            ssh_port: 22,
            user: None,
            password: None,
            assignable: true,
            is_default: false,
            is_local: true,
        }
    }
}

/// Where a node writes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Log,
    Screen,
}

/// Working-directory policy for a node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CwdPolicy {
    #[default]
    Unset,
    RosRoot,
    Node,
}

/// One supervised child process declared in the launch file.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub package: String,
    pub node_type: String,
    pub name: Option<String>,
    /// Global namespace, trailing slash
    pub namespace: String,
    /// Machine reference as written (or stamped from the scoped default)
    pub machine_name: Option<String>,
    pub args: String,
    pub output: Output,
    pub respawn: bool,
    pub cwd: CwdPolicy,
    pub remap_args: Vec<Remap>,
    pub env_args: Vec<EnvVar>,
    /// Bound by `assign_machines`
    pub machine: Option<Machine>,
    /// Recorded at launch for later liveness queries
    pub process_name: Option<String>,
}

impl Node {
    pub fn new(package: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            node_type: node_type.into(),
            name: None,
            namespace: "/".to_string(),
            machine_name: None,
            args: String::new(),
            output: Output::default(),
            respawn: false,
            cwd: CwdPolicy::default(),
            remap_args: Vec::new(),
            env_args: Vec::new(),
            machine: None,
            process_name: None,
        }
    }

    /// Fully-qualified node name, when the node is named.
    pub fn resolved_name(&self) -> Option<String> {
        self.name
            .as_ref()
            .map(|n| names::ns_join(&self.namespace, n))
    }

    /// Name used in logs and launch result lists.
    pub fn display_name(&self) -> String {
        self.resolved_name()
            .unwrap_or_else(|| format!("{}/{}", self.package, self.node_type))
    }
}

/// A test node: a node with a result name and a deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct TestNode {
    pub node: Node,
    pub test_name: String,
    pub time_limit: f64,
}

/// Lifecycle phase an executable runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    Setup,
    Run,
    Teardown,
}

/// A helper executable run as part of the launch lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub command: String,
    pub args: Vec<String>,
    pub phase: ExecPhase,
    /// Command is resolved under `<ros_root>/bin`
    pub in_ros_bin: bool,
}

/// The fully-resolved, validated launch plan.
#[derive(Debug, Default)]
pub struct LaunchConfig {
    pub master: MasterSpec,
    pub machines: IndexMap<String, Machine>,
    pub params: IndexMap<String, Param>,
    pub clear_params: Vec<String>,
    pub nodes: Vec<Node>,
    pub nodes_core: Vec<Node>,
    pub tests: Vec<TestNode>,
    pub executables: Vec<Executable>,
}

impl LaunchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_master(&mut self, master: MasterSpec) {
        self.master = master;
    }

    /// Add a machine to the catalog. Re-declaring a machine with identical
    /// configuration is tolerated; a conflicting redeclaration is an error.
    pub fn add_machine(&mut self, machine: Machine) -> Result<(), ConfigError> {
        if let Some(existing) = self.machines.get(&machine.name) {
            if *existing == machine {
                return Ok(());
            }
            return Err(ConfigError::MachineConflict {
                name: machine.name.clone(),
            });
        }
        self.machines.insert(machine.name.clone(), machine);
        Ok(())
    }

    /// Add a parameter; a later declaration of the same name wins.
    pub fn add_param(&mut self, param: Param) {
        self.params.insert(param.name.clone(), param);
    }

    /// Record a namespace to clear on the master before any sets.
    pub fn add_clear_param(&mut self, ns: String) {
        if !self.clear_params.contains(&ns) {
            self.clear_params.push(ns);
        }
    }

    pub fn add_node(&mut self, node: Node, core: bool) {
        if core {
            self.nodes_core.push(node);
        } else {
            self.nodes.push(node);
        }
    }

    pub fn add_test(&mut self, test: TestNode) {
        self.tests.push(test);
    }

    pub fn add_executable(&mut self, executable: Executable) {
        self.executables.push(executable);
    }

    fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_core
            .iter()
            .chain(self.nodes.iter())
            .chain(self.tests.iter().map(|t| &t.node))
    }

    fn all_nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes_core
            .iter_mut()
            .chain(self.nodes.iter_mut())
            .chain(self.tests.iter_mut().map(|t| &mut t.node))
    }

    /// Validate the configuration: parseable master URI, consistent
    /// machine declarations, resolvable machine references, complete node
    /// specs. Running `validate` after `assign_machines` succeeds is a
    /// no-op.
    pub fn validate(&self) -> Result<(), ConfigError> {
        net::parse_http_host_port(&self.master.uri).map_err(|e| {
            ConfigError::InvalidMasterUri {
                uri: self.master.uri.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut default = None;
        for machine in self.machines.values() {
            if machine.is_default {
                if let Some(first) = default {
                    return Err(ConfigError::MultipleDefaultMachines {
                        first,
                        second: machine.name.clone(),
                    });
                }
                default = Some(machine.name.clone());
            }
        }

        for node in self.all_nodes() {
            if node.package.trim().is_empty() || node.node_type.trim().is_empty() {
                return Err(ConfigError::IncompleteNode {
                    node: node.display_name(),
                });
            }
            if let Some(name) = &node.machine_name {
                if !self.machines.contains_key(name) {
                    return Err(ConfigError::UnknownMachine {
                        node: node.display_name(),
                        machine: name.clone(),
                    });
                }
            }
        }

        for test in &self.tests {
            if test.time_limit <= 0.0 {
                return Err(ConfigError::InvalidTimeLimit {
                    test: test.test_name.clone(),
                    value: test.time_limit,
                });
            }
        }

        Ok(())
    }

    /// Bind every node to a concrete machine.
    ///
    /// Resolution order: the node's explicit machine, else the default
    /// machine, else a synthesized local machine. Idempotent.
    pub fn assign_machines(&mut self) -> Result<(), ConfigError> {
        for machine in self.machines.values_mut() {
            machine.is_local = net::is_local_address(&machine.address);
        }

        let default_name = self
            .machines
            .values()
            .find(|m| m.is_default && m.assignable)
            .map(|m| m.name.clone());

        let any_unassigned = self.all_nodes().any(|n| n.machine_name.is_none());
        let fallback = match default_name {
            Some(name) => Some(name),
            None if any_unassigned => {
                let local = Machine::local();
                let name = local.name.clone();
                self.machines.entry(name.clone()).or_insert(local);
                Some(name)
            }
            None => None,
        };

        let machines = self.machines.clone();
        for node in self.all_nodes_mut() {
            let name = match (&node.machine_name, &fallback) {
                (Some(name), _) => name.clone(),
                (None, Some(fallback)) => fallback.clone(),
                (None, None) => unreachable!("fallback machine synthesized above"),
            };
            let machine = machines.get(&name).ok_or_else(|| ConfigError::UnknownMachine {
                node: "<node>".to_string(),
                machine: name.clone(),
            })?;
            node.machine_name = Some(name);
            node.machine = Some(machine.clone());
        }
        Ok(())
    }

    /// True when any node is bound to a non-local machine. Only meaningful
    /// after `assign_machines`.
    pub fn has_remote_nodes(&self) -> bool {
        self.all_nodes()
            .any(|n| n.machine.as_ref().is_some_and(|m| !m.is_local))
    }

    /// Human-readable plan: parameters, machines, nodes by namespace.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SUMMARY");
        let _ = writeln!(out, "=======");

        if !self.params.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "PARAMETERS");
            for param in self.params.values() {
                let _ = writeln!(out, " * {} = {}", param.name, param.value);
            }
        }

        if !self.machines.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "MACHINES");
            for machine in self.machines.values() {
                let _ = writeln!(out, " * {} ({})", machine.name, machine.address);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "NODES");
        let mut by_ns: IndexMap<&str, Vec<&Node>> = IndexMap::new();
        for node in self.nodes_core.iter().chain(self.nodes.iter()) {
            by_ns.entry(node.namespace.as_str()).or_default().push(node);
        }
        for (ns, nodes) in &by_ns {
            let _ = writeln!(out, "  {ns}");
            for node in nodes {
                let _ = writeln!(
                    out,
                    "    {} ({}/{})",
                    node.name.as_deref().unwrap_or("<anonymous>"),
                    node.package,
                    node.node_type
                );
            }
        }
        out
    }
}

/// Errors from configuration validation and machine assignment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Machine '{name}' redeclared with a different configuration")]
    MachineConflict { name: String },

    #[error("More than one default machine: '{first}' and '{second}'")]
    MultipleDefaultMachines { first: String, second: String },

    #[error("Invalid master URI '{uri}': {reason}")]
    InvalidMasterUri { uri: String, reason: String },

    #[error("Node '{node}' references unknown machine '{machine}'")]
    UnknownMachine { node: String, machine: String },

    #[error("Node '{node}' is missing its package or type")]
    IncompleteNode { node: String },

    #[error("Test '{test}' has non-positive time limit {value}")]
    InvalidTimeLimit { test: String, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str, address: &str) -> Machine {
        Machine {
            name: name.to_string(),
            address: address.to_string(),
            ros_root: None,
            ros_package_path: None,
            host_override: None,
            ssh_port: 22,
            user: None,
            password: None,
            assignable: true,
            is_default: false,
            is_local: false,
        }
    }

    #[test]
    fn test_assign_machines_synthesizes_local() {
        let mut config = LaunchConfig::new();
        config.add_node(Node::new("p", "t"), false);

        config.assign_machines().unwrap();
        let bound = config.nodes[0].machine.as_ref().unwrap();
        assert_eq!(bound.name, "local");
        assert!(bound.is_local);
        assert!(!config.has_remote_nodes());
    }

    #[test]
    fn test_assign_machines_prefers_explicit_then_default() {
        let mut config = LaunchConfig::new();
        let mut default = machine("base", "localhost");
        default.is_default = true;
        config.add_machine(default).unwrap();
        config.add_machine(machine("arm", "localhost")).unwrap();

        let mut explicit = Node::new("p", "t");
        explicit.machine_name = Some("arm".to_string());
        config.add_node(explicit, false);
        config.add_node(Node::new("p", "t2"), false);

        config.assign_machines().unwrap();
        assert_eq!(config.nodes[0].machine.as_ref().unwrap().name, "arm");
        assert_eq!(config.nodes[1].machine.as_ref().unwrap().name, "base");
    }

    #[test]
    fn test_assign_machines_idempotent() {
        let mut config = LaunchConfig::new();
        config.add_node(Node::new("p", "t"), false);

        config.assign_machines().unwrap();
        let first = config.nodes[0].clone();
        config.assign_machines().unwrap();
        assert_eq!(config.nodes[0], first);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_machine() {
        let mut config = LaunchConfig::new();
        let mut node = Node::new("p", "t");
        node.machine_name = Some("ghost".to_string());
        config.add_node(node, false);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownMachine { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_master_uri() {
        let mut config = LaunchConfig::new();
        config.master.uri = "nonsense".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMasterUri { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_two_defaults() {
        let mut config = LaunchConfig::new();
        let mut a = machine("a", "localhost");
        a.is_default = true;
        let mut b = machine("b", "localhost");
        b.is_default = true;
        config.add_machine(a).unwrap();
        config.add_machine(b).unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleDefaultMachines { .. })
        ));
    }

    #[test]
    fn test_machine_conflict_detection() {
        let mut config = LaunchConfig::new();
        config.add_machine(machine("a", "hostA")).unwrap();
        // identical redeclaration tolerated
        config.add_machine(machine("a", "hostA")).unwrap();
        // conflicting redeclaration rejected
        assert!(matches!(
            config.add_machine(machine("a", "hostB")),
            Err(ConfigError::MachineConflict { .. })
        ));
    }

    #[test]
    fn test_has_remote_nodes() {
        let mut config = LaunchConfig::new();
        config
            .add_machine(machine("far", "far.invalid.example"))
            .unwrap();
        let mut node = Node::new("p", "t");
        node.machine_name = Some("far".to_string());
        config.add_node(node, false);

        config.assign_machines().unwrap();
        assert!(config.has_remote_nodes());
    }

    #[test]
    fn test_later_param_wins() {
        let mut config = LaunchConfig::new();
        config.add_param(Param {
            name: "/x".to_string(),
            value: ParamValue::Int(1),
        });
        config.add_param(Param {
            name: "/x".to_string(),
            value: ParamValue::Int(2),
        });

        assert_eq!(config.params.len(), 1);
        assert_eq!(config.params["/x"].value, ParamValue::Int(2));
    }

    #[test]
    fn test_summary_lists_nodes_by_namespace() {
        let mut config = LaunchConfig::new();
        let mut node = Node::new("p", "t");
        node.name = Some("n".to_string());
        node.namespace = "/a/".to_string();
        config.add_node(node, false);

        let summary = config.summary();
        assert!(summary.contains("/a/"));
        assert!(summary.contains("n (p/t)"));
    }
}
