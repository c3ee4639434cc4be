//! XML launch document loader
//!
//! Walks the launch DOM and produces a `LaunchConfig`. Scopes (`group`,
//! `include`) form a chain of contexts borrowed down the recursion;
//! every attribute value passes through substitution before any other
//! interpretation.

use crate::config::dom::{DomError, XmlElement};
use crate::config::launch_config::{
    CwdPolicy, EnvVar, ExecPhase, Executable, LaunchConfig, Machine, MasterAuto, MasterSpec, Node,
    Output, Param, ParamValue, Remap, TestNode,
};
use crate::config::substitution::{SubstitutionContext, SubstitutionError};
use crate::config::HostOverride;
use crate::names;
use std::path::{Path, PathBuf};

const MASTER_ATTRS: &[&str] = &["type", "uri", "auto"];
const PARAM_ATTRS: &[&str] = &["name", "value", "type", "textfile", "binfile", "command"];
const ROSPARAM_ATTRS: &[&str] = &["file", "command", "ns", "clear_params"];
const NODE_ATTRS: &[&str] = &[
    "pkg",
    "type",
    "machine",
    "name",
    "args",
    "output",
    "respawn",
    "cwd",
    "ns",
    "clear_params",
];
const TEST_ATTRS: &[&str] = &[
    "pkg",
    "type",
    "machine",
    "name",
    "args",
    "output",
    "cwd",
    "ns",
    "clear_params",
    "test-name",
    "time-limit",
];
const MACHINE_ATTRS: &[&str] = &[
    "name",
    "address",
    "ros-root",
    "ros-package-path",
    "ros-ip",
    "ros-host-name",
    "ssh-port",
    "user",
    "password",
    "default",
];
const REMAP_ATTRS: &[&str] = &["from", "to"];
const ENV_ATTRS: &[&str] = &["name", "value"];
const GROUP_ATTRS: &[&str] = &["ns", "clear_params"];
const INCLUDE_ATTRS: &[&str] = &["file", "ns", "clear_params"];

/// Tests run for 60 seconds unless the tag says otherwise.
const DEFAULT_TIME_LIMIT: f64 = 60.0;

/// Namespace scope for one level of the descent. Frames borrow their
/// parent; the chain lives only for the duration of the recursion.
struct LoaderContext<'a> {
    /// Global namespace with trailing slash (or `~` for a private scope)
    ns: String,
    remaps: Vec<Remap>,
    envs: Vec<EnvVar>,
    parent: Option<&'a LoaderContext<'a>>,
}

impl<'a> LoaderContext<'a> {
    fn root() -> LoaderContext<'static> {
        LoaderContext {
            ns: "/".to_string(),
            remaps: Vec::new(),
            envs: Vec::new(),
            parent: None,
        }
    }

    /// Open a child scope. `ns` of `/...` rebinds globally, `~` keeps the
    /// scope private (node scope only), anything else joins the current
    /// namespace.
    fn child<'s>(
        &'s self,
        ns: Option<&str>,
        allow_private: bool,
    ) -> Result<LoaderContext<'s>, XmlError> {
        let ns = match ns {
            None => self.ns.clone(),
            Some("~") if allow_private => "~".to_string(),
            Some("~") => {
                return Err(XmlError::parse(
                    "a private 'ns' (~) is only permitted on <node> tags",
                ))
            }
            Some(ns) if names::is_global(ns) => names::make_global_ns(ns)
                .map_err(|e| XmlError::parse(e.to_string()))?,
            Some(ns) => names::make_global_ns(&names::ns_join(&self.ns, ns))
                .map_err(|e| XmlError::parse(e.to_string()))?,
        };
        Ok(LoaderContext {
            ns,
            remaps: Vec::new(),
            envs: Vec::new(),
            parent: Some(self),
        })
    }

    /// Remappings in effect at this scope: the parent chain's, then ours.
    fn remap_args(&self) -> Vec<Remap> {
        let mut remaps = self
            .parent
            .map(LoaderContext::remap_args)
            .unwrap_or_default();
        remaps.extend(self.remaps.iter().cloned());
        remaps
    }

    /// Environment additions in effect at this scope.
    fn env_args(&self) -> Vec<EnvVar> {
        let mut envs = self.parent.map(LoaderContext::env_args).unwrap_or_default();
        envs.extend(self.envs.iter().cloned());
        envs
    }
}

enum LoadedNode {
    Node(Node),
    Test(TestNode),
}

/// Loads launch XML documents into a `LaunchConfig`.
pub struct XmlLoader {
    subst: SubstitutionContext,
}

impl XmlLoader {
    pub fn new(subst: SubstitutionContext) -> Self {
        Self { subst }
    }

    /// Load a launch file from disk.
    pub fn load(
        &self,
        path: impl AsRef<Path>,
        config: &mut LaunchConfig,
        core: bool,
    ) -> Result<(), XmlError> {
        let path = path.as_ref();
        log::info!("loading launch file [{}]", path.display());
        let root = Self::parse_launch_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        self.load_launch(&root, config, core, &base_dir)
    }

    /// Load launch XML from a string.
    pub fn load_string(
        &self,
        xml: &str,
        config: &mut LaunchConfig,
        core: bool,
    ) -> Result<(), XmlError> {
        let root = Self::check_launch_root(XmlElement::parse_document(xml)?)?;
        self.load_launch(&root, config, core, Path::new("."))
    }

    fn parse_launch_file(path: &Path) -> Result<XmlElement, XmlError> {
        Self::check_launch_root(XmlElement::parse_file(path)?)
    }

    fn check_launch_root(root: XmlElement) -> Result<XmlElement, XmlError> {
        if root.name != "launch" {
            return Err(XmlError::parse(format!(
                "root element must be <launch>, found <{}>",
                root.name
            )));
        }
        Ok(root)
    }

    fn load_launch(
        &self,
        root: &XmlElement,
        config: &mut LaunchConfig,
        is_core: bool,
        base_dir: &Path,
    ) -> Result<(), XmlError> {
        // <master> is processed once for the root document only; includes
        // never contribute one.
        let masters: Vec<&XmlElement> =
            root.children.iter().filter(|t| t.name == "master").collect();
        if masters.len() > 1 {
            return Err(XmlError::parse(
                "multiple <master> tags in top-level launch file not allowed",
            ));
        }
        if let Some(tag) = masters.first() {
            config.set_master(self.master_tag(tag)?);
        }

        let mut context = LoaderContext::root();
        self.recurse_load(config, &root.children, &mut context, None, is_core, base_dir)?;
        Ok(())
    }

    fn recurse_load(
        &self,
        config: &mut LaunchConfig,
        tags: &[XmlElement],
        context: &mut LoaderContext<'_>,
        mut default_machine: Option<String>,
        is_core: bool,
        base_dir: &Path,
    ) -> Result<Option<String>, XmlError> {
        for tag in tags {
            match tag.name.as_str() {
                "group" => {
                    self.check_attrs(tag, GROUP_ATTRS);
                    let mut child =
                        self.ns_clear_params_attr(tag, context, config, None, false)?;
                    default_machine = self.recurse_load(
                        config,
                        &tag.children,
                        &mut child,
                        default_machine,
                        is_core,
                        base_dir,
                    )?;
                }
                "node" => {
                    match self.node_tag(tag, context, config, default_machine.as_deref(), false)? {
                        LoadedNode::Node(node) => config.add_node(node, is_core),
                        LoadedNode::Test(_) => unreachable!(),
                    }
                }
                "test" => {
                    match self.node_tag(tag, context, config, default_machine.as_deref(), true)? {
                        LoadedNode::Test(test) => config.add_test(test),
                        LoadedNode::Node(_) => unreachable!(),
                    }
                }
                "param" => {
                    let param = self.param_tag(tag, context, false)?;
                    config.add_param(param);
                }
                "remap" => {
                    let remap = self.remap_tag(tag)?;
                    context.remaps.push(remap);
                }
                "env" => {
                    let env = self.env_tag(tag)?;
                    context.envs.push(env);
                }
                "machine" => {
                    let (machine, is_default) = self.machine_tag(tag)?;
                    if is_default {
                        default_machine = Some(machine.name.clone());
                    }
                    config.add_machine(machine)?;
                }
                "rosparam" => {
                    let executable = self.rosparam_tag(tag, context, config)?;
                    config.add_executable(executable);
                }
                "master" => {
                    // root-level tags were consumed by load_launch;
                    // nested and included ones are ignored
                    log::debug!("skipping <master> tag during recursive load");
                }
                "include" => {
                    self.check_attrs(tag, INCLUDE_ATTRS);
                    let file = self.reqd_attr(tag, "file")?;
                    let mut path = PathBuf::from(&file);
                    if path.is_relative() {
                        path = base_dir.join(path);
                    }
                    let mut child =
                        self.ns_clear_params_attr(tag, context, config, None, false)?;
                    let included = Self::parse_launch_file(&path)?;
                    let child_base =
                        path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
                    default_machine = self.recurse_load(
                        config,
                        &included.children,
                        &mut child,
                        default_machine,
                        is_core,
                        &child_base,
                    )?;
                    log::info!("... done importing include file [{}]", path.display());
                }
                other => {
                    log::warn!("unrecognized tag <{other}>");
                }
            }
        }
        Ok(default_machine)
    }

    /// Warn about attributes the tag does not understand.
    fn check_attrs(&self, tag: &XmlElement, allowed: &[&str]) {
        for key in tag.attrs.keys() {
            if !allowed.contains(&key.as_str()) {
                log::warn!("unknown <{}> attribute '{}'", tag.name, key);
            }
        }
    }

    /// Fetch and substitute an optional attribute.
    fn opt_attr(&self, tag: &XmlElement, name: &str) -> Result<Option<String>, XmlError> {
        match tag.attr(name) {
            Some(raw) => {
                let value = self
                    .subst
                    .resolve_args(raw)
                    .map_err(|e| XmlError::substitution(tag, e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Fetch and substitute a required attribute.
    fn reqd_attr(&self, tag: &XmlElement, name: &str) -> Result<String, XmlError> {
        self.opt_attr(tag, name)?.ok_or_else(|| {
            XmlError::parse_in(
                tag,
                format!("<{}> tag is missing required attribute '{}'", tag.name, name),
            )
        })
    }

    fn master_tag(&self, tag: &XmlElement) -> Result<MasterSpec, XmlError> {
        self.check_attrs(tag, MASTER_ATTRS);
        let mut master = MasterSpec::from_env();

        if let Some(master_type) = self.opt_attr(tag, "type")? {
            if master_type.trim().is_empty() {
                return Err(XmlError::parse_in(tag, "<master> 'type' must be non-empty"));
            }
            master.master_type = master_type;
        }
        if let Some(uri) = self.opt_attr(tag, "uri")? {
            master.uri = uri;
        }
        let auto = self.opt_attr(tag, "auto")?.unwrap_or_default();
        master.auto = match auto.trim().to_lowercase().as_str() {
            "" | "no" => MasterAuto::No,
            "start" => MasterAuto::Start,
            "restart" => MasterAuto::Restart,
            other => {
                return Err(XmlError::parse_in(
                    tag,
                    format!("invalid <master> 'auto' value: {other}"),
                ))
            }
        };
        Ok(master)
    }

    /// Parse a `<param>` tag into a fully-named parameter.
    ///
    /// Private names are only allowed inside `<node>` scope, where they
    /// bind beneath the node's own name.
    fn param_tag(
        &self,
        tag: &XmlElement,
        context: &LoaderContext<'_>,
        allow_private: bool,
    ) -> Result<Param, XmlError> {
        self.check_attrs(tag, PARAM_ATTRS);
        let raw_name = self.reqd_attr(tag, "name")?;
        let raw_name = raw_name.trim();

        let name = if names::is_private(raw_name) {
            if !allow_private {
                return Err(XmlError::parse_in(
                    tag,
                    "<param> tags may not use ~names here; place the <param> tag within a <node> tag instead",
                ));
            }
            names::ns_join(&context.ns, raw_name.trim_start_matches('~'))
        } else {
            names::ns_join(&context.ns, raw_name)
        };

        let ptype = self
            .opt_attr(tag, "type")?
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_else(|| "auto".to_string());

        let value = self.opt_attr(tag, "value")?;
        let textfile = self.opt_attr(tag, "textfile")?;
        let binfile = self.opt_attr(tag, "binfile")?;
        let command = self.opt_attr(tag, "command")?;

        let sources = [&value, &textfile, &binfile, &command]
            .iter()
            .filter(|v| v.is_some())
            .count();
        if sources != 1 {
            return Err(XmlError::parse_in(
                tag,
                "<param> tag must have one and only one of value/textfile/binfile/command",
            ));
        }

        let value = if let Some(value) = value {
            convert_value(value.trim(), &ptype).map_err(|msg| XmlError::parse_in(tag, msg))?
        } else if let Some(path) = textfile {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                XmlError::load_in(tag, format!("cannot read textfile [{path}]: {e}"))
            })?;
            ParamValue::Str(text)
        } else if let Some(path) = binfile {
            let bytes = std::fs::read(&path).map_err(|e| {
                XmlError::load_in(tag, format!("cannot read binfile [{path}]: {e}"))
            })?;
            ParamValue::Bin(bytes)
        } else if let Some(command) = command {
            self.command_param(tag, &name, &command)?
        } else {
            unreachable!("exactly one source checked above");
        };

        Ok(Param { name, value })
    }

    /// Run a `command=` parameter source and capture its output.
    fn command_param(
        &self,
        tag: &XmlElement,
        name: &str,
        command: &str,
    ) -> Result<ParamValue, XmlError> {
        log::info!("... executing command param [{command}]");
        let parts = shlex::split(command).ok_or_else(|| {
            XmlError::load_in(tag, format!("cannot tokenize command [{command}]"))
        })?;
        let (program, args) = parts.split_first().ok_or_else(|| {
            XmlError::load_in(tag, format!("empty command for parameter [{name}]"))
        })?;

        let output = std::process::Command::new(program).args(args).output();
        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(XmlError::load_in(
                    tag,
                    format!("cannot load command parameter [{name}]: no such command [{command}]"),
                ))
            }
            Err(e) => {
                return Err(XmlError::load_in(
                    tag,
                    format!("cannot load command parameter [{name}]: {e}"),
                ))
            }
        };
        if !output.status.success() {
            return Err(XmlError::load_in(
                tag,
                format!(
                    "cannot load command parameter [{name}]: command [{command}] returned with code [{}]",
                    output.status.code().unwrap_or(-1)
                ),
            ));
        }
        Ok(ParamValue::Str(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    fn rosparam_tag(
        &self,
        tag: &XmlElement,
        context: &LoaderContext<'_>,
        config: &mut LaunchConfig,
    ) -> Result<Executable, XmlError> {
        self.check_attrs(tag, ROSPARAM_ATTRS);
        let file = self.reqd_attr(tag, "file")?;
        if file.is_empty() {
            return Err(XmlError::parse_in(
                tag,
                "<rosparam> 'file' attribute must be non-empty",
            ));
        }
        let command = self.reqd_attr(tag, "command")?;
        if command != "load" && command != "dump" {
            return Err(XmlError::parse_in(
                tag,
                "<rosparam> 'command' must be 'load' or 'dump'",
            ));
        }
        let child = self.ns_clear_params_attr(tag, context, config, None, false)?;
        Ok(Executable {
            command: "rosparam".to_string(),
            args: vec![command, file, child.ns.clone()],
            phase: ExecPhase::Setup,
            in_ros_bin: true,
        })
    }

    fn node_tag(
        &self,
        tag: &XmlElement,
        context: &LoaderContext<'_>,
        config: &mut LaunchConfig,
        default_machine: Option<&str>,
        is_test: bool,
    ) -> Result<LoadedNode, XmlError> {
        if is_test {
            self.check_attrs(tag, TEST_ATTRS);
            if tag.has_attr("respawn") {
                return Err(XmlError::parse_in(
                    tag,
                    "<test> tags may not have respawn attributes",
                ));
            }
        } else {
            self.check_attrs(tag, NODE_ATTRS);
        }

        let package = self.reqd_attr(tag, "pkg")?;
        let node_type = self.reqd_attr(tag, "type")?;
        if package.trim().is_empty() {
            return Err(XmlError::parse_in(tag, "<node> 'pkg' must be non-empty"));
        }
        if node_type.trim().is_empty() {
            return Err(XmlError::parse_in(tag, "<node> 'type' must be non-empty"));
        }

        let machine = self.opt_attr(tag, "machine")?;
        let name = self.opt_attr(tag, "name")?;
        let args = self.opt_attr(tag, "args")?.unwrap_or_default();
        let output = self.opt_attr(tag, "output")?;
        let respawn = self.opt_attr(tag, "respawn")?;
        let cwd = self.opt_attr(tag, "cwd")?;

        let child = self.ns_clear_params_attr(tag, context, config, name.as_deref(), true)?;

        if let Some(machine) = &machine {
            if machine.trim().is_empty() {
                return Err(XmlError::parse_in(tag, "<node> 'machine' must be non-empty"));
            }
        }
        let machine_name = machine.or_else(|| default_machine.map(str::to_owned));

        let output = match output.as_deref().unwrap_or("log") {
            "log" => Output::Log,
            "screen" => Output::Screen,
            other => {
                return Err(XmlError::parse_in(
                    tag,
                    format!(
                        "<{}> 'output' attribute must be one of: 'log', 'screen' (found '{other}')",
                        tag.name
                    ),
                ))
            }
        };

        let respawn = match respawn.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(XmlError::parse_in(
                    tag,
                    format!("invalid respawn value: {other}"),
                ))
            }
        };

        let cwd = match cwd.as_deref() {
            None => CwdPolicy::Unset,
            Some("ros-root") => CwdPolicy::RosRoot,
            Some("node") => CwdPolicy::Node,
            Some(other) => {
                return Err(XmlError::parse_in(
                    tag,
                    format!(
                        "<{}> 'cwd' attribute must be one of: ros-root, node (found '{other}')",
                        tag.name
                    ),
                ))
            }
        };

        let mut remap_args = context.remap_args();
        let mut env_args = context.env_args();

        for child_tag in &tag.children {
            match child_tag.name.as_str() {
                "remap" => remap_args.push(self.remap_tag(child_tag)?),
                "param" | "rosparam" => {
                    let Some(name) = name.as_deref() else {
                        return Err(XmlError::parse_in(
                            tag,
                            "<node> tag must have a 'name' attribute in order to use parameter tags",
                        ));
                    };
                    let node_scope = child.child(Some(name), false)?;
                    if child_tag.name == "param" {
                        let param = self.param_tag(child_tag, &node_scope, true)?;
                        config.add_param(param);
                    } else {
                        let executable = self.rosparam_tag(child_tag, &node_scope, config)?;
                        config.add_executable(executable);
                    }
                }
                "env" => env_args.push(self.env_tag(child_tag)?),
                other => {
                    log::warn!("unrecognized <{other}> tag in <{}> tag", tag.name);
                }
            }
        }

        let mut node = Node::new(package, node_type);
        node.name = name;
        node.namespace = child.ns.clone();
        node.machine_name = machine_name;
        node.args = args;
        node.output = output;
        node.respawn = respawn;
        node.cwd = cwd;
        node.remap_args = remap_args;
        node.env_args = env_args;

        if !is_test {
            return Ok(LoadedNode::Node(node));
        }

        let test_name = self.reqd_attr(tag, "test-name")?;
        let time_limit = match self.opt_attr(tag, "time-limit")? {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                XmlError::parse_in(tag, format!("'time-limit' must be a number: {raw}"))
            })?,
            None => DEFAULT_TIME_LIMIT,
        };
        if time_limit <= 0.0 {
            return Err(XmlError::parse_in(tag, "'time-limit' must be a positive number"));
        }
        Ok(LoadedNode::Test(TestNode {
            node,
            test_name,
            time_limit,
        }))
    }

    fn machine_tag(&self, tag: &XmlElement) -> Result<(Machine, bool), XmlError> {
        self.check_attrs(tag, MACHINE_ATTRS);
        let name = self.reqd_attr(tag, "name")?;
        let address = self.reqd_attr(tag, "address")?;

        let ros_root = self
            .opt_attr(tag, "ros-root")?
            .or_else(|| std::env::var("ROS_ROOT").ok());
        let ros_package_path = self
            .opt_attr(tag, "ros-package-path")?
            .or_else(|| std::env::var("ROS_PACKAGE_PATH").ok());

        let ros_ip = self.opt_attr(tag, "ros-ip")?;
        let ros_host_name = self.opt_attr(tag, "ros-host-name")?;
        if ros_ip.is_some() && ros_host_name.is_some() {
            return Err(XmlError::parse_in(
                tag,
                "only one of 'ros-host-name' or 'ros-ip' may be set",
            ));
        }
        let host_override = ros_ip
            .map(HostOverride::Ip)
            .or(ros_host_name.map(HostOverride::Hostname));

        let ssh_port = match self.opt_attr(tag, "ssh-port")? {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                XmlError::parse_in(tag, format!("invalid 'ssh-port' value: {raw}"))
            })?,
            None => 22,
        };
        let user = self.opt_attr(tag, "user")?;
        let password = self.opt_attr(tag, "password")?;

        let default = self
            .opt_attr(tag, "default")?
            .map(|d| d.to_lowercase())
            .unwrap_or_else(|| "false".to_string());
        let (assignable, is_default) = match default.as_str() {
            "true" => (true, true),
            "false" => (true, false),
            "never" => (false, false),
            other => {
                return Err(XmlError::parse_in(
                    tag,
                    format!("invalid value for 'default' attribute: {other}"),
                ))
            }
        };

        Ok((
            Machine {
                name,
                address,
                ros_root,
                ros_package_path,
                host_override,
                ssh_port,
                user,
                password,
                assignable,
                is_default,
                is_local: false,
            },
            is_default,
        ))
    }

    fn remap_tag(&self, tag: &XmlElement) -> Result<Remap, XmlError> {
        self.check_attrs(tag, REMAP_ATTRS);
        let from = self.reqd_attr(tag, "from")?;
        let to = self.reqd_attr(tag, "to")?;
        if from.is_empty() || to.is_empty() {
            return Err(XmlError::parse_in(
                tag,
                "<remap> 'from' and 'to' attributes must be non-empty",
            ));
        }
        Ok(Remap { from, to })
    }

    fn env_tag(&self, tag: &XmlElement) -> Result<EnvVar, XmlError> {
        self.check_attrs(tag, ENV_ATTRS);
        let name = self.reqd_attr(tag, "name")?;
        let value = self.reqd_attr(tag, "value")?;
        if name.is_empty() {
            return Err(XmlError::parse_in(
                tag,
                "<env> 'name' attribute must be non-empty",
            ));
        }
        Ok(EnvVar { name, value })
    }

    /// Shared handling of the `ns` and `clear_params` attributes.
    fn ns_clear_params_attr<'c>(
        &self,
        tag: &XmlElement,
        context: &'c LoaderContext<'c>,
        config: &mut LaunchConfig,
        node_name: Option<&str>,
        allow_private_ns: bool,
    ) -> Result<LoaderContext<'c>, XmlError> {
        let ns = match self.opt_attr(tag, "ns")? {
            Some(ns) if ns.is_empty() => {
                return Err(XmlError::parse_in(
                    tag,
                    format!("<{}> tag has an empty 'ns' attribute", tag.name),
                ))
            }
            other => other,
        };
        let child = context.child(ns.as_deref(), allow_private_ns)?;

        let clear = self
            .opt_attr(tag, "clear_params")?
            .filter(|c| !c.is_empty())
            .map(|c| c.to_lowercase());
        if let Some(clear) = clear {
            match clear.as_str() {
                "false" => {}
                "true" => {
                    if tag.name == "node" || tag.name == "test" {
                        let Some(node_name) = node_name else {
                            return Err(XmlError::parse_in(
                                tag,
                                format!(
                                    "<{}> tag must have a 'name' attribute to use 'clear_params'",
                                    tag.name
                                ),
                            ));
                        };
                        let node_ns = names::make_global_ns(&names::ns_join(&child.ns, node_name))
                            .map_err(|e| XmlError::parse_in(tag, e.to_string()))?;
                        config.add_clear_param(node_ns);
                    } else {
                        if ns.is_none() {
                            return Err(XmlError::parse_in(
                                tag,
                                "'ns' attribute must be set in order to use 'clear_params'",
                            ));
                        }
                        config.add_clear_param(child.ns.clone());
                    }
                }
                other => {
                    return Err(XmlError::parse_in(
                        tag,
                        format!("'clear_params' attribute must be set to true or false (found '{other}')"),
                    ))
                }
            }
        }
        Ok(child)
    }
}

fn convert_value(value: &str, ptype: &str) -> Result<ParamValue, String> {
    match ptype {
        "str" => Ok(ParamValue::Str(value.to_string())),
        "int" => value
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|_| format!("invalid int value: {value}")),
        "double" => value
            .parse::<f64>()
            .map(ParamValue::Double)
            .map_err(|_| format!("invalid double value: {value}")),
        "bool" => match value.to_lowercase().as_str() {
            "true" => Ok(ParamValue::Bool(true)),
            "false" => Ok(ParamValue::Bool(false)),
            _ => Err(format!("invalid bool value: {value}")),
        },
        "yaml" => serde_yaml::from_str::<serde_yaml::Value>(value)
            .map(ParamValue::Yaml)
            .map_err(|e| format!("invalid yaml value: {e}")),
        "auto" => {
            if value.eq_ignore_ascii_case("true") {
                return Ok(ParamValue::Bool(true));
            }
            if value.eq_ignore_ascii_case("false") {
                return Ok(ParamValue::Bool(false));
            }
            if let Ok(i) = value.parse::<i64>() {
                return Ok(ParamValue::Int(i));
            }
            if let Ok(d) = value.parse::<f64>() {
                return Ok(ParamValue::Double(d));
            }
            Ok(ParamValue::Str(value.to_string()))
        }
        other => Err(format!("unknown parameter type: {other}")),
    }
}

fn tag_suffix(tag_source: &Option<String>) -> String {
    tag_source
        .as_ref()
        .map(|t| format!("\n\noffending xml: {t}"))
        .unwrap_or_default()
}

/// Errors from loading a launch document
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// The XML is well-formed but the launch grammar is violated
    #[error("Parse error: {message}{}", tag_suffix(.tag_source))]
    Parse {
        message: String,
        tag_source: Option<String>,
    },

    /// A referenced resource (textfile, binfile, command) could not be
    /// materialized
    #[error("Load error: {message}{}", tag_suffix(.tag_source))]
    Load {
        message: String,
        tag_source: Option<String>,
    },

    #[error("Parse error: {source}\n\noffending xml: {tag_source}")]
    Substitution {
        tag_source: String,
        #[source]
        source: SubstitutionError,
    },

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Config(#[from] crate::config::launch_config::ConfigError),
}

impl XmlError {
    fn parse(message: impl Into<String>) -> Self {
        XmlError::Parse {
            message: message.into(),
            tag_source: None,
        }
    }

    fn parse_in(tag: &XmlElement, message: impl Into<String>) -> Self {
        XmlError::Parse {
            message: message.into(),
            tag_source: Some(tag.snippet()),
        }
    }

    fn load_in(tag: &XmlElement, message: impl Into<String>) -> Self {
        XmlError::Load {
            message: message.into(),
            tag_source: Some(tag.snippet()),
        }
    }

    fn substitution(tag: &XmlElement, source: SubstitutionError) -> Self {
        XmlError::Substitution {
            tag_source: tag.snippet(),
            source,
        }
    }
}
