//! Robolaunch
//!
//! A declarative multi-process launcher for ROS-style robotics
//! middleware.
//!
//! # Overview
//!
//! A launch document is a hierarchical XML description of a distributed
//! application: the processes ("nodes") to run, their parameters and
//! name remappings, the machines they should run on, and the central
//! coordination service ("master"). Robolaunch:
//! - loads the XML tree (with includes, nested namespaces, and `$(...)`
//!   substitutions) into a resolved, validated [`config::LaunchConfig`]
//! - brings the master up (or restarts it) when asked to
//! - publishes parameters and starts every node, locally or through a
//!   remote delegate
//! - supervises the children and tears the session down in order
//!
//! # Example Launch File
//!
//! ```xml
//! <launch>
//!   <master auto="start" uri="http://localhost:11311"/>
//!   <machine name="arm" address="10.0.0.2" user="robot"/>
//!
//!   <group ns="cameras" clear_params="true">
//!     <param name="rate" value="30" type="int"/>
//!     <node pkg="camera_driver" type="capture" name="front"/>
//!   </group>
//!
//!   <node pkg="planner" type="move_base" name="planner" machine="arm"
//!         respawn="true"/>
//! </launch>
//! ```

pub mod cli;
pub mod config;
pub mod names;
pub mod net;
pub mod packages;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{LaunchConfig, SubstitutionContext, XmlError, XmlLoader};
pub use packages::{EnvPackageResolver, PackageResolver};
pub use runtime::{
    LaunchError, MasterApi, MasterClientFactory, MasterController, ProcessMonitor, RemoteRunner,
    RemoteRunnerFactory, Runner, RunnerOptions,
};
