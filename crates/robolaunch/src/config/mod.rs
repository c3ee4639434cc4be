//! Launch configuration: XML loading, substitution, and the resolved plan

pub mod dom;
mod launch_config;
mod substitution;
mod xml_loader;

pub use launch_config::*;
pub use substitution::*;
pub use xml_loader::*;
