//! Runtime components: process supervision and the launch lifecycle

pub mod master;
pub mod monitor;
pub mod process;
pub mod remote;
pub mod runner;

pub use master::*;
pub use monitor::*;
pub use process::*;
pub use remote::*;
pub use runner::*;
