//! Command-line interface for robolaunch

use argh::FromArgs;

/// Declarative multi-process launcher for ROS-style robotics middleware
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch XML file
    #[argh(positional)]
    pub launch_file: String,

    /// validate the launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// print the resolved launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// run as a core launch: fail if a master is already running
    #[argh(switch)]
    pub core: bool,

    /// do not install SIGINT/SIGTERM handlers (the embedder owns them)
    #[argh(switch)]
    pub disable_signals: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}
