//! Robolaunch CLI
//!
//! Usage:
//!   robolaunch app.launch
//!   robolaunch --dry-run app.launch
//!   robolaunch --core core.launch

use robolaunch::config::{LaunchConfig, SubstitutionContext, XmlLoader};
use robolaunch::packages::EnvPackageResolver;
use robolaunch::runtime::UnconfiguredMasterFactory;
use robolaunch::{LaunchArgs, Runner, RunnerOptions};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_level.as_str());
    env_logger::init_from_env(env);

    let packages = Arc::new(EnvPackageResolver::from_env());
    let subst = SubstitutionContext::new().with_resolver(packages.clone());
    let loader = XmlLoader::new(subst);

    let mut config = LaunchConfig::new();
    if let Err(e) = loader.load(&args.launch_file, &mut config, args.core) {
        log::error!("failed to load launch file: {e}");
        std::process::exit(1);
    }

    if args.validate {
        if let Err(e) = config.validate() {
            log::error!("launch file '{}' is invalid: {e}", args.launch_file);
            std::process::exit(1);
        }
        println!("launch file '{}' is valid", args.launch_file);
        println!("  machines: {}", config.machines.len());
        println!("  params: {}", config.params.len());
        println!(
            "  nodes: {} (+{} core, +{} tests)",
            config.nodes.len(),
            config.nodes_core.len(),
            config.tests.len()
        );
        return;
    }

    if args.dry_run {
        let plan = config
            .validate()
            .and_then(|()| config.assign_machines())
            .map(|()| config.summary());
        match plan {
            Ok(summary) => println!("{summary}"),
            Err(e) => {
                log::error!("failed to resolve launch plan: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // The master RPC client is injected by embedders; the standalone
    // binary treats an unconfigured master as unreachable.
    let mut runner = Runner::new(config, Arc::new(UnconfiguredMasterFactory), packages)
        .with_options(RunnerOptions {
            is_core: args.core,
            server_uri: None,
        });

    if !args.disable_signals {
        let handle = runner.shutdown_handle();
        ctrlc::set_handler(move || {
            log::info!("received interrupt, initiating shutdown...");
            handle.request();
        })
        .expect("error setting signal handler");
    }

    match runner.launch().await {
        Ok((succeeded, failed)) => {
            log::info!("launched nodes: {succeeded:?}");
            if !failed.is_empty() {
                log::warn!("failed to launch: {failed:?}");
            }
        }
        Err(e) => {
            log::error!("launch failed: {e}");
            std::process::exit(1);
        }
    }

    runner.spin().await;
    log::info!("robolaunch exiting");
}
