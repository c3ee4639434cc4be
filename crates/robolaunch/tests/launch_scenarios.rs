//! End-to-end launch scenarios against a mock master and stub node
//! executables.

use indexmap::IndexMap;
use robolaunch::config::{LaunchConfig, ParamValue, SubstitutionContext, XmlLoader};
use robolaunch::packages::EnvPackageResolver;
use robolaunch::runtime::{
    LaunchError, LookupOutcome, MasterApi, MasterClientFactory, MasterError,
};
use robolaunch::Runner;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory master: a parameter store plus an operation log, with a
/// configurable number of failed probes before it reports as running.
#[derive(Default)]
struct MockMaster {
    params: Mutex<IndexMap<String, String>>,
    ops: Mutex<Vec<String>>,
    up: AtomicBool,
    probes_until_up: AtomicI32,
}

impl MockMaster {
    fn running() -> Arc<Self> {
        let master = Self::default();
        master.up.store(true, Ordering::SeqCst);
        Arc::new(master)
    }

    fn down_until_probed(probes: i32) -> Arc<Self> {
        let master = Self::default();
        master.probes_until_up.store(probes, Ordering::SeqCst);
        Arc::new(master)
    }

    fn require_up(&self) -> Result<(), MasterError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MasterError::Unreachable {
                uri: "mock".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn seed_param(&self, key: &str, value: &str) {
        self.params
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn get_stored(&self, key: &str) -> Option<String> {
        self.params.lock().unwrap().get(key).cloned()
    }
}

struct MockHandle(Arc<MockMaster>);

impl MasterApi for MockHandle {
    fn get_param_names(&self, _caller_id: &str) -> Result<Vec<String>, MasterError> {
        // the liveness probe; flips the mock to running after the
        // configured number of attempts (zero means it stays down)
        if !self.0.up.load(Ordering::SeqCst) {
            let left = self.0.probes_until_up.load(Ordering::SeqCst);
            if left > 0 && self.0.probes_until_up.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.0.up.store(true, Ordering::SeqCst);
            }
            if !self.0.up.load(Ordering::SeqCst) {
                return Err(MasterError::Unreachable {
                    uri: "mock".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }
        Ok(self.0.params.lock().unwrap().keys().cloned().collect())
    }

    fn has_param(&self, _caller_id: &str, key: &str) -> Result<bool, MasterError> {
        self.0.require_up()?;
        let params = self.0.params.lock().unwrap();
        Ok(params.contains_key(key) || params.keys().any(|k| k.starts_with(key)))
    }

    fn set_param(
        &self,
        _caller_id: &str,
        key: &str,
        value: &ParamValue,
    ) -> Result<(), MasterError> {
        self.0.require_up()?;
        self.0.ops.lock().unwrap().push(format!("set {key}"));
        self.0
            .params
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_param(&self, _caller_id: &str, key: &str) -> Result<(), MasterError> {
        self.0.require_up()?;
        self.0.ops.lock().unwrap().push(format!("delete {key}"));
        self.0
            .params
            .lock()
            .unwrap()
            .retain(|k, _| !k.starts_with(key) && k != key);
        Ok(())
    }

    fn lookup_node(&self, _caller_id: &str, name: &str) -> Result<LookupOutcome, MasterError> {
        self.0.require_up()?;
        self.0.ops.lock().unwrap().push(format!("lookup {name}"));
        Ok(LookupOutcome::Unknown)
    }

    fn lookup_service(
        &self,
        _caller_id: &str,
        _name: &str,
    ) -> Result<LookupOutcome, MasterError> {
        self.0.require_up()?;
        Ok(LookupOutcome::Unknown)
    }

    fn shutdown(&self, _caller_id: &str, _reason: &str) -> Result<(), MasterError> {
        self.0.up.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockFactory(Arc<MockMaster>);

impl MasterClientFactory for MockFactory {
    fn connect(&self, _uri: &str) -> Result<Arc<dyn MasterApi>, MasterError> {
        Ok(Arc::new(MockHandle(self.0.clone())))
    }
}

/// Write an executable shell script for a stub node binary.
fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// Package root with stub binaries: `<root>/<pkg>/<type>` scripts.
fn package_root(scripts: &[(&str, &str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (pkg, node_type, body) in scripts {
        write_script(&dir.path().join(pkg).join(node_type), body);
    }
    dir
}

fn load_config(xml: &str) -> LaunchConfig {
    let loader = XmlLoader::new(SubstitutionContext::new());
    let mut config = LaunchConfig::new();
    loader.load_string(xml, &mut config, false).unwrap();
    config
}

fn runner_for(
    config: LaunchConfig,
    master: &Arc<MockMaster>,
    packages: &tempfile::TempDir,
) -> Runner {
    let resolver = Arc::new(EnvPackageResolver::with_roots(vec![packages
        .path()
        .to_path_buf()]));
    Runner::new(config, Arc::new(MockFactory(master.clone())), resolver)
}

#[tokio::test]
async fn trivial_launch_starts_one_local_node() {
    let packages = package_root(&[("p", "t", "sleep 60")]);
    let master = MockMaster::running();
    let config = load_config(r#"<launch><node pkg="p" type="t" name="n"/></launch>"#);

    let mut runner = runner_for(config, &master, &packages);
    let (succeeded, failed) = runner.launch().await.unwrap();

    assert_eq!(succeeded, vec!["n".to_string()]);
    assert!(failed.is_empty());
    assert!(runner.monitor().has_process("n"));
    assert!(runner.is_node_running(&runner.config().nodes[0].clone()));

    runner.stop().await;
    assert!(runner.monitor().get_active_names().is_empty());
}

#[tokio::test]
async fn master_auto_start_spawns_master_and_sets_run_id() {
    let packages = package_root(&[("p", "t", "sleep 60")]);
    // the master binary the runner spawns
    let ros_root = tempfile::tempdir().unwrap();
    write_script(&ros_root.path().join("bin/rosmaster"), "sleep 60");
    std::env::set_var("ROS_ROOT", ros_root.path());

    // reachable only after the spawned master has had a few probes
    let master = MockMaster::down_until_probed(3);
    let config = load_config(
        r#"<launch>
             <master auto="start" uri="http://127.0.0.1:11311"/>
             <node pkg="p" type="t" name="n"/>
           </launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    let (succeeded, failed) = runner.launch().await.unwrap();

    assert_eq!(succeeded, vec!["n".to_string()]);
    assert!(failed.is_empty());
    assert!(runner.monitor().has_process("master"));

    let run_id = master.get_stored("/run_id").expect("/run_id must be set");
    assert!(!run_id.is_empty());

    runner.stop().await;
    assert!(runner.monitor().get_active_names().is_empty());
}

#[tokio::test]
async fn parameter_clear_precedes_set() {
    let packages = package_root(&[]);
    let master = MockMaster::running();
    master.seed_param("/g/old", "stale");

    let config = load_config(
        r#"<launch>
             <group ns="g" clear_params="true">
               <param name="x" value="5" type="int"/>
             </group>
           </launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    let (succeeded, failed) = runner.launch().await.unwrap();
    assert!(succeeded.is_empty());
    assert!(failed.is_empty());

    let ops = master.ops();
    let delete_pos = ops.iter().position(|o| o == "delete /g/").unwrap();
    let set_pos = ops.iter().position(|o| o == "set /g/x").unwrap();
    assert!(delete_pos < set_pos);
    assert_eq!(master.get_stored("/g/x").as_deref(), Some("5"));
    assert_eq!(master.get_stored("/g/old"), None);

    // nothing to supervise: spin returns immediately after stopping
    runner.spin().await;
}

#[tokio::test]
async fn core_nodes_start_before_non_core() {
    let order = tempfile::NamedTempFile::new().unwrap();
    let order_path = order.path().display().to_string();
    let packages = package_root(&[
        ("sys", "heartbeat", &format!("echo core >> {order_path}\nsleep 60")),
        ("app", "worker", &format!("echo app >> {order_path}\nsleep 60")),
    ]);
    let master = MockMaster::running();

    // core nodes load through the loader's core mode
    let loader = XmlLoader::new(SubstitutionContext::new());
    let mut config = LaunchConfig::new();
    loader
        .load_string(
            r#"<launch><node pkg="sys" type="heartbeat" name="heartbeat"/></launch>"#,
            &mut config,
            true,
        )
        .unwrap();
    loader
        .load_string(
            r#"<launch><node pkg="app" type="worker" name="worker"/></launch>"#,
            &mut config,
            false,
        )
        .unwrap();

    let mut runner = runner_for(config, &master, &packages);
    let (succeeded, _failed) = runner.launch().await.unwrap();
    assert_eq!(succeeded, vec!["worker".to_string()]);

    // both processes wrote their marker; core went first
    for _ in 0..100 {
        let content = std::fs::read_to_string(order.path()).unwrap();
        if content.lines().count() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let content = std::fs::read_to_string(order.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["core", "app"]);

    // the master was consulted before launching the core service
    assert!(master.ops().contains(&"lookup /heartbeat".to_string()));

    runner.stop().await;
}

#[tokio::test]
async fn run_id_is_not_overwritten() {
    let packages = package_root(&[]);
    let master = MockMaster::running();
    master.seed_param("/run_id", "pre-existing");

    let config = load_config(r#"<launch><param name="x" value="1"/></launch>"#);
    let mut runner = runner_for(config, &master, &packages);
    runner.launch().await.unwrap();

    assert_eq!(master.get_stored("/run_id").as_deref(), Some("pre-existing"));
    runner.stop().await;
}

#[tokio::test]
async fn failed_node_is_reported_not_fatal() {
    let packages = package_root(&[("p", "t", "sleep 60")]);
    let master = MockMaster::running();
    let config = load_config(
        r#"<launch>
             <node pkg="p" type="t" name="good"/>
             <node pkg="missing_pkg" type="t" name="bad"/>
           </launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    let (succeeded, failed) = runner.launch().await.unwrap();

    assert_eq!(succeeded, vec!["good".to_string()]);
    assert_eq!(failed, vec!["/bad".to_string()]);
    runner.stop().await;
}

#[tokio::test]
async fn failed_setup_executable_aborts_launch() {
    let packages = package_root(&[("p", "t", "sleep 60")]);
    let master = MockMaster::running();

    let mut config = load_config(r#"<launch><node pkg="p" type="t" name="n"/></launch>"#);
    config.add_executable(robolaunch::config::Executable {
        command: "false".to_string(),
        args: Vec::new(),
        phase: robolaunch::config::ExecPhase::Setup,
        in_ros_bin: false,
    });

    let mut runner = runner_for(config, &master, &packages);
    let err = runner.launch().await.unwrap_err();
    assert!(matches!(err, LaunchError::ExecutableFailed { .. }));

    // the failed launch tore everything down on the way out
    assert!(runner.monitor().get_active_names().is_empty());
}

#[tokio::test]
async fn test_node_times_out() {
    let packages = package_root(&[("p", "loops", "sleep 60")]);
    let master = MockMaster::running();
    let config = load_config(
        r#"<launch><test test-name="tt" pkg="p" type="loops" time-limit="1"/></launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    runner.launch().await.unwrap();

    let test = runner.config().tests[0].clone();
    let started = std::time::Instant::now();
    let err = runner.run_test(&test).await.unwrap_err();
    assert!(matches!(err, LaunchError::TestTimedOut { .. }));
    // roughly the configured limit, not the process's own lifetime
    assert!(started.elapsed().as_secs_f64() < 10.0);
    // the timed-out process was stopped on the way out
    assert!(runner.monitor().get_active_names().is_empty());

    runner.stop().await;
}

#[tokio::test]
async fn test_node_that_exits_passes() {
    let packages = package_root(&[("p", "quick", "exit 0")]);
    let master = MockMaster::running();
    let config = load_config(
        r#"<launch><test test-name="tt" pkg="p" type="quick" time-limit="10"/></launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    runner.launch().await.unwrap();

    let test = runner.config().tests[0].clone();
    runner.run_test(&test).await.unwrap();
    runner.stop().await;
}

#[tokio::test]
async fn unreachable_master_is_a_launch_error() {
    let packages = package_root(&[("p", "t", "sleep 60")]);
    let master = Arc::new(MockMaster::default()); // never up, auto=no
    let config = load_config(r#"<launch><node pkg="p" type="t" name="n"/></launch>"#);

    let mut runner = runner_for(config, &master, &packages);
    let err = runner.launch().await.unwrap_err();
    assert!(matches!(err, LaunchError::MasterUnreachable { .. }));
    assert!(runner.monitor().get_active_names().is_empty());
}

#[tokio::test]
async fn remote_nodes_require_a_remote_runner() {
    let packages = package_root(&[]);
    let master = MockMaster::running();
    let config = load_config(
        r#"<launch>
             <machine name="far" address="far.invalid.example"/>
             <node pkg="p" type="t" name="n" machine="far"/>
           </launch>"#,
    );

    let mut runner = runner_for(config, &master, &packages);
    let err = runner.launch().await.unwrap_err();
    assert!(matches!(err, LaunchError::RemoteUnavailable));
}
