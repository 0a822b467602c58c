#![cfg(unix)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{free_port, serve_health_after, EndorserStub};
use fabnode::network::{HealthzProbe, Probe, ProbeError, ReadinessProbe};
use fabnode::{
    Endpoint, Endpoints, ExitCause, Node, NodeBinary, NodeError, NodeState, Organization,
    RuntimeConfig, RuntimeMaterializer, StartupPolicy,
};

const TEMPLATE: &str = "peer:
  id: jdoe
  gossip:
    bootstrap: 127.0.0.1:7051
metrics:
  provider: disabled
operations:
  listenAddress: 127.0.0.1:9443
vm:
  endpoint: unix:///var/run/docker.sock
chaincode:
  externalBuilders: []
";

/// Stand-in peer: checks its config is in place, records its pid, then idles.
const IDLE_PEER: &str = r#"test -f "$FABRIC_CFG_PATH/core.yaml" || exit 3
echo "$$" > "$FABRIC_CFG_PATH/../peer.pid"
echo "peer started with $*"
exec sleep 60
"#;

struct FixedProbe {
    pass: bool,
    calls: Arc<AtomicUsize>,
}

impl FixedProbe {
    fn new(pass: bool) -> Self {
        Self {
            pass,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[tonic::async_trait]
impl Probe for FixedProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.pass {
            Ok(())
        } else {
            Err(ProbeError::Unhealthy(503))
        }
    }
}

fn endpoints() -> Endpoints {
    Endpoints {
        api: Endpoint::local(7051),
        chaincode: Endpoint::local(7052),
        operations: Endpoint::local(9443),
    }
}

/// A node under `root` whose binary is a shell script with the given body.
fn node(root: &Path, script: &str) -> Node {
    node_with_endpoints(root, script, endpoints())
}

fn node_with_endpoints(root: &Path, script: &str, endpoints: Endpoints) -> Node {
    let template_dir = root.join("template");
    fs::create_dir_all(&template_dir).unwrap();
    fs::write(template_dir.join("core.yaml"), TEMPLATE).unwrap();

    let script_path = root.join("peer.sh");
    fs::write(&script_path, script).unwrap();

    let org = Arc::new(Organization::new("Org1").unwrap());
    let materializer =
        RuntimeMaterializer::new(RuntimeConfig::new(template_dir, root.join("builders")));

    Node::new(org, root.join("org1peer"), endpoints, materializer)
        .unwrap()
        .with_binary(NodeBinary {
            program: PathBuf::from("/bin/sh"),
            args: vec![
                script_path.display().to_string(),
                "node".to_string(),
                "start".to_string(),
            ],
        })
        .with_startup_policy(StartupPolicy {
            timeout: Duration::from_secs(3),
            probe_interval: Duration::from_millis(100),
        })
}

/// Pid written by the stand-in peer. Readiness can be reported before the script gets there.
async fn recorded_pid(node: &Node) -> i32 {
    let pid_file = node.directory().join("peer.pid");
    for _ in 0..50 {
        if let Ok(pid) = fs::read_to_string(&pid_file) {
            if let Ok(pid) = pid.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no pid written to {}", pid_file.display());
}

fn is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

async fn read_log(node: &Node, expected: &str) -> String {
    let mut log = String::new();
    for _ in 0..50 {
        log = fs::read_to_string(node.log_path()).unwrap_or_default();
        if log.contains(expected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log
}

#[tokio::test]
async fn test_start_and_stop() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(FixedProbe::new(true)));

    node.start().await.unwrap();
    assert_eq!(node.state(), NodeState::Running);

    let pid = recorded_pid(&node).await;
    assert_eq!(node.pid(), Some(pid as u32));
    assert!(is_alive(pid));

    let log = read_log(&node, "peer started").await;
    assert!(log.contains("peer started with node start"));

    node.stop().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.pid().is_none());
    assert!(!is_alive(pid));

    node.stop().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);

    // Trust material and config stay on disk
    assert!(node.msp_dir().join("keystore/key.pem").is_file());
    assert!(node.config_dir().join("core.yaml").is_file());
}

#[tokio::test]
async fn test_ready_once_health_endpoint_answers() {
    let temp = tempfile::tempdir().unwrap();
    let port = free_port();
    serve_health_after(port, Duration::from_millis(500));

    let probe = ReadinessProbe::new(
        Box::new(HealthzProbe::new(
            &Endpoint::new("127.0.0.1", port),
            Duration::from_secs(1),
        )),
        Box::new(FixedProbe::new(true)),
    );
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(probe));

    let started = tokio::time::Instant::now();
    node.start().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(node.state(), NodeState::Running);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_default_readiness_queries_channels_as_admin() {
    let temp = tempfile::tempdir().unwrap();
    let stub = EndorserStub::accepting(&["mychannel"]);
    let api_port = stub.clone().serve().await;
    let operations_port = free_port();
    serve_health_after(operations_port, Duration::from_millis(500));

    let endpoints = Endpoints {
        api: Endpoint::new("127.0.0.1", api_port),
        chaincode: Endpoint::local(7052),
        operations: Endpoint::new("127.0.0.1", operations_port),
    };
    let node = node_with_endpoints(temp.path(), IDLE_PEER, endpoints);

    let started = tokio::time::Instant::now();
    node.start().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(node.state(), NodeState::Running);

    let creators = stub.creators();
    assert!(!creators.is_empty());
    assert!(creators.iter().all(|mspid| mspid == "Org1MSP"));

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_untrusted_node_times_out() {
    let temp = tempfile::tempdir().unwrap();
    let stub = EndorserStub::rejecting(500, "access denied");
    let api_port = stub.clone().serve().await;
    let operations_port = free_port();
    serve_health_after(operations_port, Duration::ZERO);

    let endpoints = Endpoints {
        api: Endpoint::new("127.0.0.1", api_port),
        chaincode: Endpoint::local(7052),
        operations: Endpoint::new("127.0.0.1", operations_port),
    };
    let node = node_with_endpoints(temp.path(), IDLE_PEER, endpoints).with_startup_policy(
        StartupPolicy {
            timeout: Duration::from_secs(1),
            probe_interval: Duration::from_millis(100),
        },
    );

    let err = node.start().await.unwrap_err();
    assert!(matches!(err, NodeError::StartTimeout { .. }));
    assert_eq!(node.state(), NodeState::Failed);
    assert!(!stub.creators().is_empty());
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let temp = tempfile::tempdir().unwrap();
    let probe = Arc::new(FixedProbe::new(false));
    let calls = Arc::clone(&probe.calls);
    let node = node(temp.path(), IDLE_PEER)
        .with_probe(probe)
        .with_startup_policy(StartupPolicy {
            timeout: Duration::from_secs(1),
            probe_interval: Duration::from_millis(100),
        });

    let err = node.start().await.unwrap_err();
    assert!(matches!(err, NodeError::StartTimeout { .. }));
    assert_eq!(node.state(), NodeState::Failed);
    assert!(calls.load(Ordering::SeqCst) > 1);

    assert!(!is_alive(recorded_pid(&node).await));
    assert!(node.pid().is_none());
}

#[tokio::test]
async fn test_early_exit_reported() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), "echo 'cannot bind'\nexit 7\n")
        .with_probe(Arc::new(FixedProbe::new(false)));

    let err = node.start().await.unwrap_err();
    match err {
        NodeError::ProcessExit {
            cause: ExitCause::Exited(status),
            ..
        } => assert_eq!(status.code(), Some(7)),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(node.state(), NodeState::Failed);
    assert!(read_log(&node, "cannot bind").await.contains("cannot bind"));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(FixedProbe::new(true)));

    node.start().await.unwrap();
    let first = recorded_pid(&node).await;
    node.stop().await.unwrap();
    fs::remove_file(node.directory().join("peer.pid")).unwrap();

    node.start().await.unwrap();
    let second = recorded_pid(&node).await;
    assert_ne!(first, second);
    assert!(is_alive(second));
    assert_eq!(node.state(), NodeState::Running);

    node.stop().await.unwrap();
    assert!(!is_alive(second));
}

#[tokio::test]
async fn test_start_when_running_does_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let probe = Arc::new(FixedProbe::new(true));
    let calls = Arc::clone(&probe.calls);
    let node = node(temp.path(), IDLE_PEER).with_probe(probe);

    node.start().await.unwrap();
    let pid = node.pid();
    let probes = calls.load(Ordering::SeqCst);

    node.start().await.unwrap();
    assert_eq!(node.pid(), pid);
    assert_eq!(calls.load(Ordering::SeqCst), probes);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_overlapping_start_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(FixedProbe::new(true)));

    let (first, second) = tokio::join!(node.start(), node.start());
    let (ok, rejected) = if first.is_ok() { (first, second) } else { (second, first) };
    ok.unwrap();
    assert!(matches!(rejected, Err(NodeError::AlreadyStarting(_))));
    assert_eq!(node.state(), NodeState::Running);

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_state_changes_published() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(FixedProbe::new(true)));
    let mut states = node.subscribe();

    node.start().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), NodeState::Running);

    node.stop().await.unwrap();
    assert_eq!(*states.borrow_and_update(), NodeState::Stopped);
}

#[tokio::test]
async fn test_dropping_node_kills_process() {
    let temp = tempfile::tempdir().unwrap();
    let node = node(temp.path(), IDLE_PEER).with_probe(Arc::new(FixedProbe::new(true)));

    node.start().await.unwrap();
    let pid = recorded_pid(&node).await;
    drop(node);

    let mut alive = true;
    for _ in 0..50 {
        alive = is_alive(pid);
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alive);
}
