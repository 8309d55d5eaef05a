use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weavecore::{CommandOutput, CommandRunner, DispatchError, RemoteEndpoint, RemoteShell};
use weavedispatch::RemoteRunner;
use weaveruntime::{NodeRegistration, NodeRegistry, RegistryError};

/// Answers handshakes and `nproc` from canned values.
struct FakeShell {
    reachable: bool,
    nproc: &'static str,
    calls: Mutex<Vec<String>>,
}

impl FakeShell {
    fn new(reachable: bool, nproc: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reachable,
            nproc,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn handshake(&self, endpoint: &RemoteEndpoint, _timeout: Duration) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(format!("handshake {}", endpoint.host));
        if self.reachable {
            Ok(())
        } else {
            Err(DispatchError::Unreachable {
                node: endpoint.name.clone(),
                message: "Connection refused".to_string(),
            })
        }
    }

    async fn exec(&self, _endpoint: &RemoteEndpoint, command: &str) -> Result<CommandOutput, DispatchError> {
        self.calls.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: format!("{}\n", self.nproc),
            stderr: String::new(),
        })
    }
}

#[tokio::test]
async fn test_register_detects_cores_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config").join("nodes.json");
    let shell = FakeShell::new(true, "8");
    let mut registry = NodeRegistry::load(&path, shell.clone()).unwrap();

    let record = registry
        .register(NodeRegistration::new("worker-1", "10.0.0.5", "weave"))
        .await
        .unwrap();

    assert_eq!(record.cores, 8);
    assert_eq!(registry.total_cores(), 8);
    assert_eq!(*shell.calls.lock().unwrap(), vec!["handshake 10.0.0.5", "nproc"]);

    let reloaded = NodeRegistry::load(&path, shell).unwrap();
    assert_eq!(reloaded.list(), registry.list());
}

#[tokio::test]
async fn test_declared_cores_skip_the_query() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(true, "garbage");
    let mut registry = NodeRegistry::load(dir.path().join("nodes.json"), shell.clone()).unwrap();

    let mut registration = NodeRegistration::new("worker-2", "10.0.0.6", "weave");
    registration.cores = Some(2);
    registry.register(registration).await.unwrap();

    assert_eq!(registry.total_cores(), 2);
    assert_eq!(shell.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_declared_cores_queries_the_node() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(true, "6");
    let mut registry = NodeRegistry::load(dir.path().join("nodes.json"), shell.clone()).unwrap();

    let mut registration = NodeRegistration::new("worker-3", "10.0.0.7", "weave");
    registration.cores = Some(0);
    let record = registry.register(registration).await.unwrap();

    assert_eq!(record.cores, 6);
    assert_eq!(registry.total_cores(), 6);
    assert_eq!(*shell.calls.lock().unwrap(), vec!["handshake 10.0.0.7", "nproc"]);
}

#[tokio::test]
async fn test_failed_registration_leaves_registry_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.json");

    let mut unreachable = NodeRegistry::load(&path, FakeShell::new(false, "4")).unwrap();
    let result = unreachable
        .register(NodeRegistration::new("down", "10.0.0.7", "weave"))
        .await;
    assert!(matches!(result, Err(RegistryError::Connection(_))));
    assert!(unreachable.list().is_empty());
    assert!(!path.exists());

    let mut bad_nproc = NodeRegistry::load(&path, FakeShell::new(true, "lots")).unwrap();
    let result = bad_nproc
        .register(NodeRegistration::new("odd", "10.0.0.8", "weave"))
        .await;
    assert!(matches!(result, Err(RegistryError::CoreQuery { .. })));
    assert!(bad_nproc.list().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::load(dir.path().join("nodes.json"), FakeShell::new(true, "1")).unwrap();
    registry
        .register(NodeRegistration::new("worker-1", "10.0.0.5", "weave"))
        .await
        .unwrap();

    let again = registry
        .register(NodeRegistration::new("worker-1", "10.0.0.9", "weave"))
        .await;
    assert!(matches!(again, Err(RegistryError::AlreadyRegistered(name)) if name == "worker-1"));
    assert_eq!(registry.list().len(), 1);
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.json");
    let mut registry = NodeRegistry::load(&path, FakeShell::new(true, "2")).unwrap();
    registry
        .register(NodeRegistration::new("worker-1", "10.0.0.5", "weave"))
        .await
        .unwrap();

    assert!(registry.remove("worker-1").unwrap());
    assert!(!registry.remove("worker-1").unwrap());
    assert_eq!(registry.total_cores(), 0);
    assert!(NodeRegistry::load(&path, FakeShell::new(true, "2")).unwrap().list().is_empty());
}

#[tokio::test]
async fn test_probe_reports_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.json");
    std::fs::write(
        &path,
        r#"[{"name": "legacy", "host": "10.0.0.5", "username": "weave", "key_reference": "/keys/id", "cores": 4}]"#,
    )
    .unwrap();

    let up = NodeRegistry::load(&path, FakeShell::new(true, "4")).unwrap();
    assert_eq!(up.get("legacy").unwrap().port, 22);
    assert!(up.probe("legacy").await.unwrap());
    assert!(matches!(up.probe("missing").await, Err(RegistryError::NotFound(_))));

    let down = NodeRegistry::load(&path, FakeShell::new(false, "4")).unwrap();
    assert!(!down.probe("legacy").await.unwrap());
}

#[tokio::test]
async fn test_slots_follow_declared_cores() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new(true, "3");
    let mut registry = NodeRegistry::load(dir.path().join("nodes.json"), shell.clone()).unwrap();
    registry
        .register(NodeRegistration::new("worker-1", "10.0.0.5", "weave"))
        .await
        .unwrap();

    let slots = registry.slots(|node| {
        Arc::new(RemoteRunner::new(node.endpoint(), shell.clone())) as Arc<dyn CommandRunner>
    });
    let labels: Vec<&str> = slots.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["worker-1#1", "worker-1#2", "worker-1#3"]);
    assert_eq!(slots[0].runner.describe(), "node worker-1");
}
