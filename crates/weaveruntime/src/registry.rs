use crate::executor::Slot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use weavecore::{CommandRunner, DispatchError, RemoteEndpoint, RemoteShell};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to access node registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse node registry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Node '{0}' already exists")]
    AlreadyRegistered(String),

    #[error("Node '{0}' not found")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    Connection(#[from] DispatchError),

    #[error("Could not determine core count on '{node}': {message}")]
    CoreQuery { node: String, message: String },
}

fn default_port() -> u16 {
    22
}

/// A registered remote execution endpoint as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, alias = "key_reference")]
    pub key_file: Option<PathBuf>,
    pub cores: usize,
}

impl NodeRecord {
    pub fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            key_file: self.key_file.clone(),
        }
    }
}

/// Registration request; `cores: None` or `Some(0)` asks the node itself.
#[derive(Debug, Clone)]
pub struct NodeRegistration {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_file: Option<PathBuf>,
    pub cores: Option<usize>,
}

impl NodeRegistration {
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            username: username.into(),
            key_file: None,
            cores: None,
        }
    }

    fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            key_file: self.key_file.clone(),
        }
    }
}

/// Catalogue of remote nodes backed by a JSON file.
pub struct NodeRegistry {
    path: PathBuf,
    nodes: Vec<NodeRecord>,
    shell: Arc<dyn RemoteShell>,
    probe_timeout: Duration,
}

impl NodeRegistry {
    /// Load the registry file. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>, shell: Arc<dyn RemoteShell>) -> Result<Self, RegistryError> {
        let path = path.into();
        let nodes = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;
            if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&text).map_err(|source| RegistryError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            Vec::new()
        };
        tracing::debug!("Loaded {} nodes from {}", nodes.len(), path.display());

        Ok(Self {
            path,
            nodes,
            shell,
            probe_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Upper bound on remote concurrency; liveness is not re-checked.
    pub fn total_cores(&self) -> usize {
        self.nodes.iter().map(|n| n.cores).sum()
    }

    /// Register a node after an authenticated handshake and, when no core
    /// count is given, a successful `nproc` query. On any error the
    /// registry is left unchanged.
    pub async fn register(&mut self, registration: NodeRegistration) -> Result<NodeRecord, RegistryError> {
        if self.get(&registration.name).is_some() {
            return Err(RegistryError::AlreadyRegistered(registration.name));
        }

        let endpoint = registration.endpoint();
        self.shell.handshake(&endpoint, self.probe_timeout).await?;

        // Zero declared cores means "ask the node", same as none.
        let cores = match registration.cores {
            Some(cores) if cores > 0 => cores,
            _ => self.query_cores(&endpoint).await?,
        };

        let record = NodeRecord {
            name: registration.name,
            host: registration.host,
            port: registration.port,
            username: registration.username,
            key_file: registration.key_file,
            cores,
        };

        let mut nodes = self.nodes.clone();
        nodes.push(record.clone());
        self.save(&nodes)?;
        self.nodes = nodes;

        tracing::info!("Registered node {} ({} cores)", record.name, record.cores);
        Ok(record)
    }

    async fn query_cores(&self, endpoint: &RemoteEndpoint) -> Result<usize, RegistryError> {
        let output = self.shell.exec(endpoint, "nproc").await?;
        if !output.success() {
            return Err(RegistryError::CoreQuery {
                node: endpoint.name.clone(),
                message: output.failure_text(),
            });
        }
        match output.stdout.trim().parse::<usize>() {
            Ok(cores) if cores > 0 => Ok(cores),
            _ => Err(RegistryError::CoreQuery {
                node: endpoint.name.clone(),
                message: format!("unexpected nproc output '{}'", output.stdout.trim()),
            }),
        }
    }

    /// Remove a node without contacting it. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> Result<bool, RegistryError> {
        let Some(position) = self.nodes.iter().position(|n| n.name == name) else {
            tracing::debug!("Node {} not registered, nothing to remove", name);
            return Ok(false);
        };
        let mut nodes = self.nodes.clone();
        nodes.remove(position);
        self.save(&nodes)?;
        self.nodes = nodes;
        tracing::info!("Removed node {}", name);
        Ok(true)
    }

    /// Handshake with a registered node. Connection failures are `Ok(false)`.
    pub async fn probe(&self, name: &str) -> Result<bool, RegistryError> {
        let node = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        match self.shell.handshake(&node.endpoint(), self.probe_timeout).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!("Node {} is unreachable: {}", name, e);
                Ok(false)
            }
        }
    }

    /// One slot per declared core of every node.
    pub fn slots<F>(&self, mut runner_for: F) -> Vec<Slot>
    where
        F: FnMut(&NodeRecord) -> Arc<dyn CommandRunner>,
    {
        let mut slots = Vec::with_capacity(self.total_cores());
        for node in &self.nodes {
            let runner = runner_for(node);
            for core in 1..=node.cores {
                slots.push(Slot::new(format!("{}#{}", node.name, core), Arc::clone(&runner)));
            }
        }
        slots
    }

    fn save(&self, nodes: &[NodeRecord]) -> Result<(), RegistryError> {
        let io_error = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(nodes).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, text).map_err(io_error)?;
        std::fs::rename(&temp, &self.path).map_err(io_error)?;
        Ok(())
    }
}
