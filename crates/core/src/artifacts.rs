//! # Artifacts
//!
//! Named text artifacts produced by generation calls, and the store they are
//! persisted through. Stores keep the engine decoupled from where generated
//! files actually land.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One generated file, named by its path relative to the project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
        }
    }
}

/// Upsert `incoming` into `base` by artifact name, keeping first-seen order.
pub fn merge_artifacts(base: &mut Vec<Artifact>, incoming: Vec<Artifact>) {
    for artifact in incoming {
        match base.iter_mut().find(|a| a.name == artifact.name) {
            Some(existing) => *existing = artifact,
            None => base.push(artifact),
        }
    }
}

/// Where persisted artifacts go.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(&self, artifact: &Artifact) -> io::Result<()>;
}

/// In-memory store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    written: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn written(&self) -> Vec<Artifact> {
        self.written.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn persist(&self, artifact: &Artifact) -> io::Result<()> {
        self.written.lock().await.push(artifact.clone());
        Ok(())
    }
}

/// Store writing artifacts beneath a project directory, creating parent
/// directories as needed.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    root: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for DirectoryArtifactStore {
    async fn persist(&self, artifact: &Artifact) -> io::Result<()> {
        // Security: ensure the artifact name doesn't escape the project root
        let name = std::path::Path::new(&artifact.name);
        if name.is_absolute()
            || name
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact path escapes project directory: {}", artifact.name),
            ));
        }

        let full_path = self.root.join(name);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &artifact.content).await
    }
}
