//! Artifact storage keyed by `/`-separated paths such as
//! `login/prod/2026-01-01_00-00-00/artifact.log`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use walkdir::WalkDir;

use super::poisoned;

/// What to upload: bytes in memory or an existing file.
#[derive(Debug, Clone)]
pub enum ArtifactBody {
    Content(Vec<u8>),
    Path(PathBuf),
}

impl From<String> for ArtifactBody {
    fn from(content: String) -> Self {
        ArtifactBody::Content(content.into_bytes())
    }
}

impl From<Vec<u8>> for ArtifactBody {
    fn from(content: Vec<u8>) -> Self {
        ArtifactBody::Content(content)
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload_file(&self, key: &str, body: ArtifactBody) -> Result<()>;

    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys under `prefix`, sorted.
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject keys that would escape the store root.
fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("Artifact key must not be empty");
    }
    let path = Path::new(key);
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        bail!("Invalid artifact key: {}", key);
    }
    Ok(())
}

/// Stores artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload_file(&self, key: &str, body: ArtifactBody) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create artifact directory: {}", parent.display()))?;
        }
        match body {
            ArtifactBody::Content(content) => tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("Failed to write artifact: {}", path.display()))?,
            ArtifactBody::Path(source) => {
                tokio::fs::copy(&source, &path).await.with_context(|| {
                    format!("Failed to copy {} to {}", source.display(), path.display())
                })?;
            }
        }
        Ok(())
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", path.display()))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry.context("Failed to walk artifact directory")?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .context("Artifact listing task panicked")?
    }
}

/// Process-local artifact store.
#[derive(Debug, Default, Clone)]
pub struct MemoryArtifactStore {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload_file(&self, key: &str, body: ArtifactBody) -> Result<()> {
        check_key(key)?;
        let content = match body {
            ArtifactBody::Content(content) => content,
            ArtifactBody::Path(source) => tokio::fs::read(&source)
                .await
                .with_context(|| format!("Failed to read {}", source.display()))?,
        };
        self.files.lock().map_err(poisoned)?.insert(key.to_string(), content);
        Ok(())
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().map_err(poisoned)?;
        files
            .get(key)
            .cloned()
            .with_context(|| format!("Artifact not found: {}", key))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let files = self.files.lock().map_err(poisoned)?;
        Ok(files
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_upload_get_list() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        store
            .upload_file("c/prod/ts/artifact.log", "hello".to_string().into())
            .await
            .unwrap();
        store
            .upload_file("c/prod/ts/failure.png", vec![0x89, 0x50].into())
            .await
            .unwrap();
        store
            .upload_file("c/staging/ts/artifact.log", "other".to_string().into())
            .await
            .unwrap();

        assert_eq!(store.get_file("c/prod/ts/artifact.log").await.unwrap(), b"hello");
        assert_eq!(
            store.list_files("c/prod/ts/").await.unwrap(),
            vec!["c/prod/ts/artifact.log", "c/prod/ts/failure.png"]
        );
    }

    #[tokio::test]
    async fn test_local_upload_from_path() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.txt");
        std::fs::write(&source, "from disk").unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store"));

        store
            .upload_file("k/file.txt", ArtifactBody::Path(source))
            .await
            .unwrap();
        assert_eq!(store.get_file("k/file.txt").await.unwrap(), b"from disk");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.upload_file("../x", vec![].into()).await.is_err());
        assert!(store.upload_file("/etc/passwd", vec![].into()).await.is_err());
        assert!(store.get_file("").await.is_err());
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("nope"));
        assert!(store.list_files("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        store.upload_file("a/1", vec![1].into()).await.unwrap();
        store.upload_file("b/1", vec![2].into()).await.unwrap();
        assert_eq!(store.list_files("a/").await.unwrap(), vec!["a/1"]);
        assert!(store.get_file("c").await.is_err());
    }
}
