use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use log::debug;

use vietlott_db::models::Variant;

use crate::error::{Error, Result};

/// Where trained model artifacts live between processes.
pub trait ArtifactStore: Send + Sync {
    fn read(&self, variant: Variant, model: &str) -> Result<Option<Vec<u8>>>;
    fn write(&self, variant: Variant, model: &str, bytes: &[u8]) -> Result<()>;
}

/// `<root>/<model_version>/<variant_key>/<model>.json`
pub struct FsArtifactStore {
    root: PathBuf,
    model_version: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, model_version: &str) -> Self {
        Self { root: root.into(), model_version: model_version.to_string() }
    }

    pub fn path_for(&self, variant: Variant, model: &str) -> PathBuf {
        self.root.join(&self.model_version).join(variant.key()).join(format!("{model}.json"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for FsArtifactStore {
    fn read(&self, variant: Variant, model: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(variant, model);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::artifact(model, format!("cannot read {}: {e}", path.display()))),
        }
    }

    fn write(&self, variant: Variant, model: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(variant, model);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create artifact directory {}", parent.display()))?;
        }
        // write-then-rename keeps readers from seeing half an artifact
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("Cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Cannot move artifact into {}", path.display()))?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Process-local store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<(Variant, String), Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn read(&self, variant: Variant, model: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|_| Error::artifact(model, "artifact map poisoned"))?;
        Ok(entries.get(&(variant, model.to_string())).cloned())
    }

    fn write(&self, variant: Variant, model: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::artifact(model, "artifact map poisoned"))?;
        entries.insert((variant, model.to_string()), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), "v2");
        assert_eq!(store.read(Variant::Mega645, "feature").unwrap(), None);

        store.write(Variant::Mega645, "feature", b"{\"a\":1}").unwrap();
        assert_eq!(store.read(Variant::Mega645, "feature").unwrap().unwrap(), b"{\"a\":1}".to_vec());
        assert!(dir.path().join("v2").join("mega_645").join("feature.json").is_file());
        assert_eq!(store.read(Variant::Power655, "feature").unwrap(), None);

        store.write(Variant::Mega645, "feature", b"{}").unwrap();
        assert_eq!(store.read(Variant::Mega645, "feature").unwrap().unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_versions_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        FsArtifactStore::new(dir.path(), "v1").write(Variant::Lotto535, "transition", b"old").unwrap();
        assert_eq!(FsArtifactStore::new(dir.path(), "v2").read(Variant::Lotto535, "transition").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        assert!(store.is_empty());
        store.write(Variant::Power655, "sequence", &[1, 2, 3]).unwrap();
        assert_eq!(store.read(Variant::Power655, "sequence").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.read(Variant::Mega645, "sequence").unwrap(), None);
        assert_eq!(store.len(), 1);
    }
}
