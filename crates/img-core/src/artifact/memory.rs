use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::artifact::{ArtifactReceipt, ArtifactStore};
use crate::errors::JobError;
use crate::hashing::hash_str;
use crate::model::JobIdentity;

/// Store de artifacts en memoria, indexado por la ruta relativa de la
/// identidad. El checksum es blake3 (el store de disco usa sha256).
#[derive(Clone, Default)]
pub struct InMemoryArtifactStore {
    blobs: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn write(&self, key: &JobIdentity, bytes: &[u8]) -> Result<ArtifactReceipt, JobError> {
        let path = key.artifact_relative_path();
        let checksum = blake3::hash(bytes).to_hex().to_string();
        self.blobs.write().insert(path.clone(), Arc::new(bytes.to_vec()));
        Ok(ArtifactReceipt { location: format!("mem://{}", path.display()),
                             checksum,
                             bytes: bytes.len() as u64 })
    }

    fn read(&self, key: &JobIdentity) -> Result<Vec<u8>, JobError> {
        self.blobs
            .read()
            .get(&key.artifact_relative_path())
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| JobError::NotFound(format!("artifact for {key}")))
    }

    fn exists(&self, key: &JobIdentity) -> bool {
        self.blobs.read().contains_key(&key.artifact_relative_path())
    }

    fn remove(&self, key: &JobIdentity) -> Result<bool, JobError> {
        Ok(self.blobs.write().remove(&key.artifact_relative_path()).is_some())
    }
}
