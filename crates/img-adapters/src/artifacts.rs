//! Store de artifacts en el sistema de archivos.
//!
//! Layout: `<root>/<dataset_id>/<image_id>_<operation>_<key>.jpg`. La
//! escritura va a un temporal oculto en el mismo directorio y se publica con
//! `rename`, que reemplaza de forma atómica en el mismo filesystem.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use img_core::{ArtifactReceipt, ArtifactStore, JobError, JobIdentity};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &JobIdentity) -> PathBuf {
        self.root.join(key.artifact_relative_path())
    }

    fn write_replace(&self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        let written = (|| {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, target)
        })();
        if written.is_err() {
            if let Err(e) = fs::remove_file(&tmp) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("temp artifact cleanup failed path={} err={}", tmp.display(), e);
                }
            }
        }
        written
    }
}

fn storage_fault(action: &str, path: &Path, e: io::Error) -> JobError {
    JobError::StorageFault(format!("{action} {}: {e}", path.display()))
}

impl ArtifactStore for FsArtifactStore {
    fn write(&self, key: &JobIdentity, bytes: &[u8]) -> Result<ArtifactReceipt, JobError> {
        let target = self.path_for(key);
        self.write_replace(&target, bytes)
            .map_err(|e| storage_fault("could not write artifact", &target, e))?;
        let checksum = format!("{:x}", Sha256::digest(bytes));
        debug!("artifact written path={} bytes={} sha256={}", target.display(), bytes.len(), checksum);
        Ok(ArtifactReceipt { location: target.to_string_lossy().into_owned(),
                             checksum,
                             bytes: bytes.len() as u64 })
    }

    fn read(&self, key: &JobIdentity) -> Result<Vec<u8>, JobError> {
        let path = self.path_for(key);
        fs::read(&path).map_err(|e| match e.kind() {
                           io::ErrorKind::NotFound => JobError::NotFound(format!("artifact {}", path.display())),
                           _ => storage_fault("could not read artifact", &path, e),
                       })
    }

    fn exists(&self, key: &JobIdentity) -> bool {
        self.path_for(key).is_file()
    }

    fn remove(&self, key: &JobIdentity) -> Result<bool, JobError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_fault("could not remove artifact", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use img_core::OperationKind;

    fn key() -> JobIdentity {
        JobIdentity::new(3, 11, OperationKind::Kmeans, "4").unwrap()
    }

    #[test]
    fn write_creates_dataset_dir_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let receipt = store.write(&key(), b"jpeg-bytes").unwrap();
        let expected = dir.path().join("3").join("11_kmeans_4.jpg");
        assert_eq!(PathBuf::from(&receipt.location), expected);
        assert_eq!(receipt.bytes, 10);
        assert_eq!(receipt.checksum.len(), 64);
        let entries: Vec<_> = fs::read_dir(dir.path().join("3")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.write(&key(), b"first").unwrap();
        store.write(&key(), b"second").unwrap();
        assert_eq!(store.read(&key()).unwrap(), b"second".to_vec());
    }

    #[test]
    fn missing_artifact_is_not_found_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(!store.exists(&key()));
        assert!(matches!(store.read(&key()), Err(JobError::NotFound(_))));
        assert!(!store.remove(&key()).unwrap());
        store.write(&key(), b"x").unwrap();
        assert!(store.remove(&key()).unwrap());
        assert!(!store.exists(&key()));
    }
}
