//! Local package cache.
//!
//! Layout: `<cache>/<id>.zip` plus a `<id>.json` fingerprint recording the
//! version timestamp the archive was fetched for and its content digest.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use modeldb_core::{ModelId, ModelIdentity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::Result;

/// Sidecar metadata of one cached archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub model_id: ModelId,
    pub ver_date: String,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
}

/// Filesystem cache of model archives.
#[derive(Debug, Clone)]
pub struct PackageCache {
    dir: PathBuf,
}

impl PackageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory if needed (idempotent).
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.is_dir() {
            info!(path = %self.dir.display(), "creating cache directory");
        }
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn archive_path(&self, id: ModelId) -> PathBuf {
        self.dir.join(format!("{id}.zip"))
    }

    fn fingerprint_path(&self, id: ModelId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically replace the archive of `identity` and its fingerprint.
    pub fn store(&self, identity: &ModelIdentity, archive: &[u8]) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.archive_path(identity.id);
        write_atomic(&self.dir, &path, archive)?;

        let fingerprint = Fingerprint {
            model_id: identity.id,
            ver_date: identity.ver_date.clone(),
            sha256: hex::encode(Sha256::digest(archive)),
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&fingerprint)?;
        write_atomic(&self.dir, &self.fingerprint_path(identity.id), &json)?;
        Ok(path)
    }

    pub fn fingerprint(&self, id: ModelId) -> Option<Fingerprint> {
        let content = std::fs::read(self.fingerprint_path(id)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// The cached archive exists and was fetched for the current version.
    pub fn is_current(&self, identity: &ModelIdentity) -> bool {
        self.archive_path(identity.id).is_file()
            && self
                .fingerprint(identity.id)
                .is_some_and(|fp| fp.ver_date == identity.ver_date)
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(ver_date: &str) -> ModelIdentity {
        ModelIdentity::new(ModelId(3264), "Mainen", "1996", ver_date)
    }

    #[test]
    fn test_store_creates_dir_and_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PackageCache::new(dir.path().join("cache"));
        let path = cache.store(&identity("2020-01-01"), b"PK\x03\x04").unwrap();

        assert_eq!(path, dir.path().join("cache").join("3264.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04");
        let fp = cache.fingerprint(ModelId(3264)).unwrap();
        assert_eq!(fp.ver_date, "2020-01-01");
        assert_eq!(fp.sha256.len(), 64);
    }

    #[test]
    fn test_version_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PackageCache::new(dir.path());
        assert!(!cache.is_current(&identity("2020-01-01")));

        cache.store(&identity("2020-01-01"), b"zip").unwrap();
        assert!(cache.is_current(&identity("2020-01-01")));
        assert!(!cache.is_current(&identity("2024-06-30")));
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PackageCache::new(dir.path().join("c"));
        cache.ensure_dir().unwrap();
        cache.ensure_dir().unwrap();
        assert!(cache.dir().is_dir());
    }
}
