//! Append-only filesystem store for published artifacts.
//!
//! Layout: `{root}/{entity}/h{horizon}_ensemble_v{version}.json` plus the
//! `…v{version}.meta.json` sidecar. Published files are never overwritten,
//! and a version exists only once both files are in place.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use ensemble_core::{EnsembleError, EnsembleResult};

use crate::artifact::{checksum, ArtifactId, ArtifactRecord, ModelArtifact};

const ARTIFACT_EXT: &str = ".json";
const METADATA_EXT: &str = ".meta.json";
const PARTIAL_EXT: &str = ".partial";

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(&id.entity).join(format!("{}{}", id.stem(), ARTIFACT_EXT))
    }

    pub fn metadata_path(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(&id.entity).join(format!("{}{}", id.stem(), METADATA_EXT))
    }

    /// Published versions for (entity, horizon), ascending. A version counts
    /// only when its sidecar is present too.
    pub fn versions(&self, entity: &str, horizon: u32) -> EnsembleResult<Vec<u32>> {
        let dir = self.root.join(entity);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("h{}_ensemble_v", horizon);
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(METADATA_EXT) {
                continue;
            }
            let version = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(ARTIFACT_EXT))
                .and_then(|v| v.parse::<u32>().ok());
            if let Some(v) = version {
                if self.metadata_path(&ArtifactId::new(entity, horizon, v)).exists() {
                    versions.push(v);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest_version(&self, entity: &str, horizon: u32) -> EnsembleResult<Option<u32>> {
        Ok(self.versions(entity, horizon)?.last().copied())
    }

    /// One past the highest published version; versions start at 1.
    pub fn next_version(&self, entity: &str, horizon: u32) -> EnsembleResult<u32> {
        Ok(self.latest_version(entity, horizon)?.map_or(1, |v| v + 1))
    }

    /// Write the artifact and its sidecar. Fails if the version already
    /// exists; a failed publish leaves no trace of the version.
    pub fn publish(&self, artifact: &ModelArtifact) -> EnsembleResult<ArtifactRecord> {
        let id = artifact.id();
        let bytes = artifact.to_json()?;
        let record = ArtifactRecord::describe(artifact, &bytes);
        let sidecar = serde_json::to_vec_pretty(&record)?;

        let artifact_path = self.artifact_path(id);
        let metadata_path = self.metadata_path(id);
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staged_artifact = stage(&artifact_path, &bytes)?;
        let staged_sidecar = match stage(&metadata_path, &sidecar) {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(&staged_artifact);
                return Err(e);
            }
        };

        // sidecar last: the version becomes visible only when both are placed
        let placed = place(&staged_artifact, &artifact_path).and_then(|()| {
            place(&staged_sidecar, &metadata_path).map_err(|e| {
                let _ = fs::remove_file(&artifact_path);
                e
            })
        });
        let _ = fs::remove_file(&staged_artifact);
        let _ = fs::remove_file(&staged_sidecar);
        if let Err(e) = placed {
            tracing::error!("Publishing {} failed: {}", record.name, e);
            return Err(e);
        }

        tracing::info!(
            "Published {} ({} bytes, sha256 {})",
            record.name,
            record.size_bytes,
            record.checksum
        );
        Ok(record)
    }

    pub fn load_record(&self, id: &ArtifactId) -> EnsembleResult<ArtifactRecord> {
        let bytes = fs::read(self.metadata_path(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load an artifact, verifying it against the sidecar checksum.
    pub fn load(&self, id: &ArtifactId) -> EnsembleResult<ModelArtifact> {
        let record = self.load_record(id)?;
        let bytes = fs::read(self.artifact_path(id))?;
        let found = checksum(&bytes);
        if found != record.checksum {
            tracing::error!("Checksum mismatch for {}", id);
            return Err(EnsembleError::IntegrityMismatch {
                expected: record.checksum,
                found,
            });
        }
        ModelArtifact::from_json(&bytes)
    }

    pub fn load_latest(&self, entity: &str, horizon: u32) -> EnsembleResult<Option<ModelArtifact>> {
        match self.latest_version(entity, horizon)? {
            Some(version) => self.load(&ArtifactId::new(entity, horizon, version)).map(Some),
            None => Ok(None),
        }
    }
}

/// Write `bytes` next to `target` under a temporary name, synced to disk.
fn stage(target: &Path, bytes: &[u8]) -> EnsembleResult<PathBuf> {
    let mut name = target.as_os_str().to_os_string();
    name.push(PARTIAL_EXT);
    let staged = PathBuf::from(name);

    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staged)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&staged);
        return Err(EnsembleError::Storage(format!(
            "cannot write {}: {}",
            staged.display(),
            e
        )));
    }
    Ok(staged)
}

/// Link a staged file to its final name. Fails if the name is taken.
fn place(staged: &Path, target: &Path) -> EnsembleResult<()> {
    fs::hard_link(staged, target)
        .map_err(|e| EnsembleError::Storage(format!("cannot create {}: {}", target.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_naming_scheme() {
        let store = ArtifactStore::new("/models");
        let id = ArtifactId::new("BTC-USD", 4, 12);
        assert_eq!(
            store.artifact_path(&id),
            PathBuf::from("/models/BTC-USD/h4_ensemble_v12.json")
        );
        assert_eq!(
            store.metadata_path(&id),
            PathBuf::from("/models/BTC-USD/h4_ensemble_v12.meta.json")
        );
    }

    #[test]
    fn test_versions_ignore_other_horizons_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let entity_dir = dir.path().join("SPY");
        fs::create_dir_all(&entity_dir).unwrap();
        for name in [
            "h1_ensemble_v1.json",
            "h1_ensemble_v1.meta.json",
            "h1_ensemble_v3.json",
            "h1_ensemble_v3.meta.json",
            "h5_ensemble_v9.json",
            "notes.txt",
        ] {
            fs::write(entity_dir.join(name), b"{}").unwrap();
        }

        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.versions("SPY", 1).unwrap(), vec![1, 3]);
        assert_eq!(store.next_version("SPY", 1).unwrap(), 4);
        assert_eq!(store.next_version("SPY", 2).unwrap(), 1);
        assert_eq!(store.next_version("QQQ", 1).unwrap(), 1);
    }

    #[test]
    fn test_place_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let first = stage(&path, b"first").unwrap();
        place(&first, &path).unwrap();

        let second = stage(&path, b"second").unwrap();
        let err = place(&second, &path).unwrap_err();
        assert!(matches!(err, EnsembleError::Storage(_)));
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }

    #[test]
    fn test_artifact_without_sidecar_is_not_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let entity_dir = dir.path().join("SPY");
        fs::create_dir_all(&entity_dir).unwrap();
        fs::write(entity_dir.join("h1_ensemble_v1.json"), b"{}").unwrap();
        fs::write(entity_dir.join("h1_ensemble_v1.meta.json"), b"{}").unwrap();
        fs::write(entity_dir.join("h1_ensemble_v2.json"), b"{}").unwrap();
        fs::write(entity_dir.join("h1_ensemble_v3.meta.json"), b"{}").unwrap();

        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.versions("SPY", 1).unwrap(), vec![1]);
        assert_eq!(store.next_version("SPY", 1).unwrap(), 2);
    }
}
