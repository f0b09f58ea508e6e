//! Classifier model snapshots and their persisted artifact.
//!
//! The live model is an immutable `Arc<ClassifierModel>` behind an `RwLock`.
//! Rebuilds train off-lock, persist via write-then-rename and swap the
//! pointer, so readers hold either the old or the new snapshot, never a mix.

use crate::classifier::LbphModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

const ARTIFACT_FORMAT: u32 = 1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model artifact I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact is corrupt: {0}")]
    Corrupt(String),
    #[error("model serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Provenance of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// Unique per training run.
    pub artifact_id: Uuid,
    /// Corpus version the model was trained from.
    pub corpus_version: u64,
    pub sample_count: usize,
    pub identity_count: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub meta: ModelMeta,
    pub data: LbphModel,
}

impl ClassifierModel {
    /// Wrap freshly trained data with new provenance.
    pub fn new(data: LbphModel, corpus_version: u64) -> Self {
        let meta = ModelMeta {
            artifact_id: Uuid::new_v4(),
            corpus_version,
            sample_count: data.len(),
            identity_count: data.distinct_labels().len(),
            trained_at: Utc::now(),
        };
        Self { meta, data }
    }

    /// True when the corpus has changed since this model was trained.
    pub fn is_stale(&self, corpus_version: u64) -> bool {
        self.meta.corpus_version != corpus_version
    }
}

/// On-disk envelope: the checksum covers `payload` byte for byte.
#[derive(Serialize, Deserialize)]
struct Artifact {
    format: u32,
    sha256: String,
    payload: String,
}

/// Observable model state.
#[derive(Debug, Clone)]
pub enum ModelState {
    /// Nothing trained or persisted yet.
    Absent,
    Trained(Arc<ClassifierModel>),
    /// A persisted artifact exists but failed to load. Cleared by the next
    /// successful install.
    Corrupt(String),
}

impl ModelState {
    pub fn label(&self) -> &'static str {
        match self {
            ModelState::Absent => "absent",
            ModelState::Trained(_) => "trained",
            ModelState::Corrupt(_) => "corrupt",
        }
    }
}

/// Process-wide holder of the current classifier model.
pub struct ModelStore {
    path: Option<PathBuf>,
    current: RwLock<ModelState>,
}

impl ModelStore {
    /// Open the store backed by `path`, loading any artifact already there.
    ///
    /// A missing file is `Absent`; an unreadable or tampered one is `Corrupt`
    /// and stays that way until a rebuild installs a new model.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_artifact(&path) {
            Ok(Some(model)) => {
                tracing::info!(
                    path = %path.display(),
                    artifact_id = %model.meta.artifact_id,
                    corpus_version = model.meta.corpus_version,
                    samples = model.meta.sample_count,
                    "classifier model loaded"
                );
                ModelState::Trained(Arc::new(model))
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no classifier model yet");
                ModelState::Absent
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "classifier model unusable; rebuild required");
                ModelState::Corrupt(e.to_string())
            }
        };
        Self {
            path: Some(path),
            current: RwLock::new(state),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(ModelState::Absent),
        }
    }

    pub fn state(&self) -> ModelState {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current snapshot, `None` when untrained.
    pub fn snapshot(&self) -> Result<Option<Arc<ClassifierModel>>, ModelError> {
        match self.state() {
            ModelState::Absent => Ok(None),
            ModelState::Trained(model) => Ok(Some(model)),
            ModelState::Corrupt(reason) => Err(ModelError::Corrupt(reason)),
        }
    }

    /// Persist `model`, then make it the current snapshot.
    ///
    /// On a persistence failure the previous snapshot stays current.
    pub fn install(&self, model: ClassifierModel) -> Result<Arc<ClassifierModel>, ModelError> {
        if let Some(path) = &self.path {
            write_artifact(path, &model)?;
        }
        let model = Arc::new(model);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = ModelState::Trained(model.clone());
        tracing::info!(
            artifact_id = %model.meta.artifact_id,
            corpus_version = model.meta.corpus_version,
            samples = model.meta.sample_count,
            identities = model.meta.identity_count,
            "classifier model installed"
        );
        Ok(model)
    }
}

fn checksum(payload: &str) -> String {
    Sha256::digest(payload.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn write_artifact(path: &Path, model: &ClassifierModel) -> Result<(), ModelError> {
    let io_err = |source| ModelError::Io { path: path.to_path_buf(), source };

    let payload = serde_json::to_string(model)?;
    let artifact = Artifact {
        format: ARTIFACT_FORMAT,
        sha256: checksum(&payload),
        payload,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(&artifact)?).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Option<ClassifierModel>, ModelError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ModelError::Io { path: path.to_path_buf(), source }),
    };
    let artifact: Artifact = serde_json::from_slice(&bytes)
        .map_err(|e| ModelError::Corrupt(format!("envelope: {e}")))?;
    if artifact.format != ARTIFACT_FORMAT {
        return Err(ModelError::Corrupt(format!("unsupported format {}", artifact.format)));
    }
    if checksum(&artifact.payload) != artifact.sha256 {
        return Err(ModelError::Corrupt("checksum mismatch".into()));
    }
    let model = serde_json::from_str(&artifact.payload)
        .map_err(|e| ModelError::Corrupt(format!("payload: {e}")))?;
    Ok(Some(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LbphParams;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("attendance-model-{name}-{}.json", Uuid::new_v4()))
    }

    fn model(corpus_version: u64) -> ClassifierModel {
        let data = LbphModel {
            params: LbphParams::default(),
            labels: vec![1, 1, 2],
            histograms: vec![vec![0.25, 0.75], vec![1.0, 0.0], vec![0.5, 0.5]],
        };
        ClassifierModel::new(data, corpus_version)
    }

    #[test]
    fn test_meta_counts() {
        let m = model(3);
        assert_eq!(m.meta.sample_count, 3);
        assert_eq!(m.meta.identity_count, 2);
        assert!(!m.is_stale(3));
        assert!(m.is_stale(4));
    }

    #[test]
    fn test_missing_artifact_is_absent() {
        let store = ModelStore::open(temp_path("missing"));
        assert!(matches!(store.state(), ModelState::Absent));
        assert!(store.snapshot().unwrap().is_none());
    }

    #[test]
    fn test_install_persists_and_reloads() {
        let path = temp_path("reload");
        let store = ModelStore::open(&path);
        let installed = store.install(model(5)).unwrap();

        let reopened = ModelStore::open(&path);
        let loaded = reopened.snapshot().unwrap().unwrap();
        assert_eq!(*loaded, *installed);
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_tampered_artifact_is_corrupt() {
        let path = temp_path("tamper");
        ModelStore::open(&path).install(model(1)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("0.75", "0.76")).unwrap();

        let store = ModelStore::open(&path);
        assert_eq!(store.state().label(), "corrupt");
        assert!(matches!(store.snapshot(), Err(ModelError::Corrupt(_))));

        // A fresh install clears the condition.
        store.install(model(2)).unwrap();
        assert_eq!(store.snapshot().unwrap().unwrap().meta.corpus_version, 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_garbage_artifact_is_corrupt() {
        let path = temp_path("garbage");
        std::fs::write(&path, b"\x00\x01 not json").unwrap();
        assert_eq!(ModelStore::open(&path).state().label(), "corrupt");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let store = ModelStore::in_memory();
        store.install(model(1)).unwrap();
        let held = store.snapshot().unwrap().unwrap();

        store.install(model(2)).unwrap();
        assert_eq!(held.meta.corpus_version, 1);
        assert_eq!(store.snapshot().unwrap().unwrap().meta.corpus_version, 2);
    }
}
