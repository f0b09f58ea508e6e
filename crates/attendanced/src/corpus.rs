//! Training corpus management: enrollment, curation and full model rebuilds.

use crate::engine::{locate_face, EngineError, EngineSettings};
use crate::ledger::{DeletionReport, Identity, Ledger, LedgerError};
use attendance_core::imaging;
use attendance_core::{
    ClassifierModel, FaceRegion, FaceRegionDetector, IdentityClassifier, LabeledFace, ModelState,
    ModelStore,
};
use image::GrayImage;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollOutcome {
    /// Face stored. The model is stale until the next rebuild.
    Stored {
        image_id: i64,
        identity_id: i64,
        region: FaceRegion,
        corpus_version: u64,
    },
    NoFaceInSubmission,
    UnknownIdentity {
        identity_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebuildOutcome {
    Trained {
        artifact_id: Uuid,
        corpus_version: u64,
        samples: usize,
        identities: usize,
    },
    /// The corpus is empty; the previous model, if any, stays in place.
    InsufficientData,
}

/// What happened to the model after an identity was deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Retrain {
    Skipped,
    Done { outcome: RebuildOutcome },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionOutcome {
    #[serde(flatten)]
    pub report: DeletionReport,
    pub retrain: Retrain,
}

/// Model health as seen by operators.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub state: &'static str,
    pub artifact_id: Option<Uuid>,
    pub model_corpus_version: Option<u64>,
    pub corpus_version: u64,
    /// The corpus changed since the model was trained.
    pub stale: bool,
    pub samples: usize,
    pub identities: usize,
    pub error: Option<String>,
}

pub struct TrainingCorpus {
    detector: Arc<dyn FaceRegionDetector>,
    classifier: Arc<dyn IdentityClassifier>,
    models: Arc<ModelStore>,
    ledger: Ledger,
    settings: EngineSettings,
    retrain_on_delete: bool,
    rebuild_lock: Mutex<()>,
}

impl TrainingCorpus {
    pub fn new(
        detector: Arc<dyn FaceRegionDetector>,
        classifier: Arc<dyn IdentityClassifier>,
        models: Arc<ModelStore>,
        ledger: Ledger,
        settings: EngineSettings,
        retrain_on_delete: bool,
    ) -> Self {
        Self {
            detector,
            classifier,
            models,
            ledger,
            settings,
            retrain_on_delete,
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn create_identity(&self, display_name: &str) -> Result<Identity, EngineError> {
        Ok(self.ledger.create_identity(display_name)?)
    }

    /// Detect a face in an encoded submission and store its crop for `identity_id`.
    pub fn enroll_image(&self, identity_id: i64, image_bytes: &[u8]) -> Result<EnrollOutcome, EngineError> {
        let gray = imaging::decode_grayscale(image_bytes)?;
        self.enroll_gray(identity_id, &gray)
    }

    pub fn enroll_gray(&self, identity_id: i64, gray: &GrayImage) -> Result<EnrollOutcome, EngineError> {
        if self.ledger.get_identity(identity_id)?.is_none() {
            return Ok(EnrollOutcome::UnknownIdentity { identity_id });
        }

        let Some((region, face)) = locate_face(self.detector.as_ref(), self.settings.selection, gray)? else {
            tracing::info!(identity_id, "enroll: no face in submission; nothing stored");
            return Ok(EnrollOutcome::NoFaceInSubmission);
        };

        match self.ledger.add_training_image(identity_id, &face) {
            Ok((image_id, corpus_version)) => {
                tracing::info!(
                    identity_id,
                    image_id,
                    corpus_version,
                    width = region.width,
                    height = region.height,
                    "enroll: face stored"
                );
                Ok(EnrollOutcome::Stored {
                    image_id,
                    identity_id,
                    region,
                    corpus_version,
                })
            }
            // Deleted between the lookup and the insert.
            Err(LedgerError::UnknownIdentity(_)) => Ok(EnrollOutcome::UnknownIdentity { identity_id }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_training_image(&self, image_id: i64) -> Result<bool, EngineError> {
        Ok(self.ledger.delete_training_image(image_id)?)
    }

    /// Train a fresh model on the whole corpus and swap it in.
    ///
    /// Rebuilds are serialized; evaluations keep using the previous snapshot
    /// until the swap.
    pub fn rebuild_model(&self) -> Result<RebuildOutcome, EngineError> {
        let _guard = self.rebuild_lock.lock().unwrap_or_else(|e| e.into_inner());

        let corpus = self.ledger.training_corpus()?;
        if corpus.images.is_empty() {
            tracing::warn!(corpus_version = corpus.version, "rebuild: corpus is empty; keeping current model");
            return Ok(RebuildOutcome::InsufficientData);
        }

        let samples: Vec<LabeledFace> = corpus
            .images
            .into_iter()
            .map(|t| LabeledFace { label: t.identity_id, image: t.image })
            .collect();
        tracing::info!(samples = samples.len(), corpus_version = corpus.version, "rebuild: training");

        let data = self.classifier.train(&samples)?;
        let model = self.models.install(ClassifierModel::new(data, corpus.version))?;

        Ok(RebuildOutcome::Trained {
            artifact_id: model.meta.artifact_id,
            corpus_version: model.meta.corpus_version,
            samples: model.meta.sample_count,
            identities: model.meta.identity_count,
        })
    }

    /// Delete an identity with its events and images, then retrain if configured.
    ///
    /// Returns `None` when no such identity exists.
    pub fn delete_identity(&self, identity_id: i64) -> Result<Option<DeletionOutcome>, EngineError> {
        let Some(report) = self.ledger.delete_identity_cascade(identity_id)? else {
            return Ok(None);
        };

        let retrain = if self.retrain_on_delete {
            match self.rebuild_model() {
                Ok(outcome) => Retrain::Done { outcome },
                Err(e) => {
                    tracing::error!(identity_id, error = %e, "retrain after deletion failed; model is stale");
                    Retrain::Failed { error: e.to_string() }
                }
            }
        } else {
            tracing::info!(identity_id, "retrain on delete disabled; model is stale");
            Retrain::Skipped
        };

        Ok(Some(DeletionOutcome { report, retrain }))
    }

    pub fn status(&self) -> Result<ModelStatus, EngineError> {
        let corpus_version = self.ledger.corpus_version()?;
        let state = self.models.state();
        let mut status = ModelStatus {
            state: state.label(),
            artifact_id: None,
            model_corpus_version: None,
            corpus_version,
            stale: false,
            samples: 0,
            identities: 0,
            error: None,
        };
        match state {
            ModelState::Absent => {}
            ModelState::Trained(model) => {
                status.artifact_id = Some(model.meta.artifact_id);
                status.model_corpus_version = Some(model.meta.corpus_version);
                status.stale = model.is_stale(corpus_version);
                status.samples = model.meta.sample_count;
                status.identities = model.meta.identity_count;
            }
            ModelState::Corrupt(reason) => status.error = Some(reason),
        }
        Ok(status)
    }
}
