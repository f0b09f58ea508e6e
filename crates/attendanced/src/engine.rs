use crate::ledger::{AttendanceEvent, Identity, Ledger, LedgerError, MarkOutcome};
use attendance_core::classifier::ClassifierError;
use attendance_core::detector::DetectorError;
use attendance_core::imaging::{self, ImageError};
use attendance_core::model::ModelError;
use attendance_core::{FaceRegion, FaceRegionDetector, IdentityClassifier, ModelStore, SelectionPolicy};
use chrono::{Local, NaiveDateTime};
use image::GrayImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image: {0}")]
    Image(#[from] ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Rejected input, as opposed to a failure of the engine or its storage.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::Image(_)
                | EngineError::Ledger(LedgerError::EmptyName)
                | EngineError::Ledger(LedgerError::UnknownIdentity(_))
        )
    }
}

/// Outcome of one attendance evaluation. Every variant is an ordinary result;
/// only infrastructure failures surface as [`EngineError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceResult {
    NoFace,
    ModelUntrained,
    NotRecognized {
        score: f64,
    },
    /// The model predicted a label with no matching identity (stale model).
    UnknownIdentity {
        label: i64,
        score: f64,
    },
    AlreadyMarked {
        identity: Identity,
        score: f64,
    },
    Marked {
        identity: Identity,
        event: AttendanceEvent,
        score: f64,
    },
}

impl AttendanceResult {
    /// Stable result code.
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceResult::NoFace => "NO_FACE",
            AttendanceResult::ModelUntrained => "MODEL_UNTRAINED",
            AttendanceResult::NotRecognized { .. } => "NOT_RECOGNIZED",
            AttendanceResult::UnknownIdentity { .. } => "UNKNOWN_IDENTITY",
            AttendanceResult::AlreadyMarked { .. } => "ALREADY_MARKED",
            AttendanceResult::Marked { .. } => "MARKED",
        }
    }
}

/// Decision parameters shared by evaluation and enrollment.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Dissimilarity cutoff: a score at or above it is not a match.
    pub threshold: f64,
    pub selection: SelectionPolicy,
}

/// Detect faces and crop the one the policy selects.
///
/// Regions lying entirely outside the image are dropped before the policy
/// runs. Returns `None` when the detector finds nothing usable.
pub(crate) fn locate_face(
    detector: &dyn FaceRegionDetector,
    selection: SelectionPolicy,
    image: &GrayImage,
) -> Result<Option<(FaceRegion, GrayImage)>, DetectorError> {
    let regions: Vec<FaceRegion> = detector
        .detect(image)?
        .into_iter()
        .filter_map(|r| r.clamp_to(image.width(), image.height()))
        .collect();
    let Some(region) = selection.select(&regions) else {
        return Ok(None);
    };
    if regions.len() > 1 {
        tracing::debug!(found = regions.len(), policy = %selection, ?region, "multiple faces; one selected");
    }
    Ok(region.crop(image).map(|face| (*region, face)))
}

/// Turns a captured image into at most one attendance event.
pub struct AttendanceEngine {
    detector: Arc<dyn FaceRegionDetector>,
    classifier: Arc<dyn IdentityClassifier>,
    models: Arc<ModelStore>,
    ledger: Ledger,
    settings: EngineSettings,
}

impl AttendanceEngine {
    pub fn new(
        detector: Arc<dyn FaceRegionDetector>,
        classifier: Arc<dyn IdentityClassifier>,
        models: Arc<ModelStore>,
        ledger: Ledger,
        settings: EngineSettings,
    ) -> Self {
        Self {
            detector,
            classifier,
            models,
            ledger,
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Evaluate an encoded capture against the local clock.
    pub fn evaluate(&self, image_bytes: &[u8]) -> Result<AttendanceResult, EngineError> {
        self.evaluate_at(image_bytes, Local::now().naive_local())
    }

    /// Evaluate an encoded capture as if taken at `now`.
    pub fn evaluate_at(&self, image_bytes: &[u8], now: NaiveDateTime) -> Result<AttendanceResult, EngineError> {
        let gray = imaging::decode_grayscale(image_bytes)?;
        self.evaluate_image(&gray, now)
    }

    pub fn evaluate_image(&self, gray: &GrayImage, now: NaiveDateTime) -> Result<AttendanceResult, EngineError> {
        let Some((region, face)) = locate_face(self.detector.as_ref(), self.settings.selection, gray)? else {
            tracing::debug!("evaluate: no face");
            return Ok(AttendanceResult::NoFace);
        };

        let Some(model) = self.models.snapshot()? else {
            tracing::debug!("evaluate: no trained model");
            return Ok(AttendanceResult::ModelUntrained);
        };

        let prediction = self.classifier.predict(&model.data, &face)?;
        let score = prediction.score;
        if score >= self.settings.threshold {
            tracing::info!(
                label = prediction.label,
                score,
                threshold = self.settings.threshold,
                "evaluate: face not recognized"
            );
            return Ok(AttendanceResult::NotRecognized { score });
        }

        let result = match self.ledger.mark_attendance(prediction.label, now)? {
            MarkOutcome::Marked { identity, event } => {
                tracing::info!(
                    identity_id = identity.id,
                    name = %identity.display_name,
                    score,
                    x = region.x,
                    y = region.y,
                    "attendance marked"
                );
                AttendanceResult::Marked { identity, event, score }
            }
            MarkOutcome::AlreadyMarked { identity } => {
                tracing::info!(identity_id = identity.id, score, "attendance already marked today");
                AttendanceResult::AlreadyMarked { identity, score }
            }
            MarkOutcome::UnknownIdentity => {
                tracing::warn!(
                    label = prediction.label,
                    artifact_id = %model.meta.artifact_id,
                    "model predicted a label with no identity; retrain required"
                );
                AttendanceResult::UnknownIdentity {
                    label: prediction.label,
                    score,
                }
            }
        };
        Ok(result)
    }
}
