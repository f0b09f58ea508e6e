//! Deterministic detector and classifier stand-ins for unit tests.
//!
//! Captures are 64×64 with a non-zero background. A face crop encodes its
//! own classification: pixel (0, 0) is the predicted label and pixel (1, 0)
//! the dissimilarity score.

use crate::ledger::Ledger;
use attendance_core::classifier::{ClassifierError, LbphModel, LbphParams};
use attendance_core::detector::DetectorError;
use attendance_core::{ClassifierModel, FaceRegion, FaceRegionDetector, IdentityClassifier, LabeledFace, ModelStore, Prediction};
use image::{GrayImage, Luma};
use std::sync::Mutex;

const BACKGROUND: u8 = 50;
const SINGLE: FaceRegion = FaceRegion { x: 8, y: 8, width: 32, height: 32, confidence: 1.0 };
const SMALL: FaceRegion = FaceRegion { x: 2, y: 2, width: 10, height: 10, confidence: 0.9 };
const LARGE: FaceRegion = FaceRegion { x: 20, y: 20, width: 40, height: 40, confidence: 0.8 };

/// Reports its configured regions for any image that is not all black.
pub struct StubDetector {
    regions: Mutex<Vec<FaceRegion>>,
}

impl StubDetector {
    pub fn single() -> Self {
        Self { regions: Mutex::new(vec![SINGLE]) }
    }

    pub fn set_regions(&self, regions: Vec<FaceRegion>) {
        *self.regions.lock().unwrap() = regions;
    }

    /// Small face first, large face second.
    pub fn set_two(&self) {
        self.set_regions(vec![SMALL, LARGE]);
    }
}

impl FaceRegionDetector for StubDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        if image.pixels().all(|p| p.0[0] == 0) {
            return Ok(Vec::new());
        }
        Ok(self.regions.lock().unwrap().clone())
    }
}

pub struct StubClassifier;

impl IdentityClassifier for StubClassifier {
    fn train(&self, samples: &[LabeledFace]) -> Result<LbphModel, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        Ok(model_for(samples.iter().map(|s| s.label).collect()))
    }

    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        if model.is_empty() {
            return Err(ClassifierError::EmptyModel);
        }
        Ok(Prediction {
            label: face.get_pixel(0, 0).0[0] as i64,
            score: face.get_pixel(1, 0).0[0] as f64,
        })
    }
}

fn model_for(labels: Vec<i64>) -> LbphModel {
    LbphModel {
        params: LbphParams::default(),
        histograms: vec![Vec::new(); labels.len()],
        labels,
    }
}

fn stamp(image: &mut GrayImage, region: &FaceRegion, label: u8, score: u8) {
    image.put_pixel(region.x, region.y, Luma([label]));
    image.put_pixel(region.x + 1, region.y, Luma([score]));
}

/// A capture whose single face classifies as (`label`, `score`).
pub fn capture(label: u8, score: u8) -> GrayImage {
    let mut image = GrayImage::from_pixel(64, 64, Luma([BACKGROUND]));
    stamp(&mut image, &SINGLE, label, score);
    image
}

/// A capture for [`StubDetector::set_two`]: `small` then `large` as (label, score).
pub fn capture_two(small: (u8, u8), large: (u8, u8)) -> GrayImage {
    let mut image = GrayImage::from_pixel(64, 64, Luma([BACKGROUND]));
    stamp(&mut image, &SMALL, small.0, small.1);
    stamp(&mut image, &LARGE, large.0, large.1);
    image
}

/// In-memory ledger with identities created in order (ids 1, 2, ...).
pub fn ledger_with(names: &[&str]) -> Ledger {
    let ledger = Ledger::open_in_memory().unwrap();
    for name in names {
        ledger.create_identity(name).unwrap();
    }
    ledger
}

/// Install a model holding one sample per label.
pub fn train(models: &ModelStore, labels: &[i64]) {
    models
        .install(ClassifierModel::new(model_for(labels.to_vec()), 0))
        .unwrap();
}
