//! Identity classification via Local Binary Pattern Histograms (LBPH).
//!
//! Each training face is reduced to a spatial histogram of 8-neighbour LBP
//! codes over a grid of cells. Prediction is nearest-neighbour under the
//! symmetric chi-square distance, so the score is a dissimilarity: 0.0 for an
//! identical face, growing with difference (at most 4.0 per grid cell).

use crate::types::{LabeledFace, Prediction};
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

const LBP_PATTERNS: usize = 256;
const DEFAULT_GRID: u32 = 8;
const DEFAULT_FACE_SIZE: u32 = 96;

/// Distance cutoff used when nothing else is configured.
pub const DEFAULT_THRESHOLD: f64 = 70.0;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no training samples")]
    NoSamples,
    #[error("model holds no samples")]
    EmptyModel,
    #[error("model parameters do not match classifier: model {model:?}, classifier {classifier:?}")]
    ParamsMismatch {
        model: LbphParams,
        classifier: LbphParams,
    },
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

/// Classifies a face crop against a trained model.
pub trait IdentityClassifier: Send + Sync {
    /// Build a fresh model from the full labeled corpus.
    fn train(&self, samples: &[LabeledFace]) -> Result<LbphModel, ClassifierError>;

    /// Predict the nearest identity label and its dissimilarity score.
    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub grid_x: u32,
    pub grid_y: u32,
    /// Crops are resampled to `face_size × face_size` before encoding.
    pub face_size: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            grid_x: DEFAULT_GRID,
            grid_y: DEFAULT_GRID,
            face_size: DEFAULT_FACE_SIZE,
        }
    }
}

/// Trained LBPH reference set: one histogram per training face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphModel {
    pub params: LbphParams,
    pub labels: Vec<i64>,
    pub histograms: Vec<Vec<f32>>,
}

impl LbphModel {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Distinct labels present in the model, ascending.
    pub fn distinct_labels(&self) -> Vec<i64> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    params: LbphParams,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Result<Self, ClassifierError> {
        if params.grid_x == 0 || params.grid_y == 0 {
            return Err(ClassifierError::InvalidParams("grid must be at least 1×1".into()));
        }
        // LBP drops a one-pixel border; every cell needs at least one code.
        if params.face_size < params.grid_x.max(params.grid_y) + 2 {
            return Err(ClassifierError::InvalidParams(format!(
                "face_size {} too small for a {}×{} grid",
                params.face_size, params.grid_x, params.grid_y
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    /// Spatial LBP histogram of one face crop.
    pub fn histogram(&self, face: &GrayImage) -> Vec<f32> {
        let size = self.params.face_size;
        let face: Cow<'_, GrayImage> = if face.dimensions() == (size, size) {
            Cow::Borrowed(face)
        } else {
            Cow::Owned(image::imageops::resize(face, size, size, FilterType::Triangle))
        };
        let codes = lbp_codes(&face);
        let side = (size - 2) as usize;
        spatial_histogram(&codes, side, side, self.params.grid_x as usize, self.params.grid_y as usize)
    }
}

impl IdentityClassifier for LbphClassifier {
    fn train(&self, samples: &[LabeledFace]) -> Result<LbphModel, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        let labels = samples.iter().map(|s| s.label).collect();
        let histograms = samples.iter().map(|s| self.histogram(&s.image)).collect();
        Ok(LbphModel {
            params: self.params,
            labels,
            histograms,
        })
    }

    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        if model.params != self.params {
            return Err(ClassifierError::ParamsMismatch {
                model: model.params,
                classifier: self.params,
            });
        }
        let probe = self.histogram(face);

        let mut best: Option<Prediction> = None;
        for (label, hist) in model.labels.iter().zip(&model.histograms) {
            let score = chi_square(&probe, hist);
            if best.map_or(true, |b| score < b.score) {
                best = Some(Prediction { label: *label, score });
            }
        }
        best.ok_or(ClassifierError::EmptyModel)
    }
}

/// 8-neighbour, radius-1 LBP codes for the interior of `img`.
///
/// Bit order runs clockwise from the top-left neighbour (bit 7) to the left
/// neighbour (bit 0); a bit is set when the neighbour is >= the centre.
fn lbp_codes(img: &GrayImage) -> Vec<u8> {
    const OFFSETS: [(i32, i32); 8] = [
        (-1, -1), (0, -1), (1, -1), (1, 0),
        (1, 1), (0, 1), (-1, 1), (-1, 0),
    ];
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let mut codes = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x, y).0[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
                let n = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0];
                if n >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Concatenated per-cell histograms, each normalized by its cell's pixel count.
fn spatial_histogram(codes: &[u8], width: usize, height: usize, grid_x: usize, grid_y: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; grid_x * grid_y * LBP_PATTERNS];
    for gy in 0..grid_y {
        let y0 = gy * height / grid_y;
        let y1 = (gy + 1) * height / grid_y;
        for gx in 0..grid_x {
            let x0 = gx * width / grid_x;
            let x1 = (gx + 1) * width / grid_x;
            let cell = (gy * grid_x + gx) * LBP_PATTERNS;
            let total = ((y1 - y0) * (x1 - x0)) as f32;
            if total == 0.0 {
                continue;
            }
            for y in y0..y1 {
                for x in x0..x1 {
                    out[cell + codes[y * width + x] as usize] += 1.0;
                }
            }
            for bin in &mut out[cell..cell + LBP_PATTERNS] {
                *bin /= total;
            }
        }
    }
    out
}

/// Symmetric chi-square distance: Σ 2(a−b)² / (a+b).
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| {
            let sum = (a + b) as f64;
            if sum > f64::EPSILON {
                let d = (a - b) as f64;
                2.0 * d * d / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn uniform(v: u8) -> GrayImage {
        GrayImage::from_pixel(DEFAULT_FACE_SIZE, DEFAULT_FACE_SIZE, Luma([v]))
    }

    fn stripes() -> GrayImage {
        GrayImage::from_fn(DEFAULT_FACE_SIZE, DEFAULT_FACE_SIZE, |x, _| {
            Luma([if x % 2 == 0 { 0 } else { 255 }])
        })
    }

    fn sample(label: i64, image: GrayImage) -> LabeledFace {
        LabeledFace { label, image }
    }

    #[test]
    fn test_lbp_uniform_is_all_ones() {
        let codes = lbp_codes(&GrayImage::from_pixel(5, 5, Luma([40])));
        assert_eq!(codes.len(), 9);
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_lbp_stripe_codes() {
        let img = GrayImage::from_fn(4, 3, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));
        let codes = lbp_codes(&img);
        // x=1 is bright: only top and bottom neighbours (same column) are >=.
        assert_eq!(codes[0], 0b0100_0100);
        // x=2 is dark: every neighbour is >=.
        assert_eq!(codes[1], 0xFF);
    }

    #[test]
    fn test_histogram_cells_sum_to_one() {
        let classifier = LbphClassifier::default();
        let hist = classifier.histogram(&stripes());
        assert_eq!(hist.len(), 64 * LBP_PATTERNS);
        for cell in hist.chunks(LBP_PATTERNS) {
            let sum: f32 = cell.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "cell sums to {sum}");
        }
    }

    #[test]
    fn test_chi_square_bounds() {
        assert_eq!(chi_square(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
        // Disjoint normalized histograms hit the per-cell maximum of 4.
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_train_empty_fails() {
        let result = LbphClassifier::default().train(&[]);
        assert!(matches!(result, Err(ClassifierError::NoSamples)));
    }

    #[test]
    fn test_predict_identical_face_scores_zero() {
        let classifier = LbphClassifier::default();
        let model = classifier
            .train(&[sample(1, uniform(90)), sample(2, stripes())])
            .unwrap();

        let p = classifier.predict(&model, &stripes()).unwrap();
        assert_eq!(p.label, 2);
        assert!(p.score.abs() < 1e-9);
    }

    #[test]
    fn test_predict_different_texture_above_threshold() {
        let classifier = LbphClassifier::default();
        let model = classifier.train(&[sample(7, stripes())]).unwrap();

        let p = classifier.predict(&model, &uniform(128)).unwrap();
        assert_eq!(p.label, 7);
        assert!(p.score >= DEFAULT_THRESHOLD, "score {} should be rejected", p.score);
    }

    #[test]
    fn test_predict_resizes_other_sizes() {
        let classifier = LbphClassifier::default();
        let model = classifier.train(&[sample(3, uniform(10))]).unwrap();
        let small = GrayImage::from_pixel(40, 57, Luma([200]));
        assert_eq!(classifier.histogram(&small).len(), 64 * LBP_PATTERNS);
        let p = classifier.predict(&model, &small).unwrap();
        assert_eq!(p.label, 3);
        assert!(p.score.is_finite());
    }

    #[test]
    fn test_predict_empty_model() {
        let classifier = LbphClassifier::default();
        let model = LbphModel { params: classifier.params(), labels: vec![], histograms: vec![] };
        assert!(matches!(classifier.predict(&model, &uniform(1)), Err(ClassifierError::EmptyModel)));
    }

    #[test]
    fn test_predict_rejects_foreign_params() {
        let classifier = LbphClassifier::default();
        let other = LbphClassifier::new(LbphParams { grid_x: 4, grid_y: 4, face_size: 64 }).unwrap();
        let model = other.train(&[sample(1, uniform(1))]).unwrap();
        assert!(matches!(
            classifier.predict(&model, &uniform(1)),
            Err(ClassifierError::ParamsMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_params() {
        assert!(LbphClassifier::new(LbphParams { grid_x: 0, grid_y: 8, face_size: 96 }).is_err());
        assert!(LbphClassifier::new(LbphParams { grid_x: 8, grid_y: 8, face_size: 9 }).is_err());
    }

    #[test]
    fn test_distinct_labels() {
        let classifier = LbphClassifier::default();
        let model = classifier
            .train(&[sample(5, uniform(1)), sample(2, uniform(2)), sample(5, uniform(3))])
            .unwrap();
        assert_eq!(model.distinct_labels(), vec![2, 5]);
        assert_eq!(model.len(), 3);
    }
}
