//! attendance-core: Face detection, identity classification and model snapshots.
//!
//! Detection runs SCRFD via ONNX Runtime; identities are classified with
//! Local Binary Pattern Histograms. Both sit behind traits so the attendance
//! engine can be driven by any implementation.

pub mod classifier;
pub mod detector;
pub mod imaging;
pub mod model;
pub mod types;

pub use classifier::{IdentityClassifier, LbphClassifier, LbphModel, LbphParams};
pub use detector::{FaceRegionDetector, ScrfdDetector};
pub use model::{ClassifierModel, ModelState, ModelStore};
pub use types::{FaceRegion, LabeledFace, Prediction, SelectionPolicy};

/// Default directory holding the SCRFD detector model.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/attendance/models")
}
