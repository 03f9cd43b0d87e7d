mod backend;
mod backends;
mod registry;
mod result;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, ReplayBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{DetectionBox, DetectionResult, FaceDetection};

/// Detector selection and tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Registered backend name.
    pub name: String,
    /// ONNX model for the `tract` backend.
    pub model_path: Option<PathBuf>,
    /// Detections file for the `replay` backend. When unset the backend looks
    /// for a `<video>.detections.json` sidecar next to each video.
    pub replay_path: Option<PathBuf>,
    /// Luma below this value counts as pupil-dark.
    pub dark_threshold: u8,
    pub pupil_min_area: u32,
    pub pupil_max_area: u32,
    pub confidence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            name: "cpu".to_string(),
            model_path: None,
            replay_path: None,
            dark_threshold: 50,
            pupil_min_area: 50,
            pupil_max_area: 2000,
            confidence_threshold: 0.5,
        }
    }
}
