use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionResult, FaceDetection};
use crate::detect::DetectorSettings;
use crate::frame::{Frame, VideoInfo};

const SIDECAR_SUFFIX: &str = ".detections.json";

/// Replays pre-computed detections.
///
/// The detections file is a JSON array with one entry per frame, each entry
/// an array of faces: `[[{"face":[x,y,w,h],"eyes":[[x,y,w,h],...]}], ...]`.
/// Frame `n` (1-based read index) gets entry `n - 1`; frames past the end
/// get no detections.
pub struct ReplayBackend {
    frames: Vec<Vec<FaceDetection>>,
    fixed: bool,
}

impl ReplayBackend {
    /// Replay the same detections for every video.
    pub fn from_frames(frames: Vec<Vec<FaceDetection>>) -> Self {
        Self {
            frames,
            fixed: true,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::from_frames(load_detections(path)?))
    }

    /// Load detections for each video from its `<video>.detections.json`.
    pub fn per_video() -> Self {
        Self {
            frames: Vec::new(),
            fixed: false,
        }
    }

    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        match &settings.replay_path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::per_video()),
        }
    }

    pub fn sidecar_path(video: &Path) -> PathBuf {
        let mut name = video.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn begin_video(&mut self, path: &Path, _info: &VideoInfo) -> Result<()> {
        if self.fixed {
            return Ok(());
        }
        let sidecar = Self::sidecar_path(path);
        if sidecar.is_file() {
            self.frames = load_detections(&sidecar)?;
            log::debug!(
                "replay: {} frames of detections from {}",
                self.frames.len(),
                sidecar.display()
            );
        } else {
            log::warn!("replay: no detections file at {}", sidecar.display());
            self.frames.clear();
        }
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let faces = frame
            .index
            .checked_sub(1)
            .and_then(|i| self.frames.get(i as usize))
            .cloned()
            .unwrap_or_default();
        Ok(DetectionResult::from(faces))
    }
}

fn load_detections(path: &Path) -> Result<Vec<Vec<FaceDetection>>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read detections file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse detections file {}", path.display()))
}
