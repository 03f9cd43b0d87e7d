use std::path::Path;

use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::{Frame, VideoInfo};

/// Detector backend trait.
///
/// A backend turns one decoded frame into face and eye boxes. It is selected
/// once per run and then driven frame by frame, in read order, for every
/// video of that run.
///
/// Backends must treat the frame as read-only and must not retain pixels
/// beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Called before the first frame of each video.
    fn begin_video(&mut self, _path: &Path, _info: &VideoInfo) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
