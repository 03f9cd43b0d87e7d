//! Frame sources.
//!
//! This module provides sequential readers for decoded frames:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` sources (testing, demos)
//!
//! Every source reads one frame at a time and never seeks backwards. The
//! pipeline owns a source for the duration of one video and drops it after.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod file;

use std::path::Path;

use anyhow::Result;

use crate::frame::{Frame, VideoInfo};

pub use file::{FileSource, SyntheticConfig};

/// Sequential frame reader.
pub trait FrameSource {
    /// Container properties, known once the source is open.
    fn info(&self) -> VideoInfo;

    /// Read the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens a frame source for a resolved path.
///
/// The batch orchestrator only sees this seam, so callers can swap the
/// decoder without touching the pipeline.
pub trait SourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Default opener backed by [`FileSource`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSourceOpener;

impl SourceOpener for FileSourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let source = FileSource::open(&path.to_string_lossy())?;
        Ok(Box::new(source))
    }
}
