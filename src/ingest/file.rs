//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file, or from a synthetic
//! `stub://` description used by tests and demos.
//!
//! Synthetic form: `stub://WIDTHxHEIGHT?frames=N&fps=F`. Every part after the
//! scheme is optional; the defaults are 640x480, 100 frames, 30 fps.

use std::path::Path;

use anyhow::{anyhow, Result};

use super::FrameSource;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::error::CorError;
use crate::frame::{Frame, VideoInfo};
use crate::paths::is_supported_video;

const STUB_SCHEME: &str = "stub://";

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(CorError::source_unavailable(
                path,
                "only local paths are supported (no URL schemes)",
            )
            .into());
        }
        if let Some(spec) = path.strip_prefix(STUB_SCHEME) {
            let config = SyntheticConfig::parse(spec)
                .map_err(|e| CorError::source_unavailable(path, e))?;
            log::debug!("FileSource: opened {} (synthetic)", path);
            return Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            });
        }
        if !Path::new(path).is_file() {
            return Err(CorError::source_unavailable(path, "file not found").into());
        }
        if !is_supported_video(Path::new(path)) {
            return Err(CorError::source_unavailable(path, "unsupported video format").into());
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let source = FfmpegFileSource::open(path)
                .map_err(|e| CorError::source_unavailable(path, format!("{:#}", e)))?;
            log::debug!("FileSource: opened {} (ffmpeg)", path);
            Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(CorError::source_unavailable(
                path,
                "decoding video files requires the ingest-file-ffmpeg feature",
            )
            .into())
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn info(&self) -> VideoInfo {
        match &self.backend {
            FileBackend::Synthetic(source) => source.info(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.info(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    pub fps: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frames: 100,
            fps: 30.0,
        }
    }
}

impl SyntheticConfig {
    /// Parse the part of a `stub://` reference after the scheme.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut config = Self::default();
        let (dims, query) = match spec.split_once('?') {
            Some((dims, query)) => (dims, Some(query)),
            None => (spec, None),
        };
        let dims = dims.trim_end_matches('/');
        if let Some((w, h)) = dims.split_once('x') {
            config.width = w
                .parse()
                .map_err(|_| anyhow!("invalid synthetic width '{}'", w))?;
            config.height = h
                .parse()
                .map_err(|_| anyhow!("invalid synthetic height '{}'", h))?;
        }
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("frames", v)) => {
                    config.frames = v
                        .parse()
                        .map_err(|_| anyhow!("invalid synthetic frame count '{}'", v))?;
                }
                Some(("fps", v)) => {
                    config.fps = v
                        .parse()
                        .map_err(|_| anyhow!("invalid synthetic fps '{}'", v))?;
                }
                _ => return Err(anyhow!("unknown synthetic parameter '{}'", pair)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic frame dimensions must be non-zero"));
        }
        Ok(config)
    }
}

struct SyntheticFileSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticFileSource {
    fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn info(&self) -> VideoInfo {
        VideoInfo {
            frame_count: self.config.frames,
            fps: self.config.fps,
            width: self.config.width,
            height: self.config.height,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
        .map(Some)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}
