//! Single-video processing.
//!
//! Frames are read strictly in order, one at a time. Each frame goes through
//! detection and gaze estimation; the resulting points feed the heatmap and
//! the confidence report once the source is exhausted. Output write failures
//! are logged and recorded on the outcome, never fatal.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

use crate::attention::{
    fixation_heatmap, saccade_heatmap, timed_track, AttentionAnalysis, AttentionAnalyzer,
};
use crate::config::CorConfig;
use crate::confidence::{ConfidenceAnalyzer, ConfidenceReport};
use crate::detect::DetectorBackend;
use crate::error::CorError;
use crate::frame::VideoInfo;
use crate::gaze::{GazeEstimator, GazePoint};
use crate::heatmap::{HeatmapAccumulator, HeatmapGrid, HeatmapMode};
use crate::ingest::{FrameSource, SourceOpener};
use crate::output::{draw_gaze, overlay_video_path, OutputWriter, OverlayVideoWriter};
use crate::paths::{video_extension, video_name, PathResolver, Resolution};
use crate::record::RecordWriter;

const FALLBACK_VIDEO_EXT: &str = ".mp4";
const FRAMES_DIR: &str = "frames";

/// Progress callbacks. Every method defaults to a no-op.
pub trait ProgressSink {
    fn video_started(&mut self, _path: &Path, _info: &VideoInfo) {}
    fn frame_processed(&mut self, _frames_read: u64) {}
    fn video_finished(&mut self, _outcome: &VideoOutcome) {}
}

/// Discards progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Everything produced for one video.
#[derive(Clone, Debug, Serialize)]
pub struct VideoOutcome {
    pub video_path: PathBuf,
    pub video_name: String,
    pub info: VideoInfo,
    /// Frames actually read; the denominator of the detection rate.
    pub frames_processed: u64,
    #[serde(skip)]
    pub gaze_points: Vec<GazePoint>,
    /// 1-based read index of the frame each gaze point came from.
    #[serde(skip)]
    pub gaze_frames: Vec<u64>,
    pub report: ConfidenceReport,
    pub attention: AttentionAnalysis,
    pub outputs: Vec<PathBuf>,
    pub output_errors: Vec<String>,
}

/// Runs the frame loop for one video.
pub struct VideoPipeline<'a> {
    config: &'a CorConfig,
    visualize: bool,
    export_analysis: bool,
}

impl<'a> VideoPipeline<'a> {
    pub fn new(config: &'a CorConfig) -> Self {
        Self {
            config,
            visualize: false,
            export_analysis: false,
        }
    }

    /// Also write the annotated overlay video.
    pub fn with_visualization(mut self, visualize: bool) -> Self {
        self.visualize = visualize;
        self
    }

    /// Also write `{video}_analysis.json`.
    pub fn with_analysis_export(mut self, export: bool) -> Self {
        self.export_analysis = export;
        self
    }

    pub fn run(
        &self,
        video_path: &Path,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        output_folder: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<VideoOutcome> {
        let info = source.info();
        let name = video_name(video_path);
        let mode = self.config.heatmap_mode()?;
        log::info!(
            "processing {} ({}x{}, {:.1} fps, ~{} frames)",
            video_path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );

        fs::create_dir_all(output_folder)
            .map_err(|e| CorError::output_write(output_folder, e))?;
        detector.begin_video(video_path, &info)?;
        progress.video_started(video_path, &info);

        let mut output_errors = Vec::new();
        let mut outputs = Vec::new();
        let mut points = Vec::new();
        let mut gaze_frames = Vec::new();
        let mut frames: u64 = 0;
        let mut dims: Option<(u32, u32)> = None;
        let mut estimator = GazeEstimator::new(info.width, info.height);
        let mut representative: Option<RgbImage> = None;
        let mut last_frame: Option<RgbImage> = None;
        let mut video_writer: Option<OverlayVideoWriter> = None;
        let mut video_writer_failed = false;
        let overlay_index = self.config.analysis.overlay_frame_index;

        while let Some(frame) = source.next_frame()? {
            frames += 1;
            if dims.is_none() {
                dims = Some((frame.width(), frame.height()));
                estimator = GazeEstimator::new(frame.width(), frame.height());
            }

            let detections = detector.detect(&frame)?;
            let sample = estimator.estimate(&detections);
            if let Some(sample) = &sample {
                points.push(sample.point);
                gaze_frames.push(frames);
            }

            if self.visualize && !video_writer_failed {
                if video_writer.is_none() {
                    let ext = match video_extension(video_path) {
                        ext if ext.is_empty() => FALLBACK_VIDEO_EXT.to_string(),
                        ext => ext,
                    };
                    let path = overlay_video_path(output_folder, &name, &ext);
                    match OverlayVideoWriter::create(&path, frame.width(), frame.height(), info.fps)
                    {
                        Ok(writer) => video_writer = Some(writer),
                        Err(e) => {
                            record_output_error(&mut output_errors, e);
                            video_writer_failed = true;
                        }
                    }
                }
                if let Some(writer) = video_writer.as_mut() {
                    let mut annotated = frame.image().clone();
                    if let Some(sample) = &sample {
                        draw_gaze(&mut annotated, sample);
                    }
                    if let Err(e) = writer.write_frame(&annotated) {
                        record_output_error(&mut output_errors, e);
                        if let Some(writer) = video_writer.take() {
                            writer.abort();
                        }
                        video_writer_failed = true;
                    }
                }
            }

            if frames == overlay_index {
                representative = Some(frame.image().clone());
            }
            last_frame = Some(frame.into_image());
            progress.frame_processed(frames);
        }

        if frames == 0 {
            log::warn!("{}: no frames could be read", video_path.display());
        } else if points.is_empty() {
            log::warn!(
                "{}: no gaze points detected in {} frames",
                video_path.display(),
                frames
            );
        } else {
            log::info!(
                "{}: {} gaze points in {} frames",
                video_path.display(),
                points.len(),
                frames
            );
        }

        let analyzer = ConfidenceAnalyzer::new(
            self.config.analysis.reference_width,
            self.config.analysis.reference_height,
        );
        let report = analyzer.analyze(&points, frames);

        let (width, height) = dims.unwrap_or((info.width, info.height));
        let track = timed_track(&points, &gaze_frames, width, height, info.fps);
        let attention = AttentionAnalyzer::new(self.config.attention.clone()).analyze(&track);

        if width > 0 && height > 0 {
            let grid = match mode {
                HeatmapMode::Density => {
                    let mut accumulator =
                        HeatmapAccumulator::new(width, height, &self.config.heatmap);
                    accumulator.add_points(&points);
                    accumulator.finish()
                }
                HeatmapMode::Fixation => fixation_heatmap(&attention.fixations, width, height),
                HeatmapMode::Saccade => {
                    saccade_heatmap(&track, &attention.saccades, width, height)
                }
            };
            log_empty_mode(video_path, mode, &grid);
            let writer = OutputWriter::new(
                output_folder,
                self.config.image_format()?,
                self.config.color_scheme()?,
                self.config.heatmap.overlay_alpha,
            );

            match writer.write_pure(&name, &grid) {
                Ok(path) => outputs.push(path),
                Err(e) => record_output_error(&mut output_errors, e),
            }
            match representative.as_ref().or(last_frame.as_ref()) {
                Some(frame) => match writer.write_overlay(&name, &grid, frame) {
                    Ok(path) => outputs.push(path),
                    Err(e) => record_output_error(&mut output_errors, e),
                },
                None => log::warn!(
                    "{}: no frame available for the overlay image",
                    video_path.display()
                ),
            }
        } else {
            log::warn!(
                "{}: unknown frame size, skipping heatmap images",
                video_path.display()
            );
        }

        if self.export_analysis {
            if track.is_empty() {
                log::warn!(
                    "{}: no gaze points, skipping attention analysis export",
                    video_path.display()
                );
            } else {
                match attention.write_json(output_folder, &name) {
                    Ok(path) => outputs.push(path),
                    Err(e) => record_output_error(&mut output_errors, e),
                }
            }
        }

        let record = RecordWriter::new(output_folder, &self.config.record_file_name);
        match record.append(&name, &report) {
            Ok(()) => outputs.push(record.path().to_path_buf()),
            Err(e) => record_output_error(&mut output_errors, e),
        }

        if let Some(writer) = video_writer {
            match writer.finish() {
                Ok(path) => outputs.push(path),
                Err(e) => record_output_error(&mut output_errors, e),
            }
        }

        let outcome = VideoOutcome {
            video_path: video_path.to_path_buf(),
            video_name: name,
            info,
            frames_processed: frames,
            gaze_points: points,
            gaze_frames,
            report,
            attention,
            outputs,
            output_errors,
        };
        progress.video_finished(&outcome);
        Ok(outcome)
    }
}

fn log_empty_mode(video_path: &Path, mode: HeatmapMode, grid: &HeatmapGrid) {
    if mode != HeatmapMode::Density && grid.is_empty() {
        log::warn!(
            "{}: no {}s found, {} heatmap is empty",
            video_path.display(),
            mode,
            mode
        );
    }
}

fn record_output_error(errors: &mut Vec<String>, err: anyhow::Error) {
    log::error!("{:#}", err);
    errors.push(format!("{:#}", err));
}

/// Modifiers for a single-video run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Write the annotated overlay video.
    pub visualize: bool,
    /// Write `{video}_analysis.json`.
    pub export_analysis: bool,
    /// Output folder instead of `{output_root}/{video_name}_output`.
    pub output: Option<PathBuf>,
}

/// Resolve `reference` and process it into its own output folder.
pub fn run_single(
    config: &CorConfig,
    reference: &str,
    opener: &dyn SourceOpener,
    detector: &mut dyn DetectorBackend,
    options: &RunOptions,
    progress: &mut dyn ProgressSink,
) -> Result<VideoOutcome> {
    let resolver = PathResolver::new(&config.paths);
    let path = match resolver.resolve(reference) {
        Resolution::Found(path) => path,
        Resolution::Unresolved(reference) => {
            return Err(CorError::ResolutionFailure { reference }.into())
        }
    };
    let folder = match &options.output {
        Some(folder) => folder.clone(),
        None => config
            .paths
            .output_root()
            .join(format!("{}_output", video_name(&path))),
    };
    let mut source = opener.open(&path)?;
    VideoPipeline::new(config)
        .with_visualization(options.visualize)
        .with_analysis_export(options.export_analysis)
        .run(&path, source.as_mut(), detector, &folder, progress)
}

// ----------------------------------------------------------------------------
// Validation, frame extraction, benchmarking
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub valid: bool,
    pub info: Option<VideoInfo>,
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn duration_secs(&self) -> f64 {
        self.info.map(|i| i.duration_secs()).unwrap_or(0.0)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Video: {}", self.path.display())?;
        match (&self.info, &self.error) {
            (Some(info), _) if self.valid => {
                writeln!(f, "  Valid: yes")?;
                writeln!(f, "  Frames: {}", info.frame_count)?;
                writeln!(f, "  FPS: {:.2}", info.fps)?;
                writeln!(f, "  Resolution: {}x{}", info.width, info.height)?;
                write!(f, "  Duration: {:.2}s", self.duration_secs())
            }
            (_, Some(error)) => write!(f, "  Valid: no ({})", error),
            _ => write!(f, "  Valid: no"),
        }
    }
}

/// Open the video and report its properties without processing it.
pub fn validate_video(path: &Path, opener: &dyn SourceOpener) -> ValidationReport {
    match opener.open(path) {
        Ok(source) => ValidationReport {
            path: path.to_path_buf(),
            valid: true,
            info: Some(source.info()),
            error: None,
        },
        Err(e) => ValidationReport {
            path: path.to_path_buf(),
            valid: false,
            info: None,
            error: Some(format!("{:#}", e)),
        },
    }
}

/// Save `count` evenly spaced frames as `frame_NNN.{ext}` under
/// `{output_folder}/frames`.
pub fn extract_frames(
    source: &mut dyn FrameSource,
    output_folder: &Path,
    count: usize,
    writer: &OutputWriter,
    extension: &str,
) -> Result<Vec<PathBuf>> {
    let frames_dir = output_folder.join(FRAMES_DIR);
    fs::create_dir_all(&frames_dir).map_err(|e| CorError::output_write(&frames_dir, e))?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let step = (source.info().frame_count / count as u64).max(1);
    let mut written = Vec::with_capacity(count);
    let mut read_index: u64 = 0;
    while written.len() < count {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if read_index % step == 0 {
            let path = frames_dir.join(format!("frame_{:03}.{}", written.len(), extension));
            writer.save(frame.image(), &path)?;
            written.push(path);
        }
        read_index += 1;
    }
    log::info!(
        "extracted {} frames into {}",
        written.len(),
        frames_dir.display()
    );
    Ok(written)
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct BenchmarkReport {
    pub processed_frames: u64,
    pub successful_detections: u64,
    pub processing_fps: f64,
    pub detection_rate: f64,
    pub processing_time_ms: f64,
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark results:")?;
        writeln!(f, "  Processed frames: {}", self.processed_frames)?;
        writeln!(f, "  Frames with gaze: {}", self.successful_detections)?;
        writeln!(f, "  Processing FPS: {:.2}", self.processing_fps)?;
        writeln!(f, "  Detection rate: {:.1}%", self.detection_rate * 100.0)?;
        write!(f, "  Processing time: {:.1} ms", self.processing_time_ms)
    }
}

/// Time detection and gaze estimation over up to `max_frames` frames.
pub fn benchmark(
    video_path: &Path,
    source: &mut dyn FrameSource,
    detector: &mut dyn DetectorBackend,
    max_frames: u64,
) -> Result<BenchmarkReport> {
    let info = source.info();
    detector.begin_video(video_path, &info)?;
    let mut estimator = GazeEstimator::new(info.width, info.height);
    let mut processed = 0u64;
    let mut hits = 0u64;

    let start = Instant::now();
    while processed < max_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if processed == 0 {
            estimator = GazeEstimator::new(frame.width(), frame.height());
        }
        processed += 1;
        if estimator.estimate(&detector.detect(&frame)?).is_some() {
            hits += 1;
        }
    }
    let elapsed = start.elapsed().as_secs_f64();

    Ok(BenchmarkReport {
        processed_frames: processed,
        successful_detections: hits,
        processing_fps: if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        },
        detection_rate: if processed > 0 {
            hits as f64 / processed as f64
        } else {
            0.0
        },
        processing_time_ms: elapsed * 1000.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionBox, FaceDetection, ReplayBackend};
    use crate::ingest::FileSource;
    use crate::output::{ColorScheme, ImageFormat};

    fn two_eyes() -> Vec<FaceDetection> {
        vec![FaceDetection {
            face: DetectionBox::new(0, 0, 32, 16),
            eyes: vec![DetectionBox::new(4, 4, 4, 4), DetectionBox::new(20, 4, 4, 4)],
        }]
    }

    fn png_config() -> CorConfig {
        let mut config = CorConfig::default();
        config.heatmap.image_format = "png".into();
        config
    }

    #[derive(Default)]
    struct Counting {
        started: usize,
        frames: u64,
        finished: usize,
    }

    impl ProgressSink for Counting {
        fn video_started(&mut self, _path: &Path, _info: &VideoInfo) {
            self.started += 1;
        }
        fn frame_processed(&mut self, frames_read: u64) {
            self.frames = frames_read;
        }
        fn video_finished(&mut self, _outcome: &VideoOutcome) {
            self.finished += 1;
        }
    }

    #[test]
    fn pipeline_counts_frames_and_points() {
        let dir = tempfile::tempdir().unwrap();
        let config = png_config();
        let mut source = FileSource::open("stub://32x16?frames=12").unwrap();
        let mut frames = vec![two_eyes(); 9];
        frames.extend(vec![Vec::new(); 3]);
        let mut detector = ReplayBackend::from_frames(frames);
        let mut progress = Counting::default();

        let outcome = VideoPipeline::new(&config)
            .run(
                Path::new("clip.mp4"),
                &mut source,
                &mut detector,
                dir.path(),
                &mut progress,
            )
            .unwrap();

        assert_eq!(outcome.frames_processed, 12);
        assert_eq!(outcome.gaze_points.len(), 9);
        assert!((outcome.report.detection_rate - 0.75).abs() < 1e-12);
        assert!(outcome.output_errors.is_empty());
        assert!(dir.path().join("clip_heatmap-pure.png").is_file());
        assert!(dir.path().join("clip_heatmap-overlay.png").is_file());
        assert!(dir.path().join("gaze_confidence.csv").is_file());
        assert_eq!((progress.started, progress.frames, progress.finished), (1, 12, 1));
    }

    #[test]
    fn short_video_uses_last_frame_for_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let config = png_config();
        let mut source = FileSource::open("stub://16x16?frames=3").unwrap();
        let mut detector = ReplayBackend::from_frames(Vec::new());

        let outcome = VideoPipeline::new(&config)
            .run(
                Path::new("short.avi"),
                &mut source,
                &mut detector,
                dir.path(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(outcome.report.accuracy_confidence, 0.0);
        assert!(dir.path().join("short_heatmap-overlay.png").is_file());
        let record = fs::read_to_string(dir.path().join("gaze_confidence.csv")).unwrap();
        assert_eq!(record.lines().count(), 2);
    }

    #[test]
    fn empty_video_still_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = png_config();
        let mut source = FileSource::open("stub://16x16?frames=0").unwrap();
        let mut detector = ReplayBackend::from_frames(Vec::new());

        let outcome = VideoPipeline::new(&config)
            .run(
                Path::new("empty.mp4"),
                &mut source,
                &mut detector,
                dir.path(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(outcome.frames_processed, 0);
        assert!(!outcome.report.has_tracking());
        assert!(dir.path().join("empty_heatmap-pure.png").is_file());
        assert!(!dir.path().join("empty_heatmap-overlay.png").exists());
        assert!(dir.path().join("gaze_confidence.csv").is_file());
    }

    #[test]
    fn extracts_evenly_spaced_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileSource::open("stub://8x8?frames=10").unwrap();
        let writer = OutputWriter::new(dir.path(), ImageFormat::Png, ColorScheme::Hot, 0.6);
        let written = extract_frames(&mut source, dir.path(), 3, &writer, "png").unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_000.png", "frame_001.png", "frame_002.png"]);
        assert!(written.iter().all(|p| p.starts_with(dir.path().join("frames"))));
    }

    #[test]
    fn benchmark_reports_detection_rate() {
        let mut source = FileSource::open("stub://32x16?frames=20").unwrap();
        let mut detector = ReplayBackend::from_frames(vec![two_eyes(); 5]);
        let report = benchmark(Path::new("bench.mp4"), &mut source, &mut detector, 10).unwrap();
        assert_eq!(report.processed_frames, 10);
        assert_eq!(report.successful_detections, 5);
        assert!((report.detection_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn validate_reports_open_failures() {
        let opener = crate::ingest::FileSourceOpener;
        let ok = validate_video(Path::new("stub://64x32?frames=60&fps=30"), &opener);
        assert!(ok.valid);
        assert_eq!(ok.duration_secs(), 2.0);

        let bad = validate_video(Path::new("/no/such/video.mp4"), &opener);
        assert!(!bad.valid);
        assert!(bad.error.is_some());
    }

    #[test]
    fn analysis_export_and_fixation_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = png_config();
        config.heatmap.mode = "fixation".into();
        let mut source = FileSource::open("stub://32x16?frames=12&fps=30").unwrap();
        let mut detector = ReplayBackend::from_frames(vec![two_eyes(); 9]);

        let outcome = VideoPipeline::new(&config)
            .with_analysis_export(true)
            .run(
                Path::new("dwell.mp4"),
                &mut source,
                &mut detector,
                dir.path(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(outcome.gaze_frames, (1..=9).collect::<Vec<u64>>());
        assert_eq!(outcome.attention.fixation_count, 1);
        assert_eq!(outcome.attention.fixations[0].visit_count, 9);
        assert_eq!(outcome.attention.saccade_count, 0);

        let json = dir.path().join("dwell_analysis.json");
        assert!(outcome.outputs.contains(&json));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["fixation_count"], 1);

        let pure = image::open(dir.path().join("dwell_heatmap-pure.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(pure.dimensions(), (32, 16));
    }

    #[test]
    fn analysis_export_is_skipped_without_gaze() {
        let dir = tempfile::tempdir().unwrap();
        let config = png_config();
        let mut source = FileSource::open("stub://16x16?frames=4").unwrap();
        let mut detector = ReplayBackend::from_frames(Vec::new());

        let outcome = VideoPipeline::new(&config)
            .with_analysis_export(true)
            .run(
                Path::new("idle.mp4"),
                &mut source,
                &mut detector,
                dir.path(),
                &mut NoProgress,
            )
            .unwrap();

        assert!(outcome.output_errors.is_empty());
        assert!(!dir.path().join("idle_analysis.json").exists());
        assert_eq!(outcome.attention.fixation_count, 0);
    }

    #[test]
    fn run_single_honors_output_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = png_config();
        let opener = crate::ingest::FileSourceOpener;
        let mut detector = ReplayBackend::from_frames(vec![two_eyes(); 3]);
        let options = RunOptions {
            export_analysis: true,
            output: Some(dir.path().join("single")),
            ..RunOptions::default()
        };

        let outcome = run_single(
            &config,
            "stub://32x16?frames=3",
            &opener,
            &mut detector,
            &options,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(outcome.video_name, "32x16_frames_3");
        assert!(dir
            .path()
            .join("single/32x16_frames_3_analysis.json")
            .is_file());
    }
}
