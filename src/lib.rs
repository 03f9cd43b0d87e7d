//! Cor gaze heatmaps
//!
//! Estimates where a filmed person was looking by combining per-frame eye
//! detections into gaze points, accumulates the points into a density
//! heatmap, and reports a detection-rate based confidence assessment.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> DetectorBackend -> GazeEstimator -> HeatmapAccumulator
//!                                                 \-> ConfidenceAnalyzer -> OutputWriter
//! ```
//!
//! Processing is sequential: one frame at a time, one video at a time.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (local files, synthetic `stub://` sources)
//! - `detect`: face/eye detector backends and their registry
//! - `gaze`, `heatmap`, `confidence`: the per-video analysis
//! - `attention`: fixations, saccades and the JSON attention export
//! - `output`, `record`: heatmap images, overlay video, confidence record
//! - `paths`, `pipeline`, `batch`: reference resolution and orchestration
//! - `config`, `calibration`: runtime configuration and parameter files

pub mod attention;
pub mod batch;
pub mod calibration;
pub mod confidence;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod gaze;
pub mod heatmap;
pub mod ingest;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod record;

pub use attention::{AttentionAnalysis, AttentionAnalyzer};
pub use batch::{BatchOptions, BatchOrchestrator, BatchResult, VideoResult};
pub use confidence::{ConfidenceAnalyzer, ConfidenceReport};
pub use config::CorConfig;
pub use detect::{BackendRegistry, DetectionBox, DetectionResult, DetectorBackend, FaceDetection};
pub use error::CorError;
pub use frame::{Frame, VideoInfo};
pub use gaze::{GazeEstimator, GazePoint};
pub use heatmap::{HeatmapAccumulator, HeatmapGrid, HeatmapMode};
pub use ingest::{FileSource, FileSourceOpener, FrameSource, SourceOpener};
pub use paths::{PathConfig, PathResolver, Resolution};
pub use pipeline::{NoProgress, ProgressSink, VideoOutcome, VideoPipeline};
