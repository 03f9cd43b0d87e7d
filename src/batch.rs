//! Batch processing.
//!
//! A batch resolves every reference into a de-duplicated list of videos,
//! creates one timestamped folder for all outputs, and runs the single-video
//! pipeline on each video in turn. A failing video is recorded and skipped;
//! it never stops the rest of the batch.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::CorConfig;
use crate::confidence::ConfidenceReport;
use crate::detect::DetectorBackend;
use crate::error::CorError;
use crate::ingest::SourceOpener;
use crate::paths::{is_glob, video_name, PathResolver, Resolution};
use crate::pipeline::{ProgressSink, VideoOutcome, VideoPipeline};

/// Modifiers for a batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    /// Descend into sub-folders when a reference is a folder.
    pub recursive: bool,
    /// Restrict folder enumeration to these extensions (without dots).
    pub extensions: Vec<String>,
    /// Write annotated overlay videos.
    pub visualize: bool,
    /// Write `{video}_analysis.json` for every video.
    pub export_analysis: bool,
}

/// Per-video entry of a batch.
#[derive(Clone, Debug, Serialize)]
pub struct VideoResult {
    pub video_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    pub report: Option<ConfidenceReport>,
    pub output_errors: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchResult {
    /// True when at least one video was processed.
    pub success: bool,
    pub batch_folder: PathBuf,
    pub results: Vec<VideoResult>,
    /// References that matched nothing.
    pub unresolved: Vec<String>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// `batch_YYYYmmdd_HHMMSS`.
pub fn batch_folder_name(timestamp: &DateTime<Local>) -> String {
    format!("batch_{}", timestamp.format("%Y%m%d_%H%M%S"))
}

pub struct BatchOrchestrator<'a> {
    config: &'a CorConfig,
    resolver: PathResolver<'a>,
    opener: &'a dyn SourceOpener,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(config: &'a CorConfig, opener: &'a dyn SourceOpener) -> Self {
        Self {
            config,
            resolver: PathResolver::new(&config.paths),
            opener,
        }
    }

    /// Resolve relative references against `base_dir` instead of the
    /// current directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        let config = self.config;
        self.resolver = PathResolver::with_base_dir(&config.paths, base_dir);
        self
    }

    /// Expand references (files, folders, globs) into unique video paths,
    /// in first-seen order. Returns the references that matched nothing.
    ///
    /// A reference naming an existing file or folder is taken literally even
    /// when it contains glob characters (`clip[1].mp4`); only otherwise is it
    /// expanded as a pattern.
    pub fn collect_videos(
        &self,
        references: &[String],
        options: &BatchOptions,
    ) -> (Vec<PathBuf>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut videos = Vec::new();
        let mut unresolved = Vec::new();

        for reference in references {
            let resolved = if is_glob(reference) {
                self.resolver.resolve_literal(reference)
            } else {
                match self.resolver.resolve(reference) {
                    Resolution::Found(path) => Some(path),
                    Resolution::Unresolved(_) => None,
                }
            };
            let expanded = match resolved {
                Some(path) if path.is_dir() => self.resolver.find_videos_in_folder(
                    &path,
                    options.recursive,
                    &options.extensions,
                ),
                Some(path) => vec![path],
                None if is_glob(reference) => self.resolver.find_videos_by_pattern(reference),
                None => {
                    log::warn!("could not resolve '{}', skipping", reference);
                    unresolved.push(reference.clone());
                    continue;
                }
            };
            if expanded.is_empty() {
                log::warn!("no videos found for '{}'", reference);
                unresolved.push(reference.clone());
                continue;
            }
            for path in expanded {
                let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if seen.insert(key) {
                    videos.push(path);
                }
            }
        }
        (videos, unresolved)
    }

    /// Process every video the references expand to.
    pub fn run(
        &self,
        references: &[String],
        options: &BatchOptions,
        detector: &mut dyn DetectorBackend,
        progress: &mut dyn ProgressSink,
    ) -> Result<BatchResult> {
        let (videos, unresolved) = self.collect_videos(references, options);
        if videos.is_empty() {
            return Err(CorError::NoVideosFound {
                reference: references.join(", "),
            }
            .into());
        }

        let batch_folder = self
            .config
            .paths
            .output_root()
            .join(batch_folder_name(&Local::now()));
        fs::create_dir_all(&batch_folder).map_err(|e| CorError::output_write(&batch_folder, e))?;
        log::info!(
            "batch: {} videos into {}",
            videos.len(),
            batch_folder.display()
        );

        for (name, paths) in shared_video_names(&videos) {
            log::warn!(
                "{} videos share the name '{}' ({}); their outputs in {} overwrite each other",
                paths.len(),
                name,
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                batch_folder.display()
            );
        }

        let pipeline = VideoPipeline::new(self.config)
            .with_visualization(options.visualize)
            .with_analysis_export(options.export_analysis);
        let mut results = Vec::with_capacity(videos.len());
        for (i, video) in videos.iter().enumerate() {
            log::info!("[{}/{}] {}", i + 1, videos.len(), video.display());
            let result = match self.process_one(&pipeline, video, &batch_folder, detector, progress)
            {
                Ok(outcome) => VideoResult {
                    video_path: video.clone(),
                    success: true,
                    error: None,
                    report: Some(outcome.report),
                    output_errors: outcome.output_errors,
                },
                Err(e) => {
                    log::error!("{}: {:#}", video.display(), e);
                    VideoResult {
                        video_path: video.clone(),
                        success: false,
                        error: Some(format!("{:#}", e)),
                        report: None,
                        output_errors: Vec::new(),
                    }
                }
            };
            results.push(result);
        }

        let result = BatchResult {
            success: results.iter().any(|r| r.success),
            batch_folder,
            results,
            unresolved,
        };
        log::info!(
            "batch finished: {} succeeded, {} failed",
            result.succeeded(),
            result.failed()
        );
        Ok(result)
    }

    fn process_one(
        &self,
        pipeline: &VideoPipeline<'_>,
        video: &Path,
        batch_folder: &Path,
        detector: &mut dyn DetectorBackend,
        progress: &mut dyn ProgressSink,
    ) -> Result<VideoOutcome> {
        let mut source = self.opener.open(video)?;
        pipeline.run(video, source.as_mut(), detector, batch_folder, progress)
    }
}

/// Output names claimed by more than one video, in first-seen order.
pub fn shared_video_names(videos: &[PathBuf]) -> Vec<(String, Vec<PathBuf>)> {
    let mut order = Vec::new();
    let mut by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for video in videos {
        let name = video_name(video);
        let entry = by_name.entry(name.clone()).or_default();
        if entry.is_empty() {
            order.push(name);
        }
        entry.push(video.clone());
    }
    order
        .into_iter()
        .filter_map(|name| {
            let paths = by_name.remove(&name)?;
            (paths.len() > 1).then_some((name, paths))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn folder_name_uses_timestamp() {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(batch_folder_name(&ts), "batch_20240309_070501");
    }

    #[test]
    fn same_stem_videos_share_a_name() {
        let videos = vec![
            PathBuf::from("/a/clip.mp4"),
            PathBuf::from("/a/other.mp4"),
            PathBuf::from("/b/clip.avi"),
        ];
        assert_eq!(
            shared_video_names(&videos),
            vec![(
                "clip".to_string(),
                vec![PathBuf::from("/a/clip.mp4"), PathBuf::from("/b/clip.avi")]
            )]
        );
        assert!(shared_video_names(&videos[..2]).is_empty());
    }
}
