use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::attention::AttentionSettings;
use crate::detect::{BackendRegistry, DetectorSettings};
use crate::error::CorError;
use crate::heatmap::{HeatmapMode, HeatmapSettings};
use crate::output::{ColorScheme, ImageFormat};
use crate::paths::PathConfig;
use crate::record::DEFAULT_RECORD_FILE;

const DEFAULT_REFERENCE_WIDTH: u32 = 1920;
const DEFAULT_REFERENCE_HEIGHT: u32 = 1080;
const DEFAULT_OVERLAY_FRAME_INDEX: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct CorConfigFile {
    detector: Option<DetectorSettings>,
    heatmap: Option<HeatmapSettings>,
    analysis: Option<AnalysisConfigFile>,
    attention: Option<AttentionSettings>,
    paths: Option<PathConfig>,
    record: Option<RecordConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    reference_width: Option<u32>,
    reference_height: Option<u32>,
    overlay_frame_index: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordConfigFile {
    file_name: Option<String>,
}

/// Runtime configuration: TOML file, then the paths file, then environment.
#[derive(Debug, Clone, PartialEq)]
pub struct CorConfig {
    pub detector: DetectorSettings,
    pub heatmap: HeatmapSettings,
    pub analysis: AnalysisSettings,
    pub attention: AttentionSettings,
    pub paths: PathConfig,
    pub record_file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSettings {
    /// Frame size that positional percentages are expressed against.
    pub reference_width: u32,
    pub reference_height: u32,
    /// 1-based read index of the frame used under the overlay heatmap.
    pub overlay_frame_index: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            reference_width: DEFAULT_REFERENCE_WIDTH,
            reference_height: DEFAULT_REFERENCE_HEIGHT,
            overlay_frame_index: DEFAULT_OVERLAY_FRAME_INDEX,
        }
    }
}

impl Default for CorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            heatmap: HeatmapSettings::default(),
            analysis: AnalysisSettings::default(),
            attention: AttentionSettings::default(),
            paths: PathConfig::default(),
            record_file_name: DEFAULT_RECORD_FILE.to_string(),
        }
    }
}

impl CorConfig {
    /// Load from `COR_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_layered(None, None)
    }

    /// Load with explicit file locations. `config_path` falls back to
    /// `COR_CONFIG`; `paths_file` is layered over the `[paths]` table.
    pub fn load_layered(config_path: Option<&Path>, paths_file: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("COR_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        if let Some(paths_file) = paths_file {
            cfg.paths.overlay(PathConfig::load(paths_file)?);
        }
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CorConfigFile) -> Self {
        let analysis = file.analysis.unwrap_or_default();
        Self {
            detector: file.detector.unwrap_or_default(),
            heatmap: file.heatmap.unwrap_or_default(),
            analysis: AnalysisSettings {
                reference_width: analysis.reference_width.unwrap_or(DEFAULT_REFERENCE_WIDTH),
                reference_height: analysis
                    .reference_height
                    .unwrap_or(DEFAULT_REFERENCE_HEIGHT),
                overlay_frame_index: analysis
                    .overlay_frame_index
                    .unwrap_or(DEFAULT_OVERLAY_FRAME_INDEX),
            },
            attention: file.attention.unwrap_or_default(),
            paths: file.paths.unwrap_or_default(),
            record_file_name: file
                .record
                .and_then(|record| record.file_name)
                .unwrap_or_else(|| DEFAULT_RECORD_FILE.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("COR_DETECTOR") {
            if !name.trim().is_empty() {
                self.detector.name = name.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("COR_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("COR_INPUT_PATH") {
            if !path.trim().is_empty() {
                self.paths.input_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("COR_OUTPUT_PATH") {
            if !path.trim().is_empty() {
                self.paths.output_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(paths) = std::env::var("COR_SEARCH_PATHS") {
            let parsed = split_csv(&paths);
            if !parsed.is_empty() {
                self.paths.search_paths = parsed.into_iter().map(PathBuf::from).collect();
            }
        }
        if let Ok(format) = std::env::var("COR_IMAGE_FORMAT") {
            if !format.trim().is_empty() {
                self.heatmap.image_format = format.trim().to_lowercase();
            }
        }
        if let Ok(sigma) = std::env::var("COR_HEATMAP_SIGMA") {
            self.heatmap.sigma = sigma
                .trim()
                .parse()
                .map_err(|_| anyhow!("COR_HEATMAP_SIGMA must be a number of pixels"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { CorError::InvalidConfig(msg).into() };

        if !(self.heatmap.sigma.is_finite() && self.heatmap.sigma > 0.0) {
            return Err(invalid(format!(
                "heatmap.sigma must be greater than zero (got {})",
                self.heatmap.sigma
            )));
        }
        if let Some(cutoff) = self.heatmap.cutoff_sigmas {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(invalid(format!(
                    "heatmap.cutoff_sigmas must be greater than zero (got {})",
                    cutoff
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.heatmap.overlay_alpha) {
            return Err(invalid(format!(
                "heatmap.overlay_alpha must be within [0, 1] (got {})",
                self.heatmap.overlay_alpha
            )));
        }
        self.image_format().map_err(|e| invalid(e.to_string()))?;
        self.color_scheme().map_err(|e| invalid(e.to_string()))?;
        self.heatmap_mode().map_err(|e| invalid(e.to_string()))?;

        if self.analysis.reference_width == 0 || self.analysis.reference_height == 0 {
            return Err(invalid(
                "analysis reference dimensions must be greater than zero".to_string(),
            ));
        }
        if self.analysis.overlay_frame_index == 0 {
            return Err(invalid(
                "analysis.overlay_frame_index is 1-based and must be at least 1".to_string(),
            ));
        }
        let attention = &self.attention;
        for (name, value) in [
            ("attention.fixation_radius", attention.fixation_radius),
            ("attention.min_fixation_ms", attention.min_fixation_ms),
            ("attention.saccade_velocity", attention.saccade_velocity),
            ("attention.saccade_acceleration", attention.saccade_acceleration),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!(
                    "{} must be greater than zero (got {})",
                    name, value
                )));
            }
        }
        if self.detector.pupil_min_area > self.detector.pupil_max_area {
            return Err(invalid(
                "detector.pupil_min_area must not exceed detector.pupil_max_area".to_string(),
            ));
        }

        let registry = BackendRegistry::with_builtin();
        if !registry.contains(&self.detector.name) {
            return Err(invalid(format!(
                "unknown detector '{}' (available: {})",
                self.detector.name,
                registry.list().join(", ")
            )));
        }
        if self.record_file_name.trim().is_empty() {
            return Err(invalid("record.file_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn image_format(&self) -> Result<ImageFormat> {
        self.heatmap.image_format.parse()
    }

    pub fn color_scheme(&self) -> Result<ColorScheme> {
        self.heatmap.color_scheme.parse()
    }

    pub fn heatmap_mode(&self) -> Result<HeatmapMode> {
        self.heatmap.mode.parse()
    }
}

fn read_config_file(path: &Path) -> Result<CorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = CorConfig::from_file(CorConfigFile::default());
        assert_eq!(cfg, CorConfig::default());
        assert_eq!(cfg.heatmap.sigma, 25.0);
        assert_eq!(cfg.analysis.overlay_frame_index, 10);
        assert_eq!(cfg.record_file_name, "gaze_confidence.csv");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let file: CorConfigFile = toml::from_str(
            r#"
            [heatmap]
            color_scheme = "jet"

            [analysis]
            reference_width = 1280
            "#,
        )
        .unwrap();
        let cfg = CorConfig::from_file(file);
        assert_eq!(cfg.heatmap.color_scheme, "jet");
        assert_eq!(cfg.heatmap.sigma, 25.0);
        assert_eq!(cfg.analysis.reference_width, 1280);
        assert_eq!(cfg.analysis.reference_height, 1080);
    }

    #[test]
    fn attention_section_and_heatmap_mode() {
        let file: CorConfigFile = toml::from_str(
            r#"
            [heatmap]
            mode = "fixation"

            [attention]
            fixation_radius = 0.05
            "#,
        )
        .unwrap();
        let cfg = CorConfig::from_file(file);
        assert_eq!(cfg.heatmap_mode().unwrap(), HeatmapMode::Fixation);
        assert_eq!(cfg.attention.fixation_radius, 0.05);
        assert_eq!(cfg.attention.min_fixation_ms, 100.0);
        assert_eq!(CorConfig::default().heatmap_mode().unwrap(), HeatmapMode::Density);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = CorConfig::default();
        cfg.heatmap.overlay_alpha = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = CorConfig::default();
        cfg.heatmap.image_format = "gif".into();
        assert!(cfg.validate().is_err());

        let mut cfg = CorConfig::default();
        cfg.detector.name = "haar".into();
        assert!(cfg.validate().is_err());

        let mut cfg = CorConfig::default();
        cfg.analysis.reference_height = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CorConfig::default();
        cfg.heatmap.mode = "gaussian".into();
        assert!(cfg.validate().is_err());

        let mut cfg = CorConfig::default();
        cfg.attention.min_fixation_ms = 0.0;
        assert!(cfg.validate().is_err());

        assert!(CorConfig::default().validate().is_ok());
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }
}
