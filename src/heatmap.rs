//! Gaze density accumulation.
//!
//! Every gaze point adds an isotropic Gaussian kernel `exp(-d^2 / 2σ^2)` to a
//! frame-sized grid. Once the video is done the grid is normalized by its
//! maximum so values lie in `[0, 1]`; an all-zero grid stays all zero.
//!
//! The fixation and saccade modes build their grids from an attention
//! analysis instead (see [`crate::attention`]).

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::gaze::GazePoint;

/// Heatmap rendering and accumulation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapSettings {
    /// Kernel spread in pixels.
    pub sigma: f64,
    /// Limit each kernel to `cutoff_sigmas * sigma` around its center.
    /// `None` evaluates the kernel over the whole frame.
    pub cutoff_sigmas: Option<f64>,
    pub color_scheme: String,
    pub overlay_alpha: f32,
    pub image_format: String,
    /// `density`, `fixation` or `saccade`.
    pub mode: String,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            sigma: 25.0,
            cutoff_sigmas: None,
            color_scheme: "hot".to_string(),
            overlay_alpha: 0.6,
            image_format: "jpg".to_string(),
            mode: "density".to_string(),
        }
    }
}

/// What the heatmap images show.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeatmapMode {
    /// Gaussian density of every gaze point.
    #[default]
    Density,
    /// Cones around fixations, sized by dwell time.
    Fixation,
    /// Saccade paths.
    Saccade,
}

impl HeatmapMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Density => "density",
            Self::Fixation => "fixation",
            Self::Saccade => "saccade",
        }
    }
}

impl fmt::Display for HeatmapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeatmapMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "density" => Ok(Self::Density),
            "fixation" => Ok(Self::Fixation),
            "saccade" => Ok(Self::Saccade),
            other => Err(anyhow!("unknown heatmap mode '{}'", other)),
        }
    }
}

/// Normalized gaze density, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct HeatmapGrid {
    width: u32,
    height: u32,
    cells: Vec<f64>,
}

impl HeatmapGrid {
    /// Build a grid from raw row-major intensities, scaled into `[0, 1]` by
    /// the maximum.
    pub(crate) fn from_raw(width: u32, height: u32, mut cells: Vec<f64>) -> Self {
        debug_assert_eq!(cells.len(), width as usize * height as usize);
        let max = cells.iter().copied().fold(0.0, f64::max);
        if max > 0.0 {
            for value in &mut cells {
                *value /= max;
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f64 {
        self.cells[(y as usize) * (self.width as usize) + x as usize]
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn max_value(&self) -> f64 {
        self.cells.iter().copied().fold(0.0, f64::max)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|v| *v == 0.0)
    }
}

/// Accumulates Gaussian kernels for one video.
pub struct HeatmapAccumulator {
    width: u32,
    height: u32,
    cells: Vec<f64>,
    two_sigma_sq: f64,
    radius: Option<f64>,
    points: usize,
}

impl HeatmapAccumulator {
    pub fn new(width: u32, height: u32, settings: &HeatmapSettings) -> Self {
        let sigma = settings.sigma;
        Self {
            width,
            height,
            cells: vec![0.0; width as usize * height as usize],
            two_sigma_sq: 2.0 * sigma * sigma,
            radius: settings.cutoff_sigmas.map(|k| k * sigma),
            points: 0,
        }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn add_point(&mut self, point: GazePoint) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        self.points += 1;
        let (px, py) = (f64::from(point.x), f64::from(point.y));
        let (x_range, y_range) = match self.radius {
            Some(r) => (
                window(px, r, self.width),
                window(py, r, self.height),
            ),
            None => ((0, self.width), (0, self.height)),
        };

        let w = self.width as usize;
        for y in y_range.0..y_range.1 {
            let dy = f64::from(y) - py;
            let row = &mut self.cells[y as usize * w..(y as usize + 1) * w];
            for x in x_range.0..x_range.1 {
                let dx = f64::from(x) - px;
                row[x as usize] += (-(dx * dx + dy * dy) / self.two_sigma_sq).exp();
            }
        }
    }

    pub fn add_points<'a>(&mut self, points: impl IntoIterator<Item = &'a GazePoint>) {
        for point in points {
            self.add_point(*point);
        }
    }

    /// Normalize by the maximum and hand out the grid.
    pub fn finish(self) -> HeatmapGrid {
        HeatmapGrid::from_raw(self.width, self.height, self.cells)
    }
}

fn window(center: f64, radius: f64, extent: u32) -> (u32, u32) {
    let lo = (center - radius).floor().max(0.0) as u32;
    let hi = ((center + radius).ceil() + 1.0).min(f64::from(extent)).max(0.0) as u32;
    (lo.min(extent), hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(sigma: f64) -> HeatmapSettings {
        HeatmapSettings {
            sigma,
            ..HeatmapSettings::default()
        }
    }

    #[test]
    fn empty_sequence_stays_zero() {
        let grid = HeatmapAccumulator::new(8, 6, &settings(2.0)).finish();
        assert!(grid.is_empty());
        assert_eq!(grid.cells().len(), 48);
    }

    #[test]
    fn single_point_peaks_at_one() {
        let mut acc = HeatmapAccumulator::new(20, 10, &settings(3.0));
        acc.add_point(GazePoint::new(5, 5));
        let grid = acc.finish();
        assert_eq!(grid.get(5, 5), 1.0);
        assert!(grid.get(6, 5) < 1.0);
        assert!(grid.cells().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn density_follows_point_count() {
        let mut acc = HeatmapAccumulator::new(40, 10, &settings(2.0));
        acc.add_points(&[
            GazePoint::new(5, 5),
            GazePoint::new(5, 5),
            GazePoint::new(30, 5),
        ]);
        assert_eq!(acc.points(), 3);
        let grid = acc.finish();
        assert!((grid.get(5, 5) - 1.0).abs() < 1e-12);
        assert!((grid.get(30, 5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cutoff_limits_kernel_extent() {
        let mut windowed = HeatmapAccumulator::new(
            50,
            1,
            &HeatmapSettings {
                sigma: 2.0,
                cutoff_sigmas: Some(3.0),
                ..HeatmapSettings::default()
            },
        );
        windowed.add_point(GazePoint::new(10, 0));
        let grid = windowed.finish();
        assert_eq!(grid.get(40, 0), 0.0);
        assert!(grid.get(14, 0) > 0.0);
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("Fixation".parse::<HeatmapMode>().unwrap(), HeatmapMode::Fixation);
        assert_eq!("saccade".parse::<HeatmapMode>().unwrap(), HeatmapMode::Saccade);
        assert_eq!(HeatmapMode::default().to_string(), "density");
        assert!("gaussian".parse::<HeatmapMode>().is_err());
    }
}
