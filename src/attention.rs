//! Attention analysis over the timed gaze track.
//!
//! Each gaze point is placed in time by its 1-based frame index and the
//! source frame rate, and in space as a fraction of the frame size, so the
//! thresholds below do not depend on the video resolution.
//!
//! A fixation is a run of consecutive points that stay within
//! `fixation_radius` of the run's first point for at least
//! `min_fixation_ms`. A point is part of a saccade when the gaze speed into
//! or out of it, or the change between the two, exceeds the saccade limits.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::CorError;
use crate::gaze::GazePoint;
use crate::heatmap::HeatmapGrid;

const FALLBACK_FPS: f64 = 30.0;
const MIN_FIXATION_RADIUS_PX: f64 = 5.0;
const MAX_FIXATION_RADIUS_PX: f64 = 50.0;
/// Half-width of a drawn saccade path; paths are three pixels wide.
const SACCADE_HALF_WIDTH: i64 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionSettings {
    /// Largest distance from a fixation's first point, as a fraction of the
    /// frame size.
    pub fixation_radius: f64,
    /// Shortest dwell reported as a fixation.
    pub min_fixation_ms: f64,
    /// Gaze speed, in frame sizes per second, above which a point counts as
    /// part of a saccade.
    pub saccade_velocity: f64,
    /// Change of gaze speed, in frame sizes per second squared.
    pub saccade_acceleration: f64,
}

impl Default for AttentionSettings {
    fn default() -> Self {
        Self {
            fixation_radius: 0.025,
            min_fixation_ms: 100.0,
            saccade_velocity: 1.0,
            saccade_acceleration: 30.0,
        }
    }
}

/// A gaze point in frame-relative coordinates with its timestamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedGaze {
    pub x: f64,
    pub y: f64,
    pub time_secs: f64,
}

/// Pair each gaze point with the frame it came from.
///
/// `frame_indices` are 1-based read indices; a non-positive `fps` falls back
/// to 30. An unknown frame size yields an empty track.
pub fn timed_track(
    points: &[GazePoint],
    frame_indices: &[u64],
    width: u32,
    height: u32,
    fps: f64,
) -> Vec<TimedGaze> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let fps = if fps > 0.0 { fps } else { FALLBACK_FPS };
    points
        .iter()
        .zip(frame_indices)
        .map(|(point, &frame)| TimedGaze {
            x: f64::from(point.x) / f64::from(width),
            y: f64::from(point.y) / f64::from(height),
            time_secs: frame.saturating_sub(1) as f64 / fps,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Fixation {
    /// Centroid, as a fraction of the frame width.
    pub x: f64,
    /// Centroid, as a fraction of the frame height.
    pub y: f64,
    pub duration_ms: f64,
    /// Dwell time discounted by how far the points strayed from the centroid.
    pub intensity: f64,
    pub visit_count: usize,
}

/// Summary written to `{video}_analysis.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AttentionAnalysis {
    pub total_duration_ms: f64,
    pub average_fixation_duration_ms: f64,
    pub saccade_count: usize,
    pub fixation_count: usize,
    pub fixations: Vec<Fixation>,
    /// Track indices of saccade points.
    #[serde(skip)]
    pub saccades: Vec<usize>,
}

impl AttentionAnalysis {
    /// Write the analysis as pretty JSON next to the heatmaps.
    pub fn write_json(&self, folder: &Path, video_name: &str) -> Result<PathBuf> {
        let path = analysis_path(folder, video_name);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CorError::output_write(&path, e))?;
        fs::write(&path, json).map_err(|e| CorError::output_write(&path, e))?;
        log::info!("wrote attention analysis {}", path.display());
        Ok(path)
    }
}

pub fn analysis_path(folder: &Path, video_name: &str) -> PathBuf {
    folder.join(format!("{}_analysis.json", video_name))
}

#[derive(Clone, Debug, Default)]
pub struct AttentionAnalyzer {
    settings: AttentionSettings,
}

impl AttentionAnalyzer {
    pub fn new(settings: AttentionSettings) -> Self {
        Self { settings }
    }

    pub fn analyze(&self, track: &[TimedGaze]) -> AttentionAnalysis {
        let fixations = self.detect_fixations(track);
        let saccades = self.detect_saccades(track);
        let average_fixation_duration_ms = if fixations.is_empty() {
            0.0
        } else {
            fixations.iter().map(|f| f.duration_ms).sum::<f64>() / fixations.len() as f64
        };
        let total_duration_ms = match (track.first(), track.last()) {
            (Some(first), Some(last)) if track.len() > 1 => {
                (last.time_secs - first.time_secs) * 1000.0
            }
            _ => 0.0,
        };
        AttentionAnalysis {
            total_duration_ms,
            average_fixation_duration_ms,
            saccade_count: saccades.len(),
            fixation_count: fixations.len(),
            fixations,
            saccades,
        }
    }

    pub fn detect_fixations(&self, track: &[TimedGaze]) -> Vec<Fixation> {
        let mut fixations = Vec::new();
        let mut start = 0;
        while start < track.len() {
            let anchor = track[start];
            let mut end = start;
            let (mut sum_x, mut sum_y) = (anchor.x, anchor.y);
            while end + 1 < track.len()
                && distance(&anchor, &track[end + 1]) <= self.settings.fixation_radius
            {
                end += 1;
                sum_x += track[end].x;
                sum_y += track[end].y;
            }

            if end > start {
                let run = &track[start..=end];
                let count = run.len() as f64;
                let (cx, cy) = (sum_x / count, sum_y / count);
                let duration_ms = (track[end].time_secs - anchor.time_secs) * 1000.0;
                if duration_ms >= self.settings.min_fixation_ms {
                    let spread = run
                        .iter()
                        .map(|g| (g.x - cx).hypot(g.y - cy))
                        .sum::<f64>()
                        / count;
                    fixations.push(Fixation {
                        x: cx,
                        y: cy,
                        duration_ms,
                        intensity: duration_ms / (1.0 + spread * 1000.0),
                        visit_count: run.len(),
                    });
                }
            }
            start = end + 1;
        }
        fixations
    }

    /// Track indices of points inside a saccade. Endpoints never qualify.
    pub fn detect_saccades(&self, track: &[TimedGaze]) -> Vec<usize> {
        if track.len() < 3 {
            return Vec::new();
        }
        (1..track.len() - 1)
            .filter(|&i| {
                let (prev, cur, next) = (&track[i - 1], &track[i], &track[i + 1]);
                let dt_in = cur.time_secs - prev.time_secs;
                let dt_out = next.time_secs - cur.time_secs;
                if dt_in <= 0.0 || dt_out <= 0.0 {
                    return false;
                }
                let v_in = distance(prev, cur) / dt_in;
                let v_out = distance(cur, next) / dt_out;
                let acceleration = (v_out - v_in).abs() / ((dt_in + dt_out) / 2.0);
                v_in > self.settings.saccade_velocity
                    || v_out > self.settings.saccade_velocity
                    || acceleration > self.settings.saccade_acceleration
            })
            .collect()
    }
}

fn distance(a: &TimedGaze, b: &TimedGaze) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

fn to_pixel(gaze: &TimedGaze, width: u32, height: u32) -> (i64, i64) {
    (
        (gaze.x * f64::from(width)) as i64,
        (gaze.y * f64::from(height)) as i64,
    )
}

/// Cones around each fixation: radius grows with dwell time (5 to 50 px),
/// height with intensity.
pub fn fixation_heatmap(fixations: &[Fixation], width: u32, height: u32) -> HeatmapGrid {
    let mut cells = vec![0.0; width as usize * height as usize];
    for fixation in fixations {
        let (cx, cy) = (
            (fixation.x * f64::from(width)) as i64,
            (fixation.y * f64::from(height)) as i64,
        );
        let radius =
            (fixation.duration_ms / 10.0).clamp(MIN_FIXATION_RADIUS_PX, MAX_FIXATION_RADIUS_PX);
        let reach = radius.ceil() as i64;
        for y in (cy - reach).max(0)..=(cy + reach).min(i64::from(height) - 1) {
            for x in (cx - reach).max(0)..=(cx + reach).min(i64::from(width) - 1) {
                let d = ((x - cx) as f64).hypot((y - cy) as f64);
                if d <= radius {
                    cells[y as usize * width as usize + x as usize] +=
                        (1.0 - d / radius) * fixation.intensity / 1000.0;
                }
            }
        }
    }
    HeatmapGrid::from_raw(width, height, cells)
}

/// Paths from the point before each saccade point to the point after it.
pub fn saccade_heatmap(
    track: &[TimedGaze],
    saccades: &[usize],
    width: u32,
    height: u32,
) -> HeatmapGrid {
    let mut cells = vec![0.0; width as usize * height as usize];
    for &i in saccades {
        if i == 0 || i + 1 >= track.len() {
            continue;
        }
        let from = to_pixel(&track[i - 1], width, height);
        let to = to_pixel(&track[i + 1], width, height);
        stamp_line(&mut cells, width, height, from, to);
    }
    HeatmapGrid::from_raw(width, height, cells)
}

fn stamp_line(cells: &mut [f64], width: u32, height: u32, from: (i64, i64), to: (i64, i64)) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        for oy in -SACCADE_HALF_WIDTH..=SACCADE_HALF_WIDTH {
            for ox in -SACCADE_HALF_WIDTH..=SACCADE_HALF_WIDTH {
                let (px, py) = (x + ox, y + oy);
                if px >= 0 && py >= 0 && px < i64::from(width) && py < i64::from(height) {
                    cells[py as usize * width as usize + px as usize] = 1.0;
                }
            }
        }
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
