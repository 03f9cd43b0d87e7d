//! Detection-rate based confidence assessment.
//!
//! The per-point confidence is not measured; it is looked up from a fixed
//! tier table keyed by the detection rate. Positional statistics describe
//! where the gaze points fell, relative to a fixed reference frame size.

use std::fmt;

use serde::Serialize;

use crate::gaze::GazePoint;

pub const NO_TRACKING: &str = "no reliable gaze tracking";

/// One row of the tier table. Bucket counts are `ratio * n` truncated in
/// floating point, so some products land one below the exact value
/// (`0.7 * 90` gives 62, not 63).
struct Tier {
    min_rate: f64,
    avg_confidence: f64,
    high_ratio: f64,
    medium_ratio: f64,
}

const TIERS: [Tier; 4] = [
    Tier {
        min_rate: 0.8,
        avg_confidence: 0.85,
        high_ratio: 0.70,
        medium_ratio: 0.25,
    },
    Tier {
        min_rate: 0.6,
        avg_confidence: 0.72,
        high_ratio: 0.50,
        medium_ratio: 0.40,
    },
    Tier {
        min_rate: 0.4,
        avg_confidence: 0.58,
        high_ratio: 0.30,
        medium_ratio: 0.50,
    },
    Tier {
        min_rate: f64::NEG_INFINITY,
        avg_confidence: 0.35,
        high_ratio: 0.10,
        medium_ratio: 0.30,
    },
];

fn tier_for(rate: f64) -> &'static Tier {
    TIERS
        .iter()
        .find(|t| rate >= t.min_rate)
        .unwrap_or(&TIERS[TIERS.len() - 1])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 85.0 {
            Self::Excellent
        } else if accuracy >= 70.0 {
            Self::Good
        } else if accuracy >= 55.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent - High reliability for research and analysis",
            Self::Good => "Good - Suitable for most applications",
            Self::Fair => "Fair - Consider recalibration for better accuracy",
            Self::Poor => "Poor - Recalibration strongly recommended",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FocusLevel {
    VeryFocused,
    ModeratelyFocused,
    Scattered,
    HighlyScattered,
}

impl FocusLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::VeryFocused
        } else if score >= 60.0 {
            Self::ModeratelyFocused
        } else if score >= 40.0 {
            Self::Scattered
        } else {
            Self::HighlyScattered
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::VeryFocused => "Very focused - gaze concentrated in a small area",
            Self::ModeratelyFocused => "Moderately focused - some gaze movement",
            Self::Scattered => "Scattered - gaze moves across the frame",
            Self::HighlyScattered => "Highly scattered - no dominant area of attention",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ViewingPattern {
    Center,
    Left,
    Right,
    Upper,
    Lower,
    Distributed,
}

impl ViewingPattern {
    /// Classify from frame-relative percentages.
    pub fn from_frame_pct(pct_x: f64, pct_y: f64) -> Self {
        let central = |v: f64| (40.0..=60.0).contains(&v);
        if central(pct_x) && central(pct_y) {
            Self::Center
        } else if pct_x < 30.0 {
            Self::Left
        } else if pct_x > 70.0 {
            Self::Right
        } else if pct_y < 30.0 {
            Self::Upper
        } else if pct_y > 70.0 {
            Self::Lower
        } else {
            Self::Distributed
        }
    }
}

impl fmt::Display for ViewingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Center => "center-focused viewing",
            Self::Left => "left-side focused viewing",
            Self::Right => "right-side focused viewing",
            Self::Upper => "upper-area focused viewing",
            Self::Lower => "lower-area focused viewing",
            Self::Distributed => "distributed viewing pattern",
        };
        f.write_str(label)
    }
}

/// Confidence summary for one video. Computed once, after the last frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfidenceReport {
    pub total_frames: u64,
    pub gaze_points: usize,
    pub detection_rate: f64,
    pub avg_confidence: f64,
    pub accuracy_confidence: f64,
    pub high_confidence_points: usize,
    pub medium_confidence_points: usize,
    pub low_confidence_points: usize,
    pub mean_x: f64,
    pub mean_y: f64,
    pub std_x: f64,
    pub std_y: f64,
    pub frame_pct_x: f64,
    pub frame_pct_y: f64,
    pub focus_score: f64,
    pub quality: Option<QualityLevel>,
    pub focus: Option<FocusLevel>,
    pub viewing_pattern: Option<ViewingPattern>,
}

impl ConfidenceReport {
    fn degenerate(total_frames: u64) -> Self {
        Self {
            total_frames,
            gaze_points: 0,
            detection_rate: 0.0,
            avg_confidence: 0.0,
            accuracy_confidence: 0.0,
            high_confidence_points: 0,
            medium_confidence_points: 0,
            low_confidence_points: 0,
            mean_x: 0.0,
            mean_y: 0.0,
            std_x: 0.0,
            std_y: 0.0,
            frame_pct_x: 0.0,
            frame_pct_y: 0.0,
            focus_score: 0.0,
            quality: None,
            focus: None,
            viewing_pattern: None,
        }
    }

    pub fn has_tracking(&self) -> bool {
        self.quality.is_some()
    }

    /// Overall verdict for humans.
    pub fn interpretation(&self) -> &'static str {
        self.quality.map_or(NO_TRACKING, QualityLevel::description)
    }

    fn share(&self, count: usize) -> f64 {
        if self.gaze_points == 0 {
            0.0
        } else {
            count as f64 / self.gaze_points as f64 * 100.0
        }
    }
}

impl fmt::Display for ConfidenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== GAZE DETECTION CONFIDENCE ASSESSMENT ===")?;
        if !self.has_tracking() {
            writeln!(f, "No valid gaze data detected")?;
            writeln!(f, "Confidence: 0.0% ({})", NO_TRACKING)?;
            return write!(f, "============================================");
        }
        writeln!(f, "Analysis results:")?;
        writeln!(f, "  Total frames processed: {}", self.total_frames)?;
        writeln!(f, "  Valid gaze points detected: {}", self.gaze_points)?;
        writeln!(f, "  Detection rate: {:.1}%", self.detection_rate * 100.0)?;
        writeln!(
            f,
            "  Average confidence per point: {:.1}%",
            self.avg_confidence * 100.0
        )?;
        writeln!(f, "Confidence distribution:")?;
        writeln!(
            f,
            "  High confidence: {} points ({:.1}%)",
            self.high_confidence_points,
            self.share(self.high_confidence_points)
        )?;
        writeln!(
            f,
            "  Medium confidence: {} points ({:.1}%)",
            self.medium_confidence_points,
            self.share(self.medium_confidence_points)
        )?;
        writeln!(
            f,
            "  Low confidence: {} points ({:.1}%)",
            self.low_confidence_points,
            self.share(self.low_confidence_points)
        )?;
        writeln!(
            f,
            "Overall accuracy confidence: {:.1}%",
            self.accuracy_confidence
        )?;
        writeln!(f, "  {}", self.interpretation())?;
        writeln!(f, "Gaze position:")?;
        writeln!(
            f,
            "  Average: ({:.1}, {:.1}) = ({:.1}%, {:.1}%) of frame",
            self.mean_x, self.mean_y, self.frame_pct_x, self.frame_pct_y
        )?;
        writeln!(f, "  Spread: x {:.1}, y {:.1}", self.std_x, self.std_y)?;
        if let Some(focus) = self.focus {
            writeln!(
                f,
                "  Focus score: {:.1} ({})",
                self.focus_score,
                focus.description()
            )?;
        }
        if let Some(pattern) = self.viewing_pattern {
            writeln!(f, "  Pattern: {}", pattern)?;
        }
        write!(f, "============================================")
    }
}

/// Builds [`ConfidenceReport`]s against a reference frame size.
#[derive(Clone, Copy, Debug)]
pub struct ConfidenceAnalyzer {
    reference_width: u32,
    reference_height: u32,
}

impl ConfidenceAnalyzer {
    pub fn new(reference_width: u32, reference_height: u32) -> Self {
        Self {
            reference_width,
            reference_height,
        }
    }

    pub fn analyze(&self, points: &[GazePoint], total_frames: u64) -> ConfidenceReport {
        if total_frames == 0 || points.is_empty() {
            return ConfidenceReport::degenerate(total_frames);
        }

        let n = points.len();
        let detection_rate = (n as f64 / total_frames as f64).min(1.0);
        let tier = tier_for(detection_rate);
        let high = (tier.high_ratio * n as f64) as usize;
        let medium = (tier.medium_ratio * n as f64) as usize;
        let low = n - high - medium;
        let accuracy_confidence =
            (tier.avg_confidence * 0.5 + detection_rate * 0.3 + tier.high_ratio * 0.2) * 100.0;

        let (mean_x, std_x) = mean_std(points.iter().map(|p| f64::from(p.x)));
        let (mean_y, std_y) = mean_std(points.iter().map(|p| f64::from(p.y)));
        let frame_pct_x = percent_of(mean_x, self.reference_width);
        let frame_pct_y = percent_of(mean_y, self.reference_height);
        let focus_score = 100.0 - ((std_x + std_y) / 20.0).min(100.0);

        ConfidenceReport {
            total_frames,
            gaze_points: n,
            detection_rate,
            avg_confidence: tier.avg_confidence,
            accuracy_confidence,
            high_confidence_points: high,
            medium_confidence_points: medium,
            low_confidence_points: low,
            mean_x,
            mean_y,
            std_x,
            std_y,
            frame_pct_x,
            frame_pct_y,
            focus_score,
            quality: Some(QualityLevel::from_accuracy(accuracy_confidence)),
            focus: Some(FocusLevel::from_score(focus_score)),
            viewing_pattern: Some(ViewingPattern::from_frame_pct(frame_pct_x, frame_pct_y)),
        }
    }
}

impl Default for ConfidenceAnalyzer {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// Mean and population standard deviation.
fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (sum, count) = values.clone().fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;
    (mean, var.sqrt())
}

fn percent_of(value: f64, extent: u32) -> f64 {
    if extent == 0 {
        0.0
    } else {
        value / f64::from(extent) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<GazePoint> {
        (0..n).map(|_| GazePoint::new(960, 540)).collect()
    }

    #[test]
    fn eighty_percent_detection_uses_top_tier() {
        let report = ConfidenceAnalyzer::default().analyze(&points(80), 100);
        assert!((report.detection_rate - 0.8).abs() < 1e-12);
        assert_eq!(report.avg_confidence, 0.85);
        // (0.85 * 0.5 + 0.80 * 0.3 + 0.70 * 0.2) * 100
        assert!((report.accuracy_confidence - 80.5).abs() < 1e-9);
        assert_eq!(
            (
                report.high_confidence_points,
                report.medium_confidence_points,
                report.low_confidence_points
            ),
            (56, 20, 4)
        );
        assert_eq!(report.quality, Some(QualityLevel::Good));
    }

    #[test]
    fn no_points_is_degenerate() {
        let report = ConfidenceAnalyzer::default().analyze(&[], 50);
        assert_eq!(report.detection_rate, 0.0);
        assert_eq!(report.accuracy_confidence, 0.0);
        assert_eq!(report.total_frames, 50);
        assert_eq!(report.interpretation(), NO_TRACKING);
        assert!(report.to_string().contains(NO_TRACKING));
    }

    #[test]
    fn zero_frames_is_degenerate() {
        let report = ConfidenceAnalyzer::default().analyze(&points(3), 0);
        assert!(!report.has_tracking());
        assert_eq!(report.high_confidence_points, 0);
    }

    #[test]
    fn tiers_are_strictly_ordered() {
        let analyzer = ConfidenceAnalyzer::default();
        let score = |hits: usize| analyzer.analyze(&points(hits), 100).accuracy_confidence;
        assert!(score(39) < score(40));
        assert!(score(59) < score(60));
        assert!(score(79) < score(80));
        assert!(score(80) <= score(95));
        assert!(score(40) <= score(59));
    }

    #[test]
    fn buckets_truncate_into_low() {
        let report = ConfidenceAnalyzer::default().analyze(&points(7), 10);
        // 0.7 rate: high 50%, medium 40%.
        assert_eq!(report.high_confidence_points, 3);
        assert_eq!(report.medium_confidence_points, 2);
        assert_eq!(report.low_confidence_points, 2);
    }

    #[test]
    fn bucket_products_truncate_in_floating_point() {
        let report = ConfidenceAnalyzer::default().analyze(&points(90), 100);
        // 0.7 * 90 evaluates just below 63.
        assert_eq!(report.high_confidence_points, 62);
        assert_eq!(report.medium_confidence_points, 22);
        assert_eq!(report.low_confidence_points, 6);

        let report = ConfidenceAnalyzer::default().analyze(&points(70), 80);
        assert_eq!(report.high_confidence_points, 49);
    }

    #[test]
    fn positional_stats_use_population_deviation() {
        let pts = [GazePoint::new(0, 100), GazePoint::new(200, 100)];
        let report = ConfidenceAnalyzer::new(400, 200).analyze(&pts, 2);
        assert_eq!(report.mean_x, 100.0);
        assert_eq!(report.std_x, 100.0);
        assert_eq!(report.std_y, 0.0);
        assert_eq!(report.frame_pct_x, 25.0);
        assert_eq!(report.frame_pct_y, 50.0);
        assert_eq!(report.focus_score, 95.0);
        assert_eq!(report.focus, Some(FocusLevel::VeryFocused));
        assert_eq!(report.viewing_pattern, Some(ViewingPattern::Left));
    }

    #[test]
    fn viewing_pattern_precedence() {
        assert_eq!(ViewingPattern::from_frame_pct(50.0, 50.0), ViewingPattern::Center);
        assert_eq!(ViewingPattern::from_frame_pct(80.0, 10.0), ViewingPattern::Right);
        assert_eq!(ViewingPattern::from_frame_pct(50.0, 10.0), ViewingPattern::Upper);
        assert_eq!(ViewingPattern::from_frame_pct(50.0, 90.0), ViewingPattern::Lower);
        assert_eq!(ViewingPattern::from_frame_pct(35.0, 50.0), ViewingPattern::Distributed);
    }
}
