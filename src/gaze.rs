//! Gaze estimation from eye detections.
//!
//! A frame yields at most one gaze point: the first face (in detector order)
//! with at least two eyes is used, its eyes are ordered left to right, and the
//! gaze point is the midpoint of the first two eye centers pushed along the
//! perpendicular of the inter-eye vector.

use serde::Serialize;

use crate::detect::{DetectionResult, FaceDetection};

/// Perpendicular offset applied to the eye midpoint.
pub const PROJECTION_FACTOR: f64 = 0.3;

/// Integer pixel position inside the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GazePoint {
    pub x: i32,
    pub y: i32,
}

impl GazePoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A gaze point and the eye centers it was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GazeSample {
    pub point: GazePoint,
    pub left_eye: GazePoint,
    pub right_eye: GazePoint,
}

/// Unclamped gaze projection for two absolute eye centers.
pub fn project_gaze(left: GazePoint, right: GazePoint) -> (f64, f64) {
    let (x1, y1) = (f64::from(left.x), f64::from(left.y));
    let (x2, y2) = (f64::from(right.x), f64::from(right.y));
    let vx = x2 - x1;
    let vy = y2 - y1;
    (
        (x1 + x2) / 2.0 + PROJECTION_FACTOR * vy,
        (y1 + y2) / 2.0 - PROJECTION_FACTOR * vx,
    )
}

/// Maps per-frame detections to gaze points for one frame size.
#[derive(Clone, Copy, Debug)]
pub struct GazeEstimator {
    width: u32,
    height: u32,
}

impl GazeEstimator {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn estimate(&self, detections: &DetectionResult) -> Option<GazeSample> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let face = detections.faces.iter().find(|f| f.eyes.len() >= 2)?;
        let (left_eye, right_eye) = eye_centers(face);
        let (gx, gy) = project_gaze(left_eye, right_eye);
        let point = GazePoint::new(
            (gx as i32).clamp(0, self.width as i32 - 1),
            (gy as i32).clamp(0, self.height as i32 - 1),
        );
        Some(GazeSample {
            point,
            left_eye,
            right_eye,
        })
    }
}

fn eye_centers(face: &FaceDetection) -> (GazePoint, GazePoint) {
    let mut eyes: Vec<_> = face.eyes.iter().map(|e| face.absolute_eye(e)).collect();
    eyes.sort_by_key(|e| e.x);
    let center = |i: usize| GazePoint::new(eyes[i].x + eyes[i].w / 2, eyes[i].y + eyes[i].h / 2);
    (center(0), center(1))
}
