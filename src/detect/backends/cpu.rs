use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionBox, DetectionResult, FaceDetection};
use crate::detect::DetectorSettings;
use crate::frame::Frame;

/// Padding around each pupil blob, in pixels.
const EYE_PADDING: i32 = 6;
/// Eyes are only searched in this top fraction of the frame (per mille).
const EYE_REGION_PER_MILLE: u32 = 700;
const MAX_EYES: usize = 2;

/// CPU backend that looks for pupil-like dark blobs.
///
/// The frame is reduced to luma and thresholded; 4-connected dark regions
/// whose area is plausible for a pupil are kept as eyes, and the face is the
/// padded union of those eyes. Crude, but needs no model file.
#[derive(Clone, Debug)]
pub struct CpuBackend {
    dark_threshold: u8,
    min_area: u32,
    max_area: u32,
}

#[derive(Clone, Copy, Debug)]
struct Blob {
    area: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::from_settings(&DetectorSettings::default())
    }

    pub fn from_settings(settings: &DetectorSettings) -> Self {
        Self {
            dark_threshold: settings.dark_threshold,
            min_area: settings.pupil_min_area,
            max_area: settings.pupil_max_area,
        }
    }

    fn find_blobs(&self, luma: &[u8], width: u32, height: u32) -> Vec<Blob> {
        let search_rows = (height * EYE_REGION_PER_MILLE / 1000).max(1);
        let w = width as usize;
        let mut visited = vec![false; luma.len()];
        let mut blobs = Vec::new();
        let mut stack = Vec::new();

        for start in 0..(search_rows as usize * w) {
            if visited[start] || luma[start] >= self.dark_threshold {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let mut blob = Blob {
                area: 0,
                min_x: u32::MAX,
                min_y: u32::MAX,
                max_x: 0,
                max_y: 0,
            };
            while let Some(idx) = stack.pop() {
                let x = (idx % w) as u32;
                let y = (idx / w) as u32;
                blob.area += 1;
                blob.min_x = blob.min_x.min(x);
                blob.min_y = blob.min_y.min(y);
                blob.max_x = blob.max_x.max(x);
                blob.max_y = blob.max_y.max(y);

                let mut visit = |n: usize| {
                    if !visited[n] && luma[n] < self.dark_threshold {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < height {
                    visit(idx + w);
                }
            }

            if blob.area >= self.min_area
                && blob.area <= self.max_area
                && blob.max_y < search_rows
            {
                blobs.push(blob);
            }
        }
        blobs
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let (width, height) = (frame.width(), frame.height());
        let luma = frame.luma();
        let mut blobs = self.find_blobs(&luma, width, height);
        if blobs.len() < MAX_EYES {
            return Ok(DetectionResult::empty());
        }

        blobs.sort_by(|a, b| b.area.cmp(&a.area));
        blobs.truncate(MAX_EYES);

        let eyes: Vec<DetectionBox> = blobs
            .iter()
            .map(|b| {
                let x = (b.min_x as i32 - EYE_PADDING).max(0);
                let y = (b.min_y as i32 - EYE_PADDING).max(0);
                let right = (b.max_x as i32 + 1 + EYE_PADDING).min(width as i32);
                let bottom = (b.max_y as i32 + 1 + EYE_PADDING).min(height as i32);
                DetectionBox::new(x, y, right - x, bottom - y)
            })
            .collect();

        let left = eyes.iter().map(|e| e.x).min().unwrap_or(0);
        let top = eyes.iter().map(|e| e.y).min().unwrap_or(0);
        let right = eyes.iter().map(|e| e.x + e.w).max().unwrap_or(0);
        let bottom = eyes.iter().map(|e| e.y + e.h).max().unwrap_or(0);
        let pad_x = (right - left) / 4;
        let pad_y = (bottom - top) * 2;
        let face_x = (left - pad_x).max(0);
        let face_y = (top - pad_y).max(0);
        let face = DetectionBox::new(
            face_x,
            face_y,
            (right + pad_x).min(width as i32) - face_x,
            (bottom + pad_y).min(height as i32) - face_y,
        );

        let eyes = eyes
            .into_iter()
            .map(|e| DetectionBox::new(e.x - face.x, e.y - face.y, e.w, e.h))
            .collect();
        Ok(DetectionResult::from(vec![FaceDetection { face, eyes }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_squares(squares: &[(u32, u32, u32)]) -> Frame {
        let mut image = RgbImage::from_pixel(200, 100, Rgb([200, 200, 200]));
        for &(x0, y0, side) in squares {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    image.put_pixel(x, y, Rgb([10, 10, 10]));
                }
            }
        }
        Frame::from_image(image, 1)
    }

    #[test]
    fn finds_two_dark_pupils() {
        let frame = frame_with_squares(&[(40, 30, 10), (140, 30, 10)]);
        let result = CpuBackend::new().detect(&frame).unwrap();
        assert_eq!(result.faces.len(), 1);

        let face = &result.faces[0];
        assert_eq!(face.eyes.len(), 2);
        let mut centers: Vec<(i32, i32)> = face
            .eyes
            .iter()
            .map(|e| {
                let abs = face.absolute_eye(e);
                (abs.x + abs.w / 2, abs.y + abs.h / 2)
            })
            .collect();
        centers.sort();
        assert_eq!(centers, vec![(45, 35), (145, 35)]);
    }

    #[test]
    fn ignores_blobs_outside_area_range_and_lower_frame() {
        // 3x3 is too small; the second pupil sits below the eye region.
        let frame = frame_with_squares(&[(40, 30, 3), (140, 80, 10), (90, 30, 10)]);
        let result = CpuBackend::new().detect(&frame).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn blank_frame_has_no_detections() {
        let frame = frame_with_squares(&[]);
        assert!(CpuBackend::new().detect(&frame).unwrap().is_empty());
    }
}
