#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionBox, DetectionResult, FaceDetection};
use crate::detect::DetectorSettings;
use crate::frame::Frame;

const DEFAULT_INPUT_SIZE: u32 = 320;
const CLASS_FACE: i64 = 0;
const CLASS_EYE: i64 = 1;

/// Tract-based backend for ONNX face/eye detectors.
///
/// The model receives the frame resized to its square input as a 1x3xHxW f32
/// tensor in 0..1 and must produce rows of `[x, y, w, h, score, class]` in
/// normalized coordinates. Class 0 is a face, class 1 an eye. Eyes are
/// attached to the first face that contains their center.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.5,
        })
    }

    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let model_path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("the tract backend requires detector.model_path"))?;
        Ok(Self::new(model_path, DEFAULT_INPUT_SIZE)?
            .with_threshold(settings.confidence_threshold))
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let values: Vec<f32> = rows.iter().copied().collect();

        let scale = |v: f32, extent: u32| (v * extent as f32) as i32;
        let mut faces: Vec<FaceDetection> = Vec::new();
        let mut eyes: Vec<DetectionBox> = Vec::new();
        for row in values.chunks_exact(6) {
            if row[4] < self.confidence_threshold {
                continue;
            }
            let rect = DetectionBox::new(
                scale(row[0], width),
                scale(row[1], height),
                scale(row[2], width),
                scale(row[3], height),
            );
            match row[5].round() as i64 {
                CLASS_FACE => faces.push(FaceDetection {
                    face: rect,
                    eyes: Vec::new(),
                }),
                CLASS_EYE => eyes.push(rect),
                _ => {}
            }
        }

        for eye in eyes {
            let (cx, cy) = (eye.x + eye.w / 2, eye.y + eye.h / 2);
            if let Some(face) = faces.iter_mut().find(|f| f.face.contains(cx, cy)) {
                let relative =
                    DetectionBox::new(eye.x - face.face.x, eye.y - face.face.y, eye.w, eye.h);
                face.eyes.push(relative);
            }
        }
        Ok(DetectionResult::from(faces))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame.width(), frame.height())
    }
}
