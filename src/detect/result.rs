use serde::Deserialize;

/// Integer rectangle. Face boxes are frame-absolute; eye boxes are relative
/// to their parent face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "[i32; 4]")]
pub struct DetectionBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl DetectionBox {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }
}

impl From<[i32; 4]> for DetectionBox {
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

/// One face and the eyes found inside it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FaceDetection {
    pub face: DetectionBox,
    #[serde(default)]
    pub eyes: Vec<DetectionBox>,
}

impl FaceDetection {
    /// Translate an eye box into frame-absolute coordinates.
    pub fn absolute_eye(&self, eye: &DetectionBox) -> DetectionBox {
        DetectionBox::new(self.face.x + eye.x, self.face.y + eye.y, eye.w, eye.h)
    }
}

/// Result of running detection on a frame.
///
/// Faces keep the order the backend reported them in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub faces: Vec<FaceDetection>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

impl From<Vec<FaceDetection>> for DetectionResult {
    fn from(faces: Vec<FaceDetection>) -> Self {
        Self { faces }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_deserialize_from_arrays() {
        let face: FaceDetection =
            serde_json::from_str(r#"{"face":[10,20,100,80],"eyes":[[5,6,7,8]]}"#).unwrap();
        assert_eq!(face.face, DetectionBox::new(10, 20, 100, 80));
        assert_eq!(face.absolute_eye(&face.eyes[0]), DetectionBox::new(15, 26, 7, 8));
    }

    #[test]
    fn eyes_default_to_empty() {
        let face: FaceDetection = serde_json::from_str(r#"{"face":[0,0,1,1]}"#).unwrap();
        assert!(face.eyes.is_empty());
    }
}
