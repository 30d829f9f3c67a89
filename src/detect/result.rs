use serde::{Deserialize, Serialize};

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Did we detect motion/presence?
    pub motion_detected: bool,
    /// Bounding boxes (normalized 0..1 coordinates).
    pub detections: Vec<Detection>,
    /// Confidence of primary detection.
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        !self.motion_detected && self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_classes() {
        let result = DetectionResult {
            motion_detected: true,
            detections: vec![Detection {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
                confidence: 0.5,
                class: ObjectClass::Vehicle,
            }],
            confidence: 0.5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["detections"][0]["class"], "vehicle");
        assert_eq!(json["motion_detected"], true);
        assert!(DetectionResult::default().is_empty());
    }
}
