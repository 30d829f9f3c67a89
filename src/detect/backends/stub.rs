use std::collections::HashMap;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{Detection, DetectionResult, ObjectClass};
use crate::frame::FrameView;
use crate::StreamId;

/// Stub backend for testing. Uses pixel hashing to detect motion.
///
/// A frame counts as motion when its hash differs from the previous frame of the
/// same stream. Motion is reported as one full-frame box.
pub struct StubBackend {
    last_hash: HashMap<StreamId, [u8; 32]>,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            last_hash: HashMap::new(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Motion)
    }

    fn detect(&mut self, view: &FrameView<'_>) -> Result<DetectionResult> {
        let current_hash: [u8; 32] = Sha256::digest(view.pixels()).into();
        self.frames_seen += 1;

        let previous = self.last_hash.insert(view.stream().clone(), current_hash);
        let motion = previous.is_some_and(|prev| prev != current_hash);

        if !motion {
            return Ok(DetectionResult::default());
        }
        Ok(DetectionResult {
            motion_detected: true,
            detections: vec![Detection {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
                confidence: 0.85,
                class: ObjectClass::Unknown,
            }],
            confidence: 0.85,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn frame(stream: &str, seq: u64, data: &[u8]) -> Frame {
        Frame::new(StreamId::from(stream), seq, data.to_vec(), 4, 4)
    }

    #[test]
    fn stub_backend_detects_motion() {
        let mut backend = StubBackend::new();

        let r1 = backend.detect(&frame("cam0", 1, b"frame1").view()).unwrap();
        assert!(!r1.motion_detected);
        assert_eq!(r1.confidence, 0.0);

        let r2 = backend.detect(&frame("cam0", 2, b"frame1").view()).unwrap();
        assert!(!r2.motion_detected);

        let r3 = backend.detect(&frame("cam0", 3, b"frame2").view()).unwrap();
        assert!(r3.motion_detected);
        assert_eq!(r3.detections.len(), 1);
        assert_eq!(backend.frames_seen(), 3);
    }

    #[test]
    fn motion_is_tracked_per_stream() {
        let mut backend = StubBackend::new();
        backend.detect(&frame("cam0", 1, b"aaaa").view()).unwrap();

        // First frame of another stream has no predecessor.
        let other = backend.detect(&frame("cam1", 1, b"bbbb").view()).unwrap();
        assert!(!other.motion_detected);

        let same = backend.detect(&frame("cam0", 2, b"aaaa").view()).unwrap();
        assert!(!same.motion_detected);
    }
}
