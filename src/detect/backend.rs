use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::FrameView;

/// Detection capabilities a backend may advertise.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    Motion,
    ObjectDetection,
    Classification,
}

/// Detector backend trait.
///
/// One instance is owned by one pool worker and is only ever called by the
/// processing loop currently holding that worker, hence `&mut self` and `Send`
/// without `Sync`. A single instance serves frames from many streams over its
/// lifetime, so per-stream state must be keyed by `FrameView::stream`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    ///
    /// The view borrows the frame for the duration of the call only.
    fn detect(&mut self, view: &FrameView<'_>) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once when the worker is created.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
