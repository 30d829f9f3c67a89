//! Detector backends.
//!
//! The kernel treats detection as an external collaborator: a backend receives a
//! borrowed `FrameView` and returns an opaque `DetectionResult` that is forwarded to
//! the result sink unchanged. Pool workers wrap one backend instance each.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{Detection, DetectionResult, ObjectClass};
