//! Multi-camera capture/analysis kernel
//!
//! This crate implements the concurrency core of a multi-camera pipeline: per-stream
//! bounded frame buffers, a cross-stream rendezvous barrier, and a bounded pool of
//! exclusive compute workers shared by the per-stream processing loops.
//!
//! # Architecture
//!
//! Each stream runs two OS threads:
//!
//! 1. **Capture loop**: rendezvous at the barrier, pull a frame from its source, push it
//!    into the stream's `BoundedFrameBuffer`.
//! 2. **Processing loop**: pop a frame, borrow a worker from the `WorkerPool`, run the
//!    detector backend, forward the result to a `ResultSink`.
//!
//! Every blocking call (`add`, `get`, `sync`, `acquire`) can be cut short by its owner's
//! `wake_all`, which is how sessions shut down.
//!
//! # Module Structure
//!
//! - `semaphore`: counting semaphore with owner wake
//! - `frame`: opaque frame payload (Frame, FrameView)
//! - `buffer`: per-stream bounded frame buffer
//! - `registry`: stream registry and sync barrier
//! - `pool`: worker pool with reserved fast path
//! - `detect`: detector backend seam
//! - `ingest`: frame source seam
//! - `pipeline`: capture/processing loops and stream sessions
//! - `sink`: result sinks
//! - `config`: daemon configuration

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod buffer;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod semaphore;
pub mod sink;

pub use buffer::BoundedFrameBuffer;
pub use detect::{BackendRegistry, Detection, DetectionResult, DetectorBackend, StubBackend};
pub use frame::{Frame, FrameView};
pub use ingest::{open_source, FrameSource, SyntheticSource};
pub use pipeline::{
    CaptureLoop, FrameFilter, PipelineContext, ProcessingLoop, StageStats, StatsSnapshot,
    StreamSession, StreamSettings,
};
pub use pool::{PoolConfig, WorkerKey, WorkerLease, WorkerPool};
pub use registry::{StreamRegistry, SyncOutcome};
pub use semaphore::{Interrupted, Semaphore};
pub use sink::{CollectingSink, JsonLinesSink, LogSink, ResultSink, StreamResult};

/// Default number of frames buffered per stream.
pub const DEFAULT_BUFFER_SIZE: usize = 2;

/// Default overwrite policy for capture loops.
pub const DEFAULT_DROP_FRAMES: bool = true;

/// Number of samples averaged per FPS update.
pub const FPS_STAT_WINDOW: usize = 32;

/// Registry of buffered frames, one entry per connected stream.
pub type FrameRegistry = StreamRegistry<Frame>;

/// Pool of detector backends, one per accelerator slot.
pub type DetectorPool = WorkerPool<Box<dyn DetectorBackend>>;

/// Stream identifier (device url or label).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Accelerator index a worker is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display() {
        assert_eq!(StreamId::new("rtsp://cam/1").to_string(), "rtsp://cam/1");
        assert_eq!(DeviceId(3).to_string(), "gpu3");
        let key = WorkerKey {
            device: DeviceId(1),
            index: 2,
        };
        assert_eq!(key.to_string(), "gpu1_2");
    }

    #[test]
    fn stream_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&StreamId::from("cam0")).unwrap();
        assert_eq!(json, "\"cam0\"");
    }
}
