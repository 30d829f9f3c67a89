//! Per-stream pipelines.
//!
//! A `StreamSession` owns one capture thread and (optionally) one processing thread
//! for a stream, plus the stream's buffer entry in the shared registry:
//!
//! ```text
//! FrameSource -> CaptureLoop -> BoundedFrameBuffer -> ProcessingLoop -> ResultSink
//!                    |                                     |
//!              StreamRegistry::sync                 WorkerPool lease
//! ```

mod capture;
mod processing;
mod session;
mod stats;

use std::sync::Arc;

use crate::sink::ResultSink;
use crate::{DetectorPool, FrameRegistry, StreamId, DEFAULT_BUFFER_SIZE, DEFAULT_DROP_FRAMES};

pub use capture::CaptureLoop;
pub use processing::{FrameFilter, ProcessingLoop};
pub use session::StreamSession;
pub use stats::{FpsCounter, StageStats, StatsSnapshot};

/// Shared handles every stream session works against.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<FrameRegistry>,
    pub pool: Arc<DetectorPool>,
    pub sink: Arc<dyn ResultSink>,
}

impl PipelineContext {
    pub fn new(pool: DetectorPool, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            registry: Arc::new(FrameRegistry::new()),
            pool: Arc::new(pool),
            sink,
        }
    }
}

/// How one stream is connected.
#[derive(Clone, Debug)]
pub struct StreamSettings {
    pub id: StreamId,
    /// Frames buffered between capture and processing.
    pub buffer_size: usize,
    /// Overwrite the oldest buffered frame instead of blocking capture.
    pub drop_if_full: bool,
    /// Take part in the cross-stream sync barrier.
    pub sync: bool,
    /// Run detection on the reserved fast-path worker.
    pub priority: bool,
    /// Spawn a processing loop. Without one, frames only accumulate in the buffer.
    pub enable_processing: bool,
    /// Cap on capture rate; defaults to the source's nominal rate.
    pub fps_limit: Option<f64>,
}

impl StreamSettings {
    pub fn new(id: impl Into<StreamId>) -> Self {
        Self {
            id: id.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            drop_if_full: DEFAULT_DROP_FRAMES,
            sync: false,
            priority: false,
            enable_processing: true,
            fps_limit: None,
        }
    }
}
