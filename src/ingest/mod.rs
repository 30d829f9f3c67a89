//! Frame ingestion sources.
//!
//! A source produces `Frame`s for exactly one stream; its capture loop owns it.
//! Video decoding lives outside the kernel, so the only built-in source is the
//! synthetic one behind `stub://` urls. Other sources plug in by implementing
//! `FrameSource` and handing the box to `StreamSession::connect`.
//!
//! `next_frame` hands ownership of each frame to the capture loop.

mod synthetic;

use anyhow::{bail, Result};

use crate::frame::Frame;
use crate::StreamId;

pub use synthetic::SyntheticSource;

/// A producer of frames for one stream.
pub trait FrameSource: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. `Ok(None)` means the source reached its end.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn frames_captured(&self) -> u64;

    /// Frame rate the source produces at, if it has one.
    fn nominal_fps(&self) -> Option<f64> {
        None
    }
}

/// Parameters for the built-in sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source url. Only `stub://` urls are built in.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate.
    pub fps: f64,
    /// Stop after this many frames (finite source).
    pub max_frames: Option<u64>,
    /// Frames between synthetic scene changes.
    pub scene_period: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://default".to_string(),
            width: 320,
            height: 240,
            fps: 30.0,
            max_frames: None,
            scene_period: 50,
        }
    }
}

/// Open a built-in source for `stream`.
pub fn open_source(stream: &StreamId, config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(stream.clone(), config)));
    }
    bail!(
        "no built-in source for '{}': only stub:// urls are supported",
        config.url
    )
}
