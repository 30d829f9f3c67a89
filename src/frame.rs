//! Opaque frame payloads.
//!
//! - `Frame`: one captured image, owned by exactly one party at a time. Not `Clone`;
//!   handing it to a `BoundedFrameBuffer` moves it, and `get` moves it back out.
//! - `FrameView`: borrowed view given to detector backends and filters.
//!
//! The kernel never interprets pixel bytes. Layout (channels, stride) is a contract
//! between the frame source and the detector backend.

use std::fmt;
use std::time::{Duration, Instant};

use crate::StreamId;

/// One captured frame.
pub struct Frame {
    /// Private pixel data. Reachable only through `view()` or `into_pixels()`.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Stream that produced this frame.
    pub stream: StreamId,

    /// Per-stream capture counter, starting at 1.
    pub sequence: u64,

    /// Monotonic capture instant (for latency reporting).
    captured_at: Instant,
}

// No Clone: a frame is consumed by exactly one processing loop.

impl Frame {
    pub fn new(stream: StreamId, sequence: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            stream,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Mutable pixel access for in-place frame filters.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Give up the frame and take its pixel bytes.
    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never dump pixel data into logs.
        f.debug_struct("Frame")
            .field("stream", &self.stream)
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Read-only view of a frame for detection.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn stream(&self) -> &'a StreamId {
        &self.frame.stream
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    /// Pixel bytes. Backends must not keep the slice beyond the call they received it in;
    /// the borrow enforces that.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }
}
