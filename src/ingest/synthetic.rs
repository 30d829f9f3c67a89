//! Synthetic frame source for `stub://` urls.
//!
//! Simulates a scene with occasional "motion events":
//! - Most frames repeat the current background
//! - Every `scene_period` frames the scene changes to a random offset

use anyhow::{bail, Result};
use rand::Rng;

use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceConfig};
use crate::StreamId;

pub struct SyntheticSource {
    stream: StreamId,
    config: SourceConfig,
    connected: bool,
    frame_count: u64,
    /// Simulated "scene" state.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(stream: StreamId, config: SourceConfig) -> Self {
        Self {
            stream,
            config,
            connected: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3; // RGB

        if self.config.scene_period > 0 && self.frame_count % self.config.scene_period == 0 {
            let mut next: u8 = rand::thread_rng().gen();
            if next == self.scene_state {
                next = next.wrapping_add(1);
            }
            self.scene_state = next;
        }

        let offset = self.scene_state as usize;
        (0..pixel_count).map(|i| ((i + offset) % 256) as u8).collect()
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: {} connected to {} ({}x{} @ {} fps)",
            self.stream,
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            bail!("source {} is not connected", self.config.url);
        }
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Some(Frame::new(
            self.stream.clone(),
            self.frame_count,
            pixels,
            self.config.width,
            self.config.height,
        )))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn nominal_fps(&self) -> Option<f64> {
        (self.config.fps > 0.0).then_some(self.config.fps)
    }
}
