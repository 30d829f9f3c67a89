//! Per-stage throughput statistics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::FPS_STAT_WINDOW;

/// Rolling frame-rate average.
///
/// Instantaneous rates are collected into a window of `window` samples; the
/// published average is only refreshed once the window fills, then the window
/// starts over.
#[derive(Debug)]
pub struct FpsCounter {
    window: usize,
    samples: Vec<f64>,
    average: f64,
}

impl FpsCounter {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "fps window must be at least 1");
        Self {
            window,
            samples: Vec::with_capacity(window),
            average: 0.0,
        }
    }

    /// Record the time one iteration took. Zero durations carry no rate and are skipped.
    pub fn record(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        self.samples.push(1.0 / secs);
        if self.samples.len() == self.window {
            self.average = self.samples.iter().sum::<f64>() / self.window as f64;
            self.samples.clear();
        }
    }

    pub fn average(&self) -> f64 {
        self.average
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(FPS_STAT_WINDOW)
    }
}

/// Point-in-time copy of one stage's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub average_fps: f64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    fps: FpsCounter,
    frames_processed: u64,
    frames_dropped: u64,
}

/// Counters shared between a loop thread and whoever monitors it.
#[derive(Debug, Default)]
pub struct StageStats {
    inner: Mutex<StatsInner>,
}

impl StageStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut StatsInner) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Count one frame handled in `elapsed`.
    pub fn record_frame(&self, elapsed: Duration) {
        self.with(|s| {
            s.frames_processed += 1;
            s.fps.record(elapsed);
        });
    }

    pub fn record_drop(&self) {
        self.with(|s| s.frames_dropped += 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.with(|s| StatsSnapshot {
            average_fps: s.fps.average(),
            frames_processed: s.frames_processed,
            frames_dropped: s.frames_dropped,
        })
    }
}
