use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::BoundedFrameBuffer;
use crate::ingest::FrameSource;
use crate::pipeline::StageStats;
use crate::{FrameRegistry, StreamId};

/// Poll interval of a source that reached its end.
const END_OF_STREAM_POLL: Duration = Duration::from_millis(20);

/// Back-off after a failed capture before retrying the source.
const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Minimum spacing of repeated capture-failure warnings.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Pulls frames from one source into the stream's buffer.
///
/// Per iteration: check the stop flag, rendezvous at the registry barrier, capture,
/// push into the buffer, rate limit, update statistics. A finite source that ends
/// pauses the loop; it keeps honoring the barrier and the stop flag until stopped.
pub struct CaptureLoop {
    id: StreamId,
    registry: Arc<FrameRegistry>,
    buffer: Arc<BoundedFrameBuffer>,
    source: Box<dyn FrameSource>,
    drop_if_full: bool,
    frame_interval: Option<Duration>,
    stop: Arc<AtomicBool>,
    stats: Arc<StageStats>,
}

impl CaptureLoop {
    /// `fps_limit` caps the capture rate; without it the source's nominal rate applies.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StreamId,
        registry: Arc<FrameRegistry>,
        buffer: Arc<BoundedFrameBuffer>,
        source: Box<dyn FrameSource>,
        drop_if_full: bool,
        fps_limit: Option<f64>,
        stop: Arc<AtomicBool>,
        stats: Arc<StageStats>,
    ) -> Self {
        let frame_interval = fps_limit
            .or_else(|| source.nominal_fps())
            .filter(|fps| *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps));
        Self {
            id,
            registry,
            buffer,
            source,
            drop_if_full,
            frame_interval,
            stop,
            stats,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn run(mut self) {
        log::debug!("[{}] capture loop started", self.id);
        let mut paused = false;
        let mut last_capture = Instant::now();
        let mut last_error_log: Option<Instant> = None;

        while !self.stopped() {
            self.registry.sync(&self.id);
            if self.stopped() {
                break;
            }
            if paused {
                thread::sleep(END_OF_STREAM_POLL);
                continue;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!(
                        "[{}] end of stream after {} frames; capture paused",
                        self.id,
                        self.source.frames_captured()
                    );
                    paused = true;
                    continue;
                }
                Err(err) => {
                    if last_error_log.map_or(true, |at| at.elapsed() >= ERROR_LOG_INTERVAL) {
                        log::warn!("[{}] capture failed: {:#}", self.id, err);
                        last_error_log = Some(Instant::now());
                    }
                    thread::sleep(CAPTURE_RETRY_BACKOFF);
                    continue;
                }
            };

            match self.buffer.add(frame, self.drop_if_full) {
                Ok(Some(evicted)) => {
                    log::trace!("[{}] buffer full, dropped frame #{}", self.id, evicted.sequence);
                    self.stats.record_drop();
                }
                Ok(None) => {}
                // Woken during shutdown; the frame is discarded.
                Err(_) => continue,
            }

            if let Some(interval) = self.frame_interval {
                let spent = last_capture.elapsed();
                if spent < interval {
                    thread::sleep(interval - spent);
                }
            }
            self.stats.record_frame(last_capture.elapsed());
            last_capture = Instant::now();
        }

        log::debug!("[{}] capture loop stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SourceConfig, SyntheticSource};
    use anyhow::Result;

    fn source(max_frames: Option<u64>) -> Result<Box<dyn FrameSource>> {
        let mut source = SyntheticSource::new(
            StreamId::from("cam0"),
            SourceConfig {
                url: "stub://cam0".to_string(),
                width: 4,
                height: 4,
                fps: 0.0,
                max_frames,
                scene_period: 10,
            },
        );
        source.connect()?;
        Ok(Box::new(source))
    }

    #[test]
    fn finite_source_fills_buffer_then_pauses() -> Result<()> {
        let registry = Arc::new(FrameRegistry::new());
        let buffer = Arc::new(BoundedFrameBuffer::new(4));
        let id = StreamId::from("cam0");
        registry.register(id.clone(), buffer.clone(), false)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StageStats::new());
        let capture = CaptureLoop::new(
            id,
            registry,
            buffer.clone(),
            source(Some(3))?,
            false,
            None,
            stop.clone(),
            stats.clone(),
        );
        let handle = thread::spawn(move || capture.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().frames_processed < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stats.snapshot().frames_processed, 3);
        assert_eq!(buffer.size(), 3);

        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        let sequences: Vec<u64> = (0..3).map(|_| buffer.get().unwrap().sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn overwrite_mode_counts_drops() -> Result<()> {
        let registry = Arc::new(FrameRegistry::new());
        let buffer = Arc::new(BoundedFrameBuffer::new(2));
        let id = StreamId::from("cam0");
        registry.register(id.clone(), buffer.clone(), false)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StageStats::new());
        let capture = CaptureLoop::new(
            id,
            registry,
            buffer.clone(),
            source(Some(5))?,
            true,
            None,
            stop.clone(),
            stats.clone(),
        );
        let handle = thread::spawn(move || capture.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().frames_processed < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(stats.snapshot().frames_dropped, 3);
        assert_eq!(buffer.get().unwrap().sequence, 4);
        assert_eq!(buffer.get().unwrap().sequence, 5);
        Ok(())
    }
}
