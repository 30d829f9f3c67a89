use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::buffer::BoundedFrameBuffer;
use crate::detect::{DetectionResult, DetectorBackend};
use crate::frame::Frame;
use crate::pipeline::StageStats;
use crate::pool::{WorkerKey, WorkerLease};
use crate::semaphore::Interrupted;
use crate::sink::{ResultSink, StreamResult};
use crate::{DetectorPool, StreamId};

/// Per-frame image operation applied before detection (blur, flip, crop, ...).
///
/// Filters run on the processing thread and may rewrite pixels in place.
pub trait FrameFilter: Send {
    /// Returns `false` to skip detection for this frame.
    fn apply(&mut self, frame: &mut Frame) -> Result<bool>;
}

/// Pops frames from the stream's buffer and runs them through a pooled detector.
pub struct ProcessingLoop {
    id: StreamId,
    buffer: Arc<BoundedFrameBuffer>,
    pool: Arc<DetectorPool>,
    sink: Arc<dyn ResultSink>,
    filter: Option<Box<dyn FrameFilter>>,
    priority: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    stats: Arc<StageStats>,
}

impl ProcessingLoop {
    /// While `priority` is set, detection runs on the pool's reserved fast-path worker.
    /// The flag is read once per frame, so it can be flipped while the loop runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StreamId,
        buffer: Arc<BoundedFrameBuffer>,
        pool: Arc<DetectorPool>,
        sink: Arc<dyn ResultSink>,
        filter: Option<Box<dyn FrameFilter>>,
        priority: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        stats: Arc<StageStats>,
    ) -> Self {
        Self {
            id,
            buffer,
            pool,
            sink,
            filter,
            priority,
            stop,
            stats,
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn run(mut self) {
        log::debug!(
            "[{}] processing loop started (fast_path={})",
            self.id,
            self.priority.load(Ordering::SeqCst)
        );
        let mut last_frame = Instant::now();

        while !self.stopped() {
            let Ok(mut frame) = self.buffer.get() else {
                continue;
            };

            if let Some(filter) = self.filter.as_mut() {
                match filter.apply(&mut frame) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.stats.record_frame(last_frame.elapsed());
                        last_frame = Instant::now();
                        continue;
                    }
                    Err(err) => {
                        log::warn!("[{}] filter failed on #{}: {:#}", self.id, frame.sequence, err);
                        self.stats.record_drop();
                        continue;
                    }
                }
            }

            let (worker, result) = match self.detect(&frame) {
                Ok(Some(done)) => done,
                // Stopped while waiting for a worker.
                Ok(None) => break,
                Err(err) => {
                    log::warn!("[{}] detection failed on #{}: {:#}", self.id, frame.sequence, err);
                    self.stats.record_drop();
                    continue;
                }
            };

            let latency_ms = u64::try_from(frame.age().as_millis()).unwrap_or(u64::MAX);
            let submitted = self.sink.submit(StreamResult::new(
                self.id.clone(),
                frame.sequence,
                worker,
                latency_ms,
                result,
            ));
            if let Err(err) = submitted {
                log::warn!("[{}] result sink rejected #{}: {:#}", self.id, frame.sequence, err);
            }

            self.stats.record_frame(last_frame.elapsed());
            last_frame = Instant::now();
        }

        log::debug!("[{}] processing loop stopped", self.id);
    }

    /// Borrow a worker, retrying wakes aimed at other streams until this loop is stopped.
    fn lease(&self) -> Result<Option<WorkerLease<'_, Box<dyn DetectorBackend>>>> {
        loop {
            let leased = if self.priority.load(Ordering::SeqCst) {
                match self.pool.lease_fast_path() {
                    Ok(lease) => Ok(lease),
                    Err(err) if err.downcast_ref::<Interrupted>().is_some() => Err(Interrupted),
                    Err(err) => return Err(err),
                }
            } else {
                self.pool.lease()
            };
            match leased {
                Ok(lease) => return Ok(Some(lease)),
                Err(Interrupted) if self.stopped() => return Ok(None),
                Err(Interrupted) => continue,
            }
        }
    }

    fn detect(&self, frame: &Frame) -> Result<Option<(WorkerKey, DetectionResult)>> {
        let Some(lease) = self.lease()? else {
            return Ok(None);
        };
        let result = lease.run(|backend| backend.detect(&frame.view()))??;
        log::trace!("[{}] #{} ran on {}", self.id, frame.sequence, lease.key());
        Ok(Some((lease.key(), result)))
    }
}
