use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::buffer::BoundedFrameBuffer;
use crate::ingest::FrameSource;
use crate::pipeline::{
    CaptureLoop, FrameFilter, PipelineContext, ProcessingLoop, StageStats, StatsSnapshot,
    StreamSettings,
};

/// Spacing between repeated wakes while waiting for a loop thread to exit.
const WAKE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

struct LoopHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// One connected stream: its registry entry plus its capture and processing threads.
///
/// Dropping a session disconnects it.
pub struct StreamSession {
    settings: StreamSettings,
    ctx: PipelineContext,
    buffer: Arc<BoundedFrameBuffer>,
    capture: Option<LoopHandle>,
    processing: Option<LoopHandle>,
    capture_stats: Arc<StageStats>,
    processing_stats: Arc<StageStats>,
    priority: Arc<AtomicBool>,
    registered: bool,
}

impl StreamSession {
    /// Connect `source`, register the stream's buffer and start its threads.
    ///
    /// Fails without leaving anything registered or running when the source cannot
    /// connect, the stream id is taken, or a thread cannot be spawned.
    pub fn connect(
        ctx: &PipelineContext,
        settings: StreamSettings,
        source: Box<dyn FrameSource>,
    ) -> Result<Self> {
        Self::connect_with_filter(ctx, settings, source, None)
    }

    /// Like `connect`, running `filter` on every frame before detection.
    pub fn connect_with_filter(
        ctx: &PipelineContext,
        settings: StreamSettings,
        mut source: Box<dyn FrameSource>,
        filter: Option<Box<dyn FrameFilter>>,
    ) -> Result<Self> {
        if settings.buffer_size == 0 {
            bail!("stream {}: buffer_size must be greater than zero", settings.id);
        }
        if settings.priority && settings.enable_processing && !ctx.pool.has_fast_path() {
            bail!(
                "stream {}: priority streams need a reserved fast-path worker",
                settings.id
            );
        }
        source
            .connect()
            .with_context(|| format!("stream {}: source failed to connect", settings.id))?;

        let buffer = Arc::new(BoundedFrameBuffer::new(settings.buffer_size));
        ctx.registry
            .register(settings.id.clone(), buffer.clone(), settings.sync)?;

        let priority = Arc::new(AtomicBool::new(settings.priority));
        let mut session = Self {
            settings,
            ctx: ctx.clone(),
            buffer,
            capture: None,
            processing: None,
            capture_stats: Arc::new(StageStats::new()),
            processing_stats: Arc::new(StageStats::new()),
            priority,
            registered: true,
        };
        if let Err(err) = session.start(source, filter) {
            session.disconnect();
            return Err(err);
        }

        log::info!(
            "[{}] connected (buffer={}, drop_if_full={}, sync={}, priority={}, processing={})",
            session.settings.id,
            session.settings.buffer_size,
            session.settings.drop_if_full,
            session.settings.sync,
            session.settings.priority,
            session.settings.enable_processing
        );
        Ok(session)
    }

    fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        filter: Option<Box<dyn FrameFilter>>,
    ) -> Result<()> {
        let id = self.settings.id.clone();

        let stop = Arc::new(AtomicBool::new(false));
        let capture = CaptureLoop::new(
            id.clone(),
            self.ctx.registry.clone(),
            self.buffer.clone(),
            source,
            self.settings.drop_if_full,
            self.settings.fps_limit,
            stop.clone(),
            self.capture_stats.clone(),
        );
        let join = thread::Builder::new()
            .name(format!("capture-{}", id))
            .spawn(move || capture.run())
            .with_context(|| format!("stream {}: spawn capture thread", id))?;
        self.capture = Some(LoopHandle { stop, join });

        if self.settings.enable_processing {
            let stop = Arc::new(AtomicBool::new(false));
            let processing = ProcessingLoop::new(
                id.clone(),
                self.buffer.clone(),
                self.ctx.pool.clone(),
                self.ctx.sink.clone(),
                filter,
                self.priority.clone(),
                stop.clone(),
                self.processing_stats.clone(),
            );
            let join = thread::Builder::new()
                .name(format!("process-{}", id))
                .spawn(move || processing.run())
                .with_context(|| format!("stream {}: spawn processing thread", id))?;
            self.processing = Some(LoopHandle { stop, join });
        }
        Ok(())
    }

    /// Stop both threads and remove the stream from the registry.
    ///
    /// Processing stops first so no worker is held while capture winds down. If the
    /// stream took part in sync, sync is enabled afterwards so the remaining
    /// participants keep going. Calling this again is a no-op.
    pub fn disconnect(&mut self) {
        let id = self.settings.id.clone();

        if let Some(handle) = self.processing.take() {
            log::debug!("[{}] about to stop processing loop", id);
            stop_loop(handle, || {
                self.ctx.pool.wake_all();
                self.buffer.wake_all();
            });
            log::debug!("[{}] processing loop stopped", id);
        }

        if let Some(handle) = self.capture.take() {
            log::debug!("[{}] about to stop capture loop", id);
            stop_loop(handle, || {
                self.ctx.registry.wake_all();
                // Take one frame off a full buffer so a blocked add can finish.
                if self.buffer.is_full() {
                    let _ = self.buffer.try_get();
                }
                self.buffer.wake_all();
            });
            log::debug!("[{}] capture loop stopped", id);
        }

        if self.registered {
            self.registered = false;
            let was_participant = self.ctx.registry.is_participant(&id);
            self.ctx.registry.unregister(&id);
            if was_participant {
                // Remaining participants start processing.
                self.ctx.registry.set_sync_enabled(true);
            }
            log::info!("[{}] disconnected", id);
        }
    }

    /// Move detection onto (or off) the pool's fast-path worker.
    ///
    /// Takes effect from the next frame. Fails when the pool reserves no fast path.
    pub fn set_priority(&mut self, priority: bool) -> Result<()> {
        if priority && !self.ctx.pool.has_fast_path() {
            bail!(
                "stream {}: priority streams need a reserved fast-path worker",
                self.settings.id
            );
        }
        self.settings.priority = priority;
        self.priority.store(priority, Ordering::SeqCst);
        log::info!("[{}] priority={}", self.settings.id, priority);
        Ok(())
    }

    pub fn is_priority(&self) -> bool {
        self.priority.load(Ordering::SeqCst)
    }

    /// Drop every buffered frame. Returns `false` when the buffer was empty or busy.
    pub fn clear_buffer(&self) -> bool {
        let cleared = self.buffer.clear();
        log::debug!("[{}] clear buffer: {}", self.settings.id, cleared);
        cleared
    }

    pub fn capture_stats(&self) -> StatsSnapshot {
        self.capture_stats.snapshot()
    }

    pub fn processing_stats(&self) -> StatsSnapshot {
        self.processing_stats.snapshot()
    }

    /// Current buffer fill as `(size, capacity)`.
    pub fn buffer_fill(&self) -> (usize, usize) {
        (self.buffer.size(), self.buffer.capacity())
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.registered
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Raise the stop flag and keep waking the loop until its thread has exited.
///
/// A single wake is not enough: the thread may be between its stop-flag check and
/// its next blocking call when the wake lands.
fn stop_loop(handle: LoopHandle, wake: impl Fn()) {
    handle.stop.store(true, Ordering::SeqCst);
    while !handle.join.is_finished() {
        wake();
        thread::sleep(WAKE_RETRY_INTERVAL);
    }
    let name = handle.join.thread().name().unwrap_or("loop").to_string();
    if handle.join.join().is_err() {
        log::error!("{} thread panicked", name);
    }
}
