//! multicamd - multi-camera capture/detection daemon
//!
//! This daemon:
//! 1. Loads the worker pool (one detector backend per device slot)
//! 2. Connects every configured stream (capture + processing threads)
//! 3. Enables the sync barrier once all streams are connected
//! 4. Logs per-stream statistics periodically
//! 5. Disconnects every stream on Ctrl-C or after `--seconds`

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use multicam_kernel::config::MulticamdConfig;
use multicam_kernel::{
    open_source, BackendRegistry, DetectorPool, JsonLinesSink, LogSink, PipelineContext,
    ResultSink, StreamSession,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run multi-camera capture and detection pipelines on a shared worker pool"
)]
struct Args {
    /// Path to a TOML (or .json) config file.
    #[arg(long, env = "MULTICAM_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,

    /// Write results to stdout as JSON lines instead of logging them.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = MulticamdConfig::load_from(args.config.as_deref())?;

    let backends = BackendRegistry::with_builtin();
    let pool = DetectorPool::initialize(&cfg.device_ids(), &cfg.pool_config(), |device, _| {
        backends.create(&cfg.backend, device)
    })
    .with_context(|| format!("failed to load '{}' detector pool", cfg.backend))?;

    let sink: Arc<dyn ResultSink> = if args.json {
        Arc::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Arc::new(LogSink)
    };
    let ctx = PipelineContext::new(pool, sink);

    let mut sessions = Vec::with_capacity(cfg.streams.len());
    for stream in &cfg.streams {
        let settings = stream.settings();
        let source = open_source(&settings.id, stream.source_config())?;
        let session = StreamSession::connect(&ctx, settings, source)
            .with_context(|| format!("failed to connect stream {}", stream.id))?;
        sessions.push(session);
    }
    ctx.registry.set_sync_enabled(cfg.sync_enabled);

    log::info!(
        "multicamd running: {} streams, {} workers (capacity={}, fast_path={})",
        sessions.len(),
        ctx.pool.len(),
        ctx.pool.capacity(),
        ctx.pool
            .fast_path_key()
            .map_or_else(|| "none".to_string(), |key| key.to_string())
    );
    if !ctx.registry.participants().is_empty() {
        log::info!(
            "sync barrier: {} participants, enabled={}",
            ctx.registry.participants().len(),
            ctx.registry.is_sync_enabled()
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_health_log = Instant::now();

    loop {
        if rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            log::info!("shutdown signal received, stopping streams...");
            break;
        }
        if deadline.is_some_and(|at| Instant::now() >= at) {
            log::info!("run time elapsed, stopping streams...");
            break;
        }
        if !cfg.stats_interval.is_zero() && last_health_log.elapsed() >= cfg.stats_interval {
            log_health(&sessions, &ctx);
            last_health_log = Instant::now();
        }
    }

    log_health(&sessions, &ctx);
    // Disconnect in reverse order of connection.
    while let Some(mut session) = sessions.pop() {
        session.disconnect();
    }
    log::info!("multicamd stopped");
    Ok(())
}

fn log_health(sessions: &[StreamSession], ctx: &PipelineContext) {
    for session in sessions {
        let capture = session.capture_stats();
        let processing = session.processing_stats();
        let (size, capacity) = session.buffer_fill();
        log::info!(
            "health: {} capture={:.1}fps ({} frames, {} dropped) processing={:.1}fps ({} frames, {} dropped) buffer={}/{}",
            session.settings().id,
            capture.average_fps,
            capture.frames_processed,
            capture.frames_dropped,
            processing.average_fps,
            processing.frames_processed,
            processing.frames_dropped,
            size,
            capacity
        );
    }
    log::info!(
        "health: pool busy={}/{} streams={}",
        ctx.pool.busy_count(),
        ctx.pool.capacity(),
        ctx.registry.len()
    );
}
