use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::ingest::SourceConfig;
use crate::pipeline::StreamSettings;
use crate::pool::PoolConfig;
use crate::{DeviceId, StreamId, DEFAULT_BUFFER_SIZE, DEFAULT_DROP_FRAMES};

const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_DEVICE: u32 = 0;
const DEFAULT_WORKERS_PER_DEVICE: usize = 2;
const DEFAULT_RESERVE_FAST_PATH: bool = true;
const DEFAULT_SYNC_ENABLED: bool = true;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 10;
const DEFAULT_STREAM_URL: &str = "stub://cam0";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: f64 = 25.0;
const DEFAULT_SCENE_PERIOD: u64 = 50;

#[derive(Debug, Deserialize, Default)]
struct MulticamdConfigFile {
    backend: Option<String>,
    devices: Option<Vec<u32>>,
    pool: Option<PoolConfigFile>,
    sync: Option<SyncConfigFile>,
    stats: Option<StatsConfigFile>,
    streams: Option<Vec<StreamConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct PoolConfigFile {
    workers_per_device: Option<usize>,
    reserve_fast_path: Option<bool>,
    capacity_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SyncConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StatsConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamConfigFile {
    url: String,
    id: Option<String>,
    buffer_size: Option<usize>,
    drop_if_full: Option<bool>,
    sync: Option<bool>,
    priority: Option<bool>,
    processing: Option<bool>,
    fps: Option<f64>,
    fps_limit: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MulticamdConfig {
    /// Detector backend name, resolved through `BackendRegistry`.
    pub backend: String,
    pub devices: Vec<u32>,
    pub pool: PoolSettings,
    /// Enable the sync barrier once every stream is connected.
    pub sync_enabled: bool,
    pub stats_interval: Duration,
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers_per_device: usize,
    pub reserve_fast_path: bool,
    pub capacity_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub id: String,
    pub url: String,
    pub buffer_size: usize,
    pub drop_if_full: bool,
    pub sync: bool,
    pub priority: bool,
    pub processing: bool,
    pub fps: f64,
    pub fps_limit: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub max_frames: Option<u64>,
}

impl StreamConfig {
    fn from_url(url: String) -> Self {
        Self {
            id: url.clone(),
            url,
            buffer_size: DEFAULT_BUFFER_SIZE,
            drop_if_full: DEFAULT_DROP_FRAMES,
            sync: false,
            priority: false,
            processing: true,
            fps: DEFAULT_SOURCE_FPS,
            fps_limit: None,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            max_frames: None,
        }
    }

    fn from_file(file: StreamConfigFile) -> Self {
        let defaults = Self::from_url(file.url);
        Self {
            id: file.id.unwrap_or(defaults.id),
            url: defaults.url,
            buffer_size: file.buffer_size.unwrap_or(defaults.buffer_size),
            drop_if_full: file.drop_if_full.unwrap_or(defaults.drop_if_full),
            sync: file.sync.unwrap_or(defaults.sync),
            priority: file.priority.unwrap_or(defaults.priority),
            processing: file.processing.unwrap_or(defaults.processing),
            fps: file.fps.unwrap_or(defaults.fps),
            fps_limit: file.fps_limit,
            width: file.width.unwrap_or(defaults.width),
            height: file.height.unwrap_or(defaults.height),
            max_frames: file.max_frames,
        }
    }

    pub fn settings(&self) -> StreamSettings {
        StreamSettings {
            id: StreamId::new(self.id.clone()),
            buffer_size: self.buffer_size,
            drop_if_full: self.drop_if_full,
            sync: self.sync,
            priority: self.priority,
            enable_processing: self.processing,
            fps_limit: self.fps_limit,
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            url: self.url.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            max_frames: self.max_frames,
            scene_period: DEFAULT_SCENE_PERIOD,
        }
    }
}

impl MulticamdConfig {
    /// Load from the file named by `MULTICAM_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MULTICAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MulticamdConfigFile) -> Self {
        let backend = file
            .backend
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let devices = file.devices.unwrap_or_else(|| vec![DEFAULT_DEVICE]);
        let pool = PoolSettings {
            workers_per_device: file
                .pool
                .as_ref()
                .and_then(|pool| pool.workers_per_device)
                .unwrap_or(DEFAULT_WORKERS_PER_DEVICE),
            reserve_fast_path: file
                .pool
                .as_ref()
                .and_then(|pool| pool.reserve_fast_path)
                .unwrap_or(DEFAULT_RESERVE_FAST_PATH),
            capacity_limit: file.pool.and_then(|pool| pool.capacity_limit),
        };
        let sync_enabled = file
            .sync
            .and_then(|sync| sync.enabled)
            .unwrap_or(DEFAULT_SYNC_ENABLED);
        let stats_interval = Duration::from_secs(
            file.stats
                .and_then(|stats| stats.interval_secs)
                .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
        );
        let streams = match file.streams {
            Some(streams) => streams.into_iter().map(StreamConfig::from_file).collect(),
            None => vec![StreamConfig::from_url(DEFAULT_STREAM_URL.to_string())],
        };
        Self {
            backend,
            devices,
            pool,
            sync_enabled,
            stats_interval,
            streams,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("MULTICAM_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_string();
            }
        }
        if let Ok(devices) = std::env::var("MULTICAM_DEVICES") {
            let parsed = split_csv(&devices)
                .iter()
                .map(|entry| entry.parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| {
                    anyhow!("MULTICAM_DEVICES must be a comma-separated list of device indices")
                })?;
            if !parsed.is_empty() {
                self.devices = parsed;
            }
        }
        if let Ok(workers) = std::env::var("MULTICAM_WORKERS_PER_DEVICE") {
            self.pool.workers_per_device = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("MULTICAM_WORKERS_PER_DEVICE must be an integer"))?;
        }
        if let Ok(reserve) = std::env::var("MULTICAM_RESERVE_FAST_PATH") {
            self.pool.reserve_fast_path = parse_bool("MULTICAM_RESERVE_FAST_PATH", &reserve)?;
        }
        if let Ok(limit) = std::env::var("MULTICAM_CAPACITY_LIMIT") {
            self.pool.capacity_limit = Some(
                limit
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("MULTICAM_CAPACITY_LIMIT must be an integer"))?,
            );
        }
        if let Ok(enabled) = std::env::var("MULTICAM_SYNC_ENABLED") {
            self.sync_enabled = parse_bool("MULTICAM_SYNC_ENABLED", &enabled)?;
        }
        if let Ok(interval) = std::env::var("MULTICAM_STATS_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("MULTICAM_STATS_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.stats_interval = Duration::from_secs(seconds);
        }
        if let Ok(urls) = std::env::var("MULTICAM_STREAMS") {
            let parsed = split_csv(&urls);
            if !parsed.is_empty() {
                self.streams = parsed.into_iter().map(StreamConfig::from_url).collect();
            }
        }
        if let Ok(size) = std::env::var("MULTICAM_BUFFER_SIZE") {
            let size: usize = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("MULTICAM_BUFFER_SIZE must be an integer"))?;
            for stream in &mut self.streams {
                stream.buffer_size = size;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("at least one device is required");
        }
        let mut seen_devices = HashSet::new();
        for device in &self.devices {
            if !seen_devices.insert(*device) {
                bail!("device {} is listed twice", device);
            }
        }
        if self.pool.workers_per_device == 0 {
            bail!("workers_per_device must be greater than zero");
        }
        if self.streams.is_empty() {
            bail!("at least one stream is required");
        }

        let mut seen_ids = HashSet::new();
        for stream in &self.streams {
            if stream.id.trim().is_empty() {
                bail!("stream {} has an empty id", stream.url);
            }
            if !seen_ids.insert(stream.id.as_str()) {
                bail!("stream id {} is used twice", stream.id);
            }
            if stream.buffer_size == 0 {
                bail!("stream {}: buffer_size must be greater than zero", stream.id);
            }
            if stream.fps <= 0.0 || stream.fps_limit.is_some_and(|fps| fps <= 0.0) {
                bail!("stream {}: frame rates must be greater than zero", stream.id);
            }
            if stream.width == 0 || stream.height == 0 {
                bail!("stream {}: width and height must be greater than zero", stream.id);
            }
        }

        let priority: Vec<&str> = self
            .streams
            .iter()
            .filter(|s| s.priority && s.processing)
            .map(|s| s.id.as_str())
            .collect();
        if !priority.is_empty() && !self.pool.reserve_fast_path {
            bail!(
                "priority stream {} needs pool.reserve_fast_path = true",
                priority[0]
            );
        }
        if priority.len() > 1 {
            log::warn!(
                "{} priority streams share one fast-path worker: {}",
                priority.len(),
                priority.join(", ")
            );
        }

        let general_needed = self.streams.iter().any(|s| s.processing && !s.priority);
        if general_needed && self.general_capacity() == 0 {
            bail!("worker pool has no general capacity for non-priority streams");
        }
        Ok(())
    }

    /// Workers available to non-priority streams.
    pub fn general_capacity(&self) -> usize {
        let total = self.devices.len() * self.pool.workers_per_device;
        let general = total.saturating_sub(usize::from(self.pool.reserve_fast_path));
        self.pool
            .capacity_limit
            .map_or(general, |limit| limit.min(general))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers_per_device: self.pool.workers_per_device,
            reserve_fast_path: self.pool.reserve_fast_path,
            capacity_limit: self.pool.capacity_limit,
        }
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().copied().map(DeviceId).collect()
    }
}

/// Read a TOML config file, or JSON when the file has a `.json` extension.
fn read_config_file(path: &Path) -> Result<MulticamdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean", key)),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
