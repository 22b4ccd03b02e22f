use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::buffer::BufferCapacity;
use crate::error::CaptureError;
use crate::frame::CropRect;

pub const DEFAULT_QUEUE_SIZE: usize = 3;
pub const DEFAULT_GRACE_SECS: u64 = 20;
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;
/// High-watermark used for unbounded buffers when none is configured.
pub const DEFAULT_UNBOUNDED_HIGH_WATERMARK: usize = 64;

// ----------------------------------------------------------------------------
// Source description
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Rtsp,
    Http,
    Https,
    File,
    Usb,
    /// Synthetic `stub://` source.
    Stub,
}

impl SourceKind {
    /// Finite sources end on their own; only they may use an unbounded buffer.
    pub fn is_finite(&self) -> bool {
        matches!(self, Self::File)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rtsp => "rtsp",
            Self::Http => "http",
            Self::Https => "https",
            Self::File => "file",
            Self::Usb => "usb",
            Self::Stub => "stub",
        }
    }
}

impl FromStr for SourceKind {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rtsp" => Ok(Self::Rtsp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "file" => Ok(Self::File),
            "usb" => Ok(Self::Usb),
            "stub" => Ok(Self::Stub),
            other => Err(CaptureError::config(format!(
                "unsupported source kind '{}'; expected rtsp, http, https, file, usb or stub",
                other
            ))),
        }
    }
}

/// Which `FrameSource` realization opens the feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Continuous decode of the stream.
    #[default]
    Direct,
    /// Periodic still snapshots. Slower, but robust to stream artifacts.
    Snapshot,
}

impl FromStr for Backend {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(CaptureError::config(format!(
                "unsupported backend '{}'; expected direct or snapshot",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// File path, device path or URL.
    pub locator: String,
    pub backend: Backend,
}

impl SourceSpec {
    pub fn new(kind: SourceKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            backend: Backend::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Feed configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FpsSetting {
    /// Use the rate the source reports.
    #[default]
    Auto,
    Fixed(u32),
}

impl FpsSetting {
    /// Map a manual fps value; `-1` (or any value ≤ 0) means auto-detect.
    pub fn from_manual(value: i64) -> Self {
        if value <= 0 {
            Self::Auto
        } else {
            Self::Fixed(value.min(u32::MAX as i64) as u32)
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }
}

/// Delay policy between reopen attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconnectBackoff {
    /// Retry immediately, forever.
    #[default]
    None,
    /// Double the delay after each failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl ReconnectBackoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// A named sub-rectangle of a feed exposed as its own logical output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub rect: CropRect,
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub name: String,
    pub source: SourceSpec,
    pub fps: FpsSetting,
    pub crop: Option<CropRect>,
    pub buffer: BufferCapacity,
    /// Occupancy above which the capture loop stops reading.
    pub high_watermark: Option<usize>,
    pub reconnect: bool,
    /// Sustained failure tolerated before reconnecting (or stopping).
    pub grace_period: Duration,
    pub backoff: ReconnectBackoff,
    pub max_height: Option<u32>,
    pub recording_dir: Option<PathBuf>,
    /// Empty means the whole feed is one output.
    pub partitions: Vec<Partition>,
}

impl FeedConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: SourceSpec::new(kind, locator),
            fps: FpsSetting::Auto,
            crop: None,
            buffer: BufferCapacity::Bounded(default_queue_size()),
            high_watermark: None,
            reconnect: true,
            grace_period: Duration::from_secs(DEFAULT_GRACE_SECS),
            backoff: ReconnectBackoff::None,
            max_height: Some(DEFAULT_MAX_HEIGHT),
            recording_dir: None,
            partitions: Vec::new(),
        }
    }

    pub fn effective_high_watermark(&self) -> Option<usize> {
        match (self.high_watermark, self.buffer) {
            (Some(limit), _) => Some(limit),
            (None, BufferCapacity::Unbounded) => Some(DEFAULT_UNBOUNDED_HIGH_WATERMARK),
            (None, BufferCapacity::Bounded(_)) => None,
        }
    }

    /// Max height applied to whole frames by the capture loop.
    ///
    /// Partitioned feeds buffer full-resolution frames: partition rectangles
    /// are in source coordinates, and each partition is scaled after it is cut.
    pub fn capture_max_height(&self) -> Option<u32> {
        if self.partitions.is_empty() {
            self.max_height
        } else {
            None
        }
    }

    /// Names of the logical outputs this feed exposes, in order.
    pub fn output_names(&self) -> Vec<&str> {
        if self.partitions.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.partitions.iter().map(|p| p.name.as_str()).collect()
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.name.trim().is_empty() {
            return Err(CaptureError::config("feed name must not be empty"));
        }
        if self.source.locator.trim().is_empty() {
            return Err(CaptureError::config(format!(
                "feed '{}' has an empty locator",
                self.name
            )));
        }
        if let Some(crop) = self.crop {
            CropRect::new(crop.left, crop.top, crop.right, crop.bottom)?;
        }
        if self.buffer == BufferCapacity::Unbounded && !self.source.kind.is_finite() {
            return Err(CaptureError::config(format!(
                "feed '{}': unbounded buffers are only allowed for file sources, not {}",
                self.name,
                self.source.kind.as_str()
            )));
        }
        if let FpsSetting::Fixed(0) = self.fps {
            return Err(CaptureError::config(format!(
                "feed '{}': fixed fps must be positive",
                self.name
            )));
        }
        for partition in &self.partitions {
            if partition.name.trim().is_empty() {
                return Err(CaptureError::config(format!(
                    "feed '{}' has a partition without a name",
                    self.name
                )));
            }
            let rect = partition.rect;
            CropRect::new(rect.left, rect.top, rect.right, rect.bottom)?;
        }
        Ok(())
    }
}

fn default_queue_size() -> std::num::NonZeroUsize {
    std::num::NonZeroUsize::new(DEFAULT_QUEUE_SIZE).unwrap_or(std::num::NonZeroUsize::MIN)
}

// ----------------------------------------------------------------------------
// Defaults shared by list and file configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FeedDefaults {
    /// `None` picks unbounded when every source is a file, else the queue size.
    pub buffer: Option<BufferCapacity>,
    pub reconnect: bool,
    pub grace_period: Duration,
    pub max_height: Option<u32>,
    pub recording_dir: Option<PathBuf>,
    pub backend: Backend,
    pub high_watermark: Option<usize>,
}

impl Default for FeedDefaults {
    fn default() -> Self {
        Self {
            buffer: None,
            reconnect: true,
            grace_period: Duration::from_secs(DEFAULT_GRACE_SECS),
            max_height: Some(DEFAULT_MAX_HEIGHT),
            recording_dir: None,
            backend: Backend::Direct,
            high_watermark: None,
        }
    }
}

impl FeedDefaults {
    fn feed(&self, name: &str, kind: SourceKind, locator: &str, fps: FpsSetting) -> FeedConfig {
        let mut feed = FeedConfig::new(name, kind, locator);
        feed.source.backend = self.backend;
        feed.fps = fps;
        feed.reconnect = self.reconnect;
        feed.grace_period = self.grace_period;
        feed.max_height = self.max_height;
        feed.recording_dir = self.recording_dir.clone();
        feed.high_watermark = self.high_watermark;
        feed
    }

    fn capacity_for(&self, kinds: &[SourceKind]) -> BufferCapacity {
        if let Some(buffer) = self.buffer {
            return buffer;
        }
        if !kinds.is_empty() && kinds.iter().all(SourceKind::is_finite) {
            BufferCapacity::Unbounded
        } else {
            BufferCapacity::Bounded(default_queue_size())
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(size) = std::env::var("FEEDCAP_QUEUE_SIZE") {
            let size: usize = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("FEEDCAP_QUEUE_SIZE must be a non-negative integer"))?;
            // 0 asks for an unbounded queue, which is validated per feed later.
            self.buffer = Some(BufferCapacity::frames(size).unwrap_or(BufferCapacity::Unbounded));
        }
        if let Ok(secs) = std::env::var("FEEDCAP_RECONNECT_SECS") {
            let secs: i64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("FEEDCAP_RECONNECT_SECS must be an integer number of seconds"))?;
            // A non-positive threshold disables reconnection.
            self.reconnect = secs > 0;
            self.grace_period = Duration::from_secs(secs.max(0) as u64);
        }
        if let Ok(dir) = std::env::var("FEEDCAP_RECORDING_DIR") {
            if !dir.trim().is_empty() {
                self.recording_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(height) = std::env::var("FEEDCAP_MAX_HEIGHT") {
            let height: u32 = height
                .trim()
                .parse()
                .map_err(|_| anyhow!("FEEDCAP_MAX_HEIGHT must be an integer number of pixels"))?;
            self.max_height = (height > 0).then_some(height);
        }
        if let Ok(backend) = std::env::var("FEEDCAP_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.parse()?;
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Manager configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct ManagerConfig {
    pub feeds: Vec<FeedConfig>,
}

impl ManagerConfig {
    pub fn new(feeds: Vec<FeedConfig>) -> Self {
        Self { feeds }
    }

    /// Load from `FEEDCAP_CONFIG` (TOML) or `FEEDCAP_FEEDS` (bulk list),
    /// then apply the `FEEDCAP_*` environment overrides.
    pub fn load() -> Result<Self> {
        if let Some(path) = env_path("FEEDCAP_CONFIG") {
            return Self::load_toml(&path);
        }
        if let Some(path) = env_path("FEEDCAP_FEEDS") {
            return Self::load_feed_list(&path);
        }
        Err(anyhow!("set FEEDCAP_CONFIG (TOML) or FEEDCAP_FEEDS (feed list)"))
    }

    /// TOML file at `path` with the `FEEDCAP_*` overrides applied.
    pub fn load_toml(path: &Path) -> Result<Self> {
        let file = read_config_file(path)?;
        Self::from_file(file, FeedDefaults::apply_env)
    }

    /// Bulk feed list at `path` with the `FEEDCAP_*` overrides applied.
    pub fn load_feed_list(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed list {}", path.display()))?;
        let mut defaults = FeedDefaults::default();
        defaults.apply_env()?;
        Ok(Self::from_feed_list(&text, &defaults)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_file(read_config_file(path)?, |_| Ok(()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw).context("invalid feed configuration")?;
        Self::from_file(file, |_| Ok(()))
    }

    /// Parse the bulk list form: one `name,sourcetype:path[,fps]` per line.
    ///
    /// Blank lines and lines starting with `#` are skipped. A missing or
    /// non-positive fps means auto-detect.
    pub fn from_feed_list(text: &str, defaults: &FeedDefaults) -> Result<Self, CaptureError> {
        let mut feeds = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = parse_list_line(line).map_err(|err| {
                CaptureError::config(format!("feed list line {}: {}", index + 1, err))
            })?;
            feeds.push(defaults.feed(&entry.name, entry.kind, &entry.locator, entry.fps));
        }

        let kinds: Vec<SourceKind> = feeds.iter().map(|f| f.source.kind).collect();
        let capacity = defaults.capacity_for(&kinds);
        for feed in &mut feeds {
            feed.buffer = capacity;
        }

        let config = Self { feeds };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.feeds.is_empty() {
            return Err(CaptureError::config("at least one feed must be configured"));
        }
        let mut outputs = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            for name in feed.output_names() {
                if !outputs.insert(name) {
                    return Err(CaptureError::config(format!(
                        "output name '{}' is used more than once",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    fn from_file(
        file: ConfigFile,
        overrides: impl FnOnce(&mut FeedDefaults) -> Result<()>,
    ) -> Result<Self> {
        let mut defaults = FeedDefaults::default();
        let mut default_buffer = None;
        if let Some(d) = file.defaults {
            if let Some(buffer) = d.buffer {
                default_buffer = Some(buffer.resolve()?);
            }
            if let Some(reconnect) = d.reconnect {
                defaults.reconnect = reconnect;
            }
            if let Some(secs) = d.reconnect_grace_secs {
                defaults.grace_period = secs_to_duration(secs)?;
            }
            if let Some(height) = d.max_height {
                defaults.max_height = (height > 0).then_some(height);
            }
            if let Some(dir) = d.recording_dir {
                defaults.recording_dir = Some(dir);
            }
            if let Some(backend) = d.backend {
                defaults.backend = backend.parse()?;
            }
            defaults.high_watermark = d.high_watermark;
        }
        defaults.buffer = default_buffer;
        overrides(&mut defaults)?;

        let entries = file.feeds.unwrap_or_default();
        let kinds = entries
            .iter()
            .map(|entry| entry.source.parse())
            .collect::<Result<Vec<SourceKind>, _>>()?;
        let auto_capacity = defaults.capacity_for(&kinds);

        let mut feeds = Vec::with_capacity(entries.len());
        for (entry, kind) in entries.into_iter().zip(kinds) {
            let fps = FpsSetting::from_manual(entry.fps.unwrap_or(-1));
            let mut feed = defaults.feed(&entry.name, kind, &entry.locator, fps);
            feed.buffer = match entry.buffer {
                Some(buffer) => buffer.resolve()?,
                None => auto_capacity,
            };
            if let Some(bounds) = entry.crop {
                feed.crop = Some(CropRect::from_bounds(&bounds)?);
            }
            if let Some(limit) = entry.high_watermark {
                feed.high_watermark = Some(limit);
            }
            if let Some(reconnect) = entry.reconnect {
                feed.reconnect = reconnect;
            }
            if let Some(secs) = entry.reconnect_grace_secs {
                feed.grace_period = secs_to_duration(secs)?;
            }
            if let Some(backoff) = entry.backoff {
                feed.backoff = ReconnectBackoff::Exponential {
                    initial: Duration::from_millis(backoff.initial_ms),
                    max: Duration::from_millis(backoff.max_ms.max(backoff.initial_ms)),
                };
            }
            if let Some(height) = entry.max_height {
                feed.max_height = (height > 0).then_some(height);
            }
            if let Some(dir) = entry.recording_dir {
                feed.recording_dir = Some(dir);
            }
            if let Some(backend) = entry.backend {
                feed.source.backend = backend.parse()?;
            }
            for partition in entry.partitions.unwrap_or_default() {
                feed.partitions.push(Partition {
                    name: partition.name,
                    rect: CropRect::from_bounds(&partition.rect)?,
                });
            }
            feeds.push(feed);
        }

        let config = Self { feeds };
        config.validate()?;
        Ok(config)
    }
}

struct ListEntry {
    name: String,
    kind: SourceKind,
    locator: String,
    fps: FpsSetting,
}

fn parse_list_line(line: &str) -> Result<ListEntry, CaptureError> {
    let (name, rest) = line
        .split_once(',')
        .ok_or_else(|| CaptureError::config("expected name,sourcetype:path[,fps]"))?;
    let (source, fps) = match rest.rsplit_once(',') {
        Some((source, tail)) => {
            let fps = tail.trim().parse::<i64>().map_err(|_| {
                CaptureError::config(format!("fps '{}' is not an integer", tail.trim()))
            })?;
            (source, FpsSetting::from_manual(fps))
        }
        None => (rest, FpsSetting::Auto),
    };
    let (kind, locator) = source
        .split_once(':')
        .ok_or_else(|| CaptureError::config("source must be sourcetype:path"))?;
    Ok(ListEntry {
        name: name.trim().to_string(),
        kind: kind.parse()?,
        locator: locator.trim().to_string(),
        fps,
    })
}

fn secs_to_duration(secs: f64) -> Result<Duration, CaptureError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(CaptureError::config(
            "reconnect_grace_secs must be a non-negative number",
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

// ----------------------------------------------------------------------------
// TOML file layout
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    defaults: Option<DefaultsFile>,
    feeds: Option<Vec<FeedFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct DefaultsFile {
    buffer: Option<CapacityFile>,
    reconnect: Option<bool>,
    reconnect_grace_secs: Option<f64>,
    max_height: Option<u32>,
    recording_dir: Option<PathBuf>,
    backend: Option<String>,
    high_watermark: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FeedFile {
    name: String,
    source: String,
    locator: String,
    fps: Option<i64>,
    crop: Option<Vec<u32>>,
    buffer: Option<CapacityFile>,
    high_watermark: Option<usize>,
    reconnect: Option<bool>,
    reconnect_grace_secs: Option<f64>,
    backoff: Option<BackoffFile>,
    max_height: Option<u32>,
    recording_dir: Option<PathBuf>,
    backend: Option<String>,
    partitions: Option<Vec<PartitionFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CapacityFile {
    Frames(usize),
    Keyword(String),
}

impl CapacityFile {
    fn resolve(self) -> Result<BufferCapacity, CaptureError> {
        match self {
            Self::Frames(n) => BufferCapacity::frames(n)
                .ok_or_else(|| CaptureError::config("buffer capacity must be at least 1")),
            Self::Keyword(word) if word.eq_ignore_ascii_case("unbounded") => {
                Ok(BufferCapacity::Unbounded)
            }
            Self::Keyword(word) => Err(CaptureError::config(format!(
                "buffer must be a frame count or \"unbounded\", got '{}'",
                word
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BackoffFile {
    initial_ms: u64,
    max_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PartitionFile {
    name: String,
    rect: Vec<u32>,
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
