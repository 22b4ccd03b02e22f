//! Feed capture kernel
//!
//! This crate ingests several simultaneous video feeds, each from a
//! potentially unreliable source, and gives a consumer non-blocking,
//! bounded-latency access to the newest frames of every feed while
//! recovering from connectivity loss on its own.
//!
//! # Architecture
//!
//! Every feed runs independently:
//!
//! 1. **Capture loop**: one thread per feed pulls frames from a `FrameSource`,
//!    applies the crop and max-height, and pushes them into the feed's buffer.
//! 2. **Buffer**: bounded FIFO that evicts the oldest frame when full.
//! 3. **Failure countdown**: sustained read failure past the grace period
//!    hands the feed to the reconnector (or stops it if reconnect is off).
//! 4. **Reconnector**: transient thread that reopens the source, empties the
//!    buffer and resumes capture.
//! 5. **Manager**: composes the feeds into one synchronized `read()`.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and `CropRect`
//! - `buffer`: per-feed `FrameBuffer`
//! - `ingest`: `FrameSource`/`Connector` and the source backends
//! - `config`: feed and manager configuration (TOML, bulk list, env)
//! - `manager`: `FeedManager`
//! - `recorder`: optional recording sink

pub mod buffer;
mod capture;
pub mod config;
pub mod error;
mod feed;
pub mod frame;
pub mod ingest;
pub mod manager;
pub mod metadata;
pub mod observe;
mod reconnect;
pub mod recorder;

pub use buffer::{BufferCapacity, FrameBuffer};
pub use config::{
    Backend, FeedConfig, FeedDefaults, FpsSetting, ManagerConfig, Partition, ReconnectBackoff,
    SourceKind, SourceSpec,
};
pub use error::CaptureError;
pub use feed::{FeedState, FeedStats};
pub use frame::{CropRect, Frame};
pub use ingest::{Connector, DefaultConnector, FrameSource, SourceProperty};
pub use manager::FeedManager;
pub use metadata::{FeedInfo, Metadata};
pub use observe::FeedLog;
pub use recorder::{JpegSequenceFactory, JpegSequenceRecorder, Recorder, RecorderFactory};
