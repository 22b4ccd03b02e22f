//! One physical feed: its buffer, state, counters and worker chain.
//!
//! Workers form a chain. The capture thread hands off to a reconnect thread,
//! which in turn resumes capture; every worker stores its successor's
//! `JoinHandle` in the feed's worker slot before it exits, so `stop()` can
//! join the whole chain by draining the slot until it stays empty.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::FrameBuffer;
use crate::capture;
use crate::config::FeedConfig;
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::{Connector, FrameSource};
use crate::metadata::{FeedInfo, Metadata};
use crate::observe::FeedLog;
use crate::recorder::{Recorder, RecorderFactory};

/// Longest uninterrupted sleep; stop requests are noticed within this slice.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    Stopped,
    Capturing,
    /// Reads are failing; the countdown started at `since`.
    Degraded { since: Instant },
    Reconnecting,
}

impl FeedState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Capturing => write!(f, "capturing"),
            Self::Degraded { since } => write!(f, "degraded ({:.1}s)", since.elapsed().as_secs_f64()),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Counters for one physical feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedStats {
    pub name: String,
    pub state: FeedState,
    pub frames_captured: u64,
    /// Frames evicted from a full buffer before anyone read them.
    pub frames_dropped: u64,
    pub reconnects: u64,
    pub buffered: usize,
}

pub(crate) struct Feed {
    pub(crate) config: FeedConfig,
    pub(crate) buffer: FrameBuffer,
    pub(crate) connector: Arc<dyn Connector>,
    recorders: Arc<dyn RecorderFactory>,
    pub(crate) log: FeedLog,
    stop: AtomicBool,
    state: Mutex<FeedState>,
    metadata: Mutex<Metadata>,
    /// Source opened by `metadata()` before start; handed to the first capture loop.
    pending: Mutex<Option<Box<dyn FrameSource>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects: AtomicU64,
}

/// Lock ignoring poison. A panicked worker must not make `read`/`stop` fail.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Feed {
    pub(crate) fn new(
        config: FeedConfig,
        connector: Arc<dyn Connector>,
        recorders: Arc<dyn RecorderFactory>,
        log_target: &str,
    ) -> Self {
        let log = FeedLog::new(log_target, &config.name);
        Self {
            buffer: FrameBuffer::new(config.buffer),
            config,
            connector,
            recorders,
            log,
            stop: AtomicBool::new(false),
            state: Mutex::new(FeedState::Stopped),
            metadata: Mutex::new(Metadata::default()),
            pending: Mutex::new(None),
            worker: Mutex::new(None),
            frames_captured: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub(crate) fn state(&self) -> FeedState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: FeedState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Sleep up to `duration` in short slices. Returns `false` if a stop was
    /// requested before the time elapsed.
    pub(crate) fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    pub(crate) fn stats(&self) -> FeedStats {
        FeedStats {
            name: self.config.name.clone(),
            state: self.state(),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            buffered: self.buffer.occupancy(),
        }
    }

    pub(crate) fn record_captured(&self, evicted: bool) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Sources, metadata and recording
    // ------------------------------------------------------------------------

    pub(crate) fn current_metadata(&self) -> Metadata {
        *lock(&self.metadata)
    }

    /// Open the configured source and refresh the metadata from it.
    pub(crate) fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        let source = self.connector.open(&self.config.source)?;
        let metadata = Metadata::derive(&self.config, source.as_ref());
        *lock(&self.metadata) = metadata;
        self.log.info(format_args!(
            "opened {} ({}x{} @ {:.2} fps)",
            self.config.source.locator, metadata.width, metadata.height, metadata.fps
        ));
        Ok(source)
    }

    /// Recorder for this feed, when recording is configured and the metadata is known.
    pub(crate) fn create_recorder(&self) -> Option<Box<dyn Recorder>> {
        let dir = self.config.recording_dir.as_ref()?;
        let metadata = self.current_metadata();
        if !metadata.initialized {
            return None;
        }
        match self.recorders.create(&self.config.name, dir, &metadata) {
            Ok(recorder) => Some(recorder),
            Err(err) => {
                self.log
                    .warn(format_args!("recording disabled for this run: {}", err));
                None
            }
        }
    }

    /// Per-output info, opening the source on demand if nothing is known yet.
    pub(crate) fn info(&self) -> Vec<FeedInfo> {
        if !self.current_metadata().initialized {
            // `start()` changes state under this lock, so a source opened here
            // is always seen by the capture loop it launches.
            let mut pending = lock(&self.pending);
            if self.state() == FeedState::Stopped && pending.is_none() {
                match self.open_source() {
                    Ok(source) => *pending = Some(source),
                    Err(err) => self
                        .log
                        .warn(format_args!("metadata unavailable: {}", err)),
                }
            }
        }
        FeedInfo::for_outputs(&self.config, &self.current_metadata())
    }

    pub(crate) fn pop(&self) -> Option<Frame> {
        self.buffer.pop_if_available()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Launch the capture loop. No-op unless the feed is stopped.
    pub(crate) fn start(self: &Arc<Self>) {
        if self.state() != FeedState::Stopped {
            return;
        }
        // A feed that stopped itself leaves its finished worker behind.
        self.join_workers();
        self.stop.store(false, Ordering::SeqCst);
        let source = {
            let mut pending = lock(&self.pending);
            self.set_state(FeedState::Capturing);
            pending.take()
        };
        capture::launch(self, source);
    }

    /// Stop capture and reconnection and wait for the worker chain to exit.
    pub(crate) fn stop(&self) {
        self.request_stop();
        self.join_workers();
        if let Some(mut source) = lock(&self.pending).take() {
            source.release();
        }
        let discarded = self.buffer.clear();
        if discarded > 0 {
            self.log
                .debug(format_args!("discarded {} buffered frames", discarded));
        }
        self.set_state(FeedState::Stopped);
    }

    fn join_workers(&self) {
        loop {
            // Take without holding the lock while joining: the worker may be
            // about to store its successor.
            let handle = lock(&self.worker).take();
            let Some(handle) = handle else {
                break;
            };
            if handle.join().is_err() {
                self.log.error(format_args!("worker thread panicked"));
            }
        }
    }

    /// Spawn a worker thread named `<role>-<feed>` and make it the feed's
    /// current worker.
    ///
    /// The slot stays locked across the spawn so the new thread cannot store
    /// its own successor before its handle is recorded.
    pub(crate) fn spawn_worker<F>(self: &Arc<Self>, role: &str, body: F) -> bool
    where
        F: FnOnce(Arc<Feed>) + Send + 'static,
    {
        let mut slot = lock(&self.worker);
        let feed = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", role, self.config.name))
            .spawn(move || body(feed));
        match spawned {
            Ok(handle) => {
                // Replacing our own handle detaches it; the caller is about to exit.
                *slot = Some(handle);
                true
            }
            Err(err) => {
                self.log
                    .error(format_args!("failed to spawn {} thread: {}", role, err));
                false
            }
        }
    }
}
