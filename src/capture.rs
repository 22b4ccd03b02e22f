//! Per-feed acquisition loop.
//!
//! Each iteration either backs off under backpressure, or grabs one frame
//! and pushes it (cropped and scaled) into the feed's buffer. Failed grabs
//! drive a countdown; once it outlasts the grace period the loop hands the
//! feed to the reconnector, or stops it when reconnection is disabled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CaptureError;
use crate::feed::{Feed, FeedState};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::reconnect;
use crate::recorder::Recorder;

/// Pause while the buffer sits above its high-watermark.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(10);
/// Pause after a failed grab, before the grace period runs out.
const FAILURE_PAUSE: Duration = Duration::from_millis(5);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Start capture on its own thread. The source is opened there if not given.
pub(crate) fn launch(feed: &Arc<Feed>, source: Option<Box<dyn FrameSource>>) {
    let spawned = feed.spawn_worker("capture", move |feed| {
        let source = match source {
            Some(source) => Some(source),
            None => match feed.open_source() {
                Ok(source) => Some(source),
                Err(err) => {
                    // Reads fail until the reconnector gets a working source.
                    feed.log.warn(format_args!("initial open failed: {}", err));
                    None
                }
            },
        };
        let recorder = source.as_ref().and_then(|_| feed.create_recorder());
        CaptureLoop::new(feed, source, recorder).run();
    });
    if !spawned {
        feed.set_state(FeedState::Stopped);
    }
}

/// Continue capture on the calling (reconnect) thread with a fresh source.
pub(crate) fn resume(
    feed: Arc<Feed>,
    source: Box<dyn FrameSource>,
    recorder: Option<Box<dyn Recorder>>,
) {
    let recorder = recorder.or_else(|| feed.create_recorder());
    CaptureLoop::new(feed, Some(source), recorder).run();
}

// ----------------------------------------------------------------------------
// Failure countdown
// ----------------------------------------------------------------------------

/// Tracks one run of consecutive failed grabs.
#[derive(Debug, Default)]
pub(crate) struct FailureCountdown {
    since: Option<Instant>,
    last_report: Option<Instant>,
}

impl FailureCountdown {
    /// Register a failure. Returns `true` on the first failure of a run.
    pub(crate) fn fail(&mut self, now: Instant) -> bool {
        if self.since.is_some() {
            return false;
        }
        self.since = Some(now);
        self.last_report = Some(now);
        true
    }

    /// Clear the run. Returns `true` if a run was in progress.
    pub(crate) fn clear(&mut self) -> bool {
        self.last_report = None;
        self.since.take().is_some()
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        self.since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    pub(crate) fn expired(&self, now: Instant, grace: Duration) -> bool {
        self.since.is_some() && self.elapsed(now) > grace
    }

    /// `true` at most once per `REPORT_INTERVAL` while a run is in progress.
    pub(crate) fn should_report(&mut self, now: Instant) -> bool {
        match self.last_report {
            Some(last) if now.saturating_duration_since(last) >= REPORT_INTERVAL => {
                self.last_report = Some(now);
                true
            }
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Loop
// ----------------------------------------------------------------------------

enum LoopExit {
    Stopped,
    Reconnect,
}

pub(crate) struct CaptureLoop {
    feed: Arc<Feed>,
    source: Option<Box<dyn FrameSource>>,
    recorder: Option<Box<dyn Recorder>>,
    countdown: FailureCountdown,
    /// Whether a sink failure was already reported at warn level in this run.
    sink_failed: bool,
}

impl CaptureLoop {
    pub(crate) fn new(
        feed: Arc<Feed>,
        source: Option<Box<dyn FrameSource>>,
        recorder: Option<Box<dyn Recorder>>,
    ) -> Self {
        Self {
            feed,
            source,
            recorder,
            countdown: FailureCountdown::default(),
            sink_failed: false,
        }
    }

    pub(crate) fn run(mut self) {
        match self.capture() {
            LoopExit::Stopped => {
                if let Some(mut source) = self.source.take() {
                    source.release();
                }
                if let Some(mut recorder) = self.recorder.take() {
                    recorder.finish();
                }
                self.feed.set_state(FeedState::Stopped);
                self.feed.log.info(format_args!("capture stopped"));
            }
            LoopExit::Reconnect => {
                reconnect::spawn(self.feed, self.source, self.recorder);
            }
        }
    }

    fn capture(&mut self) -> LoopExit {
        let high_watermark = self.feed.config.effective_high_watermark();
        let grace = self.feed.config.grace_period;

        loop {
            if self.feed.stop_requested() {
                return LoopExit::Stopped;
            }

            if let Some(limit) = high_watermark {
                if self.feed.buffer.occupancy() > limit {
                    self.feed.sleep_unless_stopped(BACKPRESSURE_PAUSE);
                    continue;
                }
            }

            match self.grab() {
                Ok(frame) => {
                    self.deliver(frame);
                    let interval = self.feed.current_metadata().frame_interval();
                    self.feed.sleep_unless_stopped(interval);
                    continue;
                }
                Err(err) => self.on_failure(err),
            }

            let now = Instant::now();
            if self.countdown.expired(now, grace) {
                if self.feed.config.reconnect {
                    self.feed.log.warn(format_args!(
                        "no frames for {:.1}s, reconnecting",
                        self.countdown.elapsed(now).as_secs_f64()
                    ));
                    return LoopExit::Reconnect;
                }
                if self.feed.buffer.is_empty() {
                    self.feed.log.warn(format_args!(
                        "no frames for {:.1}s and reconnect disabled, stopping",
                        self.countdown.elapsed(now).as_secs_f64()
                    ));
                    self.feed.request_stop();
                    return LoopExit::Stopped;
                }
                // Let the consumer drain what is left before stopping.
                self.feed.sleep_unless_stopped(BACKPRESSURE_PAUSE);
                continue;
            }

            self.feed.sleep_unless_stopped(FAILURE_PAUSE);
        }
    }

    /// Read one frame and shape it for the consumer.
    fn grab(&mut self) -> Result<Frame, CaptureError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| CaptureError::TransientRead("no open source".into()))?;
        let frame = source
            .read_frame()?
            .ok_or_else(|| CaptureError::TransientRead("no frame available".into()))?;

        let frame = match self.feed.config.crop {
            Some(rect) => frame.crop(rect).ok_or_else(|| {
                CaptureError::TransientRead(format!(
                    "crop {:?} lies outside the {}x{} frame",
                    rect,
                    frame.width(),
                    frame.height()
                ))
            })?,
            None => frame,
        };
        Ok(match self.feed.config.capture_max_height() {
            Some(max) => frame.fit_height(max),
            None => frame,
        })
    }

    fn deliver(&mut self, frame: Frame) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(err) = recorder.write(&frame) {
                if self.sink_failed {
                    self.feed.log.debug(format_args!("{}", err));
                } else {
                    self.feed.log.warn(format_args!("{}", err));
                    self.sink_failed = true;
                }
            }
        }

        let evicted = self.feed.buffer.push(frame);
        self.feed.record_captured(evicted);

        if self.countdown.clear() {
            self.feed.log.info(format_args!("frames flowing again"));
        }
        if self.feed.state() != FeedState::Capturing {
            self.feed.set_state(FeedState::Capturing);
        }
    }

    fn on_failure(&mut self, err: CaptureError) {
        let now = Instant::now();
        if self.countdown.fail(now) {
            self.feed.set_state(FeedState::Degraded { since: now });
            self.feed.log.warn(format_args!("read failed: {}", err));
        } else if self.countdown.should_report(now) {
            self.feed.log.info(format_args!(
                "still failing after {:.1}s (grace {:.1}s): {}",
                self.countdown.elapsed(now).as_secs_f64(),
                self.feed.config.grace_period.as_secs_f64(),
                err
            ));
        }
    }
}
