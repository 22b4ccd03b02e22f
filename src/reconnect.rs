//! Out-of-band recovery after sustained capture failure.
//!
//! Runs on its own thread so neither the manager nor other feeds wait on it.
//! Retries without an attempt cap; the feed's backoff policy only spaces the
//! attempts out. A stop request cancels recovery at the next attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture;
use crate::feed::{Feed, FeedState};
use crate::ingest::FrameSource;
use crate::recorder::Recorder;

const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Hand `feed` over to a reconnect thread. Called by the capture loop on its way out.
pub(crate) fn spawn(
    feed: Arc<Feed>,
    stale: Option<Box<dyn FrameSource>>,
    recorder: Option<Box<dyn Recorder>>,
) {
    feed.set_state(FeedState::Reconnecting);
    let spawned = feed.spawn_worker("reconnect", move |feed| run(feed, stale, recorder));
    if !spawned {
        feed.set_state(FeedState::Stopped);
    }
}

fn run(
    feed: Arc<Feed>,
    stale: Option<Box<dyn FrameSource>>,
    mut recorder: Option<Box<dyn Recorder>>,
) {
    if let Some(mut source) = stale {
        source.release();
    }
    // Nothing captured before the outage is delivered after it.
    feed.buffer.clear();

    let started = Instant::now();
    let mut attempt: u32 = 0;
    let mut last_log: Option<Instant> = None;

    loop {
        if feed.stop_requested() {
            if let Some(recorder) = recorder.as_mut() {
                recorder.finish();
            }
            feed.set_state(FeedState::Stopped);
            feed.log.info(format_args!("reconnect cancelled"));
            return;
        }

        attempt = attempt.saturating_add(1);
        match feed.open_source() {
            Ok(source) => {
                feed.buffer.clear();
                feed.record_reconnect();
                feed.log.info(format_args!(
                    "reconnected after {} attempt(s) in {:.1}s",
                    attempt,
                    started.elapsed().as_secs_f64()
                ));
                feed.set_state(FeedState::Capturing);
                capture::resume(feed, source, recorder);
                return;
            }
            Err(err) => {
                let now = Instant::now();
                if last_log.map_or(true, |last| now.duration_since(last) >= LOG_INTERVAL) {
                    feed.log.warn(format_args!(
                        "reconnect attempt {} failed: {}",
                        attempt, err
                    ));
                    last_log = Some(now);
                }
            }
        }

        let delay = feed.config.backoff.delay(attempt);
        if delay.is_zero() {
            std::thread::yield_now();
        } else {
            feed.sleep_unless_stopped(delay);
        }
    }
}
