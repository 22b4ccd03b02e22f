//! Multi-feed aggregator.
//!
//! `FeedManager` owns every configured feed and exposes one synchronized,
//! non-blocking read across all of them. Outputs are reported in
//! configuration order: one per feed, or one per partition for feeds that
//! declare partitions.

use std::sync::{Arc, Mutex};

use crate::config::ManagerConfig;
use crate::error::CaptureError;
use crate::feed::{lock, Feed, FeedState, FeedStats};
use crate::frame::Frame;
use crate::ingest::{Connector, DefaultConnector};
use crate::metadata::FeedInfo;
use crate::observe::DEFAULT_LOG_TARGET;
use crate::recorder::{JpegSequenceFactory, RecorderFactory};

pub struct FeedManager {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    recorders: Arc<dyn RecorderFactory>,
    log_target: String,
    feeds: Vec<Arc<Feed>>,
    /// Serializes start/stop.
    running: Mutex<bool>,
}

impl FeedManager {
    /// Validate `config` against `connector` and build every feed (all Stopped).
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Result<Self, CaptureError> {
        config.validate()?;
        for feed in &config.feeds {
            connector.validate(&feed.source).map_err(|err| match err {
                CaptureError::Configuration(msg) => {
                    CaptureError::config(format!("feed '{}': {}", feed.name, msg))
                }
                other => other,
            })?;
        }
        let mut manager = Self {
            config,
            connector,
            recorders: Arc::new(JpegSequenceFactory),
            log_target: DEFAULT_LOG_TARGET.to_string(),
            feeds: Vec::new(),
            running: Mutex::new(false),
        };
        manager.rebuild_feeds();
        Ok(manager)
    }

    /// Manager using the built-in source backends.
    pub fn with_default_connector(config: ManagerConfig) -> Result<Self, CaptureError> {
        Self::new(config, Arc::new(DefaultConnector))
    }

    pub fn with_recorders(mut self, recorders: Arc<dyn RecorderFactory>) -> Self {
        self.recorders = recorders;
        self.rebuild_feeds();
        self
    }

    /// Log target used by every feed of this manager.
    pub fn with_log_target(mut self, target: &str) -> Self {
        self.log_target = target.to_string();
        self.rebuild_feeds();
        self
    }

    fn rebuild_feeds(&mut self) {
        self.feeds = self
            .config
            .feeds
            .iter()
            .map(|config| {
                Arc::new(Feed::new(
                    config.clone(),
                    Arc::clone(&self.connector),
                    Arc::clone(&self.recorders),
                    &self.log_target,
                ))
            })
            .collect();
    }

    /// Start capture on every stopped feed. Never blocks on opening sources.
    pub fn start(&self) {
        let mut running = lock(&self.running);
        for feed in &self.feeds {
            feed.start();
        }
        if !*running {
            log::info!(target: &*self.log_target, "started {} feed(s)", self.feeds.len());
        }
        *running = true;
    }

    /// Stop every feed, releasing sources and recorders and clearing buffers.
    pub fn stop(&self) {
        let mut running = lock(&self.running);
        for feed in &self.feeds {
            feed.stop();
        }
        if *running {
            log::info!(target: &*self.log_target, "stopped {} feed(s)", self.feeds.len());
        }
        *running = false;
    }

    /// One slot per output; `None` when that output has no frame right now.
    pub fn read(&self) -> Vec<Option<Frame>> {
        let mut frames = Vec::with_capacity(self.output_count());
        for feed in &self.feeds {
            let frame = feed.pop();
            let partitions = &feed.config.partitions;
            if partitions.is_empty() {
                frames.push(frame);
                continue;
            }
            // Buffered frames of partitioned feeds are unscaled.
            let max_height = feed.config.max_height;
            match frame {
                Some(frame) => frames.extend(partitions.iter().map(|p| {
                    let part = frame.crop(p.rect)?;
                    Some(match max_height {
                        Some(max) => part.fit_height(max),
                        None => part,
                    })
                })),
                None => frames.extend(partitions.iter().map(|_| None)),
            }
        }
        frames
    }

    /// Per-output metadata, opening sources of never-started feeds on demand.
    pub fn metadata(&self) -> Vec<FeedInfo> {
        self.feeds.iter().flat_map(|feed| feed.info()).collect()
    }

    /// State of each physical feed.
    pub fn states(&self) -> Vec<FeedState> {
        self.feeds.iter().map(|feed| feed.state()).collect()
    }

    pub fn stats(&self) -> Vec<FeedStats> {
        self.feeds.iter().map(|feed| feed.stats()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.config
            .feeds
            .iter()
            .flat_map(|feed| feed.output_names())
            .collect()
    }

    fn output_count(&self) -> usize {
        self.config
            .feeds
            .iter()
            .map(|feed| feed.partitions.len().max(1))
            .sum()
    }
}

impl Drop for FeedManager {
    fn drop(&mut self) {
        for feed in &self.feeds {
            feed.stop();
        }
    }
}
