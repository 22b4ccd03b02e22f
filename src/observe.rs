//! Per-feed logging handle.
//!
//! Feeds do not log through a bare global target. Each feed gets a `FeedLog`
//! at construction carrying the manager's log target and the feed name, and
//! every record it emits is tagged with both.

use std::fmt;
use std::sync::Arc;

pub const DEFAULT_LOG_TARGET: &str = "feedcap";

#[derive(Clone, Debug)]
pub struct FeedLog {
    target: Arc<str>,
    feed: Arc<str>,
}

impl FeedLog {
    pub fn new(target: &str, feed: &str) -> Self {
        Self {
            target: Arc::from(target),
            feed: Arc::from(feed),
        }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        log::error!(target: &*self.target, "[{}] {}", self.feed, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        log::warn!(target: &*self.target, "[{}] {}", self.feed, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        log::info!(target: &*self.target, "[{}] {}", self.feed, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        log::debug!(target: &*self.target, "[{}] {}", self.feed, args);
    }
}
