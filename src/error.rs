//! Error taxonomy for the capture engine.
//!
//! Only `Configuration` is ever surfaced to the caller of `FeedManager::new`.
//! Everything else is absorbed into per-feed state by the capture and
//! reconnect workers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Source could not be opened. The reconnector retries these forever.
    #[error("cannot open {locator}: {reason}")]
    Connection { locator: String, reason: String },

    /// A single grab failed. Feeds the failure countdown.
    #[error("frame read failed: {0}")]
    TransientRead(String),

    /// Malformed configuration. Fails fast at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Recording sink rejected a frame. Logged and swallowed.
    #[error("recording write failed: {0}")]
    SinkWrite(String),
}

impl CaptureError {
    pub fn connection(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
