//! Frame ingestion sources.
//!
//! This module provides the `FrameSource` capability and its realizations:
//! - Synthetic `stub://` source (testing, demos)
//! - Direct decode via GStreamer (feature: backend-gstreamer)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Still snapshots of a local image or an HTTP endpoint (http needs feature: snapshot-http)
//!
//! The capture engine never knows which realization it is talking to. A
//! `Connector` turns a `SourceSpec` into an open `FrameSource`; the default
//! connector picks the realization from the feed's configured backend.
//!
//! All sources produce RGB24 `Frame`s.

#[cfg(feature = "backend-gstreamer")]
pub mod gstreamer;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod snapshot;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use snapshot::SnapshotSource;
pub use synthetic::SyntheticSource;

use crate::config::{Backend, SourceKind, SourceSpec};
use crate::error::CaptureError;
use crate::frame::Frame;

/// Stream properties a source may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceProperty {
    Width,
    Height,
    /// Declared frame rate.
    Fps,
}

/// An open source of frames.
pub trait FrameSource: Send {
    /// Grab the next frame.
    ///
    /// `Ok(None)` means no frame was available this time (stall, end of
    /// stream). Errors are transient from the capture loop's point of view.
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// `None` when the source does not know the value.
    fn property(&self, property: SourceProperty) -> Option<f64>;

    /// Release the underlying handle. Reads after release fail.
    fn release(&mut self);
}

/// Opens sources for a feed. Called again by the reconnector after failures.
pub trait Connector: Send + Sync {
    /// Construction-time check that this connector can serve `spec` at all.
    fn validate(&self, _spec: &SourceSpec) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Open `spec`. Unreachable or invalid locators fail with `CaptureError::Connection`.
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Connector that dispatches on the configured backend and source kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConnector;

impl DefaultConnector {
    fn is_stub(spec: &SourceSpec) -> bool {
        spec.kind == SourceKind::Stub || spec.locator.starts_with("stub://")
    }
}

impl Connector for DefaultConnector {
    fn validate(&self, spec: &SourceSpec) -> Result<(), CaptureError> {
        if Self::is_stub(spec) {
            return synthetic::validate_locator(&spec.locator);
        }
        match spec.backend {
            Backend::Snapshot => snapshot::validate(spec),
            Backend::Direct => direct_supported(spec.kind),
        }
    }

    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
        if Self::is_stub(spec) {
            return Ok(Box::new(SyntheticSource::open(&spec.locator)?));
        }
        match spec.backend {
            Backend::Snapshot => Ok(Box::new(SnapshotSource::open(spec)?)),
            Backend::Direct => open_direct(spec),
        }
    }
}

fn direct_supported(kind: SourceKind) -> Result<(), CaptureError> {
    #[cfg(feature = "ingest-v4l2")]
    {
        if kind == SourceKind::Usb {
            return Ok(());
        }
    }
    #[cfg(feature = "backend-gstreamer")]
    {
        let _ = kind;
        Ok(())
    }
    #[cfg(not(feature = "backend-gstreamer"))]
    {
        Err(CaptureError::config(format!(
            "direct decoding of {} sources requires the backend-gstreamer feature",
            kind.as_str()
        )))
    }
}

fn open_direct(spec: &SourceSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
    #[cfg(feature = "ingest-v4l2")]
    {
        if spec.kind == SourceKind::Usb {
            return Ok(Box::new(v4l2::V4l2Source::open(spec)?));
        }
    }
    #[cfg(feature = "backend-gstreamer")]
    {
        Ok(Box::new(gstreamer::GstreamerSource::open(spec)?))
    }
    #[cfg(not(feature = "backend-gstreamer"))]
    {
        direct_supported(spec.kind)?;
        Err(CaptureError::connection(
            spec.locator.clone(),
            "no direct backend available",
        ))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
