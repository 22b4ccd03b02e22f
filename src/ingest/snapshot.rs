//! Still-snapshot frame source.
//!
//! Instead of decoding a stream continuously, every read takes one fresh
//! still image:
//! - `file` sources re-read a local image that another process keeps updating
//! - `http`/`https` sources fetch a JPEG snapshot endpoint (feature: snapshot-http)
//!
//! This is slower than direct decoding but never yields half-decoded frames,
//! which makes it the fallback for streams that produce artifacts. The
//! first snapshot is taken at open time so the dimensions are known up front
//! and an unreachable locator fails the open.

use image::GenericImageView;
use std::path::PathBuf;

use super::{FrameSource, SourceProperty};
use crate::config::{SourceKind, SourceSpec};
use crate::error::CaptureError;
use crate::frame::Frame;

#[cfg(feature = "snapshot-http")]
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

enum SnapshotFetch {
    File(PathBuf),
    #[cfg(feature = "snapshot-http")]
    Http(String),
}

pub struct SnapshotSource {
    locator: String,
    fetch: SnapshotFetch,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Snapshot taken at open time, handed out by the first read.
    primed: Option<Frame>,
    released: bool,
}

pub(crate) fn validate(spec: &SourceSpec) -> Result<(), CaptureError> {
    match spec.kind {
        SourceKind::File => Ok(()),
        #[cfg(feature = "snapshot-http")]
        SourceKind::Http | SourceKind::Https => Ok(()),
        #[cfg(not(feature = "snapshot-http"))]
        SourceKind::Http | SourceKind::Https => Err(CaptureError::config(
            "http snapshots require the snapshot-http feature",
        )),
        other => Err(CaptureError::config(format!(
            "snapshot backend supports file and http sources, not {}",
            other.as_str()
        ))),
    }
}

impl SnapshotSource {
    pub fn open(spec: &SourceSpec) -> Result<Self, CaptureError> {
        validate(spec)?;
        let fetch = match spec.kind {
            #[cfg(feature = "snapshot-http")]
            SourceKind::Http | SourceKind::Https => SnapshotFetch::Http(spec.locator.clone()),
            _ => SnapshotFetch::File(PathBuf::from(&spec.locator)),
        };

        let mut source = Self {
            locator: spec.locator.clone(),
            fetch,
            width: 0,
            height: 0,
            frame_count: 0,
            primed: None,
            released: false,
        };
        let first = source
            .take_snapshot()
            .map_err(|err| CaptureError::connection(spec.locator.clone(), err))?;
        source.width = first.width();
        source.height = first.height();
        source.primed = Some(first);

        log::info!(
            "SnapshotSource: opened {} ({}x{})",
            source.locator,
            source.width,
            source.height
        );
        Ok(source)
    }

    fn take_snapshot(&mut self) -> Result<Frame, CaptureError> {
        let bytes = match &self.fetch {
            SnapshotFetch::File(path) => std::fs::read(path).map_err(|e| {
                CaptureError::TransientRead(format!("read snapshot {}: {}", path.display(), e))
            })?,
            #[cfg(feature = "snapshot-http")]
            SnapshotFetch::Http(url) => fetch_http_snapshot(url)?,
        };
        if bytes.is_empty() {
            return Err(CaptureError::TransientRead("empty snapshot".into()));
        }
        self.frame_count += 1;
        decode_still(&bytes, self.frame_count)
    }
}

impl FrameSource for SnapshotSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Err(CaptureError::TransientRead(format!(
                "snapshot source {} released",
                self.locator
            )));
        }
        if let Some(frame) = self.primed.take() {
            return Ok(Some(frame));
        }
        self.take_snapshot().map(Some)
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::Width => Some(self.width as f64),
            SourceProperty::Height => Some(self.height as f64),
            // Snapshots have no native rate.
            SourceProperty::Fps => None,
        }
    }

    fn release(&mut self) {
        self.primed = None;
        self.released = true;
    }
}

fn decode_still(bytes: &[u8], sequence: u64) -> Result<Frame, CaptureError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| CaptureError::TransientRead(format!("decode snapshot: {}", e)))?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Frame::new(rgb.into_raw(), width, height, sequence)
}

#[cfg(feature = "snapshot-http")]
fn fetch_http_snapshot(url: &str) -> Result<Vec<u8>, CaptureError> {
    use std::io::Read;

    let response = ureq::get(url)
        .call()
        .map_err(|e| CaptureError::TransientRead(format!("fetch snapshot from {}: {}", url, e)))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_SNAPSHOT_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| CaptureError::TransientRead(format!("read snapshot body: {}", e)))?;
    Ok(bytes)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
