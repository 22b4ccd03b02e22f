//! Best-effort recording of captured frames.
//!
//! A `RecorderFactory` creates one `Recorder` per feed when the feed's
//! source is first opened and its metadata is known. The recorder lives
//! across reconnects and is finished when the feed stops. Write failures
//! never interrupt capture; the capture loop logs and drops them.

use image::codecs::jpeg::JpegEncoder;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::CaptureError;
use crate::frame::Frame;
use crate::metadata::Metadata;

const JPEG_QUALITY: u8 = 90;

pub trait Recorder: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), CaptureError>;

    /// Flush and close. Called once when the feed stops.
    fn finish(&mut self) {}
}

pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        feed: &str,
        dir: &Path,
        metadata: &Metadata,
    ) -> Result<Box<dyn Recorder>, CaptureError>;
}

/// Name of the recording for `feed` started now: `orig_<feed>_<YYYY_MM_DD_HH-MM-SS>`.
pub fn recording_name(feed: &str) -> String {
    format!(
        "orig_{}_{}",
        feed,
        chrono::Local::now().format("%Y_%m_%d_%H-%M-%S")
    )
}

// ----------------------------------------------------------------------------
// JPEG sequence
// ----------------------------------------------------------------------------

/// Writes each frame as `<n>.jpg` into a per-recording directory, where `n`
/// counts frames written by this recorder. Source sequence numbers restart
/// on every reopen, so they cannot name files.
pub struct JpegSequenceRecorder {
    dir: PathBuf,
    written: u64,
}

impl JpegSequenceRecorder {
    pub fn create(root: &Path, feed: &str) -> Result<Self, CaptureError> {
        let dir = root.join(recording_name(feed));
        fs::create_dir_all(&dir).map_err(|e| {
            CaptureError::SinkWrite(format!("create recording dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}

impl Recorder for JpegSequenceRecorder {
    fn write(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let image = frame
            .to_rgb_image()
            .ok_or_else(|| CaptureError::SinkWrite("frame has inconsistent dimensions".into()))?;
        let path = self.dir.join(format!("{:08}.jpg", self.written + 1));
        let file = File::create(&path)
            .map_err(|e| CaptureError::SinkWrite(format!("create {}: {}", path.display(), e)))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
        encoder
            .encode_image(&image)
            .map_err(|e| CaptureError::SinkWrite(format!("encode {}: {}", path.display(), e)))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) {
        log::debug!(
            "JpegSequenceRecorder: {} frames in {}",
            self.written,
            self.dir.display()
        );
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JpegSequenceFactory;

impl RecorderFactory for JpegSequenceFactory {
    fn create(
        &self,
        feed: &str,
        dir: &Path,
        _metadata: &Metadata,
    ) -> Result<Box<dyn Recorder>, CaptureError> {
        Ok(Box::new(JpegSequenceRecorder::create(dir, feed)?))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
