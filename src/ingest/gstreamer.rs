//! Direct-decode frame source using GStreamer.
//!
//! One pipeline per feed: `<source> ! decodebin ! videoconvert ! appsink`,
//! with the appsink constrained to RGB. Live sources drop stale buffers in
//! the appsink; file sources keep them so nothing is skipped.
//!
//! Bus errors surface as read errors; end-of-stream and pull timeouts read
//! as "no frame". Both feed the capture loop's failure countdown.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{FrameSource, SourceProperty};
use crate::config::{SourceKind, SourceSpec};
use crate::error::CaptureError;
use crate::frame::{Frame, CHANNELS};

/// How long `open` waits for the first decoded frame.
const OPEN_TIMEOUT_MS: u64 = 10_000;
/// Upper bound for a single grab.
const PULL_TIMEOUT_MS: u64 = 500;

pub struct GstreamerSource {
    locator: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
    fps: Option<f64>,
    frame_count: u64,
    /// First frame, pulled during `open` to learn the caps.
    primed: Option<Frame>,
    released: bool,
}

impl GstreamerSource {
    pub fn open(spec: &SourceSpec) -> Result<Self, CaptureError> {
        let conn = |reason: &dyn std::fmt::Display| {
            CaptureError::connection(spec.locator.clone(), reason.to_string())
        };

        gst::init().map_err(|e| conn(&e))?;

        let description = pipeline_description(spec)?;
        let pipeline = gst::parse::launch(&description)
            .map_err(|e| conn(&e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| conn(&"pipeline description did not produce a pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| conn(&"appsink element missing from pipeline"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| conn(&"appsink element has unexpected type"))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_sync(false);
        if spec.kind.is_finite() {
            appsink.set_max_buffers(4);
            appsink.set_drop(false);
        } else {
            appsink.set_max_buffers(1);
            appsink.set_drop(true);
        }

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| conn(&e))?;

        let mut source = Self {
            locator: spec.locator.clone(),
            pipeline,
            appsink,
            width: 0,
            height: 0,
            fps: None,
            frame_count: 0,
            primed: None,
            released: false,
        };

        let sample = source
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(OPEN_TIMEOUT_MS));
        let sample = match sample {
            Some(sample) => sample,
            None => {
                let reason = source
                    .poll_bus()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no video within the open timeout".to_string());
                source.release();
                return Err(conn(&reason));
            }
        };

        let info = video_info(&sample).map_err(|e| conn(&e))?;
        source.width = info.width();
        source.height = info.height();
        let fps = info.fps();
        if fps.numer() > 0 && fps.denom() > 0 {
            source.fps = Some(fps.numer() as f64 / fps.denom() as f64);
        }
        let frame = source.sample_to_frame(&sample).map_err(|e| conn(&e))?;
        source.primed = Some(frame);

        log::info!(
            "GstreamerSource: opened {} ({}x{} @ {:?} fps)",
            source.locator,
            source.width,
            source.height,
            source.fps
        );
        Ok(source)
    }

    fn poll_bus(&mut self) -> Result<(), CaptureError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gst::ClockTime::ZERO) {
            if let gst::MessageView::Error(err) = message.view() {
                return Err(CaptureError::TransientRead(format!(
                    "gstreamer error on {}: {}",
                    self.locator,
                    err.error()
                )));
            }
        }
        Ok(())
    }

    fn sample_to_frame(&mut self, sample: &gst::Sample) -> Result<Frame, CaptureError> {
        let info = video_info(sample)?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::TransientRead("sample missing buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CaptureError::TransientRead(format!("map buffer: {}", e)))?;
        let data = map.as_slice();

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * CHANNELS;
        let stride = info.stride().first().copied().unwrap_or(row_bytes as i32) as usize;

        let pixels = if stride == row_bytes {
            data.get(..row_bytes * height as usize)
                .ok_or_else(|| CaptureError::TransientRead("buffer shorter than frame".into()))?
                .to_vec()
        } else {
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                pixels.extend_from_slice(data.get(start..start + row_bytes).ok_or_else(|| {
                    CaptureError::TransientRead("buffer row is out of bounds".into())
                })?);
            }
            pixels
        };

        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count)
    }
}

impl FrameSource for GstreamerSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Err(CaptureError::TransientRead(format!(
                "gstreamer source {} released",
                self.locator
            )));
        }
        if let Some(frame) = self.primed.take() {
            return Ok(Some(frame));
        }
        self.poll_bus()?;
        match self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        {
            Some(sample) => self.sample_to_frame(&sample).map(Some),
            // Timeout or end of stream.
            None => Ok(None),
        }
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::Width => (self.width > 0).then_some(self.width as f64),
            SourceProperty::Height => (self.height > 0).then_some(self.height as f64),
            SourceProperty::Fps => self.fps,
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.primed = None;
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("GstreamerSource: failed to stop {}: {}", self.locator, err);
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn video_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, CaptureError> {
    let caps = sample
        .caps()
        .ok_or_else(|| CaptureError::TransientRead("sample missing caps".into()))?;
    gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| CaptureError::TransientRead(format!("parse caps as video info: {}", e)))
}

fn pipeline_description(spec: &SourceSpec) -> Result<String, CaptureError> {
    let locator = spec.locator.replace('"', "\\\"");
    let head = match spec.kind {
        SourceKind::Rtsp => format!("rtspsrc location=\"{}\" latency=0 ! decodebin", locator),
        SourceKind::Http | SourceKind::Https => {
            format!("souphttpsrc location=\"{}\" is-live=true ! decodebin", locator)
        }
        SourceKind::File => format!("filesrc location=\"{}\" ! decodebin", locator),
        SourceKind::Usb => format!("v4l2src device=\"{}\"", locator),
        SourceKind::Stub => {
            return Err(CaptureError::config(
                "stub sources are synthetic and cannot be decoded by gstreamer",
            ))
        }
    };
    Ok(format!("{} ! videoconvert ! appsink name=appsink", head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_pipeline_per_kind() {
        let rtsp = SourceSpec::new(SourceKind::Rtsp, "rtsp://cam/stream");
        let desc = pipeline_description(&rtsp).unwrap();
        assert!(desc.starts_with("rtspsrc location=\"rtsp://cam/stream\""));
        assert!(desc.ends_with("appsink name=appsink"));

        let usb = SourceSpec::new(SourceKind::Usb, "/dev/video2");
        assert!(pipeline_description(&usb)
            .unwrap()
            .starts_with("v4l2src device=\"/dev/video2\""));

        let stub = SourceSpec::new(SourceKind::Stub, "stub://x");
        assert!(pipeline_description(&stub).is_err());
    }
}
