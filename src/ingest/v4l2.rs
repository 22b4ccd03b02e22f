//! USB capture devices through V4L2.
//!
//! The device is asked for RGB24 at its current size. Drivers that refuse
//! keep their own format; YUYV and NV12 are converted on read, anything
//! else fails the open.

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceProperty};
use crate::config::SourceSpec;
use crate::error::CaptureError;
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

#[self_referencing]
struct DeviceStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    path: String,
    stream: Option<DeviceStream>,
    format: PixelFormat,
    width: u32,
    height: u32,
    fps: Option<f64>,
    frame_count: u64,
}

impl V4l2Source {
    pub fn open(spec: &SourceSpec) -> Result<Self, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = spec.locator.clone();
        let conn = |reason: String| CaptureError::connection(path.clone(), reason);

        let mut device = v4l::Device::with_path(&path)
            .map_err(|e| conn(format!("open v4l2 device: {}", e)))?;
        let mut requested = device
            .format()
            .map_err(|e| conn(format!("read v4l2 format: {}", e)))?;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB format on {}: {}", path, err);
                device
                    .format()
                    .map_err(|e| conn(format!("read v4l2 format after set failure: {}", e)))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            conn(format!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(&format.fourcc.repr)
            ))
        })?;

        let fps = device.params().ok().and_then(|params| {
            let interval = params.interval;
            (interval.numerator > 0 && interval.denominator > 0)
                .then(|| interval.denominator as f64 / interval.numerator as f64)
        });

        let stream = DeviceStreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| conn(format!("create v4l2 buffer stream: {}", e)))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path,
            stream: Some(stream),
            format: pixel_format,
            width: format.width,
            height: format.height,
            fps,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let stream = self.stream.as_mut().ok_or_else(|| {
            CaptureError::TransientRead(format!("v4l2 device {} released", self.path))
        })?;
        let (width, height, format) = (self.width, self.height, self.format);
        let pixels = stream.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|e| CaptureError::TransientRead(format!("capture v4l2 frame: {}", e)))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used > 0 { &buf[..used] } else { buf };
            normalize_to_rgb(data, width, height, format)
        })?;

        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count).map(Some)
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::Width => Some(self.width as f64),
            SourceProperty::Height => Some(self.height as f64),
            SourceProperty::Fps => self.fps,
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("V4l2Source: released {}", self.path);
        }
    }
}
