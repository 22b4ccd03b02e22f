//! Captured frames and the geometry applied to them.
//!
//! - `Frame`: immutable RGB24 pixels plus capture time. Cloning shares the pixels.
//! - `CropRect`: `(left, top, right, bottom)` rectangle used for feed crops and partitions.
//!
//! Once a frame is enqueued nothing mutates it; cropping and scaling always
//! produce a new frame.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::CaptureError;

/// Bytes per pixel. Every backend normalizes to RGB24.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    captured_at: SystemTime,
    sequence: u64,
}

impl Frame {
    /// Wrap RGB24 pixels. `sequence` is the source's running frame counter.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, CaptureError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| CaptureError::TransientRead("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(CaptureError::TransientRead(format!(
                "frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at: SystemTime::now(),
            sequence,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Cut `rect` out of this frame.
    ///
    /// The rectangle is clipped to the frame bounds. Returns `None` when
    /// nothing of it lies inside the frame.
    pub fn crop(&self, rect: CropRect) -> Option<Frame> {
        let right = rect.right.min(self.width);
        let bottom = rect.bottom.min(self.height);
        if rect.left >= right || rect.top >= bottom {
            return None;
        }

        let width = right - rect.left;
        let height = bottom - rect.top;
        let stride = self.width as usize * CHANNELS;
        let row_bytes = width as usize * CHANNELS;
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in rect.top as usize..bottom as usize {
            let start = row * stride + rect.left as usize * CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..start + row_bytes]);
        }

        Some(Frame {
            pixels: pixels.into(),
            width,
            height,
            captured_at: self.captured_at,
            sequence: self.sequence,
        })
    }

    /// Downscale proportionally so the height does not exceed `max_height`.
    ///
    /// Frames already within the limit are returned as-is (sharing pixels).
    pub fn fit_height(self, max_height: u32) -> Frame {
        if max_height == 0 || self.height <= max_height {
            return self;
        }
        let (width, height) = scaled_dimensions(self.width, self.height, max_height);
        let Some(image) = RgbImage::from_raw(self.width, self.height, self.pixels.to_vec()) else {
            return self;
        };
        let resized = imageops::resize(&image, width, height, imageops::FilterType::Triangle);
        Frame {
            pixels: resized.into_raw().into(),
            width,
            height,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }

    /// Copy the pixels into an `image` buffer (for encoders).
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
    }
}

/// Dimensions after clamping `height` to `max_height`, keeping the aspect ratio.
pub fn scaled_dimensions(width: u32, height: u32, max_height: u32) -> (u32, u32) {
    if max_height == 0 || height <= max_height {
        return (width, height);
    }
    let scaled = (width as u64 * max_height as u64 / height as u64).max(1);
    (scaled as u32, max_height)
}

// ----------------------------------------------------------------------------
// CropRect
// ----------------------------------------------------------------------------

/// Rectangle in pixel coordinates: `left`/`top` inclusive, `right`/`bottom` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Result<Self, CaptureError> {
        if left >= right || top >= bottom {
            return Err(CaptureError::config(format!(
                "crop rectangle ({}, {}, {}, {}) is empty",
                left, top, right, bottom
            )));
        }
        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    /// Build from a bounds list. Anything but exactly four values is rejected.
    pub fn from_bounds(bounds: &[u32]) -> Result<Self, CaptureError> {
        match bounds {
            [left, top, right, bottom] => Self::new(*left, *top, *right, *bottom),
            _ => Err(CaptureError::config(format!(
                "crop rectangle needs exactly 4 bounds (left, top, right, bottom), got {}",
                bounds.len()
            ))),
        }
    }

    /// Build from an `(x, y, width, height)` region.
    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Result<Self, CaptureError> {
        let right = x
            .checked_add(width)
            .ok_or_else(|| CaptureError::config("crop region overflows"))?;
        let bottom = y
            .checked_add(height)
            .ok_or_else(|| CaptureError::config("crop region overflows"))?;
        Self::new(x, y, right, bottom)
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

impl TryFrom<Vec<u32>> for CropRect {
    type Error = CaptureError;

    fn try_from(bounds: Vec<u32>) -> Result<Self, Self::Error> {
        Self::from_bounds(&bounds)
    }
}

impl From<CropRect> for Vec<u32> {
    fn from(rect: CropRect) -> Self {
        vec![rect.left, rect.top, rect.right, rect.bottom]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
