//! Synthetic frame source.
//!
//! `stub://<name>?width=640&height=480&fps=10&frames=300` produces a moving
//! test pattern. Every query parameter is optional:
//! - `width`, `height`: frame size (default 640x480)
//! - `fps`: declared frame rate (default 10)
//! - `frames`: stop yielding after this many frames, like a file reaching its end
//! - `offline`: refuse to open, like an unreachable camera

use url::Url;

use super::{FrameSource, SourceProperty};
use crate::error::CaptureError;
use crate::frame::{Frame, CHANNELS};

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: Option<u64>,
    pub offline: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 10.0,
            frames: None,
            offline: false,
        }
    }
}

impl SyntheticConfig {
    pub fn parse(locator: &str) -> Result<Self, CaptureError> {
        let url = Url::parse(locator)
            .map_err(|e| CaptureError::config(format!("invalid stub locator '{}': {}", locator, e)))?;
        if url.scheme() != "stub" {
            return Err(CaptureError::config(format!(
                "synthetic sources use stub:// locators, got '{}'",
                locator
            )));
        }
        let mut config = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => config.width = parse_param(locator, &key, &value)?,
                "height" => config.height = parse_param(locator, &key, &value)?,
                "fps" => config.fps = parse_param(locator, &key, &value)?,
                "frames" => config.frames = Some(parse_param(locator, &key, &value)?),
                "offline" => config.offline = value != "false" && value != "0",
                other => {
                    return Err(CaptureError::config(format!(
                        "unknown stub parameter '{}' in '{}'",
                        other, locator
                    )))
                }
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::config(format!(
                "stub locator '{}' needs a non-zero size",
                locator
            )));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(
    locator: &str,
    key: &str,
    value: &str,
) -> Result<T, CaptureError> {
    value.parse().map_err(|_| {
        CaptureError::config(format!(
            "stub parameter '{}' in '{}' has invalid value '{}'",
            key, locator, value
        ))
    })
}

pub(crate) fn validate_locator(locator: &str) -> Result<(), CaptureError> {
    SyntheticConfig::parse(locator).map(|_| ())
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    /// Shifts the pattern every 50 frames so consecutive scenes differ.
    scene_state: u8,
    released: bool,
}

impl SyntheticSource {
    pub fn open(locator: &str) -> Result<Self, CaptureError> {
        let config = SyntheticConfig::parse(locator)?;
        if config.offline {
            return Err(CaptureError::connection(locator, "stub source is offline"));
        }
        log::info!("SyntheticSource: opened {}", locator);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            released: false,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * CHANNELS;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Err(CaptureError::TransientRead("synthetic source released".into()));
        }
        if let Some(limit) = self.config.frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.config.width, self.config.height, self.frame_count).map(Some)
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::Width => Some(self.config.width as f64),
            SourceProperty::Height => Some(self.config.height as f64),
            SourceProperty::Fps => Some(self.config.fps),
        }
    }

    fn release(&mut self) {
        self.released = true;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
