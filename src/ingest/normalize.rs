use crate::error::CaptureError;
use crate::frame::CHANNELS;

/// Pixel layouts a capture device may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// Planar Y followed by interleaved UV at quarter resolution.
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }

    fn frame_len(self, width: usize, height: usize) -> Option<usize> {
        let area = width.checked_mul(height)?;
        match self {
            Self::Rgb24 => area.checked_mul(CHANNELS),
            Self::Yuyv => area.checked_mul(2),
            Self::Nv12 => area.checked_add(area / 2),
        }
    }
}

/// Convert one device frame to tightly packed RGB24.
///
/// Buffers longer than the frame (driver padding) are truncated; shorter
/// buffers are a read error.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CaptureError> {
    let w = width as usize;
    let h = height as usize;
    let expected = format.frame_len(w, h).ok_or_else(|| {
        CaptureError::TransientRead(format!("{:?} frame dimensions overflow", format))
    })?;
    let pixels = pixels.get(..expected).ok_or_else(|| {
        CaptureError::TransientRead(format!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ))
    })?;

    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Yuyv => Ok(yuyv_to_rgb(pixels, w * h)),
        PixelFormat::Nv12 => Ok(nv12_to_rgb(pixels, w, h)),
    }
}

fn yuyv_to_rgb(pixels: &[u8], area: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(area * CHANNELS);
    for chunk in pixels.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * CHANNELS];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let px = yuv_to_rgb(pixels[j * w + i], pixels[uv_index], pixels[uv_index + 1]);
            let offset = (j * w + i) * CHANNELS;
            rgb[offset..offset + CHANNELS].copy_from_slice(&px);
        }
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
