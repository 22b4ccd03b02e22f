//! Stream metadata derived from an open source and the feed configuration.

use serde::Serialize;

use crate::config::{FeedConfig, FpsSetting};
use crate::frame::{scaled_dimensions, CropRect};
use crate::ingest::{FrameSource, SourceProperty};

/// Frame rate assumed when neither the configuration nor the source provides one.
pub const FALLBACK_FPS: f64 = 30.0;

/// Snapshot of what the consumer will receive from a feed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub initialized: bool,
}

impl Metadata {
    /// Derive from a freshly opened source.
    ///
    /// Dimensions are those of the buffered frames: the crop rectangle
    /// clipped to the source, then scaled down to the max height unless the
    /// feed is partitioned.
    pub fn derive(config: &FeedConfig, source: &dyn FrameSource) -> Self {
        let source_width = dimension(source.property(SourceProperty::Width));
        let source_height = dimension(source.property(SourceProperty::Height));

        let fps = match config.fps {
            FpsSetting::Fixed(fps) => fps as f64,
            FpsSetting::Auto => source
                .property(SourceProperty::Fps)
                .filter(|fps| fps.is_finite() && *fps > 0.0)
                .unwrap_or(FALLBACK_FPS),
        };

        let (width, height) = match config.crop {
            Some(rect) => clipped_size(rect, source_width, source_height),
            None => (source_width, source_height),
        };
        let (width, height) = match config.capture_max_height() {
            Some(max) if width > 0 && height > 0 => scaled_dimensions(width, height, max),
            _ => (width, height),
        };

        Self {
            width,
            height,
            fps,
            initialized: width > 0 && height > 0,
        }
    }

    /// Pacing interval between successful reads.
    pub fn frame_interval(&self) -> std::time::Duration {
        let fps = if self.fps > 0.0 { self.fps } else { FALLBACK_FPS };
        std::time::Duration::from_secs_f64(1.0 / fps)
    }
}

fn dimension(value: Option<f64>) -> u32 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.round().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn clipped_size(rect: CropRect, width: u32, height: u32) -> (u32, u32) {
    let right = rect.right.min(width);
    let bottom = rect.bottom.min(height);
    (
        right.saturating_sub(rect.left),
        bottom.saturating_sub(rect.top),
    )
}

/// Per-output metadata as reported by `FeedManager::metadata`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `true` when fps comes from configuration rather than the source.
    pub fps_override: bool,
    pub initialized: bool,
}

impl FeedInfo {
    /// One entry per logical output of `config`.
    pub fn for_outputs(config: &FeedConfig, metadata: &Metadata) -> Vec<FeedInfo> {
        let fps_override = config.fps.is_override();
        if config.partitions.is_empty() {
            return vec![FeedInfo {
                name: config.name.clone(),
                width: metadata.width,
                height: metadata.height,
                fps: metadata.fps,
                fps_override,
                initialized: metadata.initialized,
            }];
        }
        config
            .partitions
            .iter()
            .map(|partition| {
                let (width, height) = if metadata.initialized {
                    clipped_size(partition.rect, metadata.width, metadata.height)
                } else {
                    (0, 0)
                };
                let (width, height) = match config.max_height {
                    Some(max) if width > 0 && height > 0 => scaled_dimensions(width, height, max),
                    _ => (width, height),
                };
                FeedInfo {
                    name: partition.name.clone(),
                    width,
                    height,
                    fps: metadata.fps,
                    fps_override,
                    initialized: width > 0 && height > 0,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Partition, SourceKind};
    use crate::ingest::SyntheticSource;

    fn feed() -> FeedConfig {
        FeedConfig::new("cam", SourceKind::Stub, "stub://cam")
    }

    #[test]
    fn uses_source_properties_and_fps() {
        let source = SyntheticSource::open("stub://cam?width=640&height=480&fps=12").unwrap();
        let meta = Metadata::derive(&feed(), &source);
        assert_eq!(
            meta,
            Metadata {
                width: 640,
                height: 480,
                fps: 12.0,
                initialized: true
            }
        );
    }

    #[test]
    fn fixed_fps_overrides_source() {
        let source = SyntheticSource::open("stub://cam?fps=12").unwrap();
        let mut config = feed();
        config.fps = FpsSetting::Fixed(5);
        assert_eq!(Metadata::derive(&config, &source).fps, 5.0);
    }

    #[test]
    fn crop_then_max_height_shape_dimensions() {
        let source = SyntheticSource::open("stub://cam?width=640&height=480").unwrap();
        let mut config = feed();
        config.crop = Some(CropRect::new(10, 10, 110, 160).unwrap());
        let meta = Metadata::derive(&config, &source);
        assert_eq!((meta.width, meta.height), (100, 150));

        config.max_height = Some(75);
        let meta = Metadata::derive(&config, &source);
        assert_eq!((meta.width, meta.height), (50, 75));
    }

    #[test]
    fn disjoint_crop_is_uninitialized() {
        let source = SyntheticSource::open("stub://cam?width=64&height=48").unwrap();
        let mut config = feed();
        config.crop = Some(CropRect::new(100, 100, 200, 200).unwrap());
        assert!(!Metadata::derive(&config, &source).initialized);
    }

    #[test]
    fn partitions_report_their_own_size() {
        let mut config = feed();
        config.partitions = vec![
            Partition {
                name: "left".into(),
                rect: CropRect::from_xywh(0, 0, 320, 480).unwrap(),
            },
            Partition {
                name: "right".into(),
                rect: CropRect::from_xywh(320, 0, 400, 480).unwrap(),
            },
        ];
        let meta = Metadata {
            width: 640,
            height: 480,
            fps: 10.0,
            initialized: true,
        };
        let infos = FeedInfo::for_outputs(&config, &meta);
        assert_eq!(infos.len(), 2);
        assert_eq!((infos[0].width, infos[0].height), (320, 480));
        // Clipped to the frame.
        assert_eq!((infos[1].width, infos[1].height), (320, 480));
        assert_eq!(infos[1].name, "right");
    }

    #[test]
    fn partitions_are_cut_before_scaling() {
        let source = SyntheticSource::open("stub://cam?width=400&height=2000").unwrap();
        let mut config = feed();
        config.max_height = Some(500);
        config.partitions = vec![
            Partition {
                name: "top".into(),
                rect: CropRect::from_xywh(0, 0, 400, 1000).unwrap(),
            },
            Partition {
                name: "bottom".into(),
                rect: CropRect::from_xywh(0, 1000, 400, 1000).unwrap(),
            },
        ];
        let meta = Metadata::derive(&config, &source);
        assert_eq!((meta.width, meta.height), (400, 2000));

        let infos = FeedInfo::for_outputs(&config, &meta);
        assert_eq!((infos[0].width, infos[0].height), (200, 500));
        assert_eq!((infos[1].width, infos[1].height), (200, 500));
    }
}
