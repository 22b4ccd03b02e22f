mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{scripted_feed, wait_until, FailingRecorders, Script, ScriptedConnector};
use feedcap::{
    CropRect, FeedConfig, FeedManager, FeedState, FpsSetting, Frame, ManagerConfig, Partition,
    SourceKind,
};

const WAIT: Duration = Duration::from_secs(5);

fn stub_feed(name: &str, query: &str) -> FeedConfig {
    FeedConfig::new(name, SourceKind::Stub, format!("stub://{}?{}", name, query))
}

fn first_frame(manager: &FeedManager, slot: usize) -> Frame {
    let mut frame = None;
    assert!(wait_until(WAIT, || {
        frame = manager.read().swap_remove(slot);
        frame.is_some()
    }));
    frame.expect("frame")
}

#[test]
fn read_before_start_returns_no_frame() {
    let config = ManagerConfig::new(vec![
        stub_feed("a", "width=16&height=8"),
        stub_feed("b", "width=16&height=8"),
    ]);
    let manager = FeedManager::with_default_connector(config).expect("manager");
    let frames = manager.read();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(Option::is_none));
}

#[test]
fn crop_is_applied_to_captured_frames() {
    let mut feed = stub_feed("yard", "width=640&height=480&fps=50");
    feed.crop = Some(CropRect::new(10, 10, 110, 160).expect("rect"));
    let manager =
        FeedManager::with_default_connector(ManagerConfig::new(vec![feed])).expect("manager");
    manager.start();

    let frame = first_frame(&manager, 0);
    assert_eq!((frame.width(), frame.height()), (100, 150));
    manager.stop();
}

#[test]
fn metadata_is_available_before_start() {
    let mut cropped = stub_feed("cropped", "width=640&height=480&fps=25");
    cropped.crop = Some(CropRect::new(10, 10, 110, 160).expect("rect"));
    let mut fixed = stub_feed("fixed", "width=320&height=240&fps=25");
    fixed.fps = FpsSetting::Fixed(5);
    let manager = FeedManager::with_default_connector(ManagerConfig::new(vec![cropped, fixed]))
        .expect("manager");

    let info = manager.metadata();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].name, "cropped");
    assert_eq!((info[0].width, info[0].height), (100, 150));
    assert_eq!(info[0].fps, 25.0);
    assert!(!info[0].fps_override);
    assert!(info[0].initialized);
    assert_eq!(info[1].fps, 5.0);
    assert!(info[1].fps_override);
    assert_eq!(manager.states(), vec![FeedState::Stopped, FeedState::Stopped]);
}

#[test]
fn source_opened_for_metadata_is_reused_by_start() {
    let script = Script::new(32, 24);
    let manager = FeedManager::new(
        ManagerConfig::new(vec![scripted_feed("cam")]),
        ScriptedConnector::new(&script),
    )
    .expect("manager");

    assert!(manager.metadata()[0].initialized);
    assert!(manager.metadata()[0].initialized);
    assert_eq!(script.opens(), 1);

    manager.start();
    first_frame(&manager, 0);
    assert_eq!(script.opens(), 1);
    manager.stop();
}

#[test]
fn partitions_are_separate_outputs() {
    let mut feed = stub_feed("strip", "width=200&height=100&fps=50");
    feed.partitions = vec![
        Partition {
            name: "left".into(),
            rect: CropRect::from_xywh(0, 0, 100, 100).expect("rect"),
        },
        Partition {
            name: "right".into(),
            rect: CropRect::from_xywh(100, 0, 60, 100).expect("rect"),
        },
        Partition {
            name: "beyond".into(),
            rect: CropRect::from_xywh(300, 0, 50, 50).expect("rect"),
        },
    ];
    let manager =
        FeedManager::with_default_connector(ManagerConfig::new(vec![feed])).expect("manager");
    assert_eq!(manager.output_names(), vec!["left", "right", "beyond"]);
    assert_eq!(manager.metadata().len(), 3);

    manager.start();
    let mut frames = Vec::new();
    assert!(wait_until(WAIT, || {
        frames = manager.read();
        frames[0].is_some()
    }));
    assert_eq!(frames.len(), 3);
    let left = frames[0].as_ref().expect("left");
    let right = frames[1].as_ref().expect("right");
    assert_eq!((left.width(), left.height()), (100, 100));
    assert_eq!((right.width(), right.height()), (60, 100));
    assert_eq!(left.sequence(), right.sequence());
    assert!(frames[2].is_none());
    manager.stop();
}

#[test]
fn partitions_of_tall_source_use_source_coordinates() {
    let mut feed = stub_feed("tower", "width=400&height=2000&fps=50");
    feed.partitions = vec![
        Partition {
            name: "top".into(),
            rect: CropRect::from_xywh(0, 0, 400, 1000).expect("rect"),
        },
        Partition {
            name: "bottom".into(),
            rect: CropRect::from_xywh(0, 1000, 400, 1000).expect("rect"),
        },
    ];
    let mut scaled = feed.clone();
    scaled.name = "tower-small".into();
    scaled.source.locator = "stub://tower-small?width=400&height=2000&fps=50".into();
    scaled.max_height = Some(500);
    for partition in &mut scaled.partitions {
        partition.name = format!("{}-small", partition.name);
    }
    let manager = FeedManager::with_default_connector(ManagerConfig::new(vec![feed, scaled]))
        .expect("manager");

    let sizes: Vec<(u32, u32)> = manager
        .metadata()
        .iter()
        .map(|info| (info.width, info.height))
        .collect();
    assert_eq!(sizes, vec![(400, 1000), (400, 1000), (200, 500), (200, 500)]);

    manager.start();
    // The two feeds deliver independently; keep the first frame seen per slot.
    let mut seen: Vec<Option<(u32, u32)>> = vec![None; 4];
    assert!(wait_until(WAIT, || {
        for (slot, frame) in manager.read().into_iter().enumerate() {
            if let Some(frame) = frame {
                seen[slot].get_or_insert((frame.width(), frame.height()));
            }
        }
        seen.iter().all(Option::is_some)
    }));
    let sizes: Vec<(u32, u32)> = seen.into_iter().flatten().collect();
    assert_eq!(sizes, vec![(400, 1000), (400, 1000), (200, 500), (200, 500)]);
    manager.stop();
}

#[test]
fn stop_is_idempotent_and_restartable() {
    let manager = FeedManager::with_default_connector(ManagerConfig::new(vec![stub_feed(
        "cam",
        "width=16&height=8&fps=100",
    )]))
    .expect("manager");

    manager.stop();
    manager.start();
    manager.start();
    first_frame(&manager, 0);
    manager.stop();
    manager.stop();
    assert_eq!(manager.states(), vec![FeedState::Stopped]);
    assert_eq!(manager.stats()[0].buffered, 0);
    assert!(manager.read()[0].is_none());

    manager.start();
    first_frame(&manager, 0);
    manager.stop();
}

#[test]
fn recorder_failures_do_not_interrupt_capture() {
    let script = Script::new(16, 8);
    let recorders = Arc::new(FailingRecorders::default());
    let attempts = Arc::clone(&recorders.attempts);
    let dir = tempfile::tempdir().expect("tempdir");

    let mut feed = scripted_feed("cam");
    feed.recording_dir = Some(dir.path().to_path_buf());
    let manager = FeedManager::new(ManagerConfig::new(vec![feed]), ScriptedConnector::new(&script))
        .expect("manager")
        .with_recorders(recorders);
    manager.start();

    assert!(wait_until(WAIT, || attempts.load(Ordering::SeqCst) >= 5));
    assert!(manager.stats()[0].frames_captured >= 5);
    assert_eq!(manager.states(), vec![FeedState::Capturing]);
    manager.stop();
}

#[test]
fn recording_writes_jpeg_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut feed = stub_feed("porch", "width=32&height=16&fps=100");
    feed.recording_dir = Some(dir.path().to_path_buf());
    let manager =
        FeedManager::with_default_connector(ManagerConfig::new(vec![feed])).expect("manager");
    manager.start();
    assert!(wait_until(WAIT, || manager.stats()[0].frames_captured >= 3));
    manager.stop();

    let recordings: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read recording root")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(recordings.len(), 1);
    let name = recordings[0].file_name().expect("name").to_string_lossy().to_string();
    assert!(name.starts_with("orig_porch_"), "{}", name);
    let jpegs = std::fs::read_dir(&recordings[0]).expect("read recording").count();
    assert!(jpegs >= 3);
}

#[test]
fn high_watermark_pauses_reading() {
    let script = Script::new(8, 8);
    let mut feed = scripted_feed("cam");
    feed.buffer = feedcap::BufferCapacity::frames(10).expect("capacity");
    feed.high_watermark = Some(2);
    feed.fps = FpsSetting::Fixed(500);
    let manager = FeedManager::new(ManagerConfig::new(vec![feed]), ScriptedConnector::new(&script))
        .expect("manager");
    manager.start();

    assert!(wait_until(WAIT, || manager.stats()[0].buffered == 3));
    let captured = manager.stats()[0].frames_captured;
    std::thread::sleep(Duration::from_millis(200));
    let stats = &manager.stats()[0];
    assert_eq!(stats.frames_captured, captured);
    assert_eq!(stats.buffered, 3);
    assert_eq!(stats.frames_dropped, 0);

    // Draining lets capture continue.
    manager.read();
    assert!(wait_until(WAIT, || manager.stats()[0].frames_captured > captured));
    manager.stop();
}

#[test]
fn small_buffer_keeps_newest_frames() {
    let script = Script::new(8, 8);
    let mut feed = scripted_feed("cam");
    feed.buffer = feedcap::BufferCapacity::frames(2).expect("capacity");
    feed.fps = FpsSetting::Fixed(500);
    let manager = FeedManager::new(ManagerConfig::new(vec![feed]), ScriptedConnector::new(&script))
        .expect("manager");
    manager.start();
    assert!(wait_until(WAIT, || manager.stats()[0].frames_dropped >= 3));
    script.set_readable(false);
    assert!(wait_until(WAIT, || manager.states()[0].is_degraded()));

    let last = script.last_sequence();
    let first = manager.read()[0].clone().expect("older frame");
    let second = manager.read()[0].clone().expect("newer frame");
    assert_eq!((first.sequence(), second.sequence()), (last - 1, last));
    assert!(manager.read()[0].is_none());
    manager.stop();
}
