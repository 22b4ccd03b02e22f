use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use feedcap::{Backend, BufferCapacity, FeedManager, FpsSetting, ManagerConfig, SourceKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FEEDCAP_CONFIG",
        "FEEDCAP_FEEDS",
        "FEEDCAP_QUEUE_SIZE",
        "FEEDCAP_RECONNECT_SECS",
        "FEEDCAP_RECORDING_DIR",
        "FEEDCAP_MAX_HEIGHT",
        "FEEDCAP_BACKEND",
    ] {
        std::env::remove_var(key);
    }
}

fn temp_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

#[test]
fn loads_toml_from_env_with_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = temp_file(
        r#"
        [defaults]
        reconnect_grace_secs = 30

        [[feeds]]
        name = "gate"
        source = "rtsp"
        locator = "rtsp://gate/stream"
        fps = 15

        [[feeds]]
        name = "lobby"
        source = "usb"
        locator = "/dev/video0"
        buffer = 1
        "#,
    );
    std::env::set_var("FEEDCAP_CONFIG", file.path());
    std::env::set_var("FEEDCAP_QUEUE_SIZE", "7");
    std::env::set_var("FEEDCAP_MAX_HEIGHT", "720");
    std::env::set_var("FEEDCAP_RECORDING_DIR", "/var/lib/feedcap");

    let cfg = ManagerConfig::load().expect("load config");
    assert_eq!(cfg.feeds.len(), 2);
    let gate = &cfg.feeds[0];
    assert_eq!(gate.source.kind, SourceKind::Rtsp);
    assert_eq!(gate.fps, FpsSetting::Fixed(15));
    assert_eq!(gate.buffer, BufferCapacity::frames(7).unwrap());
    assert_eq!(gate.max_height, Some(720));
    assert_eq!(gate.grace_period, Duration::from_secs(30));
    assert!(gate.reconnect);
    assert_eq!(
        gate.recording_dir.as_deref(),
        Some(std::path::Path::new("/var/lib/feedcap"))
    );
    // Per-feed settings win over the environment.
    assert_eq!(cfg.feeds[1].buffer, BufferCapacity::frames(1).unwrap());

    clear_env();
}

#[test]
fn loads_feed_list_from_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = temp_file("# clips\nfirst,file:/data/first.mp4,24\nsecond,file:/data/second.mp4\n");
    std::env::set_var("FEEDCAP_FEEDS", file.path());
    std::env::set_var("FEEDCAP_RECONNECT_SECS", "0");
    std::env::set_var("FEEDCAP_BACKEND", "snapshot");

    let cfg = ManagerConfig::load().expect("load feed list");
    assert_eq!(cfg.feeds.len(), 2);
    for feed in &cfg.feeds {
        assert_eq!(feed.buffer, BufferCapacity::Unbounded);
        assert!(!feed.reconnect);
        assert_eq!(feed.source.backend, Backend::Snapshot);
    }
    assert_eq!(cfg.feeds[0].fps, FpsSetting::Fixed(24));
    assert_eq!(cfg.feeds[1].fps, FpsSetting::Auto);

    clear_env();
}

#[test]
fn rejects_bad_environment() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    assert!(ManagerConfig::load().is_err());

    let file = temp_file("cam,usb:/dev/video0\n");
    std::env::set_var("FEEDCAP_FEEDS", file.path());
    std::env::set_var("FEEDCAP_MAX_HEIGHT", "tall");
    assert!(ManagerConfig::load().is_err());

    std::env::set_var("FEEDCAP_MAX_HEIGHT", "480");
    std::env::set_var("FEEDCAP_QUEUE_SIZE", "0");
    // Unbounded is only valid when every source is a file.
    assert!(ManagerConfig::load().is_err());

    clear_env();
}

#[test]
fn manager_rejects_malformed_crop_at_construction() {
    let raw = r#"
        [[feeds]]
        name = "cam"
        source = "stub"
        locator = "stub://cam"
        crop = [0, 0, 10]
    "#;
    assert!(ManagerConfig::from_toml_str(raw).is_err());

    let raw = r#"
        [[feeds]]
        name = "cam"
        source = "rtsp"
        locator = "rtsp://cam/stream"
        backend = "snapshot"
    "#;
    let cfg = ManagerConfig::from_toml_str(raw).expect("parses");
    let err = FeedManager::with_default_connector(cfg)
        .err()
        .expect("snapshot cannot serve rtsp");
    assert!(err.is_configuration());
}
