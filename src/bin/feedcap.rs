//! feedcap - multi-feed capture daemon
//!
//! Loads the feed configuration, prints the per-output metadata as JSON,
//! then keeps reading every feed until Ctrl-C (or `--seconds`) and logs
//! per-feed statistics periodically.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use feedcap::{FeedManager, ManagerConfig};

/// How often the read loop samples the feeds.
const READ_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML feed configuration.
    #[arg(long, env = "FEEDCAP_CONFIG", conflicts_with = "feeds")]
    config: Option<PathBuf>,
    /// Bulk feed list, one `name,sourcetype:path[,fps]` per line.
    #[arg(long, env = "FEEDCAP_FEEDS")]
    feeds: Option<PathBuf>,
    /// Stop after this many seconds (0 runs until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    seconds: u64,
    /// Seconds between statistics log lines.
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match (&args.config, &args.feeds) {
        (Some(path), _) => ManagerConfig::load_toml(path)?,
        (None, Some(path)) => ManagerConfig::load_feed_list(path)?,
        (None, None) => return Err(anyhow!("pass --config or --feeds")),
    };

    let manager = FeedManager::with_default_connector(config)?;
    let metadata = manager.metadata();
    println!("{}", serde_json::to_string_pretty(&metadata)?);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    manager.start();
    log::info!("capturing {} output(s); Ctrl-C to stop", metadata.len());

    let started = Instant::now();
    let deadline = (args.seconds > 0).then(|| started + Duration::from_secs(args.seconds));
    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    let mut last_stats = Instant::now();
    let names: Vec<String> = manager
        .output_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut delivered = vec![0u64; names.len()];

    loop {
        match rx.recv_timeout(READ_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        for (slot, frame) in manager.read().into_iter().enumerate() {
            if let (Some(frame), Some(count)) = (frame, delivered.get_mut(slot)) {
                *count += 1;
                log::debug!(
                    "{}: frame {} ({}x{})",
                    names[slot],
                    frame.sequence(),
                    frame.width(),
                    frame.height()
                );
            }
        }

        if last_stats.elapsed() >= stats_interval {
            for stats in manager.stats() {
                log::info!(
                    "{} state={} captured={} dropped={} reconnects={} buffered={}",
                    stats.name,
                    stats.state,
                    stats.frames_captured,
                    stats.frames_dropped,
                    stats.reconnects,
                    stats.buffered
                );
            }
            last_stats = Instant::now();
        }
    }

    manager.stop();
    for (name, count) in names.iter().zip(&delivered) {
        log::info!("{}: {} frame(s) delivered", name, count);
    }
    Ok(())
}
