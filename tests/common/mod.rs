#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedcap::{
    CaptureError, Connector, FeedConfig, Frame, FrameSource, Metadata, Recorder, RecorderFactory,
    SourceKind, SourceProperty, SourceSpec,
};

/// Knobs shared between a test and the sources its connector opens.
pub struct Script {
    /// Size of sources opened from now on.
    pub width: AtomicU32,
    pub height: AtomicU32,
    pub fps: Option<f64>,
    /// Reads yield frames while set, `Ok(None)` otherwise.
    pub readable: AtomicBool,
    /// Opens succeed while set.
    pub open_ok: AtomicBool,
    pub opens: AtomicU64,
    /// Every open call, successful or not.
    pub attempts: AtomicU64,
    pub releases: AtomicU64,
    /// Running frame counter across every source this script opened.
    pub sequence: AtomicU64,
}

impl Script {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
            fps: Some(100.0),
            readable: AtomicBool::new(true),
            open_ok: AtomicBool::new(true),
            opens: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_readable(&self, value: bool) {
        self.readable.store(value, Ordering::SeqCst);
    }

    pub fn set_open_ok(&self, value: bool) {
        self.open_ok.store(value, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

pub struct ScriptedConnector {
    pub script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new(script: &Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::clone(script),
        })
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, CaptureError> {
        self.script.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.script.open_ok.load(Ordering::SeqCst) {
            return Err(CaptureError::connection(spec.locator.clone(), "scripted outage"));
        }
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script: Arc::clone(&self.script),
            width: self.script.width.load(Ordering::SeqCst),
            height: self.script.height.load(Ordering::SeqCst),
            released: false,
        }))
    }
}

struct ScriptedSource {
    script: Arc<Script>,
    width: u32,
    height: u32,
    released: bool,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Err(CaptureError::TransientRead("released".into()));
        }
        if !self.script.readable.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let seq = self.script.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let len = (self.width * self.height) as usize * 3;
        Frame::new(vec![(seq % 256) as u8; len], self.width, self.height, seq).map(Some)
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::Width => Some(self.width as f64),
            SourceProperty::Height => Some(self.height as f64),
            SourceProperty::Fps => self.script.fps,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.script.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Recorder factory whose recorders reject every frame.
#[derive(Default)]
pub struct FailingRecorders {
    pub attempts: Arc<AtomicU64>,
}

struct FailingRecorder {
    attempts: Arc<AtomicU64>,
}

impl Recorder for FailingRecorder {
    fn write(&mut self, _frame: &Frame) -> Result<(), CaptureError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CaptureError::SinkWrite("disk full".into()))
    }
}

impl RecorderFactory for FailingRecorders {
    fn create(
        &self,
        _feed: &str,
        _dir: &Path,
        _metadata: &Metadata,
    ) -> Result<Box<dyn Recorder>, CaptureError> {
        Ok(Box::new(FailingRecorder {
            attempts: Arc::clone(&self.attempts),
        }))
    }
}

pub fn scripted_feed(name: &str) -> FeedConfig {
    FeedConfig::new(name, SourceKind::Rtsp, format!("rtsp://scripted/{}", name))
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
