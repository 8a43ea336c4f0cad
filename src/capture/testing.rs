//! Scripted in-memory source for tests
//!
//! The test thread plays the role of the audio driver: it pushes blocks or
//! failures through a `ScriptHandle` while the source is started.

use super::traits::{AudioSource, CaptureError, CaptureResult, SampleSink, StreamFormat};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Script {
    sink: Option<SampleSink>,
    starts: usize,
    fail_next_start: Option<CaptureError>,
}

pub struct ScriptedSource {
    format: StreamFormat,
    script: Arc<Mutex<Script>>,
}

#[derive(Clone)]
pub struct ScriptHandle {
    format: StreamFormat,
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32, channels: u16) -> (Self, ScriptHandle) {
        let format = StreamFormat {
            sample_rate,
            channels,
        };
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                format,
                script: script.clone(),
            },
            ScriptHandle { format, script },
        )
    }
}

impl AudioSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&mut self, sink: SampleSink) -> CaptureResult<StreamFormat> {
        let mut script = self.script.lock();
        if let Some(err) = script.fail_next_start.take() {
            return Err(err);
        }
        if script.sink.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        script.sink = Some(sink);
        script.starts += 1;
        Ok(self.format)
    }

    fn stop(&mut self) {
        self.script.lock().sink = None;
    }

    fn is_running(&self) -> bool {
        self.script.lock().sink.is_some()
    }
}

impl ScriptHandle {
    /// Push `frames` frames of constant `level` on every channel
    pub fn push_frames(&self, frames: usize, level: f32) -> bool {
        let block = vec![level; frames * self.format.channels as usize];
        self.push(block)
    }

    /// Push a raw interleaved block. Returns false when not started.
    pub fn push(&self, block: Vec<f32>) -> bool {
        match self.script.lock().sink.as_ref() {
            Some(sink) => {
                sink.push(block);
                true
            }
            None => false,
        }
    }

    /// Simulate a driver failure
    pub fn fail(&self, message: &str) {
        if let Some(sink) = self.script.lock().sink.as_ref() {
            sink.fail(message);
        }
    }

    /// Make the next `start` fail with `err`
    pub fn fail_next_start(&self, err: CaptureError) {
        self.script.lock().fail_next_start = Some(err);
    }

    pub fn starts(&self) -> usize {
        self.script.lock().starts
    }

    pub fn is_running(&self) -> bool {
        self.script.lock().sink.is_some()
    }
}
