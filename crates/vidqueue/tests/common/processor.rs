//! Scripted stand-in for the ffmpeg processor.
//!
//! Behaviour is chosen per input file name. Each name holds a queue of
//! scripts consumed one per run; once empty, runs succeed immediately.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use vidqueue::progress::{ProcessingStage, ProgressReporter};
use vidqueue::{ProcessError, ProcessedVideo, ProcessingRequest, VideoProcessor};

/// Percentage the scripted processor reports while running.
pub const SCRIPTED_PROGRESS: f64 = 60.0;

pub enum Script {
    /// Wait until the gate is opened, then succeed.
    Gate(Arc<Notify>),
    Delay(Duration),
    Fail(String),
    Panic(String),
}

#[derive(Default)]
pub struct ScriptedProcessor {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    output_dir: PathBuf,
}

/// Decrements the active count even if the run panics.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProcessor {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            ..Self::default()
        }
    }

    pub fn script(&self, input_name: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(input_name.to_string())
            .or_default()
            .push_back(script);
    }

    /// Scripts a gated run and returns the gate.
    pub fn gate(&self, input_name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script(input_name, Script::Gate(Arc::clone(&gate)));
        gate
    }

    /// Input file names in the order their runs started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_script(&self, name: &str) -> Option<Script> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|q| q.pop_front())
    }
}

#[async_trait]
impl VideoProcessor for ScriptedProcessor {
    async fn process(
        &self,
        request: &ProcessingRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessedVideo, ProcessError> {
        let name = request
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.started.lock().unwrap().push(name.clone());

        progress.stage(ProcessingStage::Analyzing);
        progress.report(ProcessingStage::Processing, SCRIPTED_PROGRESS, "encoding");

        match self.next_script(&name) {
            Some(Script::Gate(gate)) => gate.notified().await,
            Some(Script::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(Script::Fail(message)) => return Err(ProcessError::Other(message)),
            Some(Script::Panic(message)) => panic!("{}", message),
            None => tokio::task::yield_now().await,
        }

        progress.stage(ProcessingStage::Finalizing);
        Ok(ProcessedVideo {
            output_path: self.output_dir.join(format!("{}.mp4", request.job_id)),
            duration_seconds: request.options.duration_seconds,
            size_bytes: 1024,
        })
    }
}
