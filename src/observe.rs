//! Stage observation
//!
//! The pipeline reports the start and end of every stage to a [`BakeObserver`].
//! [`LogObserver`] writes them to the `log` facade; [`RecordingObserver`]
//! keeps them in memory for reports and tests.

use std::sync::Mutex;
use std::time::Duration;

use log::info;

/// Wall time of one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    /// Stage name
    pub stage: &'static str,
    /// Elapsed time
    pub elapsed: Duration,
}

/// Receives stage boundaries
pub trait BakeObserver: Send + Sync {
    /// A stage is about to run
    fn stage_started(&self, _stage: &'static str) {}

    /// A stage completed
    fn stage_finished(&self, timing: &StageTiming);
}

/// Logs every finished stage at `info`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl BakeObserver for LogObserver {
    fn stage_finished(&self, timing: &StageTiming) {
        info!("{} took {:.2} ms", timing.stage, timing.elapsed.as_secs_f64() * 1000.0);
    }
}

/// Collects stage names and timings
#[derive(Debug, Default)]
pub struct RecordingObserver {
    started: Mutex<Vec<&'static str>>,
    finished: Mutex<Vec<StageTiming>>,
}

impl RecordingObserver {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages started, in order
    pub fn started(&self) -> Vec<&'static str> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Stages finished, in order
    pub fn timings(&self) -> Vec<StageTiming> {
        self.finished.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl BakeObserver for RecordingObserver {
    fn stage_started(&self, stage: &'static str) {
        if let Ok(mut s) = self.started.lock() {
            s.push(stage);
        }
    }

    fn stage_finished(&self, timing: &StageTiming) {
        if let Ok(mut s) = self.finished.lock() {
            s.push(timing.clone());
        }
    }
}
