//! Kernel log observation.
//!
//! The observer waits for a marker line to show up in a kernel log sink. A
//! [`LogSource`] gives it a stream of new lines. [`LogObserver`] adds the
//! start-position bookkeeping and the bounded polling loop.
//!
//! The caller must [`arm`](LogObserver::arm) the observer *before* it
//! triggers the action whose marker it expects. Arming moves the source to
//! the current end of the log. Lines that were already there, such as a
//! marker left by a previous run, are never matched.

use crate::common::{CancelToken, HarnessError, Result};
use crate::config::{LogConfig, LogSourceKind};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

/// Plain append-only text log.
pub mod file;

/// `/dev/kmsg` record stream.
pub mod kmsg;

pub use self::file::FileLogSource;
pub use self::kmsg::KmsgLogSource;

/// A forward-only stream of kernel log lines.
pub trait LogSource {
    /// Moves the read position to the current end of the log. Lines written
    /// before this call are never returned by [`read_new`](Self::read_new).
    fn mark_end(&mut self) -> Result<()>;

    /// Returns the complete lines appended since the previous mark or read.
    fn read_new(&mut self) -> Result<Vec<String>>;
}

/// Outcome of waiting for one marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObservationResult {
    pub found: bool,
    pub matched_line: Option<String>,
    pub elapsed: Duration,
}

/// Polls a [`LogSource`] for marker lines.
pub struct LogObserver {
    source: Box<dyn LogSource>,
    poll_interval: Duration,
    armed: bool,
}

impl LogObserver {
    pub fn new(source: Box<dyn LogSource>, poll_interval: Duration) -> Self {
        Self {
            source,
            poll_interval,
            armed: false,
        }
    }

    /// Builds the source described by `config`.
    pub fn from_config(config: &LogConfig) -> Self {
        let source: Box<dyn LogSource> = match config.source {
            LogSourceKind::Kmsg => Box::new(KmsgLogSource::new(&config.path)),
            LogSourceKind::File => Box::new(FileLogSource::new(&config.path)),
        };
        Self::new(source, config.poll_interval())
    }

    /// Records the current end of the log as the starting point of the next
    /// observation.
    pub fn arm(&mut self) -> Result<()> {
        self.source.mark_end()?;
        self.armed = true;
        Ok(())
    }

    /// Waits up to `timeout` for a line containing `marker`.
    ///
    /// A timeout is an expected outcome and yields `found == false`, not an
    /// error. The sink is scanned at least once even when `timeout` is zero.
    pub fn observe(&mut self, marker: &str, timeout: Duration) -> Result<ObservationResult> {
        self.observe_cancellable(marker, timeout, &CancelToken::new())
    }

    /// Like [`observe`](Self::observe), but returns `Cancelled` as soon as
    /// `cancel` fires.
    pub fn observe_cancellable(
        &mut self,
        marker: &str,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ObservationResult> {
        if !self.armed {
            self.arm()?;
        }
        // Every observation consumes the arm; the next action must re-arm.
        self.armed = false;

        let start = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }

            if let Some(line) = self.source.read_new()?.into_iter().find(|l| l.contains(marker)) {
                let elapsed = start.elapsed();
                log::debug!("marker {:?} observed after {:?}: {}", marker, elapsed, line);
                return Ok(ObservationResult {
                    found: true,
                    matched_line: Some(line),
                    elapsed,
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                log::debug!("marker {:?} not observed within {:?}", marker, timeout);
                return Ok(ObservationResult {
                    found: false,
                    matched_line: None,
                    elapsed,
                });
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}
