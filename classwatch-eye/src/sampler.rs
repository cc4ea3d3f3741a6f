//! Frame sampling: finite timestamp schedules for files, periodic ticks for live feeds

use crate::config::SamplingRate;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Number of samples a file of `duration_secs` yields at `rate`.
///
/// The trailing fractional frame is dropped (floor, not round).
pub fn sample_count(duration_secs: f64, rate: SamplingRate) -> usize {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    (duration_secs * rate.fps()).floor() as usize
}

/// Materialized list of sample timestamps for one file run
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSchedule {
    rate: SamplingRate,
    timestamps: Vec<f64>,
}

impl SampleSchedule {
    /// `0, 1/rate, 2/rate, ...` for `floor(duration * rate)` samples
    pub fn for_file(duration_secs: f64, rate: SamplingRate) -> Self {
        let count = sample_count(duration_secs, rate);
        let timestamps = (0..count).map(|i| i as f64 / rate.fps()).collect();
        Self { rate, timestamps }
    }

    pub fn rate(&self) -> SamplingRate {
        self.rate
    }

    pub fn total_frames(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.timestamps.iter().copied().enumerate()
    }
}

/// Periodic tick source for live capture.
///
/// At most one tick task exists at a time. Reinstalling with a new rate tears
/// the old task down first; the counters let callers verify that.
#[derive(Debug, Default)]
pub struct LiveTicker {
    current: Option<JoinHandle<()>>,
    rate: Option<SamplingRate>,
    installs: u64,
    teardowns: u64,
}

impl LiveTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `1/rate`, replacing any running tick source.
    ///
    /// The first tick fires one period after installation. Ticks missed while
    /// the runtime was busy are skipped, never bunched.
    pub fn install<F>(&mut self, rate: SamplingRate, mut on_tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.teardown();

        let period = rate.interval();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                on_tick();
            }
        });

        self.current = Some(handle);
        self.rate = Some(rate);
        self.installs += 1;
        debug!("Installed tick source at {} ({:?})", rate, period);
    }

    /// Stop the running tick source, if any. Returns whether one was running.
    pub fn teardown(&mut self) -> bool {
        match self.current.take() {
            Some(handle) => {
                handle.abort();
                self.rate = None;
                self.teardowns += 1;
                debug!("Tore down tick source");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn rate(&self) -> Option<SamplingRate> {
        self.rate
    }

    pub fn installs(&self) -> u64 {
        self.installs
    }

    pub fn teardowns(&self) -> u64 {
        self.teardowns
    }

    pub fn period(&self) -> Option<Duration> {
        self.rate.map(|r| r.interval())
    }
}

impl Drop for LiveTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
    }
}
