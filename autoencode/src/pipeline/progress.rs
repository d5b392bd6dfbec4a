//! Encoder progress tracking.
//!
//! The encoder appends `key=value` lines to a scratch file (ffmpeg's
//! `-progress` output). Each poll re-reads the whole file and derives a
//! [`ProgressSnapshot`] from the last occurrence of every recognized key.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Media time assumed before the encoder reports any, in seconds.
const INITIAL_TIME_DONE_SECS: u64 = 1;

/// Lower bound for percent when extrapolating the final size.
const MIN_PERCENT_FOR_ESTIMATE: f64 = 0.01;

/// Lower bound for the rate when computing the ETA.
const MIN_SPEED: f64 = 0.01;

/// Values extracted from one read of the scratch file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchState {
    /// Encoded media time in microseconds.
    pub out_time_us: Option<u64>,
    /// Bytes written to the output so far.
    pub total_size: Option<u64>,
    /// The last `progress=` marker was `end`.
    pub ended: bool,
}

/// Parse the scratch file. Later lines override earlier ones.
///
/// Both `out_time_ms` and `out_time_us` carry microseconds in ffmpeg's
/// output; values that do not parse (`N/A`) are ignored.
pub fn parse_scratch(contents: &str) -> ScratchState {
    let mut state = ScratchState::default();
    let mut last_progress: Option<&str> = None;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<u64>() {
                    state.out_time_us = Some(us);
                }
            }
            "total_size" => {
                if let Ok(size) = value.parse::<u64>() {
                    state.total_size = Some(size);
                }
            }
            "progress" => last_progress = Some(value),
            _ => {}
        }
    }

    state.ended = last_progress == Some("end");
    state
}

/// Duration used for percent arithmetic: the probed value when it is usable,
/// the fallback otherwise.
pub fn effective_duration(probed: Option<f64>, fallback_secs: f64) -> f64 {
    match probed {
        Some(secs) if secs.is_finite() && secs > 0.0 => secs,
        _ => fallback_secs,
    }
}

/// Normalized progress of one encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub updated_at: DateTime<Utc>,
    /// Percent complete, within `[0, 100]`.
    pub percent: f64,
    pub bytes_done: u64,
    /// Extrapolated final size.
    pub bytes_total_estimate: u64,
    pub speed_bytes_per_sec: f64,
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    /// Whole seconds of media encoded.
    pub media_time_secs: u64,
    /// The encoder wrote its terminal marker.
    pub finished: bool,
}

/// Turns scratch file contents into snapshots for one encode run.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration_secs: f64,
    started: Instant,
}

impl ProgressTracker {
    /// `total_duration_secs` should already have the fallback applied; a
    /// non-positive value is replaced by one second.
    pub fn new(total_duration_secs: f64, started: Instant) -> Self {
        let total_duration_secs = if total_duration_secs.is_finite() && total_duration_secs > 0.0
        {
            total_duration_secs
        } else {
            1.0
        };
        Self {
            total_duration_secs,
            started,
        }
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.total_duration_secs
    }

    /// Snapshot for the current wall-clock time.
    pub fn next_snapshot(&self, contents: &str) -> ProgressSnapshot {
        self.snapshot_at(contents, self.started.elapsed())
    }

    /// Snapshot given an explicit elapsed time since the encode started.
    pub fn snapshot_at(&self, contents: &str, elapsed: Duration) -> ProgressSnapshot {
        let scratch = parse_scratch(contents);

        let media_time_secs = scratch
            .out_time_us
            .map(|us| us / 1_000_000)
            .unwrap_or(INITIAL_TIME_DONE_SECS);
        let bytes_done = scratch.total_size.unwrap_or(0);

        let elapsed_secs = elapsed.as_secs_f64();
        let speed = bytes_done as f64 / elapsed_secs.max(1.0);

        let raw_percent = media_time_secs as f64 / self.total_duration_secs * 100.0;
        let percent = round2(raw_percent).clamp(0.0, 100.0);

        let total_estimate = bytes_done as f64 / (percent.max(MIN_PERCENT_FOR_ESTIMATE) / 100.0);
        let eta_secs = ((total_estimate - bytes_done as f64) / speed.max(MIN_SPEED)).max(0.0);

        ProgressSnapshot {
            updated_at: Utc::now(),
            percent,
            bytes_done,
            bytes_total_estimate: total_estimate.round() as u64,
            speed_bytes_per_sec: speed,
            elapsed_secs,
            eta_secs,
            media_time_secs,
            finished: scratch.ended,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A snapshot tagged with the quality it belongs to.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub quality: String,
    pub snapshot: ProgressSnapshot,
}

/// Non-blocking progress sink handed to the encoder.
///
/// Updates are dropped when the receiver lags; progress is advisory.
#[derive(Clone)]
pub struct ProgressReporter {
    quality: String,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(quality: impl Into<String>, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            quality: quality.into(),
            tx,
        }
    }

    pub fn noop(quality: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressUpdate>(1);
        Self::new(quality, tx)
    }

    pub fn report(&self, snapshot: ProgressSnapshot) {
        let _ = self.tx.try_send(ProgressUpdate {
            quality: self.quality.clone(),
            snapshot,
        });
    }
}
