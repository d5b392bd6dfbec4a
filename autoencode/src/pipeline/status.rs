//! Text of the status message tracked for each release.

use super::progress::ProgressSnapshot;

const BAR_CELLS: usize = 12;
const PERCENT_PER_CELL: f64 = 8.0;

pub const DOWNLOADING: &str = "Downloading...";
pub const QUEUED: &str = "Queued to Encode...";

/// Human readable size with binary units, e.g. `"1.50 GiB"`.
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = if bytes.is_finite() { bytes.max(0.0) } else { 0.0 };
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// `HH:MM:SS`, hours unbounded.
pub fn format_duration(secs: f64) -> String {
    let total = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

pub fn progress_bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / PERCENT_PER_CELL).floor() as usize).min(BAR_CELLS);
    format!("{}{}", "█".repeat(filled), "▒".repeat(BAR_CELLS - filled))
}

/// Status text while encoding quality `index` (zero based) of `total`.
pub fn progress_text(
    display_name: &str,
    snapshot: &ProgressSnapshot,
    index: usize,
    total: usize,
) -> String {
    format!(
        "‣ Anime Name : {name}\n\
         ‣ Status : Encoding\n\
         [{bar}] {percent:.2}%\n\
         ‣ Size : {done} out of ~ {estimate}\n\
         ‣ Speed : {speed}/s\n\
         ‣ Time Took : {elapsed}\n\
         ‣ Time Left : {eta}\n\
         ‣ File(s) Encoded: {index} / {total}",
        name = display_name,
        bar = progress_bar(snapshot.percent),
        percent = snapshot.percent,
        done = format_bytes(snapshot.bytes_done as f64),
        estimate = format_bytes(snapshot.bytes_total_estimate as f64),
        speed = format_bytes(snapshot.speed_bytes_per_sec),
        elapsed = format_duration(snapshot.elapsed_secs),
        eta = format_duration(snapshot.eta_secs),
        index = index,
        total = total,
    )
}

/// Status text when an encode is about to start.
pub fn encoding_text(display_name: &str, badge: &str) -> String {
    format!("‣ Anime Name : {}\n‣ Status : Encoding {}...", display_name, badge)
}

pub fn uploading_text(display_name: &str, badge: &str) -> String {
    format!("‣ Anime Name : {}\n‣ Status : Uploading {}...", display_name, badge)
}

/// Status text left behind when a phase fails.
pub fn failed_text(phase: &str) -> String {
    format!("{} Failed.", phase)
}
