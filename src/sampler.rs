// src/sampler.rs

use crate::models::ProgressSample;

/// Throughput derived from the two most recent samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Bytes per second; `None` when it cannot be derived or is not positive.
    pub speed: Option<f64>,
    /// Seconds remaining; `None` while still calculating.
    pub eta_secs: Option<f64>,
}

impl Throughput {
    pub const UNKNOWN: Self = Self { speed: None, eta_secs: None };

    pub fn speed_text(&self) -> String {
        self.speed.map_or_else(|| "--".to_string(), format_speed)
    }

    pub fn eta_text(&self) -> String {
        self.eta_secs
            .map_or_else(|| "Calculating...".to_string(), format_eta)
    }
}

/// Keeps the two most recent samples and turns them into speed and ETA.
#[derive(Debug, Default, Clone)]
pub struct ProgressSampler {
    previous: Option<ProgressSample>,
    current: Option<ProgressSample>,
}

impl ProgressSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample and returns the throughput against the previous one.
    pub fn record(&mut self, sample: ProgressSample, total_bytes: Option<u64>) -> Throughput {
        self.previous = self.current.replace(sample);
        match self.previous {
            Some(prev) => measure(prev, sample, total_bytes),
            None => Throughput::UNKNOWN,
        }
    }

    pub fn latest(&self) -> Option<ProgressSample> {
        self.current
    }
}

/// Speed and ETA between two samples.
pub fn measure(prev: ProgressSample, curr: ProgressSample, total_bytes: Option<u64>) -> Throughput {
    let elapsed = curr.at.saturating_duration_since(prev.at).as_secs_f64();
    if elapsed <= 0.0 {
        return Throughput::UNKNOWN;
    }
    let speed = (curr.bytes as f64 - prev.bytes as f64) / elapsed;
    if !speed.is_finite() || speed <= 0.0 {
        return Throughput::UNKNOWN;
    }
    let eta_secs = total_bytes.map(|total| (total as f64 - curr.bytes as f64) / speed);
    Throughput {
        speed: Some(speed),
        eta_secs,
    }
}

/// `100 * bytes / total`, clamped to `[0, 100]`.
pub fn progress_percent(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * bytes as f64 / total as f64).clamp(0.0, 100.0)
}

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
const SPEED_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

fn scale(mut value: f64, units: &[&'static str]) -> (f64, &'static str) {
    let mut idx = 0;
    while value >= 1024.0 && idx < units.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    (value, units[idx])
}

pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 KB".to_string();
    }
    let (value, unit) = scale(bytes as f64, &SIZE_UNITS);
    format!("{value:.2} {unit}")
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "--".to_string();
    }
    let (value, unit) = scale(bytes_per_sec, &SPEED_UNITS);
    format!("{value:.2} {unit}")
}

/// Formats a remaining duration as `Ns`, `Mm Ss` or `Hh Mm`.
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--".to_string();
    }
    let total = seconds.round() as u64;
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

/// `"<done> / <total>"`, with `Unknown` while the total is not reported.
pub fn format_progress_size(bytes: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("{} / {}", format_size(bytes), format_size(total)),
        None => format!("{} / Unknown", format_size(bytes)),
    }
}
