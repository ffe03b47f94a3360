//! Parsers for the progress streams of ffmpeg and yt-dlp.

use crate::model::ProgressEvent;

/// One meaningful line of `ffmpeg -progress` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FfmpegProgress {
    /// Seconds of output written so far.
    Elapsed(f64),
    /// `progress=end`; nothing useful follows.
    End,
}

/// Reads `out_time`, `out_time_ms` and `out_time_us` lines and the end marker.
/// Every other key, and any value that does not parse, yields `None`.
pub fn parse_ffmpeg_progress_line(line: &str) -> Option<FfmpegProgress> {
    let line = line.trim();
    if line.contains("progress=end") {
        return Some(FfmpegProgress::End);
    }
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let seconds = match key.trim() {
        "out_time" => parse_timestamp(value)?,
        // Both keys carry microseconds; the `_ms` name is historical.
        "out_time_ms" | "out_time_us" => value.parse::<f64>().ok()? / 1_000_000.0,
        _ => return None,
    };
    seconds.is_finite().then_some(FfmpegProgress::Elapsed(seconds))
}

/// Parses `HH:MM:SS.ffffff`.
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percent and remaining time for a transcode that has written `elapsed` of `total` seconds.
pub fn transcode_progress(elapsed: f64, total: f64) -> ProgressEvent {
    let percent = if total > 0.0 { elapsed / total * 100.0 } else { 0.0 };
    ProgressEvent::new(percent, format_hms(total - elapsed))
}

/// Formats whole seconds as `H:MM:SS`; negative input reads as zero.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// Marker in front of the fields of our yt-dlp progress template.
pub const YTDLP_PROGRESS_TAG: &str = "SNAG";
/// Marker in front of the final path printed after yt-dlp moves the file.
pub const YTDLP_MOVED_TAG: &str = "MOVED";

/// One progress record from the download capability.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchProgress {
    /// yt-dlp download state, e.g. `downloading` or `finished`.
    pub status: String,
    /// Bytes written so far.
    pub downloaded_bytes: Option<u64>,
    /// Exact size, when the server reports one.
    pub total_bytes: Option<u64>,
    /// yt-dlp's guess when the exact size is unknown.
    pub total_bytes_estimate: Option<u64>,
}

impl FetchProgress {
    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }

    /// Percent of the known or estimated size; 100 once finished.
    pub fn percent(&self) -> Option<f64> {
        if self.is_finished() {
            return Some(100.0);
        }
        let total = self.total_bytes.or(self.total_bytes_estimate)?;
        if total == 0 {
            return None;
        }
        Some(self.downloaded_bytes.unwrap_or(0) as f64 / total as f64 * 100.0)
    }

    /// Human-readable note such as `12.5 MiB of 40.0 MiB`.
    pub fn summary(&self) -> String {
        if self.is_finished() {
            return "Finished".to_string();
        }
        let total = self.total_bytes.or(self.total_bytes_estimate);
        match (self.downloaded_bytes, total) {
            (Some(done), Some(total)) => format!("{} of {}", format_size(done), format_size(total)),
            (Some(done), None) => format_size(done),
            _ => self.status.clone(),
        }
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes as f64;
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.1} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Parses `SNAG|status|downloaded|total|estimate`; yt-dlp prints `NA` for missing fields.
pub fn parse_ytdlp_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(YTDLP_PROGRESS_TAG)?.strip_prefix('|')?;
    let mut fields = rest.split('|');
    let status = fields.next()?.trim().to_string();
    if status.is_empty() {
        return None;
    }
    let mut bytes = || fields.next().and_then(parse_byte_count);
    Some(FetchProgress {
        status,
        downloaded_bytes: bytes(),
        total_bytes: bytes(),
        total_bytes_estimate: bytes(),
    })
}

fn parse_byte_count(value: &str) -> Option<u64> {
    let value: f64 = value.trim().parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value as u64)
}

/// Extracts the final file path from a `MOVED|<path>` line.
pub fn parse_ytdlp_moved_line(line: &str) -> Option<&str> {
    let path = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(YTDLP_MOVED_TAG)?
        .strip_prefix('|')?;
    (!path.trim().is_empty()).then_some(path)
}
