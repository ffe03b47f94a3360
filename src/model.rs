use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

use crate::error::SnagError;

/// Bitrates offered for MP3 output, in kbps.
pub const MP3_BITRATES: [u32; 3] = [320, 256, 128];

/// Selector handed to the download capability when no specific height is wanted.
pub const GENERIC_SELECTOR: &str = "bestvideo+bestaudio/best";

/// Audio container for an audio-only conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    /// libmp3lame; the only format that takes a bitrate.
    Mp3,
    /// 16-bit PCM.
    Wav,
    /// 16-bit big-endian PCM.
    Aiff,
    /// Lossless, default encoder settings.
    Flac,
    /// Anything else is passed through with only its extension.
    Other(String),
}

impl AudioFormat {
    pub const CHOICES: [AudioFormat; 4] = [Self::Mp3, Self::Wav, Self::Aiff, Self::Flac];

    /// Case-insensitive; unknown names become [`AudioFormat::Other`].
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "wav" => Self::Wav,
            "aiff" => Self::Aiff,
            "flac" => Self::Flac,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn extension(&self) -> &str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Aiff => "aiff",
            Self::Flac => "flac",
            Self::Other(ext) => ext,
        }
    }

    pub fn label(&self) -> String {
        self.extension().to_ascii_uppercase()
    }
}

/// Video container. Each one has fixed codec defaults in the transcode plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    Mp4,
    Avi,
    Mkv,
    Webm,
    Mov,
}

impl VideoFormat {
    pub const CHOICES: [VideoFormat; 5] = [Self::Mp4, Self::Avi, Self::Mkv, Self::Webm, Self::Mov];

    pub fn parse(value: &str) -> Option<Self> {
        Self::CHOICES
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(value))
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }

    pub fn label(self) -> String {
        self.extension().to_ascii_uppercase()
    }
}

/// What a single transcode should produce.
///
/// Built by the parameter prompt or parsed from a conversion code such as
/// `audio:MP3:320` or `video:MKV:1440`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversionDescriptor {
    /// Drop the video stream.
    Audio {
        format: AudioFormat,
        /// Required for MP3, ignored otherwise.
        bitrate_kbps: Option<u32>,
    },
    /// Re-encode or remux at a target height.
    Video {
        format: VideoFormat,
        target_height: u32,
    },
}

impl ConversionDescriptor {
    /// Checked constructor; non-MP3 formats drop the bitrate.
    pub fn audio(format: AudioFormat, bitrate_kbps: Option<u32>) -> Result<Self, SnagError> {
        let bitrate_kbps = if format == AudioFormat::Mp3 {
            bitrate_kbps
        } else {
            None
        };
        let descriptor = Self::Audio {
            format,
            bitrate_kbps,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn video(format: VideoFormat, target_height: u32) -> Self {
        Self::Video {
            format,
            target_height,
        }
    }
}

impl ConversionDescriptor {
    /// Rejects descriptors the transcode plan cannot honor, however they were built.
    pub fn validate(&self) -> Result<(), SnagError> {
        match self {
            Self::Audio {
                format: AudioFormat::Mp3,
                bitrate_kbps,
            } => match bitrate_kbps {
                None => Err(SnagError::UnsupportedFormat(
                    "bitrate not specified for MP3 conversion".to_string(),
                )),
                Some(kbps) if !MP3_BITRATES.contains(kbps) => Err(SnagError::UnsupportedFormat(
                    format!("unsupported MP3 bitrate {kbps}kbps"),
                )),
                Some(_) => Ok(()),
            },
            Self::Video {
                target_height: 0, ..
            } => Err(SnagError::UnsupportedFormat(
                "resolution not specified for video conversion".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for ConversionDescriptor {
    type Err = SnagError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = code.split(':').map(str::trim).collect();
        if parts.len() < 2 || parts[1].is_empty() {
            return Err(SnagError::UnsupportedFormat(code.to_string()));
        }
        match parts[0].to_ascii_lowercase().as_str() {
            "audio" => {
                let bitrate = match parts.get(2) {
                    Some(raw) => Some(
                        raw.parse::<u32>()
                            .map_err(|_| SnagError::UnsupportedFormat(code.to_string()))?,
                    ),
                    None => None,
                };
                Self::audio(AudioFormat::parse(parts[1]), bitrate)
            }
            "video" => {
                let format = VideoFormat::parse(parts[1])
                    .ok_or_else(|| SnagError::UnsupportedFormat(code.to_string()))?;
                let height = parts
                    .get(2)
                    .and_then(|raw| raw.parse::<u32>().ok())
                    .filter(|h| *h > 0)
                    .ok_or_else(|| {
                        SnagError::UnsupportedFormat(format!(
                            "resolution not specified for video conversion: {code}"
                        ))
                    })?;
                Ok(Self::video(format, height))
            }
            _ => Err(SnagError::UnsupportedFormat(code.to_string())),
        }
    }
}

impl fmt::Display for ConversionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio {
                format,
                bitrate_kbps: Some(kbps),
            } => write!(f, "audio:{}:{kbps}", format.label()),
            Self::Audio { format, .. } => write!(f, "audio:{}", format.label()),
            Self::Video {
                format,
                target_height,
            } => write!(f, "video:{}:{target_height}", format.label()),
        }
    }
}

/// Download quality requested from the download capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualitySelector {
    /// 2160 lines.
    FourK,
    /// 1440 lines.
    TwoK,
    P1080,
    P720,
    P480,
    /// Best available, marked as a short.
    Shorts,
    /// Best available; also the fallback after a height-specific failure.
    HighestAvailable,
}

impl QualitySelector {
    /// Choices offered for standard (non-shorts) downloads.
    pub const STANDARD: [QualitySelector; 5] =
        [Self::FourK, Self::TwoK, Self::P1080, Self::P720, Self::P480];

    /// yt-dlp `-f` expression.
    pub fn format_selector(self) -> &'static str {
        match self {
            Self::FourK => "bestvideo[height=2160]+bestaudio/best",
            Self::TwoK => "bestvideo[height=1440]+bestaudio/best",
            Self::P1080 => "bestvideo[height=1080]+bestaudio/best",
            Self::P720 => "bestvideo[height=720]+bestaudio/best",
            Self::P480 => "bestvideo[height=480]+bestaudio/best",
            Self::Shorts | Self::HighestAvailable => GENERIC_SELECTOR,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FourK => "4k",
            Self::TwoK => "2k",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::Shorts => "Shorts",
            Self::HighestAvailable => "Highest available",
        }
    }

    /// Suffix placed before the extension of the downloaded file.
    pub fn file_marker(self) -> String {
        match self {
            Self::Shorts => " - SHORTS".to_string(),
            Self::HighestAvailable => " - HIGH RES".to_string(),
            other => format!(" - {}", other.label()),
        }
    }

    /// Only height-specific selectors have something to relax on failure.
    pub fn retries_on_failure(self) -> bool {
        self.format_selector() != GENERIC_SELECTOR
    }
}

/// Latest progress of a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Clamped to `0..=100`.
    pub percent: u8,
    /// Remaining time for transcodes, downloaded/total size for downloads.
    pub note: String,
}

impl ProgressEvent {
    pub fn new(percent: f64, note: impl Into<String>) -> Self {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            percent,
            note: note.into(),
        }
    }
}

/// Everything a running task reports back to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
///
/// Any number of `Progress` events are followed by exactly one `Finished`
/// or `Failed`.
pub enum TaskEvent {
    Progress(ProgressEvent),
    /// Path of the produced file.
    Finished(PathBuf),
    /// User-facing error message.
    Failed(String),
}

/// Terminal result of a slot, handed to the UI once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Path of the produced file.
    Finished(PathBuf),
    /// User-facing error message, also used when the task vanished.
    Failed(String),
}

/// One UI-facing ownership point; holds at most one task at a time.
#[derive(Debug, Default)]
pub enum SlotState {
    /// Ready to start a task.
    #[default]
    Idle,
    /// A task is running; its events arrive on `events`.
    Busy {
        events: UnboundedReceiver<TaskEvent>,
        /// Last progress seen, if any.
        progress: Option<ProgressEvent>,
    },
}

impl SlotState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Takes ownership of a started task's event stream. Refused while busy.
    pub fn start(&mut self, events: UnboundedReceiver<TaskEvent>) -> bool {
        if self.is_busy() {
            return false;
        }
        *self = Self::Busy {
            events,
            progress: None,
        };
        true
    }

    /// Progress to render while busy.
    pub fn progress(&self) -> Option<&ProgressEvent> {
        match self {
            Self::Busy { progress, .. } => progress.as_ref(),
            Self::Idle => None,
        }
    }

    /// Drains pending events; returns the outcome once the task terminates.
    pub fn poll(&mut self) -> Option<TaskOutcome> {
        let Self::Busy { events, progress } = self else {
            return None;
        };
        let outcome = loop {
            match events.try_recv() {
                Ok(TaskEvent::Progress(event)) => *progress = Some(event),
                Ok(TaskEvent::Finished(path)) => break TaskOutcome::Finished(path),
                Ok(TaskEvent::Failed(message)) => break TaskOutcome::Failed(message),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    break TaskOutcome::Failed("task ended without reporting a result".to_string());
                }
            }
        };
        *self = Self::Idle;
        Some(outcome)
    }
}
