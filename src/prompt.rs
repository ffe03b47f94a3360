//! Resolution of conversion parameters from a chain of user choices.
//!
//! The chain is category -> format -> bitrate (MP3) or resolution (video).
//! Each step may be cancelled, which abandons the whole chain. The same
//! [`ParameterPrompt`] state machine backs the blocking
//! [`choose_conversion_parameters`] pipeline and the GUI dialog.

use crate::model::{AudioFormat, ConversionDescriptor, MP3_BITRATES, VideoFormat};

/// Fixed resolution choices as (label, height).
pub const RESOLUTIONS: [(&str, u32); 3] = [("1080p", 1080), ("2K", 1440), ("4K", 2160)];

/// Informational label suffix for targets above the source height.
pub const UPSCALED_TAG: &str = " (UPSCALED)";

const AUDIO: &str = "Audio";
const VIDEO: &str = "Video";

/// One choice dialog: a title, a question and the offered answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: &'static str,
    pub label: String,
    /// Display labels; the answer must be one of them.
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Category,
    AudioFormat,
    Bitrate,
    VideoFormat,
    Resolution(VideoFormat),
}

/// Walks category, format, then bitrate or resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPrompt {
    step: Step,
    source_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Ask the next question.
    Next(ParameterPrompt),
    Resolved(ConversionDescriptor),
    Cancelled,
}

impl ParameterPrompt {
    pub fn new(source_height: Option<u32>) -> Self {
        Self {
            step: Step::Category,
            source_height,
        }
    }

    pub fn source_height(&self) -> Option<u32> {
        self.source_height
    }

    pub fn request(&self) -> PromptRequest {
        match self.step {
            Step::Category => PromptRequest {
                title: "Select Conversion Category",
                label: "Category:".to_string(),
                options: vec![AUDIO.to_string(), VIDEO.to_string()],
            },
            Step::AudioFormat => PromptRequest {
                title: "Select Audio Format",
                label: "Format:".to_string(),
                options: AudioFormat::CHOICES.iter().map(AudioFormat::label).collect(),
            },
            Step::Bitrate => PromptRequest {
                title: "Select Audio Quality",
                label: "Bitrate (kbps):".to_string(),
                options: MP3_BITRATES.iter().map(u32::to_string).collect(),
            },
            Step::VideoFormat => PromptRequest {
                title: "Select Video Format",
                label: "Format:".to_string(),
                options: VideoFormat::CHOICES.iter().map(|f| f.label()).collect(),
            },
            Step::Resolution(_) => PromptRequest {
                title: "Select Resolution",
                label: match self.source_height {
                    Some(height) => format!("Resolution (source: {height}p)"),
                    None => "Resolution:".to_string(),
                },
                options: resolution_options(self.source_height),
            },
        }
    }

    /// Advances with one of the offered options; anything else cancels.
    pub fn answer(self, choice: &str) -> PromptOutcome {
        if !self.request().options.iter().any(|option| option == choice) {
            return PromptOutcome::Cancelled;
        }
        let next = |step| {
            PromptOutcome::Next(Self {
                step,
                source_height: self.source_height,
            })
        };
        match self.step {
            Step::Category if choice == AUDIO => next(Step::AudioFormat),
            Step::Category => next(Step::VideoFormat),
            Step::AudioFormat => match AudioFormat::parse(choice) {
                AudioFormat::Mp3 => next(Step::Bitrate),
                format => resolve_audio(format, None),
            },
            Step::Bitrate => resolve_audio(AudioFormat::Mp3, choice.parse().ok()),
            Step::VideoFormat => match VideoFormat::parse(choice) {
                Some(format) => next(Step::Resolution(format)),
                None => PromptOutcome::Cancelled,
            },
            Step::Resolution(format) => match resolution_height(choice) {
                Some(height) => {
                    PromptOutcome::Resolved(ConversionDescriptor::video(format, height))
                }
                None => PromptOutcome::Cancelled,
            },
        }
    }
}

fn resolve_audio(format: AudioFormat, bitrate: Option<u32>) -> PromptOutcome {
    match ConversionDescriptor::audio(format, bitrate) {
        Ok(descriptor) => PromptOutcome::Resolved(descriptor),
        Err(_) => PromptOutcome::Cancelled,
    }
}

/// Resolution labels, tagged where the target exceeds a known source height.
pub fn resolution_options(source_height: Option<u32>) -> Vec<String> {
    RESOLUTIONS
        .iter()
        .map(|(label, height)| match source_height {
            Some(source) if *height > source => format!("{label}{UPSCALED_TAG}"),
            _ => label.to_string(),
        })
        .collect()
}

/// Height for a displayed label, with any upscale tag stripped first.
pub fn resolution_height(label: &str) -> Option<u32> {
    let label = label.strip_suffix(UPSCALED_TAG).unwrap_or(label);
    RESOLUTIONS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, height)| *height)
}

/// Context-menu label for converting a video of the given height.
pub fn convert_action_label(source_height: Option<u32>) -> &'static str {
    match source_height {
        Some(height) if height < 1080 => "Convert (Upscale)",
        Some(_) => "Convert (No Scaling)",
        None => "Convert",
    }
}

/// Something that can put a question to the user; `None` means cancelled.
pub trait Chooser {
    fn choose(&mut self, request: &PromptRequest) -> Option<String>;
}

/// Runs the whole chain, returning `None` as soon as any step is cancelled.
pub fn choose_conversion_parameters(
    chooser: &mut impl Chooser,
    source_height: Option<u32>,
) -> Option<ConversionDescriptor> {
    let mut prompt = ParameterPrompt::new(source_height);
    loop {
        let choice = chooser.choose(&prompt.request())?;
        match prompt.answer(&choice) {
            PromptOutcome::Next(next) => prompt = next,
            PromptOutcome::Resolved(descriptor) => return Some(descriptor),
            PromptOutcome::Cancelled => return None,
        }
    }
}
