use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::UnboundedSender;

use crate::cmd::{self, LossyLines};
use crate::error::{Result, SnagError};
use crate::model::{AudioFormat, ConversionDescriptor, TaskEvent, VideoFormat};
use crate::probe::MediaProbe;
use crate::progress::{FfmpegProgress, parse_ffmpeg_progress_line, transcode_progress};
use crate::tools::{self, FFMPEG};

/// stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// One conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub descriptor: ConversionDescriptor,
    /// Trade quality knobs for speed when scaling is needed.
    pub performance_mode: bool,
}

/// Deterministic ffmpeg invocation for a job, minus the binary itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodePlan {
    pub output: PathBuf,
    pub args: Vec<OsString>,
}

impl TranscodePlan {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    pub fn applies_scaling(&self) -> bool {
        self.has_arg("-vf")
    }

    pub fn copies_video_stream(&self) -> bool {
        self.args
            .windows(2)
            .any(|pair| pair[0] == "-c:v" && pair[1] == "copy")
    }
}

impl TranscodeJob {
    pub fn plan(&self, source_height: Option<u32>) -> TranscodePlan {
        let mut flags: Vec<String> = Vec::new();
        let suffix = match &self.descriptor {
            ConversionDescriptor::Audio {
                format,
                bitrate_kbps,
            } => {
                flags.push("-vn".into());
                match (format, bitrate_kbps) {
                    (AudioFormat::Mp3, Some(kbps)) => {
                        flags.push("-b:a".to_string());
                        flags.push(format!("{kbps}k"));
                        format!("_{kbps}kbps.mp3")
                    }
                    (AudioFormat::Aiff, _) => {
                        flags.extend(["-c:a", "pcm_s16le"].map(String::from));
                        ".aiff".to_string()
                    }
                    (AudioFormat::Flac, _) => {
                        flags.extend(["-c:a", "flac"].map(String::from));
                        ".flac".to_string()
                    }
                    // WAV needs no codec flag; unknown formats pass through on extension alone.
                    (format, _) => format!(".{}", format.extension()),
                }
            }
            ConversionDescriptor::Video {
                format,
                target_height,
            } => {
                let target = *target_height;
                let ext = format.extension();
                match source_height {
                    Some(source) if source == target => {
                        flags.extend(["-c:v", "copy"].map(String::from));
                        format!(" - {target}p (NO SCALING).{ext}")
                    }
                    _ => {
                        flags.push("-vf".to_string());
                        flags.push(format!("scale=-2:{target}:flags=lanczos"));
                        if self.performance_mode {
                            if *format == VideoFormat::Mp4 {
                                flags.extend(
                                    ["-c:v", "h264_nvenc", "-preset", "fast"].map(String::from),
                                );
                            } else {
                                flags.extend(["-threads", "0"].map(String::from));
                            }
                        }
                        match source_height {
                            Some(source) if target > source => {
                                format!(" - {target}p (UPSCALED).{ext}")
                            }
                            _ => format!(" - {target}p.{ext}"),
                        }
                    }
                }
            }
        };

        let output = output_with_suffix(&self.input, &suffix);
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), self.input.clone().into()];
        args.extend(flags.into_iter().map(OsString::from));
        args.push(output.clone().into());
        args.extend(["-progress", "pipe:1"].map(OsString::from));
        TranscodePlan { output, args }
    }
}

/// The input path without its extension, followed by `suffix`.
fn output_with_suffix(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.with_extension("").into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Runs one transcode from validation to a single terminal event.
pub struct TranscodeTask {
    job: TranscodeJob,
    ffmpeg: PathBuf,
    probe: Arc<dyn MediaProbe>,
}

impl TranscodeTask {
    pub fn new(job: TranscodeJob, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            job,
            ffmpeg: PathBuf::from(tools::platform_bin(FFMPEG)),
            probe,
        }
    }

    /// Name or path of the ffmpeg binary to resolve.
    pub fn with_binary(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    pub async fn run(self, events: UnboundedSender<TaskEvent>) {
        info!(
            "transcoding {} as {}",
            self.job.input.display(),
            self.job.descriptor
        );
        let event = match self.execute(&events).await {
            Ok(output) => {
                info!("transcode finished: {}", output.display());
                TaskEvent::Finished(output)
            }
            Err(e) => {
                error!("transcode of {} failed: {e}", self.job.input.display());
                TaskEvent::Failed(e.to_string())
            }
        };
        let _ = events.send(event);
    }

    async fn execute(&self, events: &UnboundedSender<TaskEvent>) -> Result<PathBuf> {
        self.job.descriptor.validate()?;
        let ffmpeg = tools::locate(&self.ffmpeg).ok_or_else(|| SnagError::tool_not_found(FFMPEG))?;
        if !self.job.input.exists() {
            return Err(SnagError::InputMissing(self.job.input.clone()));
        }
        let total = self
            .probe_blocking(|probe, path| probe.duration(path))
            .await
            .ok_or(SnagError::DurationUnknown)?;
        let source_height = match self.job.descriptor {
            ConversionDescriptor::Video { .. } => {
                self.probe_blocking(|probe, path| probe.height(path)).await
            }
            ConversionDescriptor::Audio { .. } => None,
        };

        let plan = self.job.plan(source_height);
        debug!("{} {}", ffmpeg.display(), display_args(&plan.args));

        let mut child = cmd::async_command(&ffmpeg)
            .args(&plan.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(collect_tail(stderr)));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout was not captured"))?;

        let mut progress = ProgressReader::new(stdout);
        while let Some(elapsed) = progress.next_elapsed().await? {
            let _ = events.send(TaskEvent::Progress(transcode_progress(elapsed, total)));
        }

        let status = child.wait().await?;
        let tail = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(SnagError::ProcessFailure {
                tool: FFMPEG.to_string(),
                code: status.code(),
                message: tail,
            });
        }
        Ok(plan.output)
    }

    async fn probe_blocking<T, F>(&self, query: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MediaProbe, &Path) -> Option<T> + Send + 'static,
    {
        let probe = Arc::clone(&self.probe);
        let input = self.job.input.clone();
        tokio::task::spawn_blocking(move || query(probe.as_ref(), &input))
            .await
            .ok()
            .flatten()
    }
}

/// Elapsed seconds from an `ffmpeg -progress` stream.
///
/// Yields until `progress=end` or end of stream, then stays exhausted.
struct ProgressReader<R> {
    lines: LossyLines<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> ProgressReader<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: LossyLines::new(reader),
            done: false,
        }
    }

    async fn next_elapsed(&mut self) -> std::io::Result<Option<f64>> {
        while !self.done {
            match self.lines.next_line().await? {
                Some(line) => match parse_ffmpeg_progress_line(&line) {
                    Some(FfmpegProgress::Elapsed(seconds)) => return Ok(Some(seconds)),
                    Some(FfmpegProgress::End) => self.done = true,
                    None => {}
                },
                None => self.done = true,
            }
        }
        Ok(None)
    }
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = LossyLines::new(reader);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.as_os_str())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
