use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::cmd::{self, LossyLines};
use crate::error::{Result, SnagError};
use crate::model::{ProgressEvent, QualitySelector, TaskEvent};
use crate::progress::{
    FetchProgress, YTDLP_MOVED_TAG, YTDLP_PROGRESS_TAG, parse_ytdlp_moved_line,
    parse_ytdlp_progress_line,
};
use crate::tools;

/// What to download, where, and with which format selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub output_dir: PathBuf,
    pub format_selector: String,
}

/// Receives every progress record yt-dlp prints.
pub type ProgressCallback<'a> = &'a (dyn Fn(FetchProgress) + Send + Sync);

/// The video-download capability. Returns the path of the downloaded file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressCallback<'_>) -> Result<PathBuf>;
}

/// Drives the `yt-dlp` executable.
#[derive(Debug, Clone, Default)]
pub struct YtDlp {
    /// Resolved on each fetch when unset.
    program: Option<PathBuf>,
}

impl YtDlp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips lookup and uses this executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn args(request: &FetchRequest) -> Vec<String> {
        vec![
            "--encoding".to_owned(),
            "utf-8".to_owned(),
            "--newline".to_owned(),
            "--progress".to_owned(),
            "--progress-template".to_owned(),
            format!(
                "download:{YTDLP_PROGRESS_TAG}|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s"
            ),
            "-O".to_owned(),
            format!("after_move:{YTDLP_MOVED_TAG}|%(filepath)s"),
            "-f".to_owned(),
            request.format_selector.clone(),
            "-o".to_owned(),
            format!("{}/%(title)s.%(ext)s", request.output_dir.display()),
            "--".to_owned(),
            request.url.clone(),
        ]
    }
}

#[async_trait]
impl MediaFetcher for YtDlp {
    async fn fetch(&self, request: &FetchRequest, progress: ProgressCallback<'_>) -> Result<PathBuf> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => tools::resolve_ytdlp()?,
        };
        let args = Self::args(request);
        debug!("{} {}", program.display(), args.join(" "));

        let mut child = cmd::async_command(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let out = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stdout was not captured"))?;
        let err = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stderr was not captured"))?;
        let mut out_lines = LossyLines::new(out);
        let mut err_lines = LossyLines::new(err);
        let (mut out_open, mut err_open) = (true, true);

        let mut moved_to: Option<PathBuf> = None;
        let mut last_error: Option<String> = None;

        // Progress goes to stderr under -O's implied quiet mode, so read both streams.
        while out_open || err_open {
            let line = tokio::select! {
                line = out_lines.next_line(), if out_open => line?.or_else(|| { out_open = false; None }),
                line = err_lines.next_line(), if err_open => line?.or_else(|| { err_open = false; None }),
            };
            let Some(line) = line else { continue };
            if let Some(record) = parse_ytdlp_progress_line(&line) {
                progress(record);
            } else if let Some(path) = parse_ytdlp_moved_line(&line) {
                moved_to = Some(PathBuf::from(path));
            } else if line.starts_with("ERROR:") {
                last_error = Some(line.trim().to_string());
            } else {
                debug!("yt-dlp: {line}");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(SnagError::Download(last_error.unwrap_or_else(|| {
                format!("yt-dlp exited with code {:?}", status.code())
            })));
        }
        moved_to.ok_or_else(|| {
            SnagError::Download("yt-dlp did not report a downloaded file".to_string())
        })
    }
}

/// Renames `file` to `<stem><marker><.ext>` and returns the new path.
pub async fn rename_with_marker(file: &Path, marker: &str) -> Result<PathBuf> {
    let mut name = file.file_stem().unwrap_or_default().to_os_string();
    name.push(marker);
    if let Some(ext) = file.extension() {
        name.push(".");
        name.push(ext);
    }
    let target = file.with_file_name(name);
    tokio::fs::rename(file, &target).await?;
    Ok(target)
}

/// One download from start to a single terminal event, with one relaxed retry.
pub struct FetchTask<F: ?Sized> {
    url: String,
    output_dir: PathBuf,
    quality: QualitySelector,
    fetcher: Arc<F>,
}

impl<F: MediaFetcher + ?Sized> FetchTask<F> {
    pub fn new(
        url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        quality: QualitySelector,
        fetcher: Arc<F>,
    ) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            quality,
            fetcher,
        }
    }

    pub async fn run(self, events: UnboundedSender<TaskEvent>) {
        info!("downloading {} at {}", self.url, self.quality.label());
        let event = match self.execute(&events).await {
            Ok(path) => {
                info!("download finished: {}", path.display());
                TaskEvent::Finished(path)
            }
            Err(e) => {
                error!("download of {} failed: {e}", self.url);
                TaskEvent::Failed(e.to_string())
            }
        };
        let _ = events.send(event);
    }

    async fn execute(&self, events: &UnboundedSender<TaskEvent>) -> Result<PathBuf> {
        match self.attempt(self.quality, events).await {
            Ok(path) => Ok(path),
            Err(e) if self.quality.retries_on_failure() => {
                warn!(
                    "{} unavailable at {} ({e}); retrying with the best available format",
                    self.url,
                    self.quality.label()
                );
                self.attempt(QualitySelector::HighestAvailable, events).await
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(
        &self,
        quality: QualitySelector,
        events: &UnboundedSender<TaskEvent>,
    ) -> Result<PathBuf> {
        let request = FetchRequest {
            url: self.url.clone(),
            output_dir: self.output_dir.clone(),
            format_selector: quality.format_selector().to_string(),
        };
        let report = |record: FetchProgress| {
            if let Some(percent) = record.percent() {
                let note = record.summary();
                let _ = events.send(TaskEvent::Progress(ProgressEvent::new(percent, note)));
            }
        };
        let downloaded = self.fetcher.fetch(&request, &report).await?;
        rename_with_marker(&downloaded, &quality.file_marker()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    /// Fails the first `failures` calls, then writes `<title>.mp4` into the output dir.
    struct FlakyFetcher {
        failures: usize,
        selectors: Mutex<Vec<String>>,
    }

    impl FlakyFetcher {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                selectors: Mutex::new(Vec::new()),
            })
        }

        fn selectors(&self) -> Vec<String> {
            self.selectors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaFetcher for FlakyFetcher {
        async fn fetch(
            &self,
            request: &FetchRequest,
            progress: ProgressCallback<'_>,
        ) -> Result<PathBuf> {
            let call = {
                let mut selectors = self.selectors.lock().unwrap();
                selectors.push(request.format_selector.clone());
                selectors.len()
            };
            if call <= self.failures {
                return Err(SnagError::Download(format!(
                    "ERROR: Requested format is not available ({call})"
                )));
            }
            progress(FetchProgress {
                status: "downloading".to_string(),
                downloaded_bytes: Some(50),
                total_bytes: Some(100),
                total_bytes_estimate: None,
            });
            progress(FetchProgress {
                status: "finished".to_string(),
                downloaded_bytes: None,
                total_bytes: None,
                total_bytes_estimate: None,
            });
            let path = request.output_dir.join("Some Title.mp4");
            std::fs::write(&path, b"video")?;
            Ok(path)
        }
    }

    async fn run_to_end<F: MediaFetcher + ?Sized>(task: FetchTask<F>) -> Vec<TaskEvent> {
        let (tx, mut rx) = unbounded_channel();
        task.run(tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn success_renames_with_quality_marker() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FlakyFetcher::new(0);
        let task = FetchTask::new("https://v/1", dir.path(), QualitySelector::P720, fetcher.clone());

        let events = run_to_end(task).await;
        let expected = dir.path().join("Some Title - 720p.mp4");
        assert_eq!(events.last(), Some(&TaskEvent::Finished(expected.clone())));
        assert!(expected.exists());
        assert!(!dir.path().join("Some Title.mp4").exists());
        assert_eq!(
            fetcher.selectors(),
            vec!["bestvideo[height=720]+bestaudio/best"]
        );
    }

    #[tokio::test]
    async fn progress_percent_and_finished_state() {
        let dir = tempfile::tempdir().unwrap();
        let task = FetchTask::new("u", dir.path(), QualitySelector::Shorts, FlakyFetcher::new(0));
        let progress: Vec<(u8, String)> = run_to_end(task)
            .await
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Progress(p) => Some((p.percent, p.note)),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                (50, "50 B of 100 B".to_string()),
                (100, "Finished".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn specific_quality_retries_once_with_generic_selector() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FlakyFetcher::new(1);
        let task = FetchTask::new("u", dir.path(), QualitySelector::P1080, fetcher.clone());

        let events = run_to_end(task).await;
        assert_eq!(
            events.last(),
            Some(&TaskEvent::Finished(dir.path().join("Some Title - HIGH RES.mp4")))
        );
        assert_eq!(
            fetcher.selectors(),
            vec![
                "bestvideo[height=1080]+bestaudio/best",
                "bestvideo+bestaudio/best"
            ]
        );
    }

    #[tokio::test]
    async fn second_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FlakyFetcher::new(5);
        let task = FetchTask::new("u", dir.path(), QualitySelector::FourK, fetcher.clone());

        let events = run_to_end(task).await;
        assert_eq!(
            events,
            vec![TaskEvent::Failed(
                "ERROR: Requested format is not available (2)".to_string()
            )]
        );
        assert_eq!(fetcher.selectors().len(), 2);
    }

    #[tokio::test]
    async fn generic_selector_never_retries() {
        for quality in [QualitySelector::HighestAvailable, QualitySelector::Shorts] {
            let dir = tempfile::tempdir().unwrap();
            let fetcher = FlakyFetcher::new(1);
            let task = FetchTask::new("u", dir.path(), quality, fetcher.clone());

            let events = run_to_end(task).await;
            assert!(matches!(events.as_slice(), [TaskEvent::Failed(_)]), "{quality:?}");
            assert_eq!(fetcher.selectors().len(), 1, "{quality:?}");
        }
    }

    #[tokio::test]
    async fn marker_goes_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.b.webm");
        std::fs::write(&file, b"").unwrap();
        let renamed = rename_with_marker(&file, " - SHORTS").await.unwrap();
        assert_eq!(renamed, dir.path().join("a.b - SHORTS.webm"));
        assert!(renamed.exists());
    }

    #[test]
    fn ytdlp_arguments() {
        let args = YtDlp::args(&FetchRequest {
            url: "https://example.com/watch?v=x".to_string(),
            output_dir: PathBuf::from("/downloads"),
            format_selector: "bestvideo+bestaudio/best".to_string(),
        });
        let selector = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[selector + 1], "bestvideo+bestaudio/best");
        let template = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[template + 1], "/downloads/%(title)s.%(ext)s");
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/watch?v=x"));
        assert!(args.iter().any(|a| a.starts_with("download:SNAG|")));
        assert!(args.iter().any(|a| a == "after_move:MOVED|%(filepath)s"));
        assert!(args.windows(2).any(|pair| pair == ["--encoding", "utf-8"]));
    }

    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn badly_encoded_output_does_not_fail_download() {
        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let file = dir.path().join("Cafe.mp4");
        std::fs::write(&file, b"video").unwrap();
        let script = format!(
            "printf 'WARNING: caf\\351 title\\n' >&2\n\
             printf 'SNAG|downloading|50|100|NA\\n' >&2\n\
             printf 'MOVED|{}\\n'",
            file.display()
        );
        let fetcher = Arc::new(YtDlp::with_program(fake_ytdlp(bin.path(), &script)));

        let events = run_to_end(FetchTask::new(
            "https://example.com/watch?v=cafe",
            dir.path(),
            QualitySelector::HighestAvailable,
            fetcher,
        ))
        .await;
        assert_eq!(
            events.last(),
            Some(&TaskEvent::Finished(dir.path().join("Cafe - HIGH RES.mp4")))
        );
        assert!(events.contains(&TaskEvent::Progress(ProgressEvent::new(50.0, "50 B of 100 B"))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_last_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let script = "echo 'ERROR: [youtube] x: Video unavailable' >&2\nexit 1";
        let fetcher = Arc::new(YtDlp::with_program(fake_ytdlp(bin.path(), script)));

        let events = run_to_end(FetchTask::new(
            "u",
            dir.path(),
            QualitySelector::HighestAvailable,
            fetcher,
        ))
        .await;
        assert_eq!(
            events,
            vec![TaskEvent::Failed(
                "ERROR: [youtube] x: Video unavailable".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(YtDlp::with_program(dir.path().join("no-yt-dlp")));
        let events = run_to_end(FetchTask::new(
            "u",
            dir.path(),
            QualitySelector::HighestAvailable,
            fetcher,
        ))
        .await;
        assert!(matches!(events.as_slice(), [TaskEvent::Failed(_)]));
    }
}
