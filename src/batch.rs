//! Sequential multi-URL downloads.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::downloader::{FetchTask, MediaFetcher};
use crate::error::{Result, SnagError};
use crate::model::{QualitySelector, TaskEvent};

const SHORTS_PATH: &str = "youtube.com/shorts/";

/// Entry fields first, then the bulk field split on commas and whitespace.
/// Blank entries are skipped and repeats keep their first position.
pub fn collect_urls(fields: &[String], bulk: &str) -> Vec<String> {
    let candidates = fields
        .iter()
        .map(|field| field.trim())
        .chain(bulk.split(|c: char| c == ',' || c.is_whitespace()).map(str::trim))
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    dedupe(candidates)
}

/// Keeps the first occurrence of every URL, in order.
fn dedupe(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for url in urls {
        if !unique.contains(&url) {
            unique.push(url);
        }
    }
    unique
}

/// `youtube.com/shorts/<id>` becomes `youtube.com/watch?v=<id>`; anything else is unchanged.
pub fn normalize_watch_url(url: &str) -> String {
    if url.contains(SHORTS_PATH) {
        url.replacen("shorts/", "watch?v=", 1)
    } else {
        url.to_string()
    }
}

/// Which tab started the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Watch URLs at one quality; shorts links are rewritten first.
    Standard(QualitySelector),
    /// URLs are used as given.
    Shorts,
}

impl BatchMode {
    pub fn quality(self) -> QualitySelector {
        match self {
            Self::Standard(quality) => quality,
            Self::Shorts => QualitySelector::Shorts,
        }
    }

    fn prepare(self, url: &str) -> String {
        match self {
            Self::Standard(_) => normalize_watch_url(url),
            Self::Shorts => url.to_string(),
        }
    }
}

/// What the batch window shows while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// One line for the batch log.
    Log(String),
    /// Percent of the URL currently downloading.
    Progress(u8),
    /// A file to add to the recent downloads list.
    Downloaded(PathBuf),
    /// Always the last event.
    Finished,
}

/// A non-empty, deduplicated list of URLs and how far the batch has got.
#[derive(Debug, Clone)]
pub struct BatchJob {
    urls: Vec<String>,
    mode: BatchMode,
    cursor: usize,
}

impl BatchJob {
    pub fn new(urls: Vec<String>, mode: BatchMode) -> Result<Self> {
        if urls.is_empty() {
            return Err(SnagError::EmptyBatch);
        }
        // Rewrite first so a shorts link and its watch link collapse into one entry.
        let urls = dedupe(urls.iter().map(|url| mode.prepare(url)));
        Ok(Self {
            urls,
            mode,
            cursor: 0,
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.urls.len()
    }
}

/// Runs a [`BatchJob`] one URL at a time through [`FetchTask`].
pub struct BatchCoordinator<F: ?Sized> {
    job: BatchJob,
    output_dir: PathBuf,
    fetcher: Arc<F>,
}

impl<F: MediaFetcher + ?Sized> BatchCoordinator<F> {
    pub fn new(job: BatchJob, output_dir: impl Into<PathBuf>, fetcher: Arc<F>) -> Self {
        Self {
            job,
            output_dir: output_dir.into(),
            fetcher,
        }
    }

    pub async fn run(mut self, events: UnboundedSender<BatchEvent>) {
        let log = |line: String| {
            info!("{line}");
            let _ = events.send(BatchEvent::Log(line));
        };
        log(format!(
            "Starting batch download of {} URL(s)...",
            self.job.urls.len()
        ));

        while !self.job.is_done() {
            let url = self.job.urls[self.job.cursor].clone();
            log(format!("Downloading: {url}"));
            match self.fetch_one(&url, &events).await {
                Ok(path) => {
                    log(format!("Downloaded: {}", path.display()));
                    let _ = events.send(BatchEvent::Downloaded(path));
                }
                Err(message) => {
                    warn!("batch entry {url} failed");
                    log(format!("Error: {message}"));
                }
            }
            self.job.cursor += 1;
        }

        log("Batch download complete.".to_string());
        let _ = events.send(BatchEvent::Finished);
    }

    async fn fetch_one(
        &self,
        url: &str,
        events: &UnboundedSender<BatchEvent>,
    ) -> std::result::Result<PathBuf, String> {
        let (tx, mut rx) = unbounded_channel();
        let task = FetchTask::new(
            url,
            self.output_dir.clone(),
            self.job.mode.quality(),
            self.fetcher.clone(),
        );
        let forward = async {
            let mut outcome = Err("download ended without a result".to_string());
            while let Some(event) = rx.recv().await {
                match event {
                    TaskEvent::Progress(progress) => {
                        let _ = events.send(BatchEvent::Progress(progress.percent));
                    }
                    TaskEvent::Finished(path) => outcome = Ok(path),
                    TaskEvent::Failed(message) => outcome = Err(message),
                }
            }
            outcome
        };
        let ((), outcome) = tokio::join!(task.run(tx), forward);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{FetchRequest, ProgressCallback};
    use crate::progress::FetchProgress;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        urls: Mutex<Vec<String>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl MediaFetcher for RecordingFetcher {
        async fn fetch(
            &self,
            request: &FetchRequest,
            progress: ProgressCallback<'_>,
        ) -> Result<PathBuf> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.urls.lock().unwrap().push(request.url.clone());
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&request.url.as_str()) {
                return Err(SnagError::Download("ERROR: Video unavailable".to_string()));
            }
            progress(FetchProgress {
                status: "finished".to_string(),
                downloaded_bytes: None,
                total_bytes: None,
                total_bytes_estimate: None,
            });
            let name = request.url.rsplit('/').next().unwrap_or("video");
            let path = request.output_dir.join(format!("{name}.mp4"));
            std::fs::write(&path, b"")?;
            Ok(path)
        }
    }

    async fn run_batch(
        urls: &[&str],
        mode: BatchMode,
        fetcher: Arc<RecordingFetcher>,
        dir: &std::path::Path,
    ) -> Vec<BatchEvent> {
        let job = BatchJob::new(urls.iter().map(|u| u.to_string()).collect(), mode).unwrap();
        let (tx, mut rx) = unbounded_channel();
        BatchCoordinator::new(job, dir, fetcher).run(tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn logs(events: &[BatchEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Log(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn duplicates_collapse_in_order() {
        let fields = vec!["a".to_string(), " a ".to_string(), String::new()];
        assert_eq!(collect_urls(&fields, "b, a\nc  b"), vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_input_is_rejected() {
        let urls = collect_urls(&[" ".to_string()], " , \n");
        assert!(urls.is_empty());
        assert!(matches!(
            BatchJob::new(urls, BatchMode::Shorts),
            Err(SnagError::EmptyBatch)
        ));
    }

    #[test]
    fn shorts_links_become_watch_links() {
        assert_eq!(
            normalize_watch_url("https://www.youtube.com/shorts/abc123"),
            "https://www.youtube.com/watch?v=abc123"
        );
        assert_eq!(
            normalize_watch_url("https://www.youtube.com/watch?v=abc123"),
            "https://www.youtube.com/watch?v=abc123"
        );
    }

    #[test]
    fn job_drops_repeats_after_rewrite() {
        let urls = vec![
            "https://youtube.com/shorts/xyz".to_string(),
            "https://youtube.com/watch?v=xyz".to_string(),
            "https://youtube.com/watch?v=abc".to_string(),
            "https://youtube.com/watch?v=xyz".to_string(),
        ];
        let job = BatchJob::new(urls, BatchMode::Standard(QualitySelector::P480)).unwrap();
        assert_eq!(
            job.urls(),
            &[
                "https://youtube.com/watch?v=xyz",
                "https://youtube.com/watch?v=abc"
            ]
        );
    }

    #[test]
    fn only_standard_mode_rewrites() {
        let url = "https://youtube.com/shorts/xyz".to_string();
        let standard =
            BatchJob::new(vec![url.clone()], BatchMode::Standard(QualitySelector::P720)).unwrap();
        assert_eq!(standard.urls(), &["https://youtube.com/watch?v=xyz"]);
        let shorts = BatchJob::new(vec![url.clone()], BatchMode::Shorts).unwrap();
        assert_eq!(shorts.urls(), &[url]);
    }

    #[tokio::test]
    async fn one_download_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let events = run_batch(
            &["u/1", "u/2", "u/3"],
            BatchMode::Shorts,
            fetcher.clone(),
            dir.path(),
        )
        .await;

        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*fetcher.urls.lock().unwrap(), vec!["u/1", "u/2", "u/3"]);
        assert_eq!(events.last(), Some(&BatchEvent::Finished));
        let downloaded: Vec<&BatchEvent> = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::Downloaded(_)))
            .collect();
        assert_eq!(
            downloaded,
            vec![
                &BatchEvent::Downloaded(dir.path().join("1 - SHORTS.mp4")),
                &BatchEvent::Downloaded(dir.path().join("2 - SHORTS.mp4")),
                &BatchEvent::Downloaded(dir.path().join("3 - SHORTS.mp4")),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_url_is_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RecordingFetcher::default());
        let events = run_batch(&["a", "a", "b"], BatchMode::Shorts, fetcher.clone(), dir.path()).await;

        assert_eq!(*fetcher.urls.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(
            logs(&events)[0],
            "Starting batch download of 2 URL(s)..."
        );
        assert_eq!(events.last(), Some(&BatchEvent::Finished));
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RecordingFetcher {
            failing: vec!["u/bad"],
            ..Default::default()
        });
        let events = run_batch(
            &["u/bad", "u/good"],
            BatchMode::Standard(QualitySelector::HighestAvailable),
            fetcher,
            dir.path(),
        )
        .await;

        let good = dir.path().join("good - HIGH RES.mp4");
        let downloaded_line = format!("Downloaded: {}", good.display());
        assert_eq!(
            logs(&events),
            vec![
                "Starting batch download of 2 URL(s)...",
                "Downloading: u/bad",
                "Error: ERROR: Video unavailable",
                "Downloading: u/good",
                downloaded_line.as_str(),
                "Batch download complete.",
            ]
        );
        assert!(events.contains(&BatchEvent::Progress(100)));
    }
}
