use std::path::{Path, PathBuf};

use log::debug;

use crate::cmd;

/// Read-only inspection of a media file. Failures read as "unknown".
pub trait MediaProbe: Send + Sync {
    /// Height in pixels of the first video stream.
    fn height(&self, path: &Path) -> Option<u32>;
    /// Container duration in seconds.
    fn duration(&self, path: &Path) -> Option<f64>;
}

/// Runs `ffprobe` synchronously; call it off the UI thread.
#[derive(Debug, Clone)]
pub struct FfprobeService {
    program: PathBuf,
}

impl FfprobeService {
    /// `program` is usually [`crate::tools::ffprobe_program`].
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str], path: &Path) -> Option<String> {
        let output = cmd::command(&self.program)
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| debug!("ffprobe could not start for {}: {e}", path.display()))
            .ok()?;
        if !output.status.success() {
            debug!(
                "ffprobe exited with {:?} for {}: {}",
                output.status.code(),
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MediaProbe for FfprobeService {
    fn height(&self, path: &Path) -> Option<u32> {
        let stdout = self.run(
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=height",
                "-of",
                "csv=p=0",
            ],
            path,
        )?;
        parse_height(&stdout)
    }

    fn duration(&self, path: &Path) -> Option<f64> {
        let stdout = self.run(
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
        )?;
        parse_duration(&stdout)
    }
}

fn parse_height(stdout: &str) -> Option<u32> {
    let value = stdout.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_duration(stdout: &str) -> Option<f64> {
    let seconds: f64 = stdout.trim().parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}

/// Probes height only for files that exist; anything else is unknown.
pub fn source_height(probe: &dyn MediaProbe, input: Option<&Path>) -> Option<u32> {
    input.filter(|path| path.exists()).and_then(|path| probe.height(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_output() {
        assert_eq!(parse_height("1080\n"), Some(1080));
        assert_eq!(parse_height("  720  "), Some(720));
        assert_eq!(parse_height(""), None);
        assert_eq!(parse_height("N/A"), None);
        assert_eq!(parse_height("1080\n720\n"), None);
    }

    #[test]
    fn duration_output() {
        assert_eq!(parse_duration("180.040000\n"), Some(180.04));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("-1"), None);
    }

    #[test]
    fn missing_binary_reads_as_unknown() {
        let probe = FfprobeService::new("definitely-not-a-real-ffprobe-binary");
        assert_eq!(probe.height(Path::new("video.mp4")), None);
        assert_eq!(probe.duration(Path::new("video.mp4")), None);
    }

    struct FixedHeight(u32);

    impl MediaProbe for FixedHeight {
        fn height(&self, _path: &Path) -> Option<u32> {
            Some(self.0)
        }

        fn duration(&self, _path: &Path) -> Option<f64> {
            None
        }
    }

    #[test]
    fn source_height_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("clip.mp4");
        std::fs::write(&present, b"").unwrap();

        assert_eq!(source_height(&FixedHeight(720), Some(&present)), Some(720));
        assert_eq!(
            source_height(&FixedHeight(720), Some(&dir.path().join("gone.mp4"))),
            None
        );
        assert_eq!(source_height(&FixedHeight(720), None), None);
    }
}
