use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rust_embed::RustEmbed;
use which::which_in;

use crate::error::{Result, SnagError};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";
pub const YTDLP: &str = "yt-dlp";

/// Optional bundled tools; drop a platform `yt-dlp` binary into `assets/` to ship it.
#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Asset;

/// `PATH` merged with the configured tool directories, set once at startup.
static SEARCH_PATH: OnceCell<OsString> = OnceCell::new();

pub fn set_search_path(path: OsString) {
    if SEARCH_PATH.set(path).is_err() {
        warn!("tool search path already set, keeping the first one");
    }
}

/// Search path handed to child processes, when one was configured.
pub fn configured_search_path() -> Option<&'static OsString> {
    SEARCH_PATH.get()
}

fn search_path() -> Option<OsString> {
    configured_search_path()
        .cloned()
        .or_else(|| std::env::var_os("PATH"))
}

pub fn platform_bin(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Looks a tool up on the executable search path.
pub fn resolve(name: &str) -> Result<PathBuf> {
    resolve_in(name, search_path())
}

pub fn resolve_in(name: &str, paths: Option<OsString>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which_in(platform_bin(name), paths, cwd).map_err(|_| SnagError::tool_not_found(name))
}

/// A bare program name is searched for; anything with a directory is checked as is.
pub fn locate(program: &Path) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    which_in(program, search_path(), cwd).ok()
}

/// ffprobe failures are absorbed by the probe, so fall back to the bare name.
pub fn ffprobe_program() -> PathBuf {
    resolve(FFPROBE).unwrap_or_else(|_| PathBuf::from(platform_bin(FFPROBE)))
}

/// yt-dlp from the search path, else the embedded copy extracted to the temp dir.
pub fn resolve_ytdlp() -> Result<PathBuf> {
    if let Ok(path) = resolve(YTDLP) {
        return Ok(path);
    }
    let bin = platform_bin(YTDLP);
    let data = Asset::get(&bin).ok_or_else(|| SnagError::tool_not_found(YTDLP))?;
    let tmp = std::env::temp_dir().join(&bin);
    if !tmp.exists() {
        info!("extracting bundled {bin} to {}", tmp.display());
        let mut f = File::create(&tmp)?;
        f.write_all(&data.data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))?;
        }
    } else {
        debug!("using previously extracted {}", tmp.display());
    }
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_is_reported_by_name() {
        let err = resolve("snag-no-such-tool").unwrap_err();
        assert_eq!(err.to_string(), "snag-no-such-tool executable not found in PATH.");
    }

    #[cfg(unix)]
    #[test]
    fn finds_tool_in_given_directories() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("snag-test-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let paths = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(resolve_in("snag-test-tool", Some(paths)).unwrap(), tool);
        assert_eq!(locate(&tool), Some(tool.clone()));
        assert!(resolve_in("snag-test-tool", None).is_err());
    }

    #[test]
    fn platform_suffix() {
        let bin = platform_bin(FFMPEG);
        if cfg!(target_os = "windows") {
            assert_eq!(bin, "ffmpeg.exe");
        } else {
            assert_eq!(bin, "ffmpeg");
        }
    }
}
