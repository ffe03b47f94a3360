use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tools;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const APP_DIR_NAME: &str = "snag";

/// Where the external tools live when they are not already on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory holding the ffmpeg and ffprobe binaries.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

/// `config.json` in the working directory wins over the per-user one.
pub fn config_file_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl ToolsConfig {
    /// A missing file means defaults; a malformed one is logged and ignored.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::read(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring tools config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `PATH` with the configured ffmpeg directory in front, if one is set.
    pub fn search_path(&self, current: Option<OsString>) -> Result<Option<OsString>> {
        let Some(dir) = self.ffmpeg_path.as_ref().filter(|d| !d.as_os_str().is_empty()) else {
            return Ok(None);
        };
        let mut entries = vec![dir.clone()];
        if let Some(current) = current {
            entries.extend(std::env::split_paths(&current));
        }
        let joined = std::env::join_paths(entries).map_err(std::io::Error::other)?;
        Ok(Some(joined))
    }

    /// Hands the merged search path to tool lookup and child processes.
    ///
    /// A path that cannot be joined is logged and the inherited `PATH` stays in effect.
    pub fn install_search_path(&self) {
        match self.search_path(std::env::var_os("PATH")) {
            Ok(Some(path)) => {
                info!("adding configured ffmpeg directory to the tool search path");
                tools::set_search_path(path);
            }
            Ok(None) => {}
            Err(e) => warn!("ignoring configured ffmpeg directory: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ToolsConfig::load(&dir.path().join(CONFIG_FILE_NAME)),
            ToolsConfig::default()
        );
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ToolsConfig::load(&path), ToolsConfig::default());
    }

    #[test]
    fn reads_ffmpeg_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "ffmpeg_path": "/opt/ffmpeg/bin" }"#).unwrap();
        assert_eq!(
            ToolsConfig::load(&path).ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin"))
        );
    }

    #[test]
    fn configured_dir_goes_first() {
        let config = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ffmpeg/bin")),
        };
        let current = std::env::join_paths(["/usr/bin", "/bin"]).unwrap();
        let merged = config.search_path(Some(current)).unwrap().unwrap();
        let entries: Vec<PathBuf> = std::env::split_paths(&merged).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/opt/ffmpeg/bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin")
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn separator_in_dir_is_an_error_not_a_panic() {
        let config = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ff:mpeg")),
        };
        assert!(config.search_path(Some("/usr/bin".into())).is_err());
    }

    #[test]
    fn unset_dir_leaves_path_alone() {
        assert_eq!(ToolsConfig::default().search_path(None).unwrap(), None);
    }
}
