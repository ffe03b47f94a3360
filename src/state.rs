use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::APP_DIR_NAME;
use crate::error::Result;

pub const STATE_FILE_NAME: &str = "state.json";

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Falls back to the user's download folder when unset.
    pub download_directory: Option<PathBuf>,
    pub recent_downloads: Vec<PathBuf>,
    pub converted_files: Vec<PathBuf>,
}

/// Where [`AppState`] reads and writes its data.
pub trait StateStore: Send {
    fn load(&self) -> Result<PersistedState>;
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/snag/state.json`, or the working directory when there is no config dir.
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .unwrap_or_default();
        Self::new(dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, format!("{json}\n"))?;
        Ok(())
    }
}

/// Process-wide persisted state. Owned by the UI thread, saved on every mutation.
pub struct AppState {
    store: Box<dyn StateStore>,
    data: PersistedState,
}

impl AppState {
    pub fn load(store: Box<dyn StateStore>) -> Self {
        let data = store.load().unwrap_or_else(|e| {
            warn!("starting with empty state: {e}");
            PersistedState::default()
        });
        Self { store, data }
    }

    pub fn download_directory(&self) -> PathBuf {
        self.data
            .download_directory
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn set_download_directory(&mut self, dir: PathBuf) {
        self.data.download_directory = Some(dir);
        self.persist();
    }

    pub fn recent_downloads(&self) -> &[PathBuf] {
        &self.data.recent_downloads
    }

    pub fn converted_files(&self) -> &[PathBuf] {
        &self.data.converted_files
    }

    pub fn push_recent_download(&mut self, path: PathBuf) {
        self.data.recent_downloads.push(path);
        self.persist();
    }

    pub fn push_converted_file(&mut self, path: PathBuf) {
        self.data.converted_files.push(path);
        self.persist();
    }

    pub fn clear_recent_downloads(&mut self) {
        self.data.recent_downloads.clear();
        self.persist();
    }

    pub fn clear_converted_files(&mut self) {
        self.data.converted_files.clear();
        self.persist();
    }

    fn persist(&self) {
        match self.store.save(&self.data) {
            Ok(()) => debug!("state saved"),
            Err(e) => warn!("failed to save state: {e}"),
        }
    }
}
