//! Snag: download videos with yt-dlp and convert them with ffmpeg.

// Desktop shell
mod app;
// Sequential multi-URL downloads
mod batch;
// Process construction shared by every external tool
mod cmd;
// Tool locations from config.json
mod config;
// yt-dlp driving and the download task
mod downloader;
mod error;
// Formats, descriptors, quality selectors, task slots
mod model;
// Opening files in the desktop environment
mod platform;
// ffprobe queries
mod probe;
// Progress line parsing for ffmpeg and yt-dlp
mod progress;
// Conversion parameter dialog chain
mod prompt;
// Persisted lists and download directory
mod state;
// Executable lookup and the bundled yt-dlp
mod tools;
// ffmpeg planning and the conversion task
mod transcode;

use std::sync::Arc;

use eframe::egui;
use env_logger::Env;
use log::info;
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

fn runtime() -> std::io::Result<&'static Arc<Runtime>> {
    RUNTIME.get_or_try_init(|| Runtime::new().map(Arc::new))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("starting snag {}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = config::config_file_path() {
        config::ToolsConfig::load(&path).install_search_path();
    }
    let handle = runtime()?.handle().clone();

    let store = state::JsonFileStore::default_location();
    info!("state file: {}", store.path().display());
    let state = state::AppState::load(Box::new(store));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Snag")
            .with_inner_size([900.0, 500.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Snag",
        options,
        Box::new(move |cc| Box::new(app::SnagApp::new(cc, handle, state))),
    )?;
    Ok(())
}
