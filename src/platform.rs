//! Handing files and folders to the desktop.

use std::path::Path;
use std::process::Command;

use log::debug;

use crate::cmd;
use crate::error::{Result, SnagError};

/// Opens a file or folder with its default application.
pub fn open_path(path: &Path) -> Result<()> {
    ensure_exists(path)?;
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = cmd::command("explorer");
        command.arg(path);
        command
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut command = cmd::command("open");
        command.arg(path);
        command
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut command = cmd::command("xdg-open");
        command.arg(path);
        command
    };

    launch(&mut command)
}

/// Shows a file in the file manager, selected where the platform allows it.
pub fn reveal_path(path: &Path) -> Result<()> {
    ensure_exists(path)?;
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = cmd::command("explorer");
        let mut arg = std::ffi::OsString::from("/select,");
        arg.push(path);
        command.arg(arg);
        command
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut command = cmd::command("open");
        command.arg("-R").arg(path);
        command
    };

    // xdg-open cannot select, so open the containing folder.
    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut command = cmd::command("xdg-open");
        command.arg(path.parent().unwrap_or(path));
        command
    };

    launch(&mut command)
}

/// Library entries can go stale while the app is open.
pub fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(SnagError::FileMissing(path.to_path_buf()))
    }
}

fn launch(command: &mut Command) -> Result<()> {
    debug!("launching {command:?}");
    command.spawn()?;
    Ok(())
}
