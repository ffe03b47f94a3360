use std::borrow::Cow;
use std::ffi::OsStr;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::tools;

/// Blocking command for short-lived tools such as ffprobe.
pub fn command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    if let Some(path) = tools::configured_search_path() {
        cmd.env("PATH", path);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Async command for long-running tools whose output is streamed.
pub fn async_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    if let Some(path) = tools::configured_search_path() {
        cmd.env("PATH", path);
    }
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd.kill_on_drop(true);
    cmd
}

// Keeps console windows from flashing up on Windows while tools run.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Line reader for child process output.
///
/// Bytes that are not valid UTF-8 are replaced instead of failing the read,
/// so one badly encoded line never ends a stream early. Safe to use as a
/// `tokio::select!` branch: a partially read line is kept for the next call.
pub struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = match String::from_utf8_lossy(&self.buf) {
            Cow::Borrowed(text) => text.to_string(),
            Cow::Owned(text) => {
                debug!("replaced undecodable bytes in tool output");
                text
            }
        };
        self.buf.clear();
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}
