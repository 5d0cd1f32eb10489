//! Output directory and recording file names
//!
//! Recordings are named after the local time the call connected:
//! `YYYY-MM-DD_HH-MM-SS.wav`, with `_1`, `_2`, ... appended on a clash.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

const MAX_NAME_SUFFIX: u32 = 99;

/// Suggested location for recordings: ~/.local/share/call-recorder/recordings/
pub fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("call-recorder")
        .join("recordings")
}

/// File name stem for a recording started at `at`.
pub fn recording_stem(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// A writable directory the user granted for recordings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirectory {
    root: PathBuf,
}

impl OutputDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a fresh recording file. Never overwrites an existing file.
    ///
    /// The directory itself must already exist.
    pub fn create_recording(&self, at: DateTime<Local>) -> io::Result<(PathBuf, File)> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("recordings directory {:?} does not exist", self.root),
            ));
        }

        let stem = recording_stem(at);
        for attempt in 0..=MAX_NAME_SUFFIX {
            let name = if attempt == 0 {
                format!("{}.wav", stem)
            } else {
                format!("{}_{}.wav", stem, attempt)
            };
            let path = self.root.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("too many recordings named {:?} in {:?}", stem, self.root),
        ))
    }
}

/// Remove a recording that never received audio. Missing files are fine.
pub fn discard_recording(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("Discarded unused recording file {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to discard recording file {:?}: {}", path, e),
    }
}
