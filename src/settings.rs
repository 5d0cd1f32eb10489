use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::{CaptureFormat, OutputDirectory, PlatformSource, SourceTable};

const APP_DIR_NAME: &str = "call-recorder";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Directory the user granted for recordings. `None` until set up; calls
    /// are still logged, with a failure marker instead of a file.
    pub recordings_dir: Option<PathBuf>,

    pub sample_rate: u32,
    pub channel_count: u16,

    /// Platform capability level that picks the call-audio source.
    pub source_api_level: u32,

    /// Substring of the input device name to use for call audio.
    pub call_audio_device: Option<String>,
    /// Substring of the input device name to use for the microphone.
    pub microphone_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            recordings_dir: None,
            sample_rate: crate::audio::source::DEFAULT_SAMPLE_RATE,
            channel_count: crate::audio::source::DEFAULT_CHANNELS,
            source_api_level: 29,
            call_audio_device: None,
            microphone_device: None,
        }
    }
}

impl AppSettings {
    pub fn output_directory(&self) -> Option<OutputDirectory> {
        self.recordings_dir.as_ref().map(OutputDirectory::new)
    }

    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            channels: self.channel_count.max(1),
            sample_rate: self.sample_rate,
        }
    }

    pub fn source_table(&self) -> SourceTable {
        SourceTable::for_api_level(self.source_api_level)
    }

    /// Device-name hints per platform source, for the capture backend.
    pub fn device_hints(&self) -> Vec<(PlatformSource, String)> {
        let mut hints = Vec::new();
        if let Some(name) = &self.call_audio_device {
            hints.push((PlatformSource::VoiceCall, name.clone()));
            hints.push((PlatformSource::VoiceCommunication, name.clone()));
        }
        if let Some(name) = &self.microphone_device {
            hints.push((PlatformSource::Mic, name.clone()));
        }
        hints
    }
}

/// ~/.config/call-recorder/settings.json
pub fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// ~/.local/share/call-recorder/recordings.json
pub fn store_path() -> Result<PathBuf, String> {
    let dir =
        dirs::data_local_dir().ok_or_else(|| "Could not determine data directory".to_string())?;
    Ok(dir.join(APP_DIR_NAME).join("recordings.json"))
}

pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;
    write_atomically(path, contents.as_bytes())
}

/// Write to a temp file next to `path`, then rename over it.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create directory {:?}: {}", parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, contents)
        .map_err(|e| format!("Write temp file {:?}: {}", tmp_path, e))?;

    // Windows rename fails when the destination exists.
    if cfg!(windows) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp file {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json"));
        assert_eq!(settings, AppSettings::default());
        assert!(settings.output_directory().is_none());
        assert_eq!(settings.capture_format(), CaptureFormat::default());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"recordings_dir": "/srv/calls"}"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.recordings_dir, Some(PathBuf::from("/srv/calls")));
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.source_api_level, 29);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            recordings_dir: Some(dir.path().to_path_buf()),
            sample_rate: 16_000,
            call_audio_device: Some("Modem".to_string()),
            ..AppSettings::default()
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
        assert!(!dir.path().join("nested").join("settings.json.tmp").exists());
    }

    #[test]
    fn device_hints_cover_both_call_sources() {
        let settings = AppSettings {
            call_audio_device: Some("Modem".to_string()),
            microphone_device: Some("USB".to_string()),
            ..AppSettings::default()
        };
        let hints = settings.device_hints();
        assert_eq!(hints.len(), 3);
        assert!(hints.contains(&(PlatformSource::VoiceCall, "Modem".to_string())));
        assert!(hints.contains(&(PlatformSource::Mic, "USB".to_string())));
    }
}
