//! Call recording metadata
//!
//! The coordinator only needs [`RecordingStore::insert`]. The JSON store adds
//! the listing and deletion the host exposes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call_state::CallDirection;
use crate::lock;
use crate::settings::write_atomically;

/// File path stored when a call could not be recorded.
pub const RECORDING_FAILED_MARKER: &str = "Could not record";
/// File path stored for calls that were never answered.
pub const MISSED_CALL_MARKER: &str = "Missed call";
/// Source stored when the caller number is withheld.
pub const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
}

impl From<CallDirection> for CallType {
    fn from(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Incoming => CallType::Incoming,
            CallDirection::Outgoing => CallType::Outgoing,
        }
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallType::Incoming => "incoming",
            CallType::Outgoing => "outgoing",
            CallType::Missed => "missed",
        };
        f.pad(name)
    }
}

/// A row to insert. The store assigns the id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCallRecording {
    pub source: String,
    pub call_type: CallType,
    pub duration_secs: u64,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecording {
    pub id: u64,
    pub source: String,
    pub call_type: CallType,
    pub duration_secs: u64,
    pub file_path: String,
    pub recorded_at: DateTime<Utc>,
}

impl CallRecording {
    /// False for marker rows that have no WAV file behind them.
    pub fn has_audio(&self) -> bool {
        !is_marker(&self.file_path)
    }
}

pub fn is_marker(file_path: &str) -> bool {
    file_path == RECORDING_FAILED_MARKER || file_path == MISSED_CALL_MARKER
}

/// Caller number for display, or [`UNKNOWN_SOURCE`].
pub fn source_label(number: Option<&str>) -> String {
    match number.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => UNKNOWN_SOURCE.to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum StoreError {
    Io(String),
    Corrupt(String),
    NotFound(u64),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Recording store I/O failed: {}", e),
            StoreError::Corrupt(e) => write!(f, "Recording store is corrupt: {}", e),
            StoreError::NotFound(id) => write!(f, "No recording with id {}", id),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence seam for the coordinator.
pub trait RecordingStore: Send + Sync {
    fn insert(&self, recording: NewCallRecording) -> Result<CallRecording, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    recordings: Vec<CallRecording>,
}

/// Recordings kept in a single JSON file, rewritten on every change.
pub struct JsonRecordingStore {
    path: PathBuf,
    data: Mutex<StoreFile>,
}

impl JsonRecordingStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut data = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<StoreFile>(&contents)
                .map_err(|e| StoreError::Corrupt(format!("{:?}: {}", path, e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(StoreError::Io(format!("{:?}: {}", path, e))),
        };

        // Never hand out an id that is still in the file.
        let highest = data.recordings.iter().map(|r| r.id).max().unwrap_or(0);
        data.next_id = data.next_id.max(highest + 1);

        log::debug!(
            "Loaded {} recordings from {:?}",
            data.recordings.len(),
            path
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All recordings, oldest first.
    pub fn list(&self) -> Vec<CallRecording> {
        lock(&self.data).recordings.clone()
    }

    pub fn get(&self, id: u64) -> Option<CallRecording> {
        lock(&self.data)
            .recordings
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Remove a record and the WAV file behind it.
    pub fn delete(&self, id: u64) -> Result<CallRecording, StoreError> {
        let removed = {
            let mut data = lock(&self.data);
            let index = data
                .recordings
                .iter()
                .position(|r| r.id == id)
                .ok_or(StoreError::NotFound(id))?;
            let removed = data.recordings.remove(index);
            if let Err(e) = self.persist(&data) {
                data.recordings.insert(index, removed);
                return Err(e);
            }
            removed
        };

        if removed.has_audio() {
            match std::fs::remove_file(&removed.file_path) {
                Ok(()) => log::info!("Deleted recording file {}", removed.file_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("Recording file {} already gone", removed.file_path)
                }
                Err(e) => log::warn!(
                    "Failed to delete recording file {}: {}",
                    removed.file_path,
                    e
                ),
            }
        }
        Ok(removed)
    }

    fn persist(&self, data: &StoreFile) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(data)
            .map_err(|e| StoreError::Io(format!("Serialize recordings: {}", e)))?;
        write_atomically(&self.path, &contents).map_err(StoreError::Io)
    }
}

impl RecordingStore for JsonRecordingStore {
    fn insert(&self, recording: NewCallRecording) -> Result<CallRecording, StoreError> {
        let mut data = lock(&self.data);
        let record = CallRecording {
            id: data.next_id,
            source: recording.source,
            call_type: recording.call_type,
            duration_secs: recording.duration_secs,
            file_path: recording.file_path,
            recorded_at: Utc::now(),
        };

        data.recordings.push(record.clone());
        data.next_id += 1;
        if let Err(e) = self.persist(&data) {
            data.recordings.pop();
            data.next_id -= 1;
            return Err(e);
        }

        log::debug!("Stored recording {} ({})", record.id, record.call_type);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(file_path: &str) -> NewCallRecording {
        NewCallRecording {
            source: "555-0100".to_string(),
            call_type: CallType::Incoming,
            duration_secs: 42,
            file_path: file_path.to_string(),
        }
    }

    #[test]
    fn source_label_falls_back_to_unknown() {
        assert_eq!(source_label(Some("555-0100")), "555-0100");
        assert_eq!(source_label(Some("  ")), UNKNOWN_SOURCE);
        assert_eq!(source_label(None), UNKNOWN_SOURCE);
    }

    #[test]
    fn call_type_from_direction() {
        assert_eq!(CallType::from(CallDirection::Incoming), CallType::Incoming);
        assert_eq!(CallType::from(CallDirection::Outgoing), CallType::Outgoing);
        assert_eq!(CallType::Missed.to_string(), "missed");
    }

    #[test]
    fn ids_are_assigned_in_order_and_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");

        let store = JsonRecordingStore::open(&path).unwrap();
        assert!(store.list().is_empty());
        let first = store.insert(row(RECORDING_FAILED_MARKER)).unwrap();
        let second = store.insert(row(MISSED_CALL_MARKER)).unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let reopened = JsonRecordingStore::open(&path).unwrap();
        assert_eq!(reopened.list(), vec![first, second.clone()]);
        assert_eq!(reopened.get(2), Some(second));
        assert_eq!(reopened.insert(row(MISSED_CALL_MARKER)).unwrap().id, 3);
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        let store = JsonRecordingStore::open(&path).unwrap();

        store.insert(row(MISSED_CALL_MARKER)).unwrap();
        let last = store.insert(row(MISSED_CALL_MARKER)).unwrap();
        store.delete(last.id).unwrap();

        let reopened = JsonRecordingStore::open(&path).unwrap();
        assert_eq!(reopened.insert(row(MISSED_CALL_MARKER)).unwrap().id, 3);
    }

    #[test]
    fn delete_removes_the_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("call.wav");
        std::fs::write(&wav, b"RIFF").unwrap();

        let store = JsonRecordingStore::open(dir.path().join("recordings.json")).unwrap();
        let record = store.insert(row(&wav.to_string_lossy())).unwrap();
        assert!(record.has_audio());

        let removed = store.delete(record.id).unwrap();
        assert_eq!(removed.id, record.id);
        assert!(!wav.exists());
        assert!(store.get(record.id).is_none());
        assert!(matches!(store.delete(record.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_leaves_marker_rows_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordingStore::open(dir.path().join("recordings.json")).unwrap();
        let record = store.insert(row(RECORDING_FAILED_MARKER)).unwrap();
        assert!(!record.has_audio());
        store.delete(record.id).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            JsonRecordingStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
