//! Call recording coordinator
//!
//! Turns call-state actions into session start/stop calls and writes one
//! metadata row per call. Recording is best-effort: nothing here fails a call,
//! every problem ends up as a logged, marker-flagged row instead.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::audio::SourceKind;
use crate::call_state::{reduce, CallAction, CallDirection, CallEvent, CallPhase};
use crate::lock;
use crate::session::{RecordingError, RecordingSession};
use crate::settings::AppSettings;
use crate::store::{
    source_label, CallRecording, CallType, NewCallRecording, RecordingStore, MISSED_CALL_MARKER,
    RECORDING_FAILED_MARKER,
};

/// What `on_call_connected` did.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Recording(PathBuf),
    /// No recordings directory configured; a failure row was stored.
    NotConfigured,
    /// The session refused to start; a failure row was stored.
    Failed(RecordingError),
    /// A recording is already running for another call.
    Ignored,
}

struct ActiveCall {
    source: String,
    call_type: CallType,
    connected_at: Instant,
}

pub struct CallRecordingCoordinator {
    session: Arc<RecordingSession>,
    store: Arc<dyn RecordingStore>,
    settings: Arc<Mutex<AppSettings>>,
    phase: Mutex<CallPhase>,
    active: Mutex<Option<ActiveCall>>,
}

impl CallRecordingCoordinator {
    pub fn new(
        session: Arc<RecordingSession>,
        store: Arc<dyn RecordingStore>,
        settings: Arc<Mutex<AppSettings>>,
    ) -> Self {
        Self {
            session,
            store,
            settings,
            phase: Mutex::new(CallPhase::Idle),
            active: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> CallPhase {
        lock(&self.phase).clone()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_recording()
    }

    /// Feed one call signal through the reducer and run its actions.
    pub fn handle_event(&self, event: CallEvent) {
        let mut phase = lock(&self.phase);
        let (next, actions) = reduce(&phase, event);
        if *phase != next {
            log::debug!("Call phase: {:?} -> {:?}", *phase, next);
        }
        *phase = next;

        for action in actions {
            match action {
                CallAction::BeginRecording { number, direction } => {
                    self.on_call_connected(number.as_deref(), direction);
                }
                CallAction::EndRecording => {
                    self.on_call_ended();
                }
                CallAction::RecordMissed { number } => {
                    self.on_call_missed(number.as_deref());
                }
            }
        }
    }

    pub fn on_call_connected(
        &self,
        number: Option<&str>,
        direction: CallDirection,
    ) -> ConnectOutcome {
        let source = source_label(number);
        let call_type = CallType::from(direction);

        if let Some(stale) = self.session.take_interrupted() {
            log::warn!("Dropping unclaimed interrupted recording {:?}", stale.path);
        }

        let directory = lock(&self.settings).output_directory();
        let Some(directory) = directory else {
            log::info!("No recordings directory configured, logging {} call without audio", call_type);
            self.insert_row(NewCallRecording {
                source,
                call_type,
                duration_secs: 0,
                file_path: RECORDING_FAILED_MARKER.to_string(),
            });
            return ConnectOutcome::NotConfigured;
        };

        match self.session.start(&directory, SourceKind::CallAudio) {
            Ok(path) => {
                *lock(&self.active) = Some(ActiveCall {
                    source,
                    call_type,
                    connected_at: Instant::now(),
                });
                ConnectOutcome::Recording(path)
            }
            Err(RecordingError::InvalidState(e)) => {
                log::warn!("Not recording {} call: {}", call_type, e);
                ConnectOutcome::Ignored
            }
            Err(e) => {
                log::error!(
                    "Could not record {} call from {} into {:?}: {}",
                    call_type,
                    source,
                    directory.path(),
                    e
                );
                self.insert_row(NewCallRecording {
                    source,
                    call_type,
                    duration_secs: 0,
                    file_path: RECORDING_FAILED_MARKER.to_string(),
                });
                ConnectOutcome::Failed(e)
            }
        }
    }

    /// Stop the active recording and store its row. No-op without one.
    pub fn on_call_ended(&self) -> Option<CallRecording> {
        let call = lock(&self.active).take()?;
        let duration_secs = call.connected_at.elapsed().as_secs();

        let completed = self
            .session
            .stop()
            .or_else(|| self.session.take_interrupted());
        let file_path = match completed {
            Some(done) => {
                if !done.finalized {
                    log::warn!("Recording {:?} kept with placeholder sizes", done.path);
                }
                let byte_rate = self.session.format().byte_rate().max(1);
                log::info!(
                    "Captured {:.1}s of audio over a {}s call",
                    done.bytes_written as f64 / byte_rate as f64,
                    duration_secs
                );
                done.path.to_string_lossy().into_owned()
            }
            None => {
                log::error!("Call ended but the session had no recording to hand back");
                RECORDING_FAILED_MARKER.to_string()
            }
        };

        self.insert_row(NewCallRecording {
            source: call.source,
            call_type: call.call_type,
            duration_secs,
            file_path,
        })
    }

    pub fn on_call_missed(&self, number: Option<&str>) -> Option<CallRecording> {
        self.insert_row(NewCallRecording {
            source: source_label(number),
            call_type: CallType::Missed,
            duration_secs: 0,
            file_path: MISSED_CALL_MARKER.to_string(),
        })
    }

    fn insert_row(&self, row: NewCallRecording) -> Option<CallRecording> {
        match self.store.insert(row) {
            Ok(record) => {
                log::info!(
                    "Logged {} call {} from {} ({}s): {}",
                    record.call_type,
                    record.id,
                    record.source,
                    record.duration_secs,
                    record.file_path
                );
                Some(record)
            }
            Err(e) => {
                log::error!("Failed to store call recording: {}", e);
                None
            }
        }
    }
}
