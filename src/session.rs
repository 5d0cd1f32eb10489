//! Recording session: one background capture loop under start/stop control
//!
//! The session is either Idle or Recording. `start()` creates the output file,
//! opens the device and the WAV writer, then hands both to a dedicated capture
//! thread. That thread owns them until it exits and always releases the
//! device and finalizes the writer on the way out, so a handle is never used
//! after release. `stop()` clears the running flag and joins the thread; the
//! loop notices after its current blocking read returns.
//!
//! A device read error stops the loop from the inside. The session then goes
//! back to Idle by itself and parks the finished recording until
//! [`RecordingSession::take_interrupted`] collects it.
//!
//! Lock order: `transitions` -> `state` -> `interrupted`.

use std::io::{BufWriter, Seek, Write};
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;
use uuid::Uuid;

use crate::audio::{
    discard_recording, AudioBackend, AudioSource, CaptureFormat, DeviceReadError,
    OutputDirectory, SourceKind, SourceTable, WaveWriter, BITS_PER_SAMPLE,
};
use crate::lock;

/// Errors returned by session control calls.
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// The capture device is busy, unsupported, or not permitted.
    DeviceUnavailable(String),
    /// Creating or preparing the output file failed.
    Io(String),
    /// The call does not fit the current session state.
    InvalidState(String),
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::DeviceUnavailable(e) => write!(f, "Capture device unavailable: {}", e),
            RecordingError::Io(e) => write!(f, "Recording I/O failed: {}", e),
            RecordingError::InvalidState(e) => write!(f, "Invalid session state: {}", e),
        }
    }
}

impl std::error::Error for RecordingError {}

impl From<std::io::Error> for RecordingError {
    fn from(e: std::io::Error) -> Self {
        RecordingError::Io(e.to_string())
    }
}

/// Why a capture loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    DeviceError(DeviceReadError),
    Panicked,
}

/// A recording whose capture loop has exited and whose file is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRecording {
    pub id: Uuid,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
    /// False when the header patch failed and the size fields are still placeholders.
    pub finalized: bool,
}

struct CaptureOutcome {
    bytes_written: u64,
    reason: StopReason,
    finalized: bool,
}

struct ActiveCapture {
    id: Uuid,
    target: PathBuf,
    started_at: Instant,
    running: Arc<AtomicBool>,
    bytes_written: Arc<AtomicU64>,
    capture_loop: Option<JoinHandle<CaptureOutcome>>,
}

impl ActiveCapture {
    fn complete(self, outcome: &CaptureOutcome) -> CompletedRecording {
        CompletedRecording {
            id: self.id,
            path: self.target,
            bytes_written: outcome.bytes_written,
            elapsed: self.started_at.elapsed(),
            stop_reason: outcome.reason,
            finalized: outcome.finalized,
        }
    }
}

enum SessionState {
    Idle,
    Recording(ActiveCapture),
}

struct Shared {
    state: Mutex<SessionState>,
    interrupted: Mutex<Option<CompletedRecording>>,
}

impl Shared {
    /// Runs on the capture thread after the loop stopped itself.
    ///
    /// The recording is parked before the state lock is released, so anyone
    /// who sees the session idle also sees the parked recording.
    fn finish_interrupted(&self, id: Uuid, outcome: &CaptureOutcome) {
        let mut state = lock(&self.state);
        let owned = matches!(&*state, SessionState::Recording(active) if active.id == id);
        if !owned {
            // stop() already took this capture and is joining it.
            return;
        }
        let active = match mem::replace(&mut *state, SessionState::Idle) {
            SessionState::Recording(active) => active,
            SessionState::Idle => return,
        };

        let completed = active.complete(outcome);
        log::warn!(
            "Recording {} interrupted by {:?} after {} bytes: {:?}",
            completed.id,
            completed.stop_reason,
            completed.bytes_written,
            completed.path
        );
        *lock(&self.interrupted) = Some(completed);
    }
}

/// Owns at most one capture loop at a time.
pub struct RecordingSession {
    backend: Arc<dyn AudioBackend>,
    sources: SourceTable,
    format: CaptureFormat,
    transitions: Mutex<()>,
    shared: Arc<Shared>,
}

impl RecordingSession {
    pub fn new(backend: Arc<dyn AudioBackend>, sources: SourceTable, format: CaptureFormat) -> Self {
        Self {
            backend,
            sources,
            format,
            transitions: Mutex::new(()),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                interrupted: Mutex::new(None),
            }),
        }
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Start capturing `kind` into a new file in `directory`.
    ///
    /// On any error nothing is left running and no file is left behind.
    pub fn start(
        &self,
        directory: &OutputDirectory,
        kind: SourceKind,
    ) -> Result<PathBuf, RecordingError> {
        let _transition = lock(&self.transitions);
        if self.is_recording() {
            return Err(RecordingError::InvalidState(
                "a recording is already in progress".to_string(),
            ));
        }

        let (path, file) = directory.create_recording(Local::now())?;

        let platform_source = self.sources.resolve(kind);
        let mut source = match self.backend.open(self.format, platform_source) {
            Ok(source) => source,
            Err(e) => {
                discard_recording(&path);
                return Err(RecordingError::DeviceUnavailable(e.to_string()));
            }
        };

        let writer = match WaveWriter::open(
            BufWriter::new(file),
            self.format.channels,
            self.format.sample_rate,
            BITS_PER_SAMPLE,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                source.close();
                discard_recording(&path);
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(true));
        let bytes_written = Arc::new(AtomicU64::new(0));

        // Hold the state lock until the capture is recorded, so a loop that
        // fails immediately still finds itself in the state.
        let mut state = lock(&self.shared.state);

        let thread_running = running.clone();
        let thread_bytes = bytes_written.clone();
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                let outcome = run_capture_loop(source, writer, &thread_running, &thread_bytes);
                if let StopReason::DeviceError(_) = outcome.reason {
                    shared.finish_interrupted(id, &outcome);
                }
                outcome
            });

        let capture_loop = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // The closure, and with it the source and writer, was dropped.
                discard_recording(&path);
                return Err(RecordingError::Io(format!(
                    "failed to spawn capture loop: {}",
                    e
                )));
            }
        };

        *state = SessionState::Recording(ActiveCapture {
            id,
            target: path.clone(),
            started_at: Instant::now(),
            running,
            bytes_written,
            capture_loop: Some(capture_loop),
        });

        log::info!(
            "Recording {} started: {:?} ({:?} via {})",
            id,
            path,
            kind,
            platform_source.as_str()
        );
        Ok(path)
    }

    /// Stop the capture loop, wait for it to release the device and finalize
    /// the file, and return the result. `None` when nothing was recording.
    pub fn stop(&self) -> Option<CompletedRecording> {
        let _transition = lock(&self.transitions);
        let previous = mem::replace(&mut *lock(&self.shared.state), SessionState::Idle);
        let mut active = match previous {
            SessionState::Recording(active) => active,
            SessionState::Idle => return None,
        };

        active.running.store(false, Ordering::SeqCst);
        let outcome = match active.capture_loop.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            _ => {
                log::error!(
                    "Capture loop for {:?} panicked, file may be incomplete",
                    active.target
                );
                CaptureOutcome {
                    bytes_written: active.bytes_written.load(Ordering::SeqCst),
                    reason: StopReason::Panicked,
                    finalized: false,
                }
            }
        };

        let completed = active.complete(&outcome);
        log::info!(
            "Recording {} stopped: {} bytes in {:?} ({:?}) -> {:?}",
            completed.id,
            completed.bytes_written,
            completed.elapsed,
            completed.stop_reason,
            completed.path
        );
        Some(completed)
    }

    pub fn is_recording(&self) -> bool {
        matches!(&*lock(&self.shared.state), SessionState::Recording(_))
    }

    /// Payload bytes written so far by the active capture, 0 when idle.
    pub fn bytes_written(&self) -> u64 {
        match &*lock(&self.shared.state) {
            SessionState::Recording(active) => active.bytes_written.load(Ordering::SeqCst),
            SessionState::Idle => 0,
        }
    }

    pub fn current_target(&self) -> Option<PathBuf> {
        match &*lock(&self.shared.state) {
            SessionState::Recording(active) => Some(active.target.clone()),
            SessionState::Idle => None,
        }
    }

    /// Hand out the recording that last stopped on a device error, once.
    pub fn take_interrupted(&self) -> Option<CompletedRecording> {
        lock(&self.shared.interrupted).take()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(done) = self.stop() {
            log::warn!("Session dropped while recording, finalized {:?}", done.path);
        }
    }
}

fn run_capture_loop<W: Write + Seek>(
    mut source: Box<dyn AudioSource>,
    mut writer: WaveWriter<W>,
    running: &AtomicBool,
    bytes_written: &AtomicU64,
) -> CaptureOutcome {
    let frame = source.format().bytes_per_frame();
    let mut buffer = vec![0u8; source.buffer_size().max(frame)];
    let mut reason = StopReason::Requested;
    let mut write_failures: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match source.read_frame(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                let n = n.min(buffer.len());
                match writer.write(&buffer[..n]) {
                    Ok(()) => {
                        bytes_written.fetch_add(n as u64, Ordering::SeqCst);
                    }
                    Err(e) => {
                        // Keep going: only device errors end the session.
                        write_failures += 1;
                        if write_failures == 1 {
                            log::error!("Failed to write {} bytes of audio: {}", n, e);
                        } else {
                            log::debug!("Audio write failed again: {}", e);
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("Capture device failed ({}), stopping recording", err);
                running.store(false, Ordering::SeqCst);
                reason = StopReason::DeviceError(err);
                break;
            }
        }
    }

    source.close();

    let finalized = match writer.close() {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to patch WAV sizes, header left with placeholders: {}", e);
            false
        }
    };
    if write_failures > 0 {
        log::warn!("{} audio writes failed during capture", write_failures);
    }

    CaptureOutcome {
        bytes_written: writer.bytes_written(),
        reason,
        finalized,
    }
}
