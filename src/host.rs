//! Line-oriented host for the recorder
//!
//! A stdin reader task parses commands and sends them over a channel. The
//! event loop runs each one on the blocking pool, since starting and stopping
//! a recording waits on the capture thread.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::audio::read_wav_info;
use crate::call_state::{CallEvent, PhoneState};
use crate::coordinator::CallRecordingCoordinator;
use crate::lock;
use crate::settings::{save_settings, AppSettings};
use crate::store::{CallRecording, JsonRecordingStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Call(CallEvent),
    List,
    Inspect(u64),
    Delete(u64),
    SetDir(PathBuf),
    ClearDir,
    Quit,
}

impl HostCommand {
    /// Parse one input line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let number = (!rest.is_empty()).then(|| rest.to_string());

        let command = match word.to_ascii_lowercase().as_str() {
            "ringing" => incoming(PhoneState::Ringing, number),
            "offhook" => incoming(PhoneState::OffHook, number),
            "idle" => incoming(PhoneState::Idle, None),
            "outgoing" => HostCommand::Call(CallEvent::Outgoing { number }),
            "unknown" => HostCommand::Call(CallEvent::Unknown),
            "state" => {
                let (raw, number) = match rest.split_once(char::is_whitespace) {
                    Some((raw, number)) => (raw, Some(number.trim().to_string())),
                    None => (rest, None),
                };
                if raw.is_empty() {
                    return Err("state needs a platform state name".to_string());
                }
                incoming(PhoneState::from_platform(raw), number)
            }
            "list" => HostCommand::List,
            "inspect" => HostCommand::Inspect(parse_id(rest)?),
            "delete" => HostCommand::Delete(parse_id(rest)?),
            "set-dir" => {
                if rest.is_empty() {
                    return Err("set-dir needs a path".to_string());
                }
                HostCommand::SetDir(PathBuf::from(rest))
            }
            "clear-dir" => HostCommand::ClearDir,
            "quit" | "exit" => HostCommand::Quit,
            other => return Err(format!("unknown command {:?}", other)),
        };
        Ok(Some(command))
    }
}

fn incoming(state: PhoneState, number: Option<String>) -> HostCommand {
    HostCommand::Call(CallEvent::Incoming { state, number })
}

fn parse_id(raw: &str) -> Result<u64, String> {
    raw.parse::<u64>()
        .map_err(|_| format!("expected a recording id, got {:?}", raw))
}

/// Everything the commands act on.
pub struct Host {
    coordinator: Arc<CallRecordingCoordinator>,
    store: Arc<JsonRecordingStore>,
    settings: Arc<Mutex<AppSettings>>,
    settings_path: PathBuf,
}

impl Host {
    pub fn new(
        coordinator: Arc<CallRecordingCoordinator>,
        store: Arc<JsonRecordingStore>,
        settings: Arc<Mutex<AppSettings>>,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            coordinator,
            store,
            settings,
            settings_path,
        }
    }

    /// Run one command, returning text for the user if it has any.
    pub fn execute(&self, command: HostCommand) -> Option<String> {
        match command {
            HostCommand::Call(event) => {
                self.coordinator.handle_event(event);
                None
            }
            HostCommand::List => {
                let recordings = self.store.list();
                if recordings.is_empty() {
                    return Some("No recordings".to_string());
                }
                let lines: Vec<String> = recordings.iter().map(format_recording).collect();
                Some(lines.join("\n"))
            }
            HostCommand::Inspect(id) => Some(self.inspect(id)),
            HostCommand::Delete(id) => Some(match self.store.delete(id) {
                Ok(removed) => format!("Deleted recording {}", removed.id),
                Err(e) => e.to_string(),
            }),
            HostCommand::SetDir(path) => {
                if !path.is_dir() {
                    return Some(format!("{:?} is not a directory", path));
                }
                Some(self.update_settings(|s| s.recordings_dir = Some(path.clone())))
            }
            HostCommand::ClearDir => Some(self.update_settings(|s| s.recordings_dir = None)),
            HostCommand::Quit => None,
        }
    }

    /// Stop any recording in progress so its file is finalized.
    pub fn shutdown(&self) {
        if let Some(record) = self.coordinator.on_call_ended() {
            log::info!("Finalized recording {} on shutdown", record.id);
        }
    }

    fn inspect(&self, id: u64) -> String {
        let Some(record) = self.store.get(id) else {
            return format!("No recording with id {}", id);
        };
        let mut out = format_recording(&record);
        if record.has_audio() {
            match read_wav_info(std::path::Path::new(&record.file_path)) {
                Ok(info) => out.push_str(&format!(
                    "\n  {} ch, {} Hz, {} bit, {} frames, {:.1}s",
                    info.channels,
                    info.sample_rate,
                    info.bits_per_sample,
                    info.frames,
                    info.duration.as_secs_f64()
                )),
                Err(e) => out.push_str(&format!("\n  unreadable: {}", e)),
            }
        }
        out
    }

    fn update_settings(&self, change: impl FnOnce(&mut AppSettings)) -> String {
        let snapshot = {
            let mut settings = lock(&self.settings);
            change(&mut settings);
            settings.clone()
        };
        match save_settings(&self.settings_path, &snapshot) {
            Ok(()) => match &snapshot.recordings_dir {
                Some(dir) => format!("Recording to {:?}", dir),
                None => "Recording disabled until a directory is set".to_string(),
            },
            Err(e) => {
                log::error!("Failed to save settings: {}", e);
                format!("Settings changed for this run only: {}", e)
            }
        }
    }
}

fn format_recording(record: &CallRecording) -> String {
    format!(
        "{:>4}  {}  {:<8}  {:<16}  {:>5}s  {}",
        record.id,
        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        record.call_type,
        record.source,
        record.duration_secs,
        record.file_path
    )
}

/// Forward parsed stdin lines until EOF, then ask the loop to quit.
pub async fn read_commands(tx: mpsc::Sender<HostCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match HostCommand::parse(&line) {
                Ok(Some(command)) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring input: {}", e),
            },
            Ok(None) => {
                let _ = tx.send(HostCommand::Quit).await;
                break;
            }
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                let _ = tx.send(HostCommand::Quit).await;
                break;
            }
        }
    }
}

pub async fn run_event_loop(host: Arc<Host>, mut rx: mpsc::Receiver<HostCommand>) {
    log::info!("Event loop started");

    while let Some(command) = rx.recv().await {
        log::debug!("Received command: {:?}", command);

        if matches!(command, HostCommand::Quit) {
            log::info!("Exit requested, shutting down event loop");
            break;
        }

        let worker = host.clone();
        match tokio::task::spawn_blocking(move || worker.execute(command)).await {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(e) => log::error!("Command task failed: {}", e),
        }
    }

    let worker = host.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
        log::error!("Shutdown task failed: {}", e);
    }
    log::info!("Event loop ended");
}
