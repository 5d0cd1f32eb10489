pub mod audio;
pub mod call_state;
pub mod coordinator;
pub mod host;
pub mod session;
pub mod settings;
pub mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use audio::CpalBackend;
use coordinator::CallRecordingCoordinator;
use host::Host;
use session::RecordingSession;
use store::JsonRecordingStore;

/// Lock a mutex, carrying on with the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

pub fn run() {
    init_logging();

    let settings_path = match settings::settings_path() {
        Ok(path) => path,
        Err(e) => {
            log::error!("Settings: {}", e);
            return;
        }
    };
    let settings = settings::load_settings(&settings_path);
    match &settings.recordings_dir {
        Some(dir) => log::info!("Recording calls to {:?}", dir),
        None => log::info!(
            "No recordings directory set, use `set-dir <path>` (suggested: {:?})",
            audio::default_recordings_dir()
        ),
    }

    let mut backend = CpalBackend::new();
    for (source, name) in settings.device_hints() {
        backend = backend.with_device_name(source, name);
    }
    let session = Arc::new(RecordingSession::new(
        Arc::new(backend),
        settings.source_table(),
        settings.capture_format(),
    ));

    let store = match settings::store_path().and_then(|path| {
        JsonRecordingStore::open(path).map_err(|e| e.to_string())
    }) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Could not open the recording store: {}", e);
            return;
        }
    };
    log::info!("Call log at {:?}", store.path());

    let settings = Arc::new(Mutex::new(settings));
    let coordinator = Arc::new(CallRecordingCoordinator::new(
        session,
        store.clone(),
        settings.clone(),
    ));
    let app = Arc::new(Host::new(coordinator, store, settings, settings_path));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(host::read_commands(tx));
        host::run_event_loop(app, rx).await;
    });

    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_background();
}
