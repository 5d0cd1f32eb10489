//! Capture backend using CPAL
//!
//! `cpal::Stream` cannot move between threads, so every opened source gets a
//! dedicated device thread that builds the stream, plays it, and drops it on
//! close. The stream callback converts samples to PCM16 little-endian and
//! hands them to the reader over a bounded channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};

use super::source::{
    capture_buffer_size, AudioBackend, AudioError, AudioSource, CaptureFormat, DeviceReadError,
    PlatformSource,
};

/// Longest a single read blocks before reporting "no audio yet".
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Callback chunks buffered between the device thread and the reader.
const CHANNEL_DEPTH: usize = 64;

/// Assumed minimum buffer when the platform does not report one.
const FALLBACK_MIN_BUFFER_MS: u32 = 20;

/// Opens capture sources on the default CPAL host.
///
/// Each platform source can be pinned to an input device by (partial) name;
/// unpinned sources use the host's default input device.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_names: HashMap<PlatformSource, String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_name(mut self, source: PlatformSource, name: impl Into<String>) -> Self {
        self.device_names.insert(source, name.into());
        self
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        format: CaptureFormat,
        source: PlatformSource,
    ) -> Result<Box<dyn AudioSource>, AudioError> {
        let device_name = self.device_names.get(&source).cloned();
        log::info!(
            "Opening capture source {}: {} Hz, {} channels, device hint {:?}",
            source.as_str(),
            format.sample_rate,
            format.channels,
            device_name
        );
        let opened = CpalSource::open(format, device_name)?;
        Ok(Box::new(opened))
    }
}

struct StreamReady {
    buffer_size: usize,
    device_name: String,
}

/// A live CPAL input stream exposed as a blocking reader.
pub struct CpalSource {
    format: CaptureFormat,
    buffer_size: usize,
    chunks: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    failed: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
    shutdown: Option<mpsc::Sender<()>>,
    device_thread: Option<JoinHandle<()>>,
}

impl CpalSource {
    fn open(format: CaptureFormat, device_name: Option<String>) -> Result<Self, AudioError> {
        let (chunk_tx, chunk_rx) = mpsc::sync_channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<StreamReady, AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let failed = Arc::new(AtomicBool::new(false));
        let overruns = Arc::new(AtomicU64::new(0));

        let thread_failed = failed.clone();
        let thread_overruns = overruns.clone();
        let device_thread = std::thread::Builder::new()
            .name("audio-device".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(
                    format,
                    device_name.as_deref(),
                    chunk_tx,
                    thread_failed,
                    thread_overruns,
                ) {
                    Ok((stream, ready)) => {
                        let _ = ready_tx.send(Ok(ready));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the owning source closes or drops the sender.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::DeviceThreadFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(ready)) => {
                log::info!(
                    "Capture started on {:?} (buffer {} bytes)",
                    ready.device_name,
                    ready.buffer_size
                );
                Ok(Self {
                    format,
                    buffer_size: ready.buffer_size,
                    chunks: chunk_rx,
                    pending: VecDeque::new(),
                    failed,
                    overruns,
                    shutdown: Some(shutdown_tx),
                    device_thread: Some(device_thread),
                })
            }
            Ok(Err(e)) => {
                let _ = device_thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = device_thread.join();
                Err(AudioError::DeviceThreadFailed(
                    "device thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }
}

impl AudioSource for CpalSource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, DeviceReadError> {
        if self.shutdown.is_none() {
            return Err(DeviceReadError::InvalidOperation);
        }
        if buf.is_empty() {
            return Err(DeviceReadError::BadValue);
        }
        if self.failed.load(Ordering::SeqCst) {
            return Err(DeviceReadError::DeadObject);
        }

        if self.pending.is_empty() {
            match self.chunks.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceReadError::DeadObject),
            }
        }

        // Top up with anything else that already arrived, without blocking.
        while self.pending.len() < buf.len() {
            match self.chunks.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        drop(shutdown);

        if let Some(handle) = self.device_thread.take() {
            if handle.join().is_err() {
                log::warn!("Audio device thread panicked during teardown");
            }
        }

        let overruns = self.overruns.load(Ordering::Relaxed);
        if overruns > 0 {
            log::warn!("Capture dropped {} chunks, reader fell behind", overruns);
        }
        self.pending.clear();
        log::debug!("Capture source released");
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_capture_stream(
    format: CaptureFormat,
    device_name: Option<&str>,
    chunks: SyncSender<Vec<u8>>,
    failed: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
) -> Result<(Stream, StreamReady), AudioError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let (config, sample_format, min_frames) = negotiate_config(&device, format)?;
    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::I16 => {
            build_stream_typed::<i16>(&device, &config, chunks, failed, overruns)
        }
        SampleFormat::U16 => {
            build_stream_typed::<u16>(&device, &config, chunks, failed, overruns)
        }
        SampleFormat::F32 => {
            build_stream_typed::<f32>(&device, &config, chunks, failed, overruns)
        }
        _ => Err(AudioError::NoSupportedConfig),
    }?;

    stream.play().map_err(|e| {
        AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e))
    })?;

    let buffer_size = capture_buffer_size(min_frames * format.bytes_per_frame(), format);
    Ok((
        stream,
        StreamReady {
            buffer_size,
            device_name: name,
        },
    ))
}

fn select_device(host: &cpal::Host, wanted: Option<&str>) -> Result<Device, AudioError> {
    if let Some(wanted) = wanted {
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n.contains(wanted)).unwrap_or(false) {
                return Ok(device);
            }
        }
        log::warn!(
            "No input device matching {:?}, falling back to the default input",
            wanted
        );
    }

    host.default_input_device()
        .ok_or(AudioError::NoInputDevice)
}

/// Pick a device config matching the requested channels and rate exactly.
/// Returns the stream config, its sample format, and the minimum buffer in frames.
fn negotiate_config(
    device: &Device,
    format: CaptureFormat,
) -> Result<(StreamConfig, SampleFormat, usize), AudioError> {
    let wanted_rate = cpal::SampleRate(format.sample_rate);

    let mut candidates: Vec<_> = device
        .supported_input_configs()
        .map_err(|_| AudioError::NoSupportedConfig)?
        .filter(|range| {
            range.channels() == format.channels
                && range.min_sample_rate() <= wanted_rate
                && wanted_rate <= range.max_sample_rate()
                && format_preference(range.sample_format()).is_some()
        })
        .collect();
    candidates.sort_by_key(|range| format_preference(range.sample_format()));

    let range = candidates
        .into_iter()
        .next()
        .ok_or(AudioError::NoSupportedConfig)?;
    let supported = range.with_sample_rate(wanted_rate);

    let min_frames = match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } => *min as usize,
        SupportedBufferSize::Unknown => {
            (format.sample_rate * FALLBACK_MIN_BUFFER_MS / 1000) as usize
        }
    };

    Ok((supported.config(), supported.sample_format(), min_frames))
}

/// Lower is better; `None` for formats the callback cannot convert.
fn format_preference(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    chunks: SyncSender<Vec<u8>>,
    failed: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = move |err: cpal::StreamError| {
        log::error!("Audio stream error: {}", err);
        failed.store(true, Ordering::SeqCst);
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for &sample in data {
                    bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
                }
                match chunks.try_send(bytes) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        overruns.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => {}
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T>(sample: T) -> i16
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let f32_sample: f32 = sample.to_sample::<f32>();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn integer_samples_keep_their_scale() {
        assert_eq!(sample_to_i16(0i16), 0);
        assert!(sample_to_i16(i16::MAX) >= i16::MAX - 1);
        // u16 midpoint is silence
        assert_eq!(sample_to_i16(32_768u16), 0);
    }

    #[test]
    fn native_pcm16_is_preferred() {
        assert!(format_preference(SampleFormat::I16) < format_preference(SampleFormat::F32));
        assert!(format_preference(SampleFormat::F32) < format_preference(SampleFormat::U16));
        assert_eq!(format_preference(SampleFormat::I8), None);
    }

    #[test]
    fn backend_remembers_device_hints() {
        let backend = CpalBackend::new().with_device_name(PlatformSource::VoiceCall, "Monitor");
        assert_eq!(
            backend.device_names.get(&PlatformSource::VoiceCall).map(String::as_str),
            Some("Monitor")
        );
        assert!(!backend.device_names.contains_key(&PlatformSource::Mic));
    }
}
