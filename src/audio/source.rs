//! Capture device abstraction
//!
//! An [`AudioBackend`] opens exclusive [`AudioSource`] handles that deliver
//! interleaved PCM16 little-endian bytes through a blocking read. Which
//! concrete platform source serves "call audio" depends on the platform's
//! capability level, so it is looked up once through a [`SourceTable`].

use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 1;
/// Capture is always PCM16.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Multiplier applied to the platform minimum buffer size.
pub const BUFFER_HEADROOM: usize = 10;

/// What the caller wants to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Microphone,
    CallAudio,
}

/// Concrete capture source exposed by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformSource {
    Mic,
    VoiceCall,
    VoiceCommunication,
}

impl PlatformSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformSource::Mic => "mic",
            PlatformSource::VoiceCall => "voice_call",
            PlatformSource::VoiceCommunication => "voice_communication",
        }
    }
}

/// Maps each [`SourceKind`] to the platform source that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTable {
    microphone: PlatformSource,
    call_audio: PlatformSource,
}

impl SourceTable {
    /// Build the table for a platform capability level.
    ///
    /// Below level 23 the dedicated voice-call source works. Level 23 only
    /// captures call audio through the plain microphone. From 24 on the
    /// voice-communication source is the one that carries the call.
    pub fn for_api_level(level: u32) -> Self {
        let call_audio = if level < 23 {
            PlatformSource::VoiceCall
        } else if level < 24 {
            PlatformSource::Mic
        } else {
            PlatformSource::VoiceCommunication
        };

        Self {
            microphone: PlatformSource::Mic,
            call_audio,
        }
    }

    pub fn resolve(&self, kind: SourceKind) -> PlatformSource {
        match kind {
            SourceKind::Microphone => self.microphone,
            SourceKind::CallAudio => self.call_audio,
        }
    }
}

/// Requested capture format. Encoding is fixed to PCM16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl CaptureFormat {
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(BITS_PER_SAMPLE / 8)
    }

    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * self.bytes_per_frame() as u64
    }
}

/// Size of the read buffer for a source, in bytes.
///
/// Takes the platform minimum (never less than one frame), applies
/// [`BUFFER_HEADROOM`], and rounds up to a whole number of frames.
pub fn capture_buffer_size(min_buffer_bytes: usize, format: CaptureFormat) -> usize {
    let frame = format.bytes_per_frame().max(1);
    let wanted = min_buffer_bytes.max(frame) * BUFFER_HEADROOM;
    wanted.div_ceil(frame) * frame
}

/// Errors that can occur while opening a capture device.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    DeviceThreadFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::DeviceThreadFailed(e) => write!(f, "Audio device thread failed: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// Device-level failure reported by a read. Each maps to a negative sentinel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceReadError {
    Error,
    BadValue,
    InvalidOperation,
    DeadObject,
}

impl DeviceReadError {
    pub fn code(self) -> i32 {
        match self {
            DeviceReadError::Error => -1,
            DeviceReadError::BadValue => -2,
            DeviceReadError::InvalidOperation => -3,
            DeviceReadError::DeadObject => -6,
        }
    }
}

impl std::fmt::Display for DeviceReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceReadError::Error => "generic device error",
            DeviceReadError::BadValue => "bad value",
            DeviceReadError::InvalidOperation => "invalid operation",
            DeviceReadError::DeadObject => "device lost",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

impl std::error::Error for DeviceReadError {}

/// An open, exclusively owned capture handle.
pub trait AudioSource: Send {
    fn format(&self) -> CaptureFormat;

    /// Preferred read buffer size in bytes.
    fn buffer_size(&self) -> usize;

    /// Block until audio is available and copy it into `buf`.
    ///
    /// `Ok(0)` means the read timed out without audio; callers loop.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, DeviceReadError>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Opens capture handles.
pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        format: CaptureFormat,
        source: PlatformSource,
    ) -> Result<Box<dyn AudioSource>, AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_audio_source_follows_api_level() {
        assert_eq!(
            SourceTable::for_api_level(21).resolve(SourceKind::CallAudio),
            PlatformSource::VoiceCall
        );
        assert_eq!(
            SourceTable::for_api_level(23).resolve(SourceKind::CallAudio),
            PlatformSource::Mic
        );
        assert_eq!(
            SourceTable::for_api_level(24).resolve(SourceKind::CallAudio),
            PlatformSource::VoiceCommunication
        );
        assert_eq!(
            SourceTable::for_api_level(33).resolve(SourceKind::Microphone),
            PlatformSource::Mic
        );
    }

    #[test]
    fn buffer_size_applies_headroom_in_whole_frames() {
        let mono = CaptureFormat::default();
        assert_eq!(capture_buffer_size(3_528, mono), 35_280);
        // Odd minimum is rounded up to a whole 2-byte frame.
        assert_eq!(capture_buffer_size(7, mono), 70);

        let stereo = CaptureFormat {
            channels: 2,
            sample_rate: 48_000,
        };
        assert_eq!(capture_buffer_size(0, stereo), 40);
        assert_eq!(capture_buffer_size(6, stereo), 60);
    }

    #[test]
    fn default_format_is_mono_cd_rate() {
        let format = CaptureFormat::default();
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 44_100);
        assert_eq!(format.byte_rate(), 88_200);
    }

    #[test]
    fn read_errors_carry_negative_sentinels() {
        assert_eq!(DeviceReadError::Error.code(), -1);
        assert_eq!(DeviceReadError::BadValue.code(), -2);
        assert_eq!(DeviceReadError::InvalidOperation.code(), -3);
        assert!(DeviceReadError::DeadObject.to_string().contains("-6"));
    }
}
