//! Audio capture module for the call recorder
//!
//! This module handles capture device access and WAV file writing.
//! Uses CPAL for audio capture and hound for reading finished files back.

mod paths;
pub mod recorder;
pub mod source;
pub mod wav;

#[cfg(test)]
pub(crate) mod fake;

pub use paths::{default_recordings_dir, discard_recording, recording_stem, OutputDirectory};
pub use recorder::CpalBackend;
pub use source::{
    capture_buffer_size, AudioBackend, AudioError, AudioSource, CaptureFormat, DeviceReadError,
    PlatformSource, SourceKind, SourceTable, BITS_PER_SAMPLE,
};
pub use wav::{read_wav_info, WavError, WavHeader, WavInfo, WaveWriter};
