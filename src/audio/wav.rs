//! Incremental WAV/RIFF writer with a deferred size patch
//!
//! The header is written up front with both size fields zeroed. PCM payload is
//! then streamed through [`WaveWriter::write`], and [`WaveWriter::close`] seeks
//! back into the header to fill in the final sizes. The sink must be seekable.

use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

/// Size of the canonical PCM header in bytes.
pub const HEADER_LEN: usize = 44;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";

const FMT_CHUNK_LEN: u32 = 16;
const PCM_FORMAT: u16 = 1;

/// Byte offset of the RIFF chunk size field.
const RIFF_SIZE_OFFSET: u64 = 4;
/// Byte offset of the data sub-chunk size field.
const DATA_SIZE_OFFSET: u64 = 40;

/// Errors from decoding a raw header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    TooShort(usize),
    BadTag { offset: usize, found: [u8; 4] },
    UnsupportedFormat(u16),
}

impl std::fmt::Display for WavError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WavError::TooShort(len) => {
                write!(f, "WAV header too short: {} bytes (need {})", len, HEADER_LEN)
            }
            WavError::BadTag { offset, found } => write!(
                f,
                "Unexpected chunk tag {:?} at offset {}",
                String::from_utf8_lossy(found),
                offset
            ),
            WavError::UnsupportedFormat(code) => {
                write!(f, "Unsupported audio format code {} (expected PCM)", code)
            }
        }
    }
}

impl std::error::Error for WavError {}

/// The fields of a 44-byte PCM WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Size of the data sub-chunk. The RIFF chunk size is always `36 + data_size`.
    pub data_size: u32,
}

impl WavHeader {
    pub fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
            data_size: 0,
        }
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.channels) * u32::from(self.bits_per_sample) / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    pub fn riff_size(&self) -> u32 {
        riff_size_for(self.data_size)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(RIFF_TAG);
        out[4..8].copy_from_slice(&self.riff_size().to_le_bytes());
        out[8..12].copy_from_slice(WAVE_TAG);
        out[12..16].copy_from_slice(FMT_TAG);
        out[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
        out[20..22].copy_from_slice(&PCM_FORMAT.to_le_bytes());
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(DATA_TAG);
        out[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }

    /// Decode the first 44 bytes of a file written by [`WaveWriter`].
    pub fn parse(bytes: &[u8]) -> Result<Self, WavError> {
        if bytes.len() < HEADER_LEN {
            return Err(WavError::TooShort(bytes.len()));
        }

        for (offset, tag) in [(0, RIFF_TAG), (8, WAVE_TAG), (12, FMT_TAG), (36, DATA_TAG)] {
            let found = read_tag(bytes, offset);
            if &found != tag {
                return Err(WavError::BadTag { offset, found });
            }
        }

        let format = read_u16(bytes, 20);
        if format != PCM_FORMAT {
            return Err(WavError::UnsupportedFormat(format));
        }

        Ok(Self {
            channels: read_u16(bytes, 22),
            sample_rate: read_u32(bytes, 24),
            bits_per_sample: read_u16(bytes, 34),
            data_size: read_u32(bytes, 40),
        })
    }
}

fn riff_size_for(data_size: u32) -> u32 {
    data_size.saturating_add(HEADER_LEN as u32 - 8)
}

fn read_tag(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[offset..offset + 4]);
    tag
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Streams PCM payload into a seekable sink behind a provisional header.
///
/// Dropping an unclosed writer closes it and logs any failure.
pub struct WaveWriter<W: Write + Seek> {
    sink: Option<W>,
    header: WavHeader,
    total: u64,
}

impl<W: Write + Seek> WaveWriter<W> {
    /// Write the provisional header, both size fields zero, at the start of `sink`.
    ///
    /// Fails if the sink cannot seek or the header cannot be written.
    pub fn open(
        mut sink: W,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
    ) -> io::Result<Self> {
        let header = WavHeader::pcm(channels, sample_rate, bits_per_sample);
        let mut provisional = header.to_bytes();
        provisional[4..8].fill(0);

        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&provisional)?;

        Ok(Self {
            sink: Some(sink),
            header,
            total: 0,
        })
    }

    /// Append raw PCM bytes. The running total only counts bytes that were accepted.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "WAV writer already closed")
        })?;
        sink.write_all(bytes)?;
        self.total += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.total
    }

    pub fn header(&self) -> WavHeader {
        self.header
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    /// Patch both size fields and release the sink.
    ///
    /// The sink is dropped even when the patch fails, leaving the placeholder
    /// sizes in place. Calling this again after the first close is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };

        let data_size = match u32::try_from(self.total) {
            Ok(size) => size,
            Err(_) => {
                log::warn!(
                    "WAV payload of {} bytes exceeds the 32-bit size field, clamping",
                    self.total
                );
                u32::MAX - (HEADER_LEN as u32 - 8)
            }
        };
        self.header.data_size = data_size;

        let result = patch_sizes(&mut sink, data_size);
        drop(sink);
        result
    }
}

fn patch_sizes<W: Write + Seek>(sink: &mut W, data_size: u32) -> io::Result<()> {
    sink.flush()?;
    sink.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    sink.write_all(&riff_size_for(data_size).to_le_bytes())?;
    sink.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    sink.write_all(&data_size.to_le_bytes())?;
    sink.seek(SeekFrom::End(0))?;
    sink.flush()
}

impl<W: Write + Seek> Drop for WaveWriter<W> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize WAV header on drop: {}", e);
            }
        }
    }
}

/// Summary of a finished recording as seen by an independent reader.
#[derive(Debug, Clone, PartialEq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Number of sample frames (samples per channel).
    pub frames: u32,
    pub duration: Duration,
}

/// Parse a WAV file with hound and summarize it.
pub fn read_wav_info(path: &Path) -> Result<WavInfo, String> {
    let reader =
        hound::WavReader::open(path).map_err(|e| format!("Open WAV {:?}: {}", path, e))?;
    let spec = reader.spec();
    let frames = reader.duration();

    let duration = if spec.sample_rate == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(u64::from(frames) * 1_000_000_000 / u64::from(spec.sample_rate))
    };

    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        frames,
        duration,
    })
}
