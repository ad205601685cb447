//! RIFF/WAVE container with a fixed 44-byte PCM header
//!
//! Captures stream their payload first and patch the header in afterwards,
//! so the declared `data` size always matches the bytes on disk. Playback
//! trusts self-produced files and only skips the header.

#![allow(dead_code)]

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Length of the canonical PCM header
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// PCM layout declared in the header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.channels) * u32::from(self.bits_per_sample) / 8
    }

    /// Bytes per interleaved frame
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

/// Serialize the header for a payload of `payload_bytes`
pub fn encode_header(format: PcmFormat, payload_bytes: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&payload_bytes.saturating_add(36).to_le_bytes());
    header[8..16].copy_from_slice(b"WAVEfmt ");
    header[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&payload_bytes.to_le_bytes());
    header
}

/// Write the 44-byte header at the sink's current position
pub fn write_header<W: Write>(
    sink: &mut W,
    format: PcmFormat,
    payload_bytes: u32,
) -> io::Result<()> {
    sink.write_all(&encode_header(format, payload_bytes))
}

/// Parse a header back into its format and declared payload size
pub fn read_header<R: Read>(source: &mut R) -> io::Result<(PcmFormat, u32)> {
    let mut header = [0u8; HEADER_LEN];
    source.read_exact(&mut header)?;

    if &header[0..4] != b"RIFF" || &header[8..16] != b"WAVEfmt " || &header[36..40] != b"data" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a canonical PCM container",
        ));
    }

    let u16_at = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
    let u32_at = |at: usize| {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };

    let format = PcmFormat::new(u32_at(24), u16_at(22), u16_at(34));
    Ok((format, u32_at(40)))
}

/// Encode a complete container in memory
pub fn encode(format: PcmFormat, payload: &[u8]) -> io::Result<Vec<u8>> {
    let payload_bytes = payload_len(payload.len() as u64)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut out, format, payload_bytes)?;
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode a complete container, returning everything after the header as payload
pub fn decode<R: Read>(mut source: R) -> io::Result<(PcmFormat, Vec<u8>)> {
    let (format, _) = read_header(&mut source)?;
    let mut payload = Vec::new();
    source.read_to_end(&mut payload)?;
    Ok((format, payload))
}

fn payload_len(bytes: u64) -> io::Result<u32> {
    // chunk size is 36 + payload and must also fit
    u32::try_from(bytes)
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds the container limit", bytes),
            )
        })
}

/// Streaming writer: reserves the header, appends whole frames, then finalizes
pub struct ContainerWriter<W: Write + Seek> {
    inner: W,
    format: PcmFormat,
    frames: u64,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Reserve the header region so payload writes start at offset 44
    pub fn create(mut inner: W, format: PcmFormat) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        Ok(Self {
            inner,
            format,
            frames: 0,
        })
    }

    /// Frames appended so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Payload size derived from the frame counter
    pub fn payload_bytes(&self) -> u64 {
        self.frames * u64::from(self.format.block_align())
    }

    /// Append interleaved PCM, dropping any trailing partial frame
    ///
    /// Returns the number of frames written.
    pub fn append(&mut self, pcm: &[u8]) -> io::Result<u64> {
        let align = usize::from(self.format.block_align().max(1));
        let frames = pcm.len() / align;
        self.inner.write_all(&pcm[..frames * align])?;
        self.frames += frames as u64;
        Ok(frames as u64)
    }

    /// Seek back to the start and write the header for the current payload
    pub fn finalize(&mut self) -> io::Result<u32> {
        let payload_bytes = payload_len(self.payload_bytes())?;
        self.inner.seek(SeekFrom::Start(0))?;
        write_header(&mut self.inner, self.format, payload_bytes)?;
        self.inner.flush()?;
        Ok(payload_bytes)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Outcome of filling one output block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    /// The block was filled entirely from the payload
    Full,
    /// The payload ran out after `filled` bytes; the rest was zeroed
    Final { filled: usize },
    /// Nothing was left to read
    Exhausted,
}

/// Streaming reader that skips the header and hands out fixed-size blocks
pub struct ContainerReader<R: Read + Seek> {
    inner: R,
    bytes_read: u64,
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn open(mut inner: R) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        Ok(Self {
            inner,
            bytes_read: 0,
        })
    }

    /// Payload bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fill `block` from the payload, zero-padding a short final block
    pub fn fill_block(&mut self, block: &mut [u8]) -> io::Result<Block> {
        let mut filled = 0;
        while filled < block.len() {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.bytes_read += filled as u64;

        if filled == block.len() {
            Ok(Block::Full)
        } else if filled == 0 {
            Ok(Block::Exhausted)
        } else {
            block[filled..].fill(0);
            Ok(Block::Final { filled })
        }
    }
}
