//! Audio transport engine using PipeWire
//!
//! This module provides:
//! - Device enumeration and the process-wide input selection
//! - Fixed-duration capture of 44.1kHz mono 16-bit PCM into a WAV container
//! - Playback of that container to the default output

pub mod capture;
pub mod container;
pub mod devices;
mod error;
pub mod playback;
mod stream;

pub use capture::CaptureReport;
pub use container::PcmFormat;
pub use error::{AudioError, Result};
pub use playback::PlaybackReport;

use std::path::Path;
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 44100;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;
/// Frames per stream callback, both directions
pub const FRAMES_PER_BUFFER: u32 = 512;

/// The only PCM layout captured and played
pub const FORMAT: PcmFormat = PcmFormat::new(SAMPLE_RATE, CHANNELS, BITS_PER_SAMPLE);

/// Blocking capture and playback, run on worker threads by the transport
pub trait AudioEngine: Send + Sync + 'static {
    /// Capture `duration` from the selected input into `path`
    fn capture(
        &self,
        path: &Path,
        duration: Duration,
        selection: Option<usize>,
    ) -> Result<CaptureReport>;

    /// Play the container at `path` until it is exhausted
    fn play(&self, path: &Path) -> Result<PlaybackReport>;
}

/// Engine backed by the PipeWire daemon
#[derive(Clone, Copy, Debug, Default)]
pub struct PipeWireEngine;

impl AudioEngine for PipeWireEngine {
    fn capture(
        &self,
        path: &Path,
        duration: Duration,
        selection: Option<usize>,
    ) -> Result<CaptureReport> {
        capture::capture(path, duration, selection)
    }

    fn play(&self, path: &Path) -> Result<PlaybackReport> {
        playback::play(path)
    }
}
