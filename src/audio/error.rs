//! Error types for device, stream and container operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for audio operations
pub type Result<T> = std::result::Result<T, AudioError>;

/// Failures local to a single capture or playback attempt
#[derive(Error, Debug)]
pub enum AudioError {
    /// The audio subsystem could not be reached or no device could be resolved
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// A stream could not be created, connected or kept running
    #[error("Failed to open audio stream: {reason}")]
    StreamOpen { reason: String },

    /// The container file could not be opened, written or seeked
    #[error("Container I/O failed for {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AudioError {
    pub fn device(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    pub fn stream(reason: impl Into<String>) -> Self {
        Self::StreamOpen {
            reason: reason.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}
