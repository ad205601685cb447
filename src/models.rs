use serde::{Deserialize, Serialize};

/// Where the one-shot capture/playback workflow stands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TransportPhase {
    #[default]
    Idle,
    Capturing,
    CapturedPendingPlay,
    Playing,
    /// Both one-shot steps consumed
    Finished,
    Failed(String),
}

impl TransportPhase {
    /// No further transitions happen from here
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportPhase::Finished | TransportPhase::Failed(_))
    }
}

/// The captured region, drawn over the grid
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RecordingOverlay {
    pub start_px: f64,
    pub width_px: f64,
}

/// Everything the grid view needs after one tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickOutput {
    pub tick: u64,
    pub playhead_px: f64,
    pub phase: TransportPhase,
    pub recording_overlay: Option<RecordingOverlay>,
}
