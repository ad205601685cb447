//! Tempo-clocked transport driving a one-shot capture then playback
//!
//! `tick` is called from a single periodic clock and never blocks: it
//! advances the playhead, polls the outstanding worker, and dispatches the
//! next one. Capture and playback run on the runtime's blocking pool and
//! report back over oneshot channels, so playback can only be launched
//! after a capture outcome has been received.

mod clock;

use clock::PlayheadClock;

use crate::audio::devices::DeviceSelection;
use crate::audio::{self, AudioEngine, AudioError, CaptureReport, PlaybackReport};
use crate::models::{RecordingOverlay, TickOutput, TransportPhase};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

pub const DEFAULT_TEMPO_BPM: u32 = 120;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid transport configuration: {details}")]
    InvalidConfig { details: String },

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("{task} worker exited without reporting")]
    WorkerLost { task: &'static str },
}

/// Grid geometry, clock rate and the one-shot capture parameters
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tempo_bpm: u32,
    pub tick_interval: Duration,
    pub pixels_per_beat: f64,
    pub grid_width_beats: u32,
    pub capture_duration: Duration,
    pub container_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            tick_interval: Duration::from_millis(50),
            pixels_per_beat: 20.0,
            grid_width_beats: 80,
            capture_duration: Duration::from_secs(10),
            container_path: PathBuf::from("output.wav"),
        }
    }
}

impl TransportConfig {
    pub fn with_tempo(mut self, tempo_bpm: u32) -> Self {
        self.tempo_bpm = tempo_bpm;
        self
    }

    pub fn with_capture_duration(mut self, duration: Duration) -> Self {
        self.capture_duration = duration;
        self
    }

    pub fn with_container_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.container_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        let invalid = |details: &str| {
            Err(TransportError::InvalidConfig {
                details: details.to_string(),
            })
        };

        if self.tempo_bpm == 0 {
            return invalid("tempo must be at least 1 BPM");
        }
        if self.tick_interval.as_millis() == 0 {
            return invalid("tick interval must be at least 1 ms");
        }
        if !(self.pixels_per_beat.is_finite() && self.pixels_per_beat > 0.0) {
            return invalid("pixels per beat must be positive");
        }
        if self.grid_width_beats == 0 {
            return invalid("grid must be at least one beat wide");
        }
        Ok(())
    }
}

/// A blocking job on the runtime with its outcome channel
struct Worker<T> {
    handle: JoinHandle<()>,
    outcome: oneshot::Receiver<audio::Result<T>>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<F>(runtime: &Handle, job: F) -> Self
    where
        F: FnOnce() -> audio::Result<T> + Send + 'static,
    {
        let (sender, outcome) = oneshot::channel();
        let handle = runtime.spawn_blocking(move || {
            let _ = sender.send(job());
        });
        Self { handle, outcome }
    }

    /// Non-blocking check for the job's outcome
    fn poll(&mut self, task: &'static str) -> Option<Result<T, TransportError>> {
        match self.outcome.try_recv() {
            Ok(result) => Some(result.map_err(TransportError::from)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(TransportError::WorkerLost { task })),
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// The transport controller
pub struct Transport {
    config: TransportConfig,
    clock: PlayheadClock,
    engine: Arc<dyn AudioEngine>,
    runtime: Handle,
    selection: &'static DeviceSelection,
    phase: TransportPhase,
    capture: Option<Worker<CaptureReport>>,
    playback: Option<Worker<PlaybackReport>>,
    capture_start_px: f64,
    overlay: Option<RecordingOverlay>,
}

impl Transport {
    /// Build a transport; the tempo is fixed for its lifetime
    pub fn new(
        config: TransportConfig,
        engine: Arc<dyn AudioEngine>,
        runtime: Handle,
        selection: &'static DeviceSelection,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let clock = PlayheadClock::new(
            config.tempo_bpm,
            config.tick_interval,
            config.pixels_per_beat,
            config.grid_width_beats,
        );
        debug!(
            "Grid {:.0} px wide, {:.2} px per tick at {} BPM",
            clock.grid_width_px(),
            clock.pixels_per_tick(),
            config.tempo_bpm
        );

        Ok(Self {
            config,
            clock,
            engine,
            runtime,
            selection,
            phase: TransportPhase::Idle,
            capture: None,
            playback: None,
            capture_start_px: 0.0,
            overlay: None,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn phase(&self) -> &TransportPhase {
        &self.phase
    }

    /// True while a capture or playback worker is still running
    pub fn worker_active(&self) -> bool {
        let running = |finished: Option<bool>| finished == Some(false);
        running(self.capture.as_ref().map(Worker::is_finished))
            || running(self.playback.as_ref().map(Worker::is_finished))
    }

    /// Advance one clock period
    pub fn tick(&mut self) -> TickOutput {
        let playhead_px = self.clock.advance();

        match self.phase {
            TransportPhase::Idle => self.launch_capture(playhead_px),
            TransportPhase::Capturing => self.poll_capture(),
            TransportPhase::Playing => self.poll_playback(),
            TransportPhase::CapturedPendingPlay
            | TransportPhase::Finished
            | TransportPhase::Failed(_) => {}
        }

        if self.phase == TransportPhase::CapturedPendingPlay {
            self.launch_playback();
        }

        debug!(
            "ticks: {}, offset: {:.2}, tempo: {}",
            self.clock.ticks(),
            playhead_px,
            self.clock.tempo_bpm()
        );

        TickOutput {
            tick: self.clock.ticks(),
            playhead_px,
            phase: self.phase.clone(),
            recording_overlay: self.overlay,
        }
    }

    fn launch_capture(&mut self, playhead_px: f64) {
        let engine = self.engine.clone();
        let path = self.config.container_path.clone();
        let duration = self.config.capture_duration;
        let selection = self.selection.get();

        info!(
            "Starting capture to {} for {:.1}s",
            path.display(),
            duration.as_secs_f64()
        );
        self.capture = Some(Worker::spawn(&self.runtime, move || {
            engine.capture(&path, duration, selection)
        }));
        self.capture_start_px = playhead_px;
        self.phase = TransportPhase::Capturing;
    }

    fn poll_capture(&mut self) {
        let Some(outcome) = self.capture.as_mut().and_then(|worker| worker.poll("capture")) else {
            return;
        };
        self.capture = None;

        match outcome {
            Ok(report) => {
                info!(
                    "Audio recorded to {} ({} frames, {:.2}s measured)",
                    self.config.container_path.display(),
                    report.frames,
                    report.duration().as_secs_f64()
                );
                self.overlay = Some(RecordingOverlay {
                    start_px: self.capture_start_px,
                    width_px: self.clock.span_px(self.config.capture_duration.as_secs_f64()),
                });
                self.phase = TransportPhase::CapturedPendingPlay;
            }
            Err(e) => self.fail("Capture", e),
        }
    }

    fn launch_playback(&mut self) {
        let engine = self.engine.clone();
        let path = self.config.container_path.clone();

        info!("Starting playback of {}", path.display());
        self.playback = Some(Worker::spawn(&self.runtime, move || engine.play(&path)));
        self.phase = TransportPhase::Playing;
    }

    fn poll_playback(&mut self) {
        let Some(outcome) = self.playback.as_mut().and_then(|worker| worker.poll("playback")) else {
            return;
        };
        self.playback = None;

        match outcome {
            Ok(report) => {
                info!(
                    "Audio played from {} ({} frames)",
                    self.config.container_path.display(),
                    report.frames
                );
                self.phase = TransportPhase::Finished;
            }
            Err(e) => self.fail("Playback", e),
        }
    }

    fn fail(&mut self, stage: &str, e: TransportError) {
        error!("{} failed: {}", stage, e);
        self.phase = TransportPhase::Failed(e.to_string());
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // blocking workers cannot be aborted; they run to completion detached
        if self.worker_active() {
            warn!("Transport dropped while an audio worker is still running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Instant;

    /// In-memory engine with scripted outcomes
    #[derive(Default)]
    struct ScriptedEngine {
        capture_gate: Mutex<Option<mpsc::Receiver<()>>>,
        capture_error: Option<&'static str>,
        play_error: Option<&'static str>,
        panic_on_capture: bool,
        captures: AtomicUsize,
        plays: AtomicUsize,
        capture_done: AtomicBool,
        played_before_capture: AtomicBool,
        seen_selection: Mutex<Option<Option<usize>>>,
    }

    impl ScriptedEngine {
        fn gated() -> (Self, mpsc::Sender<()>) {
            let (release, gate) = mpsc::channel();
            let engine = Self {
                capture_gate: Mutex::new(Some(gate)),
                ..Self::default()
            };
            (engine, release)
        }
    }

    impl AudioEngine for ScriptedEngine {
        fn capture(
            &self,
            _path: &Path,
            duration: Duration,
            selection: Option<usize>,
        ) -> audio::Result<CaptureReport> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            *self.seen_selection.lock().unwrap() = Some(selection);

            let gate = self.capture_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            if self.panic_on_capture {
                panic!("capture worker crashed");
            }

            self.capture_done.store(true, Ordering::SeqCst);
            match self.capture_error {
                Some(reason) => Err(AudioError::stream(reason)),
                None => Ok(CaptureReport {
                    frames: (duration.as_secs_f64() * audio::SAMPLE_RATE as f64) as u64,
                    payload_bytes: 0,
                    device: None,
                }),
            }
        }

        fn play(&self, _path: &Path) -> audio::Result<PlaybackReport> {
            if !self.capture_done.load(Ordering::SeqCst) {
                self.played_before_capture.store(true, Ordering::SeqCst);
            }
            self.plays.fetch_add(1, Ordering::SeqCst);
            match self.play_error {
                Some(reason) => Err(AudioError::stream(reason)),
                None => Ok(PlaybackReport { frames: 441_000 }),
            }
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn transport(
        rt: &tokio::runtime::Runtime,
        engine: Arc<ScriptedEngine>,
        selection: &'static DeviceSelection,
    ) -> Transport {
        Transport::new(TransportConfig::default(), engine, rt.handle().clone(), selection).unwrap()
    }

    fn tick_until(transport: &mut Transport, done: impl Fn(&TickOutput) -> bool) -> TickOutput {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let output = transport.tick();
            if done(&output) {
                return output;
            }
            assert!(Instant::now() < deadline, "transport stuck in {:?}", output.phase);
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_first_tick_starts_capture() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let (engine, release) = ScriptedEngine::gated();
        let engine = Arc::new(engine);
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        let output = transport.tick();
        assert_eq!(output.tick, 1);
        assert_eq!(output.playhead_px, 2.0);
        assert_eq!(output.phase, TransportPhase::Capturing);
        assert!(output.recording_overlay.is_none());

        for _ in 0..20 {
            assert_eq!(transport.tick().phase, TransportPhase::Capturing);
        }
        release.send(()).unwrap();
        tick_until(&mut transport, |o| o.phase.is_terminal());
        assert_eq!(engine.captures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_then_play_once() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine = Arc::new(ScriptedEngine::default());
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        let playing = tick_until(&mut transport, |o| o.phase == TransportPhase::Playing);
        assert_eq!(
            playing.recording_overlay,
            Some(RecordingOverlay {
                start_px: 2.0,
                width_px: 400.0
            })
        );

        let finished = tick_until(&mut transport, |o| o.phase == TransportPhase::Finished);
        assert_eq!(finished.recording_overlay, playing.recording_overlay);

        for _ in 0..10 {
            assert_eq!(transport.tick().phase, TransportPhase::Finished);
        }
        assert_eq!(engine.captures.load(Ordering::SeqCst), 1);
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);
        assert!(!engine.played_before_capture.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stalled_capture_never_plays() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let (engine, release) = ScriptedEngine::gated();
        let engine = Arc::new(engine);
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        for _ in 0..200 {
            let output = transport.tick();
            assert_eq!(output.phase, TransportPhase::Capturing);
            assert!(output.recording_overlay.is_none());
        }
        thread::sleep(Duration::from_millis(20));
        assert_eq!(transport.tick().phase, TransportPhase::Capturing);
        assert!(transport.worker_active());
        assert_eq!(engine.plays.load(Ordering::SeqCst), 0);

        drop(release);
        tick_until(&mut transport, |o| o.phase.is_terminal());
        assert!(!engine.played_before_capture.load(Ordering::SeqCst));
    }

    #[test]
    fn test_capture_failure_is_terminal() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine = Arc::new(ScriptedEngine {
            capture_error: Some("device busy"),
            ..ScriptedEngine::default()
        });
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        let output = tick_until(&mut transport, |o| o.phase.is_terminal());
        match output.phase {
            TransportPhase::Failed(reason) => assert!(reason.contains("device busy")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(output.recording_overlay.is_none());

        for _ in 0..10 {
            transport.tick();
        }
        assert_eq!(engine.captures.load(Ordering::SeqCst), 1);
        assert_eq!(engine.plays.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_playback_failure_is_terminal() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine = Arc::new(ScriptedEngine {
            play_error: Some("no output"),
            ..ScriptedEngine::default()
        });
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        let output = tick_until(&mut transport, |o| o.phase.is_terminal());
        assert!(matches!(output.phase, TransportPhase::Failed(ref r) if r.contains("no output")));
        assert!(output.recording_overlay.is_some());
        assert_eq!(engine.plays.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_crashed_worker_fails_transport() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine = Arc::new(ScriptedEngine {
            panic_on_capture: true,
            ..ScriptedEngine::default()
        });
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        let output = tick_until(&mut transport, |o| o.phase.is_terminal());
        assert!(matches!(output.phase, TransportPhase::Failed(ref r) if r.contains("capture worker")));
        assert_eq!(engine.plays.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_selection_read_at_capture_start() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine = Arc::new(ScriptedEngine::default());
        let mut transport = transport(&rt, engine.clone(), &SELECTION);

        SELECTION.select(3);
        tick_until(&mut transport, |o| o.phase.is_terminal());
        SELECTION.select(5);

        assert_eq!(*engine.seen_selection.lock().unwrap(), Some(Some(3)));
    }

    #[test]
    fn test_playhead_keeps_moving_while_capturing() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let (engine, release) = ScriptedEngine::gated();
        let mut transport = transport(&rt, Arc::new(engine), &SELECTION);

        let mut last = 0.0;
        for tick in 1..=799 {
            let output = transport.tick();
            assert_eq!(output.tick, tick);
            assert!(output.playhead_px > last);
            last = output.playhead_px;
        }
        assert_eq!(transport.tick().playhead_px, 0.0);

        drop(release);
        tick_until(&mut transport, |o| o.phase.is_terminal());
    }

    #[test]
    fn test_rejects_invalid_config() {
        static SELECTION: DeviceSelection = DeviceSelection::new();
        let rt = runtime();
        let engine: Arc<dyn AudioEngine> = Arc::new(ScriptedEngine::default());

        let zero_tempo = TransportConfig::default().with_tempo(0);
        let err = Transport::new(zero_tempo, engine.clone(), rt.handle().clone(), &SELECTION)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidConfig { .. }));

        let no_grid = TransportConfig {
            grid_width_beats: 0,
            ..TransportConfig::default()
        };
        assert!(Transport::new(no_grid, engine, rt.handle().clone(), &SELECTION).is_err());
    }
}
