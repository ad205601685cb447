//! Audio capture using PipeWire
//!
//! Streams the selected input into a container file for a fixed wall-clock
//! duration. The payload is appended as buffers arrive and the header is
//! patched in once the stream has stopped.

use super::container::ContainerWriter;
use super::devices::{self, AudioDevice};
use super::error::{AudioError, Result};
use super::stream::{self, Session};
use super::{FORMAT, SAMPLE_RATE};
use log::{debug, info, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Summary of a finished capture
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureReport {
    /// Frames written to the payload
    pub frames: u64,
    /// Declared payload size in the header
    pub payload_bytes: u32,
    /// Device the stream was routed to, `None` for the default input
    pub device: Option<String>,
}

impl CaptureReport {
    /// Captured length measured from the frame counter
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / SAMPLE_RATE as f64)
    }
}

/// Receives buffers from the stream callback and owns the container writer
pub struct CaptureSink<W: Write + Seek> {
    writer: ContainerWriter<W>,
    /// Callbacks that arrived without an input buffer
    skipped: u64,
    write_error: Option<io::Error>,
    stream_error: Option<String>,
}

impl<W: Write + Seek> CaptureSink<W> {
    pub fn new(writer: ContainerWriter<W>) -> Self {
        Self {
            writer,
            skipped: 0,
            write_error: None,
            stream_error: None,
        }
    }

    /// Append a delivered buffer
    ///
    /// A callback without input is not counted. This mirrors the stream
    /// contract but does not model device dropout; such gaps shorten the
    /// payload instead of being filled with silence.
    pub fn deliver(&mut self, input: Option<&[u8]>) {
        let Some(pcm) = input else {
            self.skipped += 1;
            return;
        };
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = self.writer.append(pcm) {
            self.write_error = Some(e);
        }
    }

    pub fn fail_stream(&mut self, message: impl Into<String>) {
        self.stream_error.get_or_insert_with(|| message.into());
    }

    pub fn frames(&self) -> u64 {
        self.writer.frames()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Patch the header and report, or surface the first failure
    ///
    /// A stream error before any frame arrived means the device never
    /// opened. After that it is treated as a short capture.
    pub fn finish(mut self, path: &Path, device: Option<String>) -> Result<CaptureReport> {
        if let Some(e) = self.write_error.take() {
            return Err(AudioError::file(path, e));
        }
        if let Some(message) = self.stream_error.take() {
            if self.writer.frames() == 0 {
                return Err(AudioError::stream(message));
            }
            warn!(
                "Capture stream failed after {} frames, keeping short capture: {}",
                self.writer.frames(),
                message
            );
        }
        if self.skipped() > 0 {
            debug!("{} capture callbacks delivered no input", self.skipped());
        }

        let payload_bytes = self
            .writer
            .finalize()
            .map_err(|e| AudioError::file(path, e))?;

        Ok(CaptureReport {
            frames: self.writer.frames(),
            payload_bytes,
            device,
        })
    }
}

/// Shared handle to the sink - thread-safe
pub struct SharedCaptureState<W: Write + Seek> {
    inner: Arc<Mutex<Option<CaptureSink<W>>>>,
}

impl<W: Write + Seek> Clone for SharedCaptureState<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Write + Seek> SharedCaptureState<W> {
    pub fn new(sink: CaptureSink<W>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(sink))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CaptureSink<W>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn deliver(&self, input: Option<&[u8]>) {
        if let Some(sink) = self.lock().as_mut() {
            sink.deliver(input);
        }
    }

    pub fn fail_stream(&self, message: impl Into<String>) {
        if let Some(sink) = self.lock().as_mut() {
            sink.fail_stream(message);
        }
    }

    pub fn frames(&self) -> u64 {
        self.lock().as_ref().map_or(0, CaptureSink::frames)
    }

    /// Detach the sink; later deliveries are ignored
    pub fn take(&self) -> Option<CaptureSink<W>> {
        self.lock().take()
    }
}

enum CaptureCommand {
    Stop,
}

/// Capture `duration` of audio from the selected input into `path`
///
/// The selection indexes the input-capable devices as enumerated now; an
/// unset or out-of-range index falls back to the default input. Blocks the
/// calling thread for the whole duration.
pub fn capture(path: &Path, duration: Duration, selection: Option<usize>) -> Result<CaptureReport> {
    let inputs = devices::list_input_devices();
    let target = devices::resolve_input(&inputs, selection).cloned();
    log_target(target.as_ref(), selection, inputs.len());

    let file = File::create(path).map_err(|e| AudioError::file(path, e))?;
    let writer =
        ContainerWriter::create(BufWriter::new(file), FORMAT).map_err(|e| AudioError::file(path, e))?;
    let state = SharedCaptureState::new(CaptureSink::new(writer));

    let (sender, receiver) = pw::channel::channel::<CaptureCommand>();
    let (ready_tx, ready_rx) = mpsc::channel();

    let loop_state = state.clone();
    let target_name = target.as_ref().map(|device| device.name.clone());
    let handle = thread::Builder::new()
        .name("odaw-capture".to_string())
        .spawn(move || run_capture_loop(loop_state, target_name, receiver, ready_tx))
        .map_err(|e| AudioError::stream(format!("Failed to spawn capture thread: {}", e)))?;

    if ready_rx.recv().is_err() {
        join_loop(handle)?;
        return Err(AudioError::stream("Capture stream exited before starting"));
    }

    info!("Capturing {:.1}s to {}", duration.as_secs_f64(), path.display());
    thread::sleep(duration);

    // the loop may already have quit on a stream error
    debug!("Stopping capture after {} frames", state.frames());
    let _ = sender.send(CaptureCommand::Stop);
    join_loop(handle)?;

    let sink = state
        .take()
        .ok_or_else(|| AudioError::stream("Capture sink was already finalized"))?;
    let report = sink.finish(path, target.map(|device| device.description))?;

    info!(
        "Captured {} frames ({:.2}s) to {}",
        report.frames,
        report.duration().as_secs_f64(),
        path.display()
    );
    Ok(report)
}

fn log_target(target: Option<&AudioDevice>, selection: Option<usize>, inputs: usize) {
    match (target, selection) {
        (Some(device), _) => info!(
            "Capture device: {} ({}, node {})",
            device.description, device.name, device.id
        ),
        (None, Some(index)) => warn!(
            "Input device {} is out of range ({} available), using the default input",
            index, inputs
        ),
        (None, None) => info!("No input device selected, using the default input"),
    }
}

fn join_loop(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .join()
        .map_err(|_| AudioError::stream("Capture thread panicked"))?
}

/// Run the PipeWire capture loop until stopped or the stream fails
fn run_capture_loop(
    state: SharedCaptureState<BufWriter<File>>,
    target: Option<String>,
    receiver: pw::channel::Receiver<CaptureCommand>,
    ready: mpsc::Sender<()>,
) -> Result<()> {
    let session = Session::connect()?;

    // Set up channel receiver to stop the loop
    let quit = session.quitter();
    let _receiver = receiver.attach(session.mainloop.loop_(), move |cmd| match cmd {
        CaptureCommand::Stop => quit(),
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedCaptureState<BufWriter<File>>,
        quit: Box<dyn Fn()>,
    }

    let user_data = UserData {
        format: Default::default(),
        state,
        quit: Box::new(session.quitter()),
    };

    let stream = session.stream(
        "odaw-capture",
        "Capture",
        "Production",
        target.as_deref(),
        FORMAT,
    )?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .state_changed(|_, user_data, old, new| {
            debug!("Capture stream state: {:?} -> {:?}", old, new);
            if let pw::stream::StreamState::Error(message) = new {
                user_data.state.fail_stream(message);
                (user_data.quit)();
            }
        })
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if user_data.format.parse(param).is_ok() {
                debug!(
                    "Capture format negotiated: {} Hz, {} channel(s)",
                    user_data.format.rate(),
                    user_data.format.channels()
                );
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let (offset, size) = {
                let chunk = data.chunk();
                (chunk.offset() as usize, chunk.size() as usize)
            };

            let input = match data.data() {
                Some(raw) => {
                    let raw: &[u8] = raw;
                    let start = offset.min(raw.len());
                    let end = start.saturating_add(size).min(raw.len());
                    Some(&raw[start..end])
                }
                None => None,
            };

            user_data.state.deliver(input);
        })
        .register()
        .map_err(|e| AudioError::stream(format!("Failed to register stream listener: {}", e)))?;

    let values = stream::format_param(FORMAT)?;
    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| AudioError::stream("Invalid audio format parameters"))?];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            stream::stream_flags(),
            &mut params,
        )
        .map_err(|e| AudioError::stream(format!("Failed to connect capture stream: {}", e)))?;

    let _ = ready.send(());

    // Run until stopped
    session.mainloop.run();

    Ok(())
}
