//! Audio playback using PipeWire
//!
//! Streams a container's payload to the default output in fixed-size blocks
//! and returns once the file is exhausted.

use super::container::{self, Block, ContainerReader};
use super::error::{AudioError, Result};
use super::stream::{self, Session};
use super::{FORMAT, FRAMES_PER_BUFFER};
use log::{debug, info};
use pipewire as pw;
use pw::spa;
use pw::spa::pod::Pod;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Summary of a finished playback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Payload frames handed to the output, excluding padding
    pub frames: u64,
}

/// What the stream callback should do with the buffer it holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    /// Queue `len` bytes
    Data(usize),
    /// Nothing left; the stream is complete
    Done,
}

/// Hands out payload blocks until the file runs out
pub struct PlaybackFeed<R: Read + Seek> {
    reader: ContainerReader<R>,
    finished: bool,
    read_error: Option<io::Error>,
    stream_error: Option<String>,
}

impl<R: Read + Seek> PlaybackFeed<R> {
    pub fn new(reader: ContainerReader<R>) -> Self {
        Self {
            reader,
            finished: false,
            read_error: None,
            stream_error: None,
        }
    }

    /// Fill the next block; a short final block goes out zero-padded
    pub fn next_block(&mut self, block: &mut [u8]) -> Feed {
        if self.is_finished() || block.is_empty() {
            return Feed::Done;
        }

        match self.reader.fill_block(block) {
            Ok(Block::Full) => Feed::Data(block.len()),
            Ok(Block::Final { filled }) => {
                debug!("Final playback block: {} of {} bytes", filled, block.len());
                self.finished = true;
                Feed::Data(block.len())
            }
            Ok(Block::Exhausted) => {
                self.finished = true;
                Feed::Done
            }
            Err(e) => {
                self.read_error = Some(e);
                self.finished = true;
                Feed::Done
            }
        }
    }

    pub fn fail_stream(&mut self, message: impl Into<String>) {
        self.finished = true;
        self.stream_error.get_or_insert_with(|| message.into());
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn finish(mut self, path: &Path) -> Result<PlaybackReport> {
        if let Some(e) = self.read_error.take() {
            return Err(AudioError::file(path, e));
        }
        if let Some(message) = self.stream_error.take() {
            return Err(AudioError::stream(message));
        }
        Ok(PlaybackReport {
            frames: self.reader.bytes_read() / u64::from(FORMAT.block_align()),
        })
    }
}

/// Shared playback feed - thread-safe
pub struct SharedPlaybackState<R: Read + Seek> {
    inner: Arc<Mutex<Option<PlaybackFeed<R>>>>,
}

impl<R: Read + Seek> Clone for SharedPlaybackState<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Read + Seek> SharedPlaybackState<R> {
    pub fn new(feed: PlaybackFeed<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(feed))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PlaybackFeed<R>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_block(&self, block: &mut [u8]) -> Feed {
        match self.lock().as_mut() {
            Some(feed) => feed.next_block(block),
            None => Feed::Done,
        }
    }

    fn fail_stream(&self, message: impl Into<String>) {
        if let Some(feed) = self.lock().as_mut() {
            feed.fail_stream(message);
        }
    }

    fn take(&self) -> Option<PlaybackFeed<R>> {
        self.lock().take()
    }
}

/// Play the container at `path` to completion
pub fn play(path: &Path) -> Result<PlaybackReport> {
    let file = File::open(path).map_err(|e| AudioError::file(path, e))?;
    let mut source = BufReader::new(file);

    // the header is not trusted; playback always assumes the fixed format
    match container::read_header(&mut source) {
        Ok((format, payload_bytes)) => debug!(
            "{}: {} Hz, {} ch, {} payload bytes",
            path.display(),
            format.sample_rate,
            format.channels,
            payload_bytes
        ),
        Err(e) => debug!("{}: unrecognized header ({}), playing anyway", path.display(), e),
    }

    let reader = ContainerReader::open(source).map_err(|e| AudioError::file(path, e))?;
    let state = SharedPlaybackState::new(PlaybackFeed::new(reader));

    info!("Playing {}", path.display());
    run_playback_loop(state.clone())?;

    let feed = state
        .take()
        .ok_or_else(|| AudioError::stream("Playback feed was already finalized"))?;
    let report = feed.finish(path)?;

    info!("Played {} frames from {}", report.frames, path.display());
    Ok(report)
}

/// Run the PipeWire playback loop until the feed is exhausted
fn run_playback_loop(state: SharedPlaybackState<BufReader<File>>) -> Result<()> {
    let session = Session::connect()?;

    struct UserData {
        state: SharedPlaybackState<BufReader<File>>,
        quit: Box<dyn Fn()>,
    }

    let user_data = UserData {
        state,
        quit: Box::new(session.quitter()),
    };

    let stream = session.stream("odaw-playback", "Playback", "Music", None, FORMAT)?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .state_changed(|_, user_data, old, new| {
            debug!("Playback stream state: {:?} -> {:?}", old, new);
            if let pw::stream::StreamState::Error(message) = new {
                user_data.state.fail_stream(message);
                (user_data.quit)();
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
            let stride = usize::from(FORMAT.block_align());
            let block_bytes = FRAMES_PER_BUFFER as usize * stride;

            let Some(slice) = data.data() else {
                return;
            };

            let len = slice.len().min(block_bytes) / stride * stride;
            let feed = user_data.state.next_block(&mut slice[..len]);

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            match feed {
                Feed::Data(written) => {
                    *chunk.size_mut() = written as u32;
                }
                Feed::Done => {
                    *chunk.size_mut() = 0;
                    (user_data.quit)();
                }
            }
        })
        .register()
        .map_err(|e| AudioError::stream(format!("Failed to register stream listener: {}", e)))?;

    let values = stream::format_param(FORMAT)?;
    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| AudioError::stream("Invalid audio format parameters"))?];

    // Connect the stream (Output direction for playback)
    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            stream::stream_flags(),
            &mut params,
        )
        .map_err(|e| AudioError::stream(format!("Failed to connect playback stream: {}", e)))?;

    // Run until the feed is exhausted or the stream fails
    session.mainloop.run();

    Ok(())
}
