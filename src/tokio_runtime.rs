//! Global Tokio runtime hosting the periodic clock and the audio workers
//!
//! The transport tick runs on the main thread inside `block_on`; capture and
//! playback block for seconds at a time and go to the runtime's blocking pool.

use std::sync::OnceLock;
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the global Tokio runtime, or return the existing one
pub fn init() -> std::io::Result<&'static Runtime> {
    if let Some(runtime) = TOKIO_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("odaw-worker")
        .enable_all()
        .build()?;

    Ok(TOKIO_RUNTIME.get_or_init(|| runtime))
}
