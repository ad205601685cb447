//! PipeWire plumbing shared by enumeration, capture and playback

use super::container::PcmFormat;
use super::error::{AudioError, Result};
use super::FRAMES_PER_BUFFER;
use pipewire as pw;
use pw::spa;

/// Property key routing a stream to a specific node
const TARGET_OBJECT: &str = "target.object";
/// Property key requesting a fixed quantum
const NODE_LATENCY: &str = "node.latency";

/// One connection to the PipeWire daemon with its own main loop
pub(crate) struct Session {
    pub core: pw::core::CoreRc,
    _context: pw::context::ContextRc,
    pub mainloop: pw::main_loop::MainLoopRc,
}

impl Session {
    pub fn connect() -> Result<Self> {
        pw::init();

        let mainloop = pw::main_loop::MainLoopRc::new(None)
            .map_err(|e| AudioError::device(format!("Failed to create PipeWire main loop: {}", e)))?;

        let context = pw::context::ContextRc::new(&mainloop, None)
            .map_err(|e| AudioError::device(format!("Failed to create PipeWire context: {}", e)))?;

        let core = context
            .connect_rc(None)
            .map_err(|e| AudioError::device(format!("Failed to connect to PipeWire: {}", e)))?;

        Ok(Self {
            core,
            _context: context,
            mainloop,
        })
    }

    /// Quit the main loop from inside a callback
    pub fn quitter(&self) -> impl Fn() + 'static {
        let mainloop_weak = self.mainloop.downgrade();
        move || {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    }

    /// Create a stream with the fixed quantum and an optional target node
    pub fn stream(
        &self,
        name: &str,
        category: &str,
        role: &str,
        target: Option<&str>,
        format: PcmFormat,
    ) -> Result<pw::stream::StreamBox<'_>> {
        let latency = format!("{}/{}", FRAMES_PER_BUFFER, format.sample_rate);
        let mut props = pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Audio",
            *pw::keys::MEDIA_CATEGORY => category,
            *pw::keys::MEDIA_ROLE => role,
            *pw::keys::APP_NAME => "Odaw",
            NODE_LATENCY => latency.as_str(),
        };
        if let Some(target) = target {
            props.insert(TARGET_OBJECT, target);
        }

        pw::stream::StreamBox::new(&self.core, name, props)
            .map_err(|e| AudioError::stream(format!("Failed to create PipeWire stream: {}", e)))
    }
}

/// Serialize an EnumFormat pod requesting S16LE at the given rate and channel count
pub(crate) fn format_param(format: PcmFormat) -> Result<Vec<u8>> {
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::S16LE);
    audio_info.set_rate(format.sample_rate);
    audio_info.set_channels(u32::from(format.channels));

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| AudioError::stream(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    Ok(values)
}

/// Stream flags used by both directions
pub(crate) fn stream_flags() -> pw::stream::StreamFlags {
    pw::stream::StreamFlags::AUTOCONNECT
        | pw::stream::StreamFlags::MAP_BUFFERS
        | pw::stream::StreamFlags::RT_PROCESS
}
