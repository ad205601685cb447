//! Audio device catalog and the process-wide input selection
//!
//! The catalog is rebuilt from the PipeWire registry on every call. The
//! selection is an index into the input-capable subset, recorded without
//! validation and resolved only when a capture starts.

use super::error::{AudioError, Result};
use super::stream::Session;
use log::{debug, warn};
use pipewire as pw;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Represents an audio device node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDevice {
    /// Registry id of the node
    pub id: u32,
    /// `node.name`, used to route streams to the node
    pub name: String,
    /// Human-readable label
    pub description: String,
    /// Whether the node can be captured from
    pub is_input: bool,
}

impl AudioDevice {
    /// Build a descriptor from a node's `media.class`, if it is an audio device
    pub fn from_node(
        id: u32,
        media_class: &str,
        name: Option<&str>,
        description: Option<&str>,
        nick: Option<&str>,
    ) -> Option<Self> {
        let is_input = match media_class {
            "Audio/Source" | "Audio/Duplex" => true,
            "Audio/Sink" => false,
            _ => return None,
        };

        let name = name.map(str::to_string).unwrap_or_else(|| format!("node-{}", id));
        let description = description
            .or(nick)
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());

        Some(Self {
            id,
            name,
            description,
            is_input,
        })
    }
}

const UNSET: usize = usize::MAX;

/// Selected input device index, written by the UI and read at capture start
#[derive(Debug)]
pub struct DeviceSelection {
    index: AtomicUsize,
}

impl DeviceSelection {
    pub const fn new() -> Self {
        Self {
            index: AtomicUsize::new(UNSET),
        }
    }

    pub fn select(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }

    pub fn get(&self) -> Option<usize> {
        match self.index.load(Ordering::Acquire) {
            UNSET => None,
            index => Some(index),
        }
    }
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self::new()
    }
}

static SELECTION: DeviceSelection = DeviceSelection::new();

/// The process-wide selection
pub fn selection() -> &'static DeviceSelection {
    &SELECTION
}

/// Record the chosen input index; validation is deferred to capture start
pub fn select_input_device(index: usize) {
    debug!("Selected input device index {}", index);
    SELECTION.select(index);
}

/// Pick the `selection`-th input-capable device, or `None` for the default input
pub fn resolve_input(devices: &[AudioDevice], selection: Option<usize>) -> Option<&AudioDevice> {
    let index = selection?;
    devices.iter().filter(|device| device.is_input).nth(index)
}

/// Enumerate all audio devices, or nothing if PipeWire is unreachable
pub fn list_devices() -> Vec<AudioDevice> {
    match enumerate() {
        Ok(devices) => {
            debug!("Enumerated {} audio devices", devices.len());
            devices
        }
        Err(e) => {
            warn!("No audio devices listed: {}", e);
            Vec::new()
        }
    }
}

/// Enumerate only the input-capable devices, in registry order
pub fn list_input_devices() -> Vec<AudioDevice> {
    list_devices()
        .into_iter()
        .filter(|device| device.is_input)
        .collect()
}

/// Display names of the input-capable devices, indexable by the selection
pub fn input_device_names() -> Vec<String> {
    list_input_devices()
        .into_iter()
        .map(|device| device.description)
        .collect()
}

/// Collect audio nodes from the registry, finishing with a core sync round trip
fn enumerate() -> Result<Vec<AudioDevice>> {
    let session = Session::connect()?;

    let registry = session
        .core
        .get_registry_rc()
        .map_err(|e| AudioError::device(format!("Failed to get PipeWire registry: {}", e)))?;

    let devices = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(false));

    let found = devices.clone();
    let _registry_listener = registry
        .add_listener_local()
        .global(move |global| {
            if global.type_ != pw::types::ObjectType::Node {
                return;
            }
            let Some(props) = global.props else {
                return;
            };
            let Some(media_class) = props.get(*pw::keys::MEDIA_CLASS) else {
                return;
            };

            if let Some(device) = AudioDevice::from_node(
                global.id,
                media_class,
                props.get(*pw::keys::NODE_NAME),
                props.get(*pw::keys::NODE_DESCRIPTION),
                props.get(*pw::keys::NODE_NICK),
            ) {
                found.borrow_mut().push(device);
            }
        })
        .register();

    let pending = session
        .core
        .sync(0)
        .map_err(|e| AudioError::device(format!("Failed to sync with PipeWire: {}", e)))?;

    let synced = done.clone();
    let quit = session.quitter();
    let _core_listener = session
        .core
        .add_listener_local()
        .done(move |id, seq| {
            if id == pw::core::PW_ID_CORE && seq == pending {
                synced.set(true);
                quit();
            }
        })
        .register();

    while !done.get() {
        session.mainloop.run();
    }

    let devices = devices.take();
    Ok(devices)
}
