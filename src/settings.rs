//! User preferences persisted with dconf
//!
//! Settings are stored in dconf under `/com/odaw/transport/`. Missing or
//! malformed values read back as unset.

use log::error;

const DCONF_PATH: &str = "/com/odaw/transport/";

/// Keys for dconf settings
mod keys {
    pub const TEMPO: &str = "tempo";
    pub const SELECTED_DEVICE: &str = "selected-device";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Get the preferred tempo in BPM
pub fn get_tempo() -> Option<u32> {
    dconf_rs::get_string(&key(keys::TEMPO))
        .ok()
        .and_then(|value| parse_tempo(&value))
}

/// Set the preferred tempo in BPM
pub fn set_tempo(bpm: u32) {
    if let Err(e) = dconf_rs::set_string(&key(keys::TEMPO), &bpm.to_string()) {
        error!("Failed to save tempo to dconf: {}", e);
    }
}

/// Get the preferred input device index
pub fn get_selected_device() -> Option<usize> {
    dconf_rs::get_string(&key(keys::SELECTED_DEVICE))
        .ok()
        .and_then(|value| parse_device(&value))
}

/// Set the preferred input device index
pub fn set_selected_device(index: usize) {
    if let Err(e) = dconf_rs::set_string(&key(keys::SELECTED_DEVICE), &index.to_string()) {
        error!("Failed to save selected device to dconf: {}", e);
    }
}

fn parse_tempo(value: &str) -> Option<u32> {
    unquote(value).parse().ok().filter(|&bpm| bpm > 0)
}

fn parse_device(value: &str) -> Option<usize> {
    unquote(value).parse().ok()
}

/// dconf prints strings as GVariant text, e.g. `'120'`
fn unquote(value: &str) -> &str {
    value.trim().trim_matches('\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tempo() {
        assert_eq!(parse_tempo("120"), Some(120));
        assert_eq!(parse_tempo("'96'\n"), Some(96));
        assert_eq!(parse_tempo("0"), None);
        assert_eq!(parse_tempo("-5"), None);
        assert_eq!(parse_tempo(""), None);
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("0"), Some(0));
        assert_eq!(parse_device(" '3' "), Some(3));
        assert_eq!(parse_device("usb"), None);
    }
}
