//! Runtime settings.
//!
//! Timing values and the port choreography vary between firmware
//! revisions and transports, so they load from an optional yaml file
//! next to the binary instead of being baked in. Missing file or bad
//! yaml falls back to defaults that match the module over BLE MIDI.

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use serde::Deserialize;

use crate::midi_port::PortStrategy;
use crate::roland::{DRUM_CHANNEL, TOTAL_KITS};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// MIDI channel for program changes (0-indexed).
    pub midi_channel: u8,
    /// Number of kits to walk during a name sync.
    pub total_kits: u16,
    /// Length of one wait tick while a response is outstanding.
    pub response_tick_ms: u64,
    /// Ticks to wait before a kit is written off as unresponsive.
    pub response_ticks: u32,
    /// Pause between kits so the transport is not saturated.
    pub inter_kit_pause_ms: u64,
    /// How long to listen for trailing responses after the last kit.
    pub drain_ms: u64,
    pub port_strategy: PortStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            midi_channel: DRUM_CHANNEL,
            total_kits: TOTAL_KITS,
            response_tick_ms: 20,
            response_ticks: 30,
            inter_kit_pause_ms: 10,
            drain_ms: 300,
            port_strategy: PortStrategy::KeepOpen,
        }
    }
}

pub fn load<P: AsRef<Path>>(path: P) -> Settings {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(settings) => {
                log::info!("settings loaded from {:?}", path);
                settings
            }
            Err(e) => {
                log::error!("YAML parse error in {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(_) => {
            log::debug!("no settings file at {:?}, using defaults", path);
            Settings::default()
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: Settings = load("settings.yaml");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.midi_channel, 9);
        assert_eq!(settings.total_kits, 200);
        assert_eq!(settings.port_strategy, PortStrategy::KeepOpen);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings: Settings =
            serde_yaml::from_str("total_kits: 20\nport_strategy: rebuild_for_sync\n").unwrap();
        assert_eq!(settings.total_kits, 20);
        assert_eq!(settings.port_strategy, PortStrategy::RebuildForSync);
        assert_eq!(settings.response_ticks, 30);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let settings = load("no-such-settings.yaml");
        assert_eq!(settings.total_kits, 200);
    }
}
