pub mod address;
pub mod sysex;

use num_enum::{IntoPrimitive, TryFromPrimitive};

// SysEx framing //////////////////////////////////

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

pub const ROLAND_ID: u8 = 0x41;
pub const DEVICE_ID: u8 = 0x10;

/// Model ID of the V71 drum module (three bytes).
pub const MODEL_ID: [u8; 3] = [0x01, 0x06, 0x01];

/// Roland SysEx command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SysExCommand {
    /// RQ1, request data from the module.
    RequestData = 0x11,
    /// DT1, data set sent by the module.
    DataSet = 0x12,
}

// Kit layout /////////////////////////////////////

pub const TOTAL_KITS: u16 = 200;
pub const KIT_NAME_LENGTH: usize = 16;

/// MIDI channel the module listens on for program changes
/// (0-indexed; 9 is MIDI channel 10, the drum convention).
pub const DRUM_CHANNEL: u8 = 9;
