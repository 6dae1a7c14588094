//! Byte-level MIDI transport plumbing.
//!
//! The host hands the engine a pair of channels: a `Sender<Vec<u8>>` for
//! outbound wire bytes and a `Receiver<Vec<u8>>` delivering inbound
//! chunks exactly as the transport produced them. BLE MIDI fragments
//! SysEx frames at arbitrary points and may pack several frames into one
//! chunk, so reassembly happens here, not in the transport.

use serde::Deserialize;

use crate::roland::{SYSEX_END, SYSEX_START};

/// Frames longer than this cannot be a kit-name transfer; the buffer is
/// dropped to keep a byte-storm from growing it without bound.
const MAX_FRAME_LENGTH: usize = 512;

/// Receive-port lifecycle around a sync.
///
/// Some firmware revisions only deliver DT1 responses on a freshly
/// opened output port; others misbehave when the port is cycled. Which
/// choreography a given unit needs is not settled, so it is a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStrategy {
    /// Leave the receive port alone; the host opened it once.
    KeepOpen,
    /// Open the receive port right before a sync and close it after.
    RebuildForSync,
}

/// Control messages the engine sends to the host's port manager when the
/// strategy calls for teardown/rebuild choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortControl {
    OpenReceiver,
    CloseReceiver,
}

/// Reassembles SysEx frames from transport chunks.
pub struct FrameAssembler {
    buffer: Vec<u8>,
    collecting: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            collecting: false,
        }
    }

    /// Feeds one transport chunk and returns every frame it completed.
    ///
    /// Bytes outside a start/end pair are dropped; this is where channel
    /// messages such as program changes fall out of the stream instead
    /// of being mistaken for responses.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == SYSEX_START {
                if self.collecting {
                    log::debug!("unterminated frame restarted after {} bytes", self.buffer.len());
                }
                self.buffer.clear();
                self.buffer.push(byte);
                self.collecting = true;
            } else if !self.collecting {
                continue;
            } else if byte == SYSEX_END {
                self.buffer.push(byte);
                frames.push(std::mem::take(&mut self.buffer));
                self.collecting = false;
            } else if byte >= 0xF8 {
                // realtime bytes may interleave anywhere, even mid-frame
                continue;
            } else {
                self.buffer.push(byte);
                if self.buffer.len() > MAX_FRAME_LENGTH {
                    log::warn!("dropping runaway frame after {} bytes", self.buffer.len());
                    self.buffer.clear();
                    self.collecting = false;
                }
            }
        }
        return frames;
    }
}
