//! In-process stand-in for the drum module.
//!
//! Speaks just enough of the wire protocol to exercise the engine
//! end-to-end without hardware: answers kit-name RQ1 requests with
//! checksummed DT1 frames, fragments them the way BLE MIDI does, and can
//! be told to stay silent for chosen kits or to die mid-sync.

use tokio::{
    select,
    sync::mpsc::{Receiver, Sender, channel},
    task::JoinHandle,
    time::{Duration, sleep},
};

use crate::midi_port::{FrameAssembler, PortControl};
use crate::roland::{SYSEX_END, SYSEX_START, SysExCommand, address, sysex};

#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    /// Delay before each DT1 response.
    pub response_delay_ms: u64,
    /// Kits that never answer, as real units intermittently do.
    pub silent_kits: Vec<u16>,
    /// Stop the module (and drop its channels) after this many replies.
    pub fail_after_kit: Option<u16>,
    /// Start with the receive path closed; only a `PortControl::OpenReceiver`
    /// lets responses through.
    pub start_receiver_closed: bool,
}

/// Spawns the module. Returns the core-facing channel ends: outbound
/// wire bytes, inbound chunks, and the port control channel.
pub fn start(
    options: SimOptions,
) -> (
    Sender<Vec<u8>>,
    Receiver<Vec<u8>>,
    Sender<PortControl>,
    JoinHandle<()>,
) {
    let (wire_tx, mut wire_rx) = channel::<Vec<u8>>(64);
    let (chunk_tx, chunk_rx) = channel(64);
    let (ctl_tx, mut ctl_rx) = channel(8);

    let handle = tokio::spawn(async move {
        let receiver_open = !options.start_receiver_closed;
        let mut module = SimModule {
            options,
            chunk_tx,
            assembler: FrameAssembler::new(),
            receiver_open,
            replies_sent: 0,
        };
        loop {
            select! {
                Some(bytes) = wire_rx.recv() => {
                    if !module.handle_bytes(&bytes).await {
                        break;
                    }
                }
                Some(control) = ctl_rx.recv() => module.handle_control(control),
                else => break,
            }
        }
        log::debug!("simulated module stopped");
    });
    return (wire_tx, chunk_rx, ctl_tx, handle);
}

struct SimModule {
    options: SimOptions,
    chunk_tx: Sender<Vec<u8>>,
    assembler: FrameAssembler,
    receiver_open: bool,
    replies_sent: u16,
}

impl SimModule {
    /// Returns false once the module should die.
    async fn handle_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() == 2 && bytes[0] & 0xF0 == 0xC0 {
            log::debug!(
                "program change: kit {} on channel {}",
                bytes[1] as u16 + 1,
                bytes[0] & 0x0F
            );
            return true;
        }
        for raw in self.assembler.push(bytes) {
            let Some(kit_number) = decode_name_request(&raw) else {
                log::debug!("ignoring frame: {}", hex::encode(&raw));
                continue;
            };
            if self.options.silent_kits.contains(&kit_number) {
                log::debug!("staying silent for kit {}", kit_number);
                continue;
            }
            if !self.respond(kit_number).await {
                return false;
            }
            self.replies_sent += 1;
            if let Some(limit) = self.options.fail_after_kit {
                if self.replies_sent >= limit {
                    log::debug!("simulated module dying after {} replies", limit);
                    return false;
                }
            }
        }
        return true;
    }

    fn handle_control(&mut self, control: PortControl) {
        match control {
            PortControl::OpenReceiver => self.receiver_open = true,
            PortControl::CloseReceiver => self.receiver_open = false,
        }
        log::debug!("receiver open: {}", self.receiver_open);
    }

    async fn respond(&mut self, kit_number: u16) -> bool {
        if self.options.response_delay_ms > 0 {
            sleep(Duration::from_millis(self.options.response_delay_ms)).await;
        }
        if !self.receiver_open {
            log::debug!("receiver closed, response for kit {} goes nowhere", kit_number);
            return true;
        }
        let Ok(kit_address) = address::kit_address(kit_number) else {
            return true;
        };
        let name = format!("Kit {:03}", kit_number);
        let frame = sysex::build_data_set(kit_address, &sysex::pad_kit_name(&name));

        // BLE MIDI never hands a frame over in one piece
        let split = frame.len() / 2;
        if self.chunk_tx.send(frame[..split].to_vec()).await.is_err() {
            return false;
        }
        return self.chunk_tx.send(frame[split..].to_vec()).await.is_ok();
    }
}

/// Decodes an RQ1 kit-name request, checksum included, the way the
/// module would. Anything else is ignored.
fn decode_name_request(raw: &[u8]) -> Option<u16> {
    if raw.len() != 17 || raw[0] != SYSEX_START || raw[raw.len() - 1] != SYSEX_END {
        return None;
    }
    if !matches!(SysExCommand::try_from(raw[6]), Ok(SysExCommand::RequestData)) {
        return None;
    }
    let body = &raw[1..raw.len() - 2];
    let sum: u32 = body.iter().map(|byte| *byte as u32).sum();
    if (sum + raw[raw.len() - 2] as u32) % 128 != 0 {
        log::debug!("request fails its checksum: {}", hex::encode(raw));
        return None;
    }
    let kit_number = address::kit_index(&raw[7..11]).ok()?;
    let length = address::decode_length(&raw[11..15]).ok()?;
    if length != crate::roland::KIT_NAME_LENGTH as u32 {
        return None;
    }
    return Some(kit_number);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roland::KIT_NAME_LENGTH;

    #[tokio::test]
    async fn test_answers_a_name_request() {
        let (wire_tx, mut chunk_rx, _ctl_tx, _handle) = start(SimOptions::default());
        let request = sysex::build_request(address::kit_address(3).unwrap(), KIT_NAME_LENGTH as u32);
        wire_tx.send(request).await.unwrap();

        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        while frames.is_empty() {
            let chunk = chunk_rx.recv().await.unwrap();
            frames = assembler.push(&chunk);
        }
        let frame = sysex::parse_response(&frames[0]).unwrap();
        let (kit_number, name) = sysex::extract_kit_name(&frame).unwrap();
        assert_eq!(kit_number, 3);
        assert_eq!(name, "Kit 003");
    }

    #[tokio::test]
    async fn test_ignores_program_change_bytes() {
        let (wire_tx, mut chunk_rx, _ctl_tx, _handle) = start(SimOptions::default());
        wire_tx.send(vec![0xC9, 0x04]).await.unwrap();

        let request = sysex::build_request(address::kit_address(1).unwrap(), KIT_NAME_LENGTH as u32);
        wire_tx.send(request).await.unwrap();

        // the first thing to come back is the kit 1 response
        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        while frames.is_empty() {
            let chunk = chunk_rx.recv().await.unwrap();
            frames = assembler.push(&chunk);
        }
        let frame = sysex::parse_response(&frames[0]).unwrap();
        assert_eq!(sysex::extract_kit_name(&frame).unwrap().0, 1);
    }
}
