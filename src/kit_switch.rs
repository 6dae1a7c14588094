//! Live kit selection via MIDI program change.
//!
//! Independent of the name sync: a program change is two plain channel
//! bytes, never a SysEx frame, so the module services it even while a
//! sync is walking the kit table.

use tokio::sync::mpsc::Sender;

use crate::error::{AppError, ErrorType};

/// Builds the two-byte program change selecting a kit.
pub fn program_change(kit_number: u16, channel: u8) -> Result<[u8; 2], AppError> {
    if channel > 15 {
        return Err(AppError::new(
            ErrorType::InvalidChannel,
            format!("midi channel must be in 0..=15, got {}", channel),
        ));
    }
    if kit_number < 1 || kit_number > 128 {
        return Err(AppError::new(
            ErrorType::OutOfRange,
            format!("program change can only reach kits 1..=128, got {}", kit_number),
        ));
    }
    return Ok([0xC0 + channel, (kit_number - 1) as u8]);
}

pub struct KitSwitch {
    wire_tx: Sender<Vec<u8>>,
    last_kit: Option<u16>,
}

impl KitSwitch {
    pub fn new(wire_tx: Sender<Vec<u8>>) -> Self {
        Self {
            wire_tx,
            last_kit: None,
        }
    }

    /// Sends the program change for a kit. Fire-and-forget on the wire;
    /// the only failure past validation is a gone transport.
    pub async fn switch_to(&mut self, kit_number: u16, channel: u8) -> Result<(), AppError> {
        let message = program_change(kit_number, channel)?;
        if self.wire_tx.send(message.to_vec()).await.is_err() {
            return Err(AppError::new(
                ErrorType::NotConnected,
                "transport is gone".to_string(),
            ));
        }
        log::info!("switched to kit {} on channel {}", kit_number, channel);
        self.last_kit = Some(kit_number);
        return Ok(());
    }

    pub fn last_kit(&self) -> Option<u16> {
        self.last_kit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::channel;

    #[test]
    fn test_program_change_bytes() {
        assert_eq!(program_change(1, 9).unwrap(), [0xC9, 0x00]);
        assert_eq!(program_change(128, 9).unwrap(), [0xC9, 0x7F]);
        assert_eq!(program_change(64, 0).unwrap(), [0xC0, 0x3F]);
    }

    #[test]
    fn test_program_change_rejects_kit_out_of_range() {
        for kit_number in [0u16, 129, 200] {
            let Err(e) = program_change(kit_number, 9) else {
                panic!("kit {} must be rejected", kit_number);
            };
            assert_eq!(e.error_type, ErrorType::OutOfRange);
        }
    }

    #[test]
    fn test_program_change_rejects_bad_channel() {
        let Err(e) = program_change(1, 16) else {
            panic!("channel 16 must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::InvalidChannel);
    }

    #[tokio::test]
    async fn test_switch_sends_and_records() {
        let (wire_tx, mut wire_rx) = channel(4);
        let mut switch = KitSwitch::new(wire_tx);
        assert_eq!(switch.last_kit(), None);

        switch.switch_to(5, 9).await.unwrap();
        assert_eq!(wire_rx.recv().await.unwrap(), vec![0xC9, 0x04]);
        assert_eq!(switch.last_kit(), Some(5));

        // validation failures leave the record untouched
        assert!(switch.switch_to(129, 9).await.is_err());
        assert_eq!(switch.last_kit(), Some(5));
    }

    #[tokio::test]
    async fn test_switch_reports_dead_transport() {
        let (wire_tx, wire_rx) = channel(4);
        drop(wire_rx);
        let mut switch = KitSwitch::new(wire_tx);
        let Err(e) = switch.switch_to(5, 9).await else {
            panic!("dead transport must be reported");
        };
        assert_eq!(e.error_type, ErrorType::NotConnected);
    }
}
