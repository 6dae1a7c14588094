//! RQ1/DT1 frame assembly and parsing.

use crate::error::{AppError, ErrorType};
use crate::roland::{
    DEVICE_ID, KIT_NAME_LENGTH, MODEL_ID, ROLAND_ID, SYSEX_END, SYSEX_START, SysExCommand, address,
};

/// Byte offset of the command byte inside a frame.
const COMMAND_INDEX: usize = 6;

/// Shortest valid kit-name DT1: start + id + device + model(3) + command
/// + address(4) + name(16) + checksum + end.
const MIN_RESPONSE_LENGTH: usize = 7 + 4 + KIT_NAME_LENGTH + 2;

/// A decoded Data-Set frame.
#[derive(Debug, Clone)]
pub struct SysExFrame {
    pub command: SysExCommand,
    pub address: [u8; 4],
    pub payload: Vec<u8>,
}

/// Roland checksum over everything between the start marker and the
/// checksum byte. The module sums the same range and expects the total
/// to cancel out mod 128.
pub fn checksum(body: &[u8]) -> u8 {
    let sum: u32 = body.iter().map(|byte| *byte as u32).sum();
    return ((128 - (sum % 128)) & 0x7F) as u8;
}

/// Builds a complete RQ1 frame requesting `length` bytes at `address`.
pub fn build_request(address: [u8; 4], length: u32) -> Vec<u8> {
    return build_frame(SysExCommand::RequestData, address, &address::encode_length(length));
}

/// Builds a complete DT1 frame carrying `payload` at `address`.
pub fn build_data_set(address: [u8; 4], payload: &[u8]) -> Vec<u8> {
    return build_frame(SysExCommand::DataSet, address, payload);
}

fn build_frame(command: SysExCommand, address: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut body = vec![ROLAND_ID, DEVICE_ID];
    body.extend_from_slice(&MODEL_ID);
    body.push(command.into());
    body.extend_from_slice(&address);
    body.extend_from_slice(payload);
    let sum = checksum(&body);

    let mut frame = Vec::with_capacity(body.len() + 3);
    frame.push(SYSEX_START);
    frame.extend_from_slice(&body);
    frame.push(sum);
    frame.push(SYSEX_END);
    return frame;
}

/// Validates a raw inbound frame and decodes it as a DT1.
///
/// A frame failing any check is rejected whole; the caller treats it the
/// same as no frame having arrived.
pub fn parse_response(raw: &[u8]) -> Result<SysExFrame, AppError> {
    if raw.first() != Some(&SYSEX_START) || raw.last() != Some(&SYSEX_END) {
        return Err(AppError::new(
            ErrorType::BadMarker,
            "frame is not bounded by f0/f7".to_string(),
        ));
    }
    if raw.len() < MIN_RESPONSE_LENGTH {
        return Err(AppError::new(
            ErrorType::FrameTooShort,
            format!("{} bytes, need at least {}", raw.len(), MIN_RESPONSE_LENGTH),
        ));
    }
    let command = match SysExCommand::try_from(raw[COMMAND_INDEX]) {
        Ok(SysExCommand::DataSet) => SysExCommand::DataSet,
        _ => {
            return Err(AppError::new(
                ErrorType::UnexpectedCommand,
                format!("command byte {:02x} is not dt1", raw[COMMAND_INDEX]),
            ));
        }
    };

    let body = &raw[1..raw.len() - 2];
    let sum = raw[raw.len() - 2];
    if (body.iter().map(|byte| *byte as u32).sum::<u32>() + sum as u32) % 128 != 0 {
        return Err(AppError::new(
            ErrorType::ChecksumMismatch,
            format!("checksum byte {:02x} does not cancel the body sum", sum),
        ));
    }

    let mut address = [0u8; 4];
    address.copy_from_slice(&raw[COMMAND_INDEX + 1..COMMAND_INDEX + 5]);
    return Ok(SysExFrame {
        command,
        address,
        payload: raw[COMMAND_INDEX + 5..raw.len() - 2].to_vec(),
    });
}

/// Pulls the kit number and display name out of a DT1 frame.
///
/// `EmptyName` is a skip signal, not a failure: the module pads unused
/// slots with spaces and NULs.
pub fn extract_kit_name(frame: &SysExFrame) -> Result<(u16, String), AppError> {
    let kit_number = address::kit_index(&frame.address)?;
    let name_bytes = &frame.payload[..KIT_NAME_LENGTH.min(frame.payload.len())];
    let name = String::from_utf8_lossy(name_bytes)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(AppError::new(
            ErrorType::EmptyName,
            format!("kit {} has no name", kit_number),
        ));
    }
    return Ok((kit_number, name));
}

/// Pads a name to the module's fixed 16-byte field.
pub fn pad_kit_name(name: &str) -> Vec<u8> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(KIT_NAME_LENGTH);
    bytes.resize(KIT_NAME_LENGTH, b' ');
    return bytes;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_cancels_body_sum() {
        // RQ1 body for the kit 1 name request
        let body = [
            0x41, 0x10, 0x01, 0x06, 0x01, 0x11, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10,
        ];
        let sum = checksum(&body);
        assert_eq!(sum, 0x02);
        let total: u32 = body.iter().map(|b| *b as u32).sum::<u32>() + sum as u32;
        assert_eq!(total % 128, 0);
    }

    #[test]
    fn test_checksum_zero_sum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x40, 0x40]), 0);
    }

    #[test]
    fn test_build_request_wire_bytes() {
        let frame = build_request([0x04, 0x00, 0x00, 0x00], 16);
        assert_eq!(
            frame,
            vec![
                0xF0, 0x41, 0x10, 0x01, 0x06, 0x01, 0x11, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x10, 0x02, 0xF7,
            ]
        );
    }

    #[test]
    fn test_build_parse_extract_round_trip() {
        let address = address::kit_address(42).unwrap();
        let raw = build_data_set(address, &pad_kit_name("Rock Kit"));
        let frame = parse_response(&raw).unwrap();
        assert_eq!(frame.command, SysExCommand::DataSet);
        let (kit_number, name) = extract_kit_name(&frame).unwrap();
        assert_eq!(kit_number, 42);
        assert_eq!(name, "Rock Kit");
    }

    #[test]
    fn test_parse_rejects_bad_markers() {
        let mut raw = build_data_set([0x04, 0x00, 0x00, 0x00], &pad_kit_name("Rock Kit"));
        raw[0] = 0x7E;
        let Err(e) = parse_response(&raw) else {
            panic!("flipped start marker must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::BadMarker);

        let mut raw = build_data_set([0x04, 0x00, 0x00, 0x00], &pad_kit_name("Rock Kit"));
        let last = raw.len() - 1;
        raw[last] = 0x00;
        let Err(e) = parse_response(&raw) else {
            panic!("flipped end marker must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::BadMarker);
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        let Err(e) = parse_response(&[0xF0, 0x41, 0x10, 0x12, 0xF7]) else {
            panic!("truncated frame must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::FrameTooShort);
    }

    #[test]
    fn test_parse_rejects_request_command() {
        // an RQ1 echo is not a response even if it is long enough
        let raw = build_data_set([0x04, 0x00, 0x00, 0x00], &pad_kit_name("Rock Kit"));
        let mut echoed = raw.clone();
        echoed[6] = SysExCommand::RequestData.into();
        let Err(e) = parse_response(&echoed) else {
            panic!("rq1 command must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::UnexpectedCommand);
    }

    #[test]
    fn test_parse_rejects_corrupted_checksum() {
        let mut raw = build_data_set([0x04, 0x00, 0x00, 0x00], &pad_kit_name("Rock Kit"));
        let index = raw.len() - 2;
        raw[index] = raw[index].wrapping_add(1) & 0x7F;
        let Err(e) = parse_response(&raw) else {
            panic!("corrupted checksum must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::ChecksumMismatch);
    }

    #[test]
    fn test_parse_rejects_corrupted_name_byte() {
        let mut raw = build_data_set([0x04, 0x00, 0x00, 0x00], &pad_kit_name("Rock Kit"));
        raw[12] = raw[12].wrapping_add(1) & 0x7F;
        let Err(e) = parse_response(&raw) else {
            panic!("body corruption must fail the checksum");
        };
        assert_eq!(e.error_type, ErrorType::ChecksumMismatch);
    }

    #[test]
    fn test_extract_trims_padding() {
        let address = address::kit_address(7).unwrap();
        let mut padded = b"Jazz".to_vec();
        padded.resize(KIT_NAME_LENGTH, 0x00);
        let frame = parse_response(&build_data_set(address, &padded)).unwrap();
        let (kit_number, name) = extract_kit_name(&frame).unwrap();
        assert_eq!(kit_number, 7);
        assert_eq!(name, "Jazz");
    }

    #[test]
    fn test_extract_rejects_blank_name() {
        let address = address::kit_address(3).unwrap();
        let frame = parse_response(&build_data_set(address, &pad_kit_name(""))).unwrap();
        let Err(e) = extract_kit_name(&frame) else {
            panic!("blank name must be reported");
        };
        assert_eq!(e.error_type, ErrorType::EmptyName);
    }

    #[test]
    fn test_extract_propagates_bad_address() {
        let frame = SysExFrame {
            command: SysExCommand::DataSet,
            address: [0x00, 0x00, 0x00, 0x00],
            payload: pad_kit_name("Rock Kit"),
        };
        let Err(e) = extract_kit_name(&frame) else {
            panic!("address outside the kit region must be rejected");
        };
        assert_eq!(e.error_type, ErrorType::InvalidAddress);
    }
}
