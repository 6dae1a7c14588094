//! Kit number to SysEx address mapping.
//!
//! The module addresses memory with four 7-bit bytes. Kit 1 lives at
//! display address `04 00 00 00` and consecutive kits are `00 01 00 00`
//! apart, so the arithmetic below works on the packed 28-bit value and
//! converts to wire bytes with 7-bit shifts. Carries cross byte
//! boundaries at 0x80, not 0x100: kit 130 is `05 01 00 00`.

use crate::error::{AppError, ErrorType};
use crate::roland::TOTAL_KITS;

/// Packed base address of kit 1 (displays as `04 00 00 00`).
const KIT_BASE_ADDRESS: u32 = 0x04 << 21;

/// Packed offset between consecutive kits (displays as `00 01 00 00`).
const KIT_ADDRESS_STRIDE: u32 = 1 << 14;

/// Computes the 4-byte SysEx address of a kit's name block.
pub fn kit_address(kit_number: u16) -> Result<[u8; 4], AppError> {
    if kit_number < 1 || kit_number > TOTAL_KITS {
        return Err(AppError::new(
            ErrorType::OutOfRange,
            format!("kit number must be in 1..={}, got {}", TOTAL_KITS, kit_number),
        ));
    }
    let packed = KIT_BASE_ADDRESS + (kit_number as u32 - 1) * KIT_ADDRESS_STRIDE;
    return Ok(unpack(packed));
}

/// Recovers the kit number from a 4-byte SysEx address.
pub fn kit_index(address: &[u8]) -> Result<u16, AppError> {
    let packed = pack(address, ErrorType::InvalidAddress)?;
    if packed < KIT_BASE_ADDRESS {
        return Err(AppError::new(
            ErrorType::InvalidAddress,
            format!("address {} is below the kit region", hex::encode(address)),
        ));
    }
    let offset = packed - KIT_BASE_ADDRESS;
    if offset % KIT_ADDRESS_STRIDE != 0 {
        return Err(AppError::new(
            ErrorType::InvalidAddress,
            format!("address {} is not on a kit boundary", hex::encode(address)),
        ));
    }
    let kit_number = offset / KIT_ADDRESS_STRIDE + 1;
    if kit_number > TOTAL_KITS as u32 {
        return Err(AppError::new(
            ErrorType::InvalidAddress,
            format!("address {} maps past kit {}", hex::encode(address), TOTAL_KITS),
        ));
    }
    return Ok(kit_number as u16);
}

/// Encodes a payload size as the 4-byte field used in RQ1 requests.
pub fn encode_length(length: u32) -> [u8; 4] {
    return unpack(length & 0x0FFF_FFFF);
}

/// Decodes a 4-byte size field.
pub fn decode_length(bytes: &[u8]) -> Result<u32, AppError> {
    return pack(bytes, ErrorType::InvalidLength);
}

fn unpack(value: u32) -> [u8; 4] {
    return [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ];
}

fn pack(bytes: &[u8], error_type: ErrorType) -> Result<u32, AppError> {
    if bytes.len() != 4 {
        return Err(AppError::new(
            error_type,
            format!("field must be 4 bytes, got {}", bytes.len()),
        ));
    }
    for byte in bytes {
        if byte & 0x80 != 0 {
            return Err(AppError::new(
                error_type,
                format!("byte {:02x} has the top bit set", byte),
            ));
        }
    }
    return Ok(((bytes[0] as u32) << 21)
        | ((bytes[1] as u32) << 14)
        | ((bytes[2] as u32) << 7)
        | bytes[3] as u32);
}
