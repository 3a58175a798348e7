//! Mass-storage style framing (CBW/CSW) for the HF4000 readers
//!
//! The HF4000 revisions enumerate as mass-storage class devices and wrap
//! every data transfer in a command block / status wrapper pair: the host
//! writes a 31-byte command block, moves the data, then reads a status
//! wrapper and checks its signature and status bytes. The HF4000 V1 chip
//! additionally echoes part of the command block back inside the status
//! wrapper; [`echo_matches`] supports that per-variant check.

/// Command block length on the wire
pub const CBW_LEN: usize = 31;

/// Status wrapper buffer length
pub const CSW_LEN: usize = 16;

/// Bytes of the status wrapper actually transferred by the devices
pub const CSW_READ_LEN: usize = 13;

/// Offset of the signature byte checked in the status wrapper
pub const CSW_SIGNATURE_INDEX: usize = 3;

/// Expected signature byte ('S' of "USBS")
pub const CSW_SIGNATURE_OK: u8 = 0x53;

/// Offset of the status byte in the status wrapper
pub const CSW_STATUS_INDEX: usize = 12;

const CBW_SIGNATURE: [u8; 4] = *b"USBC";
const CBW_TAG: [u8; 4] = [0xB0, 0xFA, 0x69, 0x86];
const CBW_FLAG_DATA_OUT: u8 = 0x00;
const CBW_FLAG_DATA_IN: u8 = 0x80;
const CBW_COMMAND_LENGTH: u8 = 0x0A;
const CBW_COMMAND_CODE_IN: u8 = 0x85;
const CBW_COMMAND_CODE_OUT: u8 = 0x86;

/// Transfer direction of the bracketed data stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Build the 31-byte command block bracketing a data transfer
///
/// Layout: "USBC" signature, fixed tag, little-endian transfer length,
/// direction flag at offset 12, command length 0x0A at offset 14 and the
/// vendor command code at offset 15.
pub fn command_block(transfer_length: u32, direction: Direction) -> [u8; CBW_LEN] {
    let mut block = [0u8; CBW_LEN];
    block[..4].copy_from_slice(&CBW_SIGNATURE);
    block[4..8].copy_from_slice(&CBW_TAG);
    block[8..12].copy_from_slice(&transfer_length.to_le_bytes());
    block[12] = match direction {
        Direction::Out => CBW_FLAG_DATA_OUT,
        Direction::In => CBW_FLAG_DATA_IN,
    };
    block[14] = CBW_COMMAND_LENGTH;
    block[15] = match direction {
        Direction::Out => CBW_COMMAND_CODE_OUT,
        Direction::In => CBW_COMMAND_CODE_IN,
    };
    block
}

/// Validate a status wrapper: signature byte and zero status
pub fn verify_status(status: &[u8]) -> bool {
    status.len() >= CSW_READ_LEN
        && status[CSW_SIGNATURE_INDEX] == CSW_SIGNATURE_OK
        && status[CSW_STATUS_INDEX] == 0
}

/// Compare the status-wrapper echo against the command block over `range`
///
/// Only the HF4000 V1 chip performs this echo; the caller decides when the
/// check applies and which byte range the chip mirrors.
pub fn echo_matches(status: &[u8], block: &[u8], range: std::ops::Range<usize>) -> bool {
    status.len() >= range.end
        && block.len() >= range.end
        && status[range.clone()] == block[range]
}
