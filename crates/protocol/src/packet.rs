//! Direct-protocol packet codec (HF-security family)
//!
//! The HF-security readers speak a vendor command protocol framed as:
//!
//! ```text
//! [0xEF 0x01][Address: u32 BE][Package: tag, length u16 BE, content][Checksum: u16 BE]
//! ```
//!
//! The checksum is the 16-bit running sum of the package bytes (tag, length
//! field and content), appended high byte first. A package as built by
//! [`fill_package`] carries two trailing zero bytes of checksum headroom;
//! [`encode_frame`] replaces that headroom with the computed checksum, so the
//! frame is always `package length + 6` bytes on the wire.
//!
//! Decoding validates only the sync bytes and the declared length. The
//! devices never echo a meaningful checksum back, so it is not re-verified
//! here; a corrupted length field surfaces as a failed response verification
//! one layer up.

use crate::error::{ProtocolError, Result};

/// Frame sync bytes, first on the wire
pub const SYNC_BYTES: [u8; 2] = [0xEF, 0x01];

/// Largest package the devices accept
pub const MAX_PACKAGE_SIZE: usize = 350;

/// Package tag for a host command
pub const COMMAND_PACKAGE: u8 = 0x01;

/// Package tag for an intermediate data packet
pub const DATA_PACKAGE: u8 = 0x02;

/// Package tag for the final data packet of a transfer
pub const END_DATA_PACKAGE: u8 = 0x08;

/// Package tag carried by every device response
pub const RESPONSE_PACKAGE: u8 = 0x07;

/// Command byte: trigger a capture (normal image)
pub const CAPTURE_IMAGE_COMMAND: u8 = 0x01;

/// Command byte: trigger a capture (extra image)
pub const CAPTURE_IMAGE_EXTRA_COMMAND: u8 = 0x30;

/// Command byte: fetch the stored image (normal)
pub const GET_IMAGE_COMMAND: u8 = 0x0A;

/// Command byte: fetch the stored image (extra)
pub const GET_IMAGE_EXTRA_COMMAND: u8 = 0x31;

/// Command byte: verify the device password
pub const VERIFY_PASSWORD_COMMAND: u8 = 0x13;

/// Broadcast module address used for every exchange
pub const GENERAL_SEND_ADDRESS: u32 = 0xFFFF_FFFF;

/// Response frames are read in at this fixed size
pub const RECEIVED_PACKAGE_LENGTH: usize = 64;

/// Encode a package into a wire frame
///
/// `package` must include its two bytes of checksum headroom (as produced by
/// [`fill_package`]). The headroom is replaced by the real checksum: the
/// first `package.len() - 2` bytes are copied and summed, then the 16-bit sum
/// is appended high byte first.
pub fn encode_frame(address: u32, package: &[u8]) -> Result<Vec<u8>> {
    if package.len() > MAX_PACKAGE_SIZE - 4 {
        return Err(ProtocolError::PayloadTooLarge {
            len: package.len(),
            max: MAX_PACKAGE_SIZE - 4,
        });
    }
    if package.len() < 2 {
        return Err(ProtocolError::TruncatedFrame {
            expected: 2,
            actual: package.len(),
        });
    }

    let body = &package[..package.len() - 2];
    let mut frame = Vec::with_capacity(package.len() + 6);
    frame.extend_from_slice(&SYNC_BYTES);
    frame.extend_from_slice(&address.to_be_bytes());

    let mut checksum: u16 = 0;
    for &byte in body {
        checksum = checksum.wrapping_add(u16::from(byte));
    }
    frame.extend_from_slice(body);
    frame.extend_from_slice(&checksum.to_be_bytes());

    Ok(frame)
}

/// Decode a wire frame back into its package bytes
///
/// Validates the sync bytes, reads the big-endian length field at offset 7
/// and returns `field + 1` bytes starting at offset 6 (the package tag, the
/// length field itself and the content, without the checksum).
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < 9 {
        return Err(ProtocolError::TruncatedFrame {
            expected: 9,
            actual: frame.len(),
        });
    }
    if frame[..2] != SYNC_BYTES {
        return Err(ProtocolError::SyncMismatch {
            found: [frame[0], frame[1]],
        });
    }

    let length = (usize::from(frame[7]) << 8 | usize::from(frame[8])) + 1;
    if frame.len() < 6 + length {
        return Err(ProtocolError::TruncatedFrame {
            expected: 6 + length,
            actual: frame.len(),
        });
    }

    Ok(frame[6..6 + length].to_vec())
}

/// Build a package from a tag and content bytes
///
/// Output layout: `[tag][length: u16 BE][content][0x00 0x00]` where the
/// length field is `content.len() + 2` (content plus checksum headroom).
/// Rejects tags other than command/data/end-data and oversized content.
pub fn fill_package(tag: u8, content: &[u8]) -> Result<Vec<u8>> {
    if !matches!(tag, COMMAND_PACKAGE | DATA_PACKAGE | END_DATA_PACKAGE) {
        return Err(ProtocolError::InvalidPackageTag { tag });
    }
    if content.len() > MAX_PACKAGE_SIZE {
        return Err(ProtocolError::ContentTooLarge {
            len: content.len(),
            max: MAX_PACKAGE_SIZE,
        });
    }

    let field = content.len() + 2;
    let mut package = Vec::with_capacity(3 + field);
    package.push(tag);
    package.extend_from_slice(&(field as u16).to_be_bytes());
    package.extend_from_slice(content);
    package.extend_from_slice(&[0, 0]);
    Ok(package)
}

/// Full package length as declared by its own header
///
/// `tag + length field (2) + declared content` - the byte count
/// [`encode_frame`] expects to be handed.
pub fn package_length(package: &[u8]) -> usize {
    usize::from(package[1]) * 256 + usize::from(package[2]) + 3
}

/// Check a decoded response package: response tag and a zero status byte
pub fn verify_response(package: &[u8]) -> bool {
    package.len() >= 4 && package[0] == RESPONSE_PACKAGE && package[3] == 0
}
