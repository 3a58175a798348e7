//! Wire protocol layer for USB fingerprint readers
//!
//! This crate holds everything byte-level and I/O-free: the vendor packet
//! codec spoken by the direct-protocol reader family, the CBW/CSW framing
//! used by the mass-storage style readers, the fixed device-identification
//! tables, the image descriptor constants and the event/device-info types
//! shared with the presentation layer.
//!
//! # Example
//!
//! ```
//! use protocol::packet::{self, COMMAND_PACKAGE, CAPTURE_IMAGE_COMMAND, GENERAL_SEND_ADDRESS};
//!
//! // Frame a capture command the way it goes on the wire
//! let package = packet::fill_package(COMMAND_PACKAGE, &[CAPTURE_IMAGE_COMMAND]).unwrap();
//! let frame = packet::encode_frame(GENERAL_SEND_ADDRESS, &package).unwrap();
//! assert_eq!(frame[..2], [0xEF, 0x01]);
//!
//! // Responses decode back into the package bytes
//! let package = packet::decode_frame(&frame).unwrap();
//! assert_eq!(package[0], COMMAND_PACKAGE);
//! ```

pub mod device;
pub mod error;
pub mod events;
pub mod image;
pub mod mass_storage;
pub mod packet;

pub use device::{
    DeviceModel, HfVariant, is_futronic_device, is_hf_security_device, is_supported_device,
};
pub use error::{ProtocolError, Result};
pub use events::{FingerprintDeviceInfo, FingerprintEvent};
pub use image::ImageKind;
