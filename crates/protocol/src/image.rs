//! Image descriptors for the capture commands
//!
//! The direct-protocol readers store exactly two image formats; each format
//! fixes the command byte that triggers a capture, the command byte that
//! fetches the stored frame, and the transfer size. The constants are part of
//! the device contract and must not drift.

use crate::packet::{
    CAPTURE_IMAGE_COMMAND, CAPTURE_IMAGE_EXTRA_COMMAND, GET_IMAGE_COMMAND,
    GET_IMAGE_EXTRA_COMMAND,
};
use serde::{Deserialize, Serialize};

/// Displayed image width of the HF-security frames
pub const IMAGE_WIDTH: u32 = 256;

/// Displayed image height of the HF-security frames
pub const IMAGE_HEIGHT: u32 = 288;

const EXTRA_IMAGE_WIDTH: u32 = 256;
const EXTRA_IMAGE_HEIGHT: u32 = 360;

/// Byte offset where pixel data starts in the generated 8-bit bitmap
/// (54-byte header plus a 256-entry grayscale palette)
pub const BMP_PIXEL_OFFSET: usize = 1078;

/// Transfer size of a normal frame, header region included
pub const STD_BMP_SIZE: usize = (IMAGE_WIDTH * IMAGE_HEIGHT) as usize + BMP_PIXEL_OFFSET;

/// Transfer size of an extra frame, header region included
pub const EXTRA_STD_BMP_SIZE: usize =
    (EXTRA_IMAGE_WIDTH * EXTRA_IMAGE_HEIGHT) as usize + BMP_PIXEL_OFFSET;

/// Futronic frame geometry
pub const FUTRONIC_FRAME_WIDTH: u32 = 320;

/// Futronic frame geometry
pub const FUTRONIC_FRAME_HEIGHT: u32 = 480;

/// Raw Futronic frame size in bytes
pub const FUTRONIC_FRAME_SIZE: usize = (FUTRONIC_FRAME_WIDTH * FUTRONIC_FRAME_HEIGHT) as usize;

/// Capture format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageKind {
    /// Standard resolution frame
    Normal,
    /// Taller sensor window; the stored frame is still displayed at the
    /// standard geometry
    #[default]
    Extra,
}

impl ImageKind {
    /// Command byte that triggers a hardware capture
    pub fn capture_command(self) -> u8 {
        match self {
            Self::Normal => CAPTURE_IMAGE_COMMAND,
            Self::Extra => CAPTURE_IMAGE_EXTRA_COMMAND,
        }
    }

    /// Command byte that fetches the stored frame
    pub fn fetch_command(self) -> u8 {
        match self {
            Self::Normal => GET_IMAGE_COMMAND,
            Self::Extra => GET_IMAGE_EXTRA_COMMAND,
        }
    }

    /// Bytes transferred when fetching this frame
    pub fn byte_len(self) -> usize {
        match self {
            Self::Normal => STD_BMP_SIZE,
            Self::Extra => EXTRA_STD_BMP_SIZE,
        }
    }

    /// Displayed width in pixels
    pub fn width(self) -> u32 {
        IMAGE_WIDTH
    }

    /// Displayed height in pixels
    pub fn height(self) -> u32 {
        IMAGE_HEIGHT
    }
}
