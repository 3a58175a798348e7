//! Sensor frame postprocessing
//!
//! Raw sensor bytes become an 8-bit grayscale bitmap (the readers deliver
//! bare pixel data; the header and palette are built host-side), which is
//! then decoded, desaturated and re-encoded as PNG for display. The same
//! pixel math feeds the capture-quality heuristics: per-pixel luma, the
//! session darkness score and the best-capture recoloring pass.
//!
//! The darkness score is a heuristic proxy for fingerprint contrast, not a
//! biometric quality measure.

use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::warn;

/// Byte offset of pixel data in the generated bitmap
/// (54-byte header + 256-entry palette)
pub use protocol::image::BMP_PIXEL_OFFSET;

/// Brightness threshold before the first frame of a session calibrates it
pub const DEFAULT_BRIGHTNESS_THRESHOLD: f32 = 128.0;

/// Build a well-formed 8-bit grayscale BMP around raw sensor bytes
///
/// Returns `None` when `raw` holds fewer than `width * height` bytes.
pub fn sensor_bitmap(raw: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let pixel_count = (width * height) as usize;
    if raw.len() < pixel_count {
        warn!(
            "Sensor frame too short: {} bytes for {}x{}",
            raw.len(),
            width,
            height
        );
        return None;
    }

    let total = BMP_PIXEL_OFFSET + pixel_count;
    let mut bmp = vec![0u8; BMP_PIXEL_OFFSET];

    // File header
    bmp[0] = b'B';
    bmp[1] = b'M';
    bmp[2..6].copy_from_slice(&(total as u32).to_le_bytes());
    bmp[10..14].copy_from_slice(&(BMP_PIXEL_OFFSET as u32).to_le_bytes());

    // DIB header (BITMAPINFOHEADER)
    bmp[14] = 40;
    bmp[18..22].copy_from_slice(&width.to_le_bytes());
    bmp[22..26].copy_from_slice(&height.to_le_bytes());
    bmp[26] = 1; // planes
    bmp[28] = 8; // bits per pixel
    bmp[34..38].copy_from_slice(&(pixel_count as u32).to_le_bytes());
    bmp[46..50].copy_from_slice(&256u32.to_le_bytes());

    // Grayscale palette
    for entry in 0..256usize {
        let offset = 54 + entry * 4;
        bmp[offset] = entry as u8; // blue
        bmp[offset + 1] = entry as u8; // green
        bmp[offset + 2] = entry as u8; // red
    }

    bmp.extend_from_slice(&raw[..pixel_count]);
    Some(bmp)
}

/// Decode a bitmap, desaturate it and encode the result as PNG
pub fn bitmap_to_png(bmp: &[u8]) -> Option<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(bmp, image::ImageFormat::Bmp)
        .map_err(|e| warn!("Bitmap decode failed: {}", e))
        .ok()?;
    let rgba = decoded.grayscale().to_rgba8();
    rgba_to_png(&rgba)
}

/// Full display pipeline: raw sensor bytes to PNG
pub fn sensor_to_png(raw: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    bitmap_to_png(&sensor_bitmap(raw, width, height)?)
}

/// Decode PNG display bytes back into an RGBA buffer
pub fn png_to_rgba(png: &[u8]) -> Option<RgbaImage> {
    image::load_from_memory_with_format(png, image::ImageFormat::Png)
        .map_err(|e| warn!("PNG decode failed: {}", e))
        .ok()
        .map(|img| img.to_rgba8())
}

/// Encode an RGBA buffer as PNG
pub fn rgba_to_png(rgba: &RgbaImage) -> Option<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(rgba.clone())
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| warn!("PNG encode failed: {}", e))
        .ok()?;
    Some(out.into_inner())
}

/// Per-pixel brightness: 0.299 R + 0.587 G + 0.114 B
pub fn luma(pixel: &Rgba<u8>) -> f32 {
    0.299 * f32::from(pixel[0]) + 0.587 * f32::from(pixel[1]) + 0.114 * f32::from(pixel[2])
}

/// Sum of brightness over every pixel of a frame
pub fn total_brightness(image: &RgbaImage) -> f32 {
    image.pixels().map(luma).sum()
}

/// Session darkness score: brightness summed over pixels at or below the
/// scaled threshold
pub fn darkness_score(image: &RgbaImage, brightness_threshold: f32) -> f32 {
    let cutoff = brightness_threshold / 1.75;
    image
        .pixels()
        .map(luma)
        .filter(|&brightness| brightness <= cutoff)
        .sum()
}

/// Per-family brightness threshold, derived from the frame width
pub fn brightness_threshold(is_futronic: bool, width: u32) -> f32 {
    if is_futronic {
        width as f32 / 1.291
    } else {
        width as f32 / 2.3
    }
}

/// Binarize the best capture for human inspection
///
/// Pixels at or below the threshold are recolored (optionally tinted blue;
/// alpha forced opaque only when `force_alpha` is set), all others become
/// white. Operates on the display copy only.
pub fn recolor(image: &mut RgbaImage, brightness_threshold: f32, blue: bool, force_alpha: bool) {
    for pixel in image.pixels_mut() {
        if luma(pixel) <= brightness_threshold {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = if blue { 255 } else { 0 };
            if force_alpha {
                pixel[3] = 255;
            }
        } else {
            pixel[0] = 255;
            pixel[1] = 255;
            pixel[2] = 255;
        }
    }
}
