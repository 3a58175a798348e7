//! Scanner driver capability contract
//!
//! Two physically different reader families hide behind one trait: the
//! HF-security readers speak the vendor wire protocol directly, the Futronic
//! readers delegate frame capture to the vendor library while sharing the
//! same USB plumbing. Device classification picks the implementation once at
//! connect time; nothing dispatches on the device family per call.

mod futronic;
mod hf_security;

pub use futronic::{CaptureDelegate, FutronicScanner, UnlinkedDelegate};
pub use hf_security::HfSecurityScanner;

use crate::transport::TransportError;
use protocol::{FingerprintDeviceInfo, ImageKind};
use rusb::{Context, Device};
use thiserror::Error;
use tracing::debug;

/// Driver-level errors
#[derive(Debug, Error)]
pub enum DriverError {
    /// The device produced no (or no intelligible) response at all -
    /// distinct from a response that reports failure
    #[error("device produced no response")]
    DeviceFail,

    /// Transport failure underneath a driver operation
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Identity of the physical device a driver is bound to
///
/// Re-derived on every (re)connect; informational except for the
/// vendor/product pair, which drives classification.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdent {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
}

impl DeviceIdent {
    /// Read the identity of a device, opening it briefly for the string
    /// descriptors
    pub fn from_device(device: &Device<Context>) -> Option<Self> {
        let descriptor = device.device_descriptor().ok()?;

        let strings = device.open().ok().map(|handle| {
            let product = descriptor
                .product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            let manufacturer = descriptor
                .manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            (product, manufacturer)
        });
        let (product, manufacturer) = strings.unwrap_or((None, None));

        Some(Self {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            product: product.map(strip_placeholder_chars),
            manufacturer: manufacturer.map(strip_placeholder_chars),
        })
    }
}

/// Some readers report their strings with '?' placeholders; drop them
fn strip_placeholder_chars(s: String) -> String {
    s.replace(['?', '\0'], "")
}

/// Common capability contract over both reader families
pub trait FingerprintScanner: Send {
    /// Live device information, or the unknown sentinel when unbound
    fn device_info(&self) -> FingerprintDeviceInfo;

    /// Open the transport and authenticate where the family requires it
    fn connect(&mut self, device: &Device<Context>) -> bool;

    /// Disconnect, re-classify the device from its IDs and connect again
    ///
    /// Fails closed when the vendor/product pair is unrecognized.
    fn reconnect(&mut self, device: &Device<Context>) -> bool;

    /// Release the connection; idempotent
    fn disconnect(&mut self) -> bool;

    /// Trigger one hardware capture attempt
    ///
    /// `Ok(false)` means the device answered but holds no frame yet;
    /// [`DriverError::DeviceFail`] means it did not answer at all.
    fn capture_image(&mut self, kind: ImageKind) -> Result<bool, DriverError>;

    /// Fetch the stored frame as PNG display bytes
    fn image_bytes(&mut self) -> Option<Vec<u8>>;

    /// Best-effort capture whose only purpose is leaving the LED off
    fn turn_off_led(&mut self);

    /// Whether the last frame suggests the sensor glass needs cleaning
    fn is_clean_required(&self) -> bool;
}

/// Log a failed driver step with enough context to diagnose a desync
pub(crate) fn log_step_failure(operation: &str, detail: impl std::fmt::Display) {
    debug!("{} failed: {}", operation, detail);
}
