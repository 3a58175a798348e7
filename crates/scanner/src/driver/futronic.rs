//! Delegate-backed driver for the Futronic reader family
//!
//! These readers are driven through the vendor capture library; the library
//! performs its own protocol over the USB connection this driver opens. The
//! library is consumed strictly through [`CaptureDelegate`] - one blocking
//! "grab the current frame into this buffer" call plus its initialization
//! preconditions - and is never reimplemented here.

use crate::driver::{DeviceIdent, DriverError, FingerprintScanner};
use crate::imaging;
use crate::transport::{RusbBackend, UsbBackend, UsbTransport};
use protocol::image::{FUTRONIC_FRAME_HEIGHT, FUTRONIC_FRAME_SIZE, FUTRONIC_FRAME_WIDTH};
use protocol::{FingerprintDeviceInfo, ImageKind, is_futronic_device};
use rusb::{Context, Device};
use tracing::{debug, warn};

/// Vendor option bit: reject fake-finger presentations
pub const OPTION_DETECT_FAKE_FINGER: i32 = 1;

/// Vendor option bit: invert the captured image
pub const OPTION_INVERT_IMAGE: i32 = 64;

/// Total brightness above which the sensor glass likely needs cleaning
const CLEAN_REQUIRED_BRIGHTNESS_THRESHOLD: f32 = 13_000.0;

/// Opaque vendor capture routine
///
/// `initialize` must succeed before the first `get_frame` of a session; it
/// covers the library's sync-directory setup, device-interface open and
/// capture-options bitmask. `get_frame` blocks until the library has a frame
/// or gives up; retry policy belongs to the caller.
pub trait CaptureDelegate: Send {
    fn initialize(&mut self) -> bool;
    fn get_frame(&mut self, frame: &mut [u8]) -> bool;
    fn close(&mut self);
}

/// Stand-in used when the vendor capture library is not wired in
#[derive(Debug, Default)]
pub struct UnlinkedDelegate {
    warned: bool,
}

impl CaptureDelegate for UnlinkedDelegate {
    fn initialize(&mut self) -> bool {
        if !self.warned {
            warn!("Futronic capture library not available; captures will fail");
            self.warned = true;
        }
        false
    }

    fn get_frame(&mut self, _frame: &mut [u8]) -> bool {
        false
    }

    fn close(&mut self) {}
}

/// Driver for the Futronic readers
pub struct FutronicScanner<B: UsbBackend = RusbBackend> {
    transport: UsbTransport<B>,
    delegate: Box<dyn CaptureDelegate>,
    delegate_ready: bool,
    frame: Option<Vec<u8>>,
    ident: Option<DeviceIdent>,
    last_frame_brightness: Option<f32>,
}

impl<B: UsbBackend> FutronicScanner<B> {
    pub fn new(delegate: Box<dyn CaptureDelegate>) -> Self {
        Self {
            transport: UsbTransport::closed(),
            delegate,
            delegate_ready: false,
            frame: None,
            ident: None,
            last_frame_brightness: None,
        }
    }
}

impl<B: UsbBackend> FingerprintScanner for FutronicScanner<B> {
    fn device_info(&self) -> FingerprintDeviceInfo {
        let Some(ident) = &self.ident else {
            return FingerprintDeviceInfo::UNKNOWN;
        };
        FingerprintDeviceInfo {
            vendor_id: Some(ident.vendor_id),
            product_id: Some(ident.product_id),
            model: Some("FS80H".to_string()),
            product: ident.product.clone(),
            manufacturer: ident.manufacturer.clone(),
        }
    }

    fn connect(&mut self, device: &Device<Context>) -> bool {
        let Some(ident) = DeviceIdent::from_device(device) else {
            return false;
        };
        match B::open_device(device) {
            Ok((backend, endpoints)) => {
                self.transport.close();
                self.transport.open_with(backend, endpoints);
                self.ident = Some(ident);
                true
            }
            Err(e) => {
                warn!("Failed to open device: {}", e);
                false
            }
        }
    }

    fn reconnect(&mut self, device: &Device<Context>) -> bool {
        self.disconnect();
        let Some(descriptor) = device.device_descriptor().ok() else {
            return false;
        };
        if !is_futronic_device(descriptor.vendor_id(), descriptor.product_id()) {
            warn!(
                "Unrecognized Futronic device {:04x}:{:04x}",
                descriptor.vendor_id(),
                descriptor.product_id()
            );
            return false;
        }
        self.connect(device)
    }

    fn disconnect(&mut self) -> bool {
        self.delegate.close();
        self.delegate_ready = false;
        self.transport.close()
    }

    fn capture_image(&mut self, _kind: ImageKind) -> Result<bool, DriverError> {
        if !self.delegate_ready {
            self.delegate_ready = self.delegate.initialize();
            if !self.delegate_ready {
                return Ok(false);
            }
            debug!("Futronic capture delegate initialized");
        }

        let mut frame = vec![0u8; FUTRONIC_FRAME_SIZE];
        if self.delegate.get_frame(&mut frame) {
            self.frame = Some(frame);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn image_bytes(&mut self) -> Option<Vec<u8>> {
        let raw = self.frame.as_ref()?;

        let bmp = imaging::sensor_bitmap(raw, FUTRONIC_FRAME_WIDTH, FUTRONIC_FRAME_HEIGHT)?;
        let decoded = image::load_from_memory_with_format(&bmp, image::ImageFormat::Bmp).ok()?;
        let rgba = decoded.grayscale().to_rgba8();

        self.last_frame_brightness = Some(imaging::total_brightness(&rgba));
        imaging::rgba_to_png(&rgba)
    }

    fn turn_off_led(&mut self) {
        // The vendor library manages the diodes itself
    }

    fn is_clean_required(&self) -> bool {
        self.last_frame_brightness
            .is_some_and(|brightness| brightness > CLEAN_REQUIRED_BRIGHTNESS_THRESHOLD)
    }
}
