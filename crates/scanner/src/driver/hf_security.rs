//! Direct-protocol driver for the HF-security reader family
//!
//! Speaks the vendor packet protocol end to end: password authentication,
//! capture/fetch commands, response verification and the per-variant bulk
//! framing (CBW/CSW bracketing on the HF4000 chips, vendor control requests
//! on the early variant). The frame is read back in eight equal slices, the
//! way the firmware streams it.

use crate::driver::{DeviceIdent, DriverError, FingerprintScanner, log_step_failure};
use crate::imaging;
use crate::transport::{
    CONTROL_MESSAGE_TYPE, DEFAULT_TIMEOUT, RusbBackend, UsbBackend, UsbTransport,
};
use protocol::mass_storage::{
    self, CBW_LEN, CSW_LEN, CSW_READ_LEN, Direction,
};
use protocol::packet::{
    self, COMMAND_PACKAGE, GENERAL_SEND_ADDRESS, MAX_PACKAGE_SIZE, RECEIVED_PACKAGE_LENGTH,
    VERIFY_PASSWORD_COMMAND,
};
use protocol::{FingerprintDeviceInfo, HfVariant, ImageKind};
use rusb::{Context, Device};
use std::time::Duration;
use tracing::{debug, warn};

/// Password candidates tried in order on connect
pub const PASSWORD_CANDIDATES: [[u8; 4]; 3] = [
    [0x78, 0x70, 0x62, 0x65],
    [0x78, 0x69, 0x61, 0x6F],
    [0x00, 0x00, 0x00, 0x00],
];

/// Control request preceding a host-to-device transfer (vendor variant)
const SEND_CONTROL_REQUEST: u8 = 0;

/// Control request preceding a device-to-host transfer (vendor variant)
const RECEIVE_CONTROL_REQUEST: u8 = 1;

/// How long to wait for a command response frame
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Frames are streamed back in this many equal slices
const IMAGE_SLICES: usize = 8;

/// Total-brightness band indicating a dirty sensor glass
const CLEAN_REQUIRED_BRIGHTNESS: std::ops::RangeInclusive<f32> = 337_000.0..=475_000.0;

/// Driver for the HF-security readers
pub struct HfSecurityScanner<B: UsbBackend = RusbBackend> {
    variant: Option<HfVariant>,
    image_kind: ImageKind,
    transport: UsbTransport<B>,
    ident: Option<DeviceIdent>,
    last_frame_brightness: Option<f32>,
}

impl<B: UsbBackend> Default for HfSecurityScanner<B> {
    fn default() -> Self {
        Self {
            variant: None,
            image_kind: ImageKind::Normal,
            transport: UsbTransport::closed(),
            ident: None,
            last_frame_brightness: None,
        }
    }
}

impl<B: UsbBackend> HfSecurityScanner<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently classified protocol sub-variant
    pub fn variant(&self) -> Option<HfVariant> {
        self.variant
    }

    /// Bind an already-open transport and authenticate
    ///
    /// Split out from [`FingerprintScanner::connect`] so protocol flows can
    /// be exercised against a scripted backend.
    pub fn connect_with(
        &mut self,
        ident: DeviceIdent,
        transport: UsbTransport<B>,
        variant: HfVariant,
    ) -> bool {
        self.ident = Some(ident);
        self.transport = transport;
        self.variant = Some(variant);
        self.authenticate()
    }

    /// Try each password candidate, short-circuiting on the first accepted
    ///
    /// A device failure during one candidate counts as that candidate
    /// failing; the remaining candidates are still tried.
    fn authenticate(&mut self) -> bool {
        for password in &PASSWORD_CANDIDATES {
            match self.verify_password(password) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!("Password attempt failed: {}", e),
            }
        }
        false
    }

    /// Run one password exchange against the device
    pub fn verify_password(&mut self, password: &[u8; 4]) -> Result<bool, DriverError> {
        let mut content = [0u8; 5];
        content[0] = VERIFY_PASSWORD_COMMAND;
        content[1..].copy_from_slice(password);

        let Ok(package) = packet::fill_package(COMMAND_PACKAGE, &content) else {
            return Ok(false);
        };
        if !self.send_package(&package) {
            return Ok(false);
        }
        let response = self.receive_package(RESPONSE_TIMEOUT)?;
        Ok(packet::verify_response(&response))
    }

    /// Encode and transmit one package over the variant's framing
    fn send_package(&mut self, package: &[u8]) -> bool {
        let length = packet::package_length(package);
        if length > MAX_PACKAGE_SIZE || length > package.len() {
            log_step_failure("send_package", format!("bad package length {}", length));
            return false;
        }

        let frame = match packet::encode_frame(GENERAL_SEND_ADDRESS, &package[..length]) {
            Ok(frame) => frame,
            Err(e) => {
                log_step_failure("send_package", e);
                return false;
            }
        };
        self.send_usb_data(&frame)
    }

    /// Await, decode and return one response package
    ///
    /// No decodable response within the timeout raises the device-fail
    /// signal - the caller cannot tell success from failure without it.
    fn receive_package(&mut self, timeout: Duration) -> Result<Vec<u8>, DriverError> {
        let mut buffer = [0u8; 1024];
        if !self.receive_usb_data(&mut buffer[..RECEIVED_PACKAGE_LENGTH], timeout) {
            return Err(DriverError::DeviceFail);
        }
        match packet::decode_frame(&buffer) {
            Ok(package) => Ok(package),
            Err(e) => {
                log_step_failure("receive_package", e);
                Err(DriverError::DeviceFail)
            }
        }
    }

    fn send_usb_data(&mut self, data: &[u8]) -> bool {
        match self.variant {
            Some(HfVariant::Hf4000V1 | HfVariant::Hf4000V2) => self.hf4000_send(data),
            Some(HfVariant::Vendor) => self.vendor_send(data),
            None => false,
        }
    }

    fn receive_usb_data(&mut self, buf: &mut [u8], timeout: Duration) -> bool {
        match self.variant {
            Some(HfVariant::Hf4000V1 | HfVariant::Hf4000V2) => self.hf4000_receive(buf, timeout),
            Some(HfVariant::Vendor) => self.vendor_receive(buf),
            None => false,
        }
    }

    /// CBW write, data write, CSW read-and-verify
    fn hf4000_send(&mut self, data: &[u8]) -> bool {
        let block = mass_storage::command_block(data.len() as u32, Direction::Out);
        if self.transport.write(&block, DEFAULT_TIMEOUT).is_err() {
            log_step_failure("hf4000_send", format!("command block ({} bytes)", CBW_LEN));
            return false;
        }
        if self.transport.write(data, DEFAULT_TIMEOUT).is_err() {
            log_step_failure("hf4000_send", format!("data stage ({} bytes)", data.len()));
            return false;
        }

        let mut status = [0u8; CSW_LEN];
        if self
            .transport
            .read(&mut status[..CSW_READ_LEN], DEFAULT_TIMEOUT)
            .is_err()
        {
            return false;
        }
        if !mass_storage::verify_status(&status) {
            log_step_failure("hf4000_send", "status wrapper rejected");
            return false;
        }

        if self.variant == Some(HfVariant::Hf4000V1) {
            // The V1 chip echoes the command block; its signature byte comes
            // back as 'S' where the block holds 'C'
            let mut patched = status;
            patched[3] = 0x43;
            if !mass_storage::echo_matches(&patched, &block, 0..12) {
                log_step_failure("hf4000_send", "command block echo mismatch");
                return false;
            }
        }
        true
    }

    /// CBW write, data read, CSW read-and-verify
    fn hf4000_receive(&mut self, buf: &mut [u8], timeout: Duration) -> bool {
        let block = mass_storage::command_block(buf.len() as u32, Direction::In);
        if self.transport.write(&block, timeout).is_err() {
            return false;
        }
        if self.transport.read(buf, timeout).is_err() {
            log_step_failure("hf4000_receive", format!("data stage ({} bytes)", buf.len()));
            return false;
        }

        let mut status = [0u8; CSW_LEN];
        if self
            .transport
            .read(&mut status[..CSW_READ_LEN], timeout)
            .is_err()
        {
            return false;
        }
        if !mass_storage::verify_status(&status) {
            log_step_failure("hf4000_receive", "status wrapper rejected");
            return false;
        }

        if self.variant == Some(HfVariant::Hf4000V1)
            && !mass_storage::echo_matches(&status, &block, 4..8)
        {
            log_step_failure("hf4000_receive", "tag echo mismatch");
            return false;
        }
        true
    }

    /// Vendor control request announcing the transfer, then the bulk write
    fn vendor_send(&mut self, data: &[u8]) -> bool {
        let mut scratch = [0u8; 10];
        let _ = self.transport.control_message(
            SEND_CONTROL_REQUEST,
            data.len() as u16,
            0,
            &mut scratch,
            CONTROL_MESSAGE_TYPE,
            DEFAULT_TIMEOUT,
        );
        self.transport.write(data, DEFAULT_TIMEOUT).is_ok()
    }

    /// Vendor control request announcing the transfer, then one bulk read
    fn vendor_receive(&mut self, buf: &mut [u8]) -> bool {
        let mut scratch = [0u8; 10];
        let _ = self.transport.control_message(
            RECEIVE_CONTROL_REQUEST,
            buf.len() as u16,
            0,
            &mut scratch,
            CONTROL_MESSAGE_TYPE,
            DEFAULT_TIMEOUT,
        );
        self.transport.bulk_read_single(buf, DEFAULT_TIMEOUT).is_ok()
    }

    /// Stream the stored frame back in eight equal slices
    ///
    /// The slice length truncates; the firmware never sends the remainder,
    /// so the final bytes of `buf` stay zeroed.
    fn receive_usb_image(&mut self, buf: &mut [u8]) -> bool {
        let slice_len = buf.len() / IMAGE_SLICES;
        let total = buf.len();

        match self.variant {
            Some(HfVariant::Vendor) => {
                let mut scratch = [0u8; 10];
                let _ = self.transport.control_message(
                    RECEIVE_CONTROL_REQUEST,
                    total as u16,
                    0,
                    &mut scratch,
                    CONTROL_MESSAGE_TYPE,
                    DEFAULT_TIMEOUT,
                );
                for slice in 0..IMAGE_SLICES {
                    let chunk = &mut buf[slice * slice_len..(slice + 1) * slice_len];
                    if self.transport.bulk_read_single(chunk, DEFAULT_TIMEOUT).is_err() {
                        log_step_failure("receive_usb_image", format!("slice {}", slice));
                        return false;
                    }
                }
                true
            }
            Some(HfVariant::Hf4000V1 | HfVariant::Hf4000V2) => {
                for slice in 0..IMAGE_SLICES {
                    let range = slice * slice_len..(slice + 1) * slice_len;
                    // Split borrow: receive each slice through the bracketed path
                    let mut chunk = vec![0u8; slice_len];
                    if !self.hf4000_receive(&mut chunk, DEFAULT_TIMEOUT) {
                        log_step_failure("receive_usb_image", format!("slice {}", slice));
                        return false;
                    }
                    buf[range].copy_from_slice(&chunk);
                }
                true
            }
            None => false,
        }
    }

    /// Issue the fetch command and stream the raw frame
    fn fetch_frame(&mut self) -> Option<Vec<u8>> {
        let kind = self.image_kind;
        let Ok(package) = packet::fill_package(COMMAND_PACKAGE, &[kind.fetch_command()]) else {
            return None;
        };
        if !self.send_package(&package) {
            return None;
        }

        let mut frame = vec![0u8; kind.byte_len()];
        if !self.receive_usb_image(&mut frame) {
            return None;
        }
        Some(frame)
    }
}

impl<B: UsbBackend> FingerprintScanner for HfSecurityScanner<B> {
    fn device_info(&self) -> FingerprintDeviceInfo {
        let Some(ident) = &self.ident else {
            return FingerprintDeviceInfo::UNKNOWN;
        };
        let model = match self.variant {
            Some(HfVariant::Hf4000V1) => "HF4000 V1",
            Some(HfVariant::Hf4000V2) => "HF4000 V2",
            Some(HfVariant::Vendor) => "HF vendor",
            None => "Unknown",
        };
        FingerprintDeviceInfo {
            vendor_id: Some(ident.vendor_id),
            product_id: Some(ident.product_id),
            model: Some(model.to_string()),
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
                self.authenticate()
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
        match HfVariant::classify(descriptor.vendor_id(), descriptor.product_id()) {
            Some(variant) => {
                self.variant = Some(variant);
                self.connect(device)
            }
            None => {
                warn!(
                    "Unrecognized HF-security device {:04x}:{:04x}",
                    descriptor.vendor_id(),
                    descriptor.product_id()
                );
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        self.transport.close()
    }

    fn capture_image(&mut self, kind: ImageKind) -> Result<bool, DriverError> {
        // The V1 chip only stores the standard frame
        self.image_kind = if self.variant == Some(HfVariant::Hf4000V1) {
            ImageKind::Normal
        } else {
            kind
        };

        let Ok(package) =
            packet::fill_package(COMMAND_PACKAGE, &[self.image_kind.capture_command()])
        else {
            return Ok(false);
        };
        if !self.send_package(&package) {
            return Ok(false);
        }

        let response = self.receive_package(DEFAULT_TIMEOUT)?;
        Ok(packet::verify_response(&response))
    }

    fn image_bytes(&mut self) -> Option<Vec<u8>> {
        let kind = self.image_kind;
        let raw = self.fetch_frame()?;

        let bmp = imaging::sensor_bitmap(&raw, kind.width(), kind.height())?;
        let decoded = image::load_from_memory_with_format(&bmp, image::ImageFormat::Bmp).ok()?;
        let rgba = decoded.grayscale().to_rgba8();

        self.last_frame_brightness = Some(imaging::total_brightness(&rgba));
        imaging::rgba_to_png(&rgba)
    }

    fn turn_off_led(&mut self) {
        let kind = self.image_kind;
        if let Err(e) = self.capture_image(kind) {
            debug!("LED-off capture failed (ignored): {}", e);
        }
    }

    fn is_clean_required(&self) -> bool {
        self.last_frame_brightness
            .is_some_and(|brightness| CLEAN_REQUIRED_BRIGHTNESS.contains(&brightness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockBackend, endpoints};

    fn scanner_with(
        variant: HfVariant,
        backend: MockBackend,
    ) -> HfSecurityScanner<MockBackend> {
        let mut scanner = HfSecurityScanner::new();
        let mut transport = UsbTransport::closed();
        transport.open_with(backend, endpoints(64));
        scanner.transport = transport;
        scanner.variant = Some(variant);
        scanner
    }

    /// A status wrapper the verification accepts
    fn ok_csw() -> [u8; CSW_READ_LEN] {
        let mut status = [0u8; CSW_READ_LEN];
        status[3] = 0x53;
        status
    }

    /// Read script for a full command exchange on an HF4000 V2 chip: the
    /// status wrapper closing the command write, then a successful response
    /// frame, then the status wrapper closing the response read
    fn ok_exchange_script() -> Vec<u8> {
        let mut script = Vec::new();
        script.extend_from_slice(&ok_csw());

        let package = packet::fill_package(COMMAND_PACKAGE, &[0x00]).unwrap();
        let mut response = packet::encode_frame(GENERAL_SEND_ADDRESS, &package).unwrap();
        // Decoded package[0] must be the response tag and package[3] zero
        response[6] = packet::RESPONSE_PACKAGE;
        response.resize(RECEIVED_PACKAGE_LENGTH, 0);
        script.extend_from_slice(&response);

        script.extend_from_slice(&ok_csw());
        script
    }

    #[test]
    fn test_verify_password_accepts_ok_response() {
        let backend = MockBackend::with_read_bytes(ok_exchange_script());
        let mut scanner = scanner_with(HfVariant::Hf4000V2, backend);

        let accepted = scanner.verify_password(&PASSWORD_CANDIDATES[0]).unwrap();
        assert!(accepted);
    }

    #[test]
    fn test_verify_password_wire_frames() {
        let backend = MockBackend::with_read_bytes(ok_exchange_script());
        let mut scanner = scanner_with(HfVariant::Hf4000V2, backend);
        scanner.verify_password(&[0x78, 0x70, 0x62, 0x65]).unwrap();

        let (backend, _) = scanner.transport.inner_for_tests();
        // Outgoing CBW, command frame, then the incoming-side CBW
        assert_eq!(backend.written.len(), 3);
        assert_eq!(&backend.written[0][..4], b"USBC");
        let frame = &backend.written[1];
        assert_eq!(&frame[..2], &[0xEF, 0x01]);
        assert_eq!(frame[6], COMMAND_PACKAGE);
        assert_eq!(frame[9], VERIFY_PASSWORD_COMMAND);
        assert_eq!(&frame[10..14], &[0x78, 0x70, 0x62, 0x65]);
        assert_eq!(&backend.written[2][..4], b"USBC");
        assert_eq!(backend.written[2][12], 0x80); // data-in flag
    }

    #[test]
    fn test_no_response_raises_device_fail() {
        // The command write is acknowledged, then the device goes silent:
        // the response read sees only zeros and its status check fails
        let backend = MockBackend::with_read_bytes(ok_csw());
        let mut scanner = scanner_with(HfVariant::Hf4000V2, backend);

        let result = scanner.verify_password(&PASSWORD_CANDIDATES[0]);
        assert!(matches!(result, Err(DriverError::DeviceFail)));
    }

    #[test]
    fn test_unacknowledged_command_is_not_device_fail() {
        // All-zero reads: the command write itself is rejected, which is an
        // ordinary per-candidate failure, not the device-fail signal
        let backend = MockBackend::default();
        let mut scanner = scanner_with(HfVariant::Hf4000V2, backend);

        let result = scanner.verify_password(&PASSWORD_CANDIDATES[0]);
        assert!(matches!(result, Ok(false)));
    }

    #[test]
    fn test_v1_command_block_echo_enforced() {
        // The password frame is 16 bytes, so the V1 chip brackets it with a
        // command block for 16 bytes and echoes that block back
        let out_block = mass_storage::command_block(16, Direction::Out);
        let mut send_csw = [0u8; CSW_READ_LEN];
        send_csw[..12].copy_from_slice(&out_block[..12]);
        send_csw[3] = 0x53;

        let mut script = Vec::new();
        script.extend_from_slice(&send_csw);
        let package = packet::fill_package(COMMAND_PACKAGE, &[0x00]).unwrap();
        let mut response = packet::encode_frame(GENERAL_SEND_ADDRESS, &package).unwrap();
        response[6] = packet::RESPONSE_PACKAGE;
        response.resize(RECEIVED_PACKAGE_LENGTH, 0);
        script.extend_from_slice(&response);
        let mut recv_csw = [0u8; CSW_READ_LEN];
        recv_csw[3] = 0x53;
        recv_csw[4..8].copy_from_slice(&[0xB0, 0xFA, 0x69, 0x86]);
        script.extend_from_slice(&recv_csw);

        let mut scanner = scanner_with(
            HfVariant::Hf4000V1,
            MockBackend::with_read_bytes(script.clone()),
        );
        assert!(scanner.verify_password(&PASSWORD_CANDIDATES[0]).unwrap());

        // A corrupted echo byte fails the send as an ordinary rejection
        script[5] ^= 0xFF;
        let mut scanner =
            scanner_with(HfVariant::Hf4000V1, MockBackend::with_read_bytes(script));
        assert!(matches!(
            scanner.verify_password(&PASSWORD_CANDIDATES[0]),
            Ok(false) | Err(DriverError::DeviceFail)
        ));
    }

    #[test]
    fn test_capture_forces_normal_kind_on_v1() {
        let backend = MockBackend::default();
        let mut scanner = scanner_with(HfVariant::Hf4000V1, backend);
        let _ = scanner.capture_image(ImageKind::Extra);
        assert_eq!(scanner.image_kind, ImageKind::Normal);

        let backend = MockBackend::default();
        let mut scanner = scanner_with(HfVariant::Hf4000V2, backend);
        let _ = scanner.capture_image(ImageKind::Extra);
        assert_eq!(scanner.image_kind, ImageKind::Extra);
    }

    #[test]
    fn test_unclassified_device_sends_nothing() {
        let mut scanner: HfSecurityScanner<MockBackend> = HfSecurityScanner::new();
        let mut transport = UsbTransport::closed();
        transport.open_with(MockBackend::default(), endpoints(64));
        scanner.transport = transport;

        // No variant classified: every path fails closed
        assert!(!scanner.send_usb_data(&[0u8; 4]));
        let mut buf = [0u8; 4];
        assert!(!scanner.receive_usb_data(&mut buf, DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_clean_required_band() {
        let mut scanner: HfSecurityScanner<MockBackend> = HfSecurityScanner::new();
        assert!(!scanner.is_clean_required());

        scanner.last_frame_brightness = Some(400_000.0);
        assert!(scanner.is_clean_required());

        scanner.last_frame_brightness = Some(100_000.0);
        assert!(!scanner.is_clean_required());

        scanner.last_frame_brightness = Some(500_000.0);
        assert!(!scanner.is_clean_required());
    }
}
