//! Raw USB transport with transparent chunking
//!
//! Wraps an open USB connection and moves byte buffers over its bulk
//! endpoints, splitting any call larger than the endpoint's max packet size
//! into full-size chunks plus a remainder. The actual I/O sits behind
//! [`UsbBackend`] so the chunking contract can be exercised without
//! hardware; [`RusbBackend`] is the libusb-backed implementation.
//!
//! The transport holds the only live handle to the USB connection. It is not
//! safe to open/close it from two threads - the worker thread is its single
//! owner.

use rusb::{Context, Device, DeviceHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for USB transfers (matches the reader firmware)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Vendor control request type (IN | vendor | device)
pub const CONTROL_MESSAGE_TYPE: u8 = 0xC0;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection is open
    #[error("transport not open")]
    NotOpen,

    /// The claimed interface exposes no bulk endpoint in this direction
    #[error("missing bulk {direction} endpoint")]
    MissingEndpoint { direction: &'static str },

    /// Error reported by libusb
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Bulk endpoint addresses and packet sizes discovered at open time
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub ep_in: u8,
    pub ep_out: u8,
    pub max_in: usize,
    pub max_out: usize,
}

/// Raw USB I/O operations behind the transport
pub trait UsbBackend: Send {
    /// Open `device` and discover its bulk endpoint pair
    fn open_device(device: &Device<Context>) -> Result<(Self, Endpoints)>
    where
        Self: Sized;

    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Release the claimed interface; failures are swallowed
    fn release(&mut self);
}

/// Chunking transport over an open connection
pub struct UsbTransport<B: UsbBackend> {
    inner: Option<(B, Endpoints)>,
}

impl<B: UsbBackend> Default for UsbTransport<B> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<B: UsbBackend> UsbTransport<B> {
    /// A transport with no open connection
    pub fn closed() -> Self {
        Self::default()
    }

    /// Take ownership of an opened backend and its discovered endpoints
    pub fn open_with(&mut self, backend: B, endpoints: Endpoints) {
        self.inner = Some((backend, endpoints));
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Max packet size of the IN endpoint (0 when closed)
    pub fn max_in_packet(&self) -> usize {
        self.inner.as_ref().map_or(0, |(_, e)| e.max_in)
    }

    /// Write `data` over the bulk OUT endpoint, one transfer per chunk
    ///
    /// All chunks must succeed for the write to succeed.
    pub fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let (backend, endpoints) = self.inner.as_mut().ok_or(TransportError::NotOpen)?;

        for chunk in data.chunks(endpoints.max_out) {
            backend.bulk_write(endpoints.ep_out, chunk, timeout)?;
        }
        Ok(())
    }

    /// Fill `buf` from the bulk IN endpoint, one transfer per chunk
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let (backend, endpoints) = self.inner.as_mut().ok_or(TransportError::NotOpen)?;

        for chunk in buf.chunks_mut(endpoints.max_in) {
            backend.bulk_read(endpoints.ep_in, chunk, timeout)?;
        }
        Ok(())
    }

    /// One unchunked bulk IN transfer (vendor-variant image path)
    pub fn bulk_read_single(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let (backend, endpoints) = self.inner.as_mut().ok_or(TransportError::NotOpen)?;
        backend.bulk_read(endpoints.ep_in, buf, timeout)
    }

    /// Issue a control transfer on endpoint 0
    pub fn control_message(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        request_type: u8,
        timeout: Duration,
    ) -> Result<usize> {
        let (backend, _) = self.inner.as_mut().ok_or(TransportError::NotOpen)?;
        backend.control(request_type, request, value, index, buf, timeout)
    }

    /// Inspect the backend from driver tests
    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> (&B, &Endpoints) {
        let (backend, endpoints) = self.inner.as_ref().expect("transport not open");
        (backend, endpoints)
    }

    /// Release the interface (best-effort) and drop the connection
    ///
    /// Always reports success once the close has been attempted.
    pub fn close(&mut self) -> bool {
        if let Some((mut backend, _)) = self.inner.take() {
            backend.release();
            debug!("Transport closed");
        }
        true
    }
}

/// libusb-backed transport backend
pub struct RusbBackend {
    handle: DeviceHandle<Context>,
    interface: u8,
}

impl RusbBackend {
    /// Open `device`: claim its first interface and discover the bulk
    /// endpoint pair
    ///
    /// Detaches an active kernel driver before claiming (the platform's
    /// force-claim). Fails if either bulk endpoint is missing.
    pub fn open(device: &Device<Context>) -> Result<(Self, Endpoints)> {
        let handle = device.open()?;
        let interface = 0u8;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!("Failed to detach kernel driver: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("Could not check kernel driver status: {}", e),
        }

        handle.claim_interface(interface)?;

        let config = device.active_config_descriptor()?;
        let mut ep_in = None;
        let mut ep_out = None;

        for iface in config.interfaces() {
            if iface.number() != interface {
                continue;
            }
            for descriptor in iface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != rusb::TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        rusb::Direction::In => {
                            ep_in = Some((endpoint.address(), endpoint.max_packet_size() as usize));
                        }
                        rusb::Direction::Out => {
                            ep_out = Some((endpoint.address(), endpoint.max_packet_size() as usize));
                        }
                    }
                }
            }
        }

        let (in_addr, max_in) = ep_in.ok_or(TransportError::MissingEndpoint { direction: "IN" })?;
        let (out_addr, max_out) =
            ep_out.ok_or(TransportError::MissingEndpoint { direction: "OUT" })?;

        debug!(
            "Opened device: bulk IN {:#04x} ({} bytes), bulk OUT {:#04x} ({} bytes)",
            in_addr, max_in, out_addr, max_out
        );

        Ok((
            Self { handle, interface },
            Endpoints {
                ep_in: in_addr,
                ep_out: out_addr,
                max_in,
                max_out,
            },
        ))
    }
}

impl UsbBackend for RusbBackend {
    fn open_device(device: &Device<Context>) -> Result<(Self, Endpoints)> {
        Self::open(device)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(TransportError::from)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(TransportError::from)
    }

    fn control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        // Direction from bit 7 of the request type
        let is_in = (request_type & 0x80) != 0;
        let result = if is_in {
            self.handle
                .read_control(request_type, request, value, index, buf, timeout)
        } else {
            self.handle
                .write_control(request_type, request, value, index, buf, timeout)
        };
        result.map_err(TransportError::from)
    }

    fn release(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release interface (ignored): {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockBackend, endpoints};
    use super::*;

    #[test]
    fn test_write_chunks_two_full_plus_remainder() {
        let mut transport = UsbTransport::closed();
        transport.open_with(MockBackend::default(), endpoints(64));

        // 2.5 x max packet size
        let data: Vec<u8> = (0..160u32).map(|i| i as u8).collect();
        transport.write(&data, DEFAULT_TIMEOUT).unwrap();

        let (backend, _) = transport.inner.as_ref().unwrap();
        let sizes: Vec<usize> = backend.written.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![64, 64, 32]);

        // Chunks reassemble to the original buffer
        let rejoined: Vec<u8> = backend.written.concat();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn test_read_chunks_and_reassembles() {
        let mut transport = UsbTransport::closed();
        transport.open_with(
            MockBackend::with_read_bytes((0..160u32).map(|i| i as u8)),
            endpoints(64),
        );

        let mut buf = vec![0u8; 160];
        transport.read(&mut buf, DEFAULT_TIMEOUT).unwrap();

        let expected: Vec<u8> = (0..160u32).map(|i| i as u8).collect();
        assert_eq!(buf, expected);

        let (backend, _) = transport.inner.as_ref().unwrap();
        assert_eq!(backend.read_chunks, vec![64, 64, 32]);
    }

    #[test]
    fn test_exact_multiple_has_no_remainder_chunk() {
        let mut transport = UsbTransport::closed();
        transport.open_with(MockBackend::default(), endpoints(64));

        transport.write(&[0u8; 128], DEFAULT_TIMEOUT).unwrap();
        let (backend, _) = transport.inner.as_ref().unwrap();
        assert_eq!(backend.written.len(), 2);
    }

    #[test]
    fn test_closed_transport_fails() {
        let mut transport: UsbTransport<MockBackend> = UsbTransport::closed();
        assert!(matches!(
            transport.write(&[0u8; 8], DEFAULT_TIMEOUT),
            Err(TransportError::NotOpen)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.read(&mut buf, DEFAULT_TIMEOUT),
            Err(TransportError::NotOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_reports_success() {
        let mut transport = UsbTransport::closed();
        transport.open_with(MockBackend::default(), endpoints(64));
        assert!(transport.close());
        assert!(transport.close());
        assert!(!transport.is_open());
    }
}
