//! USB worker thread
//!
//! Dedicated thread owning the rusb context and the scanner driver. All
//! blocking hardware I/O happens here; the tokio side communicates through
//! the channel bridge. Hot-plug callbacks fire inside this thread's event
//! loop and are forwarded as messages - nothing outside this thread ever
//! touches the driver binding.

use crate::driver::{
    CaptureDelegate, DriverError, FingerprintScanner, FutronicScanner, HfSecurityScanner,
    UnlinkedDelegate,
};
use common::{CaptureOutcome, ConnectOutcome, ScannerCommand, ScannerEvent, ScannerWorker};
use protocol::{DeviceModel, FingerprintDeviceInfo, is_supported_device};
use crate::transport::RusbBackend;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds a capture delegate for each Futronic connection
pub type DelegateFactory = Box<dyn Fn() -> Box<dyn CaptureDelegate> + Send>;

/// A delegate factory for hosts without the vendor capture library
pub fn unlinked_delegate_factory() -> DelegateFactory {
    Box::new(|| Box::new(UnlinkedDelegate::default()))
}

/// USB worker thread state
pub struct UsbWorkerThread {
    context: Context,
    worker: ScannerWorker,
    driver: Option<Box<dyn FingerprintScanner>>,
    delegate_factory: DelegateFactory,
    _hotplug_registration: Option<Registration<Context>>,
}

impl UsbWorkerThread {
    /// Create the worker: USB context plus hot-plug registration
    pub fn new(worker: ScannerWorker, delegate_factory: DelegateFactory) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        let registration = if rusb::has_hotplug() {
            let callback = HotplugCallback {
                event_tx: worker.event_tx.clone(),
            };
            match HotplugBuilder::new()
                .enumerate(false)
                .register(&context, Box::new(callback))
            {
                Ok(registration) => {
                    debug!("Hot-plug callbacks registered");
                    Some(registration)
                }
                Err(e) => {
                    warn!("Hot-plug registration failed: {}", e);
                    None
                }
            }
        } else {
            warn!("Hot-plug not supported on this platform");
            None
        };

        Ok(Self {
            context,
            worker,
            driver: None,
            delegate_factory,
            _hotplug_registration: registration,
        })
    }

    /// Run the worker loop until a `Shutdown` command arrives
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(ScannerCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None => {}
            }

            // Pump libusb events so hot-plug callbacks fire; the timeout
            // bounds command latency
            match self.context.handle_events(Some(Duration::from_millis(20))) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        if let Some(mut driver) = self.driver.take() {
            driver.disconnect();
        }
        info!("USB worker thread stopped");
        Ok(())
    }

    fn handle_command(&mut self, cmd: ScannerCommand) {
        // A panic in a handler must not take the USB thread down
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));
        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: ScannerCommand) {
        match cmd {
            ScannerCommand::Connect { response } => {
                let outcome = self.connect();
                let _ = response.send(outcome);
            }

            ScannerCommand::Disconnect { response } => {
                let result = match self.driver.as_mut() {
                    Some(driver) => driver.disconnect(),
                    None => true,
                };
                self.driver = None;
                let _ = response.send(result);
            }

            ScannerCommand::CaptureImage { kind, response } => {
                let outcome = match self.driver.as_mut() {
                    Some(driver) => match driver.capture_image(kind) {
                        Ok(true) => CaptureOutcome::Captured,
                        Ok(false) => CaptureOutcome::NotReady,
                        Err(DriverError::DeviceFail) => CaptureOutcome::DeviceFail,
                        Err(e) => {
                            debug!("Capture poll failed: {}", e);
                            CaptureOutcome::NotReady
                        }
                    },
                    None => CaptureOutcome::DeviceFail,
                };
                let _ = response.send(outcome);
            }

            ScannerCommand::FetchImage { response } => {
                let image = self.driver.as_mut().and_then(|driver| driver.image_bytes());
                if image.is_none() {
                    debug!("Image fetch produced no data");
                }
                let _ = response.send(image);
            }

            ScannerCommand::TurnOffLed => {
                if let Some(driver) = self.driver.as_mut() {
                    driver.turn_off_led();
                }
            }

            ScannerCommand::DeviceInfo { response } => {
                let info = self
                    .driver
                    .as_ref()
                    .map(|driver| driver.device_info())
                    .unwrap_or(FingerprintDeviceInfo::UNKNOWN);
                let _ = response.send(info);
            }

            ScannerCommand::IsCleanRequired { response } => {
                let clean = self
                    .driver
                    .as_ref()
                    .is_some_and(|driver| driver.is_clean_required());
                let _ = response.send(clean);
            }

            ScannerCommand::Shutdown => {
                // Handled in the main loop
                unreachable!()
            }
        }
    }

    /// Locate, classify and connect the first supported device
    fn connect(&mut self) -> ConnectOutcome {
        let (device, model) = match self.find_supported_device() {
            Some(found) => found,
            None => return ConnectOutcome::NoDevice,
        };

        // Probe for access before committing to a driver; an Access error
        // is the platform's permission denial
        match device.open() {
            Ok(_) => {}
            Err(rusb::Error::Access) => {
                warn!("Permission denied for scanner device");
                return ConnectOutcome::PermissionDenied;
            }
            Err(e) => {
                warn!("Cannot open scanner device: {}", e);
                return ConnectOutcome::Failed;
            }
        }

        let mut driver: Box<dyn FingerprintScanner> = match model {
            DeviceModel::HfSecurity(_) => Box::new(HfSecurityScanner::<RusbBackend>::new()),
            DeviceModel::Futronic => Box::new(FutronicScanner::<RusbBackend>::new((self.delegate_factory)())),
        };

        if driver.reconnect(&device) {
            info!("Scanner connected: {:?}", model);
            self.driver = Some(driver);
            ConnectOutcome::Connected { model }
        } else {
            warn!("Driver connect failed for {:?}", model);
            ConnectOutcome::Failed
        }
    }

    fn find_supported_device(&self) -> Option<(Device<Context>, DeviceModel)> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                return None;
            }
        };

        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if let Some(model) =
                DeviceModel::classify(descriptor.vendor_id(), descriptor.product_id())
            {
                debug!(
                    "Found supported device {:04x}:{:04x} -> {:?}",
                    descriptor.vendor_id(),
                    descriptor.product_id(),
                    model
                );
                return Some((device, model));
            }
        }
        None
    }
}

/// Hot-plug callback: forwards supported-device arrivals/departures
struct HotplugCallback {
    event_tx: async_channel::Sender<ScannerEvent>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let Ok(descriptor) = device.device_descriptor() else {
            return;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if !is_supported_device(vid, pid) {
            return;
        }
        let info = FingerprintDeviceInfo {
            vendor_id: Some(vid),
            product_id: Some(pid),
            ..FingerprintDeviceInfo::UNKNOWN
        };
        if self
            .event_tx
            .try_send(ScannerEvent::DeviceAttached { info })
            .is_err()
        {
            warn!("Dropped device-attached event (channel full)");
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let Ok(descriptor) = device.device_descriptor() else {
            return;
        };
        if !is_supported_device(descriptor.vendor_id(), descriptor.product_id()) {
            return;
        }
        if self.event_tx.try_send(ScannerEvent::DeviceDetached).is_err() {
            warn!("Dropped device-detached event (channel full)");
        }
    }
}

/// Spawn the USB worker thread
pub fn spawn_usb_worker(
    worker: ScannerWorker,
    delegate_factory: DelegateFactory,
) -> std::thread::JoinHandle<Result<(), rusb::Error>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, delegate_factory)?;
            worker_thread.run()
        })
        .expect("Failed to spawn USB worker thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_scanner_bridge;

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_scanner_bridge();

        // USB context creation may fail without device access; both results
        // are acceptable here
        match UsbWorkerThread::new(worker, unlinked_delegate_factory()) {
            Ok(_) => {}
            Err(e) => {
                eprintln!("USB worker creation failed (expected without USB access): {}", e);
            }
        }
    }
}
