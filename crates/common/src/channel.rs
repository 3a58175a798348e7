//! Async channel bridge between the tokio runtime and the USB worker thread
//!
//! All blocking hardware I/O lives on one dedicated thread that exclusively
//! owns the USB context and the scanner driver. The capture orchestrator
//! (tokio side) sends [`ScannerCommand`]s and awaits oneshot responses; the
//! worker pushes hot-plug notifications back as [`ScannerEvent`]s. Hot-plug
//! callbacks therefore never touch driver state directly - they are
//! serialized through the worker's single command/event loop.

use async_channel::{Receiver, Sender, bounded};
use protocol::{DeviceModel, FingerprintDeviceInfo, ImageKind};

/// Outcome of a connect attempt on the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Device opened and authenticated
    Connected {
        /// Driver family the device classified into
        model: DeviceModel,
    },
    /// No supported device on the bus
    NoDevice,
    /// The OS refused access to the device node
    PermissionDenied,
    /// Open, classification or authentication failed
    Failed,
}

/// Outcome of a single capture poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A frame is stored in the device buffer
    Captured,
    /// The device answered but has no finger/frame yet
    NotReady,
    /// The device produced no response at all
    DeviceFail,
}

/// Commands from the capture orchestrator to the USB thread
#[derive(Debug)]
pub enum ScannerCommand {
    /// Locate a supported device, classify it and connect the driver
    Connect {
        /// Channel to send the outcome back
        response: tokio::sync::oneshot::Sender<ConnectOutcome>,
    },

    /// Release the driver connection (idempotent)
    Disconnect {
        /// Channel to send the outcome back
        response: tokio::sync::oneshot::Sender<bool>,
    },

    /// Trigger one hardware capture attempt
    CaptureImage {
        /// Requested frame format
        kind: ImageKind,
        /// Channel to send the outcome back
        response: tokio::sync::oneshot::Sender<CaptureOutcome>,
    },

    /// Fetch the stored frame as PNG-encoded display bytes
    FetchImage {
        /// Channel to send the image back; `None` when the fetch failed
        response: tokio::sync::oneshot::Sender<Option<Vec<u8>>>,
    },

    /// Best-effort capture whose only purpose is leaving the LED off
    TurnOffLed,

    /// Query live device information
    DeviceInfo {
        /// Channel to send the record back
        response: tokio::sync::oneshot::Sender<FingerprintDeviceInfo>,
    },

    /// Ask whether the sensor glass looks dirty
    IsCleanRequired {
        /// Channel to send the answer back
        response: tokio::sync::oneshot::Sender<bool>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Hot-plug events from the USB thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEvent {
    /// A supported device appeared on the bus
    DeviceAttached { info: FingerprintDeviceInfo },
    /// The bound device left the bus
    DeviceDetached,
}

/// Handle for the tokio runtime (async)
#[derive(Clone)]
pub struct ScannerBridge {
    cmd_tx: Sender<ScannerCommand>,
    event_rx: Receiver<ScannerEvent>,
}

impl ScannerBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: ScannerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<ScannerEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the USB thread (blocking)
pub struct ScannerWorker {
    pub(crate) cmd_rx: Receiver<ScannerCommand>,
    /// Event sender (public for the USB worker thread to access)
    pub event_tx: Sender<ScannerEvent>,
}

impl ScannerWorker {
    /// Receive a command from the tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<ScannerCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<ScannerCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event to the tokio runtime (blocking)
    pub fn send_event(&self, event: ScannerEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the command/event channel pair connecting both sides
pub fn create_scanner_bridge() -> (ScannerBridge, ScannerWorker) {
    let (cmd_tx, cmd_rx) = bounded(32);
    let (event_tx, event_rx) = bounded(32);

    (
        ScannerBridge { cmd_tx, event_rx },
        ScannerWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_roundtrip() {
        let (bridge, worker) = create_scanner_bridge();

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(ScannerCommand::Connect { response: tx })
            .await
            .unwrap();

        let model = DeviceModel::Futronic;
        match worker.try_recv_command() {
            Some(ScannerCommand::Connect { response }) => {
                response.send(ConnectOutcome::Connected { model }).unwrap();
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert_eq!(rx.await.unwrap(), ConnectOutcome::Connected { model });
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let (bridge, worker) = create_scanner_bridge();

        worker.send_event(ScannerEvent::DeviceDetached).unwrap();
        assert_eq!(
            bridge.recv_event().await.unwrap(),
            ScannerEvent::DeviceDetached
        );
    }

    #[test]
    fn test_try_recv_empty() {
        let (_bridge, worker) = create_scanner_bridge();
        assert!(worker.try_recv_command().is_none());
    }
}
