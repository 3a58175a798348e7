//! Events and device records exposed to the presentation layer
//!
//! The UI only ever sees these semantic events and records - raw protocol
//! errors never cross this boundary.

use serde::{Deserialize, Serialize};

/// Capture lifecycle events
///
/// Emitted by the capture orchestrator in program order relative to its
/// loop; observers are only guaranteed to see the most recent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FingerprintEvent {
    /// No supported device present
    Idle,
    /// Device connected and authenticated
    Connected,
    /// Permission denied, authentication failed or device unrecognized
    ConnectingFailed,
    /// A supported device appeared on the bus
    DeviceAttached,
    /// The device left the bus
    DeviceDetached,
    /// Connection released
    Disconnected,
    /// First shot of a sequence: ask the user to place a finger
    PlaceFinger,
    /// Subsequent shot: keep the finger on the sensor
    KeepFinger,
    /// All requested shots captured
    CapturedSuccessfully,
    /// A shot failed to produce an image
    CapturingFailed,
    /// A new frame was captured (PNG-encoded bytes)
    NewImage(Vec<u8>),
    /// The finger was lifted mid-sequence; the session was aborted
    ProcessCanceledTheFingerLifted,
    /// The sensor glass looks dirty; ask the user to clean it
    CleanTheFingerprint,
}

impl FingerprintEvent {
    /// Human-readable description for logs and simple UIs
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connected => "Fingerprint Connected",
            Self::ConnectingFailed => "Connecting Failed",
            Self::DeviceAttached => "USB Device Attached",
            Self::DeviceDetached => "USB Device Detached",
            Self::Disconnected => "Fingerprint Disconnected",
            Self::PlaceFinger => "Place Finger",
            Self::KeepFinger => "Keep Finger",
            Self::CapturedSuccessfully => "Captured Successfully",
            Self::CapturingFailed => "Capturing Failed",
            Self::NewImage(_) => "New Image",
            Self::ProcessCanceledTheFingerLifted => "Process Canceled The Finger Lifted",
            Self::CleanTheFingerprint => "Clean The Fingerprint",
        }
    }
}

/// Informational record describing the bound device
///
/// Re-derived on every (re)connect; only used for driver selection and
/// display, never as a correctness-critical key beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FingerprintDeviceInfo {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub model: Option<String>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
}

impl FingerprintDeviceInfo {
    /// Sentinel for "no device bound"
    pub const UNKNOWN: Self = Self {
        vendor_id: None,
        product_id: None,
        model: None,
        product: None,
        manufacturer: None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_descriptions() {
        assert_eq!(FingerprintEvent::PlaceFinger.describe(), "Place Finger");
        assert_eq!(
            FingerprintEvent::NewImage(vec![1, 2, 3]).describe(),
            "New Image"
        );
    }

    #[test]
    fn test_unknown_device_info_is_empty() {
        assert_eq!(FingerprintDeviceInfo::UNKNOWN, FingerprintDeviceInfo::default());
        assert!(FingerprintDeviceInfo::UNKNOWN.vendor_id.is_none());
    }
}
