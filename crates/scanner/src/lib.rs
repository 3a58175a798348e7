//! Fingerprint scanner host stack
//!
//! Drives USB fingerprint readers from a host application: device discovery
//! and classification, the two driver families, raw transport with chunked
//! bulk transfers, sensor-frame postprocessing and the multi-shot capture
//! orchestrator the presentation layer talks to.

pub mod config;
pub mod driver;
pub mod imaging;
pub mod manager;
pub mod transport;
pub mod worker;

pub use config::ScannerConfig;
pub use manager::{CaptureSettings, FingerprintManager, MAX_SCAN_COUNT, ScannerState};
pub use worker::{spawn_usb_worker, unlinked_delegate_factory};
