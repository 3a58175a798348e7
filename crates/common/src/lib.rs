//! Common utilities for fingerscan
//!
//! This crate provides the plumbing shared between the capture orchestrator
//! and the USB worker thread: the async channel bridge, the cooperative
//! cancellation token, error handling and logging setup.

pub mod cancel;
pub mod channel;
pub mod error;
pub mod logging;

pub use cancel::CancelToken;
pub use channel::{
    CaptureOutcome, ConnectOutcome, ScannerBridge, ScannerCommand, ScannerEvent, ScannerWorker,
    create_scanner_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
