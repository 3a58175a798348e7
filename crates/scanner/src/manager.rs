//! Capture orchestrator
//!
//! Runs the multi-shot scan state machine: connect/permission flow, the
//! per-shot capture loop with cooperative cancellation and per-shot timeout,
//! frame scoring, best-frame tracking and event emission. Exactly one
//! session is active at a time; calling [`FingerprintManager::scan`] again
//! cancels and supersedes any running session.
//!
//! Events go out on a watch channel: observers are guaranteed to see the
//! most recent event, not the full history, and events are emitted in
//! program order relative to the capture loop.

use crate::imaging;
use common::{
    CancelToken, CaptureOutcome, ConnectOutcome, ScannerBridge, ScannerCommand, ScannerEvent,
};
use protocol::{DeviceModel, FingerprintDeviceInfo, FingerprintEvent, ImageKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on shots per session
pub const MAX_SCAN_COUNT: usize = 5;

/// Timing knobs for the capture loop
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Delay between capture polls (and after a successful fetch)
    pub poll_delay: Duration,
    /// Polls before a shot is abandoned as failed
    pub shot_timeout_polls: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(50),
            shot_timeout_polls: 200,
        }
    }
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    /// No device bound
    Idle,
    /// Waiting for the OS to grant device access
    AwaitingPermission,
    /// Driver connected, no session running
    Connected,
    /// A capture session is running
    Scanning,
    /// The last session was aborted; still connected
    Cancelled,
    /// Connection released
    Disconnected,
}

/// Session state owned by the orchestrator
struct Session {
    state: ScannerState,
    connected: bool,
    is_futronic: bool,
    /// PNG display bytes per captured frame, in shot order
    captures: Vec<Vec<u8>>,
    best_capture: Option<Vec<u8>>,
    best_index: Option<usize>,
    best_value: f32,
    progress: f32,
    brightness_threshold: f32,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ScannerState::Idle,
            connected: false,
            is_futronic: false,
            captures: Vec::new(),
            best_capture: None,
            best_index: None,
            best_value: f32::MIN,
            progress: 0.0,
            brightness_threshold: imaging::DEFAULT_BRIGHTNESS_THRESHOLD,
        }
    }

    fn reset_for_scan(&mut self) {
        self.captures.clear();
        self.best_capture = None;
        self.best_index = None;
        self.best_value = f32::MIN;
        self.progress = 0.0;
        self.brightness_threshold = imaging::DEFAULT_BRIGHTNESS_THRESHOLD;
    }
}

struct ScanHandle {
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

struct ManagerInner {
    bridge: ScannerBridge,
    events_tx: watch::Sender<FingerprintEvent>,
    settings: CaptureSettings,
    session: Mutex<Session>,
    scan: Mutex<ScanHandle>,
}

/// Public handle driving the scanner
pub struct FingerprintManager {
    inner: Arc<ManagerInner>,
    event_pump: JoinHandle<()>,
}

impl FingerprintManager {
    /// Create a manager over a worker bridge and start the hot-plug pump
    pub fn new(bridge: ScannerBridge, settings: CaptureSettings) -> Self {
        let (events_tx, _events_rx) = watch::channel(FingerprintEvent::Idle);
        let inner = Arc::new(ManagerInner {
            bridge,
            events_tx,
            settings,
            session: Mutex::new(Session::new()),
            scan: Mutex::new(ScanHandle {
                cancel: CancelToken::new(),
                task: None,
            }),
        });

        let pump_inner = inner.clone();
        let event_pump = tokio::spawn(async move {
            run_event_pump(pump_inner).await;
        });

        Self { inner, event_pump }
    }

    /// Subscribe to the event stream (latest-event semantics)
    pub fn subscribe(&self) -> watch::Receiver<FingerprintEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Request device access and connect the driver
    pub async fn connect(&self) {
        connect_flow(&self.inner).await;
    }

    /// Cancel any session, release the driver and report `Disconnected`
    pub async fn disconnect(&self) {
        disconnect_flow(&self.inner).await;
    }

    /// Start a capture session of up to [`MAX_SCAN_COUNT`] shots
    ///
    /// Returns `false` without touching state when not connected. A running
    /// session is unconditionally cancelled and superseded.
    pub async fn scan(&self, count: usize) -> bool {
        if !self.inner.session.lock().unwrap().connected {
            self.inner
                .events_tx
                .send_replace(FingerprintEvent::ConnectingFailed);
            return false;
        }

        let cancel = CancelToken::new();
        {
            let mut scan = self.inner.scan.lock().unwrap();
            scan.cancel.cancel();
            if let Some(task) = scan.task.take() {
                task.abort();
            }
            scan.cancel = cancel.clone();
        }

        let count = count.min(MAX_SCAN_COUNT);
        {
            let mut session = self.inner.session.lock().unwrap();
            session.reset_for_scan();
            session.state = ScannerState::Scanning;
        }
        debug!("Starting capture session: {} shots", count);

        let task_inner = self.inner.clone();
        let task = tokio::spawn(async move {
            run_session(task_inner, cancel, count).await;
        });
        self.inner.scan.lock().unwrap().task = Some(task);
        true
    }

    /// Re-render the chosen best frame for inspection
    ///
    /// With `apply_filters`, pixels at or below the session brightness
    /// threshold are recolored (blue-tinted when `blue`; alpha forced opaque
    /// only for the direct-protocol family) and the rest forced white. Only
    /// the exposed best-capture image changes, never the capture list.
    pub fn improve_the_best_capture(&self, apply_filters: bool, blue: bool) {
        let mut session = self.inner.session.lock().unwrap();
        let Some(index) = session.best_index else {
            return;
        };
        let Some(png) = session.captures.get(index).cloned() else {
            return;
        };
        let Some(mut rgba) = imaging::png_to_rgba(&png) else {
            return;
        };

        if apply_filters {
            let force_alpha = !session.is_futronic;
            imaging::recolor(&mut rgba, session.brightness_threshold, blue, force_alpha);
        }
        if let Some(out) = imaging::rgba_to_png(&rgba) {
            session.best_capture = Some(out);
        }
    }

    /// Captured frames of the current/last session, in shot order
    pub fn captures(&self) -> Vec<Vec<u8>> {
        self.inner.session.lock().unwrap().captures.clone()
    }

    /// The chosen best frame, when a session has completed
    pub fn best_capture(&self) -> Option<Vec<u8>> {
        self.inner.session.lock().unwrap().best_capture.clone()
    }

    /// Index of the best frame within [`Self::captures`]
    pub fn best_capture_index(&self) -> Option<usize> {
        self.inner.session.lock().unwrap().best_index
    }

    /// Completed fraction of the running session
    pub fn progress(&self) -> f32 {
        self.inner.session.lock().unwrap().progress
    }

    /// Current orchestrator state
    pub fn state(&self) -> ScannerState {
        self.inner.session.lock().unwrap().state
    }

    /// Live device information from the worker
    pub async fn device_info(&self) -> FingerprintDeviceInfo {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .inner
            .bridge
            .send_command(ScannerCommand::DeviceInfo { response: tx })
            .await
            .is_err()
        {
            return FingerprintDeviceInfo::UNKNOWN;
        }
        rx.await.unwrap_or(FingerprintDeviceInfo::UNKNOWN)
    }
}

impl Drop for FingerprintManager {
    fn drop(&mut self) {
        self.event_pump.abort();
        let scan = self.inner.scan.lock().unwrap();
        scan.cancel.cancel();
        if let Some(task) = &scan.task {
            task.abort();
        }
    }
}

/// Forward hot-plug events and run the auto-(re)connect policy
async fn run_event_pump(inner: Arc<ManagerInner>) {
    while let Ok(event) = inner.bridge.recv_event().await {
        match event {
            ScannerEvent::DeviceAttached { info } => {
                debug!(
                    "Device attached: {:04x}:{:04x}",
                    info.vendor_id.unwrap_or(0),
                    info.product_id.unwrap_or(0)
                );
                inner
                    .events_tx
                    .send_replace(FingerprintEvent::DeviceAttached);
                connect_flow(&inner).await;
            }
            ScannerEvent::DeviceDetached => {
                inner
                    .events_tx
                    .send_replace(FingerprintEvent::DeviceDetached);
                disconnect_flow(&inner).await;
            }
        }
    }
}

async fn connect_flow(inner: &Arc<ManagerInner>) {
    inner.session.lock().unwrap().state = ScannerState::AwaitingPermission;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let sent = inner
        .bridge
        .send_command(ScannerCommand::Connect { response: tx })
        .await;
    let outcome = match sent {
        Ok(()) => rx.await.unwrap_or(ConnectOutcome::Failed),
        Err(e) => {
            warn!("Connect command failed: {}", e);
            ConnectOutcome::Failed
        }
    };

    match outcome {
        ConnectOutcome::Connected { model } => {
            {
                let mut session = inner.session.lock().unwrap();
                session.connected = true;
                session.is_futronic = model == DeviceModel::Futronic;
                session.state = ScannerState::Connected;
            }
            inner.events_tx.send_replace(FingerprintEvent::Connected);
            let _ = inner.bridge.send_command(ScannerCommand::TurnOffLed).await;
        }
        ConnectOutcome::NoDevice => {
            inner.session.lock().unwrap().state = ScannerState::Idle;
            inner.events_tx.send_replace(FingerprintEvent::Idle);
        }
        ConnectOutcome::PermissionDenied | ConnectOutcome::Failed => {
            inner.session.lock().unwrap().state = ScannerState::Idle;
            inner
                .events_tx
                .send_replace(FingerprintEvent::ConnectingFailed);
        }
    }
}

async fn disconnect_flow(inner: &Arc<ManagerInner>) {
    {
        let mut scan = inner.scan.lock().unwrap();
        scan.cancel.cancel();
        if let Some(task) = scan.task.take() {
            task.abort();
        }
    }
    {
        let mut session = inner.session.lock().unwrap();
        session.connected = false;
        session.state = ScannerState::Disconnected;
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    if inner
        .bridge
        .send_command(ScannerCommand::Disconnect { response: tx })
        .await
        .is_ok()
    {
        let _ = rx.await;
    }
    inner.events_tx.send_replace(FingerprintEvent::Disconnected);
}

/// One capture session; runs as its own task until done or cancelled
async fn run_session(inner: Arc<ManagerInner>, cancel: CancelToken, count: usize) {
    for index in 0..count {
        if cancel.is_cancelled() {
            return;
        }
        inner.events_tx.send_replace(if index == 0 {
            FingerprintEvent::PlaceFinger
        } else {
            FingerprintEvent::KeepFinger
        });

        if !poll_until_captured(&inner, &cancel, index).await {
            return;
        }

        let Some(png) = fetch_image(&inner).await else {
            end_shot_failed(&inner);
            return;
        };
        let Some(rgba) = imaging::png_to_rgba(&png) else {
            end_shot_failed(&inner);
            return;
        };

        {
            let mut session = inner.session.lock().unwrap();
            if session.brightness_threshold == imaging::DEFAULT_BRIGHTNESS_THRESHOLD {
                session.brightness_threshold =
                    imaging::brightness_threshold(session.is_futronic, rgba.width());
                debug!(
                    "Brightness threshold calibrated to {:.2}",
                    session.brightness_threshold
                );
            }
            let score = imaging::darkness_score(&rgba, session.brightness_threshold);
            // Strictly greater: the first maximal frame wins ties
            if score > session.best_value {
                session.best_value = score;
                session.best_index = Some(index);
            }
            session.captures.push(png.clone());
        }

        inner.events_tx.send_replace(FingerprintEvent::NewImage(png));
        inner.session.lock().unwrap().progress = (index + 1) as f32 / count.max(1) as f32;
        tokio::time::sleep(inner.settings.poll_delay).await;
    }

    if cancel.is_cancelled() {
        return;
    }

    // Confirm the best frame before announcing completion
    {
        let mut session = inner.session.lock().unwrap();
        if let Some(index) = session.best_index {
            session.best_capture = session.captures.get(index).cloned();
        }
        session.state = ScannerState::Connected;
    }
    inner
        .events_tx
        .send_replace(FingerprintEvent::CapturedSuccessfully);
}

/// Poll the hardware until a frame is stored
///
/// Returns `false` when the session must not continue (cancellation, finger
/// lift, device failure or timeout); those paths have already emitted their
/// events and restored the state.
async fn poll_until_captured(
    inner: &Arc<ManagerInner>,
    cancel: &CancelToken,
    index: usize,
) -> bool {
    let mut polls: u32 = 0;
    let mut clean_hint_sent = false;

    loop {
        tokio::time::sleep(inner.settings.poll_delay).await;
        if cancel.is_cancelled() {
            return false;
        }

        match capture_poll(inner).await {
            CaptureOutcome::Captured => return true,
            CaptureOutcome::NotReady => {
                if index >= 1 {
                    // A non-first shot failing means the finger was lifted
                    finger_lifted(inner, cancel);
                    return false;
                }
                if !clean_hint_sent && clean_required(inner).await {
                    inner
                        .events_tx
                        .send_replace(FingerprintEvent::CleanTheFingerprint);
                    clean_hint_sent = true;
                }
            }
            CaptureOutcome::DeviceFail => {
                if index == 0 {
                    // No response on the very first shot: connection is bad
                    warn!("Device failure on first shot");
                    inner.session.lock().unwrap().state = ScannerState::Connected;
                    inner
                        .events_tx
                        .send_replace(FingerprintEvent::ConnectingFailed);
                } else {
                    finger_lifted(inner, cancel);
                }
                return false;
            }
        }

        polls += 1;
        if polls > inner.settings.shot_timeout_polls {
            debug!("Shot {} timed out after {} polls", index, polls);
            end_shot_failed(inner);
            return false;
        }
    }
}

/// Abort the session: discard partial captures, emit the cancel event once
fn finger_lifted(inner: &Arc<ManagerInner>, cancel: &CancelToken) {
    cancel.cancel();
    {
        let mut session = inner.session.lock().unwrap();
        session.captures.clear();
        session.best_capture = None;
        session.best_index = None;
        session.best_value = f32::MIN;
        session.state = ScannerState::Cancelled;
    }
    inner
        .events_tx
        .send_replace(FingerprintEvent::ProcessCanceledTheFingerLifted);
}

/// A failed shot ends the session early without a success event
fn end_shot_failed(inner: &Arc<ManagerInner>) {
    inner.session.lock().unwrap().state = ScannerState::Connected;
    inner
        .events_tx
        .send_replace(FingerprintEvent::CapturingFailed);
}

async fn capture_poll(inner: &Arc<ManagerInner>) -> CaptureOutcome {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let sent = inner
        .bridge
        .send_command(ScannerCommand::CaptureImage {
            kind: ImageKind::Extra,
            response: tx,
        })
        .await;
    match sent {
        Ok(()) => rx.await.unwrap_or(CaptureOutcome::DeviceFail),
        Err(_) => CaptureOutcome::DeviceFail,
    }
}

async fn fetch_image(inner: &Arc<ManagerInner>) -> Option<Vec<u8>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    inner
        .bridge
        .send_command(ScannerCommand::FetchImage { response: tx })
        .await
        .ok()?;
    rx.await.ok().flatten()
}

async fn clean_required(inner: &Arc<ManagerInner>) -> bool {
    let (tx, rx) = tokio::sync::oneshot::channel();
    if inner
        .bridge
        .send_command(ScannerCommand::IsCleanRequired { response: tx })
        .await
        .is_err()
    {
        return false;
    }
    rx.await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.poll_delay, Duration::from_millis(50));
        assert_eq!(settings.shot_timeout_polls, 200);
    }

    #[test]
    fn test_session_reset_keeps_connection() {
        let mut session = Session::new();
        session.connected = true;
        session.captures.push(vec![1, 2, 3]);
        session.best_index = Some(0);
        session.progress = 1.0;

        session.reset_for_scan();
        assert!(session.connected);
        assert!(session.captures.is_empty());
        assert_eq!(session.best_index, None);
        assert_eq!(session.progress, 0.0);
        assert_eq!(
            session.brightness_threshold,
            imaging::DEFAULT_BRIGHTNESS_THRESHOLD
        );
    }
}
