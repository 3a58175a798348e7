//! fingerscan
//!
//! Command-line host for USB fingerprint readers: discovers a supported
//! scanner, connects, runs a multi-shot capture session and writes the
//! captured frames as PNG files.

use anyhow::{Context as _, Result};
use clap::Parser;
use common::{ScannerCommand, create_scanner_bridge, setup_logging};
use protocol::{DeviceModel, FingerprintEvent};
use rusb::UsbContext;
use scanner::{FingerprintManager, ScannerConfig, ScannerState};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fingerscan")]
#[command(author, version, about = "Capture fingerprints from USB readers")]
#[command(long_about = "
Host driver for HF-security and Futronic USB fingerprint readers.

EXAMPLES:
    # List supported readers on the bus
    fingerscan --list-devices

    # Capture a 3-shot sequence into ./captures
    fingerscan --count 3 --out captures

    # Capture and write a blue-highlighted best frame
    fingerscan --count 5 --highlight

CONFIGURATION:
    The default configuration file lives at
    ~/.config/fingerscan/config.toml; --save-config writes it out.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List supported USB readers and exit
    #[arg(long)]
    list_devices: bool,

    /// Number of shots to capture (clamped to 5)
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Directory for captured PNG frames
    #[arg(short, long, default_value = "captures")]
    out: PathBuf,

    /// Write an additional blue-highlighted best frame
    #[arg(long)]
    highlight: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ScannerConfig::default();
        let path = ScannerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if args.config.is_some() {
        ScannerConfig::load(args.config.clone()).context("Failed to load configuration")?
    } else {
        ScannerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.scanner.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("fingerscan v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices();
    }

    let (bridge, worker) = create_scanner_bridge();
    let worker_handle = scanner::spawn_usb_worker(worker, scanner::unlinked_delegate_factory());

    let result = run_capture(&args, &config, bridge.clone()).await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = bridge.send_command(ScannerCommand::Shutdown).await {
        error!("Error shutting down USB worker: {}", e);
    }
    if let Err(e) = worker_handle.join() {
        error!("USB worker thread panicked: {:?}", e);
    }

    result
}

/// Enumerate supported readers without starting the worker
fn list_devices() -> Result<()> {
    let context = rusb::Context::new().context("Failed to create USB context")?;
    let devices = context.devices().context("Failed to enumerate devices")?;

    let mut found = 0usize;
    for device in devices.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        if let Some(model) = DeviceModel::classify(vid, pid) {
            found += 1;
            println!(
                "  {:04x}:{:04x}  Bus {:03} Device {:03}  {:?}",
                vid,
                pid,
                device.bus_number(),
                device.address(),
                model
            );
        }
    }

    if found == 0 {
        println!("No supported fingerprint readers found.");
    } else {
        println!("\nFound {} supported reader(s).", found);
    }
    Ok(())
}

/// Connect, scan and write the captured frames
async fn run_capture(
    args: &Args,
    config: &ScannerConfig,
    bridge: common::ScannerBridge,
) -> Result<()> {
    let manager = FingerprintManager::new(bridge, config.capture_settings());
    let mut events = manager.subscribe();

    // Narrate events while the session runs
    let mut printer_events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while printer_events.changed().await.is_ok() {
            let event = printer_events.borrow_and_update().clone();
            info!("Event: {}", event.describe());
        }
    });

    manager.connect().await;
    if manager.state() != ScannerState::Connected {
        printer.abort();
        anyhow::bail!("No scanner connected (is the device plugged in and accessible?)");
    }

    let device = manager.device_info().await;
    info!(
        "Connected to {} ({:04x}:{:04x})",
        device.model.as_deref().unwrap_or("unknown model"),
        device.vendor_id.unwrap_or(0),
        device.product_id.unwrap_or(0)
    );

    if !manager.scan(args.count).await {
        printer.abort();
        anyhow::bail!("Failed to start the capture session");
    }

    // Wait for a terminal event or Ctrl+C
    let finished = loop {
        tokio::select! {
            changed = events.changed() => {
                if changed.is_err() {
                    break false;
                }
                match &*events.borrow_and_update() {
                    FingerprintEvent::CapturedSuccessfully => break true,
                    FingerprintEvent::CapturingFailed
                    | FingerprintEvent::ProcessCanceledTheFingerLifted
                    | FingerprintEvent::ConnectingFailed
                    | FingerprintEvent::Disconnected => break false,
                    _ => {}
                }
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, disconnecting...");
                manager.disconnect().await;
                break false;
            }
        }
    };

    if finished {
        std::fs::create_dir_all(&args.out)
            .with_context(|| format!("Failed to create {}", args.out.display()))?;

        for (index, png) in manager.captures().iter().enumerate() {
            let path = args.out.join(format!("capture_{:02}.png", index));
            std::fs::write(&path, png)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        if args.highlight {
            manager.improve_the_best_capture(true, true);
        }
        if let Some(best) = manager.best_capture() {
            let path = args.out.join("best.png");
            std::fs::write(&path, best)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Best frame: index {} -> {}",
                manager.best_capture_index().unwrap_or(0),
                path.display()
            );
        }
        println!(
            "Captured {} frame(s) into {}",
            manager.captures().len(),
            args.out.display()
        );
    } else {
        println!("Capture session did not complete.");
    }

    manager.disconnect().await;
    printer.abort();
    Ok(())
}
