//! Switch 2 Pro Controller keyboard bridge
//!
//! Connects to the controller over BLE and types the bound keys until
//! interrupted with Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use switch2_keybridge::domain::mapping::MappingTable;
use switch2_keybridge::domain::models::{AppEvent, ConnectionState, MessageSeverity};
use switch2_keybridge::domain::settings::SettingsService;
use switch2_keybridge::infrastructure::bluetooth::{
    BridgeConfig, BridgeHandle, BridgeService, BtleplugTransport,
};
use switch2_keybridge::infrastructure::keyboard::platform_keyboard;
use switch2_keybridge::infrastructure::logging::init_logger;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Map a Switch 2 Pro Controller to keyboard keys over Bluetooth LE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the settings file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log raw reports whenever the button bytes change
    #[arg(long)]
    calibrate: bool,

    /// Print the key bindings and exit
    #[arg(long)]
    print_bindings: bool,

    /// Log key events instead of injecting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings_service = match &args.config {
        Some(path) => SettingsService::from_path(path)?,
        None => SettingsService::new()?,
    };
    let settings = settings_service.get_mut();
    if let Some(level) = &args.log_level {
        settings.log_settings.level = level.clone();
    }
    if args.calibrate {
        settings.debug_raw_data_logging = true;
    }
    let settings = settings_service.get().clone();

    let table = MappingTable::default_bindings()?;
    if args.print_bindings {
        for entry in table.entries() {
            println!("{:<14} -> {}", entry.source.to_string(), entry.target);
        }
        return Ok(());
    }

    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting Switch 2 Keyboard Bridge");
    info!("Settings: {}", settings_service.path().display());
    if settings.debug_raw_data_logging {
        info!("Calibration mode: raw reports are logged when buttons change");
    }

    let config = BridgeConfig::from_settings(&settings)?;
    let cooldown = config.retry.max_delay;
    let transport = BtleplugTransport::new().await?;
    let keyboard = platform_keyboard(args.dry_run);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let service = BridgeService::new(transport, keyboard, table, config, event_tx);
    let (handle, task) = service.spawn();
    let events = tokio::spawn(log_events(event_rx, handle.clone(), cooldown));
    handle.start();

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, releasing keys and disconnecting...");
    handle.shutdown();

    if let Err(e) = task.await {
        error!("Bridge task failed: {}", e);
    }
    let _ = events.await;

    info!("Bridge stopped");
    Ok(())
}

/// Log bridge events. A bridge that stopped retrying is started again
/// after `cooldown`.
async fn log_events(
    mut events: mpsc::UnboundedReceiver<AppEvent>,
    handle: BridgeHandle,
    cooldown: Duration,
) {
    while let Some(event) = events.recv().await {
        match event {
            AppEvent::ConnectionState(ConnectionState::Streaming) => {
                info!("Streaming: controller input is now mapped to the keyboard");
            }
            AppEvent::ConnectionState(state) => info!("Status: {}", state),
            AppEvent::DeviceFound(device) => info!(
                "Controller: {} [{}] RSSI {}",
                device.name,
                device.address,
                device
                    .signal_strength
                    .map_or_else(|| "n/a".to_string(), |rssi| format!("{} dBm", rssi))
            ),
            AppEvent::DeviceNotFound => {}
            AppEvent::RetriesExhausted { failures } => {
                error!(
                    "Connection failed {} times in a row, starting over in {} ms",
                    failures,
                    cooldown.as_millis()
                );
                let handle = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    handle.start();
                });
            }
            AppEvent::LogMessage(msg) => match msg.severity {
                MessageSeverity::Error => error!("{}", msg.message),
                MessageSeverity::Warning => warn!("{}", msg.message),
                MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
            },
        }
    }
}
