//! usbdrive
//!
//! Command-line front end for the drive engine: list attached USB storage
//! devices, mount and unmount them, and watch for changes.

mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::setup_logging;
use config::DriveConfig;
use engine::{BackendKind, DriveEngine, open_platform};
use records::{DeviceId, DeviceRecord, DriveError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbdrive")]
#[command(
    author,
    version,
    about = "usbdrive - Inspect, mount and unmount USB storage devices"
)]
#[command(long_about = "
Lists attached USB mass-storage devices with stable identifiers, and mounts
or unmounts them by id.

EXAMPLES:
    # List devices (default command)
    usbdrive list

    # Same, as JSON
    usbdrive --json list

    # Unmount a device
    usbdrive unmount 0x0a-0x12-IDQFB0023AB

    # Mount it again below the configured mount root
    usbdrive mount 0x0a-0x12-IDQFB0023AB

    # Print attach, detach and mount events as they happen
    usbdrive watch --interval-ms 1000

CONFIGURATION:
    usbdrive looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbdrive/config.toml
    3. /etc/usbdrive/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Platform backend (auto, sysfs, libusb)
    #[arg(short, long, value_name = "BACKEND", global = true)]
    backend: Option<BackendKind>,

    /// Print records and events as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB storage devices
    List,

    /// Show one device
    Get {
        /// Device id as printed by `list`
        id: String,
    },

    /// Unmount a device
    Unmount { id: String },

    /// Mount a device
    Mount {
        id: String,

        /// Mount point (default: <mount_root>/<product name>)
        #[arg(short, long, value_name = "PATH")]
        target: Option<PathBuf>,
    },

    /// Poll continuously and print device events
    Watch {
        /// Poll interval in milliseconds (default from config)
        #[arg(short, long, value_name = "MS")]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DriveConfig::default();
        let path = DriveConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DriveConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriveConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    let backend = args.backend.unwrap_or(config.platform.backend);
    let platform = open_platform(backend, &config.platform.paths())
        .context("Failed to open platform backend")?;
    let engine = DriveEngine::with_options(platform, config.engine_options()?);
    debug!(
        "usbdrive v{} using {} backend",
        env!("CARGO_PKG_VERSION"),
        engine.platform_name()
    );

    match args.command.unwrap_or(Command::List) {
        Command::List => list(&engine, args.json).await,
        Command::Get { id } => get(&engine, &id, args.json).await,
        Command::Unmount { id } => {
            engine.poll_devices().await?;
            engine.unmount(&id).await?;
            println!("Unmounted {}", id);
            Ok(())
        }
        Command::Mount { id, target } => {
            engine.poll_devices().await?;
            let mount = engine.mount(&id, target).await?;
            println!("Mounted {} at {}", id, mount);
            Ok(())
        }
        Command::Watch { interval_ms } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.general.poll_interval());
            watch(&engine, interval, args.json).await
        }
    }
}

async fn list(engine: &DriveEngine, json: bool) -> Result<()> {
    let devices = engine.poll_devices().await?;

    if json {
        let values: Vec<_> = devices.iter().map(DeviceRecord::to_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        print!("{}", output::format_device_list(&devices));
    }
    Ok(())
}

async fn get(engine: &DriveEngine, id: &str, json: bool) -> Result<()> {
    engine.poll_devices().await?;
    let device = engine.get(id).ok_or_else(|| DriveError::DeviceNotFound {
        id: DeviceId::from(id),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&device.to_json())?);
    } else {
        print!("{}", output::format_device(&device));
    }
    Ok(())
}

/// Poll on a timer and print events until Ctrl+C
async fn watch(engine: &DriveEngine, interval: Duration, json: bool) -> Result<()> {
    info!("Watching for device changes every {:?}", interval);
    watch_until(engine, interval, json, async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, stopping");
    })
    .await
}

/// Watch loop, returns once `shutdown` completes
///
/// `shutdown` is polled across iterations, so a signal that arrives while a
/// poll is running still ends the loop.
async fn watch_until<F>(
    engine: &DriveEngine,
    interval: Duration,
    json: bool,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let events = engine.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = ticker.tick() => {
                if let Err(e) = engine.poll_devices().await {
                    warn!("Poll failed: {}", e);
                }
            }
            event = events.recv() => {
                let event = event?;
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!("{}", output::format_event(&event));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, foobar_descriptor, with_timeout};
    use engine::MockPlatform;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_during_poll_stops_watch() {
        let platform = Arc::new(MockPlatform::with_devices(vec![foobar_descriptor()]));
        let engine = DriveEngine::new(platform.clone());
        let gate = platform.hold_next_enumeration();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let watcher = {
            let engine = engine.clone();
            tokio::spawn(async move {
                watch_until(&engine, Duration::from_millis(10), true, async {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        // First tick is now blocked inside the platform query
        let gate = tokio::task::spawn_blocking(move || {
            assert!(gate.wait_started());
            gate
        })
        .await
        .unwrap();
        stop_tx.send(()).unwrap();
        gate.release();

        let result = with_timeout(DEFAULT_TEST_TIMEOUT, watcher)
            .await
            .expect("watch did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
