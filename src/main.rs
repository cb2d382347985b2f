//! XCTL OSC - Behringer X-Touch to OSC bridge
//!
//! Translates X-Touch faders, knobs and buttons into OSC messages (and back)
//! through hot-swappable mapping layers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use xctl_osc::api::{self, ApiState};
use xctl_osc::config::{AppConfig, ConfigWatcher};
use xctl_osc::events::{BridgeEvent, EventBus, DEFAULT_QUEUE_CAPACITY};
use xctl_osc::mapping::{preset, MappingStore, PresetWatcher};
use xctl_osc::osc::{OscClient, OscServer};
use xctl_osc::paths::AppPaths;
use xctl_osc::xtouch::{handshake, XTouchDriver};
use xctl_osc::{BridgeContext, Router};

/// XCTL OSC - Bridge a Behringer X-Touch to OSC with switchable mapping layers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Directory holding the presets
    #[arg(long, env = "XCTL_PRESETS_DIR")]
    presets_dir: Option<PathBuf>,

    /// Preset to load at startup
    #[arg(short, long)]
    preset: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // The config file is optional; it also decides where logs go
    let config_exists = Path::new(&args.config).exists();
    let config = if config_exists {
        AppConfig::load(&args.config).await?
    } else {
        AppConfig::default()
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let _log_guard = init_logging(&level, config.logging.file.as_deref())?;

    info!("Starting XCTL OSC v{}...", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    let config_watcher = if config_exists {
        let (watcher, _) = ConfigWatcher::new(args.config.clone()).await?;
        info!("Configuration loaded with hot-reload enabled: {}", args.config);
        Some(watcher)
    } else {
        warn!(
            "Configuration file '{}' not found, using defaults",
            args.config
        );
        None
    };

    run_app(args, config, config_watcher).await?;

    info!("XCTL OSC shutdown complete");
    Ok(())
}

async fn run_app(
    args: Args,
    config: AppConfig,
    mut config_watcher: Option<ConfigWatcher>,
) -> Result<()> {
    // Presets
    let presets_override = args.presets_dir.clone().or_else(|| config.presets.dir.clone());
    let paths = AppPaths::resolve(&args.config, presets_override.as_deref());
    paths.ensure_directories()?;

    let wanted = args.preset.as_deref().or(config.presets.active.as_deref());
    let preset_dir = preset::resolve_preset_dir(&paths.presets_dir, wanted)?;
    info!("📁 Preset: {}", preset_dir.display());
    let store = Arc::new(MappingStore::open(preset_dir));

    // Device
    let mut xtouch = XTouchDriver::new(&config.midi.input_port, &config.midi.output_port);
    let device = xtouch.connect().context("X-Touch connection failed")?;
    info!("X-Touch connected on '{}'", device.port_name());
    let mut xtouch_rx = xtouch
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("Failed to get X-Touch event receiver"))?;

    // Network
    let mut osc_server = OscServer::bind(&config.osc.input_host, config.osc.input_port)
        .await
        .context("OSC input unavailable")?;
    let mut osc_rx = osc_server
        .take_message_receiver()
        .ok_or_else(|| anyhow::anyhow!("Failed to get OSC message receiver"))?;
    let osc_client = Arc::new(OscClient::new(
        config.osc.output_ip.clone(),
        config.osc.output_port,
    ));

    // Events and router
    let (event_bus, observers, _bus_handle) = EventBus::spawn(DEFAULT_QUEUE_CAPACITY);
    let ctx = BridgeContext::new(store.clone(), device.clone(), osc_client.clone(), Arc::new(event_bus))
        .with_gesture(config.xtouch.layer_select);
    let router = Arc::new(Router::new(ctx));
    info!("Router initialized");

    let api_listener = api::bind_listener("0.0.0.0", config.api.port)
        .await
        .context("Observer API unavailable")?;

    router.init_display().await;
    info!("✅ X-Touch display initialized");

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let osc_handle = osc_server.spawn(shutdown_rx.clone());
    let handshake_handle = handshake::spawn_handshake(
        device.clone(),
        config.xtouch.handshake_interval(),
        shutdown_rx.clone(),
    );
    let mut preset_watcher = PresetWatcher::spawn(
        store.dir(),
        config.presets.reload_poll_interval(),
        shutdown_rx.clone(),
    );

    let api_state = Arc::new(ApiState {
        router: router.clone(),
        osc_client: osc_client.clone(),
        osc_input_port: config.osc.input_port,
        events: observers,
    });
    let api_shutdown = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_server(api_state, api_listener, api_shutdown).await {
            error!("Observer API stopped: {:#}", e);
        }
    });

    // OSC input has its own listener so a slow device write never stalls it
    let network_router = router.clone();
    let network_handle = tokio::spawn(async move {
        while let Some(msg) = osc_rx.recv().await {
            network_router.on_network_message(&msg).await;
        }
        debug!("OSC listener stopped");
    });

    info!("Ready to route X-Touch <-> OSC!");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut current = config;

    loop {
        tokio::select! {
            Some(event) = xtouch_rx.recv() => {
                router.on_midi_from_xtouch(&event.raw_data).await;
            }

            Some(()) = preset_watcher.next_change() => {
                router.reload_mapping().await;
            }

            Some(new_config) = next_config(&mut config_watcher) => {
                info!("📝 Configuration file changed, reloading...");
                apply_config(&router, &osc_client, &current, &new_config).await;
                current = new_config;
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    let _ = handshake_handle.await;
    let _ = osc_handle.await;
    let _ = network_handle.await;
    xtouch.disconnect();
    osc_client.close().await;
    // Open observer sockets would hold graceful shutdown indefinitely
    api_handle.abort();

    Ok(())
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

/// Apply the parts of a new config that can change at runtime
async fn apply_config(
    router: &Router,
    osc_client: &OscClient,
    old: &AppConfig,
    new: &AppConfig,
) {
    let ip = &new.osc.output_ip;
    let port = new.osc.output_port;

    if old.osc.output_ip != *ip || old.osc.output_port != port {
        match osc_client.retarget(ip, port).await {
            Ok(_) => {
                info!("🎯 OSC output set to {}:{}", ip, port);
                router.context().publish(BridgeEvent::SettingsUpdated {
                    osc_output_ip: ip.clone(),
                    osc_output_port: port,
                });
            }
            Err(e) => warn!("⚠️  Failed to retarget OSC output: {:#}", e),
        }
    }

    if old.midi != new.midi
        || old.osc.input_host != new.osc.input_host
        || old.osc.input_port != new.osc.input_port
        || old.presets != new.presets
        || old.xtouch != new.xtouch
        || old.api != new.api
        || old.logging != new.logging
    {
        info!("Some configuration changes take effect after a restart");
    }
}

struct LogGuard {
    _guard: WorkerGuard,
}

fn init_logging(level: &str, file: Option<&Path>) -> Result<Option<LogGuard>> {
    let make_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(make_filter());

    let (file_layer, guard) = match file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (non_blocking, worker_guard) = tracing_appender::non_blocking(log_file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(make_filter());
            (Some(layer), Some(LogGuard { _guard: worker_guard }))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    debug!("Logging initialized at level: {}", level);
    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for CTRL+C: {}", e);
    }
}

fn list_ports_formatted() {
    use colored::*;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let (inputs, outputs) = match XTouchDriver::list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            println!("  {} {:#}", "Failed to query MIDI ports:".red(), e);
            return;
        }
    };

    for (title, ports) in [("Input Ports:", &inputs), ("Output Ports:", &outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in ports.iter() {
            let marker = if port.to_lowercase().contains("x-touch") {
                "[X-TOUCH]".bright_green()
            } else {
                "[MIDI]".normal()
            };
            println!("  {} {}", marker, port);
        }
    }
    println!();
}
