//! ==============================================================================
//! main.rs - healthy home office device entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the sensor samplers, the measurement aggregator, the display
//!     and the device-shadow sync engine together and runs them until ctrl-c.
//!
//! relationships:
//!     - config.rs: device.toml (periods, transport, identity)
//!     - sensors.rs + channel.rs: one sampler task per sensor
//!     - aggregator.rs: snapshot every aggregation period
//!     - ui.rs + dashboard.rs: display state and its web view
//!     - shadow/: sync engine plus transports
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │  samplers (temperature, noise, light, gas)                   │
//!     │        │ SensorChannel::publish                              │
//!     │        v                                                     │
//!     │   aggregator ──── UiHandle ───> UiStore <──── dashboard      │
//!     │        │ SnapshotSlot              ^                         │
//!     │        v                           │ status / notifications  │
//!     │   ShadowSyncEngine ────────────────┘                         │
//!     │        │ ShadowTransport (loopback | http)                   │
//!     └────────┼─────────────────────────────────────────────────────┘
//!              v
//!        device shadow
//!
//! a fatal sync error stops only the sync engine; sensing and the display
//! keep running.
//!
//! ==============================================================================

mod aggregator;
mod channel;
mod config;
mod dashboard;
mod domain;
mod hal;
mod identity;
mod network;
mod recommendations;
mod sensors;
mod shadow;
mod ui;

use aggregator::{MeasurementAggregator, SensorSet, SnapshotSlot};
use config::{DeviceConfig, TransportKind};
use identity::{IdentityProvider, SerialFileIdentity, SerialIdentity};
use shadow::http::HttpShadowTransport;
use shadow::loopback::LoopbackTransport;
use shadow::{ShadowSyncEngine, ShadowTransport};
use ui::{UiHandle, UiSink, UiStore};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const UI_QUEUE_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = init_tracing();

    tracing::info!("===========================================================");
    tracing::info!("  Healthy Home Office - device host");
    tracing::info!("===========================================================");

    // step 1: load configuration
    let config = DeviceConfig::load_or_default();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        if let Err(e) = filter.reload(EnvFilter::new(&config.logging.level)) {
            tracing::warn!("[STARTUP] could not apply log level '{}': {}", config.logging.level, e);
        }
    }
    config.print_summary();

    // step 2: display
    let store = UiStore::new();
    let (ui_handle, ui_rx) = UiHandle::channel(UI_QUEUE_CAPACITY);
    tokio::spawn(store.clone().run(ui_rx));
    let ui: Arc<dyn UiSink> = Arc::new(ui_handle);

    if config.dashboard.enabled {
        let web_store = store.clone();
        let bind = config.dashboard.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::run_server(web_store, &bind).await {
                tracing::error!("[DASHBOARD] Web server error: {}", e);
            }
        });
    }

    // step 3: sensing
    let sensors = SensorSet::default();
    spawn_samplers(&config, &sensors)?;

    let slot = Arc::new(SnapshotSlot::new());
    let aggregator = MeasurementAggregator::new(sensors, ui.clone(), slot.clone())
        .with_logging(config.logging.show_sensor_data);
    tokio::spawn(aggregator.run(ms(config.sampling.aggregation_interval_ms)));

    // step 4: shadow sync
    let (signal, ready) = network::readiness();
    let (stop_tx, stop_rx) = watch::channel(false);
    let settings = config.shadow.engine_settings();
    let identity = identity_provider(&config);

    let sync = match config.shadow.transport {
        TransportKind::Loopback => {
            signal.set_ready(true);
            let engine = ShadowSyncEngine::new(LoopbackTransport::new(), settings, slot, ui.clone(), identity, ready);
            tokio::spawn(run_sync(engine, stop_rx, ui.clone()))
        }
        TransportKind::Http => {
            match config.shadow.probe_addr() {
                Some(addr) => {
                    network::spawn_probe(signal, addr);
                }
                None => {
                    tracing::warn!("[STARTUP] no host in endpoint '{}', skipping probe", config.shadow.endpoint);
                    signal.set_ready(true);
                }
            }
            let transport =
                HttpShadowTransport::new(&config.shadow.endpoint, ms(config.shadow.request_timeout_ms))?;
            let engine = ShadowSyncEngine::new(transport, settings, slot, ui.clone(), identity, ready);
            tokio::spawn(run_sync(engine, stop_rx, ui.clone()))
        }
    };

    // step 5: run until ctrl-c
    tokio::signal::ctrl_c().await?;
    tracing::info!("[RUNTIME] shutdown requested");
    stop_tx.send_replace(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, sync).await.is_err() {
        tracing::warn!("[RUNTIME] sync engine did not stop within {:?}", SHUTDOWN_GRACE);
    }
    Ok(())
}

fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(initial);
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
    handle
}

fn identity_provider(config: &DeviceConfig) -> Arc<dyn IdentityProvider> {
    match (&config.identity.serial, &config.identity.serial_path) {
        (None, Some(path)) => Arc::new(SerialFileIdentity::new(path.clone())),
        (serial, _) => Arc::new(SerialIdentity::new(serial.clone())),
    }
}

fn spawn_samplers(config: &DeviceConfig, sensors: &SensorSet) -> Result<()> {
    let periods = &config.sampling;
    let startup = ms(periods.startup_delay_ms);

    if Path::new(THERMAL_ZONE).exists() {
        sensors::spawn_sampler(
            sensors::ThermalZoneTemperature::new(THERMAL_ZONE),
            sensors.temperature.clone(),
            ms(periods.temperature_period_ms),
            startup,
        );
    } else {
        tracing::info!("[STARTUP] {} not found, simulating temperature", THERMAL_ZONE);
        sensors::spawn_sampler(
            sensors::simulated_temperature(),
            sensors.temperature.clone(),
            ms(periods.temperature_period_ms),
            startup,
        );
    }

    sensors::spawn_sampler(sensors::simulated_noise(), sensors.noise.clone(), ms(periods.noise_period_ms), startup);
    sensors::spawn_sampler(sensors::simulated_light(), sensors.light.clone(), ms(periods.light_period_ms), startup);

    #[cfg(feature = "hardware")]
    let bus = hal::RppalI2cBus::new()?;
    #[cfg(not(feature = "hardware"))]
    let bus = hal::MockI2cBus::with_reply(&[2, 180]);

    let gas = sensors::Sgp30GasSensor::new(bus, config.gas_sensor.i2c_address, ms(config.gas_sensor.command_delay_ms));
    sensors::spawn_sampler(gas, sensors.gas.clone(), ms(periods.gas_period_ms), startup);
    Ok(())
}

async fn run_sync<T: ShadowTransport>(
    engine: ShadowSyncEngine<T>,
    stop: watch::Receiver<bool>,
    ui: Arc<dyn UiSink>,
) {
    match engine.run(stop).await {
        Ok(()) => tracing::info!("[SHADOW] sync engine stopped"),
        Err(e) => {
            tracing::error!("[SHADOW] Fatal: {} - shadow sync disabled", e);
            ui.add_status_line(&format!("\nShadow sync stopped: {}\n", e));
        }
    }
}
