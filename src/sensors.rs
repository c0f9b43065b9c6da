//! ==============================================================================
//! sensors.rs - sensor driver boundary and sampling tasks
//! ==============================================================================
//!
//! purpose:
//!     glue between the sensor drivers and their SensorChannels. each sensor
//!     gets its own periodic task. a failed sample leaves the channel at its
//!     last value; a failed init leaves it at its default.
//!
//! drivers:
//!     - ThermalZoneTemperature: linux thermal zone, converted to device units
//!     - Sgp30GasSensor: tvoc + eco2 over i2c (see hal.rs)
//!     - Simulated: deterministic waveform for hosts without the hardware
//!
//! relationships:
//!     - used by: main.rs (spawns one sampler per sensor)
//!     - writes: channel.rs (SensorChannel::publish)
//!     - uses: hal.rs (I2cBus)
//!
//! ==============================================================================

use crate::channel::SensorChannel;
use crate::domain::GasReadout;
use crate::hal::I2cBus;

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub trait SensorDriver: Send + 'static {
    type Reading: Copy + Send + std::fmt::Debug + 'static;

    fn name(&self) -> &'static str;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// blocking read of the newest value. called from a blocking thread.
    fn read_latest(&mut self) -> Result<Self::Reading>;
}

// ==============================================================================
// temperature
// ==============================================================================

/// device temperature unit: fahrenheit with the board's self-heating offset
pub fn device_temperature(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0 - 50.0
}

pub struct ThermalZoneTemperature {
    path: PathBuf,
}

impl ThermalZoneTemperature {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SensorDriver for ThermalZoneTemperature {
    type Reading = f32;

    fn name(&self) -> &'static str {
        "temperature"
    }

    fn init(&mut self) -> Result<()> {
        std::fs::metadata(&self.path)
            .with_context(|| format!("thermal zone {} not available", self.path.display()))?;
        Ok(())
    }

    fn read_latest(&mut self) -> Result<f32> {
        let raw = std::fs::read_to_string(&self.path)?;
        let millidegrees: f32 = raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("bad thermal reading {:?}: {}", raw.trim(), e))?;
        Ok(device_temperature(millidegrees / 1000.0))
    }
}

// ==============================================================================
// gas sensor (sgp30)
// ==============================================================================

const SGP30_INIT_AIR_QUALITY: [u8; 2] = [0x20, 0x03];
const SGP30_MEASURE_AIR_QUALITY: [u8; 2] = [0x20, 0x08];

pub struct Sgp30GasSensor<B> {
    bus: B,
    addr: u8,
    command_delay: Duration,
}

impl<B: I2cBus> Sgp30GasSensor<B> {
    pub fn new(bus: B, addr: u8, command_delay: Duration) -> Self {
        Self { bus, addr, command_delay }
    }
}

impl<B: I2cBus + 'static> SensorDriver for Sgp30GasSensor<B> {
    type Reading = GasReadout;

    fn name(&self) -> &'static str {
        "gas"
    }

    fn init(&mut self) -> Result<()> {
        self.bus
            .write(self.addr, &SGP30_INIT_AIR_QUALITY)
            .context("gas sensor init command failed")
    }

    fn read_latest(&mut self) -> Result<GasReadout> {
        self.bus
            .write(self.addr, &SGP30_MEASURE_AIR_QUALITY)
            .context("gas sensor write error")?;
        // the sensor needs a moment before the reply is ready
        std::thread::sleep(self.command_delay);
        let mut reply = [0u8; 2];
        self.bus.read(self.addr, &mut reply).context("gas sensor read error")?;
        Ok(GasReadout { tvoc: reply[0], eco2: u16::from(reply[1]) })
    }
}

// ==============================================================================
// simulated sensors
// ==============================================================================

/// linear range conversion; a zero-width input range maps to `out_min`
pub fn map_range(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    let divisor = in_max - in_min;
    if divisor == 0 {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / divisor + out_min
}

/// spectral magnitude (0..2000) to the 8-bit noise level
pub fn noise_level_from_magnitude(magnitude: f64) -> u8 {
    map_range(magnitude as i64, 0, 2000, 0, 256).clamp(0, 255) as u8
}

/// driver producing `generate(tick)` with tick incrementing per read
pub struct Simulated<T> {
    name: &'static str,
    tick: u64,
    generate: fn(u64) -> T,
}

impl<T> Simulated<T> {
    pub fn new(name: &'static str, generate: fn(u64) -> T) -> Self {
        Self { name, tick: 0, generate }
    }
}

impl<T: Copy + Send + std::fmt::Debug + 'static> SensorDriver for Simulated<T> {
    type Reading = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn read_latest(&mut self) -> Result<T> {
        let value = (self.generate)(self.tick);
        self.tick = self.tick.wrapping_add(1);
        Ok(value)
    }
}

fn wave(tick: u64, period: u64) -> f64 {
    let phase = (tick % period) as f64 / period as f64;
    (phase * std::f64::consts::TAU).sin()
}

pub fn simulated_temperature() -> Simulated<f32> {
    Simulated::new("temperature", |t| device_temperature(38.0 + 3.0 * wave(t, 600) as f32))
}

pub fn simulated_noise() -> Simulated<u8> {
    Simulated::new("noise", |t| noise_level_from_magnitude(300.0 + 250.0 * wave(t, 97)))
}

pub fn simulated_light() -> Simulated<u32> {
    Simulated::new("light", |t| (1600.0 + 500.0 * wave(t, 300)) as u32)
}

// ==============================================================================
// sampler task
// ==============================================================================

/// take one reading and publish it. the driver is handed to a blocking
/// thread and back again.
pub async fn sample_once<D: SensorDriver>(
    mut driver: D,
    channel: &SensorChannel<D::Reading>,
) -> Result<D> {
    let (driver, reading) = tokio::task::spawn_blocking(move || {
        let reading = driver.read_latest();
        (driver, reading)
    })
    .await
    .map_err(|e| anyhow!("sampler join error: {}", e))?;

    match reading {
        Ok(value) => {
            tracing::debug!("[{}] sample: {:?}", driver.name(), value);
            channel.publish(value);
        }
        Err(e) => {
            tracing::warn!("[{}] ⚠ Read error: {:#}", driver.name(), e);
        }
    }
    Ok(driver)
}

pub fn spawn_sampler<D: SensorDriver>(
    driver: D,
    channel: Arc<SensorChannel<D::Reading>>,
    period: Duration,
    startup_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = driver.name();
        let init = tokio::task::spawn_blocking(move || {
            let mut driver = driver;
            driver.init().map(|_| driver)
        })
        .await;

        let mut driver = match init {
            Ok(Ok(driver)) => driver,
            Ok(Err(e)) => {
                tracing::error!("[{}] init failed, channel stays at default: {:#}", name, e);
                return;
            }
            Err(e) => {
                tracing::error!("[{}] init join error: {}", name, e);
                return;
            }
        };

        tokio::time::sleep(startup_delay).await;
        loop {
            driver = match sample_once(driver, &channel).await {
                Ok(driver) => driver,
                Err(e) => {
                    tracing::error!("[{}] sampler stopped: {:#}", name, e);
                    return;
                }
            };
            tokio::time::sleep(period).await;
        }
    })
}
