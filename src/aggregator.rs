//! ==============================================================================
//! aggregator.rs - periodic assembly of measurement snapshots
//! ==============================================================================
//!
//! purpose:
//!     once per aggregation period, read every sensor channel, build a
//!     MeasurementSnapshot, push it to the ui and park it in the SnapshotSlot
//!     for the shadow sync engine to pull.
//!
//! read order (fixed): gas -> light -> noise -> temperature
//!
//! consistency:
//!     channels are read one after the other, each under its own lock.
//!     fields may therefore be up to one sampling period apart. the
//!     aggregation interval is the knob for how stale a field may get.
//!
//! ==============================================================================

use crate::channel::SensorChannel;
use crate::domain::{GasReadout, MeasurementSnapshot};
use crate::ui::UiSink;

use std::sync::Arc;
use std::time::Duration;

/// one handle per sensor channel
#[derive(Clone, Default)]
pub struct SensorSet {
    pub temperature: Arc<SensorChannel<f32>>,
    pub noise: Arc<SensorChannel<u8>>,
    pub light: Arc<SensorChannel<u32>>,
    pub gas: Arc<SensorChannel<GasReadout>>,
}

/// latest snapshot handed from the aggregator to the sync engine
#[derive(Default)]
pub struct SnapshotSlot {
    inner: SensorChannel<Option<MeasurementSnapshot>>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, snapshot: MeasurementSnapshot) {
        self.inner.publish(Some(snapshot));
    }

    /// None until the aggregator has completed its first cycle
    pub fn latest(&self) -> Option<MeasurementSnapshot> {
        self.inner.read()
    }
}

pub struct MeasurementAggregator {
    sensors: SensorSet,
    ui: Arc<dyn UiSink>,
    slot: Arc<SnapshotSlot>,
    show_data: bool,
}

impl MeasurementAggregator {
    pub fn new(sensors: SensorSet, ui: Arc<dyn UiSink>, slot: Arc<SnapshotSlot>) -> Self {
        Self { sensors, ui, slot, show_data: false }
    }

    pub fn with_logging(mut self, show_data: bool) -> Self {
        self.show_data = show_data;
        self
    }

    /// one aggregation cycle. never blocks on a sensor, never fails.
    pub fn aggregate_once(&self) -> MeasurementSnapshot {
        let gas = self.sensors.gas.read();
        let light_intensity = self.sensors.light.read();
        let noise_level = self.sensors.noise.read();
        let temperature = self.sensors.temperature.read();

        let sampled = [
            ("gas", self.sensors.gas.has_published()),
            ("light", self.sensors.light.has_published()),
            ("noise", self.sensors.noise.has_published()),
            ("temperature", self.sensors.temperature.has_published()),
        ];
        for (name, _) in sampled.iter().filter(|(_, published)| !published) {
            tracing::debug!("[AGGREGATOR] {} not sampled yet, reporting its default", name);
        }

        let snapshot = MeasurementSnapshot {
            temperature,
            noise_level,
            light_intensity,
            tvoc: gas.tvoc,
            eco2: gas.eco2,
        };

        if self.show_data {
            tracing::info!(
                "Recorded HHO data: {{light:{} temp:{:.1} sound:{} tvoc:{} eCO2:{}}}",
                snapshot.light_intensity,
                snapshot.temperature,
                snapshot.noise_level,
                snapshot.tvoc,
                snapshot.eco2
            );
        }

        self.ui.update_measurements(snapshot);
        self.slot.store(snapshot);
        snapshot
    }

    pub async fn run(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.aggregate_once();
        }
    }
}
