//! Telemetry source selection and the producer loop.
//!
//! One producer task ticks at 10 Hz. Each tick re-evaluates the selection
//! rule, builds a frame from the active source, and publishes it to the
//! hub. Flipping sources never stalls the stream: the only visible signal
//! is the `source` field changing on the next frame.

mod serial_reader;

pub use serial_reader::{SerialStatus, SerialTelemetry};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pitwall_core::serial::{ModemState, SerialConfig, SourcePreference};
use pitwall_core::telemetry::{ChannelSpec, Frame, Simulator, SourceKind};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::hub::TelemetryHub;
use crate::store::{now_ms, Store, StoreError};

/// Settings key holding the persisted source preference.
pub const SOURCE_PREFERENCE_KEY: &str = "source_preference";

/// Settings key holding the persisted serial configuration (JSON).
pub const SERIAL_CONFIG_KEY: &str = "serial_config";

/// Producer tick: 10 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// A serial link silent for longer than this no longer wins `auto`.
pub const SERIAL_FRESHNESS_MS: i64 = 5_000;

/// How often the producer re-reads the sensor catalog.
const CATALOG_REFRESH_TICKS: u32 = 10;

/// Applies the selection rule for one tick.
///
/// `serial`: serial only, and nothing at all while the link is down.
/// `simulated`: simulator only. `auto`: serial while the link is connected
/// and fresh, simulator otherwise.
#[must_use]
pub fn select_source(
    preference: SourcePreference,
    serial_state: ModemState,
    serial_fresh: bool,
) -> Option<SourceKind> {
    match preference {
        SourcePreference::Simulated => Some(SourceKind::Simulated),
        SourcePreference::Serial => {
            (serial_state == ModemState::Connected).then_some(SourceKind::Serial)
        }
        SourcePreference::Auto => {
            if serial_state == ModemState::Connected && serial_fresh {
                Some(SourceKind::Serial)
            } else {
                Some(SourceKind::Simulated)
            }
        }
    }
}

/// Owns the active-source policy and the producer loop.
pub struct SourceManager {
    store: Store,
    hub: Arc<TelemetryHub>,
    serial: SerialTelemetry,
    preference: RwLock<SourcePreference>,
}

impl SourceManager {
    /// Builds the manager, restoring the persisted preference.
    #[must_use]
    pub fn new(store: Store, hub: Arc<TelemetryHub>, serial: SerialTelemetry) -> Self {
        let preference = store
            .get_setting(SOURCE_PREFERENCE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(SourcePreference::Auto);
        Self {
            store,
            hub,
            serial,
            preference: RwLock::new(preference),
        }
    }

    #[must_use]
    pub fn preference(&self) -> SourcePreference {
        *self
            .preference
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Updates and persists the preference; the producer sees it on its
    /// next tick.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persisting fails.
    pub fn set_preference(&self, preference: SourcePreference) -> Result<(), StoreError> {
        self.store
            .put_setting(SOURCE_PREFERENCE_KEY, preference.as_str())?;
        *self
            .preference
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = preference;
        info!(preference = preference.as_str(), "telemetry source preference updated");
        Ok(())
    }

    /// The serial reader handle.
    #[must_use]
    pub fn serial(&self) -> &SerialTelemetry {
        &self.serial
    }

    /// What the next published frame would be stamped with.
    #[must_use]
    pub fn active_source(&self) -> Option<SourceKind> {
        select_source(
            self.preference(),
            self.serial.state(),
            self.serial.is_fresh(now_ms(), SERIAL_FRESHNESS_MS),
        )
    }

    /// Status payload for `/telemetry/source`.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        json!({
            "active_source": self.active_source().map(|s| s.as_str()),
            "source_preference": self.preference().as_str(),
            "serial": self.serial.status(),
        })
    }

    /// Persists a new serial configuration and restarts the reader.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persisting fails; the reader keeps its
    /// old configuration in that case.
    pub async fn apply_serial_config(&self, config: SerialConfig) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&config)
            .map_err(|e| StoreError::Storage(format!("serialize serial config: {e}")))?;
        self.store.put_setting(SERIAL_CONFIG_KEY, &raw)?;
        self.serial.set_config(config);
        self.serial.restart().await;
        Ok(())
    }

    /// Producer loop: one frame per tick from the selected source.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let started = std::time::Instant::now();
        let mut interval = tokio::time::interval(FRAME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut simulator = Simulator::new(Vec::new());
        let mut enabled_ids: Vec<String> = Vec::new();
        let mut tick: u32 = 0;

        info!("telemetry producer started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if tick % CATALOG_REFRESH_TICKS == 0 {
                match self.store.list_sensors(true) {
                    Ok(sensors) => {
                        enabled_ids = sensors.iter().map(|s| s.sensor_id.clone()).collect();
                        simulator = Simulator::new(
                            sensors
                                .into_iter()
                                .map(|s| ChannelSpec {
                                    sensor_id: s.sensor_id,
                                    min: s.min_value,
                                    max: s.max_value,
                                })
                                .collect(),
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to refresh sensor catalog"),
                }
            }
            tick = tick.wrapping_add(1);

            let now = now_ms();
            let source = select_source(
                self.preference(),
                self.serial.state(),
                self.serial.is_fresh(now, SERIAL_FRESHNESS_MS),
            );
            let frame = match source {
                Some(SourceKind::Serial) => {
                    let mut channels = self.serial.latest_channels();
                    channels.retain(|id, _| enabled_ids.iter().any(|e| e == id));
                    if channels.is_empty() {
                        continue;
                    }
                    Frame {
                        timestamp: now as f64 / 1000.0,
                        source: SourceKind::Serial,
                        channels,
                    }
                }
                Some(SourceKind::Simulated) => Frame {
                    timestamp: now as f64 / 1000.0,
                    source: SourceKind::Simulated,
                    channels: simulator.sample(started.elapsed().as_secs_f64()),
                },
                None => continue,
            };
            self.hub.publish(frame);
        }
        info!("telemetry producer stopped");
    }
}

/// Restores the persisted serial configuration, falling back to defaults.
#[must_use]
pub fn load_serial_config(store: &Store) -> SerialConfig {
    store
        .get_setting(SERIAL_CONFIG_KEY)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_preference_always_simulates() {
        assert_eq!(
            select_source(SourcePreference::Simulated, ModemState::Connected, true),
            Some(SourceKind::Simulated)
        );
    }

    #[test]
    fn test_serial_preference_goes_silent_when_down() {
        assert_eq!(
            select_source(SourcePreference::Serial, ModemState::Error, false),
            None
        );
        assert_eq!(
            select_source(SourcePreference::Serial, ModemState::Connected, false),
            Some(SourceKind::Serial)
        );
    }

    #[test]
    fn test_auto_prefers_fresh_serial() {
        assert_eq!(
            select_source(SourcePreference::Auto, ModemState::Connected, true),
            Some(SourceKind::Serial)
        );
        assert_eq!(
            select_source(SourcePreference::Auto, ModemState::Connected, false),
            Some(SourceKind::Simulated)
        );
        assert_eq!(
            select_source(SourcePreference::Auto, ModemState::Disconnected, false),
            Some(SourceKind::Simulated)
        );
    }
}
