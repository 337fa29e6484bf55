//! Telemetry sensor catalog persistence.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};

/// A stored sensor definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorRecord {
    pub id: i64,
    pub sensor_id: String,
    pub name: String,
    pub unit: String,
    pub min_value: f64,
    pub max_value: f64,
    pub group: String,
    pub sort_order: i64,
    pub enabled: bool,
}

/// Payload for creating a sensor.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSensor {
    pub sensor_id: String,
    pub name: String,
    pub unit: String,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "default_max_value")]
    pub max_value: f64,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_value() -> f64 {
    100.0
}

fn default_group() -> String {
    "Other".to_string()
}

const fn default_enabled() -> bool {
    true
}

/// Partial update of a sensor; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorUpdate {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub group: Option<String>,
    pub sort_order: Option<i64>,
    pub enabled: Option<bool>,
}

/// The default FSAE channel catalog, seeded on first boot.
pub(crate) const DEFAULT_SENSORS: &[(&str, &str, &str, f64, f64, &str)] = &[
    ("speed", "Vehicle Speed", "km/h", 0.0, 160.0, "Performance"),
    ("rpm", "Engine RPM", "rpm", 0.0, 14000.0, "Performance"),
    ("throttle", "Throttle Position", "%", 0.0, 100.0, "Performance"),
    ("brake_pressure", "Brake Pressure", "bar", 0.0, 120.0, "Performance"),
    ("coolant_temp", "Coolant Temp", "C", 60.0, 120.0, "Temperatures"),
    ("oil_temp", "Oil Temp", "C", 60.0, 140.0, "Temperatures"),
    ("intake_temp", "Intake Air Temp", "C", 20.0, 60.0, "Temperatures"),
    ("exhaust_temp", "Exhaust Temp", "C", 200.0, 900.0, "Temperatures"),
    ("g_lateral", "Lateral G-Force", "g", -2.5, 2.5, "G-Forces"),
    ("g_longitudinal", "Longitudinal G-Force", "g", -3.0, 3.0, "G-Forces"),
    ("wheel_fl", "Wheel Speed FL", "km/h", 0.0, 160.0, "Wheel Speeds"),
    ("wheel_fr", "Wheel Speed FR", "km/h", 0.0, 160.0, "Wheel Speeds"),
    ("wheel_rl", "Wheel Speed RL", "km/h", 0.0, 160.0, "Wheel Speeds"),
    ("wheel_rr", "Wheel Speed RR", "km/h", 0.0, 160.0, "Wheel Speeds"),
    ("battery_voltage", "Battery Voltage", "V", 10.0, 15.0, "Electrical"),
];

impl Store {
    /// Sensors ordered by `sort_order`, optionally only enabled ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_sensors(&self, enabled_only: bool) -> Result<Vec<SensorRecord>, StoreError> {
        let conn = self.lock();
        let sql = if enabled_only {
            "SELECT id, sensor_id, name, unit, min_value, max_value, grouping, sort_order, enabled
             FROM sensors WHERE enabled = 1 ORDER BY sort_order, id"
        } else {
            "SELECT id, sensor_id, name, unit, min_value, max_value, grouping, sort_order, enabled
             FROM sensors ORDER BY sort_order, id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], sensor_row)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Looks up one sensor by its key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn get_sensor(&self, sensor_id: &str) -> Result<Option<SensorRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, sensor_id, name, unit, min_value, max_value, grouping, sort_order, enabled
                 FROM sensors WHERE sensor_id = ?1",
                [sensor_id],
                sensor_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Creates a sensor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the sensor id is taken.
    pub fn create_sensor(&self, new: &NewSensor) -> Result<SensorRecord, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sensors (sensor_id, name, unit, min_value, max_value, grouping, sort_order, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.sensor_id,
                new.name,
                new.unit,
                new.min_value,
                new.max_value,
                new.group,
                new.sort_order,
                new.enabled
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => StoreError::Conflict("Sensor ID already exists".into()),
            other => other,
        })?;
        let id = conn.last_insert_rowid();
        Ok(SensorRecord {
            id,
            sensor_id: new.sensor_id.clone(),
            name: new.name.clone(),
            unit: new.unit.clone(),
            min_value: new.min_value,
            max_value: new.max_value,
            group: new.group.clone(),
            sort_order: new.sort_order,
            enabled: new.enabled,
        })
    }

    /// Applies a partial update and returns the new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown sensor, or
    /// [`StoreError::Validation`] when the updated range is inverted.
    pub fn update_sensor(
        &self,
        sensor_id: &str,
        update: &SensorUpdate,
    ) -> Result<SensorRecord, StoreError> {
        let mut current = self
            .get_sensor(sensor_id)?
            .ok_or(StoreError::NotFound)?;

        if let Some(name) = &update.name {
            current.name = name.clone();
        }
        if let Some(unit) = &update.unit {
            current.unit = unit.clone();
        }
        if let Some(min_value) = update.min_value {
            current.min_value = min_value;
        }
        if let Some(max_value) = update.max_value {
            current.max_value = max_value;
        }
        if let Some(group) = &update.group {
            current.group = group.clone();
        }
        if let Some(sort_order) = update.sort_order {
            current.sort_order = sort_order;
        }
        if let Some(enabled) = update.enabled {
            current.enabled = enabled;
        }
        if current.min_value >= current.max_value {
            return Err(StoreError::Validation(
                "Max value must be greater than min value".into(),
            ));
        }

        let conn = self.lock();
        conn.execute(
            "UPDATE sensors
             SET name = ?2, unit = ?3, min_value = ?4, max_value = ?5,
                 grouping = ?6, sort_order = ?7, enabled = ?8
             WHERE sensor_id = ?1",
            params![
                sensor_id,
                current.name,
                current.unit,
                current.min_value,
                current.max_value,
                current.group,
                current.sort_order,
                current.enabled
            ],
        )?;
        Ok(current)
    }

    /// Deletes a sensor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown sensor.
    pub fn delete_sensor(&self, sensor_id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM sensors WHERE sensor_id = ?1", [sensor_id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Seeds the default channel catalog when the table is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on write failure.
    pub fn seed_default_sensors(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let existing: u64 =
            conn.query_row("SELECT COUNT(*) FROM sensors", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }
        let tx = conn.transaction()?;
        for (i, (sensor_id, name, unit, min, max, group)) in DEFAULT_SENSORS.iter().enumerate() {
            tx.execute(
                "INSERT INTO sensors (sensor_id, name, unit, min_value, max_value, grouping, sort_order, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                params![sensor_id, name, unit, min, max, group, i as i64],
            )?;
        }
        tx.commit()?;
        Ok(DEFAULT_SENSORS.len())
    }
}

fn sensor_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SensorRecord> {
    Ok(SensorRecord {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        min_value: row.get(4)?,
        max_value: row.get(5)?,
        group: row.get(6)?,
        sort_order: row.get(7)?,
        enabled: row.get(8)?,
    })
}
