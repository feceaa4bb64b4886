//! ==============================================================================
//! domain.rs - readings and their fields
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     the types every stage agrees on: the eight canonical fields, a
//!     partially filled field set, provenance, the flushed reading and the
//!     stored record (reading plus store-assigned id).
//!
//! relationships:
//!     - produced by: parser.rs (fields), aggregator.rs (readings)
//!     - consumed by: classifier.rs, storage/, publisher payloads, server.rs
//! ```
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

// ==============================================================================
// canonical fields
// ==============================================================================

/// one of the eight measurements the node reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    SoilMoisture,
    TemperatureDs,
    TemperatureBme,
    Pressure,
    AirHumidity,
    Light,
    Rain,
    RainDigital,
}

impl Field {
    /// the completeness set: a window holding all of these flushes at once
    pub const ALL: [Field; 8] = [
        Field::SoilMoisture,
        Field::TemperatureDs,
        Field::TemperatureBme,
        Field::Pressure,
        Field::AirHumidity,
        Field::Light,
        Field::Rain,
        Field::RainDigital,
    ];

    /// map a wire key (case-insensitive) to its field
    pub fn from_wire_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_uppercase().as_str() {
            "HS" => Some(Field::SoilMoisture),
            "T1" => Some(Field::TemperatureDs),
            "T2" => Some(Field::TemperatureBme),
            "P" => Some(Field::Pressure),
            "HA" => Some(Field::AirHumidity),
            "LUX" => Some(Field::Light),
            "RAIN" => Some(Field::Rain),
            "ALERT" => Some(Field::RainDigital),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::SoilMoisture => "soil_moisture",
            Field::TemperatureDs => "temperature_ds",
            Field::TemperatureBme => "temperature_bme",
            Field::Pressure => "pressure",
            Field::AirHumidity => "air_humidity",
            Field::Light => "light",
            Field::Rain => "rain",
            Field::RainDigital => "rain_digital",
        }
    }
}

/// typed value of a single field
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Flag(bool),
}

// ==============================================================================
// sensor fields - explicit presence per canonical field
// ==============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFields {
    /// soil moisture (0-100%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    /// ds18b20 temperature in celsius, the main temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_ds: Option<f64>,
    /// ambient temperature in celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_bme: Option<f64>,
    /// barometric pressure in hPa
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<i64>,
    /// relative air humidity (0-100%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_humidity: Option<f64>,
    /// illuminance in lux
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<i64>,
    /// rain sensor wetness (0-100%)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,
    /// digital rain/alert output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rain_digital: Option<bool>,
}

impl SensorFields {
    /// store a value, ignoring values whose type does not fit the field
    pub fn set(&mut self, field: Field, value: FieldValue) {
        match (field, value) {
            (Field::SoilMoisture, FieldValue::Float(v)) => self.soil_moisture = Some(v),
            (Field::TemperatureDs, FieldValue::Float(v)) => self.temperature_ds = Some(v),
            (Field::TemperatureBme, FieldValue::Float(v)) => self.temperature_bme = Some(v),
            (Field::Pressure, FieldValue::Integer(v)) => self.pressure = Some(v),
            (Field::AirHumidity, FieldValue::Float(v)) => self.air_humidity = Some(v),
            (Field::Light, FieldValue::Integer(v)) => self.light = Some(v),
            (Field::Rain, FieldValue::Float(v)) => self.rain = Some(v),
            (Field::RainDigital, FieldValue::Flag(v)) => self.rain_digital = Some(v),
            _ => {}
        }
    }

    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::SoilMoisture => self.soil_moisture.is_some(),
            Field::TemperatureDs => self.temperature_ds.is_some(),
            Field::TemperatureBme => self.temperature_bme.is_some(),
            Field::Pressure => self.pressure.is_some(),
            Field::AirHumidity => self.air_humidity.is_some(),
            Field::Light => self.light.is_some(),
            Field::Rain => self.rain.is_some(),
            Field::RainDigital => self.rain_digital.is_some(),
        }
    }

    /// overlay `other` on top of self; present values in `other` win
    pub fn merge(&mut self, other: &SensorFields) {
        macro_rules! overlay {
            ($($name:ident),*) => {
                $( if other.$name.is_some() { self.$name = other.$name; } )*
            };
        }
        overlay!(
            soil_moisture,
            temperature_ds,
            temperature_bme,
            pressure,
            air_humidity,
            light,
            rain,
            rain_digital
        );
    }

    pub fn present_count(&self) -> usize {
        Field::ALL.iter().filter(|f| self.has(**f)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }

    pub fn is_complete(&self) -> bool {
        Field::ALL.iter().all(|f| self.has(*f))
    }
}

// ==============================================================================
// readings
// ==============================================================================

/// where a reading came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    RealSensor,
    Demo,
}

/// a flushed reading: fields plus flush-time timestamp and provenance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(flatten)]
    pub fields: SensorFields,
    /// index of the sending node (0-3)
    #[serde(default)]
    pub node: u8,
    /// flush time in milliseconds since the unix epoch
    pub timestamp_ms: u64,
    pub source: Provenance,
}

/// a reading owned by a store, with the id that store assigned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(flatten)]
    pub reading: Reading,
}

/// current wall clock in milliseconds (unix epoch)
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
