//! ==============================================================================
//! classifier.rs - authenticity classification
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     every reading is published for live display. only genuine readings go
//!     to storage, so the stored history stays clean for analytics.
//!
//! rules:
//!     - core fields (soil moisture, main temperature, air humidity) present
//!     - not marked as demo data
//!     - every present value inside its plausible range
//!
//! relationships:
//!     - used by: pipeline.rs
//! ```
//!
//! ==============================================================================

use crate::domain::{Provenance, Reading};
use serde::Serialize;
use std::ops::RangeInclusive;

pub const SOIL_MOISTURE_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const AIR_HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const MAIN_TEMPERATURE_RANGE: RangeInclusive<f64> = -10.0..=50.0;
pub const RAIN_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// why a reading was kept out of storage
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    MissingCoreField { field: &'static str },
    MarkedSynthetic,
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    pub genuine: bool,
    pub rejections: Vec<Rejection>,
}

pub fn classify(reading: &Reading) -> Verdict {
    let f = &reading.fields;
    let mut rejections = Vec::new();

    let core = [
        ("soil_moisture", f.soil_moisture),
        ("temperature_ds", f.temperature_ds),
        ("air_humidity", f.air_humidity),
    ];
    for (field, value) in core {
        if value.is_none() {
            rejections.push(Rejection::MissingCoreField { field });
        }
    }

    if reading.source == Provenance::Demo {
        rejections.push(Rejection::MarkedSynthetic);
    }

    let ranged = [
        ("soil_moisture", f.soil_moisture, SOIL_MOISTURE_RANGE),
        ("air_humidity", f.air_humidity, AIR_HUMIDITY_RANGE),
        ("temperature_ds", f.temperature_ds, MAIN_TEMPERATURE_RANGE),
        ("rain", f.rain, RAIN_RANGE),
    ];
    for (field, value, range) in ranged {
        if let Some(value) = value {
            if !range.contains(&value) {
                rejections.push(Rejection::OutOfRange { field, value });
            }
        }
    }

    Verdict {
        genuine: rejections.is_empty(),
        rejections,
    }
}
