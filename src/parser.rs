//! ==============================================================================
//! parser.rs - sensor line parser
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     turns one framed line into typed field values. the node firmware has
//!     shipped two layouts over time:
//!
//!         HS:85% | T1:24.5C | T2:25.2C | P:1013hPa | HA:68.4% | ...   (multi-field)
//!         T1:24.5C                                                   (single-field)
//!
//!     anything else the device prints (boot banners, wifi diagnostics, ...)
//!     parses to an empty result and is dropped by the caller without fuss.
//!
//! relationships:
//!     - used by: pipeline.rs
//!     - produces: domain::SensorFields
//! ```
//!
//! ==============================================================================

use crate::domain::{Field, FieldValue, Provenance, SensorFields};

/// the ds18b20 reports this when the sensor is unplugged
pub const DISCONNECTED_SENSOR_C: f64 = -127.0;

/// highest node index the gateway firmware assigns
pub const MAX_NODE: u8 = 3;

/// everything one line contributed to the aggregation window
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedLine {
    pub fields: SensorFields,
    /// `Src:demo` / `Src:real` marker, if the line carried one
    pub source: Option<Provenance>,
    /// `Node:N` marker, if the line carried one
    pub node: Option<u8>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.source.is_none() && self.node.is_none()
    }
}

/// parse one line; an empty result means "not sensor data"
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    let mut parsed = ParsedLine::default();
    if line.is_empty() {
        return parsed;
    }

    if line.contains('|') {
        for segment in line.split('|') {
            apply_pair(&mut parsed, segment);
        }
    } else {
        apply_pair(&mut parsed, line);
    }
    parsed
}

fn apply_pair(parsed: &mut ParsedLine, pair: &str) {
    let Some((key, value)) = pair.split_once(':') else {
        return;
    };
    let value = value.trim();

    match key.trim().to_ascii_uppercase().as_str() {
        "SRC" | "SOURCE" => parsed.source = parse_source(value),
        "NODE" | "N" => {
            if let Some(node) = parse_int(value)
                .and_then(|n| u8::try_from(n).ok())
                .filter(|n| *n <= MAX_NODE)
            {
                parsed.node = Some(node);
            }
        }
        _ => {
            if let Some(field) = Field::from_wire_key(key) {
                if let Some(v) = convert(field, value) {
                    parsed.fields.set(field, v);
                }
            }
        }
    }
}

/// apply the per-field conversion rule, then the sentinel filter
fn convert(field: Field, raw: &str) -> Option<FieldValue> {
    let value = match field {
        Field::SoilMoisture
        | Field::TemperatureDs
        | Field::TemperatureBme
        | Field::AirHumidity
        | Field::Rain => FieldValue::Float(parse_float(raw)?),
        Field::Pressure | Field::Light => FieldValue::Integer(parse_int(raw)?),
        Field::RainDigital => FieldValue::Flag(parse_flag(raw)),
    };
    if is_sentinel(field, value) {
        tracing::debug!("[PARSER] dropping sentinel {:?} for {}", value, field.name());
        return None;
    }
    Some(value)
}

fn is_sentinel(field: Field, value: FieldValue) -> bool {
    match (field, value) {
        (Field::TemperatureDs | Field::TemperatureBme, FieldValue::Float(t)) => {
            t <= DISCONNECTED_SENSOR_C
        }
        (Field::Light, FieldValue::Integer(lux)) => lux < 0,
        _ => false,
    }
}

/// leading decimal number, so unit suffixes (`%`, `C`, `hPa`, `lx`) fall away
fn parse_float(raw: &str) -> Option<f64> {
    let bytes = raw.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > frac_start {
            has_digits = true;
            end = frac_end;
        }
    }
    if !has_digits {
        return None;
    }
    raw[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// leading integer part (`1013.6hPa` -> 1013)
fn parse_int(raw: &str) -> Option<i64> {
    let bytes = raw.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    raw[..end].parse::<i64>().ok()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_uppercase().as_str(),
        "SI" | "SÍ" | "YES" | "TRUE" | "1"
    )
}

fn parse_source(raw: &str) -> Option<Provenance> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "demo" | "sim" | "simulated" | "synthetic" => Some(Provenance::Demo),
        "real" | "real_sensor" | "sensor" => Some(Provenance::RealSensor),
        _ => None,
    }
}
