// src/reading.rs - Vital-sign readings
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use uuid::Uuid;

/// Kind of physiological observation carried by a [`Reading`]
///
/// The serialized names accept both the snake_case form used in
/// configuration files and the upper-case log type names emitted by the
/// logging front end (`HEART_RATE`, `SPO2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VitalType {
    #[serde(rename = "temperature", alias = "TEMPERATURE")]
    Temperature,
    #[serde(rename = "heart_rate", alias = "HEART_RATE")]
    HeartRate,
    #[serde(rename = "spo2", alias = "SPO2")]
    SpO2,
    #[serde(rename = "blood_glucose", alias = "BLOOD_GLUCOSE")]
    BloodGlucose,
}

impl VitalType {
    /// Every vital type the engine knows how to classify
    pub const ALL: [VitalType; 4] = [
        VitalType::Temperature,
        VitalType::HeartRate,
        VitalType::SpO2,
        VitalType::BloodGlucose,
    ];

    /// Human-readable label used in banners and escalation messages
    pub fn label(&self) -> &'static str {
        match self {
            VitalType::Temperature => "Temperature",
            VitalType::HeartRate => "Heart rate",
            VitalType::SpO2 => "SpO2",
            VitalType::BloodGlucose => "Blood glucose",
        }
    }

    /// Engineering unit of the primary value
    pub fn unit(&self) -> &'static str {
        match self {
            VitalType::Temperature => "°C",
            VitalType::HeartRate => "bpm",
            VitalType::SpO2 => "%",
            VitalType::BloodGlucose => "mg/dL",
        }
    }

    /// Range a physical measurement can actually take.
    ///
    /// Anything outside it is a sensor or entry fault and is treated as an
    /// absent value rather than as a clinical extreme.
    pub fn plausible_range(&self) -> RangeInclusive<f64> {
        match self {
            VitalType::Temperature => 25.0..=45.0,
            VitalType::HeartRate => 1.0..=350.0,
            VitalType::SpO2 => 0.0..=100.0,
            VitalType::BloodGlucose => 1.0..=1500.0,
        }
    }
}

impl fmt::Display for VitalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Measured value(s), discriminated by vital type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VitalPayload {
    #[serde(rename = "temperature", alias = "TEMPERATURE")]
    Temperature { celsius: f64 },
    #[serde(rename = "heart_rate", alias = "HEART_RATE")]
    HeartRate { bpm: f64 },
    #[serde(rename = "spo2", alias = "SPO2")]
    SpO2 { percent: f64 },
    #[serde(rename = "blood_glucose", alias = "BLOOD_GLUCOSE")]
    BloodGlucose { mg_dl: f64 },
}

impl VitalPayload {
    /// Discriminant of this payload
    pub fn vital_type(&self) -> VitalType {
        match self {
            VitalPayload::Temperature { .. } => VitalType::Temperature,
            VitalPayload::HeartRate { .. } => VitalType::HeartRate,
            VitalPayload::SpO2 { .. } => VitalType::SpO2,
            VitalPayload::BloodGlucose { .. } => VitalType::BloodGlucose,
        }
    }

    /// Primary value exactly as recorded
    pub fn raw_value(&self) -> f64 {
        match *self {
            VitalPayload::Temperature { celsius } => celsius,
            VitalPayload::HeartRate { bpm } => bpm,
            VitalPayload::SpO2 { percent } => percent,
            VitalPayload::BloodGlucose { mg_dl } => mg_dl,
        }
    }

    /// Primary value if it is usable for classification
    ///
    /// Returns `None` for non-finite values and values outside the vital's
    /// plausible range.
    pub fn value(&self) -> Option<f64> {
        let raw = self.raw_value();
        if raw.is_finite() && self.vital_type().plausible_range().contains(&raw) {
            Some(raw)
        } else {
            None
        }
    }
}

/// A single timestamped vital-sign observation
///
/// Readings are immutable once built: all fields are private and only
/// exposed through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,

    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,

    #[serde(flatten)]
    payload: VitalPayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Reading {
    /// Create a reading stamped with the current time
    pub fn new(payload: VitalPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Create a reading with an explicit observation time
    pub fn at(payload: VitalPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            payload,
            note: None,
        }
    }

    /// Parse one JSON-lines record
    ///
    /// `id` and `timestamp` are filled in when the record omits them.
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn temperature(celsius: f64) -> Self {
        Self::new(VitalPayload::Temperature { celsius })
    }

    pub fn heart_rate(bpm: f64) -> Self {
        Self::new(VitalPayload::HeartRate { bpm })
    }

    pub fn spo2(percent: f64) -> Self {
        Self::new(VitalPayload::SpO2 { percent })
    }

    pub fn blood_glucose(mg_dl: f64) -> Self {
        Self::new(VitalPayload::BloodGlucose { mg_dl })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &VitalPayload {
        &self.payload
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn vital_type(&self) -> VitalType {
        self.payload.vital_type()
    }

    /// Classifiable value, `None` when the reading is malformed
    pub fn value(&self) -> Option<f64> {
        self.payload.value()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vital = self.vital_type();
        write!(f, "{}: {} {}", vital, self.payload.raw_value(), vital.unit())
    }
}
