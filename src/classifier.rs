// File: src/classifier.rs
// Severity classification of the latest vital-sign readings
//
// Each monitored vital type carries two widening bands around its normal
// range. A value outside the normal range is a Warning, a value beyond the
// emergency limits is an Emergency. The aggregate is the maximum across all
// monitored vitals.

use crate::error::{Result, VitalError};
use crate::reading::{Reading, VitalType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

// ==========================================
// SECTION 1: SEVERITY LEVELS
// ==========================================

/// Ordered severity of a vital-sign deviation
///
/// The derived ordering is the clinical one: `Stable < Warning < Emergency`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Inside the normal range, or no usable reading
    #[default]
    Stable,

    /// Inner deviation from the normal range
    Warning,

    /// Outer/extreme deviation
    Emergency,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Stable => "Stable",
            Severity::Warning => "Warning",
            Severity::Emergency => "Emergency",
        }
    }

    /// True for every level that should sound the alarm
    pub fn is_alarming(&self) -> bool {
        *self != Severity::Stable
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ==========================================
// SECTION 2: PER-VITAL BANDS
// ==========================================

/// Normal range and emergency limits for one vital type
///
/// Every limit is optional so one-sided vitals (SpO2 has no upper limit)
/// can be expressed. Comparisons are strict unless `emergency_inclusive` is
/// set, in which case a value sitting exactly on an emergency limit is
/// already an Emergency. Normal limits are always strict.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VitalBands {
    #[serde(default)]
    pub normal_low: Option<f64>,

    #[serde(default)]
    pub normal_high: Option<f64>,

    #[serde(default)]
    pub emergency_low: Option<f64>,

    #[serde(default)]
    pub emergency_high: Option<f64>,

    /// Emergency limits include their boundary value
    #[serde(default)]
    pub emergency_inclusive: bool,
}

impl VitalBands {
    /// Product defaults for a vital type, `None` when unmonitored by default
    pub fn defaults_for(vital: VitalType) -> Option<Self> {
        match vital {
            VitalType::Temperature => Some(Self {
                normal_low: Some(36.0),
                normal_high: Some(37.8),
                emergency_low: Some(35.0),
                emergency_high: Some(39.5),
                emergency_inclusive: true,
            }),
            VitalType::HeartRate => Some(Self {
                normal_low: Some(90.0),
                normal_high: Some(165.0),
                emergency_low: Some(70.0),
                emergency_high: Some(185.0),
                emergency_inclusive: false,
            }),
            VitalType::SpO2 => Some(Self {
                normal_low: Some(94.0),
                normal_high: None,
                emergency_low: Some(90.0),
                emergency_high: None,
                emergency_inclusive: false,
            }),
            VitalType::BloodGlucose => None,
        }
    }

    /// Classify a single value against these bands
    pub fn classify(&self, value: f64) -> Severity {
        let below = |limit: Option<f64>| limit.map_or(false, |l| value < l);
        let above = |limit: Option<f64>| limit.map_or(false, |h| value > h);
        let at = |limit: Option<f64>| self.emergency_inclusive && limit == Some(value);

        let emergency = below(self.emergency_low)
            || above(self.emergency_high)
            || at(self.emergency_low)
            || at(self.emergency_high);

        if emergency {
            Severity::Emergency
        } else if below(self.normal_low) || above(self.normal_high) {
            Severity::Warning
        } else {
            Severity::Stable
        }
    }

    /// Check that the bands widen outwards
    ///
    /// Required ordering: `emergency_low <= normal_low <= normal_high <=
    /// emergency_high` for every pair of limits that is present.
    pub fn validate(&self, vital: VitalType) -> Result<()> {
        let limits = [
            ("emergency_low", self.emergency_low),
            ("normal_low", self.normal_low),
            ("normal_high", self.normal_high),
            ("emergency_high", self.emergency_high),
        ];

        for (name, limit) in limits.iter() {
            if let Some(v) = limit {
                if !v.is_finite() {
                    return Err(VitalError::Config(format!(
                        "{} limit '{}' must be finite, got {}",
                        vital, name, v
                    )));
                }
            }
        }

        let present: Vec<(&str, f64)> = limits
            .iter()
            .filter_map(|(name, limit)| limit.map(|v| (*name, v)))
            .collect();

        for pair in present.windows(2) {
            let (lower_name, lower) = pair[0];
            let (upper_name, upper) = pair[1];
            if lower > upper {
                return Err(VitalError::Config(format!(
                    "{} bands must widen outwards: {} ({}) > {} ({})",
                    vital, lower_name, lower, upper_name, upper
                )));
            }
        }

        if present.is_empty() {
            return Err(VitalError::Config(format!(
                "{} is monitored but has no limits configured",
                vital
            )));
        }

        Ok(())
    }
}

/// Default band table used by [`crate::config::Config::default`]
pub fn default_bands() -> BTreeMap<VitalType, VitalBands> {
    VitalType::ALL
        .iter()
        .filter_map(|vital| VitalBands::defaults_for(*vital).map(|b| (*vital, b)))
        .collect()
}

// ==========================================
// SECTION 3: AGGREGATE ASSESSMENT
// ==========================================

/// Result of one classification pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Assessment {
    /// Maximum severity across all monitored vitals
    pub severity: Severity,

    /// Severity of every monitored vital that had a usable latest reading
    pub per_vital: BTreeMap<VitalType, Severity>,

    /// Vitals whose severity equals the aggregate (empty when Stable)
    pub triggers: Vec<VitalType>,
}

/// Pure severity classifier over the latest reading of each vital type
#[derive(Debug, Clone)]
pub struct Classifier {
    bands: BTreeMap<VitalType, VitalBands>,
}

impl Classifier {
    pub fn new(bands: BTreeMap<VitalType, VitalBands>) -> Self {
        Self { bands }
    }

    /// Vital types that contribute to the aggregate
    pub fn monitored(&self) -> impl Iterator<Item = VitalType> + '_ {
        self.bands.keys().copied()
    }

    pub fn bands(&self, vital: VitalType) -> Option<&VitalBands> {
        self.bands.get(&vital)
    }

    /// Per-vital severity of one reading
    ///
    /// `None` when the vital is not monitored or the reading carries no
    /// usable value; both cases are "no contribution".
    pub fn classify_reading(&self, reading: &Reading) -> Option<Severity> {
        let bands = self.bands.get(&reading.vital_type())?;
        let value = reading.value()?;
        Some(bands.classify(value))
    }

    /// Aggregate severity of a set of latest readings
    ///
    /// The caller passes at most one reading per vital type (the latest);
    /// if several are passed for the same type the most severe wins, which
    /// keeps the result a maximum.
    pub fn assess<'a, I>(&self, latest: I) -> Assessment
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let mut per_vital: BTreeMap<VitalType, Severity> = BTreeMap::new();

        for reading in latest {
            match self.classify_reading(reading) {
                Some(severity) => {
                    let entry = per_vital.entry(reading.vital_type()).or_default();
                    *entry = (*entry).max(severity);
                }
                None => {
                    trace!("No contribution from {} reading {}", reading.vital_type(), reading.id());
                }
            }
        }

        let severity = per_vital.values().copied().max().unwrap_or_default();
        let triggers = if severity.is_alarming() {
            per_vital
                .iter()
                .filter(|(_, s)| **s == severity)
                .map(|(vital, _)| *vital)
                .collect()
        } else {
            Vec::new()
        };

        Assessment {
            severity,
            per_vital,
            triggers,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_bands())
    }
}

// ==========================================
// SECTION 4: TESTS
// ==========================================
