// tests/classifier_prop.rs
//! Property tests for severity classification

use proptest::prelude::*;
use vitalguard::{Classifier, Reading, Severity, VitalBands, VitalType};

fn vital() -> impl Strategy<Value = VitalType> {
    prop_oneof![
        Just(VitalType::Temperature),
        Just(VitalType::HeartRate),
        Just(VitalType::SpO2),
    ]
}

fn reading_for(vital: VitalType, value: f64) -> Reading {
    match vital {
        VitalType::Temperature => Reading::temperature(value),
        VitalType::HeartRate => Reading::heart_rate(value),
        VitalType::SpO2 => Reading::spo2(value),
        VitalType::BloodGlucose => Reading::blood_glucose(value),
    }
}

/// Distance from the normal range, zero inside it
fn deviation(bands: &VitalBands, value: f64) -> f64 {
    let below = bands.normal_low.map_or(0.0, |low| (low - value).max(0.0));
    let above = bands.normal_high.map_or(0.0, |high| (value - high).max(0.0));
    below.max(above)
}

proptest! {
    #[test]
    fn severity_never_drops_as_values_move_away_from_normal(
        vital in vital(),
        a in 0.0f64..300.0,
        b in 0.0f64..300.0,
    ) {
        let bands = VitalBands::defaults_for(vital).unwrap();
        let (near, far) = if deviation(&bands, a) <= deviation(&bands, b) { (a, b) } else { (b, a) };

        // only compare values on the same side of the normal range
        let same_side = match (bands.normal_low, bands.normal_high) {
            (Some(low), Some(high)) => (near <= high && far <= high) || (near >= low && far >= low),
            _ => true,
        };
        prop_assume!(same_side);

        prop_assert!(bands.classify(near) <= bands.classify(far));
    }

    #[test]
    fn aggregate_is_the_maximum_of_the_parts(
        values in prop::collection::vec((vital(), 1.0f64..300.0), 0..12),
    ) {
        let classifier = Classifier::default();
        let readings: Vec<Reading> = values
            .iter()
            .map(|(vital, value)| reading_for(*vital, *value))
            .collect();

        let expected = readings
            .iter()
            .filter_map(|r| classifier.classify_reading(r))
            .max()
            .unwrap_or(Severity::Stable);

        let assessment = classifier.assess(readings.iter());
        prop_assert_eq!(assessment.severity, expected);
        prop_assert_eq!(assessment.triggers.is_empty(), expected == Severity::Stable);
    }

    #[test]
    fn adding_a_stable_reading_never_lowers_severity(
        vital in vital(),
        value in 1.0f64..300.0,
    ) {
        let classifier = Classifier::default();
        let alarming = reading_for(vital, value);
        let calm = Reading::spo2(98.0);

        let alone = classifier.assess(std::iter::once(&alarming)).severity;
        let together = classifier.assess([&alarming, &calm]).severity;
        prop_assert_eq!(alone, together);
    }
}
