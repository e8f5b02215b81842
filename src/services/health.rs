//! Aggregate 0..=100 crop health score for a single reading.

use crate::models::farm::Reading;
use crate::services::diagnostics::{
    DRY_SOIL_BELOW, HEAT_STRESS_ABOVE, NITROGEN_LOW_BELOW, PHOSPHORUS_LOW_BELOW, WET_SOIL_ABOVE,
};

const PERFECT: i32 = 100;

/// Moisture band that costs nothing. Outside it but within the diagnostic
/// dry/wet limits the deduction is halved.
pub const MOISTURE_BAND_LOW: f64 = 40.0;
pub const MOISTURE_BAND_HIGH: f64 = 70.0;

/// Start at 100 and deduct per factor. Within a factor only the most severe
/// bracket applies; factors add up. Never below zero.
pub fn score(reading: &Reading) -> u8 {
    let deductions = moisture_penalty(reading.soil_moisture)
        + nutrient_penalty(reading.soil_npk)
        + heat_penalty(reading.air_temperature);
    (PERFECT - deductions).clamp(0, PERFECT) as u8
}

fn moisture_penalty(m: f64) -> i32 {
    if !(DRY_SOIL_BELOW..=WET_SOIL_ABOVE).contains(&m) {
        30
    } else if !(MOISTURE_BAND_LOW..=MOISTURE_BAND_HIGH).contains(&m) {
        15
    } else {
        0
    }
}

fn nutrient_penalty(npk: f64) -> i32 {
    if npk < NITROGEN_LOW_BELOW {
        25
    } else if npk < PHOSPHORUS_LOW_BELOW {
        10
    } else {
        0
    }
}

fn heat_penalty(air_temperature: f64) -> i32 {
    if air_temperature > HEAT_STRESS_ABOVE { 10 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::diagnostics::detect;
    use crate::store::fixtures::reading;

    #[test]
    fn healthy_reading_scores_full() {
        assert_eq!(score(&reading("u", 55.0)), 100);
    }

    #[test]
    fn deductions_sum_across_factors() {
        let mut r = reading("u", 25.0);
        r.soil_npk = 20.0;
        r.air_temperature = 40.0;
        assert_eq!(score(&r), 35);
    }

    #[test]
    fn moisture_brackets() {
        let cases = [
            (29.9, 70),
            (30.0, 85),
            (39.9, 85),
            (40.0, 100),
            (70.0, 100),
            (70.1, 85),
            (80.0, 85),
            (80.1, 70),
        ];
        for (m, expected) in cases {
            assert_eq!(score(&reading("u", m)), expected, "moisture {}", m);
        }
    }

    #[test]
    fn moves_away_from_band_never_raise_score() {
        let mut previous = score(&reading("u", 55.0));
        for step in 0..60 {
            let s = score(&reading("u", 70.0 + step as f64));
            assert!(s <= previous);
            previous = s;
        }
        let mut previous = score(&reading("u", 55.0));
        for step in 0..60 {
            let s = score(&reading("u", 40.0 - step as f64));
            assert!(s <= previous);
            previous = s;
        }
    }

    #[test]
    fn worst_case_stays_in_range() {
        let mut r = reading("u", -50.0);
        r.soil_npk = -10.0;
        r.air_temperature = 60.0;
        assert_eq!(score(&r), 35);
        assert!(score(&r) <= 100);
    }

    #[test]
    fn deductions_start_where_diagnostics_fire() {
        let edge = 0.1;
        for m in [DRY_SOIL_BELOW - edge, WET_SOIL_ABOVE + edge] {
            let r = reading("u", m);
            assert_eq!(score(&r), 70, "moisture {}", m);
            assert_eq!(detect(&r).len(), 1, "moisture {}", m);
        }
        for m in [DRY_SOIL_BELOW, WET_SOIL_ABOVE] {
            let r = reading("u", m);
            assert_eq!(score(&r), 85, "moisture {}", m);
            assert!(detect(&r).is_empty(), "moisture {}", m);
        }

        let mut r = reading("u", MOISTURE_BAND_LOW);
        for (npk, expected) in [(NITROGEN_LOW_BELOW - edge, 75), (PHOSPHORUS_LOW_BELOW - edge, 90)] {
            r.soil_npk = npk;
            assert_eq!(score(&r), expected, "npk {}", npk);
            assert_eq!(detect(&r).len(), 1, "npk {}", npk);
        }

        let mut hot = reading("u", MOISTURE_BAND_HIGH);
        hot.air_temperature = HEAT_STRESS_ABOVE + edge;
        assert_eq!(score(&hot), 90);
        assert_eq!(detect(&hot).len(), 1);
    }
}
