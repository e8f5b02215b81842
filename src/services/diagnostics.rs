//! Threshold-based crop problem classification.
//!
//! Three independent categories are checked in a fixed order (moisture,
//! nutrients, environment). Within a category the branches are exclusive and
//! the first match wins; across categories every match is reported.

use crate::models::farm::{ProblemDetection, ProblemType, Reading};

pub const DRY_SOIL_BELOW: f64 = 30.0;
pub const WET_SOIL_ABOVE: f64 = 80.0;
pub const NITROGEN_LOW_BELOW: f64 = 30.0;
pub const PHOSPHORUS_LOW_BELOW: f64 = 50.0;
pub const HEAT_STRESS_ABOVE: f64 = 35.0;

pub fn detect(reading: &Reading) -> Vec<ProblemDetection> {
    [moisture(reading), nutrients(reading), environment(reading)]
        .into_iter()
        .flatten()
        .collect()
}

fn moisture(r: &Reading) -> Option<ProblemDetection> {
    if r.soil_moisture < DRY_SOIL_BELOW {
        Some(ProblemDetection {
            problem: ProblemType::WaterStress,
            confidence: 85,
            solution: "Increase irrigation frequency and add organic mulch",
            immediate_action: "Start irrigation pump",
        })
    } else if r.soil_moisture > WET_SOIL_ABOVE {
        Some(ProblemDetection {
            problem: ProblemType::OverWatering,
            confidence: 75,
            solution: "Reduce irrigation frequency and improve drainage",
            immediate_action: "Stop irrigation pump",
        })
    } else {
        None
    }
}

fn nutrients(r: &Reading) -> Option<ProblemDetection> {
    if r.soil_npk < NITROGEN_LOW_BELOW {
        Some(ProblemDetection {
            problem: ProblemType::NitrogenDeficiency,
            confidence: 80,
            solution: "Apply nitrogen-rich fertilizer or organic compost",
            immediate_action: "Add vermicompost or urea",
        })
    } else if r.soil_npk < PHOSPHORUS_LOW_BELOW {
        Some(ProblemDetection {
            problem: ProblemType::PhosphorusDeficiency,
            confidence: 70,
            solution: "Apply phosphorus fertilizers or bone meal",
            immediate_action: "Add DAP or rock phosphate",
        })
    } else {
        None
    }
}

fn environment(r: &Reading) -> Option<ProblemDetection> {
    (r.air_temperature > HEAT_STRESS_ABOVE).then_some(ProblemDetection {
        problem: ProblemType::HeatStress,
        confidence: 65,
        solution: "Provide shade and increase watering frequency",
        immediate_action: "Use shade nets and ensure adequate moisture",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::reading;

    fn kinds(r: &Reading) -> Vec<ProblemType> {
        detect(r).into_iter().map(|p| p.problem).collect()
    }

    #[test]
    fn healthy_reading_has_no_findings() {
        assert!(detect(&reading("u", 55.0)).is_empty());
    }

    #[test]
    fn dry_and_wet_soil() {
        for m in [0.0, 12.5, 29.99] {
            let found = detect(&reading("u", m));
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].problem, ProblemType::WaterStress);
            assert_eq!(found[0].confidence, 85);
        }
        for m in [80.01, 95.0, 140.0] {
            let found = detect(&reading("u", m));
            assert_eq!(found[0].problem, ProblemType::OverWatering);
            assert_eq!(found[0].confidence, 75);
        }
        // both bounds are exclusive
        assert!(detect(&reading("u", 30.0)).is_empty());
        assert!(detect(&reading("u", 80.0)).is_empty());
    }

    #[test]
    fn nutrient_brackets_are_half_open() {
        let mut r = reading("u", 50.0);
        r.soil_npk = 29.9;
        assert_eq!(kinds(&r), vec![ProblemType::NitrogenDeficiency]);
        r.soil_npk = 30.0;
        assert_eq!(kinds(&r), vec![ProblemType::PhosphorusDeficiency]);
        assert_eq!(detect(&r)[0].confidence, 70);
        r.soil_npk = 49.9;
        assert_eq!(kinds(&r), vec![ProblemType::PhosphorusDeficiency]);
        r.soil_npk = 50.0;
        assert!(kinds(&r).is_empty());
    }

    #[test]
    fn categories_fire_together_in_order() {
        let mut r = reading("u", 20.0);
        r.soil_npk = 10.0;
        r.air_temperature = 41.0;
        let found = detect(&r);
        assert_eq!(
            found.iter().map(|p| p.problem).collect::<Vec<_>>(),
            vec![
                ProblemType::WaterStress,
                ProblemType::NitrogenDeficiency,
                ProblemType::HeatStress
            ]
        );
        assert_eq!(found[1].confidence, 80);
        assert_eq!(found[2].confidence, 65);
    }

    #[test]
    fn heat_stress_is_strictly_above_threshold() {
        let mut r = reading("u", 50.0);
        r.air_temperature = 35.0;
        assert!(detect(&r).is_empty());
        r.air_temperature = 35.1;
        assert_eq!(kinds(&r), vec![ProblemType::HeatStress]);
    }
}
