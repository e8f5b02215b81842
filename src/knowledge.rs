//! Read-only reference table of known crop problems.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropProblem {
    pub id: u32,
    pub problem_type: &'static str,
    pub symptoms: &'static str,
    pub causes: &'static str,
    pub solutions: &'static str,
    pub pesticides: &'static str,
    pub organic_remedies: &'static str,
}

pub static CROP_PROBLEMS: [CropProblem; 7] = [
    CropProblem {
        id: 1,
        problem_type: "Nitrogen Deficiency",
        symptoms: "Yellowing of older leaves, stunted growth",
        causes: "Poor soil fertility, inadequate fertilization",
        solutions: "Apply nitrogen-rich fertilizers, use legume cover crops",
        pesticides: "Urea (100-150 kg/ha), Ammonium Sulfate",
        organic_remedies: "Vermicompost, neem cake, cow dung manure",
    },
    CropProblem {
        id: 2,
        problem_type: "Phosphorus Deficiency",
        symptoms: "Purple or reddish leaves, poor root development",
        causes: "Acidic soil, cold temperatures, compacted soil",
        solutions: "Apply phosphorus fertilizers, maintain soil pH 6-7",
        pesticides: "DAP (60-80 kg/ha), SSP",
        organic_remedies: "Bone meal, rock phosphate, compost",
    },
    CropProblem {
        id: 3,
        problem_type: "Potassium Deficiency",
        symptoms: "Yellow leaf margins, weak stems",
        causes: "Sandy soil, excessive leaching, imbalanced fertilization",
        solutions: "Apply potassium fertilizers, improve organic matter",
        pesticides: "MOP (40-60 kg/ha), Potassium Sulfate",
        organic_remedies: "Wood ash, banana peels, compost",
    },
    CropProblem {
        id: 4,
        problem_type: "Water Stress",
        symptoms: "Wilting leaves, dry soil, slow growth",
        causes: "Insufficient irrigation, high temperature, poor water retention",
        solutions: "Increase irrigation frequency, add mulch, improve soil organic matter",
        pesticides: "Not applicable",
        organic_remedies: "Mulching, water conservation techniques, organic matter addition",
    },
    CropProblem {
        id: 5,
        problem_type: "Over Watering",
        symptoms: "Yellow leaves, root rot, fungal growth",
        causes: "Excessive irrigation, poor drainage",
        solutions: "Reduce watering frequency, improve soil drainage",
        pesticides: "Not applicable",
        organic_remedies: "Improve drainage, add organic matter",
    },
    CropProblem {
        id: 6,
        problem_type: "Aphid Infestation",
        symptoms: "Curled leaves, sticky residue, stunted growth",
        causes: "Soft-bodied insects sucking plant sap",
        solutions: "Use insecticidal soap, introduce beneficial insects",
        pesticides: "Imidacloprid (0.5 ml/L), Acetamiprid",
        organic_remedies: "Neem oil spray, garlic-chili solution, ladybugs",
    },
    CropProblem {
        id: 7,
        problem_type: "Fungal Infection",
        symptoms: "White powdery substance, leaf spots, rot",
        causes: "High humidity, poor air circulation, contaminated soil",
        solutions: "Improve ventilation, remove affected parts, apply fungicide",
        pesticides: "Carbendazim (1g/L), Copper oxychloride",
        organic_remedies: "Baking soda solution, neem oil, proper spacing",
    },
];

/// Entries whose `problem_type` contains `query`, ignoring case. An empty
/// query returns everything.
pub fn lookup(query: &str) -> Vec<&'static CropProblem> {
    let needle = query.trim().to_lowercase();
    CROP_PROBLEMS
        .iter()
        .filter(|p| needle.is_empty() || p.problem_type.to_lowercase().contains(&needle))
        .collect()
}
