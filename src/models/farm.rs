//! Domain and wire types for the farm telemetry service.
//!
//! `SensorPayload` is what a field unit POSTs; it becomes an immutable `Reading`
//! once the server stamps it. Commands travel the other way as `PendingCommand`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One sensor snapshot from a device, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub soil_moisture: f64,
    pub water_level: f64,
    pub soil_temperature: f64,
    pub air_temperature: f64,
    pub air_humidity: f64,
    pub light_intensity: f64,
    pub co2_level: f64,
    /// Proxy nutrient index, not a percentage.
    pub soil_npk: f64,
    pub pump_status: bool,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /api/sensor-data`. Every field is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorPayload {
    pub device_id: String,
    pub soil_moisture: f64,
    pub water_level: f64,
    pub soil_temperature: f64,
    pub air_temperature: f64,
    pub air_humidity: f64,
    pub light_intensity: f64,
    pub co2_level: f64,
    pub soil_npk: f64,
    #[serde(deserialize_with = "bool_or_int")]
    pub pump_status: bool,
}

impl SensorPayload {
    /// Stamp the payload. Sub-microsecond precision is dropped so the value
    /// survives a trip through a `timestamptz` column unchanged.
    pub fn into_reading(self, received_at: DateTime<Utc>) -> Reading {
        Reading {
            device_id: self.device_id,
            soil_moisture: self.soil_moisture,
            water_level: self.water_level,
            soil_temperature: self.soil_temperature,
            air_temperature: self.air_temperature,
            air_humidity: self.air_humidity,
            light_intensity: self.light_intensity,
            co2_level: self.co2_level,
            soil_npk: self.soil_npk,
            pump_status: self.pump_status,
            timestamp: received_at.trunc_subsecs(6),
        }
    }
}

/// Firmware reports the pump relay either as a JSON bool or as 0/1.
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer) {
        Ok(Flag::Bool(b)) => Ok(b),
        Ok(Flag::Int(i)) => Ok(i != 0),
        Err(_) => Err(serde::de::Error::custom("expected a boolean or an integer")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    PumpControl,
    SoundAlert,
}

/// A queued actuator instruction, including its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: i64,
    pub device_id: String,
    pub command_type: CommandType,
    pub value: String,
    pub executed: bool,
    pub created_at: DateTime<Utc>,
}

/// What a device receives when it polls for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command_type: CommandType,
    pub command_value: String,
}

/// Device firmware parses switch payloads as `True` / `False`.
pub fn encode_flag(on: bool) -> String {
    if on { "True".to_string() } else { "False".to_string() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemType {
    #[serde(rename = "Water Stress")]
    WaterStress,
    #[serde(rename = "Over Watering")]
    OverWatering,
    #[serde(rename = "Nitrogen Deficiency")]
    NitrogenDeficiency,
    #[serde(rename = "Phosphorus Deficiency")]
    PhosphorusDeficiency,
    #[serde(rename = "Heat Stress")]
    HeatStress,
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProblemType::WaterStress => "Water Stress",
            ProblemType::OverWatering => "Over Watering",
            ProblemType::NitrogenDeficiency => "Nitrogen Deficiency",
            ProblemType::PhosphorusDeficiency => "Phosphorus Deficiency",
            ProblemType::HeatStress => "Heat Stress",
        };
        f.write_str(name)
    }
}

/// A classified crop problem. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemDetection {
    #[serde(rename = "type")]
    pub problem: ProblemType,
    /// 0..=100, engine-assigned, not calibrated.
    pub confidence: u8,
    pub solution: &'static str,
    pub immediate_action: &'static str,
}

/// Latest reading with everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropStatus {
    pub sensor_data: Reading,
    pub detected_problems: Vec<ProblemDetection>,
    pub overall_health: u8,
}
