//! Diesel row structs for `sensor_readings` and `commands`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::models::farm::{Command, CommandType, Reading};
use crate::schema;
use crate::utils::{serde_enum_from_name, serde_enum_name};

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::sensor_readings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SensorReadingRow {
    pub id: i64,
    pub device_id: String,
    pub soil_moisture: f64,
    pub water_level: f64,
    pub soil_temperature: f64,
    pub air_temperature: f64,
    pub air_humidity: f64,
    pub light_intensity: f64,
    pub co2_level: f64,
    pub soil_npk: f64,
    pub pump_status: bool,
    pub recorded_at: DateTime<Utc>,
}

impl From<SensorReadingRow> for Reading {
    fn from(row: SensorReadingRow) -> Self {
        Reading {
            device_id: row.device_id,
            soil_moisture: row.soil_moisture,
            water_level: row.water_level,
            soil_temperature: row.soil_temperature,
            air_temperature: row.air_temperature,
            air_humidity: row.air_humidity,
            light_intensity: row.light_intensity,
            co2_level: row.co2_level,
            soil_npk: row.soil_npk,
            pump_status: row.pump_status,
            timestamp: row.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::sensor_readings)]
pub struct NewSensorReading<'a> {
    pub device_id: &'a str,
    pub soil_moisture: f64,
    pub water_level: f64,
    pub soil_temperature: f64,
    pub air_temperature: f64,
    pub air_humidity: f64,
    pub light_intensity: f64,
    pub co2_level: f64,
    pub soil_npk: f64,
    pub pump_status: bool,
    pub recorded_at: DateTime<Utc>,
}

impl<'a> From<&'a Reading> for NewSensorReading<'a> {
    fn from(r: &'a Reading) -> Self {
        NewSensorReading {
            device_id: &r.device_id,
            soil_moisture: r.soil_moisture,
            water_level: r.water_level,
            soil_temperature: r.soil_temperature,
            air_temperature: r.air_temperature,
            air_humidity: r.air_humidity,
            light_intensity: r.light_intensity,
            co2_level: r.co2_level,
            soil_npk: r.soil_npk,
            pump_status: r.pump_status,
            recorded_at: r.timestamp,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::commands)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CommandRow {
    pub id: i64,
    pub device_id: String,
    pub command_type: String,
    pub command_value: String,
    pub executed: bool,
    pub created_at: DateTime<Utc>,
}

impl CommandRow {
    /// `None` when the stored type name is not one this build knows.
    pub fn into_command(self) -> Option<Command> {
        let command_type = serde_enum_from_name::<CommandType>(&self.command_type)?;
        Some(Command {
            id: self.id,
            device_id: self.device_id,
            command_type,
            value: self.command_value,
            executed: self.executed,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::commands)]
pub struct NewCommand<'a> {
    pub device_id: &'a str,
    pub command_type: String,
    pub command_value: &'a str,
    pub executed: bool,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewCommand<'a> {
    pub fn pending(device_id: &'a str, command_type: CommandType, command_value: &'a str, created_at: DateTime<Utc>) -> Self {
        NewCommand {
            device_id,
            command_type: command_type_name(command_type),
            command_value,
            executed: false,
            created_at,
        }
    }
}

/// Column value for a command type (`pump_control`, `sound_alert`).
pub fn command_type_name(command_type: CommandType) -> String {
    serde_enum_name(&command_type).unwrap_or_default()
}
