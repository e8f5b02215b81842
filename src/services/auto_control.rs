//! Irrigation decision taken after each stored reading.
//!
//! There is no manual-override lock: the auto decision and manual commands
//! share one queue slot per device and whichever is enqueued last is delivered.

use crate::models::farm::{CommandType, Reading, encode_flag};
use crate::store::{CommandQueue, Deadline, QueueError};
use log::info;

pub const START_BELOW_MOISTURE: f64 = 30.0;
pub const MIN_WATER_LEVEL: f64 = 20.0;
pub const STOP_ABOVE_MOISTURE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDecision {
    Start,
    Stop,
    Hold,
}

pub fn decide(reading: &Reading) -> PumpDecision {
    if reading.soil_moisture < START_BELOW_MOISTURE && reading.water_level > MIN_WATER_LEVEL {
        PumpDecision::Start
    } else if reading.soil_moisture > STOP_ABOVE_MOISTURE {
        PumpDecision::Stop
    } else {
        PumpDecision::Hold
    }
}

/// Decide and, unless holding, enqueue the pump command for the reading's device.
pub fn apply(queue: &dyn CommandQueue, reading: &Reading, deadline: &Deadline) -> Result<PumpDecision, QueueError> {
    let decision = decide(reading);
    let on = match decision {
        PumpDecision::Start => true,
        PumpDecision::Stop => false,
        PumpDecision::Hold => return Ok(decision),
    };
    queue.enqueue(&reading.device_id, CommandType::PumpControl, &encode_flag(on), deadline)?;
    info!(
        "Auto: pump {} for {} (soil_moisture={}, water_level={})",
        if on { "ON" } else { "OFF" },
        reading.device_id,
        reading.soil_moisture,
        reading.water_level
    );
    Ok(decision)
}
