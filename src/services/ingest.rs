//! Ingestion orchestrator: persist readings, run auto-control, answer status
//! queries, and front the command queue for manual callers and device polls.

use crate::models::farm::{CommandType, CropStatus, PendingCommand, Reading, SensorPayload, encode_flag};
use crate::services::{auto_control, diagnostics, health};
use crate::store::{CommandQueue, Deadline, QueueError, StorageError, TelemetryStore};
use chrono::Utc;
use core::fmt;
use log::{debug, error, info};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub enum IngestError {
    /// Missing or mistyped required field. Caller error.
    Malformed(String),
    /// The reading could not be persisted; auto-control did not run.
    StorageFailure(StorageError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Malformed(detail) => write!(f, "malformed reading: {}", detail),
            IngestError::StorageFailure(e) => write!(f, "{}", e),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IngestError::StorageFailure(e) => Some(e),
            IngestError::Malformed(_) => None,
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(value: StorageError) -> Self {
        IngestError::StorageFailure(value)
    }
}

/// Parse a raw sensor-data body, naming the offending field on failure.
pub fn parse_payload(body: &[u8]) -> Result<SensorPayload, IngestError> {
    let de = &mut serde_json::Deserializer::from_slice(body);
    let payload: SensorPayload = serde_path_to_error::deserialize(de).map_err(|e| {
        let path = e.path().to_string();
        if path == "." {
            IngestError::Malformed(e.inner().to_string())
        } else {
            IngestError::Malformed(format!("{}: {}", path, e.inner()))
        }
    })?;
    Ok(payload)
}

pub struct FarmService {
    telemetry: Arc<dyn TelemetryStore>,
    commands: Arc<dyn CommandQueue>,
    default_device_id: String,
    drain_failures: AtomicU64,
}

impl FarmService {
    pub fn new(
        telemetry: Arc<dyn TelemetryStore>,
        commands: Arc<dyn CommandQueue>,
        default_device_id: impl Into<String>,
    ) -> Self {
        FarmService {
            telemetry,
            commands,
            default_device_id: default_device_id.into(),
            drain_failures: AtomicU64::new(0),
        }
    }

    /// Validate and store the reading, then let auto-control react to it.
    ///
    /// Auto-control runs only once the reading is durable, on a fresh budget
    /// of the same length. Its enqueue failure is logged but does not fail
    /// ingestion: the next reading re-evaluates the policy.
    pub fn ingest(&self, payload: SensorPayload, deadline: &Deadline) -> Result<Reading, IngestError> {
        if payload.device_id.trim().is_empty() {
            return Err(IngestError::Malformed("device_id must not be empty".to_string()));
        }
        let reading = payload.into_reading(Utc::now());
        self.telemetry.append(&reading, deadline)?;
        info!(
            "Stored reading from {} (soil_moisture={}, water_level={}, soil_npk={}, air_temperature={})",
            reading.device_id, reading.soil_moisture, reading.water_level, reading.soil_npk, reading.air_temperature
        );

        if let Err(e) = auto_control::apply(self.commands.as_ref(), &reading, &deadline.renewed()) {
            error!("Auto-control for {} failed: {}", reading.device_id, e);
        }
        Ok(reading)
    }

    /// Latest reading with diagnostics and health score, or `None` before any
    /// reading has arrived.
    pub fn current_status(&self, device_id: Option<&str>) -> Result<Option<CropStatus>, StorageError> {
        Ok(self.telemetry.latest(device_id)?.map(|reading| CropStatus {
            detected_problems: diagnostics::detect(&reading),
            overall_health: health::score(&reading),
            sensor_data: reading,
        }))
    }

    /// Manual pump switch. Bypasses auto-control; the latest enqueue wins.
    pub fn set_pump(&self, device_id: Option<&str>, on: bool, deadline: &Deadline) -> Result<String, QueueError> {
        let device = self.resolve_device(device_id);
        self.commands
            .enqueue(&device, CommandType::PumpControl, &encode_flag(on), deadline)?;
        info!("Manual: pump {} for {}", if on { "ON" } else { "OFF" }, device);
        Ok(device)
    }

    pub fn activate_sound(&self, device_id: Option<&str>, deadline: &Deadline) -> Result<String, QueueError> {
        let device = self.resolve_device(device_id);
        self.commands
            .enqueue(&device, CommandType::SoundAlert, &encode_flag(true), deadline)?;
        info!("Manual: sound repellent activated for {}", device);
        Ok(device)
    }

    /// Device poll: hand out and mark the pending commands. When `deadline`
    /// is abandoned nothing is marked and the commands wait for the next poll.
    pub fn poll_commands(&self, device_id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError> {
        let cmds = self.commands.drain(device_id, deadline)?;
        if cmds.is_empty() {
            debug!("No pending commands for {}", device_id);
        } else {
            info!("Sending {} command(s) to {}: {:?}", cmds.len(), device_id, cmds);
        }
        Ok(cmds)
    }

    /// Polls degrade to "no commands" at the HTTP boundary; each failure is
    /// logged and counted here.
    pub fn record_drain_failure(&self, device_id: &str, e: &QueueError) {
        let n = self.drain_failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!("Command drain for {} failed (total failures: {}): {}", device_id, n, e);
    }

    pub fn drain_failures(&self) -> u64 {
        self.drain_failures.load(Ordering::Relaxed)
    }

    fn resolve_device(&self, device_id: Option<&str>) -> String {
        match device_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => self.default_device_id.clone(),
        }
    }
}
