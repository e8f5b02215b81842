//! Storage seams for readings and the per-device command queue.
//!
//! Both traits are synchronous; the HTTP layer moves calls onto the blocking
//! pool and hands each mutating call a [`Deadline`]. `MemoryStore` is the
//! volatile backend used by tests and by `STORAGE_BACKEND=memory`; the Postgres
//! backend lives in `crate::db::postgres`.

use crate::models::farm::{Command, CommandType, PendingCommand, Reading};
use chrono::{SubsecRound, Utc};
use core::fmt;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// I/O failure of the telemetry store.
#[derive(Debug)]
pub enum StorageError {
    /// No connection could be obtained from the backend.
    Connection(String),
    /// The backend rejected or failed the statement.
    Query(String),
    /// The call did not complete within the configured bound.
    Timeout(Duration),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Connection(e) => write!(f, "storage connection failed: {}", e),
            StorageError::Query(e) => write!(f, "storage query failed: {}", e),
            StorageError::Timeout(d) => write!(f, "storage call timed out after {}ms", d.as_millis()),
        }
    }
}

impl Error for StorageError {}

/// Failure to enqueue or drain commands.
#[derive(Debug)]
pub enum QueueError {
    Connection(String),
    Query(String),
    Timeout(Duration),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Connection(e) => write!(f, "command queue connection failed: {}", e),
            QueueError::Query(e) => write!(f, "command queue query failed: {}", e),
            QueueError::Timeout(d) => write!(f, "command queue call timed out after {}ms", d.as_millis()),
        }
    }
}

impl Error for QueueError {}

/// Time budget for one mutating store call, shared between the caller waiting
/// for the result and the worker doing the write.
///
/// The worker [`claim`](Deadline::claim)s the deadline immediately before its
/// effects become visible; the caller [`abandon`](Deadline::abandon)s it when it
/// stops waiting. Whichever comes first decides: an abandoned call never
/// commits, and a claimed call is always waited for.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires: Option<Instant>,
    limit: Duration,
    fate: Arc<Mutex<Fate>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Open,
    Claimed,
    Abandoned,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Deadline {
            expires: Instant::now().checked_add(limit),
            limit,
            fate: Arc::new(Mutex::new(Fate::Open)),
        }
    }

    /// Never expires; for startup work and tests.
    pub fn none() -> Self {
        Deadline {
            expires: None,
            limit: Duration::MAX,
            fate: Arc::new(Mutex::new(Fate::Open)),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left, `None` when unbounded. Zero once expired or abandoned.
    pub fn remaining(&self) -> Option<Duration> {
        if self.fate() == Fate::Abandoned {
            return Some(Duration::ZERO);
        }
        self.expires.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Worker side: take the right to commit. False if the caller gave up or
    /// the time ran out, in which case the worker must leave no trace.
    pub fn claim(&self) -> bool {
        let mut fate = self.fate.lock().unwrap_or_else(PoisonError::into_inner);
        match *fate {
            Fate::Claimed => true,
            Fate::Abandoned => false,
            Fate::Open if self.expired() => {
                *fate = Fate::Abandoned;
                false
            }
            Fate::Open => {
                *fate = Fate::Claimed;
                true
            }
        }
    }

    /// Caller side: stop waiting. False if the worker already claimed, in which
    /// case the caller must wait for its outcome instead.
    pub fn abandon(&self) -> bool {
        let mut fate = self.fate.lock().unwrap_or_else(PoisonError::into_inner);
        match *fate {
            Fate::Claimed => false,
            Fate::Open | Fate::Abandoned => {
                *fate = Fate::Abandoned;
                true
            }
        }
    }

    /// A fresh budget of the same length, for follow-up work after a claim.
    pub fn renewed(&self) -> Deadline {
        match self.expires {
            Some(_) => Deadline::after(self.limit),
            None => Deadline::none(),
        }
    }

    fn expired(&self) -> bool {
        self.expires.is_some_and(|at| Instant::now() >= at)
    }

    fn fate(&self) -> Fate {
        *self.fate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Append-only log of readings.
pub trait TelemetryStore: Send + Sync {
    /// Nothing is stored unless `deadline` could be claimed.
    fn append(&self, reading: &Reading, deadline: &Deadline) -> Result<(), StorageError>;

    /// Most recently appended reading for `device_id`, or across all devices
    /// when `None`.
    fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StorageError>;
}

/// Per-device, per-type pending command slots.
///
/// At most one unexecuted command exists for any `(device_id, command_type)`;
/// enqueueing replaces it. `drain` hands out and marks executed in one step, so
/// concurrent pollers of the same device never both receive a command. Both
/// calls leave the queue untouched when `deadline` cannot be claimed.
pub trait CommandQueue: Send + Sync {
    fn enqueue(
        &self,
        device_id: &str,
        command_type: CommandType,
        value: &str,
        deadline: &Deadline,
    ) -> Result<(), QueueError>;

    /// Unexecuted commands for `device_id` in enqueue order, now marked executed.
    fn drain(&self, device_id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError>;
}

/// Volatile backend. One mutex per collection: drains are serialised for
/// every device, which is stronger than the per-device guarantee required.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    commands: Mutex<CommandLog>,
}

#[derive(Debug, Default)]
struct CommandLog {
    next_id: i64,
    entries: Vec<Command>,
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, String> {
    m.lock().map_err(|_| format!("{} lock poisoned", what))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command ever enqueued for `device_id`, executed ones included.
    #[cfg(test)]
    pub fn command_history(&self, device_id: &str) -> Vec<Command> {
        match self.commands.lock() {
            Ok(log) => log.entries.iter().filter(|c| c.device_id == device_id).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl TelemetryStore for MemoryStore {
    fn append(&self, reading: &Reading, deadline: &Deadline) -> Result<(), StorageError> {
        let mut readings = lock(&self.readings, "readings").map_err(StorageError::Connection)?;
        if !deadline.claim() {
            return Err(StorageError::Timeout(deadline.limit()));
        }
        readings.push(reading.clone());
        Ok(())
    }

    fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StorageError> {
        let readings = lock(&self.readings, "readings").map_err(StorageError::Connection)?;
        let found = match device_id {
            Some(id) => readings.iter().rev().find(|r| r.device_id == id),
            None => readings.last(),
        };
        Ok(found.cloned())
    }
}

impl CommandQueue for MemoryStore {
    fn enqueue(
        &self,
        device_id: &str,
        command_type: CommandType,
        value: &str,
        deadline: &Deadline,
    ) -> Result<(), QueueError> {
        let mut log = lock(&self.commands, "commands").map_err(QueueError::Connection)?;
        if !deadline.claim() {
            return Err(QueueError::Timeout(deadline.limit()));
        }
        log.entries
            .retain(|c| c.executed || c.device_id != device_id || c.command_type != command_type);
        log.next_id += 1;
        let id = log.next_id;
        log.entries.push(Command {
            id,
            device_id: device_id.to_string(),
            command_type,
            value: value.to_string(),
            executed: false,
            created_at: Utc::now().trunc_subsecs(6),
        });
        Ok(())
    }

    fn drain(&self, device_id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError> {
        let mut log = lock(&self.commands, "commands").map_err(QueueError::Connection)?;
        if !deadline.claim() {
            return Err(QueueError::Timeout(deadline.limit()));
        }
        // entries are kept in id order, so this is enqueue order
        let drained = log
            .entries
            .iter_mut()
            .filter(|c| !c.executed && c.device_id == device_id)
            .map(|c| {
                c.executed = true;
                PendingCommand {
                    command_type: c.command_type,
                    command_value: c.value.clone(),
                }
            })
            .collect();
        Ok(drained)
    }
}
