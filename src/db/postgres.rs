//! Postgres backend for the telemetry store and command queue.

use crate::db::models::{CommandRow, NewCommand, NewSensorReading, SensorReadingRow, command_type_name};
use crate::models::farm::{CommandType, PendingCommand, Reading};
use crate::schema;
use crate::store::{CommandQueue, Deadline, QueueError, StorageError, TelemetryStore};
use chrono::{SubsecRound, Utc};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::Text;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{info, warn};
use std::time::Duration;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

pub struct PgStore {
    pool: PgPool,
}

/// Why a bounded transaction did not commit.
#[derive(Debug)]
enum TxError {
    Connection(String),
    Db(diesel::result::Error),
    /// The deadline passed or was abandoned; everything was rolled back.
    Expired,
}

impl From<diesel::result::Error> for TxError {
    fn from(value: diesel::result::Error) -> Self {
        TxError::Db(value)
    }
}

impl TxError {
    fn timed_out(&self) -> bool {
        match self {
            TxError::Expired => true,
            // SQLSTATE 57014, raised by statement_timeout
            TxError::Db(diesel::result::Error::DatabaseError(_, info)) => {
                info.message().contains("statement timeout")
            }
            _ => false,
        }
    }

    fn into_storage(self, deadline: &Deadline, what: &str) -> StorageError {
        match self {
            e if e.timed_out() => StorageError::Timeout(deadline.limit()),
            TxError::Connection(e) => StorageError::Connection(e),
            TxError::Db(e) => StorageError::Query(format!("{} failed: {}", what, e)),
            TxError::Expired => StorageError::Timeout(deadline.limit()),
        }
    }

    fn into_queue(self, deadline: &Deadline, what: &str) -> QueueError {
        match self {
            e if e.timed_out() => QueueError::Timeout(deadline.limit()),
            TxError::Connection(e) => QueueError::Connection(e),
            TxError::Db(e) => QueueError::Query(format!("{} failed: {}", what, e)),
            TxError::Expired => QueueError::Timeout(deadline.limit()),
        }
    }
}

impl PgStore {
    /// `acquire_timeout` bounds how long a request waits for a free connection.
    pub fn connect(database_url: &str, pool_size: u32, acquire_timeout: Duration) -> Result<Self, String> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(acquire_timeout)
            .build(manager)
            .map_err(|e| format!("DB connection failed: {}", e))?;
        Ok(PgStore { pool })
    }

    pub fn apply_migrations(&self) -> Result<(), String> {
        let mut pooled = self
            .pool
            .get()
            .map_err(|e| format!("DB connection failed: {}", e))?;
        let conn: &mut PgConnection = &mut pooled;
        match conn.run_pending_migrations(MIGRATIONS) {
            Ok(applied) => {
                if applied.is_empty() {
                    info!("Database schema is up to date; no migrations were applied");
                } else {
                    let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                    info!("Applied {} database migration(s): {}", applied.len(), names);
                }
                Ok(())
            }
            Err(e) => Err(format!("Applying database migrations failed: {}", e)),
        }
    }

    fn conn(&self) -> Result<PgPooled, String> {
        self.pool.get().map_err(|e| e.to_string())
    }

    /// Run `work` in a transaction the server cancels once `deadline` passes.
    /// It commits only if the deadline can still be claimed afterwards.
    fn within<T>(
        &self,
        deadline: &Deadline,
        work: impl FnOnce(&mut PgConnection) -> QueryResult<T>,
    ) -> Result<T, TxError> {
        let mut pooled = match deadline.remaining() {
            None => self.pool.get(),
            Some(left) if left.is_zero() => return Err(TxError::Expired),
            Some(left) => self.pool.get_timeout(left),
        }
        .map_err(|e| TxError::Connection(e.to_string()))?;
        let conn: &mut PgConnection = &mut pooled;

        conn.transaction(|conn| {
            match deadline.remaining() {
                Some(left) if left.is_zero() => return Err(TxError::Expired),
                // SET takes no bind parameters
                Some(left) => {
                    diesel::sql_query(format!("SET LOCAL statement_timeout = {}", left.as_millis().max(1)))
                        .execute(conn)?;
                }
                None => {}
            }
            let value = work(conn)?;
            if deadline.claim() { Ok(value) } else { Err(TxError::Expired) }
        })
    }
}

impl TelemetryStore for PgStore {
    fn append(&self, reading: &Reading, deadline: &Deadline) -> Result<(), StorageError> {
        use schema::sensor_readings::dsl as R;

        self.within(deadline, |conn| {
            diesel::insert_into(R::sensor_readings)
                .values(NewSensorReading::from(reading))
                .execute(conn)
        })
        .map(|_| ())
        .map_err(|e| e.into_storage(deadline, "insert reading"))
    }

    fn latest(&self, device_id: Option<&str>) -> Result<Option<Reading>, StorageError> {
        use schema::sensor_readings::dsl as R;

        let mut conn = self.conn().map_err(StorageError::Connection)?;
        let mut query = R::sensor_readings.into_boxed();
        if let Some(id) = device_id {
            query = query.filter(R::device_id.eq(id));
        }
        // id, not recorded_at: append order is the visibility order
        query
            .order(R::id.desc())
            .select(SensorReadingRow::as_select())
            .first(&mut conn)
            .optional()
            .map(|row| row.map(Reading::from))
            .map_err(|e| StorageError::Query(format!("fetch latest reading failed: {}", e)))
    }
}

impl CommandQueue for PgStore {
    fn enqueue(
        &self,
        device_id: &str,
        command_type: CommandType,
        value: &str,
        deadline: &Deadline,
    ) -> Result<(), QueueError> {
        use schema::commands::dsl as C;

        let type_name = command_type_name(command_type);
        let row = NewCommand::pending(device_id, command_type, value, Utc::now().trunc_subsecs(6));

        self.within(deadline, |conn| {
            // serialise writers for this device until commit
            diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind::<Text, _>(device_id)
                .execute(conn)?;
            diesel::delete(
                C::commands
                    .filter(C::device_id.eq(device_id))
                    .filter(C::command_type.eq(&type_name))
                    .filter(C::executed.eq(false)),
            )
            .execute(conn)?;
            diesel::insert_into(C::commands).values(&row).execute(conn)?;
            Ok(())
        })
        .map_err(|e| e.into_queue(deadline, &format!("enqueue {} for {}", type_name, device_id)))
    }

    fn drain(&self, device_id: &str, deadline: &Deadline) -> Result<Vec<PendingCommand>, QueueError> {
        use schema::commands::dsl as C;

        // A single UPDATE .. RETURNING: rows are locked while flipped, so a
        // concurrent poller re-checks `executed` and skips them. Rolled back
        // unless the caller is still waiting.
        let mut rows: Vec<CommandRow> = self
            .within(deadline, |conn| {
                diesel::update(
                    C::commands
                        .filter(C::device_id.eq(device_id))
                        .filter(C::executed.eq(false)),
                )
                .set(C::executed.eq(true))
                .returning(CommandRow::as_returning())
                .get_results(conn)
            })
            .map_err(|e| e.into_queue(deadline, &format!("drain commands for {}", device_id)))?;
        rows.sort_by_key(|r| r.id);

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, raw_type) = (row.id, row.command_type.clone());
            match row.into_command() {
                Some(cmd) => pending.push(PendingCommand {
                    command_type: cmd.command_type,
                    command_value: cmd.value,
                }),
                None => warn!("Skipping command {} with unknown type {:?} for {}", id, raw_type, device_id),
            }
        }
        Ok(pending)
    }
}
