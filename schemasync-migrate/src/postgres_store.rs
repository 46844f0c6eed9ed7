//! Tracking table backed by a PostgreSQL connection pool.

use std::time::Instant;

use schemasync_postgres::{PgError, PgPool, PgTransaction, Row};
use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::file::MigrationFile;
use crate::history::{MIGRATION_LOCK_KEY, MigrationRecord, MigrationStore, TrackingTable};

/// [`MigrationStore`] over a [`PgPool`].
#[derive(Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
    table: TrackingTable,
}

impl PgMigrationStore {
    /// Use the default tracking table.
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, TrackingTable::default())
    }

    /// Use a custom tracking table.
    pub fn with_table(pool: PgPool, table: TrackingTable) -> Self {
        Self { pool, table }
    }

    /// The tracking table in use.
    pub fn table(&self) -> &TrackingTable {
        &self.table
    }

    async fn insert_record(
        &self,
        txn: &PgTransaction<'_>,
        file: &MigrationFile,
        execution_ms: Option<i32>,
    ) -> MigrateResult<MigrationRecord> {
        let row = txn
            .query_one(
                &self.table.insert_sql(),
                &[
                    &file.version,
                    &file.name,
                    &file.filename,
                    &file.checksum,
                    &execution_ms,
                ],
            )
            .await?;

        Ok(MigrationRecord {
            version: file.version.clone(),
            name: file.name.clone(),
            filename: file.filename.clone(),
            checksum: file.checksum.clone(),
            applied_at: row.try_get("applied_at").map_err(PgError::from)?,
            applied_by: row.try_get("applied_by").map_err(PgError::from)?,
            execution_ms,
        })
    }

    async fn record(
        &self,
        file: &MigrationFile,
        execute: bool,
    ) -> MigrateResult<MigrationRecord> {
        let mut conn = self.pool.get().await?;
        let txn = conn.transaction().await?;

        // Serializes concurrent runners against the same database.
        txn.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATION_LOCK_KEY])
            .await?;

        let execution_ms = if execute {
            let started = Instant::now();
            txn.batch_execute(&file.sql)
                .await
                .map_err(|e| MigrationError::execution(&file.version, e))?;
            Some(i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX))
        } else {
            None
        };

        let record = self.insert_record(&txn, file, execution_ms).await?;
        txn.commit().await?;
        Ok(record)
    }
}

fn record_from_row(row: &Row) -> Result<MigrationRecord, PgError> {
    Ok(MigrationRecord {
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        filename: row.try_get("filename")?,
        checksum: row.try_get("checksum")?,
        applied_at: row.try_get("applied_at")?,
        applied_by: row.try_get("applied_by")?,
        execution_ms: row.try_get("execution_ms")?,
    })
}

#[async_trait::async_trait]
impl MigrationStore for PgMigrationStore {
    async fn initialize(&self) -> MigrateResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(&self.table.create_sql()).await?;
        debug!(table = %self.table.name(), "Tracking table ready");
        Ok(())
    }

    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let conn = self.pool.get().await?;

        let relation: Option<String> = conn
            .query_opt(self.table.exists_sql(), &[&self.table.regclass_name()])
            .await?
            .map(|row| row.try_get::<_, Option<String>>("relation"))
            .transpose()
            .map_err(PgError::from)?
            .flatten();
        if relation.is_none() {
            debug!(table = %self.table.name(), "Tracking table does not exist yet");
            return Ok(Vec::new());
        }

        let rows = conn.query(&self.table.select_sql(), &[]).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn apply(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord> {
        let record = self.record(file, true).await?;
        info!(
            version = %record.version,
            execution_ms = record.execution_ms.unwrap_or_default(),
            "Migration applied"
        );
        Ok(record)
    }

    async fn mark(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord> {
        let record = self.record(file, false).await?;
        info!(version = %record.version, "Migration marked as applied");
        Ok(record)
    }
}
