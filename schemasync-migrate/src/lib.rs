//! # schemasync-migrate
//!
//! Schema synchronization and migration tracking for PostgreSQL.
//!
//! This crate provides:
//! - Catalog introspection of a live database into a [`SchemaSnapshot`]
//! - Structural diffing of two snapshots into a [`DiffSet`]
//! - Rendering of a diff as four ordered SQL documents
//! - Discovery of numbered `.sql` migration files with SHA-256 checksums
//! - A tracking table recording which versions have been applied
//! - A sequential, stop-on-first-error migration runner
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │ Reference DB │     │  Target DB   │
//! └──────┬───────┘     └──────┬───────┘
//!        │ introspect         │ introspect
//!        ▼                    ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────────┐
//! │   Snapshot   │────▶│ SchemaDiffer │────▶│ SqlGenerator (01-04) │
//! └──────────────┘     └──────────────┘     └──────────────────────┘
//!
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────────┐
//! │ migrations/  │────▶│   Runner     │────▶│  schema_migrations   │
//! └──────────────┘     └──────────────┘     └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use schemasync_migrate::{
//!     CatalogIntrospector, MigrationDirectory, MigrationRunner, PgMigrationStore,
//!     PostgresIntrospector, SchemaDiffer, SqlGenerator,
//! };
//!
//! async fn sync(dev: PgPool, prod: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let reference = PostgresIntrospector::new(dev, "development").introspect().await?;
//!     let target = PostgresIntrospector::new(prod.clone(), "production").introspect().await?;
//!
//!     let diff = SchemaDiffer::default().diff(&reference, &target);
//!     println!("{}", diff.summary());
//!     SqlGenerator::new().render(&diff).write_to("./schema-sync").await?;
//!
//!     let runner = MigrationRunner::new(
//!         PgMigrationStore::new(prod),
//!         MigrationDirectory::new("./migrations"),
//!     );
//!     let report = runner.run(None).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! ```text
//! migrations/
//! ├── 060a_backfill_owners.sql
//! ├── 069_add_dispatch_index.sql
//! └── 070_enable_rls.sql
//! ```
//!
//! Each file is applied in its own transaction together with its tracking
//! record, so a failed file leaves neither its changes nor a record behind.

pub mod diff;
pub mod error;
pub mod file;
pub mod history;
pub mod introspect;
pub mod postgres_store;
pub mod runner;
pub mod snapshot;
pub mod sql;

// Re-exports
pub use diff::{
    ColumnChange, DiffSet, DiffWarning, ForeignKeyDefinition, KeyConstraint, SchemaDiffer,
    TableDefinition, normalize_type,
};
pub use error::{MigrateResult, MigrationError};
pub use file::{MigrationDirectory, MigrationFile, compute_checksum};
pub use history::{DEFAULT_TRACKING_TABLE, MigrationRecord, MigrationStore, TrackingTable};
pub use introspect::{CatalogIntrospector, PostgresIntrospector};
pub use postgres_store::PgMigrationStore;
pub use runner::{
    ExecutionFailure, FileReport, FileStatus, MigrationOutcome, MigrationPhase, MigrationRunner,
    RunReport, RunnerOptions, StatusReport,
};
pub use snapshot::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, FunctionDescriptor, IdentityGeneration,
    IndexDescriptor, PolicyCommand, PolicyDescriptor, SchemaSnapshot, SkipList, TriggerDescriptor,
    TriggerEvent, TriggerTiming,
};
pub use sql::{DocumentKind, SqlDocument, SqlGenerator, SyncScripts, quote_ident};
