//! Migration runner: status, run and mark against one environment.
//!
//! Files are applied strictly one at a time in file-name order. Each file is
//! handed to the [`MigrationStore`], which executes it and records it in a
//! single transaction. The first failure stops the batch; later files are
//! left pending so the next run resumes exactly where this one stopped.
//!
//! Read-only operations never write: the tracking table is created only when
//! a file is about to be applied or marked.

use std::fmt;

use tracing::{error, info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationDirectory, MigrationFile};
use crate::history::{MigrationRecord, MigrationStore};

/// Runner behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Refuse to run while any applied file has been modified.
    pub strict_checksums: bool,
}

/// State of one discovered file relative to the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// A record exists for this version.
    Applied {
        /// The tracking record.
        record: MigrationRecord,
        /// The file changed after it was applied.
        drift: bool,
    },
    /// No record exists.
    Pending,
}

/// One row of a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// The file on disk.
    pub file: MigrationFile,
    /// Its status.
    pub status: FileStatus,
}

impl FileReport {
    /// Whether the file is applied.
    pub fn is_applied(&self) -> bool {
        matches!(self.status, FileStatus::Applied { .. })
    }

    /// Whether the file changed after it was applied.
    pub fn is_drifted(&self) -> bool {
        matches!(self.status, FileStatus::Applied { drift: true, .. })
    }
}

/// Result of [`MigrationRunner::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Every discovered file, in application order.
    pub files: Vec<FileReport>,
    /// Tracking records with no file on disk.
    pub orphaned: Vec<MigrationRecord>,
}

impl StatusReport {
    fn build(files: Vec<MigrationFile>, mut records: Vec<MigrationRecord>) -> Self {
        let files = files
            .into_iter()
            .map(|file| {
                let status = match records.iter().position(|r| r.version == file.version) {
                    Some(idx) => {
                        let record = records.swap_remove(idx);
                        let drift = record.checksum != file.checksum;
                        FileStatus::Applied { record, drift }
                    }
                    None => FileStatus::Pending,
                };
                FileReport { file, status }
            })
            .collect();

        records.sort_by(|a, b| a.version.cmp(&b.version));
        Self {
            files,
            orphaned: records,
        }
    }

    /// Number of applied files.
    pub fn applied_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_applied()).count()
    }

    /// Number of pending files.
    pub fn pending_count(&self) -> usize {
        self.files.len() - self.applied_count()
    }

    /// Number of applied files modified since.
    pub fn drifted_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_drifted()).count()
    }

    /// Share of files applied, 0 to 100. An empty directory counts as fully applied.
    pub fn percent_applied(&self) -> f64 {
        if self.files.is_empty() {
            return 100.0;
        }
        self.applied_count() as f64 * 100.0 / self.files.len() as f64
    }

    /// Pending files in application order.
    pub fn pending(&self) -> impl Iterator<Item = &MigrationFile> {
        self.files
            .iter()
            .filter(|f| !f.is_applied())
            .map(|f| &f.file)
    }

    /// Applied files that changed since they were applied.
    pub fn drifted(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.is_drifted())
    }

    /// Whether every file is applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count() == 0
    }

    fn drift_warnings(&self) -> Vec<String> {
        self.drifted()
            .map(|f| format!("{} was modified after it was applied", f.file.filename))
            .collect()
    }
}

/// Lifecycle of one file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Not attempted.
    Pending,
    /// Transaction in progress.
    Applying,
    /// Committed and recorded.
    Applied,
    /// Rolled back; not recorded.
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to one file during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Version.
    pub version: String,
    /// File name.
    pub filename: String,
    /// Final phase.
    pub phase: MigrationPhase,
    /// Execution time when applied.
    pub execution_ms: Option<i32>,
}

/// Database-reported details of the file that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    /// Version.
    pub version: String,
    /// File name.
    pub filename: String,
    /// Primary message.
    pub message: String,
    /// SQLSTATE code.
    pub code: Option<String>,
    /// Detail.
    pub detail: Option<String>,
    /// Hint.
    pub hint: Option<String>,
    /// 1-based character offset into the file.
    pub position: Option<u32>,
    /// `(line, column)` of `position` within the file.
    pub location: Option<(usize, usize)>,
    /// The statement timeout cancelled the file.
    pub timed_out: bool,
}

impl ExecutionFailure {
    fn from_error(file: &MigrationFile, err: MigrationError) -> Self {
        match err {
            MigrationError::Execution { context, .. } => Self {
                version: file.version.clone(),
                filename: file.filename.clone(),
                location: context.line_and_column(&file.sql),
                timed_out: context.is_statement_timeout(),
                message: context.message,
                code: context.code,
                detail: context.detail,
                hint: context.hint,
                position: context.position,
            },
            other => Self {
                version: file.version.clone(),
                filename: file.filename.clone(),
                message: other.to_string(),
                code: None,
                detail: None,
                hint: None,
                position: None,
                location: None,
                timed_out: false,
            },
        }
    }
}

/// Result of [`MigrationRunner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Every file selected for this run, in order.
    pub outcomes: Vec<MigrationOutcome>,
    /// The failure that stopped the run.
    pub failure: Option<ExecutionFailure>,
    /// Non-fatal observations (checksum drift).
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Whether every selected file was applied.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of files applied.
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.phase == MigrationPhase::Applied)
            .count()
    }

    /// Versions left untouched because an earlier file failed.
    pub fn not_attempted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.phase == MigrationPhase::Pending)
            .map(|o| o.version.as_str())
            .collect()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "No pending migrations".to_string();
        }

        let mut parts = vec![format!("{} applied", self.applied_count())];
        if let Some(failure) = &self.failure {
            parts.push(format!("{} failed", failure.version));
        }
        let skipped = self.not_attempted().len();
        if skipped > 0 {
            parts.push(format!("{} not attempted", skipped));
        }
        parts.join(", ")
    }
}

/// Applies migration files against one environment.
pub struct MigrationRunner<S: MigrationStore> {
    store: S,
    directory: MigrationDirectory,
    options: RunnerOptions,
}

impl<S: MigrationStore> MigrationRunner<S> {
    /// Create a runner with default options.
    pub fn new(store: S, directory: MigrationDirectory) -> Self {
        Self::with_options(store, directory, RunnerOptions::default())
    }

    /// Create a runner with explicit options.
    pub fn with_options(store: S, directory: MigrationDirectory, options: RunnerOptions) -> Self {
        Self {
            store,
            directory,
            options,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Compare files on disk with the tracking table. Never writes.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let files = self.directory.discover().await?;
        let records = self.store.applied().await?;
        let report = StatusReport::build(files, records);

        for warning in report.drift_warnings() {
            warn!("{}", warning);
        }
        for record in &report.orphaned {
            warn!(version = %record.version, filename = %record.filename, "Applied migration has no file");
        }
        Ok(report)
    }

    /// Apply one version, or every pending file when `version` is `None`.
    pub async fn run(&self, version: Option<&str>) -> MigrateResult<RunReport> {
        let status = self.status().await?;

        if self.options.strict_checksums
            && let Some(drifted) = status.drifted().next()
            && let FileStatus::Applied { record, .. } = &drifted.status
        {
            return Err(MigrationError::ChecksumMismatch {
                version: drifted.file.version.clone(),
                expected: record.checksum.clone(),
                actual: drifted.file.checksum.clone(),
            });
        }

        let targets: Vec<&MigrationFile> = match version {
            Some(version) => {
                let report = status
                    .files
                    .iter()
                    .find(|f| f.file.version == version)
                    .ok_or_else(|| MigrationError::NotFound(version.to_string()))?;
                if report.is_applied() {
                    return Err(MigrationError::AlreadyApplied(version.to_string()));
                }
                vec![&report.file]
            }
            None => status.pending().collect(),
        };

        let mut report = RunReport {
            outcomes: targets
                .iter()
                .map(|f| MigrationOutcome {
                    version: f.version.clone(),
                    filename: f.filename.clone(),
                    phase: MigrationPhase::Pending,
                    execution_ms: None,
                })
                .collect(),
            failure: None,
            warnings: status.drift_warnings(),
        };

        if targets.is_empty() {
            info!("No pending migrations");
            return Ok(report);
        }

        self.store.initialize().await?;

        for (idx, file) in targets.iter().enumerate() {
            report.outcomes[idx].phase = MigrationPhase::Applying;
            info!(version = %file.version, file = %file.filename, "Applying migration");

            match self.store.apply(file).await {
                Ok(record) => {
                    report.outcomes[idx].phase = MigrationPhase::Applied;
                    report.outcomes[idx].execution_ms = record.execution_ms;
                }
                Err(err) => {
                    error!(version = %file.version, error = %err, "Migration failed and was rolled back");
                    report.outcomes[idx].phase = MigrationPhase::Failed;
                    report.failure = Some(ExecutionFailure::from_error(file, err));
                    break;
                }
            }
        }

        info!(summary = %report.summary(), "Migration run finished");
        Ok(report)
    }

    /// Record a version as applied without executing it.
    pub async fn mark(&self, version: &str) -> MigrateResult<MigrationRecord> {
        let status = self.status().await?;
        let report = status
            .files
            .iter()
            .find(|f| f.file.version == version)
            .ok_or_else(|| MigrationError::NotFound(version.to_string()))?;
        if report.is_applied() {
            return Err(MigrationError::AlreadyApplied(version.to_string()));
        }

        self.store.initialize().await?;
        self.store.mark(&report.file).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use schemasync_postgres::DbErrorContext;

    use super::*;

    /// Applies files in memory; a failing version records nothing.
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<MigrationRecord>>,
        executed: Mutex<Vec<String>>,
        writes: AtomicUsize,
        fail_on: Option<String>,
    }

    impl MemoryStore {
        fn failing_on(version: &str) -> Self {
            Self {
                fail_on: Some(version.to_string()),
                ..Default::default()
            }
        }

        fn with_record(self, file: &MigrationFile) -> Self {
            self.records.lock().unwrap().push(record_for(file, Some(1)));
            self
        }

        fn versions(&self) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.version.clone())
                .collect()
        }
    }

    fn record_for(file: &MigrationFile, execution_ms: Option<i32>) -> MigrationRecord {
        MigrationRecord {
            version: file.version.clone(),
            name: file.name.clone(),
            filename: file.filename.clone(),
            checksum: file.checksum.clone(),
            applied_at: Utc::now(),
            applied_by: "postgres".to_string(),
            execution_ms,
        }
    }

    #[async_trait::async_trait]
    impl MigrationStore for MemoryStore {
        async fn initialize(&self) -> MigrateResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn apply(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord> {
            self.executed.lock().unwrap().push(file.version.clone());
            if self.fail_on.as_deref() == Some(file.version.as_str()) {
                return Err(MigrationError::Execution {
                    version: file.version.clone(),
                    context: DbErrorContext {
                        code: Some("42P01".to_string()),
                        message: "relation \"missing\" does not exist".to_string(),
                        hint: Some("create it first".to_string()),
                        position: Some(10),
                        ..Default::default()
                    },
                });
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            let record = record_for(file, Some(5));
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn mark(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let record = record_for(file, None);
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }
    }

    fn write(dir: &Path, name: &str, sql: &str) -> MigrationFile {
        let path = dir.join(name);
        std::fs::write(&path, sql).unwrap();
        MigrationFile::from_contents(path, sql.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_status_all_applied_reports_full_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "001_init.sql", "CREATE TABLE a ();");
        let b = write(dir.path(), "002_more.sql", "CREATE TABLE b ();");
        let store = MemoryStore::default().with_record(&a).with_record(&b);
        let runner = MigrationRunner::new(store, MigrationDirectory::new(dir.path()));

        let status = runner.status().await.unwrap();

        assert_eq!(status.percent_applied(), 100.0);
        assert_eq!(status.pending_count(), 0);
        assert_eq!(status.drifted_count(), 0);
        assert!(status.orphaned.is_empty());
        assert!(status.is_up_to_date());

        let report = runner.run(None).await.unwrap();
        assert!(report.is_success());
        assert!(report.outcomes.is_empty());
        assert_eq!(runner.store().writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "069_ok.sql", "SELECT 1;");
        write(dir.path(), "070_broken.sql", "ALTER TABLE missing ADD COLUMN x int;");
        write(dir.path(), "071_later.sql", "SELECT 3;");
        let runner = MigrationRunner::new(
            MemoryStore::failing_on("070"),
            MigrationDirectory::new(dir.path()),
        );

        let report = runner.run(None).await.unwrap();

        let phases: Vec<_> = report.outcomes.iter().map(|o| o.phase).collect();
        assert_eq!(
            phases,
            vec![
                MigrationPhase::Applied,
                MigrationPhase::Failed,
                MigrationPhase::Pending
            ]
        );
        assert_eq!(report.not_attempted(), vec!["071"]);
        assert_eq!(runner.store().versions(), vec!["069".to_string()]);
        assert_eq!(
            *runner.store().executed.lock().unwrap(),
            vec!["069".to_string(), "070".to_string()]
        );

        let failure = report.failure.clone().expect("failure recorded");
        assert_eq!(failure.version, "070");
        assert_eq!(failure.code.as_deref(), Some("42P01"));
        assert_eq!(failure.hint.as_deref(), Some("create it first"));
        assert_eq!(failure.location, Some((1, 10)));
        assert_eq!(report.summary(), "1 applied, 070 failed, 1 not attempted");

        let status = runner.status().await.unwrap();
        let pending: Vec<_> = status.pending().map(|f| f.version.as_str()).collect();
        assert_eq!(pending, vec!["070", "071"]);
    }

    #[tokio::test]
    async fn test_run_single_version() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "001_init.sql", "SELECT 1;");
        write(dir.path(), "002_next.sql", "SELECT 2;");
        write(dir.path(), "003_last.sql", "SELECT 3;");
        let runner = MigrationRunner::new(
            MemoryStore::default().with_record(&a),
            MigrationDirectory::new(dir.path()),
        );

        let report = runner.run(Some("003")).await.unwrap();
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.outcomes[0].version, "003");

        assert!(matches!(
            runner.run(Some("001")).await,
            Err(MigrationError::AlreadyApplied(v)) if v == "001"
        ));
        assert!(matches!(
            runner.run(Some("999")).await,
            Err(MigrationError::NotFound(v)) if v == "999"
        ));
    }

    #[tokio::test]
    async fn test_drift_warns_by_default_and_blocks_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let applied = write(dir.path(), "001_init.sql", "CREATE TABLE a ();");
        write(dir.path(), "001_init.sql", "CREATE TABLE a (id int);");
        write(dir.path(), "002_next.sql", "SELECT 2;");

        let runner = MigrationRunner::new(
            MemoryStore::default().with_record(&applied),
            MigrationDirectory::new(dir.path()),
        );
        let status = runner.status().await.unwrap();
        assert_eq!(status.drifted_count(), 1);
        assert_eq!(status.percent_applied(), 50.0);

        let report = runner.run(None).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.warnings, vec!["001_init.sql was modified after it was applied"]);

        let strict = MigrationRunner::with_options(
            MemoryStore::default().with_record(&applied),
            MigrationDirectory::new(dir.path()),
            RunnerOptions {
                strict_checksums: true,
            },
        );
        assert!(matches!(
            strict.run(None).await,
            Err(MigrationError::ChecksumMismatch { version, .. }) if version == "001"
        ));
        assert_eq!(strict.store().writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_flags_statement_timeout() {
        let file =
            MigrationFile::from_contents("080_backfill.sql", b"UPDATE big SET flag = true;").unwrap();
        let cancelled = MigrationError::Execution {
            version: "080".to_string(),
            context: DbErrorContext {
                code: Some("57014".to_string()),
                message: "canceling statement due to statement timeout".to_string(),
                ..Default::default()
            },
        };

        let failure = ExecutionFailure::from_error(&file, cancelled);
        assert!(failure.timed_out);
        assert_eq!(failure.code.as_deref(), Some("57014"));

        let other = ExecutionFailure::from_error(&file, MigrationError::invalid("bad file"));
        assert!(!other.timed_out);
    }

    #[tokio::test]
    async fn test_orphaned_records_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gone = MigrationFile::from_contents(dir.path().join("005_gone.sql"), b"SELECT 1;").unwrap();
        write(dir.path(), "006_here.sql", "SELECT 2;");
        let runner = MigrationRunner::new(
            MemoryStore::default().with_record(&gone),
            MigrationDirectory::new(dir.path()),
        );

        let status = runner.status().await.unwrap();

        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.orphaned[0].version, "005");
        assert_eq!(status.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_records_real_checksum_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "010_manual.sql", "CREATE INDEX CONCURRENTLY i ON t (c);");
        let runner = MigrationRunner::new(MemoryStore::default(), MigrationDirectory::new(dir.path()));

        let record = runner.mark("010").await.unwrap();

        assert_eq!(record.checksum, file.checksum);
        assert_eq!(record.execution_ms, None);
        assert!(runner.store().executed.lock().unwrap().is_empty());
        assert!(matches!(
            runner.mark("010").await,
            Err(MigrationError::AlreadyApplied(_))
        ));
        assert!(matches!(runner.mark("011").await, Err(MigrationError::NotFound(_))));
    }
}
