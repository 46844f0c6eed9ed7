//! Tests against a real PostgreSQL server.
//!
//! Skipped unless `SCHEMASYNC_TEST_DATABASE_URL` points at a database the
//! test role may create schemas and tables in.

use pretty_assertions::assert_eq;
use schemasync_migrate::{
    CatalogIntrospector, MigrationDirectory, MigrationRunner, PgMigrationStore,
    PostgresIntrospector, SchemaDiffer, SkipList, SqlGenerator, TrackingTable,
};
use schemasync_postgres::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("SCHEMASYNC_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::builder()
        .url(url)
        .max_connections(2)
        .build()
        .await
        .expect("connect to test database");
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}

#[tokio::test]
async fn test_sync_converges_two_schemas() {
    let Some(pool) = test_pool().await else {
        eprintln!("SCHEMASYNC_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let reference = unique("schemasync_ref");
    let target = unique("schemasync_tgt");
    let touch = unique("schemasync_touch");

    let conn = pool.get().await.unwrap();
    conn.batch_execute(&format!(
        r#"
DROP SCHEMA IF EXISTS {reference} CASCADE;
DROP SCHEMA IF EXISTS {target} CASCADE;
CREATE SCHEMA {reference};
CREATE SCHEMA {target};

CREATE TABLE {reference}.accounts (
    id uuid PRIMARY KEY,
    balance bigint NOT NULL DEFAULT 0,
    label text
);
CREATE TABLE {reference}.ledger (
    id uuid PRIMARY KEY,
    amount bigint NOT NULL
);
CREATE OR REPLACE FUNCTION public.{touch}() RETURNS trigger LANGUAGE plpgsql AS $$ BEGIN RETURN NEW; END $$;
CREATE TABLE {reference}.jobs (
    id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    state integer DEFAULT 0,
    status text,
    qty integer,
    price integer,
    total integer GENERATED ALWAYS AS (qty * price) STORED
);
CREATE TRIGGER jobs_status BEFORE UPDATE OF status ON {reference}.jobs
    FOR EACH ROW WHEN (OLD.status IS DISTINCT FROM NEW.status)
    EXECUTE FUNCTION public.{touch}();
ALTER TABLE {reference}.accounts ENABLE ROW LEVEL SECURITY;
CREATE POLICY accounts_visible ON {reference}.accounts FOR SELECT USING (id IS NOT NULL);

CREATE TABLE {target}.accounts (
    id uuid PRIMARY KEY,
    balance integer,
    nickname text
);
INSERT INTO {target}.accounts (id, balance) VALUES (gen_random_uuid(), 5);
CREATE TABLE {target}.scratch (id integer);
CREATE TABLE {target}.jobs (
    id bigint PRIMARY KEY,
    state text DEFAULT 'new',
    status text,
    qty integer,
    price integer,
    total integer
);
INSERT INTO {target}.jobs (id, state, qty, price) VALUES (7, '3', 2, 5);
CREATE TRIGGER jobs_status BEFORE UPDATE ON {target}.jobs
    FOR EACH ROW EXECUTE FUNCTION public.{touch}();
"#
    ))
    .await
    .unwrap();

    let ref_snapshot = PostgresIntrospector::new(pool.clone(), "reference")
        .with_schema(&reference)
        .introspect()
        .await
        .unwrap();
    let target_introspector =
        PostgresIntrospector::new(pool.clone(), "target").with_schema(&target);
    let target_snapshot = target_introspector.introspect().await.unwrap();

    assert!(ref_snapshot.has_rls("accounts"));
    assert_eq!(ref_snapshot.policies.len(), 1);
    assert!(
        ref_snapshot
            .constraints
            .iter()
            .any(|c| c.name == "accounts_pkey")
    );

    let differ = SchemaDiffer::new(SkipList::empty());
    let diff = differ.diff(&ref_snapshot, &target_snapshot);
    assert!(!diff.is_empty());
    assert_eq!(diff.drop_tables, vec!["scratch".to_string()]);

    let scripts = SqlGenerator::for_schema(&target).render(&diff);
    for doc in scripts.documents() {
        conn.batch_execute(&doc.sql)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", doc.file_name, e));
    }

    let converged = target_introspector.introspect().await.unwrap();
    let remaining = differ.diff(&ref_snapshot, &converged);
    assert!(remaining.is_empty(), "left over: {}", remaining.summary());

    let jobs = conn
        .query(
            &format!("INSERT INTO {target}.jobs (qty, price) VALUES (3, 4) RETURNING id, total, state"),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(jobs[0].get::<_, i64>("id"), 8);
    assert_eq!(jobs[0].get::<_, i32>("total"), 12);
    assert_eq!(jobs[0].get::<_, i32>("state"), 0);
    let kept = conn
        .query(&format!("SELECT state, total FROM {target}.jobs WHERE id = 7"), &[])
        .await
        .unwrap();
    assert_eq!(kept[0].get::<_, i32>("state"), 3);
    assert_eq!(kept[0].get::<_, i32>("total"), 10);

    conn.batch_execute(&format!(
        "DROP SCHEMA {reference} CASCADE; DROP SCHEMA {target} CASCADE; DROP FUNCTION public.{touch}();"
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn test_runner_stops_at_failing_file() {
    let Some(pool) = test_pool().await else {
        eprintln!("SCHEMASYNC_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let tracking = unique("schemasync_test_migrations");
    let table = unique("schemasync_runner_check");

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("001_create_check.sql"),
        format!("CREATE TABLE {table} (id integer);"),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("002_broken.sql"),
        format!("INSERT INTO {table} VALUES (1);\nSELEC 1;"),
    )
    .unwrap();
    std::fs::write(dir.path().join("003_never.sql"), "SELECT 3;").unwrap();

    let store = PgMigrationStore::with_table(pool.clone(), TrackingTable::new(&tracking));
    let runner = MigrationRunner::new(store, MigrationDirectory::new(dir.path()));

    let before = runner.status().await.unwrap();
    assert_eq!(before.pending_count(), 3);

    let report = runner.run(None).await.unwrap();
    assert_eq!(report.applied_count(), 1);
    let failure = report.failure.clone().expect("002 fails");
    assert_eq!(failure.version, "002");
    assert_eq!(failure.code.as_deref(), Some("42601"));
    assert_eq!(failure.location.map(|(line, _)| line), Some(2));
    assert_eq!(report.not_attempted(), vec!["003"]);

    let conn = pool.get().await.unwrap();
    let rows = conn
        .query(&format!("SELECT count(*)::int4 AS n FROM {table}"), &[])
        .await
        .unwrap();
    let inserted: i32 = rows[0].get("n");
    assert_eq!(inserted, 0, "the failed file was rolled back");

    let after = runner.status().await.unwrap();
    assert_eq!(after.applied_count(), 1);
    assert_eq!(after.pending().map(|f| f.version.as_str()).collect::<Vec<_>>(), vec!["002", "003"]);

    runner.mark("002").await.unwrap();
    assert_eq!(runner.status().await.unwrap().pending_count(), 1);

    conn.batch_execute(&format!("DROP TABLE {table}; DROP TABLE {tracking};"))
        .await
        .unwrap();
}
