//! Catalog introspection.
//!
//! Reads one schema namespace of a live database into a [`SchemaSnapshot`].
//! All catalog queries run inside one read-only `REPEATABLE READ`
//! transaction, so DDL committed mid-introspection is either fully visible
//! or not at all. Rows are converted to typed descriptors as soon as they
//! are fetched. Any failed query or unrecognised catalog value aborts the
//! whole introspection: a partial snapshot would diff as missing objects.

use schemasync_postgres::{FromSqlOwned, PgError, PgPool, PgTransaction, Row};
use tracing::{debug, info};

use crate::error::{MigrateResult, MigrationError};
use crate::sql::quote_ident;
use crate::snapshot::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, FunctionDescriptor, IdentityGeneration,
    IndexDescriptor, PolicyCommand, PolicyDescriptor, SchemaSnapshot, TriggerDescriptor,
    TriggerEvent, TriggerTiming,
};

/// Produces a snapshot of one database.
#[async_trait::async_trait]
pub trait CatalogIntrospector: Send + Sync {
    /// Read the complete structure. Read-only.
    async fn introspect(&self) -> MigrateResult<SchemaSnapshot>;
}

/// Catalog queries, each taking the schema name as `$1`.
pub mod catalog_queries {
    /// Base tables.
    pub const TABLES: &str = r#"
SELECT table_name::text AS table_name
FROM information_schema.tables
WHERE table_schema = $1 AND table_type = 'BASE TABLE'
ORDER BY table_name"#;

    /// Columns of base tables with their rendered types, identity kind and
    /// generation expression.
    pub const COLUMNS: &str = r#"
SELECT c.table_name::text AS table_name,
       c.column_name::text AS column_name,
       format_type(a.atttypid, a.atttypmod) AS data_type,
       (c.is_nullable = 'YES') AS nullable,
       c.column_default::text AS column_default,
       c.character_maximum_length::int4 AS max_length,
       c.numeric_precision::int4 AS numeric_precision,
       c.numeric_scale::int4 AS numeric_scale,
       c.ordinal_position::int4 AS ordinal_position,
       CASE WHEN c.is_identity = 'YES' THEN c.identity_generation::text END AS identity_generation,
       CASE WHEN c.is_generated = 'ALWAYS' THEN c.generation_expression::text END AS generation_expression
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema AND t.table_name = c.table_name AND t.table_type = 'BASE TABLE'
JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
JOIN pg_catalog.pg_class cls ON cls.relnamespace = n.oid AND cls.relname = c.table_name
JOIN pg_catalog.pg_attribute a ON a.attrelid = cls.oid AND a.attname = c.column_name
WHERE c.table_schema = $1
ORDER BY c.table_name, c.ordinal_position"#;

    /// Indexes that do not back a primary key.
    pub const INDEXES: &str = r#"
SELECT i.tablename::text AS table_name,
       i.indexname::text AS index_name,
       i.indexdef AS definition
FROM pg_catalog.pg_indexes i
JOIN pg_catalog.pg_namespace n ON n.nspname = i.schemaname
JOIN pg_catalog.pg_class ic ON ic.relnamespace = n.oid AND ic.relname = i.indexname
JOIN pg_catalog.pg_index x ON x.indexrelid = ic.oid
WHERE i.schemaname = $1 AND NOT x.indisprimary
ORDER BY i.tablename, i.indexname"#;

    /// Primary key, foreign key and unique constraints, one row per column.
    pub const CONSTRAINTS: &str = r#"
SELECT rel.relname::text AS table_name,
       con.conname::text AS constraint_name,
       con.contype::text AS kind,
       att.attname::text AS column_name,
       frel.relname::text AS foreign_table,
       fatt.attname::text AS foreign_column,
       k.ordinal::int4 AS ordinal
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
CROSS JOIN LATERAL unnest(con.conkey, coalesce(con.confkey, con.conkey))
    WITH ORDINALITY AS k(attnum, fattnum, ordinal)
JOIN pg_catalog.pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
LEFT JOIN pg_catalog.pg_class frel ON frel.oid = con.confrelid
LEFT JOIN pg_catalog.pg_attribute fatt ON fatt.attrelid = con.confrelid AND fatt.attnum = k.fattnum
WHERE n.nspname = $1 AND con.contype IN ('p', 'f', 'u')
ORDER BY rel.relname, con.conname, k.ordinal"#;

    /// Row-level security flag per table.
    pub const RLS: &str = r#"
SELECT c.relname::text AS table_name, c.relrowsecurity AS enabled
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
ORDER BY c.relname"#;

    /// Row-level security policies.
    pub const POLICIES: &str = r#"
SELECT tablename::text AS table_name,
       policyname::text AS policy_name,
       cmd,
       (permissive = 'PERMISSIVE') AS permissive,
       roles::text[] AS roles,
       qual AS using_expr,
       with_check AS with_check_expr
FROM pg_catalog.pg_policies
WHERE schemaname = $1
ORDER BY tablename, policyname"#;

    /// Plain functions not owned by an extension.
    pub const FUNCTIONS: &str = r#"
SELECT p.proname::text AS function_name,
       pg_get_function_identity_arguments(p.oid) AS arg_signature,
       pg_get_functiondef(p.oid) AS definition,
       pg_get_function_result(p.oid) AS result_type,
       l.lanname::text AS language,
       p.prosecdef AS security_definer
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
JOIN pg_catalog.pg_language l ON l.oid = p.prolang
WHERE n.nspname = $1
  AND p.prokind = 'f'
  AND NOT EXISTS (
      SELECT 1 FROM pg_catalog.pg_depend d
      WHERE d.classid = 'pg_catalog.pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e'
  )
ORDER BY p.proname, arg_signature"#;

    /// User triggers with their `tgtype` bits decoded and the full definition.
    pub const TRIGGERS: &str = r#"
SELECT c.relname::text AS table_name,
       t.tgname::text AS trigger_name,
       CASE WHEN t.tgtype::int4 & 2 <> 0 THEN 'BEFORE'
            WHEN t.tgtype::int4 & 64 <> 0 THEN 'INSTEAD OF'
            ELSE 'AFTER' END AS timing,
       array_remove(ARRAY[
           CASE WHEN t.tgtype::int4 & 4 <> 0 THEN 'INSERT' END,
           CASE WHEN t.tgtype::int4 & 16 <> 0 THEN 'UPDATE' END,
           CASE WHEN t.tgtype::int4 & 8 <> 0 THEN 'DELETE' END,
           CASE WHEN t.tgtype::int4 & 32 <> 0 THEN 'TRUNCATE' END
       ], NULL)::text[] AS events,
       CASE WHEN t.tgtype::int4 & 1 <> 0 THEN 'ROW' ELSE 'STATEMENT' END AS orientation,
       pg_get_triggerdef(t.oid) AS definition
FROM pg_catalog.pg_trigger t
JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND NOT t.tgisinternal
ORDER BY c.relname, t.tgname"#;
}

/// Introspects one schema of a PostgreSQL database.
#[derive(Clone)]
pub struct PostgresIntrospector {
    pool: PgPool,
    environment: String,
    schema: String,
}

impl PostgresIntrospector {
    /// Introspect the `public` schema. `environment` labels errors and logs.
    pub fn new(pool: PgPool, environment: impl Into<String>) -> Self {
        Self {
            pool,
            environment: environment.into(),
            schema: "public".to_string(),
        }
    }

    /// Introspect a different schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// The environment label.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn db_error(&self, err: PgError) -> MigrationError {
        MigrationError::introspection(&self.environment, err)
    }

    async fn fetch(&self, txn: &PgTransaction<'_>, sql: &str) -> MigrateResult<Vec<Row>> {
        txn.query(sql, &[&self.schema])
            .await
            .map_err(|e| self.db_error(e))
    }

    fn get<T: FromSqlOwned>(&self, row: &Row, column: &str) -> MigrateResult<T> {
        row.try_get(column)
            .map_err(|e| self.db_error(PgError::from(e)))
    }

    fn unknown(&self, what: &str, value: &str) -> MigrationError {
        MigrationError::catalog(&self.environment, format!("unknown {} '{}'", what, value))
    }

    fn column(&self, row: &Row) -> MigrateResult<ColumnDescriptor> {
        let identity = match self.get::<Option<String>>(row, "identity_generation")? {
            Some(kind) => Some(
                IdentityGeneration::parse(&kind)
                    .ok_or_else(|| self.unknown("identity generation", &kind))?,
            ),
            None => None,
        };
        Ok(ColumnDescriptor {
            table: self.get(row, "table_name")?,
            name: self.get(row, "column_name")?,
            data_type: self.get(row, "data_type")?,
            nullable: self.get(row, "nullable")?,
            default: self.get(row, "column_default")?,
            max_length: self.get(row, "max_length")?,
            numeric_precision: self.get(row, "numeric_precision")?,
            numeric_scale: self.get(row, "numeric_scale")?,
            ordinal_position: self.get(row, "ordinal_position")?,
            identity,
            generated: self.get(row, "generation_expression")?,
        })
    }

    fn constraint(&self, row: &Row) -> MigrateResult<ConstraintDescriptor> {
        let kind: String = self.get(row, "kind")?;
        Ok(ConstraintDescriptor {
            table: self.get(row, "table_name")?,
            name: self.get(row, "constraint_name")?,
            kind: ConstraintKind::from_contype(&kind)
                .ok_or_else(|| self.unknown("constraint type", &kind))?,
            column: self.get(row, "column_name")?,
            foreign_table: self.get(row, "foreign_table")?,
            foreign_column: self.get(row, "foreign_column")?,
            ordinal: self.get(row, "ordinal")?,
        })
    }

    fn policy(&self, row: &Row) -> MigrateResult<PolicyDescriptor> {
        let cmd: String = self.get(row, "cmd")?;
        Ok(PolicyDescriptor {
            table: self.get(row, "table_name")?,
            name: self.get(row, "policy_name")?,
            command: PolicyCommand::parse(&cmd).ok_or_else(|| self.unknown("policy command", &cmd))?,
            permissive: self.get(row, "permissive")?,
            roles: self.get::<Option<Vec<String>>>(row, "roles")?.unwrap_or_default(),
            using_expr: self.get(row, "using_expr")?,
            with_check_expr: self.get(row, "with_check_expr")?,
        })
    }

    fn function(&self, row: &Row) -> MigrateResult<FunctionDescriptor> {
        Ok(FunctionDescriptor {
            name: self.get(row, "function_name")?,
            arg_signature: self.get(row, "arg_signature")?,
            definition: self.get(row, "definition")?,
            language: self.get(row, "language")?,
            security_definer: self.get(row, "security_definer")?,
            result_type: self.get(row, "result_type")?,
        })
    }

    fn trigger(&self, row: &Row) -> MigrateResult<TriggerDescriptor> {
        let timing: String = self.get(row, "timing")?;
        let events = self
            .get::<Vec<String>>(row, "events")?
            .iter()
            .map(|e| TriggerEvent::parse(e).ok_or_else(|| self.unknown("trigger event", e)))
            .collect::<MigrateResult<Vec<_>>>()?;
        let definition: String = self.get(row, "definition")?;
        let definition = unqualify_trigger_table(&definition, &self.schema);
        Ok(TriggerDescriptor {
            table: self.get(row, "table_name")?,
            name: self.get(row, "trigger_name")?,
            timing: TriggerTiming::parse(&timing)
                .ok_or_else(|| self.unknown("trigger timing", &timing))?,
            events,
            orientation: self.get(row, "orientation")?,
            statement: action_statement(&definition).to_string(),
            definition: Some(definition),
        })
    }
}

/// Drop the schema from the `ON schema.table` clause of a trigger definition
/// so it compares equal across schemas and renders into any of them.
pub fn unqualify_trigger_table(definition: &str, schema: &str) -> String {
    definition.replacen(&format!(" ON {}.", quote_ident(schema)), " ON ", 1)
}

/// The `EXECUTE FUNCTION ...` tail of a `pg_get_triggerdef` definition.
pub fn action_statement(definition: &str) -> &str {
    match definition.find(" EXECUTE ") {
        Some(at) => definition[at + 1..].trim(),
        None => definition.trim(),
    }
}

#[async_trait::async_trait]
impl CatalogIntrospector for PostgresIntrospector {
    async fn introspect(&self) -> MigrateResult<SchemaSnapshot> {
        let mut conn = self.pool.get().await.map_err(|e| self.db_error(e))?;
        let txn = conn.snapshot().await.map_err(|e| self.db_error(e))?;
        let mut snapshot = SchemaSnapshot::new();

        for row in self.fetch(&txn, catalog_queries::TABLES).await? {
            snapshot.tables.insert(self.get(&row, "table_name")?);
        }

        for row in self.fetch(&txn, catalog_queries::COLUMNS).await? {
            snapshot.columns.push(self.column(&row)?);
        }

        for row in self.fetch(&txn, catalog_queries::INDEXES).await? {
            snapshot.indexes.push(IndexDescriptor {
                table: self.get(&row, "table_name")?,
                name: self.get(&row, "index_name")?,
                definition: self.get(&row, "definition")?,
            });
        }

        for row in self.fetch(&txn, catalog_queries::CONSTRAINTS).await? {
            snapshot.constraints.push(self.constraint(&row)?);
        }

        for row in self.fetch(&txn, catalog_queries::RLS).await? {
            snapshot
                .rls_enabled
                .insert(self.get(&row, "table_name")?, self.get(&row, "enabled")?);
        }

        for row in self.fetch(&txn, catalog_queries::POLICIES).await? {
            snapshot.policies.push(self.policy(&row)?);
        }

        for row in self.fetch(&txn, catalog_queries::FUNCTIONS).await? {
            snapshot.functions.push(self.function(&row)?);
        }

        for row in self.fetch(&txn, catalog_queries::TRIGGERS).await? {
            snapshot.triggers.push(self.trigger(&row)?);
        }
        txn.commit().await.map_err(|e| self.db_error(e))?;

        snapshot.normalize();

        info!(
            environment = %self.environment,
            schema = %self.schema,
            tables = snapshot.tables.len(),
            columns = snapshot.columns.len(),
            policies = snapshot.policies.len(),
            functions = snapshot.functions.len(),
            triggers = snapshot.triggers.len(),
            "Introspection complete"
        );
        debug!(objects = snapshot.object_count(), "Snapshot object count");

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_action_statement_from_definition() {
        let definition = "CREATE TRIGGER trg BEFORE UPDATE OF status ON public.t FOR EACH ROW WHEN ((old.status IS DISTINCT FROM new.status)) EXECUTE FUNCTION f()";
        assert_eq!(action_statement(definition), "EXECUTE FUNCTION f()");
        assert_eq!(action_statement("garbage"), "garbage");
    }

    #[test]
    fn test_trigger_table_unqualified() {
        let definition = "CREATE TRIGGER trg AFTER INSERT ON public.orders FOR EACH ROW EXECUTE FUNCTION public.notify()";
        assert_eq!(
            unqualify_trigger_table(definition, "public"),
            "CREATE TRIGGER trg AFTER INSERT ON orders FOR EACH ROW EXECUTE FUNCTION public.notify()"
        );
        assert_eq!(
            unqualify_trigger_table("CREATE TRIGGER t BEFORE DELETE ON \"App\".jobs FOR EACH ROW EXECUTE FUNCTION f()", "App"),
            "CREATE TRIGGER t BEFORE DELETE ON jobs FOR EACH ROW EXECUTE FUNCTION f()"
        );
    }

    #[test]
    fn test_queries_are_schema_parameterized() {
        for query in [
            catalog_queries::TABLES,
            catalog_queries::COLUMNS,
            catalog_queries::INDEXES,
            catalog_queries::CONSTRAINTS,
            catalog_queries::RLS,
            catalog_queries::POLICIES,
            catalog_queries::FUNCTIONS,
            catalog_queries::TRIGGERS,
        ] {
            assert!(query.contains("$1"));
        }
        assert!(catalog_queries::INDEXES.contains("NOT x.indisprimary"));
        assert!(catalog_queries::FUNCTIONS.contains("deptype = 'e'"));
        assert!(catalog_queries::COLUMNS.contains("identity_generation"));
        assert!(catalog_queries::COLUMNS.contains("generation_expression"));
        assert!(catalog_queries::TRIGGERS.contains("pg_get_triggerdef(t.oid)"));
        assert!(catalog_queries::TRIGGERS.contains("NOT t.tgisinternal"));
    }
}
