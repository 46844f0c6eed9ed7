//! SQL generation for synchronization scripts.
//!
//! A [`DiffSet`] renders into four documents that are applied in order.
//! Every statement is idempotent and no document carries a timestamp, so
//! rendering the same diff twice yields byte-identical output.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::diff::{ColumnChange, DiffSet, DiffWarning, ForeignKeyDefinition, TableDefinition};
use crate::error::MigrateResult;
use crate::snapshot::{
    ColumnDescriptor, FunctionDescriptor, IdentityGeneration, PolicyDescriptor, TriggerDescriptor,
};

/// Words PostgreSQL reserves; identifiers spelled like these must be quoted.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table", "tablesample",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "variadic",
    "verbose", "when", "where", "window", "with",
];

/// Quote an identifier only when PostgreSQL requires it.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$'),
        _ => false,
    };

    if plain && !RESERVED_WORDS.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Render a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The four synchronization documents, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKind {
    /// Drop obsolete tables, create missing tables, indexes and foreign keys.
    StructuralCleanup,
    /// Add, drop and alter columns.
    ColumnSync,
    /// Enable row-level security, drop and (re)create policies.
    PolicySync,
    /// Drop obsolete triggers and functions, replace functions, recreate triggers.
    FunctionTriggerSync,
}

impl DocumentKind {
    /// All kinds in application order.
    pub const ALL: [DocumentKind; 4] = [
        Self::StructuralCleanup,
        Self::ColumnSync,
        Self::PolicySync,
        Self::FunctionTriggerSync,
    ];

    /// File name of the document.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::StructuralCleanup => "01_structural_cleanup.sql",
            Self::ColumnSync => "02_column_sync.sql",
            Self::PolicySync => "03_policy_sync.sql",
            Self::FunctionTriggerSync => "04_function_trigger_sync.sql",
        }
    }

    fn stem(&self) -> &'static str {
        self.file_name().trim_end_matches(".sql")
    }

    fn description(&self) -> &'static str {
        match self {
            Self::StructuralCleanup => {
                "Drops obsolete tables, creates missing tables, indexes and foreign keys."
            }
            Self::ColumnSync => "Adds, drops and alters columns of tables present on both sides.",
            Self::PolicySync => "Enables row-level security, drops obsolete policies, recreates new and changed policies.",
            Self::FunctionTriggerSync => {
                "Drops obsolete triggers and functions, replaces functions, recreates triggers."
            }
        }
    }
}

/// One rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDocument {
    /// Which document this is.
    pub kind: DocumentKind,
    /// File name to write it under.
    pub file_name: String,
    /// SQL text.
    pub sql: String,
    /// Objects dropped.
    pub dropped: usize,
    /// Objects created.
    pub created: usize,
    /// Objects altered.
    pub altered: usize,
}

impl SqlDocument {
    /// Whether the document contains no statements besides its summary.
    pub fn is_noop(&self) -> bool {
        self.dropped == 0 && self.created == 0 && self.altered == 0
    }
}

/// The output of one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncScripts {
    documents: Vec<SqlDocument>,
}

impl SyncScripts {
    /// Documents in application order.
    pub fn documents(&self) -> &[SqlDocument] {
        &self.documents
    }

    /// Look up one document.
    pub fn get(&self, kind: DocumentKind) -> Option<&SqlDocument> {
        self.documents.iter().find(|d| d.kind == kind)
    }

    /// SQL text of one document, empty if absent.
    pub fn sql(&self, kind: DocumentKind) -> &str {
        self.get(kind).map(|d| d.sql.as_str()).unwrap_or_default()
    }

    /// All documents joined, each preceded by a file marker.
    pub fn combined(&self) -> String {
        self.documents
            .iter()
            .map(|d| format!("-- ==== {} ====\n{}", d.file_name, d.sql))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write every document into `dir`, creating it if needed.
    pub async fn write_to(&self, dir: impl AsRef<Path>) -> MigrateResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let mut written = Vec::with_capacity(self.documents.len());
        for doc in &self.documents {
            let path = dir.join(&doc.file_name);
            tokio::fs::write(&path, &doc.sql).await?;
            info!(
                path = %path.display(),
                dropped = doc.dropped,
                created = doc.created,
                altered = doc.altered,
                "Wrote synchronization script"
            );
            written.push(path);
        }
        Ok(written)
    }
}

struct DocumentBuilder {
    kind: DocumentKind,
    out: String,
    dropped: usize,
    created: usize,
    altered: usize,
}

impl DocumentBuilder {
    fn new(kind: DocumentKind) -> Self {
        let mut out = String::new();
        out.push_str(&format!("-- {}\n", kind.file_name()));
        out.push_str(&format!("-- {}\n", kind.description()));
        out.push_str("-- Generated by schemasync. Every statement is safe to re-run.\n");
        out.push_str("-- Review statements marked DESTRUCTIVE before applying.\n");
        Self {
            kind,
            out,
            dropped: 0,
            created: 0,
            altered: 0,
        }
    }

    /// Emit the diff's warnings that concern this document.
    fn warnings(&mut self, diff: &DiffSet) {
        for warning in diff.warnings.iter().filter(|w| warning_document(w) == self.kind) {
            self.out.push_str(&format!("-- WARNING: {}\n", warning));
        }
    }

    fn section(&mut self, title: &str) {
        self.out.push_str(&format!("\n-- {}\n", title));
    }

    fn comment(&mut self, text: &str) {
        self.out.push_str(&format!("-- {}\n", text));
    }

    fn statement(&mut self, sql: &str) {
        self.out.push_str(sql);
        self.out.push('\n');
    }

    fn finish(mut self) -> SqlDocument {
        if self.dropped == 0 && self.created == 0 && self.altered == 0 {
            self.out.push_str("\n-- No changes.\n");
        }

        let counts = format!(
            "dropped={} created={} altered={}",
            self.dropped, self.created, self.altered
        );
        self.out.push_str(&format!("\n-- Summary: {}\n", counts));
        self.out.push_str("DO $$\nBEGIN\n");
        self.out.push_str(&format!(
            "    RAISE NOTICE {};\n",
            quote_literal(&format!("{} complete: {}", self.kind.stem(), counts))
        ));
        self.out.push_str("END $$;\n");

        SqlDocument {
            kind: self.kind,
            file_name: self.kind.file_name().to_string(),
            sql: self.out,
            dropped: self.dropped,
            created: self.created,
            altered: self.altered,
        }
    }
}

/// SQL generator for PostgreSQL synchronization scripts.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    schema: String,
}

impl Default for SqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlGenerator {
    /// Generator for objects in the `public` schema.
    pub fn new() -> Self {
        Self::for_schema("public")
    }

    /// Generator for objects in `schema`. Names outside `public` are qualified.
    pub fn for_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Render the four documents for a diff.
    pub fn render(&self, diff: &DiffSet) -> SyncScripts {
        SyncScripts {
            documents: vec![
                self.structural_cleanup(diff),
                self.column_sync(diff),
                self.policy_sync(diff),
                self.function_trigger_sync(diff),
            ],
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.schema == "public" {
            quote_ident(name)
        } else {
            format!("{}.{}", quote_ident(&self.schema), quote_ident(name))
        }
    }

    fn structural_cleanup(&self, diff: &DiffSet) -> SqlDocument {
        let mut doc = DocumentBuilder::new(DocumentKind::StructuralCleanup);
        doc.warnings(diff);

        if !diff.drop_tables.is_empty() {
            doc.section("Obsolete tables");
            for table in &diff.drop_tables {
                doc.comment(&format!("DESTRUCTIVE: drops table {} and all of its rows", table));
                doc.statement(&format!("DROP TABLE IF EXISTS {} CASCADE;", self.qualify(table)));
                doc.dropped += 1;
            }
        }

        if !diff.create_tables.is_empty() {
            doc.section("Missing tables");
            for table in &diff.create_tables {
                doc.statement(&self.create_table(table));
                doc.created += 1;
                for index in &table.indexes {
                    doc.statement(&create_index(&index.definition));
                    doc.created += 1;
                }
            }
        }

        if !diff.create_indexes.is_empty() {
            doc.section("Missing indexes");
            for index in &diff.create_indexes {
                doc.statement(&create_index(&index.definition));
                doc.created += 1;
            }
        }

        if !diff.create_foreign_keys.is_empty() {
            doc.section("Foreign keys of new tables");
            for fk in &diff.create_foreign_keys {
                doc.statement(&self.add_foreign_key(fk));
                doc.created += 1;
            }
        }

        doc.finish()
    }

    fn column_sync(&self, diff: &DiffSet) -> SqlDocument {
        let mut doc = DocumentBuilder::new(DocumentKind::ColumnSync);
        doc.warnings(diff);

        if !diff.add_columns.is_empty() {
            doc.section("Missing columns");
            for column in &diff.add_columns {
                for stmt in self.add_column(column) {
                    doc.statement(&stmt);
                }
                doc.created += 1;
            }
        }

        if !diff.drop_columns.is_empty() {
            doc.section("Obsolete columns");
            for column in &diff.drop_columns {
                doc.comment(&format!(
                    "DESTRUCTIVE: drops column {}.{} and its data",
                    column.table, column.name
                ));
                doc.statement(&format!(
                    "ALTER TABLE {} DROP COLUMN IF EXISTS {} CASCADE;",
                    self.qualify(&column.table),
                    quote_ident(&column.name)
                ));
                doc.dropped += 1;
            }
        }

        if !diff.alter_columns.is_empty() {
            doc.section("Changed columns");
            for change in &diff.alter_columns {
                if recreates_column(change) {
                    doc.comment(&format!(
                        "DESTRUCTIVE: {}.{} is dropped and re-added with its new generation expression",
                        change.table(),
                        change.column()
                    ));
                } else if change.type_changed() {
                    doc.comment(&format!(
                        "type change: {}.{} {} -> {}",
                        change.table(),
                        change.column(),
                        change.target.sql_type(),
                        change.reference.sql_type()
                    ));
                }
                for stmt in self.alter_column(change) {
                    doc.statement(&stmt);
                }
                doc.altered += 1;
            }
        }

        doc.finish()
    }

    fn policy_sync(&self, diff: &DiffSet) -> SqlDocument {
        let mut doc = DocumentBuilder::new(DocumentKind::PolicySync);

        if !diff.enable_rls.is_empty() {
            doc.section("Row-level security");
            for table in &diff.enable_rls {
                doc.statement(&format!(
                    "ALTER TABLE {} ENABLE ROW LEVEL SECURITY;",
                    self.qualify(table)
                ));
                doc.altered += 1;
            }
        }

        if !diff.drop_policies.is_empty() {
            doc.section("Obsolete policies");
            for policy in &diff.drop_policies {
                doc.comment(&format!(
                    "DESTRUCTIVE: drops policy {} on {}",
                    policy.name, policy.table
                ));
                doc.statement(&self.drop_policy(policy));
                doc.dropped += 1;
            }
        }

        if !diff.upsert_policies.is_empty() {
            doc.section("New and changed policies");
            for policy in &diff.upsert_policies {
                doc.statement(&self.drop_policy(policy));
                doc.statement(&self.create_policy(policy));
                doc.created += 1;
            }
        }

        doc.finish()
    }

    fn function_trigger_sync(&self, diff: &DiffSet) -> SqlDocument {
        let mut doc = DocumentBuilder::new(DocumentKind::FunctionTriggerSync);
        doc.warnings(diff);

        if !diff.drop_triggers.is_empty() {
            doc.section("Obsolete triggers");
            for trigger in &diff.drop_triggers {
                doc.comment(&format!(
                    "DESTRUCTIVE: drops trigger {} on {}",
                    trigger.name, trigger.table
                ));
                doc.statement(&self.drop_trigger(trigger));
                doc.dropped += 1;
            }
        }

        if !diff.drop_functions.is_empty() {
            doc.section("Obsolete functions");
            for function in &diff.drop_functions {
                doc.comment(&format!("DESTRUCTIVE: drops function {}", function.signature()));
                doc.statement(&format!(
                    "DROP FUNCTION IF EXISTS {}({});",
                    self.qualify(&function.name),
                    function.arg_signature
                ));
                doc.dropped += 1;
            }
        }

        if !diff.upsert_functions.is_empty() {
            doc.section("New and changed functions");
            for function in &diff.upsert_functions {
                if return_type_changes(diff, function) {
                    doc.comment(&format!(
                        "DESTRUCTIVE: drops {} so it can be recreated with a new return type",
                        function.signature()
                    ));
                    doc.statement(&format!(
                        "DROP FUNCTION IF EXISTS {}({});",
                        self.qualify(&function.name),
                        function.arg_signature
                    ));
                    doc.dropped += 1;
                }
                doc.statement(&create_function(function));
                doc.created += 1;
            }
        }

        if !diff.create_triggers.is_empty() {
            doc.section("New and changed triggers");
            for trigger in &diff.create_triggers {
                doc.statement(&self.drop_trigger(trigger));
                doc.statement(&self.create_trigger(trigger));
                doc.created += 1;
            }
        }

        doc.finish()
    }

    /// Generate CREATE TABLE statement.
    fn create_table(&self, table: &TableDefinition) -> String {
        let mut lines: Vec<String> = table.columns.iter().map(column_definition).collect();

        if let Some(pk) = &table.primary_key {
            lines.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&pk.name),
                ident_list(&pk.columns)
            ));
        }

        for unique in &table.unique_constraints {
            lines.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote_ident(&unique.name),
                ident_list(&unique.columns)
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.qualify(&table.name),
            lines.join(",\n    ")
        )
    }

    fn add_foreign_key(&self, fk: &ForeignKeyDefinition) -> String {
        let table = self.qualify(&fk.table);
        format!(
            "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_constraint\n        WHERE conname = {} AND conrelid = {}::regclass\n    ) THEN\n        ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});\n    END IF;\nEND $$;",
            quote_literal(&fk.name),
            quote_literal(&table),
            table,
            quote_ident(&fk.name),
            ident_list(&fk.columns),
            self.qualify(&fk.foreign_table),
            ident_list(&fk.foreign_columns)
        )
    }

    fn add_column(&self, column: &ColumnDescriptor) -> Vec<String> {
        let table = self.qualify(&column.table);
        let mut stmts = Vec::new();

        // NOT NULL without a default cannot be added to a populated table.
        // Identity and generated columns fill existing rows themselves.
        let deferred_not_null = !column.nullable
            && column.default.is_none()
            && column.identity.is_none()
            && column.generated.is_none();
        let mut definition = column.clone();
        if deferred_not_null {
            definition.nullable = true;
        }

        stmts.push(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
            table,
            column_definition(&definition)
        ));
        if deferred_not_null {
            stmts.push(self.guarded_set_not_null(&column.table, &column.name));
        }
        stmts
    }

    fn alter_column(&self, change: &ColumnChange) -> Vec<String> {
        let table = self.qualify(change.table());
        let column = quote_ident(change.column());
        let reference = &change.reference;
        let alter = |action: &str| format!("ALTER TABLE {} ALTER COLUMN {} {};", table, column, action);

        if recreates_column(change) {
            return vec![
                format!("ALTER TABLE {} DROP COLUMN IF EXISTS {};", table, column),
                format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                    table,
                    column_definition(reference)
                ),
            ];
        }

        let mut stmts = Vec::new();
        if change.identity_changed() && reference.identity.is_none() {
            stmts.push(alter("DROP IDENTITY IF EXISTS"));
        }
        if change.generation_changed() {
            stmts.push(alter("DROP EXPRESSION IF EXISTS"));
        }

        // The old default may not cast to the new type: drop it before the
        // type change and restore the reference default afterwards.
        let retyped_with_default = change.type_changed() && change.target.default.is_some();
        if retyped_with_default {
            stmts.push(alter("DROP DEFAULT"));
        }
        if change.type_changed() {
            let new_type = reference.sql_type();
            stmts.push(alter(&format!("TYPE {} USING {}::{}", new_type, column, new_type)));
        }
        if retyped_with_default || change.default_changed() {
            match &reference.default {
                Some(default) => stmts.push(alter(&format!("SET DEFAULT {}", default))),
                None if !retyped_with_default => stmts.push(alter("DROP DEFAULT")),
                None => {}
            }
        }

        if change.loosens_nullability() {
            stmts.push(alter("DROP NOT NULL"));
        } else if change.tightens_nullability() {
            stmts.push(self.guarded_set_not_null(change.table(), change.column()));
        }

        match (reference.identity, change.target.identity) {
            (Some(kind), None) => {
                stmts.push(self.guarded_add_identity(change.table(), change.column(), kind))
            }
            (Some(kind), Some(_)) if change.identity_changed() => {
                stmts.push(alter(&format!("SET GENERATED {}", kind.as_sql())))
            }
            _ => {}
        }

        stmts
    }

    /// Turn an existing column into an identity column and start its sequence
    /// past the current maximum. Skipped with a notice while the column
    /// still allows NULL.
    fn guarded_add_identity(&self, table: &str, column: &str, kind: IdentityGeneration) -> String {
        let qualified = self.qualify(table);
        let ident = quote_ident(column);
        format!(
            "DO $$\nBEGIN\n    IF EXISTS (\n        SELECT 1 FROM pg_attribute\n        WHERE attrelid = {rel}::regclass AND attname = {name} AND attidentity = ''\n    ) THEN\n        IF EXISTS (\n            SELECT 1 FROM pg_attribute\n            WHERE attrelid = {rel}::regclass AND attname = {name} AND NOT attnotnull\n        ) THEN\n            RAISE NOTICE {notice};\n        ELSE\n            ALTER TABLE {qualified} ALTER COLUMN {ident} ADD GENERATED {kind} AS IDENTITY;\n            PERFORM setval(pg_get_serial_sequence({rel}, {name}), COALESCE(MAX({ident}), 0) + 1, false) FROM {qualified};\n        END IF;\n    END IF;\nEND $$;",
            rel = quote_literal(&qualified),
            name = quote_literal(column),
            notice = quote_literal(&format!(
                "skipped identity on {}.{}: column allows NULL",
                table, column
            )),
            qualified = qualified,
            ident = ident,
            kind = kind.as_sql(),
        )
    }

    /// SET NOT NULL only when no row violates it; otherwise raise a notice.
    fn guarded_set_not_null(&self, table: &str, column: &str) -> String {
        let qualified = self.qualify(table);
        let ident = quote_ident(column);
        format!(
            "DO $$\nBEGIN\n    IF EXISTS (SELECT 1 FROM {} WHERE {} IS NULL) THEN\n        RAISE NOTICE {};\n    ELSE\n        ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;\n    END IF;\nEND $$;",
            qualified,
            ident,
            quote_literal(&format!(
                "skipped SET NOT NULL on {}.{}: NULL values present",
                table, column
            )),
            qualified,
            ident
        )
    }

    fn drop_policy(&self, policy: &PolicyDescriptor) -> String {
        format!(
            "DROP POLICY IF EXISTS {} ON {};",
            quote_ident(&policy.name),
            self.qualify(&policy.table)
        )
    }

    fn create_policy(&self, policy: &PolicyDescriptor) -> String {
        let roles = if policy.roles.is_empty() {
            "PUBLIC".to_string()
        } else {
            policy
                .roles
                .iter()
                .map(|r| {
                    if r.eq_ignore_ascii_case("public") {
                        "PUBLIC".to_string()
                    } else {
                        quote_ident(r)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "CREATE POLICY {} ON {} AS {} FOR {} TO {}",
            quote_ident(&policy.name),
            self.qualify(&policy.table),
            if policy.permissive { "PERMISSIVE" } else { "RESTRICTIVE" },
            policy.command,
            roles
        );
        if let Some(using) = &policy.using_expr {
            sql.push_str(&format!(" USING ({})", using));
        }
        if let Some(check) = &policy.with_check_expr {
            sql.push_str(&format!(" WITH CHECK ({})", check));
        }
        sql.push(';');
        sql
    }

    fn drop_trigger(&self, trigger: &TriggerDescriptor) -> String {
        format!(
            "DROP TRIGGER IF EXISTS {} ON {};",
            quote_ident(&trigger.name),
            self.qualify(&trigger.table)
        )
    }

    fn create_trigger(&self, trigger: &TriggerDescriptor) -> String {
        // Catalog definitions name the table unqualified; see `unqualify_trigger_table`.
        if let Some(definition) = &trigger.definition {
            let definition = definition.trim().trim_end_matches(';').replacen(
                &format!(" ON {} ", quote_ident(&trigger.table)),
                &format!(" ON {} ", self.qualify(&trigger.table)),
                1,
            );
            return format!("{};", definition);
        }

        let events = trigger
            .events
            .iter()
            .map(|e| e.as_sql())
            .collect::<Vec<_>>()
            .join(" OR ");
        format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH {} {};",
            quote_ident(&trigger.name),
            trigger.timing.as_sql(),
            events,
            self.qualify(&trigger.table),
            trigger.orientation.to_uppercase(),
            trigger.statement.trim().trim_end_matches(';')
        )
    }
}

fn warning_document(warning: &DiffWarning) -> DocumentKind {
    match warning {
        DiffWarning::DataLoss { object } if object.contains('.') => DocumentKind::ColumnSync,
        DiffWarning::DataLoss { .. } | DiffWarning::PossibleTableRename { .. } => {
            DocumentKind::StructuralCleanup
        }
        DiffWarning::PossibleColumnRename { .. } => DocumentKind::ColumnSync,
        DiffWarning::FunctionReturnTypeChanged { .. } => DocumentKind::FunctionTriggerSync,
    }
}

/// A generation expression cannot be altered in place.
fn recreates_column(change: &ColumnChange) -> bool {
    change.generation_changed() && change.reference.generated.is_some()
}

fn return_type_changes(diff: &DiffSet, function: &FunctionDescriptor) -> bool {
    let signature = function.signature();
    diff.warnings.iter().any(|w| {
        matches!(w, DiffWarning::FunctionReturnTypeChanged { function, .. } if *function == signature)
    })
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generate column definition.
fn column_definition(column: &ColumnDescriptor) -> String {
    // A sequence default would reference a sequence the target lacks.
    if let Some(serial) = serial_type(column) {
        return format!("{} {}", quote_ident(&column.name), serial);
    }

    let mut parts = vec![quote_ident(&column.name), column.sql_type()];
    if let Some(kind) = column.identity {
        parts.push(format!("GENERATED {} AS IDENTITY", kind.as_sql()));
    } else if let Some(expr) = &column.generated {
        parts.push(format!("GENERATED ALWAYS AS ({}) STORED", expr));
    } else if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {}", default));
    }
    if !column.nullable {
        parts.push("NOT NULL".to_string());
    }
    parts.join(" ")
}

fn serial_type(column: &ColumnDescriptor) -> Option<&'static str> {
    let default = column.default.as_deref()?;
    if !default.trim_start().starts_with("nextval(") {
        return None;
    }
    match column.data_type.as_str() {
        "integer" | "int4" => Some("serial"),
        "bigint" | "int8" => Some("bigserial"),
        "smallint" | "int2" => Some("smallserial"),
        _ => None,
    }
}

/// Make a `pg_indexes` definition idempotent.
fn create_index(definition: &str) -> String {
    let definition = definition.trim().trim_end_matches(';');
    let rewritten = if definition.contains(" IF NOT EXISTS ") {
        definition.to_string()
    } else if let Some(rest) = definition.strip_prefix("CREATE UNIQUE INDEX ") {
        format!("CREATE UNIQUE INDEX IF NOT EXISTS {}", rest)
    } else if let Some(rest) = definition.strip_prefix("CREATE INDEX ") {
        format!("CREATE INDEX IF NOT EXISTS {}", rest)
    } else {
        definition.to_string()
    };
    format!("{};", rewritten)
}

/// Make a `pg_get_functiondef` definition a terminated CREATE OR REPLACE.
fn create_function(function: &FunctionDescriptor) -> String {
    let definition = function.definition.trim();
    let definition = match definition.strip_prefix("CREATE FUNCTION ") {
        Some(rest) => format!("CREATE OR REPLACE FUNCTION {}", rest),
        None => definition.to_string(),
    };
    if definition.ends_with(';') {
        definition
    } else {
        format!("{};", definition)
    }
}
