//! Typed structural description of one database at one point in time.
//!
//! A [`SchemaSnapshot`] is produced by the introspector and consumed by the
//! differ. It is never persisted; every run introspects afresh.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// The complete structure of one schema namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Base table names.
    pub tables: BTreeSet<String>,
    /// Columns of every table.
    pub columns: Vec<ColumnDescriptor>,
    /// Non-primary-key indexes.
    pub indexes: Vec<IndexDescriptor>,
    /// Primary key, foreign key and unique constraints, one entry per column.
    pub constraints: Vec<ConstraintDescriptor>,
    /// Row-level security flag per table.
    pub rls_enabled: BTreeMap<String, bool>,
    /// Row-level security policies.
    pub policies: Vec<PolicyDescriptor>,
    /// Function definitions.
    pub functions: Vec<FunctionDescriptor>,
    /// Trigger definitions.
    pub triggers: Vec<TriggerDescriptor>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort every descriptor list by its identity key.
    ///
    /// Must be called before diffing or rendering; the introspector does it
    /// for you.
    pub fn normalize(&mut self) {
        self.columns.sort_by(|a, b| {
            (&a.table, a.ordinal_position, &a.name).cmp(&(&b.table, b.ordinal_position, &b.name))
        });
        self.indexes.sort_by(|a, b| a.key().cmp(&b.key()));
        self.constraints.sort_by(|a, b| {
            (&a.table, &a.name, a.ordinal).cmp(&(&b.table, &b.name, b.ordinal))
        });
        self.policies.sort_by(|a, b| a.key().cmp(&b.key()));
        self.functions.sort_by(|a, b| a.key().cmp(&b.key()));
        self.triggers.sort_by(|a, b| a.key().cmp(&b.key()));
        for trigger in &mut self.triggers {
            trigger.events.sort();
            trigger.events.dedup();
        }
    }

    /// Builder-style variant of [`SchemaSnapshot::normalize`].
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Columns of one table in ordinal order.
    pub fn columns_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ColumnDescriptor> {
        self.columns.iter().filter(move |c| c.table == table)
    }

    /// Indexes of one table.
    pub fn indexes_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a IndexDescriptor> {
        self.indexes.iter().filter(move |i| i.table == table)
    }

    /// Constraints of one table.
    pub fn constraints_of<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ConstraintDescriptor> {
        self.constraints.iter().filter(move |c| c.table == table)
    }

    /// Whether row-level security is enabled on `table`.
    pub fn has_rls(&self, table: &str) -> bool {
        self.rls_enabled.get(table).copied().unwrap_or(false)
    }

    /// Total number of objects, used for logging.
    pub fn object_count(&self) -> usize {
        self.tables.len()
            + self.columns.len()
            + self.indexes.len()
            + self.constraints.len()
            + self.policies.len()
            + self.functions.len()
            + self.triggers.len()
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Owning table.
    pub table: String,
    /// Column name.
    pub name: String,
    /// Data type as reported by the catalog (e.g. `integer`, `character varying(20)`).
    pub data_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression.
    pub default: Option<String>,
    /// Character maximum length.
    pub max_length: Option<i32>,
    /// Numeric precision.
    pub numeric_precision: Option<i32>,
    /// Numeric scale.
    pub numeric_scale: Option<i32>,
    /// 1-based position within the table.
    pub ordinal_position: i32,
    /// Identity column kind, if any.
    #[serde(default)]
    pub identity: Option<IdentityGeneration>,
    /// Expression of a stored generated column.
    #[serde(default)]
    pub generated: Option<String>,
}

/// How an identity column supplies values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityGeneration {
    /// GENERATED ALWAYS: explicit values are rejected unless overridden.
    Always,
    /// GENERATED BY DEFAULT: explicit values win.
    ByDefault,
}

impl IdentityGeneration {
    /// Parse `information_schema.columns.identity_generation`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ALWAYS" => Some(Self::Always),
            "BY DEFAULT" => Some(Self::ByDefault),
            _ => None,
        }
    }

    /// SQL keyword(s) following `GENERATED`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::ByDefault => "BY DEFAULT",
        }
    }
}

impl ColumnDescriptor {
    /// Create a column with only the required attributes.
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        data_type: impl Into<String>,
        ordinal_position: i32,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            ordinal_position,
            identity: None,
            generated: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default expression.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Make the column an identity column. Identity columns are NOT NULL.
    pub fn identity(mut self, kind: IdentityGeneration) -> Self {
        self.identity = Some(kind);
        self.nullable = false;
        self
    }

    /// Make the column a stored generated column.
    pub fn generated_as(mut self, expr: impl Into<String>) -> Self {
        self.generated = Some(expr.into());
        self
    }

    /// Identity key.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }

    /// Renderable type, reattaching length or precision when the catalog
    /// reported them separately from the base type name.
    pub fn sql_type(&self) -> String {
        if self.data_type.contains('(') {
            return self.data_type.clone();
        }

        let base = self.data_type.to_lowercase();
        match base.as_str() {
            "character varying" | "varchar" | "character" | "char" | "bpchar" | "bit"
            | "bit varying" => match self.max_length {
                Some(len) => format!("{}({})", self.data_type, len),
                None => self.data_type.clone(),
            },
            "numeric" | "decimal" => match (self.numeric_precision, self.numeric_scale) {
                (Some(p), Some(s)) => format!("{}({},{})", self.data_type, p, s),
                (Some(p), None) => format!("{}({})", self.data_type, p),
                _ => self.data_type.clone(),
            },
            _ => self.data_type.clone(),
        }
    }
}

/// A non-primary-key index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Owning table.
    pub table: String,
    /// Index name.
    pub name: String,
    /// Full `CREATE [UNIQUE] INDEX` statement as reported by `pg_indexes`.
    pub definition: String,
}

impl IndexDescriptor {
    /// Create an index descriptor.
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            definition: definition.into(),
        }
    }

    /// Identity key.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// Kind of table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// PRIMARY KEY.
    PrimaryKey,
    /// FOREIGN KEY.
    ForeignKey,
    /// UNIQUE.
    Unique,
}

impl ConstraintKind {
    /// Parse a `pg_constraint.contype` code.
    pub fn from_contype(code: &str) -> Option<Self> {
        match code {
            "p" => Some(Self::PrimaryKey),
            "f" => Some(Self::ForeignKey),
            "u" => Some(Self::Unique),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::ForeignKey => "FOREIGN KEY",
            Self::Unique => "UNIQUE",
        }
    }
}

/// One column's participation in a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Owning table.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Constrained column.
    pub column: String,
    /// Referenced table (foreign keys).
    pub foreign_table: Option<String>,
    /// Referenced column (foreign keys).
    pub foreign_column: Option<String>,
    /// Position of `column` within a multi-column constraint.
    pub ordinal: i32,
}

impl ConstraintDescriptor {
    /// Create a single-column constraint.
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        kind: ConstraintKind,
        column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            kind,
            column: column.into(),
            foreign_table: None,
            foreign_column: None,
            ordinal: 1,
        }
    }

    /// Set the referenced table and column.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_table = Some(table.into());
        self.foreign_column = Some(column.into());
        self
    }
}

/// Command a row-level security policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyCommand {
    /// SELECT only.
    Select,
    /// INSERT only.
    Insert,
    /// UPDATE only.
    Update,
    /// DELETE only.
    Delete,
    /// All commands.
    All,
}

impl PolicyCommand {
    /// Parse the `cmd` column of `pg_policies`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "ALL" | "*" => Some(Self::All),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::All => "ALL",
        }
    }
}

impl fmt::Display for PolicyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A row-level security policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    /// Table the policy is attached to.
    pub table: String,
    /// Policy name.
    pub name: String,
    /// Command the policy applies to.
    pub command: PolicyCommand,
    /// PERMISSIVE (true) or RESTRICTIVE (false).
    pub permissive: bool,
    /// Roles the policy applies to.
    pub roles: Vec<String>,
    /// USING expression.
    pub using_expr: Option<String>,
    /// WITH CHECK expression.
    pub with_check_expr: Option<String>,
}

impl PolicyDescriptor {
    /// Create a permissive policy for PUBLIC with no expressions.
    pub fn new(table: impl Into<String>, name: impl Into<String>, command: PolicyCommand) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            command,
            permissive: true,
            roles: vec!["public".to_string()],
            using_expr: None,
            with_check_expr: None,
        }
    }

    /// Set the USING expression.
    pub fn using(mut self, expr: impl Into<String>) -> Self {
        self.using_expr = Some(expr.into());
        self
    }

    /// Set the WITH CHECK expression.
    pub fn with_check(mut self, expr: impl Into<String>) -> Self {
        self.with_check_expr = Some(expr.into());
        self
    }

    /// Set the roles.
    pub fn to_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Identity key.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Function name.
    pub name: String,
    /// Identity argument list (e.g. `x integer, y text`).
    pub arg_signature: String,
    /// Complete `CREATE OR REPLACE FUNCTION` text.
    pub definition: String,
    /// Implementation language.
    pub language: String,
    /// Whether the function runs as SECURITY DEFINER.
    pub security_definer: bool,
    /// Return type as reported by `pg_get_function_result`.
    #[serde(default)]
    pub result_type: Option<String>,
}

impl FunctionDescriptor {
    /// Create a function descriptor.
    pub fn new(
        name: impl Into<String>,
        arg_signature: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            arg_signature: arg_signature.into(),
            definition: definition.into(),
            language: "plpgsql".to_string(),
            security_definer: false,
            result_type: None,
        }
    }

    /// Set the return type.
    pub fn returns(mut self, result_type: impl Into<String>) -> Self {
        self.result_type = Some(result_type.into());
        self
    }

    /// Identity key.
    pub fn key(&self) -> (&str, &str) {
        (&self.name, &self.arg_signature)
    }

    /// `name(args)` as used by `DROP FUNCTION`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.arg_signature)
    }
}

/// When a trigger fires relative to its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerTiming {
    /// BEFORE.
    Before,
    /// AFTER.
    After,
    /// INSTEAD OF (views only).
    InsteadOf,
}

impl TriggerTiming {
    /// Parse a timing keyword.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "BEFORE" => Some(Self::Before),
            "AFTER" => Some(Self::After),
            "INSTEAD OF" => Some(Self::InsteadOf),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::InsteadOf => "INSTEAD OF",
        }
    }
}

/// Event that fires a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerEvent {
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
    /// TRUNCATE.
    Truncate,
}

impl TriggerEvent {
    /// Parse an event keyword.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "TRUNCATE" => Some(Self::Truncate),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// A table trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    /// Table the trigger is attached to.
    pub table: String,
    /// Trigger name.
    pub name: String,
    /// Firing time.
    pub timing: TriggerTiming,
    /// Firing events, sorted.
    pub events: Vec<TriggerEvent>,
    /// `ROW` or `STATEMENT`.
    pub orientation: String,
    /// Action statement (e.g. `EXECUTE FUNCTION touch_updated_at()`).
    pub statement: String,
    /// Complete `CREATE TRIGGER` text from `pg_get_triggerdef`, carrying
    /// `UPDATE OF` columns, `WHEN` conditions and transition tables.
    #[serde(default)]
    pub definition: Option<String>,
}

impl TriggerDescriptor {
    /// Create a row-level trigger on a single event.
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        timing: TriggerTiming,
        event: TriggerEvent,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            timing,
            events: vec![event],
            orientation: "ROW".to_string(),
            statement: statement.into(),
            definition: None,
        }
    }

    /// Attach the catalog's full definition.
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// Identity key.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// Tables that are never diffed in either direction unless configured otherwise.
pub const DEFAULT_SKIPPED_TABLES: &[&str] = &[crate::history::DEFAULT_TRACKING_TABLE, "spatial_ref_sys"];

/// Objects excluded from every diff.
///
/// Membership is by exact name. A skipped table also hides its columns,
/// indexes, constraints, policies and triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipList {
    tables: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl Default for SkipList {
    fn default() -> Self {
        let mut list = Self::empty();
        for table in DEFAULT_SKIPPED_TABLES {
            list.tables.insert((*table).to_string());
        }
        list
    }
}

impl SkipList {
    /// A skip list with no entries.
    pub fn empty() -> Self {
        Self {
            tables: BTreeSet::new(),
            functions: BTreeSet::new(),
        }
    }

    /// Add a table name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.tables.insert(name.into());
        self
    }

    /// Add a function name (all overloads).
    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(name.into());
        self
    }

    /// Add several table names.
    pub fn tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add several function names.
    pub fn functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether `table` is excluded.
    pub fn skips_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Whether `function` is excluded.
    pub fn skips_function(&self, function: &str) -> bool {
        self.functions.contains(function)
    }

    /// Skipped table names in sorted order.
    pub fn skipped_tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Skipped function names in sorted order.
    pub fn skipped_functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_list_defaults() {
        let skip = SkipList::default();
        assert!(skip.skips_table("schema_migrations"));
        assert!(skip.skips_table("spatial_ref_sys"));
        assert!(!skip.skips_table("users"));
        assert_eq!(skip.skipped_functions().count(), 0);

        let skip = SkipList::empty().table("users_backup").function("pgrst_watch");
        assert!(skip.skips_table("users_backup"));
        assert!(skip.skips_function("pgrst_watch"));
        assert!(!skip.skips_table("schema_migrations"));
    }

    #[test]
    fn test_sql_type_reattaches_modifiers() {
        let mut col = ColumnDescriptor::new("t", "code", "character varying", 1);
        col.max_length = Some(20);
        assert_eq!(col.sql_type(), "character varying(20)");

        let mut col = ColumnDescriptor::new("t", "amount", "numeric", 2);
        col.numeric_precision = Some(10);
        col.numeric_scale = Some(2);
        assert_eq!(col.sql_type(), "numeric(10,2)");

        // Integer precision is informational only.
        let mut col = ColumnDescriptor::new("t", "qty", "integer", 3);
        col.numeric_precision = Some(32);
        assert_eq!(col.sql_type(), "integer");

        let col = ColumnDescriptor::new("t", "code", "character varying(8)", 4);
        assert_eq!(col.sql_type(), "character varying(8)");
    }

    #[test]
    fn test_normalize_orders_by_identity_key() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.columns = vec![
            ColumnDescriptor::new("b", "z", "text", 2),
            ColumnDescriptor::new("b", "a", "text", 1),
            ColumnDescriptor::new("a", "id", "uuid", 1),
        ];
        snapshot.policies = vec![
            PolicyDescriptor::new("t", "p2", PolicyCommand::All),
            PolicyDescriptor::new("t", "p1", PolicyCommand::All),
        ];
        let mut trigger = TriggerDescriptor::new(
            "t",
            "trg",
            TriggerTiming::Before,
            TriggerEvent::Update,
            "EXECUTE FUNCTION f()",
        );
        trigger.events.push(TriggerEvent::Insert);
        trigger.events.push(TriggerEvent::Update);
        snapshot.triggers = vec![trigger];

        snapshot.normalize();

        let cols: Vec<_> = snapshot.columns.iter().map(|c| c.key()).collect();
        assert_eq!(cols, vec![("a", "id"), ("b", "a"), ("b", "z")]);
        assert_eq!(snapshot.policies[0].name, "p1");
        assert_eq!(
            snapshot.triggers[0].events,
            vec![TriggerEvent::Insert, TriggerEvent::Update]
        );
    }

    #[test]
    fn test_catalog_code_parsing() {
        assert_eq!(ConstraintKind::from_contype("p"), Some(ConstraintKind::PrimaryKey));
        assert_eq!(ConstraintKind::from_contype("c"), None);
        assert_eq!(PolicyCommand::parse("select"), Some(PolicyCommand::Select));
        assert_eq!(PolicyCommand::parse("ALL"), Some(PolicyCommand::All));
        assert_eq!(PolicyCommand::parse("MERGE"), None);
        assert_eq!(TriggerTiming::parse("INSTEAD OF"), Some(TriggerTiming::InsteadOf));
        assert_eq!(TriggerEvent::parse("truncate"), Some(TriggerEvent::Truncate));
        assert_eq!(IdentityGeneration::parse("BY DEFAULT"), Some(IdentityGeneration::ByDefault));
        assert_eq!(IdentityGeneration::parse("ALWAYS"), Some(IdentityGeneration::Always));
        assert_eq!(IdentityGeneration::parse("NEVER"), None);
    }

    #[test]
    fn test_function_signature() {
        let f = FunctionDescriptor::new("calc", "x integer", "CREATE FUNCTION calc...");
        assert_eq!(f.signature(), "calc(x integer)");
        assert_eq!(f.key(), ("calc", "x integer"));
    }
}
