//! Schema diffing between a reference and a target snapshot.
//!
//! Every domain goes through [`compare_keyed`], so tables, columns, indexes,
//! policies, functions and triggers share one notion of "missing", "obsolete"
//! and "changed". The differ is a pure function of its two inputs; swapping
//! the arguments swaps the direction of synchronization.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, warn};

use crate::snapshot::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, FunctionDescriptor, IndexDescriptor,
    PolicyDescriptor, SchemaSnapshot, SkipList, TriggerDescriptor,
};

/// Result of comparing two identity-keyed collections.
#[derive(Debug)]
pub struct KeyedDiff<'a, T> {
    /// Items whose key exists only in the reference.
    pub only_in_reference: Vec<&'a T>,
    /// Items whose key exists only in the target.
    pub only_in_target: Vec<&'a T>,
    /// `(reference, target)` pairs sharing a key but differing.
    pub changed: Vec<(&'a T, &'a T)>,
}

impl<T> KeyedDiff<'_, T> {
    /// Whether the two collections are equivalent.
    pub fn is_empty(&self) -> bool {
        self.only_in_reference.is_empty()
            && self.only_in_target.is_empty()
            && self.changed.is_empty()
    }
}

/// Compare two collections by identity key.
///
/// Every output list is ordered by key. When a key appears more than once in
/// one collection the last occurrence wins.
pub fn compare_keyed<'a, T, R, G, K, F, S>(
    reference: R,
    target: G,
    key: F,
    same: S,
) -> KeyedDiff<'a, T>
where
    T: 'a,
    R: IntoIterator<Item = &'a T>,
    G: IntoIterator<Item = &'a T>,
    K: Ord,
    F: Fn(&'a T) -> K,
    S: Fn(&T, &T) -> bool,
{
    let reference: BTreeMap<K, &'a T> = reference.into_iter().map(|item| (key(item), item)).collect();
    let target: BTreeMap<K, &'a T> = target.into_iter().map(|item| (key(item), item)).collect();

    let mut diff = KeyedDiff {
        only_in_reference: Vec::new(),
        only_in_target: Vec::new(),
        changed: Vec::new(),
    };

    for (k, item) in &reference {
        match target.get(k) {
            None => diff.only_in_reference.push(*item),
            Some(other) if !same(*item, *other) => diff.changed.push((*item, *other)),
            Some(_) => {}
        }
    }

    for (k, item) in &target {
        if !reference.contains_key(k) {
            diff.only_in_target.push(*item);
        }
    }

    diff
}

/// Canonical form of a PostgreSQL type name for comparison.
///
/// Folds aliases (`varchar`, `int4`, `timestamptz`, `_int4`, ...) onto the
/// names `format_type` reports and removes whitespace inside modifiers.
/// The result is a comparison key, not necessarily valid SQL.
pub fn normalize_type(data_type: &str) -> String {
    let lowered = data_type.trim().to_lowercase();

    let (mut rest, mut array_dims) = match lowered.strip_prefix('_') {
        Some(element) => (element.to_string(), 1),
        None => (lowered.clone(), 0),
    };
    while rest.trim_end().ends_with("[]") {
        let len = rest.trim_end().len() - 2;
        rest.truncate(len);
        array_dims += 1;
    }

    // Modifiers may sit mid-name, as in `timestamp(3) with time zone`.
    let (base, modifier) = match (rest.find('('), rest.find(')')) {
        (Some(open), Some(close)) if close > open => {
            let modifier: String = rest[open..=close].chars().filter(|c| !c.is_whitespace()).collect();
            let base = format!("{} {}", &rest[..open], &rest[close + 1..]);
            (base, modifier)
        }
        _ => (rest, String::new()),
    };
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

    let canonical = match base.as_str() {
        "varchar" | "character varying" => "character varying",
        "char" | "character" | "bpchar" => "character",
        "int" | "int4" | "integer" => "integer",
        "int8" | "bigint" => "bigint",
        "int2" | "smallint" => "smallint",
        "bool" | "boolean" => "boolean",
        "float8" | "double precision" => "double precision",
        "float4" | "real" => "real",
        "decimal" | "numeric" => "numeric",
        "timestamp" | "timestamp without time zone" => "timestamp without time zone",
        "timestamptz" | "timestamp with time zone" => "timestamp with time zone",
        "time" | "time without time zone" => "time without time zone",
        "timetz" | "time with time zone" => "time with time zone",
        "varbit" | "bit varying" => "bit varying",
        other => other,
    };

    let mut normalized = format!("{canonical}{modifier}");
    for _ in 0..array_dims {
        normalized.push_str("[]");
    }
    normalized
}

fn normalize_expression(expr: Option<&str>) -> Option<String> {
    expr.map(|e| e.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|e| !e.is_empty())
}

/// A primary key or unique constraint, columns in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConstraint {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

/// A foreign key constraint, columns in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    /// Owning table.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub foreign_table: String,
    /// Referenced columns.
    pub foreign_columns: Vec<String>,
}

/// Everything needed to create a table that is missing from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key.
    pub primary_key: Option<KeyConstraint>,
    /// Unique constraints.
    pub unique_constraints: Vec<KeyConstraint>,
    /// Secondary indexes.
    pub indexes: Vec<IndexDescriptor>,
}

/// A column present on both sides whose definition differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    /// The column as the reference defines it.
    pub reference: ColumnDescriptor,
    /// The column as it exists on the target.
    pub target: ColumnDescriptor,
}

impl ColumnChange {
    /// Table name.
    pub fn table(&self) -> &str {
        &self.reference.table
    }

    /// Column name.
    pub fn column(&self) -> &str {
        &self.reference.name
    }

    /// Whether the normalized types differ.
    pub fn type_changed(&self) -> bool {
        types_differ(&self.reference, &self.target)
    }

    /// Whether the target allows NULL and the reference does not.
    pub fn tightens_nullability(&self) -> bool {
        !self.reference.nullable && self.target.nullable
    }

    /// Whether the reference allows NULL and the target does not.
    pub fn loosens_nullability(&self) -> bool {
        self.reference.nullable && !self.target.nullable
    }

    /// Whether the whitespace-normalized defaults differ.
    pub fn default_changed(&self) -> bool {
        defaults_differ(&self.reference, &self.target)
    }

    /// Whether the identity kind differs, including gaining or losing one.
    pub fn identity_changed(&self) -> bool {
        self.reference.identity != self.target.identity
    }

    /// Whether the generation expression differs, including gaining or losing one.
    pub fn generation_changed(&self) -> bool {
        generation_differs(&self.reference, &self.target)
    }
}

fn types_differ(reference: &ColumnDescriptor, target: &ColumnDescriptor) -> bool {
    normalize_type(&reference.sql_type()) != normalize_type(&target.sql_type())
}

fn defaults_differ(reference: &ColumnDescriptor, target: &ColumnDescriptor) -> bool {
    normalize_expression(reference.default.as_deref())
        != normalize_expression(target.default.as_deref())
}

fn generation_differs(reference: &ColumnDescriptor, target: &ColumnDescriptor) -> bool {
    normalize_expression(reference.generated.as_deref())
        != normalize_expression(target.generated.as_deref())
}

fn same_column(reference: &ColumnDescriptor, target: &ColumnDescriptor) -> bool {
    !types_differ(reference, target)
        && reference.nullable == target.nullable
        && !defaults_differ(reference, target)
        && reference.identity == target.identity
        && !generation_differs(reference, target)
}

fn same_policy(reference: &PolicyDescriptor, target: &PolicyDescriptor) -> bool {
    reference.command == target.command
        && normalize_expression(reference.using_expr.as_deref())
            == normalize_expression(target.using_expr.as_deref())
        && normalize_expression(reference.with_check_expr.as_deref())
            == normalize_expression(target.with_check_expr.as_deref())
}

fn same_trigger(reference: &TriggerDescriptor, target: &TriggerDescriptor) -> bool {
    reference.timing == target.timing
        && reference.events == target.events
        && reference.orientation.eq_ignore_ascii_case(&target.orientation)
        && normalize_expression(Some(&reference.statement))
            == normalize_expression(Some(&target.statement))
        && normalize_expression(reference.definition.as_deref())
            == normalize_expression(target.definition.as_deref())
}

/// Something the operator should know before applying a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffWarning {
    /// A dropped table or column takes its data with it.
    DataLoss {
        /// `table` or `table.column`.
        object: String,
    },
    /// Tables are dropped and created in one run; one may be a rename.
    PossibleTableRename {
        /// Tables dropped from the target.
        dropped: Vec<String>,
        /// Tables created on the target.
        created: Vec<String>,
    },
    /// A column is dropped and another of the same type added on one table.
    PossibleColumnRename {
        /// Table name.
        table: String,
        /// Column dropped from the target.
        dropped: String,
        /// Column added to the target.
        added: String,
        /// Shared normalized type.
        data_type: String,
    },
    /// A changed function returns a different type, which
    /// `CREATE OR REPLACE` cannot do; it is dropped and recreated.
    FunctionReturnTypeChanged {
        /// `name(args)`.
        function: String,
        /// Return type on the target.
        from: String,
        /// Return type on the reference.
        to: String,
    },
}

impl fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataLoss { object } => write!(f, "dropping {object} deletes its data"),
            Self::PossibleTableRename { dropped, created } => write!(
                f,
                "tables dropped ({}) and created ({}) in the same run; a rename is applied as drop + create and loses data",
                dropped.join(", "),
                created.join(", ")
            ),
            Self::PossibleColumnRename {
                table,
                dropped,
                added,
                data_type,
            } => write!(
                f,
                "{table}.{dropped} is dropped and {table}.{added} added with the same type {data_type}; a rename is applied as drop + add and loses data"
            ),
            Self::FunctionReturnTypeChanged { function, from, to } => write!(
                f,
                "{function} changes return type from {from} to {to}; it is dropped and recreated, and objects depending on it block the drop"
            ),
        }
    }
}

/// The create/drop/alter actions that align a target with a reference.
///
/// Every list is ordered by identity key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSet {
    /// Tables to create.
    pub create_tables: Vec<TableDefinition>,
    /// Tables to drop.
    pub drop_tables: Vec<String>,
    /// Columns to add to existing tables.
    pub add_columns: Vec<ColumnDescriptor>,
    /// Columns to drop from existing tables.
    pub drop_columns: Vec<ColumnDescriptor>,
    /// Columns to alter.
    pub alter_columns: Vec<ColumnChange>,
    /// Indexes to create on existing tables.
    pub create_indexes: Vec<IndexDescriptor>,
    /// Foreign keys of created tables.
    pub create_foreign_keys: Vec<ForeignKeyDefinition>,
    /// Tables on which to enable row-level security.
    pub enable_rls: Vec<String>,
    /// Obsolete policies.
    pub drop_policies: Vec<PolicyDescriptor>,
    /// New or changed policies.
    pub upsert_policies: Vec<PolicyDescriptor>,
    /// Obsolete functions.
    pub drop_functions: Vec<FunctionDescriptor>,
    /// New or changed functions.
    pub upsert_functions: Vec<FunctionDescriptor>,
    /// Obsolete triggers.
    pub drop_triggers: Vec<TriggerDescriptor>,
    /// New or changed triggers.
    pub create_triggers: Vec<TriggerDescriptor>,
    /// Operator warnings.
    pub warnings: Vec<DiffWarning>,
}

impl DiffSet {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.create_tables.is_empty()
            && self.drop_tables.is_empty()
            && self.add_columns.is_empty()
            && self.drop_columns.is_empty()
            && self.alter_columns.is_empty()
            && self.create_indexes.is_empty()
            && self.create_foreign_keys.is_empty()
            && self.enable_rls.is_empty()
            && self.drop_policies.is_empty()
            && self.upsert_policies.is_empty()
            && self.drop_functions.is_empty()
            && self.upsert_functions.is_empty()
            && self.drop_triggers.is_empty()
            && self.create_triggers.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let counts = [
            ("Create", self.create_tables.len(), "tables"),
            ("Drop", self.drop_tables.len(), "tables"),
            ("Add", self.add_columns.len(), "columns"),
            ("Drop", self.drop_columns.len(), "columns"),
            ("Alter", self.alter_columns.len(), "columns"),
            ("Create", self.create_indexes.len(), "indexes"),
            ("Create", self.create_foreign_keys.len(), "foreign keys"),
            ("Enable RLS on", self.enable_rls.len(), "tables"),
            ("Drop", self.drop_policies.len(), "policies"),
            ("Upsert", self.upsert_policies.len(), "policies"),
            ("Drop", self.drop_functions.len(), "functions"),
            ("Upsert", self.upsert_functions.len(), "functions"),
            ("Drop", self.drop_triggers.len(), "triggers"),
            ("Create", self.create_triggers.len(), "triggers"),
        ];

        let parts: Vec<String> = counts
            .iter()
            .filter(|(_, n, _)| *n > 0)
            .map(|(verb, n, noun)| format!("{verb} {n} {noun}"))
            .collect();

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Schema differ.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiffer {
    skip: SkipList,
}

impl SchemaDiffer {
    /// Create a differ that ignores the objects in `skip`.
    pub fn new(skip: SkipList) -> Self {
        Self { skip }
    }

    /// The skip list in use.
    pub fn skip_list(&self) -> &SkipList {
        &self.skip
    }

    /// Compute the actions that bring `target` in line with `reference`.
    pub fn diff(&self, reference: &SchemaSnapshot, target: &SchemaSnapshot) -> DiffSet {
        let mut result = DiffSet::default();

        let ref_tables: Vec<&String> = self.visible_tables(reference);
        let target_tables: Vec<&String> = self.visible_tables(target);
        let tables = compare_keyed(
            ref_tables.iter().copied(),
            target_tables.iter().copied(),
            |t| t.as_str(),
            |_, _| true,
        );

        for name in &tables.only_in_reference {
            let definition = table_definition(reference, name);
            result
                .create_foreign_keys
                .extend(foreign_keys(reference.constraints_of(name)));
            result.create_tables.push(definition);
        }
        result.drop_tables = tables.only_in_target.iter().map(|t| t.to_string()).collect();

        let shared: BTreeSet<&str> = ref_tables
            .iter()
            .filter(|t| target.tables.contains(t.as_str()))
            .map(|t| t.as_str())
            .collect();

        self.diff_columns(reference, target, &shared, &mut result);
        self.diff_indexes(reference, target, &shared, &mut result);

        result.enable_rls = ref_tables
            .iter()
            .filter(|t| reference.has_rls(t) && !target.has_rls(t))
            .map(|t| t.to_string())
            .collect();

        let policies = compare_keyed(
            reference.policies.iter().filter(|p| !self.skip.skips_table(&p.table)),
            target.policies.iter().filter(|p| !self.skip.skips_table(&p.table)),
            PolicyDescriptor::key,
            same_policy,
        );
        result.drop_policies = policies
            .only_in_target
            .into_iter()
            .filter(|p| reference.tables.contains(&p.table))
            .cloned()
            .collect();
        result.upsert_policies = merge_by_key(
            policies.only_in_reference,
            policies.changed.into_iter().map(|(r, _)| r).collect(),
            PolicyDescriptor::key,
        );

        let functions = compare_keyed(
            reference.functions.iter().filter(|f| !self.skip.skips_function(&f.name)),
            target.functions.iter().filter(|f| !self.skip.skips_function(&f.name)),
            FunctionDescriptor::key,
            |r, t| r.definition.trim() == t.definition.trim(),
        );
        let retyped: Vec<DiffWarning> = functions
            .changed
            .iter()
            .filter_map(|(r, t)| {
                let (to, from) = (r.result_type.as_deref()?, t.result_type.as_deref()?);
                (normalize_expression(Some(to)) != normalize_expression(Some(from))).then(|| {
                    DiffWarning::FunctionReturnTypeChanged {
                        function: r.signature(),
                        from: from.to_string(),
                        to: to.to_string(),
                    }
                })
            })
            .collect();
        result.drop_functions = functions.only_in_target.into_iter().cloned().collect();
        result.upsert_functions = merge_by_key(
            functions.only_in_reference,
            functions.changed.into_iter().map(|(r, _)| r).collect(),
            FunctionDescriptor::key,
        );

        let triggers = compare_keyed(
            reference.triggers.iter().filter(|t| !self.skip.skips_table(&t.table)),
            target.triggers.iter().filter(|t| !self.skip.skips_table(&t.table)),
            TriggerDescriptor::key,
            same_trigger,
        );
        result.drop_triggers = triggers
            .only_in_target
            .into_iter()
            .filter(|t| reference.tables.contains(&t.table))
            .cloned()
            .collect();
        result.create_triggers = merge_by_key(
            triggers.only_in_reference,
            triggers.changed.into_iter().map(|(r, _)| r).collect(),
            TriggerDescriptor::key,
        );

        result.warnings = collect_warnings(&result);
        result.warnings.extend(retyped);
        for warning in &result.warnings {
            warn!(%warning, "Schema diff warning");
        }
        debug!(summary = %result.summary(), "Schema diff computed");

        result
    }

    fn visible_tables<'a>(&self, snapshot: &'a SchemaSnapshot) -> Vec<&'a String> {
        snapshot
            .tables
            .iter()
            .filter(|t| !self.skip.skips_table(t))
            .collect()
    }

    fn diff_columns(
        &self,
        reference: &SchemaSnapshot,
        target: &SchemaSnapshot,
        shared: &BTreeSet<&str>,
        result: &mut DiffSet,
    ) {
        let columns = compare_keyed(
            reference.columns.iter().filter(|c| shared.contains(c.table.as_str())),
            target.columns.iter().filter(|c| shared.contains(c.table.as_str())),
            ColumnDescriptor::key,
            same_column,
        );

        let mut added: Vec<ColumnDescriptor> = columns.only_in_reference.into_iter().cloned().collect();
        // New columns are added in the reference's ordinal order.
        added.sort_by(|a, b| (&a.table, a.ordinal_position).cmp(&(&b.table, b.ordinal_position)));
        result.add_columns = added;
        result.drop_columns = columns.only_in_target.into_iter().cloned().collect();
        result.alter_columns = columns
            .changed
            .into_iter()
            .map(|(r, t)| ColumnChange {
                reference: r.clone(),
                target: t.clone(),
            })
            .collect();
    }

    fn diff_indexes(
        &self,
        reference: &SchemaSnapshot,
        target: &SchemaSnapshot,
        shared: &BTreeSet<&str>,
        result: &mut DiffSet,
    ) {
        let indexes = compare_keyed(
            reference.indexes.iter().filter(|i| shared.contains(i.table.as_str())),
            target.indexes.iter().filter(|i| shared.contains(i.table.as_str())),
            IndexDescriptor::key,
            |_, _| true,
        );
        result.create_indexes = indexes.only_in_reference.into_iter().cloned().collect();
    }
}

/// Merge two key-ordered lists into one key-ordered list.
fn merge_by_key<'a, T, K, F>(mut first: Vec<&'a T>, second: Vec<&'a T>, key: F) -> Vec<T>
where
    T: Clone + 'a,
    K: Ord,
    F: Fn(&'a T) -> K,
{
    first.extend(second);
    first.sort_by(|a, b| key(*a).cmp(&key(*b)));
    first.into_iter().cloned().collect()
}

fn table_definition(snapshot: &SchemaSnapshot, table: &str) -> TableDefinition {
    let columns: Vec<ColumnDescriptor> = snapshot.columns_of(table).cloned().collect();
    let groups = group_constraints(snapshot.constraints_of(table));

    let primary_key = groups
        .iter()
        .find(|(_, kind, _)| *kind == ConstraintKind::PrimaryKey)
        .map(|(name, _, cols)| KeyConstraint {
            name: name.clone(),
            columns: cols.iter().map(|c| c.column.clone()).collect(),
        });

    let unique_constraints = groups
        .iter()
        .filter(|(_, kind, _)| *kind == ConstraintKind::Unique)
        .map(|(name, _, cols)| KeyConstraint {
            name: name.clone(),
            columns: cols.iter().map(|c| c.column.clone()).collect(),
        })
        .collect();

    TableDefinition {
        name: table.to_string(),
        columns,
        primary_key,
        unique_constraints,
        indexes: snapshot.indexes_of(table).cloned().collect(),
    }
}

fn foreign_keys<'a>(
    constraints: impl Iterator<Item = &'a ConstraintDescriptor>,
) -> Vec<ForeignKeyDefinition> {
    group_constraints(constraints)
        .into_iter()
        .filter(|(_, kind, _)| *kind == ConstraintKind::ForeignKey)
        .filter_map(|(name, _, cols)| {
            let first = cols.first()?;
            Some(ForeignKeyDefinition {
                table: first.table.clone(),
                name,
                columns: cols.iter().map(|c| c.column.clone()).collect(),
                foreign_table: first.foreign_table.clone()?,
                foreign_columns: cols.iter().filter_map(|c| c.foreign_column.clone()).collect(),
            })
        })
        .collect()
}

/// Group per-column constraint rows by constraint name, ordered by name then ordinal.
fn group_constraints<'a>(
    constraints: impl Iterator<Item = &'a ConstraintDescriptor>,
) -> Vec<(String, ConstraintKind, Vec<&'a ConstraintDescriptor>)> {
    let mut groups: BTreeMap<&str, (ConstraintKind, Vec<&'a ConstraintDescriptor>)> = BTreeMap::new();
    for constraint in constraints {
        groups
            .entry(constraint.name.as_str())
            .or_insert_with(|| (constraint.kind, Vec::new()))
            .1
            .push(constraint);
    }

    groups
        .into_iter()
        .map(|(name, (kind, mut cols))| {
            cols.sort_by_key(|c| c.ordinal);
            (name.to_string(), kind, cols)
        })
        .collect()
}

fn collect_warnings(diff: &DiffSet) -> Vec<DiffWarning> {
    let mut warnings: Vec<DiffWarning> = diff
        .drop_tables
        .iter()
        .map(|t| DiffWarning::DataLoss { object: t.clone() })
        .collect();

    warnings.extend(diff.drop_columns.iter().map(|c| DiffWarning::DataLoss {
        object: format!("{}.{}", c.table, c.name),
    }));

    if !diff.drop_tables.is_empty() && !diff.create_tables.is_empty() {
        warnings.push(DiffWarning::PossibleTableRename {
            dropped: diff.drop_tables.clone(),
            created: diff.create_tables.iter().map(|t| t.name.clone()).collect(),
        });
    }

    for dropped in &diff.drop_columns {
        let dropped_type = normalize_type(&dropped.sql_type());
        for added in diff.add_columns.iter().filter(|a| a.table == dropped.table) {
            if normalize_type(&added.sql_type()) == dropped_type {
                warnings.push(DiffWarning::PossibleColumnRename {
                    table: dropped.table.clone(),
                    dropped: dropped.name.clone(),
                    added: added.name.clone(),
                    data_type: dropped_type.clone(),
                });
            }
        }
    }

    warnings
}
