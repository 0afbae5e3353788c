//! Commands: the instruction set of the timeline
//!
//! Every user operation that mutates a table is a [`CommandKind`] variant
//! with a frozen params struct. Commands are self-contained and
//! serializable; forward SQL is rebuilt from the params on every apply and
//! replay, so a replay re-issues byte-identical semantics.
//!
//! The tier is a property of the definition, not user-selectable:
//!
//! | Tier | Undo mechanism |
//! |------|----------------|
//! | 1    | Expression chain over a `{col}__base` shadow |
//! | 2    | Inverse SQL captured at apply time |
//! | 3    | Snapshot before apply, restore + replay |

use cleanslate_core::{ColumnInfo, ColumnType, CoreError, Result, SnapshotId, TableId, Value, CS_ID, CS_ID_GAP, ORIGIN_ID};
use cleanslate_engine::qident;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Undo-mechanism tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Expression-chainable single-column transform
    Expression = 1,
    /// Inverse SQL captured at apply time
    InverseSql = 2,
    /// Snapshot-backed
    Snapshot = 3,
}

/// One coalesced cell edit inside an `edit:cell-batch` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEdit {
    /// Row identity
    pub cs_id: i64,
    /// Column name
    pub column: String,
    /// Earliest previous value
    pub previous: Value,
    /// Latest new value
    pub new: Value,
}

/// One group of rows merged into a survivor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeGroup {
    /// Row that survives the merge
    pub survivor_cs_id: i64,
    /// Rows deleted by the merge
    pub merged_cs_ids: Vec<i64>,
    /// Column values resolved onto the survivor
    pub resolved: BTreeMap<String, Value>,
}

/// Command parameters, one variant per command definition
///
/// Params are frozen: they serialize verbatim with the timeline and are
/// never mutated after apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Strip whitespace (tier 1)
    Trim {
        /// Target column
        column: String,
    },
    /// Uppercase (tier 1)
    Uppercase {
        /// Target column
        column: String,
    },
    /// Lowercase (tier 1)
    Lowercase {
        /// Target column
        column: String,
    },
    /// Proper Case Each Word (tier 1)
    Proper {
        /// Target column
        column: String,
    },
    /// Left-pad with zeros to a fixed length (tier 1)
    PadZeros {
        /// Target column
        column: String,
        /// Final padded length
        length: u32,
    },
    /// Simple text substitution (tier 1)
    Replace {
        /// Target column
        column: String,
        /// Text to find
        find: String,
        /// Replacement text
        replace_with: String,
    },
    /// Rename a column (tier 2)
    RenameColumn {
        /// Current name
        from: String,
        /// New name
        to: String,
    },
    /// A flushed batch of coalesced cell edits (tier 2)
    CellEditBatch {
        /// The edits, one per `(cs_id, column)`
        edits: Vec<CellEdit>,
    },
    /// Set a column from a validated formula (tier 3)
    Formula {
        /// Target column (created when absent)
        column: String,
        /// The formula as the user wrote it
        expression: String,
        /// The transpiled SQL expression
        sql: String,
    },
    /// Remove duplicate rows, keeping the lowest `_cs_id` (tier 3)
    Dedupe {
        /// Columns that define duplication; empty = all user columns
        columns: Vec<String>,
    },
    /// Change a column's declared type (tier 3)
    CastType {
        /// Target column
        column: String,
        /// New declared type
        to: ColumnType,
    },
    /// Split a column on a separator into two new columns (tier 3)
    SplitColumn {
        /// Source column
        column: String,
        /// Separator text
        separator: String,
        /// Name of the first piece's column
        left: String,
        /// Name of the second piece's column
        right: String,
    },
    /// Merge matched duplicate rows into survivors (tier 3)
    MatchMerge {
        /// The merge groups
        groups: Vec<MergeGroup>,
    },
    /// Append another table's rows (tier 3)
    Stack {
        /// Source table whose rows append to the active table
        other_table: String,
    },
    /// Join columns in from another table (tier 3)
    Join {
        /// The other table
        other_table: String,
        /// Key column on the active table
        left_key: String,
        /// Key column on the other table
        right_key: String,
        /// Columns pulled in from the other table
        columns: Vec<String>,
    },
    /// Map raw values to standardized ones (tier 3)
    Standardize {
        /// Target column
        column: String,
        /// Raw value → standardized value
        mapping: BTreeMap<String, String>,
    },
    /// User-authored SQL (tier 3)
    CustomSql {
        /// The statement
        sql: String,
    },
}

impl CommandKind {
    /// The command's tier
    pub fn tier(&self) -> Tier {
        match self {
            CommandKind::Trim { .. }
            | CommandKind::Uppercase { .. }
            | CommandKind::Lowercase { .. }
            | CommandKind::Proper { .. }
            | CommandKind::PadZeros { .. }
            | CommandKind::Replace { .. } => Tier::Expression,
            CommandKind::RenameColumn { .. } | CommandKind::CellEditBatch { .. } => Tier::InverseSql,
            CommandKind::Formula { .. }
            | CommandKind::Dedupe { .. }
            | CommandKind::CastType { .. }
            | CommandKind::SplitColumn { .. }
            | CommandKind::MatchMerge { .. }
            | CommandKind::Stack { .. }
            | CommandKind::Join { .. }
            | CommandKind::Standardize { .. }
            | CommandKind::CustomSql { .. } => Tier::Snapshot,
        }
    }

    /// The command-type tag used by audit entries and the app state
    pub fn command_type(&self) -> &'static str {
        match self {
            CommandKind::Trim { .. } => "transform:trim",
            CommandKind::Uppercase { .. } => "transform:uppercase",
            CommandKind::Lowercase { .. } => "transform:lowercase",
            CommandKind::Proper { .. } => "transform:proper",
            CommandKind::PadZeros { .. } => "transform:pad_zeros",
            CommandKind::Replace { .. } => "transform:replace",
            CommandKind::RenameColumn { .. } => "transform:rename_column",
            CommandKind::CellEditBatch { .. } => "edit:cell-batch",
            CommandKind::Formula { .. } => "transform:formula",
            CommandKind::Dedupe { .. } => "transform:dedupe",
            CommandKind::CastType { .. } => "transform:cast_type",
            CommandKind::SplitColumn { .. } => "transform:split_column",
            CommandKind::MatchMerge { .. } => "merge:duplicates",
            CommandKind::Stack { .. } => "combine:stack",
            CommandKind::Join { .. } => "transform:join",
            CommandKind::Standardize { .. } => "transform:standardize",
            CommandKind::CustomSql { .. } => "transform:custom_sql",
        }
    }

    /// Tier-1 target column, when this is a tier-1 command
    pub fn chained_column(&self) -> Option<&str> {
        match self {
            CommandKind::Trim { column }
            | CommandKind::Uppercase { column }
            | CommandKind::Lowercase { column }
            | CommandKind::Proper { column }
            | CommandKind::PadZeros { column, .. }
            | CommandKind::Replace { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Tier-1 expression over a base SQL expression
    ///
    /// `base` is either the live column or the shadow; stacking the chain is
    /// repeated application of these.
    pub fn expression_over(&self, base: &str) -> Option<String> {
        match self {
            CommandKind::Trim { .. } => Some(format!("TRIM(CAST({base} AS VARCHAR))")),
            CommandKind::Uppercase { .. } => Some(format!("UPPER(CAST({base} AS VARCHAR))")),
            CommandKind::Lowercase { .. } => Some(format!("LOWER(CAST({base} AS VARCHAR))")),
            CommandKind::Proper { .. } => Some(format!("PROPER(CAST({base} AS VARCHAR))")),
            CommandKind::PadZeros { length, .. } => Some(format!(
                "LPAD(CAST({base} AS VARCHAR), {length}, '0')"
            )),
            CommandKind::Replace { find, replace_with, .. } => Some(format!(
                "REPLACE(CAST({base} AS VARCHAR), {}, {})",
                sql_string(find),
                sql_string(replace_with)
            )),
            _ => None,
        }
    }

    /// Columns this command writes (dirty-cell stamping)
    pub fn touched_columns(&self) -> Vec<String> {
        match self {
            CommandKind::Trim { column }
            | CommandKind::Uppercase { column }
            | CommandKind::Lowercase { column }
            | CommandKind::Proper { column }
            | CommandKind::PadZeros { column, .. }
            | CommandKind::Replace { column, .. }
            | CommandKind::Formula { column, .. }
            | CommandKind::CastType { column, .. }
            | CommandKind::Standardize { column, .. } => vec![column.clone()],
            CommandKind::RenameColumn { to, .. } => vec![to.clone()],
            CommandKind::SplitColumn { left, right, .. } => vec![left.clone(), right.clone()],
            CommandKind::CellEditBatch { .. }
            | CommandKind::Dedupe { .. }
            | CommandKind::MatchMerge { .. }
            | CommandKind::Stack { .. }
            | CommandKind::Join { .. }
            | CommandKind::CustomSql { .. } => Vec::new(),
        }
    }

    /// One-line audit summary
    pub fn summary(&self) -> String {
        match self {
            CommandKind::Trim { column } => format!("trimmed whitespace in {column}"),
            CommandKind::Uppercase { column } => format!("uppercased {column}"),
            CommandKind::Lowercase { column } => format!("lowercased {column}"),
            CommandKind::Proper { column } => format!("proper-cased {column}"),
            CommandKind::PadZeros { column, length } => {
                format!("padded {column} with zeros to length {length}")
            }
            CommandKind::Replace { column, find, replace_with } => {
                format!("replaced '{find}' with '{replace_with}' in {column}")
            }
            CommandKind::RenameColumn { from, to } => format!("renamed {from} to {to}"),
            CommandKind::CellEditBatch { edits } => format!("edited {} cell(s)", edits.len()),
            CommandKind::Formula { column, expression, .. } => {
                format!("set {column} = {expression}")
            }
            CommandKind::Dedupe { columns } => {
                if columns.is_empty() {
                    "removed duplicate rows".to_string()
                } else {
                    format!("removed duplicates by {}", columns.join(", "))
                }
            }
            CommandKind::CastType { column, to } => format!("cast {column} to {to}"),
            CommandKind::SplitColumn { column, left, right, .. } => {
                format!("split {column} into {left} and {right}")
            }
            CommandKind::MatchMerge { groups } => format!("merged {} group(s)", groups.len()),
            CommandKind::Stack { other_table } => format!("stacked rows from {other_table}"),
            CommandKind::Join { other_table, .. } => format!("joined columns from {other_table}"),
            CommandKind::Standardize { column, mapping } => {
                format!("standardized {} value(s) in {column}", mapping.len())
            }
            CommandKind::CustomSql { .. } => "ran custom SQL".to_string(),
        }
    }
}

/// A command as stored on a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command id
    pub id: String,
    /// Table this command ran against
    pub table_id: TableId,
    /// The frozen params
    pub kind: CommandKind,
    /// Inverse statements captured at apply time (tier 2)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inverse_sql: Vec<String>,
    /// Snapshot exported before apply (tier 3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id_before: Option<SnapshotId>,
    /// True when this tier-1 command refreshed the shadow before applying
    #[serde(default)]
    pub chain_restart: bool,
    /// Apply time, milliseconds since the epoch
    pub timestamp: i64,
}

impl Command {
    /// Wrap params into a new command record
    pub fn new(table_id: TableId, kind: CommandKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table_id,
            kind,
            inverse_sql: Vec::new(),
            snapshot_id_before: None,
            chain_restart: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The command's tier
    pub fn tier(&self) -> Tier {
        self.kind.tier()
    }
}

/// Shadow column name for a tier-1 chain
pub fn shadow_column(column: &str) -> String {
    format!("{column}__base")
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn require_column(columns: &[ColumnInfo], name: &str) -> Result<()> {
    if columns.iter().any(|c| c.name == name) {
        Ok(())
    } else {
        Err(CoreError::invalid_input(format!("no such column: {name}")))
    }
}

/// Build the forward statements for a command
///
/// `columns` is the table's current schema. Tier-1 commands apply their
/// expression to the live column; the executor handles shadow bookkeeping
/// separately.
pub fn forward_statements(
    kind: &CommandKind,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<Vec<String>> {
    let t = qident(table);
    match kind {
        // Tier 1: expression over the live column.
        CommandKind::Trim { column }
        | CommandKind::Uppercase { column }
        | CommandKind::Lowercase { column }
        | CommandKind::Proper { column }
        | CommandKind::PadZeros { column, .. }
        | CommandKind::Replace { column, .. } => {
            require_column(columns, column)?;
            let expr = kind
                .expression_over(&qident(column))
                .expect("tier-1 command has an expression");
            Ok(vec![format!(
                "UPDATE {t} SET {} = {expr}",
                qident(column)
            )])
        }

        CommandKind::RenameColumn { from, to } => {
            require_column(columns, from)?;
            if columns.iter().any(|c| &c.name == to) {
                return Err(CoreError::invalid_input(format!(
                    "column already exists: {to}"
                )));
            }
            let mut stmts = vec![format!(
                "ALTER TABLE {t} RENAME COLUMN {} TO {}",
                qident(from),
                qident(to)
            )];
            // A live tier-1 shadow follows its column.
            let old_shadow = shadow_column(from);
            if columns.iter().any(|c| c.name == old_shadow) {
                stmts.push(format!(
                    "ALTER TABLE {t} RENAME COLUMN {} TO {}",
                    qident(&old_shadow),
                    qident(&shadow_column(to))
                ));
            }
            Ok(stmts)
        }

        CommandKind::CellEditBatch { edits } => {
            let mut stmts = Vec::with_capacity(edits.len());
            for edit in edits {
                require_column(columns, &edit.column)?;
                stmts.push(format!(
                    "UPDATE {t} SET {} = {} WHERE {} = {}",
                    qident(&edit.column),
                    edit.new.sql_literal(),
                    qident(CS_ID),
                    edit.cs_id
                ));
            }
            Ok(stmts)
        }

        CommandKind::Formula { column, sql, .. } => {
            let mut stmts = Vec::new();
            if !columns.iter().any(|c| &c.name == column) {
                stmts.push(format!(
                    "ALTER TABLE {t} ADD COLUMN {} VARCHAR",
                    qident(column)
                ));
            }
            stmts.push(format!("UPDATE {t} SET {} = ({sql})", qident(column)));
            Ok(stmts)
        }

        CommandKind::Dedupe { columns: by } => {
            let group: Vec<String> = if by.is_empty() {
                columns
                    .iter()
                    .map(|c| c.name.clone())
                    .filter(|n| !cleanslate_core::is_internal_column(n))
                    .map(|n| qident(&n))
                    .collect()
            } else {
                for name in by {
                    require_column(columns, name)?;
                }
                by.iter().map(|n| qident(n)).collect()
            };
            if group.is_empty() {
                return Err(CoreError::invalid_input("nothing to deduplicate by"));
            }
            let group = group.join(", ");
            Ok(vec![format!(
                "DELETE FROM {t} WHERE {id} NOT IN (SELECT MIN({id}) FROM {t} GROUP BY {group})",
                id = qident(CS_ID),
            )])
        }

        CommandKind::CastType { column, to } => {
            require_column(columns, column)?;
            let temp = qident(&format!("__temp_{table}_cast"));
            // Rebuild with explicit declarations so every column keeps its
            // affinity; only the target column changes type.
            let mut decls = Vec::with_capacity(columns.len());
            let mut select_list = Vec::with_capacity(columns.len());
            for c in columns {
                let decl_type = if &c.name == column { *to } else { c.column_type };
                decls.push(format!("{} {}", qident(&c.name), decl_type.sql_decl()));
                if &c.name == column {
                    select_list.push(format!("CAST({} AS {})", qident(&c.name), to.sql_decl()));
                } else {
                    select_list.push(qident(&c.name));
                }
            }
            Ok(vec![
                format!("DROP TABLE IF EXISTS {temp}"),
                format!("CREATE TABLE {temp} ({})", decls.join(", ")),
                format!(
                    "INSERT INTO {temp} SELECT {} FROM {t}",
                    select_list.join(", ")
                ),
                format!("DROP TABLE {t}"),
                format!("ALTER TABLE {temp} RENAME TO {t}"),
            ])
        }

        CommandKind::SplitColumn { column, separator, left, right } => {
            require_column(columns, column)?;
            for new_col in [left, right] {
                if columns.iter().any(|c| &c.name == new_col) {
                    return Err(CoreError::invalid_input(format!(
                        "column already exists: {new_col}"
                    )));
                }
            }
            let sep = sql_string(separator);
            let src = qident(column);
            Ok(vec![
                format!("ALTER TABLE {t} ADD COLUMN {} VARCHAR", qident(left)),
                format!("ALTER TABLE {t} ADD COLUMN {} VARCHAR", qident(right)),
                format!(
                    "UPDATE {t} SET {} = SPLIT_PART(CAST({src} AS VARCHAR), {sep}, 1), \
                     {} = SPLIT_PART(CAST({src} AS VARCHAR), {sep}, 2)",
                    qident(left),
                    qident(right)
                ),
            ])
        }

        CommandKind::MatchMerge { groups } => {
            let mut stmts = Vec::new();
            for group in groups {
                for (column, value) in &group.resolved {
                    require_column(columns, column)?;
                    stmts.push(format!(
                        "UPDATE {t} SET {} = {} WHERE {} = {}",
                        qident(column),
                        value.sql_literal(),
                        qident(CS_ID),
                        group.survivor_cs_id
                    ));
                }
                if !group.merged_cs_ids.is_empty() {
                    let ids: Vec<String> =
                        group.merged_cs_ids.iter().map(|i| i.to_string()).collect();
                    stmts.push(format!(
                        "DELETE FROM {t} WHERE {} IN ({})",
                        qident(CS_ID),
                        ids.join(", ")
                    ));
                }
            }
            Ok(stmts)
        }

        CommandKind::Stack { other_table } => {
            // Shared user columns copy across; the appended rows continue
            // the gap sequence and keep their origin ids.
            let user: Vec<&str> = columns
                .iter()
                .map(|c| c.name.as_str())
                .filter(|n| !cleanslate_core::is_internal_column(n))
                .collect();
            let shared: Vec<String> = user.iter().map(|n| qident(n)).collect();
            let shared_src: Vec<String> = user.iter().map(|n| format!("o.{}", qident(n))).collect();
            let o = qident(other_table);
            // The base offset comes from a one-row derived table computed
            // before any insert lands, so appended ids never collide.
            Ok(vec![format!(
                "INSERT INTO {t} ({id}, {origin}, {shared}) \
                 SELECT b.base + ROW_NUMBER() OVER (ORDER BY o.{id}) * {gap}, \
                        o.{origin}, {shared_src} \
                 FROM {o} o, (SELECT COALESCE(MAX({id}), 0) AS base FROM {t}) b",
                id = qident(CS_ID),
                origin = qident(ORIGIN_ID),
                gap = CS_ID_GAP,
                shared = shared.join(", "),
                shared_src = shared_src.join(", "),
            )])
        }

        CommandKind::Join { other_table, left_key, right_key, columns: pulled } => {
            require_column(columns, left_key)?;
            for new_col in pulled {
                if columns.iter().any(|c| &c.name == new_col) {
                    return Err(CoreError::invalid_input(format!(
                        "column already exists: {new_col}"
                    )));
                }
            }
            let o = qident(other_table);
            let mut stmts = Vec::new();
            for col in pulled {
                stmts.push(format!(
                    "ALTER TABLE {t} ADD COLUMN {} VARCHAR",
                    qident(col)
                ));
                stmts.push(format!(
                    "UPDATE {t} SET {c} = (SELECT o.{c} FROM {o} o WHERE o.{rk} IS {t}.{lk})",
                    c = qident(col),
                    rk = qident(right_key),
                    lk = qident(left_key),
                ));
            }
            Ok(stmts)
        }

        CommandKind::Standardize { column, mapping } => {
            require_column(columns, column)?;
            if mapping.is_empty() {
                return Err(CoreError::invalid_input("empty standardization mapping"));
            }
            let col = qident(column);
            let arms: Vec<String> = mapping
                .iter()
                .map(|(raw, std)| format!("WHEN {} THEN {}", sql_string(raw), sql_string(std)))
                .collect();
            Ok(vec![format!(
                "UPDATE {t} SET {col} = CASE {col} {} ELSE {col} END",
                arms.join(" ")
            )])
        }

        CommandKind::CustomSql { sql } => Ok(vec![sql.clone()]),
    }
}

/// Build the inverse statements for a tier-2 command, against the current schema
pub fn inverse_statements(
    kind: &CommandKind,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<Vec<String>> {
    let t = qident(table);
    match kind {
        CommandKind::RenameColumn { from, to } => {
            let mut stmts = vec![format!(
                "ALTER TABLE {t} RENAME COLUMN {} TO {}",
                qident(to),
                qident(from)
            )];
            let old_shadow = shadow_column(from);
            if columns.iter().any(|c| c.name == old_shadow) {
                stmts.push(format!(
                    "ALTER TABLE {t} RENAME COLUMN {} TO {}",
                    qident(&shadow_column(to)),
                    qident(&old_shadow)
                ));
            }
            Ok(stmts)
        }
        CommandKind::CellEditBatch { edits } => Ok(edits
            .iter()
            .map(|edit| {
                format!(
                    "UPDATE {t} SET {} = {} WHERE {} = {}",
                    qident(&edit.column),
                    edit.previous.sql_literal(),
                    qident(CS_ID),
                    edit.cs_id
                )
            })
            .collect()),
        other => Err(CoreError::internal(format!(
            "no inverse for tier-{:?} command {}",
            other.tier(),
            other.command_type()
        ))),
    }
}
