//! Change record types for binlog-relay
//!
//! Defines the canonical change record that flows from capture through the
//! task queues to the replay engine, plus the task identity that names one
//! consumer subscription.

use crate::error::{RelayError, Result};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Insert,
    Update,
    Delete,
}

impl RowAction {
    /// Wire/log name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Number of row images carried in `rows` for this action
    pub fn image_count(&self) -> usize {
        match self {
            Self::Update => 2,
            Self::Insert | Self::Delete => 1,
        }
    }

    /// Whether replay must address an existing row by primary key
    pub fn requires_primary_key(&self) -> bool {
        !matches!(self, Self::Insert)
    }
}

impl std::fmt::Display for RowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RowAction {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(RelayError::config(format!("unknown row action: {other}"))),
        }
    }
}

/// One row mutation in canonical form.
///
/// `rows` is positional against `columns`. Inserts carry the after-image,
/// deletes the before-image, and updates the before-image followed by the
/// after-image. Replay splits updates back apart at `columns.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub action: RowAction,

    /// Qualified table name (`schema.table`)
    #[serde(rename = "table_name")]
    pub table: String,

    pub columns: Vec<String>,

    pub rows: Vec<Value>,

    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl ChangeRecord {
    /// Record for an inserted row
    pub fn insert(
        table: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<String>,
        after: Vec<Value>,
    ) -> Self {
        Self {
            action: RowAction::Insert,
            table: table.into(),
            columns,
            rows: after,
            primary_key,
        }
    }

    /// Record for a deleted row
    pub fn delete(
        table: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<String>,
        before: Vec<Value>,
    ) -> Self {
        Self {
            action: RowAction::Delete,
            table: table.into(),
            columns,
            rows: before,
            primary_key,
        }
    }

    /// Record for an updated row; old values first, then new values
    pub fn update(
        table: impl Into<String>,
        columns: Vec<String>,
        primary_key: Vec<String>,
        before: Vec<Value>,
        after: Vec<Value>,
    ) -> Self {
        let mut rows = before;
        rows.extend(after);
        Self {
            action: RowAction::Update,
            table: table.into(),
            columns,
            rows,
            primary_key,
        }
    }

    /// Check the row/column layout invariants
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(RelayError::invalid_record(format!(
                "{} record for {} has no columns",
                self.action, self.table
            )));
        }

        let expected = self.action.image_count() * self.columns.len();
        if self.rows.len() != expected {
            return Err(RelayError::invalid_record(format!(
                "{} record for {} carries {} values, expected {} ({} columns)",
                self.action,
                self.table,
                self.rows.len(),
                expected,
                self.columns.len()
            )));
        }

        if let Some(missing) = self
            .primary_key
            .iter()
            .find(|pk| !self.columns.contains(pk))
        {
            return Err(RelayError::invalid_record(format!(
                "primary key column {missing} is not a column of {}",
                self.table
            )));
        }

        Ok(())
    }

    /// Old-image values (before-image for update/delete)
    pub fn old_values(&self) -> Option<&[Value]> {
        match self.action {
            RowAction::Insert => None,
            RowAction::Update | RowAction::Delete => self.rows.get(..self.columns.len()),
        }
    }

    /// New-image values (after-image for insert/update)
    pub fn new_values(&self) -> Option<&[Value]> {
        let width = self.columns.len();
        match self.action {
            RowAction::Insert => self.rows.get(..width),
            RowAction::Update => self.rows.get(width..2 * width),
            RowAction::Delete => None,
        }
    }

    /// Positions of the primary-key columns inside `columns`
    pub fn primary_key_positions(&self) -> Result<Vec<usize>> {
        self.primary_key
            .iter()
            .map(|pk| {
                self.columns.iter().position(|c| c == pk).ok_or_else(|| {
                    RelayError::invalid_record(format!(
                        "primary key column {pk} is not a column of {}",
                        self.table
                    ))
                })
            })
            .collect()
    }

    /// Serialize as one newline-terminated queue line
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)
            .map_err(|e| RelayError::serialization("Failed to serialize change record", e))?;
        line.push(b'\n');
        Ok(line)
    }

    /// Deserialize one queue line (without its separator)
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| RelayError::serialization("Failed to deserialize change record", e))
    }
}

/// Split a drained payload into its newline-delimited record lines.
///
/// Blank lines (including a trailing separator) are skipped. Each item is
/// parsed and validated independently so one bad line does not poison the
/// rest of the payload.
pub fn parse_payload(payload: &[u8]) -> impl Iterator<Item = Result<ChangeRecord>> + '_ {
    payload
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| {
            let record = ChangeRecord::from_slice(line)?;
            record.validate()?;
            Ok(record)
        })
}

/// Concatenate records into a payload as the queue would hold them
pub fn encode_payload<'a>(records: impl IntoIterator<Item = &'a ChangeRecord>) -> Result<Bytes> {
    let mut out = Vec::new();
    for record in records {
        out.extend(record.to_line()?);
    }
    Ok(Bytes::from(out))
}

/// Bytes escaped inside one segment file name component
const SEGMENT_COMPONENT: &AsciiSet = &CONTROLS.add(b'-').add(b'%').add(b'/').add(b'\\');

/// Identity of one consumer subscription: (account, database, table)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub account: String,
    pub database: String,
    pub table: String,
}

impl TaskIdentity {
    pub fn new(
        account: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            database: database.into(),
            table: table.into(),
        }
    }

    /// Queue segment file name for this task.
    ///
    /// Each component is percent-encoded so the `-` separators stay
    /// unambiguous; names without reserved bytes keep the plain
    /// `{account}-{database}-{table}.blog` form.
    pub fn segment_file_name(&self) -> String {
        format!(
            "{}-{}-{}.blog",
            utf8_percent_encode(&self.account, SEGMENT_COMPONENT),
            utf8_percent_encode(&self.database, SEGMENT_COMPONENT),
            utf8_percent_encode(&self.table, SEGMENT_COMPONENT),
        )
    }

    /// Whether this task watches the given source table
    pub fn watches(&self, table: &TableRef) -> bool {
        self.database == table.schema && self.table == table.name
    }

    /// Reject components that cannot be used inside a segment file name
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("account", &self.account),
            ("database", &self.database),
            ("table", &self.table),
        ] {
            if value.is_empty() {
                return Err(RelayError::config(format!("task {field} cannot be empty")));
            }
            if value == ".." || value.contains(['/', '\\', '\0']) {
                return Err(RelayError::config(format!(
                    "task {field} {value:?} contains path characters"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.account, self.database, self.table)
    }
}

/// Source table reference (`schema`.`name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Qualified name as carried in change records
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column layout of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}
