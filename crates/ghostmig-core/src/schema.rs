//! Table shape descriptors: column lists, unique keys and key-range values.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Name MySQL gives the primary key.
pub const PRIMARY_KEY_NAME: &str = "PRIMARY";

/// Ordered list of column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnList {
    names: Vec<String>,
}

impl ColumnList {
    /// Create a column list from names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated list of names. Blank entries are skipped.
    pub fn parse(columns: &str) -> Self {
        Self::new(
            columns
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    /// Column names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of a column.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Whether the column is present.
    pub fn contains(&self, name: &str) -> bool {
        self.ordinal(name).is_some()
    }

    /// Whether every column here also appears in `other`.
    pub fn is_subset_of(&self, other: &ColumnList) -> bool {
        self.names.iter().all(|name| other.contains(name))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Columns present in both the original and the ghost table.
    ///
    /// Returns the shared columns as named on the original table, and the
    /// same columns as named on the ghost table after applying `renames`
    /// (original name to ghost name).
    pub fn shared_with(
        &self,
        ghost: &ColumnList,
        renames: &BTreeMap<String, String>,
    ) -> (ColumnList, ColumnList) {
        let mut shared = Vec::new();
        let mut mapped = Vec::new();
        for name in &self.names {
            let target = renames.get(name).unwrap_or(name);
            if ghost.contains(target) {
                shared.push(name.clone());
                mapped.push(target.clone());
            }
        }
        (ColumnList { names: shared }, ColumnList { names: mapped })
    }
}

impl fmt::Display for ColumnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(","))
    }
}

/// A unique key usable to walk the table in chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueKey {
    /// Index name.
    pub name: String,
    /// Indexed columns, in index order.
    pub columns: ColumnList,
    /// Whether any indexed column is nullable.
    pub has_nullable: bool,
    /// Whether the first column is AUTO_INCREMENT.
    pub is_auto_increment: bool,
}

impl UniqueKey {
    /// Create a non-nullable, non-auto-increment key.
    pub fn new(name: impl Into<String>, columns: ColumnList) -> Self {
        Self {
            name: name.into(),
            columns,
            has_nullable: false,
            is_auto_increment: false,
        }
    }

    /// Whether this is the table's primary key.
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_KEY_NAME
    }

    /// Number of columns in the key.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the key has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}; has nullable: {}",
            self.name, self.columns, self.has_nullable
        )
    }
}

/// A single column value at a key-range boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("NULL"),
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::UInt(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::Text(v) => f.write_str(v),
            ColumnValue::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

/// Values of a unique key's columns delimiting a range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ColumnValues {
    values: Vec<ColumnValue>,
}

impl ColumnValues {
    /// Wrap a row of values.
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self { values }
    }

    /// The values in key order.
    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    /// Value at `index` rendered as a string.
    pub fn string_column(&self, index: usize) -> Option<String> {
        self.values.get(index).map(ToString::to_string)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ColumnValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// Everything known about the original and ghost table layouts.
#[derive(Debug, Clone, Default)]
pub struct TableShape {
    /// Columns of the original table.
    pub original_columns: ColumnList,
    /// Unique keys of the original table.
    pub original_unique_keys: Vec<UniqueKey>,
    /// Columns of the ghost table.
    pub ghost_columns: ColumnList,
    /// Unique keys of the ghost table.
    pub ghost_unique_keys: Vec<UniqueKey>,
    /// Key chosen to iterate the copy.
    pub unique_key: Option<UniqueKey>,
    /// Columns copied, as named on the original table.
    pub shared_columns: ColumnList,
    /// Columns copied, as named on the ghost table.
    pub mapped_shared_columns: ColumnList,
    /// Approved renames, original name to ghost name.
    pub column_rename_map: BTreeMap<String, String>,
}

impl TableShape {
    /// Recompute shared and mapped columns from the current layouts and renames.
    pub fn refresh_shared_columns(&mut self) {
        let (shared, mapped) = self
            .original_columns
            .shared_with(&self.ghost_columns, &self.column_rename_map);
        self.shared_columns = shared;
        self.mapped_shared_columns = mapped;
    }
}
