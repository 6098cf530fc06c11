//! Row views and column-ordered tables, generic over the column id space.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::types::Result;
use crate::value::{CellError, ErrorKind, TableValue, Value};

/// Identifier of a column within one of the pipeline's id spaces
pub trait ColumnId: Clone + Ord + fmt::Debug + fmt::Display {
    fn as_str(&self) -> &str;
}

macro_rules! column_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl ColumnId for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

column_id!(
    /// Column id as it appears in a raw source export
    UnsanitizedColumnId
);
column_id!(
    /// Column id after sanitization
    SanitizedColumnId
);
column_id!(
    /// Column id in the linked study schema (a column entry name)
    LinkedColumnId
);

/// 64-bit digest of a row view, stable across processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowHash(pub u64);

impl fmt::Display for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Immutable mapping of column id to cell value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRowView<K: ColumnId> {
    values: BTreeMap<K, TableValue>,
}

impl<K: ColumnId> TableRowView<K> {
    pub fn new(values: BTreeMap<K, TableValue>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Value for `key`, or a `ColumnNotFoundInRow` error cell
    pub fn get(&self, key: &K) -> TableValue {
        match self.values.get(key) {
            Some(value) => value.clone(),
            None => TableValue::error(
                ErrorKind::ColumnNotFoundInRow,
                format!(
                    "column '{}' not in row with columns [{}]",
                    key,
                    self.values
                        .keys()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    pub fn column_ids(&self) -> Vec<K> {
        self.values.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &TableValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Restrict the view to `keys`; keys absent from the row become error cells
    pub fn subset(&self, keys: &[K]) -> Self {
        keys.iter().map(|k| (k.clone(), self.get(k))).collect()
    }

    /// Union of two views; on shared keys the right-hand value wins
    pub fn combine(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { values }
    }

    pub fn first_error(&self) -> Option<&CellError> {
        self.values.values().find_map(|v| match v {
            TableValue::Error(e) => Some(e),
            _ => None,
        })
    }

    /// Canonical digest of the view; fails if any cell holds an error
    pub fn hash(&self) -> std::result::Result<RowHash, CellError> {
        if let Some(err) = self.first_error() {
            return Err(err.clone());
        }

        let mut hasher = Sha256::new();
        for (key, value) in &self.values {
            write_bytes(&mut hasher, key.as_str().as_bytes());
            match value {
                TableValue::Some(v) => {
                    hasher.update([1u8]);
                    write_scalar(&mut hasher, v);
                }
                TableValue::Multi(vs) => {
                    hasher.update([2u8]);
                    hasher.update((vs.len() as u64).to_be_bytes());
                    for v in vs {
                        write_scalar(&mut hasher, v);
                    }
                }
                TableValue::Omitted => hasher.update([3u8]),
                TableValue::Redacted => hasher.update([4u8]),
                TableValue::Error(_) => unreachable!("errors rejected above"),
            }
        }

        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Ok(RowHash(u64::from_be_bytes(prefix)))
    }
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn write_scalar(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Str(s) => {
            hasher.update(b"s");
            write_bytes(hasher, s.as_bytes());
        }
        Value::Int(i) => {
            hasher.update(b"i");
            hasher.update(i.to_be_bytes());
        }
        Value::Real(r) => {
            hasher.update(b"r");
            hasher.update(r.to_bits().to_be_bytes());
        }
        Value::Bool(b) => {
            hasher.update(b"b");
            hasher.update([*b as u8]);
        }
    }
}

impl<K: ColumnId> FromIterator<(K, TableValue)> for TableRowView<K> {
    fn from_iter<I: IntoIterator<Item = (K, TableValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Ordered columns plus rows keyed by (a subset of) those columns
#[derive(Debug, Clone, PartialEq)]
pub struct TableData<K: ColumnId> {
    columns: Vec<K>,
    rows: Vec<TableRowView<K>>,
}

impl<K: ColumnId> TableData<K> {
    pub fn new(columns: Vec<K>, rows: Vec<TableRowView<K>>) -> Result<Self> {
        let known: BTreeSet<&K> = columns.iter().collect();
        if known.len() != columns.len() {
            return Err(Error::InvalidInput(
                "table columns must be unique".to_string(),
            ));
        }
        for (idx, row) in rows.iter().enumerate() {
            if let Some((key, _)) = row.iter().find(|(k, _)| !known.contains(k)) {
                return Err(Error::InvalidInput(format!(
                    "row {} has column '{}' not declared by the table",
                    idx + 1,
                    key
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build without validation, for callers that construct rows from `columns`
    pub(crate) fn new_unchecked(columns: Vec<K>, rows: Vec<TableRowView<K>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[K] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRowView<K>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, in row order
    pub fn column_values(&self, key: &K) -> Vec<TableValue> {
        self.rows.iter().map(|row| row.get(key)).collect()
    }
}
