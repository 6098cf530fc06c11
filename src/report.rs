use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::value::CellError;

/// A cell-level error surfaced when a table was persisted
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableErrorEntry {
    pub table_name: String,
    pub column_name: String,
    pub error: CellError,
}

/// Set of errors collected while writing tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableErrorReport {
    entries: BTreeSet<TableErrorEntry>,
}

impl TableErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table_name: &str, column_name: &str, error: CellError) {
        self.entries.insert(TableErrorEntry {
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            error,
        });
    }

    pub fn merge(&mut self, other: TableErrorReport) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> impl Iterator<Item = &TableErrorEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, table_name: &str, column_name: &str, error: &CellError) -> bool {
        self.entries.iter().any(|e| {
            e.table_name == table_name && e.column_name == column_name && &e.error == error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ErrorKind;

    #[test]
    fn test_report_deduplicates_and_merges() {
        let mut report = TableErrorReport::new();
        let err = CellError::new(ErrorKind::MissingCode, "no code for 'UNKNOWN'");
        report.add("t", "q1", err.clone());
        report.add("t", "q1", err.clone());
        assert_eq!(report.len(), 1);

        let mut other = TableErrorReport::new();
        other.add("t", "q2", CellError::new(ErrorKind::LookupSanitizerMiss, ""));
        report.merge(other);

        assert_eq!(report.len(), 2);
        assert!(report.contains("t", "q1", &err));
        let columns: Vec<&str> = report.entries().map(|e| e.column_name.as_str()).collect();
        assert_eq!(columns, vec!["q1", "q2"]);
    }
}
