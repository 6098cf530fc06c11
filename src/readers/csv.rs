use std::collections::HashSet;

use csv::{ReaderBuilder, StringRecord};

use crate::error::Error;
use crate::table::{TableData, TableRowView, UnsanitizedColumnId};
use crate::types::{sha256_hex, Result};
use crate::unsanitized::{
    SourceType, UnsanitizedColumnInfo, UnsanitizedColumnType, UnsanitizedTable,
};
use crate::value::TableValue;

use super::SourceReader;

/// A parsed CSV header cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderCell {
    pub name: String,
    /// Written as `(name)` in the file
    pub wrapped: bool,
}

/// Parse a header row, unwrapping `(name)` cells.
///
/// Empty and duplicate names are fatal.
pub(crate) fn parse_headers(source_name: &str, record: &StringRecord) -> Result<Vec<HeaderCell>> {
    let mut seen = HashSet::new();
    let mut cells = Vec::with_capacity(record.len());

    for raw in record.iter() {
        let trimmed = raw.trim();
        let (name, wrapped) = match trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (inner.trim(), true),
            None => (trimmed, false),
        };

        if name.is_empty() {
            return Err(Error::EmptyHeader {
                source_name: source_name.to_string(),
            });
        }
        if !seen.insert(name.to_string()) {
            return Err(Error::DuplicateHeader {
                source_name: source_name.to_string(),
                name: name.to_string(),
            });
        }

        cells.push(HeaderCell {
            name: name.to_string(),
            wrapped,
        });
    }

    Ok(cells)
}

/// CSV source reader
///
/// A CSV carries its schema in the header row, so the schema payload is
/// ignored and the data payload is read for both.
#[derive(Debug)]
pub struct CsvReader {
    delimiter: u8,
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvReader {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn read_text(&self, name: &str, text: &str) -> Result<UnsanitizedTable> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = parse_headers(name, reader.headers()?)?;

        let columns: Vec<UnsanitizedColumnInfo> = headers
            .iter()
            .map(|h| UnsanitizedColumnInfo {
                id: UnsanitizedColumnId::new(h.name.clone()),
                prompt: h.name.clone(),
                column_type: UnsanitizedColumnType::Text,
                is_safe: !h.wrapped,
            })
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: TableRowView<UnsanitizedColumnId> = columns
                .iter()
                .enumerate()
                .map(|(col_idx, col)| {
                    let field = record.get(col_idx).unwrap_or("");
                    (col.id.clone(), TableValue::text_or(field, TableValue::Omitted))
                })
                .collect();
            rows.push(row);
        }

        let header_line = text.lines().next().unwrap_or("");
        let data = TableData::new(columns.iter().map(|c| c.id.clone()).collect(), rows)?;

        log::debug!(
            "Read CSV source '{}': {} columns, {} rows",
            name,
            columns.len(),
            data.len()
        );

        Ok(UnsanitizedTable {
            name: name.to_string(),
            title: name.to_string(),
            source: SourceType::Csv,
            data_checksum: sha256_hex(text.as_bytes()),
            schema_checksum: sha256_hex(header_line.as_bytes()),
            columns,
            data,
        })
    }
}

impl SourceReader for CsvReader {
    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }

    fn read(&self, name: &str, _schema_text: &str, data_text: &str) -> Result<UnsanitizedTable> {
        self.read_text(name, data_text)
    }
}
