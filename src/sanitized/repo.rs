use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::Error;
use crate::report::TableErrorReport;
use crate::table::{ColumnId, SanitizedColumnId, TableData, TableRowView};
use crate::types::{Result, REDACTED_SENTINEL};
use crate::value::{CellError, ErrorKind, TableValue, Value};

use super::{SanitizedColumnInfo, SanitizedColumnType, SanitizedTable, SanitizedTableInfo};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS __table_entries__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    data_checksum TEXT NOT NULL,
    schema_checksum TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS __column_entries__ (
    id INTEGER PRIMARY KEY,
    parent_table_id INTEGER NOT NULL REFERENCES __table_entries__(id),
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    prompt TEXT NOT NULL,
    sanitizer_checksum TEXT,
    codes JSON,
    UNIQUE (parent_table_id, name)
);
";

/// Row position column present in every datatable, so tables without
/// sanitized columns still keep their row count
const ROW_COLUMN: &str = "__row__";

/// Quote an SQL identifier
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Persistent store of sanitized tables
pub struct SanitizedRepo {
    conn: Connection,
}

impl SanitizedRepo {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        log::debug!("Opened sanitized database {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Names of all stored tables, sorted
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __table_entries__ ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Store a table, replacing any table of the same name.
    ///
    /// Runs in one transaction. Error cells are written as NULL and returned
    /// in the report.
    pub fn write_table(&mut self, table: &SanitizedTable) -> Result<TableErrorReport> {
        let info = &table.info;
        if info.name.starts_with("__") {
            return Err(Error::InvalidInput(format!(
                "sanitized table name '{}' is reserved",
                info.name
            )));
        }
        if info.columns.iter().any(|c| c.id.as_str() == ROW_COLUMN) {
            return Err(Error::InvalidInput(format!(
                "table '{}' uses the reserved column name '{}'",
                info.name, ROW_COLUMN
            )));
        }
        let mut report = TableErrorReport::new();
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM __table_entries__ WHERE name = ?1",
                params![info.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            tx.execute(
                "DELETE FROM __column_entries__ WHERE parent_table_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM __table_entries__ WHERE id = ?1", params![id])?;
            log::info!("Replacing sanitized table '{}'", info.name);
        }
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&info.name)), [])?;

        tx.execute(
            "INSERT INTO __table_entries__ (name, data_checksum, schema_checksum)
             VALUES (?1, ?2, ?3)",
            params![info.name, info.data_checksum, info.schema_checksum],
        )?;
        let table_id = tx.last_insert_rowid();

        for column in &info.columns {
            let codes = match column.column_type.codes() {
                Some(codes) => Some(serde_json::to_string(codes)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO __column_entries__
                 (parent_table_id, name, type, prompt, sanitizer_checksum, codes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    table_id,
                    column.id.to_string(),
                    column.column_type.name(),
                    column.prompt,
                    column.sanitizer_checksum,
                    codes,
                ],
            )?;
        }

        let anchor = format!("{} INTEGER PRIMARY KEY", quote_ident(ROW_COLUMN));
        let column_defs: Vec<String> = std::iter::once(anchor)
            .chain(
                info.columns
                    .iter()
                    .map(|c| format!("{} {}", quote_ident(c.id.as_str()), sql_type(&c.column_type))),
            )
            .collect();
        tx.execute(
            &format!(
                "CREATE TABLE {} ({})",
                quote_ident(&info.name),
                column_defs.join(", ")
            ),
            [],
        )?;

        let names: Vec<String> = std::iter::once(quote_ident(ROW_COLUMN))
            .chain(info.columns.iter().map(|c| quote_ident(c.id.as_str())))
            .collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&info.name),
            names.join(", "),
            placeholders.join(", ")
        );
        {
            let mut stmt = tx.prepare(&sql)?;
            for (position, row) in table.data.rows().iter().enumerate() {
                let mut values = Vec::with_capacity(names.len());
                values.push(SqlValue::Integer(position as i64));
                for column in &info.columns {
                    match to_sql(&column.column_type, &row.get(&column.id)) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            report.add(&info.name, column.id.as_str(), err);
                            values.push(SqlValue::Null);
                        }
                    }
                }
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.commit()?;

        log::info!(
            "Wrote sanitized table '{}' ({} rows, {} errors)",
            info.name,
            table.data.len(),
            report.len()
        );
        Ok(report)
    }

    pub fn read_table_info(&self, name: &str) -> Result<SanitizedTableInfo> {
        let entry: Option<(i64, String, String)> = self
            .conn
            .query_row(
                "SELECT id, data_checksum, schema_checksum FROM __table_entries__ WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (table_id, data_checksum, schema_checksum) =
            entry.ok_or_else(|| Error::NotFound(format!("sanitized table '{}'", name)))?;

        let mut stmt = self.conn.prepare(
            "SELECT name, type, prompt, sanitizer_checksum, codes
             FROM __column_entries__ WHERE parent_table_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![table_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut columns = Vec::with_capacity(rows.len());
        for (column_name, type_name, prompt, sanitizer_checksum, codes) in rows {
            let codes = match codes {
                Some(json) => Some(serde_json::from_str::<Vec<String>>(&json)?),
                None => None,
            };
            let column_type = SanitizedColumnType::from_parts(&type_name, codes).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "column '{}' of '{}' has unknown type '{}'",
                    column_name, name, type_name
                ))
            })?;
            columns.push(SanitizedColumnInfo {
                id: SanitizedColumnId::new(column_name),
                prompt,
                column_type,
                sanitizer_checksum,
            });
        }

        Ok(SanitizedTableInfo {
            name: name.to_string(),
            data_checksum,
            schema_checksum,
            columns,
        })
    }

    /// Load a table back, in insertion order
    pub fn read_table(&self, name: &str) -> Result<SanitizedTable> {
        let info = self.read_table_info(name)?;

        let names: Vec<String> = std::iter::once(quote_ident(ROW_COLUMN))
            .chain(info.columns.iter().map(|c| quote_ident(c.id.as_str())))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            names.join(", "),
            quote_ident(name),
            quote_ident(ROW_COLUMN)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw_rows = stmt
            .query_map([], |row| {
                (1..names.len())
                    .map(|i| row.get::<_, Option<String>>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let rows: Vec<TableRowView<SanitizedColumnId>> = raw_rows
            .into_iter()
            .map(|cells| {
                info.columns
                    .iter()
                    .zip(cells)
                    .map(|(column, cell)| (column.id.clone(), from_sql(&column.column_type, cell)))
                    .collect()
            })
            .collect();

        let data = TableData::new(info.column_ids(), rows)?;
        Ok(SanitizedTable { info, data })
    }
}

fn sql_type(column_type: &SanitizedColumnType) -> &'static str {
    match column_type {
        SanitizedColumnType::Text | SanitizedColumnType::Ordinal { .. } => "TEXT",
        SanitizedColumnType::Multiselect { .. } => "JSON",
    }
}

fn to_sql(column_type: &SanitizedColumnType, value: &TableValue) -> std::result::Result<SqlValue, CellError> {
    match value {
        TableValue::Omitted => Ok(SqlValue::Null),
        TableValue::Redacted => Ok(SqlValue::Text(REDACTED_SENTINEL.to_string())),
        TableValue::Error(err) => Err(err.clone()),
        TableValue::Some(v) => match column_type {
            SanitizedColumnType::Multiselect { .. } => json_text(std::slice::from_ref(v)),
            _ => Ok(SqlValue::Text(v.to_string())),
        },
        TableValue::Multi(vs) => match column_type {
            SanitizedColumnType::Multiselect { .. } => json_text(vs),
            _ => Err(CellError::new(
                ErrorKind::IncorrectType,
                format!("expected a single value for a {} column", column_type.name()),
            )),
        },
    }
}

fn json_text(values: &[Value]) -> std::result::Result<SqlValue, CellError> {
    let tags: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    serde_json::to_string(&tags)
        .map(SqlValue::Text)
        .map_err(|e| CellError::new(ErrorKind::IncorrectType, e.to_string()))
}

fn from_sql(column_type: &SanitizedColumnType, cell: Option<String>) -> TableValue {
    match cell {
        None => TableValue::Omitted,
        Some(text) if text == REDACTED_SENTINEL => TableValue::Redacted,
        Some(text) => match column_type {
            SanitizedColumnType::Multiselect { .. } => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(tags) => TableValue::Multi(tags.into_iter().map(Value::Str).collect()),
                Err(e) => TableValue::error(ErrorKind::IncorrectType, e.to_string()),
            },
            _ => TableValue::Some(Value::Str(text)),
        },
    }
}
