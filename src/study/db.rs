use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::error::Error;
use crate::link::LinkedTableData;
use crate::report::TableErrorReport;
use crate::sanitized::repo::quote_ident;
use crate::spec::CodeMap;
use crate::table::{ColumnId, LinkedColumnId, TableRowView};
use crate::types::{Result, REDACTED_SENTINEL};
use crate::value::{CellError, ErrorKind, TableValue, Value, ValueType};

use super::{
    CodemapEntry, ColumnEntry, ColumnType, InstrumentEntry, InstrumentNodeEntry,
    InstrumentNodeKind, MeasureEntry, StudyRepo, StudyTable,
};

const SCHEMA: &str = "
CREATE TABLE __codemaps__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    vals JSON NOT NULL
);
CREATE TABLE __measure_entries__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    title TEXT,
    description TEXT
);
CREATE TABLE __column_entries__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    prompt TEXT NOT NULL,
    codemap_id INTEGER REFERENCES __codemaps__(id),
    parent_column_id INTEGER REFERENCES __column_entries__(id),
    parent_measure_id INTEGER REFERENCES __measure_entries__(id)
);
CREATE TABLE __table_info__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE __table_column_association__ (
    table_id INTEGER NOT NULL REFERENCES __table_info__(id),
    column_id INTEGER NOT NULL REFERENCES __column_entries__(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (table_id, column_id)
);
CREATE TABLE __instrument_entries__ (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    title TEXT,
    description TEXT,
    studytable_id INTEGER NOT NULL REFERENCES __table_info__(id)
);
CREATE TABLE __instrument_nodes__ (
    id INTEGER PRIMARY KEY,
    instrument_id INTEGER NOT NULL REFERENCES __instrument_entries__(id),
    parent_node_id INTEGER REFERENCES __instrument_nodes__(id),
    sortkey INTEGER NOT NULL,
    type TEXT NOT NULL,
    prompt TEXT NOT NULL,
    remote_id TEXT,
    source_value_map JSON,
    value TEXT,
    column_entry_id INTEGER REFERENCES __column_entries__(id)
);
";

/// The linked database: study metadata plus one datatable per studytable
pub struct LinkedRepo {
    conn: Connection,
    repo: StudyRepo,
}

impl LinkedRepo {
    /// Build a fresh database for `repo`, removing any existing file
    pub fn create(path: &Path, repo: &StudyRepo) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
            log::info!("Removed existing linked database {}", path.display());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::create_on(Connection::open(path)?, repo)
    }

    pub fn create_in_memory(repo: &StudyRepo) -> Result<Self> {
        Self::create_on(Connection::open_in_memory()?, repo)
    }

    /// Open an existing database and load its study metadata
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!("linked database {}", path.display())));
        }
        let conn = Connection::open(path)?;
        let repo = read_study_repo(&conn)?;
        Ok(Self { conn, repo })
    }

    fn create_on(mut conn: Connection, repo: &StudyRepo) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let tx = conn.transaction()?;
        write_metadata(&tx, repo)?;
        for table in &repo.studytables {
            create_datatable(&tx, repo, table)?;
        }
        tx.commit()?;

        log::info!(
            "Created linked database with {} studytables",
            repo.studytables.len()
        );
        Ok(Self {
            conn,
            repo: repo.clone(),
        })
    }

    pub fn study_repo(&self) -> &StudyRepo {
        &self.repo
    }

    /// Reconstruct the study repository from the metadata tables
    pub fn load_study_repo(&self) -> Result<StudyRepo> {
        read_study_repo(&self.conn)
    }

    /// Write linked rows into their studytable.
    ///
    /// Rows whose index cells do not coerce are dropped. Other bad cells
    /// are written as NULL. Rows that share a primary key merge; a non-null
    /// cell is never overwritten with a different value. Everything skipped
    /// lands in the returned report.
    pub fn write_linked(&mut self, data: &LinkedTableData) -> Result<TableErrorReport> {
        let table = self
            .repo
            .studytable_by_name(&data.studytable_name)
            .ok_or_else(|| Error::NotFound(format!("studytable '{}'", data.studytable_name)))?;
        let index_columns: Vec<LinkedColumnId> = self
            .repo
            .studytable_columns(table)
            .iter()
            .filter(|c| c.column_type == ColumnType::Index)
            .map(|c| LinkedColumnId::new(c.name.clone()))
            .collect();
        let value_columns: Vec<(LinkedColumnId, ColumnType)> = data
            .columns
            .iter()
            .cloned()
            .zip(data.value_types.iter().copied())
            .filter(|(id, _)| !index_columns.contains(id))
            .collect();

        let table_name = quote_ident(&data.studytable_name);
        let key_clause = index_columns
            .iter()
            .enumerate()
            .map(|(i, id)| format!("{} = ?{}", quote_ident(id.as_str()), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut report = TableErrorReport::new();
        let mut dropped = 0usize;
        let tx = self.conn.transaction()?;

        for row in &data.rows {
            let mut key = Vec::with_capacity(index_columns.len());
            let mut key_ok = true;
            for id in &index_columns {
                match coerce(ColumnType::Index, &row.get(id)) {
                    Ok(value) => key.push(value),
                    Err(err) => {
                        report.add(&data.studytable_name, id.as_str(), err);
                        key_ok = false;
                    }
                }
            }
            if !key_ok {
                dropped += 1;
                continue;
            }

            let values: Vec<SqlValue> = value_columns
                .iter()
                .map(|(id, value_type)| match coerce(*value_type, &row.get(id)) {
                    Ok(value) => value,
                    Err(err) => {
                        report.add(&data.studytable_name, id.as_str(), err);
                        SqlValue::Null
                    }
                })
                .collect();

            let existing = select_existing(&tx, &table_name, &key_clause, &value_columns, &key)?;
            match existing {
                None => {
                    let names: Vec<String> = index_columns
                        .iter()
                        .chain(value_columns.iter().map(|(id, _)| id))
                        .map(|id| quote_ident(id.as_str()))
                        .collect();
                    let placeholders: Vec<String> =
                        (1..=names.len()).map(|i| format!("?{}", i)).collect();
                    tx.execute(
                        &format!(
                            "INSERT INTO {} ({}) VALUES ({})",
                            table_name,
                            names.join(", "),
                            placeholders.join(", ")
                        ),
                        params_from_iter(key.iter().chain(values.iter())),
                    )?;
                }
                Some(current) => {
                    let mut assignments = Vec::new();
                    let mut update_values = Vec::new();
                    for (((id, _), new), old) in value_columns.iter().zip(values).zip(current) {
                        if new == SqlValue::Null || new == old {
                            continue;
                        }
                        if old == SqlValue::Null {
                            update_values.push(new);
                            assignments.push(format!(
                                "{} = ?{}",
                                quote_ident(id.as_str()),
                                index_columns.len() + update_values.len()
                            ));
                        } else {
                            report.add(
                                &data.studytable_name,
                                id.as_str(),
                                CellError::new(
                                    ErrorKind::ValuesAlreadyExistInRow,
                                    format!("instrument '{}' conflicts with an existing value", data.instrument_name),
                                ),
                            );
                        }
                    }
                    if !assignments.is_empty() {
                        tx.execute(
                            &format!(
                                "UPDATE {} SET {} WHERE {}",
                                table_name,
                                assignments.join(", "),
                                key_clause
                            ),
                            params_from_iter(key.iter().chain(update_values.iter())),
                        )?;
                    }
                }
            }
        }

        tx.commit()?;

        if dropped > 0 {
            log::warn!(
                "Instrument '{}': {} rows dropped for bad index values",
                data.instrument_name,
                dropped
            );
        }
        log::info!(
            "Linked '{}' into '{}': {} rows, {} errors",
            data.instrument_name,
            data.studytable_name,
            data.rows.len() - dropped,
            report.len()
        );
        Ok(report)
    }

    /// Read a studytable back as row views, in insertion order
    pub fn read_rows(&self, studytable_name: &str) -> Result<Vec<TableRowView<LinkedColumnId>>> {
        let table = self
            .repo
            .studytable_by_name(studytable_name)
            .ok_or_else(|| Error::NotFound(format!("studytable '{}'", studytable_name)))?;
        let columns = self.repo.studytable_columns(table);
        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            names.join(", "),
            quote_ident(studytable_name)
        ))?;
        let raw_rows = stmt
            .query_map([], |row| {
                (0..columns.len())
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(raw_rows
            .into_iter()
            .map(|cells| {
                columns
                    .iter()
                    .zip(cells)
                    .map(|(column, cell)| {
                        (
                            LinkedColumnId::new(column.name.clone()),
                            from_sql(column.column_type, cell),
                        )
                    })
                    .collect()
            })
            .collect())
    }
}

fn select_existing(
    tx: &Transaction<'_>,
    table_name: &str,
    key_clause: &str,
    value_columns: &[(LinkedColumnId, ColumnType)],
    key: &[SqlValue],
) -> Result<Option<Vec<SqlValue>>> {
    let selected = if value_columns.is_empty() {
        "1".to_string()
    } else {
        value_columns
            .iter()
            .map(|(id, _)| quote_ident(id.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let sql = format!("SELECT {} FROM {} WHERE {}", selected, table_name, key_clause);
    let existing = tx
        .query_row(&sql, params_from_iter(key.iter()), |row| {
            (0..value_columns.len())
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .optional()?;
    Ok(existing)
}

fn write_metadata(tx: &Transaction<'_>, repo: &StudyRepo) -> Result<()> {
    for codemap in &repo.codemaps {
        tx.execute(
            "INSERT INTO __codemaps__ (id, name, vals) VALUES (?1, ?2, ?3)",
            params![codemap.id, codemap.name, serde_json::to_string(&codemap.values)?],
        )?;
    }
    for measure in &repo.measures {
        tx.execute(
            "INSERT INTO __measure_entries__ (id, name, title, description) VALUES (?1, ?2, ?3, ?4)",
            params![measure.id, measure.name, measure.title, measure.description],
        )?;
    }
    for column in &repo.columns {
        tx.execute(
            "INSERT INTO __column_entries__
             (id, name, type, prompt, codemap_id, parent_column_id, parent_measure_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                column.id,
                column.name,
                column.column_type.as_str(),
                column.prompt,
                column.codemap_id,
                column.parent_column_id,
                column.parent_measure_id,
            ],
        )?;
    }
    for table in &repo.studytables {
        tx.execute(
            "INSERT INTO __table_info__ (id, name) VALUES (?1, ?2)",
            params![table.id, table.name],
        )?;
        for (position, column_id) in table.column_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO __table_column_association__ (table_id, column_id, position)
                 VALUES (?1, ?2, ?3)",
                params![table.id, column_id, position as i64],
            )?;
        }
    }
    for instrument in &repo.instruments {
        tx.execute(
            "INSERT INTO __instrument_entries__ (id, name, title, description, studytable_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                instrument.id,
                instrument.name,
                instrument.title,
                instrument.description,
                instrument.studytable_id,
            ],
        )?;
    }
    for node in &repo.nodes {
        let value_map = match &node.source_value_map {
            Some(map) => Some(serde_json::to_string(map)?),
            None => None,
        };
        tx.execute(
            "INSERT INTO __instrument_nodes__
             (id, instrument_id, parent_node_id, sortkey, type, prompt, remote_id,
              source_value_map, value, column_entry_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                node.id,
                node.instrument_id,
                node.parent_node_id,
                node.sortkey,
                node.kind.as_str(),
                node.prompt,
                node.remote_id,
                value_map,
                node.value,
                node.column_entry_id,
            ],
        )?;
    }
    Ok(())
}

fn create_datatable(tx: &Transaction<'_>, repo: &StudyRepo, table: &StudyTable) -> Result<()> {
    let columns = repo.studytable_columns(table);
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let not_null = if c.column_type == ColumnType::Index { " NOT NULL" } else { "" };
            format!("{} {}{}", quote_ident(&c.name), c.column_type.sql_type(), not_null)
        })
        .collect();
    let keys: Vec<String> = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Index)
        .map(|c| quote_ident(&c.name))
        .collect();
    defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));

    tx.execute(
        &format!("CREATE TABLE {} ({})", quote_ident(&table.name), defs.join(", ")),
        [],
    )?;
    log::debug!("Created datatable '{}' ({} columns)", table.name, columns.len());
    Ok(())
}

fn read_study_repo(conn: &Connection) -> Result<StudyRepo> {
    let mut repo = StudyRepo::default();

    let mut stmt = conn.prepare("SELECT id, name, vals FROM __codemaps__ ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (id, name, vals) in rows {
        let values: CodeMap = serde_json::from_str(&vals)?;
        repo.codemaps.push(CodemapEntry { id, name, values });
    }

    let mut stmt =
        conn.prepare("SELECT id, name, title, description FROM __measure_entries__ ORDER BY id")?;
    repo.measures = stmt
        .query_map([], |row| {
            Ok(MeasureEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, type, prompt, codemap_id, parent_column_id, parent_measure_id
         FROM __column_entries__ ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (id, name, type_name, prompt, codemap_id, parent_column_id, parent_measure_id) in rows {
        let column_type = ColumnType::from_name(&type_name).ok_or_else(|| {
            Error::InvalidInput(format!("column '{}' has unknown type '{}'", name, type_name))
        })?;
        repo.columns.push(ColumnEntry {
            id,
            name,
            column_type,
            prompt,
            codemap_id,
            parent_column_id,
            parent_measure_id,
        });
    }

    let mut stmt = conn.prepare("SELECT id, name FROM __table_info__ ORDER BY id")?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut stmt = conn.prepare(
        "SELECT column_id FROM __table_column_association__ WHERE table_id = ?1 ORDER BY position",
    )?;
    for (id, name) in tables {
        let column_ids = stmt
            .query_map(params![id], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        repo.studytables.push(StudyTable {
            id,
            name,
            column_ids,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, title, description, studytable_id FROM __instrument_entries__ ORDER BY id",
    )?;
    repo.instruments = stmt
        .query_map([], |row| {
            Ok(InstrumentEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                studytable_id: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, instrument_id, parent_node_id, sortkey, type, prompt, remote_id,
                source_value_map, value, column_entry_id
         FROM __instrument_nodes__ ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                (
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ),
                (
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                ),
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for ((id, instrument_id, parent_node_id, sortkey, kind), (prompt, remote_id, value_map, value, column_entry_id)) in
        rows
    {
        let kind = InstrumentNodeKind::from_name(&kind)
            .ok_or_else(|| Error::InvalidInput(format!("instrument node {} has unknown type '{}'", id, kind)))?;
        let source_value_map = match value_map {
            Some(json) => Some(serde_json::from_str::<BTreeMap<String, String>>(&json)?),
            None => None,
        };
        repo.nodes.push(InstrumentNodeEntry {
            id,
            instrument_id,
            parent_node_id,
            sortkey,
            kind,
            prompt,
            remote_id,
            source_value_map,
            value,
            column_entry_id,
        });
    }

    Ok(repo)
}

fn incorrect_type(detail: String) -> CellError {
    CellError::new(ErrorKind::IncorrectType, detail)
}

/// Coerce a linked cell into the SQL value stored for `value_type`
fn coerce(value_type: ColumnType, value: &TableValue) -> std::result::Result<SqlValue, CellError> {
    match value {
        TableValue::Error(err) => return Err(err.clone()),
        TableValue::Omitted if value_type == ColumnType::Index => {
            return Err(incorrect_type("index value is missing".to_string()))
        }
        TableValue::Omitted => return Ok(SqlValue::Null),
        TableValue::Redacted if value_type == ColumnType::Text => {
            return Ok(SqlValue::Text(REDACTED_SENTINEL.to_string()))
        }
        TableValue::Redacted => {
            return Err(incorrect_type(format!(
                "redacted value in {} column",
                value_type.as_str()
            )))
        }
        _ => {}
    }

    match value_type {
        ColumnType::Text => match value {
            TableValue::Some(v) => Ok(SqlValue::Text(v.to_string())),
            _ => Err(incorrect_type("expected a single value for a text column".to_string())),
        },
        ColumnType::Real => match value {
            TableValue::Some(Value::Real(r)) => Ok(SqlValue::Real(*r)),
            TableValue::Some(Value::Int(i)) => Ok(SqlValue::Real(*i as f64)),
            TableValue::Some(Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .map_err(|_| incorrect_type(format!("'{}' is not a real number", s))),
            _ => Err(incorrect_type("expected a real number".to_string())),
        },
        ColumnType::Integer | ColumnType::Bool => match value {
            TableValue::Some(Value::Int(i)) => Ok(SqlValue::Integer(*i)),
            TableValue::Some(Value::Bool(b)) => Ok(SqlValue::Integer(*b as i64)),
            TableValue::Some(Value::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .map_err(|_| incorrect_type(format!("'{}' is not an integer", s))),
            _ => Err(incorrect_type("expected an integer".to_string())),
        },
        ColumnType::Index | ColumnType::Ordinal | ColumnType::Categorical => {
            match value.assert_type(ValueType::Int) {
                TableValue::Some(Value::Int(i)) => Ok(SqlValue::Integer(i)),
                TableValue::Error(err) => Err(err),
                other => Err(incorrect_type(format!("unexpected {}", other.variant_name()))),
            }
        }
        ColumnType::Multiselect => match value.assert_type_seq(ValueType::Int) {
            TableValue::Multi(values) => {
                let ints: Vec<i64> = values.iter().filter_map(Value::as_int).collect();
                serde_json::to_string(&ints)
                    .map(SqlValue::Text)
                    .map_err(|e| incorrect_type(e.to_string()))
            }
            TableValue::Error(err) => Err(err),
            other => Err(incorrect_type(format!("unexpected {}", other.variant_name()))),
        },
        ColumnType::Group => Err(incorrect_type("group columns hold no values".to_string())),
    }
}

fn from_sql(column_type: ColumnType, cell: SqlValue) -> TableValue {
    match cell {
        SqlValue::Null => TableValue::Omitted,
        SqlValue::Integer(i) => TableValue::Some(Value::Int(i)),
        SqlValue::Real(r) => TableValue::Some(Value::Real(r)),
        SqlValue::Text(text) if text == REDACTED_SENTINEL => TableValue::Redacted,
        SqlValue::Text(text) if column_type == ColumnType::Multiselect => {
            match serde_json::from_str::<Vec<i64>>(&text) {
                Ok(ints) => TableValue::Multi(ints.into_iter().map(Value::Int).collect()),
                Err(e) => TableValue::error(ErrorKind::IncorrectType, e.to_string()),
            }
        }
        SqlValue::Text(text) => TableValue::Some(Value::Str(text)),
        SqlValue::Blob(_) => TableValue::error(ErrorKind::IncorrectType, "unexpected blob"),
    }
}
