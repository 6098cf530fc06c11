//! Applying a [`TableSanitizer`] to an [`UnsanitizedTable`].

use std::collections::HashMap;

use crate::sanitized::{SanitizedColumnInfo, SanitizedColumnType, SanitizedTable, SanitizedTableInfo};
use crate::sanitizer::{Sanitizer, TableSanitizer};
use crate::table::{SanitizedColumnId, TableData, TableRowView, UnsanitizedColumnId};
use crate::unsanitized::{UnsanitizedColumnInfo, UnsanitizedColumnType, UnsanitizedTable};
use crate::value::{ErrorKind, TableValue, Value};

/// How one sanitized column is filled from the source row
enum Projection {
    Lookup(usize),
    Copy {
        from: UnsanitizedColumnId,
        to: SanitizedColumnId,
        as_json: bool,
    },
}

/// Sanitize a whole table.
///
/// Never fails: problems end up as error cells. Output columns are the
/// sanitizer outputs in sanitizer order followed by the safe pass-through
/// columns in source order. Row order is preserved.
pub fn sanitize_table(table: &UnsanitizedTable, sanitizer: &TableSanitizer) -> SanitizedTable {
    let mut columns = Vec::new();
    let mut projections = Vec::new();

    for (idx, s) in sanitizer.sanitizers().iter().enumerate() {
        match s {
            Sanitizer::Lookup(lookup) => {
                let prompt = table
                    .columns
                    .iter()
                    .filter(|c| lookup.key_col_ids().contains(&c.id))
                    .map(|c| c.prompt.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                for id in lookup.new_col_ids() {
                    columns.push(SanitizedColumnInfo {
                        id: id.clone(),
                        prompt: prompt.clone(),
                        column_type: SanitizedColumnType::Text,
                        sanitizer_checksum: Some(lookup.checksum().to_string()),
                    });
                }
                projections.push(Projection::Lookup(idx));
            }
            Sanitizer::Identity(identity) => {
                let source = table.column(&identity.unsafe_id);
                let (prompt, column_type) = match source {
                    Some(info) => (info.prompt.clone(), sanitized_type(info)),
                    None => (identity.unsafe_id.to_string(), SanitizedColumnType::Text),
                };
                columns.push(SanitizedColumnInfo {
                    id: identity.new_id.clone(),
                    prompt,
                    column_type,
                    sanitizer_checksum: identity.checksum().ok(),
                });
                projections.push(Projection::Copy {
                    from: identity.unsafe_id.clone(),
                    to: identity.new_id.clone(),
                    as_json: matches!(source.map(|c| &c.column_type), Some(UnsanitizedColumnType::Array)),
                });
            }
            Sanitizer::Omit(_) => {}
        }
    }

    for info in &table.columns {
        let new_id = SanitizedColumnId::new(info.id.to_string());
        if sanitizer.is_omitted(&info.id) || sanitizer.produces(&new_id) {
            continue;
        }
        if !info.is_safe {
            if !sanitizer.claims(&info.id) {
                log::warn!(
                    "Table '{}': unsafe column '{}' has no sanitizer and is dropped",
                    table.name,
                    info.id
                );
            }
            continue;
        }
        if sanitizer.identities().any(|i| i.unsafe_id == info.id) {
            continue;
        }

        columns.push(SanitizedColumnInfo {
            id: new_id.clone(),
            prompt: info.prompt.clone(),
            column_type: sanitized_type(info),
            sanitizer_checksum: None,
        });
        projections.push(Projection::Copy {
            from: info.id.clone(),
            to: new_id,
            as_json: info.column_type == UnsanitizedColumnType::Array,
        });
    }

    let mut misses: HashMap<usize, usize> = HashMap::new();
    let rows: Vec<TableRowView<SanitizedColumnId>> = table
        .data
        .rows()
        .iter()
        .map(|row| {
            projections.iter().fold(TableRowView::empty(), |acc, projection| {
                let part = match projection {
                    Projection::Lookup(idx) => {
                        let out = match &sanitizer.sanitizers()[*idx] {
                            Sanitizer::Lookup(lookup) => lookup.sanitize_row(row),
                            _ => TableRowView::empty(),
                        };
                        if out
                            .iter()
                            .any(|(_, v)| v.error_kind() == Some(ErrorKind::LookupSanitizerMiss))
                        {
                            *misses.entry(*idx).or_insert(0) += 1;
                        }
                        out
                    }
                    Projection::Copy { from, to, as_json } => {
                        let value = row.get(from);
                        let value = if *as_json { json_cell(&value) } else { value };
                        std::iter::once((to.clone(), value)).collect()
                    }
                };
                acc.combine(&part)
            })
        })
        .collect();

    for (idx, count) in &misses {
        if let Sanitizer::Lookup(lookup) = &sanitizer.sanitizers()[*idx] {
            log::warn!(
                "Table '{}': {} rows missed sanitizer '{}'",
                table.name,
                count,
                lookup.name()
            );
        }
    }

    // Output ids are unique: TableSanitizer rejects duplicate outputs and
    // pass-through skips produced ids.
    let column_ids = columns.iter().map(|c| c.id.clone()).collect();
    let data = TableData::new_unchecked(column_ids, rows);

    log::info!(
        "Sanitized '{}': {} columns, {} rows",
        table.name,
        columns.len(),
        data.len()
    );

    SanitizedTable {
        info: SanitizedTableInfo {
            name: table.name.clone(),
            data_checksum: table.data_checksum.clone(),
            schema_checksum: table.schema_checksum.clone(),
            columns,
        },
        data,
    }
}

fn sanitized_type(info: &UnsanitizedColumnInfo) -> SanitizedColumnType {
    match &info.column_type {
        UnsanitizedColumnType::Text | UnsanitizedColumnType::Array => SanitizedColumnType::Text,
        UnsanitizedColumnType::Ordinal { codes } => SanitizedColumnType::Ordinal {
            codes: codes.iter().map(|c| c.label.clone()).collect(),
        },
        UnsanitizedColumnType::Multiselect { codes } => SanitizedColumnType::Multiselect {
            codes: codes.iter().map(|c| c.label.clone()).collect(),
        },
    }
}

/// Array cells become their JSON text
fn json_cell(value: &TableValue) -> TableValue {
    match value {
        TableValue::Multi(vs) => match serde_json::to_string(vs) {
            Ok(json) => TableValue::Some(Value::Str(json)),
            Err(e) => TableValue::error(ErrorKind::IncorrectType, e.to_string()),
        },
        TableValue::Some(v) => match serde_json::to_string(&[v]) {
            Ok(json) => TableValue::Some(Value::Str(json)),
            Err(e) => TableValue::error(ErrorKind::IncorrectType, e.to_string()),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::csv::CsvReader;
    use crate::sanitizer::{IdentitySanitizer, LookupSanitizer, OmitSanitizer};
    use crate::unsanitized::{ResponseCode, SourceType};

    const S1_INPUT: &str = "(b),d,z,t\n1,2,a,b\n4,5,,c\n7,,d,e\n";
    const S1_SANITIZER: &str = "(b),(d),c,a\n1,2,3,10\n4,5,,11\n7,,9,12\n";

    fn some(s: &str) -> TableValue {
        TableValue::Some(Value::from(s))
    }

    fn sid(s: &str) -> SanitizedColumnId {
        SanitizedColumnId::from(s)
    }

    fn s1_sanitizer() -> TableSanitizer {
        let lookup = LookupSanitizer::from_csv_str("s1", S1_SANITIZER).unwrap();
        TableSanitizer::new(vec![Sanitizer::Lookup(lookup)]).unwrap()
    }

    #[test]
    fn test_s1_csv_sanitize() {
        let table = CsvReader::new().read_text("s1", S1_INPUT).unwrap();
        let sanitized = sanitize_table(&table, &s1_sanitizer());

        let ids: Vec<String> = sanitized.info.columns.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "d", "z", "t"]);

        let expected = [
            [some("3"), some("10"), some("2"), some("a"), some("b")],
            [TableValue::Redacted, some("11"), some("5"), TableValue::Omitted, some("c")],
            [some("9"), some("12"), TableValue::Omitted, some("d"), some("e")],
        ];
        let rows = sanitized.data.rows();
        assert_eq!(rows.len(), 3);
        for (row, expected) in rows.iter().zip(expected.iter()) {
            for (id, value) in ["c", "a", "d", "z", "t"].iter().zip(expected.iter()) {
                assert_eq!(&row.get(&sid(id)), value, "column {}", id);
            }
        }

        let c = sanitized.info.column(&sid("c")).unwrap();
        assert_eq!(c.prompt, "b; d");
        assert!(c.sanitizer_checksum.is_some());
        assert_eq!(sanitized.info.column(&sid("z")).unwrap().sanitizer_checksum, None);
    }

    #[test]
    fn test_s2_sanitizer_miss() {
        let input = "(b),d,z,t\n99,2,a,b\n";
        let table = CsvReader::new().read_text("s2", input).unwrap();
        let sanitized = sanitize_table(&table, &s1_sanitizer());

        let row = &sanitized.data.rows()[0];
        assert_eq!(row.get(&sid("c")).error_kind(), Some(ErrorKind::LookupSanitizerMiss));
        assert_eq!(row.get(&sid("a")).error_kind(), Some(ErrorKind::LookupSanitizerMiss));
        assert_eq!(row.get(&sid("d")), some("2"));
        assert_eq!(row.get(&sid("z")), some("a"));
        assert_eq!(row.get(&sid("t")), some("b"));
    }

    #[test]
    fn test_rows_have_exactly_declared_columns() {
        let table = CsvReader::new().read_text("s1", S1_INPUT).unwrap();
        let sanitized = sanitize_table(&table, &s1_sanitizer());
        let mut declared = sanitized.info.column_ids();
        declared.sort();
        for row in sanitized.data.rows() {
            assert_eq!(row.column_ids(), declared);
        }
        assert_eq!(sanitized.data.len(), table.data.len());
    }

    #[test]
    fn test_identity_sanitizer_preserves_values() {
        let table = CsvReader::new().read_text("s1", S1_INPUT).unwrap();
        let identities = table
            .unsafe_columns()
            .map(|c| {
                Sanitizer::Identity(IdentitySanitizer::new(
                    c.id.clone(),
                    SanitizedColumnId::new(c.id.to_string()),
                ))
            })
            .collect();
        let sanitized = sanitize_table(&table, &TableSanitizer::new(identities).unwrap());

        assert_eq!(sanitized.data.len(), table.data.len());
        for (before, after) in table.data.rows().iter().zip(sanitized.data.rows()) {
            for (id, value) in before.iter() {
                if let TableValue::Some(_) = value {
                    assert_eq!(&after.get(&SanitizedColumnId::new(id.to_string())), value);
                }
            }
        }
    }

    #[test]
    fn test_uncovered_unsafe_column_is_dropped() {
        let table = CsvReader::new().read_text("t", "(name),age\nAda,36\n").unwrap();
        let sanitized = sanitize_table(&table, &TableSanitizer::default());
        assert_eq!(sanitized.info.column_ids(), vec![sid("age")]);
    }

    #[test]
    fn test_omit_drops_safe_column() {
        let table = CsvReader::new().read_text("t", "ip,age\n1.2.3.4,36\n").unwrap();
        let sanitizer = TableSanitizer::new(vec![Sanitizer::Omit(OmitSanitizer {
            unsafe_id: UnsanitizedColumnId::from("ip"),
        })])
        .unwrap();
        let sanitized = sanitize_table(&table, &sanitizer);
        assert_eq!(sanitized.info.column_ids(), vec![sid("age")]);
    }

    #[test]
    fn test_identity_keeps_coded_type() {
        let mut table = CsvReader::new().read_text("t", "(q1)\nNever\n").unwrap();
        table.columns[0].column_type = UnsanitizedColumnType::Ordinal {
            codes: vec![ResponseCode::new("1", "Never"), ResponseCode::new("2", "Often")],
        };
        table.source = SourceType::Qualtrics;
        let sanitizer = TableSanitizer::new(vec![Sanitizer::Identity(IdentitySanitizer::new(
            UnsanitizedColumnId::from("q1"),
            sid("q1"),
        ))])
        .unwrap();

        let sanitized = sanitize_table(&table, &sanitizer);
        assert_eq!(
            sanitized.info.columns[0].column_type,
            SanitizedColumnType::Ordinal {
                codes: vec!["Never".to_string(), "Often".to_string()]
            }
        );
        assert_eq!(sanitized.data.rows()[0].get(&sid("q1")), some("Never"));
    }
}
