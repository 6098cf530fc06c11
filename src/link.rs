//! Projecting sanitized tables into the study schema.
//!
//! An [`InstrumentLinkerSpec`] says, for one instrument, where each
//! studytable column gets its value. [`link_tableinfo`] resolves it against
//! a concrete sanitized schema and [`link_tabledata`] runs it over the rows.

use std::collections::HashMap;

use crate::sanitized::SanitizedTableInfo;
use crate::study::ColumnType;
use crate::table::{LinkedColumnId, SanitizedColumnId, TableData, TableRowView};
use crate::value::{ErrorKind, TableValue, Value, ValueType};

/// Where a linked value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SrcLink {
    /// A sanitized column, optionally remapped first
    Question {
        source_column_name: SanitizedColumnId,
        source_value_map: Option<HashMap<Value, Value>>,
    },
    /// The same value on every row
    Constant { value: Value },
}

/// Where a linked value goes
#[derive(Debug, Clone, PartialEq)]
pub enum DstLink {
    Simple {
        name: LinkedColumnId,
        value_type: ColumnType,
    },
    /// Tags are converted to codemap values
    Coded {
        name: LinkedColumnId,
        value_type: ColumnType,
        value_from_tag: HashMap<Value, Value>,
    },
}

impl DstLink {
    pub fn name(&self) -> &LinkedColumnId {
        match self {
            DstLink::Simple { name, .. } | DstLink::Coded { name, .. } => name,
        }
    }

    pub fn value_type(&self) -> ColumnType {
        match self {
            DstLink::Simple { value_type, .. } | DstLink::Coded { value_type, .. } => *value_type,
        }
    }

    pub fn to_dst(&self, value: &TableValue) -> TableValue {
        match self {
            DstLink::Simple { .. } => value.clone(),
            DstLink::Coded { value_from_tag, .. } => value.lookup(value_from_tag, ValueType::Str),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkerSpec {
    pub src: SrcLink,
    pub dst: DstLink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentLinkerSpec {
    pub instrument_name: String,
    pub studytable_name: String,
    pub linker_specs: Vec<LinkerSpec>,
}

#[derive(Debug, Clone)]
enum Source {
    Column {
        id: SanitizedColumnId,
        value_map: Option<HashMap<Value, Value>>,
    },
    Missing(SanitizedColumnId),
    Constant(Value),
}

/// A linker spec resolved against a sanitized schema
#[derive(Debug, Clone)]
pub struct Linker {
    source: Source,
    dst: DstLink,
}

impl Linker {
    pub fn dst(&self) -> &DstLink {
        &self.dst
    }

    pub fn link(&self, row: &TableRowView<SanitizedColumnId>) -> TableValue {
        let value = match &self.source {
            Source::Column { id, value_map } => {
                let value = row.get(id);
                match value_map {
                    Some(map) => value.lookup_with_default(map, ValueType::Str),
                    None => value,
                }
            }
            Source::Missing(id) => TableValue::error(
                ErrorKind::ColumnNotFoundInRow,
                format!("sanitized column '{}' does not exist", id),
            ),
            Source::Constant(value) => TableValue::Some(value.clone()),
        };
        self.dst.to_dst(&value)
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentLinker {
    pub instrument_name: String,
    pub studytable_name: String,
    pub linkers: Vec<Linker>,
}

/// Rows of one instrument in studytable terms
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedTableData {
    pub instrument_name: String,
    pub studytable_name: String,
    pub columns: Vec<LinkedColumnId>,
    pub value_types: Vec<ColumnType>,
    pub rows: Vec<TableRowView<LinkedColumnId>>,
}

/// Resolve a linker spec against a sanitized schema.
///
/// Questions whose source column is absent still produce a linker; it
/// yields `ColumnNotFoundInRow` on every row.
pub fn link_tableinfo(info: &SanitizedTableInfo, spec: &InstrumentLinkerSpec) -> InstrumentLinker {
    let linkers = spec
        .linker_specs
        .iter()
        .map(|linker_spec| {
            let source = match &linker_spec.src {
                SrcLink::Question {
                    source_column_name,
                    source_value_map,
                } => {
                    if info.column(source_column_name).is_some() {
                        Source::Column {
                            id: source_column_name.clone(),
                            value_map: source_value_map.clone(),
                        }
                    } else {
                        log::warn!(
                            "Instrument '{}': column '{}' is not in sanitized table '{}'",
                            spec.instrument_name,
                            source_column_name,
                            info.name
                        );
                        Source::Missing(source_column_name.clone())
                    }
                }
                SrcLink::Constant { value } => Source::Constant(value.clone()),
            };
            Linker {
                source,
                dst: linker_spec.dst.clone(),
            }
        })
        .collect();

    InstrumentLinker {
        instrument_name: spec.instrument_name.clone(),
        studytable_name: spec.studytable_name.clone(),
        linkers,
    }
}

/// Run a linker over every sanitized row, preserving row order
pub fn link_tabledata(
    data: &TableData<SanitizedColumnId>,
    linker: &InstrumentLinker,
) -> LinkedTableData {
    let rows: Vec<TableRowView<LinkedColumnId>> = data
        .rows()
        .iter()
        .map(|row| {
            linker
                .linkers
                .iter()
                .map(|l| (l.dst.name().clone(), l.link(row)))
                .collect()
        })
        .collect();

    LinkedTableData {
        instrument_name: linker.instrument_name.clone(),
        studytable_name: linker.studytable_name.clone(),
        columns: linker.linkers.iter().map(|l| l.dst.name().clone()).collect(),
        value_types: linker.linkers.iter().map(|l| l.dst.value_type()).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitized::{SanitizedColumnInfo, SanitizedColumnType};

    fn frequency_tags() -> HashMap<Value, Value> {
        [("NEVER", 1), ("SELDOM", 2), ("OFTEN", 3), ("ALMOST_ALWAYS", 4)]
            .into_iter()
            .map(|(tag, value)| (Value::from(tag), Value::Int(value)))
            .collect()
    }

    fn sanitized(
        columns: &[(&str, SanitizedColumnType)],
        rows: Vec<Vec<(&str, TableValue)>>,
    ) -> (SanitizedTableInfo, TableData<SanitizedColumnId>) {
        let info = SanitizedTableInfo {
            name: "survey".to_string(),
            data_checksum: String::new(),
            schema_checksum: String::new(),
            columns: columns
                .iter()
                .map(|(id, column_type)| SanitizedColumnInfo {
                    id: SanitizedColumnId::from(*id),
                    prompt: id.to_string(),
                    column_type: column_type.clone(),
                    sanitizer_checksum: None,
                })
                .collect(),
        };
        let rows: Vec<TableRowView<SanitizedColumnId>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| (SanitizedColumnId::from(k), v))
                    .collect()
            })
            .collect();
        let data = TableData::new(info.column_ids(), rows).unwrap();
        (info, data)
    }

    fn ordinal_spec() -> InstrumentLinkerSpec {
        InstrumentLinkerSpec {
            instrument_name: "survey".to_string(),
            studytable_name: "indices.year".to_string(),
            linker_specs: vec![
                LinkerSpec {
                    src: SrcLink::Constant {
                        value: Value::from("2020"),
                    },
                    dst: DstLink::Coded {
                        name: LinkedColumnId::from("indices.year"),
                        value_type: ColumnType::Index,
                        value_from_tag: [(Value::from("2020"), Value::Int(2020))].into_iter().collect(),
                    },
                },
                LinkerSpec {
                    src: SrcLink::Question {
                        source_column_name: SanitizedColumnId::from("q1"),
                        source_value_map: None,
                    },
                    dst: DstLink::Coded {
                        name: LinkedColumnId::from("freq.q1"),
                        value_type: ColumnType::Ordinal,
                        value_from_tag: frequency_tags(),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_s3_ordinal_link() {
        let ordinal = SanitizedColumnType::Ordinal {
            codes: vec!["NEVER".to_string(), "OFTEN".to_string()],
        };
        let (info, data) = sanitized(
            &[("q1", ordinal)],
            vec![
                vec![("q1", TableValue::Some(Value::from("NEVER")))],
                vec![("q1", TableValue::Some(Value::from("UNKNOWN")))],
            ],
        );

        let linker = link_tableinfo(&info, &ordinal_spec());
        let linked = link_tabledata(&data, &linker);

        let q1 = LinkedColumnId::from("freq.q1");
        let year = LinkedColumnId::from("indices.year");
        assert_eq!(linked.columns, vec![year.clone(), q1.clone()]);
        assert_eq!(linked.value_types, vec![ColumnType::Index, ColumnType::Ordinal]);
        assert_eq!(linked.rows[0].get(&q1), TableValue::Some(Value::Int(1)));
        assert_eq!(linked.rows[0].get(&year), TableValue::Some(Value::Int(2020)));
        assert_eq!(linked.rows[1].get(&q1).error_kind(), Some(ErrorKind::MissingCode));
    }

    #[test]
    fn test_s6_multiselect_link() {
        let multiselect = SanitizedColumnType::Multiselect {
            codes: vec!["L1".to_string(), "L2".to_string()],
        };
        let (info, data) = sanitized(
            &[("pick", multiselect)],
            vec![vec![(
                "pick",
                TableValue::Multi(vec![Value::from("L1"), Value::from("L2")]),
            )]],
        );
        let spec = InstrumentLinkerSpec {
            instrument_name: "survey".to_string(),
            studytable_name: "indices.year".to_string(),
            linker_specs: vec![LinkerSpec {
                src: SrcLink::Question {
                    source_column_name: SanitizedColumnId::from("pick"),
                    source_value_map: None,
                },
                dst: DstLink::Coded {
                    name: LinkedColumnId::from("freq.pick"),
                    value_type: ColumnType::Multiselect,
                    value_from_tag: [(Value::from("L1"), Value::Int(1)), (Value::from("L2"), Value::Int(2))]
                        .into_iter()
                        .collect(),
                },
            }],
        };

        let linked = link_tabledata(&data, &link_tableinfo(&info, &spec));
        assert_eq!(
            linked.rows[0].get(&LinkedColumnId::from("freq.pick")),
            TableValue::Multi(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_missing_source_column() {
        let (info, data) = sanitized(
            &[("other", SanitizedColumnType::Text)],
            vec![vec![("other", TableValue::Some(Value::from("x")))]],
        );
        let linked = link_tabledata(&data, &link_tableinfo(&info, &ordinal_spec()));
        assert_eq!(
            linked.rows[0].get(&LinkedColumnId::from("freq.q1")).error_kind(),
            Some(ErrorKind::ColumnNotFoundInRow)
        );
    }

    #[test]
    fn test_source_value_map_passes_unknown_values() {
        let (info, data) = sanitized(
            &[("q1", SanitizedColumnType::Text)],
            vec![
                vec![("q1", TableValue::Some(Value::from("1")))],
                vec![("q1", TableValue::Some(Value::from("OFTEN")))],
                vec![("q1", TableValue::Omitted)],
            ],
        );
        let mut spec = ordinal_spec();
        spec.linker_specs[1].src = SrcLink::Question {
            source_column_name: SanitizedColumnId::from("q1"),
            source_value_map: Some(
                [(Value::from("1"), Value::from("NEVER"))].into_iter().collect(),
            ),
        };

        let linked = link_tabledata(&data, &link_tableinfo(&info, &spec));
        let q1 = LinkedColumnId::from("freq.q1");
        assert_eq!(linked.rows[0].get(&q1), TableValue::Some(Value::Int(1)));
        assert_eq!(linked.rows[1].get(&q1), TableValue::Some(Value::Int(3)));
        assert_eq!(linked.rows[2].get(&q1), TableValue::Omitted);
    }
}
