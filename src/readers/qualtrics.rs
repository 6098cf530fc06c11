//! Qualtrics response export reader.
//!
//! The schema payload is the JSON schema of the response export; the data
//! payload is the `responses` export. Questions are keyed by QID in both.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::table::{TableData, TableRowView, UnsanitizedColumnId};
use crate::types::{sha256_hex, Result};
use crate::unsanitized::{
    ResponseCode, SourceType, UnsanitizedColumnInfo, UnsanitizedColumnType, UnsanitizedTable,
};
use crate::value::{ErrorKind, TableValue, Value, ValueType};

use super::SourceReader;

/// Export items that are never ingested
static IGNORED_ITEMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^locationLatitude$",
        r"^locationLongitude$",
        r"^recipientEmail$",
        r"^recipientFirstName$",
        r"^recipientLastName$",
        r"^ipAddress$",
        r"^externalDataReference$",
        r"^distributionChannel$",
        r"^userLanguage$",
        r"_DO$",
        r"_DO_\d+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Locations of the per-item schema, most specific first
const PROPERTY_POINTERS: &[&str] = &[
    "/result/properties/values/properties",
    "/properties/values/properties",
    "/properties",
];

fn is_ignored(key: &str) -> bool {
    IGNORED_ITEMS.iter().any(|re| re.is_match(key))
}

/// String form of a JSON scalar, used to match codes between schema and data
fn json_scalar_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A schema item resolved into a column
struct QualtricsColumn {
    key: String,
    info: UnsanitizedColumnInfo,
    /// Export code -> label
    labels: HashMap<Value, Value>,
}

impl QualtricsColumn {
    fn from_property(key: &str, prop: &Map<String, JsonValue>) -> Result<Self> {
        let data_type = prop
            .get("dataType")
            .and_then(|d| d.as_str())
            .unwrap_or("metadata");

        let id = match (data_type, prop.get("exportTag").and_then(|t| t.as_str())) {
            ("question", Some(tag)) => tag.to_string(),
            ("question", None) => key.to_string(),
            _ => format!("qualtrics_{}", key),
        };

        let prompt = prop
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or(key)
            .to_string();

        let column_type = column_type(key, prop)?;
        let labels = match &column_type {
            UnsanitizedColumnType::Ordinal { codes }
            | UnsanitizedColumnType::Multiselect { codes } => codes
                .iter()
                .map(|c| (Value::from(c.code.as_str()), Value::from(c.label.as_str())))
                .collect(),
            _ => HashMap::new(),
        };

        Ok(Self {
            key: key.to_string(),
            info: UnsanitizedColumnInfo {
                id: UnsanitizedColumnId::new(id),
                prompt,
                column_type,
                is_safe: false,
            },
            labels,
        })
    }

    /// Decode one response value for this column
    fn cell(&self, raw: Option<&JsonValue>) -> TableValue {
        let raw = match raw {
            None | Some(JsonValue::Null) => return TableValue::Omitted,
            Some(v) => v,
        };

        match &self.info.column_type {
            UnsanitizedColumnType::Text => match raw {
                JsonValue::String(s) => TableValue::text_or(s, TableValue::Omitted),
                JsonValue::Number(_) | JsonValue::Bool(_) => match json_scalar_key(raw) {
                    Some(text) => TableValue::Some(Value::Str(text)),
                    None => TableValue::Omitted,
                },
                _ => TableValue::error(
                    ErrorKind::IncorrectType,
                    format!("expected a scalar for '{}'", self.info.id),
                ),
            },
            UnsanitizedColumnType::Ordinal { .. } => match json_scalar_key(raw) {
                Some(code) if code.is_empty() => TableValue::Omitted,
                Some(code) => {
                    TableValue::Some(Value::Str(code)).lookup(&self.labels, ValueType::Str)
                }
                None => TableValue::error(
                    ErrorKind::IncorrectType,
                    format!("expected a code for '{}'", self.info.id),
                ),
            },
            UnsanitizedColumnType::Multiselect { .. } | UnsanitizedColumnType::Array => {
                let items: Vec<&JsonValue> = match raw {
                    JsonValue::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                let codes: Option<Vec<Value>> = items
                    .into_iter()
                    .map(|item| json_scalar_key(item).map(Value::Str))
                    .collect();

                match codes {
                    Some(codes) if codes.is_empty() => TableValue::Omitted,
                    Some(codes) if self.labels.is_empty() => TableValue::Multi(codes),
                    Some(codes) => TableValue::Multi(codes).lookup(&self.labels, ValueType::Str),
                    None => TableValue::error(
                        ErrorKind::IncorrectType,
                        format!("expected a list of codes for '{}'", self.info.id),
                    ),
                }
            }
        }
    }
}

fn column_type(key: &str, prop: &Map<String, JsonValue>) -> Result<UnsanitizedColumnType> {
    let type_name = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");

    match type_name {
        "string" | "boolean" => Ok(UnsanitizedColumnType::Text),
        "number" | "integer" => match prop.get("oneOf").and_then(|o| o.as_array()) {
            Some(options) => Ok(UnsanitizedColumnType::Ordinal {
                codes: parse_codes(key, options)?,
            }),
            None => Ok(UnsanitizedColumnType::Text),
        },
        "array" => match prop
            .get("items")
            .and_then(|i| i.get("oneOf"))
            .and_then(|o| o.as_array())
        {
            Some(options) => Ok(UnsanitizedColumnType::Multiselect {
                codes: parse_codes(key, options)?,
            }),
            None => Err(Error::UnsupportedFormat(format!(
                "Qualtrics array item '{}' has no answer options",
                key
            ))),
        },
        other => Err(Error::UnsupportedFormat(format!(
            "Qualtrics item '{}' has unsupported type '{}'",
            key, other
        ))),
    }
}

fn parse_codes(key: &str, options: &[JsonValue]) -> Result<Vec<ResponseCode>> {
    options
        .iter()
        .map(|option| {
            let code = option
                .get("const")
                .and_then(json_scalar_key)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("answer option of '{}' has no const", key))
                })?;
            let label = option
                .get("label")
                .and_then(|l| l.as_str())
                .map(|l| l.to_string())
                .unwrap_or_else(|| code.clone());
            Ok(ResponseCode { code, label })
        })
        .collect()
}

/// Qualtrics response export reader
#[derive(Debug, Default)]
pub struct QualtricsReader;

impl QualtricsReader {
    pub fn new() -> Self {
        Self
    }
}

impl SourceReader for QualtricsReader {
    fn source_type(&self) -> SourceType {
        SourceType::Qualtrics
    }

    fn read(&self, name: &str, schema_text: &str, data_text: &str) -> Result<UnsanitizedTable> {
        let schema: JsonValue = serde_json::from_str(schema_text)?;
        let data: JsonValue = serde_json::from_str(data_text)?;

        let properties = PROPERTY_POINTERS
            .iter()
            .find_map(|p| schema.pointer(p).and_then(|v| v.as_object()))
            .ok_or_else(|| {
                Error::InvalidInput(format!("Qualtrics schema for '{}' has no properties", name))
            })?;

        let mut columns = Vec::new();
        for (key, prop) in properties {
            if is_ignored(key) {
                continue;
            }
            let prop = prop.as_object().ok_or_else(|| {
                Error::InvalidInput(format!("Qualtrics schema item '{}' is not an object", key))
            })?;
            columns.push(QualtricsColumn::from_property(key, prop)?);
        }

        let responses = data
            .get("responses")
            .or_else(|| data.pointer("/result/responses"))
            .unwrap_or(&data)
            .as_array()
            .ok_or_else(|| {
                Error::InvalidInput(format!("Qualtrics data for '{}' has no responses", name))
            })?;

        let empty = Map::new();
        let rows: Vec<TableRowView<UnsanitizedColumnId>> = responses
            .iter()
            .map(|response| {
                let values = response
                    .get("values")
                    .and_then(|v| v.as_object())
                    .unwrap_or(&empty);
                columns
                    .iter()
                    .map(|col| (col.info.id.clone(), col.cell(values.get(&col.key))))
                    .collect()
            })
            .collect();

        let infos: Vec<UnsanitizedColumnInfo> = columns.into_iter().map(|c| c.info).collect();
        let data = TableData::new(infos.iter().map(|c| c.id.clone()).collect(), rows)?;

        let title = schema
            .pointer("/result/title")
            .or_else(|| schema.get("title"))
            .and_then(|t| t.as_str())
            .unwrap_or(name)
            .to_string();

        log::debug!(
            "Read Qualtrics source '{}': {} columns, {} responses",
            name,
            infos.len(),
            data.len()
        );

        Ok(UnsanitizedTable {
            name: name.to_string(),
            title,
            source: SourceType::Qualtrics,
            data_checksum: sha256_hex(data_text.as_bytes()),
            schema_checksum: sha256_hex(schema_text.as_bytes()),
            columns: infos,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "result": {
            "title": "Intake Survey",
            "properties": {
                "values": {
                    "properties": {
                        "recordedDate": {"type": "string", "dataType": "metadata", "description": "Recorded Date"},
                        "locationLatitude": {"type": "string", "dataType": "metadata"},
                        "QID1": {"type": "string", "dataType": "question", "exportTag": "name", "description": "Your name"},
                        "QID2": {"type": "number", "dataType": "question", "exportTag": "freq", "description": "How often?",
                                 "oneOf": [{"label": "NEVER", "const": 1}, {"label": "OFTEN", "const": 2}]},
                        "QID3": {"type": "array", "dataType": "question", "exportTag": "pets", "description": "Pets",
                                 "items": {"type": "number", "oneOf": [{"label": "L1", "const": "c1"}, {"label": "L2", "const": "c2"}]}},
                        "QID4": {"type": "number", "dataType": "question", "exportTag": "age"},
                        "QID3_DO": {"type": "array", "dataType": "question"}
                    }
                }
            }
        }
    }"#;

    const DATA: &str = r#"{
        "responses": [
            {"responseId": "R_1", "values": {"recordedDate": "2024-01-01", "QID1": "Ann", "QID2": 1, "QID3": ["c1", "c2"], "QID4": 34}},
            {"responseId": "R_2", "values": {"recordedDate": "2024-01-02", "QID1": "", "QID2": 7, "QID3": []}}
        ]
    }"#;

    fn read() -> UnsanitizedTable {
        QualtricsReader::new().read("intake", SCHEMA, DATA).unwrap()
    }

    fn id(s: &str) -> UnsanitizedColumnId {
        UnsanitizedColumnId::from(s)
    }

    #[test]
    fn test_schema_columns() {
        let table = read();
        let ids: Vec<&str> = table.columns.iter().map(|c| c.id.0.as_str()).collect();
        assert_eq!(ids, vec!["qualtrics_recordedDate", "name", "freq", "pets", "age"]);
        assert!(table.columns.iter().all(|c| !c.is_safe));
        assert_eq!(table.title, "Intake Survey");

        let freq = table.column(&id("freq")).unwrap();
        assert_eq!(freq.prompt, "How often?");
        assert_eq!(
            freq.column_type,
            UnsanitizedColumnType::Ordinal {
                codes: vec![ResponseCode::new("1", "NEVER"), ResponseCode::new("2", "OFTEN")]
            }
        );
        assert_eq!(table.column(&id("age")).unwrap().column_type, UnsanitizedColumnType::Text);
    }

    #[test]
    fn test_response_values() {
        let table = read();
        let rows = table.data.rows();

        assert_eq!(rows[0].get(&id("name")), TableValue::Some(Value::from("Ann")));
        assert_eq!(rows[0].get(&id("freq")), TableValue::Some(Value::from("NEVER")));
        assert_eq!(rows[0].get(&id("age")), TableValue::Some(Value::from("34")));
        assert_eq!(
            rows[0].get(&id("qualtrics_recordedDate")),
            TableValue::Some(Value::from("2024-01-01"))
        );

        assert_eq!(rows[1].get(&id("name")), TableValue::Omitted);
        assert_eq!(rows[1].get(&id("freq")).error_kind(), Some(ErrorKind::MissingCode));
        assert_eq!(rows[1].get(&id("pets")), TableValue::Omitted);
        assert_eq!(rows[1].get(&id("age")), TableValue::Omitted);
    }

    #[test]
    fn test_multiselect_labels() {
        let table = read();
        assert_eq!(
            table.data.rows()[0].get(&id("pets")),
            TableValue::Multi(vec![Value::from("L1"), Value::from("L2")])
        );
    }

    #[test]
    fn test_array_without_options_is_rejected() {
        let schema = r#"{"properties": {"values": {"properties": {
            "QID9": {"type": "array", "dataType": "question", "exportTag": "q9"}
        }}}}"#;
        let result = QualtricsReader::new().read("t", schema, r#"{"responses": []}"#);
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_ignored_items() {
        assert!(is_ignored("locationLatitude"));
        assert!(is_ignored("QID7_DO"));
        assert!(is_ignored("recipientEmail"));
        assert!(!is_ignored("QID7"));
    }
}
