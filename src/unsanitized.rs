use serde::{Deserialize, Serialize};

use crate::table::{TableData, UnsanitizedColumnId};

/// One answer option of a coded question: raw export code and its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCode {
    pub code: String,
    pub label: String,
}

impl ResponseCode {
    pub fn new(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
        }
    }
}

/// Declared type of a raw source column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnsanitizedColumnType {
    Text,
    Ordinal { codes: Vec<ResponseCode> },
    Multiselect { codes: Vec<ResponseCode> },
    Array,
}

/// Schema entry for a raw source column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsanitizedColumnInfo {
    pub id: UnsanitizedColumnId,
    pub prompt: String,
    pub column_type: UnsanitizedColumnType,
    /// Admissible as-is, without a sanitizer
    pub is_safe: bool,
}

/// Data collection service a table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Csv,
    Qualtrics,
}

impl SourceType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "csv" => Some(SourceType::Csv),
            "qualtrics" => Some(SourceType::Qualtrics),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Qualtrics => "qualtrics",
        }
    }
}

/// A table as obtained from a data source, before sanitization
#[derive(Debug, Clone, PartialEq)]
pub struct UnsanitizedTable {
    /// Instrument name the table is stored under
    pub name: String,
    /// Human title reported by the source
    pub title: String,
    pub source: SourceType,
    /// Hex SHA-256 of the data payload
    pub data_checksum: String,
    /// Hex SHA-256 of the schema payload
    pub schema_checksum: String,
    pub columns: Vec<UnsanitizedColumnInfo>,
    pub data: TableData<UnsanitizedColumnId>,
}

impl UnsanitizedTable {
    pub fn column(&self, id: &UnsanitizedColumnId) -> Option<&UnsanitizedColumnInfo> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn safe_columns(&self) -> impl Iterator<Item = &UnsanitizedColumnInfo> {
        self.columns.iter().filter(|c| c.is_safe)
    }

    pub fn unsafe_columns(&self) -> impl Iterator<Item = &UnsanitizedColumnInfo> {
        self.columns.iter().filter(|c| !c.is_safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_names() {
        assert_eq!(SourceType::from_name("Qualtrics"), Some(SourceType::Qualtrics));
        assert_eq!(SourceType::from_name("csv"), Some(SourceType::Csv));
        assert_eq!(SourceType::from_name("wearit"), None);
        assert_eq!(SourceType::Qualtrics.as_str(), "qualtrics");
    }

    #[test]
    fn test_column_type_serialization() {
        let column_type = UnsanitizedColumnType::Ordinal {
            codes: vec![ResponseCode::new("1", "Never")],
        };
        let json = serde_json::to_string(&column_type).unwrap();
        assert!(json.contains("\"type\":\"ordinal\""));
        assert!(json.contains("\"label\":\"Never\""));
    }
}
