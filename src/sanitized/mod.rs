//! Sanitized tables and their persistent store.

pub mod repo;

use serde::{Deserialize, Serialize};

use crate::table::{SanitizedColumnId, TableData};

pub use repo::SanitizedRepo;

/// Semantic type of a sanitized column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SanitizedColumnType {
    Text,
    /// Cells hold one of `codes`
    Ordinal { codes: Vec<String> },
    /// Cells hold a list drawn from `codes`
    Multiselect { codes: Vec<String> },
}

impl SanitizedColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            SanitizedColumnType::Text => "text",
            SanitizedColumnType::Ordinal { .. } => "ordinal",
            SanitizedColumnType::Multiselect { .. } => "multiselect",
        }
    }

    pub fn codes(&self) -> Option<&[String]> {
        match self {
            SanitizedColumnType::Text => None,
            SanitizedColumnType::Ordinal { codes } | SanitizedColumnType::Multiselect { codes } => {
                Some(codes)
            }
        }
    }

    /// Rebuild from the stored name and codes
    pub fn from_parts(name: &str, codes: Option<Vec<String>>) -> Option<Self> {
        match name {
            "text" => Some(SanitizedColumnType::Text),
            "ordinal" => Some(SanitizedColumnType::Ordinal {
                codes: codes.unwrap_or_default(),
            }),
            "multiselect" => Some(SanitizedColumnType::Multiselect {
                codes: codes.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedColumnInfo {
    pub id: SanitizedColumnId,
    pub prompt: String,
    pub column_type: SanitizedColumnType,
    /// Checksum of the producing sanitizer; `None` for naturally safe columns
    pub sanitizer_checksum: Option<String>,
}

/// Schema of a sanitized table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedTableInfo {
    pub name: String,
    pub data_checksum: String,
    pub schema_checksum: String,
    pub columns: Vec<SanitizedColumnInfo>,
}

impl SanitizedTableInfo {
    pub fn column(&self, id: &SanitizedColumnId) -> Option<&SanitizedColumnInfo> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn column_ids(&self) -> Vec<SanitizedColumnId> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedTable {
    pub info: SanitizedTableInfo,
    pub data: TableData<SanitizedColumnId>,
}
