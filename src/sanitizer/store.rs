//! On-disk sanitizers: one directory per instrument holding lookup
//! sanitizers as CSV files and identity/omit rules as YAML.

use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::readers::csv::parse_headers;
use crate::table::{SanitizedColumnId, TableRowView, UnsanitizedColumnId};
use crate::types::{sha256_hex, Result, SANITIZER_RULES_FILE};
use crate::value::TableValue;

use super::{IdentitySanitizer, LookupSanitizer, OmitSanitizer, Sanitizer, TableSanitizer};

impl LookupSanitizer {
    /// Parse a lookup sanitizer CSV.
    ///
    /// Key columns are written `(name)`, output columns bare. Empty key cells
    /// read as `Omitted`, empty output cells as `Redacted`.
    pub fn from_csv_str(name: &str, text: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = parse_headers(name, reader.headers()?)?;
        let key_col_ids: Vec<UnsanitizedColumnId> = headers
            .iter()
            .filter(|h| h.wrapped)
            .map(|h| UnsanitizedColumnId::new(h.name.clone()))
            .collect();
        let new_col_ids: Vec<SanitizedColumnId> = headers
            .iter()
            .filter(|h| !h.wrapped)
            .map(|h| SanitizedColumnId::new(h.name.clone()))
            .collect();

        let mut sanitizer = LookupSanitizer::new(name, key_col_ids, new_col_ids)?;

        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let line = idx + 2;

            let mut key = Vec::new();
            let mut value = Vec::new();
            for (col_idx, header) in headers.iter().enumerate() {
                let field = record.get(col_idx).unwrap_or("");
                if header.wrapped {
                    key.push((
                        UnsanitizedColumnId::new(header.name.clone()),
                        TableValue::text_or(field, TableValue::Omitted),
                    ));
                } else {
                    value.push((
                        SanitizedColumnId::new(header.name.clone()),
                        TableValue::text_or(field, TableValue::Redacted),
                    ));
                }
            }

            sanitizer.insert_at(
                key.into_iter().collect::<TableRowView<_>>(),
                value.into_iter().collect::<TableRowView<_>>(),
                line,
            )?;
        }

        sanitizer.set_checksum(sha256_hex(text.as_bytes()));
        Ok(sanitizer)
    }

    /// Serialize in the same format `from_csv_str` reads
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());

        let header: Vec<String> = self
            .key_col_ids()
            .iter()
            .map(|id| format!("({})", id))
            .chain(self.new_col_ids().iter().map(|id| id.to_string()))
            .collect();
        writer.write_record(&header)?;

        for entry in self.entries() {
            let record: Vec<String> = self
                .key_col_ids()
                .iter()
                .map(|id| cell_text(&entry.key.get(id)))
                .chain(self.new_col_ids().iter().map(|id| cell_text(&entry.value.get(id))))
                .collect();
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::InvalidInput(format!("sanitizer is not valid UTF-8: {}", e)))
    }
}

fn cell_text(value: &TableValue) -> String {
    match value {
        TableValue::Some(v) => v.to_string(),
        TableValue::Multi(vs) => vs.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(";"),
        _ => String::new(),
    }
}

/// Identity rule as written in `rules.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRule {
    pub column: String,
    /// Sanitized name; defaults to the source name
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

/// Identity and omit rules of one instrument
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerRules {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity: Vec<IdentityRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omit: Vec<String>,
}

impl IdentitySanitizer {
    /// Canonical rule form, with the sanitized name always spelled out
    pub fn to_rule(&self) -> IdentityRule {
        IdentityRule {
            column: self.unsafe_id.to_string(),
            new_name: Some(self.new_id.to_string()),
        }
    }
}

impl SanitizerRules {
    pub fn to_sanitizers(&self) -> Vec<Sanitizer> {
        let identities = self.identity.iter().map(|rule| {
            Sanitizer::Identity(IdentitySanitizer::new(
                UnsanitizedColumnId::new(rule.column.clone()),
                SanitizedColumnId::new(rule.new_name.clone().unwrap_or_else(|| rule.column.clone())),
            ))
        });
        let omits = self.omit.iter().map(|column| {
            Sanitizer::Omit(OmitSanitizer {
                unsafe_id: UnsanitizedColumnId::new(column.clone()),
            })
        });
        identities.chain(omits).collect()
    }
}

/// Directory-backed sanitizer storage
#[derive(Debug, Clone)]
pub struct SanitizerStore {
    root: PathBuf,
}

impl SanitizerStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn instrument_dir(&self, instrument: &str) -> PathBuf {
        self.root.join(instrument)
    }

    pub fn lookup_path(&self, instrument: &str, name: &str) -> PathBuf {
        self.instrument_dir(instrument).join(format!("{}.csv", name))
    }

    /// Instruments that have a sanitizer directory
    pub fn instruments(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(|s| s.to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Names (file stems) of an instrument's lookup sanitizers
    pub fn list(&self, instrument: &str) -> Result<Vec<String>> {
        let dir = self.instrument_dir(instrument);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("csv"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn load_lookup(&self, instrument: &str, name: &str) -> Result<LookupSanitizer> {
        let path = self.lookup_path(instrument, name);
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "sanitizer '{}' for instrument '{}'",
                name, instrument
            )));
        }
        let text = fs::read_to_string(&path)?;
        LookupSanitizer::from_csv_str(name, &text)
    }

    pub fn save_lookup(&self, instrument: &str, sanitizer: &LookupSanitizer) -> Result<()> {
        fs::create_dir_all(self.instrument_dir(instrument))?;
        let path = self.lookup_path(instrument, sanitizer.name());
        fs::write(&path, sanitizer.to_csv_string()?)?;
        log::info!("Sanitizer written to: {}", path.display());
        Ok(())
    }

    pub fn load_rules(&self, instrument: &str) -> Result<SanitizerRules> {
        let path = self.instrument_dir(instrument).join(SANITIZER_RULES_FILE);
        if !path.exists() {
            return Ok(SanitizerRules::default());
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn save_rules(&self, instrument: &str, rules: &SanitizerRules) -> Result<()> {
        fs::create_dir_all(self.instrument_dir(instrument))?;
        let path = self.instrument_dir(instrument).join(SANITIZER_RULES_FILE);
        fs::write(&path, serde_yaml::to_string(rules)?)?;
        Ok(())
    }

    /// Every sanitizer of an instrument; an instrument without a directory
    /// gets an empty set
    pub fn load_table_sanitizer(&self, instrument: &str) -> Result<TableSanitizer> {
        let mut sanitizers = Vec::new();
        for name in self.list(instrument)? {
            sanitizers.push(Sanitizer::Lookup(self.load_lookup(instrument, &name)?));
        }
        sanitizers.extend(self.load_rules(instrument)?.to_sanitizers());

        log::debug!(
            "Loaded {} sanitizers for instrument '{}'",
            sanitizers.len(),
            instrument
        );
        TableSanitizer::new(sanitizers)
    }
}
