//! Sanitizers: rules that decide how unsafe source columns reach the
//! sanitized store.
//!
//! A [`LookupSanitizer`] replaces a tuple of unsafe cells with a curated
//! tuple of sanitized cells, keyed by the row hash of the unsafe tuple.
//! [`IdentitySanitizer`] blesses one column as-is and [`OmitSanitizer`]
//! drops one.

pub mod store;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::table::{RowHash, SanitizedColumnId, TableRowView, UnsanitizedColumnId};
use crate::types::{sha256_hex, Result};
use crate::unsanitized::UnsanitizedTable;
use crate::value::{ErrorKind, TableValue};

pub use store::{SanitizerRules, SanitizerStore};

/// One curated row of a lookup sanitizer
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizerEntry {
    pub key: TableRowView<UnsanitizedColumnId>,
    pub value: TableRowView<SanitizedColumnId>,
}

/// Row-hash keyed replacement table
#[derive(Debug, Clone)]
pub struct LookupSanitizer {
    name: String,
    key_col_ids: Vec<UnsanitizedColumnId>,
    new_col_ids: Vec<SanitizedColumnId>,
    entries: Vec<SanitizerEntry>,
    map: HashMap<RowHash, usize>,
    checksum: String,
}

impl LookupSanitizer {
    /// Create an empty sanitizer
    pub fn new(
        name: &str,
        key_col_ids: Vec<UnsanitizedColumnId>,
        new_col_ids: Vec<SanitizedColumnId>,
    ) -> Result<Self> {
        if key_col_ids.is_empty() {
            return Err(Error::InvalidSanitizer(format!(
                "sanitizer '{}' has no key columns",
                name
            )));
        }
        let unique_keys: HashSet<_> = key_col_ids.iter().collect();
        let unique_new: HashSet<_> = new_col_ids.iter().collect();
        if unique_keys.len() != key_col_ids.len() || unique_new.len() != new_col_ids.len() {
            return Err(Error::InvalidSanitizer(format!(
                "sanitizer '{}' repeats a column",
                name
            )));
        }

        let mut sanitizer = Self {
            name: name.to_string(),
            key_col_ids,
            new_col_ids,
            entries: Vec::new(),
            map: HashMap::new(),
            checksum: String::new(),
        };
        sanitizer.refresh_checksum()?;
        Ok(sanitizer)
    }

    /// Start a sanitizer covering every distinct key tuple in `table`.
    ///
    /// Outputs start out redacted until a curator fills them in.
    pub fn template(
        name: &str,
        key_col_ids: Vec<UnsanitizedColumnId>,
        new_col_ids: Vec<SanitizedColumnId>,
        table: &UnsanitizedTable,
    ) -> Result<Self> {
        let mut sanitizer = Self::new(name, key_col_ids, new_col_ids)?;
        sanitizer.extend_from_table(table)?;
        Ok(sanitizer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_col_ids(&self) -> &[UnsanitizedColumnId] {
        &self.key_col_ids
    }

    pub fn new_col_ids(&self) -> &[SanitizedColumnId] {
        &self.new_col_ids
    }

    pub fn entries(&self) -> &[SanitizerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 identifying the sanitizer content
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub(crate) fn set_checksum(&mut self, checksum: String) {
        self.checksum = checksum;
    }

    fn refresh_checksum(&mut self) -> Result<()> {
        let csv = self.to_csv_string()?;
        self.checksum = sha256_hex(csv.as_bytes());
        Ok(())
    }

    /// Add or replace a curated row
    pub fn insert(
        &mut self,
        key: TableRowView<UnsanitizedColumnId>,
        value: TableRowView<SanitizedColumnId>,
    ) -> Result<()> {
        let line = self.entries.len() + 2;
        self.insert_at(key, value, line)?;
        self.refresh_checksum()
    }

    /// Insert without refreshing the checksum; `line` is used in errors
    pub(crate) fn insert_at(
        &mut self,
        key: TableRowView<UnsanitizedColumnId>,
        value: TableRowView<SanitizedColumnId>,
        line: usize,
    ) -> Result<()> {
        if key.column_ids() != sorted(&self.key_col_ids) {
            return Err(Error::InvalidSanitizer(format!(
                "sanitizer '{}' line {}: key columns do not match",
                self.name, line
            )));
        }
        if value.column_ids() != sorted(&self.new_col_ids) {
            return Err(Error::InvalidSanitizer(format!(
                "sanitizer '{}' line {}: output columns do not match",
                self.name, line
            )));
        }
        if key.iter().all(|(_, v)| *v == TableValue::Omitted) {
            return Err(Error::EmptySanitizerKey {
                sanitizer: self.name.clone(),
                line,
            });
        }

        let hash = key.hash().map_err(|e| {
            Error::InvalidSanitizer(format!(
                "sanitizer '{}' line {}: unhashable key ({})",
                self.name, line, e
            ))
        })?;

        match self.map.get(&hash) {
            Some(&idx) => {
                log::warn!(
                    "Sanitizer '{}' line {} repeats an earlier key; the later row wins",
                    self.name,
                    line
                );
                self.entries[idx] = SanitizerEntry { key, value };
            }
            None => {
                self.map.insert(hash, self.entries.len());
                self.entries.push(SanitizerEntry { key, value });
            }
        }
        Ok(())
    }

    /// Curated output for a key row, if any
    pub fn get(&self, key: &TableRowView<UnsanitizedColumnId>) -> Option<&TableRowView<SanitizedColumnId>> {
        let hash = key.hash().ok()?;
        self.map.get(&hash).map(|&idx| &self.entries[idx].value)
    }

    /// Output produced when a key row is not covered
    pub fn miss_row(&self) -> TableRowView<SanitizedColumnId> {
        self.fill_row(TableValue::error(
            ErrorKind::LookupSanitizerMiss,
            format!("no entry in sanitizer '{}'", self.name),
        ))
    }

    fn fill_row(&self, value: TableValue) -> TableRowView<SanitizedColumnId> {
        self.new_col_ids
            .iter()
            .map(|id| (id.clone(), value.clone()))
            .collect()
    }

    /// Sanitize one source row; the result always has exactly `new_col_ids`
    pub fn sanitize_row(
        &self,
        row: &TableRowView<UnsanitizedColumnId>,
    ) -> TableRowView<SanitizedColumnId> {
        let key = row.subset(&self.key_col_ids);
        match key.hash() {
            Ok(hash) => match self.map.get(&hash) {
                Some(&idx) => self.entries[idx].value.clone(),
                None => self.miss_row(),
            },
            Err(err) => self.fill_row(TableValue::Error(err)),
        }
    }

    /// Append redacted entries for key tuples in `table` not yet covered.
    ///
    /// Returns the number of entries added.
    pub fn extend_from_table(&mut self, table: &UnsanitizedTable) -> Result<usize> {
        for id in &self.key_col_ids {
            if table.column(id).is_none() {
                return Err(Error::InvalidSanitizer(format!(
                    "sanitizer '{}' key column '{}' not in table '{}'",
                    self.name, id, table.name
                )));
            }
        }

        let mut added = 0;
        for row in table.data.rows() {
            let key = row.subset(&self.key_col_ids);
            if key.iter().all(|(_, v)| *v == TableValue::Omitted) {
                continue;
            }
            let hash = match key.hash() {
                Ok(hash) => hash,
                Err(_) => continue,
            };
            if self.map.contains_key(&hash) {
                continue;
            }
            let value = self.fill_row(TableValue::Redacted);
            self.map.insert(hash, self.entries.len());
            self.entries.push(SanitizerEntry { key, value });
            added += 1;
        }

        self.refresh_checksum()?;
        log::info!(
            "Sanitizer '{}': {} new key rows from '{}'",
            self.name,
            added,
            table.name
        );
        Ok(added)
    }
}

fn sorted<K: Clone + Ord>(ids: &[K]) -> Vec<K> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids
}

/// Passes one unsafe column through unchanged under a sanitized id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySanitizer {
    pub unsafe_id: UnsanitizedColumnId,
    pub new_id: SanitizedColumnId,
}

impl IdentitySanitizer {
    pub fn new(unsafe_id: UnsanitizedColumnId, new_id: SanitizedColumnId) -> Self {
        Self { unsafe_id, new_id }
    }

    /// SHA-256 of the rule's canonical `rules.yaml` entry
    pub fn checksum(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.to_rule())?;
        Ok(sha256_hex(yaml.as_bytes()))
    }
}

/// Drops one column from the sanitized output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmitSanitizer {
    pub unsafe_id: UnsanitizedColumnId,
}

#[derive(Debug, Clone)]
pub enum Sanitizer {
    Lookup(LookupSanitizer),
    Identity(IdentitySanitizer),
    Omit(OmitSanitizer),
}

impl Sanitizer {
    /// Source columns this sanitizer consumes
    pub fn key_col_ids(&self) -> Vec<UnsanitizedColumnId> {
        match self {
            Sanitizer::Lookup(s) => s.key_col_ids().to_vec(),
            Sanitizer::Identity(s) => vec![s.unsafe_id.clone()],
            Sanitizer::Omit(s) => vec![s.unsafe_id.clone()],
        }
    }

    /// Sanitized columns this sanitizer produces
    pub fn new_col_ids(&self) -> Vec<SanitizedColumnId> {
        match self {
            Sanitizer::Lookup(s) => s.new_col_ids().to_vec(),
            Sanitizer::Identity(s) => vec![s.new_id.clone()],
            Sanitizer::Omit(_) => Vec::new(),
        }
    }
}

/// All sanitizers applied to one instrument's table
#[derive(Debug, Clone, Default)]
pub struct TableSanitizer {
    sanitizers: Vec<Sanitizer>,
}

impl TableSanitizer {
    /// Bundle sanitizers, rejecting overlapping claims
    pub fn new(sanitizers: Vec<Sanitizer>) -> Result<Self> {
        let mut claimed = HashSet::new();
        let mut produced = HashSet::new();

        for sanitizer in &sanitizers {
            for id in sanitizer.key_col_ids() {
                if !claimed.insert(id.clone()) {
                    return Err(Error::InvalidSanitizer(format!(
                        "column '{}' is claimed by more than one sanitizer",
                        id
                    )));
                }
            }
            for id in sanitizer.new_col_ids() {
                if !produced.insert(id.clone()) {
                    return Err(Error::InvalidSanitizer(format!(
                        "sanitized column '{}' is produced by more than one sanitizer",
                        id
                    )));
                }
            }
        }

        Ok(Self { sanitizers })
    }

    pub fn sanitizers(&self) -> &[Sanitizer] {
        &self.sanitizers
    }

    pub fn lookups(&self) -> impl Iterator<Item = &LookupSanitizer> {
        self.sanitizers.iter().filter_map(|s| match s {
            Sanitizer::Lookup(l) => Some(l),
            _ => None,
        })
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentitySanitizer> {
        self.sanitizers.iter().filter_map(|s| match s {
            Sanitizer::Identity(i) => Some(i),
            _ => None,
        })
    }

    /// Whether any sanitizer consumes the source column
    pub fn claims(&self, id: &UnsanitizedColumnId) -> bool {
        self.sanitizers.iter().any(|s| s.key_col_ids().contains(id))
    }

    /// Whether any sanitizer produces the sanitized column
    pub fn produces(&self, id: &SanitizedColumnId) -> bool {
        self.sanitizers.iter().any(|s| s.new_col_ids().contains(id))
    }

    pub fn is_omitted(&self, id: &UnsanitizedColumnId) -> bool {
        self.sanitizers
            .iter()
            .any(|s| matches!(s, Sanitizer::Omit(o) if &o.unsafe_id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn some(s: &str) -> TableValue {
        TableValue::Some(Value::from(s))
    }

    fn key(pairs: &[(&str, TableValue)]) -> TableRowView<UnsanitizedColumnId> {
        pairs
            .iter()
            .map(|(k, v)| (UnsanitizedColumnId::from(*k), v.clone()))
            .collect()
    }

    fn out(pairs: &[(&str, TableValue)]) -> TableRowView<SanitizedColumnId> {
        pairs
            .iter()
            .map(|(k, v)| (SanitizedColumnId::from(*k), v.clone()))
            .collect()
    }

    fn city_sanitizer() -> LookupSanitizer {
        let mut s = LookupSanitizer::new(
            "city",
            vec![UnsanitizedColumnId::from("city")],
            vec![SanitizedColumnId::from("region")],
        )
        .unwrap();
        s.insert(key(&[("city", some("Vancouver"))]), out(&[("region", some("West"))]))
            .unwrap();
        s
    }

    #[test]
    fn test_sanitize_row_hit_and_miss() {
        let s = city_sanitizer();

        let hit = s.sanitize_row(&key(&[("city", some("Vancouver")), ("x", some("1"))]));
        assert_eq!(hit, out(&[("region", some("West"))]));

        let miss = s.sanitize_row(&key(&[("city", some("Paris"))]));
        assert_eq!(
            miss.get(&SanitizedColumnId::from("region")).error_kind(),
            Some(ErrorKind::LookupSanitizerMiss)
        );
        assert_eq!(miss.column_ids(), vec![SanitizedColumnId::from("region")]);
    }

    #[test]
    fn test_sanitize_row_propagates_key_errors() {
        let s = city_sanitizer();
        let row = key(&[("city", TableValue::error(ErrorKind::MissingCode, "bad"))]);
        let result = s.sanitize_row(&row);
        assert_eq!(
            result.get(&SanitizedColumnId::from("region")).error_kind(),
            Some(ErrorKind::MissingCode)
        );
    }

    #[test]
    fn test_missing_key_column_yields_column_not_found() {
        let s = city_sanitizer();
        let result = s.sanitize_row(&key(&[("other", some("1"))]));
        assert_eq!(
            result.get(&SanitizedColumnId::from("region")).error_kind(),
            Some(ErrorKind::ColumnNotFoundInRow)
        );
    }

    #[test]
    fn test_insert_rejects_empty_key() {
        let mut s = city_sanitizer();
        let result = s.insert(key(&[("city", TableValue::Omitted)]), out(&[("region", some("x"))]));
        assert!(matches!(result, Err(Error::EmptySanitizerKey { .. })));
    }

    #[test]
    fn test_insert_rejects_wrong_width() {
        let mut s = city_sanitizer();
        let result = s.insert(
            key(&[("city", some("Calgary"))]),
            out(&[("region", some("x")), ("extra", some("y"))]),
        );
        assert!(matches!(result, Err(Error::InvalidSanitizer(_))));
    }

    #[test]
    fn test_insert_duplicate_key_replaces() {
        let mut s = city_sanitizer();
        let checksum = s.checksum().to_string();
        s.insert(key(&[("city", some("Vancouver"))]), out(&[("region", some("Coast"))]))
            .unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(
            s.get(&key(&[("city", some("Vancouver"))])),
            Some(&out(&[("region", some("Coast"))]))
        );
        assert_ne!(s.checksum(), checksum);
    }

    #[test]
    fn test_table_sanitizer_rejects_double_claims() {
        let lookup = city_sanitizer();
        let identity = IdentitySanitizer::new(
            UnsanitizedColumnId::from("city"),
            SanitizedColumnId::from("city"),
        );
        let result = TableSanitizer::new(vec![Sanitizer::Lookup(lookup), Sanitizer::Identity(identity)]);
        assert!(matches!(result, Err(Error::InvalidSanitizer(_))));
    }

    #[test]
    fn test_table_sanitizer_rejects_duplicate_outputs() {
        let lookup = city_sanitizer();
        let identity = IdentitySanitizer::new(
            UnsanitizedColumnId::from("zone"),
            SanitizedColumnId::from("region"),
        );
        let result = TableSanitizer::new(vec![Sanitizer::Lookup(lookup), Sanitizer::Identity(identity)]);
        assert!(matches!(result, Err(Error::InvalidSanitizer(_))));
    }

    #[test]
    fn test_table_sanitizer_claims() {
        let table_sanitizer = TableSanitizer::new(vec![
            Sanitizer::Lookup(city_sanitizer()),
            Sanitizer::Omit(OmitSanitizer {
                unsafe_id: UnsanitizedColumnId::from("ip"),
            }),
        ])
        .unwrap();

        assert!(table_sanitizer.claims(&UnsanitizedColumnId::from("city")));
        assert!(table_sanitizer.is_omitted(&UnsanitizedColumnId::from("ip")));
        assert!(table_sanitizer.produces(&SanitizedColumnId::from("region")));
        assert!(!table_sanitizer.claims(&UnsanitizedColumnId::from("age")));
        assert_eq!(table_sanitizer.lookups().count(), 1);
    }
}
