//! Declarative study specification: indices, measures and instruments.
//!
//! A study directory holds `config.yaml`, `measures/*.yaml` and
//! `instruments/*.yaml`; names are file stems.

pub mod load;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;
use crate::types::Result;
use crate::value::Value;

pub use load::load_study;

/// One coded answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMapEntry {
    pub value: i64,
    pub tag: String,
    #[serde(default)]
    pub text: String,
}

/// Ordered `{value, tag, text}` triples, each field unique within the map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeMap {
    entries: Vec<CodeMapEntry>,
}

impl CodeMap {
    /// Build and validate a codemap; `name` is used in errors
    pub fn new(name: &str, entries: Vec<CodeMapEntry>) -> Result<Self> {
        let codemap = Self { entries };
        codemap.validate(name)?;
        Ok(codemap)
    }

    /// Number inline `{tag, text}` items from 1
    pub fn numbered(name: &str, items: &[MultiselectItem]) -> Result<Self> {
        let entries = items
            .iter()
            .enumerate()
            .map(|(idx, item)| CodeMapEntry {
                value: idx as i64 + 1,
                tag: item.tag.clone(),
                text: item.text.clone(),
            })
            .collect();
        Self::new(name, entries)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let mut values = HashSet::new();
        let mut tags = HashSet::new();
        let mut texts = HashSet::new();
        for entry in &self.entries {
            let field = if !values.insert(entry.value) {
                Some("value")
            } else if !tags.insert(entry.tag.as_str()) {
                Some("tag")
            } else if !entry.text.is_empty() && !texts.insert(entry.text.as_str()) {
                Some("text")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(Error::InvalidCodeMap {
                    name: name.to_string(),
                    message: format!("duplicate {} in entry '{}'", field, entry.tag),
                });
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[CodeMapEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `tag -> value` lookup used by coded links
    pub fn tag_to_value(&self) -> HashMap<Value, Value> {
        self.entries
            .iter()
            .map(|e| (Value::Str(e.tag.clone()), Value::Int(e.value)))
            .collect()
    }
}

/// Inline multiselect option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiselectItem {
    pub tag: String,
    #[serde(default)]
    pub text: String,
}

/// A node of a measure tree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeasureNode {
    Group {
        id: String,
        #[serde(default)]
        prompt: String,
        items: Vec<MeasureNode>,
    },
    Ordinal {
        id: String,
        prompt: String,
        /// Measure-local codemap name
        codes: String,
    },
    Categorical {
        id: String,
        prompt: String,
        codes: String,
    },
    Multiselect {
        id: String,
        prompt: String,
        #[serde(default)]
        codes: Option<String>,
        #[serde(default)]
        items: Vec<MultiselectItem>,
    },
    Text {
        id: String,
        prompt: String,
    },
    Real {
        id: String,
        prompt: String,
    },
    Integer {
        id: String,
        prompt: String,
    },
}

impl MeasureNode {
    pub fn id(&self) -> &str {
        match self {
            MeasureNode::Group { id, .. }
            | MeasureNode::Ordinal { id, .. }
            | MeasureNode::Categorical { id, .. }
            | MeasureNode::Multiselect { id, .. }
            | MeasureNode::Text { id, .. }
            | MeasureNode::Real { id, .. }
            | MeasureNode::Integer { id, .. } => id,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            MeasureNode::Group { prompt, .. }
            | MeasureNode::Ordinal { prompt, .. }
            | MeasureNode::Categorical { prompt, .. }
            | MeasureNode::Multiselect { prompt, .. }
            | MeasureNode::Text { prompt, .. }
            | MeasureNode::Real { prompt, .. }
            | MeasureNode::Integer { prompt, .. } => prompt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measure {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub codes: BTreeMap<String, CodeMap>,
    pub items: Vec<MeasureNode>,
}

/// A study-level index column, addressed as `indices.<name>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexColumn {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub values: CodeMap,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indices: BTreeMap<String, IndexColumn>,
}

/// A node of an instrument tree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentNode {
    Group {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        prompt: String,
        items: Vec<InstrumentNode>,
    },
    Question {
        /// Sanitized column the answers come from
        #[serde(default)]
        remote_id: Option<String>,
        /// Column entry (measure or index path) the answers go to
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        prompt: String,
        /// Source value remap applied before the destination step
        #[serde(default, deserialize_with = "scalar_map")]
        map: Option<BTreeMap<String, String>>,
    },
    Constant {
        id: String,
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instrument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub items: Vec<InstrumentNode>,
}

/// A parsed study
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Study {
    pub config: Config,
    pub measures: BTreeMap<String, Measure>,
    pub instruments: BTreeMap<String, Instrument>,
}

fn yaml_scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accept any YAML scalar as text
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    yaml_scalar_text(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a scalar value"))
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_yaml::Mapping> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(map) => map
            .iter()
            .map(|(k, v)| match (yaml_scalar_text(k), yaml_scalar_text(v)) {
                (Some(k), Some(v)) => Ok((k, v)),
                _ => Err(serde::de::Error::custom("map entries must be scalars")),
            })
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map(Some),
    }
}
