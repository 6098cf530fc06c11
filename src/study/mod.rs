//! The study repository: a flattened, id-addressed view of a [`Study`].
//!
//! Entries live in arenas with 1-based ids assigned in insertion order.
//! Trees are expressed through parent ids; there are no back-pointers.

pub mod db;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::link::{DstLink, InstrumentLinkerSpec, LinkerSpec, SrcLink};
use crate::spec::{CodeMap, InstrumentNode, MeasureNode, Study};
use crate::table::{LinkedColumnId, SanitizedColumnId};
use crate::types::Result;
use crate::value::Value;

pub use db::LinkedRepo;

/// Prefix of index column names
pub const INDEX_PREFIX: &str = "indices";

/// Kind of a column entry; for leaves this is also the datatable value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Index,
    Group,
    Ordinal,
    Categorical,
    Multiselect,
    Bool,
    Text,
    Real,
    Integer,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Index => "index",
            ColumnType::Group => "group",
            ColumnType::Ordinal => "ordinal",
            ColumnType::Categorical => "categorical",
            ColumnType::Multiselect => "multiselect",
            ColumnType::Bool => "bool",
            ColumnType::Text => "text",
            ColumnType::Real => "real",
            ColumnType::Integer => "integer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "index" => Some(ColumnType::Index),
            "group" => Some(ColumnType::Group),
            "ordinal" => Some(ColumnType::Ordinal),
            "categorical" => Some(ColumnType::Categorical),
            "multiselect" => Some(ColumnType::Multiselect),
            "bool" => Some(ColumnType::Bool),
            "text" => Some(ColumnType::Text),
            "real" => Some(ColumnType::Real),
            "integer" => Some(ColumnType::Integer),
            _ => None,
        }
    }

    /// Declared SQL type of a datatable column
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Index
            | ColumnType::Ordinal
            | ColumnType::Categorical
            | ColumnType::Integer
            | ColumnType::Bool => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Group => "TEXT",
            ColumnType::Multiselect => "JSON",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodemapEntry {
    pub id: i64,
    /// Qualified name, `<measure>.<rel>` or `indices.<name>`
    pub name: String,
    pub values: CodeMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureEntry {
    pub id: i64,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEntry {
    pub id: i64,
    pub name: String,
    pub column_type: ColumnType,
    pub prompt: String,
    pub codemap_id: Option<i64>,
    pub parent_column_id: Option<i64>,
    pub parent_measure_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentNodeKind {
    Group,
    Question,
    Constant,
}

impl InstrumentNodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentNodeKind::Group => "group",
            InstrumentNodeKind::Question => "question",
            InstrumentNodeKind::Constant => "constant",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "group" => Some(InstrumentNodeKind::Group),
            "question" => Some(InstrumentNodeKind::Question),
            "constant" => Some(InstrumentNodeKind::Constant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentNodeEntry {
    pub id: i64,
    pub instrument_id: i64,
    pub parent_node_id: Option<i64>,
    /// Depth-first position within the instrument
    pub sortkey: i64,
    pub kind: InstrumentNodeKind,
    pub prompt: String,
    pub remote_id: Option<String>,
    pub source_value_map: Option<BTreeMap<String, String>>,
    /// Constant value
    pub value: Option<String>,
    pub column_entry_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentEntry {
    pub id: i64,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub studytable_id: i64,
}

/// Columns shared by instruments with the same set of index columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyTable {
    pub id: i64,
    pub name: String,
    /// Index columns first (by name), then other columns by first use
    pub column_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyRepo {
    pub codemaps: Vec<CodemapEntry>,
    pub measures: Vec<MeasureEntry>,
    pub columns: Vec<ColumnEntry>,
    pub instruments: Vec<InstrumentEntry>,
    pub nodes: Vec<InstrumentNodeEntry>,
    pub studytables: Vec<StudyTable>,
}

impl StudyRepo {
    /// Flatten a parsed study, resolving every reference
    pub fn build(study: &Study) -> Result<Self> {
        let mut builder = Builder::default();

        for (measure_name, measure) in &study.measures {
            for (rel, codemap) in &measure.codes {
                builder.add_codemap(&format!("{}.{}", measure_name, rel), codemap.clone())?;
            }
        }
        for (name, index) in &study.config.indices {
            builder.add_codemap(&format!("{}.{}", INDEX_PREFIX, name), index.values.clone())?;
        }

        for (name, index) in &study.config.indices {
            let qualified = format!("{}.{}", INDEX_PREFIX, name);
            let codemap_id = builder.codemap_ids.get(&qualified).copied();
            builder.add_column(
                "config",
                ColumnEntry {
                    id: 0,
                    name: qualified,
                    column_type: ColumnType::Index,
                    prompt: index.title.clone(),
                    codemap_id,
                    parent_column_id: None,
                    parent_measure_id: None,
                },
            )?;
        }

        for (measure_name, measure) in &study.measures {
            let measure_id = builder.repo.measures.len() as i64 + 1;
            builder.repo.measures.push(MeasureEntry {
                id: measure_id,
                name: measure_name.clone(),
                title: measure.title.clone(),
                description: measure.description.clone(),
            });
            for node in &measure.items {
                builder.add_measure_node(measure_name, measure_id, None, measure_name, node)?;
            }
        }

        for (instrument_name, instrument) in &study.instruments {
            let instrument_id = builder.repo.instruments.len() as i64 + 1;
            builder.repo.instruments.push(InstrumentEntry {
                id: instrument_id,
                name: instrument_name.clone(),
                title: instrument.title.clone(),
                description: instrument.description.clone(),
                studytable_id: 0,
            });
            let mut walk = InstrumentWalk {
                name: instrument_name,
                id: instrument_id,
                sortkey: 0,
                referenced: Vec::new(),
            };
            for node in &instrument.items {
                builder.add_instrument_node(&mut walk, None, node)?;
            }
            builder.references.push(walk.referenced);
        }

        builder.assign_studytables()?;

        let repo = builder.repo;
        log::info!(
            "Study repository: {} columns, {} instruments, {} studytables",
            repo.columns.len(),
            repo.instruments.len(),
            repo.studytables.len()
        );
        Ok(repo)
    }

    pub fn codemap(&self, id: i64) -> Option<&CodemapEntry> {
        self.codemaps.iter().find(|c| c.id == id)
    }

    pub fn column(&self, id: i64) -> Option<&ColumnEntry> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnEntry> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn instrument_by_name(&self, name: &str) -> Option<&InstrumentEntry> {
        self.instruments.iter().find(|i| i.name == name)
    }

    pub fn studytable(&self, id: i64) -> Option<&StudyTable> {
        self.studytables.iter().find(|t| t.id == id)
    }

    pub fn studytable_by_name(&self, name: &str) -> Option<&StudyTable> {
        self.studytables.iter().find(|t| t.name == name)
    }

    /// Nodes of one instrument in depth-first order
    pub fn instrument_nodes(&self, instrument_id: i64) -> Vec<&InstrumentNodeEntry> {
        let mut nodes: Vec<_> = self
            .nodes
            .iter()
            .filter(|n| n.instrument_id == instrument_id)
            .collect();
        nodes.sort_by_key(|n| n.sortkey);
        nodes
    }

    /// Columns of a studytable, in table order
    pub fn studytable_columns(&self, table: &StudyTable) -> Vec<&ColumnEntry> {
        table.column_ids.iter().filter_map(|id| self.column(*id)).collect()
    }

    /// Studytable name to the names of the instruments writing into it
    pub fn studytable_partition(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut partition: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for instrument in &self.instruments {
            if let Some(table) = self.studytable(instrument.studytable_id) {
                partition
                    .entry(table.name.clone())
                    .or_default()
                    .insert(instrument.name.clone());
            }
        }
        partition
    }

    /// Derive how an instrument's sanitized columns feed its studytable
    pub fn instrument_linker_spec(&self, instrument_name: &str) -> Result<InstrumentLinkerSpec> {
        let instrument = self
            .instrument_by_name(instrument_name)
            .ok_or_else(|| Error::NotFound(format!("instrument '{}'", instrument_name)))?;
        let table = self.studytable(instrument.studytable_id).ok_or_else(|| {
            Error::NotFound(format!("studytable of instrument '{}'", instrument_name))
        })?;

        let mut linker_specs = Vec::new();
        for node in self.instrument_nodes(instrument.id) {
            let column = match node.column_entry_id.and_then(|id| self.column(id)) {
                Some(column) => column,
                None => continue,
            };

            let src = match node.kind {
                InstrumentNodeKind::Question => match &node.remote_id {
                    Some(remote_id) => SrcLink::Question {
                        source_column_name: SanitizedColumnId::new(remote_id.clone()),
                        source_value_map: node.source_value_map.as_ref().map(|map| {
                            map.iter()
                                .map(|(k, v)| (Value::Str(k.clone()), Value::Str(v.clone())))
                                .collect()
                        }),
                    },
                    None => {
                        log::debug!(
                            "Instrument '{}': question for '{}' has no remote id",
                            instrument_name,
                            column.name
                        );
                        continue;
                    }
                },
                InstrumentNodeKind::Constant => SrcLink::Constant {
                    value: Value::Str(node.value.clone().unwrap_or_default()),
                },
                InstrumentNodeKind::Group => continue,
            };

            let name = LinkedColumnId::new(column.name.clone());
            let dst = match column.codemap_id.and_then(|id| self.codemap(id)) {
                Some(codemap) => DstLink::Coded {
                    name,
                    value_type: column.column_type,
                    value_from_tag: codemap.values.tag_to_value(),
                },
                None => DstLink::Simple {
                    name,
                    value_type: column.column_type,
                },
            };
            linker_specs.push(LinkerSpec { src, dst });
        }

        Ok(InstrumentLinkerSpec {
            instrument_name: instrument.name.clone(),
            studytable_name: table.name.clone(),
            linker_specs,
        })
    }
}

#[derive(Default)]
struct Builder {
    repo: StudyRepo,
    codemap_ids: HashMap<String, i64>,
    column_ids: HashMap<String, i64>,
    /// Column entries referenced by each instrument, in order of reference
    references: Vec<Vec<i64>>,
}

struct InstrumentWalk<'a> {
    name: &'a str,
    id: i64,
    sortkey: i64,
    referenced: Vec<i64>,
}

impl Builder {
    fn add_codemap(&mut self, name: &str, values: CodeMap) -> Result<i64> {
        if self.codemap_ids.contains_key(name) {
            return Err(Error::InvalidCodeMap {
                name: name.to_string(),
                message: "defined more than once".to_string(),
            });
        }
        values.validate(name)?;
        let id = self.repo.codemaps.len() as i64 + 1;
        self.repo.codemaps.push(CodemapEntry {
            id,
            name: name.to_string(),
            values,
        });
        self.codemap_ids.insert(name.to_string(), id);
        Ok(id)
    }

    fn add_column(&mut self, stem: &str, mut entry: ColumnEntry) -> Result<i64> {
        if self.column_ids.contains_key(&entry.name) {
            return Err(Error::StudySpec {
                stem: stem.to_string(),
                message: format!("column '{}' is defined more than once", entry.name),
            });
        }
        let id = self.repo.columns.len() as i64 + 1;
        entry.id = id;
        self.column_ids.insert(entry.name.clone(), id);
        self.repo.columns.push(entry);
        Ok(id)
    }

    fn resolve_codemap(&self, measure_name: &str, rel: &str) -> Result<i64> {
        let qualified = format!("{}.{}", measure_name, rel);
        self.codemap_ids
            .get(&qualified)
            .copied()
            .ok_or_else(|| Error::StudySpec {
                stem: measure_name.to_string(),
                message: format!("unknown codemap '{}'", rel),
            })
    }

    fn add_measure_node(
        &mut self,
        measure_name: &str,
        measure_id: i64,
        parent_column_id: Option<i64>,
        prefix: &str,
        node: &MeasureNode,
    ) -> Result<()> {
        let name = format!("{}.{}", prefix, node.id());
        let column = |column_type, codemap_id| ColumnEntry {
            id: 0,
            name: name.clone(),
            column_type,
            prompt: node.prompt().to_string(),
            codemap_id,
            parent_column_id,
            parent_measure_id: Some(measure_id),
        };

        match node {
            MeasureNode::Group { items, .. } => {
                let group_id = self.add_column(measure_name, column(ColumnType::Group, None))?;
                for item in items {
                    self.add_measure_node(measure_name, measure_id, Some(group_id), &name, item)?;
                }
            }
            MeasureNode::Ordinal { codes, .. } => {
                let codemap_id = self.resolve_codemap(measure_name, codes)?;
                self.add_column(measure_name, column(ColumnType::Ordinal, Some(codemap_id)))?;
            }
            MeasureNode::Categorical { codes, .. } => {
                let codemap_id = self.resolve_codemap(measure_name, codes)?;
                self.add_column(measure_name, column(ColumnType::Categorical, Some(codemap_id)))?;
            }
            MeasureNode::Multiselect { codes, items, .. } => {
                let codemap_id = match codes {
                    Some(rel) => self.resolve_codemap(measure_name, rel)?,
                    None if !items.is_empty() => {
                        self.add_codemap(&name, CodeMap::numbered(&name, items)?)?
                    }
                    None => {
                        return Err(Error::StudySpec {
                            stem: measure_name.to_string(),
                            message: format!("multiselect '{}' has neither codes nor items", name),
                        })
                    }
                };
                let entry = column(ColumnType::Multiselect, Some(codemap_id));
                let multiselect_id = self.add_column(measure_name, entry)?;

                let options: Vec<(String, String)> = self
                    .repo
                    .codemap(codemap_id)
                    .map(|c| {
                        c.values
                            .entries()
                            .iter()
                            .map(|e| (e.tag.clone(), e.text.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                for (tag, text) in options {
                    self.add_column(
                        measure_name,
                        ColumnEntry {
                            id: 0,
                            name: format!("{}.{}", name, tag),
                            column_type: ColumnType::Bool,
                            prompt: text,
                            codemap_id: None,
                            parent_column_id: Some(multiselect_id),
                            parent_measure_id: Some(measure_id),
                        },
                    )?;
                }
            }
            MeasureNode::Text { .. } => {
                self.add_column(measure_name, column(ColumnType::Text, None))?;
            }
            MeasureNode::Real { .. } => {
                self.add_column(measure_name, column(ColumnType::Real, None))?;
            }
            MeasureNode::Integer { .. } => {
                self.add_column(measure_name, column(ColumnType::Integer, None))?;
            }
        }
        Ok(())
    }

    fn resolve_leaf(&self, walk: &mut InstrumentWalk<'_>, id: &str) -> Result<i64> {
        let column_id = *self.column_ids.get(id).ok_or_else(|| Error::UnresolvedColumn {
            instrument: walk.name.to_string(),
            id: id.to_string(),
        })?;
        if let Some(column) = self.repo.column(column_id) {
            if column.column_type == ColumnType::Group {
                return Err(Error::StudySpec {
                    stem: walk.name.to_string(),
                    message: format!("'{}' is a group and cannot hold values", id),
                });
            }
        }
        if walk.referenced.contains(&column_id) {
            return Err(Error::StudySpec {
                stem: walk.name.to_string(),
                message: format!("column '{}' is written more than once", id),
            });
        }
        walk.referenced.push(column_id);
        Ok(column_id)
    }

    fn add_instrument_node(
        &mut self,
        walk: &mut InstrumentWalk<'_>,
        parent_node_id: Option<i64>,
        node: &InstrumentNode,
    ) -> Result<()> {
        walk.sortkey += 1;
        let id = self.repo.nodes.len() as i64 + 1;
        let mut entry = InstrumentNodeEntry {
            id,
            instrument_id: walk.id,
            parent_node_id,
            sortkey: walk.sortkey,
            kind: InstrumentNodeKind::Group,
            prompt: String::new(),
            remote_id: None,
            source_value_map: None,
            value: None,
            column_entry_id: None,
        };

        match node {
            InstrumentNode::Group { title, prompt, items } => {
                entry.prompt = title.clone().unwrap_or_else(|| prompt.clone());
                self.repo.nodes.push(entry);
                for item in items {
                    self.add_instrument_node(walk, Some(id), item)?;
                }
                return Ok(());
            }
            InstrumentNode::Question {
                remote_id,
                id: column,
                prompt,
                map,
            } => {
                entry.kind = InstrumentNodeKind::Question;
                entry.prompt = prompt.clone();
                entry.remote_id = remote_id.clone();
                entry.source_value_map = map.clone();
                if let Some(column) = column {
                    entry.column_entry_id = Some(self.resolve_leaf(walk, column)?);
                }
            }
            InstrumentNode::Constant { id: column, value } => {
                entry.kind = InstrumentNodeKind::Constant;
                entry.value = Some(value.clone());
                entry.column_entry_id = Some(self.resolve_leaf(walk, column)?);
            }
        }

        self.repo.nodes.push(entry);
        Ok(())
    }

    fn assign_studytables(&mut self) -> Result<()> {
        let mut groups: Vec<(BTreeSet<i64>, i64)> = Vec::new();

        for idx in 0..self.repo.instruments.len() {
            let referenced = self.references.get(idx).cloned().unwrap_or_default();
            let indices: BTreeSet<i64> = referenced
                .iter()
                .copied()
                .filter(|id| {
                    self.repo
                        .column(*id)
                        .map(|c| c.column_type == ColumnType::Index)
                        .unwrap_or(false)
                })
                .collect();

            let instrument_name = self.repo.instruments[idx].name.clone();
            if indices.is_empty() {
                return Err(Error::StudySpec {
                    stem: instrument_name,
                    message: "instrument references no index column".to_string(),
                });
            }

            let table_id = match groups.iter().find(|(set, _)| *set == indices) {
                Some((_, table_id)) => *table_id,
                None => {
                    let mut index_names: Vec<(String, i64)> = indices
                        .iter()
                        .filter_map(|id| self.repo.column(*id).map(|c| (c.name.clone(), *id)))
                        .collect();
                    index_names.sort();
                    let table_id = self.repo.studytables.len() as i64 + 1;
                    self.repo.studytables.push(StudyTable {
                        id: table_id,
                        name: index_names
                            .iter()
                            .map(|(name, _)| name.as_str())
                            .collect::<Vec<_>>()
                            .join("-"),
                        column_ids: index_names.iter().map(|(_, id)| *id).collect(),
                    });
                    groups.push((indices, table_id));
                    table_id
                }
            };

            let table = &mut self.repo.studytables[table_id as usize - 1];
            for id in referenced {
                if !table.column_ids.contains(&id) {
                    table.column_ids.push(id);
                }
            }
            self.repo.instruments[idx].studytable_id = table_id;

            log::debug!(
                "Instrument '{}' writes into studytable '{}'",
                instrument_name,
                table.name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::load::tests::write_study;
    use crate::spec::load_study;
    use tempfile::tempdir;

    fn build_test_repo() -> StudyRepo {
        let dir = tempdir().unwrap();
        write_study(dir.path());
        StudyRepo::build(&load_study(dir.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_codemaps_and_columns() {
        let repo = build_test_repo();

        let names: Vec<&str> = repo.codemaps.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["freq.freq", "indices.wave", "indices.year", "freq.pick"]
        );
        assert_eq!(repo.codemaps[0].id, 1);

        let year = repo.column_by_name("indices.year").unwrap();
        assert_eq!(year.column_type, ColumnType::Index);
        assert!(year.codemap_id.is_some());

        let q1 = repo.column_by_name("freq.q1").unwrap();
        assert_eq!(q1.column_type, ColumnType::Ordinal);
        assert_eq!(q1.parent_measure_id, Some(1));

        let pick = repo.column_by_name("freq.pick").unwrap();
        let option = repo.column_by_name("freq.pick.L1").unwrap();
        assert_eq!(option.column_type, ColumnType::Bool);
        assert_eq!(option.parent_column_id, Some(pick.id));
    }

    #[test]
    fn test_studytable_partitioning() {
        let repo = build_test_repo();

        let names: Vec<&str> = repo.studytables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["indices.wave-indices.year", "indices.year"]);

        let wave = repo.instrument_by_name("wave_survey").unwrap();
        let year = repo.instrument_by_name("year_survey").unwrap();
        assert_eq!(
            repo.studytable(wave.studytable_id).unwrap().name,
            "indices.wave-indices.year"
        );
        assert_eq!(repo.studytable(year.studytable_id).unwrap().name, "indices.year");

        let table = repo.studytable_by_name("indices.year").unwrap();
        let columns: Vec<&str> = repo
            .studytable_columns(table)
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(columns, vec!["indices.year", "freq.notes"]);
    }

    #[test]
    fn test_instrument_nodes_sorted() {
        let repo = build_test_repo();
        let year = repo.instrument_by_name("year_survey").unwrap();
        let nodes = repo.instrument_nodes(year.id);
        let kinds: Vec<InstrumentNodeKind> = nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InstrumentNodeKind::Constant,
                InstrumentNodeKind::Group,
                InstrumentNodeKind::Question
            ]
        );
        assert_eq!(nodes[2].parent_node_id, Some(nodes[1].id));
    }

    #[test]
    fn test_instrument_linker_spec() {
        let repo = build_test_repo();
        let spec = repo.instrument_linker_spec("wave_survey").unwrap();
        assert_eq!(spec.studytable_name, "indices.wave-indices.year");
        assert_eq!(spec.linker_specs.len(), 4);

        match &spec.linker_specs[0] {
            LinkerSpec {
                src: SrcLink::Constant { value },
                dst: DstLink::Coded { name, .. },
            } => {
                assert_eq!(value, &Value::from("2020"));
                assert_eq!(name, &LinkedColumnId::from("indices.year"));
            }
            other => panic!("unexpected linker {:?}", other),
        }
        match &spec.linker_specs[2].dst {
            DstLink::Coded { value_from_tag, value_type, .. } => {
                assert_eq!(*value_type, ColumnType::Ordinal);
                assert_eq!(value_from_tag[&Value::from("NEVER")], Value::Int(1));
            }
            other => panic!("unexpected dst {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_column() {
        let dir = tempdir().unwrap();
        write_study(dir.path());
        std::fs::write(
            dir.path().join("instruments").join("bad.yaml"),
            "items:\n  - type: question\n    remote_id: x\n    id: freq.nope\n",
        )
        .unwrap();
        let study = load_study(dir.path()).unwrap();
        assert!(matches!(
            StudyRepo::build(&study),
            Err(Error::UnresolvedColumn { id, .. }) if id == "freq.nope"
        ));
    }

    #[test]
    fn test_instrument_without_index_rejected() {
        let dir = tempdir().unwrap();
        write_study(dir.path());
        std::fs::write(
            dir.path().join("instruments").join("loose.yaml"),
            "items:\n  - type: question\n    remote_id: x\n    id: freq.q1\n",
        )
        .unwrap();
        let study = load_study(dir.path()).unwrap();
        assert!(matches!(
            StudyRepo::build(&study),
            Err(Error::StudySpec { stem, .. }) if stem == "loose"
        ));
    }
}
