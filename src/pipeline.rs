//! The two pipeline stages: sanitize stored sources, then link them into
//! the study database.

use std::fs;
use std::path::PathBuf;

use crate::blob::Blob;
use crate::error::Error;
use crate::link::{link_tabledata, link_tableinfo};
use crate::report::TableErrorReport;
use crate::sanitize::sanitize_table;
use crate::sanitized::SanitizedRepo;
use crate::sanitizer::store::SanitizerStore;
use crate::spec::load_study;
use crate::study::{LinkedRepo, StudyRepo};
use crate::types::{Result, Settings};
use crate::unsanitized::UnsanitizedTable;

/// Names of the stored source blobs, sorted
pub fn list_sources(settings: &Settings) -> Result<Vec<String>> {
    if !settings.source_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(&settings.source_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".tar.gz"))
                .map(|n| n.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

pub fn add_source(settings: &Settings, name: &str, blob: &Blob) -> Result<PathBuf> {
    let path = settings.source_path(name);
    blob.write_tar_gz(&path)?;
    Ok(path)
}

pub fn remove_source(settings: &Settings, name: &str) -> Result<()> {
    let path = settings.source_path(name);
    if !path.exists() {
        return Err(Error::NotFound(format!("source '{}'", name)));
    }
    fs::remove_file(&path)?;
    log::info!("Removed source '{}'", name);
    Ok(())
}

pub fn load_source(settings: &Settings, name: &str) -> Result<UnsanitizedTable> {
    Blob::read_tar_gz(&settings.source_path(name))?.to_unsanitized(name)
}

/// Sanitize the named sources (all of them when `names` is empty) into
/// the sanitized database
pub fn sanitize_sources(settings: &Settings, names: &[String]) -> Result<TableErrorReport> {
    let names = if names.is_empty() {
        list_sources(settings)?
    } else {
        names.to_vec()
    };

    let store = SanitizerStore::new(&settings.sanitizer_dir);
    let mut repo = SanitizedRepo::open(&settings.sanitized_db)?;
    let mut report = TableErrorReport::new();

    for name in &names {
        let table = load_source(settings, name)?;
        let sanitizer = store.load_table_sanitizer(name)?;
        let sanitized = sanitize_table(&table, &sanitizer);
        report.merge(repo.write_table(&sanitized)?);
    }

    log::info!(
        "Sanitized {} sources with {} reported errors",
        names.len(),
        report.len()
    );
    Ok(report)
}

/// Rebuild the linked database from the study spec and every sanitized
/// table that has a matching instrument
pub fn link_study(settings: &Settings) -> Result<TableErrorReport> {
    let study = load_study(&settings.study_dir)?;
    let study_repo = StudyRepo::build(&study)?;
    let mut linked = LinkedRepo::create(&settings.linked_db, &study_repo)?;
    let sanitized = SanitizedRepo::open(&settings.sanitized_db)?;
    let available = sanitized.list_tables()?;

    let mut report = TableErrorReport::new();
    for instrument in &study_repo.instruments {
        if !available.contains(&instrument.name) {
            log::warn!("No sanitized table for instrument '{}'", instrument.name);
            continue;
        }
        let spec = study_repo.instrument_linker_spec(&instrument.name)?;
        let table = sanitized.read_table(&instrument.name)?;
        let linker = link_tableinfo(&table.info, &spec);
        let data = link_tabledata(&table.data, &linker);
        report.merge(linked.write_linked(&data)?);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::blob::{CSV_DATA_MEMBER, JSON_DATA_MEMBER, SCHEMA_MEMBER};
    use crate::sanitized::SanitizedColumnType;
    use crate::sanitizer::store::{IdentityRule, SanitizerRules};
    use crate::sanitizer::LookupSanitizer;
    use crate::spec::load::tests::write_study;
    use crate::table::{LinkedColumnId, SanitizedColumnId, UnsanitizedColumnId};
    use crate::unsanitized::SourceType;
    use crate::value::{ErrorKind, TableValue, Value};
    use tempfile::tempdir;

    const WAVE_CSV: &str = "wave,q1,pick,(email)\nW1,NEVER,L1,a@example.org\nW2,UNKNOWN,,b@example.org\n";

    const WAVE_SCHEMA: &str = r#"{"result": {"title": "Wave survey", "properties": {"values": {"properties": {
        "recordedDate": {"type": "string", "dataType": "metadata", "description": "Recorded Date"},
        "QID1": {"type": "string", "dataType": "question", "exportTag": "wave", "description": "Wave"},
        "QID2": {"type": "number", "dataType": "question", "exportTag": "q1", "description": "How often?",
                 "oneOf": [{"label": "NEVER", "const": 1}, {"label": "OFTEN", "const": 3}]},
        "QID3": {"type": "array", "dataType": "question", "exportTag": "pick", "description": "Pick any",
                 "items": {"type": "number", "oneOf": [{"label": "L1", "const": 1}, {"label": "L2", "const": 2}]}}
    }}}}}"#;

    const WAVE_RESPONSES: &str = r#"{"responses": [
        {"responseId": "R_1", "values": {"recordedDate": "2020-03-01", "QID1": "W1", "QID2": 1, "QID3": [1, 2]}}
    ]}"#;

    fn qualtrics_blob(name: &str) -> Blob {
        let mut files = BTreeMap::new();
        files.insert(SCHEMA_MEMBER.to_string(), WAVE_SCHEMA.as_bytes().to_vec());
        files.insert(JSON_DATA_MEMBER.to_string(), WAVE_RESPONSES.as_bytes().to_vec());
        Blob::new(SourceType::Qualtrics, name, files).unwrap()
    }

    fn csv_blob(name: &str, text: &str) -> Blob {
        let mut files = BTreeMap::new();
        files.insert(CSV_DATA_MEMBER.to_string(), text.as_bytes().to_vec());
        Blob::new(SourceType::Csv, name, files).unwrap()
    }

    #[test]
    fn test_source_management() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_root(dir.path());
        assert!(list_sources(&settings).unwrap().is_empty());

        add_source(&settings, "wave_survey", &csv_blob("wave_survey", WAVE_CSV)).unwrap();
        assert_eq!(list_sources(&settings).unwrap(), vec!["wave_survey".to_string()]);
        assert_eq!(load_source(&settings, "wave_survey").unwrap().data.len(), 2);

        remove_source(&settings, "wave_survey").unwrap();
        assert!(matches!(
            remove_source(&settings, "wave_survey"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_sanitize_and_link() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_root(dir.path());
        write_study(&settings.study_dir);
        add_source(&settings, "wave_survey", &csv_blob("wave_survey", WAVE_CSV)).unwrap();

        let table = load_source(&settings, "wave_survey").unwrap();
        let lookup = LookupSanitizer::template(
            "email",
            vec![UnsanitizedColumnId::from("email")],
            vec![SanitizedColumnId::from("pid")],
            &table,
        )
        .unwrap();
        SanitizerStore::new(&settings.sanitizer_dir)
            .save_lookup("wave_survey", &lookup)
            .unwrap();

        let report = sanitize_sources(&settings, &[]).unwrap();
        assert!(report.is_empty());

        let sanitized = SanitizedRepo::open(&settings.sanitized_db).unwrap();
        let stored = sanitized.read_table("wave_survey").unwrap();
        assert!(stored.info.column(&SanitizedColumnId::from("email")).is_none());
        assert_eq!(
            stored.data.rows()[0].get(&SanitizedColumnId::from("pid")),
            TableValue::Redacted
        );
        drop(sanitized);

        let report = link_study(&settings).unwrap();
        let kinds: Vec<_> = report.entries().map(|e| (e.column_name.as_str(), e.error.kind)).collect();
        assert_eq!(kinds, vec![("freq.q1", ErrorKind::MissingCode)]);

        let linked = LinkedRepo::open(&settings.linked_db).unwrap();
        let rows = linked.read_rows("indices.wave-indices.year").unwrap();
        assert_eq!(rows.len(), 2);
        let col = |name: &str| LinkedColumnId::from(name);
        assert_eq!(rows[0].get(&col("indices.year")), TableValue::Some(Value::Int(2020)));
        assert_eq!(rows[0].get(&col("indices.wave")), TableValue::Some(Value::Int(1)));
        assert_eq!(rows[0].get(&col("freq.q1")), TableValue::Some(Value::Int(1)));
        assert_eq!(rows[0].get(&col("freq.pick")), TableValue::Multi(vec![Value::Int(1)]));
        assert_eq!(rows[1].get(&col("freq.q1")), TableValue::Omitted);
        assert_eq!(rows[1].get(&col("freq.pick")), TableValue::Omitted);
        assert!(linked.read_rows("indices.year").unwrap().is_empty());
    }

    #[test]
    fn test_qualtrics_multiselect_links_to_codes() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_root(dir.path());
        write_study(&settings.study_dir);
        add_source(&settings, "wave_survey", &qualtrics_blob("SV_wave")).unwrap();

        let identity = |column: &str| IdentityRule {
            column: column.to_string(),
            new_name: None,
        };
        SanitizerStore::new(&settings.sanitizer_dir)
            .save_rules(
                "wave_survey",
                &SanitizerRules {
                    identity: vec![identity("wave"), identity("q1"), identity("pick")],
                    omit: vec![],
                },
            )
            .unwrap();

        let report = sanitize_sources(&settings, &[]).unwrap();
        assert!(report.is_empty());

        let sanitized = SanitizedRepo::open(&settings.sanitized_db).unwrap();
        let stored = sanitized.read_table("wave_survey").unwrap();
        let pick = SanitizedColumnId::from("pick");
        assert_eq!(
            stored.info.column(&pick).unwrap().column_type,
            SanitizedColumnType::Multiselect {
                codes: vec!["L1".to_string(), "L2".to_string()]
            }
        );
        assert!(stored.info.column(&SanitizedColumnId::from("qualtrics_recordedDate")).is_none());
        assert_eq!(
            stored.data.rows()[0].get(&pick),
            TableValue::Multi(vec![Value::from("L1"), Value::from("L2")])
        );
        drop(sanitized);

        let report = link_study(&settings).unwrap();
        assert!(report.is_empty());

        let linked = LinkedRepo::open(&settings.linked_db).unwrap();
        let rows = linked.read_rows("indices.wave-indices.year").unwrap();
        assert_eq!(rows.len(), 1);
        let col = |name: &str| LinkedColumnId::from(name);
        assert_eq!(rows[0].get(&col("indices.wave")), TableValue::Some(Value::Int(1)));
        assert_eq!(rows[0].get(&col("freq.q1")), TableValue::Some(Value::Int(1)));
        assert_eq!(
            rows[0].get(&col("freq.pick")),
            TableValue::Multi(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_source_without_safe_columns() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_root(dir.path());
        add_source(&settings, "contacts", &csv_blob("contacts", "(name),(email)\nAda,a@x\nBo,b@y\n")).unwrap();
        add_source(&settings, "wave_survey", &csv_blob("wave_survey", WAVE_CSV)).unwrap();

        let report = sanitize_sources(&settings, &[]).unwrap();
        assert!(report.is_empty());

        let sanitized = SanitizedRepo::open(&settings.sanitized_db).unwrap();
        assert_eq!(
            sanitized.list_tables().unwrap(),
            vec!["contacts".to_string(), "wave_survey".to_string()]
        );
        let contacts = sanitized.read_table("contacts").unwrap();
        assert!(contacts.info.columns.is_empty());
        assert_eq!(contacts.data.len(), 2);
    }
}
