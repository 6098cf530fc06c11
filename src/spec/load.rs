use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::types::Result;

use super::{Config, Instrument, Measure, Study};

const CONFIG_FILE: &str = "config.yaml";
const MEASURES_DIR: &str = "measures";
const INSTRUMENTS_DIR: &str = "instruments";

fn parse_file<T: DeserializeOwned>(path: &Path, stem: &str) -> Result<T> {
    let text = fs::read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|e| Error::StudySpec {
        stem: stem.to_string(),
        message: e.to_string(),
    })
}

/// Parse every `*.yaml` in `dir`, keyed by file stem
fn parse_dir<T: DeserializeOwned>(dir: &Path) -> Result<BTreeMap<String, T>> {
    let mut parsed = BTreeMap::new();
    if !dir.exists() {
        return Ok(parsed);
    }

    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        let value = parse_file(&path, &stem)?;
        log::debug!("Loaded {}", path.display());
        parsed.insert(stem, value);
    }
    Ok(parsed)
}

/// Load a study directory.
///
/// Parse failures name the offending file stem. Codemaps are validated
/// here so later stages can rely on their uniqueness.
pub fn load_study(dir: &Path) -> Result<Study> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Err(Error::NotFound(format!(
            "study config {}",
            config_path.display()
        )));
    }
    let config: Config = parse_file(&config_path, "config")?;
    let measures: BTreeMap<String, Measure> = parse_dir(&dir.join(MEASURES_DIR))?;
    let instruments: BTreeMap<String, Instrument> = parse_dir(&dir.join(INSTRUMENTS_DIR))?;

    for (name, index) in &config.indices {
        index.values.validate(&format!("indices.{}", name))?;
    }
    for (measure_name, measure) in &measures {
        for (rel, codemap) in &measure.codes {
            codemap.validate(&format!("{}.{}", measure_name, rel))?;
        }
    }

    log::info!(
        "Loaded study from {}: {} indices, {} measures, {} instruments",
        dir.display(),
        config.indices.len(),
        measures.len(),
        instruments.len()
    );

    Ok(Study {
        config,
        measures,
        instruments,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) const CONFIG: &str = r#"
indices:
  year:
    title: Year
    values:
      - {value: 2020, tag: "2020", text: "2020"}
      - {value: 2021, tag: "2021", text: "2021"}
  wave:
    title: Wave
    values:
      - {value: 1, tag: W1, text: Wave 1}
      - {value: 2, tag: W2, text: Wave 2}
"#;

    pub(crate) const FREQ_MEASURE: &str = r#"
title: Frequency
codes:
  freq:
    - {value: 1, tag: NEVER, text: Never}
    - {value: 2, tag: SELDOM, text: Seldom}
    - {value: 3, tag: OFTEN, text: Often}
    - {value: 4, tag: ALMOST_ALWAYS, text: Almost always}
items:
  - type: ordinal
    id: q1
    prompt: How often?
    codes: freq
  - type: multiselect
    id: pick
    prompt: Pick any
    items:
      - {tag: L1, text: First}
      - {tag: L2, text: Second}
  - type: text
    id: notes
    prompt: Notes
"#;

    pub(crate) const WAVE_INSTRUMENT: &str = r#"
title: Wave survey
items:
  - type: constant
    id: indices.year
    value: 2020
  - type: question
    remote_id: wave
    id: indices.wave
    prompt: Wave
  - type: question
    remote_id: q1
    id: freq.q1
    prompt: How often?
  - type: question
    remote_id: pick
    id: freq.pick
    prompt: Pick any
"#;

    pub(crate) const YEAR_INSTRUMENT: &str = r#"
items:
  - type: constant
    id: indices.year
    value: 2021
  - type: group
    items:
      - type: question
        remote_id: notes
        id: freq.notes
        prompt: Notes
"#;

    /// Write a small study with one measure and two instruments
    pub(crate) fn write_study(dir: &Path) {
        fs::create_dir_all(dir.join(MEASURES_DIR)).unwrap();
        fs::create_dir_all(dir.join(INSTRUMENTS_DIR)).unwrap();
        fs::write(dir.join(CONFIG_FILE), CONFIG).unwrap();
        fs::write(dir.join(MEASURES_DIR).join("freq.yaml"), FREQ_MEASURE).unwrap();
        fs::write(dir.join(INSTRUMENTS_DIR).join("wave_survey.yaml"), WAVE_INSTRUMENT).unwrap();
        fs::write(dir.join(INSTRUMENTS_DIR).join("year_survey.yaml"), YEAR_INSTRUMENT).unwrap();
    }

    #[test]
    fn test_load_study() {
        let dir = tempdir().unwrap();
        write_study(dir.path());

        let study = load_study(dir.path()).unwrap();
        assert_eq!(study.config.indices.len(), 2);
        assert_eq!(study.measures.len(), 1);
        assert_eq!(
            study.instruments.keys().cloned().collect::<Vec<_>>(),
            vec!["wave_survey".to_string(), "year_survey".to_string()]
        );
        assert_eq!(study.measures["freq"].title.as_deref(), Some("Frequency"));
    }

    #[test]
    fn test_parse_error_names_stem() {
        let dir = tempdir().unwrap();
        write_study(dir.path());
        fs::write(
            dir.path().join(MEASURES_DIR).join("broken.yaml"),
            "items: [{type: nonsense}]",
        )
        .unwrap();

        match load_study(dir.path()) {
            Err(Error::StudySpec { stem, .. }) => assert_eq!(stem, "broken"),
            other => panic!("expected StudySpec error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_codemap_rejected() {
        let dir = tempdir().unwrap();
        write_study(dir.path());
        fs::write(
            dir.path().join(MEASURES_DIR).join("dup.yaml"),
            "codes:\n  c:\n    - {value: 1, tag: A}\n    - {value: 1, tag: B}\nitems: []\n",
        )
        .unwrap();

        assert!(matches!(
            load_study(dir.path()),
            Err(Error::InvalidCodeMap { name, .. }) if name == "dup.c"
        ));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_study(dir.path()), Err(Error::NotFound(_))));
    }
}
