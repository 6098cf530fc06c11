use crate::report::TableErrorReport;
use crate::types::Result;
use std::io::Write;
use std::path::Path;

/// Write an error report to a JSON file, creating parent directories
pub fn write_json_file(report: &TableErrorReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Render an error report as a JSON string
pub fn to_json_string(report: &TableErrorReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write an error report to stdout
pub fn write_json_stdout(report: &TableErrorReport) -> Result<()> {
    let json = to_json_string(report)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{CellError, ErrorKind};

    #[test]
    fn test_json_serialization() {
        let mut report = TableErrorReport::new();
        report.add("intake", "q1", CellError::new(ErrorKind::MissingCode, "no code for 'X'"));

        let json = to_json_string(&report).unwrap();
        assert!(json.contains("\"table_name\": \"intake\""));
        assert!(json.contains("\"kind\": \"MissingCode\""));
    }

    #[test]
    fn test_write_json_file_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("sanitize.json");
        write_json_file(&TableErrorReport::new(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("entries"));
    }
}
