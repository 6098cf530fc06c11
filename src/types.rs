use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Literal written to text cells whose value was deliberately erased
pub const REDACTED_SENTINEL: &str = "__REDACTED__";

/// Name of the per-instrument file holding identity/omit rules
pub const SANITIZER_RULES_FILE: &str = "rules.yaml";

/// Paths used by the pipeline stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding `config.yaml`, `measures/` and `instruments/`
    pub study_dir: PathBuf,

    /// Directory with one sub-directory of sanitizers per instrument
    pub sanitizer_dir: PathBuf,

    /// Directory of fetched source blobs (`<instrument>.tar.gz`)
    pub source_dir: PathBuf,

    /// Sanitized database file
    pub sanitized_db: PathBuf,

    /// Linked database file
    pub linked_db: PathBuf,

    /// Where error reports are written
    pub report_dir: PathBuf,
}

impl Settings {
    /// Default layout rooted at a single project directory
    pub fn from_root(root: &Path) -> Self {
        Self {
            study_dir: root.join("study"),
            sanitizer_dir: root.join("sanitizers"),
            source_dir: root.join("sources"),
            sanitized_db: root.join("sanitized.db"),
            linked_db: root.join("linked.db"),
            report_dir: root.join("reports"),
        }
    }

    /// Path of the blob stored for an instrument
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.source_dir.join(format!("{}.tar.gz", name))
    }
}

/// Hex SHA-256 of a byte payload
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Result type for the application
pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_root() {
        let settings = Settings::from_root(Path::new("/data/study1"));
        assert_eq!(settings.study_dir, PathBuf::from("/data/study1/study"));
        assert_eq!(settings.sanitized_db, PathBuf::from("/data/study1/sanitized.db"));
        assert_eq!(
            settings.source_path("intake"),
            PathBuf::from("/data/study1/sources/intake.tar.gz")
        );
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex(b"test content");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex chars
        assert_eq!(hash, sha256_hex(b"test content"));
        assert_ne!(hash, sha256_hex(b"other content"));
    }
}
