use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use survey_linker::types::Settings;
use survey_linker::unsanitized::SourceType;

/// Sanitize survey exports and link them into a study database
#[derive(Parser, Debug)]
#[command(name = "survey-linker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project directory holding study/, sanitizers/ and sources/
    #[arg(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(flatten)]
    pub paths: PathArgs,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-path overrides of the layout under `--root`
#[derive(Args, Debug, Default)]
pub struct PathArgs {
    /// Study spec directory
    #[arg(long, global = true)]
    pub study_dir: Option<PathBuf>,

    /// Sanitizer directory
    #[arg(long, global = true)]
    pub sanitizer_dir: Option<PathBuf>,

    /// Source blob directory
    #[arg(long, global = true)]
    pub source_dir: Option<PathBuf>,

    /// Sanitized database file
    #[arg(long, global = true)]
    pub sanitized_db: Option<PathBuf>,

    /// Linked database file
    #[arg(long, global = true)]
    pub linked_db: Option<PathBuf>,

    /// Error report directory
    #[arg(long, global = true)]
    pub report_dir: Option<PathBuf>,
}

impl Cli {
    /// Layout under `--root` with any per-path flags applied
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::from_root(&self.root);
        let paths = &self.paths;
        if let Some(dir) = &paths.study_dir {
            settings.study_dir = dir.clone();
        }
        if let Some(dir) = &paths.sanitizer_dir {
            settings.sanitizer_dir = dir.clone();
        }
        if let Some(dir) = &paths.source_dir {
            settings.source_dir = dir.clone();
        }
        if let Some(path) = &paths.sanitized_db {
            settings.sanitized_db = path.clone();
        }
        if let Some(path) = &paths.linked_db {
            settings.linked_db = path.clone();
        }
        if let Some(dir) = &paths.report_dir {
            settings.report_dir = dir.clone();
        }
        settings
    }

    /// Default log filter: `info`, or `debug` with `-v`
    pub fn log_filter(&self) -> &'static str {
        if self.verbose > 0 {
            "debug"
        } else {
            "info"
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage stored source exports
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },

    /// Manage lookup sanitizers
    Sanitizer {
        #[command(subcommand)]
        command: SanitizerCommand,
    },

    /// Sanitize stored sources into the sanitized database
    Sanitize {
        /// Sources to sanitize (all when omitted)
        names: Vec<String>,

        /// Also print the error report to stdout
        #[arg(long)]
        stdout: bool,
    },

    /// Rebuild the linked database from the study spec
    Link {
        /// Also print the error report to stdout
        #[arg(long)]
        stdout: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Csv,
    Qualtrics,
}

impl From<SourceKind> for SourceType {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Csv => SourceType::Csv,
            SourceKind::Qualtrics => SourceType::Qualtrics,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SourceCommand {
    /// Store an export under an instrument name
    Add {
        name: String,

        #[arg(short = 't', long = "type", value_enum, default_value_t = SourceKind::Csv)]
        kind: SourceKind,

        /// Data payload (CSV file or Qualtrics responses JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Qualtrics survey schema JSON
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Remote id recorded in the blob info (defaults to the name)
        #[arg(long)]
        remote_id: Option<String>,
    },

    /// Delete a stored source
    Rm { name: String },

    /// List stored sources
    List,
}

#[derive(Subcommand, Debug)]
pub enum SanitizerCommand {
    /// List sanitizers, for one instrument or all
    List { instrument: Option<String> },

    /// Create a lookup sanitizer template from a stored source
    Add {
        instrument: String,

        /// Sanitizer name (file stem)
        name: String,

        /// Unsafe key columns
        #[arg(short, long, value_delimiter = ',', required = true)]
        keys: Vec<String>,

        /// Sanitized output columns
        #[arg(short, long, value_delimiter = ',')]
        outputs: Vec<String>,
    },

    /// Append key rows the current source has but the sanitizers lack
    Update {
        instrument: String,

        /// Only this sanitizer
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_layout() {
        let cli = Cli::parse_from(["survey-linker", "--root", "/data/s1", "link"]);
        assert_eq!(cli.settings(), Settings::from_root(std::path::Path::new("/data/s1")));
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn test_settings_path_overrides() {
        let cli = Cli::parse_from([
            "survey-linker",
            "--root",
            "/data/s1",
            "sanitize",
            "--sanitized-db",
            "/tmp/clean.db",
            "--study-dir",
            "/etc/study",
            "-v",
        ]);
        let settings = cli.settings();
        assert_eq!(settings.sanitized_db, PathBuf::from("/tmp/clean.db"));
        assert_eq!(settings.study_dir, PathBuf::from("/etc/study"));
        assert_eq!(settings.linked_db, PathBuf::from("/data/s1/linked.db"));
        assert_eq!(settings.source_dir, PathBuf::from("/data/s1/sources"));
        assert_eq!(cli.log_filter(), "debug");
    }
}
