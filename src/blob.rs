//! Fetched source payloads and their tar.gz storage.
//!
//! A blob archive holds `info.json` next to the vendor payloads:
//! `data.csv` for CSV sources, `schema.json` and `data.json` for Qualtrics.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};

use crate::error::Error;
use crate::readers::create_reader;
use crate::types::Result;
use crate::unsanitized::{SourceType, UnsanitizedColumnType, UnsanitizedTable};

pub const INFO_MEMBER: &str = "info.json";
pub const CSV_DATA_MEMBER: &str = "data.csv";
pub const SCHEMA_MEMBER: &str = "schema.json";
pub const JSON_DATA_MEMBER: &str = "data.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_type: SourceType,
    pub remote_id: String,
    pub title: String,
}

/// Column as described to the user before any sanitizer exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub id: String,
    pub prompt: String,
    pub column_type: String,
    pub is_safe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub fetch_date: DateTime<Utc>,
    pub source: SourceInfo,
    pub columns: Vec<ColumnSummary>,
}

/// Source metadata plus raw payload files
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub info: BlobInfo,
    pub files: BTreeMap<String, Vec<u8>>,
}

fn payload_text<'a>(files: &'a BTreeMap<String, Vec<u8>>, member: &str) -> Result<&'a str> {
    let bytes = files
        .get(member)
        .ok_or_else(|| Error::NotFound(format!("blob member '{}'", member)))?;
    std::str::from_utf8(bytes)
        .map_err(|e| Error::InvalidInput(format!("blob member '{}' is not UTF-8: {}", member, e)))
}

fn decode(
    source_type: SourceType,
    name: &str,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<UnsanitizedTable> {
    let reader = create_reader(source_type);
    match source_type {
        SourceType::Csv => {
            let data = payload_text(files, CSV_DATA_MEMBER)?;
            reader.read(name, data, data)
        }
        SourceType::Qualtrics => reader.read(
            name,
            payload_text(files, SCHEMA_MEMBER)?,
            payload_text(files, JSON_DATA_MEMBER)?,
        ),
    }
}

impl Blob {
    /// Build a blob from payloads, decoding them once to fill the column summary
    pub fn new(
        source_type: SourceType,
        remote_id: &str,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self> {
        let table = decode(source_type, remote_id, &files)?;
        let columns = table
            .columns
            .iter()
            .map(|c| ColumnSummary {
                id: c.id.to_string(),
                prompt: c.prompt.clone(),
                column_type: match &c.column_type {
                    UnsanitizedColumnType::Text => "text",
                    UnsanitizedColumnType::Ordinal { .. } => "ordinal",
                    UnsanitizedColumnType::Multiselect { .. } => "multiselect",
                    UnsanitizedColumnType::Array => "array",
                }
                .to_string(),
                is_safe: c.is_safe,
            })
            .collect();

        Ok(Self {
            info: BlobInfo {
                fetch_date: Utc::now(),
                source: SourceInfo {
                    source_type,
                    remote_id: remote_id.to_string(),
                    title: table.title,
                },
                columns,
            },
            files,
        })
    }

    /// Decode the payloads into an unsanitized table stored as `name`
    pub fn to_unsanitized(&self, name: &str) -> Result<UnsanitizedTable> {
        decode(self.info.source.source_type, name, &self.files)
    }

    pub fn to_tar_gz(&self) -> Result<Vec<u8>> {
        let mtime = self.info.fetch_date.timestamp().max(0) as u64;
        let info = serde_json::to_vec_pretty(&self.info)?;

        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let members = std::iter::once((INFO_MEMBER, info.as_slice()))
            .chain(self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice())));
        for (member, bytes) in members {
            let mut header = Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, member, bytes)?;
        }
        Ok(builder.into_inner()?.finish()?)
    }

    pub fn from_tar_gz(data: &[u8]) -> Result<Self> {
        let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
        let mut info = None;
        let mut files = BTreeMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let member = entry.path()?.to_string_lossy().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            if member == INFO_MEMBER {
                info = Some(serde_json::from_slice::<BlobInfo>(&bytes)?);
            } else {
                files.insert(member, bytes);
            }
        }

        let info =
            info.ok_or_else(|| Error::InvalidInput(format!("blob archive has no {}", INFO_MEMBER)))?;
        Ok(Self { info, files })
    }

    pub fn write_tar_gz(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_tar_gz()?)?;
        log::info!("Wrote blob {}", path.display());
        Ok(())
    }

    pub fn read_tar_gz(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!("blob {}", path.display())));
        }
        Self::from_tar_gz(&fs::read(path)?)
    }
}

/// A remote data service, as seen by the pipeline
pub trait Fetcher {
    /// `(remote_id, title)` of every survey the service offers
    fn fetch_listing(&self) -> Result<Vec<(String, String)>>;

    /// Download one survey; `progress` receives 0 to 100
    fn fetch_blob(&self, remote_id: &str, progress: &mut dyn FnMut(u8)) -> Result<Blob>;
}

/// Serves `*.csv` files from a local directory, keyed by file stem
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl Fetcher for DirectoryFetcher {
    fn fetch_listing(&self) -> Result<Vec<(String, String)>> {
        let mut listing = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let (Some(stem), Some(file_name)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name().and_then(|s| s.to_str()),
            ) {
                listing.push((stem.to_string(), file_name.to_string()));
            }
        }
        listing.sort();
        Ok(listing)
    }

    fn fetch_blob(&self, remote_id: &str, progress: &mut dyn FnMut(u8)) -> Result<Blob> {
        let path = self.dir.join(format!("{}.csv", remote_id));
        if !path.exists() {
            return Err(Error::NotFound(format!("source file {}", path.display())));
        }
        progress(0);
        let bytes = fs::read(&path)?;
        progress(50);

        let mut files = BTreeMap::new();
        files.insert(CSV_DATA_MEMBER.to_string(), bytes);
        let blob = Blob::new(SourceType::Csv, remote_id, files)?;
        progress(100);
        Ok(blob)
    }
}
