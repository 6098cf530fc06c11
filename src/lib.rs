//! Survey ingest, sanitization and linking into a study database.
//!
//! Sources are decoded into [`unsanitized::UnsanitizedTable`]s, passed
//! through per-instrument [`sanitizer`]s into the sanitized store, and
//! finally projected by the [`link`] stage into the studytables described
//! by a YAML study [`spec`].

pub mod blob;
pub mod error;
pub mod link;
pub mod output;
pub mod pipeline;
pub mod readers;
pub mod report;
pub mod sanitize;
pub mod sanitized;
pub mod sanitizer;
pub mod spec;
pub mod study;
pub mod table;
pub mod types;
pub mod unsanitized;
pub mod value;
