pub mod csv;
pub mod qualtrics;

use crate::types::Result;
use crate::unsanitized::{SourceType, UnsanitizedTable};

/// Common trait for source payload decoders
///
/// Readers are pure: the same payloads always produce the same table.
pub trait SourceReader {
    /// Which service this reader understands
    fn source_type(&self) -> SourceType;

    /// Decode a schema/data payload pair into a uniform table
    fn read(&self, name: &str, schema_text: &str, data_text: &str) -> Result<UnsanitizedTable>;
}

/// Create a reader for the given source type
pub fn create_reader(source: SourceType) -> Box<dyn SourceReader> {
    match source {
        SourceType::Csv => Box::new(csv::CsvReader::new()),
        SourceType::Qualtrics => Box::new(qualtrics::QualtricsReader::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_reader() {
        assert_eq!(create_reader(SourceType::Csv).source_type(), SourceType::Csv);
        assert_eq!(
            create_reader(SourceType::Qualtrics).source_type(),
            SourceType::Qualtrics
        );
    }
}
