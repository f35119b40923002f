// src/utils/sample.rs: Sample identifiers

use std::fmt;
use std::path::Path;

use crate::config::defs::{CONCAT_PREFIX, FILTERED_EXT, FRAGMENT_EXT, PipelineError};


/// Identifier of one sample, taken from a directory or file name.
/// Always non-empty ASCII alphanumerics and `-`, so it is safe to embed in
/// file names and job scripts without further escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(String);

impl SampleId {
    pub fn parse(token: &str) -> Result<Self, PipelineError> {
        if token.is_empty() {
            return Err(PipelineError::InvalidSampleId("empty identifier".to_string()));
        }
        if let Some(bad) = token.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(PipelineError::InvalidSampleId(format!(
                "'{}' contains '{}'; only letters, digits and '-' are allowed",
                token, bad
            )));
        }
        Ok(SampleId(token.to_string()))
    }

    /// Recovers the id from a sample directory name: the last `_` token.
    pub fn from_dir_name(name: &str) -> Result<Self, PipelineError> {
        let token = name.rsplit('_').next().unwrap_or(name);
        Self::parse(token)
    }

    /// Recovers the id from `concatenated_<id>.fastq.gz`.
    pub fn from_concatenated(path: &Path) -> Result<Self, PipelineError> {
        let name = file_name(path)?;
        let token = name
            .strip_prefix(CONCAT_PREFIX)
            .and_then(|rest| rest.strip_suffix(FRAGMENT_EXT))
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(|| PipelineError::InvalidSampleId(format!("{} is not an aggregated sample file", name)))?;
        Self::parse(token)
    }

    /// Recovers the id from `<id>.filtered.fastq.gz`.
    pub fn from_filtered(path: &Path) -> Result<Self, PipelineError> {
        let name = file_name(path)?;
        let token = name
            .strip_suffix(FILTERED_EXT)
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(|| PipelineError::InvalidSampleId(format!("{} is not a filtered sample file", name)))?;
        Self::parse(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn concatenated_name(&self) -> String {
        format!("{}{}.{}", CONCAT_PREFIX, self.0, FRAGMENT_EXT)
    }

    pub fn filtered_name(&self) -> String {
        format!("{}.{}", self.0, FILTERED_EXT)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn file_name(path: &Path) -> Result<&str, PipelineError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::InvalidSampleId(format!("{:?} has no UTF-8 file name", path)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_accepts_tokens() {
        assert_eq!(SampleId::parse("S1").unwrap().as_str(), "S1");
        assert_eq!(SampleId::parse("barcode07").unwrap().as_str(), "barcode07");
        assert_eq!(SampleId::parse("12-b").unwrap().as_str(), "12-b");
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        assert!(SampleId::parse("").is_err());
        assert!(SampleId::parse("a b").is_err());
        assert!(SampleId::parse("x'; rm -rf /").is_err());
        assert!(SampleId::parse("s.1").is_err());
    }

    #[test]
    fn test_from_dir_name_takes_last_token() {
        assert_eq!(SampleId::from_dir_name("run1_S1").unwrap().as_str(), "S1");
        assert_eq!(SampleId::from_dir_name("run1_pass_barcode03").unwrap().as_str(), "barcode03");
        assert!(SampleId::from_dir_name("run1_").is_err());
    }

    #[test]
    fn test_names_round_through_later_stages() {
        let id = SampleId::parse("S2").unwrap();
        let concat = PathBuf::from("/x/concat_fastqpass").join(id.concatenated_name());
        assert_eq!(concat.file_name().unwrap(), "concatenated_S2.fastq.gz");
        assert_eq!(SampleId::from_concatenated(&concat).unwrap(), id);

        let filtered = PathBuf::from("/x/seqfiltered").join(id.filtered_name());
        assert_eq!(filtered.file_name().unwrap(), "S2.filtered.fastq.gz");
        assert_eq!(SampleId::from_filtered(&filtered).unwrap(), id);
    }

    #[test]
    fn test_foreign_names_are_rejected() {
        assert!(SampleId::from_concatenated(Path::new("notes.txt")).is_err());
        assert!(SampleId::from_concatenated(Path::new("concatenated_.fastq.gz")).is_err());
        assert!(SampleId::from_filtered(Path::new("S1.fastq.gz")).is_err());
    }
}
