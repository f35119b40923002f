// src/utils/discovery.rs: Finds samples under a run directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{FRAGMENT_EXT, PipelineError, STAGE_DIR_NAMES};
use crate::utils::file::{list_files_with_suffix, list_subdirs};
use crate::utils::sample::SampleId;


#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: SampleId,
    pub dir: PathBuf,
    pub fragments: Vec<PathBuf>,
}

/// Scans `root` for `<prefix>_<id>` sample directories.
/// The prefix is taken from the first (by name) subdirectory containing an
/// underscore; every other subdirectory must share it to be picked up.
/// The pipeline's own output directories are never candidates.
///
/// # Arguments
///
/// * `root` - The run directory holding one subdirectory per sample.
///
/// # Returns
/// Samples in directory-name order, each with its sorted `.fastq.gz` fragments.
pub fn discover_samples(root: &Path) -> Result<Vec<Sample>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::Discovery(format!("{:?} is not a directory", root)));
    }
    let subdirs: Vec<PathBuf> = list_subdirs(root)
        .map_err(|e| PipelineError::Discovery(e.to_string()))?
        .into_iter()
        .filter(|d| !dir_name(d).is_some_and(|n| STAGE_DIR_NAMES.iter().any(|s| *s == n)))
        .collect();

    let prefix = subdirs
        .iter()
        .filter_map(|d| dir_name(d))
        .find_map(common_prefix)
        .ok_or_else(|| {
            PipelineError::Discovery(format!("No subdirectory of {:?} is named <prefix>_<sample>", root))
        })?;
    let pattern = format!("{}_", prefix);
    debug!("Using sample directory prefix '{}'", prefix);

    let mut seen: HashMap<SampleId, PathBuf> = HashMap::new();
    let mut samples = Vec::new();
    for dir in subdirs {
        let Some(name) = dir_name(&dir) else { continue };
        if !name.starts_with(&pattern) {
            debug!("Ignoring {:?}: does not start with '{}'", dir, pattern);
            continue;
        }
        let id = SampleId::from_dir_name(name)
            .map_err(|e| PipelineError::Discovery(format!("{:?}: {}", dir, e)))?;
        if let Some(first) = seen.get(&id) {
            return Err(PipelineError::DuplicateSample {
                id,
                first: first.clone(),
                second: dir,
            });
        }
        let fragments = list_files_with_suffix(&dir, FRAGMENT_EXT)
            .map_err(|e| PipelineError::Discovery(e.to_string()))?;
        seen.insert(id.clone(), dir.clone());
        samples.push(Sample { id, dir, fragments });
    }

    Ok(samples)
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn common_prefix(name: &str) -> Option<&str> {
    let (prefix, suffix) = name.split_once('_')?;
    if prefix.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(prefix)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use anyhow::Result;
    use tempfile::tempdir;

    fn ids(samples: &[Sample]) -> Vec<&str> {
        samples.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_discovers_all_samples_regardless_of_creation_order() -> Result<()> {
        let root = tempdir()?;
        for name in ["run1_3", "run1_1", "run1_2"] {
            fs::create_dir(root.path().join(name))?;
        }
        let samples = discover_samples(root.path())?;
        assert_eq!(ids(&samples), vec!["1", "2", "3"]);
        Ok(())
    }

    #[test]
    fn test_fragments_are_sorted_and_filtered() -> Result<()> {
        let root = tempdir()?;
        let s1 = root.path().join("run1_S1");
        fs::create_dir(&s1)?;
        fs::write(s1.join("b.fastq.gz"), b"b")?;
        fs::write(s1.join("a.fastq.gz"), b"a")?;
        fs::write(s1.join("summary.txt"), b"x")?;

        let samples = discover_samples(root.path())?;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].fragments, vec![s1.join("a.fastq.gz"), s1.join("b.fastq.gz")]);
        Ok(())
    }

    #[test]
    fn test_other_prefixes_and_plain_dirs_are_ignored() -> Result<()> {
        let root = tempdir()?;
        for name in ["logs", "run1_S1", "run1_S2", "runX_S9"] {
            fs::create_dir(root.path().join(name))?;
        }
        fs::write(root.path().join("run1_S3"), b"not a dir")?;
        let samples = discover_samples(root.path())?;
        assert_eq!(ids(&samples), vec!["S1", "S2"]);
        Ok(())
    }

    #[test]
    fn test_stage_output_dirs_are_not_samples() -> Result<()> {
        let root = tempdir()?;
        for name in ["concat_fastqpass", "emu_results", "nanocomp_output", "seqfiltered", "run1_S1", "run1_S2"] {
            fs::create_dir(root.path().join(name))?;
        }
        fs::write(root.path().join("concat_fastqpass/concatenated_S1.fastq.gz"), b"x")?;
        let samples = discover_samples(root.path())?;
        assert_eq!(ids(&samples), vec!["S1", "S2"]);
        Ok(())
    }

    #[test]
    fn test_no_matching_dirs_is_an_error() -> Result<()> {
        let root = tempdir()?;
        fs::create_dir(root.path().join("plain"))?;
        assert!(matches!(discover_samples(root.path()), Err(PipelineError::Discovery(_))));
        assert!(matches!(
            discover_samples(&root.path().join("missing")),
            Err(PipelineError::Discovery(_))
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_ids_are_rejected() -> Result<()> {
        let root = tempdir()?;
        fs::create_dir(root.path().join("run1_a_S1"))?;
        fs::create_dir(root.path().join("run1_b_S1"))?;
        match discover_samples(root.path()) {
            Err(PipelineError::DuplicateSample { id, .. }) => assert_eq!(id.as_str(), "S1"),
            other => panic!("expected duplicate error, got {:?}", other.map(|s| s.len())),
        }
        Ok(())
    }
}
