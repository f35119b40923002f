use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Immediate subdirectories of `dir`, sorted by name.
pub fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list {:?}", dir))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Regular, non-hidden files directly in `dir` whose name ends in `.<suffix>`, sorted by name.
pub fn list_files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let dotted = format!(".{}", suffix);
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list {:?}", dir))? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || is_hidden(&path) {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(&dotted)) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Same as `list_files_with_suffix` but descends into subdirectories.
/// Hidden entries are skipped at every level.
pub fn find_files_recursive(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = list_files_with_suffix(dir, suffix)?;
    for sub in list_subdirs(dir)? {
        if is_hidden(&sub) {
            continue;
        }
        files.extend(find_files_recursive(&sub, suffix)?);
    }
    files.sort();
    Ok(files)
}

/// Byte-concatenates `parts` in order into `out_path`. The data is written
/// to a temp file beside the target and renamed over it once complete, so
/// `out_path` is either the old file or the full new one.
///
/// # Arguments
///
/// * `parts` - Input files, concatenated in the given order.
/// * `out_path` - Destination; replaced if it exists.
///
/// # Returns
/// Err carrying the part that failed to read, or an IO error for the output.
pub fn concatenate_atomic(parts: &[PathBuf], out_path: &Path) -> Result<(), ConcatError> {
    let parent = out_path
        .parent()
        .ok_or_else(|| ConcatError::Output(anyhow!("{:?} has no parent directory", out_path)))?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| ConcatError::Output(e.into()))?;

    for part in parts {
        let mut input = File::open(part).map_err(|e| ConcatError::Input(part.clone(), e))?;
        io::copy(&mut input, tmp.as_file_mut()).map_err(|e| ConcatError::Input(part.clone(), e))?;
    }
    tmp.as_file_mut().flush().map_err(|e| ConcatError::Output(e.into()))?;
    tmp.persist(out_path).map_err(|e| ConcatError::Output(e.error.into()))?;
    Ok(())
}

#[derive(Debug)]
pub enum ConcatError {
    Input(PathBuf, io::Error),
    Output(anyhow::Error),
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_files_with_suffix_sorted_and_filtered() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("b.fastq.gz"), b"b")?;
        fs::write(dir.path().join("a.fastq.gz"), b"a")?;
        fs::write(dir.path().join("notes.txt"), b"n")?;
        fs::write(dir.path().join(".hidden.fastq.gz"), b"h")?;
        fs::create_dir(dir.path().join("c.fastq.gz"))?;

        let files = list_files_with_suffix(dir.path(), "fastq.gz")?;
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.fastq.gz", "b.fastq.gz"]);
        Ok(())
    }

    #[test]
    fn test_find_files_recursive_descends() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("nested/deeper"))?;
        fs::create_dir_all(dir.path().join(".skip"))?;
        fs::write(dir.path().join("S1.filtered.fastq.gz"), b"")?;
        fs::write(dir.path().join("nested/deeper/S2.filtered.fastq.gz"), b"")?;
        fs::write(dir.path().join(".skip/S3.filtered.fastq.gz"), b"")?;

        let files = find_files_recursive(dir.path(), "filtered.fastq.gz")?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn test_concatenate_atomic_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"AAA")?;
        fs::write(&b, b"BB")?;
        let out = dir.path().join("out");
        fs::write(&out, b"stale content")?;

        concatenate_atomic(&[a.clone(), b], &out).map_err(|e| anyhow!("{:?}", e))?;
        assert_eq!(fs::read(&out)?, b"AAABB");

        concatenate_atomic(&[], &out).map_err(|e| anyhow!("{:?}", e))?;
        assert_eq!(fs::read(&out)?, b"");
        Ok(())
    }

    #[test]
    fn test_concatenate_atomic_reports_missing_part() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("out");
        let missing = dir.path().join("missing");
        match concatenate_atomic(&[missing.clone()], &out) {
            Err(ConcatError::Input(path, _)) => assert_eq!(path, missing),
            other => panic!("expected input error, got {:?}", other),
        }
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn test_is_gzipped() -> Result<()> {
        let dir = tempdir()?;
        let gz = dir.path().join("x.gz");
        fs::write(&gz, [0x1F, 0x8B, 0x08])?;
        let empty = dir.path().join("e.gz");
        fs::write(&empty, b"")?;
        assert!(is_gzipped(&gz)?);
        assert!(!is_gzipped(&empty)?);
        Ok(())
    }
}
