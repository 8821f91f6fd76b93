use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A per-file failure recorded while walking or sweeping the cache.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Aggregate size of the cache directory subtree. Files that could not
/// be inspected contribute zero bytes and are listed in `failures`
/// instead of aborting the walk.
#[derive(Debug, Clone, Default)]
pub struct SizeReport {
    pub total_bytes: u64,
    pub failures: Vec<FileFailure>,
}

/// Outcome of a cache sweep. Files that could not be deleted are listed
/// in `failures`; the sweep continues past them.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

impl SweepReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Recursively sum the sizes of all regular files under `dir`.
///
/// A missing directory reports zero bytes. Failure to read one file or
/// subtree never aborts the rest of the computation.
pub fn cache_size(dir: &Path) -> SizeReport {
    let mut report = SizeReport::default();
    if !dir.exists() {
        return report;
    }
    sum_dir(dir, &mut report);
    report
}

fn sum_dir(dir: &Path, report: &mut SizeReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read cache directory {:?}: {}", dir, e);
            report.failures.push(FileFailure {
                path: dir.to_path_buf(),
                error: e.to_string(),
            });
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.failures.push(FileFailure {
                    path: dir.to_path_buf(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let path = entry.path();
        if path.is_dir() {
            sum_dir(&path, report);
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => report.total_bytes += metadata.len(),
            Err(e) => {
                warn!("Failed to stat cache file {:?}: {}", path, e);
                report.failures.push(FileFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Delete every regular file directly under `dir`, leaving subdirectories
/// untouched. Idempotent: sweeping an already-empty directory deletes
/// nothing and succeeds.
///
/// Individual deletion failures are collected and the sweep continues;
/// only a failure to enumerate `dir` itself is an error.
pub fn clear_top_level_files(dir: &Path) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !dir.exists() {
        return Ok(report);
    }

    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read cache directory {:?}", dir))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to enumerate {:?}", dir))?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted cached file {:?}", path);
                report.deleted.push(path);
            }
            Err(e) => {
                warn!("Failed to delete cached file {:?}: {}", path, e);
                report.failures.push(FileFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        path
    }

    #[test]
    fn test_size_of_missing_directory_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let report = cache_size(&temp_dir.path().join("does-not-exist"));
        assert_eq!(report.total_bytes, 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_size_sums_recursively() {
        let temp_dir = TempDir::new().unwrap();
        write_file(temp_dir.path(), "a.cache", 100);
        write_file(temp_dir.path(), "b.cache", 50);

        let nested = temp_dir.path().join("sub").join("deeper");
        fs::create_dir_all(&nested).unwrap();
        write_file(&nested, "c.cache", 25);

        let report = cache_size(temp_dir.path());
        assert_eq!(report.total_bytes, 175);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_deleting_a_file_decreases_size_by_its_length() {
        let temp_dir = TempDir::new().unwrap();
        write_file(temp_dir.path(), "a.cache", 100);
        let b = write_file(temp_dir.path(), "b.cache", 64);

        let before = cache_size(temp_dir.path()).total_bytes;
        fs::remove_file(&b).unwrap();
        let after = cache_size(temp_dir.path()).total_bytes;

        assert_eq!(before - after, 64);
    }

    #[test]
    fn test_clear_removes_only_top_level_files() {
        let temp_dir = TempDir::new().unwrap();
        write_file(temp_dir.path(), "a.cache", 10);
        write_file(temp_dir.path(), "b.cache", 10);

        let sub = temp_dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        let kept = write_file(&sub, "keep.cache", 10);

        let report = clear_top_level_files(temp_dir.path()).unwrap();
        assert_eq!(report.deleted_count(), 2);
        assert!(report.failures.is_empty());

        assert!(sub.exists());
        assert!(kept.exists());
        assert!(!temp_dir.path().join("a.cache").exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        write_file(temp_dir.path(), "a.cache", 10);

        let first = clear_top_level_files(temp_dir.path()).unwrap();
        assert_eq!(first.deleted_count(), 1);

        let second = clear_top_level_files(temp_dir.path()).unwrap();
        assert_eq!(second.deleted_count(), 0);
        assert!(second.failures.is_empty());
    }

    #[test]
    fn test_clear_missing_directory_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let report = clear_top_level_files(&temp_dir.path().join("nope")).unwrap();
        assert_eq!(report.deleted_count(), 0);
    }
}
