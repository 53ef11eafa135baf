//! Path utilities for test input and output directories.

use std::path::PathBuf;

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Creates a temporary directory with a specific prefix.
pub fn temp_test_dir_with_prefix(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// Input, work and output directories of one pipeline run, inside a
/// single temporary directory.
pub struct RunDirs {
    pub root: tempfile::TempDir,
    pub input: PathBuf,
    pub work: PathBuf,
    pub output: PathBuf,
}

impl RunDirs {
    /// Creates the input directory; work and output are left for the
    /// pipeline to create.
    pub fn new() -> Self {
        let root = temp_test_dir_with_prefix("planet_tiles_");
        let input = root.path().join("input");
        std::fs::create_dir_all(&input).expect("Failed to create input directory");
        Self {
            work: root.path().join("work"),
            output: root.path().join("tiles"),
            input,
            root,
        }
    }
}

impl Default for RunDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_test_dir_with_prefix() {
        let dir = temp_test_dir_with_prefix("mosaic_test_");
        let path_str = dir.path().to_string_lossy();
        assert!(path_str.contains("mosaic_test_"));
    }

    #[test]
    fn test_run_dirs_layout() {
        let dirs = RunDirs::new();
        assert!(dirs.input.is_dir());
        assert!(!dirs.work.exists());
        assert!(!dirs.output.exists());
        assert!(dirs.output.starts_with(dirs.root.path()));
    }
}
