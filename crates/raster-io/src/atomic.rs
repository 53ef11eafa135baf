//! Crash-safe file creation.
//!
//! Every unit of output (a normalized raster, the mosaic, a tile, a manifest)
//! is written under a temporary name in the destination directory and
//! renamed into place once complete. A file at its final path is therefore
//! always complete.

use mosaic_common::{MapperError, MapperResult};
use std::fs;
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = "partial";

/// Temporary sibling used while `path` is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// True for leftovers of an interrupted write.
pub fn is_partial(path: &Path) -> bool {
    path.extension().map(|e| e == PARTIAL_SUFFIX).unwrap_or(false)
}

/// Create the parent directory of `path` if needed.
pub fn ensure_parent(path: &Path) -> MapperResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| MapperError::storage(parent, e))?;
        }
    }
    Ok(())
}

/// Move a completed temporary file to its final name.
pub fn commit(partial: &Path, path: &Path) -> MapperResult<()> {
    fs::rename(partial, path).map_err(|e| MapperError::storage(path, e))
}

/// Write `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> MapperResult<()> {
    ensure_parent(path)?;
    let partial = partial_path(path);
    fs::write(&partial, bytes).map_err(|e| MapperError::storage(&partial, e))?;
    commit(&partial, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        let p = partial_path(Path::new("/out/3/4/5.png"));
        assert_eq!(p, PathBuf::from("/out/3/4/5.png.partial"));
        assert!(is_partial(&p));
        assert!(!is_partial(Path::new("/out/3/4/5.png")));
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!partial_path(&path).exists());
    }
}
