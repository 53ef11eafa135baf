//! Tile persistence.

use mosaic_common::{MapperError, MapperResult, TileCoord, TileScheme};
use raster_io::atomic::{is_partial, write_atomic};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Where encoded tiles go. Coordinates are always XYZ; a store may lay them
/// out in another scheme.
pub trait TileStore: Send + Sync {
    /// Store a tile. A tile visible to readers is always complete.
    fn put(&self, coord: &TileCoord, png: &[u8]) -> MapperResult<()>;

    /// Fetch a tile, or None if it was never written.
    fn get(&self, coord: &TileCoord) -> MapperResult<Option<Vec<u8>>>;

    fn exists(&self, coord: &TileCoord) -> bool;

    /// Number of tiles stored at `zoom`.
    fn count_level(&self, zoom: u32) -> MapperResult<u64>;
}

/// Tiles as `{root}/{z}/{x}/{y}.png`.
#[derive(Debug, Clone)]
pub struct DirectoryTileStore {
    root: PathBuf,
    scheme: TileScheme,
}

impl DirectoryTileStore {
    pub fn new(root: impl Into<PathBuf>, scheme: TileScheme) -> Self {
        Self {
            root: root.into(),
            scheme,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scheme(&self) -> TileScheme {
        self.scheme
    }

    pub fn tile_path(&self, coord: &TileCoord) -> PathBuf {
        self.root.join(format!("{}.png", coord.path_key(self.scheme)))
    }

    fn level_dir(&self, zoom: u32) -> PathBuf {
        self.root.join(zoom.to_string())
    }

    /// Remove every level directory. Other files under the root are kept.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn purge(&self) -> MapperResult<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(MapperError::storage(&self.root, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| MapperError::storage(&self.root, e))?;
            let path = entry.path();
            let is_level = entry
                .file_name()
                .to_str()
                .map(|n| n.parse::<u32>().is_ok())
                .unwrap_or(false);
            if is_level && path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| MapperError::storage(&path, e))?;
                debug!(level = %path.display(), "Removed tile level");
            }
        }
        Ok(())
    }

    /// Delete leftovers of interrupted tile writes. Returns how many were removed.
    pub fn remove_partials(&self) -> MapperResult<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() && is_partial(entry.path()) {
                fs::remove_file(entry.path()).map_err(|e| MapperError::storage(entry.path(), e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl TileStore for DirectoryTileStore {
    fn put(&self, coord: &TileCoord, png: &[u8]) -> MapperResult<()> {
        write_atomic(&self.tile_path(coord), png)
    }

    fn get(&self, coord: &TileCoord) -> MapperResult<Option<Vec<u8>>> {
        let path = self.tile_path(coord);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MapperError::storage(&path, e)),
        }
    }

    fn exists(&self, coord: &TileCoord) -> bool {
        self.tile_path(coord).is_file()
    }

    fn count_level(&self, zoom: u32) -> MapperResult<u64> {
        let dir = self.level_dir(zoom);
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                MapperError::storage(path, io::Error::other(e.to_string()))
            })?;
            let is_tile = entry.file_type().is_file()
                && entry.path().extension().map(|e| e == "png").unwrap_or(false);
            if is_tile {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Tiles held in memory, for tests and benchmarks.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: Mutex<BTreeMap<TileCoord, Vec<u8>>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coords(&self) -> Vec<TileCoord> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TileCoord, Vec<u8>>> {
        // entries are inserted whole, so a poisoned map is still consistent
        self.tiles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TileStore for MemoryTileStore {
    fn put(&self, coord: &TileCoord, png: &[u8]) -> MapperResult<()> {
        self.lock().insert(*coord, png.to_vec());
        Ok(())
    }

    fn get(&self, coord: &TileCoord) -> MapperResult<Option<Vec<u8>>> {
        Ok(self.lock().get(coord).cloned())
    }

    fn exists(&self, coord: &TileCoord) -> bool {
        self.lock().contains_key(coord)
    }

    fn count_level(&self, zoom: u32) -> MapperResult<u64> {
        Ok(self.lock().keys().filter(|c| c.z == zoom).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xyz_and_tms_paths() {
        let coord = TileCoord::new(3, 2, 1);
        let xyz = DirectoryTileStore::new("/tiles", TileScheme::Xyz);
        let tms = DirectoryTileStore::new("/tiles", TileScheme::Tms);
        assert_eq!(xyz.tile_path(&coord), PathBuf::from("/tiles/3/2/1.png"));
        assert_eq!(tms.tile_path(&coord), PathBuf::from("/tiles/3/2/6.png"));
    }

    #[test]
    fn test_put_get_count_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTileStore::new(dir.path(), TileScheme::Xyz);
        let a = TileCoord::new(2, 1, 1);
        let b = TileCoord::new(2, 3, 0);

        assert_eq!(store.get(&a).unwrap(), None);
        store.put(&a, b"one").unwrap();
        store.put(&b, b"two").unwrap();
        fs::write(dir.path().join("metadata.json"), b"{}").unwrap();

        assert!(store.exists(&a));
        assert_eq!(store.get(&b).unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.count_level(2).unwrap(), 2);
        assert_eq!(store.count_level(3).unwrap(), 0);

        store.purge().unwrap();
        assert!(!store.exists(&a));
        assert!(dir.path().join("metadata.json").exists());
    }

    #[test]
    fn test_remove_partials() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryTileStore::new(dir.path(), TileScheme::Xyz);
        store.put(&TileCoord::new(0, 0, 0), b"x").unwrap();
        fs::create_dir_all(dir.path().join("1/0")).unwrap();
        fs::write(dir.path().join("1/0/0.png.partial"), b"half").unwrap();

        assert_eq!(store.remove_partials().unwrap(), 1);
        assert_eq!(store.count_level(1).unwrap(), 0);
        assert_eq!(store.count_level(0).unwrap(), 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTileStore::new();
        store.put(&TileCoord::new(1, 0, 1), b"t").unwrap();
        assert!(store.exists(&TileCoord::new(1, 0, 1)));
        assert_eq!(store.count_level(1).unwrap(), 1);
        assert_eq!(store.coords(), vec![TileCoord::new(1, 0, 1)]);
    }
}
