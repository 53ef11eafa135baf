//! Stage completion records.
//!
//! A manifest is written, atomically, after a stage has produced all of its
//! outputs. A later run may skip the stage when the manifest's fingerprint
//! matches the current inputs and configuration and every recorded output is
//! still in place.

use crate::orchestrator::Stage;
use crate::store::TileStore;
use chrono::{DateTime, Utc};
use mosaic_common::{MapperError, MapperResult};
use raster_io::atomic::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// One file produced by a stage, relative to the stage's base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageManifest {
    pub stage: Stage,
    /// Identity of the stage's inputs and the configuration it depends on.
    pub fingerprint: String,
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub outputs: Vec<OutputRecord>,
    /// Stored tiles per level (tile stage only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tile_counts: BTreeMap<u32, u64>,
}

impl StageManifest {
    pub fn new(stage: Stage, fingerprint: String, run_id: Uuid) -> Self {
        Self {
            stage,
            fingerprint,
            run_id,
            completed_at: Utc::now(),
            outputs: Vec::new(),
            tile_counts: BTreeMap::new(),
        }
    }

    /// Record `path` (under `base`) with its current size.
    pub fn record_output(&mut self, base: &Path, path: &Path) -> MapperResult<()> {
        let bytes = fs::metadata(path)
            .map_err(|e| MapperError::storage(path, e))?
            .len();
        let relative = path.strip_prefix(base).unwrap_or(path).to_path_buf();
        self.outputs.push(OutputRecord {
            path: relative,
            bytes,
        });
        Ok(())
    }

    /// Read a manifest. A missing or unreadable manifest means the stage has
    /// to run, so both come back as None.
    pub fn load(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read stage manifest");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed stage manifest");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> MapperResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| MapperError::storage(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(path, &json)
    }

    /// Whether every recorded output under `base` still has its recorded size.
    pub fn outputs_intact(&self, base: &Path) -> bool {
        self.outputs.iter().all(|record| {
            let path = base.join(&record.path);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == record.bytes => true,
                Ok(meta) => {
                    debug!(path = %path.display(), expected = record.bytes, actual = meta.len(), "Output size changed");
                    false
                }
                Err(_) => {
                    debug!(path = %path.display(), "Output missing");
                    false
                }
            }
        })
    }

    /// Whether the store holds exactly the recorded number of tiles per level.
    pub fn tiles_intact<S: TileStore + ?Sized>(&self, store: &S) -> bool {
        self.tile_counts.iter().all(|(&zoom, &expected)| {
            match store.count_level(zoom) {
                Ok(actual) if actual == expected => true,
                Ok(actual) => {
                    debug!(zoom, expected, actual, "Tile count changed");
                    false
                }
                Err(_) => false,
            }
        })
    }

    /// A manifest that lets the stage be skipped for `fingerprint`.
    pub fn is_current(&self, stage: Stage, fingerprint: &str) -> bool {
        self.stage == stage && self.fingerprint == fingerprint
    }
}

/// Serialize the identity of a stage's inputs into a comparable string.
pub fn fingerprint<T: Serialize>(value: &T) -> MapperResult<String> {
    serde_json::to_string(value).map_err(MapperError::from)
}
