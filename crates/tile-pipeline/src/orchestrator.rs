//! Sequencing of the three pipeline stages.
//!
//! A run goes Normalize → Mosaic → Tile. Each stage leaves a manifest in the
//! work directory once all of its outputs are in place; the next invocation
//! skips a stage whose manifest still matches its inputs and whose outputs
//! are intact. When a stage actually runs, everything downstream of it is
//! stale and is removed before the downstream stage starts.

use crate::config::{PipelineConfig, SourceErrorPolicy, OVERLAP_POLICY};
use crate::manifest::{fingerprint, StageManifest};
use crate::metadata::TileSetMetadata;
use crate::mosaic::MosaicBuilder;
use crate::normalize::{NormalizedRaster, RasterNormalizer};
use crate::plan::PyramidPlan;
use crate::pyramid::{PyramidSummary, PyramidTiler};
use crate::store::DirectoryTileStore;
use mosaic_common::{MapperError, MapperResult};
use raster_io::atomic::is_partial;
use raster_io::raster::read_header;
use raster_io::{discover_sources, RasterHeader, SourceRaster};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

const NORMALIZED_DIR: &str = "normalized";
const MANIFEST_FILE: &str = "manifest.json";
const MOSAIC_FILE: &str = "mosaic.tif";
const MOSAIC_MANIFEST: &str = "mosaic.json";
const TILES_MANIFEST: &str = "tiles.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Mosaic,
    Tile,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Normalize, Stage::Mosaic, Stage::Tile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Mosaic => "mosaic",
            Stage::Tile => "tile",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    /// `skipped` is set when existing outputs were found complete.
    Done { skipped: bool },
    Failed { cause: String },
}

impl StageStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Done { .. })
    }
}

/// Status of every stage of one run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub normalize: StageStatus,
    pub mosaic: StageStatus,
    pub tile: StageStatus,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Normalize => &self.normalize,
            Stage::Mosaic => &self.mosaic,
            Stage::Tile => &self.tile,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        debug!(%stage, ?status, "Stage status");
        match stage {
            Stage::Normalize => self.normalize = status,
            Stage::Mosaic => self.mosaic = status,
            Stage::Tile => self.tile = status,
        }
    }

    pub fn is_complete(&self) -> bool {
        Stage::ALL.iter().all(|s| self.status(*s).is_done())
    }

    /// Whether every stage was satisfied by earlier outputs.
    pub fn all_skipped(&self) -> bool {
        Stage::ALL
            .iter()
            .all(|s| *self.status(*s) == StageStatus::Done { skipped: true })
    }
}

/// Terminal status of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Aborted {
        stage: Stage,
        /// Identifier of the input being processed, when the failure concerns one.
        input: Option<String>,
        cause: MapperError,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// The failure, as reported to the user.
    pub fn message(&self) -> Option<String> {
        match self {
            RunOutcome::Completed => None,
            RunOutcome::Aborted {
                stage,
                input: Some(input),
                cause,
            } => Some(format!(
                "stage '{}' failed on input '{}': {}",
                stage, input, cause
            )),
            RunOutcome::Aborted {
                stage,
                input: None,
                cause,
            } => Some(format!("stage '{}' failed: {}", stage, cause)),
        }
    }
}

/// Everything a caller learns from one invocation.
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub outcome: RunOutcome,
    pub plan: Option<PyramidPlan>,
    /// Inputs dropped under [`SourceErrorPolicy::Skip`].
    pub skipped_inputs: Vec<String>,
    /// Stored tiles per level, from this run or from the skipped stage's manifest.
    pub tile_counts: BTreeMap<u32, u64>,
    pub elapsed_ms: u64,
}

/// Failure of one stage, before it is turned into a [`RunOutcome`].
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    input: Option<String>,
    cause: MapperError,
}

impl StageFailure {
    fn new(stage: Stage, cause: MapperError) -> Self {
        Self {
            stage,
            input: None,
            cause,
        }
    }

    fn on_input(stage: Stage, input: impl Into<String>, cause: MapperError) -> Self {
        Self {
            stage,
            input: Some(input.into()),
            cause,
        }
    }
}

/// Result of the normalize stage handed to the mosaic stage.
struct NormalizeOutput {
    rasters: Vec<NormalizedRaster>,
    fingerprint: String,
    ran: bool,
}

struct MosaicStageOutput {
    header: RasterHeader,
    path: PathBuf,
    fingerprint: String,
    ran: bool,
}

/// Drives a pipeline run for one configuration.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> MapperResult<Self> {
        config.validate().map_err(MapperError::InvalidConfig)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn normalized_dir(&self) -> PathBuf {
        self.config.work_dir.join(NORMALIZED_DIR)
    }

    fn mosaic_path(&self) -> PathBuf {
        self.config.work_dir.join(MOSAIC_FILE)
    }

    /// Discover and open the sources, and derive the pyramid plan, without
    /// writing anything.
    pub fn plan(&self) -> MapperResult<(PyramidPlan, Vec<SourceRaster>)> {
        let (sources, _) = self.open_sources().map_err(|f| f.cause)?;
        let plan = PyramidPlan::from_config(&self.config, &sources)?;
        Ok((plan, sources))
    }

    /// Run every stage. Statuses already in `state` are replaced: completion
    /// is re-established from the manifests on disk.
    pub fn run(&self, mut state: PipelineState) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let _enter = span.enter();
        let start = Instant::now();

        for stage in Stage::ALL {
            state.set(stage, StageStatus::Pending);
        }

        let mut report = PipelineReport {
            run_id,
            state,
            outcome: RunOutcome::Completed,
            plan: None,
            skipped_inputs: Vec::new(),
            tile_counts: BTreeMap::new(),
            elapsed_ms: 0,
        };

        info!(
            input = %self.config.input_dir.display(),
            output = %self.config.output_dir.display(),
            workers = self.config.workers,
            "Starting pipeline run"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("tiler-worker-{}", i))
            .build();
        let result = match pool {
            Ok(pool) => pool.install(|| self.execute(&mut report)),
            Err(e) => Err(StageFailure::new(
                Stage::Normalize,
                MapperError::InvalidConfig(format!("cannot start worker pool: {}", e)),
            )),
        };

        if let Err(failure) = result {
            report.state.set(
                failure.stage,
                StageStatus::Failed {
                    cause: failure.cause.to_string(),
                },
            );
            report.outcome = RunOutcome::Aborted {
                stage: failure.stage,
                input: failure.input,
                cause: failure.cause,
            };
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        match report.outcome.message() {
            None => info!(
                elapsed_ms = report.elapsed_ms,
                skipped_inputs = report.skipped_inputs.len(),
                tiles = report.tile_counts.values().sum::<u64>(),
                "Pipeline completed"
            ),
            Some(message) => error!(elapsed_ms = report.elapsed_ms, "{}", message),
        }
        report
    }

    fn execute(&self, report: &mut PipelineReport) -> Result<(), StageFailure> {
        let (sources, skipped) = self.open_sources()?;
        report.skipped_inputs.extend(skipped);

        let plan = PyramidPlan::from_config(&self.config, &sources)
            .map_err(|e| StageFailure::new(Stage::Normalize, e))?;
        report.plan = Some(plan);
        info!(
            sources = sources.len(),
            max_zoom = plan.max_zoom,
            min_zoom = plan.min_zoom,
            auto_zoom = plan.auto_zoom,
            resolution = plan.resolution(plan.max_zoom),
            "Planned pyramid"
        );

        report.state.set(Stage::Normalize, StageStatus::Running);
        let normalized = self.normalize_stage(&plan, &sources, &mut report.skipped_inputs)?;
        report.state.set(
            Stage::Normalize,
            StageStatus::Done {
                skipped: !normalized.ran,
            },
        );

        report.state.set(Stage::Mosaic, StageStatus::Running);
        let mosaic = self.mosaic_stage(&normalized)?;
        report.state.set(Stage::Mosaic, StageStatus::Done { skipped: !mosaic.ran });

        report.state.set(Stage::Tile, StageStatus::Running);
        let (ran, tile_counts) = self.tile_stage(&plan, &mosaic)?;
        report.tile_counts = tile_counts;
        report.state.set(Stage::Tile, StageStatus::Done { skipped: !ran });

        Ok(())
    }

    /// Open every discovered source. Failures concerning one input are
    /// skipped or abort the run, per the configured policy.
    fn open_sources(&self) -> Result<(Vec<SourceRaster>, Vec<String>), StageFailure> {
        let fail = |e| StageFailure::new(Stage::Normalize, e);
        let paths = discover_sources(&self.config.input_dir).map_err(fail)?;
        if paths.is_empty() {
            return Err(fail(MapperError::EmptyInputSet));
        }
        let world_file_crs = self.config.world_file_crs().map_err(fail)?;

        let opened: Vec<(PathBuf, MapperResult<SourceRaster>)> = paths
            .into_par_iter()
            .map(|path| {
                let result = SourceRaster::open(&path, world_file_crs.as_ref());
                (path, result)
            })
            .collect();

        let mut sources = Vec::new();
        let mut skipped = Vec::new();
        let mut seen = BTreeSet::new();
        for (path, result) in opened {
            let name = input_name(&path);
            match result {
                Ok(src) => {
                    if !seen.insert(src.id.clone()) {
                        return Err(StageFailure::on_input(
                            Stage::Normalize,
                            name,
                            MapperError::incompatible(
                                &src.id,
                                "another source in the input tree has the same file name",
                            ),
                        ));
                    }
                    sources.push(src);
                }
                Err(e) => self.per_input_failure(&name, e, &mut skipped)?,
            }
        }

        if sources.is_empty() {
            return Err(fail(MapperError::EmptyInputSet));
        }
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok((sources, skipped))
    }

    fn per_input_failure(
        &self,
        input: &str,
        cause: MapperError,
        skipped: &mut Vec<String>,
    ) -> Result<(), StageFailure> {
        if self.config.source_errors == SourceErrorPolicy::Skip && cause.is_per_input() {
            warn!(input, error = %cause, kind = cause.kind(), "Skipping input");
            skipped.push(input.to_string());
            Ok(())
        } else {
            Err(StageFailure::on_input(Stage::Normalize, input, cause))
        }
    }

    fn normalize_stage(
        &self,
        plan: &PyramidPlan,
        sources: &[SourceRaster],
        skipped: &mut Vec<String>,
    ) -> Result<NormalizeOutput, StageFailure> {
        let fail = |e| StageFailure::new(Stage::Normalize, e);
        let dir = self.normalized_dir();
        let manifest_path = dir.join(MANIFEST_FILE);
        let stamps: Vec<_> = sources.iter().map(|s| &s.stamp).collect();
        // the zoom range and scheme only matter to tiling
        let fp = fingerprint(&(
            &plan.crs,
            plan.tile_size,
            plan.max_zoom,
            &self.config.encoding,
            self.config.resampling,
            self.config.window_rows,
            &self.config.world_file_crs,
            &stamps,
        ))
        .map_err(fail)?;

        let previous = StageManifest::load(&manifest_path);
        if let Some(manifest) = &previous {
            if manifest.is_current(Stage::Normalize, &fp) && manifest.outputs_intact(&dir) {
                match open_recorded(&dir, manifest) {
                    Ok(rasters) => {
                        info!(rasters = rasters.len(), "Normalized rasters are current, skipping");
                        return Ok(NormalizeOutput {
                            rasters,
                            fingerprint: fp,
                            ran: false,
                        });
                    }
                    Err(e) => debug!(error = %e, "Recorded normalized raster unreadable"),
                }
            }
            // Outputs of another configuration; per-file reuse is only safe
            // after an interrupted run of this one.
            clear_dir(&dir).map_err(fail)?;
        } else {
            remove_partials(&dir).map_err(fail)?;
        }

        let normalizer = RasterNormalizer::new(
            *plan,
            self.config.encoding,
            self.config.resampling,
            &dir,
        )
        .map_err(fail)?
        .with_window_rows(self.config.window_rows);

        // rows of one source are already rendered in parallel; running more
        // sources at once only multiplies the decoded planes held in memory
        let mut results: Vec<(String, MapperResult<NormalizedRaster>)> =
            Vec::with_capacity(sources.len());
        for batch in sources.chunks(self.config.max_parallel_sources) {
            results.par_extend(
                batch
                    .par_iter()
                    .map(|src| (src.id.clone(), normalizer.normalize(src))),
            );
        }

        let mut rasters = Vec::new();
        for (id, result) in results {
            match result {
                Ok(raster) => rasters.push(raster),
                Err(e) => self.per_input_failure(&id, e, skipped)?,
            }
        }
        if rasters.is_empty() {
            return Err(fail(MapperError::EmptyInputSet));
        }

        let mut manifest = StageManifest::new(Stage::Normalize, fp.clone(), Uuid::new_v4());
        for raster in &rasters {
            manifest.record_output(&dir, &raster.path).map_err(fail)?;
        }
        manifest.save(&manifest_path).map_err(fail)?;

        let reused = rasters.iter().filter(|r| r.reused).count();
        info!(rasters = rasters.len(), reused, "Normalize stage complete");
        Ok(NormalizeOutput {
            rasters,
            fingerprint: fp,
            ran: true,
        })
    }

    fn mosaic_stage(&self, normalized: &NormalizeOutput) -> Result<MosaicStageOutput, StageFailure> {
        let fail = |e| StageFailure::new(Stage::Mosaic, e);
        let path = self.mosaic_path();
        let manifest_path = self.config.work_dir.join(MOSAIC_MANIFEST);
        let inputs: Vec<(&str, u64)> = normalized
            .rasters
            .iter()
            .map(|r| (r.id(), r.bytes))
            .collect();
        let fp = fingerprint(&(
            &normalized.fingerprint,
            &inputs,
            self.config.window_rows,
            OVERLAP_POLICY,
        ))
        .map_err(fail)?;

        if !normalized.ran {
            if let Some(manifest) = StageManifest::load(&manifest_path) {
                if manifest.is_current(Stage::Mosaic, &fp)
                    && manifest.outputs_intact(&self.config.work_dir)
                {
                    if let Ok(header) = read_header(&path) {
                        info!("Mosaic is current, skipping");
                        return Ok(MosaicStageOutput {
                            header,
                            path,
                            fingerprint: fp,
                            ran: false,
                        });
                    }
                }
            }
        }

        remove_file_if_exists(&manifest_path).map_err(fail)?;
        remove_file_if_exists(&path).map_err(fail)?;
        remove_partials(&self.config.work_dir).map_err(fail)?;

        let output = MosaicBuilder::new(self.config.window_rows, self.config.workers)
            .build(&normalized.rasters, &path)
            .map_err(|e| {
                let input = match &e {
                    MapperError::IncompatibleRaster { id, .. } => Some(id.clone()),
                    _ => None,
                };
                StageFailure {
                    stage: Stage::Mosaic,
                    input,
                    cause: e,
                }
            })?;

        let mut manifest = StageManifest::new(Stage::Mosaic, fp.clone(), Uuid::new_v4());
        manifest
            .record_output(&self.config.work_dir, &output.path)
            .map_err(fail)?;
        manifest.save(&manifest_path).map_err(fail)?;

        Ok(MosaicStageOutput {
            header: output.header,
            path: output.path,
            fingerprint: fp,
            ran: true,
        })
    }

    /// Returns whether the stage ran, and the stored tiles per level.
    fn tile_stage(
        &self,
        plan: &PyramidPlan,
        mosaic: &MosaicStageOutput,
    ) -> Result<(bool, BTreeMap<u32, u64>), StageFailure> {
        let fail = |e| StageFailure::new(Stage::Tile, e);
        let output_dir = &self.config.output_dir;
        let manifest_path = self.config.work_dir.join(TILES_MANIFEST);
        let store = DirectoryTileStore::new(output_dir, plan.scheme);
        let fp = fingerprint(&(
            &mosaic.fingerprint,
            plan,
            &self.config.encoding,
            self.config.empty_tiles,
        ))
        .map_err(fail)?;

        let previous = StageManifest::load(&manifest_path);
        if let (false, Some(manifest)) = (mosaic.ran, &previous) {
            if manifest.is_current(Stage::Tile, &fp)
                && manifest.outputs_intact(output_dir)
                && manifest.tiles_intact(&store)
            {
                info!(tiles = manifest.tile_counts.values().sum::<u64>(), "Tiles are current, skipping");
                return Ok((false, manifest.tile_counts.clone()));
            }
        }

        // Tiles already present can only be kept after an interrupted run
        // over the same mosaic.
        let resume = !mosaic.ran && previous.is_none();
        remove_file_if_exists(&manifest_path).map_err(fail)?;
        remove_file_if_exists(&TileSetMetadata::path(output_dir)).map_err(fail)?;
        if resume {
            let removed = store.remove_partials().map_err(fail)?;
            debug!(removed, "Resuming tile stage");
        } else {
            store.purge().map_err(fail)?;
            store.remove_partials().map_err(fail)?;
        }

        let summary: PyramidSummary = PyramidTiler::new(
            &store,
            *plan,
            self.config.encoding,
            self.config.empty_tiles,
        )
        .with_resume(resume)
        .build(&mosaic.path)
        .map_err(fail)?;

        let metadata =
            TileSetMetadata::describe(plan, &mosaic.header, &summary, self.config.empty_tiles);
        let metadata_path = metadata.write(output_dir).map_err(fail)?;

        let tile_counts = summary.tile_counts();
        let mut manifest = StageManifest::new(Stage::Tile, fp, Uuid::new_v4());
        manifest
            .record_output(output_dir, &metadata_path)
            .map_err(fail)?;
        manifest.tile_counts = tile_counts.clone();
        manifest.save(&manifest_path).map_err(fail)?;

        info!(tiles = summary.total_stored(), levels = summary.levels.len(), "Tile stage complete");
        Ok((true, tile_counts))
    }
}

fn input_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Open the normalized rasters listed in a manifest.
fn open_recorded(dir: &Path, manifest: &StageManifest) -> MapperResult<Vec<NormalizedRaster>> {
    manifest
        .outputs
        .iter()
        .map(|record| NormalizedRaster::open(&dir.join(&record.path)))
        .collect()
}

fn remove_file_if_exists(path: &Path) -> MapperResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MapperError::storage(path, e)),
    }
}

/// Remove every file directly in `dir`.
fn clear_dir(dir: &Path) -> MapperResult<()> {
    for_each_file(dir, |path| path.is_file(), "Cleared stale intermediates")
}

/// Remove leftovers of interrupted writes directly in `dir`.
fn remove_partials(dir: &Path) -> MapperResult<()> {
    for_each_file(dir, is_partial, "Removed partial files")
}

fn for_each_file(dir: &Path, select: impl Fn(&Path) -> bool, what: &str) -> MapperResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(MapperError::storage(dir, e)),
    };
    let mut removed = 0usize;
    for entry in entries {
        let path = entry.map_err(|e| MapperError::storage(dir, e))?.path();
        if path.is_file() && select(&path) {
            fs::remove_file(&path).map_err(|e| MapperError::storage(&path, e))?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "{}", what);
    }
    Ok(())
}
