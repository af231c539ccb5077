pub mod archive;
pub mod error;
pub mod metadata;
pub mod options;
pub mod plan;
pub mod relocate;
pub mod resolve;
pub mod scan;
pub mod transcode;

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub use error::RecordError;
pub use options::{CompressOptions, DuplicatePolicy, ProcessOptions, RelocationMode, TitlePolicy};

use metadata::Disposition;
use plan::{Collision, LiveDisk, Probe};
use relocate::Relocation;
use transcode::{JpegTranscoder, KeepReason, TranscodeOutcome, Transcoder};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub archives_expanded: u64,
    pub records_found: u64,
    pub records_ignored: u64,
    /// Assets copied or moved into the output tree
    pub placed: u64,
    /// Of `placed`, how many needed a ` (n)` suffix
    pub renamed: u64,
    /// Same-sized file already at the destination
    pub already_present: u64,
    pub trashed: u64,
    pub missing_asset: u64,
    pub missing_date: u64,
    /// Unreadable or malformed metadata, failed copies/moves
    pub failed: u64,
    pub transcoded: u64,
    pub transcode_failed: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ProcessResult {
    pub fn skipped(&self) -> u64 {
        self.trashed + self.missing_asset + self.missing_date + self.failed
    }

    fn count(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Trashed => self.trashed += 1,
            RecordOutcome::AlreadyPresent { .. } => self.already_present += 1,
            RecordOutcome::Placed { collision, transcode, .. } => {
                self.placed += 1;
                if matches!(collision, Collision::Renamed(_)) {
                    self.renamed += 1;
                }
                match transcode {
                    Some(TranscodeOutcome::Reencoded(_)) => self.transcoded += 1,
                    Some(TranscodeOutcome::Unchanged(KeepReason::Failed(_))) => self.transcode_failed += 1,
                    _ => {}
                }
            }
        }
    }

    fn count_error(&mut self, error: &RecordError) {
        match error {
            RecordError::MissingAsset { .. } => self.missing_asset += 1,
            RecordError::MissingTimestamp { .. } | RecordError::InvalidTimestamp { .. } => self.missing_date += 1,
            _ => self.failed += 1,
        }
        self.warnings.push(error.to_string());
    }
}

/// What happened to one metadata record.
#[derive(Debug)]
pub enum RecordOutcome {
    Trashed,
    AlreadyPresent { dest: PathBuf },
    Placed {
        dest: PathBuf,
        collision: Collision,
        transcode: Option<TranscodeOutcome>,
    },
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter; emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Cell<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    const INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(inner: &'a ProgressCallback) -> Self {
        let start = Instant::now();
        Self {
            inner,
            last_emit: Cell::new(start.checked_sub(Self::INTERVAL).unwrap_or(start)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            if self.last_emit.get().elapsed() < Self::INTERVAL {
                return;
            }
            self.last_emit.set(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Resolve, plan, place and optionally transcode one record.
pub fn process_record(
    metadata_path: &Path,
    options: &ProcessOptions,
    probe: &dyn Probe,
    transcoder: Option<&dyn Transcoder>,
) -> Result<RecordOutcome, RecordError> {
    let record = metadata::read_record(metadata_path)?;

    let disposition = record.disposition();
    if disposition == Disposition::Trashed {
        debug!("{}: trashed, skipping", metadata_path.display());
        return Ok(RecordOutcome::Trashed);
    }

    let instant = record.capture_instant(metadata_path)?;
    let asset = resolve::resolve_asset(metadata_path, &record)?;
    debug!("{} -> {} ({:?})", metadata_path.display(), asset.path.display(), asset.matched_by);

    let source_size = fs::metadata(&asset.path)
        .map_err(|source| RecordError::Unreadable { path: asset.path.clone(), source })?
        .len();
    let plan = plan::plan_placement(&asset.path, source_size, &instant, disposition, options, probe, transcoder)?;

    if relocate::relocate(&asset.path, &plan, options.mode)? == Relocation::Skipped {
        return Ok(RecordOutcome::AlreadyPresent { dest: plan.path });
    }

    if options.set_mtime {
        if let Err(e) = relocate::stamp_mtime(&plan.path, &instant) {
            warn!("{}: cannot set modification time: {}", plan.path.display(), e);
        }
    }

    let transcode = transcoder.map(|t| t.reencode(&plan.path));
    let dest = match &transcode {
        Some(TranscodeOutcome::Reencoded(path)) => path.clone(),
        Some(TranscodeOutcome::Unchanged(KeepReason::Failed(e))) => {
            debug!("{}: kept original: {:#}", plan.path.display(), e);
            plan.path
        }
        _ => plan.path,
    };

    Ok(RecordOutcome::Placed {
        dest,
        collision: plan.collision,
        transcode,
    })
}

/// Run the full pipeline: expand archives, scan metadata, then place every
/// record one at a time.
///
/// Only configuration and archive errors are returned; per-record problems
/// are logged, counted and collected in [`ProcessResult::warnings`].
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback) -> anyhow::Result<ProcessResult> {
    options.validate()?;
    let tp = ThrottledProgress::new(progress_callback);
    let mut result = ProcessResult::default();

    // Stage 1: Expand archives in place
    if options.expand_archives {
        let summary = archive::expand_archives(&options.source, &tp)?;
        result.archives_expanded = summary.containers;
    }

    // Stage 2: Collect metadata records
    let scan = scan::scan_metadata(&options.source);
    result.records_found = scan.records.len() as u64;
    result.records_ignored = scan.ignored;
    result.warnings.extend(scan.warnings);
    info!(
        "Found {} metadata records ({} ignored) in {}",
        result.records_found,
        result.records_ignored,
        options.source.display()
    );

    // Stage 3: Place each record; order matters for collision suffixes
    let transcoder = options.compress.enabled.then(|| JpegTranscoder::new(&options.compress));
    let transcoder = transcoder.as_ref().map(|t| t as &dyn Transcoder);
    let total = scan.records.len() as u64;

    for (i, metadata_path) in scan.records.iter().enumerate() {
        tp.report("organize", i as u64, total, &metadata_path.display().to_string());
        match process_record(metadata_path, options, &LiveDisk, transcoder) {
            Ok(outcome) => result.count(&outcome),
            Err(e) => {
                warn!("{}", e);
                result.count_error(&e);
            }
        }
    }

    info!(
        "Placed {} files ({} renamed, {} already present, {} skipped)",
        result.placed,
        result.renamed,
        result.already_present,
        result.skipped()
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_throttled_progress_always_emits_last() {
        let calls = std::sync::Arc::new(AtomicU64::new(0));
        let cb_calls = std::sync::Arc::clone(&calls);
        let cb = move |_: &str, _: u64, _: u64, _: &str| {
            cb_calls.fetch_add(1, Ordering::Relaxed);
        };
        let tp = ThrottledProgress::new(&cb);
        for i in 0..1000 {
            tp.report("organize", i, 1000, "");
        }
        let n = calls.load(Ordering::Relaxed);
        assert!(n >= 2, "first and last report expected, got {}", n);
        assert!(n < 1000);
    }

    #[test]
    fn test_result_counters() {
        let mut result = ProcessResult::default();
        result.count(&RecordOutcome::Trashed);
        result.count(&RecordOutcome::Placed {
            dest: PathBuf::from("a"),
            collision: Collision::Renamed(1),
            transcode: None,
        });
        result.count_error(&RecordError::MissingAsset { expected: PathBuf::from("x.jpg") });
        result.count_error(&RecordError::MissingTimestamp { metadata: PathBuf::from("x.json") });

        assert_eq!(result.placed, 1);
        assert_eq!(result.renamed, 1);
        assert_eq!(result.skipped(), 3);
        assert_eq!(result.warnings, vec!["x.jpg: not found", "x.json: missing date"]);
    }
}
