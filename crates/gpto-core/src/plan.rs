use std::cell::OnceCell;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};

use crate::error::RecordError;
use crate::metadata::Disposition;
use crate::options::{DuplicatePolicy, ProcessOptions, TitlePolicy};
use crate::transcode::Transcoder;

pub const ARCHIVED_DIR: &str = "Archived";

/// What currently sits at a destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    File(u64),
    /// Directory, socket or anything else that is never "the same asset".
    Other,
}

/// Live view of the destination tree. Every planning decision re-queries it,
/// so the outcome for one record depends on everything placed before it.
pub trait Probe {
    fn occupant(&self, path: &Path) -> Option<Occupant>;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveDisk;

impl Probe for LiveDisk {
    fn occupant(&self, path: &Path) -> Option<Occupant> {
        let meta = fs::metadata(path).ok()?;
        Some(if meta.is_file() { Occupant::File(meta.len()) } else { Occupant::Other })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    /// Nothing at the computed path.
    Free,
    /// The computed path was taken; ` (n)` was appended.
    Renamed(u32),
    /// A same-sized file already sits at the computed path.
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    pub dir: PathBuf,
    pub file_name: String,
    pub path: PathBuf,
    pub collision: Collision,
}

/// `<output>[/Archived]/<YYYY>/<M>`
pub fn destination_dir(output: &Path, instant: &NaiveDateTime, disposition: Disposition) -> PathBuf {
    let base = match disposition {
        Disposition::Archived => output.join(ARCHIVED_DIR),
        _ => output.to_path_buf(),
    };
    base.join(format!("{:04}", instant.year())).join(instant.month().to_string())
}

fn destination_name(asset: &Path, instant: &NaiveDateTime, options: &ProcessOptions) -> Result<String, RecordError> {
    match options.title_policy {
        TitlePolicy::KeepOriginal => Ok(asset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()),
        TitlePolicy::FromDate => {
            let mut name = String::new();
            write!(name, "{}", instant.format(&options.date_format)).map_err(|_| RecordError::Naming {
                asset: asset.to_path_buf(),
                format: options.date_format.clone(),
            })?;
            if let Some(ext) = asset.extension() {
                name.push('.');
                name.push_str(&ext.to_string_lossy());
            }
            Ok(name)
        }
    }
}

/// `photo.jpg`, 2 -> `photo (2).jpg`
pub fn suffixed_name(file_name: &str, n: u32) -> String {
    let path = Path::new(file_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    }
}

/// Probe ` (1)`, ` (2)`, ... until a name with nothing on disk is found.
pub fn free_path(dir: &Path, file_name: &str, probe: &dyn Probe) -> (PathBuf, u32) {
    let mut n = 1;
    loop {
        let candidate = dir.join(suffixed_name(file_name, n));
        if probe.occupant(&candidate).is_none() {
            return (candidate, n);
        }
        n += 1;
    }
}

/// Compute where an asset goes and whether the target name is already taken.
///
/// Candidates are the computed name, then ` (1)`, ` (2)`, ... A candidate is
/// free only if neither it nor the name `transcoder` would give it is
/// occupied. Under [`DuplicatePolicy::CompareBySize`] a file at either name
/// whose size matches the source, or the source as `transcoder` would
/// re-encode it, ends the search as `AlreadyPresent`.
pub fn plan_placement(
    asset: &Path,
    source_size: u64,
    instant: &NaiveDateTime,
    disposition: Disposition,
    options: &ProcessOptions,
    probe: &dyn Probe,
    transcoder: Option<&dyn Transcoder>,
) -> Result<PlacementPlan, RecordError> {
    let dir = destination_dir(&options.output, instant, disposition);
    let file_name = destination_name(asset, instant, options)?;

    let compare = options.duplicates == DuplicatePolicy::CompareBySize;
    let reencoded_len = OnceCell::new();
    let is_same = |size: u64| {
        compare
            && (size == source_size
                || transcoder.is_some_and(|t| *reencoded_len.get_or_init(|| t.output_len(asset)) == Some(size)))
    };

    let mut n = 0;
    loop {
        let name = if n == 0 { file_name.clone() } else { suffixed_name(&file_name, n) };
        let mut names = vec![name.clone()];
        if let Some(output) = transcoder.and_then(|t| t.output_name(&name)) {
            if output != name {
                names.push(output);
            }
        }

        let mut taken = false;
        for candidate in names {
            let path = dir.join(&candidate);
            match probe.occupant(&path) {
                None => {}
                Some(Occupant::File(size)) if is_same(size) => {
                    return Ok(PlacementPlan { dir, file_name: candidate, path, collision: Collision::AlreadyPresent });
                }
                Some(_) => taken = true,
            }
        }

        if !taken {
            let collision = if n == 0 { Collision::Free } else { Collision::Renamed(n) };
            let path = dir.join(&name);
            return Ok(PlacementPlan { dir, file_name: name, path, collision });
        }
        n += 1;
    }
}
