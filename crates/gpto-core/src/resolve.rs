use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::RecordError;
use crate::metadata::MetadataRecord;
use crate::scan::is_metadata;

/// `IMG.jpg(1)` -> name `IMG`, ext `jpg`, bracket `(1)`
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+)\.(?P<ext>[^.()]+)(?P<bracket>\(\d+\))$").unwrap());

/// Which rule located the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    ExactStem,
    StemPrefix,
    Title,
    BracketSwap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCandidate {
    pub path: PathBuf,
    pub matched_by: MatchKind,
}

/// Locate the media file described by a metadata sidecar.
///
/// Export tools truncate and suffix names inconsistently between the sidecar
/// and the asset, so several rules are tried in order: the sidecar name minus
/// `.json`, any sibling starting with that stem, the `title` recorded in the
/// metadata, and finally the `(n)` swap Takeout applies to duplicate names.
pub fn resolve_asset(metadata_path: &Path, record: &MetadataRecord) -> Result<AssetCandidate, RecordError> {
    let dir = metadata_path.parent().unwrap_or(Path::new(""));
    let stem = metadata_path.file_stem().unwrap_or_default();
    let usable = |path: &Path| path != metadata_path && !is_metadata(path) && path.is_file();

    let exact = dir.join(stem);
    if usable(&exact) {
        return Ok(AssetCandidate { path: exact, matched_by: MatchKind::ExactStem });
    }

    if let Some(path) = first_with_prefix(dir, stem, &usable) {
        return Ok(AssetCandidate { path, matched_by: MatchKind::StemPrefix });
    }

    let title_path = record
        .title
        .as_deref()
        .and_then(|title| Path::new(title).file_name())
        .map(|name| dir.join(name));
    if let Some(path) = &title_path {
        if usable(path) {
            return Ok(AssetCandidate { path: path.clone(), matched_by: MatchKind::Title });
        }
    }

    if let Some(name) = stem.to_str().and_then(bracket_swap) {
        let path = dir.join(name);
        if usable(&path) {
            return Ok(AssetCandidate { path, matched_by: MatchKind::BracketSwap });
        }
    }

    Err(RecordError::MissingAsset {
        expected: title_path.unwrap_or(exact),
    })
}

/// First sibling (in name order) whose file name starts with `stem`.
fn first_with_prefix(dir: &Path, stem: &OsStr, usable: &dyn Fn(&Path) -> bool) -> Option<PathBuf> {
    let prefix = stem.to_str().filter(|s| !s.is_empty())?;
    let entries = fs::read_dir(if dir.as_os_str().is_empty() { Path::new(".") } else { dir }).ok()?;

    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_name().to_str().map_or(false, |name| name.starts_with(prefix)))
        .map(|entry| dir.join(entry.file_name()))
        .filter(|path| usable(path))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn bracket_swap(stem: &str) -> Option<String> {
    let caps = BRACKET_RE.captures(stem)?;
    Some(format!("{}{}.{}", &caps["name"], &caps["bracket"], &caps["ext"]))
}
