use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

pub const METADATA_EXTENSION: &str = "json";

/// Sidecars that describe albums or the account rather than a single asset.
pub const IGNORED_METADATA: &[&str] = &[
    "metadata.json",
    "print-subscriptions.json",
    "shared_album_comments.json",
    "user-generated-memory-titles.json",
];

/// Result of scanning the source tree
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Metadata files to process, sorted by path
    pub records: Vec<PathBuf>,
    /// Denylisted sidecars that were skipped
    pub ignored: u64,
    pub warnings: Vec<String>,
}

pub fn is_metadata(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(METADATA_EXTENSION))
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |name| IGNORED_METADATA.contains(&name))
}

/// Recursively collect metadata records under `root`.
///
/// Records come back sorted so that collision suffixes are assigned the
/// same way on every run and platform.
pub fn scan_metadata(root: &Path) -> ScanResult {
    let mut result = ScanResult::default();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                result.warnings.push(e.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_metadata(entry.path()) {
            continue;
        }
        if is_ignored(entry.path()) {
            result.ignored += 1;
            continue;
        }
        result.records.push(entry.into_path());
    }

    result.records.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Photos from 2020")).unwrap();
        fs::create_dir_all(root.join("Trip")).unwrap();
        for name in [
            "Photos from 2020/b.jpg.json",
            "Photos from 2020/a.jpg.json",
            "Photos from 2020/a.jpg",
            "Trip/metadata.json",
            "Trip/c.JSON",
            "print-subscriptions.json",
        ] {
            fs::write(root.join(name), b"{}").unwrap();
        }

        let scan = scan_metadata(root);
        assert_eq!(scan.ignored, 2);
        assert_eq!(
            scan.records,
            vec![
                root.join("Photos from 2020/a.jpg.json"),
                root.join("Photos from 2020/b.jpg.json"),
                root.join("Trip/c.JSON"),
            ]
        );
    }

    #[test]
    fn test_is_metadata() {
        assert!(is_metadata(Path::new("x/IMG_1.jpg.json")));
        assert!(!is_metadata(Path::new("x/IMG_1.jpg")));
        assert!(!is_metadata(Path::new("x/json")));
    }
}
