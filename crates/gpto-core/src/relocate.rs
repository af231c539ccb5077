use std::fs;
use std::io;
use std::path::Path;

use chrono::NaiveDateTime;
use log::debug;

use crate::error::RecordError;
use crate::options::RelocationMode;
use crate::plan::{Collision, PlacementPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Copied,
    Moved,
    /// The plan pointed at an identical-looking file; nothing was written.
    Skipped,
}

/// Copy or move `source` to the planned path, creating missing directories.
///
/// An `AlreadyPresent` plan never overwrites: the existing file is kept and
/// the source is left where it is, in both modes.
pub fn relocate(source: &Path, plan: &PlacementPlan, mode: RelocationMode) -> Result<Relocation, RecordError> {
    if plan.collision == Collision::AlreadyPresent {
        debug!("{} already present at {}", source.display(), plan.path.display());
        return Ok(Relocation::Skipped);
    }

    let err = |source_err: io::Error| RecordError::Relocate {
        from: source.to_path_buf(),
        to: plan.path.clone(),
        source: source_err,
    };

    fs::create_dir_all(&plan.dir).map_err(err)?;

    match mode {
        RelocationMode::Copy => {
            fs::copy(source, &plan.path).map_err(err)?;
            Ok(Relocation::Copied)
        }
        RelocationMode::Move => {
            move_file(source, &plan.path).map_err(err)?;
            Ok(Relocation::Moved)
        }
    }
}

/// Rename, or copy + remove when the rename crosses filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    if let Err(e) = fs::remove_file(from) {
        // The source stays the only copy.
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Set the file's modification time to the capture instant (local time).
pub fn stamp_mtime(path: &Path, instant: &NaiveDateTime) -> io::Result<()> {
    let Some(local) = instant.and_local_timezone(chrono::Local).earliest() else {
        return Ok(());
    };
    let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    filetime::set_file_mtime(path, ft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn plan_for(dir: &Path, name: &str, collision: Collision) -> PlacementPlan {
        PlacementPlan {
            dir: dir.to_path_buf(),
            file_name: name.to_string(),
            path: dir.join(name),
            collision,
        }
    }

    #[test]
    fn test_copy_creates_dirs_and_keeps_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_001.jpg");
        fs::write(&source, b"pixels").unwrap();
        let plan = plan_for(&dir.path().join("out/2020/7"), "IMG_001.jpg", Collision::Free);

        assert_eq!(relocate(&source, &plan, RelocationMode::Copy).unwrap(), Relocation::Copied);
        assert!(source.exists());
        assert_eq!(fs::read(&plan.path).unwrap(), b"pixels");
    }

    #[test]
    fn test_move_removes_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_001.jpg");
        fs::write(&source, b"pixels").unwrap();
        let plan = plan_for(&dir.path().join("out/2020/7"), "IMG_001 (1).jpg", Collision::Renamed(1));

        assert_eq!(relocate(&source, &plan, RelocationMode::Move).unwrap(), Relocation::Moved);
        assert!(!source.exists());
        assert_eq!(fs::read(&plan.path).unwrap(), b"pixels");
    }

    #[test]
    fn test_already_present_writes_nothing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("IMG_001.jpg");
        fs::write(&source, b"abcdef").unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("IMG_001.jpg"), b"ABCDEF").unwrap();
        let plan = plan_for(&out, "IMG_001.jpg", Collision::AlreadyPresent);

        assert_eq!(relocate(&source, &plan, RelocationMode::Move).unwrap(), Relocation::Skipped);
        assert!(source.exists());
        assert_eq!(fs::read(&plan.path).unwrap(), b"ABCDEF");
    }

    #[test]
    fn test_missing_source_is_a_record_error() {
        let dir = tempdir().unwrap();
        let plan = plan_for(dir.path(), "x.jpg", Collision::Free);
        assert!(matches!(
            relocate(&dir.path().join("gone.jpg"), &plan, RelocationMode::Copy),
            Err(RecordError::Relocate { .. })
        ));
    }

    #[test]
    fn test_stamp_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"x").unwrap();
        let instant = NaiveDate::from_ymd_opt(2020, 7, 4).unwrap().and_hms_opt(12, 0, 0).unwrap();
        stamp_mtime(&path, &instant).unwrap();

        let expected = instant.and_local_timezone(chrono::Local).earliest().unwrap().timestamp();
        let meta = fs::metadata(&path).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), expected);
    }
}
